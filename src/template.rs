//! Message template with a literal name placeholder

use crate::error::{Error, Result};

/// Marker replaced by the recipient's name
pub const NAME_PLACEHOLDER: &str = "%name%";

/// Replace every placeholder occurrence with `name`, leaving everything else untouched
pub fn render(template: &str, name: &str) -> String {
    template.replace(NAME_PLACEHOLDER, name)
}

/// A validated message body
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTemplate {
    body: String,
}

impl MessageTemplate {
    pub fn new(body: impl Into<String>) -> Result<Self> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(Error::Parse("message template is empty".into()));
        }
        Ok(Self { body })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn has_placeholder(&self) -> bool {
        self.body.contains(NAME_PLACEHOLDER)
    }

    pub fn render(&self, name: &str) -> String {
        render(&self.body, name)
    }
}
