//! Contact queue - ordered recipients with stable indices
//!
//! The dispatcher's progress cursor indexes into this exact ordering, so the
//! order of the input file is kept verbatim.

use crate::error::{Error, Result};
use std::path::Path;

/// A single recipient of the bulk message
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub name: String,
    pub phone: Option<String>,
}

impl Recipient {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: Some(phone.into()),
        }
    }

    /// Normalized destination, or None when the phone is missing or malformed
    pub fn destination(&self) -> Option<String> {
        self.phone.as_deref().and_then(normalize_destination)
    }
}

/// Ordered, index-stable sequence of recipients
#[derive(Debug, Clone, Default)]
pub struct ContactQueue {
    recipients: Vec<Recipient>,
}

impl ContactQueue {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }

    /// Load a JSON array of `{name, phone}` objects
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let contacts: Vec<serde_json::Value> = serde_json::from_str(content)
            .map_err(|e| Error::Parse(format!("contacts JSON: {}", e)))?;

        let recipients = contacts
            .iter()
            .map(|c| {
                let name = c["name"].as_str().unwrap_or("").trim().to_string();
                // Spreadsheet exports often store phones as numbers
                let phone = match &c["phone"] {
                    serde_json::Value::String(s) if !s.trim().is_empty() => {
                        Some(s.trim().to_string())
                    }
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                Recipient { name, phone }
            })
            .collect();

        Ok(Self { recipients })
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Recipient> {
        self.recipients.get(index)
    }

    /// Recipients from `start` onward, paired with their absolute index
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = (usize, &Recipient)> {
        self.recipients.iter().enumerate().skip(start)
    }

    /// Count of recipients without a usable destination
    pub fn malformed_count(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| r.destination().is_none())
            .count()
    }
}

/// Normalize a phone number to international digits (E.164 without the `+`)
///
/// Formatting characters are dropped; anything else, or a digit count outside
/// 8..=15, makes the destination malformed.
pub fn normalize_destination(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let mut digits = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    if (8..=15).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_digits() {
        assert_eq!(
            normalize_destination("5511987654321"),
            Some("5511987654321".to_string())
        );
    }

    #[test]
    fn test_normalize_with_plus_and_spaces() {
        assert_eq!(
            normalize_destination("+55 11 98765-4321"),
            Some("5511987654321".to_string())
        );
    }

    #[test]
    fn test_normalize_with_parens() {
        assert_eq!(
            normalize_destination("+1 (617) 555-1234"),
            Some("16175551234".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_letters() {
        assert_eq!(normalize_destination("call me"), None);
        assert_eq!(normalize_destination("617-555-12x4"), None);
    }

    #[test]
    fn test_normalize_rejects_bad_length() {
        assert_eq!(normalize_destination(""), None);
        assert_eq!(normalize_destination("12345"), None);
        assert_eq!(normalize_destination("1234567890123456"), None);
    }

    #[test]
    fn test_from_json_preserves_order() {
        let queue = ContactQueue::from_json(
            r#"[
                {"name": "Maria", "phone": "5511999990001"},
                {"name": "João", "phone": "5511999990002"},
                {"name": "Ana", "phone": "5511999990003"}
            ]"#,
        )
        .unwrap();

        assert_eq!(queue.len(), 3);
        let names: Vec<_> = queue.iter_from(0).map(|(_, r)| r.name.as_str()).collect();
        assert_eq!(names, vec!["Maria", "João", "Ana"]);
    }

    #[test]
    fn test_from_json_numeric_and_missing_phones() {
        let queue = ContactQueue::from_json(
            r#"[
                {"name": "Numeric", "phone": 5511999990001},
                {"name": "Missing"},
                {"name": "Blank", "phone": "  "},
                {"name": "Null", "phone": null}
            ]"#,
        )
        .unwrap();

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.get(0).unwrap().phone.as_deref(), Some("5511999990001"));
        assert!(queue.get(1).unwrap().phone.is_none());
        assert!(queue.get(2).unwrap().phone.is_none());
        assert_eq!(queue.malformed_count(), 3);
    }

    #[test]
    fn test_from_json_invalid() {
        let result = ContactQueue::from_json("{not json");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_iter_from_uses_absolute_indices() {
        let queue = ContactQueue::new(vec![
            Recipient::new("A", "5511999990001"),
            Recipient::new("B", "5511999990002"),
            Recipient::new("C", "5511999990003"),
        ]);

        let indices: Vec<_> = queue.iter_from(1).map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(queue.iter_from(3).count(), 0);
        assert_eq!(queue.iter_from(10).count(), 0);
    }

    #[test]
    fn test_recipient_equality() {
        let r1 = Recipient::new("Test User", "+16175551234");
        let r2 = r1.clone();
        assert_eq!(r1, r2);
        assert_eq!(r1.destination(), Some("16175551234".to_string()));
    }
}
