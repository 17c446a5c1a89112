//! Driver diagnostics
//!
//! Maps the free-form stderr of the channel driver onto typed failure reasons
//! using regex patterns, so the dispatcher never has to parse driver text.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

/// Why a single delivery did not go through
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Destination rejected as invalid or not registered on the channel
    InvalidDestination,
    /// Automation could not find the element it needed
    ElementNotFound,
    /// Session lost its login mid-run
    NotLoggedIn,
    /// No acknowledgement within the send timeout
    Timeout,
    /// Anything else the driver reported
    Other(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::InvalidDestination => write!(f, "invalid_destination"),
            FailureReason::ElementNotFound => write!(f, "element_not_found"),
            FailureReason::NotLoggedIn => write!(f, "not_logged_in"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Other(detail) => write!(f, "other:{}", detail),
        }
    }
}

/// Ordered: the first matching pattern wins
static FAILURE_PATTERNS: Lazy<Vec<(Regex, FailureReason)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)phone number shared via url is invalid|invalid (phone|number|destination)|not on whatsapp").unwrap(),
            FailureReason::InvalidDestination,
        ),
        (
            Regex::new(r"(?i)qr ?code|not logged in|login required|logged out").unwrap(),
            FailureReason::NotLoggedIn,
        ),
        (
            Regex::new(r"(?i)no such element|element not found|unable to locate element|stale element").unwrap(),
            FailureReason::ElementNotFound,
        ),
        (
            Regex::new(r"(?i)time(d)? ?out|deadline exceeded").unwrap(),
            FailureReason::Timeout,
        ),
    ]
});

/// Markers that mean the driver is sitting on a login screen
static LOGIN_PROMPT_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)data-testid='qrcode'",
        r"(?i)scan (the )?qr code",
        r"(?i)use whatsapp on your (computer|phone)",
        r"(?i)link (a|with) (phone|device)",
    ])
    .expect("Invalid login prompt regex")
});

/// Classify driver error output into a failure reason
pub fn classify_failure(output: &str) -> FailureReason {
    for (pattern, reason) in FAILURE_PATTERNS.iter() {
        if pattern.is_match(output) {
            return reason.clone();
        }
    }

    let first_line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown");
    FailureReason::Other(first_line.chars().take(120).collect())
}

/// Whether driver output shows a login screen rather than a ready session
pub fn shows_login_prompt(output: &str) -> bool {
    LOGIN_PROMPT_PATTERNS.is_match(output)
}
