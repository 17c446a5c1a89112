//! Delivery channel capability - the external collaborator the dispatcher drives

use crate::diagnostics::FailureReason;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// How a channel should present itself while authenticating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Background probe, no user interaction possible
    Headless,
    /// Visible session where the user can complete login (e.g. scan a QR code)
    Interactive,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Headless => write!(f, "headless"),
            AuthMode::Interactive => write!(f, "interactive"),
        }
    }
}

/// Result of handing one message to the channel
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Delivered,
    Failed(FailureReason),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// A single exclusive session on the delivery channel
///
/// `Err` from any method means the session itself misbehaved; a message the
/// channel refused is `Ok(SendOutcome::Failed)`.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn is_authenticated(&mut self) -> Result<bool>;

    async fn authenticate(&mut self, mode: AuthMode, timeout: Duration) -> Result<bool>;

    async fn send(&mut self, destination: &str, text: &str) -> Result<SendOutcome>;

    /// Release the session; called exactly once on every exit path of a run
    async fn close(&mut self) -> Result<()>;
}

/// Acquires a fresh channel session for one dispatch run
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Fails with `ChannelUnavailable` when no session can be created
    async fn connect(&self) -> Result<Box<dyn Channel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_mode_display() {
        assert_eq!(AuthMode::Headless.to_string(), "headless");
        assert_eq!(AuthMode::Interactive.to_string(), "interactive");
    }

    #[test]
    fn test_send_outcome() {
        assert!(SendOutcome::Delivered.is_delivered());
        assert!(!SendOutcome::Failed(FailureReason::InvalidDestination).is_delivered());
    }
}
