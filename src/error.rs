//! Error types for bulk-dispatch

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Channel not authenticated after waiting {}s", .0.as_secs())]
    AuthenticationTimeout(Duration),

    #[error("Dispatch already running on this channel")]
    AlreadyRunning,

    #[error("Progress file locked by another dispatcher: {0}")]
    ProgressLocked(String),

    #[error("Failed to persist progress: {0}")]
    Persistence(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
