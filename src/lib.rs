//! Bulk Dispatch - rate-limited, resumable bulk messaging
//!
//! Sends a personalized message to every contact in an ordered list through a
//! single logged-in channel session, honoring an hourly cap and batch
//! cooldowns, and saving a resume cursor after every recipient.

pub mod channel;
pub mod config;
pub mod contacts;
pub mod diagnostics;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod gate;
pub mod progress;
pub mod template;
pub mod throttle;

pub use error::{Error, Result};
