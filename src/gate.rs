//! Session gate - make sure the channel is logged in before anything is sent
//!
//! A cheap headless probe runs first. If the session is logged out the gate
//! escalates to interactive login and polls until the user completes it or the
//! login timeout runs out, then confirms the login survived the switch back.
//!
//! ```text
//! Unknown -> Checking -> LoggedIn
//!                     -> LoggedOut -> AwaitingInteractiveAuth -> LoggedIn
//!                                                             -> TimedOut
//! ```

use crate::channel::{AuthMode, Channel};
use crate::config::DispatchSettings;
use crate::error::Result;
use crate::throttle::wait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unknown,
    Checking,
    LoggedOut,
    LoggedIn,
    AwaitingInteractiveAuth,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::LoggedIn | SessionStatus::TimedOut)
    }
}

/// Marker written after every check so other tools can see the last known state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoginStatus {
    pub logged_in: bool,
}

/// Read the last recorded login state; anything unreadable counts as logged out
pub fn read_login_status(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str::<LoginStatus>(&s).ok())
        .map(|s| s.logged_in)
        .unwrap_or(false)
}

pub struct SessionGate {
    probe_timeout: Duration,
    login_timeout: Duration,
    poll_interval: Duration,
    status: SessionStatus,
    history: Vec<SessionStatus>,
    status_file: Option<PathBuf>,
}

impl SessionGate {
    pub fn new(settings: &DispatchSettings) -> Self {
        Self {
            probe_timeout: settings.probe_timeout(),
            login_timeout: settings.login_timeout(),
            poll_interval: settings.login_poll_interval(),
            status: SessionStatus::Unknown,
            history: vec![SessionStatus::Unknown],
            status_file: None,
        }
    }

    /// Record the outcome of each check in a `{logged_in}` marker file
    pub fn with_status_file(mut self, path: &Path) -> Self {
        self.status_file = Some(path.to_path_buf());
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Every state visited during the last `ensure_ready` call
    pub fn history(&self) -> &[SessionStatus] {
        &self.history
    }

    fn transition(&mut self, next: SessionStatus) {
        debug!(from = ?self.status, to = ?next, "session status");
        self.status = next;
        self.history.push(next);
    }

    fn record_login(&self, logged_in: bool) {
        let Some(path) = &self.status_file else {
            return;
        };
        let write = || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string(&LoginStatus { logged_in })?)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!("Failed to record login status: {}", e);
        }
    }

    /// Probe without failing the gate on a flaky status call
    async fn probe(channel: &mut dyn Channel) -> bool {
        match channel.is_authenticated().await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                warn!("Session status probe failed: {}", e);
                false
            }
        }
    }

    /// Returns true once the channel is confirmed logged in, false on timeout
    pub async fn ensure_ready(
        &mut self,
        channel: &mut dyn Channel,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.status = SessionStatus::Unknown;
        self.history = vec![SessionStatus::Unknown];

        self.transition(SessionStatus::Checking);
        if Self::probe(channel).await {
            self.transition(SessionStatus::LoggedIn);
            self.record_login(true);
            return Ok(true);
        }
        self.transition(SessionStatus::LoggedOut);
        self.record_login(false);

        self.transition(SessionStatus::AwaitingInteractiveAuth);
        info!(
            timeout_secs = self.login_timeout.as_secs(),
            "Channel not logged in, waiting for interactive login"
        );

        let deadline = Instant::now() + self.login_timeout;
        let mut authenticated = channel
            .authenticate(AuthMode::Interactive, self.login_timeout)
            .await?;

        while !authenticated {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            wait(self.poll_interval.min(deadline - now), cancel).await?;
            authenticated = Self::probe(channel).await;
        }

        if authenticated {
            // Login must survive the switch back to a background session
            let confirmed = channel
                .authenticate(AuthMode::Headless, self.probe_timeout)
                .await?
                && Self::probe(channel).await;
            if confirmed {
                info!("Interactive login confirmed");
                self.transition(SessionStatus::LoggedIn);
                self.record_login(true);
                return Ok(true);
            }
            warn!("Login did not persist after leaving interactive mode");
        }

        self.transition(SessionStatus::TimedOut);
        self.record_login(false);
        Ok(false)
    }
}
