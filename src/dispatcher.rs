//! Dispatch loop
//!
//! Sends one rendered message per recipient, strictly in queue order, through a
//! single channel session. Every processed recipient advances the saved cursor,
//! whether the send was delivered or not, so an interrupted run resumes at the
//! first recipient it never reached.

use crate::channel::{Channel, ChannelConnector, SendOutcome};
use crate::config::{Config, DispatchSettings};
use crate::contacts::ContactQueue;
use crate::diagnostics::FailureReason;
use crate::error::{Error, Result};
use crate::gate::SessionGate;
use crate::progress::ProgressStore;
use crate::template::MessageTemplate;
use crate::throttle::{wait, RateLimiter};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything needed for one send operation
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub contacts: ContactQueue,
    pub template: MessageTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Counters for one run
///
/// `delivered + failed == attempted + skipped`; skipped recipients (no usable
/// phone) never reach the channel but still count as failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub final_cursor: usize,
    pub status: RunStatus,
    pub window_waits: usize,
    pub cooldowns: usize,
    pub persistence_failures: usize,
}

impl RunSummary {
    fn starting_at(cursor: usize) -> Self {
        Self {
            attempted: 0,
            delivered: 0,
            failed: 0,
            skipped: 0,
            final_cursor: cursor,
            status: RunStatus::Completed,
            window_waits: 0,
            cooldowns: 0,
            persistence_failures: 0,
        }
    }
}

/// Clears the active flag on every exit path
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Dispatcher {
    connector: Box<dyn ChannelConnector>,
    settings: DispatchSettings,
    progress: ProgressStore,
    login_status_file: Option<PathBuf>,
    active: AtomicBool,
}

impl Dispatcher {
    /// Fails with `Error::Config` when the throttle settings are unusable
    pub fn new(config: &Config, connector: Box<dyn ChannelConnector>) -> Result<Self> {
        config.settings.validate()?;
        Ok(Self {
            connector,
            settings: config.settings.clone(),
            progress: ProgressStore::new(config),
            login_status_file: Some(config.login_status_file.clone()),
            active: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Dispatch `job` starting at `resume_from`
    ///
    /// Fatal errors (channel unavailable, login timeout, locked progress) are
    /// returned before any message is sent. Cancellation is not an error: the
    /// summary reports it and the saved cursor points at the next recipient.
    pub async fn run(
        &self,
        job: &DispatchJob,
        resume_from: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let _guard = RunGuard::acquire(&self.active)?;

        let total = job.contacts.len();
        let start = resume_from.min(total);
        let mut summary = RunSummary::starting_at(start);
        let _lock = self.progress.lock()?;

        if start >= total {
            info!(total, "Nothing left to send");
            if let Err(e) = self.progress.clear() {
                warn!("Failed to clear progress: {}", e);
            }
            return Ok(summary);
        }

        let mut channel = self.connector.connect().await?;

        info!(total, start, "Starting dispatch");
        let result = match self
            .drive(channel.as_mut(), job, start, cancel, &mut summary)
            .await
        {
            Err(Error::Cancelled) => {
                summary.status = RunStatus::Cancelled;
                Ok(())
            }
            other => other,
        };

        if let Err(e) = channel.close().await {
            warn!("Failed to close channel: {}", e);
        }

        result?;
        info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            cursor = summary.final_cursor,
            status = ?summary.status,
            "Dispatch finished"
        );
        Ok(summary)
    }

    async fn drive(
        &self,
        channel: &mut dyn Channel,
        job: &DispatchJob,
        start: usize,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut gate = SessionGate::new(&self.settings);
        if let Some(path) = &self.login_status_file {
            gate = gate.with_status_file(path);
        }
        if !gate.ensure_ready(channel, cancel).await? {
            return Err(Error::AuthenticationTimeout(self.settings.login_timeout()));
        }

        // A run from the top supersedes any earlier record; the lock is held here
        if start == 0 {
            match self.progress.clear() {
                Ok(true) => info!("Discarded saved progress from an earlier run"),
                Ok(false) => {}
                Err(e) => warn!("Failed to discard earlier progress: {}", e),
            }
        }

        let total = job.contacts.len();
        let mut limiter = RateLimiter::new(&self.settings);

        for (index, recipient) in job.contacts.iter_from(start) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Cooldown first so the window check sees the time the send happens
            if limiter.cooldown(index, cancel).await?.is_some() {
                summary.cooldowns += 1;
            }
            let destination = recipient.destination();
            if destination.is_some() && limiter.acquire(cancel).await?.is_some() {
                summary.window_waits += 1;
            }

            let Some(destination) = destination else {
                warn!(
                    index,
                    name = %recipient.name,
                    phone = ?recipient.phone,
                    "Skipping recipient without a valid phone"
                );
                summary.failed += 1;
                summary.skipped += 1;
                self.advance(index + 1, total, summary)?;
                continue;
            };

            let text = job.template.render(&recipient.name);
            let sent_at = Instant::now();
            let outcome = match channel.send(&destination, &text).await {
                Ok(outcome) => outcome,
                Err(e) => SendOutcome::Failed(FailureReason::Other(e.to_string())),
            };
            limiter.record_send(sent_at);
            summary.attempted += 1;

            match outcome {
                SendOutcome::Delivered => {
                    summary.delivered += 1;
                    info!(index, total, destination = %destination, "Message delivered");
                }
                SendOutcome::Failed(reason) => {
                    summary.failed += 1;
                    warn!(index, destination = %destination, %reason, "Message not delivered");
                }
            }

            self.advance(index + 1, total, summary)?;

            if index + 1 < total {
                wait(self.next_delay(), cancel).await?;
            }
        }

        Ok(())
    }

    /// Move the cursor past a processed recipient and persist it
    fn advance(&self, cursor: usize, total: usize, summary: &mut RunSummary) -> Result<()> {
        summary.final_cursor = cursor;
        if let Err(e) = self.progress.save(cursor, total) {
            summary.persistence_failures += 1;
            if self.settings.strict_progress {
                return Err(Error::Persistence(e.to_string()));
            }
            warn!(cursor, "Failed to save progress, resume point lost: {}", e);
        }
        Ok(())
    }

    fn next_delay(&self) -> Duration {
        self.settings.delay.sample(&mut rand::thread_rng())
    }
}
