//! Send throttling - fixed hourly window cap plus batch cooldowns
//!
//! The window is anchored at the first send observed in it. Once the cap is
//! reached, the next send blocks until the window's hour has elapsed. Batch
//! cooldowns are independent and keyed to the absolute recipient index.

use crate::config::{DispatchSettings, SecondsRange};
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Length of one throttle window
pub const WINDOW: Duration = Duration::from_secs(60 * 60);

/// Sleep for `duration` unless `cancel` fires first
pub async fn wait(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

/// Fixed-window rate limiter with batch cooldowns
#[derive(Debug)]
pub struct RateLimiter {
    cap: u32,
    window: Duration,
    batch_size: usize,
    cooldown: SecondsRange,
    sent_this_window: u32,
    window_start: Option<Instant>,
}

impl RateLimiter {
    pub fn new(settings: &DispatchSettings) -> Self {
        Self {
            cap: settings.max_per_hour,
            window: WINDOW,
            batch_size: settings.batch_size,
            cooldown: settings.batch_cooldown,
            sent_this_window: 0,
            window_start: None,
        }
    }

    pub fn sent_this_window(&self) -> u32 {
        self.sent_this_window
    }

    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    /// How long the next send must wait at `now`; also expires a finished window
    pub fn window_wait(&mut self, now: Instant) -> Option<Duration> {
        let start = self.window_start?;
        let elapsed = now.saturating_duration_since(start);

        if elapsed >= self.window {
            self.reset_window();
            return None;
        }
        if self.sent_this_window >= self.cap {
            return Some(self.window - elapsed);
        }
        None
    }

    /// Block until a send is allowed; returns the time spent waiting
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<Option<Duration>> {
        let Some(remaining) = self.window_wait(Instant::now()) else {
            return Ok(None);
        };

        info!(
            sent = self.sent_this_window,
            cap = self.cap,
            wait_secs = remaining.as_secs(),
            "Hourly cap reached, waiting for window reset"
        );
        wait(remaining, cancel).await?;
        self.reset_window();
        Ok(Some(remaining))
    }

    /// Count an attempted send (delivered or not)
    ///
    /// A send after the window's hour belongs to a new window anchored at it.
    pub fn record_send(&mut self, now: Instant) {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.window => {}
            Some(_) => {
                self.reset_window();
                self.window_start = Some(now);
            }
            None => self.window_start = Some(now),
        }
        self.sent_this_window += 1;
    }

    fn reset_window(&mut self) {
        self.sent_this_window = 0;
        self.window_start = None;
    }

    /// True at every nonzero multiple of the batch size
    pub fn is_batch_boundary(&self, index: usize) -> bool {
        index > 0 && index.checked_rem(self.batch_size) == Some(0)
    }

    fn sample_cooldown(&self) -> Duration {
        self.cooldown.sample(&mut rand::thread_rng())
    }

    /// Pause at a batch boundary; returns the cooldown applied, if any
    pub async fn cooldown(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        if !self.is_batch_boundary(index) {
            return Ok(None);
        }

        let duration = self.sample_cooldown();
        info!(index, wait_secs = duration.as_secs(), "Batch cooldown");
        wait(duration, cancel).await?;
        Ok(Some(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter(cap: u32, batch_size: usize) -> RateLimiter {
        RateLimiter::new(&DispatchSettings {
            max_per_hour: cap,
            batch_size,
            batch_cooldown: SecondsRange::between(300, 600),
            ..DispatchSettings::default()
        })
    }

    #[test]
    fn test_batch_boundary_examples() {
        let limiter = limiter(45, 30);
        assert!(!limiter.is_batch_boundary(0));
        assert!(!limiter.is_batch_boundary(29));
        assert!(limiter.is_batch_boundary(30));
        assert!(!limiter.is_batch_boundary(31));
        assert!(limiter.is_batch_boundary(60));
        assert!(limiter.is_batch_boundary(90));
    }

    proptest! {
        #[test]
        fn batch_boundary_is_nonzero_multiple(index in 0usize..10_000, batch in 1usize..100) {
            let limiter = limiter(45, batch);
            prop_assert_eq!(
                limiter.is_batch_boundary(index),
                index != 0 && index % batch == 0
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_under_cap() {
        let mut limiter = limiter(3, 30);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(limiter.acquire(&cancel).await.unwrap(), None);
            limiter.record_send(Instant::now());
        }
        assert_eq!(limiter.sent_this_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_blocks_until_window_end() {
        let mut limiter = limiter(2, 30);
        let cancel = CancellationToken::new();
        let t0 = Instant::now();

        limiter.record_send(Instant::now());
        tokio::time::advance(Duration::from_secs(600)).await;
        limiter.record_send(Instant::now());

        let waited = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(waited, Some(Duration::from_secs(3000)));
        assert!(Instant::now() - t0 >= WINDOW);
        assert_eq!(limiter.sent_this_window(), 0);
        assert!(limiter.window_start().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_counter() {
        let mut limiter = limiter(2, 30);
        limiter.record_send(Instant::now());

        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        assert_eq!(limiter.window_wait(Instant::now()), None);
        assert_eq!(limiter.sent_this_window(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_anchored_at_first_send() {
        let mut limiter = limiter(5, 30);
        assert!(limiter.window_start().is_none());

        tokio::time::advance(Duration::from_secs(120)).await;
        let first = Instant::now();
        limiter.record_send(first);
        tokio::time::advance(Duration::from_secs(5)).await;
        limiter.record_send(Instant::now());

        assert_eq!(limiter.window_start(), Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_window_expiry_starts_new_window() {
        let mut limiter = limiter(3, 30);
        limiter.record_send(Instant::now());
        limiter.record_send(Instant::now());

        // No acquire in between, as when a cooldown outlasts the window
        tokio::time::advance(WINDOW + Duration::from_secs(100)).await;
        let late = Instant::now();
        limiter.record_send(late);

        assert_eq!(limiter.window_start(), Some(late));
        assert_eq!(limiter.sent_this_window(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancelled_while_waiting() {
        let mut limiter = limiter(1, 30);
        let cancel = CancellationToken::new();
        limiter.record_send(Instant::now());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let result = limiter.acquire(&cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        // Counter survives an interrupted wait
        assert_eq!(limiter.sent_this_window(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_duration_in_range() {
        let limiter = limiter(45, 30);
        let cancel = CancellationToken::new();

        assert_eq!(limiter.cooldown(29, &cancel).await.unwrap(), None);

        let start = Instant::now();
        let applied = limiter.cooldown(30, &cancel).await.unwrap().unwrap();
        assert!((300..=600).contains(&applied.as_secs()));
        assert!(Instant::now() - start >= applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_zero_returns_even_if_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(wait(Duration::ZERO, &cancel).await.is_ok());
        assert!(matches!(
            wait(Duration::from_secs(1), &cancel).await,
            Err(Error::Cancelled)
        ));
    }
}
