//! Configuration, paths, and throttle settings

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// All configurable paths plus the dispatch settings
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub progress_file: PathBuf,
    pub login_status_file: PathBuf,
    pub settings_file: PathBuf,
    pub driver: PathBuf,
    pub settings: DispatchSettings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bulk-dispatch");
        let state_dir = data_dir.join("state");

        Self {
            progress_file: state_dir.join("progress.json"),
            login_status_file: state_dir.join("login_status.json"),
            settings_file: data_dir.join("config.json"),
            driver: data_dir.join("bin/channel-driver"),
            state_dir,
            data_dir,
            settings: DispatchSettings::default(),
        }
    }
}

impl Config {
    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            data_dir: temp_dir.to_path_buf(),
            state_dir: temp_dir.join("state"),
            progress_file: temp_dir.join("state/progress.json"),
            login_status_file: temp_dir.join("state/login_status.json"),
            settings_file: temp_dir.join("config.json"),
            driver: temp_dir.join("channel-driver"),
            settings: DispatchSettings {
                delay: SecondsRange::fixed(0),
                batch_cooldown: SecondsRange::fixed(0),
                login_poll_interval_secs: 1,
                ..DispatchSettings::default()
            },
        }
    }

    /// Load settings from `settings_file`, keeping defaults when it is absent
    pub fn with_settings_file(mut self) -> Result<Self> {
        if self.settings_file.exists() {
            self.settings = DispatchSettings::load(&self.settings_file)?;
        }
        Ok(self)
    }
}

/// Inclusive range of whole seconds; a randomized wait is drawn from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondsRange {
    pub min: u64,
    pub max: u64,
}

impl SecondsRange {
    pub const fn fixed(secs: u64) -> Self {
        Self {
            min: secs,
            max: secs,
        }
    }

    pub const fn between(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return Duration::from_secs(self.min);
        }
        Duration::from_secs(rng.gen_range(self.min..=self.max))
    }
}

/// Throttle and session-gate settings, injected into the dispatcher at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Hard cap on send attempts per fixed one-hour window
    pub max_per_hour: u32,
    /// Cooldown fires at every nonzero multiple of this index
    pub batch_size: usize,
    /// Pause after each message
    pub delay: SecondsRange,
    /// Pause at each batch boundary
    pub batch_cooldown: SecondsRange,
    pub probe_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub login_poll_interval_secs: u64,
    pub send_timeout_secs: u64,
    /// Abort the run when progress cannot be saved instead of continuing in memory
    pub strict_progress: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_per_hour: 45,
            batch_size: 30,
            delay: SecondsRange::fixed(5),
            batch_cooldown: SecondsRange::between(300, 600),
            probe_timeout_secs: 30,
            login_timeout_secs: 120,
            login_poll_interval_secs: 2,
            send_timeout_secs: 60,
            strict_progress: false,
        }
    }
}

impl DispatchSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_per_hour == 0 {
            return Err(Error::Config("max_per_hour must be greater than zero".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        for (name, range) in [("delay", self.delay), ("batch_cooldown", self.batch_cooldown)] {
            if range.min > range.max {
                return Err(Error::Config(format!(
                    "{} range is inverted ({} > {})",
                    name, range.min, range.max
                )));
            }
        }
        if self.login_poll_interval_secs == 0 {
            return Err(Error::Config(
                "login_poll_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn login_poll_interval(&self) -> Duration {
        Duration::from_secs(self.login_poll_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.progress_file.ends_with("state/progress.json"));
        assert!(config.settings_file.to_string_lossy().contains("bulk-dispatch"));
    }

    #[test]
    fn test_test_config() {
        let temp = std::env::temp_dir();
        let config = Config::for_test(&temp);
        assert_eq!(config.data_dir, temp);
        assert_eq!(config.settings.delay, SecondsRange::fixed(0));
    }

    #[test]
    fn test_default_settings() {
        let settings = DispatchSettings::default();
        assert_eq!(settings.max_per_hour, 45);
        assert_eq!(settings.batch_size, 30);
        assert_eq!(settings.delay, SecondsRange::fixed(5));
        assert_eq!(settings.login_poll_interval(), Duration::from_secs(2));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_settings_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"max_per_hour": 20, "delay": {"min": 3, "max": 8}}"#).unwrap();

        let settings = DispatchSettings::load(&path).unwrap();
        assert_eq!(settings.max_per_hour, 20);
        assert_eq!(settings.delay, SecondsRange::between(3, 8));
        assert_eq!(settings.batch_size, 30);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = DispatchSettings {
            batch_size: 0,
            ..DispatchSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let settings = DispatchSettings {
            batch_cooldown: SecondsRange::between(600, 300),
            ..DispatchSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_settings_file_keeps_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config::for_test(temp.path()).with_settings_file().unwrap();
        assert_eq!(config.settings.max_per_hour, 45);
    }

    #[test]
    fn test_range_sample_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = SecondsRange::between(300, 600);
        for _ in 0..200 {
            let d = range.sample(&mut rng).as_secs();
            assert!((300..=600).contains(&d));
        }
        assert_eq!(
            SecondsRange::fixed(5).sample(&mut rng),
            Duration::from_secs(5)
        );
    }
}
