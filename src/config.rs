//! Runtime configuration.
//!
//! Stored as a JSON file on disk; every field is optional and falls back to
//! its default:
//! ```json
//! {
//!   "feed": { "base_url": "http://localhost:8080/feed", "request_timeout_secs": 15 },
//!   "refresh": { "refresh_interval_secs": 60, "tick_interval_ms": 1000 },
//!   "proximity": { "range_meters": 35.0, "noise_floor_meters": 5.0, "max_accuracy_meters": 30.0 }
//! }
//! ```
//! Selected values can then be overridden from the environment
//! (`ARRIVALS_FEED_URL`, `ARRIVALS_REFRESH_SECS`, `ARRIVALS_TICK_MS`).

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::feed::DEFAULT_FEED_URL;
use crate::proximity::ProximityThresholds;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub refresh: RefreshConfig,
    pub proximity: ProximityThresholds,
}

/// Upstream prediction feed settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FEED_URL.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Cadences of the refresh scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Coarse interval between prediction refreshes.
    pub refresh_interval_secs: u64,
    /// Fine interval at which the countdown is republished.
    pub tick_interval_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            tick_interval_ms: 1000,
        }
    }
}

impl RefreshConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl AppConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, defaults otherwise, then applies environment
    /// overrides.
    pub fn from_env(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides looked up by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("ARRIVALS_FEED_URL") {
            self.feed.base_url = url;
        }
        if let Some(secs) = lookup("ARRIVALS_REFRESH_SECS") {
            self.refresh.refresh_interval_secs = secs
                .parse()
                .with_context(|| format!("ARRIVALS_REFRESH_SECS is not a number: '{secs}'"))?;
        }
        if let Some(ms) = lookup("ARRIVALS_TICK_MS") {
            self.refresh.tick_interval_ms = ms
                .parse()
                .with_context(|| format!("ARRIVALS_TICK_MS is not a number: '{ms}'"))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be greater than zero");
        }
        if self.refresh.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        if self.feed.base_url.is_empty() {
            bail!("feed base_url must not be empty");
        }

        let p = &self.proximity;
        for (name, value) in [
            ("range_meters", p.range_meters),
            ("noise_floor_meters", p.noise_floor_meters),
            ("max_accuracy_meters", p.max_accuracy_meters),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("proximity {name} must be a non-negative number, got {value}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.feed.base_url, DEFAULT_FEED_URL);
        assert_eq!(config.refresh.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.refresh.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.proximity.range_meters, 35.0);
        assert_eq!(config.proximity.noise_floor_meters, 5.0);
        assert_eq!(config.proximity.max_accuracy_meters, 30.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "refresh": { "refresh_interval_secs": 30 }, "proximity": { "range_meters": 50.0 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.refresh.refresh_interval_secs, 30);
        assert_eq!(config.refresh.tick_interval_ms, 1000);
        assert_eq!(config.proximity.range_meters, 50.0);
        assert_eq!(config.proximity.noise_floor_meters, 5.0);
        assert_eq!(config.feed, FeedConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = temp_path("arrival_watch_test_config.json");
        fs::write(&path, r#"{ "feed": { "base_url": "http://localhost:9000/feed" } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.feed.base_url, "http://localhost:9000/feed");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(&temp_path("arrival_watch_does_not_exist.json")).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ARRIVALS_FEED_URL", "http://example.test/feed"),
            ("ARRIVALS_REFRESH_SECS", "15"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.feed.base_url, "http://example.test/feed");
        assert_eq!(config.refresh.refresh_interval_secs, 15);
        assert_eq!(config.refresh.tick_interval_ms, 1000);
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|key| (key == "ARRIVALS_TICK_MS").then(|| "fast".to_string()));
        assert!(result.is_err());

        let result = config.apply_overrides(|key| (key == "ARRIVALS_TICK_MS").then(|| "0".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_proximity_thresholds_are_rejected() {
        let path = temp_path("arrival_watch_test_bad_proximity.json");
        fs::write(&path, r#"{ "proximity": { "range_meters": -1.0 } }"#).unwrap();
        assert!(AppConfig::load(&path).is_err());
        fs::remove_file(&path).unwrap();

        let mut config = AppConfig::default();
        config.proximity.max_accuracy_meters = f64::NAN;
        assert!(config.validate().is_err());

        config.proximity.max_accuracy_meters = 0.0;
        assert!(config.validate().is_ok());
    }
}
