//! Configuration types for regstats

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sampling interval used when none (or zero) is configured
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Domain-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Domain name, exported as the `domain` label
    pub name: String,

    /// Background sampling interval in milliseconds (0 = default)
    pub interval_ms: u64,

    /// Run a clear pass when sampling starts and when a zone is re-enabled
    pub clear_on_start: bool,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            clear_on_start: true,
        }
    }
}

impl DomainConfig {
    /// Create a configuration with the given domain name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the sampling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    /// Enable or disable reset-on-start
    pub fn with_clear_on_start(mut self, clear_on_start: bool) -> Self {
        self.clear_on_start = clear_on_start;
        self
    }

    /// Effective sampling interval
    pub fn interval(&self) -> Duration {
        match self.interval_ms {
            0 => Duration::from_millis(DEFAULT_INTERVAL_MS),
            ms => Duration::from_millis(ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_config_default() {
        let config = DomainConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert!(config.clear_on_start);
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let config = DomainConfig::new("card0").with_interval(Duration::ZERO);
        assert_eq!(config.interval_ms, 0);
        assert_eq!(config.interval(), Duration::from_millis(DEFAULT_INTERVAL_MS));
    }

    #[test]
    fn test_domain_config_from_json() {
        let config: DomainConfig =
            serde_json::from_str(r#"{"name": "card1", "interval_ms": 250}"#).unwrap();
        assert_eq!(config.name, "card1");
        assert_eq!(config.interval(), Duration::from_millis(250));
        assert!(config.clear_on_start);
    }
}
