//! Feed configuration
//!
//! Aggregation thresholds and connection timeouts, loadable from optional
//! config files plus PRICEMESH_* environment variables via .env.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// All tunables of the feed. `Default` is the documented baseline; `load`
/// layers files and environment on top of it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Drop a per-venue snapshot once it is older than this
    pub max_staleness_ms: i64,
    /// Outlier rejection threshold vs the pre-reduction median, in percent
    pub max_deviation_pct: f64,
    /// Minimum accepted venues required to publish a report
    pub min_sources: usize,
    /// Spread at or below which confidence is 1.0, in percent
    pub tight_spread_pct: f64,
    /// Advisory divergence threshold, in percent
    pub divergence_warning_pct: f64,
    /// Spread at or above which confidence bottoms out at 0.5, in percent
    pub divergence_critical_pct: f64,
    /// WebSocket handshake timeout in seconds
    pub connect_timeout_secs: u64,
    /// Keepalive ping cadence in seconds (KuCoin overrides per preflight)
    pub ping_interval_secs: u64,
    /// How long an individual ping may stay unanswered, in seconds
    pub ping_timeout_secs: u64,
    /// Initial reconnect backoff in seconds
    pub reconnect_delay_secs: f64,
    /// Reconnect backoff ceiling in seconds
    pub max_reconnect_delay_secs: f64,
    /// Backoff multiplier per failed attempt
    pub reconnect_backoff: f64,
    /// Whether to run the oracle reference probe alongside the feeds
    pub oracle_enabled: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_staleness_ms: 2000,
            max_deviation_pct: 1.0,
            min_sources: 2,
            tight_spread_pct: 0.1,
            divergence_warning_pct: 0.3,
            divergence_critical_pct: 0.5,
            connect_timeout_secs: 5,
            ping_interval_secs: 20,
            ping_timeout_secs: 10,
            reconnect_delay_secs: 1.0,
            max_reconnect_delay_secs: 30.0,
            reconnect_backoff: 1.5,
            oracle_enabled: true,
        }
    }
}

impl FeedConfig {
    /// Load configuration from optional files and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("PRICEMESH").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let cfg: FeedConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that cannot drive a well-defined aggregation.
    pub fn validate(&self) -> Result<()> {
        if self.max_staleness_ms <= 0 {
            bail!("max_staleness_ms must be positive");
        }
        if self.max_deviation_pct < 0.0 {
            bail!("max_deviation_pct must not be negative");
        }
        if self.min_sources == 0 {
            bail!("min_sources must be at least 1");
        }
        if self.tight_spread_pct < 0.0 || self.divergence_critical_pct < 0.0 {
            bail!("spread thresholds must not be negative");
        }
        if self.divergence_critical_pct <= self.tight_spread_pct {
            bail!("divergence_critical_pct must exceed tight_spread_pct");
        }
        if self.connect_timeout_secs == 0 || self.ping_interval_secs == 0 {
            bail!("connection timeouts must be positive");
        }
        if self.reconnect_delay_secs <= 0.0 || self.max_reconnect_delay_secs <= 0.0 {
            bail!("reconnect delays must be positive");
        }
        if self.reconnect_backoff < 1.0 {
            bail!("reconnect_backoff must be at least 1.0");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Initial backoff in milliseconds
    pub fn reconnect_delay_ms(&self) -> f64 {
        self.reconnect_delay_secs * 1000.0
    }

    /// Backoff ceiling in milliseconds
    pub fn max_reconnect_delay_ms(&self) -> f64 {
        self.max_reconnect_delay_secs * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_baseline() {
        let cfg = FeedConfig::default();
        assert_eq!(cfg.max_staleness_ms, 2000);
        assert_eq!(cfg.min_sources, 2);
        assert_eq!(cfg.reconnect_delay_ms(), 1000.0);
        assert_eq!(cfg.max_reconnect_delay_ms(), 30000.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn negative_threshold_rejected() {
        let cfg = FeedConfig {
            max_deviation_pct: -1.0,
            ..FeedConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_confidence_band_rejected() {
        let cfg = FeedConfig {
            tight_spread_pct: 0.5,
            divergence_critical_pct: 0.1,
            ..FeedConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
