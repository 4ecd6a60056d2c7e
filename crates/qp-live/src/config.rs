//! Session configuration with environment overrides.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use qp_risk::{DEFAULT_BUCKETS, DEFAULT_HISTORY_CAPACITY};
use qp_types::errors::{QpError, QpResult};
use qp_types::snapshot::{RiskSnapshot, SEED_CVAR_95, SEED_CVAR_99, SEED_VAR_95, SEED_VAR_99};
use qp_types::config_error;

/// Longest auto-refresh period accepted (one day).
const MAX_REFRESH_SECS: u64 = 86_400;

/// VaR / CVaR figures the session starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedSnapshot {
    pub var_95: Decimal,
    pub var_99: Decimal,
    pub cvar_95: Decimal,
    pub cvar_99: Decimal,
}

impl Default for SeedSnapshot {
    fn default() -> Self {
        Self {
            var_95: Decimal::from(SEED_VAR_95),
            var_99: Decimal::from(SEED_VAR_99),
            cvar_95: Decimal::from(SEED_CVAR_95),
            cvar_99: Decimal::from(SEED_CVAR_99),
        }
    }
}

/// Configuration for a risk session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Auto-refresh period.
    pub refresh_interval_secs: u64,
    /// How often the countdown label is recomputed.
    pub countdown_tick_ms: u64,
    /// Simulated latency of a risk recalculation.
    pub calculation_latency_ms: u64,
    /// Simulated latency of a stress simulation run.
    pub simulation_latency_ms: u64,
    /// Points kept per trend chart.
    pub history_capacity: usize,
    /// Buckets per loss histogram.
    pub distribution_buckets: usize,
    pub feed_poll_interval_ms: u64,
    pub feed_timeout_ms: u64,
    pub seed: SeedSnapshot,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            countdown_tick_ms: 1_000,
            calculation_latency_ms: 1_500,
            simulation_latency_ms: 2_000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            distribution_buckets: DEFAULT_BUCKETS,
            feed_poll_interval_ms: 3_000,
            feed_timeout_ms: 5_000,
            seed: SeedSnapshot::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `QUANTPULSE_*` environment variables.
    pub fn from_env() -> QpResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup<F>(lookup: F) -> QpResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        override_with(&lookup, "QUANTPULSE_REFRESH_SECS", &mut config.refresh_interval_secs)?;
        override_with(&lookup, "QUANTPULSE_COUNTDOWN_MS", &mut config.countdown_tick_ms)?;
        override_with(&lookup, "QUANTPULSE_CALC_LATENCY_MS", &mut config.calculation_latency_ms)?;
        override_with(&lookup, "QUANTPULSE_SIM_LATENCY_MS", &mut config.simulation_latency_ms)?;
        override_with(&lookup, "QUANTPULSE_HISTORY_CAPACITY", &mut config.history_capacity)?;
        override_with(&lookup, "QUANTPULSE_BUCKETS", &mut config.distribution_buckets)?;
        override_with(&lookup, "QUANTPULSE_FEED_POLL_MS", &mut config.feed_poll_interval_ms)?;
        override_with(&lookup, "QUANTPULSE_FEED_TIMEOUT_MS", &mut config.feed_timeout_ms)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> QpResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QpResult<()> {
        if self.refresh_interval_secs == 0 || self.refresh_interval_secs > MAX_REFRESH_SECS {
            return Err(config_error!(
                "refresh_interval_secs must be in 1..={MAX_REFRESH_SECS}, got {}",
                self.refresh_interval_secs
            ));
        }
        if self.countdown_tick_ms == 0 {
            return Err(config_error!("countdown_tick_ms must be positive"));
        }
        if self.feed_poll_interval_ms == 0 {
            return Err(config_error!("feed_poll_interval_ms must be positive"));
        }
        if self.feed_timeout_ms == 0 {
            return Err(config_error!("feed_timeout_ms must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(config_error!("history_capacity must be positive"));
        }
        if self.distribution_buckets == 0 {
            return Err(config_error!("distribution_buckets must be positive"));
        }
        self.seed_snapshot(Utc::now())
            .validate()
            .map_err(|e| config_error!("invalid seed snapshot: {e}"))?;
        Ok(())
    }

    pub fn seed_snapshot(&self, taken_at: DateTime<Utc>) -> RiskSnapshot {
        RiskSnapshot::new(
            self.seed.var_95,
            self.seed.var_99,
            self.seed.cvar_95,
            self.seed.cvar_99,
            taken_at,
        )
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Same period as [`refresh_interval`](Self::refresh_interval), for
    /// wall-clock deadlines.
    pub fn refresh_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_interval_secs.min(MAX_REFRESH_SECS) as i64)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn calculation_latency(&self) -> Duration {
        Duration::from_millis(self.calculation_latency_ms)
    }

    pub fn simulation_latency(&self) -> Duration {
        Duration::from_millis(self.simulation_latency_ms)
    }

    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed_poll_interval_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }
}

fn override_with<F, T>(lookup: &F, key: &str, target: &mut T) -> QpResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| QpError::Config(format!("{key}='{raw}': {e}")))?;
    }
    Ok(())
}
