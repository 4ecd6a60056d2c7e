//! Portfolio risk analytics for QuantPulse.
//!
//! Provides:
//! - VaR / CVaR snapshot recalculation with an injectable random source
//! - Loss-frequency histograms around a point estimate
//! - Bounded rolling history for trend charts
//! - Multi-phase (stable → shock → recovery) stress scenario synthesis

pub mod distribution;
pub mod history;
pub mod metrics;
pub mod stress;

pub use distribution::{generate_distribution, DEFAULT_BUCKETS};
pub use history::{HistoricalSeries, RiskHistory, DEFAULT_HISTORY_CAPACITY};
pub use metrics::{RiskMetricsCalculator, VolatilityFactors};
pub use stress::StressScenarioEngine;
