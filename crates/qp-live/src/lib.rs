//! Live risk session for QuantPulse.
//!
//! Provides:
//! - Session configuration with `QUANTPULSE_*` environment overrides
//! - The refresh state machine and countdown label
//! - A session container owning snapshot, trend series, histograms and scenario
//! - An async engine running recalculations, auto-refresh timers and stress simulations
//! - A price feed that falls back to local sample data

pub mod config;
pub mod engine;
pub mod feed;
pub mod session;
pub mod state;

pub use config::{SeedSnapshot, SessionConfig};
pub use engine::{RiskEngine, RiskEngineEvent};
pub use feed::{
    format_volume, sample_tickers, transform_quotes, FallbackFeed, FeedPoll, FeedSource,
    Instrument, OfflineFeed, PriceFeed, Quote, SampleFeed,
};
pub use session::{RiskSession, SessionView, CALCULATION_FAILED_MESSAGE};
pub use state::{countdown_label, RefreshEvent, RefreshState, RefreshTrigger, REFRESHING_LABEL};
