use thiserror::Error;

/// Main error type for the QuantPulse system
#[derive(Error, Debug)]
pub enum QpError {
    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Risk-metric computation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("Previous {field} must be a loss (negative), got {value}")]
    NonNegativeVar {
        field: &'static str,
        value: rust_decimal::Decimal,
    },

    #[error("Arithmetic overflow while computing {field}")]
    Overflow { field: &'static str },

    #[error("Snapshot invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("Distribution needs at least one bucket")]
    EmptyDistribution,
}

/// Historical series errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    #[error("Out-of-order append: {incoming} is earlier than latest entry {latest}")]
    OutOfOrder { incoming: String, latest: String },
}

/// Stress-scenario parameter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} must be a whole number of months, got '{input}'")]
    NotANumber { field: &'static str, input: String },

    #[error("{field} must be between {min} and {max} months, got {value}")]
    MonthsOutOfRange {
        field: &'static str,
        value: i64,
        min: u32,
        max: u32,
    },

    #[error("Severity must be between 0 and 100, got {value}")]
    SeverityOutOfRange { value: i64 },

    #[error("Invalid custom shock: {message}")]
    InvalidShock { message: String },

    #[error("Unknown custom shock: {id}")]
    UnknownShock { id: String },

    #[error("Unknown historical event: {id}")]
    UnknownEvent { id: String },
}

/// Refresh / simulation scheduling errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("A risk calculation is already in progress")]
    CalculationInFlight,

    #[error("A stress simulation is already in progress")]
    SimulationInFlight,

    #[error("Scheduled refresh received while auto-refresh is off")]
    AutoRefreshDisabled,

    #[error("Completion received but no calculation is running")]
    NotCalculating,

    #[error("Risk engine has been shut down")]
    ShutDown,
}

/// Market-data feed errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Feed request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Feed transport failure: {message}")]
    Transport { message: String },
}

/// Result type alias for QuantPulse operations
pub type QpResult<T> = Result<T, QpError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::errors::QpError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::errors::QpError::Config(format!($($arg)*))
    };
}
