//! Stress-scenario parameters, the synthesized time series, and run results.
//!
//! Every user-entered parameter goes through a validating constructor here;
//! nothing downstream has to cope with non-numeric or out-of-range input.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ScenarioError;

/// Upper bound accepted for shock duration and recovery period.
pub const MAX_SCENARIO_MONTHS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    #[default]
    Historical,
    Custom,
}

/// Historical crises offered as scenario templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HistoricalEvent {
    FinancialCrisis2008,
    #[default]
    DotComBubble2000,
    CovidCrash2020,
    BlackMonday1987,
}

impl HistoricalEvent {
    pub const ALL: [HistoricalEvent; 4] = [
        HistoricalEvent::FinancialCrisis2008,
        HistoricalEvent::DotComBubble2000,
        HistoricalEvent::CovidCrash2020,
        HistoricalEvent::BlackMonday1987,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            HistoricalEvent::FinancialCrisis2008 => "2008",
            HistoricalEvent::DotComBubble2000 => "2000",
            HistoricalEvent::CovidCrash2020 => "2020",
            HistoricalEvent::BlackMonday1987 => "1987",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HistoricalEvent::FinancialCrisis2008 => "2008 Financial Crisis",
            HistoricalEvent::DotComBubble2000 => "2000 Dot-com Bubble",
            HistoricalEvent::CovidCrash2020 => "2020 COVID-19 Crash",
            HistoricalEvent::BlackMonday1987 => "1987 Black Monday",
        }
    }
}

impl FromStr for HistoricalEvent {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim();
        Self::ALL
            .into_iter()
            .find(|event| event.id() == id)
            .ok_or_else(|| ScenarioError::UnknownEvent { id: id.to_string() })
    }
}

/// Scenario severity on a 0–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MAX: u8 = 100;

    pub fn new(value: i64) -> Result<Self, ScenarioError> {
        if (0..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ScenarioError::SeverityOutOfRange { value })
        }
    }

    /// Clamp any integer into `0..=100`.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, i64::from(Self::MAX)) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self(60)
    }
}

impl TryFrom<i64> for Severity {
    type Error = ScenarioError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.0
    }
}

/// Validate a month count entered as a number.
pub fn months(field: &'static str, value: i64) -> Result<NonZeroU32, ScenarioError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v <= MAX_SCENARIO_MONTHS)
        .and_then(NonZeroU32::new)
        .ok_or(ScenarioError::MonthsOutOfRange {
            field,
            value,
            min: 1,
            max: MAX_SCENARIO_MONTHS,
        })
}

/// Validate a month count entered as free text.
pub fn parse_months(field: &'static str, input: &str) -> Result<NonZeroU32, ScenarioError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ScenarioError::Missing { field });
    }
    let value: i64 = trimmed.parse().map_err(|_| ScenarioError::NotANumber {
        field,
        input: input.to_string(),
    })?;
    months(field, value)
}

/// A user-defined market shock, e.g. `S&P 500: -20%`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomShock {
    pub id: Uuid,
    pub parameter: String,
    /// Percentage change; `-20` means a 20% fall.
    pub change_pct: Decimal,
}

impl CustomShock {
    pub fn new(parameter: &str, change_pct: Decimal) -> Result<Self, ScenarioError> {
        Ok(Self {
            id: Uuid::new_v4(),
            parameter: Self::check_parameter(parameter)?,
            change_pct,
        })
    }

    /// Build a shock from the text fields of the scenario form; the change
    /// accepts an optional trailing `%`.
    pub fn parse(parameter: &str, change: &str) -> Result<Self, ScenarioError> {
        Self::new(parameter, Self::parse_change(change)?)
    }

    pub fn parse_change(change: &str) -> Result<Decimal, ScenarioError> {
        let trimmed = change.trim();
        let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
        if number.is_empty() {
            return Err(ScenarioError::InvalidShock {
                message: "change value is empty".into(),
            });
        }
        Decimal::from_str(number).map_err(|_| ScenarioError::InvalidShock {
            message: format!("'{change}' is not a percentage"),
        })
    }

    fn check_parameter(parameter: &str) -> Result<String, ScenarioError> {
        let name = parameter.trim();
        if name.is_empty() {
            return Err(ScenarioError::InvalidShock {
                message: "parameter name is empty".into(),
            });
        }
        Ok(name.to_string())
    }
}

impl fmt::Display for CustomShock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}%", self.parameter, self.change_pct.normalize())
    }
}

/// Parameters of a stress scenario as edited in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenarioConfig {
    pub scenario_type: ScenarioType,
    /// Used when `scenario_type` is `Historical`.
    pub historical_event: HistoricalEvent,
    /// Used when `scenario_type` is `Custom`.
    pub custom_shocks: Vec<CustomShock>,
    pub shock_duration_months: NonZeroU32,
    pub recovery_period_months: NonZeroU32,
    pub severity: Severity,
}

impl Default for StressScenarioConfig {
    fn default() -> Self {
        Self {
            scenario_type: ScenarioType::Historical,
            historical_event: HistoricalEvent::default(),
            custom_shocks: vec![CustomShock {
                id: Uuid::new_v4(),
                parameter: "S&P 500".into(),
                change_pct: Decimal::from(-20),
            }],
            shock_duration_months: NonZeroU32::MIN.saturating_add(2),
            recovery_period_months: NonZeroU32::MIN.saturating_add(11),
            severity: Severity::default(),
        }
    }
}

impl StressScenarioConfig {
    pub fn add_custom_shock(&mut self, shock: CustomShock) -> Uuid {
        let id = shock.id;
        self.custom_shocks.push(shock);
        id
    }

    /// Replace the text fields of an existing shock. `None` leaves a field as is.
    pub fn update_custom_shock(
        &mut self,
        id: Uuid,
        parameter: Option<&str>,
        change: Option<&str>,
    ) -> Result<(), ScenarioError> {
        let parameter = parameter.map(CustomShock::check_parameter).transpose()?;
        let change = change.map(CustomShock::parse_change).transpose()?;

        let shock = self
            .custom_shocks
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ScenarioError::UnknownShock { id: id.to_string() })?;
        if let Some(parameter) = parameter {
            shock.parameter = parameter;
        }
        if let Some(change) = change {
            shock.change_pct = change;
        }
        Ok(())
    }

    pub fn remove_custom_shock(&mut self, id: Uuid) -> Result<CustomShock, ScenarioError> {
        let idx = self
            .custom_shocks
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ScenarioError::UnknownShock { id: id.to_string() })?;
        Ok(self.custom_shocks.remove(idx))
    }

    pub fn shock_months(&self) -> u32 {
        self.shock_duration_months.get()
    }

    pub fn recovery_months(&self) -> u32 {
        self.recovery_period_months.get()
    }
}

/// One month of a stress time series; value is a percentage of the initial 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressPoint {
    pub month: u32,
    pub portfolio_value: f64,
}

/// Stable, shock and recovery phases concatenated in month order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTimeSeries {
    pub points: Vec<StressPoint>,
    /// Index of the first shock-phase point.
    pub shock_start: usize,
    /// Number of shock-phase points.
    pub shock_len: usize,
}

impl StressTimeSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn stable_phase(&self) -> &[StressPoint] {
        &self.points[..self.shock_start.min(self.points.len())]
    }

    pub fn shock_phase(&self) -> &[StressPoint] {
        let end = (self.shock_start + self.shock_len).min(self.points.len());
        &self.points[self.shock_start.min(end)..end]
    }

    pub fn recovery_phase(&self) -> &[StressPoint] {
        let start = (self.shock_start + self.shock_len).min(self.points.len());
        &self.points[start..]
    }

    /// Lowest portfolio value in the series (the earliest one on ties).
    pub fn trough(&self) -> Option<&StressPoint> {
        self.points.iter().fold(None, |lowest, p| match lowest {
            Some(l) if l.portfolio_value <= p.portfolio_value => Some(l),
            _ => Some(p),
        })
    }
}

/// Outcome of an explicit simulation run.
///
/// Only `confidence` is drawn at random; the impact figures are fixed
/// functions of severity and recovery period used for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Percent, in `70..=94`.
    pub confidence: u8,
    /// Negative percent change of portfolio value.
    pub portfolio_value_change_pct: i64,
    /// Negative percent drawdown.
    pub max_drawdown_pct: i64,
    pub stressed_var_99: Decimal,
    pub stressed_cvar_99: Decimal,
    pub recovery_time_months: u32,
    pub completed_at: DateTime<Utc>,
}
