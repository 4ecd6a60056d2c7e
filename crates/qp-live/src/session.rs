//! Risk session state container.
//!
//! [`RiskSession`] owns everything a dashboard session shows: the current
//! snapshot, both trend series, the loss histograms, the refresh state and the
//! stress scenario. It is synchronous; the engine wraps it in a mutex and
//! drives the two-step calculation and simulation protocols
//! (`begin_*` / `finish_*`) around the simulated latency.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use qp_risk::{generate_distribution, RiskHistory, StressScenarioEngine};
use qp_types::errors::{QpError, QpResult, RiskError, ScenarioError, ScheduleError};
use qp_types::scenario::{SimulationResult, StressScenarioConfig, StressTimeSeries};
use qp_types::snapshot::{CvarPoint, DistributionBucket, RiskSnapshot, VarPoint};

use crate::config::SessionConfig;
use crate::state::{countdown_label, RefreshEvent, RefreshState, RefreshTrigger};

/// Shown to the user after a failed recalculation.
pub const CALCULATION_FAILED_MESSAGE: &str = "Failed to update risk metrics. Please try again.";

/// Serializable picture of the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub snapshot: RiskSnapshot,
    pub var_history: Vec<VarPoint>,
    pub cvar_history: Vec<CvarPoint>,
    pub var_distribution: Vec<DistributionBucket>,
    pub cvar_distribution: Vec<DistributionBucket>,
    pub last_error: Option<String>,
    pub refresh: RefreshState,
    pub is_calculating: bool,
    pub auto_refresh: bool,
    pub countdown: Option<String>,
    pub scenario: StressScenarioConfig,
    pub scenario_revision: u64,
    pub stress_series: StressTimeSeries,
    pub is_simulating: bool,
    pub simulation: Option<SimulationResult>,
}

#[derive(Debug)]
pub struct RiskSession {
    snapshot: RiskSnapshot,
    history: RiskHistory,
    var_distribution: Vec<DistributionBucket>,
    cvar_distribution: Vec<DistributionBucket>,
    last_error: Option<String>,
    refresh: RefreshState,
    refresh_period: Duration,
    countdown: Option<String>,
    buckets: usize,
    scenario: StressScenarioConfig,
    scenario_revision: u64,
    stress_series: StressTimeSeries,
    simulating: bool,
    simulation: Option<SimulationResult>,
    closed: bool,
}

impl RiskSession {
    pub fn new(config: &SessionConfig, now: DateTime<Utc>) -> QpResult<Self> {
        let snapshot = config.seed_snapshot(now);
        snapshot.validate()?;
        let var_distribution = generate_distribution(snapshot.var_95, config.distribution_buckets)?;
        let cvar_distribution =
            generate_distribution(snapshot.cvar_95, config.distribution_buckets)?;
        let scenario = StressScenarioConfig::default();
        let stress_series = StressScenarioEngine::simulate(&scenario);

        Ok(Self {
            history: RiskHistory::seeded(config.history_capacity, &snapshot),
            snapshot,
            var_distribution,
            cvar_distribution,
            last_error: None,
            refresh: RefreshState::Idle,
            refresh_period: config.refresh_period(),
            countdown: None,
            buckets: config.distribution_buckets,
            scenario,
            scenario_revision: 0,
            stress_series,
            simulating: false,
            simulation: None,
            closed: false,
        })
    }

    // ---- risk calculation ----

    /// Enter `Calculating` and hand back the snapshot to compute from.
    pub fn begin_calculation(
        &mut self,
        trigger: RefreshTrigger,
        now: DateTime<Utc>,
    ) -> QpResult<RiskSnapshot> {
        if self.closed {
            return Err(ScheduleError::ShutDown.into());
        }
        self.refresh = match self
            .refresh
            .apply(RefreshEvent::Trigger(trigger), now, self.refresh_period)
        {
            Ok(next) => next,
            Err(ScheduleError::CalculationInFlight) if trigger == RefreshTrigger::Scheduled => {
                self.refresh = self
                    .refresh
                    .apply(RefreshEvent::TickSkipped, now, self.refresh_period)?;
                self.tick_countdown(now);
                debug!("scheduled tick landed on a running calculation");
                return Err(ScheduleError::CalculationInFlight.into());
            }
            Err(e) => return Err(e.into()),
        };
        self.last_error = None;
        Ok(self.snapshot.clone())
    }

    /// Leave `Calculating` and commit `outcome`.
    ///
    /// On success the snapshot, both histograms and both trend series are
    /// replaced together. On failure nothing but the error message changes.
    /// A closed session discards the outcome.
    pub fn finish_calculation(
        &mut self,
        outcome: Result<RiskSnapshot, RiskError>,
        now: DateTime<Utc>,
    ) -> QpResult<RiskSnapshot> {
        self.refresh = self
            .refresh
            .apply(RefreshEvent::Completed, now, self.refresh_period)?;
        self.tick_countdown(now);

        if self.closed {
            return Err(ScheduleError::ShutDown.into());
        }

        match outcome.map_err(QpError::from).and_then(|s| self.commit(s)) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.last_error = Some(CALCULATION_FAILED_MESSAGE.to_string());
                Err(e)
            }
        }
    }

    /// Leave `Calculating` without a result; the previous snapshot stays.
    pub fn abandon_calculation(&mut self, now: DateTime<Utc>) {
        if let Ok(next) = self
            .refresh
            .apply(RefreshEvent::Completed, now, self.refresh_period)
        {
            debug!("calculation abandoned");
            self.refresh = next;
            self.tick_countdown(now);
        }
    }

    fn commit(&mut self, snapshot: RiskSnapshot) -> QpResult<RiskSnapshot> {
        snapshot.validate()?;
        let var_distribution = generate_distribution(snapshot.var_95, self.buckets)?;
        let cvar_distribution = generate_distribution(snapshot.cvar_95, self.buckets)?;
        self.history.record(&snapshot)?;

        self.var_distribution = var_distribution;
        self.cvar_distribution = cvar_distribution;
        self.snapshot = snapshot;
        Ok(self.snapshot.clone())
    }

    // ---- auto-refresh ----

    pub fn set_auto_refresh(&mut self, enabled: bool, now: DateTime<Utc>) -> QpResult<()> {
        if self.closed && enabled {
            return Err(ScheduleError::ShutDown.into());
        }
        let event = if enabled {
            RefreshEvent::EnableAutoRefresh
        } else {
            RefreshEvent::DisableAutoRefresh
        };
        self.refresh = self.refresh.apply(event, now, self.refresh_period)?;
        self.tick_countdown(now);
        Ok(())
    }

    /// Recompute the countdown label; `None` while auto-refresh is off.
    pub fn tick_countdown(&mut self, now: DateTime<Utc>) {
        self.countdown = self
            .refresh
            .next_refresh_at()
            .map(|next| countdown_label(next, now));
    }

    // ---- stress scenario ----

    /// Edit the scenario config through `edit`.
    ///
    /// The edit runs on a copy; if it fails the config is untouched. If it
    /// changes anything the stress series is regenerated, the last simulation
    /// result is cleared and the revision moves on, so a simulation started
    /// against the old config will be discarded.
    pub fn update_scenario<T, F>(&mut self, edit: F) -> QpResult<T>
    where
        F: FnOnce(&mut StressScenarioConfig) -> Result<T, ScenarioError>,
    {
        if self.closed {
            return Err(ScheduleError::ShutDown.into());
        }
        let mut scenario = self.scenario.clone();
        let value = edit(&mut scenario)?;
        if scenario != self.scenario {
            self.stress_series = StressScenarioEngine::simulate(&scenario);
            self.scenario = scenario;
            self.scenario_revision += 1;
            self.simulation = None;
            debug!(revision = self.scenario_revision, "scenario updated");
        }
        Ok(value)
    }

    /// Mark a simulation as running and return the config it runs against
    /// together with its revision.
    pub fn begin_simulation(&mut self) -> QpResult<(StressScenarioConfig, u64)> {
        if self.closed {
            return Err(ScheduleError::ShutDown.into());
        }
        if self.simulating {
            return Err(ScheduleError::SimulationInFlight.into());
        }
        self.simulating = true;
        self.simulation = None;
        Ok((self.scenario.clone(), self.scenario_revision))
    }

    /// Store `result` unless the scenario moved on or the session closed
    /// while it was running.
    pub fn finish_simulation(
        &mut self,
        revision: u64,
        result: SimulationResult,
    ) -> Option<SimulationResult> {
        self.simulating = false;
        if self.closed || revision != self.scenario_revision {
            return None;
        }
        self.simulation = Some(result.clone());
        Some(result)
    }

    pub fn abandon_simulation(&mut self) {
        self.simulating = false;
    }

    pub fn close(&mut self, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(next) = self
            .refresh
            .apply(RefreshEvent::DisableAutoRefresh, now, self.refresh_period)
        {
            self.refresh = next;
        }
        self.countdown = None;
        info!("risk session closed");
    }

    // ---- accessors ----

    pub fn snapshot(&self) -> &RiskSnapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &RiskHistory {
        &self.history
    }

    pub fn var_distribution(&self) -> &[DistributionBucket] {
        &self.var_distribution
    }

    pub fn cvar_distribution(&self) -> &[DistributionBucket] {
        &self.cvar_distribution
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn refresh_state(&self) -> &RefreshState {
        &self.refresh
    }

    pub fn countdown(&self) -> Option<&str> {
        self.countdown.as_deref()
    }

    pub fn scenario(&self) -> &StressScenarioConfig {
        &self.scenario
    }

    pub fn scenario_revision(&self) -> u64 {
        self.scenario_revision
    }

    pub fn stress_series(&self) -> &StressTimeSeries {
        &self.stress_series
    }

    pub fn is_simulating(&self) -> bool {
        self.simulating
    }

    pub fn simulation(&self) -> Option<&SimulationResult> {
        self.simulation.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            snapshot: self.snapshot.clone(),
            var_history: self.history.var.to_vec(),
            cvar_history: self.history.cvar.to_vec(),
            var_distribution: self.var_distribution.clone(),
            cvar_distribution: self.cvar_distribution.clone(),
            last_error: self.last_error.clone(),
            refresh: self.refresh.clone(),
            is_calculating: self.refresh.is_calculating(),
            auto_refresh: self.refresh.auto_refresh(),
            countdown: self.countdown.clone(),
            scenario: self.scenario.clone(),
            scenario_revision: self.scenario_revision,
            stress_series: self.stress_series.clone(),
            is_simulating: self.simulating,
            simulation: self.simulation.clone(),
        }
    }
}
