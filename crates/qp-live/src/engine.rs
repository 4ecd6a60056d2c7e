//! Async risk engine: drives a [`RiskSession`] through recalculations,
//! auto-refresh timers and stress simulation runs.
//!
//! Session state lives behind a mutex that is never held across an await.
//! Calculations and simulations are split into `begin` / sleep / `finish`
//! around a simulated latency; a drop guard returns the session to a
//! consistent state if the future is dropped mid-flight.

use std::sync::{Arc, Weak};

use chrono::Utc;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use qp_risk::{RiskMetricsCalculator, StressScenarioEngine};
use qp_types::errors::{QpError, QpResult, ScenarioError, ScheduleError};
use qp_types::internal_error;
use qp_types::scenario::{SimulationResult, StressScenarioConfig};
use qp_types::snapshot::RiskSnapshot;

use crate::config::SessionConfig;
use crate::session::{RiskSession, SessionView, CALCULATION_FAILED_MESSAGE};
use crate::state::RefreshTrigger;

/// Events emitted by the engine for external consumption (UI, logging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskEngineEvent {
    SnapshotUpdated {
        trigger: RefreshTrigger,
        snapshot: RiskSnapshot,
    },
    CalculationFailed {
        trigger: RefreshTrigger,
        message: String,
        reason: String,
    },
    AutoRefreshChanged {
        enabled: bool,
    },
    ScenarioUpdated {
        revision: u64,
    },
    SimulationCompleted {
        result: SimulationResult,
    },
    /// The scenario changed (or the engine shut down) while the run was in flight.
    SimulationDiscarded {
        revision: u64,
    },
}

/// Handle to a running risk session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct RiskEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    session: Mutex<RiskSession>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    events: Sender<RiskEngineEvent>,
    timers: Mutex<Option<AutoRefreshTimers>>,
}

/// The auto-refresh tick and countdown tasks; aborted together on drop.
struct AutoRefreshTimers {
    refresh: JoinHandle<()>,
    countdown: JoinHandle<()>,
}

impl Drop for AutoRefreshTimers {
    fn drop(&mut self) {
        self.refresh.abort();
        self.countdown.abort();
    }
}

#[derive(Clone, Copy)]
enum Job {
    Calculation,
    Simulation,
}

/// Releases the session's in-flight marker if the owning future is dropped
/// before it reaches `finish_*`.
struct InFlight<'a> {
    inner: &'a Inner,
    job: Job,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(inner: &'a Inner, job: Job) -> Self {
        Self {
            inner,
            job,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.inner.session.lock();
        match self.job {
            Job::Calculation => session.abandon_calculation(Utc::now()),
            Job::Simulation => session.abandon_simulation(),
        }
        warn!("in-flight job cancelled before completion");
    }
}

impl RiskEngine {
    pub fn new<R>(config: SessionConfig, rng: R, events: Sender<RiskEngineEvent>) -> QpResult<Self>
    where
        R: RngCore + Send + 'static,
    {
        config.validate()?;
        let session = RiskSession::new(&config, Utc::now())?;
        info!(
            refresh_secs = config.refresh_interval_secs,
            history_capacity = config.history_capacity,
            "risk engine created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                session: Mutex::new(session),
                rng: Mutex::new(Box::new(rng)),
                events,
                timers: Mutex::new(None),
            }),
        })
    }

    /// Engine seeded from OS entropy.
    pub fn with_entropy(config: SessionConfig, events: Sender<RiskEngineEvent>) -> QpResult<Self> {
        Self::new(config, StdRng::from_entropy(), events)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Run a manual recalculation and wait for it.
    ///
    /// Fails with [`ScheduleError::CalculationInFlight`] while another
    /// calculation runs. A failed computation leaves the previous snapshot in
    /// place and sets the session's error message.
    pub async fn calculate(&self) -> QpResult<RiskSnapshot> {
        self.inner.run_calculation(RefreshTrigger::Manual).await
    }

    /// Switch auto-refresh on or off.
    ///
    /// Enabling starts the periodic refresh and the countdown ticker on the
    /// current tokio runtime. Disabling stops both; a calculation already in
    /// flight still completes.
    pub fn set_auto_refresh(&self, enabled: bool) -> QpResult<()> {
        let runtime = if enabled {
            Some(Handle::try_current().map_err(|e| {
                internal_error!("auto-refresh needs a tokio runtime: {e}")
            })?)
        } else {
            None
        };

        self.inner.session.lock().set_auto_refresh(enabled, Utc::now())?;

        let mut timers = self.inner.timers.lock();
        match runtime {
            Some(runtime) => {
                if timers.is_none() {
                    *timers = Some(AutoRefreshTimers::spawn(&runtime, &self.inner));
                }
            }
            None => {
                timers.take();
            }
        }
        drop(timers);

        info!(enabled, "auto-refresh toggled");
        self.inner.emit(RiskEngineEvent::AutoRefreshChanged { enabled });
        Ok(())
    }

    pub fn toggle_auto_refresh(&self) -> QpResult<bool> {
        let enabled = !self.inner.session.lock().refresh_state().auto_refresh();
        self.set_auto_refresh(enabled)?;
        Ok(enabled)
    }

    /// Edit the stress scenario. See [`RiskSession::update_scenario`].
    pub fn update_scenario<T, F>(&self, edit: F) -> QpResult<T>
    where
        F: FnOnce(&mut StressScenarioConfig) -> Result<T, ScenarioError>,
    {
        let (value, revision, changed) = {
            let mut session = self.inner.session.lock();
            let before = session.scenario_revision();
            let value = session.update_scenario(edit)?;
            let revision = session.scenario_revision();
            (value, revision, revision != before)
        };
        if changed {
            self.inner.emit(RiskEngineEvent::ScenarioUpdated { revision });
        }
        Ok(value)
    }

    /// Run the stress simulation against the current scenario.
    ///
    /// Returns `Ok(None)` when the scenario changed while the run was in
    /// flight; the stale result is dropped.
    pub async fn run_simulation(&self) -> QpResult<Option<SimulationResult>> {
        let inner = &self.inner;
        let (config, revision) = inner.session.lock().begin_simulation()?;
        info!(
            revision,
            severity = config.severity.value(),
            shock_months = config.shock_months(),
            "stress simulation started"
        );

        let guard = InFlight::new(inner, Job::Simulation);
        tokio::time::sleep(inner.config.simulation_latency()).await;
        let result = {
            let mut rng = inner.rng.lock();
            StressScenarioEngine::run(&config, &mut **rng, Utc::now())
        };
        guard.disarm();

        let stored = inner.session.lock().finish_simulation(revision, result);
        match &stored {
            Some(result) => {
                info!(
                    confidence = result.confidence,
                    stressed_var_99 = %result.stressed_var_99,
                    "stress simulation completed"
                );
                inner.emit(RiskEngineEvent::SimulationCompleted {
                    result: result.clone(),
                });
            }
            None => {
                info!(revision, "stress simulation result discarded");
                inner.emit(RiskEngineEvent::SimulationDiscarded { revision });
            }
        }
        Ok(stored)
    }

    pub fn view(&self) -> SessionView {
        self.inner.session.lock().view()
    }

    /// Run `f` with shared access to the session.
    pub fn with_session<T>(&self, f: impl FnOnce(&RiskSession) -> T) -> T {
        f(&self.inner.session.lock())
    }

    /// Stop the timers and close the session. In-flight work completes but
    /// its results are discarded.
    pub fn shutdown(&self) {
        self.inner.timers.lock().take();
        self.inner.session.lock().close(Utc::now());
        info!("risk engine shut down");
    }
}

impl Inner {
    async fn run_calculation(&self, trigger: RefreshTrigger) -> QpResult<RiskSnapshot> {
        let previous = self.session.lock().begin_calculation(trigger, Utc::now())?;
        info!(?trigger, "risk calculation started");

        let guard = InFlight::new(self, Job::Calculation);
        tokio::time::sleep(self.config.calculation_latency()).await;
        let outcome = {
            let mut rng = self.rng.lock();
            RiskMetricsCalculator::next_snapshot(&previous, &mut **rng, Utc::now())
        };
        guard.disarm();

        let committed = self.session.lock().finish_calculation(outcome, Utc::now());
        match &committed {
            Ok(snapshot) => {
                info!(
                    ?trigger,
                    var_95 = %snapshot.var_95,
                    var_99 = %snapshot.var_99,
                    cvar_95 = %snapshot.cvar_95,
                    cvar_99 = %snapshot.cvar_99,
                    "risk snapshot committed"
                );
                self.emit(RiskEngineEvent::SnapshotUpdated {
                    trigger,
                    snapshot: snapshot.clone(),
                });
            }
            Err(QpError::Schedule(ScheduleError::ShutDown)) => {
                debug!(?trigger, "calculation finished after shutdown, result discarded");
            }
            Err(e) => {
                warn!(?trigger, error = %e, "risk calculation failed");
                self.emit(RiskEngineEvent::CalculationFailed {
                    trigger,
                    message: CALCULATION_FAILED_MESSAGE.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        committed
    }

    fn emit(&self, event: RiskEngineEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("engine event dropped: {e}");
        }
    }
}

impl AutoRefreshTimers {
    fn spawn(runtime: &Handle, inner: &Arc<Inner>) -> Self {
        let period = inner.config.refresh_interval();
        let tick = inner.config.countdown_tick();
        Self {
            refresh: runtime.spawn(refresh_loop(Arc::downgrade(inner), period)),
            countdown: runtime.spawn(countdown_loop(Arc::downgrade(inner), tick)),
        }
    }
}

/// Fires a scheduled calculation every `period`. Each calculation runs as its
/// own task so stopping the timer does not cancel it.
async fn refresh_loop(inner: Weak<Inner>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            // Computation failures are logged and reported by run_calculation.
            if let Err(QpError::Schedule(e)) = inner.run_calculation(RefreshTrigger::Scheduled).await {
                debug!(error = %e, "scheduled refresh skipped");
            }
        });
    }
}

async fn countdown_loop(inner: Weak<Inner>, tick: std::time::Duration) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.session.lock().tick_countdown(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedSnapshot;
    use crate::state::RefreshState;
    use crossbeam_channel::{unbounded, Receiver};
    use qp_types::scenario::Severity;
    use rand_chacha::ChaCha8Rng;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn engine_with(config: SessionConfig) -> (RiskEngine, Receiver<RiskEngineEvent>) {
        let (tx, rx) = unbounded();
        let engine = RiskEngine::new(config, ChaCha8Rng::seed_from_u64(42), tx).unwrap();
        (engine, rx)
    }

    fn engine() -> (RiskEngine, Receiver<RiskEngineEvent>) {
        engine_with(SessionConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn manual_calculation_commits_snapshot() {
        let (engine, rx) = engine();
        let snapshot = engine.calculate().await.unwrap();
        assert!(snapshot.validate().is_ok());

        let view = engine.view();
        assert_eq!(view.snapshot, snapshot);
        assert_eq!(view.var_history.len(), 2);
        assert_eq!(view.cvar_history.len(), 2);
        assert_eq!(view.refresh, RefreshState::Idle);
        assert!(view.last_error.is_none());

        assert!(matches!(
            rx.try_recv().unwrap(),
            RiskEngineEvent::SnapshotUpdated {
                trigger: RefreshTrigger::Manual,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_manual_trigger_is_rejected() {
        let (engine, _rx) = engine();
        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.calculate().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.view().is_calculating);

        let err = engine.calculate().await.unwrap_err();
        assert!(matches!(
            err,
            QpError::Schedule(ScheduleError::CalculationInFlight)
        ));
        assert!(first.await.unwrap().is_ok());
        assert!(!engine.view().is_calculating);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_calculation_keeps_prior_snapshot() {
        // Sub-unit VaR rounds to zero, which is not a valid loss.
        let config = SessionConfig {
            seed: SeedSnapshot {
                var_95: dec!(-0.3),
                var_99: dec!(-0.4),
                cvar_95: dec!(-0.5),
                cvar_99: dec!(-0.6),
            },
            ..SessionConfig::default()
        };
        let (engine, rx) = engine_with(config);
        let before = engine.view().snapshot;

        assert!(engine.calculate().await.is_err());
        let view = engine.view();
        assert_eq!(view.snapshot, before);
        assert_eq!(view.var_history.len(), 1);
        assert_eq!(view.last_error.as_deref(), Some(CALCULATION_FAILED_MESSAGE));
        assert!(!view.is_calculating);
        assert!(matches!(
            rx.try_recv().unwrap(),
            RiskEngineEvent::CalculationFailed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_calculation_releases_the_session() {
        let (engine, _rx) = engine();
        let timed_out =
            tokio::time::timeout(Duration::from_millis(200), engine.calculate()).await;
        assert!(timed_out.is_err());

        let view = engine.view();
        assert!(!view.is_calculating);
        assert_eq!(view.var_history.len(), 1);
        assert!(engine.calculate().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_recalculates_each_period() {
        let (engine, rx) = engine();
        engine.set_auto_refresh(true).unwrap();
        assert!(engine.view().auto_refresh);
        assert!(engine.view().countdown.is_some());

        // first tick at 60s, committed at 61.5s
        tokio::time::sleep(Duration::from_millis(61_600)).await;
        let view = engine.view();
        assert_eq!(view.var_history.len(), 2);
        assert!(matches!(view.refresh, RefreshState::AutoRefreshOn { .. }));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(engine.view().var_history.len(), 3);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(
            events[0],
            RiskEngineEvent::AutoRefreshChanged { enabled: true }
        ));
        let scheduled = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    RiskEngineEvent::SnapshotUpdated {
                        trigger: RefreshTrigger::Scheduled,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(scheduled, 2);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_lets_in_flight_calculation_finish() {
        let (engine, _rx) = engine();
        engine.set_auto_refresh(true).unwrap();
        tokio::time::sleep(Duration::from_millis(60_500)).await;
        assert!(engine.view().is_calculating);

        engine.set_auto_refresh(false).unwrap();
        let view = engine.view();
        assert!(view.is_calculating);
        assert!(!view.auto_refresh);
        assert!(view.countdown.is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let view = engine.view();
        assert_eq!(view.refresh, RefreshState::Idle);
        assert_eq!(view.var_history.len(), 2);

        // no further ticks
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(engine.view().var_history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_flips_auto_refresh() {
        let (engine, _rx) = engine();
        assert!(engine.toggle_auto_refresh().unwrap());
        assert!(!engine.toggle_auto_refresh().unwrap());
        assert_eq!(engine.view().refresh, RefreshState::AutoRefreshOff);
    }

    #[test]
    fn auto_refresh_needs_a_runtime() {
        let (engine, _rx) = engine();
        assert!(matches!(
            engine.set_auto_refresh(true),
            Err(QpError::Internal(_))
        ));
        assert!(!engine.view().auto_refresh);
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_completes() {
        let (engine, rx) = engine();
        let result = engine.run_simulation().await.unwrap().unwrap();
        assert!((70..=94).contains(&result.confidence));
        assert_eq!(result.portfolio_value_change_pct, -27);
        let view = engine.view();
        assert!(!view.is_simulating);
        assert_eq!(view.simulation, Some(result));
        assert!(matches!(
            rx.try_recv().unwrap(),
            RiskEngineEvent::SimulationCompleted { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_discarded_when_scenario_changes() {
        let (engine, rx) = engine();
        let run = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_simulation().await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(engine.view().is_simulating);
        assert!(matches!(
            engine.run_simulation().await,
            Err(QpError::Schedule(ScheduleError::SimulationInFlight))
        ));

        engine
            .update_scenario(|c| {
                c.severity = Severity::new(90)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(run.await.unwrap().unwrap(), None);
        let view = engine.view();
        assert!(view.simulation.is_none());
        assert!(!view.is_simulating);
        assert_eq!(view.scenario.severity.value(), 90);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&RiskEngineEvent::ScenarioUpdated { revision: 1 }));
        assert!(events.contains(&RiskEngineEvent::SimulationDiscarded { revision: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_in_flight_work() {
        let (engine, _rx) = engine();
        engine.set_auto_refresh(true).unwrap();
        let calc = tokio::spawn({
            let engine = engine.clone();
            async move { engine.calculate().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.shutdown();

        assert!(matches!(
            calc.await.unwrap(),
            Err(QpError::Schedule(ScheduleError::ShutDown))
        ));
        assert_eq!(engine.view().var_history.len(), 1);
        assert!(engine.calculate().await.is_err());
        assert!(engine.run_simulation().await.is_err());
    }

    #[test]
    fn dropped_receiver_is_tolerated() {
        let (engine, rx) = engine();
        drop(rx);
        engine
            .update_scenario(|c| {
                c.severity = Severity::new(10)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(engine.view().scenario_revision, 1);
    }
}
