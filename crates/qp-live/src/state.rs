//! Refresh scheduling state machine.
//!
//! ```text
//!   Idle ──manual──▶ Calculating ──done──▶ Idle            (auto-refresh off)
//!   AutoRefreshOff ──enable──▶ AutoRefreshOn ──tick──▶ Calculating ──done──▶ AutoRefreshOn
//!   AutoRefreshOn ──disable──▶ AutoRefreshOff
//! ```
//!
//! A `Calculating` state remembers whether auto-refresh is engaged so the
//! completion lands back in the right place; toggling during a calculation
//! only flips that memory.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use qp_types::errors::ScheduleError;

/// Shown once the refresh deadline has passed.
pub const REFRESHING_LABEL: &str = "Refreshing...";

/// What started a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshTrigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshEvent {
    Trigger(RefreshTrigger),
    EnableAutoRefresh,
    DisableAutoRefresh,
    /// A scheduled tick fired while a calculation was already running.
    TickSkipped,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshState {
    /// Nothing running, auto-refresh not engaged.
    #[default]
    Idle,
    /// Auto-refresh was just switched off; nothing running.
    AutoRefreshOff,
    AutoRefreshOn { next_refresh_at: DateTime<Utc> },
    Calculating {
        trigger: RefreshTrigger,
        started_at: DateTime<Utc>,
        /// `Some` while auto-refresh is engaged.
        next_refresh_at: Option<DateTime<Utc>>,
    },
}

impl RefreshState {
    /// Compute the state after `event`. `interval` is the auto-refresh period.
    pub fn apply(
        &self,
        event: RefreshEvent,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<RefreshState, ScheduleError> {
        use RefreshEvent::*;
        use RefreshState::*;

        match (self, event) {
            (Calculating { .. }, Trigger(_)) => Err(ScheduleError::CalculationInFlight),
            (Idle | AutoRefreshOff, Trigger(RefreshTrigger::Scheduled)) => {
                Err(ScheduleError::AutoRefreshDisabled)
            }
            (Idle | AutoRefreshOff, Trigger(RefreshTrigger::Manual)) => Ok(Calculating {
                trigger: RefreshTrigger::Manual,
                started_at: now,
                next_refresh_at: None,
            }),
            (AutoRefreshOn { next_refresh_at }, Trigger(RefreshTrigger::Manual)) => {
                Ok(Calculating {
                    trigger: RefreshTrigger::Manual,
                    started_at: now,
                    next_refresh_at: Some(*next_refresh_at),
                })
            }
            // Each scheduled tick restarts the countdown.
            (AutoRefreshOn { .. }, Trigger(RefreshTrigger::Scheduled)) => Ok(Calculating {
                trigger: RefreshTrigger::Scheduled,
                started_at: now,
                next_refresh_at: Some(now + interval),
            }),

            (Idle | AutoRefreshOff, EnableAutoRefresh) => Ok(AutoRefreshOn {
                next_refresh_at: now + interval,
            }),
            (AutoRefreshOn { .. }, EnableAutoRefresh) => Ok(self.clone()),
            (
                Calculating {
                    trigger,
                    started_at,
                    next_refresh_at,
                },
                EnableAutoRefresh,
            ) => Ok(Calculating {
                trigger: *trigger,
                started_at: *started_at,
                next_refresh_at: Some(next_refresh_at.unwrap_or(now + interval)),
            }),

            (AutoRefreshOn { .. }, DisableAutoRefresh) => Ok(AutoRefreshOff),
            (Idle | AutoRefreshOff, DisableAutoRefresh) => Ok(self.clone()),
            (
                Calculating {
                    trigger,
                    started_at,
                    ..
                },
                DisableAutoRefresh,
            ) => Ok(Calculating {
                trigger: *trigger,
                started_at: *started_at,
                next_refresh_at: None,
            }),

            // The skipped tick still restarts the countdown.
            (
                Calculating {
                    trigger,
                    started_at,
                    next_refresh_at: Some(_),
                },
                TickSkipped,
            ) => Ok(Calculating {
                trigger: *trigger,
                started_at: *started_at,
                next_refresh_at: Some(now + interval),
            }),
            (_, TickSkipped) => Ok(self.clone()),

            (Calculating { next_refresh_at, .. }, Completed) => Ok(match next_refresh_at {
                Some(next_refresh_at) => AutoRefreshOn {
                    next_refresh_at: *next_refresh_at,
                },
                None => Idle,
            }),
            (_, Completed) => Err(ScheduleError::NotCalculating),
        }
    }

    pub fn is_calculating(&self) -> bool {
        matches!(self, RefreshState::Calculating { .. })
    }

    pub fn auto_refresh(&self) -> bool {
        self.next_refresh_at().is_some()
    }

    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RefreshState::AutoRefreshOn { next_refresh_at } => Some(*next_refresh_at),
            RefreshState::Calculating {
                next_refresh_at, ..
            } => *next_refresh_at,
            RefreshState::Idle | RefreshState::AutoRefreshOff => None,
        }
    }
}

/// Whole seconds until `next_refresh_at`, e.g. `"42s"`.
pub fn countdown_label(next_refresh_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = next_refresh_at - now;
    if remaining <= Duration::zero() {
        REFRESHING_LABEL.to_string()
    } else {
        format!("{}s", remaining.num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn minute() -> Duration {
        Duration::seconds(60)
    }

    fn step(state: &RefreshState, event: RefreshEvent, at: i64) -> RefreshState {
        state.apply(event, t(at), minute()).unwrap()
    }

    #[test]
    fn manual_cycle_returns_to_idle() {
        let s = RefreshState::default();
        let s = step(&s, RefreshEvent::Trigger(RefreshTrigger::Manual), 0);
        assert!(s.is_calculating());
        assert!(!s.auto_refresh());
        let s = step(&s, RefreshEvent::Completed, 2);
        assert_eq!(s, RefreshState::Idle);
    }

    #[test]
    fn concurrent_trigger_rejected() {
        let s = step(
            &RefreshState::Idle,
            RefreshEvent::Trigger(RefreshTrigger::Manual),
            0,
        );
        assert_eq!(
            s.apply(RefreshEvent::Trigger(RefreshTrigger::Manual), t(1), minute()),
            Err(ScheduleError::CalculationInFlight)
        );
        assert_eq!(
            s.apply(RefreshEvent::Trigger(RefreshTrigger::Scheduled), t(1), minute()),
            Err(ScheduleError::CalculationInFlight)
        );
    }

    #[test]
    fn scheduled_tick_resets_countdown() {
        let s = step(&RefreshState::AutoRefreshOff, RefreshEvent::EnableAutoRefresh, 0);
        assert_eq!(s.next_refresh_at(), Some(t(60)));

        let s = step(&s, RefreshEvent::Trigger(RefreshTrigger::Scheduled), 60);
        assert_eq!(s.next_refresh_at(), Some(t(120)));

        let s = step(&s, RefreshEvent::Completed, 62);
        assert_eq!(
            s,
            RefreshState::AutoRefreshOn {
                next_refresh_at: t(120)
            }
        );
    }

    #[test]
    fn skipped_tick_moves_deadline() {
        let s = step(&RefreshState::Idle, RefreshEvent::EnableAutoRefresh, 0);
        let s = step(&s, RefreshEvent::Trigger(RefreshTrigger::Manual), 59);
        let s = step(&s, RefreshEvent::TickSkipped, 60);
        assert!(s.is_calculating());
        assert_eq!(s.next_refresh_at(), Some(t(120)));
        assert_eq!(
            step(&s, RefreshEvent::Completed, 61),
            RefreshState::AutoRefreshOn {
                next_refresh_at: t(120)
            }
        );

        // Outside an auto-refreshing calculation the event changes nothing.
        let manual = step(&RefreshState::Idle, RefreshEvent::Trigger(RefreshTrigger::Manual), 0);
        assert_eq!(step(&manual, RefreshEvent::TickSkipped, 1), manual);
        let on = step(&RefreshState::Idle, RefreshEvent::EnableAutoRefresh, 0);
        assert_eq!(step(&on, RefreshEvent::TickSkipped, 5), on);
    }

    #[test]
    fn manual_trigger_keeps_auto_deadline() {
        let s = step(&RefreshState::Idle, RefreshEvent::EnableAutoRefresh, 0);
        let s = step(&s, RefreshEvent::Trigger(RefreshTrigger::Manual), 10);
        assert_eq!(s.next_refresh_at(), Some(t(60)));
        let s = step(&s, RefreshEvent::Completed, 12);
        assert_eq!(
            s,
            RefreshState::AutoRefreshOn {
                next_refresh_at: t(60)
            }
        );
    }

    #[test]
    fn disabling_mid_calculation_lands_in_idle() {
        let s = step(&RefreshState::Idle, RefreshEvent::EnableAutoRefresh, 0);
        let s = step(&s, RefreshEvent::Trigger(RefreshTrigger::Scheduled), 60);
        let s = step(&s, RefreshEvent::DisableAutoRefresh, 61);
        assert!(s.is_calculating());
        assert!(!s.auto_refresh());
        assert_eq!(step(&s, RefreshEvent::Completed, 62), RefreshState::Idle);
    }

    #[test]
    fn enabling_mid_calculation_resumes_auto() {
        let s = step(
            &RefreshState::Idle,
            RefreshEvent::Trigger(RefreshTrigger::Manual),
            0,
        );
        let s = step(&s, RefreshEvent::EnableAutoRefresh, 1);
        assert_eq!(s.next_refresh_at(), Some(t(61)));
        assert_eq!(
            step(&s, RefreshEvent::Completed, 2),
            RefreshState::AutoRefreshOn {
                next_refresh_at: t(61)
            }
        );
    }

    #[test]
    fn toggle_off_and_stale_ticks() {
        let s = step(&RefreshState::Idle, RefreshEvent::EnableAutoRefresh, 0);
        let s = step(&s, RefreshEvent::DisableAutoRefresh, 5);
        assert_eq!(s, RefreshState::AutoRefreshOff);
        assert_eq!(
            s.apply(RefreshEvent::Trigger(RefreshTrigger::Scheduled), t(60), minute()),
            Err(ScheduleError::AutoRefreshDisabled)
        );
        assert_eq!(
            s.apply(RefreshEvent::Completed, t(60), minute()),
            Err(ScheduleError::NotCalculating)
        );
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let on = step(&RefreshState::Idle, RefreshEvent::EnableAutoRefresh, 0);
        assert_eq!(step(&on, RefreshEvent::EnableAutoRefresh, 30), on);
        assert_eq!(
            step(&RefreshState::Idle, RefreshEvent::DisableAutoRefresh, 0),
            RefreshState::Idle
        );
    }

    #[test]
    fn countdown_labels() {
        assert_eq!(countdown_label(t(60), t(0)), "60s");
        assert_eq!(countdown_label(t(60), t(18)), "42s");
        assert_eq!(
            countdown_label(t(60), t(59) + Duration::milliseconds(500)),
            "0s"
        );
        assert_eq!(countdown_label(t(60), t(60)), REFRESHING_LABEL);
        assert_eq!(countdown_label(t(60), t(75)), REFRESHING_LABEL);
    }
}
