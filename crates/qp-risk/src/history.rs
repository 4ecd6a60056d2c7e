//! Bounded rolling history of risk estimates for trend charts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use qp_types::errors::HistoryError;
use qp_types::snapshot::{CvarPoint, RiskSnapshot, Timestamped, VarPoint};

/// Number of points kept per trend chart.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Chronologically ordered buffer that keeps only the most recent
/// `capacity` entries, evicting from the front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSeries<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Timestamped> HistoricalSeries<T> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn with_seed(capacity: usize, seed: T) -> Self {
        let mut series = Self::new(capacity);
        series.entries.push_back(seed);
        series
    }

    /// Fails if `entry` is older than the latest retained entry.
    pub fn check_order(&self, entry: &T) -> Result<(), HistoryError> {
        match self.entries.back() {
            Some(latest) if entry.taken_at() < latest.taken_at() => Err(HistoryError::OutOfOrder {
                incoming: entry.taken_at().to_rfc3339(),
                latest: latest.taken_at().to_rfc3339(),
            }),
            _ => Ok(()),
        }
    }

    /// Append `entry`, returning the evicted oldest entry if the window was full.
    pub fn push(&mut self, entry: T) -> Result<Option<T>, HistoryError> {
        self.check_order(&entry)?;
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            Ok(self.entries.pop_front())
        } else {
            Ok(None)
        }
    }

    /// Consuming form of [`push`](Self::push).
    pub fn appended(mut self, entry: T) -> Result<Self, HistoryError> {
        self.push(entry)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Timestamped + Clone> HistoricalSeries<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

/// The two trend series fed from every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskHistory {
    pub var: HistoricalSeries<VarPoint>,
    pub cvar: HistoricalSeries<CvarPoint>,
}

impl RiskHistory {
    pub fn seeded(capacity: usize, seed: &RiskSnapshot) -> Self {
        Self {
            var: HistoricalSeries::with_seed(capacity, seed.var_point()),
            cvar: HistoricalSeries::with_seed(capacity, seed.cvar_point()),
        }
    }

    /// Append `snapshot` to both series. Neither series changes on error.
    pub fn record(&mut self, snapshot: &RiskSnapshot) -> Result<(), HistoryError> {
        let var = snapshot.var_point();
        let cvar = snapshot.cvar_point();
        self.var.check_order(&var)?;
        self.cvar.check_order(&cvar)?;
        self.var.push(var)?;
        self.cvar.push(cvar)?;
        Ok(())
    }
}
