//! Point-in-time VaR / CVaR estimates and their chart projections.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::RiskError;

/// Startup values of the seed snapshot, in whole dollars.
pub const SEED_VAR_95: i64 = -15_780;
pub const SEED_VAR_99: i64 = -25_320;
pub const SEED_CVAR_95: i64 = -22_500;
pub const SEED_CVAR_99: i64 = -31_800;

/// A 1-day VaR / CVaR estimate at 95% and 99% confidence.
///
/// All four figures are losses and therefore negative. Snapshots are never
/// mutated; the next recalculation produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub id: Uuid,
    pub var_95: Decimal,
    pub var_99: Decimal,
    pub cvar_95: Decimal,
    pub cvar_99: Decimal,
    pub taken_at: DateTime<Utc>,
}

impl RiskSnapshot {
    pub fn new(
        var_95: Decimal,
        var_99: Decimal,
        cvar_95: Decimal,
        cvar_99: Decimal,
        taken_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            var_95,
            var_99,
            cvar_95,
            cvar_99,
            taken_at,
        }
    }

    /// The snapshot every session starts from.
    pub fn seed(taken_at: DateTime<Utc>) -> Self {
        Self::new(
            Decimal::from(SEED_VAR_95),
            Decimal::from(SEED_VAR_99),
            Decimal::from(SEED_CVAR_95),
            Decimal::from(SEED_CVAR_99),
            taken_at,
        )
    }

    /// Check that every figure is a loss and that CVaR is at least as severe
    /// as VaR at the same confidence level.
    pub fn validate(&self) -> Result<(), RiskError> {
        let fields = [
            ("var_95", self.var_95),
            ("var_99", self.var_99),
            ("cvar_95", self.cvar_95),
            ("cvar_99", self.cvar_99),
        ];
        for (name, value) in fields {
            if value >= Decimal::ZERO {
                return Err(RiskError::InvariantViolation {
                    message: format!("{name} must be negative, got {value}"),
                });
            }
        }
        if self.cvar_95.abs() < self.var_95.abs() {
            return Err(RiskError::InvariantViolation {
                message: format!(
                    "|cvar_95| {} is smaller than |var_95| {}",
                    self.cvar_95.abs(),
                    self.var_95.abs()
                ),
            });
        }
        if self.cvar_99.abs() < self.var_99.abs() {
            return Err(RiskError::InvariantViolation {
                message: format!(
                    "|cvar_99| {} is smaller than |var_99| {}",
                    self.cvar_99.abs(),
                    self.var_99.abs()
                ),
            });
        }
        Ok(())
    }

    pub fn var_point(&self) -> VarPoint {
        VarPoint {
            taken_at: self.taken_at,
            var_95: self.var_95,
            var_99: self.var_99,
        }
    }

    pub fn cvar_point(&self) -> CvarPoint {
        CvarPoint {
            taken_at: self.taken_at,
            cvar_95: self.cvar_95,
            cvar_99: self.cvar_99,
        }
    }
}

/// Anything carrying the time it was observed.
pub trait Timestamped {
    fn taken_at(&self) -> DateTime<Utc>;
}

/// VaR trend chart entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarPoint {
    pub taken_at: DateTime<Utc>,
    pub var_95: Decimal,
    pub var_99: Decimal,
}

/// CVaR trend chart entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvarPoint {
    pub taken_at: DateTime<Utc>,
    pub cvar_95: Decimal,
    pub cvar_99: Decimal,
}

impl Timestamped for RiskSnapshot {
    fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

impl Timestamped for VarPoint {
    fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

impl Timestamped for CvarPoint {
    fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

/// One bar of a loss-frequency histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionBucket {
    /// Loss level at the bucket's position.
    pub value: Decimal,
    /// `value` formatted as currency.
    pub label: String,
    pub frequency: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn seed_snapshot_is_valid() {
        let snap = RiskSnapshot::seed(Utc::now());
        assert_eq!(snap.var_95, dec!(-15780));
        assert_eq!(snap.cvar_99, dec!(-31800));
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn positive_var_is_rejected() {
        let snap = RiskSnapshot::new(dec!(100), dec!(-200), dec!(-300), dec!(-400), Utc::now());
        assert!(matches!(
            snap.validate(),
            Err(RiskError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn cvar_milder_than_var_is_rejected() {
        let snap = RiskSnapshot::new(
            dec!(-1000),
            dec!(-2000),
            dec!(-900),
            dec!(-2500),
            Utc::now(),
        );
        let err = snap.validate().unwrap_err();
        assert!(err.to_string().contains("cvar_95"));
    }

    #[test]
    fn projections_share_timestamp() {
        let snap = RiskSnapshot::seed(Utc::now());
        assert_eq!(snap.var_point().taken_at, snap.taken_at);
        assert_eq!(snap.cvar_point().cvar_95, snap.cvar_95);
        assert_eq!(snap.var_point().var_99, snap.var_99);
    }

    #[test]
    fn snapshot_serialization_roundtrip() {
        let snap = RiskSnapshot::seed(Utc::now());
        let json = serde_json::to_string(&snap).unwrap();
        let back: RiskSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, back);
    }
}
