//! Risk metrics computation.
//!
//! [`RiskMetricsCalculator`] derives the next [`RiskSnapshot`] from the
//! previous one. There is no return history behind it: the new figures are the
//! previous VaR scaled by randomly drawn [`VolatilityFactors`], with CVaR set as
//! a multiple of the new VaR. Treat the output as a placeholder estimate, not a
//! validated risk model.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use qp_types::errors::RiskError;
use qp_types::money::round_half_up;
use qp_types::snapshot::RiskSnapshot;

/// The multipliers applied in one recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityFactors {
    /// Applied to both VaR levels. Base factor in `[0.95, 1.05]` narrowed to
    /// `[0.98, 1.02]` of itself.
    pub var_factor: Decimal,
    /// New 95% CVaR as a multiple of new 95% VaR, in `[1.3, 1.5]`.
    pub cvar_factor_95: Decimal,
    /// New 99% CVaR as a multiple of new 99% VaR, in `[1.2, 1.4]`.
    pub cvar_factor_99: Decimal,
}

impl VolatilityFactors {
    /// Draw a fresh set of factors from `rng`.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let base = uniform(rng, Decimal::new(95, 2), Decimal::new(10, 2));
        let narrowing = uniform(rng, Decimal::new(98, 2), Decimal::new(4, 2));
        let cvar_factor_95 = uniform(rng, Decimal::new(13, 1), Decimal::new(2, 1));
        let cvar_factor_99 = uniform(rng, Decimal::new(12, 1), Decimal::new(2, 1));

        Self {
            var_factor: base * narrowing,
            cvar_factor_95,
            cvar_factor_99,
        }
    }
}

/// `low + width * u` for `u` uniform in `[0, 1)`.
fn uniform<R: Rng + ?Sized>(rng: &mut R, low: Decimal, width: Decimal) -> Decimal {
    let u: f64 = rng.gen();
    low + width * Decimal::from_f64(u).unwrap_or(Decimal::ZERO)
}

/// Stateless calculator for VaR / CVaR snapshots.
pub struct RiskMetricsCalculator;

impl RiskMetricsCalculator {
    /// Draw factors from `rng` and apply them to `previous`.
    pub fn next_snapshot<R: Rng + ?Sized>(
        previous: &RiskSnapshot,
        rng: &mut R,
        taken_at: DateTime<Utc>,
    ) -> Result<RiskSnapshot, RiskError> {
        let factors = VolatilityFactors::draw(rng);
        Self::apply(previous, &factors, taken_at)
    }

    /// Deterministic core of the recalculation.
    ///
    /// Both VaR levels move by the same factor so their ordering survives.
    /// CVaR is derived from the *new* VaR and clamped to at most `-1`.
    pub fn apply(
        previous: &RiskSnapshot,
        factors: &VolatilityFactors,
        taken_at: DateTime<Utc>,
    ) -> Result<RiskSnapshot, RiskError> {
        for (field, value) in [("var_95", previous.var_95), ("var_99", previous.var_99)] {
            if value >= Decimal::ZERO {
                return Err(RiskError::NonNegativeVar { field, value });
            }
        }

        let var_95 = scale(previous.var_95, factors.var_factor, "var_95")?;
        let var_99 = scale(previous.var_99, factors.var_factor, "var_99")?;
        let cvar_95 = scale(var_95, factors.cvar_factor_95, "cvar_95")?.min(-Decimal::ONE);
        let cvar_99 = scale(var_99, factors.cvar_factor_99, "cvar_99")?.min(-Decimal::ONE);

        debug!(
            %var_95, %var_99, %cvar_95, %cvar_99,
            var_factor = %factors.var_factor,
            "risk snapshot computed"
        );

        Ok(RiskSnapshot::new(var_95, var_99, cvar_95, cvar_99, taken_at))
    }
}

fn scale(value: Decimal, factor: Decimal, field: &'static str) -> Result<Decimal, RiskError> {
    value
        .checked_mul(factor)
        .and_then(round_half_up)
        .ok_or(RiskError::Overflow { field })
}
