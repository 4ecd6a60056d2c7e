//! Stress scenario simulation.
//!
//! [`StressScenarioEngine::simulate`] synthesizes a three-phase portfolio value
//! path (stable, shock, recovery) from the scenario parameters. It is a pure
//! function of the config. [`StressScenarioEngine::run`] adds the randomized
//! confidence score and the display impact figures of an explicit run.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use tracing::debug;

use qp_types::scenario::{
    Severity, SimulationResult, StressPoint, StressScenarioConfig, StressTimeSeries,
};

/// Length of the pre-shock phase.
pub const STABLE_MONTHS: u32 = 3;
/// Recovery lasts this many times the shock duration.
pub const RECOVERY_MULTIPLIER: u32 = 4;

const INITIAL_VALUE: f64 = 100.0;
const STABLE_DECLINE_PER_MONTH: f64 = 0.5;
const DEPTH_PER_SEVERITY_POINT: f64 = 0.8;
const FIRST_MONTH_DROP_WEIGHT: f64 = 0.6;

const CONFIDENCE_FLOOR: f64 = 70.0;
const CONFIDENCE_SPAN: f64 = 25.0;

/// Stateless stress-scenario engine.
pub struct StressScenarioEngine;

impl StressScenarioEngine {
    /// Total drop (in points of the initial 100) the shock weights are scaled by.
    pub fn shock_depth(severity: Severity) -> f64 {
        let fraction = f64::from(severity.value()) * DEPTH_PER_SEVERITY_POINT / 100.0;
        INITIAL_VALUE * fraction.min(1.0)
    }

    /// Synthesize the stable → shock → recovery series.
    ///
    /// The shock drops month by month from the last stable value, so even a
    /// mild shock ends below the stable phase. Month `i` falls by
    /// `depth * w_i / d` where `w_0 = 0.6` and `w_i = 1 - i/d` afterwards, so
    /// the first month takes a sharp hit and later months ease off while the
    /// value keeps falling. The last shock month is the trough.
    /// Recovery climbs back towards 100 along `sqrt(i / len)`.
    pub fn simulate(config: &StressScenarioConfig) -> StressTimeSeries {
        let duration = config.shock_months();
        let recovery_len = duration * RECOVERY_MULTIPLIER;
        let mut points =
            Vec::with_capacity((STABLE_MONTHS + duration + recovery_len) as usize);

        for month in 0..STABLE_MONTHS {
            points.push(StressPoint {
                month,
                portfolio_value: INITIAL_VALUE - STABLE_DECLINE_PER_MONTH * f64::from(month),
            });
        }

        let pre_shock = points
            .last()
            .map(|p| p.portfolio_value)
            .unwrap_or(INITIAL_VALUE);
        let depth = Self::shock_depth(config.severity);
        let d = f64::from(duration);
        let mut cumulative_weight = 0.0;
        for i in 0..duration {
            cumulative_weight += if i == 0 {
                FIRST_MONTH_DROP_WEIGHT
            } else {
                1.0 - f64::from(i) / d
            };
            points.push(StressPoint {
                month: STABLE_MONTHS + i,
                portfolio_value: pre_shock - depth * cumulative_weight / d,
            });
        }

        let lowest = points
            .last()
            .map(|p| p.portfolio_value)
            .unwrap_or(pre_shock);
        let recovery_start = STABLE_MONTHS + duration;
        for i in 0..recovery_len {
            let recovery_factor = (f64::from(i) / f64::from(recovery_len)).sqrt();
            points.push(StressPoint {
                month: recovery_start + i,
                portfolio_value: lowest + (INITIAL_VALUE - lowest) * recovery_factor,
            });
        }

        debug!(
            severity = config.severity.value(),
            shock_months = duration,
            points = points.len(),
            trough = lowest,
            "stress series synthesized"
        );

        StressTimeSeries {
            points,
            shock_start: STABLE_MONTHS as usize,
            shock_len: duration as usize,
        }
    }

    /// Confidence score in `70..=94`.
    pub fn draw_confidence<R: Rng + ?Sized>(rng: &mut R) -> u8 {
        let u: f64 = rng.gen();
        (CONFIDENCE_FLOOR + u * CONFIDENCE_SPAN).floor() as u8
    }

    /// Display figures of a completed run. These are fixed functions of
    /// severity and recovery period layered on the confidence score, not
    /// modelled quantities.
    pub fn impact(
        config: &StressScenarioConfig,
        confidence: u8,
        completed_at: DateTime<Utc>,
    ) -> SimulationResult {
        let s = i64::from(config.severity.value());
        let r = config.recovery_months();
        SimulationResult {
            confidence,
            portfolio_value_change_pct: -(15 + s / 5),
            max_drawdown_pct: -(20 + s / 4),
            stressed_var_99: Decimal::from(30_000 + s * 500),
            stressed_cvar_99: Decimal::from(40_000 + s * 600),
            recovery_time_months: r * (100 + u32::from(config.severity.value())) / 100,
            completed_at,
        }
    }

    /// Complete an explicit simulation run.
    pub fn run<R: Rng + ?Sized>(
        config: &StressScenarioConfig,
        rng: &mut R,
        completed_at: DateTime<Utc>,
    ) -> SimulationResult {
        let confidence = Self::draw_confidence(rng);
        Self::impact(config, confidence, completed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qp_types::scenario::{months, ScenarioType};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rust_decimal_macros::dec;

    fn config(severity: i64, shock: i64, recovery: i64) -> StressScenarioConfig {
        StressScenarioConfig {
            severity: Severity::new(severity).unwrap(),
            shock_duration_months: months("shock duration", shock).unwrap(),
            recovery_period_months: months("recovery period", recovery).unwrap(),
            ..Default::default()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn default_scenario_shape() {
        let series = StressScenarioEngine::simulate(&config(60, 3, 12));
        assert_eq!(series.len(), 18);
        assert!(approx(series.points[0].portfolio_value, 100.0));
        assert!(approx(series.points[1].portfolio_value, 99.5));
        assert!(approx(series.points[2].portfolio_value, 99.0));

        let shock: Vec<f64> = series.shock_phase().iter().map(|p| p.portfolio_value).collect();
        assert_eq!(shock.len(), 3);
        assert!(shock.windows(2).all(|w| w[1] < w[0]));
        assert!(shock[0] < 99.0);
        // depth 48, first month weight 0.6 over 3 months
        assert!(approx(shock[0], 99.0 - 9.6));
        assert!(approx(shock[2], 99.0 - 48.0 * 1.6 / 3.0));
    }

    #[test]
    fn length_follows_shock_duration() {
        for shock in [1, 2, 3, 7, 12] {
            let series = StressScenarioEngine::simulate(&config(40, shock, 6));
            let d = shock as usize;
            assert_eq!(series.len(), 3 + d + d * 4);
            assert_eq!(series.recovery_phase().len(), d * 4);
        }
    }

    #[test]
    fn months_are_contiguous() {
        let series = StressScenarioEngine::simulate(&config(80, 4, 12));
        for (i, p) in series.points.iter().enumerate() {
            assert_eq!(p.month as usize, i);
        }
    }

    #[test]
    fn shock_end_is_global_minimum() {
        for severity in [1, 10, 60, 100] {
            for shock in [1, 3, 6, 24] {
                let series = StressScenarioEngine::simulate(&config(severity, shock, 12));
                let end = series.shock_phase().last().unwrap();
                let trough = series.trough().unwrap();
                assert_eq!(trough.month, end.month, "severity {severity}, shock {shock}");
                let shock: Vec<f64> =
                    series.shock_phase().iter().map(|p| p.portfolio_value).collect();
                assert!(shock.windows(2).all(|w| w[1] < w[0]));
            }
        }
    }

    #[test]
    fn mild_short_shock_dips_below_stable_phase() {
        for shock in [1, 2] {
            let series = StressScenarioEngine::simulate(&config(1, shock, 6));
            let first = series.shock_phase()[0].portfolio_value;
            assert!(first < 99.0, "shock {shock}: {first}");
            assert!(approx(first, 99.0 - 0.8 * 0.6 / shock as f64));
        }
    }

    #[test]
    fn recovery_is_concave_and_bounded() {
        let series = StressScenarioEngine::simulate(&config(60, 3, 12));
        let recovery: Vec<f64> = series.recovery_phase().iter().map(|p| p.portfolio_value).collect();
        let lowest = series.shock_phase().last().unwrap().portfolio_value;
        assert!(approx(recovery[0], lowest));
        assert!(recovery.windows(2).all(|w| w[1] > w[0]));
        assert!(recovery.iter().all(|v| *v < 100.0));
        // sqrt recovery: early gains exceed later ones
        assert!(recovery[1] - recovery[0] > recovery[11] - recovery[10]);
    }

    #[test]
    fn zero_severity_is_flat_after_stable_phase() {
        let series = StressScenarioEngine::simulate(&config(0, 3, 12));
        assert!(series.shock_phase().iter().all(|p| approx(p.portfolio_value, 99.0)));
        assert!(series.points.iter().all(|p| p.portfolio_value >= 99.0));
    }

    #[test]
    fn simulate_is_idempotent() {
        let cfg = config(70, 5, 18);
        assert_eq!(
            StressScenarioEngine::simulate(&cfg),
            StressScenarioEngine::simulate(&cfg)
        );
    }

    #[test]
    fn scenario_type_does_not_change_the_path() {
        let historical = config(50, 3, 12);
        let custom = StressScenarioConfig {
            scenario_type: ScenarioType::Custom,
            ..historical.clone()
        };
        assert_eq!(
            StressScenarioEngine::simulate(&historical).points,
            StressScenarioEngine::simulate(&custom).points
        );
    }

    #[test]
    fn impact_figures() {
        let result = StressScenarioEngine::impact(&config(60, 3, 12), 88, Utc::now());
        assert_eq!(result.confidence, 88);
        assert_eq!(result.portfolio_value_change_pct, -27);
        assert_eq!(result.max_drawdown_pct, -35);
        assert_eq!(result.stressed_var_99, dec!(60000));
        assert_eq!(result.stressed_cvar_99, dec!(76000));
        // floor(12 * 1.6)
        assert_eq!(result.recovery_time_months, 19);
    }

    #[test]
    fn confidence_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..1_000 {
            let c = StressScenarioEngine::draw_confidence(&mut rng);
            assert!((70..=94).contains(&c));
        }
    }

    #[test]
    fn run_combines_confidence_and_impact() {
        let cfg = config(30, 2, 10);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let result = StressScenarioEngine::run(&cfg, &mut rng, Utc::now());
        assert!((70..=94).contains(&result.confidence));
        assert_eq!(result.max_drawdown_pct, -27);
        assert_eq!(result.recovery_time_months, 13);
    }
}
