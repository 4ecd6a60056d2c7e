//! Synthetic loss-frequency histograms.
//!
//! The buckets span ±20% of the centre value and their frequencies follow a
//! discretized Gaussian kernel peaking at the middle bucket. Output depends
//! only on the inputs.

use rust_decimal::Decimal;

use qp_types::errors::RiskError;
use qp_types::money::format_currency;
use qp_types::snapshot::DistributionBucket;

/// Bucket count used by the dashboard histograms.
pub const DEFAULT_BUCKETS: usize = 10;

/// Build `bucket_count` buckets around `center`.
///
/// Bucket `i` sits at `center - 0.2|center| + i * 0.4|center| / bucket_count`
/// with frequency `round(100 * exp(-0.5 * ((i - n/2) / (n/4))^2))`.
pub fn generate_distribution(
    center: Decimal,
    bucket_count: usize,
) -> Result<Vec<DistributionBucket>, RiskError> {
    if bucket_count == 0 {
        return Err(RiskError::EmptyDistribution);
    }

    let n = Decimal::from(bucket_count as u64);
    let abs_value = center.abs();
    let step = abs_value * Decimal::new(4, 1) / n;
    let start = center
        .checked_sub(abs_value * Decimal::new(2, 1))
        .ok_or(RiskError::Overflow {
            field: "distribution",
        })?;

    let half = bucket_count as f64 / 2.0;
    let quarter = bucket_count as f64 / 4.0;

    (0..bucket_count)
        .map(|i| {
            let value = start
                .checked_add(step * Decimal::from(i as u64))
                .ok_or(RiskError::Overflow {
                    field: "distribution",
                })?;
            let z = (i as f64 - half) / quarter;
            let frequency = (100.0 * (-0.5 * z * z).exp()).round() as u32;
            Ok(DistributionBucket {
                value,
                label: format_currency(value),
                frequency,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn returns_requested_bucket_count() {
        for n in [1, 2, 5, 10, 25] {
            assert_eq!(generate_distribution(dec!(-15780), n).unwrap().len(), n);
        }
    }

    #[test]
    fn peak_sits_in_the_middle() {
        let buckets = generate_distribution(dec!(-15780), 10).unwrap();
        let freqs: Vec<u32> = buckets.iter().map(|b| b.frequency).collect();
        assert_eq!(freqs[5], 100);
        assert_eq!(freqs.iter().copied().max(), Some(100));
        for k in 1..5 {
            assert_eq!(freqs[5 - k], freqs[5 + k]);
            assert!(freqs[5 - k] < freqs[5 - k + 1]);
        }
        // exp(-2) * 100 = 13.53
        assert_eq!(freqs[0], 14);
    }

    #[test]
    fn odd_counts_peak_adjacent_to_middle() {
        let buckets = generate_distribution(dec!(-22500), 5).unwrap();
        let (argmax, _) = buckets
            .iter()
            .enumerate()
            .max_by_key(|(i, b)| (b.frequency, std::cmp::Reverse(*i)))
            .unwrap();
        assert!(argmax.abs_diff(5 / 2) <= 1);
    }

    #[test]
    fn values_span_twenty_percent_each_side() {
        let buckets = generate_distribution(dec!(-15780), 10).unwrap();
        assert_eq!(buckets[0].value, dec!(-18936));
        assert_eq!(buckets[1].value, dec!(-18304.8));
        assert_eq!(buckets[9].value, dec!(-13255.2));
        assert_eq!(buckets[0].label, "-$18,936");
        assert_eq!(buckets[9].label, "-$13,255");
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            generate_distribution(dec!(-31800), 10).unwrap(),
            generate_distribution(dec!(-31800), 10).unwrap()
        );
    }

    #[test]
    fn zero_buckets_rejected() {
        assert_eq!(
            generate_distribution(dec!(-100), 0),
            Err(RiskError::EmptyDistribution)
        );
    }
}
