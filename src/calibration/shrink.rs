//! Shrink Applicator - Adjusts raw probabilities at signal issue time
//!
//! Pure lookup-and-apply against the current calibration snapshot. The
//! never-boost invariant is re-asserted here: even a corrupted bucket with
//! a shrink above 1.0 cannot inflate a raw probability.

use crate::calibration::CalibrationState;
use crate::types::{AttentionBucket, BucketKey, Horizon, Regime};

/// Shrink applied when no calibration state has ever been published
pub const NO_STATE_SHRINK: f64 = 0.90;

/// Resolve the shrink factor for a signal's bucket
///
/// Exact bucket when present, the state's global fallback otherwise, and
/// the conservative default when no state exists at all.
pub fn get_shrink_factor(
    state: Option<&CalibrationState>,
    horizon: Horizon,
    regime: Regime,
    attention: AttentionBucket,
) -> f64 {
    let Some(state) = state else {
        return NO_STATE_SHRINK;
    };
    let key = BucketKey {
        horizon,
        regime,
        attention,
    };
    match state.bucket(&key) {
        Some(bucket) => bucket.shrink,
        None => state.global.shrink,
    }
}

/// Apply a shrink factor to a raw probability
///
/// The factor is clamped to at most 1.0 before multiplying, and the product
/// is clamped into [0, 1]. Total: no inputs fail.
pub fn apply_shrink(raw_probability: f64, shrink_factor: f64) -> f64 {
    let shrink = shrink_factor.min(1.0);
    (raw_probability * shrink).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{BucketCounters, CalibrationAggregator};
    use std::collections::HashMap;

    fn state_with_bucket(key: BucketKey, pass: usize, fail: usize) -> CalibrationState {
        let mut counters = HashMap::new();
        counters.insert(
            key,
            BucketCounters {
                pass,
                fail,
                expired: 0,
                avg_probability: 0.6,
            },
        );
        CalibrationAggregator::aggregate(&counters)
    }

    #[test]
    fn test_bucket_then_global_then_default() {
        let key = BucketKey {
            horizon: Horizon::Hour2,
            regime: Regime::Approved,
            attention: AttentionBucket::High,
        };
        let state = state_with_bucket(key, 30, 20);

        // Exact bucket: 0.60 pass rate -> 1.00.
        assert_eq!(
            get_shrink_factor(Some(&state), key.horizon, key.regime, key.attention),
            1.00
        );
        // Missing bucket falls back to the global shrink.
        assert_eq!(
            get_shrink_factor(
                Some(&state),
                Horizon::Week,
                Regime::Caution,
                AttentionBucket::Low
            ),
            state.global.shrink
        );
        // No state at all.
        assert_eq!(
            get_shrink_factor(None, key.horizon, key.regime, key.attention),
            NO_STATE_SHRINK
        );
    }

    #[test]
    fn test_apply_shrink_never_boosts() {
        for p in [0.0, 0.1, 0.5, 0.73, 1.0] {
            for s in [0.0, 0.5, 0.9, 1.0, 1.5, 2.0] {
                let adjusted = apply_shrink(p, s);
                assert!(adjusted <= p, "boosted {} with shrink {}", p, s);
                assert!((0.0..=1.0).contains(&adjusted));
            }
        }
    }

    #[test]
    fn test_apply_shrink_clamps_corrupt_factor() {
        // A shrink above 1.0 is clamped, not propagated.
        assert_eq!(apply_shrink(0.8, 1.25), 0.8);
        // Negative garbage cannot push below zero.
        assert_eq!(apply_shrink(0.8, -0.5), 0.0);
    }

    #[test]
    fn test_apply_shrink_basic() {
        assert!((apply_shrink(0.70, 0.85) - 0.595).abs() < 1e-12);
        assert_eq!(apply_shrink(0.70, 1.0), 0.70);
    }
}
