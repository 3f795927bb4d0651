//! Calibration Aggregator - Converts evaluation history into shrink factors
//!
//! Buckets evaluated outcomes by (horizon, regime, attention), derives a
//! conservative shrink factor per bucket and a global fallback, and
//! publishes the result as a versioned, atomically-swapped snapshot.
//!
//! The shrink policy is asymmetric by design: overconfidence is penalized
//! harder than underconfidence, and no bucket can ever shrink above 1.0.

pub mod shrink;

pub use shrink::{apply_shrink, get_shrink_factor, NO_STATE_SHRINK};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::types::BucketKey;

/// Minimum evaluated samples before a bucket's pass rate is trusted
pub const MIN_BUCKET_SAMPLES: usize = 10;

/// Shrink applied while a bucket has insufficient evidence
pub const INSUFFICIENT_EVIDENCE_SHRINK: f64 = 0.90;

/// Shrink factor for a pass rate and sample size
///
/// Monotone non-decreasing in pass rate and capped at 1.0: historical
/// performance can only ever discount a raw probability, never boost it.
pub fn shrink_for(pass_rate: f64, sample_size: usize) -> f64 {
    if sample_size < MIN_BUCKET_SAMPLES {
        return INSUFFICIENT_EVIDENCE_SHRINK;
    }
    if pass_rate < 0.35 {
        0.50
    } else if pass_rate < 0.45 {
        0.70
    } else if pass_rate < 0.50 {
        0.85
    } else if pass_rate < 0.55 {
        0.95
    } else {
        1.00
    }
}

/// Per-bucket aggregate counters computed over the evaluation history
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BucketCounters {
    /// PASS outcomes
    pub pass: usize,
    /// FAIL outcomes
    pub fail: usize,
    /// EXPIRED outcomes (count as failures)
    pub expired: usize,
    /// Average issued probability across the bucket's samples
    pub avg_probability: f64,
}

impl BucketCounters {
    pub fn sample_size(&self) -> usize {
        self.pass + self.fail + self.expired
    }
}

/// Calibration statistics for one bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBucket {
    /// Bucket key (horizon, regime, attention)
    pub key: BucketKey,
    /// PASS outcomes
    pub pass: usize,
    /// FAIL outcomes
    pub fail: usize,
    /// EXPIRED outcomes
    pub expired: usize,
    /// Total evaluated samples
    pub sample_size: usize,
    /// Pass rate over all samples (EXPIRED counts against)
    pub pass_rate: f64,
    /// Average issued probability
    pub avg_probability: f64,
    /// Derived shrink factor in [0, 1]
    pub shrink: f64,
}

impl CalibrationBucket {
    fn from_counters(key: BucketKey, counters: &BucketCounters) -> Self {
        let sample_size = counters.sample_size();
        let pass_rate = if sample_size > 0 {
            counters.pass as f64 / sample_size as f64
        } else {
            0.0
        };
        Self {
            key,
            pass: counters.pass,
            fail: counters.fail,
            expired: counters.expired,
            sample_size,
            pass_rate,
            avg_probability: counters.avg_probability,
            shrink: shrink_for(pass_rate, sample_size),
        }
    }
}

/// Global statistics over the union of all bucket samples
///
/// Serves as the fallback when a specific bucket is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Total evaluated signals across all buckets
    pub total_signals: usize,
    /// Total PASS outcomes
    pub total_pass: usize,
    /// Total FAIL outcomes
    pub total_fail: usize,
    /// Total EXPIRED outcomes
    pub total_expired: usize,
    /// Global pass rate; None when there is no data
    pub pass_rate: Option<f64>,
    /// Sample-weighted average issued probability
    pub avg_probability: f64,
    /// Global fallback shrink factor
    pub shrink: f64,
}

/// Complete calibration snapshot
///
/// Recomputed wholesale on each aggregation run and published by replacing
/// the previous snapshot; never mutated in place.
#[derive(Debug, Clone)]
pub struct CalibrationState {
    /// Monotonically increasing snapshot version, stamped at publish
    pub version: u64,
    /// Aggregation timestamp (Unix milliseconds)
    pub computed_at: i64,
    /// Per-bucket statistics
    pub buckets: HashMap<BucketKey, CalibrationBucket>,
    /// Global fallback statistics
    pub global: GlobalStats,
}

impl CalibrationState {
    /// Look up one bucket
    pub fn bucket(&self, key: &BucketKey) -> Option<&CalibrationBucket> {
        self.buckets.get(key)
    }

    /// Total signals across buckets (equals `global.total_signals`)
    pub fn total_signals(&self) -> usize {
        self.buckets.values().map(|b| b.sample_size).sum()
    }
}

/// Calibration aggregator
///
/// Performs a full recomputation from aggregate counters; callers run it
/// periodically, not continuously.
pub struct CalibrationAggregator;

impl CalibrationAggregator {
    /// Build a complete calibration state from per-bucket counters
    pub fn aggregate(counters: &HashMap<BucketKey, BucketCounters>) -> CalibrationState {
        let mut buckets = HashMap::with_capacity(counters.len());
        let mut total_pass = 0usize;
        let mut total_fail = 0usize;
        let mut total_expired = 0usize;
        let mut weighted_prob = 0.0f64;

        for (key, bucket_counters) in counters {
            total_pass += bucket_counters.pass;
            total_fail += bucket_counters.fail;
            total_expired += bucket_counters.expired;
            weighted_prob +=
                bucket_counters.avg_probability * bucket_counters.sample_size() as f64;
            buckets.insert(*key, CalibrationBucket::from_counters(*key, bucket_counters));
        }

        let total_signals = total_pass + total_fail + total_expired;
        let pass_rate = if total_signals > 0 {
            Some(total_pass as f64 / total_signals as f64)
        } else {
            None
        };
        let global = GlobalStats {
            total_signals,
            total_pass,
            total_fail,
            total_expired,
            pass_rate,
            avg_probability: if total_signals > 0 {
                weighted_prob / total_signals as f64
            } else {
                0.0
            },
            shrink: shrink_for(pass_rate.unwrap_or(0.0), total_signals),
        };

        CalibrationState {
            version: 0,
            computed_at: Utc::now().timestamp_millis(),
            buckets,
            global,
        }
    }
}

/// Published calibration snapshot holder
///
/// One aggregator run computes a state, `publish` stamps its version and
/// swaps the whole `Arc` under a write lock; any number of readers take the
/// most recent complete snapshot through `current`. A partially built state
/// is never observable.
pub struct CalibrationStore {
    current: RwLock<Option<Arc<CalibrationState>>>,
    next_version: AtomicU64,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            next_version: AtomicU64::new(1),
        }
    }

    /// Publish a freshly aggregated state, replacing the prior snapshot
    pub fn publish(&self, mut state: CalibrationState) -> Arc<CalibrationState> {
        state.version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(state);
        if let Ok(mut slot) = self.current.write() {
            *slot = Some(Arc::clone(&state));
        }
        info!(
            version = state.version,
            buckets = state.buckets.len(),
            total_signals = state.global.total_signals,
            "published calibration snapshot"
        );
        state
    }

    /// Most recently published snapshot, if any
    pub fn current(&self) -> Option<Arc<CalibrationState>> {
        self.current.read().ok().and_then(|slot| slot.clone())
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Brier score over a sample set
///
/// Mean squared error between issued probabilities and realized binary
/// outcomes. Diagnostic only; it never feeds the shrink computation.
/// Defined as 1.0 (the worst possible value) when the sample set is empty
/// or the two sequences differ in length.
pub fn brier_score(predictions: &[f64], outcomes: &[bool]) -> f64 {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return 1.0;
    }
    let sum: f64 = predictions
        .iter()
        .zip(outcomes.iter())
        .map(|(p, y)| {
            let y = if *y { 1.0 } else { 0.0 };
            (p - y).powi(2)
        })
        .sum();
    sum / predictions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttentionBucket, Horizon, Regime};

    fn key(horizon: Horizon) -> BucketKey {
        BucketKey {
            horizon,
            regime: Regime::Approved,
            attention: AttentionBucket::High,
        }
    }

    fn counters(pass: usize, fail: usize, expired: usize, avg_p: f64) -> BucketCounters {
        BucketCounters {
            pass,
            fail,
            expired,
            avg_probability: avg_p,
        }
    }

    #[test]
    fn test_shrink_table() {
        assert_eq!(shrink_for(0.30, 50), 0.50);
        assert_eq!(shrink_for(0.35, 50), 0.70);
        assert_eq!(shrink_for(0.44, 50), 0.70);
        assert_eq!(shrink_for(0.45, 50), 0.85);
        assert_eq!(shrink_for(0.50, 50), 0.95);
        assert_eq!(shrink_for(0.55, 50), 1.00);
        assert_eq!(shrink_for(0.60, 50), 1.00);
        assert_eq!(shrink_for(0.99, 50), 1.00);
    }

    #[test]
    fn test_insufficient_evidence_overrides_pass_rate() {
        // 3 passes / 2 fails is a 0.60 pass rate but only 5 samples.
        let bucket = CalibrationBucket::from_counters(key(Horizon::Min30), &counters(3, 2, 0, 0.6));
        assert_eq!(bucket.sample_size, 5);
        assert_eq!(bucket.pass_rate, 0.6);
        assert_eq!(bucket.shrink, 0.90);
    }

    #[test]
    fn test_shrink_is_monotone_and_bounded() {
        let mut last = 0.0;
        for i in 0..=100 {
            let rate = i as f64 / 100.0;
            let s = shrink_for(rate, 50);
            assert!(s >= last, "shrink not monotone at rate {}", rate);
            assert!((0.0..=1.0).contains(&s));
            last = s;
        }
    }

    #[test]
    fn test_expired_counts_against_pass_rate() {
        let bucket =
            CalibrationBucket::from_counters(key(Horizon::Min30), &counters(10, 0, 10, 0.6));
        assert_eq!(bucket.sample_size, 20);
        assert_eq!(bucket.pass_rate, 0.5);
        assert_eq!(bucket.shrink, 0.95);
    }

    #[test]
    fn test_aggregate_global_invariants() {
        let mut input = HashMap::new();
        input.insert(key(Horizon::Min30), counters(30, 15, 5, 0.62));
        input.insert(key(Horizon::Hour2), counters(10, 30, 10, 0.58));

        let state = CalibrationAggregator::aggregate(&input);
        assert_eq!(state.global.total_signals, 100);
        assert_eq!(state.total_signals(), state.global.total_signals);
        assert_eq!(state.global.total_pass, 40);
        assert_eq!(state.global.pass_rate, Some(0.40));
        // Global mirrors the bucket computation: 0.40 pass rate -> 0.70.
        assert_eq!(state.global.shrink, 0.70);

        let strong = state.bucket(&key(Horizon::Min30)).unwrap();
        assert_eq!(strong.pass_rate, 0.60);
        assert_eq!(strong.shrink, 1.00);

        let weak = state.bucket(&key(Horizon::Hour2)).unwrap();
        assert_eq!(weak.pass_rate, 0.20);
        assert_eq!(weak.shrink, 0.50);
    }

    #[test]
    fn test_aggregate_empty_is_no_data() {
        let state = CalibrationAggregator::aggregate(&HashMap::new());
        assert_eq!(state.global.total_signals, 0);
        assert_eq!(state.global.pass_rate, None);
        assert_eq!(state.global.shrink, INSUFFICIENT_EVIDENCE_SHRINK);
    }

    #[test]
    fn test_every_bucket_shrink_in_bounds() {
        let mut input = HashMap::new();
        for (i, horizon) in [Horizon::Min30, Horizon::Hour2, Horizon::Day, Horizon::Week]
            .iter()
            .enumerate()
        {
            input.insert(key(*horizon), counters(i * 7, 20 - i * 3, i, 0.55));
        }
        let state = CalibrationAggregator::aggregate(&input);
        for bucket in state.buckets.values() {
            assert!((0.0..=1.0).contains(&bucket.shrink));
            if bucket.sample_size < MIN_BUCKET_SAMPLES {
                assert_eq!(bucket.shrink, 0.90);
            }
        }
    }

    #[test]
    fn test_store_publishes_versioned_snapshots() {
        let store = CalibrationStore::new();
        assert!(store.current().is_none());

        let first = store.publish(CalibrationAggregator::aggregate(&HashMap::new()));
        assert_eq!(first.version, 1);
        assert_eq!(store.current().unwrap().version, 1);

        let mut input = HashMap::new();
        input.insert(key(Horizon::Min30), counters(12, 8, 0, 0.6));
        let second = store.publish(CalibrationAggregator::aggregate(&input));
        assert_eq!(second.version, 2);

        // Readers see the whole replacement, never a partial state.
        let current = store.current().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.global.total_signals, 20);
    }

    #[test]
    fn test_brier_score() {
        // Perfectly confident and right.
        assert_eq!(brier_score(&[1.0, 0.0], &[true, false]), 0.0);
        // Perfectly confident and wrong.
        assert_eq!(brier_score(&[1.0], &[false]), 1.0);
        // Uninformative coin flips.
        let score = brier_score(&[0.5, 0.5], &[true, false]);
        assert!((score - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_brier_score_degenerate_inputs() {
        assert_eq!(brier_score(&[], &[]), 1.0);
        assert_eq!(brier_score(&[0.5, 0.7], &[true]), 1.0);
    }
}
