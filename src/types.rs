//! Core types used throughout CaliBot
//!
//! Defines the shared data structures for opportunities, candles,
//! evaluation outcomes and calibration bucket keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Evaluation horizon classes
///
/// Fixed forward-evaluation windows: intraday (30m / 2h), one trading day
/// (390 minutes) and one trading week (5 x 390 minutes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    Min30,
    Hour2,
    Day,
    Week,
}

impl Default for Horizon {
    fn default() -> Self {
        Horizon::Min30
    }
}

impl Horizon {
    /// Get duration in minutes
    pub fn duration_minutes(&self) -> i64 {
        match self {
            Horizon::Min30 => 30,
            Horizon::Hour2 => 120,
            Horizon::Day => 390,
            Horizon::Week => 1950,
        }
    }

    /// Get duration in seconds
    pub fn duration_secs(&self) -> i64 {
        self.duration_minutes() * 60
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.duration_secs() * 1000
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "30m" | "30min" => Some(Horizon::Min30),
            "2h" | "2hour" => Some(Horizon::Hour2),
            "1d" | "day" => Some(Horizon::Day),
            "1w" | "week" => Some(Horizon::Week),
            _ => None,
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Horizon::Min30 => write!(f, "30m"),
            Horizon::Hour2 => write!(f, "2h"),
            Horizon::Day => write!(f, "1d"),
            Horizon::Week => write!(f, "1w"),
        }
    }
}

/// Coarse market-condition label
///
/// Published by the upstream regime classifier. Execution is only permitted
/// while the label reads `Approved`; unknown labels never coerce to a
/// variant and are reported verbatim by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Approved,
    Caution,
    Unsafe,
}

impl Regime {
    /// Parse from an externally-published label
    pub fn from_label(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "approved" => Some(Regime::Approved),
            "caution" => Some(Regime::Caution),
            "unsafe" => Some(Regime::Unsafe),
            _ => None,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Approved => write!(f, "approved"),
            Regime::Caution => write!(f, "caution"),
            Regime::Unsafe => write!(f, "unsafe"),
        }
    }
}

/// Attention/stability bucket assigned at signal issue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttentionBucket {
    High,
    Medium,
    Low,
}

impl AttentionBucket {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "high" => Some(AttentionBucket::High),
            "medium" => Some(AttentionBucket::Medium),
            "low" => Some(AttentionBucket::Low),
            _ => None,
        }
    }
}

impl fmt::Display for AttentionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttentionBucket::High => write!(f, "high"),
            AttentionBucket::Medium => write!(f, "medium"),
            AttentionBucket::Low => write!(f, "low"),
        }
    }
}

/// An issued trading signal pending outcome evaluation
///
/// Immutable once issued; owned by the upstream signal generator and
/// read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Unique opportunity ID (assigned upstream)
    pub id: String,
    /// Ticker symbol
    pub symbol: String,
    /// Evaluation horizon
    pub horizon: Horizon,
    /// Issue timestamp (Unix milliseconds)
    pub issued_at: i64,
    /// Raw probability from the signal engine (0.0 - 1.0)
    pub raw_probability: f64,
    /// Market regime label at issue time
    pub regime: Regime,
    /// Attention/stability bucket at issue time
    pub attention: AttentionBucket,
    /// Target distance in ATR units (falls back to the evaluator default)
    #[serde(default)]
    pub target_atr_mult: Option<f64>,
    /// Stop distance in ATR units (falls back to the evaluator default)
    #[serde(default)]
    pub stop_atr_mult: Option<f64>,
}

impl Opportunity {
    /// Validate an upstream record before evaluation
    ///
    /// Malformed records are rejected rather than coerced; the evaluator
    /// maps a rejection to an explicit NO_DATA result.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty opportunity id".to_string());
        }
        if self.symbol.is_empty() {
            return Err("empty symbol".to_string());
        }
        if self.issued_at <= 0 {
            return Err(format!("non-positive issue timestamp {}", self.issued_at));
        }
        if !self.raw_probability.is_finite()
            || self.raw_probability < 0.0
            || self.raw_probability > 1.0
        {
            return Err(format!(
                "raw probability {} outside [0,1]",
                self.raw_probability
            ));
        }
        for (name, mult) in [
            ("target", self.target_atr_mult),
            ("stop", self.stop_atr_mult),
        ] {
            if let Some(m) = mult {
                if !m.is_finite() || m <= 0.0 {
                    return Err(format!("non-positive {} multiplier {}", name, m));
                }
            }
        }
        Ok(())
    }

    /// Bucket key for calibration lookup
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey {
            horizon: self.horizon,
            regime: self.regime,
            attention: self.attention,
        }
    }
}

/// Candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Open time (Unix milliseconds)
    pub ts: i64,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Volume in base currency
    pub volume: f64,
}

impl Candle {
    /// Check the bar is well-formed (finite fields, high >= low)
    pub fn is_valid(&self) -> bool {
        self.ts > 0
            && self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
            && self.high >= self.low
    }
}

/// Evaluation outcome category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail,
    Expired,
    NoData,
}

impl Outcome {
    /// Whether the outcome feeds the calibration counters
    ///
    /// NO_DATA rows are kept in history for audit but never counted.
    pub fn counts_for_calibration(&self) -> bool {
        !matches!(self, Outcome::NoData)
    }

    /// EXPIRED counts as a failure for calibration purposes
    pub fn is_calibration_failure(&self) -> bool {
        matches!(self, Outcome::Fail | Outcome::Expired)
    }

    /// Parse from the wire label
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PASS" => Some(Outcome::Pass),
            "FAIL" => Some(Outcome::Fail),
            "EXPIRED" => Some(Outcome::Expired),
            "NO_DATA" => Some(Outcome::NoData),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "PASS"),
            Outcome::Fail => write!(f, "FAIL"),
            Outcome::Expired => write!(f, "EXPIRED"),
            Outcome::NoData => write!(f, "NO_DATA"),
        }
    }
}

/// Which boundary resolved the trade first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    Target,
    Stop,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Target => write!(f, "TARGET"),
            Boundary::Stop => write!(f, "STOP"),
        }
    }
}

/// Structured calibration bucket key
///
/// Replaces string-concatenated keys so unexpected label values can never
/// collide into the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub horizon: Horizon,
    pub regime: Regime,
    pub attention: AttentionBucket,
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.horizon, self.regime, self.attention)
    }
}

/// Resolved evaluation of one opportunity
///
/// Created exactly once per opportunity by the evaluator, appended to the
/// durable history and never mutated afterwards. The result is a pure
/// function of its inputs (no clock reads), so re-evaluating the same
/// opportunity against the same candle window yields an identical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Opportunity this result belongs to
    pub opportunity_id: String,
    /// Ticker symbol
    pub symbol: String,
    /// Evaluation horizon
    pub horizon: Horizon,
    /// Regime at issue time
    pub regime: Regime,
    /// Attention bucket at issue time
    pub attention: AttentionBucket,
    /// Issue timestamp (Unix milliseconds)
    pub issued_at: i64,
    /// Raw probability issued with the signal
    pub raw_probability: f64,
    /// Outcome category
    pub outcome: Outcome,
    /// Entry price (close of the entry candle); None for NO_DATA
    pub entry_price: Option<f64>,
    /// Target price derived from entry + target_mult * ATR
    pub target_price: Option<f64>,
    /// Stop price derived from entry - stop_mult * ATR
    pub stop_price: Option<f64>,
    /// ATR applicable at issue time
    pub atr: Option<f64>,
    /// Maximum favorable excursion in price units
    pub mfe: Option<f64>,
    /// Maximum adverse excursion in price units
    pub mae: Option<f64>,
    /// Maximum favorable excursion in ATR units
    pub mfe_atr: Option<f64>,
    /// Maximum adverse excursion in ATR units
    pub mae_atr: Option<f64>,
    /// Boundary hit first, if any
    pub first_hit: Option<Boundary>,
    /// Resolution timestamp (Unix milliseconds); None when unresolved
    pub resolved_at: Option<i64>,
    /// Seconds from issue to resolution; None when unresolved
    pub time_to_resolution_secs: Option<i64>,
    /// Reason recorded for NO_DATA outcomes
    pub reason: Option<String>,
}

impl EvaluationResult {
    /// Bucket key for calibration aggregation
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey {
            horizon: self.horizon,
            regime: self.regime,
            attention: self.attention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizon_durations() {
        assert_eq!(Horizon::Min30.duration_minutes(), 30);
        assert_eq!(Horizon::Hour2.duration_minutes(), 120);
        assert_eq!(Horizon::Day.duration_minutes(), 390);
        assert_eq!(Horizon::Week.duration_minutes(), 1950);
        assert_eq!(Horizon::Hour2.duration_ms(), 120 * 60 * 1000);
    }

    #[test]
    fn test_horizon_round_trip() {
        for h in [Horizon::Min30, Horizon::Hour2, Horizon::Day, Horizon::Week] {
            assert_eq!(Horizon::from_str(&h.to_string()), Some(h));
        }
        assert_eq!(Horizon::from_str("5m"), None);
    }

    #[test]
    fn test_regime_labels() {
        assert_eq!(Regime::from_label("APPROVED"), Some(Regime::Approved));
        assert_eq!(Regime::from_label("caution"), Some(Regime::Caution));
        assert_eq!(Regime::from_label("weird"), None);
    }

    #[test]
    fn test_opportunity_validation() {
        let opp = Opportunity {
            id: "op-1".to_string(),
            symbol: "SPY".to_string(),
            horizon: Horizon::Hour2,
            issued_at: 1_700_000_000_000,
            raw_probability: 0.62,
            regime: Regime::Approved,
            attention: AttentionBucket::High,
            target_atr_mult: None,
            stop_atr_mult: None,
        };
        assert!(opp.validate().is_ok());

        let mut bad = opp.clone();
        bad.raw_probability = 1.2;
        assert!(bad.validate().is_err());

        let mut bad = opp.clone();
        bad.symbol = String::new();
        assert!(bad.validate().is_err());

        let mut bad = opp;
        bad.stop_atr_mult = Some(-1.0);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_candle_validity() {
        let candle = Candle {
            ts: 1_700_000_000_000,
            open: 500.0,
            high: 502.0,
            low: 499.0,
            close: 501.0,
            volume: 1000.0,
        };
        assert!(candle.is_valid());

        let mut inverted = candle.clone();
        inverted.high = 498.0;
        assert!(!inverted.is_valid());

        let mut nan = candle;
        nan.close = f64::NAN;
        assert!(!nan.is_valid());
    }

    #[test]
    fn test_outcome_calibration_rules() {
        assert!(Outcome::Pass.counts_for_calibration());
        assert!(Outcome::Expired.counts_for_calibration());
        assert!(!Outcome::NoData.counts_for_calibration());
        assert!(Outcome::Expired.is_calibration_failure());
        assert!(Outcome::Fail.is_calibration_failure());
        assert!(!Outcome::Pass.is_calibration_failure());
    }

    #[test]
    fn test_bucket_key_display() {
        let key = BucketKey {
            horizon: Horizon::Hour2,
            regime: Regime::Approved,
            attention: AttentionBucket::Low,
        };
        assert_eq!(key.to_string(), "2h/approved/low");
    }
}
