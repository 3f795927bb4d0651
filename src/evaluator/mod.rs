//! Outcome Evaluator - Replays price history to score issued signals
//!
//! Walks forward through the candles covering an opportunity's horizon and
//! classifies it as PASS (target reached first), FAIL (stop reached first),
//! EXPIRED (neither reached) or NO_DATA (inputs missing or malformed).
//!
//! Evaluation is long-only: targets sit above entry and stops below it
//! regardless of the signal's stated direction. This is a documented
//! simplifying assumption of the scoring pipeline, not a general
//! bidirectional evaluator.

use serde::{Deserialize, Serialize};

use crate::types::{Boundary, Candle, EvaluationResult, Opportunity, Outcome};

/// How a candle that reaches target and stop at the same timestamp resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Identical hit timestamps resolve to PASS
    TargetWins,
    /// Identical hit timestamps resolve to FAIL
    StopWins,
}

impl Default for TieBreak {
    fn default() -> Self {
        TieBreak::TargetWins
    }
}

/// Evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Target distance in ATR units when the opportunity carries none
    pub default_target_atr: f64,
    /// Stop distance in ATR units when the opportunity carries none
    pub default_stop_atr: f64,
    /// Entry candle lookup tolerance around issue time, in seconds
    pub entry_tolerance_secs: i64,
    /// Tie-break rule for same-candle target and stop hits
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            default_target_atr: 2.0,
            default_stop_atr: 1.0,
            entry_tolerance_secs: 120,
            tie_break: TieBreak::TargetWins,
        }
    }
}

/// Outcome evaluator
pub struct OutcomeEvaluator {
    config: EvaluatorConfig,
}

impl OutcomeEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Locate the entry candle for an opportunity using the configured
    /// tolerance window
    pub fn entry_candle<'a>(
        &self,
        candles: &'a [Candle],
        opportunity: &Opportunity,
    ) -> Option<&'a Candle> {
        find_entry_candle(
            candles,
            opportunity.issued_at,
            self.config.entry_tolerance_secs,
        )
    }

    /// Evaluate one opportunity against its entry candle and forward window
    ///
    /// Pure over its inputs: identical inputs produce an identical result,
    /// which makes re-runs safe. `forward` must be in ascending time order.
    pub fn evaluate(
        &self,
        opportunity: &Opportunity,
        entry: Option<&Candle>,
        forward: &[Candle],
        atr: Option<f64>,
    ) -> EvaluationResult {
        if let Err(reason) = opportunity.validate() {
            return self.no_data(opportunity, None, format!("invalid opportunity: {}", reason));
        }

        let entry = match entry {
            Some(candle) if candle.is_valid() => candle,
            Some(_) => return self.no_data(opportunity, atr, "malformed entry candle".to_string()),
            None => {
                return self.no_data(
                    opportunity,
                    atr,
                    "no entry candle near issue time".to_string(),
                )
            }
        };

        let atr = match atr {
            Some(a) if a.is_finite() && a > 0.0 => a,
            _ => {
                return self.no_data(opportunity, None, "missing or non-positive ATR".to_string())
            }
        };

        let forward: Vec<&Candle> = forward.iter().filter(|c| c.is_valid()).collect();
        if forward.is_empty() {
            return self.no_data(opportunity, Some(atr), "no forward candles".to_string());
        }

        let entry_price = entry.close;
        let target_mult = opportunity
            .target_atr_mult
            .unwrap_or(self.config.default_target_atr);
        let stop_mult = opportunity
            .stop_atr_mult
            .unwrap_or(self.config.default_stop_atr);
        let target_price = entry_price + target_mult * atr;
        let stop_price = entry_price - stop_mult * atr;

        let mut mfe = 0.0f64;
        let mut mae = 0.0f64;
        let mut target_hit_ts: Option<i64> = None;
        let mut stop_hit_ts: Option<i64> = None;

        for candle in &forward {
            let favorable = candle.high - entry_price;
            if favorable > mfe {
                mfe = favorable;
            }
            let adverse = entry_price - candle.low;
            if adverse > mae {
                mae = adverse;
            }
            if target_hit_ts.is_none() && candle.high >= target_price {
                target_hit_ts = Some(candle.ts);
            }
            if stop_hit_ts.is_none() && candle.low <= stop_price {
                stop_hit_ts = Some(candle.ts);
            }
        }

        let (outcome, first_hit, resolved_at) = match (target_hit_ts, stop_hit_ts) {
            (Some(t), Some(s)) => {
                if t < s {
                    (Outcome::Pass, Some(Boundary::Target), t)
                } else if s < t {
                    (Outcome::Fail, Some(Boundary::Stop), s)
                } else {
                    match self.config.tie_break {
                        TieBreak::TargetWins => (Outcome::Pass, Some(Boundary::Target), t),
                        TieBreak::StopWins => (Outcome::Fail, Some(Boundary::Stop), s),
                    }
                }
            }
            (Some(t), None) => (Outcome::Pass, Some(Boundary::Target), t),
            (None, Some(s)) => (Outcome::Fail, Some(Boundary::Stop), s),
            // Horizon exhausted without touching either boundary; counted
            // as a failure downstream.
            (None, None) => (
                Outcome::Expired,
                None,
                forward.last().map(|c| c.ts).unwrap_or(entry.ts),
            ),
        };

        EvaluationResult {
            opportunity_id: opportunity.id.clone(),
            symbol: opportunity.symbol.clone(),
            horizon: opportunity.horizon,
            regime: opportunity.regime,
            attention: opportunity.attention,
            issued_at: opportunity.issued_at,
            raw_probability: opportunity.raw_probability,
            outcome,
            entry_price: Some(entry_price),
            target_price: Some(target_price),
            stop_price: Some(stop_price),
            atr: Some(atr),
            mfe: Some(mfe),
            mae: Some(mae),
            mfe_atr: Some(mfe / atr),
            mae_atr: Some(mae / atr),
            first_hit,
            resolved_at: Some(resolved_at),
            time_to_resolution_secs: Some((resolved_at - opportunity.issued_at) / 1000),
            reason: None,
        }
    }

    fn no_data(
        &self,
        opportunity: &Opportunity,
        atr: Option<f64>,
        reason: String,
    ) -> EvaluationResult {
        EvaluationResult {
            opportunity_id: opportunity.id.clone(),
            symbol: opportunity.symbol.clone(),
            horizon: opportunity.horizon,
            regime: opportunity.regime,
            attention: opportunity.attention,
            issued_at: opportunity.issued_at,
            raw_probability: opportunity.raw_probability,
            outcome: Outcome::NoData,
            entry_price: None,
            target_price: None,
            stop_price: None,
            atr: atr.filter(|a| a.is_finite() && *a > 0.0),
            mfe: None,
            mae: None,
            mfe_atr: None,
            mae_atr: None,
            first_hit: None,
            resolved_at: None,
            time_to_resolution_secs: None,
            reason: Some(reason),
        }
    }
}

impl Default for OutcomeEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorConfig::default())
    }
}

/// Find the entry candle for an issue timestamp
///
/// Nearest candle within `tolerance_secs` of `issued_at`; an equal-distance
/// tie prefers the candle at or after issue time. Absence is a valid,
/// expected result (thin symbols, halted sessions).
pub fn find_entry_candle(candles: &[Candle], issued_at: i64, tolerance_secs: i64) -> Option<&Candle> {
    let tolerance_ms = tolerance_secs * 1000;
    candles
        .iter()
        .filter(|c| c.is_valid() && (c.ts - issued_at).abs() <= tolerance_ms)
        .min_by_key(|c| {
            let distance = (c.ts - issued_at).abs();
            // Tie prefers at-or-after: before-issue candles sort one behind.
            (distance, (c.ts < issued_at) as i64)
        })
}

/// Slice the forward window for an entry timestamp and horizon
///
/// Candles strictly after `entry_ts` and within the horizon's duration.
/// `candles` must be in ascending time order.
pub fn forward_window(candles: &[Candle], entry_ts: i64, horizon: crate::types::Horizon) -> &[Candle] {
    let end_ts = entry_ts + horizon.duration_ms();
    let start = candles.partition_point(|c| c.ts <= entry_ts);
    let end = candles.partition_point(|c| c.ts <= end_ts);
    &candles[start..end]
}
