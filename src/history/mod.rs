//! Evaluation History - Durable append-only log of evaluation results
//!
//! One CSV row per evaluated opportunity, at most one row per opportunity
//! id: re-running the evaluator over an already-resolved opportunity is a
//! no-op, not a duplicate. The history is the unit of truth the calibration
//! aggregator consumes; NO_DATA rows are retained for audit but excluded
//! from the derived counters.

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::info;

use crate::calibration::BucketCounters;
use crate::types::{
    AttentionBucket, Boundary, BucketKey, EvaluationResult, Horizon, Outcome, Regime,
};

/// Flat evaluation record for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRow {
    pub opportunity_id: String,
    pub symbol: String,
    pub horizon: String,
    pub regime: String,
    pub attention: String,
    pub issued_at: i64,
    pub raw_probability: f64,
    pub outcome: String,
    pub entry_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub atr: Option<f64>,
    pub mfe: Option<f64>,
    pub mae: Option<f64>,
    pub mfe_atr: Option<f64>,
    pub mae_atr: Option<f64>,
    pub first_hit: Option<String>,
    pub resolved_at: Option<i64>,
    pub time_to_resolution_secs: Option<i64>,
    pub reason: Option<String>,
}

impl From<&EvaluationResult> for EvaluationRow {
    fn from(result: &EvaluationResult) -> Self {
        Self {
            opportunity_id: result.opportunity_id.clone(),
            symbol: result.symbol.clone(),
            horizon: result.horizon.to_string(),
            regime: result.regime.to_string(),
            attention: result.attention.to_string(),
            issued_at: result.issued_at,
            raw_probability: result.raw_probability,
            outcome: result.outcome.to_string(),
            entry_price: result.entry_price,
            target_price: result.target_price,
            stop_price: result.stop_price,
            atr: result.atr,
            mfe: result.mfe,
            mae: result.mae,
            mfe_atr: result.mfe_atr,
            mae_atr: result.mae_atr,
            first_hit: result.first_hit.map(|b| b.to_string()),
            resolved_at: result.resolved_at,
            time_to_resolution_secs: result.time_to_resolution_secs,
            reason: result.reason.clone(),
        }
    }
}

impl EvaluationRow {
    /// Convert back into the domain result, rejecting corrupt rows
    pub fn into_result(self) -> Result<EvaluationResult> {
        let horizon = Horizon::from_str(&self.horizon)
            .ok_or_else(|| anyhow!("unknown horizon {:?}", self.horizon))?;
        let regime = Regime::from_label(&self.regime)
            .ok_or_else(|| anyhow!("unknown regime {:?}", self.regime))?;
        let attention = AttentionBucket::from_str(&self.attention)
            .ok_or_else(|| anyhow!("unknown attention bucket {:?}", self.attention))?;
        let outcome = Outcome::from_str(&self.outcome)
            .ok_or_else(|| anyhow!("unknown outcome {:?}", self.outcome))?;
        let first_hit = match self.first_hit.as_deref() {
            None => None,
            Some("TARGET") => Some(Boundary::Target),
            Some("STOP") => Some(Boundary::Stop),
            Some(other) => return Err(anyhow!("unknown boundary {:?}", other)),
        };
        Ok(EvaluationResult {
            opportunity_id: self.opportunity_id,
            symbol: self.symbol,
            horizon,
            regime,
            attention,
            issued_at: self.issued_at,
            raw_probability: self.raw_probability,
            outcome,
            entry_price: self.entry_price,
            target_price: self.target_price,
            stop_price: self.stop_price,
            atr: self.atr,
            mfe: self.mfe,
            mae: self.mae,
            mfe_atr: self.mfe_atr,
            mae_atr: self.mae_atr,
            first_hit,
            resolved_at: self.resolved_at,
            time_to_resolution_secs: self.time_to_resolution_secs,
            reason: self.reason,
        })
    }
}

/// Append-only evaluation history backed by a CSV file
pub struct EvaluationHistory {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
    seen: RwLock<HashSet<String>>,
}

impl EvaluationHistory {
    /// Open (or create) the history under a data directory
    ///
    /// Existing row ids are reloaded so appends stay idempotent across
    /// restarts.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("Failed to create history directory")?;
        let path = data_dir.join("evaluations.csv");

        let mut seen = HashSet::new();
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        if file_has_data {
            let mut reader = ReaderBuilder::new()
                .has_headers(true)
                .from_path(&path)
                .context("Failed to open evaluation history for reload")?;
            for row in reader.deserialize::<EvaluationRow>() {
                let row = row.context("Failed to parse evaluation history row")?;
                seen.insert(row.opportunity_id);
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open evaluation history file")?;
        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        info!(path = %path.display(), known = seen.len(), "evaluation history opened");
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            seen: RwLock::new(seen),
        })
    }

    /// Append one result; returns false when the opportunity is already
    /// recorded (nothing is written)
    pub fn append(&self, result: &EvaluationResult) -> Result<bool> {
        {
            let seen = self
                .seen
                .read()
                .map_err(|e| anyhow!("history index poisoned: {}", e))?;
            if seen.contains(&result.opportunity_id) {
                return Ok(false);
            }
        }

        let mut seen = self
            .seen
            .write()
            .map_err(|e| anyhow!("history index poisoned: {}", e))?;
        // Re-check under the write lock; a racing append may have won.
        if !seen.insert(result.opportunity_id.clone()) {
            return Ok(false);
        }

        let row = EvaluationRow::from(result);
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow!("history writer poisoned: {}", e))?;
        writer
            .serialize(&row)
            .context("Failed to write evaluation row")?;
        writer.flush().context("Failed to flush evaluation history")?;
        Ok(true)
    }

    /// Load every recorded result
    pub fn load(&self) -> Result<Vec<EvaluationResult>> {
        let file_has_data = self.path.exists()
            && fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false);
        if !file_has_data {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .context("Failed to open evaluation history")?;
        let mut results = Vec::new();
        for row in reader.deserialize::<EvaluationRow>() {
            let row = row.context("Failed to parse evaluation history row")?;
            results.push(row.into_result()?);
        }
        Ok(results)
    }

    /// Number of recorded opportunities
    pub fn len(&self) -> usize {
        self.seen.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Derive per-bucket aggregate counters for the calibration aggregator
    ///
    /// Only PASS / FAIL / EXPIRED rows count; NO_DATA stays audit-only.
    pub fn bucket_counters(&self) -> Result<HashMap<BucketKey, BucketCounters>> {
        let mut sums: HashMap<BucketKey, (BucketCounters, f64)> = HashMap::new();
        for result in self.load()? {
            if !result.outcome.counts_for_calibration() {
                continue;
            }
            let entry = sums.entry(result.bucket_key()).or_default();
            match result.outcome {
                Outcome::Pass => entry.0.pass += 1,
                Outcome::Fail => entry.0.fail += 1,
                Outcome::Expired => entry.0.expired += 1,
                Outcome::NoData => unreachable!(),
            }
            entry.1 += result.raw_probability;
        }

        Ok(sums
            .into_iter()
            .map(|(key, (mut counters, prob_sum))| {
                let n = counters.sample_size();
                counters.avg_probability = if n > 0 { prob_sum / n as f64 } else { 0.0 };
                (key, counters)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_data_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("calibot_{}_{}_{}", tag, std::process::id(), nanos))
    }

    fn make_result(id: &str, outcome: Outcome, raw_probability: f64) -> EvaluationResult {
        let resolved = !matches!(outcome, Outcome::NoData);
        EvaluationResult {
            opportunity_id: id.to_string(),
            symbol: "SPY".to_string(),
            horizon: Horizon::Hour2,
            regime: Regime::Approved,
            attention: AttentionBucket::High,
            issued_at: 1_700_000_000_000,
            raw_probability,
            outcome,
            entry_price: resolved.then_some(500.0),
            target_price: resolved.then_some(504.0),
            stop_price: resolved.then_some(498.0),
            atr: resolved.then_some(2.0),
            mfe: resolved.then_some(5.0),
            mae: resolved.then_some(1.0),
            mfe_atr: resolved.then_some(2.5),
            mae_atr: resolved.then_some(0.5),
            first_hit: match outcome {
                Outcome::Pass => Some(Boundary::Target),
                Outcome::Fail => Some(Boundary::Stop),
                _ => None,
            },
            resolved_at: resolved.then_some(1_700_000_120_000),
            time_to_resolution_secs: resolved.then_some(120),
            reason: (outcome == Outcome::NoData).then(|| "no entry candle".to_string()),
        }
    }

    #[test]
    fn test_append_and_load_round_trip() {
        let dir = temp_data_dir("round_trip");
        let history = EvaluationHistory::open(&dir).unwrap();

        let pass = make_result("op-1", Outcome::Pass, 0.65);
        let no_data = make_result("op-2", Outcome::NoData, 0.55);
        assert!(history.append(&pass).unwrap());
        assert!(history.append(&no_data).unwrap());

        let loaded = history.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], pass);
        assert_eq!(loaded[1], no_data);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_append_is_idempotent_per_opportunity() {
        let dir = temp_data_dir("idempotent");
        let history = EvaluationHistory::open(&dir).unwrap();

        let result = make_result("op-1", Outcome::Pass, 0.65);
        assert!(history.append(&result).unwrap());
        assert!(!history.append(&result).unwrap());
        assert_eq!(history.len(), 1);
        assert_eq!(history.load().unwrap().len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_reopen_preserves_seen_ids() {
        let dir = temp_data_dir("reopen");
        {
            let history = EvaluationHistory::open(&dir).unwrap();
            history.append(&make_result("op-1", Outcome::Fail, 0.6)).unwrap();
        }

        let reopened = EvaluationHistory::open(&dir).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(!reopened
            .append(&make_result("op-1", Outcome::Fail, 0.6))
            .unwrap());
        // New ids still append after the reload.
        assert!(reopened
            .append(&make_result("op-2", Outcome::Pass, 0.7))
            .unwrap());
        assert_eq!(reopened.load().unwrap().len(), 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bucket_counters_exclude_no_data() {
        let dir = temp_data_dir("counters");
        let history = EvaluationHistory::open(&dir).unwrap();

        history.append(&make_result("op-1", Outcome::Pass, 0.60)).unwrap();
        history.append(&make_result("op-2", Outcome::Fail, 0.70)).unwrap();
        history.append(&make_result("op-3", Outcome::Expired, 0.50)).unwrap();
        history.append(&make_result("op-4", Outcome::NoData, 0.90)).unwrap();

        let counters = history.bucket_counters().unwrap();
        assert_eq!(counters.len(), 1);
        let bucket = counters
            .get(&BucketKey {
                horizon: Horizon::Hour2,
                regime: Regime::Approved,
                attention: AttentionBucket::High,
            })
            .unwrap();
        assert_eq!(bucket.pass, 1);
        assert_eq!(bucket.fail, 1);
        assert_eq!(bucket.expired, 1);
        assert_eq!(bucket.sample_size(), 3);
        // Average over the three counted rows only.
        assert!((bucket.avg_probability - 0.60).abs() < 1e-12);

        fs::remove_dir_all(&dir).ok();
    }
}
