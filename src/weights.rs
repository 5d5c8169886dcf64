// =============================================================================
// Weight Learner — per-indicator accuracy store and dynamic ensemble weights
// =============================================================================
//
// Every resolved trade reports which indicators voted and whether they were
// right. Accumulated accuracy then bends the ensemble weights:
//
//   - ≥50 samples and <40% accuracy  => weight zeroed (an anti-signal)
//   - ≥30 samples and <45% accuracy  => weight cut by 60%
//   - ≥30 samples and >55% accuracy  => weight boosted by 30%
//   - ≤20 samples                    => base weight unchanged
//   - result clamped to [0, 2.5 × base]
//
// The store is advisory: if the file is corrupt or unreadable the engine
// falls back to base weights and keeps trading. Saves are atomic
// (tmp + rename). Dynamic weights are cached in memory for 30 s because the
// signal engine asks for them many times per tick.
//
// Records with an "unknown" outcome never reach this store — the caller's
// outcome parameter is the two-valued `Direction`.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::indicators::IndicatorKind;
use crate::types::Direction;

/// In-memory TTL for computed dynamic weights.
const WEIGHTS_CACHE_TTL: Duration = Duration::from_secs(30);

/// Minimum samples before any adjustment applies.
const MIN_SAMPLES: u64 = 20;
/// Samples needed for the reduce/boost rules.
const ADJUST_SAMPLES: u64 = 30;
/// Samples needed to disable an anti-signal outright.
const DISABLE_SAMPLES: u64 = 50;

const DISABLE_BELOW: f64 = 0.40;
const REDUCE_BELOW: f64 = 0.45;
const BOOST_ABOVE: f64 = 0.55;
const REDUCE_FACTOR: f64 = 0.40;
const BOOST_FACTOR: f64 = 1.30;
const MAX_WEIGHT_MULT: f64 = 2.5;

/// Lifetime tally for one indicator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccuracyEntry {
    pub total_votes: u64,
    pub correct_votes: u64,
    pub accuracy: f64,
}

type AccuracyStore = BTreeMap<IndicatorKind, AccuracyEntry>;

pub struct WeightLearner {
    path: PathBuf,
    cache: RwLock<Option<(BTreeMap<IndicatorKind, f64>, Instant)>>,
}

impl WeightLearner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record the votes of one resolved trade against the actual outcome.
    ///
    /// Only callable with a definite up/down outcome by construction.
    pub fn record_indicator_votes(
        &self,
        outcome: Direction,
        votes: &BTreeMap<IndicatorKind, Direction>,
    ) {
        if votes.is_empty() {
            return;
        }

        let mut store = self.load_store();
        for (kind, voted) in votes {
            let entry = store.entry(*kind).or_default();
            entry.total_votes += 1;
            if *voted == outcome {
                entry.correct_votes += 1;
            }
            entry.accuracy = if entry.total_votes > 0 {
                entry.correct_votes as f64 / entry.total_votes as f64
            } else {
                0.0
            };
        }

        if let Err(e) = save_store(&self.path, &store) {
            warn!(error = %e, "failed to save indicator accuracy store");
        }
        // Fresh data invalidates the computed weights.
        *self.cache.write() = None;
        debug!(outcome = %outcome, indicators = votes.len(), "indicator votes recorded");
    }

    // -------------------------------------------------------------------------
    // Dynamic weights
    // -------------------------------------------------------------------------

    /// Base weights bent by historical accuracy. Pure in the store and the
    /// base map; cached for 30 s.
    pub fn dynamic_weights(
        &self,
        base: &BTreeMap<IndicatorKind, f64>,
    ) -> BTreeMap<IndicatorKind, f64> {
        if let Some((cached, at)) = &*self.cache.read() {
            if at.elapsed() < WEIGHTS_CACHE_TTL {
                return cached.clone();
            }
        }

        let store = self.load_store();
        let adjusted = compute_dynamic_weights(base, &store);

        *self.cache.write() = Some((adjusted.clone(), Instant::now()));
        adjusted
    }

    // -------------------------------------------------------------------------
    // Store I/O
    // -------------------------------------------------------------------------

    fn load_store(&self) -> AccuracyStore {
        load_store(&self.path).unwrap_or_else(|e| {
            // Advisory data: never refuse to trade over a bad file.
            warn!(error = %e, path = %self.path.display(), "accuracy store unreadable, using empty");
            AccuracyStore::new()
        })
    }
}

/// The adjustment rules, exposed as a pure function.
fn compute_dynamic_weights(
    base: &BTreeMap<IndicatorKind, f64>,
    store: &AccuracyStore,
) -> BTreeMap<IndicatorKind, f64> {
    let mut adjusted = BTreeMap::new();
    for (kind, &base_w) in base {
        let Some(entry) = store.get(kind) else {
            adjusted.insert(*kind, base_w);
            continue;
        };
        if entry.total_votes <= MIN_SAMPLES {
            adjusted.insert(*kind, base_w);
            continue;
        }

        let mut new_w = base_w;
        if entry.total_votes >= DISABLE_SAMPLES && entry.accuracy < DISABLE_BELOW {
            new_w = 0.0;
            info!(
                indicator = %kind,
                accuracy_pct = entry.accuracy * 100.0,
                samples = entry.total_votes,
                "indicator disabled as anti-signal"
            );
        } else if entry.total_votes >= ADJUST_SAMPLES && entry.accuracy < REDUCE_BELOW {
            new_w = base_w * REDUCE_FACTOR;
        } else if entry.total_votes >= ADJUST_SAMPLES && entry.accuracy > BOOST_ABOVE {
            new_w = base_w * BOOST_FACTOR;
        }

        adjusted.insert(*kind, new_w.clamp(0.0, base_w * MAX_WEIGHT_MULT));
    }
    adjusted
}

fn load_store(path: &Path) -> Result<AccuracyStore> {
    if !path.exists() {
        return Ok(AccuracyStore::new());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let store: AccuracyStore =
        serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
    Ok(store)
}

fn save_store(path: &Path, store: &AccuracyStore) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename onto {}", path.display()))?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn base_weights() -> BTreeMap<IndicatorKind, f64> {
        let mut m = BTreeMap::new();
        m.insert(IndicatorKind::Rsi, 1.2);
        m.insert(IndicatorKind::Macd, 1.5);
        m
    }

    fn entry(total: u64, correct: u64) -> AccuracyEntry {
        AccuracyEntry {
            total_votes: total,
            correct_votes: correct,
            accuracy: correct as f64 / total as f64,
        }
    }

    #[test]
    fn no_history_returns_base() {
        let adjusted = compute_dynamic_weights(&base_weights(), &AccuracyStore::new());
        assert_eq!(adjusted[&IndicatorKind::Rsi], 1.2);
        assert_eq!(adjusted[&IndicatorKind::Macd], 1.5);
    }

    #[test]
    fn few_samples_keep_base() {
        let mut store = AccuracyStore::new();
        store.insert(IndicatorKind::Rsi, entry(20, 2)); // terrible but thin
        let adjusted = compute_dynamic_weights(&base_weights(), &store);
        assert_eq!(adjusted[&IndicatorKind::Rsi], 1.2);
    }

    #[test]
    fn poor_accuracy_reduces_weight() {
        let mut store = AccuracyStore::new();
        store.insert(IndicatorKind::Rsi, entry(40, 16)); // 40% over 40 samples
        let adjusted = compute_dynamic_weights(&base_weights(), &store);
        assert!((adjusted[&IndicatorKind::Rsi] - 1.2 * 0.40).abs() < 1e-9);
    }

    #[test]
    fn anti_signal_is_zeroed() {
        let mut store = AccuracyStore::new();
        store.insert(IndicatorKind::Rsi, entry(60, 20)); // 33% over 60 samples
        let adjusted = compute_dynamic_weights(&base_weights(), &store);
        assert_eq!(adjusted[&IndicatorKind::Rsi], 0.0);
    }

    #[test]
    fn strong_accuracy_boosts_weight() {
        let mut store = AccuracyStore::new();
        store.insert(IndicatorKind::Macd, entry(50, 30)); // 60%
        let adjusted = compute_dynamic_weights(&base_weights(), &store);
        assert!((adjusted[&IndicatorKind::Macd] - 1.5 * 1.30).abs() < 1e-9);
    }

    #[test]
    fn adjustment_is_clamped() {
        let mut store = AccuracyStore::new();
        store.insert(IndicatorKind::Macd, entry(50, 30));
        let mut base = BTreeMap::new();
        base.insert(IndicatorKind::Macd, 1.0);
        let adjusted = compute_dynamic_weights(&base, &store);
        assert!(adjusted[&IndicatorKind::Macd] <= 1.0 * MAX_WEIGHT_MULT);
    }

    #[test]
    fn record_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let learner = WeightLearner::new(dir.path().join("accuracy.json"));

        let mut votes = BTreeMap::new();
        votes.insert(IndicatorKind::Rsi, Direction::Up);
        votes.insert(IndicatorKind::Macd, Direction::Down);

        learner.record_indicator_votes(Direction::Up, &votes);
        learner.record_indicator_votes(Direction::Up, &votes);

        let store = load_store(&dir.path().join("accuracy.json")).unwrap();
        let rsi = &store[&IndicatorKind::Rsi];
        assert_eq!(rsi.total_votes, 2);
        assert_eq!(rsi.correct_votes, 2);
        assert!((rsi.accuracy - 1.0).abs() < 1e-9);
        let macd = &store[&IndicatorKind::Macd];
        assert_eq!(macd.total_votes, 2);
        assert_eq!(macd.correct_votes, 0);
    }

    #[test]
    fn corrupt_store_falls_back_to_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accuracy.json");
        std::fs::write(&path, "{ not json ]").unwrap();

        let learner = WeightLearner::new(&path);
        let adjusted = learner.dynamic_weights(&base_weights());
        assert_eq!(adjusted[&IndicatorKind::Rsi], 1.2);
    }

    #[test]
    fn dynamic_weights_is_pure_in_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let learner = WeightLearner::new(dir.path().join("accuracy.json"));
        let a = learner.dynamic_weights(&base_weights());
        let b = learner.dynamic_weights(&base_weights());
        assert_eq!(a, b);
    }
}
