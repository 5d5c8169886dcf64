// =============================================================================
// Performance Tracker — durable trade log, resolution polling, feedback
// =============================================================================
//
// Owns `trades.jsonl`, the append-only record of every placed signal. Each
// control tick polls pending records whose market window has ended:
//
//   - market closed  => outcome from the winning token, PnL computed,
//                       indicator votes fed to the weight learner,
//                       `trade_resolved` published
//   - still open past the timeframe's timeout => outcome "unknown";
//     unknown outcomes NEVER reach the weight learner
//
// Resolution rewrites the whole file atomically (tmp + rename), deduped by
// trade id, never losing a pending line. Re-running resolution on an
// already-resolved record is a no-op: resolved records leave the pending
// map and are not revisited.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clob::{ClobClient, MarketInfo};
use crate::events::{EventBus, EventKind};
use crate::indicators::IndicatorKind;
use crate::regime::RegimeAdjustment;
use crate::signals::fees::pnl;
use crate::signals::Signal;
use crate::types::{Asset, Direction, Timeframe};
use crate::weights::WeightLearner;

/// Grace period after market end before the first resolution poll.
const RESOLUTION_BUFFER_S: i64 = 30;

/// The persisted form of a placed trade, enriched with signal provenance
/// and, eventually, the resolution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub timestamp: i64,
    pub asset: Asset,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub probability: f64,
    pub edge: f64,
    pub confidence: f64,
    pub token_id: String,
    pub market_id: String,
    pub question: String,

    // Market context at signal time.
    pub implied_up_price: f64,
    pub spot_price: f64,
    pub market_end_time: i64,

    // Signal provenance.
    #[serde(default)]
    pub indicator_votes: BTreeMap<IndicatorKind, Direction>,
    #[serde(default)]
    pub regime_label: String,
    #[serde(default = "default_fng")]
    pub regime_fng: i64,
    #[serde(default)]
    pub signal_rationale: String,

    // Execution metrics.
    #[serde(default)]
    pub size_usd: f64,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub shares: f64,
    #[serde(default)]
    pub ob_liquidity_usd: f64,
    #[serde(default)]
    pub ob_spread: f64,

    // Resolution (filled in later).
    #[serde(default)]
    pub resolved: bool,
    /// "up", "down", "unknown", or "" while pending.
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub won: bool,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub resolve_time: i64,

    #[serde(default)]
    pub dry_run: bool,
}

fn default_fng() -> i64 {
    -1
}

/// Execution context captured alongside the signal.
#[derive(Debug, Clone, Default)]
pub struct SignalContext {
    pub market_id: String,
    pub question: String,
    pub implied_up_price: f64,
    pub spot_price: f64,
    pub market_end_time: i64,
    pub size_usd: f64,
    pub entry_price: f64,
    pub ob_liquidity_usd: f64,
    pub ob_spread: f64,
    pub dry_run: bool,
}

pub struct PerformanceTracker {
    trades_path: PathBuf,
    pending: RwLock<HashMap<String, TradeRecord>>,
    learner: Arc<WeightLearner>,
    bus: EventBus,
    total_resolved: RwLock<u64>,
}

impl PerformanceTracker {
    /// Open the tracker and reload unresolved trades from disk so a restart
    /// never forgets a pending market.
    pub fn new(trades_path: impl Into<PathBuf>, learner: Arc<WeightLearner>, bus: EventBus) -> Self {
        let trades_path = trades_path.into();
        let pending = load_pending(&trades_path);
        if !pending.is_empty() {
            info!(count = pending.len(), "loaded pending trades to resolve");
        }
        Self {
            trades_path,
            pending: RwLock::new(pending),
            learner,
            bus,
            total_resolved: RwLock::new(0),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Persist a newly placed trade as a pending record.
    pub fn record_signal(&self, signal: &Signal, ctx: &SignalContext, regime: &RegimeAdjustment, now: i64) {
        let prefix = &ctx.market_id[..ctx.market_id.len().min(12)];
        let trade_id = format!("{prefix}_{now}");
        let rationale = signal_rationale(signal, ctx.implied_up_price, regime);
        let shares = if ctx.entry_price > 0.0 {
            ctx.size_usd / ctx.entry_price
        } else {
            0.0
        };

        let rec = TradeRecord {
            trade_id: trade_id.clone(),
            timestamp: now,
            asset: signal.asset,
            timeframe: signal.timeframe,
            direction: signal.direction,
            probability: signal.probability,
            edge: signal.edge,
            confidence: signal.confidence,
            token_id: signal.token_id.clone(),
            market_id: ctx.market_id.clone(),
            question: ctx.question.clone(),
            implied_up_price: ctx.implied_up_price,
            spot_price: ctx.spot_price,
            market_end_time: ctx.market_end_time,
            indicator_votes: signal.indicator_votes.clone(),
            regime_label: regime.label.to_string(),
            regime_fng: regime.fng_value as i64,
            signal_rationale: rationale.clone(),
            size_usd: ctx.size_usd,
            entry_price: ctx.entry_price,
            shares,
            ob_liquidity_usd: ctx.ob_liquidity_usd,
            ob_spread: ctx.ob_spread,
            resolved: false,
            outcome: String::new(),
            won: false,
            pnl: 0.0,
            resolve_time: 0,
            dry_run: ctx.dry_run,
        };

        if let Err(e) = append_record(&self.trades_path, &rec) {
            warn!(error = %e, "failed to append trade record");
        }
        self.pending.write().insert(trade_id.clone(), rec.clone());

        info!(
            trade_id = %trade_id,
            asset = %signal.asset,
            timeframe = %signal.timeframe,
            direction = %signal.direction,
            prob_pct = signal.probability * 100.0,
            edge_pct = signal.edge * 100.0,
            "signal tracked"
        );
        info!(rationale = %rationale, "trade rationale");

        self.bus.publish(
            EventKind::TradePlaced,
            serde_json::to_value(&rec).unwrap_or_default(),
        );
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Poll the markets API for every due pending record.
    pub async fn check_resolutions(&self, client: &ClobClient, now: i64) {
        let due: Vec<TradeRecord> = {
            let pending = self.pending.read();
            pending
                .values()
                .filter(|r| now >= r.market_end_time + RESOLUTION_BUFFER_S)
                .cloned()
                .collect()
        };
        if due.is_empty() {
            return;
        }

        let mut newly_resolved: Vec<TradeRecord> = Vec::new();
        for mut rec in due {
            let outcome = match client.get_market(&rec.market_id).await {
                Ok(market) => winner_from_market(&market),
                Err(e) => {
                    warn!(market = %rec.market_id, error = %e, "resolution fetch failed");
                    None
                }
            };

            if apply_resolution(&mut rec, outcome, now) {
                newly_resolved.push(rec);
            }
        }
        if newly_resolved.is_empty() {
            return;
        }

        for rec in &newly_resolved {
            self.finish_record(rec);
        }

        {
            let mut pending = self.pending.write();
            for rec in &newly_resolved {
                pending.remove(&rec.trade_id);
            }
        }

        let updates: HashMap<String, TradeRecord> = newly_resolved
            .into_iter()
            .map(|r| (r.trade_id.clone(), r))
            .collect();
        if let Err(e) = rewrite_with_updates(&self.trades_path, &updates) {
            warn!(error = %e, "failed to rewrite trade log");
        }
    }

    /// Logging, learner feedback, and event publication for one resolution.
    fn finish_record(&self, rec: &TradeRecord) {
        *self.total_resolved.write() += 1;

        if rec.outcome == "unknown" {
            warn!(
                trade_id = %rec.trade_id,
                market = %rec.market_id,
                "market never resolved, marked unknown"
            );
            return;
        }

        let result = if rec.won { "WIN" } else { "LOSS" };
        let stats = self.quick_stats();
        info!(
            trade_id = %rec.trade_id,
            asset = %rec.asset,
            timeframe = %rec.timeframe,
            result,
            predicted = %rec.direction,
            actual = %rec.outcome,
            pnl = rec.pnl,
            running_wins = stats.wins,
            running_losses = stats.losses,
            running_pnl = stats.pnl,
            "trade resolved"
        );

        // Outcome here is up/down by construction; unknown returned above.
        if let Some(outcome) = Direction::from_str_opt(&rec.outcome) {
            if !rec.indicator_votes.is_empty() {
                self.learner.record_indicator_votes(outcome, &rec.indicator_votes);
            }
        }

        self.bus.publish(
            EventKind::TradeResolved,
            serde_json::to_value(rec).unwrap_or_default(),
        );
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    pub fn quick_stats(&self) -> QuickStats {
        quick_stats_from_file(&self.trades_path)
    }
}

/// Aggregate win/loss stats over resolved trades.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuickStats {
    pub wins: u64,
    pub losses: u64,
    pub win_rate_pct: f64,
    pub pnl: f64,
}

// =============================================================================
// Pure resolution logic
// =============================================================================

/// Determine the winning direction of a closed market: a token flagged
/// `winner`, or failing that a token whose final price exceeds 0.9.
pub fn winner_from_market(market: &MarketInfo) -> Option<Direction> {
    if !market.closed {
        return None;
    }

    for t in &market.tokens {
        if t.winner == Some(true) {
            if let Some(dir) = Direction::from_str_opt(&t.outcome) {
                return Some(dir);
            }
        }
    }
    for t in &market.tokens {
        if t.price > 0.9 {
            if let Some(dir) = Direction::from_str_opt(&t.outcome) {
                return Some(dir);
            }
        }
    }
    None
}

/// Apply a fetched outcome (or a timeout) to a record. Returns true when
/// the record transitioned to resolved.
pub fn apply_resolution(rec: &mut TradeRecord, outcome: Option<Direction>, now: i64) -> bool {
    if rec.resolved {
        return false;
    }

    match outcome {
        Some(dir) => {
            rec.resolved = true;
            rec.outcome = dir.as_str().to_string();
            rec.won = rec.direction == dir;
            rec.resolve_time = now;
            if rec.entry_price > 0.0 && rec.size_usd > 0.0 {
                let shares = rec.size_usd / rec.entry_price;
                rec.pnl = (pnl(rec.won, shares, rec.size_usd, 0.0) * 100.0).round() / 100.0;
            }
            true
        }
        None => {
            let timeout = rec.timeframe.resolution_timeout_secs();
            if now > rec.market_end_time + timeout {
                rec.resolved = true;
                rec.outcome = "unknown".to_string();
                rec.resolve_time = now;
                true
            } else {
                false
            }
        }
    }
}

/// Human-readable summary of why a trade was taken.
pub fn signal_rationale(signal: &Signal, implied_up: f64, regime: &RegimeAdjustment) -> String {
    let agreeing: Vec<&str> = signal
        .indicator_votes
        .iter()
        .filter(|(_, d)| **d == signal.direction)
        .map(|(k, _)| k.as_str())
        .collect();
    let (up, down) = signal.vote_counts();

    format!(
        "{} {}/{}: {}/{} indicators agree ({}); edge {:.1}%, confidence {:.2}; \
         market implied {:.1}% up; regime {} (FnG {})",
        signal.direction.as_str().to_uppercase(),
        signal.asset,
        signal.timeframe,
        signal.consensus_count(),
        up + down,
        agreeing.join(", "),
        signal.edge * 100.0,
        signal.confidence,
        implied_up * 100.0,
        regime.label,
        regime.fng_value,
    )
}

// =============================================================================
// File I/O
// =============================================================================

fn append_record(path: &Path, rec: &TradeRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(rec)?)?;
    Ok(())
}

fn load_pending(path: &Path) -> HashMap<String, TradeRecord> {
    let mut pending = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return pending;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeRecord>(line) {
            Ok(rec) if !rec.resolved => {
                pending.insert(rec.trade_id.clone(), rec);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "skipping corrupt trade line"),
        }
    }
    pending
}

/// Rewrite the log applying `updates`, deduped by trade id, preserving every
/// other line. Atomic: tmp file + rename.
fn rewrite_with_updates(path: &Path, updates: &HashMap<String, TradeRecord>) -> Result<()> {
    let mut records: Vec<serde_json::Value> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    if path.exists() {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            let Some(tid) = value.get("trade_id").and_then(|v| v.as_str()) else {
                continue;
            };
            if !seen.insert(tid.to_string()) {
                continue;
            }
            if let Some(updated) = updates.get(tid) {
                records.push(serde_json::to_value(updated)?);
            } else {
                records.push(value);
            }
        }
    }

    let mut out = String::new();
    for rec in &records {
        out.push_str(&serde_json::to_string(rec)?);
        out.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, out).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename onto {}", path.display()))?;
    Ok(())
}

fn quick_stats_from_file(path: &Path) -> QuickStats {
    let mut stats = QuickStats::default();
    let Ok(content) = std::fs::read_to_string(path) else {
        return stats;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(rec) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if !rec.get("resolved").and_then(|v| v.as_bool()).unwrap_or(false) {
            continue;
        }
        let outcome = rec.get("outcome").and_then(|v| v.as_str()).unwrap_or("");
        if outcome != "up" && outcome != "down" {
            continue;
        }
        if rec.get("won").and_then(|v| v.as_bool()).unwrap_or(false) {
            stats.wins += 1;
        } else {
            stats.losses += 1;
        }
        stats.pnl += rec.get("pnl").and_then(|v| v.as_f64()).unwrap_or(0.0);
    }
    let total = stats.wins + stats.losses;
    if total > 0 {
        stats.win_rate_pct = (stats.wins as f64 / total as f64 * 1000.0).round() / 10.0;
    }
    stats.pnl = (stats.pnl * 100.0).round() / 100.0;
    stats
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::TokenInfo;
    use crate::regime::adjustment_for;

    fn make_signal() -> Signal {
        let mut votes = BTreeMap::new();
        votes.insert(IndicatorKind::Macd, Direction::Up);
        votes.insert(IndicatorKind::OrderFlow, Direction::Up);
        votes.insert(IndicatorKind::Rsi, Direction::Down);
        Signal {
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M5,
            direction: Direction::Up,
            probability: 0.62,
            edge: 0.10,
            confidence: 0.48,
            token_id: "tokUp".into(),
            atr_value: 0.002,
            indicator_votes: votes,
        }
    }

    fn context(end: i64) -> SignalContext {
        SignalContext {
            market_id: "0xmarket12345678".into(),
            question: "Bitcoin Up or Down - June 1, 3:00PM-3:05PM ET".into(),
            implied_up_price: 0.50,
            spot_price: 97_000.0,
            market_end_time: end,
            size_usd: 10.0,
            entry_price: 0.62,
            ob_liquidity_usd: 500.0,
            ob_spread: 0.02,
            dry_run: true,
        }
    }

    fn tracker_at(dir: &Path) -> PerformanceTracker {
        let learner = Arc::new(WeightLearner::new(dir.join("accuracy.json")));
        PerformanceTracker::new(dir.join("trades.jsonl"), learner, EventBus::new())
    }

    #[test]
    fn winner_flag_decides_outcome() {
        let market = MarketInfo {
            closed: true,
            tokens: vec![
                TokenInfo {
                    token_id: "a".into(),
                    outcome: "Up".into(),
                    price: 0.998,
                    winner: Some(true),
                },
                TokenInfo {
                    token_id: "b".into(),
                    outcome: "Down".into(),
                    price: 0.002,
                    winner: Some(false),
                },
            ],
        };
        assert_eq!(winner_from_market(&market), Some(Direction::Up));
    }

    #[test]
    fn final_price_fallback_decides_outcome() {
        let market = MarketInfo {
            closed: true,
            tokens: vec![
                TokenInfo {
                    token_id: "a".into(),
                    outcome: "Up".into(),
                    price: 0.03,
                    winner: None,
                },
                TokenInfo {
                    token_id: "b".into(),
                    outcome: "Down".into(),
                    price: 0.97,
                    winner: None,
                },
            ],
        };
        assert_eq!(winner_from_market(&market), Some(Direction::Down));
    }

    #[test]
    fn open_market_has_no_winner() {
        let market = MarketInfo {
            closed: false,
            tokens: vec![TokenInfo {
                token_id: "a".into(),
                outcome: "Up".into(),
                price: 0.95,
                winner: None,
            }],
        };
        assert_eq!(winner_from_market(&market), None);
    }

    #[test]
    fn winning_resolution_computes_pnl() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_at(dir.path());
        tracker.record_signal(&make_signal(), &context(5_000), &adjustment_for(50), 1_000);

        let mut rec = tracker.pending.read().values().next().unwrap().clone();
        assert!(apply_resolution(&mut rec, Some(Direction::Up), 5_040));
        assert!(rec.resolved);
        assert_eq!(rec.outcome, "up");
        assert!(rec.won);
        // shares = 10 / 0.62 = 16.13; pnl = shares − stake ≈ 6.13.
        assert!((rec.pnl - 6.13).abs() < 0.01);
    }

    #[test]
    fn losing_resolution_forfeits_stake() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_at(dir.path());
        tracker.record_signal(&make_signal(), &context(5_000), &adjustment_for(50), 1_000);

        let mut rec = tracker.pending.read().values().next().unwrap().clone();
        assert!(apply_resolution(&mut rec, Some(Direction::Down), 5_040));
        assert!(!rec.won);
        assert_eq!(rec.pnl, -10.0);
    }

    #[test]
    fn timeout_marks_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_at(dir.path());
        tracker.record_signal(&make_signal(), &context(5_000), &adjustment_for(50), 1_000);

        let mut rec = tracker.pending.read().values().next().unwrap().clone();
        // 5m timeout is 600 s: just inside it, nothing happens.
        assert!(!apply_resolution(&mut rec, None, 5_000 + 600));
        assert!(!rec.resolved);
        // Past it: marked unknown.
        assert!(apply_resolution(&mut rec, None, 5_000 + 601));
        assert_eq!(rec.outcome, "unknown");
        assert!(rec.resolved);
        assert_eq!(rec.pnl, 0.0);
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut rec = {
            let dir = tempfile::tempdir().unwrap();
            let tracker = tracker_at(dir.path());
            tracker.record_signal(&make_signal(), &context(5_000), &adjustment_for(50), 1_000);
            let r = tracker.pending.read().values().next().unwrap().clone();
            r
        };
        assert!(apply_resolution(&mut rec, Some(Direction::Up), 5_040));
        let snapshot = serde_json::to_string(&rec).unwrap();
        // A second application must not modify the record.
        assert!(!apply_resolution(&mut rec, Some(Direction::Down), 9_999));
        assert_eq!(serde_json::to_string(&rec).unwrap(), snapshot);
    }

    #[test]
    fn rewrite_preserves_pending_lines() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_at(dir.path());
        tracker.record_signal(&make_signal(), &context(5_000), &adjustment_for(50), 1_000);
        tracker.record_signal(&make_signal(), &context(9_000), &adjustment_for(50), 1_001);
        assert_eq!(tracker.pending_count(), 2);

        // Resolve only the first.
        let first_id = format!("0xmarket1234_{}", 1_000);
        let mut rec = tracker.pending.read().get(&first_id).unwrap().clone();
        apply_resolution(&mut rec, Some(Direction::Up), 5_040);
        let mut updates = HashMap::new();
        updates.insert(first_id.clone(), rec);
        rewrite_with_updates(&dir.path().join("trades.jsonl"), &updates).unwrap();

        // A fresh tracker sees exactly one pending record.
        let reloaded = tracker_at(dir.path());
        assert_eq!(reloaded.pending_count(), 1);
        assert!(!reloaded.pending.read().contains_key(&first_id));

        let stats = reloaded.quick_stats();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 0);
    }

    #[test]
    fn pending_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = tracker_at(dir.path());
            tracker.record_signal(&make_signal(), &context(5_000), &adjustment_for(50), 1_000);
        }
        let reloaded = tracker_at(dir.path());
        assert_eq!(reloaded.pending_count(), 1);
    }

    #[test]
    fn rationale_names_the_evidence() {
        let regime = adjustment_for(35);
        let text = signal_rationale(&make_signal(), 0.50, &regime);
        assert!(text.starts_with("UP bitcoin/5m"));
        assert!(text.contains("2/3 indicators agree"));
        assert!(text.contains("macd"));
        assert!(text.contains("order_flow"));
        assert!(text.contains("fear"));
        assert!(!text.contains("rsi,"), "dissenting indicator not listed as agreeing");
    }
}
