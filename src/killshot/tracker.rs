// =============================================================================
// Kill Tracker — logs killshot trades and resolves them at window close
// =============================================================================
//
// One jsonl line per trade. Pending trades resolve a grace period after the
// window bell; the caller supplies the outcome lookup, so paper mode derives
// the direction from the spot tape while live mode feeds the market's final
// winner. Trades that miss their resolution window entirely expire.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{Asset, Direction};

/// Wait this long after window close before resolving from spot.
const RESOLVE_GRACE_S: i64 = 10;
/// Past this the resolution window is missed and the trade expires.
const RESOLVE_EXPIRY_S: i64 = 600;

/// A single killshot trade record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillTrade {
    pub timestamp: i64,
    pub asset: Asset,
    pub market_id: String,
    pub question: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub size_usd: f64,
    pub shares: f64,
    pub window_end_ts: i64,
    /// Spot delta (fraction) that triggered the entry.
    pub spot_delta_pct: f64,
    pub open_price: f64,
    #[serde(default)]
    pub market_bid: f64,
    #[serde(default)]
    pub market_ask: f64,
    /// "win", "loss", or "expired"; empty while pending.
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub resolved_at: i64,
}

pub struct KillTracker {
    path: PathBuf,
    pending: RwLock<Vec<KillTrade>>,
}

impl KillTracker {
    /// Open the tracker, reloading pending trades that can still resolve.
    pub fn new(path: impl Into<PathBuf>, now: i64) -> Self {
        let path = path.into();
        let pending = load_pending(&path, now);
        if !pending.is_empty() {
            info!(count = pending.len(), "loaded pending killshot trades");
        }
        Self {
            path,
            pending: RwLock::new(pending),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Log a new trade.
    pub fn record_trade(&self, trade: KillTrade) {
        info!(
            direction = %trade.direction,
            asset = %trade.asset,
            entry_cents = trade.entry_price * 100.0,
            size_usd = trade.size_usd,
            shares = trade.shares,
            delta_pct = trade.spot_delta_pct * 100.0,
            "killshot trade recorded"
        );
        if let Err(e) = append_trade(&self.path, &trade) {
            warn!(error = %e, "failed to append killshot trade");
        }
        self.pending.write().push(trade);
    }

    /// Market ids of pending trades whose resolution window has opened
    /// (live callers fetch each market's final state for these).
    pub fn due_market_ids(&self, now: i64) -> Vec<String> {
        self.pending
            .read()
            .iter()
            .filter(|t| now >= t.window_end_ts + RESOLVE_GRACE_S)
            .map(|t| t.market_id.clone())
            .collect()
    }

    /// Resolve pending trades whose window closed. `outcome_for` supplies the
    /// actual market direction per trade — from the spot tape in paper mode,
    /// from the market's final winner in live mode. Returns the trades
    /// resolved this pass.
    pub fn resolve_trades(
        &self,
        outcome_for: impl Fn(&KillTrade) -> Option<Direction>,
        now: i64,
    ) -> Vec<KillTrade> {
        let mut resolved = Vec::new();
        let mut still_pending = Vec::new();

        for mut trade in self.pending.write().drain(..) {
            if now < trade.window_end_ts + RESOLVE_GRACE_S {
                still_pending.push(trade);
                continue;
            }

            if now > trade.window_end_ts + RESOLVE_EXPIRY_S {
                trade.outcome = "expired".to_string();
                trade.resolved_at = now;
                warn!(
                    asset = %trade.asset,
                    direction = %trade.direction,
                    "killshot trade expired (missed resolution window)"
                );
                if let Err(e) = update_in_file(&self.path, &trade) {
                    warn!(error = %e, "failed to update killshot trade");
                }
                resolved.push(trade);
                continue;
            }

            let Some(actual) = outcome_for(&trade) else {
                still_pending.push(trade);
                continue;
            };

            let won = trade.direction == actual;
            if won {
                trade.outcome = "win".to_string();
                trade.pnl = round4(trade.shares * (1.0 - trade.entry_price));
            } else {
                trade.outcome = "loss".to_string();
                trade.pnl = round4(-trade.size_usd);
            }
            trade.resolved_at = now;

            info!(
                outcome = %trade.outcome,
                direction = %trade.direction,
                asset = %trade.asset,
                pnl = trade.pnl,
                "killshot trade resolved"
            );
            if let Err(e) = update_in_file(&self.path, &trade) {
                warn!(error = %e, "failed to update killshot trade");
            }
            resolved.push(trade);
        }

        *self.pending.write() = still_pending;
        resolved
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

// =============================================================================
// File I/O
// =============================================================================

fn append_trade(path: &Path, trade: &KillTrade) -> Result<()> {
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
    writeln!(file, "{}", serde_json::to_string(trade)?)?;
    Ok(())
}

fn load_pending(path: &Path, now: i64) -> Vec<KillTrade> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            serde_json::from_str::<KillTrade>(line).ok()
        })
        .filter(|t| t.outcome.is_empty() && t.window_end_ts > now - RESOLVE_EXPIRY_S)
        .collect()
}

/// Rewrite the matching pending line with the resolved trade (atomic).
fn update_in_file(path: &Path, trade: &KillTrade) -> Result<()> {
    if !path.exists() {
        return append_trade(path, trade);
    }

    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut lines: Vec<String> = Vec::new();
    let mut updated = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !updated {
            if let Ok(existing) = serde_json::from_str::<KillTrade>(line) {
                if existing.market_id == trade.market_id && existing.timestamp == trade.timestamp {
                    lines.push(serde_json::to_string(trade)?);
                    updated = true;
                    continue;
                }
            }
        }
        lines.push(line.to_string());
    }
    if !updated {
        lines.push(serde_json::to_string(trade)?);
    }

    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, lines.join("\n") + "\n")
        .with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename onto {}", path.display()))?;
    Ok(())
}
