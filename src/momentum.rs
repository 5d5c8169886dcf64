// =============================================================================
// Momentum Capture — big-move override for fearful/greedy markets
// =============================================================================
//
// Quiet days stay conservative; this mode exists for the handful of sessions
// where the market is already running. It activates only in extreme
// sentiment regimes when BTC or ETH shows a qualifying move:
//
//   - >= 2.8% over 4 hours, or
//   - >= 4.0% over 8 hours, or
//   - 30-minute volume >= 2.5x the hourly average with a >= 1% move
//
// plus an anti-wick persistence check (five consecutive one-minute candles
// closing with the move). While active, the regime gates are loosened in
// the move's direction (size x1.5, edge x0.5, confidence floor 0.25) via
// `RegimeAdjustment::momentum_override`. Deactivation is automatic: expiry,
// or a 20-EMA breach combined with fading volume.
//
// State is persisted atomically so sibling processes can read it.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market_data::{Candle, PriceCache};
use crate::regime::RegimeAdjustment;
use crate::types::{Asset, Direction};

// Trigger thresholds (any fires).
const TRIGGER_4H_PCT: f64 = 2.8;
const TRIGGER_8H_PCT: f64 = 4.0;
const VOLUME_SPIKE_MULT: f64 = 2.5;
const VOLUME_MOVE_MIN_PCT: f64 = 1.0;

// Sentiment gate: only extreme regimes.
const FNG_FEAR_CEILING: u32 = 25;
const FNG_GREED_FLOOR: u32 = 75;

// Anti-wick persistence.
const PERSISTENCE_CANDLES: usize = 5;

// Auto-deactivation.
const DEACTIVATION_EMA_PERIOD: usize = 20;
const DEACTIVATION_VOLUME_RATIO: f64 = 0.50;

/// The shared momentum-mode state (also written to disk for siblings).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MomentumState {
    pub active: bool,
    pub direction: Option<Direction>,
    pub trigger_asset: Option<Asset>,
    pub trigger_pct: f64,
    /// "4h_move", "8h_move", or "volume_spike".
    pub trigger_kind: String,
    /// 0–100.
    pub strength: u32,
    pub activated_at: i64,
    pub expires_at: i64,
}

pub struct MomentumDetector {
    state_path: PathBuf,
}

impl MomentumDetector {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
        }
    }

    /// Check trigger / continuation / deactivation. Returns the active state
    /// when momentum mode is on.
    pub fn detect(
        &self,
        cache: &PriceCache,
        regime: &RegimeAdjustment,
        now: i64,
    ) -> Option<MomentumState> {
        // Continuation / deactivation of an already-active mode.
        if let Some(current) = self.read_state() {
            if current.active && now < current.expires_at {
                if should_deactivate(&current, cache, now) {
                    info!(
                        asset = ?current.trigger_asset,
                        "momentum mode auto-deactivated"
                    );
                    self.write_state(&MomentumState::default());
                    return None;
                }
                return Some(current);
            }
            if current.active {
                // Expired on the clock.
                self.write_state(&MomentumState::default());
                return None;
            }
        }

        // Gate: only extreme sentiment.
        if regime.fng_value > FNG_FEAR_CEILING && regime.fng_value < FNG_GREED_FLOOR {
            return None;
        }

        for asset in [Asset::Bitcoin, Asset::Ethereum] {
            if let Some(state) = check_triggers(cache, asset, now) {
                info!(
                    direction = ?state.direction,
                    asset = %asset,
                    pct = state.trigger_pct,
                    kind = %state.trigger_kind,
                    strength = state.strength,
                    "momentum mode ACTIVATED"
                );
                self.write_state(&state);
                return Some(state);
            }
        }

        None
    }

    fn read_state(&self) -> Option<MomentumState> {
        let content = std::fs::read_to_string(&self.state_path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_state(&self, state: &MomentumState) {
        if let Err(e) = write_state_atomic(&self.state_path, state) {
            warn!(error = %e, "failed to write momentum state");
        }
    }
}

fn write_state_atomic(path: &Path, state: &MomentumState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename onto {}", path.display()))?;
    Ok(())
}

// =============================================================================
// Trigger evaluation
// =============================================================================

fn check_triggers(cache: &PriceCache, asset: Asset, now: i64) -> Option<MomentumState> {
    // 4h window (240 one-minute candles).
    let candles_4h = cache.candles(asset, 240);
    if candles_4h.len() >= 240 {
        if let Some(pct) = window_move_pct(&candles_4h) {
            if pct.abs() >= TRIGGER_4H_PCT && persistence_check(&candles_4h, pct > 0.0) {
                return Some(build_state(asset, pct, "4h_move", now));
            }
        }
    }

    // 8h window — fires on partial data once at least 4h has accumulated.
    let candles_8h = cache.candles(asset, 480);
    if candles_8h.len() >= 240 {
        if let Some(pct) = window_move_pct(&candles_8h) {
            if pct.abs() >= TRIGGER_8H_PCT && persistence_check(&candles_8h, pct > 0.0) {
                return Some(build_state(asset, pct, "8h_move", now));
            }
        }
    }

    // Volume spike: the last 30 minutes vs the 30 before them, plus a real move.
    let candles_60 = cache.candles(asset, 60);
    if candles_60.len() >= 60 {
        let prior_30: f64 = candles_60[..30].iter().map(|c| c.volume).sum();
        let recent_30: f64 = candles_60[30..].iter().map(|c| c.volume).sum();
        if prior_30 > 0.0 && recent_30 > VOLUME_SPIKE_MULT * prior_30 {
            if let Some(pct) = window_move_pct(&candles_60[30..]) {
                if pct.abs() >= VOLUME_MOVE_MIN_PCT && persistence_check(&candles_60[30..], pct > 0.0)
                {
                    return Some(build_state(asset, pct, "volume_spike", now));
                }
            }
        }
    }

    None
}

/// Percent move from the first to the last close of a candle window.
fn window_move_pct(candles: &[Candle]) -> Option<f64> {
    let first = candles.first()?.close;
    let last = candles.last()?.close;
    if first <= 0.0 {
        return None;
    }
    Some((last - first) / first * 100.0)
}

/// Anti-wick: the last five candles must all close with the move.
fn persistence_check(candles: &[Candle], is_up: bool) -> bool {
    if candles.len() < PERSISTENCE_CANDLES {
        return false;
    }
    candles[candles.len() - PERSISTENCE_CANDLES..]
        .iter()
        .all(|c| if is_up { c.close >= c.open } else { c.close <= c.open })
}

fn build_state(asset: Asset, pct: f64, kind: &str, now: i64) -> MomentumState {
    let strength = (pct.abs() * 15.0).min(100.0) as u32;
    // 4h minimum, 12h maximum, scaled by strength.
    let duration_s = (4.0 + (strength as f64 / 100.0) * 8.0) * 3_600.0;
    MomentumState {
        active: true,
        direction: Some(if pct > 0.0 { Direction::Up } else { Direction::Down }),
        trigger_asset: Some(asset),
        trigger_pct: (pct.abs() * 100.0).round() / 100.0,
        trigger_kind: kind.to_string(),
        strength,
        activated_at: now,
        expires_at: now + duration_s as i64,
    }
}

/// EMA breach against the move plus fading volume ends the mode early.
fn should_deactivate(state: &MomentumState, cache: &PriceCache, now: i64) -> bool {
    if now >= state.expires_at {
        return true;
    }

    let asset = state.trigger_asset.unwrap_or(Asset::Bitcoin);
    let candles = cache.candles(asset, 60);
    if candles.len() < DEACTIVATION_EMA_PERIOD {
        return false;
    }

    let closes: Vec<f64> = candles[candles.len() - DEACTIVATION_EMA_PERIOD..]
        .iter()
        .map(|c| c.close)
        .collect();
    let ema = crate::indicators::ema::ema_last(&closes, DEACTIVATION_EMA_PERIOD).unwrap_or(0.0);
    let current = candles.last().map(|c| c.close).unwrap_or(0.0);

    let breached = match state.direction {
        Some(Direction::Up) => current < ema,
        Some(Direction::Down) => current > ema,
        None => true,
    };
    if !breached {
        return false;
    }

    // Confirm with a volume fade over the last 30 minutes.
    if candles.len() >= 30 {
        let recent: f64 = candles[candles.len() - 30..].iter().map(|c| c.volume).sum();
        let period_avg_30: f64 =
            candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64 * 30.0;
        if period_avg_30 > 0.0 && recent < DEACTIVATION_VOLUME_RATIO * period_avg_30 {
            return true;
        }
    }

    false
}
