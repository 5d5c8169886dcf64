// =============================================================================
// Conviction Engine — evidence-layered scoring mapped to position size
// =============================================================================
//
// Nine weighted evidence layers sum to a raw 0–100 score:
//
//   consensus_ratio 20 | edge_magnitude 15 | cross_asset_alignment 12
//   volatility_clarity 10 | streak_bonus 8 | time_quality 8
//   volume_confirmation 10 | temporal_arb_strength 12 | cross_timeframe 5
//
// Safety rails then multiply the score down (losing streak, cold win rate,
// panic regime, daily loss stop, per-asset penalty), the score maps to a
// dollar tier, and the bankroll + regime multipliers scale the final size
// under a hard per-trade cap.
//
// Cross-asset state lives here: every generated signal registers a
// snapshot; snapshots expire after two minutes so alignment is always a
// read of "right now".
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::indicators::IndicatorKind;
use crate::regime::{RegimeAdjustment, RegimeLabel};
use crate::signals::Signal;
use crate::types::{Asset, Direction, Timeframe};

// ── Component weights (sum ≈ 100) ────────────────────────────────────────
const W_CONSENSUS: f64 = 20.0;
const W_EDGE: f64 = 15.0;
const W_CROSS_ASSET: f64 = 12.0;
const W_VOLATILITY: f64 = 10.0;
const W_STREAK: f64 = 8.0;
const W_TIME: f64 = 8.0;
const W_VOLUME: f64 = 10.0;
const W_TEMPORAL_ARB: f64 = 12.0;
const W_CROSS_TF: f64 = 5.0;

// ── Safety rails ─────────────────────────────────────────────────────────
const ABSOLUTE_MAX_PER_TRADE: f64 = 35.0;
const ABSOLUTE_MAX_DAILY_LOSS: f64 = 50.0;
const LOSING_STREAK_THRESHOLD: i64 = 3;
const LOSING_STREAK_PENALTY: f64 = 0.6;
const MIN_ROLLING_WR: f64 = 0.45;
const LOW_WR_PENALTY: f64 = 0.7;
const ROLLING_WR_WINDOW: usize = 20;
const EXTREME_FEAR_PENALTY: f64 = 0.75;
const SOLANA_PENALTY: f64 = 0.4;

// ── All-assets-aligned override ──────────────────────────────────────────
const ALL_ALIGNED_MIN_CONSENSUS: usize = 7;
const ALL_ALIGNED_MIN_ASSETS: usize = 3;
const ALL_ALIGNED_SIZE: f64 = 35.0;

// ── Freshness ────────────────────────────────────────────────────────────
const SIGNAL_MAX_AGE_S: i64 = 120;
const TF_MAX_AGE_S: i64 = 600;
const PERF_CACHE_TTL: Duration = Duration::from_secs(60);

/// Hour-of-day quality bands (America/New_York), from historical win rates.
const GOOD_HOURS_ET: [u32; 6] = [0, 2, 10, 12, 16, 17];
const OKAY_HOURS_ET: [u32; 9] = [1, 3, 4, 8, 9, 11, 13, 14, 15];

/// Conviction tier, in ascending order of size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvictionTier {
    NoTrade,
    Small,
    Standard,
    Increased,
    MaxConviction,
    AllAligned,
}

impl ConvictionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTrade => "no_trade",
            Self::Small => "small",
            Self::Standard => "standard",
            Self::Increased => "increased",
            Self::MaxConviction => "max_conviction",
            Self::AllAligned => "all_aligned",
        }
    }
}

impl std::fmt::Display for ConvictionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of the conviction scoring engine.
#[derive(Debug, Clone, Serialize)]
pub struct ConvictionResult {
    pub total_score: f64,
    pub position_size_usd: f64,
    pub tier: ConvictionTier,
    pub all_assets_aligned: bool,
    pub aligned_direction: Option<Direction>,
    /// Weighted contribution of each evidence layer.
    pub components: BTreeMap<String, f64>,
    /// Ordered descriptions of every safety rail / multiplier applied.
    pub safety_adjustments: Vec<String>,
}

/// Snapshot of the most recent signal for one asset, kept for cross-asset
/// alignment checks.
#[derive(Debug, Clone)]
pub struct AssetSignalSnapshot {
    pub asset: Asset,
    pub direction: Direction,
    pub consensus_count: usize,
    pub total_indicators: usize,
    pub edge: f64,
    pub confidence: f64,
    pub has_volume_spike: bool,
    pub has_temporal_arb: bool,
    pub indicator_votes: BTreeMap<IndicatorKind, Direction>,
    pub timestamp: i64,
}

/// Rolling performance read from the trade log.
#[derive(Debug, Clone, Default)]
struct RollingPerf {
    rolling_wr: Option<f64>,
    /// Positive = consecutive wins, negative = consecutive losses.
    current_streak: i64,
    /// Estimated PnL for today (ET).
    daily_pnl: f64,
    /// Sum of realised PnL across all resolved trades.
    total_pnl: f64,
    total_resolved: usize,
}

pub struct ConvictionEngine {
    asset_signals: RwLock<HashMap<Asset, AssetSignalSnapshot>>,
    tf_signals: RwLock<HashMap<(Asset, Timeframe), (Direction, i64)>>,
    perf_cache: RwLock<Option<(RollingPerf, Instant)>>,
    trades_path: PathBuf,
    bankroll_usd: f64,
}

impl ConvictionEngine {
    pub fn new(trades_path: impl Into<PathBuf>, bankroll_usd: f64) -> Self {
        Self {
            asset_signals: RwLock::new(HashMap::new()),
            tf_signals: RwLock::new(HashMap::new()),
            perf_cache: RwLock::new(None),
            trades_path: trades_path.into(),
            bankroll_usd: bankroll_usd.max(1.0),
        }
    }

    // -------------------------------------------------------------------------
    // Signal registration
    // -------------------------------------------------------------------------

    /// Register a snapshot for cross-asset alignment. Call for EVERY signal
    /// generated, including ones that never trade.
    pub fn register_signal(&self, snapshot: AssetSignalSnapshot) {
        debug!(
            asset = %snapshot.asset,
            direction = %snapshot.direction,
            consensus = snapshot.consensus_count,
            total = snapshot.total_indicators,
            "conviction snapshot registered"
        );
        self.asset_signals.write().insert(snapshot.asset, snapshot);
    }

    /// Remember the latest direction per (asset, timeframe).
    pub fn register_timeframe_signal(
        &self,
        asset: Asset,
        timeframe: Timeframe,
        direction: Direction,
        now: i64,
    ) {
        self.tf_signals
            .write()
            .insert((asset, timeframe), (direction, now));
    }

    /// Drop snapshots past their max age. Call once per control tick.
    pub fn expire_stale_signals(&self, now: i64) {
        self.asset_signals
            .write()
            .retain(|_, s| now - s.timestamp <= SIGNAL_MAX_AGE_S);
        self.tf_signals
            .write()
            .retain(|_, (_, ts)| now - *ts <= TF_MAX_AGE_S);
    }

    // -------------------------------------------------------------------------
    // Scoring
    // -------------------------------------------------------------------------

    pub fn score(
        &self,
        signal: &Signal,
        snapshot: &AssetSignalSnapshot,
        regime: Option<&RegimeAdjustment>,
        atr_value: Option<f64>,
    ) -> ConvictionResult {
        self.score_at(signal, snapshot, regime, atr_value, Utc::now().timestamp())
    }

    pub fn score_at(
        &self,
        signal: &Signal,
        snapshot: &AssetSignalSnapshot,
        regime: Option<&RegimeAdjustment>,
        atr_value: Option<f64>,
        now: i64,
    ) -> ConvictionResult {
        let mut components = BTreeMap::new();
        let mut safety = Vec::new();

        // ── 1. Consensus ratio ───────────────────────────────────────────
        let consensus =
            consensus_score(snapshot.consensus_count, snapshot.total_indicators) * W_CONSENSUS;
        components.insert("consensus_ratio".to_string(), consensus);

        // ── 2. Edge magnitude ────────────────────────────────────────────
        components.insert(
            "edge_magnitude".to_string(),
            edge_score(signal.edge * 100.0) * W_EDGE,
        );

        // ── 3. Cross-asset alignment ─────────────────────────────────────
        let aligned_count = self.aligned_asset_count(signal.direction, now);
        let cross_asset = match aligned_count {
            n if n >= 3 => 1.0,
            2 => 0.5,
            _ => 0.0,
        };
        components.insert("cross_asset_alignment".to_string(), cross_asset * W_CROSS_ASSET);

        // ── 4. Volatility clarity ────────────────────────────────────────
        components.insert(
            "volatility_clarity".to_string(),
            volatility_score(atr_value) * W_VOLATILITY,
        );

        // ── 5. Streak bonus ──────────────────────────────────────────────
        let perf = self.rolling_performance();
        components.insert(
            "streak_bonus".to_string(),
            streak_score(perf.current_streak) * W_STREAK,
        );

        // ── 6. Time-of-day quality ───────────────────────────────────────
        let hour_et = Utc
            .timestamp_opt(now, 0)
            .single()
            .map(|dt| dt.with_timezone(&New_York).hour())
            .unwrap_or(12);
        components.insert("time_quality".to_string(), time_quality_score(hour_et) * W_TIME);

        // ── 7. Volume confirmation ───────────────────────────────────────
        let volume = if snapshot.has_volume_spike {
            1.0
        } else {
            match snapshot.indicator_votes.get(&IndicatorKind::VolumeSpike) {
                Some(d) if *d == signal.direction => 0.8,
                Some(_) => 0.1,
                None => 0.3,
            }
        };
        components.insert("volume_confirmation".to_string(), volume * W_VOLUME);

        // ── 8. Temporal arb strength ─────────────────────────────────────
        let arb = if snapshot.has_temporal_arb {
            1.0
        } else {
            match snapshot.indicator_votes.get(&IndicatorKind::TemporalArb) {
                Some(d) if *d == signal.direction => 0.6,
                Some(_) => 0.0,
                None => 0.2,
            }
        };
        components.insert("temporal_arb_strength".to_string(), arb * W_TEMPORAL_ARB);

        // ── 9. Cross-timeframe agreement ─────────────────────────────────
        let ctf = self.cross_timeframe_score(signal.asset, signal.direction, now);
        components.insert("cross_timeframe".to_string(), ctf * W_CROSS_TF);

        let raw_score: f64 = components.values().sum();

        // ── Safety rails ─────────────────────────────────────────────────
        let mut multiplier = 1.0;

        if perf.current_streak <= -LOSING_STREAK_THRESHOLD {
            multiplier *= LOSING_STREAK_PENALTY;
            safety.push(format!(
                "losing_streak={} (penalty {LOSING_STREAK_PENALTY}x)",
                perf.current_streak
            ));
        }

        if let Some(wr) = perf.rolling_wr {
            if wr < MIN_ROLLING_WR {
                multiplier *= LOW_WR_PENALTY;
                safety.push(format!(
                    "low_wr={:.0}% < {:.0}% (penalty {LOW_WR_PENALTY}x)",
                    wr * 100.0,
                    MIN_ROLLING_WR * 100.0
                ));
            }
        }

        if let Some(r) = regime {
            if r.label == RegimeLabel::ExtremeFear {
                multiplier *= EXTREME_FEAR_PENALTY;
                safety.push(format!(
                    "extreme_fear fng={} (penalty {EXTREME_FEAR_PENALTY}x)",
                    r.fng_value
                ));
            }
        }

        if perf.daily_pnl <= -ABSOLUTE_MAX_DAILY_LOSS {
            multiplier = 0.0;
            safety.push(format!(
                "daily_loss=${:.2} beyond ${ABSOLUTE_MAX_DAILY_LOSS} STOP",
                perf.daily_pnl
            ));
        }

        if signal.asset == Asset::Solana {
            multiplier *= SOLANA_PENALTY;
            safety.push(format!("solana_penalty ({SOLANA_PENALTY}x)"));
        }

        let final_score = (raw_score * multiplier).clamp(0.0, 100.0);

        // ── All-assets-aligned override ──────────────────────────────────
        let all_aligned = multiplier > 0.0 && self.all_assets_aligned(signal.direction, now);

        let (mut size, tier) = if all_aligned {
            safety.push(format!(
                "all_assets_aligned: sizing to ${ALL_ALIGNED_SIZE}"
            ));
            (ALL_ALIGNED_SIZE, ConvictionTier::AllAligned)
        } else {
            (conviction_to_size(final_score), tier_for(final_score))
        };

        // ── Bankroll + regime multipliers, hard cap ──────────────────────
        let bankroll_mult = bankroll_multiplier(self.bankroll_usd, perf.total_pnl);
        if (bankroll_mult - 1.0).abs() > f64::EPSILON {
            size *= bankroll_mult;
            safety.push(format!("bankroll_mult={bankroll_mult:.2}x"));
        }

        if let Some(r) = regime {
            size *= r.size_multiplier;
            if (r.size_multiplier - 1.0).abs() > f64::EPSILON {
                safety.push(format!(
                    "regime_size_mult={:.2}x ({})",
                    r.size_multiplier, r.label
                ));
            }
        }

        size = size.min(ABSOLUTE_MAX_PER_TRADE);
        let size = (size * 100.0).round() / 100.0;

        let result = ConvictionResult {
            total_score: final_score,
            position_size_usd: if tier == ConvictionTier::NoTrade { 0.0 } else { size },
            tier,
            all_assets_aligned: all_aligned,
            aligned_direction: all_aligned.then_some(signal.direction),
            components,
            safety_adjustments: safety,
        };

        info!(
            asset = %signal.asset,
            timeframe = %signal.timeframe,
            direction = %signal.direction,
            score = format!("{final_score:.0}"),
            size_usd = result.position_size_usd,
            tier = %result.tier,
            aligned = all_aligned,
            "conviction scored"
        );

        result
    }

    // -------------------------------------------------------------------------
    // Cross-asset / cross-timeframe helpers
    // -------------------------------------------------------------------------

    fn aligned_asset_count(&self, direction: Direction, now: i64) -> usize {
        let signals = self.asset_signals.read();
        Asset::ALL
            .iter()
            .filter(|asset| {
                signals.get(asset).is_some_and(|s| {
                    now - s.timestamp <= SIGNAL_MAX_AGE_S && s.direction == direction
                })
            })
            .count()
    }

    /// The full all-aligned check: enough assets agreeing with strong
    /// consensus each, and at least one volume OR temporal-arb confirmation.
    fn all_assets_aligned(&self, direction: Direction, now: i64) -> bool {
        let signals = self.asset_signals.read();
        let mut aligned = 0usize;
        let mut has_volume = false;
        let mut has_arb = false;

        for asset in Asset::ALL {
            let Some(s) = signals.get(&asset) else { continue };
            if now - s.timestamp > SIGNAL_MAX_AGE_S || s.direction != direction {
                continue;
            }
            if s.consensus_count < ALL_ALIGNED_MIN_CONSENSUS {
                continue;
            }
            aligned += 1;
            has_volume |= s.has_volume_spike;
            has_arb |= s.has_temporal_arb;
        }

        aligned >= ALL_ALIGNED_MIN_ASSETS && (has_volume || has_arb)
    }

    fn cross_timeframe_score(&self, asset: Asset, direction: Direction, now: i64) -> f64 {
        let tf_signals = self.tf_signals.read();
        let mut checked = 0usize;
        let mut agreements = 0usize;

        for tf in [Timeframe::M5, Timeframe::M15] {
            if let Some((dir, ts)) = tf_signals.get(&(asset, tf)) {
                if now - ts < TF_MAX_AGE_S {
                    checked += 1;
                    if *dir == direction {
                        agreements += 1;
                    }
                }
            }
        }

        match (checked, agreements) {
            (0, _) => 0.3,
            (1, 1) => 0.5,
            (1, _) => 0.1,
            (_, 2) => 1.0,
            (_, 1) => 0.3,
            _ => 0.0,
        }
    }

    // -------------------------------------------------------------------------
    // Rolling performance from the trade log
    // -------------------------------------------------------------------------

    fn rolling_performance(&self) -> RollingPerf {
        if let Some((perf, at)) = &*self.perf_cache.read() {
            if at.elapsed() < PERF_CACHE_TTL {
                return perf.clone();
            }
        }

        let perf = load_rolling_performance(&self.trades_path);
        *self.perf_cache.write() = Some((perf.clone(), Instant::now()));
        perf
    }

    // -------------------------------------------------------------------------
    // Snapshot builder
    // -------------------------------------------------------------------------

    /// Bridge a Signal into the snapshot the engine keys cross-asset state by.
    pub fn build_snapshot(signal: &Signal, now: i64) -> AssetSignalSnapshot {
        let (up_count, down_count) = signal.vote_counts();
        let in_direction = |kind: IndicatorKind| {
            signal.indicator_votes.get(&kind) == Some(&signal.direction)
        };
        AssetSignalSnapshot {
            asset: signal.asset,
            direction: signal.direction,
            consensus_count: up_count.max(down_count),
            total_indicators: signal.indicator_votes.len(),
            edge: signal.edge,
            confidence: signal.confidence,
            has_volume_spike: in_direction(IndicatorKind::VolumeSpike),
            has_temporal_arb: in_direction(IndicatorKind::TemporalArb),
            indicator_votes: signal.indicator_votes.clone(),
            timestamp: now,
        }
    }
}

// =============================================================================
// Pure component scoring
// =============================================================================

/// Blend of the normalized consensus fraction above the 7-of-13 baseline
/// and the raw agreeing count above the minimum.
fn consensus_score(consensus_count: usize, total: usize) -> f64 {
    let total = total.max(1);
    let ratio = consensus_count as f64 / total as f64;
    let min_ratio = 7.0 / 13.0;
    let normalized = ((ratio - min_ratio) / (1.0 - min_ratio)).max(0.0);
    let raw_bonus = (consensus_count.saturating_sub(7)) as f64 / 6.0;
    (normalized * 0.6 + raw_bonus * 0.4).min(1.0)
}

/// Piecewise-linear edge quality: 8% is barely worth it, 18%+ is maximal.
fn edge_score(edge_pct: f64) -> f64 {
    if edge_pct <= 8.0 {
        0.2
    } else if edge_pct <= 12.0 {
        0.2 + (edge_pct - 8.0) / 4.0 * 0.5
    } else if edge_pct <= 18.0 {
        0.7 + (edge_pct - 12.0) / 6.0 * 0.3
    } else {
        1.0
    }
}

/// ATR banding: flat tape is a coin flip, moderate vol is a clean trend,
/// extreme vol is chaos.
fn volatility_score(atr_value: Option<f64>) -> f64 {
    match atr_value {
        None => 0.4,
        Some(atr) if atr < 0.0005 => 0.1,
        Some(atr) if atr < 0.002 => 0.3 + (atr - 0.0005) / 0.0015 * 0.5,
        Some(atr) if atr < 0.005 => 0.8,
        Some(atr) if atr < 0.01 => 0.6,
        Some(_) => 0.3,
    }
}

fn streak_score(streak: i64) -> f64 {
    if streak >= 5 {
        1.0
    } else if streak >= 3 {
        0.7
    } else if streak >= 1 {
        0.3
    } else if streak == 0 {
        0.15
    } else {
        0.0
    }
}

fn time_quality_score(hour_et: u32) -> f64 {
    if GOOD_HOURS_ET.contains(&hour_et) {
        1.0
    } else if OKAY_HOURS_ET.contains(&hour_et) {
        0.4
    } else {
        0.0
    }
}

/// Tier band for a final score.
fn tier_for(score: f64) -> ConvictionTier {
    if score < 30.0 {
        ConvictionTier::NoTrade
    } else if score < 50.0 {
        ConvictionTier::Small
    } else if score < 70.0 {
        ConvictionTier::Standard
    } else if score < 85.0 {
        ConvictionTier::Increased
    } else {
        ConvictionTier::MaxConviction
    }
}

/// Map a score to dollars with linear interpolation inside each tier band.
fn conviction_to_size(score: f64) -> f64 {
    const BANDS: [(f64, f64, f64, f64); 4] = [
        (30.0, 50.0, 8.0, 12.0),
        (50.0, 70.0, 12.0, 20.0),
        (70.0, 85.0, 20.0, 28.0),
        (85.0, 100.0, 28.0, 35.0),
    ];
    if score < 30.0 {
        return 0.0;
    }
    for (lo, hi, min_usd, max_usd) in BANDS {
        if score >= lo && score < hi {
            let t = (score - lo) / (hi - lo);
            return min_usd + t * (max_usd - min_usd);
        }
    }
    35.0
}

/// Auto-compounding: scale with the bankroll, clamped to [0.75, 2.0].
fn bankroll_multiplier(initial: f64, total_pnl: f64) -> f64 {
    ((initial + total_pnl) / initial).clamp(0.75, 2.0)
}

/// Parse the trade log for rolling win rate, current streak, today's PnL
/// estimate, and lifetime PnL. Any parse failure degrades to defaults.
fn load_rolling_performance(path: &std::path::Path) -> RollingPerf {
    let mut perf = RollingPerf::default();
    let Ok(content) = std::fs::read_to_string(path) else {
        return perf;
    };

    let mut resolved: Vec<(bool, f64, f64)> = Vec::new(); // (won, resolve_time, pnl)
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
        let won = rec.get("won").and_then(|v| v.as_bool()).unwrap_or(false);
        let ts = rec
            .get("resolve_time")
            .and_then(|v| v.as_f64())
            .filter(|t| *t > 0.0)
            .or_else(|| rec.get("timestamp").and_then(|v| v.as_f64()))
            .unwrap_or(0.0);
        let pnl = rec.get("pnl").and_then(|v| v.as_f64()).unwrap_or(0.0);
        resolved.push((won, ts, pnl));
    }

    perf.total_resolved = resolved.len();
    if resolved.is_empty() {
        return perf;
    }
    perf.total_pnl = resolved.iter().map(|(_, _, pnl)| pnl).sum();

    let recent = &resolved[resolved.len().saturating_sub(ROLLING_WR_WINDOW)..];
    let wins = recent.iter().filter(|(won, _, _)| *won).count();
    perf.rolling_wr = Some(wins as f64 / recent.len() as f64);

    // Streak from the most recent trade backwards.
    let mut streak = 0i64;
    for (won, _, _) in resolved.iter().rev() {
        if streak == 0 {
            streak = if *won { 1 } else { -1 };
        } else if streak > 0 && *won {
            streak += 1;
        } else if streak < 0 && !*won {
            streak -= 1;
        } else {
            break;
        }
    }
    perf.current_streak = streak;

    // Today's PnL estimate (ET calendar day): wins ≈ +$8, losses ≈ −$10.
    let today = Utc::now().with_timezone(&New_York).date_naive();
    let (mut wins_today, mut losses_today) = (0, 0);
    for (won, ts, _) in &resolved {
        let Some(dt) = Utc.timestamp_opt(*ts as i64, 0).single() else {
            continue;
        };
        if dt.with_timezone(&New_York).date_naive() == today {
            if *won {
                wins_today += 1;
            } else {
                losses_today += 1;
            }
        }
    }
    perf.daily_pnl = wins_today as f64 * 8.0 - losses_today as f64 * 10.0;

    perf
}
