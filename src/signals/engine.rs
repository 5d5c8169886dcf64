// =============================================================================
// Signal Engine — weighted indicator ensemble with layered gates
// =============================================================================
//
// Per market evaluated:
//   1. Require MIN_CANDLES of history
//   2. Require ATR above the flat-tape floor
//   3. Build every indicator's vote (timeframe-specific parameters)
//   4. Require at least 3 active votes
//   5. Weighted score under dynamic weights × timeframe scales
//   6. Consensus filter on the majority direction
//   7. Anti-trend filter: counter-trend majorities need stricter consensus
//   8. Probability from the score, clamped per timeframe; confidence floor
//   9. Fee-aware edge against the market's implied price
//  10. Emit the best-edge direction
//
// Every rejection is a clean None — "no trade" is a result, not an error.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::indicators::{
    arb, atr, bollinger, ema, flow, heikin_ashi, macd, momentum, rsi, sentiment, volume, vwap,
    IndicatorKind, IndicatorParams, IndicatorVote,
};
use crate::market_data::{PriceCache, SpotDepthMap, TokenBook};
use crate::regime::RegimeAdjustment;
use crate::runtime_config::RuntimeConfig;
use crate::signals::fees::fee_estimate;
use crate::signals::Signal;
use crate::types::{Asset, Direction, Timeframe};
use crate::weights::WeightLearner;

/// Minimum candles before the ensemble will evaluate at all.
pub const MIN_CANDLES: usize = 30;
/// Rolling window (minutes) for the order-flow delta.
const ORDER_FLOW_WINDOW: usize = 30;
/// Look-back (minutes) for the spot-vs-market momentum reads.
const ARB_LOOKBACK_MIN: usize = 3;

/// The engine's own gate parameters, lifted out of the full runtime config.
#[derive(Debug, Clone, Copy)]
pub struct SignalConfig {
    pub min_consensus: usize,
    pub min_confidence: f64,
    pub min_atr: f64,
    /// Minimum post-fee edge as a fraction.
    pub min_edge: f64,
}

impl From<&RuntimeConfig> for SignalConfig {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            min_consensus: cfg.min_consensus,
            min_confidence: cfg.min_confidence,
            min_atr: cfg.min_atr,
            min_edge: cfg.min_edge(),
        }
    }
}

pub struct SignalEngine {
    cache: Arc<PriceCache>,
    depth: Arc<SpotDepthMap>,
    learner: Arc<WeightLearner>,
    cfg: SignalConfig,
}

impl SignalEngine {
    pub fn new(
        cache: Arc<PriceCache>,
        depth: Arc<SpotDepthMap>,
        learner: Arc<WeightLearner>,
        cfg: SignalConfig,
    ) -> Self {
        Self {
            cache,
            depth,
            learner,
            cfg,
        }
    }

    /// Evaluate one market. `implied_up` is the market's current price for
    /// the UP token; `book` is that token's top-of-book if the feed has one.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_signal(
        &self,
        up_token: &str,
        down_token: &str,
        asset: Asset,
        timeframe: Timeframe,
        implied_up: Option<f64>,
        book: Option<&TokenBook>,
        regime: &RegimeAdjustment,
    ) -> Option<Signal> {
        // ── 1. History ───────────────────────────────────────────────────
        let candles = self.cache.candles(asset, 120);
        if candles.len() < MIN_CANDLES {
            debug!(asset = %asset, have = candles.len(), need = MIN_CANDLES, "insufficient candles");
            return None;
        }

        // ── 2. Volatility floor ──────────────────────────────────────────
        let atr_value = atr::atr_fraction(&candles, 14)?;
        if atr_value < self.cfg.min_atr {
            debug!(asset = %asset, atr = atr_value, floor = self.cfg.min_atr, "ATR below floor");
            return None;
        }

        // ── 3. Indicator votes ───────────────────────────────────────────
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let params = IndicatorParams::for_timeframe(timeframe);
        let spot_price = self.cache.price(asset)?;
        let price_ago = self.cache.price_ago(asset, ARB_LOOKBACK_MIN);

        let mut votes: BTreeMap<IndicatorKind, IndicatorVote> = BTreeMap::new();
        let mut push = |kind: IndicatorKind, vote: Option<IndicatorVote>| {
            if let Some(v) = vote {
                votes.insert(kind, v);
            }
        };

        push(IndicatorKind::Rsi, rsi::vote(&closes, params.rsi_period));
        push(
            IndicatorKind::EmaCross,
            ema::vote(&closes, params.ema_fast, params.ema_slow),
        );
        push(
            IndicatorKind::Macd,
            macd::vote(&closes, params.macd_fast, params.macd_slow, params.macd_signal),
        );
        push(
            IndicatorKind::Bollinger,
            bollinger::vote(&closes, params.bb_period, params.bb_std),
        );
        push(IndicatorKind::Vwap, vwap::vote(&candles));
        push(
            IndicatorKind::Momentum,
            momentum::vote(&closes, params.mom_short, params.mom_long),
        );
        push(IndicatorKind::HeikinAshi, heikin_ashi::vote(&candles));
        push(
            IndicatorKind::VolumeSpike,
            volume::vote(&candles, params.volume_threshold, params.volume_lookback),
        );

        let (buy_vol, sell_vol) = self.cache.order_flow(asset, ORDER_FLOW_WINDOW);
        push(IndicatorKind::OrderFlow, flow::order_flow_delta(buy_vol, sell_vol));

        if let Some(depth) = self.depth.depth(asset) {
            push(IndicatorKind::SpotDepth, flow::spot_depth(&depth.bids, &depth.asks));
        }
        if let Some(book) = book {
            push(
                IndicatorKind::Liquidity,
                flow::liquidity_imbalance(book.bid_depth_usd, book.ask_depth_usd, book.spread()),
            );
        }

        push(
            IndicatorKind::TemporalArb,
            arb::temporal_arb(spot_price, price_ago, implied_up, timeframe),
        );
        push(
            IndicatorKind::PriceDivergence,
            arb::price_divergence(spot_price, price_ago, implied_up),
        );
        push(IndicatorKind::FearGreed, sentiment::vote(regime.fng_value));

        // ── 4. Active-vote floor ─────────────────────────────────────────
        let active = votes.len();
        if active < 3 {
            debug!(asset = %asset, active, "too few active votes");
            return None;
        }

        // ── 5. Weighted ensemble score ───────────────────────────────────
        let base: BTreeMap<IndicatorKind, f64> = IndicatorKind::ALL
            .into_iter()
            .map(|k| (k, k.base_weight()))
            .collect();
        let dynamic = self.learner.dynamic_weights(&base);

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (kind, vote) in &votes {
            let w = dynamic.get(kind).copied().unwrap_or_else(|| kind.base_weight());
            let scale = kind.tf_scale(timeframe);
            weighted_sum += w * scale * vote.confidence * vote.direction.sign();
            weight_total += (w * scale).abs();
        }
        if weight_total <= 0.0 {
            return None;
        }
        let score = weighted_sum / weight_total;

        // ── 6. Consensus filter ──────────────────────────────────────────
        let up_count = votes.values().filter(|v| v.direction == Direction::Up).count();
        let down_count = active - up_count;
        let (majority_dir, majority_count) = if up_count >= down_count {
            (Direction::Up, up_count)
        } else {
            (Direction::Down, down_count)
        };
        let required = consensus_required(self.cfg.min_consensus, active);
        if majority_count < required {
            debug!(
                asset = %asset,
                majority = majority_count,
                required,
                "consensus below floor"
            );
            return None;
        }

        // ── 7. Anti-trend filter ─────────────────────────────────────────
        if closes.len() >= 30 {
            let short_ma = mean(&closes[closes.len() - 10..]);
            let long_ma = mean(&closes[closes.len() - 30..]);
            let trend = if short_ma >= long_ma { Direction::Up } else { Direction::Down };
            if majority_dir != trend {
                let stricter = anti_trend_required(self.cfg.min_consensus, active);
                if majority_count < stricter {
                    debug!(
                        asset = %asset,
                        majority = majority_count,
                        stricter,
                        "counter-trend consensus below stricter floor"
                    );
                    return None;
                }
            }
        }

        // ── 8. Probability & confidence ──────────────────────────────────
        let (lo, hi) = timeframe.prob_clamp();
        let p_up = (0.5 + score * 0.25).clamp(lo, hi);
        let confidence = score.abs().min(1.0);
        let floor = self.cfg.min_confidence.max(regime.confidence_floor);
        if confidence < floor {
            debug!(asset = %asset, confidence, floor, "confidence below regime floor");
            return None;
        }

        // ── 9. Fee-aware edge ────────────────────────────────────────────
        let (edge_up, edge_down) = compute_edges(p_up, implied_up, timeframe);
        let min_edge = self.cfg.min_edge * regime.edge_multiplier;
        let (best_dir, best_edge) = if edge_up >= edge_down {
            (Direction::Up, edge_up)
        } else {
            (Direction::Down, edge_down)
        };
        if best_edge < min_edge {
            debug!(asset = %asset, edge = best_edge, min_edge, "edge below floor");
            return None;
        }

        // ── 10. Emit ─────────────────────────────────────────────────────
        let (probability, token_id) = match best_dir {
            Direction::Up => (p_up, up_token.to_string()),
            Direction::Down => (1.0 - p_up, down_token.to_string()),
        };

        let flat_votes: BTreeMap<IndicatorKind, Direction> =
            votes.iter().map(|(k, v)| (*k, v.direction)).collect();

        Some(Signal {
            asset,
            timeframe,
            direction: best_dir,
            probability,
            edge: best_edge,
            confidence,
            token_id,
            atr_value,
            indicator_votes: flat_votes,
        })
    }
}

/// Consensus floor for the majority direction: the configured minimum or
/// 70% of the active votes, whichever is larger, capped to [3, 7].
pub fn consensus_required(cfg_min: usize, active: usize) -> usize {
    let seventy_pct = (0.7 * active as f64).ceil() as usize;
    cfg_min.max(seventy_pct).clamp(3, 7)
}

/// Stricter floor applied when the majority fights the local trend.
pub fn anti_trend_required(cfg_min: usize, active: usize) -> usize {
    let seventy_pct = (0.7 * active as f64).ceil() as usize;
    (cfg_min + 2).max(seventy_pct)
}

/// Post-fee edge for both directions against the market's implied UP price.
/// An absent or degenerate implied price falls back to the 0.5 reference.
pub fn compute_edges(p_up: f64, implied_up: Option<f64>, timeframe: Timeframe) -> (f64, f64) {
    let implied = match implied_up {
        Some(p) if p > 0.01 && p < 0.99 => p,
        _ => 0.5,
    };
    let fee = fee_estimate(timeframe, implied);
    let edge_up = p_up - implied - fee;
    let edge_down = (1.0 - p_up) - (1.0 - implied) - fee;
    (edge_up, edge_down)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}
