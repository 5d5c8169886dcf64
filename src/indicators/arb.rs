// =============================================================================
// Temporal arbitrage & price divergence — spot tape vs market implied price
// =============================================================================
//
// Both indicators exploit the same lag: the spot tape moves first, the
// prediction market reprices later. Temporal arb is the sharper version —
// it fires only on short windows where a confirmed spot move and a still-
// centred implied price is close to free money. Price divergence is the
// softer read that also works without implied data.
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::types::{Direction, Timeframe};

/// Spot moved but the market's implied probability hasn't caught up.
///
/// Short timeframes only: past 15m the window is long enough for the market
/// to reprice, and the edge evaporates.
pub fn temporal_arb(
    current_price: f64,
    price_3m_ago: Option<f64>,
    implied_up: Option<f64>,
    timeframe: Timeframe,
) -> Option<IndicatorVote> {
    if !matches!(timeframe, Timeframe::M5 | Timeframe::M15) {
        return None;
    }
    let prev = price_3m_ago?;
    if prev <= 0.0 || current_price <= 0.0 {
        return None;
    }

    let pct_move = (current_price - prev) / prev;
    if pct_move.abs() < 0.001 {
        return None;
    }

    // Market still near 50/50 while spot already moved: high-confidence arb.
    if let Some(implied) = implied_up {
        if (implied - 0.5).abs() < 0.08 {
            let direction = if pct_move > 0.0 { Direction::Up } else { Direction::Down };
            let conf = (pct_move.abs() * 400.0).min(0.95);
            return Some(IndicatorVote::new(direction, conf, pct_move * 100.0));
        }
    }

    // No implied data (or already repriced): a large spot move still informs.
    if pct_move.abs() > 0.002 {
        let direction = if pct_move > 0.0 { Direction::Up } else { Direction::Down };
        let conf = (pct_move.abs() * 200.0).min(0.8);
        return Some(IndicatorVote::new(direction, conf, pct_move * 100.0));
    }

    None
}

/// Spot momentum diverging from the market's implied lean.
pub fn price_divergence(
    spot_price: f64,
    price_3m_ago: Option<f64>,
    implied_up: Option<f64>,
) -> Option<IndicatorVote> {
    let prev = price_3m_ago?;
    if spot_price <= 0.0 || prev <= 0.0 {
        return None;
    }

    let pct_change = (spot_price - prev) / prev;

    if let Some(implied) = implied_up {
        if implied > 0.01 && implied < 0.99 && pct_change.abs() > 0.0005 {
            // How far the market already leans (-1..+1) vs how far spot moved.
            let poly_lean = (implied - 0.5) * 2.0;
            let move_size = pct_change.abs() * 100.0;
            let gap = move_size - poly_lean.abs() * 5.0;
            if gap > 0.0 {
                let direction = if pct_change > 0.0 { Direction::Up } else { Direction::Down };
                let conf = (gap * 0.4).min(0.9);
                return Some(IndicatorVote::new(direction, conf, pct_change * 100.0));
            }
        }
    }

    // Fallback: pure spot momentum when it is significant.
    if pct_change.abs() > 0.001 {
        let direction = if pct_change > 0.0 { Direction::Up } else { Direction::Down };
        let conf = (pct_change.abs() * 200.0).min(0.7);
        return Some(IndicatorVote::new(direction, conf, pct_change * 100.0));
    }

    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_arb_short_timeframes_only() {
        let v = temporal_arb(100.3, Some(100.0), Some(0.50), Timeframe::H1);
        assert!(v.is_none());
        let v = temporal_arb(100.3, Some(100.0), Some(0.50), Timeframe::H4);
        assert!(v.is_none());
    }

    #[test]
    fn temporal_arb_fires_when_market_lags() {
        // +0.3% spot move with implied still at 0.50.
        let v = temporal_arb(100.3, Some(100.0), Some(0.50), Timeframe::M5).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.confidence > 0.9); // 0.003 * 400 = 1.2, capped to 0.95
    }

    #[test]
    fn temporal_arb_small_move_abstains() {
        assert!(temporal_arb(100.05, Some(100.0), Some(0.50), Timeframe::M5).is_none());
    }

    #[test]
    fn temporal_arb_repriced_market_needs_bigger_move() {
        // Implied already at 0.70: the 0.15% move is not enough.
        assert!(temporal_arb(100.15, Some(100.0), Some(0.70), Timeframe::M5).is_none());
        // But a 0.3% move still counts at reduced confidence.
        let v = temporal_arb(99.7, Some(100.0), Some(0.70), Timeframe::M5).expect("should vote");
        assert_eq!(v.direction, Direction::Down);
        assert!(v.confidence <= 0.8);
    }

    #[test]
    fn temporal_arb_missing_history_abstains() {
        assert!(temporal_arb(100.0, None, Some(0.5), Timeframe::M5).is_none());
        assert!(temporal_arb(100.0, Some(0.0), Some(0.5), Timeframe::M5).is_none());
    }

    #[test]
    fn divergence_fires_on_unpriced_move() {
        // Spot +0.2%, market flat at 0.50: gap = 0.2 - 0 = 0.2.
        let v = price_divergence(100.2, Some(100.0), Some(0.50)).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!((v.confidence - 0.08).abs() < 1e-9);
    }

    #[test]
    fn divergence_suppressed_when_market_already_leans() {
        // Market leans heavily (0.80 => lean 0.6, penalty 3.0) vs a 0.2% move
        // => gap negative, falls through to the momentum fallback.
        let v = price_divergence(100.2, Some(100.0), Some(0.80)).expect("fallback momentum");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.confidence <= 0.7);
    }

    #[test]
    fn divergence_no_data_no_move_abstains() {
        assert!(price_divergence(100.0, None, None).is_none());
        assert!(price_divergence(100.05, Some(100.0), None).is_none());
    }
}
