// =============================================================================
// Order flow & book microstructure votes
// =============================================================================
//
// Three related reads of buying vs selling pressure:
//   - order_flow_delta: tick-rule classified volume from the price cache
//   - liquidity_imbalance: Polymarket book depth, damped by a wide spread
//   - spot_depth: exchange top-5 depth imbalance with a 5% noise floor
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::types::Direction;

/// Net buy vs sell volume over a rolling window: `(buy − sell) / (buy + sell)`.
pub fn order_flow_delta(buy_volume: f64, sell_volume: f64) -> Option<IndicatorVote> {
    let total = buy_volume + sell_volume;
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let delta = (buy_volume - sell_volume) / total;
    let direction = if delta > 0.0 { Direction::Up } else { Direction::Down };
    let conf = delta.abs().min(1.0);
    Some(IndicatorVote::new(direction, conf, delta * 100.0))
}

/// Outcome-token book imbalance, scaled down when the spread is wide
/// (a wide spread means the depth numbers are less actionable).
pub fn liquidity_imbalance(
    total_bid_depth: f64,
    total_ask_depth: f64,
    spread: f64,
) -> Option<IndicatorVote> {
    let total = total_bid_depth + total_ask_depth;
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let imbalance = (total_bid_depth - total_ask_depth) / total;
    let direction = if imbalance > 0.0 { Direction::Up } else { Direction::Down };

    let spread_factor = (1.0 - spread * 10.0).max(0.2);
    let conf = (imbalance.abs() * spread_factor).min(1.0);
    Some(IndicatorVote::new(direction, conf, imbalance * 100.0))
}

/// Exchange spot book depth imbalance over the retained levels.
/// Imbalances under 5% are noise and abstain.
pub fn spot_depth(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Option<IndicatorVote> {
    if bids.is_empty() || asks.is_empty() {
        return None;
    }

    let bid_depth: f64 = bids.iter().map(|(p, q)| p * q).sum();
    let ask_depth: f64 = asks.iter().map(|(p, q)| p * q).sum();
    let total = bid_depth + ask_depth;
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let imbalance = (bid_depth - ask_depth) / total;
    if imbalance.abs() < 0.05 {
        return None;
    }

    let direction = if imbalance > 0.0 { Direction::Up } else { Direction::Down };
    let conf = (imbalance.abs() * 2.0).min(1.0);
    Some(IndicatorVote::new(direction, conf, imbalance * 100.0))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_zero_volume_abstains() {
        assert!(order_flow_delta(0.0, 0.0).is_none());
    }

    #[test]
    fn buy_pressure_votes_up() {
        let v = order_flow_delta(75.0, 25.0).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!((v.confidence - 0.5).abs() < 1e-9);
        assert!((v.raw_value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn sell_pressure_votes_down() {
        let v = order_flow_delta(10.0, 90.0).expect("should vote");
        assert_eq!(v.direction, Direction::Down);
        assert!((v.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn liquidity_spread_damps_confidence() {
        let tight = liquidity_imbalance(800.0, 200.0, 0.01).unwrap();
        let wide = liquidity_imbalance(800.0, 200.0, 0.10).unwrap();
        assert_eq!(tight.direction, Direction::Up);
        assert!(tight.confidence > wide.confidence);
        // The damping factor floors at 0.2.
        assert!((wide.confidence - 0.6 * 0.2).abs() < 1e-9);
    }

    #[test]
    fn liquidity_empty_book_abstains() {
        assert!(liquidity_imbalance(0.0, 0.0, 0.01).is_none());
    }

    #[test]
    fn spot_depth_noise_floor() {
        // 52/48 split is under the 5% floor.
        assert!(spot_depth(&[(100.0, 0.52)], &[(100.0, 0.48)]).is_none());
        let v = spot_depth(&[(100.0, 2.0)], &[(100.0, 1.0)]).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
    }

    #[test]
    fn spot_depth_one_sided_book_abstains() {
        assert!(spot_depth(&[], &[(100.0, 1.0)]).is_none());
        assert!(spot_depth(&[(100.0, 1.0)], &[]).is_none());
    }
}
