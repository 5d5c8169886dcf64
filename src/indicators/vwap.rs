// =============================================================================
// VWAP — volume-weighted average price gap vote
// =============================================================================
//
// VWAP = Σ(typical_price · volume) / Σ(volume) over the supplied candles,
// with typical_price = (high + low + close) / 3. Close above VWAP => UP,
// below => DOWN; confidence scales with the relative gap.
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::market_data::Candle;
use crate::types::Direction;

/// Minimum candles for a meaningful volume-weighted average.
const MIN_CANDLES: usize = 10;

pub fn vote(candles: &[Candle]) -> Option<IndicatorVote> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let mut total_vp = 0.0;
    let mut total_vol = 0.0;
    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        total_vp += typical * c.volume;
        total_vol += c.volume;
    }
    if total_vol == 0.0 {
        return None;
    }

    let vwap = total_vp / total_vol;
    if vwap <= 0.0 || !vwap.is_finite() {
        return None;
    }

    let price = candles.last()?.close;
    let diff = (price - vwap) / vwap;

    let direction = if diff > 0.0 { Direction::Up } else { Direction::Down };
    let conf = (diff.abs() * 100.0).min(1.0);
    Some(IndicatorVote::new(direction, conf, vwap))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        }
    }

    #[test]
    fn insufficient_data_abstains() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(i * 60, 100.0, 1.0)).collect();
        assert!(vote(&candles).is_none());
    }

    #[test]
    fn zero_volume_abstains() {
        let candles: Vec<Candle> = (0..15).map(|i| candle(i * 60, 100.0, 0.0)).collect();
        assert!(vote(&candles).is_none());
    }

    #[test]
    fn close_above_vwap_votes_up() {
        let mut candles: Vec<Candle> = (0..14).map(|i| candle(i * 60, 100.0, 10.0)).collect();
        candles.push(candle(14 * 60, 105.0, 1.0));
        let v = vote(&candles).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.raw_value > 99.0 && v.raw_value < 101.0);
    }

    #[test]
    fn close_below_vwap_votes_down() {
        let mut candles: Vec<Candle> = (0..14).map(|i| candle(i * 60, 100.0, 10.0)).collect();
        candles.push(candle(14 * 60, 95.0, 1.0));
        let v = vote(&candles).expect("should vote");
        assert_eq!(v.direction, Direction::Down);
    }

    #[test]
    fn heavy_volume_dominates_the_average() {
        // One huge candle at 200 drags VWAP far above the rest.
        let mut candles: Vec<Candle> = (0..14).map(|i| candle(i * 60, 100.0, 1.0)).collect();
        candles.push(candle(14 * 60, 200.0, 1000.0));
        let v = vote(&candles).expect("should vote");
        // VWAP sits near 200; latest close equals 200 and is above it only
        // barely — direction follows the small residual gap, confidence low.
        assert!(v.raw_value > 190.0);
    }
}
