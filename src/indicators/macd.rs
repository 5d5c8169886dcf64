// =============================================================================
// MACD — EMA(fast) − EMA(slow) with a signal-line crossover boost
// =============================================================================
//
// histogram = macd_line − EMA(macd_line, signal_period)
//
// Vote from the histogram sign; confidence scales with its magnitude
// normalised to price, with a +0.3 boost when the histogram just flipped
// sign (a fresh crossover).
// =============================================================================

use crate::indicators::ema::ema_series;
use crate::indicators::IndicatorVote;
use crate::types::Direction;

pub fn vote(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<IndicatorVote> {
    if closes.len() < slow + signal_period {
        return None;
    }
    let last_close = *closes.last()?;
    if last_close <= 0.0 {
        return None;
    }

    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd_line, signal_period);

    let n = macd_line.len();
    if n < 2 || signal_line.len() < 2 {
        return None;
    }

    let histogram = macd_line[n - 1] - signal_line[n - 1];
    let prev_histogram = macd_line[n - 2] - signal_line[n - 2];
    if !histogram.is_finite() || !prev_histogram.is_finite() {
        return None;
    }

    let direction = if histogram > 0.0 { Direction::Up } else { Direction::Down };
    let magnitude = histogram.abs() / last_close * 100.0;
    let mut conf = (magnitude * 20.0).min(1.0);

    // Fresh sign change = crossover; boost.
    if (histogram > 0.0 && prev_histogram <= 0.0) || (histogram < 0.0 && prev_histogram >= 0.0) {
        conf = (conf + 0.3).min(1.0);
    }

    Some(IndicatorVote::new(direction, conf, histogram))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_history_abstains() {
        let closes: Vec<f64> = (0..30).map(|i| i as f64).collect();
        assert!(vote(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn sustained_uptrend_votes_up() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let v = vote(&closes, 12, 26, 9).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.raw_value > 0.0);
    }

    #[test]
    fn sustained_downtrend_votes_down() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64 * 0.5).collect();
        let v = vote(&closes, 12, 26, 9).expect("should vote");
        assert_eq!(v.direction, Direction::Down);
        assert!(v.raw_value < 0.0);
    }

    #[test]
    fn crossover_boosts_confidence() {
        // Long decline followed by a sharp reversal produces a fresh flip
        // near the end; the boosted vote should carry real confidence.
        let mut closes: Vec<f64> = (0..50).map(|i| 200.0 - i as f64).collect();
        closes.extend((0..10).map(|i| 151.0 + i as f64 * 4.0));
        let v = vote(&closes, 6, 12, 6).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.confidence >= 0.3);
    }

    #[test]
    fn flat_series_has_negligible_confidence() {
        let closes = vec![100.0; 60];
        if let Some(v) = vote(&closes, 12, 26, 9) {
            assert!(v.confidence < 0.05);
        }
    }
}
