// =============================================================================
// Exponential Moving Average — series helper + fast/slow crossover vote
// =============================================================================
//
// EMA_0 = first value; EMA_t = alpha * x_t + (1 - alpha) * EMA_{t-1}
// with alpha = 2 / (span + 1).
//
// Crossover vote: fast EMA above slow => UP, below => DOWN. Confidence
// scales with the relative gap between the two averages.
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::types::Direction;

/// Full EMA series over `data` for the given `span`. Empty input or zero
/// span yields an empty series.
pub fn ema_series(data: &[f64], span: usize) -> Vec<f64> {
    if data.is_empty() || span == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(data.len());
    let mut ema = data[0];
    out.push(ema);
    for &x in &data[1..] {
        ema = alpha * x + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Latest EMA value for `span`, or None on insufficient data.
pub fn ema_last(data: &[f64], span: usize) -> Option<f64> {
    ema_series(data, span).last().copied()
}

/// Fast/slow EMA crossover vote.
///
/// Needs `slow + 5` closes so the slow average has settled. Returns `None`
/// on insufficient history or a degenerate (zero) slow average.
pub fn vote(closes: &[f64], fast: usize, slow: usize) -> Option<IndicatorVote> {
    if closes.len() < slow + 5 {
        return None;
    }

    let fast_ema = ema_last(closes, fast)?;
    let slow_ema = ema_last(closes, slow)?;
    if slow_ema == 0.0 {
        return None;
    }

    let gap = (fast_ema - slow_ema) / slow_ema;
    if !gap.is_finite() {
        return None;
    }

    let direction = if gap > 0.0 { Direction::Up } else { Direction::Down };
    let conf = (gap.abs() * 100.0).min(1.0);
    Some(IndicatorVote::new(direction, conf, gap * 100.0))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_edge_cases() {
        assert!(ema_series(&[], 10).is_empty());
        assert!(ema_series(&[1.0, 2.0], 0).is_empty());
        assert_eq!(ema_series(&[5.0], 10), vec![5.0]);
    }

    #[test]
    fn constant_series_is_constant() {
        let series = ema_series(&[42.0; 20], 5);
        for v in series {
            assert!((v - 42.0).abs() < 1e-9);
        }
    }

    #[test]
    fn ema_tracks_trend() {
        let data: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let series = ema_series(&data, 10);
        // Strictly increasing input => strictly increasing EMA, lagging below.
        for pair in series.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert!(series.last().unwrap() < &49.0);
    }

    #[test]
    fn uptrend_votes_up() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let v = vote(&closes, 8, 21).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.confidence > 0.0);
    }

    #[test]
    fn downtrend_votes_down() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let v = vote(&closes, 8, 21).expect("should vote");
        assert_eq!(v.direction, Direction::Down);
    }

    #[test]
    fn insufficient_history_abstains() {
        let closes: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert!(vote(&closes, 8, 21).is_none());
    }
}
