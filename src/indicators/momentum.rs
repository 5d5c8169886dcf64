// =============================================================================
// Momentum — short SMA vs long SMA gap vote
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::types::Direction;

/// Short-window average above the long-window average => UP, below => DOWN.
/// Confidence scales with the relative gap (50x multiplier caps near 2%).
pub fn vote(closes: &[f64], short_window: usize, long_window: usize) -> Option<IndicatorVote> {
    if short_window == 0 || long_window == 0 || closes.len() < long_window {
        return None;
    }

    let short_avg =
        closes[closes.len() - short_window..].iter().sum::<f64>() / short_window as f64;
    let long_avg = closes[closes.len() - long_window..].iter().sum::<f64>() / long_window as f64;
    if long_avg == 0.0 {
        return None;
    }

    let mom = (short_avg - long_avg) / long_avg;
    if !mom.is_finite() {
        return None;
    }

    let direction = if mom > 0.0 { Direction::Up } else { Direction::Down };
    let conf = (mom.abs() * 50.0).min(1.0);
    Some(IndicatorVote::new(direction, conf, mom * 100.0))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_history_abstains() {
        let closes: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert!(vote(&closes, 8, 30).is_none());
        assert!(vote(&closes, 0, 10).is_none());
    }

    #[test]
    fn rising_prices_vote_up() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let v = vote(&closes, 8, 30).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.confidence > 0.0);
        assert!(v.raw_value > 0.0);
    }

    #[test]
    fn falling_prices_vote_down() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let v = vote(&closes, 8, 30).expect("should vote");
        assert_eq!(v.direction, Direction::Down);
    }

    #[test]
    fn confidence_caps_at_one() {
        let closes: Vec<f64> = (0..40).map(|i| 10.0 + (i as f64).powi(2)).collect();
        let v = vote(&closes, 5, 30).expect("should vote");
        assert_eq!(v.confidence, 1.0);
    }
}
