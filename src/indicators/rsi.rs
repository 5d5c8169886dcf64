// =============================================================================
// Relative Strength Index (RSI) — oversold / overbought vote
// =============================================================================
//
// Step 1 — Price deltas from the last `period + 1` closes.
// Step 2 — Average gain / average loss over those deltas.
// Step 3 — RS = avg_gain / avg_loss, RSI = 100 - 100 / (1 + RS).
//
// Vote: RSI < 30 => UP (oversold), RSI > 70 => DOWN (overbought), otherwise
// no vote. The 30–70 band deliberately abstains rather than voting with low
// confidence. Confidence is linear in the distance from the threshold.
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::types::Direction;

/// Compute the current RSI value over `period` deltas.
///
/// Returns `None` when `period` is zero, history is insufficient, or the
/// result is non-finite.
pub fn rsi_value(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - (period + 1)..];
    let mut sum_gain = 0.0;
    let mut sum_loss = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let avg_gain = sum_gain / period as f64;
    let avg_loss = sum_loss / period as f64;

    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // flat market
    } else if avg_loss == 0.0 {
        100.0 // only gains
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}

/// Directional vote from the current RSI reading.
pub fn vote(closes: &[f64], period: usize) -> Option<IndicatorVote> {
    let rsi = rsi_value(closes, period)?;

    if rsi < 30.0 {
        let conf = (30.0 - rsi) / 30.0;
        Some(IndicatorVote::new(Direction::Up, conf, rsi))
    } else if rsi > 70.0 {
        let conf = (rsi - 70.0) / 30.0;
        Some(IndicatorVote::new(Direction::Down, conf, rsi))
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_is_none() {
        assert!(rsi_value(&[], 14).is_none());
        assert!(rsi_value(&[1.0; 14], 14).is_none());
        assert!(rsi_value(&[1.0, 2.0, 3.0], 0).is_none());
    }

    #[test]
    fn all_gains_is_overbought() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let v = vote(&closes, 14).expect("should vote");
        assert_eq!(v.direction, Direction::Down);
        assert!((v.raw_value - 100.0).abs() < 1e-9);
        assert!((v.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn all_losses_is_oversold() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let v = vote(&closes, 14).expect("should vote");
        assert_eq!(v.direction, Direction::Up);
        assert!(v.raw_value.abs() < 1e-9);
        assert!((v.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn flat_market_abstains() {
        let closes = vec![100.0; 30];
        assert_eq!(rsi_value(&closes, 14), Some(50.0));
        assert!(vote(&closes, 14).is_none());
    }

    #[test]
    fn neutral_band_abstains() {
        // Mildly mixed moves land inside 30–70 and must not vote.
        let closes = vec![
            100.0, 100.5, 100.2, 100.8, 100.4, 101.0, 100.7, 101.2, 100.9, 101.3, 101.0, 101.5,
            101.2, 101.6, 101.4,
        ];
        let rsi = rsi_value(&closes, 14).unwrap();
        assert!((30.0..=70.0).contains(&rsi));
        assert!(vote(&closes, 14).is_none());
    }

    #[test]
    fn rsi_always_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let rsi = rsi_value(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&rsi));
    }
}
