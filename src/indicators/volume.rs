// =============================================================================
// Volume Spike — unusual volume with the current candle's direction
// =============================================================================
//
// Fires when the latest candle's volume exceeds `threshold` times the mean
// of the previous `lookback` candles. Direction comes from the candle's
// open→close sign; confidence grows with the overshoot ratio.
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::market_data::Candle;
use crate::types::Direction;

pub fn vote(candles: &[Candle], threshold: f64, lookback: usize) -> Option<IndicatorVote> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }

    let history = &candles[candles.len() - (lookback + 1)..candles.len() - 1];
    let avg_vol = history.iter().map(|c| c.volume).sum::<f64>() / lookback as f64;
    if avg_vol <= 0.0 || !avg_vol.is_finite() {
        return None;
    }

    let current = candles.last()?;
    if current.volume <= avg_vol * threshold {
        return None;
    }

    let direction = if current.close > current.open {
        Direction::Up
    } else {
        Direction::Down
    };
    let ratio = current.volume / avg_vol;
    let conf = ((ratio - 1.0) / 3.0).min(1.0);
    Some(IndicatorVote::new(direction, conf, ratio))
}
