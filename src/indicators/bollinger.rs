// =============================================================================
// Bollinger Bands — band-position vote
// =============================================================================
//
// Bands: SMA ± k·σ over the last `period` closes. The close's normalised
// position inside the band (0 = lower, 1 = upper) votes only in the outer
// fifths: pos < 0.2 => UP, pos > 0.8 => DOWN. Zero standard deviation means
// no information and must abstain rather than produce a biased vote.
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::types::Direction;

pub fn vote(closes: &[f64], period: usize, num_std: f64) -> Option<IndicatorVote> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return None;
    }

    let upper = mean + num_std * std;
    let lower = mean - num_std * std;
    let price = *closes.last()?;

    let band_width = upper - lower;
    let pos = (price - lower) / band_width;
    if !pos.is_finite() {
        return None;
    }

    if pos < 0.2 {
        let conf = (0.2 - pos) / 0.2;
        Some(IndicatorVote::new(Direction::Up, conf, pos))
    } else if pos > 0.8 {
        let conf = (pos - 0.8) / 0.2;
        Some(IndicatorVote::new(Direction::Down, conf, pos))
    } else {
        None
    }
}
