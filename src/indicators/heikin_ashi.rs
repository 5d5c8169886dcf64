// =============================================================================
// Heikin Ashi — smoothed-candle streak vote
// =============================================================================
//
// HA close = (O + H + L + C) / 4; HA open = midpoint of the previous HA
// open/close. The vote reads the length of the current monotone streak of
// HA candles: a streak below 2 carries no information and abstains.
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::market_data::Candle;
use crate::types::Direction;

const MIN_CANDLES: usize = 10;
const MIN_STREAK: usize = 2;

pub fn vote(candles: &[Candle]) -> Option<IndicatorVote> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let mut ha_opens = Vec::with_capacity(candles.len());
    let mut ha_closes = Vec::with_capacity(candles.len());

    let c0 = &candles[0];
    ha_opens.push((c0.open + c0.close) / 2.0);
    ha_closes.push((c0.open + c0.high + c0.low + c0.close) / 4.0);

    for c in &candles[1..] {
        let ha_close = (c.open + c.high + c.low + c.close) / 4.0;
        let ha_open = (ha_opens.last().unwrap() + ha_closes.last().unwrap()) / 2.0;
        ha_opens.push(ha_open);
        ha_closes.push(ha_close);
    }

    // Walk backwards counting the unbroken directional streak.
    let mut bullish = 0usize;
    let mut bearish = 0usize;
    for i in (0..ha_closes.len()).rev() {
        if ha_closes[i] > ha_opens[i] {
            if bearish > 0 {
                break;
            }
            bullish += 1;
        } else if ha_closes[i] < ha_opens[i] {
            if bullish > 0 {
                break;
            }
            bearish += 1;
        } else {
            break;
        }
    }

    let streak = bullish.max(bearish);
    if streak < MIN_STREAK {
        return None;
    }

    let direction = if bullish > bearish { Direction::Up } else { Direction::Down };
    let conf = (streak as f64 / 5.0).min(1.0);
    let raw = if direction == Direction::Up {
        streak as f64
    } else {
        -(streak as f64)
    };
    Some(IndicatorVote::new(direction, conf, raw))
}
