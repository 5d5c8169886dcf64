// =============================================================================
// Fear & Greed — contrarian sentiment vote
// =============================================================================
//
// Pure function of the cached index value (the fetch lives in the regime
// detector; this module never touches the network):
//   0–24   extreme fear  => UP, strong
//   25–44  fear          => UP, weak (confidence floored at 0.1)
//   45–55  neutral       => no vote
//   56–74  greed         => DOWN, weak (floored at 0.1)
//   75–100 extreme greed => DOWN, strong
// =============================================================================

use crate::indicators::IndicatorVote;
use crate::types::Direction;

pub fn vote(fng_value: u32) -> Option<IndicatorVote> {
    let fng = fng_value.min(100);
    let raw = fng as f64;

    if fng <= 24 {
        let conf = (25.0 - raw) / 25.0;
        Some(IndicatorVote::new(Direction::Up, conf.min(1.0), raw))
    } else if fng <= 44 {
        let conf = ((45.0 - raw) / 45.0 * 0.5).max(0.1);
        Some(IndicatorVote::new(Direction::Up, conf, raw))
    } else if fng >= 75 {
        let conf = (raw - 74.0) / 26.0;
        Some(IndicatorVote::new(Direction::Down, conf.min(1.0), raw))
    } else if fng >= 56 {
        let conf = ((raw - 55.0) / 45.0 * 0.5).max(0.1);
        Some(IndicatorVote::new(Direction::Down, conf, raw))
    } else {
        None
    }
}
