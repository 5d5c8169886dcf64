// =============================================================================
// Average True Range — volatility filter (not a vote)
// =============================================================================
//
// TR = max(H − L, |H − prevClose|, |L − prevClose|); ATR is the mean of the
// last `period` TR values, expressed as a fraction of the latest close so
// it is comparable across assets. The signal engine refuses to trade below
// a minimum ATR (flat tape => coin-flip outcomes) and the conviction engine
// reads it as the volatility-clarity input.
// =============================================================================

use crate::market_data::Candle;

/// ATR as a fraction of the current price.
///
/// Returns `None` when `period` is zero, there are fewer than `period + 1`
/// candles, the latest close is non-positive, or any value is non-finite.
pub fn atr_fraction(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut trs: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let c = &candles[i];
        let prev_close = candles[i - 1].close;
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        trs.push(tr);
    }

    let window = &trs[trs.len() - period..];
    let atr = window.iter().sum::<f64>() / period as f64;

    let price = candles.last()?.close;
    if price <= 0.0 || !atr.is_finite() {
        return None;
    }

    let frac = atr / price;
    frac.is_finite().then_some(frac)
}
