// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free vote functions over candle/close slices. Every
// indicator returns `Option<IndicatorVote>`: `None` means either
// insufficient history or a neutral reading. Not voting is semantically
// different from voting with low confidence — it shrinks the denominator of
// the consensus fraction downstream.

pub mod arb;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod flow;
pub mod heikin_ashi;
pub mod macd;
pub mod momentum;
pub mod rsi;
pub mod sentiment;
pub mod volume;
pub mod vwap;

use serde::{Deserialize, Serialize};

use crate::types::{Direction, Timeframe};

/// A single directional vote from one indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorVote {
    pub direction: Direction,
    /// 0.0 – 1.0.
    pub confidence: f64,
    /// Underlying numeric reading, for logging.
    pub raw_value: f64,
}

impl IndicatorVote {
    pub fn new(direction: Direction, confidence: f64, raw_value: f64) -> Self {
        Self {
            direction,
            confidence: confidence.clamp(0.0, 1.0),
            raw_value,
        }
    }
}

/// The closed set of voting indicators.
///
/// The ensemble weight map, the learner's accuracy store, and the
/// timeframe-scale table are all keyed by this tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    EmaCross,
    Macd,
    Bollinger,
    Vwap,
    Momentum,
    HeikinAshi,
    VolumeSpike,
    OrderFlow,
    SpotDepth,
    Liquidity,
    TemporalArb,
    PriceDivergence,
    FearGreed,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 14] = [
        IndicatorKind::Rsi,
        IndicatorKind::EmaCross,
        IndicatorKind::Macd,
        IndicatorKind::Bollinger,
        IndicatorKind::Vwap,
        IndicatorKind::Momentum,
        IndicatorKind::HeikinAshi,
        IndicatorKind::VolumeSpike,
        IndicatorKind::OrderFlow,
        IndicatorKind::SpotDepth,
        IndicatorKind::Liquidity,
        IndicatorKind::TemporalArb,
        IndicatorKind::PriceDivergence,
        IndicatorKind::FearGreed,
    ];

    /// Stable name used in the accuracy store and the trade log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsi => "rsi",
            Self::EmaCross => "ema_cross",
            Self::Macd => "macd",
            Self::Bollinger => "bollinger",
            Self::Vwap => "vwap",
            Self::Momentum => "momentum",
            Self::HeikinAshi => "heikin_ashi",
            Self::VolumeSpike => "volume_spike",
            Self::OrderFlow => "order_flow",
            Self::SpotDepth => "spot_depth",
            Self::Liquidity => "liquidity",
            Self::TemporalArb => "temporal_arb",
            Self::PriceDivergence => "price_divergence",
            Self::FearGreed => "fear_greed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Base ensemble weight before accuracy adjustment. Temporal arbitrage is
    /// the highest-weighted single indicator in the system.
    pub fn base_weight(&self) -> f64 {
        match self {
            Self::TemporalArb => 3.0,
            Self::PriceDivergence => 1.5,
            Self::OrderFlow => 1.5,
            Self::Macd => 1.5,
            Self::Rsi => 1.2,
            Self::EmaCross => 1.2,
            Self::Momentum => 1.2,
            Self::Bollinger => 1.0,
            Self::Vwap => 1.0,
            Self::VolumeSpike => 1.0,
            Self::HeikinAshi => 0.8,
            Self::SpotDepth => 0.8,
            Self::Liquidity => 0.8,
            Self::FearGreed => 0.6,
        }
    }

    /// Timeframe scaling applied on top of the (dynamic) base weight.
    ///
    /// Short windows reward fast microstructure reads and punish slow trend
    /// indicators; long windows invert that. Temporal arbitrage never fires
    /// past 15m, so its long-window scale is zero.
    pub fn tf_scale(&self, timeframe: Timeframe) -> f64 {
        use IndicatorKind::*;
        use Timeframe::*;
        match (self, timeframe) {
            (TemporalArb, M5) => 1.5,
            (TemporalArb, M15) => 1.2,
            (TemporalArb, H1 | H4) => 0.0,

            (PriceDivergence, M5) => 1.3,
            (PriceDivergence, M15) => 1.1,
            (PriceDivergence, H1 | H4) => 0.8,

            (OrderFlow, M5) => 1.2,
            (OrderFlow, M15) => 1.0,
            (OrderFlow, H1) => 0.9,
            (OrderFlow, H4) => 0.8,

            (Macd, M5) => 0.7,
            (Macd, M15) => 1.0,
            (Macd, H1) => 1.2,
            (Macd, H4) => 1.3,

            (EmaCross, M5) => 0.8,
            (EmaCross, M15) => 1.0,
            (EmaCross, H1) => 1.2,
            (EmaCross, H4) => 1.3,

            (Vwap, M5) => 0.8,
            (Vwap, M15) => 1.0,
            (Vwap, H1) => 1.1,
            (Vwap, H4) => 1.2,

            (FearGreed, M5) => 0.5,
            (FearGreed, M15) => 0.7,
            (FearGreed, H1) => 1.0,
            (FearGreed, H4) => 1.2,

            (HeikinAshi, M5) => 0.8,
            (VolumeSpike, M5) => 1.1,
            (VolumeSpike, H4) => 0.9,
            (Momentum, M5) => 0.9,
            (Bollinger, M5) => 0.9,

            _ => 1.0,
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Timeframe-specific indicator parameters
// =============================================================================

/// Indicator look-back parameters, tuned per timeframe. Short windows use
/// faster periods; long windows need more history.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub mom_short: usize,
    pub mom_long: usize,
    pub volume_lookback: usize,
    pub volume_threshold: f64,
}

impl IndicatorParams {
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::M5 => Self {
                rsi_period: 7,
                macd_fast: 6,
                macd_slow: 12,
                macd_signal: 6,
                ema_fast: 5,
                ema_slow: 13,
                bb_period: 10,
                bb_std: 2.0,
                mom_short: 5,
                mom_long: 15,
                volume_lookback: 20,
                volume_threshold: 2.0,
            },
            Timeframe::M15 => Self {
                rsi_period: 14,
                macd_fast: 12,
                macd_slow: 26,
                macd_signal: 9,
                ema_fast: 8,
                ema_slow: 21,
                bb_period: 20,
                bb_std: 2.0,
                mom_short: 8,
                mom_long: 30,
                volume_lookback: 20,
                volume_threshold: 2.0,
            },
            Timeframe::H1 => Self {
                rsi_period: 21,
                macd_fast: 12,
                macd_slow: 26,
                macd_signal: 9,
                ema_fast: 12,
                ema_slow: 26,
                bb_period: 20,
                bb_std: 2.0,
                mom_short: 10,
                mom_long: 40,
                volume_lookback: 20,
                volume_threshold: 2.0,
            },
            Timeframe::H4 => Self {
                rsi_period: 28,
                macd_fast: 24,
                macd_slow: 52,
                macd_signal: 18,
                ema_fast: 20,
                ema_slow: 50,
                bb_period: 40,
                bb_std: 2.0,
                mom_short: 15,
                mom_long: 60,
                volume_lookback: 20,
                volume_threshold: 2.0,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_roundtrip() {
        for kind in IndicatorKind::ALL {
            assert_eq!(IndicatorKind::from_str_opt(kind.as_str()), Some(kind));
        }
        assert_eq!(IndicatorKind::from_str_opt("astrology"), None);
    }

    #[test]
    fn temporal_arb_is_highest_weighted() {
        for kind in IndicatorKind::ALL {
            if kind != IndicatorKind::TemporalArb {
                assert!(kind.base_weight() < IndicatorKind::TemporalArb.base_weight());
            }
        }
    }

    #[test]
    fn temporal_arb_disabled_on_long_windows() {
        assert_eq!(IndicatorKind::TemporalArb.tf_scale(Timeframe::H1), 0.0);
        assert_eq!(IndicatorKind::TemporalArb.tf_scale(Timeframe::H4), 0.0);
        assert!(IndicatorKind::TemporalArb.tf_scale(Timeframe::M5) > 1.0);
    }

    #[test]
    fn slow_indicators_deemphasized_on_short_windows() {
        assert!(IndicatorKind::Macd.tf_scale(Timeframe::M5) < 1.0);
        assert!(IndicatorKind::Macd.tf_scale(Timeframe::H4) > 1.0);
        assert!(IndicatorKind::EmaCross.tf_scale(Timeframe::M5) < 1.0);
    }

    #[test]
    fn params_get_faster_on_short_windows() {
        let p5 = IndicatorParams::for_timeframe(Timeframe::M5);
        let p4h = IndicatorParams::for_timeframe(Timeframe::H4);
        assert!(p5.rsi_period < p4h.rsi_period);
        assert!(p5.macd_slow < p4h.macd_slow);
        assert!(p5.mom_long < p4h.mom_long);
    }

    #[test]
    fn vote_confidence_is_clamped() {
        let v = IndicatorVote::new(Direction::Up, 3.5, 1.0);
        assert_eq!(v.confidence, 1.0);
        let v = IndicatorVote::new(Direction::Down, -0.2, 1.0);
        assert_eq!(v.confidence, 0.0);
    }
}
