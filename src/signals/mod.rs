// =============================================================================
// Signals — the ensemble output type, the engine, and the fee model
// =============================================================================

pub mod engine;
pub mod fees;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorKind;
use crate::types::{Asset, Direction, Timeframe};

/// A fully gated trading signal emitted by the ensemble engine.
///
/// Consumed once by the conviction engine and the executor, or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub asset: Asset,
    pub timeframe: Timeframe,
    pub direction: Direction,
    /// Our probability for `direction`, inside the timeframe clamp.
    pub probability: f64,
    /// Post-fee edge over the market's implied price.
    pub edge: f64,
    /// Ensemble confidence, 0–1.
    pub confidence: f64,
    /// Outcome token to buy for `direction`.
    pub token_id: String,
    /// ATR (fraction of price) at signal time.
    pub atr_value: f64,
    /// Flat map of every active indicator's vote, for downstream learning.
    pub indicator_votes: BTreeMap<IndicatorKind, Direction>,
}

impl Signal {
    /// (up votes, down votes) among the active indicators.
    pub fn vote_counts(&self) -> (usize, usize) {
        let up = self
            .indicator_votes
            .values()
            .filter(|d| **d == Direction::Up)
            .count();
        (up, self.indicator_votes.len() - up)
    }

    /// Number of indicators agreeing with the emitted direction.
    pub fn consensus_count(&self) -> usize {
        self.indicator_votes
            .values()
            .filter(|d| **d == self.direction)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_counting() {
        let mut votes = BTreeMap::new();
        votes.insert(IndicatorKind::Rsi, Direction::Down);
        votes.insert(IndicatorKind::Macd, Direction::Up);
        votes.insert(IndicatorKind::Momentum, Direction::Up);
        let sig = Signal {
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M5,
            direction: Direction::Up,
            probability: 0.6,
            edge: 0.1,
            confidence: 0.5,
            token_id: "tok".into(),
            atr_value: 0.001,
            indicator_votes: votes,
        };
        assert_eq!(sig.vote_counts(), (2, 1));
        assert_eq!(sig.consensus_count(), 2);
    }
}
