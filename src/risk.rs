// =============================================================================
// Position Tracker & Risk Gate
// =============================================================================
//
// In-memory book of open positions, indexed by order id and queryable by
// market. The risk gate runs before every placement:
//
//   edge >= minimum  AND  open count < cap  AND  exposure + size <= cap
//   AND no existing position in the same market
//
// A per-market cooldown map prevents re-entry flapping after a trade or an
// order rejection.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::signals::Signal;
use crate::types::{Asset, Direction, Strategy, Timeframe};

/// One open position (or resting order) on an outcome token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub token_id: String,
    pub direction: Direction,
    pub size_usd: f64,
    /// Entry price in (0.01, 0.99).
    pub entry_price: f64,
    pub order_id: String,
    /// Unix seconds.
    pub opened_at: i64,
    #[serde(default)]
    pub strategy: Strategy,
    pub timeframe: Timeframe,
    pub asset: Asset,
}

impl Position {
    /// Shares held: stake over entry price.
    pub fn shares(&self) -> f64 {
        self.size_usd / self.entry_price
    }
}

/// Thread-safe in-memory tracker of open positions.
#[derive(Default)]
pub struct PositionTracker {
    positions: RwLock<HashMap<String, Position>>,
    /// market_id -> last trade/rejection unix time.
    cooldowns: RwLock<HashMap<String, i64>>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pos: Position) {
        info!(
            direction = %pos.direction,
            token = &pos.token_id[..pos.token_id.len().min(16)],
            size_usd = pos.size_usd,
            entry_price = pos.entry_price,
            order_id = %pos.order_id,
            "position opened"
        );
        self.positions.write().insert(pos.order_id.clone(), pos);
    }

    pub fn remove(&self, order_id: &str) -> Option<Position> {
        let removed = self.positions.write().remove(order_id);
        if removed.is_some() {
            info!(order_id, "position closed");
        }
        removed
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn total_exposure(&self) -> f64 {
        self.positions.read().values().map(|p| p.size_usd).sum()
    }

    pub fn count(&self) -> usize {
        self.positions.read().len()
    }

    pub fn has_position_for_market(&self, market_id: &str) -> bool {
        self.positions
            .read()
            .values()
            .any(|p| p.market_id == market_id)
    }

    // -------------------------------------------------------------------------
    // Cooldowns
    // -------------------------------------------------------------------------

    /// Stamp a market's cooldown (after a trade or an order rejection).
    pub fn set_cooldown(&self, market_id: &str, now: i64) {
        self.cooldowns.write().insert(market_id.to_string(), now);
    }

    /// True while the market is still cooling down.
    pub fn in_cooldown(&self, market_id: &str, now: i64, cooldown_secs: i64) -> bool {
        self.cooldowns
            .read()
            .get(market_id)
            .is_some_and(|last| now - last < cooldown_secs)
    }

    /// Drop cooldown entries older than `max_age_secs` to bound the map.
    pub fn prune_cooldowns(&self, now: i64, max_age_secs: i64) {
        self.cooldowns
            .write()
            .retain(|_, last| now - *last <= max_age_secs);
    }
}

/// Risk limits consulted by the gate.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub min_edge: f64,
    pub max_concurrent: usize,
    pub max_exposure_usd: f64,
    pub order_size_usd: f64,
}

/// Gate a prospective trade on the risk limits.
///
/// Returns `(true, "ok")` when the trade may proceed, otherwise the reason
/// for refusal. Refusals are reported, never raised.
pub fn check_risk(
    limits: &RiskLimits,
    signal: &Signal,
    tracker: &PositionTracker,
    market_id: &str,
) -> (bool, String) {
    if signal.edge < limits.min_edge {
        return (
            false,
            format!("edge {:.3} below minimum {:.3}", signal.edge, limits.min_edge),
        );
    }

    if tracker.count() >= limits.max_concurrent {
        return (
            false,
            format!("max concurrent positions reached ({})", limits.max_concurrent),
        );
    }

    let new_exposure = tracker.total_exposure() + limits.order_size_usd;
    if new_exposure > limits.max_exposure_usd {
        return (
            false,
            format!(
                "would exceed max exposure: ${:.2} > ${:.2}",
                new_exposure, limits.max_exposure_usd
            ),
        );
    }

    if tracker.has_position_for_market(market_id) {
        return (false, format!("already have position in market {market_id}"));
    }

    info!(
        edge = signal.edge,
        positions = tracker.count(),
        max = limits.max_concurrent,
        exposure = tracker.total_exposure(),
        "risk check passed"
    );
    (true, "ok".to_string())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn position(order_id: &str, market_id: &str, size_usd: f64) -> Position {
        Position {
            market_id: market_id.into(),
            token_id: "tok".into(),
            direction: Direction::Up,
            size_usd,
            entry_price: 0.58,
            order_id: order_id.into(),
            opened_at: 1_000,
            strategy: Strategy::Directional,
            timeframe: Timeframe::M15,
            asset: Asset::Bitcoin,
        }
    }

    fn signal(edge: f64) -> Signal {
        Signal {
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M15,
            direction: Direction::Up,
            probability: 0.6,
            edge,
            confidence: 0.5,
            token_id: "tok".into(),
            atr_value: 0.001,
            indicator_votes: BTreeMap::new(),
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            min_edge: 0.08,
            max_concurrent: 3,
            max_exposure_usd: 100.0,
            order_size_usd: 10.0,
        }
    }

    #[test]
    fn exposure_is_sum_of_open_positions() {
        let tracker = PositionTracker::new();
        tracker.add(position("o1", "m1", 10.0));
        tracker.add(position("o2", "m2", 15.0));
        assert_eq!(tracker.total_exposure(), 25.0);
        assert_eq!(tracker.count(), 2);

        tracker.remove("o1");
        assert_eq!(tracker.total_exposure(), 15.0);
        assert_eq!(tracker.count(), 1);
        assert!(tracker.remove("o1").is_none());
    }

    #[test]
    fn shares_times_price_equals_stake() {
        let pos = position("o1", "m1", 10.0);
        assert!((pos.shares() * pos.entry_price - pos.size_usd).abs() < 0.01);
    }

    #[test]
    fn gate_rejects_thin_edge() {
        let tracker = PositionTracker::new();
        let (allowed, reason) = check_risk(&limits(), &signal(0.05), &tracker, "m1");
        assert!(!allowed);
        assert!(reason.contains("edge"));
    }

    #[test]
    fn gate_rejects_concurrency_breach() {
        let tracker = PositionTracker::new();
        for i in 0..3 {
            tracker.add(position(&format!("o{i}"), &format!("m{i}"), 10.0));
        }
        let (allowed, reason) = check_risk(&limits(), &signal(0.10), &tracker, "m9");
        assert!(!allowed);
        assert!(reason.contains("concurrent"));
    }

    #[test]
    fn gate_rejects_exposure_breach() {
        let tracker = PositionTracker::new();
        tracker.add(position("o1", "m1", 95.0));
        let (allowed, reason) = check_risk(&limits(), &signal(0.10), &tracker, "m2");
        assert!(!allowed);
        assert!(reason.contains("exposure"));
    }

    #[test]
    fn gate_rejects_duplicate_market() {
        let tracker = PositionTracker::new();
        tracker.add(position("o1", "m1", 10.0));
        let (allowed, reason) = check_risk(&limits(), &signal(0.10), &tracker, "m1");
        assert!(!allowed);
        assert!(reason.contains("already have position"));
    }

    #[test]
    fn gate_allows_clean_trade() {
        let tracker = PositionTracker::new();
        tracker.add(position("o1", "m1", 10.0));
        let (allowed, reason) = check_risk(&limits(), &signal(0.10), &tracker, "m2");
        assert!(allowed);
        assert_eq!(reason, "ok");
    }

    #[test]
    fn cooldown_window() {
        let tracker = PositionTracker::new();
        tracker.set_cooldown("m1", 1_000);
        assert!(tracker.in_cooldown("m1", 1_200, 300));
        assert!(!tracker.in_cooldown("m1", 1_400, 300));
        assert!(!tracker.in_cooldown("m2", 1_000, 300));

        tracker.prune_cooldowns(10_000, 3_600);
        assert!(!tracker.in_cooldown("m1", 1_200, 300));
    }
}
