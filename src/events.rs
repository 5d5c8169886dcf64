// =============================================================================
// Event Bus — in-process broadcast of trade lifecycle events
// =============================================================================
//
// Fire-and-forget: publishing never blocks and never fails, even with no
// subscribers. Consumers (alerting, dashboards, sibling engines) subscribe
// for their own receiver and drop messages they fall behind on.
// =============================================================================

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TradePlaced,
    TradeResolved,
    KillSwitchActive,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradePlaced => "trade_placed",
            Self::TradeResolved => "trade_resolved",
            Self::KillSwitchActive => "kill_switch_active",
        }
    }
}

/// One published event with its JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct BotEvent {
    pub kind: EventKind,
    pub data: serde_json::Value,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BotEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send error only means nobody is listening.
    pub fn publish(&self, kind: EventKind, data: serde_json::Value) {
        debug!(kind = kind.as_str(), "event published");
        let _ = self.tx.send(BotEvent { kind, data });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
