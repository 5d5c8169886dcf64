// =============================================================================
// Market Feed — Polymarket CLOB market-channel WebSocket
// =============================================================================
//
// Maintains, per outcome token:
//   - the latest traded / quoted price (the market's implied probability)
//   - a top-of-book summary (best bid/ask + depth totals)
//
// Subscriptions accumulate over the process lifetime: the control loop calls
// `subscribe` for every token of every discovered market, and the stream
// task replays the full set after each reconnect so no subscription is lost.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::BotError;

/// Book summaries older than this are not served.
const BOOK_STALE_SECS: u64 = 30;
/// Forced-reconnect threshold for a silent socket.
const FEED_SILENT_SECS: u64 = 60;

/// Top-of-book summary for one outcome token.
#[derive(Debug, Clone)]
pub struct TokenBook {
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_depth_usd: f64,
    pub ask_depth_usd: f64,
    updated_at: Instant,
}

impl TokenBook {
    pub fn spread(&self) -> f64 {
        (self.best_ask - self.best_bid).max(0.0)
    }
}

/// Shared market-feed state: prices and books keyed by token id.
pub struct MarketFeed {
    prices: RwLock<HashMap<String, f64>>,
    books: RwLock<HashMap<String, TokenBook>>,
    subscribed: RwLock<HashSet<String>>,
    sub_tx: mpsc::UnboundedSender<Vec<String>>,
}

impl MarketFeed {
    /// Create the feed state plus the receiver half the stream task drains
    /// for newly subscribed tokens.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<String>>) {
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        (
            Self {
                prices: RwLock::new(HashMap::new()),
                books: RwLock::new(HashMap::new()),
                subscribed: RwLock::new(HashSet::new()),
                sub_tx,
            },
            sub_rx,
        )
    }

    /// Register tokens for market-channel updates. Already-known tokens are
    /// skipped; new ones are pushed to the stream task.
    pub fn subscribe(&self, token_ids: &[String]) {
        let fresh: Vec<String> = {
            let mut seen = self.subscribed.write();
            token_ids
                .iter()
                .filter(|t| !t.is_empty() && seen.insert((*t).clone()))
                .cloned()
                .collect()
        };
        if !fresh.is_empty() {
            debug!(count = fresh.len(), "subscribing to new market tokens");
            let _ = self.sub_tx.send(fresh);
        }
    }

    /// Every token subscribed so far (used for resubscription on reconnect).
    pub fn subscribed_tokens(&self) -> Vec<String> {
        self.subscribed.read().iter().cloned().collect()
    }

    /// Latest implied price for a token, if any.
    pub fn price(&self, token_id: &str) -> Option<f64> {
        self.prices.read().get(token_id).copied()
    }

    /// Latest top-of-book for a token, or None when absent or stale.
    pub fn book(&self, token_id: &str) -> Option<TokenBook> {
        let books = self.books.read();
        let b = books.get(token_id)?;
        if b.updated_at.elapsed() > Duration::from_secs(BOOK_STALE_SECS) {
            return None;
        }
        Some(b.clone())
    }

    fn store_price(&self, token_id: String, price: f64) {
        self.prices.write().insert(token_id, price);
    }

    fn store_book(&self, token_id: String, summary: BookSummary) {
        self.books.write().insert(
            token_id,
            TokenBook {
                best_bid: summary.best_bid,
                best_ask: summary.best_ask,
                bid_depth_usd: summary.bid_depth_usd,
                ask_depth_usd: summary.ask_depth_usd,
                updated_at: Instant::now(),
            },
        );
    }
}

/// Parsed market-channel event.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Price { token_id: String, price: f64 },
    Book { token_id: String, summary: BookSummary },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookSummary {
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_depth_usd: f64,
    pub ask_depth_usd: f64,
}

/// Build the market-channel subscription payload.
fn subscription_message(token_ids: &[String]) -> String {
    serde_json::json!({
        "type": "market",
        "assets_ids": token_ids,
    })
    .to_string()
}

/// Parse one market-channel message into zero or more events.
///
/// The server sends either a single JSON object or an array of them. `book`
/// events carry full bid/ask ladders; `last_trade_price` and `price_change`
/// events carry a price field.
fn parse_market_message(text: &str) -> Vec<MarketEvent> {
    let root: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let items: Vec<&serde_json::Value> = match &root {
        serde_json::Value::Array(arr) => arr.iter().collect(),
        obj => vec![obj],
    };

    let mut events = Vec::new();
    for item in items {
        let Some(event_type) = item.get("event_type").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(token_id) = item.get("asset_id").and_then(|v| v.as_str()) else {
            continue;
        };

        match event_type {
            "book" => {
                let bids = parse_book_side(item.get("bids"));
                let asks = parse_book_side(item.get("asks"));
                // Polymarket book sides arrive sorted away from the touch;
                // take the tightest level of each.
                let best_bid = bids.iter().map(|(p, _)| *p).fold(0.0_f64, f64::max);
                let best_ask = asks
                    .iter()
                    .map(|(p, _)| *p)
                    .fold(f64::INFINITY, f64::min);
                let bid_depth_usd: f64 = bids.iter().map(|(p, s)| p * s).sum();
                let ask_depth_usd: f64 = asks.iter().map(|(p, s)| p * s).sum();
                events.push(MarketEvent::Book {
                    token_id: token_id.to_string(),
                    summary: BookSummary {
                        best_bid,
                        best_ask: if best_ask.is_finite() { best_ask } else { 0.0 },
                        bid_depth_usd,
                        ask_depth_usd,
                    },
                });
            }
            "last_trade_price" | "price_change" => {
                let price = item
                    .get("price")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<f64>().ok());
                if let Some(price) = price {
                    if price > 0.0 && price < 1.0 {
                        events.push(MarketEvent::Price {
                            token_id: token_id.to_string(),
                            price,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    events
}

/// Parse one book side: `[{"price": "0.55", "size": "120"}, ...]`.
fn parse_book_side(value: Option<&serde_json::Value>) -> Vec<(f64, f64)> {
    let Some(arr) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|lvl| {
            let p: f64 = lvl.get("price")?.as_str()?.parse().ok()?;
            let s: f64 = lvl.get("size")?.as_str()?.parse().ok()?;
            Some((p, s))
        })
        .collect()
}

/// Connect to the market channel, replay all accumulated subscriptions, and
/// pump events until the socket errors, closes, or goes silent.
pub async fn run_market_stream(
    url: &str,
    feed: &MarketFeed,
    sub_rx: &mut mpsc::UnboundedReceiver<Vec<String>>,
) -> Result<(), BotError> {
    info!(url = %url, "connecting to market WebSocket");

    let (ws_stream, _response) = connect_async(url).await?;
    info!("market WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    // Replay the full subscription set after (re)connect.
    let existing = feed.subscribed_tokens();
    if !existing.is_empty() {
        write
            .send(Message::Text(subscription_message(&existing)))
            .await?;
        info!(count = existing.len(), "resubscribed market tokens");
    }

    loop {
        tokio::select! {
            // New tokens arriving from the control loop.
            Some(fresh) = sub_rx.recv() => {
                write
                    .send(Message::Text(subscription_message(&fresh)))
                    .await?;
            }

            msg = tokio::time::timeout(Duration::from_secs(FEED_SILENT_SECS), read.next()) => {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => {
                        warn!("market WebSocket silent >60s, forcing reconnect");
                        return Ok(());
                    }
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for event in parse_market_message(&text) {
                            match event {
                                MarketEvent::Price { token_id, price } => {
                                    feed.store_price(token_id, price);
                                }
                                MarketEvent::Book { token_id, summary } => {
                                    feed.store_book(token_id, summary);
                                }
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "market WebSocket read error");
                        return Err(e.into());
                    }
                    None => {
                        warn!("market WebSocket stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}
