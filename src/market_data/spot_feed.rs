// =============================================================================
// Spot Feed — exchange trade + top-of-book WebSocket, feeding the PriceCache
// =============================================================================
//
// One combined-stream connection carries, per asset:
//   <sym>@trade         — individual trades (price/quantity/timestamp)
//   <sym>@depth5@1000ms — top 5 order book levels, refreshed every second
//
// Trades fold into the PriceCache; depth snapshots are kept here with an age
// stamp. The connection is considered dead after 60 s of silence and the
// run function returns so the caller can reconnect with backoff.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::error::BotError;
use crate::market_data::PriceCache;
use crate::types::Asset;

/// Depth becomes useless after this many seconds without an update.
const DEPTH_STALE_SECS: u64 = 10;
/// Forced-reconnect threshold for a silent socket.
const FEED_SILENT_SECS: u64 = 60;

/// Top-of-book snapshot for one asset (price, quantity) per level.
#[derive(Debug, Clone)]
pub struct SpotDepth {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    updated_at: Instant,
}

impl SpotDepth {
    /// (bid_depth_usd, ask_depth_usd) summed over the retained levels.
    pub fn depth_usd(&self) -> (f64, f64) {
        let bid: f64 = self.bids.iter().map(|(p, q)| p * q).sum();
        let ask: f64 = self.asks.iter().map(|(p, q)| p * q).sum();
        (bid, ask)
    }
}

/// Shared state updated by the spot stream task.
#[derive(Default)]
pub struct SpotDepthMap {
    depth: RwLock<HashMap<Asset, SpotDepth>>,
}

impl SpotDepthMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest depth for an asset, or None when absent or stale.
    pub fn depth(&self, asset: Asset) -> Option<SpotDepth> {
        let map = self.depth.read();
        let d = map.get(&asset)?;
        if d.updated_at.elapsed() > Duration::from_secs(DEPTH_STALE_SECS) {
            return None;
        }
        Some(d.clone())
    }

    fn store(&self, asset: Asset, bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) {
        self.depth.write().insert(
            asset,
            SpotDepth {
                bids,
                asks,
                updated_at: Instant::now(),
            },
        );
    }
}

/// A parsed message from the combined stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SpotEvent {
    Trade {
        asset: Asset,
        price: f64,
        quantity: f64,
        /// Unix seconds (the exchange sends milliseconds).
        timestamp: i64,
    },
    Depth {
        asset: Asset,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
    },
}

/// Build the combined-stream URL for all tracked assets.
fn build_stream_url(base: &str) -> String {
    let mut streams: Vec<String> = Vec::new();
    for asset in Asset::ALL {
        let sym = asset.symbol();
        streams.push(format!("{sym}@trade"));
        streams.push(format!("{sym}@depth5@1000ms"));
    }
    format!("{}/stream?streams={}", base.trim_end_matches('/'), streams.join("/"))
}

/// Parse one combined-stream message into a [`SpotEvent`].
///
/// Returns `None` for messages about unknown symbols or non-trade/depth
/// payloads (subscription acks etc.).
fn parse_spot_message(text: &str) -> Option<SpotEvent> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let stream = root.get("stream")?.as_str()?;
    let data = root.get("data")?;

    let symbol = stream.split('@').next()?;
    let asset = Asset::from_symbol(symbol)?;

    if stream.contains("@depth") {
        let bids = parse_levels(data.get("bids")?);
        let asks = parse_levels(data.get("asks")?);
        return Some(SpotEvent::Depth { asset, bids, asks });
    }

    // Trade event: numeric fields arrive as strings.
    let price: f64 = data.get("p")?.as_str()?.parse().ok()?;
    let quantity: f64 = data.get("q")?.as_str()?.parse().ok()?;
    let ts_ms = data.get("T")?.as_i64()?;
    Some(SpotEvent::Trade {
        asset,
        price,
        quantity,
        timestamp: ts_ms / 1000,
    })
}

/// Parse `[["price","qty"], ...]` levels, dropping malformed entries.
fn parse_levels(value: &serde_json::Value) -> Vec<(f64, f64)> {
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|lvl| {
            let pair = lvl.as_array()?;
            let p: f64 = pair.first()?.as_str()?.parse().ok()?;
            let q: f64 = pair.get(1)?.as_str()?.parse().ok()?;
            Some((p, q))
        })
        .collect()
}

/// Connect to the spot combined stream and pump events until the socket
/// errors, closes, or goes silent for more than 60 s.
pub async fn run_spot_stream(
    base_url: &str,
    cache: &Arc<PriceCache>,
    depth: &Arc<SpotDepthMap>,
) -> Result<(), BotError> {
    let url = build_stream_url(base_url);
    info!(url = %url, "connecting to spot WebSocket");

    let (ws_stream, _response) = connect_async(&url).await?;

    info!("spot WebSocket connected (trade + depth5)");
    let (_write, mut read) = ws_stream.split();

    loop {
        let msg = match tokio::time::timeout(Duration::from_secs(FEED_SILENT_SECS), read.next())
            .await
        {
            Ok(m) => m,
            Err(_) => {
                warn!("spot WebSocket silent >60s, forcing reconnect");
                return Ok(());
            }
        };

        match msg {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_spot_message(&text) {
                        Some(SpotEvent::Trade {
                            asset,
                            price,
                            quantity,
                            timestamp,
                        }) => {
                            cache.update_tick(asset, price, quantity, timestamp);
                        }
                        Some(SpotEvent::Depth { asset, bids, asks }) => {
                            depth.store(asset, bids, asks);
                        }
                        None => {}
                    }
                }
                // Ping/Pong/Binary frames are handled by tungstenite.
            }
            Some(Err(e)) => {
                error!(error = %e, "spot WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!("spot WebSocket stream ended");
                return Ok(());
            }
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
    fn stream_url_covers_all_assets() {
        let url = build_stream_url("wss://stream.example.com:9443");
        for asset in Asset::ALL {
            assert!(url.contains(&format!("{}@trade", asset.symbol())));
            assert!(url.contains(&format!("{}@depth5@1000ms", asset.symbol())));
        }
        assert!(url.starts_with("wss://stream.example.com:9443/stream?streams="));
    }

    #[test]
    fn parse_trade_message() {
        let json = r#"{
            "stream": "btcusdt@trade",
            "data": { "e": "trade", "s": "BTCUSDT", "p": "97000.50", "q": "0.25", "T": 1700000000123 }
        }"#;
        let ev = parse_spot_message(json).expect("should parse");
        assert_eq!(
            ev,
            SpotEvent::Trade {
                asset: Asset::Bitcoin,
                price: 97000.50,
                quantity: 0.25,
                timestamp: 1_700_000_000,
            }
        );
    }

    #[test]
    fn parse_depth_message() {
        let json = r#"{
            "stream": "ethusdt@depth5@1000ms",
            "data": {
                "bids": [["3000.0", "2.0"], ["2999.5", "1.0"]],
                "asks": [["3000.5", "1.5"]]
            }
        }"#;
        let ev = parse_spot_message(json).expect("should parse");
        match ev {
            SpotEvent::Depth { asset, bids, asks } => {
                assert_eq!(asset, Asset::Ethereum);
                assert_eq!(bids.len(), 2);
                assert_eq!(asks, vec![(3000.5, 1.5)]);
            }
            other => panic!("expected depth event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_symbol_is_ignored() {
        let json = r#"{
            "stream": "dogeusdt@trade",
            "data": { "p": "0.1", "q": "100", "T": 1700000000000 }
        }"#;
        assert!(parse_spot_message(json).is_none());
    }

    #[test]
    fn malformed_levels_are_dropped() {
        let v: serde_json::Value =
            serde_json::from_str(r#"[["1.0", "2.0"], ["bad"], "nope", ["3.0", "x"]]"#).unwrap();
        assert_eq!(parse_levels(&v), vec![(1.0, 2.0)]);
    }

    #[test]
    fn depth_map_stores_and_sums() {
        let map = SpotDepthMap::new();
        map.store(
            Asset::Bitcoin,
            vec![(100.0, 1.0), (99.0, 2.0)],
            vec![(101.0, 1.0)],
        );
        let d = map.depth(Asset::Bitcoin).unwrap();
        let (bid_usd, ask_usd) = d.depth_usd();
        assert_eq!(bid_usd, 298.0);
        assert_eq!(ask_usd, 101.0);
        assert!(map.depth(Asset::Ethereum).is_none());
    }
}
