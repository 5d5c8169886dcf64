// =============================================================================
// Oracle Feed — real-time oracle prices over WebSocket (killshot price source)
// =============================================================================
//
// Up/Down markets resolve against the oracle's reported price, not the
// exchange trade tape, so the killshot engine prefers this feed whenever it
// is fresh (<5 s) and falls back to the exchange spot price otherwise.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::error::BotError;
use crate::types::Asset;

/// Forced-reconnect threshold for a silent socket.
const FEED_SILENT_SECS: u64 = 60;

/// Shared oracle price state.
#[derive(Default)]
pub struct OraclePrices {
    prices: RwLock<HashMap<Asset, (f64, Instant)>>,
}

impl OraclePrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest oracle price if its age is below `max_age`.
    pub fn price(&self, asset: Asset, max_age: Duration) -> Option<f64> {
        let map = self.prices.read();
        let (price, at) = map.get(&asset)?;
        if at.elapsed() > max_age {
            return None;
        }
        Some(*price)
    }

    /// Age of the latest sample in seconds, or infinity when absent.
    pub fn price_age_secs(&self, asset: Asset) -> f64 {
        let map = self.prices.read();
        map.get(&asset)
            .map(|(_, at)| at.elapsed().as_secs_f64())
            .unwrap_or(f64::INFINITY)
    }

    fn store(&self, asset: Asset, price: f64) {
        self.prices.write().insert(asset, (price, Instant::now()));
    }
}

/// Map an oracle pair symbol ("BTC/USD", "eth/usd") to an asset.
fn asset_from_pair(pair: &str) -> Option<Asset> {
    let base = pair.split('/').next()?.trim();
    Asset::from_name(base)
}

/// Parse one oracle message: `{"symbol": "BTC/USD", "price": 97123.5}`.
/// Price may arrive as a number or a string.
fn parse_oracle_message(text: &str) -> Option<(Asset, f64)> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let symbol = root.get("symbol")?.as_str()?;
    let asset = asset_from_pair(symbol)?;
    let price = match root.get("price")? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    if price <= 0.0 || !price.is_finite() {
        return None;
    }
    Some((asset, price))
}

/// Connect to the oracle stream and pump prices until the socket errors,
/// closes, or goes silent.
pub async fn run_oracle_stream(url: &str, prices: &OraclePrices) -> Result<(), BotError> {
    info!(url = %url, "connecting to oracle WebSocket");

    let (ws_stream, _response) = connect_async(url).await?;
    info!("oracle WebSocket connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        let msg = match tokio::time::timeout(Duration::from_secs(FEED_SILENT_SECS), read.next())
            .await
        {
            Ok(m) => m,
            Err(_) => {
                warn!("oracle WebSocket silent >60s, forcing reconnect");
                return Ok(());
            }
        };

        match msg {
            Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                if let Some((asset, price)) = parse_oracle_message(&text) {
                    prices.store(asset, price);
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(error = %e, "oracle WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!("oracle WebSocket stream ended");
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
    fn pair_symbol_mapping() {
        assert_eq!(asset_from_pair("BTC/USD"), Some(Asset::Bitcoin));
        assert_eq!(asset_from_pair("eth/usd"), Some(Asset::Ethereum));
        assert_eq!(asset_from_pair("SOL/USD"), Some(Asset::Solana));
        assert_eq!(asset_from_pair("DOGE/USD"), None);
    }

    #[test]
    fn parse_numeric_and_string_prices() {
        assert_eq!(
            parse_oracle_message(r#"{"symbol": "BTC/USD", "price": 97123.5}"#),
            Some((Asset::Bitcoin, 97123.5))
        );
        assert_eq!(
            parse_oracle_message(r#"{"symbol": "XRP/USD", "price": "2.15"}"#),
            Some((Asset::Xrp, 2.15))
        );
        assert_eq!(parse_oracle_message(r#"{"symbol": "BTC/USD", "price": -1}"#), None);
        assert_eq!(parse_oracle_message("not json"), None);
    }

    #[test]
    fn freshness_gate() {
        let prices = OraclePrices::new();
        assert!(prices.price(Asset::Bitcoin, Duration::from_secs(5)).is_none());
        assert_eq!(prices.price_age_secs(Asset::Bitcoin), f64::INFINITY);

        prices.store(Asset::Bitcoin, 97000.0);
        assert_eq!(prices.price(Asset::Bitcoin, Duration::from_secs(5)), Some(97000.0));
        assert!(prices.price_age_secs(Asset::Bitcoin) < 1.0);
    }
}
