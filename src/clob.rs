// =============================================================================
// CLOB REST Client — markets, books, and order management with HMAC auth
// =============================================================================
//
// SECURITY: the API secret is used exclusively for HMAC-SHA256 request
// signing and is never logged or serialized. Full order signing (the
// EIP-712 layer) belongs to the credential-management collaborator; this
// client speaks the authenticated REST surface.
//
// All calls carry a 10 s timeout. Failures here are transient by default:
// callers log and continue the tick rather than halting the pipeline.
// =============================================================================

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::error::BotError;
use crate::types::{Side, TimeInForce};

type Result<T> = std::result::Result<T, BotError>;

type HmacSha256 = Hmac<Sha256>;

/// One outcome token inside a market.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub token_id: String,
    pub outcome: String,
    pub price: f64,
    pub winner: Option<bool>,
}

/// Market state as returned by `GET /markets/{id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub closed: bool,
    pub tokens: Vec<TokenInfo>,
}

/// Order book for one token: (price, size) levels, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.iter().map(|(p, _)| *p).fold(None, |acc, p| {
            Some(acc.map_or(p, |a: f64| a.max(p)))
        })
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.iter().map(|(p, _)| *p).fold(None, |acc, p| {
            Some(acc.map_or(p, |a: f64| a.min(p)))
        })
    }
}

/// An order to be posted to the book.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub time_in_force: TimeInForce,
}

/// Acknowledgement from the book.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    /// Lowercased status: "live", "matched", "filled", ...
    pub status: String,
}

impl OrderAck {
    /// FOK semantics: only matched/filled acks count as fills.
    pub fn is_filled(&self) -> bool {
        matches!(self.status.as_str(), "matched" | "filled")
    }
}

/// Authenticated CLOB REST client.
#[derive(Clone)]
pub struct ClobClient {
    client: reqwest::Client,
    host: String,
    api_key: String,
    secret: String,
    passphrase: String,
}

impl ClobClient {
    pub fn new(
        host: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature over `timestamp + method + path + body`.
    fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> HeaderMap {
        let timestamp = chrono::Utc::now().timestamp();
        let sig = self.sign(timestamp, method, path, body);

        let mut headers = HeaderMap::new();
        let mut set = |name: &'static str, value: String| {
            if let Ok(v) = HeaderValue::from_str(&value) {
                headers.insert(name, v);
            }
        };
        set("POLY-API-KEY", self.api_key.clone());
        set("POLY-PASSPHRASE", self.passphrase.clone());
        set("POLY-TIMESTAMP", timestamp.to_string());
        set("POLY-SIGNATURE", sig);
        headers
    }

    // -------------------------------------------------------------------------
    // Markets & books
    // -------------------------------------------------------------------------

    /// GET /markets/{id}
    pub async fn get_market(&self, market_id: &str) -> Result<MarketInfo> {
        let url = format!("{}/markets/{}", self.host, market_id);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(BotError::TransientIo(format!(
                "GET /markets/{market_id} returned {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(parse_market(&body))
    }

    /// GET /book?token_id=…
    pub async fn get_book(&self, token_id: &str) -> Result<OrderBook> {
        let url = format!("{}/book?token_id={}", self.host, token_id);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(BotError::TransientIo(format!(
                "GET /book returned {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(parse_book(&body))
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /order — place a signed limit order.
    pub async fn post_order(&self, req: &OrderRequest) -> Result<OrderAck> {
        let path = "/order";
        let body = serde_json::json!({
            "tokenID": req.token_id,
            "price": format!("{:.2}", req.price),
            "size": format!("{:.2}", req.size),
            "side": req.side.to_string(),
            "orderType": req.time_in_force.to_string(),
        })
        .to_string();

        debug!(
            token = &req.token_id[..req.token_id.len().min(16)],
            price = req.price,
            size = req.size,
            side = %req.side,
            tif = %req.time_in_force,
            "posting order"
        );

        let resp = self
            .client
            .post(format!("{}{}", self.host, path))
            .headers(self.auth_headers("POST", path, &body))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            let err = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(BotError::OrderRejected(format!("({status}): {err}")));
        }

        let ack = parse_order_ack(&body)
            .ok_or_else(|| BotError::OrderRejected(format!("ack missing order id: {body}")))?;
        info!(order_id = %ack.order_id, status = %ack.status, "order acknowledged");
        Ok(ack)
    }

    /// GET /order/{id} — lowercased status string.
    pub async fn get_order_status(&self, order_id: &str) -> Result<String> {
        let path = format!("/order/{order_id}");
        let resp = self
            .client
            .get(format!("{}{}", self.host, path))
            .headers(self.auth_headers("GET", &path, ""))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BotError::TransientIo(format!(
                "GET /order/{order_id} returned {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase())
    }

    /// DELETE /order/{id}.
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/order/{order_id}");
        let resp = self
            .client
            .delete(format!("{}{}", self.host, path))
            .headers(self.auth_headers("DELETE", &path, ""))
            .send()
            .await?;
        if !resp.status().is_success() {
            warn!(order_id, status = %resp.status(), "cancel returned non-success");
            return Err(BotError::TransientIo(format!(
                "cancel {order_id} returned {}",
                resp.status()
            )));
        }
        info!(order_id, "order cancelled");
        Ok(())
    }
}

// =============================================================================
// Pure response parsers (testable offline)
// =============================================================================

pub fn parse_market(body: &serde_json::Value) -> MarketInfo {
    let closed = body.get("closed").and_then(|v| v.as_bool()).unwrap_or(false);
    let tokens = body
        .get("tokens")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    Some(TokenInfo {
                        token_id: t.get("token_id")?.as_str()?.to_string(),
                        outcome: t
                            .get("outcome")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                        price: parse_price(t.get("price")),
                        winner: t.get("winner").and_then(|v| v.as_bool()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    MarketInfo { closed, tokens }
}

pub fn parse_book(body: &serde_json::Value) -> OrderBook {
    let side = |key: &str| -> Vec<(f64, f64)> {
        body.get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|lvl| {
                        let p = parse_price(lvl.get("price"));
                        let s = parse_price(lvl.get("size"));
                        (p > 0.0).then_some((p, s))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };
    OrderBook {
        bids: side("bids"),
        asks: side("asks"),
    }
}

fn parse_order_ack(body: &serde_json::Value) -> Option<OrderAck> {
    let order_id = body
        .get("orderID")
        .or_else(|| body.get("id"))
        .and_then(|v| v.as_str())?
        .to_string();
    let status = body
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("live")
        .to_lowercase();
    Some(OrderAck { order_id, status })
}

/// Numeric fields arrive as strings or numbers depending on the endpoint.
fn parse_price(value: Option<&serde_json::Value>) -> f64 {
    match value {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}
