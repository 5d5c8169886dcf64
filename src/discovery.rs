// =============================================================================
// Market Discovery — thin adapter over the markets API
// =============================================================================
//
// Full slug enumeration, ranking, and scheduling belong to the discovery
// collaborator; the engine only needs its interface: a list of currently
// open Up/Down markets with their tokens and end times. This adapter issues
// one recurrence-filtered query per timeframe and normalises the response.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Asset, Timeframe};

/// One discovered Up/Down market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredMarket {
    pub market_id: String,
    pub question: String,
    pub asset: Asset,
    pub timeframe: Timeframe,
    /// Unix second the market's window ends (0 when unknown).
    pub end_ts: i64,
    /// (token_id, outcome) pairs.
    pub tokens: Vec<(String, String)>,
}

impl DiscoveredMarket {
    pub fn up_token_id(&self) -> Option<String> {
        self.token_for(&["up", "yes"])
    }

    pub fn down_token_id(&self) -> Option<String> {
        self.token_for(&["down", "no"])
    }

    fn token_for(&self, outcomes: &[&str]) -> Option<String> {
        self.tokens
            .iter()
            .find(|(_, outcome)| outcomes.contains(&outcome.to_lowercase().as_str()))
            .map(|(tid, _)| tid.clone())
            .filter(|tid| !tid.is_empty())
    }
}

/// Markets-API discovery client.
#[derive(Clone)]
pub struct MarketDiscovery {
    client: reqwest::Client,
    gamma_host: String,
}

impl MarketDiscovery {
    pub fn new(gamma_host: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            gamma_host: gamma_host.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch open Up/Down markets for one timeframe recurrence.
    pub async fn fetch_markets(&self, timeframe: Timeframe) -> Result<Vec<DiscoveredMarket>> {
        let url = format!(
            "{}/markets?closed=false&tag_slug=crypto&recurrence={}&limit=100",
            self.gamma_host,
            timeframe.as_str(),
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /markets discovery request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("discovery returned {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await.context("parse discovery JSON")?;
        let markets = parse_discovery_response(&body, timeframe);
        debug!(timeframe = %timeframe, count = markets.len(), "markets discovered");
        Ok(markets)
    }

    /// All timeframes, concatenated. Individual failures degrade to empty.
    pub async fn fetch_all(&self) -> Vec<DiscoveredMarket> {
        let mut all = Vec::new();
        for tf in Timeframe::ALL {
            match self.fetch_markets(tf).await {
                Ok(mut markets) => all.append(&mut markets),
                Err(e) => debug!(timeframe = %tf, error = %e, "discovery fetch failed"),
            }
        }
        all
    }
}

/// Normalise one discovery response. The API stringifies the outcome and
/// token-id arrays, so they need a second JSON parse.
pub fn parse_discovery_response(
    body: &serde_json::Value,
    timeframe: Timeframe,
) -> Vec<DiscoveredMarket> {
    let Some(arr) = body.as_array() else {
        return Vec::new();
    };

    arr.iter()
        .filter_map(|m| {
            let market_id = m
                .get("conditionId")
                .or_else(|| m.get("condition_id"))
                .or_else(|| m.get("id"))
                .and_then(|v| v.as_str())?
                .to_string();
            let question = m.get("question").and_then(|v| v.as_str())?.to_string();
            let asset = infer_asset(&question)?;

            let outcomes = parse_string_array(m.get("outcomes"));
            let token_ids = parse_string_array(
                m.get("clobTokenIds").or_else(|| m.get("clob_token_ids")),
            );
            if outcomes.len() != token_ids.len() || outcomes.is_empty() {
                return None;
            }
            let tokens = token_ids.into_iter().zip(outcomes).collect();

            let end_ts = m
                .get("endDate")
                .or_else(|| m.get("end_date_iso"))
                .and_then(|v| v.as_str())
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.timestamp())
                .unwrap_or(0);

            Some(DiscoveredMarket {
                market_id,
                question,
                asset,
                timeframe,
                end_ts,
                tokens,
            })
        })
        .collect()
}

/// Map a market question to the asset it references.
pub fn infer_asset(question: &str) -> Option<Asset> {
    let q = question.to_lowercase();
    if q.contains("bitcoin") || q.contains("btc") {
        Some(Asset::Bitcoin)
    } else if q.contains("ethereum") || q.contains("eth") {
        Some(Asset::Ethereum)
    } else if q.contains("solana") || q.contains("sol") {
        Some(Asset::Solana)
    } else if q.contains("xrp") {
        Some(Asset::Xrp)
    } else {
        None
    }
}

/// Fields like `outcomes` arrive as `"[\"Up\", \"Down\"]"` — a JSON array
/// encoded inside a JSON string.
fn parse_string_array(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) => {
            serde_json::from_str::<Vec<String>>(s).unwrap_or_default()
        }
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lookup_by_outcome() {
        let dm = DiscoveredMarket {
            market_id: "m".into(),
            question: "q".into(),
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M5,
            end_ts: 0,
            tokens: vec![
                ("t1".to_string(), "Up".to_string()),
                ("t2".to_string(), "Down".to_string()),
            ],
        };
        assert_eq!(dm.up_token_id(), Some("t1".to_string()));
        assert_eq!(dm.down_token_id(), Some("t2".to_string()));
    }

    #[test]
    fn yes_no_outcomes_map_to_directions() {
        let dm = DiscoveredMarket {
            market_id: "m".into(),
            question: "q".into(),
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M5,
            end_ts: 0,
            tokens: vec![
                ("y".to_string(), "Yes".to_string()),
                ("n".to_string(), "No".to_string()),
            ],
        };
        assert_eq!(dm.up_token_id(), Some("y".to_string()));
        assert_eq!(dm.down_token_id(), Some("n".to_string()));
    }

    #[test]
    fn asset_inference() {
        assert_eq!(infer_asset("Bitcoin Up or Down - 3:00PM ET"), Some(Asset::Bitcoin));
        assert_eq!(infer_asset("Will SOL hit $500?"), Some(Asset::Solana));
        assert_eq!(infer_asset("XRP Up or Down"), Some(Asset::Xrp));
        assert_eq!(infer_asset("Will it rain?"), None);
    }

    #[test]
    fn parse_response_with_stringified_arrays() {
        let body: serde_json::Value = serde_json::from_str(
            r#"[{
                "conditionId": "0xabc",
                "question": "Ethereum Up or Down - June 1, 3PM ET",
                "outcomes": "[\"Up\", \"Down\"]",
                "clobTokenIds": "[\"111\", \"222\"]",
                "endDate": "2025-06-01T19:05:00Z"
            }]"#,
        )
        .unwrap();
        let markets = parse_discovery_response(&body, Timeframe::M5);
        assert_eq!(markets.len(), 1);
        let m = &markets[0];
        assert_eq!(m.market_id, "0xabc");
        assert_eq!(m.asset, Asset::Ethereum);
        assert_eq!(m.up_token_id(), Some("111".to_string()));
        assert!(m.end_ts > 0);
    }

    #[test]
    fn mismatched_arrays_are_dropped() {
        let body: serde_json::Value = serde_json::from_str(
            r#"[{
                "conditionId": "0xabc",
                "question": "Bitcoin Up or Down",
                "outcomes": "[\"Up\", \"Down\"]",
                "clobTokenIds": "[\"111\"]"
            }]"#,
        )
        .unwrap();
        assert!(parse_discovery_response(&body, Timeframe::M5).is_empty());
    }
}
