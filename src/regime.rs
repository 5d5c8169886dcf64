// =============================================================================
// Regime Detector — market mood from the Fear & Greed index
// =============================================================================
//
// Classifies the 0–100 sentiment index into five regimes and emits the
// multiplicative gates the rest of the pipeline applies: position size,
// minimum edge, and the ensemble confidence floor.
//
// Boundaries (20/40/60/80) are intentionally wider than the index's
// canonical 25/50/75 buckets — crypto prediction markets want a broader
// neutral band.
//
// The index is fetched at most every 5 minutes; on failure the last cached
// value is served, or a neutral default when nothing was ever fetched.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Refetch cadence for the sentiment index.
const REGIME_CACHE_TTL: Duration = Duration::from_secs(300);
/// HTTP timeout for the sentiment endpoint.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// The five market-mood buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtremeFear => "extreme_fear",
            Self::Fear => "fear",
            Self::Neutral => "neutral",
            Self::Greed => "greed",
            Self::ExtremeGreed => "extreme_greed",
        }
    }
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameter adjustments derived from the current regime. Shared read-only
/// across the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeAdjustment {
    pub label: RegimeLabel,
    pub fng_value: u32,
    pub size_multiplier: f64,
    pub edge_multiplier: f64,
    pub confidence_floor: f64,
}

impl RegimeAdjustment {
    /// Neutral default when the index was never reachable.
    pub fn neutral_default() -> Self {
        Self {
            label: RegimeLabel::Neutral,
            fng_value: 50,
            size_multiplier: 1.0,
            edge_multiplier: 1.0,
            confidence_floor: 0.35,
        }
    }

    /// Loosened gates while momentum-capture mode is active: paralysis
    /// filters step aside in the move's direction.
    pub fn momentum_override(base: &RegimeAdjustment) -> Self {
        Self {
            label: base.label,
            fng_value: base.fng_value,
            size_multiplier: 1.5,
            edge_multiplier: 0.5,
            confidence_floor: 0.25,
        }
    }
}

/// Classify an index value into a regime bucket.
pub fn classify_fng(value: u32) -> RegimeLabel {
    match value {
        0..=19 => RegimeLabel::ExtremeFear,
        20..=39 => RegimeLabel::Fear,
        40..=59 => RegimeLabel::Neutral,
        60..=79 => RegimeLabel::Greed,
        _ => RegimeLabel::ExtremeGreed,
    }
}

/// Build the full adjustment for a classified value.
pub fn adjustment_for(value: u32) -> RegimeAdjustment {
    let label = classify_fng(value);
    let (size_multiplier, edge_multiplier, confidence_floor) = match label {
        RegimeLabel::ExtremeFear => (0.9, 1.05, 0.35),
        RegimeLabel::Fear => (0.95, 1.05, 0.35),
        RegimeLabel::Neutral => (1.0, 1.0, 0.35),
        RegimeLabel::Greed => (0.8, 1.2, 0.40),
        RegimeLabel::ExtremeGreed => (0.5, 1.5, 0.45),
    };
    RegimeAdjustment {
        label,
        fng_value: value,
        size_multiplier,
        edge_multiplier,
        confidence_floor,
    }
}

/// Extract the index value from the sentiment API response:
/// `{"data": [{"value": "54", ...}]}`.
fn parse_fng_response(body: &serde_json::Value) -> Option<u32> {
    let value = body.get("data")?.as_array()?.first()?.get("value")?;
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_u64().map(|v| v as u32),
        _ => None,
    }
}

/// Fetches and caches the regime at a 5-minute cadence.
pub struct RegimeDetector {
    client: reqwest::Client,
    url: String,
    cache: RwLock<Option<(RegimeAdjustment, Instant)>>,
}

impl RegimeDetector {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            url: url.into(),
            cache: RwLock::new(None),
        }
    }

    /// Current regime adjustment. Serves the cache inside the TTL, refetches
    /// outside it, and degrades to the last known value (or the neutral
    /// default) on any fetch failure.
    pub async fn detect(&self) -> RegimeAdjustment {
        if let Some((cached, at)) = *self.cache.read() {
            if at.elapsed() < REGIME_CACHE_TTL {
                return cached;
            }
        }

        match self.fetch().await {
            Ok(value) => {
                let regime = adjustment_for(value);
                *self.cache.write() = Some((regime, Instant::now()));
                info!(
                    regime = %regime.label,
                    fng = regime.fng_value,
                    size_mult = regime.size_multiplier,
                    edge_mult = regime.edge_multiplier,
                    conf_floor = regime.confidence_floor,
                    "regime detected"
                );
                regime
            }
            Err(e) => {
                warn!(error = %e, "sentiment fetch failed, using cached/default regime");
                let cached = *self.cache.read();
                cached
                    .map(|(r, _)| r)
                    .unwrap_or_else(RegimeAdjustment::neutral_default)
            }
        }
    }

    async fn fetch(&self) -> anyhow::Result<u32> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("sentiment API returned {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        parse_fng_response(&body).ok_or_else(|| anyhow::anyhow!("malformed sentiment response"))
    }

    /// Last fetched value without touching the network (for the Fear&Greed
    /// indicator vote).
    pub fn cached_fng(&self) -> Option<u32> {
        let cached = *self.cache.read();
        cached.map(|(r, _)| r.fng_value)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify_fng(0), RegimeLabel::ExtremeFear);
        assert_eq!(classify_fng(19), RegimeLabel::ExtremeFear);
        assert_eq!(classify_fng(20), RegimeLabel::Fear);
        assert_eq!(classify_fng(39), RegimeLabel::Fear);
        assert_eq!(classify_fng(40), RegimeLabel::Neutral);
        assert_eq!(classify_fng(59), RegimeLabel::Neutral);
        assert_eq!(classify_fng(60), RegimeLabel::Greed);
        assert_eq!(classify_fng(79), RegimeLabel::Greed);
        assert_eq!(classify_fng(80), RegimeLabel::ExtremeGreed);
        assert_eq!(classify_fng(100), RegimeLabel::ExtremeGreed);
    }

    #[test]
    fn adjustment_table() {
        let extreme = adjustment_for(10);
        assert_eq!(extreme.size_multiplier, 0.9);
        assert_eq!(extreme.edge_multiplier, 1.05);
        assert_eq!(extreme.confidence_floor, 0.35);

        let greedy = adjustment_for(85);
        assert_eq!(greedy.size_multiplier, 0.5);
        assert_eq!(greedy.edge_multiplier, 1.5);
        assert_eq!(greedy.confidence_floor, 0.45);

        let neutral = adjustment_for(50);
        assert_eq!(neutral.size_multiplier, 1.0);
        assert_eq!(neutral.edge_multiplier, 1.0);
    }

    #[test]
    fn greed_tightens_every_gate() {
        // Edge floors rise and size shrinks monotonically toward greed.
        let fear = adjustment_for(30);
        let greed = adjustment_for(70);
        let extreme_greed = adjustment_for(90);
        assert!(fear.edge_multiplier < greed.edge_multiplier);
        assert!(greed.edge_multiplier < extreme_greed.edge_multiplier);
        assert!(greed.size_multiplier > extreme_greed.size_multiplier);
    }

    #[test]
    fn momentum_override_loosens_gates() {
        let base = adjustment_for(10);
        let over = RegimeAdjustment::momentum_override(&base);
        assert_eq!(over.label, base.label);
        assert_eq!(over.size_multiplier, 1.5);
        assert_eq!(over.edge_multiplier, 0.5);
        assert_eq!(over.confidence_floor, 0.25);
    }

    #[test]
    fn parse_sentiment_payload() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"data": [{"value": "54", "value_classification": "Neutral"}]}"#)
                .unwrap();
        assert_eq!(parse_fng_response(&body), Some(54));

        let bad: serde_json::Value = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert_eq!(parse_fng_response(&bad), None);
    }
}
