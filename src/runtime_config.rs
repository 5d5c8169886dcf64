// =============================================================================
// Runtime Configuration — engine settings with env overrides and atomic save
// =============================================================================
//
// Persistence uses the tmp + rename pattern so a crash mid-write can never
// corrupt the file. Every field carries `#[serde(default)]` so adding new
// fields never breaks loading an older config file. Environment variables
// override file values at load time (the .env file is read by main).
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_clob_host() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_gamma_host() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_market_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_spot_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_sentiment_url() -> String {
    "https://api.alternative.me/fng/?limit=1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_order_size_usd() -> f64 {
    10.0
}

fn default_max_position_usd() -> f64 {
    150.0
}

fn default_max_concurrent_positions() -> usize {
    5
}

fn default_min_edge_pct() -> f64 {
    8.0
}

fn default_bankroll_usd() -> f64 {
    250.0
}

fn default_tick_interval_s() -> u64 {
    30
}

fn default_min_consensus() -> usize {
    7
}

fn default_min_confidence() -> f64 {
    0.35
}

fn default_min_atr() -> f64 {
    0.0003
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_cooldown_secs() -> i64 {
    300
}

fn default_ks_max_bet_usd() -> f64 {
    5.0
}

fn default_ks_daily_loss_cap_usd() -> f64 {
    15.0
}

fn default_ks_direction_threshold() -> f64 {
    0.0010
}

fn default_ks_window_seconds() -> i64 {
    60
}

fn default_ks_min_window_seconds() -> i64 {
    10
}

fn default_ks_tick_interval_ms() -> u64 {
    1_000
}

// =============================================================================
// KillshotParams
// =============================================================================

/// Parameters for the late-window killshot engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillshotParams {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Dollar cap per killshot trade.
    #[serde(default = "default_ks_max_bet_usd")]
    pub max_bet_usd: f64,

    /// Stop firing new trades once resolved losses for the day reach this.
    #[serde(default = "default_ks_daily_loss_cap_usd")]
    pub daily_loss_cap_usd: f64,

    /// Minimum |spot delta| from the window open to consider direction locked.
    #[serde(default = "default_ks_direction_threshold")]
    pub direction_threshold: f64,

    /// Kill zone upper bound: seconds before window close.
    #[serde(default = "default_ks_window_seconds")]
    pub window_seconds: i64,

    /// Kill zone lower bound: too close to the bell to get a fill.
    #[serde(default = "default_ks_min_window_seconds")]
    pub min_window_seconds: i64,

    /// Killshot loop cadence in milliseconds.
    #[serde(default = "default_ks_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for KillshotParams {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: true,
            max_bet_usd: default_ks_max_bet_usd(),
            daily_loss_cap_usd: default_ks_daily_loss_cap_usd(),
            direction_threshold: default_ks_direction_threshold(),
            window_seconds: default_ks_window_seconds(),
            min_window_seconds: default_ks_min_window_seconds(),
            tick_interval_ms: default_ks_tick_interval_ms(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Endpoints -----------------------------------------------------------
    #[serde(default = "default_clob_host")]
    pub clob_host: String,

    #[serde(default = "default_gamma_host")]
    pub gamma_host: String,

    #[serde(default = "default_market_ws_url")]
    pub market_ws_url: String,

    #[serde(default = "default_spot_ws_url")]
    pub spot_ws_url: String,

    #[serde(default = "default_sentiment_url")]
    pub sentiment_url: String,

    /// Oracle price WebSocket. Empty disables the oracle feed (the killshot
    /// engine then uses the exchange tape only).
    #[serde(default)]
    pub oracle_ws_url: String,

    // --- Credentials (never serialized back out) -----------------------------
    #[serde(skip_serializing, default)]
    pub clob_api_key: String,

    #[serde(skip_serializing, default)]
    pub clob_api_secret: String,

    #[serde(skip_serializing, default)]
    pub clob_api_passphrase: String,

    // --- Mode ----------------------------------------------------------------
    /// When true the executor never contacts the order book; fills are
    /// simulated and unfilled orders expire by timeframe.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    // --- Risk ----------------------------------------------------------------
    /// Base order size before conviction sizing takes over.
    #[serde(default = "default_order_size_usd")]
    pub order_size_usd: f64,

    /// Total open exposure cap in dollars.
    #[serde(default = "default_max_position_usd")]
    pub max_position_usd: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    /// Minimum post-fee edge in percent required to trade.
    #[serde(default = "default_min_edge_pct")]
    pub min_edge_pct: f64,

    /// Reference bankroll for the conviction bankroll multiplier.
    #[serde(default = "default_bankroll_usd")]
    pub bankroll_usd: f64,

    /// Per-market re-entry cooldown.
    #[serde(default = "default_cooldown_secs")]
    pub market_cooldown_secs: i64,

    // --- Signal gates --------------------------------------------------------
    /// Minimum agreeing indicators for the majority direction.
    #[serde(default = "default_min_consensus")]
    pub min_consensus: usize,

    /// Minimum ensemble confidence (the regime floor may raise this).
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum ATR (fraction of price) — below this the market is too flat.
    #[serde(default = "default_min_atr")]
    pub min_atr: f64,

    // --- Loop ----------------------------------------------------------------
    #[serde(default = "default_tick_interval_s")]
    pub tick_interval_s: u64,

    /// Directory for candle snapshots, the trade log, and the accuracy store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    // --- Killshot ------------------------------------------------------------
    #[serde(default)]
    pub killshot: KillshotParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            clob_host: default_clob_host(),
            gamma_host: default_gamma_host(),
            market_ws_url: default_market_ws_url(),
            spot_ws_url: default_spot_ws_url(),
            sentiment_url: default_sentiment_url(),
            oracle_ws_url: String::new(),
            clob_api_key: String::new(),
            clob_api_secret: String::new(),
            clob_api_passphrase: String::new(),
            dry_run: true,
            order_size_usd: default_order_size_usd(),
            max_position_usd: default_max_position_usd(),
            max_concurrent_positions: default_max_concurrent_positions(),
            min_edge_pct: default_min_edge_pct(),
            bankroll_usd: default_bankroll_usd(),
            market_cooldown_secs: default_cooldown_secs(),
            min_consensus: default_min_consensus(),
            min_confidence: default_min_confidence(),
            min_atr: default_min_atr(),
            tick_interval_s: default_tick_interval_s(),
            data_dir: default_data_dir(),
            killshot: KillshotParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file, then apply env overrides.
    ///
    /// A missing file is not an error — defaults are used so a fresh checkout
    /// runs in safe dry-run mode out of the box.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config from {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env();

        info!(
            path = %path.display(),
            dry_run = config.dry_run,
            tick_interval_s = config.tick_interval_s,
            max_concurrent = config.max_concurrent_positions,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Environment variables override file values.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CLOB_API_KEY") {
            self.clob_api_key = v;
        }
        if let Ok(v) = std::env::var("CLOB_API_SECRET") {
            self.clob_api_secret = v;
        }
        if let Ok(v) = std::env::var("CLOB_API_PASSPHRASE") {
            self.clob_api_passphrase = v;
        }
        if let Ok(v) = std::env::var("DRY_RUN") {
            self.dry_run = matches!(v.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(v) = std::env::var("TICK_INTERVAL_S") {
            if let Ok(n) = v.parse() {
                self.tick_interval_s = n;
            }
        }
        if let Ok(v) = std::env::var("ORDER_SIZE_USD") {
            if let Ok(n) = v.parse() {
                self.order_size_usd = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_POSITION_USD") {
            if let Ok(n) = v.parse() {
                self.max_position_usd = n;
            }
        }
        if let Ok(v) = std::env::var("MIN_EDGE_PCT") {
            if let Ok(n) = v.parse() {
                self.min_edge_pct = n;
            }
        }
        if let Ok(v) = std::env::var("BANKROLL_USD") {
            if let Ok(n) = v.parse() {
                self.bankroll_usd = n;
            }
        }
        if let Ok(v) = std::env::var("KILLSHOT_DRY_RUN") {
            self.killshot.dry_run = matches!(v.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(v) = std::env::var("KILLSHOT_MAX_BET_USD") {
            if let Ok(n) = v.parse() {
                self.killshot.max_bet_usd = n;
            }
        }
    }

    /// Minimum edge as a fraction (config stores percent).
    pub fn min_edge(&self) -> f64 {
        self.min_edge_pct / 100.0
    }

    /// Persist the current configuration using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Emergency stop — an externally written file flag halts new trades
// =============================================================================

/// Check for an emergency-stop flag file in the data directory.
///
/// Returns the reason string if the flag is set. Filled positions are never
/// touched by an emergency stop — only new entries are halted.
pub fn emergency_stop_reason(data_dir: &Path) -> Option<String> {
    let flag = data_dir.join("emergency_stop.json");
    if !flag.exists() {
        return None;
    }
    let reason = std::fs::read_to_string(&flag)
        .ok()
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .and_then(|v| v.get("reason").and_then(|r| r.as_str()).map(String::from))
        .unwrap_or_else(|| "unknown".to_string());
    Some(reason)
}
