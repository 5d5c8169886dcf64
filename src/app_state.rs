// =============================================================================
// Central Application State — shared handles for every subsystem
// =============================================================================
//
// The single wiring point for the engine. Each subsystem owns its state
// behind its own interior locks; AppState just holds the Arcs so tasks can
// clone what they need.
//
// Ownership boundaries: the PriceCache exclusively owns candle series, the
// PositionTracker owns positions, the PerformanceTracker owns the trade
// log. Everything else reads snapshots.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::conviction::ConvictionEngine;
use crate::events::EventBus;
use crate::market_data::{MarketFeed, OraclePrices, PriceCache, SpotDepthMap};
use crate::regime::RegimeDetector;
use crate::risk::PositionTracker;
use crate::runtime_config::RuntimeConfig;
use crate::weights::WeightLearner;

/// Retained 1-minute candles per asset (8+ hours of history for the
/// momentum-capture windows).
const CANDLE_RETENTION: usize = 500;

pub struct AppState {
    pub config: Arc<RwLock<RuntimeConfig>>,
    pub data_dir: PathBuf,

    // Market data.
    pub price_cache: Arc<PriceCache>,
    pub spot_depth: Arc<SpotDepthMap>,
    pub market_feed: Arc<MarketFeed>,
    pub oracle: Arc<OraclePrices>,

    // Pipeline state.
    pub regime: Arc<RegimeDetector>,
    pub learner: Arc<WeightLearner>,
    pub positions: Arc<PositionTracker>,
    pub conviction: Arc<ConvictionEngine>,

    pub events: EventBus,
}

impl AppState {
    /// Build the shared state from config. Also returns the receiver half of
    /// the market-feed subscription channel for the feed task.
    pub fn new(config: RuntimeConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<String>>) {
        let data_dir = PathBuf::from(&config.data_dir);
        let candle_dir = data_dir.join("candles");

        let (market_feed, sub_rx) = MarketFeed::new();
        let learner = Arc::new(WeightLearner::new(data_dir.join("indicator_accuracy.json")));
        let conviction = Arc::new(ConvictionEngine::new(
            data_dir.join("trades.jsonl"),
            config.bankroll_usd,
        ));
        let regime = Arc::new(RegimeDetector::new(config.sentiment_url.clone()));

        let state = Arc::new(Self {
            config: Arc::new(RwLock::new(config)),
            data_dir,
            price_cache: Arc::new(PriceCache::new(CANDLE_RETENTION, candle_dir)),
            spot_depth: Arc::new(SpotDepthMap::new()),
            market_feed: Arc::new(market_feed),
            oracle: Arc::new(OraclePrices::new()),
            regime,
            learner,
            positions: Arc::new(PositionTracker::new()),
            conviction,
            events: EventBus::new(),
        });
        (state, sub_rx)
    }

    pub fn trades_path(&self) -> PathBuf {
        self.data_dir.join("trades.jsonl")
    }

    pub fn killshot_log_path(&self) -> PathBuf {
        self.data_dir.join("killshot_trades.jsonl")
    }

    pub fn momentum_state_path(&self) -> PathBuf {
        self.data_dir.join("momentum_mode.json")
    }
}
