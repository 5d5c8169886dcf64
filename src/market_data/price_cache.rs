// =============================================================================
// PriceCache — per-asset 1-minute OHLCV candles built from raw trade ticks
// =============================================================================
//
// Ticks fold into an in-progress candle for the current minute bucket
// (bucket = floor(ts / 60)). When the bucket advances, the previous candle is
// sealed into a bounded ring (capacity `maxlen` per asset). A parallel pair
// of per-minute buy/sell volume rings tracks order flow, classified by the
// tick rule: price >= previous tick price => buy.
//
// The cache never fabricates candles for missing minutes; a feed gap simply
// produces a timestamp gap between sealed candles.
//
// Thread-safety: all state behind a single `parking_lot::RwLock`, shared via
// `Arc<PriceCache>` between the feed task and the strategy loop.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::Asset;

/// A single 1-minute OHLCV candle.
///
/// Invariant: `low <= open, close <= high` and `volume >= 0`. `timestamp` is
/// the unix second of the minute boundary the candle belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Per-asset mutable series state.
#[derive(Debug, Default)]
struct AssetSeries {
    /// Sealed candles, oldest first.
    candles: VecDeque<Candle>,
    /// The in-progress candle for the current minute, if any.
    building: Option<Candle>,
    /// Minute bucket of the in-progress candle.
    current_minute: i64,
    /// Latest raw tick price.
    latest_price: Option<f64>,
    /// Previous tick price, for the tick-rule classification.
    prev_price: Option<f64>,
    /// Sealed per-minute buy volume, parallel to `candles`.
    buy_volume: VecDeque<f64>,
    /// Sealed per-minute sell volume, parallel to `candles`.
    sell_volume: VecDeque<f64>,
    /// Buy volume accumulated in the current minute.
    current_buy: f64,
    /// Sell volume accumulated in the current minute.
    current_sell: f64,
}

/// Thread-safe cache of 1-minute candles and order flow per asset.
pub struct PriceCache {
    series: RwLock<HashMap<Asset, AssetSeries>>,
    maxlen: usize,
    candle_dir: PathBuf,
}

impl PriceCache {
    /// Create a cache retaining at most `maxlen` sealed candles per asset.
    /// Snapshots are written to / read from `candle_dir` as one jsonl file
    /// per asset.
    pub fn new(maxlen: usize, candle_dir: impl Into<PathBuf>) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            maxlen,
            candle_dir: candle_dir.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Tick ingestion
    // -------------------------------------------------------------------------

    /// Fold a raw trade tick into the cache.
    ///
    /// Malformed ticks (non-positive price or volume, or negative timestamp)
    /// are silently dropped.
    pub fn update_tick(&self, asset: Asset, price: f64, volume: f64, timestamp: i64) {
        if price <= 0.0 || volume < 0.0 || timestamp < 0 || !price.is_finite() || !volume.is_finite()
        {
            return;
        }

        let minute = timestamp.div_euclid(60);

        let mut map = self.series.write();
        let s = map.entry(asset).or_default();

        // Tick rule: uptick (or equal) = buy, downtick = sell.
        let is_buy = match s.prev_price {
            Some(prev) => price >= prev,
            None => true,
        };
        s.prev_price = Some(price);
        s.latest_price = Some(price);

        match &mut s.building {
            None => {
                s.current_minute = minute;
                s.building = Some(Candle {
                    timestamp: minute * 60,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                });
                s.current_buy = if is_buy { volume } else { 0.0 };
                s.current_sell = if is_buy { 0.0 } else { volume };
            }
            Some(candle) => {
                if minute > s.current_minute {
                    // Seal the finished candle and its order-flow minute.
                    let sealed = candle.clone();
                    s.candles.push_back(sealed);
                    while s.candles.len() > self.maxlen {
                        s.candles.pop_front();
                    }
                    s.buy_volume.push_back(s.current_buy);
                    s.sell_volume.push_back(s.current_sell);
                    while s.buy_volume.len() > self.maxlen {
                        s.buy_volume.pop_front();
                    }
                    while s.sell_volume.len() > self.maxlen {
                        s.sell_volume.pop_front();
                    }

                    s.current_minute = minute;
                    s.building = Some(Candle {
                        timestamp: minute * 60,
                        open: price,
                        high: price,
                        low: price,
                        close: price,
                        volume,
                    });
                    s.current_buy = if is_buy { volume } else { 0.0 };
                    s.current_sell = if is_buy { 0.0 } else { volume };
                } else {
                    // Late or in-minute tick: fold into the building candle,
                    // never into a new bucket.
                    candle.high = candle.high.max(price);
                    candle.low = candle.low.min(price);
                    candle.close = price;
                    candle.volume += volume;
                    if is_buy {
                        s.current_buy += volume;
                    } else {
                        s.current_sell += volume;
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Last `count` close prices, including the in-progress candle.
    pub fn closes(&self, asset: Asset, count: usize) -> Vec<f64> {
        self.candles(asset, count).iter().map(|c| c.close).collect()
    }

    /// Last `count` candles (sealed + in-progress), oldest first.
    pub fn candles(&self, asset: Asset, count: usize) -> Vec<Candle> {
        let map = self.series.read();
        let Some(s) = map.get(&asset) else {
            return Vec::new();
        };
        let mut all: Vec<Candle> = s.candles.iter().cloned().collect();
        if let Some(b) = &s.building {
            all.push(b.clone());
        }
        let start = all.len().saturating_sub(count);
        all.split_off(start)
    }

    /// Latest raw tick price.
    pub fn price(&self, asset: Asset) -> Option<f64> {
        self.series.read().get(&asset).and_then(|s| s.latest_price)
    }

    /// (buy_volume, sell_volume) summed over the last `window` minutes,
    /// including the current in-progress minute.
    pub fn order_flow(&self, asset: Asset, window: usize) -> (f64, f64) {
        let map = self.series.read();
        let Some(s) = map.get(&asset) else {
            return (0.0, 0.0);
        };
        let mut buys: Vec<f64> = s.buy_volume.iter().copied().collect();
        let mut sells: Vec<f64> = s.sell_volume.iter().copied().collect();
        buys.push(s.current_buy);
        sells.push(s.current_sell);
        let bstart = buys.len().saturating_sub(window);
        let sstart = sells.len().saturating_sub(window);
        (buys[bstart..].iter().sum(), sells[sstart..].iter().sum())
    }

    /// Close price from approximately `minutes` ago (sealed candles only).
    pub fn price_ago(&self, asset: Asset, minutes: usize) -> Option<f64> {
        let map = self.series.read();
        let s = map.get(&asset)?;
        if s.candles.is_empty() {
            return None;
        }
        let len = s.candles.len();
        let idx = len.saturating_sub(minutes).min(len - 1);
        s.candles.get(idx).map(|c| c.close)
    }

    /// Total candles available (sealed + in-progress).
    pub fn candle_count(&self, asset: Asset) -> usize {
        let map = self.series.read();
        map.get(&asset)
            .map(|s| s.candles.len() + usize::from(s.building.is_some()))
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Persist each asset's sealed candles to `<dir>/<asset>.jsonl`, merged
    /// with whatever is already on disk (deduplicated by timestamp, sorted).
    ///
    /// Write errors are reported but never fatal.
    pub fn save_candles(&self) {
        if let Err(e) = std::fs::create_dir_all(&self.candle_dir) {
            warn!(error = %e, dir = %self.candle_dir.display(), "failed to create candle dir");
            return;
        }

        let snapshot: Vec<(Asset, Vec<Candle>)> = {
            let map = self.series.read();
            map.iter()
                .map(|(asset, s)| (*asset, s.candles.iter().cloned().collect()))
                .collect()
        };

        for (asset, candles) in snapshot {
            if candles.is_empty() {
                continue;
            }
            let path = self.candle_dir.join(format!("{asset}.jsonl"));
            if let Err(e) = merge_and_write(&path, &candles) {
                warn!(asset = %asset, error = %e, "failed to write candle snapshot");
            } else {
                debug!(asset = %asset, count = candles.len(), "candle snapshot saved");
            }
        }
    }

    /// Load saved candles from disk so indicators can fire immediately after
    /// a restart. Read errors yield an empty series with a warning.
    pub fn preload_from_disk(&self) {
        for asset in Asset::ALL {
            let path = self.candle_dir.join(format!("{asset}.jsonl"));
            let candles = match load_candle_file(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(asset = %asset, error = %e, "failed to preload candles");
                    continue;
                }
            };
            if candles.is_empty() {
                continue;
            }
            let start = candles.len().saturating_sub(self.maxlen);
            let recent = &candles[start..];

            let mut map = self.series.write();
            let s = map.entry(asset).or_default();
            s.candles = recent.iter().cloned().collect();
            let last_close = recent.last().map(|c| c.close);
            s.latest_price = last_close;
            s.prev_price = last_close;
            info!(asset = %asset, count = recent.len(), "preloaded candles from disk");
        }
    }
}

/// Merge `candles` with the existing file content (dedup by timestamp),
/// then write sorted jsonl atomically (tmp + rename).
fn merge_and_write(path: &Path, candles: &[Candle]) -> Result<()> {
    let mut by_ts: HashMap<i64, Candle> = HashMap::new();

    if path.exists() {
        if let Ok(existing) = load_candle_file(path) {
            for c in existing {
                by_ts.insert(c.timestamp, c);
            }
        }
    }
    for c in candles {
        by_ts.insert(c.timestamp, c.clone());
    }

    let mut sorted: Vec<&Candle> = by_ts.values().collect();
    sorted.sort_by_key(|c| c.timestamp);

    let mut out = String::new();
    for c in &sorted {
        out.push_str(&serde_json::to_string(c)?);
        out.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, out).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename onto {}", path.display()))?;
    Ok(())
}

/// Load all candles from a jsonl file, skipping corrupted lines, sorted by
/// timestamp. A missing file yields an empty vec.
fn load_candle_file(path: &Path) -> Result<Vec<Candle>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut candles: Vec<Candle> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Candle>(line) {
            Ok(c) => candles.push(c),
            Err(_) => continue, // skip corrupted lines
        }
    }
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}
