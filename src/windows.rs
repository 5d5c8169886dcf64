// =============================================================================
// Window Tracker — timed-market windows and their strike prices
// =============================================================================
//
// Up/Down market questions carry their window in Eastern time, e.g.
// "Bitcoin Up or Down - June 1, 3:00PM-3:05PM ET". This module parses the
// range (DST-correct via the America/New_York zone), captures the asset's
// open (strike) price from the candle cache at window start, and tracks
// each window until shortly after it closes.
//
// `traded` is monotonic: once the killshot engine fires into a window it
// never re-enters. Skipped windows are NOT tracked here — skip cooldowns
// live in the killshot engine so a failed book lookup can retry.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info};

use crate::discovery::DiscoveredMarket;
use crate::market_data::PriceCache;
use crate::types::Asset;

/// Keep windows around this long past close for resolution checks.
const WINDOW_RETAIN_S: i64 = 120;
/// A window that started this recently may use the live spot as its strike.
const FRESH_WINDOW_S: i64 = 120;
/// Strike fallback: closest candle within this many seconds.
const STRIKE_FALLBACK_S: i64 = 300;

/// A single timed trading window.
#[derive(Debug, Clone)]
pub struct Window {
    pub market_id: String,
    pub question: String,
    pub asset: Asset,
    pub up_token_id: String,
    pub down_token_id: String,
    pub start_ts: i64,
    pub end_ts: i64,
    /// Asset price at window start — decides the eventual up/down outcome.
    pub open_price: f64,
    pub traded: bool,
}

pub struct WindowTracker {
    cache: Arc<PriceCache>,
    active: RwLock<HashMap<String, Window>>,
    range_re: Regex,
    date_re: Regex,
}

impl WindowTracker {
    pub fn new(cache: Arc<PriceCache>) -> Self {
        Self {
            cache,
            active: RwLock::new(HashMap::new()),
            range_re: Regex::new(r"(?i)(\d{1,2}):(\d{2})(AM|PM)-(\d{1,2}):(\d{2})(AM|PM)\s+ET")
                .expect("valid window-range regex"),
            date_re: Regex::new(
                r"(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2})",
            )
            .expect("valid window-date regex"),
        }
    }

    /// Fold freshly discovered markets into the window set and clean out
    /// windows past retention.
    pub fn update(&self, markets: &[DiscoveredMarket], now: i64) {
        {
            let mut active = self.active.write();
            active.retain(|_, w| w.end_ts >= now - WINDOW_RETAIN_S);
        }

        for dm in markets {
            if self.active.read().contains_key(&dm.market_id) {
                continue;
            }
            let (Some(up_tid), Some(down_tid)) = (dm.up_token_id(), dm.down_token_id()) else {
                continue;
            };

            let Some((start_ts, end_ts)) = self.parse_window_times(&dm.question, now) else {
                continue;
            };

            let open_price = self.strike_price(dm.asset, start_ts, now);
            if open_price <= 0.0 {
                debug!(market = %dm.market_id, asset = %dm.asset, "no strike price for window yet");
                continue;
            }

            let window = Window {
                market_id: dm.market_id.clone(),
                question: dm.question.clone(),
                asset: dm.asset,
                up_token_id: up_tid,
                down_token_id: down_tid,
                start_ts,
                end_ts,
                open_price,
                traded: false,
            };
            info!(
                market = %window.market_id,
                asset = %window.asset,
                open_price = window.open_price,
                remaining_s = end_ts - now,
                "window tracked"
            );
            self.active.write().insert(dm.market_id.clone(), window);
        }
    }

    pub fn all_active_windows(&self) -> Vec<Window> {
        self.active.read().values().cloned().collect()
    }

    pub fn get_window(&self, market_id: &str) -> Option<Window> {
        self.active.read().get(market_id).cloned()
    }

    /// Mark a window as traded. Monotonic — there is no way back.
    pub fn mark_traded(&self, market_id: &str) {
        if let Some(w) = self.active.write().get_mut(market_id) {
            w.traded = true;
        }
    }

    // -------------------------------------------------------------------------
    // Parsing
    // -------------------------------------------------------------------------

    /// Parse "(Month Day,) Hh:MmAM/PM-Hh:MmAM/PM ET" into unix timestamps.
    /// The year is inferred from `now`, handling the December/January seam.
    /// An end at or before the start rolls to the next day.
    pub fn parse_window_times(&self, question: &str, now: i64) -> Option<(i64, i64)> {
        let date_caps = self.date_re.captures(question)?;
        let range_caps = self.range_re.captures(question)?;

        let month = month_number(date_caps.get(1)?.as_str())?;
        let day: u32 = date_caps.get(2)?.as_str().parse().ok()?;

        let start_hour = hour_24(
            range_caps.get(1)?.as_str().parse().ok()?,
            range_caps.get(3)?.as_str(),
        );
        let start_min: u32 = range_caps.get(2)?.as_str().parse().ok()?;
        let end_hour = hour_24(
            range_caps.get(4)?.as_str().parse().ok()?,
            range_caps.get(6)?.as_str(),
        );
        let end_min: u32 = range_caps.get(5)?.as_str().parse().ok()?;

        let now_et = Utc.timestamp_opt(now, 0).single()?.with_timezone(&New_York);
        let mut year = now_et.year();
        let month_diff = now_et.month() as i32 - month as i32;
        if month_diff > 6 {
            year += 1;
        } else if month_diff < -6 {
            year -= 1;
        }

        let start_ts = et_timestamp(year, month, day, start_hour, start_min)?;
        let mut end_ts = et_timestamp(year, month, day, end_hour, end_min)?;
        if end_ts <= start_ts {
            end_ts += 86_400;
        }
        Some((start_ts, end_ts))
    }

    // -------------------------------------------------------------------------
    // Strike capture
    // -------------------------------------------------------------------------

    /// The asset's price at window start: the minute-aligned candle if the
    /// cache has it, the live spot for a freshly started window, else the
    /// closest candle within five minutes.
    fn strike_price(&self, asset: Asset, start_ts: i64, now: i64) -> f64 {
        let start_minute = start_ts - start_ts.rem_euclid(60);
        let candles = self.cache.candles(asset, 300);

        for c in &candles {
            if (c.timestamp - start_minute).abs() < 60 {
                return c.open;
            }
        }

        if now - start_ts < FRESH_WINDOW_S {
            if let Some(price) = self.cache.price(asset) {
                return price;
            }
        }

        candles
            .iter()
            .min_by_key(|c| (c.timestamp - start_minute).abs())
            .filter(|c| (c.timestamp - start_minute).abs() < STRIKE_FALLBACK_S)
            .map(|c| c.close)
            .unwrap_or(0.0)
    }
}

fn month_number(name: &str) -> Option<u32> {
    Some(match name {
        "January" => 1,
        "February" => 2,
        "March" => 3,
        "April" => 4,
        "May" => 5,
        "June" => 6,
        "July" => 7,
        "August" => 8,
        "September" => 9,
        "October" => 10,
        "November" => 11,
        "December" => 12,
        _ => return None,
    })
}

fn hour_24(hour_12: u32, meridiem: &str) -> u32 {
    (hour_12 % 12) + if meridiem.eq_ignore_ascii_case("pm") { 12 } else { 0 }
}

/// Local ET wall-clock to unix seconds, resolving DST ambiguity to the
/// earlier instant.
fn et_timestamp(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<i64> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour % 24, minute, 0)?;
    match New_York.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.timestamp()),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.timestamp()),
        LocalResult::None => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveredMarket;
    use crate::types::Timeframe;

    fn tracker() -> WindowTracker {
        let dir = tempfile::tempdir().unwrap();
        WindowTracker::new(Arc::new(PriceCache::new(400, dir.path())))
    }

    fn tracker_with_cache() -> (WindowTracker, Arc<PriceCache>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(PriceCache::new(400, dir.path()));
        (WindowTracker::new(cache.clone()), cache)
    }

    /// Unix timestamp of a known ET instant: June 1 2025 15:00 EDT.
    fn june1_3pm_et() -> i64 {
        et_timestamp(2025, 6, 1, 15, 0).unwrap()
    }

    #[test]
    fn parses_afternoon_window() {
        let t = tracker();
        let now = june1_3pm_et();
        let (start, end) = t
            .parse_window_times("Bitcoin Up or Down - June 1, 3:00PM-3:05PM ET", now)
            .expect("should parse");
        assert_eq!(start, now);
        assert_eq!(end - start, 300);
    }

    #[test]
    fn parses_midnight_rollover() {
        let t = tracker();
        let now = et_timestamp(2025, 6, 1, 23, 50).unwrap();
        let (start, end) = t
            .parse_window_times("Ethereum Up or Down - June 1, 11:55PM-12:00AM ET", now)
            .expect("should parse");
        assert_eq!(end - start, 300);
        assert!(end > start);
    }

    #[test]
    fn infers_year_across_december_seam() {
        let t = tracker();
        // Late December now, market named for January: next year.
        let now = et_timestamp(2025, 12, 30, 12, 0).unwrap();
        let (start, _) = t
            .parse_window_times("Bitcoin Up or Down - January 2, 1:00PM-1:05PM ET", now)
            .expect("should parse");
        let start_et = Utc.timestamp_opt(start, 0).unwrap().with_timezone(&New_York);
        assert_eq!(start_et.year(), 2026);
    }

    #[test]
    fn winter_and_summer_offsets_differ() {
        // 12:00 ET is 17:00 UTC in January (EST) but 16:00 UTC in July (EDT).
        let jan = et_timestamp(2025, 1, 15, 12, 0).unwrap();
        let jul = et_timestamp(2025, 7, 15, 12, 0).unwrap();
        let jan_utc_hour = Utc.timestamp_opt(jan, 0).unwrap().format("%H").to_string();
        let jul_utc_hour = Utc.timestamp_opt(jul, 0).unwrap().format("%H").to_string();
        assert_eq!(jan_utc_hour, "17");
        assert_eq!(jul_utc_hour, "16");
    }

    #[test]
    fn unparseable_question_is_skipped() {
        let t = tracker();
        assert!(t.parse_window_times("Will it rain tomorrow?", june1_3pm_et()).is_none());
        assert!(t
            .parse_window_times("Bitcoin Up or Down - 3:00PM-3:05PM ET", june1_3pm_et())
            .is_none());
    }

    #[test]
    fn strike_comes_from_start_minute_candle() {
        let (t, cache) = tracker_with_cache();
        let start = june1_3pm_et();
        // Candles spanning the window start; open of the start-minute candle
        // must win.
        for i in -5i64..2 {
            let ts = start + i * 60;
            cache.update_tick(Asset::Bitcoin, 100.0 + i as f64, 1.0, ts);
            cache.update_tick(Asset::Bitcoin, 100.5 + i as f64, 1.0, ts + 30);
        }
        let strike = t.strike_price(Asset::Bitcoin, start, start + 60);
        assert_eq!(strike, 100.0);
    }

    #[test]
    fn fresh_window_falls_back_to_spot() {
        let (t, cache) = tracker_with_cache();
        let start = june1_3pm_et();
        // Only an old tick far from the window, but the window just started.
        cache.update_tick(Asset::Bitcoin, 97_123.0, 1.0, start - 3_600);
        let strike = t.strike_price(Asset::Bitcoin, start, start + 30);
        assert_eq!(strike, 97_123.0);
    }

    #[test]
    fn update_tracks_and_cleans_windows() {
        let (t, cache) = tracker_with_cache();
        let start = june1_3pm_et();
        cache.update_tick(Asset::Bitcoin, 100.0, 1.0, start);

        let dm = DiscoveredMarket {
            market_id: "m1".into(),
            question: "Bitcoin Up or Down - June 1, 3:00PM-3:05PM ET".into(),
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M5,
            end_ts: start + 300,
            tokens: vec![
                ("up1".to_string(), "Up".to_string()),
                ("dn1".to_string(), "Down".to_string()),
            ],
        };
        t.update(&[dm.clone()], start + 10);
        assert_eq!(t.all_active_windows().len(), 1);
        let w = t.get_window("m1").unwrap();
        assert_eq!(w.up_token_id, "up1");
        assert_eq!(w.down_token_id, "dn1");
        assert!(!w.traded);

        t.mark_traded("m1");
        assert!(t.get_window("m1").unwrap().traded);

        // Far past retention the window is cleaned.
        t.update(&[], w.end_ts + WINDOW_RETAIN_S + 1);
        assert!(t.get_window("m1").is_none());
    }

    #[test]
    fn window_without_both_tokens_is_ignored() {
        let (t, cache) = tracker_with_cache();
        let start = june1_3pm_et();
        cache.update_tick(Asset::Bitcoin, 100.0, 1.0, start);
        let dm = DiscoveredMarket {
            market_id: "m2".into(),
            question: "Bitcoin Up or Down - June 1, 3:00PM-3:05PM ET".into(),
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M5,
            end_ts: start + 300,
            tokens: vec![("up1".to_string(), "Up".to_string())],
        };
        t.update(&[dm], start + 10);
        assert!(t.all_active_windows().is_empty());
    }
}
