// =============================================================================
// Killshot Engine — late-window direction snipe
// =============================================================================
//
// In the final seconds of a window the spot direction is close to
// deterministic for the outcome, so this engine watches every active window
// inside the kill zone and fires a FOK taker order at the winning side:
//
//   1. Pick the freshest price source (oracle if <5 s old, else exchange)
//   2. Require |delta from the window open| >= the direction threshold
//   3. Require the winning token's ask at or above the 25¢ floor
//      (no gambling on near-zero tokens; no ceiling — a 95¢ entry at T-20s
//      still wins almost always)
//   4. FOK buy at ask + 1¢, clamped to 99¢, minimum five shares
//
// Skipped windows get a short cooldown and retry; only an actual fill
// permanently marks a window traded. A daily loss cap (reset at local
// midnight) halts new fires once resolved losses reach it.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::clob::{ClobClient, OrderRequest};
use crate::killshot::tracker::{KillTrade, KillTracker};
use crate::market_data::{OraclePrices, PriceCache};
use crate::runtime_config::KillshotParams;
use crate::tracker::winner_from_market;
use crate::types::{Direction, Side, TimeInForce};
use crate::windows::{Window, WindowTracker};

/// Oracle samples older than this fall back to the exchange feed.
const ORACLE_FRESH_S: u64 = 5;
/// Any price older than this is unusable for a snipe.
const PRICE_STALE_S: f64 = 15.0;
/// Cooldown between retries of a skipped window.
const SKIP_COOLDOWN_S: i64 = 1;
/// Minimum book price — below this the token is a lottery ticket.
const BOOK_FLOOR: f64 = 0.25;
/// Exchange-side minimum order size.
const MIN_SHARES: f64 = 5.0;
/// Forget traded/skip bookkeeping after this long.
const CLEANUP_AGE_S: i64 = 3_600;

pub struct KillshotEngine {
    cfg: KillshotParams,
    cache: Arc<PriceCache>,
    oracle: Arc<OraclePrices>,
    client: Arc<ClobClient>,
    tracker: Arc<KillTracker>,
    /// market_id -> fire time. Permanent within retention: never re-enter.
    traded_windows: RwLock<HashMap<String, i64>>,
    /// market_id -> last skip time. Retry after the cooldown.
    skip_cooldown: RwLock<HashMap<String, i64>>,
    kill_zone_logged: RwLock<HashSet<String>>,
    daily_loss: RwLock<f64>,
    daily_reset_date: RwLock<String>,
}

impl KillshotEngine {
    pub fn new(
        cfg: KillshotParams,
        cache: Arc<PriceCache>,
        oracle: Arc<OraclePrices>,
        client: Arc<ClobClient>,
        tracker: Arc<KillTracker>,
    ) -> Self {
        Self {
            cfg,
            cache,
            oracle,
            client,
            tracker,
            traded_windows: RwLock::new(HashMap::new()),
            skip_cooldown: RwLock::new(HashMap::new()),
            kill_zone_logged: RwLock::new(HashSet::new()),
            daily_loss: RwLock::new(0.0),
            daily_reset_date: RwLock::new(String::new()),
        }
    }

    /// One engine pass over all active windows.
    pub async fn tick(&self, windows: &[Window], window_tracker: &WindowTracker, now: i64) {
        self.maybe_daily_reset();

        if *self.daily_loss.read() >= self.cfg.daily_loss_cap_usd {
            return;
        }

        for window in windows {
            if window.traded || self.traded_windows.read().contains_key(&window.market_id) {
                continue;
            }

            let remaining = window.end_ts - now;
            if !in_kill_zone(remaining, self.cfg.min_window_seconds, self.cfg.window_seconds) {
                continue;
            }

            let last_skip = self
                .skip_cooldown
                .read()
                .get(&window.market_id)
                .copied()
                .unwrap_or(0);
            if now - last_skip < SKIP_COOLDOWN_S {
                continue;
            }

            if self.kill_zone_logged.write().insert(window.market_id.clone()) {
                info!(
                    asset = %window.asset,
                    market = %window.market_id,
                    remaining_s = remaining,
                    open_price = window.open_price,
                    "kill zone entered"
                );
            }

            self.evaluate_window(window, window_tracker, remaining, now).await;
        }
    }

    /// Feed resolved losses into the daily counter.
    pub fn report_resolved(&self, trades: &[KillTrade]) {
        for trade in trades {
            if trade.outcome == "loss" {
                let mut loss = self.daily_loss.write();
                *loss += trade.pnl.abs();
                info!(
                    added = trade.pnl.abs(),
                    daily_loss = *loss,
                    cap = self.cfg.daily_loss_cap_usd,
                    "killshot daily loss updated"
                );
            }
        }
    }

    /// Resolve pending trades and update the loss cap. Paper mode reads the
    /// outcome from the spot direction; live mode reads each due market's
    /// final winner from the CLOB, the same way the performance tracker
    /// resolves directional trades.
    pub async fn resolve(&self, now: i64) {
        let resolved = if self.cfg.dry_run {
            let cache = self.cache.clone();
            self.tracker.resolve_trades(
                |trade| {
                    cache.price(trade.asset).map(|price| {
                        if price > trade.open_price {
                            Direction::Up
                        } else {
                            Direction::Down
                        }
                    })
                },
                now,
            )
        } else {
            let mut finals: HashMap<String, Direction> = HashMap::new();
            for market_id in self.tracker.due_market_ids(now) {
                match self.client.get_market(&market_id).await {
                    Ok(market) => {
                        if let Some(dir) = winner_from_market(&market) {
                            finals.insert(market_id, dir);
                        }
                    }
                    Err(e) => {
                        debug!(market = %market_id, error = %e, "killshot resolution fetch failed");
                    }
                }
            }
            self.tracker
                .resolve_trades(|trade| finals.get(&trade.market_id).copied(), now)
        };

        if !resolved.is_empty() {
            self.report_resolved(&resolved);
        }
    }

    /// Drop bookkeeping entries older than an hour.
    pub fn cleanup_expired(&self, now: i64) {
        self.traded_windows
            .write()
            .retain(|_, t| now - *t <= CLEANUP_AGE_S);
        self.skip_cooldown
            .write()
            .retain(|_, t| now - *t <= CLEANUP_AGE_S);
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn maybe_daily_reset(&self) {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let mut date = self.daily_reset_date.write();
        if *date != today {
            *date = today;
            *self.daily_loss.write() = 0.0;
            self.kill_zone_logged.write().clear();
            self.skip_cooldown.write().clear();
            info!("killshot daily reset, loss counter cleared");
        }
    }

    fn set_skip(&self, market_id: &str, now: i64) {
        self.skip_cooldown.write().insert(market_id.to_string(), now);
    }

    /// Freshest available price: oracle first, exchange tape second.
    fn best_price(&self, asset: crate::types::Asset) -> Option<(f64, f64, &'static str)> {
        if let Some(price) = self
            .oracle
            .price(asset, Duration::from_secs(ORACLE_FRESH_S))
        {
            return Some((price, self.oracle.price_age_secs(asset), "oracle"));
        }
        self.cache.price(asset).map(|p| (p, 0.0, "spot"))
    }

    async fn evaluate_window(
        &self,
        window: &Window,
        window_tracker: &WindowTracker,
        remaining: i64,
        now: i64,
    ) {
        let Some((spot, age, source)) = self.best_price(window.asset) else {
            self.set_skip(&window.market_id, now);
            return;
        };
        if age > PRICE_STALE_S {
            self.set_skip(&window.market_id, now);
            return;
        }

        let Some(direction) =
            direction_from_delta(spot, window.open_price, self.cfg.direction_threshold)
        else {
            self.set_skip(&window.market_id, now);
            return;
        };
        let delta = (spot - window.open_price) / window.open_price;

        let winning_token = match direction {
            Direction::Up => &window.up_token_id,
            Direction::Down => &window.down_token_id,
        };

        let book = match self.client.get_book(winning_token).await {
            Ok(b) => b,
            Err(e) => {
                debug!(market = %window.market_id, error = %e, "killshot book fetch failed, retrying");
                self.set_skip(&window.market_id, now);
                return;
            }
        };
        let best_bid = book.best_bid();
        let best_ask = book.best_ask();

        let Some(book_price) = entry_from_book(best_ask, best_bid) else {
            debug!(
                direction = %direction,
                asset = %window.asset,
                remaining_s = remaining,
                "killshot book below floor, retry after cooldown"
            );
            self.set_skip(&window.market_id, now);
            return;
        };

        // ── FIRE ─────────────────────────────────────────────────────────
        let (entry_price, shares, size_usd) = if self.cfg.dry_run {
            let entry = (book_price * 100.0).round() / 100.0;
            let (shares, size) = sized_shares(self.cfg.max_bet_usd, entry);
            (entry, shares, size)
        } else {
            let limit = fok_limit_price(best_ask);
            let (shares, size) = sized_shares(self.cfg.max_bet_usd, limit);
            let req = OrderRequest {
                token_id: winning_token.clone(),
                price: limit,
                size: shares,
                side: Side::Buy,
                time_in_force: TimeInForce::Fok,
            };
            match self.client.post_order(&req).await {
                Ok(ack) if ack.is_filled() => (limit, shares, size),
                Ok(ack) => {
                    // No fill: the window stays live, retry after cooldown.
                    warn!(status = %ack.status, market = %window.market_id, "killshot FOK not filled");
                    self.set_skip(&window.market_id, now);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, market = %window.market_id, "killshot order failed");
                    self.set_skip(&window.market_id, now);
                    return;
                }
            }
        };

        // Only an actual fill blacklists the window.
        self.traded_windows
            .write()
            .insert(window.market_id.clone(), now);
        window_tracker.mark_traded(&window.market_id);

        self.tracker.record_trade(KillTrade {
            timestamp: now,
            asset: window.asset,
            market_id: window.market_id.clone(),
            question: window.question.clone(),
            direction,
            entry_price,
            size_usd,
            shares,
            window_end_ts: window.end_ts,
            spot_delta_pct: (delta * 1e6).round() / 1e6,
            open_price: window.open_price,
            market_bid: best_bid.unwrap_or(0.0),
            market_ask: best_ask.unwrap_or(0.0),
            outcome: String::new(),
            pnl: 0.0,
            resolved_at: 0,
        });

        info!(
            mode = if self.cfg.dry_run { "PAPER" } else { "LIVE" },
            direction = %direction,
            asset = %window.asset,
            delta_pct = delta * 100.0,
            entry_cents = entry_price * 100.0,
            size_usd,
            shares,
            remaining_s = remaining,
            source,
            "killshot fired"
        );
    }
}

// =============================================================================
// Pure decision helpers
// =============================================================================

/// Inside the kill zone: close enough to the bell for the direction to be
/// locked, but not so close a fill is impossible.
pub fn in_kill_zone(remaining_s: i64, min_window_s: i64, window_s: i64) -> bool {
    remaining_s >= min_window_s && remaining_s <= window_s
}

/// Direction from the window-open delta, once it clears the threshold.
pub fn direction_from_delta(spot: f64, open_price: f64, threshold: f64) -> Option<Direction> {
    if open_price <= 0.0 {
        return None;
    }
    let delta = (spot - open_price) / open_price;
    if delta.abs() < threshold {
        return None;
    }
    Some(if delta > 0.0 { Direction::Up } else { Direction::Down })
}

/// Usable entry price from the book: the ask (or bid as fallback), subject
/// to the 25¢ floor. No ceiling.
pub fn entry_from_book(best_ask: Option<f64>, best_bid: Option<f64>) -> Option<f64> {
    let price = best_ask.filter(|a| *a > 0.0).or(best_bid.filter(|b| *b > 0.0))?;
    (price >= BOOK_FLOOR).then_some(price)
}

/// FOK limit: cross the spread at ask + 1¢, clamped to 99¢.
pub fn fok_limit_price(best_ask: Option<f64>) -> f64 {
    let raw = match best_ask.filter(|a| *a > 0.0) {
        Some(ask) => ((ask + 0.01) * 100.0).round() / 100.0,
        None => 0.90,
    };
    raw.min(0.99)
}

/// Shares for the bet cap at the given price, bumped to the exchange
/// minimum of five shares when needed.
pub fn sized_shares(max_bet_usd: f64, price: f64) -> (f64, f64) {
    let mut shares = ((max_bet_usd / price) * 100.0).round() / 100.0;
    if shares < MIN_SHARES {
        shares = MIN_SHARES;
    }
    let size_usd = ((shares * price) * 100.0).round() / 100.0;
    (shares, size_usd)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_zone_bounds() {
        assert!(!in_kill_zone(61, 10, 60));
        assert!(in_kill_zone(60, 10, 60));
        assert!(in_kill_zone(35, 10, 60));
        assert!(in_kill_zone(10, 10, 60));
        assert!(!in_kill_zone(9, 10, 60));
        assert!(!in_kill_zone(-5, 10, 60));
    }

    #[test]
    fn delta_threshold_gates_direction() {
        // 0.05% move under a 0.1% threshold: no signal.
        assert_eq!(direction_from_delta(100.05, 100.0, 0.001), None);
        assert_eq!(
            direction_from_delta(100.2, 100.0, 0.001),
            Some(Direction::Up)
        );
        assert_eq!(
            direction_from_delta(99.8, 100.0, 0.001),
            Some(Direction::Down)
        );
        assert_eq!(direction_from_delta(100.0, 0.0, 0.001), None);
    }

    #[test]
    fn book_floor_rejects_lottery_tickets() {
        assert_eq!(entry_from_book(Some(0.20), None), None);
        assert_eq!(entry_from_book(Some(0.25), None), Some(0.25));
        // No ceiling: a 95¢ ask is acceptable.
        assert_eq!(entry_from_book(Some(0.95), None), Some(0.95));
        // Bid-only book still prices the entry.
        assert_eq!(entry_from_book(None, Some(0.40)), Some(0.40));
        assert_eq!(entry_from_book(None, None), None);
    }

    #[test]
    fn fok_limit_crosses_the_spread() {
        assert!((fok_limit_price(Some(0.60)) - 0.61).abs() < 1e-9);
        // Clamped at 99¢.
        assert!((fok_limit_price(Some(0.985)) - 0.99).abs() < 1e-9);
        // Fallback without an ask.
        assert!((fok_limit_price(None) - 0.90).abs() < 1e-9);
    }

    #[test]
    fn share_sizing_and_minimum() {
        let (shares, size) = sized_shares(5.0, 0.60);
        assert!((shares - 8.33).abs() < 0.01);
        assert!((size - shares * 0.60).abs() < 0.01);

        // A tiny bet bumps to the 5-share minimum and re-prices the stake.
        let (shares, size) = sized_shares(1.0, 0.90);
        assert_eq!(shares, 5.0);
        assert!((size - 4.5).abs() < 1e-9);
    }

    #[test]
    fn daily_loss_cap_accumulates_losses_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = KillshotEngine::new(
            KillshotParams::default(),
            Arc::new(PriceCache::new(10, dir.path())),
            Arc::new(OraclePrices::new()),
            Arc::new(ClobClient::new("https://clob.invalid", "", "", "")),
            Arc::new(KillTracker::new(dir.path().join("k.jsonl"), 0)),
        );

        let mut win = KillTrade {
            timestamp: 0,
            asset: crate::types::Asset::Bitcoin,
            market_id: "m".into(),
            question: "q".into(),
            direction: Direction::Up,
            entry_price: 0.6,
            size_usd: 5.0,
            shares: 8.33,
            window_end_ts: 0,
            spot_delta_pct: 0.002,
            open_price: 100.0,
            market_bid: 0.0,
            market_ask: 0.0,
            outcome: "win".into(),
            pnl: 3.33,
            resolved_at: 0,
        };
        engine.report_resolved(std::slice::from_ref(&win));
        assert_eq!(*engine.daily_loss.read(), 0.0);

        win.outcome = "loss".into();
        win.pnl = -5.0;
        engine.report_resolved(std::slice::from_ref(&win));
        engine.report_resolved(std::slice::from_ref(&win));
        assert_eq!(*engine.daily_loss.read(), 10.0);
    }

    #[tokio::test]
    async fn paper_resolution_comes_from_the_spot_direction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(PriceCache::new(10, dir.path()));
        let tracker = Arc::new(KillTracker::new(dir.path().join("k.jsonl"), 0));
        let engine = KillshotEngine::new(
            KillshotParams::default(), // dry_run
            cache.clone(),
            Arc::new(OraclePrices::new()),
            Arc::new(ClobClient::new("https://clob.invalid", "", "", "")),
            tracker.clone(),
        );

        // UP trade, but spot finished below the window open: a loss that
        // must feed the daily counter.
        tracker.record_trade(KillTrade {
            timestamp: 970,
            asset: crate::types::Asset::Bitcoin,
            market_id: "m".into(),
            question: "q".into(),
            direction: Direction::Up,
            entry_price: 0.6,
            size_usd: 5.0,
            shares: 8.33,
            window_end_ts: 1_000,
            spot_delta_pct: 0.002,
            open_price: 100.0,
            market_bid: 0.0,
            market_ask: 0.0,
            outcome: String::new(),
            pnl: 0.0,
            resolved_at: 0,
        });
        cache.update_tick(crate::types::Asset::Bitcoin, 99.0, 1.0, 1_005);

        engine.resolve(1_020).await;
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(*engine.daily_loss.read(), 5.0);
    }

    #[test]
    fn cleanup_drops_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let engine = KillshotEngine::new(
            KillshotParams::default(),
            Arc::new(PriceCache::new(10, dir.path())),
            Arc::new(OraclePrices::new()),
            Arc::new(ClobClient::new("https://clob.invalid", "", "", "")),
            Arc::new(KillTracker::new(dir.path().join("k.jsonl"), 0)),
        );
        engine.traded_windows.write().insert("old".into(), 0);
        engine.traded_windows.write().insert("new".into(), 4_000);
        engine.skip_cooldown.write().insert("old".into(), 0);

        engine.cleanup_expired(4_000);
        assert!(!engine.traded_windows.read().contains_key("old"));
        assert!(engine.traded_windows.read().contains_key("new"));
        assert!(engine.skip_cooldown.read().is_empty());
    }
}
