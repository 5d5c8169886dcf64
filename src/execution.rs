// =============================================================================
// Executor — order placement, fill polling, and stop-loss management
// =============================================================================
//
// Dry-run mode never contacts the order book: fills are simulated with a
// deterministic market-prefixed order id, and unfilled positions expire by
// timeframe. Live mode posts GTC limits through the CLOB client and keeps
// only acknowledged orders.
//
// Stop-loss policy per position (once older than the settle age):
//   - an empty bid side three checks in a row means liquidity is gone:
//     emergency-sell at the minimum price
//   - a best bid under 0.5% of a dollar is a resolved/worthless token:
//     drop the position without selling
//   - a best bid below half the entry price sells at the bid to recover
//     part of the stake
//
// Invariants: order price always lives in (0.01, 0.99) and
// shares × entry_price reproduces the stake to cent precision.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::clob::{ClobClient, OrderRequest};
use crate::risk::{Position, PositionTracker};
use crate::signals::Signal;
use crate::types::{Side, Strategy, TimeInForce};

/// Sell once the bid drops below this fraction of the entry price.
const STOP_LOSS_THRESHOLD: f64 = 0.50;
/// Let fresh orders settle before stop-loss checks apply.
const STOP_LOSS_MIN_AGE_S: i64 = 60;
/// Consecutive empty-bid checks before the emergency exit.
const NO_BID_STRIKES: u32 = 3;
/// Below this bid the token is effectively resolved against us.
const WORTHLESS_BID: f64 = 0.005;
/// Bids between worthless and this are too thin to act on.
const DUST_BID: f64 = 0.02;

// Fallback sizing (used when no conviction size is supplied): a quality
// blend of confidence and edge mapped into a dollar band, overlaid with a
// quarter-Kelly multiplier once enough trades have resolved.
const TRADE_MIN_USD: f64 = 10.0;
const TRADE_MAX_USD: f64 = 20.0;
const KELLY_MIN_RESOLVED: usize = 10;
const KELLY_FRACTION: f64 = 0.25;
const KELLY_MIN_MULT: f64 = 0.10;
const KELLY_MAX_MULT: f64 = 2.50;

/// A recorded stop-loss exit, for alerting and the trade log.
#[derive(Debug, Clone)]
pub struct StopLossEvent {
    pub order_id: String,
    pub entry_price: f64,
    pub bid: f64,
    pub recovery_usd: f64,
    pub size_usd: f64,
}

/// What the stop-loss evaluator decided for one position.
#[derive(Debug, Clone, PartialEq)]
pub enum StopAction {
    /// Too young — let the order settle.
    TooYoung,
    /// Straddles exit elsewhere.
    NotApplicable,
    /// Empty bid side, strike counted, not yet at the limit.
    NoBidStrike,
    /// Empty bid side for three straight checks: sell at the floor.
    EmergencySell,
    /// Token is worthless; drop it without selling.
    RemoveWorthless,
    /// Bid collapsed below the threshold: sell at this price.
    Sell { price: f64 },
    /// Nothing to do.
    Hold,
}

/// Pure stop-loss decision for one position.
pub fn evaluate_stop(
    entry_price: f64,
    age_secs: i64,
    strategy: Strategy,
    best_bid: Option<f64>,
    prior_no_bid_strikes: u32,
) -> StopAction {
    if age_secs < STOP_LOSS_MIN_AGE_S {
        return StopAction::TooYoung;
    }
    if strategy == Strategy::Straddle {
        return StopAction::NotApplicable;
    }

    let Some(bid) = best_bid.filter(|b| *b > 0.0) else {
        return if prior_no_bid_strikes + 1 >= NO_BID_STRIKES {
            StopAction::EmergencySell
        } else {
            StopAction::NoBidStrike
        };
    };

    if bid < WORTHLESS_BID {
        return StopAction::RemoveWorthless;
    }
    if bid < DUST_BID {
        return StopAction::Hold;
    }

    if bid < entry_price * STOP_LOSS_THRESHOLD {
        let price = ((bid * 100.0).round() / 100.0).clamp(0.01, 0.99);
        return StopAction::Sell { price };
    }

    StopAction::Hold
}

pub struct Executor {
    client: Arc<ClobClient>,
    tracker: Arc<PositionTracker>,
    dry_run: bool,
    /// Trade log, read for the Kelly fallback sizing.
    trades_path: PathBuf,
    /// order_id -> consecutive empty-bid checks.
    no_bid_counts: RwLock<HashMap<String, u32>>,
    last_stop_loss: RwLock<Option<StopLossEvent>>,
}

impl Executor {
    pub fn new(
        client: Arc<ClobClient>,
        tracker: Arc<PositionTracker>,
        dry_run: bool,
        trades_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            tracker,
            dry_run,
            trades_path: trades_path.into(),
            no_bid_counts: RwLock::new(HashMap::new()),
            last_stop_loss: RwLock::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    /// Place a GTC limit buy for the signal at its probability.
    ///
    /// `conviction_size` carries the conviction engine's dollar size (it has
    /// already applied regime, safety rails, and caps); `None` falls back to
    /// the quality × Kelly sizing. Returns the order id on success. A
    /// rejection logs and returns None; the caller puts the market on
    /// cooldown.
    pub async fn place_order(
        &self,
        signal: &Signal,
        market_id: &str,
        conviction_size: Option<f64>,
        now: i64,
    ) -> Option<String> {
        let size_usd = match conviction_size {
            Some(size) => size,
            None => self.fallback_size(signal),
        };
        if size_usd <= 0.0 {
            return None;
        }

        let price = ((signal.probability * 100.0).round() / 100.0).clamp(0.01, 0.99);
        let shares = size_usd / price;

        info!(
            direction = %signal.direction,
            token = &signal.token_id[..signal.token_id.len().min(16)],
            shares = format!("{shares:.2}"),
            price,
            edge_pct = signal.edge * 100.0,
            market = market_id,
            "placing order"
        );

        if self.dry_run {
            let prefix = &market_id[..market_id.len().min(8)];
            let order_id = format!("dry-run-{prefix}-{now}");
            info!(order_id = %order_id, "simulated order (dry run)");
            self.tracker.add(Position {
                market_id: market_id.to_string(),
                token_id: signal.token_id.clone(),
                direction: signal.direction,
                size_usd,
                entry_price: price,
                order_id: order_id.clone(),
                opened_at: now,
                strategy: Strategy::Directional,
                timeframe: signal.timeframe,
                asset: signal.asset,
            });
            return Some(order_id);
        }

        let req = OrderRequest {
            token_id: signal.token_id.clone(),
            price,
            size: shares,
            side: Side::Buy,
            time_in_force: TimeInForce::Gtc,
        };
        match self.client.post_order(&req).await {
            Ok(ack) => {
                self.tracker.add(Position {
                    market_id: market_id.to_string(),
                    token_id: signal.token_id.clone(),
                    direction: signal.direction,
                    size_usd,
                    entry_price: price,
                    order_id: ack.order_id.clone(),
                    opened_at: now,
                    strategy: Strategy::Directional,
                    timeframe: signal.timeframe,
                    asset: signal.asset,
                });
                Some(ack.order_id)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, market = market_id, "order placement failed (transient)");
                None
            }
            Err(e) => {
                error!(error = %e, market = market_id, "order rejected");
                None
            }
        }
    }

    /// Quality sizing with the Kelly overlay from resolved-trade history,
    /// hard-clamped into the fallback dollar band.
    fn fallback_size(&self, signal: &Signal) -> f64 {
        let resolved = load_resolved_outcomes(&self.trades_path);
        let kelly = kelly_multiplier(&resolved);
        let size = quality_size(signal.confidence, signal.edge) * kelly;
        let size = size.clamp(TRADE_MIN_USD, TRADE_MAX_USD);
        info!(
            confidence = signal.confidence,
            edge_pct = signal.edge * 100.0,
            kelly_mult = kelly,
            size_usd = size,
            "fallback sizing"
        );
        size
    }

    // -------------------------------------------------------------------------
    // Fill polling
    // -------------------------------------------------------------------------

    /// Poll order status and remove dead orders.
    ///
    /// Dry run: positions expire unfilled after the timeframe-specific bound.
    /// Live: canceled/expired orders leave the tracker; matched/filled
    /// positions stay as active holdings.
    pub async fn check_fills(&self, now: i64) {
        if self.dry_run {
            for pos in self.tracker.open_positions() {
                let age = now - pos.opened_at;
                let expiry = pos.timeframe.dry_run_expiry_secs();
                if age > expiry {
                    info!(
                        order_id = %pos.order_id,
                        age_s = age,
                        limit_s = expiry,
                        "dry-run position expired unfilled"
                    );
                    self.tracker.remove(&pos.order_id);
                }
            }
            return;
        }

        for pos in self.tracker.open_positions() {
            match self.client.get_order_status(&pos.order_id).await {
                Ok(status) => match status.as_str() {
                    "canceled" | "expired" => {
                        info!(order_id = %pos.order_id, status = %status, "order dead, removing (no fill)");
                        self.tracker.remove(&pos.order_id);
                    }
                    "matched" | "filled" => {
                        info!(order_id = %pos.order_id, size_usd = pos.size_usd, "order filled, holding");
                    }
                    _ => {}
                },
                Err(e) => {
                    warn!(order_id = %pos.order_id, error = %e, "could not check order status");
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Stop-losses
    // -------------------------------------------------------------------------

    /// Check every settled position against the stop-loss policy. Returns
    /// the number of positions exited.
    pub async fn check_stop_losses(&self, now: i64) -> usize {
        let mut stopped = 0usize;

        for pos in self.tracker.open_positions() {
            let book = match self.client.get_book(&pos.token_id).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(order_id = %pos.order_id, error = %e, "stop-loss book fetch failed");
                    continue;
                }
            };

            let strikes = self
                .no_bid_counts
                .read()
                .get(&pos.order_id)
                .copied()
                .unwrap_or(0);
            let action = evaluate_stop(
                pos.entry_price,
                now - pos.opened_at,
                pos.strategy,
                book.best_bid(),
                strikes,
            );

            match action {
                StopAction::TooYoung | StopAction::NotApplicable | StopAction::Hold => {
                    if book.best_bid().is_some() {
                        self.no_bid_counts.write().remove(&pos.order_id);
                    }
                }
                StopAction::NoBidStrike => {
                    let n = strikes + 1;
                    self.no_bid_counts.write().insert(pos.order_id.clone(), n);
                    info!(order_id = %pos.order_id, strikes = n, "stop-loss: no bids");
                }
                StopAction::EmergencySell => {
                    warn!(
                        order_id = %pos.order_id,
                        "stop-loss: liquidity gone, emergency sell at $0.01"
                    );
                    if self.sell_position(&pos, 0.01).await {
                        stopped += 1;
                    }
                }
                StopAction::RemoveWorthless => {
                    info!(order_id = %pos.order_id, "stop-loss: token worthless, dropping");
                    self.tracker.remove(&pos.order_id);
                    self.no_bid_counts.write().remove(&pos.order_id);
                    stopped += 1;
                }
                StopAction::Sell { price } => {
                    warn!(
                        order_id = %pos.order_id,
                        entry = pos.entry_price,
                        bid = price,
                        "stop-loss triggered"
                    );
                    if self.sell_position(&pos, price).await {
                        stopped += 1;
                    }
                }
            }
        }

        if stopped > 0 {
            info!(stopped, "stop-loss exits this check");
        }
        stopped
    }

    /// Sell a position's shares at `price`, record the event, and remove it.
    /// Dry run simulates the exit without posting.
    async fn sell_position(&self, pos: &Position, price: f64) -> bool {
        let shares = pos.shares();
        let recovery = price * shares;

        if !self.dry_run {
            let req = OrderRequest {
                token_id: pos.token_id.clone(),
                price,
                size: shares,
                side: Side::Sell,
                time_in_force: TimeInForce::Gtc,
            };
            if let Err(e) = self.client.post_order(&req).await {
                error!(order_id = %pos.order_id, error = %e, "stop-loss sell failed");
                return false;
            }
        }

        info!(
            order_id = %pos.order_id,
            recovered = format!("{recovery:.2}"),
            of = format!("{:.2}", pos.size_usd),
            "stop-loss sold"
        );
        *self.last_stop_loss.write() = Some(StopLossEvent {
            order_id: pos.order_id.clone(),
            entry_price: pos.entry_price,
            bid: price,
            recovery_usd: recovery,
            size_usd: pos.size_usd,
        });
        self.tracker.remove(&pos.order_id);
        self.no_bid_counts.write().remove(&pos.order_id);
        true
    }

    /// Most recent stop-loss event, if any (consumed by alerting).
    pub fn take_last_stop_loss(&self) -> Option<StopLossEvent> {
        self.last_stop_loss.write().take()
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Cancel unfilled open orders on shutdown. Filled positions stay.
    pub async fn cancel_all_open(&self) {
        if self.dry_run {
            let count = self.tracker.count();
            info!(count, "clearing dry-run positions on shutdown");
            for pos in self.tracker.open_positions() {
                self.tracker.remove(&pos.order_id);
            }
            return;
        }

        for pos in self.tracker.open_positions() {
            match self.client.get_order_status(&pos.order_id).await {
                Ok(status) if matches!(status.as_str(), "matched" | "filled") => {
                    info!(order_id = %pos.order_id, "order already filled, keeping position");
                }
                _ => {
                    if let Err(e) = self.client.cancel_order(&pos.order_id).await {
                        error!(order_id = %pos.order_id, error = %e, "failed to cancel order");
                    } else {
                        self.tracker.remove(&pos.order_id);
                    }
                }
            }
        }
    }
}

// =============================================================================
// Fallback sizing helpers
// =============================================================================

/// Blend signal confidence and edge into a dollar size inside the fallback
/// band. 0.6 confidence and 12% edge each saturate their half.
pub fn quality_size(confidence: f64, edge: f64) -> f64 {
    let conf_score = (confidence / 0.6).min(1.0);
    let edge_score = (edge / 0.12).min(1.0);
    let quality = conf_score * 0.5 + edge_score * 0.5;
    TRADE_MIN_USD + quality * (TRADE_MAX_USD - TRADE_MIN_USD)
}

/// Quarter-Kelly multiplier from resolved `(won, entry_probability)` pairs.
/// Neutral (1.0) until ten trades have resolved; a negative Kelly sizes
/// down to 0.8 rather than zero.
pub fn kelly_multiplier(resolved: &[(bool, f64)]) -> f64 {
    if resolved.len() < KELLY_MIN_RESOLVED {
        return 1.0;
    }
    let wins = resolved.iter().filter(|(won, _)| *won).count();
    let win_rate = wins as f64 / resolved.len() as f64;

    let avg_payout = resolved
        .iter()
        .map(|(_, prob)| {
            if *prob > 0.01 && *prob < 0.99 {
                1.0 / prob - 1.0
            } else {
                1.0
            }
        })
        .sum::<f64>()
        / resolved.len() as f64;
    if avg_payout <= 0.0 {
        return 1.0;
    }

    let kelly_full = (win_rate * avg_payout - (1.0 - win_rate)) / avg_payout;
    let kelly_frac = kelly_full * KELLY_FRACTION;
    if kelly_frac > 0.0 {
        kelly_frac.clamp(KELLY_MIN_MULT, KELLY_MAX_MULT)
    } else {
        0.8
    }
}

/// Read `(won, probability)` for every resolved up/down trade in the log.
fn load_resolved_outcomes(path: &Path) -> Vec<(bool, f64)> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let rec: serde_json::Value = serde_json::from_str(line).ok()?;
            if !rec.get("resolved")?.as_bool()? {
                return None;
            }
            let outcome = rec.get("outcome")?.as_str()?;
            if outcome != "up" && outcome != "down" {
                return None;
            }
            let won = rec.get("won").and_then(|v| v.as_bool()).unwrap_or(false);
            let prob = rec
                .get("probability")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5);
            Some((won, prob))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, Direction, Timeframe};
    use std::collections::BTreeMap;

    fn signal(probability: f64) -> Signal {
        Signal {
            asset: Asset::Bitcoin,
            timeframe: Timeframe::M15,
            direction: Direction::Up,
            probability,
            edge: 0.10,
            confidence: 0.5,
            token_id: "token-up-1".into(),
            atr_value: 0.001,
            indicator_votes: BTreeMap::new(),
        }
    }

    fn dry_executor() -> (Executor, Arc<PositionTracker>) {
        let client = Arc::new(ClobClient::new("https://clob.invalid", "", "", ""));
        let tracker = Arc::new(PositionTracker::new());
        (
            Executor::new(client, tracker.clone(), true, "/nonexistent/trades.jsonl"),
            tracker,
        )
    }

    #[tokio::test]
    async fn dry_run_order_has_market_prefix_and_exact_arithmetic() {
        let (exec, tracker) = dry_executor();
        let order_id = exec
            .place_order(&signal(0.58), "abcdef1234567890", Some(10.0), 1_000)
            .await
            .expect("dry-run order placed");

        assert!(order_id.starts_with("dry-run-abcdef12-"));
        let positions = tracker.open_positions();
        assert_eq!(positions.len(), 1);
        let pos = &positions[0];
        assert_eq!(pos.entry_price, 0.58);
        assert!((pos.shares() - 17.24).abs() < 0.01);
        assert!((pos.shares() * pos.entry_price - pos.size_usd).abs() < 0.01);
        assert!(pos.entry_price > 0.01 && pos.entry_price < 0.99);
    }

    #[tokio::test]
    async fn extreme_probability_clamps_into_valid_price() {
        let (exec, tracker) = dry_executor();
        exec.place_order(&signal(0.999), "m1", Some(10.0), 1_000).await.unwrap();
        let pos = &tracker.open_positions()[0];
        assert_eq!(pos.entry_price, 0.99);
    }

    #[tokio::test]
    async fn zero_size_places_nothing() {
        let (exec, tracker) = dry_executor();
        assert!(exec.place_order(&signal(0.58), "m1", Some(0.0), 1_000).await.is_none());
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn dry_run_fills_expire_by_timeframe() {
        let (exec, tracker) = dry_executor();
        exec.place_order(&signal(0.58), "m15market", Some(10.0), 1_000).await.unwrap();

        // 900s is the 15m bound; at 901s past open the position must go.
        exec.check_fills(1_000 + 900).await;
        assert_eq!(tracker.count(), 1, "at the bound the position survives");

        exec.check_fills(1_000 + 901).await;
        assert_eq!(tracker.count(), 0, "past the bound it expires unfilled");
    }

    #[tokio::test]
    async fn shutdown_clears_dry_positions() {
        let (exec, tracker) = dry_executor();
        exec.place_order(&signal(0.58), "m1", Some(10.0), 1_000).await.unwrap();
        exec.place_order(&signal(0.60), "m2", Some(12.0), 1_001).await.unwrap();
        exec.cancel_all_open().await;
        assert_eq!(tracker.count(), 0);
    }

    // ── Fallback sizing ──────────────────────────────────────────────────

    #[test]
    fn quality_size_band() {
        // Saturated confidence and edge hit the top of the band.
        assert!((quality_size(0.6, 0.12) - TRADE_MAX_USD).abs() < 1e-9);
        // Zero quality sits at the floor.
        assert!((quality_size(0.0, 0.0) - TRADE_MIN_USD).abs() < 1e-9);
        // Halfway confidence, saturated edge: 0.5*0.5 + 0.5 = 0.75 quality.
        assert!((quality_size(0.3, 0.20) - 17.5).abs() < 1e-9);
    }

    #[test]
    fn kelly_needs_history() {
        let thin: Vec<(bool, f64)> = vec![(true, 0.6); 9];
        assert_eq!(kelly_multiplier(&thin), 1.0);
    }

    #[test]
    fn winning_record_sizes_up_losing_record_sizes_down() {
        // 70% win rate at even-odds entries: positive Kelly.
        let mut resolved: Vec<(bool, f64)> = vec![(true, 0.5); 7];
        resolved.extend(vec![(false, 0.5); 3]);
        let up = kelly_multiplier(&resolved);
        assert!(up > KELLY_MIN_MULT && up <= KELLY_MAX_MULT);
        assert!((up - 0.1).abs() < 1e-9); // kelly_full = 0.4, quarter = 0.1

        // 30% win rate: negative Kelly sizes down to the 0.8 fallback.
        let mut resolved: Vec<(bool, f64)> = vec![(true, 0.5); 3];
        resolved.extend(vec![(false, 0.5); 7]);
        assert_eq!(kelly_multiplier(&resolved), 0.8);
    }

    #[tokio::test]
    async fn fallback_sizing_places_inside_the_band() {
        let (exec, tracker) = dry_executor();
        // No conviction size supplied: quality x Kelly fallback applies.
        exec.place_order(&signal(0.58), "m1", None, 1_000).await.unwrap();
        let pos = &tracker.open_positions()[0];
        assert!(pos.size_usd >= TRADE_MIN_USD && pos.size_usd <= TRADE_MAX_USD);
    }

    // ── Stop-loss decision table ─────────────────────────────────────────

    #[test]
    fn stop_waits_for_settle_age() {
        let action = evaluate_stop(0.80, 30, Strategy::Directional, Some(0.10), 0);
        assert_eq!(action, StopAction::TooYoung);
    }

    #[test]
    fn straddles_are_exempt() {
        let action = evaluate_stop(0.80, 120, Strategy::Straddle, Some(0.10), 0);
        assert_eq!(action, StopAction::NotApplicable);
    }

    #[test]
    fn collapsed_bid_sells_at_bid() {
        // entry 0.80, bid 0.35 < 0.40 threshold: sell at 0.35.
        let action = evaluate_stop(0.80, 120, Strategy::Directional, Some(0.35), 0);
        assert_eq!(action, StopAction::Sell { price: 0.35 });
    }

    #[test]
    fn healthy_bid_holds() {
        let action = evaluate_stop(0.80, 120, Strategy::Directional, Some(0.55), 0);
        assert_eq!(action, StopAction::Hold);
    }

    #[test]
    fn boundary_bid_exactly_at_threshold_holds() {
        // 0.40 is not strictly below 0.80 × 0.50.
        let action = evaluate_stop(0.80, 120, Strategy::Directional, Some(0.40), 0);
        assert_eq!(action, StopAction::Hold);
    }

    #[test]
    fn no_bids_counts_strikes_then_escalates() {
        assert_eq!(
            evaluate_stop(0.80, 120, Strategy::Directional, None, 0),
            StopAction::NoBidStrike
        );
        assert_eq!(
            evaluate_stop(0.80, 120, Strategy::Directional, None, 1),
            StopAction::NoBidStrike
        );
        assert_eq!(
            evaluate_stop(0.80, 120, Strategy::Directional, None, 2),
            StopAction::EmergencySell
        );
    }

    #[test]
    fn worthless_and_dust_bids() {
        assert_eq!(
            evaluate_stop(0.80, 120, Strategy::Directional, Some(0.004), 0),
            StopAction::RemoveWorthless
        );
        assert_eq!(
            evaluate_stop(0.80, 120, Strategy::Directional, Some(0.015), 0),
            StopAction::Hold
        );
    }

    #[tokio::test]
    async fn stop_loss_event_recovery_matches_shares() {
        // Drive sell_position directly in dry-run: entry 0.80, $10 stake,
        // 12.5 shares sold at 0.35 recovers $4.375.
        let (exec, tracker) = dry_executor();
        let pos = Position {
            market_id: "m1".into(),
            token_id: "tok".into(),
            direction: Direction::Up,
            size_usd: 10.0,
            entry_price: 0.80,
            order_id: "ord1".into(),
            opened_at: 0,
            strategy: Strategy::Directional,
            timeframe: Timeframe::M5,
            asset: Asset::Bitcoin,
        };
        tracker.add(pos.clone());
        assert!(exec.sell_position(&pos, 0.35).await);
        assert_eq!(tracker.count(), 0);

        let event = exec.take_last_stop_loss().expect("event recorded");
        assert!((event.recovery_usd - 12.5 * 0.35).abs() < 1e-9);
        assert_eq!(event.bid, 0.35);
        assert!(exec.take_last_stop_loss().is_none(), "event is consumed");
    }
}
