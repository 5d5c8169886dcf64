// =============================================================================
// Meridian — Polymarket Up/Down trading engine, main entry point
// =============================================================================
//
// The engine starts in dry-run mode unless configured otherwise. Task
// layout: three feed tasks (spot, market, optional oracle) with their own
// reconnect loops, a sub-second killshot loop, and the control loop that
// runs the signal -> conviction -> risk -> execution pipeline each tick.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod clob;
mod conviction;
mod discovery;
mod error;
mod events;
mod execution;
mod indicators;
mod killshot;
mod market_data;
mod momentum;
mod regime;
mod risk;
mod runtime_config;
mod signals;
mod tracker;
mod types;
mod weights;
mod windows;

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::clob::ClobClient;
use crate::conviction::ConvictionEngine;
use crate::discovery::{DiscoveredMarket, MarketDiscovery};
use crate::events::EventKind;
use crate::execution::Executor;
use crate::killshot::{KillTracker, KillshotEngine};
use crate::momentum::MomentumDetector;
use crate::regime::RegimeAdjustment;
use crate::risk::{check_risk, RiskLimits};
use crate::runtime_config::{emergency_stop_reason, RuntimeConfig};
use crate::signals::engine::{SignalConfig, SignalEngine};
use crate::tracker::{PerformanceTracker, SignalContext};
use crate::types::Timeframe;
use crate::windows::WindowTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // An existing-but-unreadable config is the one fatal startup condition.
    let config = RuntimeConfig::load("runtime_config.json")
        .map_err(|e| error::BotError::Fatal(format!("unreadable config: {e}")))?;

    info!("Meridian UpDown Nexus starting");
    info!(
        dry_run = config.dry_run,
        tick_interval_s = config.tick_interval_s,
        max_concurrent = config.max_concurrent_positions,
        max_exposure_usd = config.max_position_usd,
        min_edge_pct = config.min_edge_pct,
        "risk configuration"
    );

    std::fs::create_dir_all(&config.data_dir)?;

    // ── 2. Shared state ──────────────────────────────────────────────────
    let (state, mut market_sub_rx) = AppState::new(config);
    state.price_cache.preload_from_disk();

    let cfg = state.config.read().clone();

    // ── 3. CLOB client & engines ─────────────────────────────────────────
    let clob = Arc::new(ClobClient::new(
        cfg.clob_host.clone(),
        cfg.clob_api_key.clone(),
        cfg.clob_api_secret.clone(),
        cfg.clob_api_passphrase.clone(),
    ));

    let executor = Arc::new(Executor::new(
        clob.clone(),
        state.positions.clone(),
        cfg.dry_run,
        state.trades_path(),
    ));
    let signal_engine = Arc::new(SignalEngine::new(
        state.price_cache.clone(),
        state.spot_depth.clone(),
        state.learner.clone(),
        SignalConfig::from(&cfg),
    ));
    let perf_tracker = Arc::new(PerformanceTracker::new(
        state.trades_path(),
        state.learner.clone(),
        state.events.clone(),
    ));
    let discovery = MarketDiscovery::new(cfg.gamma_host.clone());
    let window_tracker = Arc::new(WindowTracker::new(state.price_cache.clone()));
    let momentum = MomentumDetector::new(state.momentum_state_path());

    let kill_tracker = Arc::new(KillTracker::new(
        state.killshot_log_path(),
        Utc::now().timestamp(),
    ));
    let killshot = Arc::new(KillshotEngine::new(
        cfg.killshot.clone(),
        state.price_cache.clone(),
        state.oracle.clone(),
        clob.clone(),
        kill_tracker.clone(),
    ));

    // ── 4. Feed tasks (reconnect with a 5 s pause) ───────────────────────
    {
        let cache = state.price_cache.clone();
        let depth = state.spot_depth.clone();
        let url = cfg.spot_ws_url.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    market_data::spot_feed::run_spot_stream(&url, &cache, &depth).await
                {
                    error!(error = %e, "spot stream error, reconnecting in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });
    }

    {
        let feed = state.market_feed.clone();
        let url = cfg.market_ws_url.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    market_data::market_feed::run_market_stream(&url, &feed, &mut market_sub_rx)
                        .await
                {
                    error!(error = %e, "market stream error, reconnecting in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });
    }

    if !cfg.oracle_ws_url.is_empty() {
        let oracle = state.oracle.clone();
        let url = cfg.oracle_ws_url.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::oracle_feed::run_oracle_stream(&url, &oracle).await {
                    error!(error = %e, "oracle stream error, reconnecting in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });
    }

    info!("market data feeds launched");

    // ── 5. Killshot loop ─────────────────────────────────────────────────
    if cfg.killshot.enabled {
        let ks = killshot.clone();
        let wt = window_tracker.clone();
        let interval_ms = cfg.killshot.tick_interval_ms.max(100);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                let now = Utc::now().timestamp();
                let windows = wt.all_active_windows();
                ks.tick(&windows, &wt, now).await;
                ks.resolve(now).await;
                ks.cleanup_expired(now);
            }
        });
        info!(interval_ms, "killshot engine launched");
    }

    // ── 6. Control loop ──────────────────────────────────────────────────
    {
        let state = state.clone();
        let executor = executor.clone();
        let signal_engine = signal_engine.clone();
        let perf_tracker = perf_tracker.clone();
        let window_tracker = window_tracker.clone();
        let clob = clob.clone();
        tokio::spawn(async move {
            // Let the feeds warm up before the first evaluation.
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            info!("control loop starting");

            let tick_s = state.config.read().tick_interval_s.max(5);
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_s));
            loop {
                interval.tick().await;
                run_control_tick(
                    &state,
                    &executor,
                    &signal_engine,
                    &perf_tracker,
                    &window_tracker,
                    &discovery,
                    &momentum,
                    &clob,
                )
                .await;
            }
        });
    }

    info!("all subsystems running, Ctrl+C to stop");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    executor.cancel_all_open().await;
    state.price_cache.save_candles();

    info!("Meridian shut down complete");
    Ok(())
}

/// One control tick: regime, discovery, per-market evaluation, bookkeeping.
#[allow(clippy::too_many_arguments)]
async fn run_control_tick(
    state: &Arc<AppState>,
    executor: &Executor,
    signal_engine: &SignalEngine,
    perf_tracker: &PerformanceTracker,
    window_tracker: &WindowTracker,
    discovery: &MarketDiscovery,
    momentum: &MomentumDetector,
    clob: &ClobClient,
) {
    let now = Utc::now().timestamp();
    let cfg = state.config.read().clone();

    // Externally triggered halt: no new trades; filled positions untouched.
    if let Some(reason) = emergency_stop_reason(&state.data_dir) {
        warn!(reason = %reason, "emergency stop active, skipping tick");
        state.events.publish(
            EventKind::KillSwitchActive,
            serde_json::json!({ "reason": reason }),
        );
        return;
    }

    // ── Regime (with the momentum-capture override) ──────────────────────
    let mut regime = state.regime.detect().await;
    let momentum_state = momentum.detect(&state.price_cache, &regime, now);
    if let Some(m) = &momentum_state {
        info!(
            direction = ?m.direction,
            strength = m.strength,
            kind = %m.trigger_kind,
            "momentum capture active, loosening regime gates"
        );
        regime = RegimeAdjustment::momentum_override(&regime);
    }
    info!(
        regime = %regime.label,
        fng = regime.fng_value,
        size_mult = regime.size_multiplier,
        edge_mult = regime.edge_multiplier,
        "tick"
    );

    // ── Discovery ────────────────────────────────────────────────────────
    let markets = discovery.fetch_all().await;
    if markets.is_empty() {
        info!("no tradeable markets found, waiting");
        return;
    }

    // Subscribe every outcome token for implied prices and books.
    let tokens: Vec<String> = markets
        .iter()
        .flat_map(|m| m.tokens.iter().map(|(tid, _)| tid.clone()))
        .collect();
    state.market_feed.subscribe(&tokens);

    // 5m windows feed the killshot engine.
    let markets_5m: Vec<DiscoveredMarket> = markets
        .iter()
        .filter(|m| m.timeframe == Timeframe::M5)
        .cloned()
        .collect();
    window_tracker.update(&markets_5m, now);

    state.conviction.expire_stale_signals(now);

    // ── Per-market evaluation ────────────────────────────────────────────
    let mut trades_this_tick = 0usize;
    for dm in &markets {
        if state
            .positions
            .in_cooldown(&dm.market_id, now, cfg.market_cooldown_secs)
        {
            continue;
        }
        let (Some(up_token), Some(down_token)) = (dm.up_token_id(), dm.down_token_id()) else {
            continue;
        };

        // Implied price from the feed, REST fallback when the feed is cold.
        let mut implied_up = state.market_feed.price(&up_token);
        if implied_up.is_none() {
            implied_up = fetch_implied_rest(clob, &dm.market_id, &up_token).await;
        }
        let book = state.market_feed.book(&up_token);

        let Some(sig) = signal_engine.generate_signal(
            &up_token,
            &down_token,
            dm.asset,
            dm.timeframe,
            implied_up,
            book.as_ref(),
            &regime,
        ) else {
            continue;
        };

        info!(
            asset = %sig.asset,
            timeframe = %sig.timeframe,
            direction = %sig.direction,
            prob = sig.probability,
            edge_pct = sig.edge * 100.0,
            confidence = sig.confidence,
            question = &dm.question[..dm.question.len().min(50)],
            "signal"
        );

        // ── Conviction ───────────────────────────────────────────────────
        let snapshot = ConvictionEngine::build_snapshot(&sig, now);
        state.conviction.register_signal(snapshot.clone());
        state
            .conviction
            .register_timeframe_signal(sig.asset, sig.timeframe, sig.direction, now);

        let conviction = state
            .conviction
            .score(&sig, &snapshot, Some(&regime), Some(sig.atr_value));
        if conviction.position_size_usd <= 0.0 {
            info!(
                score = conviction.total_score,
                tier = %conviction.tier,
                "conviction says no trade"
            );
            continue;
        }

        // ── Risk gate ────────────────────────────────────────────────────
        let limits = RiskLimits {
            min_edge: cfg.min_edge(),
            max_concurrent: cfg.max_concurrent_positions,
            max_exposure_usd: cfg.max_position_usd,
            order_size_usd: conviction.position_size_usd,
        };
        let (allowed, reason) = check_risk(&limits, &sig, &state.positions, &dm.market_id);
        if !allowed {
            info!(reason = %reason, "trade blocked by risk gate");
            continue;
        }

        // ── Execution & recording ────────────────────────────────────────
        let Some(order_id) = executor
            .place_order(&sig, &dm.market_id, Some(conviction.position_size_usd), now)
            .await
        else {
            // Rejected orders put the market on cooldown too.
            state.positions.set_cooldown(&dm.market_id, now);
            continue;
        };
        trades_this_tick += 1;
        state.positions.set_cooldown(&dm.market_id, now);

        info!(
            order_id = %order_id,
            score = conviction.total_score,
            tier = %conviction.tier,
            size_usd = conviction.position_size_usd,
            aligned = conviction.all_assets_aligned,
            "order placed"
        );

        let end_ts = if dm.end_ts > 0 {
            dm.end_ts
        } else {
            now + dm.timeframe.window_secs()
        };
        let ctx = SignalContext {
            market_id: dm.market_id.clone(),
            question: dm.question.clone(),
            implied_up_price: implied_up.unwrap_or(0.5),
            spot_price: state.price_cache.price(dm.asset).unwrap_or(0.0),
            market_end_time: end_ts,
            size_usd: conviction.position_size_usd,
            entry_price: ((sig.probability * 100.0).round() / 100.0).clamp(0.01, 0.99),
            ob_liquidity_usd: book
                .as_ref()
                .map(|b| b.bid_depth_usd + b.ask_depth_usd)
                .unwrap_or(0.0),
            ob_spread: book.as_ref().map(|b| b.spread()).unwrap_or(0.0),
            dry_run: cfg.dry_run,
        };
        perf_tracker.record_signal(&sig, &ctx, &regime, now);
    }

    if trades_this_tick > 0 {
        info!(trades = trades_this_tick, "orders placed this tick");
    } else {
        info!(
            positions = state.positions.count(),
            exposure_usd = state.positions.total_exposure(),
            "no trades this tick"
        );
    }

    // ── Bookkeeping ──────────────────────────────────────────────────────
    state.price_cache.save_candles();
    executor.check_fills(now).await;
    executor.check_stop_losses(now).await;
    if let Some(event) = executor.take_last_stop_loss() {
        warn!(
            order_id = %event.order_id,
            recovered = event.recovery_usd,
            of = event.size_usd,
            "stop-loss exit"
        );
    }
    perf_tracker.check_resolutions(clob, now).await;
    if perf_tracker.pending_count() > 0 {
        info!(pending = perf_tracker.pending_count(), "trades pending resolution");
    }
    state.positions.prune_cooldowns(now, 3_600);
}

/// REST fallback for the implied price when the websocket has no sample yet.
async fn fetch_implied_rest(
    clob: &ClobClient,
    market_id: &str,
    up_token_id: &str,
) -> Option<f64> {
    let market = clob.get_market(market_id).await.ok()?;
    market
        .tokens
        .iter()
        .find(|t| t.token_id == up_token_id)
        .map(|t| t.price)
        .filter(|p| *p > 0.0 && *p < 1.0)
}
