//! Early token signal detector for Base.
//!
//! Watches Uniswap V3 + V4 pool creations over a persistent WebSocket,
//! tracks early trading activity per token, enriches with DexScreener data,
//! and sends qualifying contract addresses to an execution bot via Telegram.

mod config;
mod constants;
mod decode;
mod engine;
mod enrich;
mod errors;
mod listeners;
mod price;
mod rpc;
mod safety;
#[cfg(test)]
mod scenarios;
mod sender;
mod tracker;
mod types;
mod util;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DetectorConfig;
use crate::engine::SignalEngine;
use crate::enrich::{DexScreenerClient, Enricher};
use crate::listeners::{v3::V3Listener, v4::V4Listener};
use crate::price::EthPriceOracle;
use crate::rpc::RpcClient;
use crate::tracker::TokenTracker;
use crate::types::{ChainEvent, Signal};
use crate::util::unix_now;

/// Decoded-event channel depth per listener.
const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// Outbound signal queue depth; overflow drops with a warning.
const SIGNAL_QUEUE_CAPACITY: usize = 32;
/// Tracker sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// Stats log cadence.
const STATS_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Arc::new(DetectorConfig::from_env().context("failed to load config")?);

    info!(
        chain = constants::CHAIN_ID,
        mode = if config.dry_run { "DRY RUN" } else { "LIVE" },
        max_age_s = config.max_token_age_seconds,
        max_mcap = %config.max_mcap_usd,
        min_liquidity = %config.min_liquidity_usd,
        min_buys = config.min_buys,
        signals_per_hour = config.max_signals_per_hour,
        "early token signal detector starting"
    );

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    let rpc = Arc::new(RpcClient::new(config.rpc_http.clone()));

    // Refuse to run against the wrong chain; tolerate a transient RPC error.
    match rpc.chain_id().await {
        Ok(id) if id != constants::CHAIN_ID => {
            bail!("wrong chain: expected {}, got {id}", constants::CHAIN_ID);
        }
        Ok(id) => {
            let block = rpc.block_number().await.ok();
            info!(chain_id = id, block = block, "chain verified");
        }
        Err(e) => warn!(error = %e, "chain id check failed, continuing"),
    }

    let tracker = Arc::new(TokenTracker::new(config.token_ttl_seconds));
    let (signal_tx, signal_rx) = mpsc::channel::<Signal>(SIGNAL_QUEUE_CAPACITY);
    let engine = Arc::new(SignalEngine::new(config.clone(), signal_tx));

    let dex_client = DexScreenerClient::new();
    let oracle = EthPriceOracle::new();
    oracle.update(&dex_client).await;
    info!(eth_price = %oracle.get(), "initial ETH price");

    let (v3_tx, v3_rx) = mpsc::channel::<ChainEvent>(EVENT_CHANNEL_CAPACITY);
    let (v4_tx, v4_rx) = mpsc::channel::<ChainEvent>(EVENT_CHANNEL_CAPACITY);

    let shutdown = CancellationToken::new();

    // -----------------------------------------------------------------------
    // Spawn tasks
    // -----------------------------------------------------------------------

    // 1. Chain client — subscribes, decodes, dispatches to the listeners.
    let ws_url = config.rpc_wss.clone();
    let ws_shutdown = shutdown.clone();
    let chain_handle = tokio::spawn(async move {
        websocket::run_chain_client(&ws_url, v3_tx, v4_tx, ws_shutdown).await;
    });

    // 2+3. Listeners.
    let v4 = V4Listener::new(tracker.clone(), engine.clone(), rpc.clone(), oracle.clone());
    let v4_handle = tokio::spawn(v4.run(v4_rx, shutdown.clone()));

    let v3 = V3Listener::new(tracker.clone(), engine.clone(), rpc.clone(), oracle.clone());
    let v3_handle = tokio::spawn(v3.run(v3_rx, shutdown.clone()));

    // 4. Enrichment scheduler.
    let enricher = Enricher::new(
        tracker.clone(),
        engine.clone(),
        dex_client.clone(),
        config.clone(),
    );
    let enrich_handle = tokio::spawn(enricher.run(shutdown.clone()));

    // 5. Tracker sweeper.
    let sweep_tracker = tracker.clone();
    let sweep_shutdown = shutdown.clone();
    let sweep_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    sweep_tracker.sweep(unix_now());
                }
                _ = sweep_shutdown.cancelled() => return,
            }
        }
    });

    // 6. Output sender.
    let sender_handle = tokio::spawn(sender::run_sender(
        config.clone(),
        signal_rx,
        shutdown.clone(),
    ));

    // 7. ETH price refresher.
    let oracle_handle = tokio::spawn(oracle.clone().run(dex_client, shutdown.clone()));

    // 8. Periodic stats.
    let stats_engine = engine.clone();
    let stats_tracker = tracker.clone();
    let stats_shutdown = shutdown.clone();
    let stats_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(STATS_INTERVAL) => {
                    log_stats(&stats_engine, &stats_tracker);
                }
                _ = stats_shutdown.cancelled() => return,
            }
        }
    });

    info!("all systems running, waiting for new tokens");

    // -----------------------------------------------------------------------
    // Wait for shutdown
    // -----------------------------------------------------------------------

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutdown signal received, stopping gracefully");
    shutdown.cancel();

    let handles = [
        ("chain", chain_handle),
        ("v4_listener", v4_handle),
        ("v3_listener", v3_handle),
        ("enricher", enrich_handle),
        ("sweeper", sweep_handle),
        ("sender", sender_handle),
        ("eth_price", oracle_handle),
        ("stats", stats_handle),
    ];
    for (name, handle) in handles {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "task panicked");
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn log_stats(engine: &SignalEngine, tracker: &TokenTracker) {
    let stats = engine.stats();
    info!(
        active = tracker.active_count(),
        evaluated = stats.evaluated,
        signaled = stats.signaled,
        rejected = stats.rejected,
        signals_this_hour = stats.signals_this_hour,
        avg_latency_s = stats.avg_latency(),
        min_latency_s = stats.latency_min,
        max_latency_s = stats.latency_max,
        "detector stats"
    );
    if !stats.reject_reasons.is_empty() {
        let mut top: Vec<_> = stats.reject_reasons.iter().collect();
        top.sort_by_key(|(_, count)| std::cmp::Reverse(**count));
        top.truncate(5);
        info!(reasons = ?top, "top rejection reasons");
    }
}
