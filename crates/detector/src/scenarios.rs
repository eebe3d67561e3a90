//! Full-pipeline scenario tests: typed events in, signals (or silence) out.
//!
//! Each test wires a real listener, tracker, and engine together and drives
//! them through the event channels the way the chain client would.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{address, Address, B256, U256};
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DetectorConfig;
use crate::constants::WETH;
use crate::engine::SignalEngine;
use crate::enrich::DexScreenerClient;
use crate::listeners::v4::V4Listener;
use crate::price::EthPriceOracle;
use crate::rpc::RpcClient;
use crate::tracker::{SafetyVerdict, TokenTracker};
use crate::types::{ChainEvent, EventMeta, Signal, SignedAmount, V4Initialize, V4Swap};
use crate::util::unix_now;

const TOKEN: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
const DEPLOYER: Address = address!("dddddddddddddddddddddddddddddddddddddddd");

const X96: f64 = 79228162514264337593543950336.0;

fn test_config() -> DetectorConfig {
    DetectorConfig {
        rpc_wss: "wss://test".into(),
        rpc_http: "http://127.0.0.1:9".into(),
        max_token_age_seconds: 180,
        max_mcap_usd: dec!(30_000),
        min_liquidity_usd: dec!(3_000),
        min_buys: 2,
        min_largest_buy_pct: dec!(10),
        max_signals_per_hour: 5,
        max_deployer_tokens_24h: 2,
        max_signal_latency_seconds: 0,
        ignore_liquidity_below_usd: dec!(2_000),
        token_ttl_seconds: 300,
        dry_run: true,
        telegram_bot_token: String::new(),
        executor_bot_chat: String::new(),
    }
}

struct Pipeline {
    tracker: Arc<TokenTracker>,
    engine: Arc<SignalEngine>,
    event_tx: mpsc::Sender<ChainEvent>,
    signal_rx: mpsc::Receiver<Signal>,
    shutdown: CancellationToken,
}

/// Build a V4 listener pipeline with the ETH oracle pinned at $2500.
fn v4_pipeline() -> Pipeline {
    let config = Arc::new(test_config());
    let tracker = Arc::new(TokenTracker::new(config.token_ttl_seconds));
    let (signal_tx, signal_rx) = mpsc::channel(32);
    let engine = Arc::new(SignalEngine::new(config.clone(), signal_tx));
    // Points at a closed port: background safety/deployer fetches fail fast
    // and leave Unknown/None, which the tests then set explicitly.
    let rpc = Arc::new(RpcClient::new(config.rpc_http.clone()));
    let oracle = EthPriceOracle::new();

    let (event_tx, event_rx) = mpsc::channel(64);
    let shutdown = CancellationToken::new();
    let listener = V4Listener::new(tracker.clone(), engine.clone(), rpc, oracle);
    tokio::spawn(listener.run(event_rx, shutdown.clone()));

    Pipeline {
        tracker,
        engine,
        event_tx,
        signal_rx,
        shutdown,
    }
}

fn meta() -> EventMeta {
    EventMeta {
        block_number: 34_000_000,
        tx_hash: B256::repeat_byte(0xcd),
        log_index: 1,
    }
}

fn pool_id_for(token: Address) -> B256 {
    let mut id = [0x42u8; 32];
    id[12..32].copy_from_slice(token.as_slice());
    B256::from(id)
}

/// sqrtPriceX96 for a WETH/token pool (ETH = token0) such that the 1e9-supply
/// mcap estimate is `mcap_usd` at $2500/ETH.
fn sqrt_price_for_mcap(mcap_usd: f64) -> U256 {
    let token_price_eth = mcap_usd / 2500.0 / 1e9;
    let ratio = 1.0 / token_price_eth;
    U256::from((ratio.sqrt() * X96) as u128)
}

/// In-range liquidity such that the TVL estimate is `tvl_usd` at $2500/ETH.
fn liquidity_for_tvl(tvl_usd: f64, sqrt_price: U256) -> u128 {
    let sqrt_price: f64 = sqrt_price.to_string().parse().unwrap();
    ((tvl_usd / (2.0 * 2500.0)) * sqrt_price) as u128
}

fn initialize_event(token: Address, sqrt_price: U256) -> ChainEvent {
    ChainEvent::V4Initialize(
        meta(),
        V4Initialize {
            pool_id: pool_id_for(token),
            currency0: WETH,
            currency1: token,
            fee: 10_000,
            tick_spacing: 200,
            hooks: Address::ZERO,
            sqrt_price_x96: sqrt_price,
            tick: 0,
        },
    )
}

/// A buy swap: ETH (token0) in, tokens (token1) out.
fn buy_event(token: Address, buyer: Address, eth_in: f64, sqrt_price: U256, liquidity: u128) -> ChainEvent {
    ChainEvent::V4Swap(
        meta(),
        V4Swap {
            pool_id: pool_id_for(token),
            sender: buyer,
            amount0: SignedAmount {
                negative: false,
                magnitude: U256::from((eth_in * 1e18) as u128),
            },
            amount1: SignedAmount {
                negative: true,
                magnitude: U256::from(10u128.pow(24)),
            },
            sqrt_price_x96: sqrt_price,
            liquidity,
            tick: 0,
            fee: 10_000,
        },
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn buyer(n: u8) -> Address {
    Address::repeat_byte(n)
}

/// Drive one token through init + 3 qualifying buys ($200/$600/$100 with
/// mcap ≈ $12k and liquidity ≈ $5k), marking bytecode safe in between.
async fn drive_qualifying_token(p: &Pipeline, token: Address, first_buyer: u8) {
    let sqrt_price = sqrt_price_for_mcap(12_000.0);
    let liquidity = liquidity_for_tvl(5_000.0, sqrt_price);

    p.event_tx.send(initialize_event(token, sqrt_price)).await.unwrap();
    settle().await;

    p.tracker.mutate(token, unix_now(), |s| {
        s.bytecode_safe = SafetyVerdict::Safe;
    });

    for (i, eth_in) in [0.08, 0.24, 0.04].iter().enumerate() {
        p.event_tx
            .send(buy_event(
                token,
                buyer(first_buyer + i as u8),
                *eth_in,
                sqrt_price,
                liquidity,
            ))
            .await
            .unwrap();
    }
    settle().await;
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Happy path: WETH-paired V4 pool, three buys from distinct wallets, the
/// largest 12% of liquidity, safe bytecode → exactly one signal.
#[tokio::test]
async fn happy_path_v4_emits_one_signal() {
    let mut p = v4_pipeline();
    drive_qualifying_token(&p, TOKEN, 0x11).await;

    let signal = p.signal_rx.try_recv().expect("signal should fire");
    assert_eq!(signal.token, TOKEN);
    assert_eq!(signal.diagnostics.total_buys, 3);
    assert_eq!(signal.diagnostics.unique_buyers, 3);
    assert!(signal.diagnostics.mcap_usd > dec!(10_000));
    assert!(signal.diagnostics.mcap_usd < dec!(14_000));
    assert!(signal.diagnostics.liquidity_usd > dec!(4_500));
    assert!(signal.diagnostics.liquidity_usd < dec!(5_500));

    // No second emission.
    assert!(p.signal_rx.try_recv().is_err());
    assert!(p.tracker.snapshot(TOKEN).unwrap().signaled);
    p.shutdown.cancel();
}

/// Same flow but the bytecode scan found mint(): no signal, terminal.
#[tokio::test]
async fn unsafe_bytecode_blocks_signal() {
    let mut p = v4_pipeline();
    let sqrt_price = sqrt_price_for_mcap(12_000.0);
    let liquidity = liquidity_for_tvl(5_000.0, sqrt_price);

    p.event_tx.send(initialize_event(TOKEN, sqrt_price)).await.unwrap();
    settle().await;

    let code: Vec<u8> = [0x60, 0x80, 0x63, 0x40, 0xc1, 0x0f, 0x19].into();
    let (verdict, _) = crate::safety::scan_bytecode(&code);
    p.tracker.mutate(TOKEN, unix_now(), |s| s.bytecode_safe = verdict);

    for (i, eth_in) in [0.08, 0.24, 0.04].iter().enumerate() {
        p.event_tx
            .send(buy_event(TOKEN, buyer(0x21 + i as u8), *eth_in, sqrt_price, liquidity))
            .await
            .unwrap();
    }
    settle().await;

    assert!(p.signal_rx.try_recv().is_err());
    let state = p.tracker.snapshot(TOKEN).unwrap();
    assert!(!state.signaled);
    assert_eq!(state.bytecode_safe, SafetyVerdict::Unsafe);

    // Terminal: flipping the verdict later cannot resurrect the token.
    p.tracker.mutate(TOKEN, unix_now(), |s| {
        s.bytecode_safe = SafetyVerdict::Safe;
    });
    p.engine.evaluate(&p.tracker, TOKEN);
    assert!(p.signal_rx.try_recv().is_err());
    p.shutdown.cancel();
}

/// A deployer's third launch in 24h is rejected even when it qualifies.
#[tokio::test]
async fn serial_deployer_is_rejected() {
    let mut p = v4_pipeline();

    // Two earlier tokens by the same deployer signal normally.
    for (i, token) in [
        address!("e111111111111111111111111111111111111111"),
        address!("e222222222222222222222222222222222222222"),
    ]
    .into_iter()
    .enumerate()
    {
        let sqrt_price = sqrt_price_for_mcap(12_000.0);
        p.event_tx.send(initialize_event(token, sqrt_price)).await.unwrap();
        settle().await;
        p.tracker.mutate(token, unix_now(), |s| {
            s.bytecode_safe = SafetyVerdict::Safe;
            s.deployer = Some(DEPLOYER);
        });
        let liquidity = liquidity_for_tvl(5_000.0, sqrt_price);
        for (j, eth_in) in [0.08, 0.24, 0.04].iter().enumerate() {
            p.event_tx
                .send(buy_event(
                    token,
                    buyer(0x31 + (i * 3 + j) as u8),
                    *eth_in,
                    sqrt_price,
                    liquidity,
                ))
                .await
                .unwrap();
        }
        settle().await;
        assert_eq!(p.signal_rx.try_recv().unwrap().token, token);
    }

    // The third launch qualifies on every other rule but fails the quota.
    let sqrt_price = sqrt_price_for_mcap(12_000.0);
    p.event_tx.send(initialize_event(TOKEN, sqrt_price)).await.unwrap();
    settle().await;
    p.tracker.mutate(TOKEN, unix_now(), |s| {
        s.bytecode_safe = SafetyVerdict::Safe;
        s.deployer = Some(DEPLOYER);
    });
    let liquidity = liquidity_for_tvl(5_000.0, sqrt_price);
    for (j, eth_in) in [0.08, 0.24, 0.04].iter().enumerate() {
        p.event_tx
            .send(buy_event(TOKEN, buyer(0x41 + j as u8), *eth_in, sqrt_price, liquidity))
            .await
            .unwrap();
    }
    settle().await;

    assert!(p.signal_rx.try_recv().is_err());
    assert!(!p.tracker.snapshot(TOKEN).unwrap().signaled);
    p.shutdown.cancel();
}

/// Buys arriving after the age window cannot signal.
#[tokio::test]
async fn age_expiry_blocks_signal() {
    let mut p = v4_pipeline();
    let sqrt_price = sqrt_price_for_mcap(12_000.0);
    let liquidity = liquidity_for_tvl(5_000.0, sqrt_price);

    p.event_tx.send(initialize_event(TOKEN, sqrt_price)).await.unwrap();
    settle().await;

    // Backdate creation so the swaps land at first_seen + 181s.
    p.tracker.mutate(TOKEN, unix_now(), |s| {
        s.bytecode_safe = SafetyVerdict::Safe;
        s.first_seen -= 181;
    });

    for (j, eth_in) in [0.08, 0.24, 0.04].iter().enumerate() {
        p.event_tx
            .send(buy_event(TOKEN, buyer(0x51 + j as u8), *eth_in, sqrt_price, liquidity))
            .await
            .unwrap();
    }
    settle().await;

    assert!(p.signal_rx.try_recv().is_err());
    assert!(!p.tracker.snapshot(TOKEN).unwrap().signaled);
    p.shutdown.cancel();
}

/// The sixth qualifying token within an hour is held back by the rate limit.
#[tokio::test]
async fn rate_limit_holds_sixth_token() {
    let mut p = v4_pipeline();

    for i in 0..5u8 {
        let token = Address::repeat_byte(0x60 + i);
        drive_qualifying_token(&p, token, 0x70 + i * 3).await;
        assert_eq!(p.signal_rx.try_recv().unwrap().token, token);
    }

    drive_qualifying_token(&p, TOKEN, 0xa0).await;
    assert!(p.signal_rx.try_recv().is_err());
    assert!(!p.tracker.snapshot(TOKEN).unwrap().signaled);
    p.shutdown.cancel();
}

/// Enrichment reporting buys with zero sells marks the token as a honeypot;
/// no signal even though everything else passes.
#[tokio::test]
async fn honeypot_from_enrichment_blocks_signal() {
    let mut p = v4_pipeline();
    let sqrt_price = sqrt_price_for_mcap(12_000.0);
    let liquidity = liquidity_for_tvl(5_000.0, sqrt_price);

    p.event_tx.send(initialize_event(TOKEN, sqrt_price)).await.unwrap();
    settle().await;
    p.tracker.mutate(TOKEN, unix_now(), |s| {
        s.bytecode_safe = SafetyVerdict::Safe;
    });

    // Enrichment response: 7 buys, 0 sells in the last hour.
    let server = serve_once(
        r#"[{
            "liquidity": { "usd": 5000.0 },
            "marketCap": 12000.0,
            "txns": { "h1": { "buys": 7, "sells": 0 } }
        }]"#,
    )
    .await;
    let client = DexScreenerClient::with_base_url(format!("http://{server}"));
    let config = Arc::new(test_config());
    crate::enrich::enrich_one(&p.tracker, &p.engine, &client, &config, TOKEN).await;

    let state = p.tracker.snapshot(TOKEN).unwrap();
    assert!(state.honeypot_suspected);

    // Qualifying buys afterwards change nothing.
    for (j, eth_in) in [0.08, 0.24, 0.04].iter().enumerate() {
        p.event_tx
            .send(buy_event(TOKEN, buyer(0xb1 + j as u8), *eth_in, sqrt_price, liquidity))
            .await
            .unwrap();
    }
    settle().await;

    assert!(p.signal_rx.try_recv().is_err());
    assert!(!p.tracker.snapshot(TOKEN).unwrap().signaled);
    p.shutdown.cancel();
}

/// Enrichment below the admission floor drops the token from tracking.
#[tokio::test]
async fn admission_floor_drops_token() {
    let p = v4_pipeline();
    let sqrt_price = sqrt_price_for_mcap(12_000.0);

    p.event_tx.send(initialize_event(TOKEN, sqrt_price)).await.unwrap();
    settle().await;
    assert!(p.tracker.contains(TOKEN));

    let server = serve_once(r#"[{ "liquidity": { "usd": 500.0 } }]"#).await;
    let client = DexScreenerClient::with_base_url(format!("http://{server}"));
    let config = Arc::new(test_config());
    crate::enrich::enrich_one(&p.tracker, &p.engine, &client, &config, TOKEN).await;

    assert!(!p.tracker.contains(TOKEN));
    p.shutdown.cancel();
}

/// Enrichment overwrites the on-chain estimates and can complete the
/// conjunction on its own.
#[tokio::test]
async fn enrichment_overwrites_estimates_and_signals() {
    let mut p = v4_pipeline();
    let sqrt_price = sqrt_price_for_mcap(60_000.0); // on-chain estimate too big
    let liquidity = liquidity_for_tvl(2_500.0, sqrt_price); // and too shallow

    p.event_tx.send(initialize_event(TOKEN, sqrt_price)).await.unwrap();
    settle().await;
    p.tracker.mutate(TOKEN, unix_now(), |s| {
        s.bytecode_safe = SafetyVerdict::Safe;
    });
    for (j, eth_in) in [0.08, 0.24, 0.04].iter().enumerate() {
        p.event_tx
            .send(buy_event(TOKEN, buyer(0xc1 + j as u8), *eth_in, sqrt_price, liquidity))
            .await
            .unwrap();
    }
    settle().await;
    // Fails on mcap/liquidity so far.
    assert!(p.signal_rx.try_recv().is_err());

    let server = serve_once(
        r#"[{
            "liquidity": { "usd": 5200.0 },
            "marketCap": 11000.0,
            "txns": { "h1": { "buys": 4, "sells": 2 } }
        }]"#,
    )
    .await;
    let client = DexScreenerClient::with_base_url(format!("http://{server}"));
    let config = Arc::new(test_config());
    crate::enrich::enrich_one(&p.tracker, &p.engine, &client, &config, TOKEN).await;

    let signal = p.signal_rx.try_recv().expect("enrichment should complete the signal");
    assert_eq!(signal.token, TOKEN);
    assert_eq!(signal.diagnostics.liquidity_usd, dec!(5200));
    assert_eq!(signal.diagnostics.mcap_usd, dec!(11000));
    p.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Minimal one-shot HTTP server for enrichment responses
// ---------------------------------------------------------------------------

/// Serve one HTTP 200 JSON response on an ephemeral port, returning the
/// bound address.
async fn serve_once(body: &str) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    addr
}
