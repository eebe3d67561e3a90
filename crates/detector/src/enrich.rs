//! DexScreener REST enrichment.
//!
//! Secondary data source: after on-chain detection, each tracked token is
//! polled on its own deadline to pull clean mcap/liquidity/tx-count data.
//! On-chain stays primary for speed; enrichment corrects the estimates and
//! feeds the honeypot heuristic.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::engine::SignalEngine;
use crate::errors::DetectorError;
use crate::tracker::TokenTracker;
use crate::util::unix_now;

const BASE_URL: &str = "https://api.dexscreener.com";
const CHAIN: &str = "base";

/// Per-token poll interval (each token carries its own deadline).
const POLL_INTERVAL_SECONDS: u64 = 8;
/// Deadline pushback after a 4xx response.
const CLIENT_ERROR_DEFER_SECONDS: u64 = 30;
/// Scheduler tick.
const CYCLE_SECONDS: u64 = 2;
/// Maximum in-flight requests.
const MAX_IN_FLIGHT: usize = 4;
/// Stop polling tokens this far past the signal window.
const AGE_BUFFER_SECONDS: u64 = 20;

// ---------------------------------------------------------------------------
// REST client
// ---------------------------------------------------------------------------

/// Async DexScreener API client.
#[derive(Clone)]
pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Fetch all pairs for a token. An empty list means the token is not yet
    /// indexed.
    pub async fn get_token_pairs(&self, token: Address) -> Result<Vec<PairData>, DetectorError> {
        let url = format!("{}/tokens/v1/{CHAIN}/{token}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DetectorError::EnrichStatus(status.as_u16()));
        }
        Ok(resp.json::<Vec<PairData>>().await?)
    }
}

impl Default for DexScreenerClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Response model (only the fields we consume)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PairData {
    #[serde(default)]
    pub liquidity: Option<LiquidityData>,
    #[serde(default, rename = "marketCap")]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub fdv: Option<f64>,
    #[serde(default)]
    pub txns: Option<TxnData>,
    #[serde(default, rename = "priceUsd")]
    pub price_usd: Option<String>,
    #[serde(default, rename = "quoteToken")]
    pub quote_token: Option<TokenMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiquidityData {
    #[serde(default)]
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxnData {
    #[serde(default)]
    pub h1: Option<TxnWindow>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TxnWindow {
    #[serde(default)]
    pub buys: u32,
    #[serde(default)]
    pub sells: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenMeta {
    #[serde(default)]
    pub symbol: Option<String>,
}

impl PairData {
    pub fn liquidity_usd(&self) -> Option<Decimal> {
        self.liquidity
            .as_ref()
            .and_then(|l| l.usd)
            .and_then(Decimal::from_f64)
    }

    /// `marketCap` when present, else fully-diluted valuation.
    pub fn mcap_usd(&self) -> Option<Decimal> {
        self.market_cap
            .or(self.fdv)
            .and_then(Decimal::from_f64)
    }

    pub fn h1_txns(&self) -> Option<TxnWindow> {
        self.txns.as_ref().and_then(|t| t.h1)
    }

    pub fn price_usd(&self) -> Option<Decimal> {
        self.price_usd.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn quote_symbol(&self) -> Option<&str> {
        self.quote_token.as_ref().and_then(|q| q.symbol.as_deref())
    }
}

/// Pick the pair with the highest USD liquidity.
pub fn best_pair(pairs: &[PairData]) -> Option<&PairData> {
    pairs
        .iter()
        .max_by(|a, b| {
            let la = a.liquidity_usd().unwrap_or(Decimal::ZERO);
            let lb = b.liquidity_usd().unwrap_or(Decimal::ZERO);
            la.cmp(&lb)
        })
}

// ---------------------------------------------------------------------------
// Enrichment scheduler
// ---------------------------------------------------------------------------

/// Background enrichment loop for tracked tokens.
pub struct Enricher {
    tracker: Arc<TokenTracker>,
    engine: Arc<SignalEngine>,
    client: DexScreenerClient,
    config: Arc<DetectorConfig>,
}

impl Enricher {
    pub fn new(
        tracker: Arc<TokenTracker>,
        engine: Arc<SignalEngine>,
        client: DexScreenerClient,
        config: Arc<DetectorConfig>,
    ) -> Self {
        Self {
            tracker,
            engine,
            client,
            config,
        }
    }

    /// Run the scheduler until shutdown. Every tick, tokens whose deadline
    /// has passed are fetched, at most [`MAX_IN_FLIGHT`] concurrently.
    pub async fn run(self, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        debug!(
            interval = POLL_INTERVAL_SECONDS,
            in_flight = MAX_IN_FLIGHT,
            "enricher started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(CYCLE_SECONDS)) => {}
                _ = shutdown.cancelled() => return,
            }

            let now = unix_now();
            for token in self.tracker.iter_active() {
                let due = self
                    .tracker
                    .mutate(token, now, |state| {
                        if state.next_fetch_at > now {
                            return false;
                        }
                        if state.age_seconds(now)
                            > self.config.max_token_age_seconds + AGE_BUFFER_SECONDS
                        {
                            return false;
                        }
                        // Claim the slot before the fetch so a slow request
                        // cannot double-schedule.
                        state.next_fetch_at = now + POLL_INTERVAL_SECONDS;
                        true
                    })
                    .unwrap_or(false);

                if !due {
                    continue;
                }

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                let tracker = self.tracker.clone();
                let engine = self.engine.clone();
                let client = self.client.clone();
                let config = self.config.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    enrich_one(&tracker, &engine, &client, &config, token).await;
                });
            }
        }
    }
}

/// Fetch one token and fold the result into its state.
pub(crate) async fn enrich_one(
    tracker: &TokenTracker,
    engine: &SignalEngine,
    client: &DexScreenerClient,
    config: &DetectorConfig,
    token: Address,
) {
    let pairs = match fetch_with_retry(client, token).await {
        Ok(pairs) => pairs,
        Err(DetectorError::EnrichStatus(status)) if (400..500).contains(&status) => {
            debug!(token = %token, status, "enrichment client error, deferring");
            let now = unix_now();
            tracker.mutate(token, now, |state| {
                state.next_fetch_at = now + CLIENT_ERROR_DEFER_SECONDS;
            });
            return;
        }
        Err(e) => {
            debug!(token = %token, error = %e, "enrichment fetch failed");
            return;
        }
    };

    let Some(pair) = best_pair(&pairs) else {
        // Not yet indexed.
        return;
    };

    let liquidity = pair.liquidity_usd();
    let mcap = pair.mcap_usd();
    let txns = pair.h1_txns();
    let now = unix_now();

    // Admission floor: pools this shallow are not worth the polling budget.
    if let Some(liq) = liquidity {
        if liq < config.ignore_liquidity_below_usd {
            debug!(token = %token, liquidity = %liq, "below admission floor, dropping");
            tracker.remove(token);
            return;
        }
    }

    let honeypot = tracker
        .mutate(token, now, |state| {
            if let Some(m) = mcap.filter(|m| *m > Decimal::ZERO) {
                state.estimated_mcap = m;
            }
            if let Some(l) = liquidity.filter(|l| *l > Decimal::ZERO) {
                state.liquidity_usd = l;
            }
            state.enriched_at = Some(now);

            if let Some(t) = txns {
                if t.sells == 0 && t.buys > 5 && !state.honeypot_suspected {
                    state.honeypot_suspected = true;
                    return true;
                }
            }
            false
        })
        .unwrap_or(false);

    if honeypot {
        warn!(token = %token, "honeypot suspected: buys without sells");
        engine.reject_terminal(token, "no_sells");
        return;
    }

    debug!(
        token = %token,
        mcap = ?mcap,
        liquidity = ?liquidity,
        "enriched"
    );
    engine.evaluate(tracker, token);
}

/// One retry on transient failure, inside the per-token budget.
async fn fetch_with_retry(
    client: &DexScreenerClient,
    token: Address,
) -> Result<Vec<PairData>, DetectorError> {
    match client.get_token_pairs(token).await {
        Ok(pairs) => Ok(pairs),
        Err(DetectorError::EnrichStatus(status)) if (400..500).contains(&status) => {
            Err(DetectorError::EnrichStatus(status))
        }
        Err(_) => {
            tokio::time::sleep(Duration::from_secs(1)).await;
            client.get_token_pairs(token).await
        }
    }
}
