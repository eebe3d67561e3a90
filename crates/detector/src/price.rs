//! Price and liquidity estimation from pool state, plus the ETH/USD oracle.
//!
//! Converts sqrtPriceX96 / in-range liquidity values to USD estimates. Both
//! are approximations: mcap assumes a 1e9 token supply and the TVL formula
//! only holds near the current tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::U256;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{ASSUMED_TOKEN_SUPPLY, WETH};
use crate::enrich::DexScreenerClient;

const X96: f64 = 79228162514264337593543950336.0; // 2^96

/// Estimate market cap in USD from sqrtPriceX96, assuming the default meme
/// supply. `eth_is_token0` gives the pair ordering. Returns `None` when the
/// inputs cannot produce a finite estimate.
pub fn estimate_mcap(
    sqrt_price_x96: U256,
    eth_is_token0: bool,
    eth_price_usd: Decimal,
) -> Option<Decimal> {
    let sqrt_price: f64 = sqrt_price_x96.to_string().parse().ok()?;
    let eth_price = eth_price_usd.to_f64()?;
    if sqrt_price <= 0.0 || eth_price <= 0.0 {
        return None;
    }

    // price_ratio = token1/token0 price.
    let price_ratio = (sqrt_price / X96).powi(2);
    let token_price_eth = if eth_is_token0 {
        if price_ratio <= 0.0 {
            return None;
        }
        1.0 / price_ratio
    } else {
        price_ratio
    };

    let mcap = token_price_eth * eth_price * ASSUMED_TOKEN_SUPPLY;
    if !mcap.is_finite() {
        return None;
    }
    Decimal::from_f64(mcap)
}

/// Estimate pool TVL in USD. Approximation: TVL ≈ 2 · (L / sqrtPrice) · ethPrice.
pub fn estimate_liquidity_usd(
    liquidity: u128,
    sqrt_price_x96: U256,
    eth_price_usd: Decimal,
) -> Option<Decimal> {
    let sqrt_price: f64 = sqrt_price_x96.to_string().parse().ok()?;
    let eth_price = eth_price_usd.to_f64()?;
    if sqrt_price <= 0.0 || eth_price <= 0.0 {
        return None;
    }

    let tvl = (liquidity as f64 / sqrt_price) * eth_price * 2.0;
    if !tvl.is_finite() {
        return None;
    }
    Decimal::from_f64(tvl)
}

// ---------------------------------------------------------------------------
// ETH/USD oracle
// ---------------------------------------------------------------------------

/// Cheap cloneable cache of the ETH/USD price, refreshed every 60s from the
/// WETH pairs on DexScreener. Falls back to a static price until the first
/// successful fetch.
#[derive(Clone)]
pub struct EthPriceOracle {
    price: Arc<Mutex<Decimal>>,
}

impl EthPriceOracle {
    pub fn new() -> Self {
        Self {
            price: Arc::new(Mutex::new(dec!(2500))),
        }
    }

    pub fn get(&self) -> Decimal {
        *self.price.lock().expect("price lock poisoned")
    }

    fn set(&self, price: Decimal) {
        *self.price.lock().expect("price lock poisoned") = price;
    }

    /// Fetch once. Prefers stablecoin-quoted WETH pairs.
    pub async fn update(&self, client: &DexScreenerClient) {
        match client.get_token_pairs(WETH).await {
            Ok(pairs) => {
                let quoted = pairs.iter().find(|p| {
                    p.quote_symbol()
                        .is_some_and(|s| s == "USDC" || s == "USDbC")
                });
                if let Some(price) = quoted.and_then(|p| p.price_usd()) {
                    debug!(price = %price, "ETH price updated");
                    self.set(price);
                }
            }
            Err(e) => debug!(error = %e, "ETH price fetch failed"),
        }
    }

    /// Refresh loop: update immediately, then every 60s until shutdown.
    pub async fn run(self, client: DexScreenerClient, shutdown: CancellationToken) {
        loop {
            self.update(&client).await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

impl Default for EthPriceOracle {
    fn default() -> Self {
        Self::new()
    }
}
