//! Uniswap V3 Factory + pool listener.
//!
//! PoolCreated comes from the Factory; swaps are emitted by the individual
//! pool contracts, so the Swap subscription is global by topic and membership
//! is checked here against the tracked-pool map. Buyer attribution uses the
//! swap `recipient` — the address that ends up holding the tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::{is_eth_side, ALLOWED_V3_FEE_TIERS, SLOT0_SELECTOR};
use crate::engine::SignalEngine;
use crate::listeners::{is_buy, swap_usd_value, PRUNE_INTERVAL_SECONDS};
use crate::price::{estimate_liquidity_usd, estimate_mcap, EthPriceOracle};
use crate::rpc::RpcClient;
use crate::safety::{resolve_deployer, run_safety_check};
use crate::tracker::{register_token, TokenTracker};
use crate::types::{ChainEvent, EventMeta, PoolRef, V3PoolCreated, V3Swap};
use crate::util::unix_now;

pub struct V3Listener {
    tracker: Arc<TokenTracker>,
    engine: Arc<SignalEngine>,
    rpc: Arc<RpcClient>,
    oracle: EthPriceOracle,
    /// pool contract → (token, eth_is_token0)
    pools: HashMap<Address, (Address, bool)>,
}

impl V3Listener {
    pub fn new(
        tracker: Arc<TokenTracker>,
        engine: Arc<SignalEngine>,
        rpc: Arc<RpcClient>,
        oracle: EthPriceOracle,
    ) -> Self {
        Self {
            tracker,
            engine,
            rpc,
            oracle,
            pools: HashMap::new(),
        }
    }

    /// Consume V3 events until the channel closes or shutdown.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChainEvent>, shutdown: CancellationToken) {
        let mut prune = tokio::time::interval(Duration::from_secs(PRUNE_INTERVAL_SECONDS));
        prune.tick().await; // immediate first tick

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(ChainEvent::V3PoolCreated(meta, created)) => {
                            self.on_pool_created(meta, created);
                        }
                        Some(ChainEvent::V3Swap(_, swap)) => self.on_swap(swap),
                        Some(_) => {} // misrouted — ignore
                        None => {
                            debug!("V3 event channel closed");
                            return;
                        }
                    }
                }
                _ = prune.tick() => self.prune_stale_pools(),
                _ = shutdown.cancelled() => {
                    info!("V3 listener shutting down");
                    return;
                }
            }
        }
    }

    /// New V3 pool. Admit WETH pairs on the launch fee tiers.
    fn on_pool_created(&mut self, meta: EventMeta, created: V3PoolCreated) {
        let (token, eth_is_token0) = if is_eth_side(created.token0) {
            (created.token1, true)
        } else if is_eth_side(created.token1) {
            (created.token0, false)
        } else {
            return;
        };

        if !ALLOWED_V3_FEE_TIERS.contains(&created.fee) {
            debug!(pool = %created.pool, fee = created.fee, "v3 skip: fee tier");
            return;
        }

        let now = unix_now();
        let was_created = register_token(
            &self.tracker,
            token,
            PoolRef::V3(created.pool),
            Address::ZERO,
            now,
            meta.block_number,
        );
        self.pools.insert(created.pool, (token, eth_is_token0));

        if !was_created {
            return;
        }

        // PoolCreated carries no price; read slot0 once for the initial mcap
        // estimate.
        tokio::spawn(fetch_initial_price(
            self.rpc.clone(),
            self.tracker.clone(),
            self.oracle.clone(),
            created.pool,
            token,
            eth_is_token0,
        ));
        tokio::spawn(run_safety_check(
            self.rpc.clone(),
            self.tracker.clone(),
            self.engine.clone(),
            token,
        ));
        tokio::spawn(resolve_deployer(
            self.rpc.clone(),
            self.tracker.clone(),
            token,
            meta.tx_hash,
        ));
    }

    /// Swap on some V3 pool. Only tracked pools get any work; the first swap
    /// after creation also carries the first usable price and liquidity.
    fn on_swap(&mut self, swap: V3Swap) {
        let Some(&(token, eth_is_token0)) = self.pools.get(&swap.pool) else {
            return;
        };

        let now = unix_now();
        let eth_price = self.oracle.get();
        let buy = is_buy(swap.amount0, swap.amount1, eth_is_token0);
        let usd_value = swap_usd_value(swap.amount0, swap.amount1, eth_price);

        let updated = self.tracker.mutate(token, now, |state| {
            if state.signaled {
                return false;
            }
            state.sqrt_price_x96 = swap.sqrt_price_x96;
            if buy {
                // Attribution by recipient, not sender: routers send, wallets
                // receive.
                state.record_buy(swap.recipient, usd_value, now);
                if swap.liquidity > 0 {
                    if let Some(liq) =
                        estimate_liquidity_usd(swap.liquidity, swap.sqrt_price_x96, eth_price)
                    {
                        state.liquidity_usd = liq;
                    }
                }
            } else {
                state.total_sells += 1;
            }
            buy
        });

        match updated {
            Some(true) => {
                self.engine.evaluate(&self.tracker, token);
            }
            Some(false) => {}
            None => {
                self.pools.remove(&swap.pool);
            }
        }
    }

    /// Drop mappings whose token has left the tracker.
    fn prune_stale_pools(&mut self) {
        let tracker = &self.tracker;
        let before = self.pools.len();
        self.pools.retain(|_, (token, _)| tracker.contains(*token));
        let pruned = before - self.pools.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.pools.len(), "pruned v3 pool mappings");
        }
    }
}

/// Read `slot0()` on a fresh pool and seed the sqrt price + mcap estimate.
async fn fetch_initial_price(
    rpc: Arc<RpcClient>,
    tracker: Arc<TokenTracker>,
    oracle: EthPriceOracle,
    pool: Address,
    token: Address,
    eth_is_token0: bool,
) {
    let result = match rpc.eth_call(pool, &SLOT0_SELECTOR).await {
        Ok(bytes) if bytes.len() >= 32 => bytes,
        Ok(_) => return,
        Err(e) => {
            debug!(pool = %pool, error = %e, "slot0 read failed");
            return;
        }
    };
    let sqrt_price = alloy::primitives::U256::from_be_slice(&result[..32]);
    if sqrt_price.is_zero() {
        return;
    }

    let eth_price = oracle.get();
    tracker.mutate(token, unix_now(), |state| {
        state.sqrt_price_x96 = sqrt_price;
        if let Some(mcap) = estimate_mcap(sqrt_price, eth_is_token0, eth_price) {
            state.estimated_mcap = mcap;
        }
    });
}
