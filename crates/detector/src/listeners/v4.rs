//! Uniswap V4 PoolManager listener.
//!
//! All V4 events come from one singleton contract, so pool attribution rides
//! on the indexed pool id. Initialize admits new ETH/WETH pairs behind the
//! hooks allow-list; Swap updates buy/sell aggregates for tracked tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::{is_eth_side, SAFE_HOOKS};
use crate::engine::SignalEngine;
use crate::listeners::{is_buy, swap_usd_value, PRUNE_INTERVAL_SECONDS};
use crate::price::{estimate_liquidity_usd, estimate_mcap, EthPriceOracle};
use crate::rpc::RpcClient;
use crate::safety::{resolve_deployer, run_safety_check};
use crate::tracker::{register_token, TokenTracker};
use crate::types::{ChainEvent, EventMeta, PoolRef, V4Initialize, V4Swap};
use crate::util::unix_now;

pub struct V4Listener {
    tracker: Arc<TokenTracker>,
    engine: Arc<SignalEngine>,
    rpc: Arc<RpcClient>,
    oracle: EthPriceOracle,
    /// pool id → (token, eth_is_token0)
    pools: HashMap<B256, (Address, bool)>,
}

impl V4Listener {
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

    /// Consume V4 events until the channel closes or shutdown.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChainEvent>, shutdown: CancellationToken) {
        let mut prune = tokio::time::interval(Duration::from_secs(PRUNE_INTERVAL_SECONDS));
        prune.tick().await; // immediate first tick

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(ChainEvent::V4Initialize(meta, init)) => {
                            self.on_initialize(meta, init);
                        }
                        Some(ChainEvent::V4Swap(_, swap)) => self.on_swap(swap),
                        Some(_) => {} // misrouted — ignore
                        None => {
                            debug!("V4 event channel closed");
                            return;
                        }
                    }
                }
                _ = prune.tick() => self.prune_stale_pools(),
                _ = shutdown.cancelled() => {
                    info!("V4 listener shutting down");
                    return;
                }
            }
        }
    }

    /// New V4 pool. Admit only hook-free (allow-listed) ETH/WETH pairs.
    fn on_initialize(&mut self, meta: EventMeta, init: V4Initialize) {
        if !SAFE_HOOKS.contains(&init.hooks) {
            debug!(pool = %init.pool_id, hooks = %init.hooks, "v4 skip: hooks not allow-listed");
            return;
        }

        let (token, eth_is_token0) = if is_eth_side(init.currency0) {
            (init.currency1, true)
        } else if is_eth_side(init.currency1) {
            (init.currency0, false)
        } else {
            return;
        };

        let now = unix_now();
        let created = register_token(
            &self.tracker,
            token,
            PoolRef::V4(init.pool_id),
            init.hooks,
            now,
            meta.block_number,
        );
        self.pools.insert(init.pool_id, (token, eth_is_token0));

        if !created {
            return;
        }

        let eth_price = self.oracle.get();
        self.tracker.mutate(token, now, |state| {
            state.sqrt_price_x96 = init.sqrt_price_x96;
            if let Some(mcap) = estimate_mcap(init.sqrt_price_x96, eth_is_token0, eth_price) {
                state.estimated_mcap = mcap;
            }
        });

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

    /// Swap on a V4 pool. Unknown pool ids are dropped.
    fn on_swap(&mut self, swap: V4Swap) {
        let Some(&(token, eth_is_token0)) = self.pools.get(&swap.pool_id) else {
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
                state.record_buy(swap.sender, usd_value, now);
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
                // Token evicted; drop the mapping so future swaps short out.
                self.pools.remove(&swap.pool_id);
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
            debug!(pruned, remaining = self.pools.len(), "pruned v4 pool mappings");
        }
    }
}
