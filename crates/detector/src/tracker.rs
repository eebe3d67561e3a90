//! In-memory token state tracker.
//!
//! Each discovered token gets one [`TokenState`] keyed by its contract
//! address. All mutation goes through [`TokenTracker::mutate`], which
//! serializes read-modify-write cycles on a single interior lock; callers
//! never hold references to a state across an await point. Entries are
//! evicted after the TTL by a periodic sweep.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::types::PoolRef;

/// One-way bytecode verdict. `Unknown` blocks signals without rejecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyVerdict {
    Unknown,
    Safe,
    Unsafe,
}

/// Per-token aggregate state, from pool creation until TTL eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenState {
    pub token: Address,
    pub pool: PoolRef,
    /// Unix seconds at the pool-creation event.
    pub first_seen: u64,
    pub block_first_seen: u64,
    /// Token contract creator, resolved once from the creation transaction.
    pub deployer: Option<Address>,
    /// V4 hooks address; zero for V3 pools.
    pub hooks: Address,
    pub sqrt_price_x96: U256,

    // Most recent of (on-chain estimate, enrichment value).
    pub liquidity_usd: Decimal,
    pub estimated_mcap: Decimal,

    pub total_buys: u32,
    pub total_sells: u32,
    pub buy_volume_usd: Decimal,
    pub largest_buy_usd: Decimal,
    pub unique_buyers: HashSet<Address>,
    /// Buy timestamps within the last 60s, for the momentum diagnostic.
    pub recent_buy_times: Vec<u64>,

    pub bytecode_safe: SafetyVerdict,
    pub honeypot_suspected: bool,
    pub enriched_at: Option<u64>,
    /// Next enrichment deadline (unix seconds); 0 = due immediately.
    pub next_fetch_at: u64,

    pub signaled: bool,
    pub signal_time: u64,
}

impl TokenState {
    pub fn new(token: Address, pool: PoolRef, hooks: Address, now: u64, block: u64) -> Self {
        Self {
            token,
            pool,
            first_seen: now,
            block_first_seen: block,
            deployer: None,
            hooks,
            sqrt_price_x96: U256::ZERO,
            liquidity_usd: Decimal::ZERO,
            estimated_mcap: Decimal::ZERO,
            total_buys: 0,
            total_sells: 0,
            buy_volume_usd: Decimal::ZERO,
            largest_buy_usd: Decimal::ZERO,
            unique_buyers: HashSet::new(),
            recent_buy_times: Vec::new(),
            bytecode_safe: SafetyVerdict::Unknown,
            honeypot_suspected: false,
            enriched_at: None,
            next_fetch_at: 0,
            signaled: false,
            signal_time: 0,
        }
    }

    pub fn age_seconds(&self, now: u64) -> u64 {
        now.saturating_sub(self.first_seen)
    }

    /// Record a buy attribution. Keeps the 60s timestamp window trimmed.
    pub fn record_buy(&mut self, buyer: Address, amount_usd: Decimal, now: u64) {
        self.total_buys += 1;
        self.buy_volume_usd += amount_usd;
        self.largest_buy_usd = self.largest_buy_usd.max(amount_usd);
        self.unique_buyers.insert(buyer);
        self.recent_buy_times.push(now);
        let cutoff = now.saturating_sub(60);
        self.recent_buy_times.retain(|&t| t > cutoff);
    }

    /// Momentum diagnostic: two buys inside 30s, buy volume ≥ 20% of
    /// liquidity, or a repeat-buyer wallet.
    pub fn has_momentum(&self, now: u64) -> bool {
        let cutoff = now.saturating_sub(30);
        if self.recent_buy_times.iter().filter(|&&t| t >= cutoff).count() >= 2 {
            return true;
        }
        if self.liquidity_usd > Decimal::ZERO
            && self.buy_volume_usd >= self.liquidity_usd * Decimal::new(2, 1)
        {
            return true;
        }
        self.total_buys >= 2 && (self.total_buys as usize) > self.unique_buyers.len()
    }
}

/// Keyed map of token states with TTL eviction.
pub struct TokenTracker {
    states: Mutex<HashMap<Address, TokenState>>,
    ttl_seconds: u64,
}

impl TokenTracker {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            ttl_seconds,
        }
    }

    /// Insert a state for `token` unless one already exists. Idempotent: an
    /// existing entry wins over re-creation. Returns whether it was created.
    pub fn upsert(&self, token: Address, init: impl FnOnce() -> TokenState) -> bool {
        let mut states = self.states.lock().expect("tracker lock poisoned");
        if states.contains_key(&token) {
            return false;
        }
        states.insert(token, init());
        true
    }

    /// Atomic read-modify-write on one entry. Returns `None` if the token is
    /// untracked or expired (hard TTL enforced on access). The closure must
    /// not block; mutations on the same key are serialized by the lock.
    pub fn mutate<R>(&self, token: Address, now: u64, f: impl FnOnce(&mut TokenState) -> R) -> Option<R> {
        let mut states = self.states.lock().expect("tracker lock poisoned");
        let state = states.get_mut(&token)?;
        if state.age_seconds(now) > self.ttl_seconds {
            states.remove(&token);
            return None;
        }
        let result = f(state);

        // Containment for impossible states: evict rather than keep
        // evaluating corrupt data.
        if (state.total_buys as usize) < state.unique_buyers.len() {
            error!(
                token = %token,
                total_buys = state.total_buys,
                unique_buyers = state.unique_buyers.len(),
                "invariant violated: buys < unique buyers, evicting entry"
            );
            states.remove(&token);
        }
        Some(result)
    }

    /// Point-in-time clone of one state, for diagnostics and tests.
    pub fn snapshot(&self, token: Address) -> Option<TokenState> {
        self.states
            .lock()
            .expect("tracker lock poisoned")
            .get(&token)
            .cloned()
    }

    /// Snapshot of tokens not yet signaled, for the enrichment loop.
    pub fn iter_active(&self) -> Vec<Address> {
        self.states
            .lock()
            .expect("tracker lock poisoned")
            .values()
            .filter(|s| !s.signaled)
            .map(|s| s.token)
            .collect()
    }

    /// Whether a token is still tracked (TTL not checked).
    pub fn contains(&self, token: Address) -> bool {
        self.states
            .lock()
            .expect("tracker lock poisoned")
            .contains_key(&token)
    }

    /// Drop a token entirely (admission floor, invariant containment).
    pub fn remove(&self, token: Address) -> bool {
        self.states
            .lock()
            .expect("tracker lock poisoned")
            .remove(&token)
            .is_some()
    }

    /// Remove entries older than the TTL. Runs on a 30s cadence; mutation
    /// holds the same lock, so an entry mid-signal cannot be swept.
    pub fn sweep(&self, now: u64) -> usize {
        let mut states = self.states.lock().expect("tracker lock poisoned");
        let before = states.len();
        states.retain(|_, s| s.age_seconds(now) <= self.ttl_seconds);
        let evicted = before - states.len();
        if evicted > 0 {
            debug!(evicted, remaining = states.len(), "swept stale tokens");
        }
        evicted
    }

    pub fn active_count(&self) -> usize {
        self.states.lock().expect("tracker lock poisoned").len()
    }
}

/// Create-and-log helper used by both listeners.
pub fn register_token(
    tracker: &TokenTracker,
    token: Address,
    pool: PoolRef,
    hooks: Address,
    now: u64,
    block: u64,
) -> bool {
    let created = tracker.upsert(token, || TokenState::new(token, pool, hooks, now, block));
    if created {
        info!(
            dex = %pool.dex_version(),
            token = %token,
            pool = %pool,
            "new token tracked"
        );
    }
    created
}
