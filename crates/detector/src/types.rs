//! Core types shared across the detector: typed chain events, pool
//! references, signed ABI amounts, and the outbound signal record.

use alloy::primitives::{Address, B256, U256};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pool reference
// ---------------------------------------------------------------------------

/// Which DEX generation a pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DexVersion {
    V3,
    V4,
}

impl std::fmt::Display for DexVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DexVersion::V3 => write!(f, "v3"),
            DexVersion::V4 => write!(f, "v4"),
        }
    }
}

/// Pool identifier. V3 pools are standalone contracts; V4 pools are virtual,
/// keyed by a 32-byte hash of the pool key fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolRef {
    V3(Address),
    V4(B256),
}

impl PoolRef {
    pub fn dex_version(&self) -> DexVersion {
        match self {
            PoolRef::V3(_) => DexVersion::V3,
            PoolRef::V4(_) => DexVersion::V4,
        }
    }
}

impl std::fmt::Display for PoolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolRef::V3(addr) => write!(f, "{addr}"),
            PoolRef::V4(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signed ABI amount
// ---------------------------------------------------------------------------

/// A signed 256-bit ABI quantity, kept as sign + magnitude. Swap amounts are
/// two's-complement int128/int256; negative means the asset left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedAmount {
    pub negative: bool,
    pub magnitude: U256,
}

impl SignedAmount {
    /// Decode a 32-byte two's-complement word.
    pub fn from_word(word: [u8; 32]) -> Self {
        let raw = U256::from_be_bytes(word);
        if word[0] & 0x80 != 0 {
            Self {
                negative: true,
                magnitude: raw.wrapping_neg(),
            }
        } else {
            Self {
                negative: false,
                magnitude: raw,
            }
        }
    }

    /// Absolute value in whole ETH (18 decimals), for USD attribution.
    pub fn abs_eth(&self) -> Decimal {
        let wei: f64 = self.magnitude.to_string().parse().unwrap_or(0.0);
        Decimal::from_f64(wei / 1e18).unwrap_or(Decimal::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Typed chain events
// ---------------------------------------------------------------------------

/// Log position metadata carried alongside every decoded event.
#[derive(Debug, Clone, Copy)]
pub struct EventMeta {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

#[derive(Debug, Clone)]
pub struct V4Initialize {
    pub pool_id: B256,
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

#[derive(Debug, Clone)]
pub struct V4Swap {
    pub pool_id: B256,
    pub sender: Address,
    pub amount0: SignedAmount,
    pub amount1: SignedAmount,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    pub tick: i32,
    pub fee: u32,
}

#[derive(Debug, Clone)]
pub struct V3PoolCreated {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub pool: Address,
}

#[derive(Debug, Clone)]
pub struct V3Swap {
    /// Emitting pool contract (log address).
    pub pool: Address,
    pub sender: Address,
    pub recipient: Address,
    pub amount0: SignedAmount,
    pub amount1: SignedAmount,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    pub tick: i32,
}

/// A decoded chain event, dispatched from the chain client to the listeners.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    V4Initialize(EventMeta, V4Initialize),
    V4Swap(EventMeta, V4Swap),
    V3PoolCreated(EventMeta, V3PoolCreated),
    V3Swap(EventMeta, V3Swap),
}

// ---------------------------------------------------------------------------
// Outbound signal
// ---------------------------------------------------------------------------

/// One emitted signal. The payload delivered downstream is only the token
/// address; the diagnostics ride along for logging.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub token: Address,
    pub emitted_at: u64,
    pub diagnostics: SignalDiagnostics,
}

/// Snapshot of the state that satisfied the rules, for the signal log.
/// USD values derive from the min(|amount0|, |amount1|) native-notional
/// heuristic, so they are approximate.
#[derive(Debug, Clone, Serialize)]
pub struct SignalDiagnostics {
    pub dex_version: DexVersion,
    pub age_seconds: u64,
    pub mcap_usd: Decimal,
    pub liquidity_usd: Decimal,
    pub total_buys: u32,
    pub unique_buyers: usize,
    pub largest_buy_usd: Decimal,
    pub buy_volume_usd: Decimal,
    pub momentum: bool,
}
