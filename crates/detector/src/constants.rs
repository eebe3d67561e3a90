//! Contract addresses, event topic hashes, and bytecode scan patterns for
//! Base mainnet. Covers Uniswap V3 + V4. Single source of truth.

use std::sync::LazyLock;

use alloy::primitives::{address, keccak256, Address, B256};

// ---------------------------------------------------------------------------
// Base mainnet addresses
// ---------------------------------------------------------------------------

pub const CHAIN_ID: u64 = 8453;

/// Native ETH representation in V4 pool keys (currency0 = address(0)).
pub const ETH_NATIVE: Address = Address::ZERO;

/// Wrapped ETH on Base.
pub const WETH: Address = address!("4200000000000000000000000000000000000006");

pub const V3_FACTORY: Address = address!("33128a8fC17869897dcE68Ed026d694621f6FDfD");
pub const V4_POOL_MANAGER: Address = address!("498581fF718922c3f8e6A244956aF099B2652b2b");

/// Hooks allow-list: only pools whose hooks address is in this set are
/// admitted. address(0) = no hooks. Extend as known-safe hook contracts
/// appear on Base.
pub const SAFE_HOOKS: [Address; 1] = [ETH_NATIVE];

/// V3 fee tiers admitted for new-token pools. Other tiers are established
/// pairs, not launches.
pub const ALLOWED_V3_FEE_TIERS: [u32; 2] = [3_000, 10_000];

/// Assumed token supply for the initial mcap estimate (meme default).
pub const ASSUMED_TOKEN_SUPPLY: f64 = 1_000_000_000.0;

/// `slot0()` selector, for the initial V3 pool price read.
pub const SLOT0_SELECTOR: [u8; 4] = [0x38, 0x50, 0xc7, 0xbd];

/// An address counts as the ETH side of a pair if it is native ETH (V4) or
/// wrapped ETH.
pub fn is_eth_side(addr: Address) -> bool {
    addr == ETH_NATIVE || addr == WETH
}

// ---------------------------------------------------------------------------
// Event topic hashes (topic-0)
// ---------------------------------------------------------------------------

// PoolCreated(address indexed token0, address indexed token1,
//             uint24 indexed fee, int24 tickSpacing, address pool)
pub static TOPIC_V3_POOL_CREATED: LazyLock<B256> =
    LazyLock::new(|| keccak256("PoolCreated(address,address,uint24,int24,address)"));

// Swap(address indexed sender, address indexed recipient,
//      int256 amount0, int256 amount1, uint160 sqrtPriceX96,
//      uint128 liquidity, int24 tick)
pub static TOPIC_V3_SWAP: LazyLock<B256> =
    LazyLock::new(|| keccak256("Swap(address,address,int256,int256,uint160,uint128,int24)"));

// Initialize(bytes32 indexed id, address indexed currency0,
//            address indexed currency1, uint24 fee, int24 tickSpacing,
//            address hooks, uint160 sqrtPriceX96, int24 tick)
pub static TOPIC_V4_INITIALIZE: LazyLock<B256> = LazyLock::new(|| {
    keccak256("Initialize(bytes32,address,address,uint24,int24,address,uint160,int24)")
});

// Swap(bytes32 indexed id, address indexed sender,
//      int128 amount0, int128 amount1, uint160 sqrtPriceX96,
//      uint128 liquidity, int24 tick, uint24 fee)
pub static TOPIC_V4_SWAP: LazyLock<B256> = LazyLock::new(|| {
    keccak256("Swap(bytes32,address,int128,int128,uint160,uint128,int24,uint24)")
});

// ---------------------------------------------------------------------------
// Bytecode scan patterns
// ---------------------------------------------------------------------------

/// Function selectors whose presence in deployed bytecode fails the safety
/// scan. Any single hit is a hard reject.
pub const DANGEROUS_SELECTORS: [([u8; 4], &str); 8] = [
    ([0x40, 0xc1, 0x0f, 0x19], "mint(address,uint256)"),
    ([0x44, 0xdf, 0x8e, 0x70], "blacklist(address)"),
    ([0xe4, 0x7d, 0x60, 0x60], "isBlacklisted(address)"),
    ([0x39, 0x50, 0x93, 0x5e], "setTax(uint256)"),
    ([0x69, 0xfe, 0x0e, 0x2d], "setFee(uint256)"),
    ([0x0e, 0x83, 0x67, 0x2a], "setMaxTxAmount(uint256)"),
    ([0xc9, 0x56, 0x7b, 0xf9], "openTrading()"),
    ([0x84, 0x56, 0xcb, 0x59], "pause()"),
];

/// Proxy prologue byte sequences. Delegating proxies can swap the
/// implementation out from under holders.
pub const PROXY_PATTERNS: [(&[u8], &str); 2] = [
    (
        // EIP-1167 minimal proxy prologue (calldata copy before delegatecall).
        &[0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d],
        "EIP-1167 minimal proxy",
    ),
    (
        &[0x5f, 0x5f, 0x5f, 0x5f, 0x5f, 0x36, 0x5f, 0x5f],
        "UUPS proxy",
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_hashes_are_distinct() {
        let topics = [
            *TOPIC_V3_POOL_CREATED,
            *TOPIC_V3_SWAP,
            *TOPIC_V4_INITIALIZE,
            *TOPIC_V4_SWAP,
        ];
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_v3_swap_topic_matches_known_hash() {
        // Published Uniswap V3 Swap topic-0.
        assert_eq!(
            format!("{:x}", *TOPIC_V3_SWAP),
            "c42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67"
        );
    }

    #[test]
    fn test_eth_side() {
        assert!(is_eth_side(ETH_NATIVE));
        assert!(is_eth_side(WETH));
        assert!(!is_eth_side(V3_FACTORY));
    }
}
