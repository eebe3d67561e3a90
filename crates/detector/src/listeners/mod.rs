//! V3/V4 event listeners and shared swap attribution math.

pub mod v3;
pub mod v4;

use rust_decimal::Decimal;

use crate::types::SignedAmount;

/// Prune cadence for stale pool→token mappings.
pub(crate) const PRUNE_INTERVAL_SECONDS: u64 = 30;

/// A swap buys the token iff the token-side amount is negative (tokens
/// leaving the pool toward the trader).
pub(crate) fn is_buy(amount0: SignedAmount, amount1: SignedAmount, eth_is_token0: bool) -> bool {
    let token_side = if eth_is_token0 { amount1 } else { amount0 };
    token_side.negative
}

/// USD value of a swap. The smaller absolute amount is taken as the
/// native-token notional. The heuristic assumes WETH on one side, which
/// admission guarantees; the result is still approximate.
pub(crate) fn swap_usd_value(
    amount0: SignedAmount,
    amount1: SignedAmount,
    eth_price_usd: Decimal,
) -> Decimal {
    let notional = if amount0.magnitude <= amount1.magnitude {
        amount0
    } else {
        amount1
    };
    notional.abs_eth() * eth_price_usd
}
