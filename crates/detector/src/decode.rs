//! Raw log → typed event decoding.
//!
//! Topic-0 identifies the event; indexed fields come from the remaining
//! topics and the 32-byte-aligned data payload is sliced per the event
//! signature. All numerics are two's-complement 256-bit words; swap amounts
//! are signed.

use alloy::primitives::{Address, B256, U256};

use crate::constants::{TOPIC_V3_POOL_CREATED, TOPIC_V3_SWAP, TOPIC_V4_INITIALIZE, TOPIC_V4_SWAP};
use crate::errors::DetectorError;
use crate::types::{
    ChainEvent, EventMeta, SignedAmount, V3PoolCreated, V3Swap, V4Initialize, V4Swap,
};

/// An undecoded log notification from the chain stream.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl RawLog {
    pub fn meta(&self) -> EventMeta {
        EventMeta {
            block_number: self.block_number,
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }
}

/// Decode a raw log into a typed chain event by topic-0 matching.
///
/// Unrecognized topics return `Ok(None)` (the global V3 Swap subscription
/// delivers logs we have no interest in); structurally malformed logs return
/// an error so the caller can log-and-skip.
pub fn decode_log(log: &RawLog) -> Result<Option<ChainEvent>, DetectorError> {
    let topic0 = match log.topics.first() {
        Some(t) => *t,
        None => return Err(DetectorError::decode("log has no topics")),
    };

    let meta = log.meta();
    if topic0 == *TOPIC_V4_INITIALIZE {
        Ok(Some(ChainEvent::V4Initialize(meta, decode_v4_initialize(log)?)))
    } else if topic0 == *TOPIC_V4_SWAP {
        Ok(Some(ChainEvent::V4Swap(meta, decode_v4_swap(log)?)))
    } else if topic0 == *TOPIC_V3_POOL_CREATED {
        Ok(Some(ChainEvent::V3PoolCreated(meta, decode_v3_pool_created(log)?)))
    } else if topic0 == *TOPIC_V3_SWAP {
        Ok(Some(ChainEvent::V3Swap(meta, decode_v3_swap(log)?)))
    } else {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Per-event decoders
// ---------------------------------------------------------------------------

// Initialize(bytes32 indexed id, address indexed currency0,
//            address indexed currency1, uint24 fee, int24 tickSpacing,
//            address hooks, uint160 sqrtPriceX96, int24 tick)
fn decode_v4_initialize(log: &RawLog) -> Result<V4Initialize, DetectorError> {
    check_shape(log, 4, 5)?;
    Ok(V4Initialize {
        pool_id: log.topics[1],
        currency0: topic_address(log.topics[2]),
        currency1: topic_address(log.topics[3]),
        fee: word_u32(&log.data, 0)?,
        tick_spacing: word_i32(&log.data, 1)?,
        hooks: word_address(&log.data, 2)?,
        sqrt_price_x96: word_u256(&log.data, 3)?,
        tick: word_i32(&log.data, 4)?,
    })
}

// Swap(bytes32 indexed id, address indexed sender,
//      int128 amount0, int128 amount1, uint160 sqrtPriceX96,
//      uint128 liquidity, int24 tick, uint24 fee)
fn decode_v4_swap(log: &RawLog) -> Result<V4Swap, DetectorError> {
    check_shape(log, 3, 6)?;
    Ok(V4Swap {
        pool_id: log.topics[1],
        sender: topic_address(log.topics[2]),
        amount0: word_signed(&log.data, 0)?,
        amount1: word_signed(&log.data, 1)?,
        sqrt_price_x96: word_u256(&log.data, 2)?,
        liquidity: word_u128(&log.data, 3)?,
        tick: word_i32(&log.data, 4)?,
        fee: word_u32(&log.data, 5)?,
    })
}

// PoolCreated(address indexed token0, address indexed token1,
//             uint24 indexed fee, int24 tickSpacing, address pool)
fn decode_v3_pool_created(log: &RawLog) -> Result<V3PoolCreated, DetectorError> {
    check_shape(log, 4, 2)?;
    Ok(V3PoolCreated {
        token0: topic_address(log.topics[1]),
        token1: topic_address(log.topics[2]),
        fee: topic_u32(log.topics[3]),
        tick_spacing: word_i32(&log.data, 0)?,
        pool: word_address(&log.data, 1)?,
    })
}

// Swap(address indexed sender, address indexed recipient,
//      int256 amount0, int256 amount1, uint160 sqrtPriceX96,
//      uint128 liquidity, int24 tick)
fn decode_v3_swap(log: &RawLog) -> Result<V3Swap, DetectorError> {
    check_shape(log, 3, 5)?;
    Ok(V3Swap {
        pool: log.address,
        sender: topic_address(log.topics[1]),
        recipient: topic_address(log.topics[2]),
        amount0: word_signed(&log.data, 0)?,
        amount1: word_signed(&log.data, 1)?,
        sqrt_price_x96: word_u256(&log.data, 2)?,
        liquidity: word_u128(&log.data, 3)?,
        tick: word_i32(&log.data, 4)?,
    })
}

// ---------------------------------------------------------------------------
// Word helpers
// ---------------------------------------------------------------------------

fn check_shape(log: &RawLog, topics: usize, words: usize) -> Result<(), DetectorError> {
    if log.topics.len() != topics {
        return Err(DetectorError::decode(format!(
            "expected {topics} topics, got {}",
            log.topics.len()
        )));
    }
    if log.data.len() < words * 32 {
        return Err(DetectorError::decode(format!(
            "expected {} data bytes, got {}",
            words * 32,
            log.data.len()
        )));
    }
    Ok(())
}

fn word(data: &[u8], index: usize) -> Result<[u8; 32], DetectorError> {
    let start = index * 32;
    data.get(start..start + 32)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| DetectorError::decode(format!("data word {index} out of range")))
}

fn word_u256(data: &[u8], index: usize) -> Result<U256, DetectorError> {
    Ok(U256::from_be_bytes(word(data, index)?))
}

fn word_u128(data: &[u8], index: usize) -> Result<u128, DetectorError> {
    let w = word(data, index)?;
    Ok(u128::from_be_bytes(
        w[16..32].try_into().expect("slice is 16 bytes"),
    ))
}

fn word_u32(data: &[u8], index: usize) -> Result<u32, DetectorError> {
    let w = word(data, index)?;
    Ok(u32::from_be_bytes(
        w[28..32].try_into().expect("slice is 4 bytes"),
    ))
}

/// ABI-encoded int24/int32 values are sign-extended across the full word, so
/// the low 4 bytes carry the two's-complement value.
fn word_i32(data: &[u8], index: usize) -> Result<i32, DetectorError> {
    let w = word(data, index)?;
    Ok(i32::from_be_bytes(
        w[28..32].try_into().expect("slice is 4 bytes"),
    ))
}

fn word_address(data: &[u8], index: usize) -> Result<Address, DetectorError> {
    let w = word(data, index)?;
    Ok(Address::from_slice(&w[12..32]))
}

fn word_signed(data: &[u8], index: usize) -> Result<SignedAmount, DetectorError> {
    Ok(SignedAmount::from_word(word(data, index)?))
}

/// Extract the address packed into the low 20 bytes of an indexed topic.
fn topic_address(topic: B256) -> Address {
    Address::from_slice(&topic.0[12..32])
}

fn topic_u32(topic: B256) -> u32 {
    u32::from_be_bytes(topic.0[28..32].try_into().expect("slice is 4 bytes"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{V3_FACTORY, V4_POOL_MANAGER, WETH};
    use alloy::primitives::{address, b256};

    const TOKEN: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const SENDER: Address = address!("1111111111111111111111111111111111111111");
    const RECIPIENT: Address = address!("2222222222222222222222222222222222222222");
    const POOL_ID: B256 =
        b256!("00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff");

    fn word_of_u256(value: U256) -> [u8; 32] {
        value.to_be_bytes::<32>()
    }

    fn word_of_address(addr: Address) -> [u8; 32] {
        let mut w = [0u8; 32];
        w[12..32].copy_from_slice(addr.as_slice());
        w
    }

    fn word_of_i64(value: i64) -> [u8; 32] {
        // Sign-extend across the full word like the ABI does.
        let fill = if value < 0 { 0xff } else { 0x00 };
        let mut w = [fill; 32];
        w[24..32].copy_from_slice(&value.to_be_bytes());
        w
    }

    fn topic_of_address(addr: Address) -> B256 {
        B256::from(word_of_address(addr))
    }

    fn raw(address: Address, topics: Vec<B256>, words: Vec<[u8; 32]>) -> RawLog {
        RawLog {
            address,
            topics,
            data: words.concat(),
            block_number: 12_345,
            tx_hash: B256::repeat_byte(0xab),
            log_index: 7,
        }
    }

    /// Round-trip: encoding a synthetic V4 swap log and decoding it yields
    /// identical structured fields.
    #[test]
    fn test_v4_swap_round_trip() {
        let sqrt_price = U256::from(1u64) << 96;
        let log = raw(
            V4_POOL_MANAGER,
            vec![*TOPIC_V4_SWAP, POOL_ID, topic_of_address(SENDER)],
            vec![
                word_of_i64(1_000_000_000_000_000_000), // amount0: +1 ETH in
                word_of_i64(-42_000_000),               // amount1: tokens out
                word_of_u256(sqrt_price),
                word_of_u256(U256::from(777u64)), // liquidity
                word_of_i64(-12),                 // tick
                word_of_u256(U256::from(3000u64)), // fee
            ],
        );

        let event = decode_log(&log).unwrap().unwrap();
        let ChainEvent::V4Swap(meta, swap) = event else {
            panic!("expected V4Swap");
        };
        assert_eq!(meta.block_number, 12_345);
        assert_eq!(swap.pool_id, POOL_ID);
        assert_eq!(swap.sender, SENDER);
        assert!(!swap.amount0.negative);
        assert_eq!(
            swap.amount0.magnitude,
            U256::from(1_000_000_000_000_000_000u128)
        );
        assert!(swap.amount1.negative);
        assert_eq!(swap.amount1.magnitude, U256::from(42_000_000u64));
        assert_eq!(swap.sqrt_price_x96, sqrt_price);
        assert_eq!(swap.liquidity, 777);
        assert_eq!(swap.tick, -12);
        assert_eq!(swap.fee, 3000);
    }

    #[test]
    fn test_v4_initialize_round_trip() {
        let sqrt_price = U256::from(2u64) << 96;
        let log = raw(
            V4_POOL_MANAGER,
            vec![
                *TOPIC_V4_INITIALIZE,
                POOL_ID,
                topic_of_address(Address::ZERO),
                topic_of_address(TOKEN),
            ],
            vec![
                word_of_u256(U256::from(10_000u64)), // fee
                word_of_i64(200),                    // tickSpacing
                word_of_address(Address::ZERO),      // hooks
                word_of_u256(sqrt_price),
                word_of_i64(0), // tick
            ],
        );

        let event = decode_log(&log).unwrap().unwrap();
        let ChainEvent::V4Initialize(_, init) = event else {
            panic!("expected V4Initialize");
        };
        assert_eq!(init.pool_id, POOL_ID);
        assert_eq!(init.currency0, Address::ZERO);
        assert_eq!(init.currency1, TOKEN);
        assert_eq!(init.fee, 10_000);
        assert_eq!(init.tick_spacing, 200);
        assert_eq!(init.hooks, Address::ZERO);
        assert_eq!(init.sqrt_price_x96, sqrt_price);
    }

    #[test]
    fn test_v3_pool_created_round_trip() {
        let pool = address!("3333333333333333333333333333333333333333");
        let mut fee_topic = [0u8; 32];
        fee_topic[28..32].copy_from_slice(&10_000u32.to_be_bytes());
        let log = raw(
            V3_FACTORY,
            vec![
                *TOPIC_V3_POOL_CREATED,
                topic_of_address(WETH),
                topic_of_address(TOKEN),
                B256::from(fee_topic),
            ],
            vec![word_of_i64(200), word_of_address(pool)],
        );

        let event = decode_log(&log).unwrap().unwrap();
        let ChainEvent::V3PoolCreated(_, created) = event else {
            panic!("expected V3PoolCreated");
        };
        assert_eq!(created.token0, WETH);
        assert_eq!(created.token1, TOKEN);
        assert_eq!(created.fee, 10_000);
        assert_eq!(created.tick_spacing, 200);
        assert_eq!(created.pool, pool);
    }

    #[test]
    fn test_v3_swap_round_trip() {
        let pool = address!("4444444444444444444444444444444444444444");
        let log = raw(
            pool,
            vec![
                *TOPIC_V3_SWAP,
                topic_of_address(SENDER),
                topic_of_address(RECIPIENT),
            ],
            vec![
                word_of_i64(-5_000_000),                 // amount0: tokens out
                word_of_i64(2_000_000_000_000_000_000),  // amount1: +2 ETH in
                word_of_u256(U256::from(1u64) << 96),
                word_of_u256(U256::from(999u64)),
                word_of_i64(55),
            ],
        );

        let event = decode_log(&log).unwrap().unwrap();
        let ChainEvent::V3Swap(_, swap) = event else {
            panic!("expected V3Swap");
        };
        assert_eq!(swap.pool, pool);
        assert_eq!(swap.sender, SENDER);
        assert_eq!(swap.recipient, RECIPIENT);
        assert!(swap.amount0.negative);
        assert!(!swap.amount1.negative);
        assert_eq!(swap.tick, 55);
    }

    #[test]
    fn test_unknown_topic_is_skipped() {
        let log = raw(TOKEN, vec![B256::repeat_byte(0x99)], vec![]);
        assert!(decode_log(&log).unwrap().is_none());
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let mut log = raw(
            V4_POOL_MANAGER,
            vec![*TOPIC_V4_SWAP, POOL_ID, topic_of_address(SENDER)],
            vec![word_of_i64(1)],
        );
        log.data.truncate(16);
        assert!(decode_log(&log).is_err());
    }

    #[test]
    fn test_missing_topics_is_an_error() {
        let log = raw(V4_POOL_MANAGER, vec![*TOPIC_V4_SWAP], vec![]);
        assert!(decode_log(&log).is_err());
    }
}
