//! Persistent WebSocket connection to the Base node.
//!
//! Registers four log subscriptions over one stream (V4 Initialize, V4 Swap,
//! V3 PoolCreated, V3 Swap), correlates the server-assigned subscription ids,
//! and demultiplexes incoming notifications into typed events on the listener
//! channels. Reconnects with exponential backoff and re-registers all
//! subscriptions; events during a gap are not replayed.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use futures::{SinkExt, StreamExt};
use lru::LruCache;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{
    TOPIC_V3_POOL_CREATED, TOPIC_V3_SWAP, TOPIC_V4_INITIALIZE, TOPIC_V4_SWAP, V3_FACTORY,
    V4_POOL_MANAGER,
};
use crate::decode::{decode_log, RawLog};
use crate::errors::DetectorError;
use crate::types::ChainEvent;

/// Reconnect backoff bounds (seconds).
const BACKOFF_INITIAL_SECONDS: u64 = 1;
const BACKOFF_CAP_SECONDS: u64 = 30;
/// Duplicate-log suppression across reconnects.
const DEDUP_CAPACITY: usize = 16_384;

/// The four log subscriptions registered on every (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    V4Initialize,
    V4Swap,
    V3PoolCreated,
    V3Swap,
}

impl Subscription {
    const ALL: [Subscription; 4] = [
        Subscription::V4Initialize,
        Subscription::V4Swap,
        Subscription::V3PoolCreated,
        Subscription::V3Swap,
    ];

    /// Request id used when registering, so the subscription id in the
    /// response can be correlated back.
    fn request_id(self) -> u64 {
        match self {
            Subscription::V4Initialize => 1,
            Subscription::V4Swap => 2,
            Subscription::V3PoolCreated => 3,
            Subscription::V3Swap => 4,
        }
    }

    fn from_request_id(id: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.request_id() == id)
    }

    /// `eth_subscribe` filter. V3 Swap subscribes by topic alone: swaps are
    /// emitted by individual pool contracts, so pool membership is checked
    /// in-process by the listener.
    fn filter(self) -> Value {
        match self {
            Subscription::V4Initialize => json!({
                "address": V4_POOL_MANAGER,
                "topics": [*TOPIC_V4_INITIALIZE],
            }),
            Subscription::V4Swap => json!({
                "address": V4_POOL_MANAGER,
                "topics": [*TOPIC_V4_SWAP],
            }),
            Subscription::V3PoolCreated => json!({
                "address": V3_FACTORY,
                "topics": [*TOPIC_V3_POOL_CREATED],
            }),
            Subscription::V3Swap => json!({
                "topics": [*TOPIC_V3_SWAP],
            }),
        }
    }
}

/// Run the chain client loop with reconnection until shutdown.
pub async fn run_chain_client(
    url: &str,
    v3_tx: mpsc::Sender<ChainEvent>,
    v4_tx: mpsc::Sender<ChainEvent>,
    shutdown: CancellationToken,
) {
    let capacity = NonZeroUsize::new(DEDUP_CAPACITY).expect("capacity is non-zero");
    let mut dedup: LruCache<(B256, u64), ()> = LruCache::new(capacity);
    let mut backoff = BACKOFF_INITIAL_SECONDS;

    loop {
        if shutdown.is_cancelled() {
            info!("chain client shutdown requested");
            return;
        }

        info!(url, "connecting to chain WebSocket");

        match connect_and_listen(url, &v3_tx, &v4_tx, &mut dedup, &shutdown).await {
            Ok(()) => {
                info!("chain client stopped cleanly");
                return;
            }
            Err(e) => {
                warn!(error = %e, delay_secs = backoff, "chain stream dropped, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                    _ = shutdown.cancelled() => return,
                }
                backoff = (backoff * 2).min(BACKOFF_CAP_SECONDS);
            }
        }
    }
}

/// Connect, register all subscriptions, and pump messages until
/// disconnection or shutdown.
async fn connect_and_listen(
    url: &str,
    v3_tx: &mpsc::Sender<ChainEvent>,
    v4_tx: &mpsc::Sender<ChainEvent>,
    dedup: &mut LruCache<(B256, u64), ()>,
    shutdown: &CancellationToken,
) -> Result<(), DetectorError> {
    let (ws_stream, _response) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();

    for sub in Subscription::ALL {
        let request = json!({
            "jsonrpc": "2.0",
            "id": sub.request_id(),
            "method": "eth_subscribe",
            "params": ["logs", sub.filter()],
        });
        write.send(Message::Text(request.to_string().into())).await?;
    }

    // subscription id ("0x...") → kind, filled as registrations confirm.
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();
    let mut received = 0u64;
    let mut dispatched = 0u64;
    let mut skipped = 0u64;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        received += 1;
                        handle_message(
                            &text,
                            &mut subscriptions,
                            v3_tx,
                            v4_tx,
                            dedup,
                            &mut dispatched,
                            &mut skipped,
                        )
                        .await;

                        if received % 10_000 == 0 {
                            info!(received, dispatched, skipped, "chain stream stats");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(DetectorError::StreamEnded {
                            reason: "closed by server".into(),
                        });
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return Err(DetectorError::StreamEnded {
                            reason: "stream ended".into(),
                        });
                    }
                    _ => {} // Binary, Pong, Frame — ignore.
                }
            }
            _ = shutdown.cancelled() => {
                info!("shutdown requested, closing chain stream");
                return Ok(());
            }
        }
    }
}

/// Handle one frame: either a subscription confirmation or a log
/// notification.
async fn handle_message(
    text: &str,
    subscriptions: &mut HashMap<String, Subscription>,
    v3_tx: &mpsc::Sender<ChainEvent>,
    v4_tx: &mpsc::Sender<ChainEvent>,
    dedup: &mut LruCache<(B256, u64), ()>,
    dispatched: &mut u64,
    skipped: &mut u64,
) {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "unparseable frame");
            return;
        }
    };

    // Subscription confirmation: {"id": N, "result": "0x..."}.
    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
        if let Some(sub) = Subscription::from_request_id(id) {
            match msg.get("result").and_then(Value::as_str) {
                Some(sub_id) => {
                    debug!(?sub, sub_id, "subscription registered");
                    subscriptions.insert(sub_id.to_string(), sub);
                }
                None => error!(?sub, response = %msg, "subscription request failed"),
            }
        }
        return;
    }

    // Log notification.
    if msg.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return;
    }
    let Some(params) = msg.get("params") else { return };
    let known = params
        .get("subscription")
        .and_then(Value::as_str)
        .is_some_and(|id| subscriptions.contains_key(id));
    if !known {
        *skipped += 1;
        return;
    }
    let Some(result) = params.get("result") else { return };

    let log = match parse_log(result) {
        Ok(log) => log,
        Err(e) => {
            warn!(error = %e, "malformed log notification, skipping");
            *skipped += 1;
            return;
        }
    };

    if dedup.contains(&(log.tx_hash, log.log_index)) {
        *skipped += 1;
        return;
    }
    dedup.put((log.tx_hash, log.log_index), ());

    let event = match decode_log(&log) {
        Ok(Some(event)) => event,
        Ok(None) => {
            *skipped += 1;
            return;
        }
        Err(e) => {
            warn!(error = %e, tx = %log.tx_hash, "log decode failed, skipping");
            *skipped += 1;
            return;
        }
    };

    let channel = match event {
        ChainEvent::V3PoolCreated(..) | ChainEvent::V3Swap(..) => v3_tx,
        ChainEvent::V4Initialize(..) | ChainEvent::V4Swap(..) => v4_tx,
    };
    if channel.send(event).await.is_err() {
        debug!("listener channel closed");
        return;
    }
    *dispatched += 1;
}

/// Parse the JSON log object from a subscription notification.
fn parse_log(value: &Value) -> Result<RawLog, DetectorError> {
    let address: Address = str_field(value, "address")?
        .parse()
        .map_err(|_| DetectorError::decode("bad log address"))?;

    let topics = value
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| DetectorError::decode("missing topics"))?
        .iter()
        .map(|t| {
            t.as_str()
                .and_then(|s| s.parse::<B256>().ok())
                .ok_or_else(|| DetectorError::decode("bad topic"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let data_hex = str_field(value, "data")?;
    let data = hex::decode(data_hex.trim_start_matches("0x"))
        .map_err(|e| DetectorError::decode(format!("bad data hex: {e}")))?;

    let tx_hash: B256 = str_field(value, "transactionHash")?
        .parse()
        .map_err(|_| DetectorError::decode("bad tx hash"))?;

    Ok(RawLog {
        address,
        topics,
        data,
        block_number: hex_quantity(value, "blockNumber")?,
        tx_hash,
        log_index: hex_quantity(value, "logIndex")?,
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str, DetectorError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| DetectorError::decode(format!("missing {key}")))
}

fn hex_quantity(value: &Value, key: &str) -> Result<u64, DetectorError> {
    let s = str_field(value, key)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| DetectorError::decode(format!("bad {key}: {e}")))
}
