//! One-shot JSON-RPC calls over the HTTP endpoint.
//!
//! The persistent WebSocket carries only subscriptions; point lookups
//! (bytecode, transaction sender, chain id) go through here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, B256};
use serde_json::{json, Value};

use crate::errors::DetectorError;

pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, DetectorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp: Value = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = resp.get("error") {
            return Err(DetectorError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        resp.get("result")
            .cloned()
            .ok_or_else(|| DetectorError::RpcShape("missing result".into()))
    }

    /// `eth_chainId`, for the startup sanity check.
    pub async fn chain_id(&self) -> Result<u64, DetectorError> {
        let result = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&result)
    }

    /// `eth_blockNumber`.
    pub async fn block_number(&self) -> Result<u64, DetectorError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    /// `eth_getCode` at latest. Empty bytes mean no contract is deployed.
    pub async fn get_code(&self, address: Address) -> Result<Vec<u8>, DetectorError> {
        let result = self
            .call("eth_getCode", json!([format!("{address:?}"), "latest"]))
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| DetectorError::RpcShape("eth_getCode result not a string".into()))?;
        hex::decode(hex_str.trim_start_matches("0x"))
            .map_err(|e| DetectorError::RpcShape(format!("bad bytecode hex: {e}")))
    }

    /// `eth_call` against a contract at latest. `data` is selector-prefixed
    /// calldata; the raw return bytes come back.
    pub async fn eth_call(
        &self,
        to: Address,
        data: &[u8],
    ) -> Result<Vec<u8>, DetectorError> {
        let result = self
            .call(
                "eth_call",
                json!([
                    { "to": format!("{to:?}"), "data": format!("0x{}", hex::encode(data)) },
                    "latest"
                ]),
            )
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| DetectorError::RpcShape("eth_call result not a string".into()))?;
        hex::decode(hex_str.trim_start_matches("0x"))
            .map_err(|e| DetectorError::RpcShape(format!("bad call result hex: {e}")))
    }

    /// Sender (`from`) of a transaction, used to resolve the deployer of a
    /// token from its pool-creation transaction.
    pub async fn get_transaction_sender(
        &self,
        tx_hash: B256,
    ) -> Result<Option<Address>, DetectorError> {
        let result = self
            .call("eth_getTransactionByHash", json!([format!("{tx_hash:?}")]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let from = result
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| DetectorError::RpcShape("transaction missing from".into()))?;
        from.parse()
            .map(Some)
            .map_err(|e| DetectorError::RpcShape(format!("bad from address: {e}")))
    }
}

fn parse_quantity(value: &Value) -> Result<u64, DetectorError> {
    let s = value
        .as_str()
        .ok_or_else(|| DetectorError::RpcShape("quantity not a string".into()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| DetectorError::RpcShape(format!("bad quantity {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x2105")).unwrap(), 8453);
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert!(parse_quantity(&json!(42)).is_err());
        assert!(parse_quantity(&json!("zz")).is_err());
    }
}
