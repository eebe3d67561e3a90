//! Bytecode safety scanning.
//!
//! One-shot fetch of the deployed token contract code, scanned for dangerous
//! function selectors and proxy prologues. Any hit fails the token; empty
//! bytecode (EOA or not yet deployed) also fails. Runs as a background task
//! per token; the verdict lands on the TokenState exactly once.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use tracing::{debug, info};

use crate::constants::{DANGEROUS_SELECTORS, PROXY_PATTERNS};
use crate::engine::SignalEngine;
use crate::rpc::RpcClient;
use crate::tracker::{SafetyVerdict, TokenTracker};
use crate::util::unix_now;

const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pure bytecode scan. Returns the verdict and the matched pattern names.
pub fn scan_bytecode(code: &[u8]) -> (SafetyVerdict, Vec<&'static str>) {
    if code.is_empty() {
        return (SafetyVerdict::Unsafe, vec!["no bytecode"]);
    }

    let mut findings = Vec::new();
    for (selector, name) in DANGEROUS_SELECTORS {
        if contains(code, &selector) {
            findings.push(name);
        }
    }
    for (pattern, name) in PROXY_PATTERNS {
        if contains(code, pattern) {
            findings.push(name);
        }
    }

    if findings.is_empty() {
        (SafetyVerdict::Safe, findings)
    } else {
        (SafetyVerdict::Unsafe, findings)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Background safety check for one token. Fetches bytecode, scans it, caches
/// the verdict, and re-evaluates. Fetch failure or timeout leaves the verdict
/// `Unknown` — the engine waits rather than guessing.
pub async fn run_safety_check(
    rpc: Arc<RpcClient>,
    tracker: Arc<TokenTracker>,
    engine: Arc<SignalEngine>,
    token: Address,
) {
    let code = match tokio::time::timeout(SCAN_TIMEOUT, rpc.get_code(token)).await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            debug!(token = %token, error = %e, "bytecode fetch failed");
            return;
        }
        Err(_) => {
            debug!(token = %token, "bytecode fetch timed out");
            return;
        }
    };

    let (verdict, findings) = scan_bytecode(&code);

    let applied = tracker
        .mutate(token, unix_now(), |state| {
            // One-way transition: first verdict wins.
            if state.bytecode_safe == SafetyVerdict::Unknown {
                state.bytecode_safe = verdict;
                true
            } else {
                false
            }
        })
        .unwrap_or(false);

    if !applied {
        return;
    }

    match verdict {
        SafetyVerdict::Unsafe => {
            info!(token = %token, findings = ?findings, "bytecode unsafe");
            engine.reject_terminal(token, "unsafe_bytecode");
        }
        SafetyVerdict::Safe => {
            debug!(token = %token, bytes = code.len(), "bytecode safe");
            // The verdict may have been the last missing predicate.
            engine.evaluate(&tracker, token);
        }
        SafetyVerdict::Unknown => {}
    }
}

/// Background deployer resolution: the sender of the pool-creation
/// transaction is recorded as the token's deployer.
pub async fn resolve_deployer(
    rpc: Arc<RpcClient>,
    tracker: Arc<TokenTracker>,
    token: Address,
    tx_hash: B256,
) {
    match rpc.get_transaction_sender(tx_hash).await {
        Ok(Some(sender)) => {
            tracker.mutate(token, unix_now(), |state| {
                if state.deployer.is_none() {
                    state.deployer = Some(sender);
                }
            });
            debug!(token = %token, deployer = %sender, "deployer resolved");
        }
        Ok(None) => debug!(token = %token, tx = %tx_hash, "creation tx not found"),
        Err(e) => debug!(token = %token, error = %e, "deployer resolution failed"),
    }
}
