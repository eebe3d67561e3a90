//! Signal engine — core decision logic.
//!
//! Evaluates token state against the hard rules plus anti-spam guards, on
//! every swap update and every enrichment. On all-pass the token is latched
//! (`signaled`), recorded in the dedup set, counted against the hourly rate
//! limit, and the signal is enqueued for delivery.
//!
//! Evaluation runs inside the tracker's `mutate` closure, so per-token
//! decisions are serialized; the engine's own gate state locks strictly
//! inside that (single lock order: tracker → gate).

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use alloy::primitives::Address;
use lru::LruCache;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::tracker::{SafetyVerdict, TokenState, TokenTracker};
use crate::types::{Signal, SignalDiagnostics};
use crate::util::unix_now;

const HOUR_SECONDS: u64 = 3_600;
const DAY_SECONDS: u64 = 86_400;
/// Bound on remembered signaled/rejected tokens.
const DEDUP_CAPACITY: usize = 8_192;

/// Anti-spam gate state plus run statistics, mutated only under one lock.
struct Gate {
    /// Emission timestamps within the last hour.
    signal_times: VecDeque<u64>,
    /// deployer → token → first-seen timestamp, rolling 24h window.
    deployer_history: HashMap<Address, HashMap<Address, u64>>,
    /// Tokens already signaled or terminally rejected.
    dedup: LruCache<Address, ()>,
    stats: EngineStats,
}

/// Counters exposed to the stats task.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub evaluated: u64,
    pub signaled: u64,
    pub rejected: u64,
    pub reject_reasons: HashMap<&'static str, u64>,
    pub signals_this_hour: usize,
    pub latency_sum: u64,
    pub latency_min: Option<u64>,
    pub latency_max: Option<u64>,
    /// Pool-creation → signal latency buckets:
    /// 0-15s, 15-30s, 30-60s, 60-90s, 90-120s, 120s+.
    pub latency_buckets: [u64; 6],
}

impl EngineStats {
    pub fn avg_latency(&self) -> Option<u64> {
        if self.signaled == 0 {
            None
        } else {
            Some(self.latency_sum / self.signaled)
        }
    }

    fn record_latency(&mut self, latency: u64) {
        self.latency_sum += latency;
        self.latency_min = Some(self.latency_min.map_or(latency, |m| m.min(latency)));
        self.latency_max = Some(self.latency_max.map_or(latency, |m| m.max(latency)));
        let bucket = match latency {
            0..=14 => 0,
            15..=29 => 1,
            30..=59 => 2,
            60..=89 => 3,
            90..=119 => 4,
            _ => 5,
        };
        self.latency_buckets[bucket] += 1;
    }
}

pub struct SignalEngine {
    config: std::sync::Arc<DetectorConfig>,
    gate: Mutex<Gate>,
    signal_tx: mpsc::Sender<Signal>,
}

impl SignalEngine {
    pub fn new(config: std::sync::Arc<DetectorConfig>, signal_tx: mpsc::Sender<Signal>) -> Self {
        Self {
            config,
            gate: Mutex::new(Gate {
                signal_times: VecDeque::new(),
                deployer_history: HashMap::new(),
                dedup: LruCache::new(
                    NonZeroUsize::new(DEDUP_CAPACITY).expect("capacity is non-zero"),
                ),
                stats: EngineStats::default(),
            }),
            signal_tx,
        }
    }

    /// Evaluate a token now. Returns whether a signal fired.
    pub fn evaluate(&self, tracker: &TokenTracker, token: Address) -> bool {
        self.evaluate_at(tracker, token, unix_now())
    }

    /// Evaluate at an explicit time (the clock is a parameter for tests and
    /// boundary exactness).
    pub fn evaluate_at(&self, tracker: &TokenTracker, token: Address, now: u64) -> bool {
        let signal = tracker.mutate(token, now, |state| self.check(state, now));

        let Some(Some(signal)) = signal else {
            return false;
        };

        // Delivery is best-effort: a full queue is logged and dropped rather
        // than blocking the event loop.
        match self.signal_tx.try_send(signal) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(signal)) => {
                warn!(token = %signal.token, "signal queue full, dropping signal");
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                warn!(token = %signal.token, "signal queue closed, dropping signal");
            }
        }
        true
    }

    /// Terminal rejection from outside the rules conjunction (unsafe
    /// bytecode, honeypot, admission cleanup). Stops all further evaluation.
    pub fn reject_terminal(&self, token: Address, reason: &'static str) {
        let mut gate = self.gate.lock().expect("gate lock poisoned");
        gate.dedup.put(token, ());
        *gate.stats.reject_reasons.entry(reason).or_insert(0) += 1;
        gate.stats.rejected += 1;
    }

    /// Snapshot of counters for the stats task.
    pub fn stats(&self) -> EngineStats {
        let mut gate = self.gate.lock().expect("gate lock poisoned");
        let now = unix_now();
        prune_window(&mut gate.signal_times, now, HOUR_SECONDS);
        let mut stats = gate.stats.clone();
        stats.signals_this_hour = gate.signal_times.len();
        stats
    }

    // -----------------------------------------------------------------------
    // Rules conjunction
    // -----------------------------------------------------------------------

    /// Run the full conjunction against one state. Called inside
    /// `tracker.mutate`; returns the signal to enqueue on all-pass.
    ///
    /// Short-circuit order: cheapest and most-often-failing first.
    fn check(&self, state: &mut TokenState, now: u64) -> Option<Signal> {
        let mut gate = self.gate.lock().expect("gate lock poisoned");
        gate.stats.evaluated += 1;

        // Once signaled, permanently ineligible.
        if state.signaled {
            return None;
        }
        let token = state.token;
        if gate.dedup.contains(&token) {
            return None;
        }

        // 1. Age window. Exactly at the boundary still passes; beyond it the
        // token can never qualify again.
        let age = state.age_seconds(now);
        if age > self.config.max_token_age_seconds {
            gate.reject(token, "too_old", true);
            debug!(token = %token, age, "rejected: too old");
            return None;
        }

        // 2. Liquidity floor. The most common precondition — not counted as
        // a rejection.
        let liquidity = state.liquidity_usd;
        if liquidity < self.config.min_liquidity_usd {
            return None;
        }

        // 3. Mcap ceiling (only when we have an estimate).
        let mcap = state.estimated_mcap;
        if mcap > self.config.max_mcap_usd {
            gate.reject(token, "mcap_high", false);
            debug!(token = %token, mcap = %mcap, "rejected: mcap too high");
            return None;
        }

        // 4. Buy count floor.
        if state.total_buys < self.config.min_buys {
            return None;
        }

        // 5. Largest single buy as % of liquidity. Exact threshold passes.
        let largest_buy_pct = if liquidity > Decimal::ZERO {
            state.largest_buy_usd / liquidity * dec!(100)
        } else {
            Decimal::ZERO
        };
        if largest_buy_pct < self.config.min_largest_buy_pct {
            gate.reject(token, "weak_buy", false);
            debug!(token = %token, pct = %largest_buy_pct, "rejected: weak largest buy");
            return None;
        }

        // 6. Bytecode verdict. Unknown blocks without rejecting — the engine
        // waits for the scan, it does not guess.
        match state.bytecode_safe {
            SafetyVerdict::Safe => {}
            SafetyVerdict::Unknown => return None,
            SafetyVerdict::Unsafe => {
                gate.reject(token, "unsafe_bytecode", true);
                return None;
            }
        }

        // 7. Honeypot suspicion (enrichment-sourced).
        if state.honeypot_suspected {
            gate.reject(token, "no_sells", true);
            return None;
        }

        // 8. Deployer quota: serial launchers get one signal budget per day.
        if let Some(deployer) = state.deployer {
            let count = gate.record_deployer(deployer, token, now);
            if count > self.config.max_deployer_tokens_24h {
                gate.reject(token, "deployer_spam", true);
                info!(token = %token, deployer = %deployer, count, "rejected: serial deployer");
                return None;
            }
        }

        // 9. Hourly rate limit.
        prune_window(&mut gate.signal_times, now, HOUR_SECONDS);
        if gate.signal_times.len() >= self.config.max_signals_per_hour {
            gate.reject(token, "rate_limited", false);
            debug!(token = %token, "rejected: hourly signal cap");
            return None;
        }

        // 10. Optional latency cutoff: past a point the edge is gone.
        let latency = now.saturating_sub(state.first_seen);
        if self.config.max_signal_latency_seconds > 0
            && latency > self.config.max_signal_latency_seconds
        {
            gate.reject(token, "too_slow", true);
            return None;
        }

        // All pass — latch and emit exactly once.
        state.signaled = true;
        state.signal_time = now;
        gate.dedup.put(token, ());
        gate.signal_times.push_back(now);
        gate.stats.signaled += 1;
        gate.stats.record_latency(latency);

        let diagnostics = SignalDiagnostics {
            dex_version: state.pool.dex_version(),
            age_seconds: age,
            mcap_usd: mcap,
            liquidity_usd: liquidity,
            total_buys: state.total_buys,
            unique_buyers: state.unique_buyers.len(),
            largest_buy_usd: state.largest_buy_usd,
            buy_volume_usd: state.buy_volume_usd,
            momentum: state.has_momentum(now),
        };

        info!(
            token = %token,
            dex = %diagnostics.dex_version,
            age = age,
            mcap = %mcap,
            liquidity = %liquidity,
            buys = state.total_buys,
            unique = diagnostics.unique_buyers,
            largest_buy = %state.largest_buy_usd,
            largest_buy_pct = %largest_buy_pct,
            latency = latency,
            momentum = diagnostics.momentum,
            "SIGNAL FIRED"
        );

        Some(Signal {
            token,
            emitted_at: now,
            diagnostics,
        })
    }
}

impl Gate {
    fn reject(&mut self, token: Address, reason: &'static str, terminal: bool) {
        if terminal {
            self.dedup.put(token, ());
        }
        *self.stats.reject_reasons.entry(reason).or_insert(0) += 1;
        self.stats.rejected += 1;
    }

    /// Record (deployer, token) idempotently, prune the 24h window, and
    /// return the number of tokens this deployer launched within it.
    fn record_deployer(&mut self, deployer: Address, token: Address, now: u64) -> usize {
        let tokens = self.deployer_history.entry(deployer).or_default();
        let cutoff = now.saturating_sub(DAY_SECONDS);
        tokens.retain(|_, &mut ts| ts > cutoff);
        tokens.entry(token).or_insert(now);
        tokens.len()
    }
}

fn prune_window(times: &mut VecDeque<u64>, now: u64, window: u64) {
    let cutoff = now.saturating_sub(window);
    while times.front().is_some_and(|&t| t < cutoff) {
        times.pop_front();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
