//! Configuration for the detector binary.
//!
//! Loads from environment variables with sensible defaults. The WebSocket
//! endpoint is the only required setting; everything else has a default
//! matching the signal rules.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Runtime configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Chain WebSocket endpoint for log subscriptions. Required.
    pub rpc_wss: String,
    /// Chain HTTP endpoint for one-shot RPCs.
    pub rpc_http: String,

    // -- Signal thresholds --------------------------------------------------
    /// Signal window: tokens older than this never signal.
    pub max_token_age_seconds: u64,
    /// Market cap ceiling.
    pub max_mcap_usd: Decimal,
    /// Liquidity floor.
    pub min_liquidity_usd: Decimal,
    /// Total buy count floor.
    pub min_buys: u32,
    /// Largest single buy as a percentage of liquidity.
    pub min_largest_buy_pct: Decimal,

    // -- Anti-spam ----------------------------------------------------------
    /// Rolling one-hour signal cap.
    pub max_signals_per_hour: usize,
    /// Deployers launching more than this many tokens in 24h are rejected.
    pub max_deployer_tokens_24h: usize,
    /// Optional pool-creation → signal latency cutoff. 0 disables.
    pub max_signal_latency_seconds: u64,

    // -- Tracking -----------------------------------------------------------
    /// Tokens whose enriched liquidity is below this are dropped entirely.
    pub ignore_liquidity_below_usd: Decimal,
    /// Tracker eviction TTL.
    pub token_ttl_seconds: u64,

    // -- Output -------------------------------------------------------------
    /// Log signals instead of sending them.
    pub dry_run: bool,
    /// Telegram bot token. Empty forces dry-run behaviour for sends.
    pub telegram_bot_token: String,
    /// Recipient of signal payloads: a numeric chat id or an @username.
    pub executor_bot_chat: String,
}

impl DetectorConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let rpc_wss = match env_string("RPC_WSS") {
            Some(url) => url,
            None => bail!("RPC_WSS is required (Base WebSocket endpoint)"),
        };

        let config = Self {
            rpc_wss,
            rpc_http: env_string("RPC_HTTP")
                .unwrap_or_else(|| "https://mainnet.base.org".to_string()),
            max_token_age_seconds: env_parse("MAX_TOKEN_AGE_SECONDS").unwrap_or(180),
            max_mcap_usd: env_parse("MAX_MCAP_USD").unwrap_or(dec!(30_000)),
            min_liquidity_usd: env_parse("MIN_LIQUIDITY_USD").unwrap_or(dec!(3_000)),
            min_buys: env_parse("MIN_BUYS").unwrap_or(2),
            min_largest_buy_pct: env_parse("MIN_LARGEST_BUY_PCT").unwrap_or(dec!(10)),
            max_signals_per_hour: env_parse("MAX_SIGNALS_PER_HOUR").unwrap_or(5),
            max_deployer_tokens_24h: env_parse("MAX_DEPLOYER_TOKENS_24H").unwrap_or(2),
            max_signal_latency_seconds: env_parse("MAX_SIGNAL_LATENCY_SECONDS").unwrap_or(0),
            ignore_liquidity_below_usd: env_parse("IGNORE_LIQUIDITY_BELOW_USD")
                .unwrap_or(dec!(2_000)),
            token_ttl_seconds: env_parse("TOKEN_TTL_SECONDS").unwrap_or(300),
            dry_run: env_bool("DRY_RUN").unwrap_or(true),
            telegram_bot_token: env_string("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            executor_bot_chat: env_string("EXECUTOR_BOT_CHAT").unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.rpc_wss.starts_with("ws") {
            bail!("RPC_WSS must be a ws:// or wss:// URL, got {}", self.rpc_wss);
        }
        if self.token_ttl_seconds < self.max_token_age_seconds {
            bail!(
                "TOKEN_TTL_SECONDS ({}) must cover MAX_TOKEN_AGE_SECONDS ({})",
                self.token_ttl_seconds,
                self.max_token_age_seconds
            );
        }
        if !self.dry_run {
            if self.telegram_bot_token.is_empty() {
                bail!("TELEGRAM_BOT_TOKEN is required when DRY_RUN=false");
            }
            if self.executor_bot_chat.is_empty() {
                bail!("EXECUTOR_BOT_CHAT is required when DRY_RUN=false");
            }
        }
        Ok(())
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Parse an environment variable into a type that implements `FromStr`.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
