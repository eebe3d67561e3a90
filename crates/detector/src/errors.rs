use thiserror::Error;

/// Typed error hierarchy for the detector.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation.
#[derive(Error, Debug)]
pub enum DetectorError {
    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Chain transport ----------------------------------------------------
    #[error("chain stream ended: {reason}")]
    StreamEnded { reason: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected RPC response: {0}")]
    RpcShape(String),

    // -- Decoding -----------------------------------------------------------
    #[error("malformed log: {reason}")]
    Decode { reason: String },

    // -- Enrichment ---------------------------------------------------------
    #[error("enrichment HTTP status {0}")]
    EnrichStatus(u16),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

impl DetectorError {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }
}
