//! Signal delivery to the execution bot over Telegram.
//!
//! Serial consumer of the bounded signal queue. The payload is exactly the
//! checksummed token address — no commands, no markup — so the downstream
//! executor treats it like a pasted contract address. Delivery is
//! at-most-once: failures are logged and dropped, never retried, to avoid
//! double buys if the executor already received the message.

use teloxide::prelude::*;
use teloxide::types::{ChatId, Recipient};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DetectorConfig;
use crate::types::Signal;

/// Run the output consumer until the queue closes or shutdown.
pub async fn run_sender(
    config: std::sync::Arc<DetectorConfig>,
    mut signal_rx: mpsc::Receiver<Signal>,
    shutdown: CancellationToken,
) {
    let bot = if config.dry_run || config.telegram_bot_token.is_empty() {
        info!("dry-run mode: signals will be logged, not sent");
        None
    } else {
        info!(recipient = %config.executor_bot_chat, "telegram sender connected");
        Some(Bot::new(config.telegram_bot_token.clone()))
    };

    loop {
        let signal = tokio::select! {
            signal = signal_rx.recv() => match signal {
                Some(s) => s,
                None => {
                    info!("signal queue closed, sender stopping");
                    return;
                }
            },
            _ = shutdown.cancelled() => {
                info!("sender shutting down, pending signals dropped");
                return;
            }
        };

        let payload = signal.token.to_checksum(None);

        match &bot {
            None => {
                info!(
                    token = %payload,
                    diagnostics = %serde_json::to_string(&signal.diagnostics)
                        .unwrap_or_default(),
                    "DRY RUN signal"
                );
            }
            Some(bot) => {
                // 500-800ms jitter between sends (anti-spam).
                let jitter = 500 + (signal.emitted_at % 300);
                tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;

                match bot
                    .send_message(recipient(&config.executor_bot_chat), payload.clone())
                    .await
                {
                    Ok(_) => info!(token = %payload, "signal sent"),
                    Err(e) => {
                        // At-most-once: log and drop.
                        error!(token = %payload, error = %e, "telegram send failed, dropping");
                    }
                }
            }
        }
    }
}

/// Interpret the configured chat as a numeric id or an @username.
fn recipient(chat: &str) -> Recipient {
    if let Ok(id) = chat.parse::<i64>() {
        Recipient::Id(ChatId(id))
    } else if chat.starts_with('@') {
        Recipient::ChannelUsername(chat.to_string())
    } else {
        warn!(chat, "recipient has no @ prefix and is not numeric, prefixing @");
        Recipient::ChannelUsername(format!("@{chat}"))
    }
}
