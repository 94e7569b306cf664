//! Outbound notification sink
//!
//! Fire-and-forget delivery to a single configured destination. A failed
//! delivery is logged (and the signal retried on the next Stage B cycle);
//! there is no synchronous retry here. The same sink carries per-cycle
//! operational alerts.

use super::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::time::Duration;

/// Seam for the delivery channel so the cascade is testable with a
/// recording sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> PipelineResult<()>;
}

/// Telegram-contract sink: POST sendMessage to the bot API
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, bot_token: bot_token.to_string(), chat_id: chat_id.to_string() }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> PipelineResult<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::transient(format!(
                "notification delivery failed: HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Fallback sink when no delivery destination is configured: messages go to
/// the log at info level. Keeps the cascade running in development setups.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> PipelineResult<()> {
        log::info!("📣 (no sink configured) {}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.send("hello").await.is_ok());
    }
}
