use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;

use super::Notifier;

/// Telegram Bot API `sendMessage`.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String, api_base: String) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("telegram post")?;
        let status = resp.status();
        let parsed: TelegramResponse = resp
            .json()
            .await
            .with_context(|| format!("telegram response body (status {status})"))?;
        if !parsed.ok {
            return Err(anyhow!(
                "telegram rejected message: {}",
                parsed.description.unwrap_or_else(|| status.to_string())
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
