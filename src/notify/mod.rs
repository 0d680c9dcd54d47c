//! Outbound notifications. The pipeline only needs "send this text";
//! each channel is one `Notifier`, and `NotifierMux` fans out to all of them.

pub mod email;
pub mod slack;
pub mod telegram;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::config::monitor::NotifyConfig;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Dry-run channel: writes the message to the log and always succeeds.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        tracing::info!(target: "notify", channel = "log", %text, "notification (dry run)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Sends to every configured channel; succeeds if at least one channel did.
pub struct NotifierMux {
    channels: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Build channels from config. Dry run replaces every real channel.
    pub fn from_config(cfg: &NotifyConfig) -> Result<Self> {
        if cfg.dry_run {
            return Ok(Self::new(vec![Box::new(LogNotifier)]));
        }

        let mut channels: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(tg) = &cfg.telegram {
            channels.push(Box::new(telegram::TelegramNotifier::new(
                tg.bot_token.clone(),
                tg.chat_id.clone(),
                tg.api_base.clone(),
            )));
        }
        if let Some(url) = &cfg.slack_webhook_url {
            channels.push(Box::new(slack::SlackNotifier::new(url.clone())));
        }
        if let Some(email) = &cfg.email {
            channels.push(Box::new(email::EmailSender::from_config(email)?));
        }
        Ok(Self::new(channels))
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

#[async_trait]
impl Notifier for NotifierMux {
    async fn send(&self, text: &str) -> Result<()> {
        if self.channels.is_empty() {
            return Err(anyhow!("no notification channels configured"));
        }

        let mut delivered = 0usize;
        let mut last_err = None;
        for ch in &self.channels {
            match ch.send(text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(target: "notify", channel = ch.name(), error = %format!("{e:#}"), "channel send failed");
                    last_err = Some(e);
                }
            }
        }

        match (delivered, last_err) {
            (0, Some(e)) => Err(e.context("all notification channels failed")),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mux"
    }
}
