use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Notifier;
use crate::config::monitor::EmailConfig;

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSender {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        let creds = Credentials::new(cfg.smtp_user.clone(), cfg.smtp_pass.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .with_context(|| format!("invalid smtp_host {:?}", cfg.smtp_host))?
            .credentials(creds)
            .build();

        let from = cfg
            .from
            .parse()
            .with_context(|| format!("invalid email from {:?}", cfg.from))?;
        let to = cfg
            .to
            .parse()
            .with_context(|| format!("invalid email to {:?}", cfg.to))?;

        Ok(Self { mailer, from, to })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    async fn send(&self, text: &str) -> Result<()> {
        // First line doubles as the subject.
        let subject = text.lines().next().unwrap_or("Solar risk monitor").trim();

        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(text.to_string())
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
