use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::AdminNotifier;
use crate::config::SmtpSettings;

pub struct EmailAdminNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailAdminNotifier {
    pub fn from_settings(s: &SmtpSettings) -> Result<Self> {
        let creds = Credentials::new(s.user.clone(), s.pass.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&s.host)
            .with_context(|| format!("invalid SMTP_HOST `{}`", s.host))?
            .credentials(creds)
            .build();

        let from: Mailbox = s.from.parse().context("invalid NOTIFY_EMAIL_FROM")?;
        let to: Mailbox = s.to.parse().context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl AdminNotifier for EmailAdminNotifier {
    async fn notify_admin(&self, text: &str) -> Result<()> {
        let subject: String = text.lines().next().unwrap_or("relay escalation").chars().take(90).collect();
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("[relay] {subject}"))
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
