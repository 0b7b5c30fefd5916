// src/notify/mod.rs
//! Outbound collaborators: translation, channel delivery and admin escalation.
//! Each is a trait so the pipeline can be driven by test doubles.

pub mod email;
pub mod log;
pub mod translate;
pub mod webhook;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::config::ChannelsConfig;
use crate::rate_controller::Tier;

pub use email::EmailAdminNotifier;
pub use log::{LogAdminNotifier, LogDeliverer};
pub use translate::{HttpTranslator, NoopTranslator};
pub use webhook::{WebhookAdminNotifier, WebhookDeliverer};

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, rendered: &str, tier: Tier) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn notify_admin(&self, text: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fans an escalation out to every configured admin channel.
/// Succeeds if at least one channel accepted it.
pub struct AdminNotifierMux {
    channels: Vec<Box<dyn AdminNotifier>>,
}

impl AdminNotifierMux {
    pub fn new(channels: Vec<Box<dyn AdminNotifier>>) -> Self {
        Self { channels }
    }

    /// Webhook and/or SMTP from the environment; log-only when neither is set.
    pub fn from_channels(cfg: &ChannelsConfig) -> Result<Self> {
        let mut channels: Vec<Box<dyn AdminNotifier>> = Vec::new();
        if let Some(url) = &cfg.admin_webhook {
            channels.push(Box::new(WebhookAdminNotifier::new(url.clone())));
        }
        if let Some(smtp) = &cfg.smtp {
            channels.push(Box::new(EmailAdminNotifier::from_settings(smtp)?));
        }
        if channels.is_empty() {
            channels.push(Box::new(LogAdminNotifier));
        }
        Ok(Self::new(channels))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl AdminNotifier for AdminNotifierMux {
    async fn notify_admin(&self, text: &str) -> Result<()> {
        let mut delivered = 0usize;
        for ch in &self.channels {
            match ch.notify_admin(text).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(target: "notify", channel = ch.name(), error = %e, "admin channel failed"),
            }
        }
        if delivered == 0 && !self.channels.is_empty() {
            return Err(anyhow!("all {} admin channels failed", self.channels.len()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "admin-mux"
    }
}

/// Outbound channel from env: webhook when configured, log-only otherwise.
pub fn deliverer_from_channels(cfg: &ChannelsConfig) -> Box<dyn Deliverer> {
    match &cfg.delivery_webhook {
        Some(url) => Box::new(WebhookDeliverer::new(url.clone())),
        None => Box::new(LogDeliverer),
    }
}

pub fn translator_from_channels(cfg: &ChannelsConfig) -> Box<dyn Translator> {
    match &cfg.translate_url {
        Some(url) => Box::new(HttpTranslator::new(
            url.clone(),
            cfg.translate_target.clone(),
            cfg.translate_api_key.clone(),
        )),
        None => Box::new(NoopTranslator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Flaky {
        ok: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AdminNotifier for Flaky {
        async fn notify_admin(&self, _text: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok(())
            } else {
                Err(anyhow!("down"))
            }
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn mux_tries_every_channel_and_succeeds_on_any() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = AdminNotifierMux::new(vec![
            Box::new(Flaky { ok: false, calls: calls.clone() }),
            Box::new(Flaky { ok: true, calls: calls.clone() }),
        ]);
        assert!(mux.notify_admin("x").await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mux_fails_when_all_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mux = AdminNotifierMux::new(vec![Box::new(Flaky { ok: false, calls })]);
        assert!(mux.notify_admin("x").await.is_err());
    }

    #[test]
    fn unconfigured_channels_fall_back_to_logging() {
        let cfg = ChannelsConfig::default();
        assert_eq!(deliverer_from_channels(&cfg).name(), "log");
        assert_eq!(translator_from_channels(&cfg).name(), "noop");
        let mux = AdminNotifierMux::from_channels(&cfg).unwrap();
        assert_eq!(mux.len(), 1);
    }
}
