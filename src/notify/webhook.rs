use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{AdminNotifier, Deliverer};
use crate::rate_controller::Tier;

/// JSON webhook for the outbound channel (bot gateway, relay bridge, ...).
#[derive(Clone)]
pub struct WebhookDeliverer {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookDeliverer {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

#[derive(Serialize)]
struct ChannelPost<'a> {
    text: &'a str,
    tier: Tier,
    /// Only critical posts should ping subscribers.
    silent: bool,
}

#[async_trait]
impl Deliverer for WebhookDeliverer {
    async fn deliver(&self, rendered: &str, tier: Tier) -> Result<()> {
        let payload = ChannelPost {
            text: rendered,
            tier,
            silent: tier != Tier::Critical,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("channel webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("channel webhook request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(target: "notify", attempt, error = %err, "delivery retry");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Plain `{"text": ...}` webhook for admin escalation (Slack-compatible).
pub struct WebhookAdminNotifier {
    url: String,
    client: Client,
}

impl WebhookAdminNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl AdminNotifier for WebhookAdminNotifier {
    async fn notify_admin(&self, text: &str) -> Result<()> {
        use anyhow::Context;
        let body = serde_json::json!({ "text": text });
        self.client
            .post(&self.url)
            .timeout(Duration::from_secs(5))
            .json(&body)
            .send()
            .await
            .context("admin webhook post")?
            .error_for_status()
            .context("admin webhook non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "admin-webhook"
    }
}
