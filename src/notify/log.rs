use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::{AdminNotifier, Deliverer};
use crate::rate_controller::Tier;

/// Stand-in channel when no webhook is configured: the post goes to the log.
pub struct LogDeliverer;

#[async_trait]
impl Deliverer for LogDeliverer {
    async fn deliver(&self, rendered: &str, tier: Tier) -> Result<()> {
        info!(target: "notify", %tier, chars = rendered.chars().count(), "post (log-only channel)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

pub struct LogAdminNotifier;

#[async_trait]
impl AdminNotifier for LogAdminNotifier {
    async fn notify_admin(&self, text: &str) -> Result<()> {
        info!(target: "notify", summary = %text.lines().next().unwrap_or_default(), "admin escalation (log-only)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
