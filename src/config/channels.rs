// src/config/channels.rs
//! Outbound collaborator settings. Secrets only come from the environment.

use anyhow::{bail, Result};
use std::env;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelsConfig {
    /// Outbound channel webhook. `None` → deliveries are only logged.
    pub delivery_webhook: Option<String>,
    /// LibreTranslate-compatible endpoint. `None` → text passes through untranslated.
    pub translate_url: Option<String>,
    pub translate_target: String,
    pub translate_api_key: Option<String>,
    pub admin_webhook: Option<String>,
    pub smtp: Option<SmtpSettings>,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Values people paste from README examples and forget to replace.
fn looks_like_placeholder(v: &str) -> bool {
    let l = v.to_ascii_lowercase();
    l.contains("changeme") || l.contains("your_") || l.contains("<") || l == "xxx"
}

impl ChannelsConfig {
    /// Read DELIVERY_WEBHOOK_URL, TRANSLATE_URL, TRANSLATE_TARGET_LANG, TRANSLATE_API_KEY,
    /// ADMIN_WEBHOOK_URL and SMTP_HOST/SMTP_USER/SMTP_PASS/NOTIFY_EMAIL_FROM/NOTIFY_EMAIL_TO.
    ///
    /// Placeholder values and half-configured SMTP are startup errors.
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            delivery_webhook: non_empty("DELIVERY_WEBHOOK_URL"),
            translate_url: non_empty("TRANSLATE_URL"),
            translate_target: non_empty("TRANSLATE_TARGET_LANG").unwrap_or_else(|| "en".into()),
            translate_api_key: non_empty("TRANSLATE_API_KEY"),
            admin_webhook: non_empty("ADMIN_WEBHOOK_URL"),
            smtp: Self::smtp_from_env()?,
        };

        for (name, v) in [
            ("DELIVERY_WEBHOOK_URL", &cfg.delivery_webhook),
            ("TRANSLATE_URL", &cfg.translate_url),
            ("TRANSLATE_API_KEY", &cfg.translate_api_key),
            ("ADMIN_WEBHOOK_URL", &cfg.admin_webhook),
        ] {
            if let Some(v) = v {
                if looks_like_placeholder(v) {
                    bail!("{name} still holds a placeholder value");
                }
            }
        }
        Ok(cfg)
    }

    fn smtp_from_env() -> Result<Option<SmtpSettings>> {
        let keys = [
            "SMTP_HOST",
            "SMTP_USER",
            "SMTP_PASS",
            "NOTIFY_EMAIL_FROM",
            "NOTIFY_EMAIL_TO",
        ];
        let vals: Vec<Option<String>> = keys.iter().map(|k| non_empty(k)).collect();
        if vals.iter().all(Option::is_none) {
            return Ok(None);
        }
        if let Some(missing) = keys.iter().zip(&vals).find(|(_, v)| v.is_none()) {
            bail!("{} missing while other SMTP settings are present", missing.0);
        }
        let mut it = vals.into_iter().flatten();
        let mut next = || it.next().unwrap_or_default();
        Ok(Some(SmtpSettings {
            host: next(),
            user: next(),
            pass: next(),
            from: next(),
            to: next(),
        }))
    }
}
