use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Translator;

/// LibreTranslate-compatible client (`POST {q, source, target}` → `{translatedText}`).
pub struct HttpTranslator {
    url: String,
    target: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpTranslator {
    pub fn new(url: String, target: String, api_key: Option<String>) -> Self {
        Self {
            url,
            target,
            api_key,
            client: Client::new(),
        }
    }
}

#[derive(Serialize)]
struct TranslateReq<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResp {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        let req = TranslateReq {
            q: text,
            source: "auto",
            target: &self.target,
            format: "text",
            api_key: self.api_key.as_deref(),
        };
        let resp: TranslateResp = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(&req)
            .send()
            .await
            .context("translate request")?
            .error_for_status()
            .context("translate non-2xx")?
            .json()
            .await
            .context("translate response body")?;

        let out = resp.translated_text.trim();
        if out.is_empty() {
            return Err(anyhow!("translator returned empty text"));
        }
        Ok(out.to_string())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Pass-through used when no translation endpoint is configured.
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
