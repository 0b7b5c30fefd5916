//! # Source Weights
//!
//! Maps feed sources (e.g. "CoinDesk", "Whale Alert", "@WatcherGuru") to a
//! reliability multiplier and a specialization tag.
//!
//! - Loads from JSON config (sources + aliases).
//! - Case-insensitive lookup with normalization of punctuation, dashes, etc.
//! - Aliases can map alternative spellings/handles to canonical sources.
//! - Fallback order: aliases → exact match → substring match → default.
//! - Multipliers are clamped to `>= 0.0`; values above 1.0 amplify a source.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};
use tracing::warn;

pub const DEFAULT_SOURCE_WEIGHTS_PATH: &str = "config/source_weights.json";
pub const ENV_SOURCE_WEIGHTS_PATH: &str = "SOURCE_WEIGHTS_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub multiplier: f32,
    #[serde(default)]
    pub specialization: Option<String>,
}

/// A resolved source: canonical name plus its profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub name: String,
    pub multiplier: f32,
    pub specialization: Option<String>,
}

/// Configuration for source reliability, loaded from JSON or defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceWeightsConfig {
    /// Multiplier used when no source matches.
    #[serde(default = "default_default_multiplier")]
    pub default_multiplier: f32,
    /// Profiles keyed by canonical (normalized) source name.
    #[serde(default)]
    pub sources: HashMap<String, SourceProfile>,
    /// Aliases mapping non-canonical names → canonical names.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_multiplier() -> f32 {
    1.0
}

impl SourceWeightsConfig {
    /// Load configuration from a JSON file.
    /// Falls back to `default_seed()` when the file is missing or malformed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(target: "config", path = %path.display(), error = %e, "source weights unavailable; using built-in seed");
                Self::default_seed()
            }
        }
    }

    /// Strict variant: surfaces IO and parse errors.
    pub fn try_load(path: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading source weights from {}", path.display()))?;
        Self::from_json_str(&s)
    }

    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let raw: SourceWeightsConfig = serde_json::from_str(s).context("parsing source weights")?;
        // Keys are matched after normalization, so store them that way.
        let sources = raw
            .sources
            .into_iter()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
        let aliases = raw
            .aliases
            .into_iter()
            .map(|(k, v)| (normalize(&k), normalize(&v)))
            .collect();
        Ok(Self {
            default_multiplier: raw.default_multiplier,
            sources,
            aliases,
        })
    }

    /// Resolve a source name to its profile.
    ///
    /// Steps:
    /// 1. Alias lookup (normalized) → canonical → profile.
    /// 2. Exact match.
    /// 3. Substring fallback (e.g. "CoinDesk Markets" → "coindesk"); longest key wins.
    /// 4. Default multiplier, no specialization.
    pub fn resolve(&self, source: &str) -> Source {
        let s = normalize(source);

        // 1) Alias resolution.
        if let Some(canon) = self.aliases.get(&s) {
            if let Some(p) = self.sources.get(canon) {
                return make_source(canon, p);
            }
        }

        // 2) Exact match.
        if let Some(p) = self.sources.get(&s) {
            return make_source(&s, p);
        }

        // 3) Substring fallback: longest key, ties to the lexicographically smallest.
        if let Some((k, p)) = self
            .sources
            .iter()
            .filter(|(k, _)| !k.is_empty() && s.contains(k.as_str()))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
        {
            return make_source(k, p);
        }

        // 4) Default.
        Source {
            name: s,
            multiplier: clamp_non_negative(self.default_multiplier),
            specialization: None,
        }
    }

    pub fn multiplier_for(&self, source: &str) -> f32 {
        self.resolve(source).multiplier
    }

    /// Built-in seed with common crypto news sources.
    /// Used as fallback if no config is found.
    pub fn default_seed() -> Self {
        let mut sources = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, m, spec) in [
            ("coindesk", 1.2, "markets"),
            ("the block", 1.2, "markets"),
            ("cointelegraph", 1.0, "general"),
            ("decrypt", 1.0, "general"),
            ("bloomberg crypto", 1.3, "markets"),
            ("reuters", 1.3, "macro"),
            ("watcher guru", 0.9, "breaking"),
            ("whale alert", 1.1, "onchain"),
            ("lookonchain", 1.0, "onchain"),
            ("peckshield", 1.4, "security"),
            ("certik alert", 1.3, "security"),
            ("us sec", 1.4, "regulation"),
            ("binance announcements", 1.3, "exchange"),
            ("coinbase", 1.2, "exchange"),
        ] {
            sources.insert(
                k.to_string(),
                SourceProfile {
                    multiplier: m,
                    specialization: Some(spec.to_string()),
                },
            );
        }

        for (a, c) in [
            ("@coindesk", "coindesk"),
            ("coindesk com", "coindesk"),
            ("theblock", "the block"),
            ("@theblock", "the block"),
            ("@cointelegraph", "cointelegraph"),
            ("@watcherguru", "watcher guru"),
            ("@whale alert", "whale alert"),
            ("whalealert", "whale alert"),
            ("@lookonchain", "lookonchain"),
            ("@peckshieldalert", "peckshield"),
            ("@certikalert", "certik alert"),
            ("sec", "us sec"),
            ("sec gov", "us sec"),
            ("@secgov", "us sec"),
            ("@binance", "binance announcements"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_multiplier: 1.0,
            sources,
            aliases,
        }
    }
}

fn make_source(name: &str, p: &SourceProfile) -> Source {
    Source {
        name: name.to_string(),
        multiplier: clamp_non_negative(p.multiplier),
        specialization: p.specialization.clone(),
    }
}

/// Normalize input string: lowercase, replace punctuation/dashes with spaces,
/// collapse multiple spaces into one.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();

    // Replace common separators with spaces.
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }

    // Replace disruptive punctuation/whitespace with spaces.
    out = out.replace(['\n', '\r', '\t', '.', ',', '‚', '’', '\''], " ");

    // Collapse multiple spaces.
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_non_negative(x: f32) -> f32 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        0.0
    }
}
