// src/relevance.rs
//! Relevance classifier: exclusion phrases, weighted lexicons, quantitative bonus,
//! config types, regex compilation and a hot-reloadable handle.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

// --- env defaults & names ---
pub const DEFAULT_RELEVANCE_CONFIG_PATH: &str = "config/relevance.toml";
pub const DEFAULT_RELEVANCE_THRESHOLD: u32 = 50;

pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";

/// Lexicon tables shipped with the binary; also the fallback when no file is present.
pub const BUILTIN_RELEVANCE_TOML: &str = include_str!("../config/relevance.toml");

static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[$€£]\s?\d[\d,]*(?:\.\d+)?|\b\d[\d,]*(?:\.\d+)?\s?(?:usd|usdt|usdc|dollars)\b")
        .expect("currency regex")
});

// Thousands-grouped figures ("1,200%") first, then plain or decimal-comma ones ("12,5%").
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?)\s?%").expect("percent regex")
});

/// "1,200" → 1200, "1,200.5" → 1200.5, "12,5" → 12.5.
fn parse_percent(raw: &str) -> Option<f64> {
    let grouped = raw.contains(',')
        && raw
            .split(',')
            .skip(1)
            .all(|g| g.split('.').next().is_some_and(|d| d.len() == 3));
    let cleaned = if grouped {
        raw.replace(',', "")
    } else {
        raw.replace(',', ".")
    };
    cleaned.parse().ok()
}

// Dev logging gate: RELEVANCE_DEV_LOG=1 AND dev env (debug or RELAY_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("RELEVANCE_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    is_dev_env()
}

pub(crate) fn is_dev_env() -> bool {
    matches!(
        std::env::var("RELAY_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

/// Short, non-reversible id for a text. Used wherever logs need to refer to an item.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn dev_log_relevance(event: &str, text: &str, rel: &Relevance, threshold: u32) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(text);
    let matched_short = truncate_vec(&rel.matched, 5);
    let reasons_short = truncate_vec(&rel.reasons, 5);
    // Never log raw text. Only hashed id + short lists.
    info!(
        target: "relevance",
        %id, score = rel.score, %threshold, event,
        matched = ?matched_short,
        reasons = ?reasons_short
    );
}

pub(crate) fn truncate_vec<T: ToString>(v: &[T], max: usize) -> Vec<String> {
    v.iter().take(max).map(|x| x.to_string()).collect()
}

/// Result of relevance evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relevance {
    pub relevant: bool,
    /// Base score before contextual bonuses and source multiplier.
    pub score: u32,
    pub matched: Vec<String>,
    pub reasons: Vec<String>,
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceRoot {
    #[serde(default)]
    pub relevance: RelevanceSection,
    #[serde(default)]
    pub exclusions: ExclusionCfg,
    #[serde(default)]
    pub quantitative: QuantitativeCfg,
    #[serde(default)]
    pub bonuses: BonusCfg,
    #[serde(default)]
    pub lexicon: Vec<LexiconEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceSection {
    pub threshold: u32,
    /// Informational only; bump when lexicon tables change.
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for RelevanceSection {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RELEVANCE_THRESHOLD,
            version: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExclusionCfg {
    #[serde(default)]
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuantitativeCfg {
    pub currency_bonus: u32,
    /// Bonus per percentage figure >= 10%.
    pub percent_major_bonus: u32,
    /// Bonus per percentage figure >= 5% (and < 10%).
    pub percent_minor_bonus: u32,
    pub cap: u32,
}

impl Default for QuantitativeCfg {
    fn default() -> Self {
        Self {
            currency_bonus: 15,
            percent_major_bonus: 10,
            percent_minor_bonus: 5,
            cap: 25,
        }
    }
}

/// Contextual bonuses applied by the score aggregator.
#[derive(Debug, Clone, Deserialize)]
pub struct BonusCfg {
    pub urgency: u32,
    pub official: u32,
    pub visual_alert: u32,
    #[serde(default)]
    pub urgency_words: Vec<String>,
    #[serde(default)]
    pub official_words: Vec<String>,
    #[serde(default)]
    pub visual_alert_symbols: Vec<String>,
}

impl Default for BonusCfg {
    fn default() -> Self {
        Self {
            urgency: 10,
            official: 10,
            visual_alert: 5,
            urgency_words: Vec::new(),
            official_words: Vec::new(),
            visual_alert_symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lexicon {
    Impact,
    Entity,
    Asset,
}

impl Lexicon {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lexicon::Impact => "impact",
            Lexicon::Entity => "entity",
            Lexicon::Asset => "asset",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LexiconEntry {
    pub lexicon: Lexicon,
    pub pattern: String,
    pub weight: u32,
}

/* ----------------------------
Compiled engine structures
---------------------------- */

#[derive(Debug)]
struct CompiledEntry {
    cfg: LexiconEntry,
    re: Regex,
}

/// Holds compiled lexicons and lowercased exclusion phrases.
#[derive(Debug)]
pub struct RelevanceEngine {
    pub cfg: RelevanceRoot,
    entries: Vec<CompiledEntry>,
    exclusions: Vec<String>,
}

/// Phrase → case-insensitive regex. Word boundaries are only added next to
/// word characters so that `$BTC` or `🚨` style patterns still match.
fn phrase_regex(phrase: &str) -> Result<Regex, regex::Error> {
    let trimmed = phrase.trim();
    let starts_word = trimmed.chars().next().is_some_and(|c| c.is_alphanumeric());
    let ends_word = trimmed.chars().last().is_some_and(|c| c.is_alphanumeric());
    let mut pat = String::from("(?i)");
    if starts_word {
        pat.push_str(r"\b");
    }
    pat.push_str(&regex::escape(trimmed));
    if ends_word {
        pat.push_str(r"\b");
    }
    Regex::new(&pat)
}

impl RelevanceEngine {
    /// Load from a TOML file. Uses RELEVANCE_CONFIG_PATH or defaults to "config/relevance.toml";
    /// falls back to the built-in tables when the default path does not exist.
    pub fn from_toml() -> anyhow::Result<Self> {
        let explicit = std::env::var(ENV_RELEVANCE_CONFIG_PATH).ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RELEVANCE_CONFIG_PATH));

        if explicit.is_none() && !path.exists() {
            info!(target: "relevance", "no relevance config on disk; using built-in lexicons");
            return Self::builtin();
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read relevance config at {}: {}",
                path.display(),
                e
            )
        })?;
        Self::from_toml_str(&content)
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_RELEVANCE_TOML)
    }

    /// Load from a TOML string
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: RelevanceRoot = toml::from_str(toml_str)?;

        let entries = cfg
            .lexicon
            .iter()
            .cloned()
            .filter(|e| !e.pattern.trim().is_empty())
            .map(|e| {
                let re = phrase_regex(&e.pattern).map_err(|err| {
                    anyhow::anyhow!(
                        "lexicon `{}:{}` regex error: {}",
                        e.lexicon.as_str(),
                        e.pattern,
                        err
                    )
                })?;
                Ok(CompiledEntry { cfg: e, re })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let exclusions = cfg
            .exclusions
            .phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            cfg,
            entries,
            exclusions,
        })
    }

    pub fn threshold(&self) -> u32 {
        self.cfg.relevance.threshold
    }

    /// First exclusion phrase contained in `text` (case-insensitive substring).
    pub fn find_exclusion(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.exclusions
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(|p| p.as_str())
    }

    /// Sum of lexicon weights. Each entry counts at most once; the same concept
    /// listed in several lexicons contributes from each of them.
    fn lexicon_sum(&self, text: &str, matched: &mut Vec<String>) -> u32 {
        let mut sum = 0u32;
        for e in &self.entries {
            if e.re.is_match(text) {
                sum = sum.saturating_add(e.cfg.weight);
                matched.push(format!("{}:{}", e.cfg.lexicon.as_str(), e.cfg.pattern));
            }
        }
        sum
    }

    /// Currency amounts and percentage figures, capped.
    pub fn quantitative_bonus(&self, text: &str) -> u32 {
        let q = &self.cfg.quantitative;
        let mut bonus = 0u32;
        if CURRENCY_RE.is_match(text) {
            bonus += q.currency_bonus;
        }
        for caps in PERCENT_RE.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            let Some(pct) = parse_percent(m.as_str()) else {
                continue;
            };
            if pct >= 10.0 {
                bonus = bonus.saturating_add(q.percent_major_bonus);
            } else if pct >= 5.0 {
                bonus = bonus.saturating_add(q.percent_minor_bonus);
            }
        }
        bonus.min(q.cap)
    }

    /// Exclusions → lexicons → quantitative bonus → threshold.
    pub fn score(&self, text: &str) -> Relevance {
        let mut rel = Relevance::default();
        let threshold = self.threshold();

        if text.trim().is_empty() {
            rel.reasons.push("empty".into());
            return rel;
        }

        if let Some(phrase) = self.find_exclusion(text) {
            rel.reasons.push(format!("excluded:{phrase}"));
            dev_log_relevance("excluded", text, &rel, threshold);
            return rel;
        }

        let mut matched = Vec::new();
        let lex = self.lexicon_sum(text, &mut matched);
        let quant = self.quantitative_bonus(text);
        let total = lex.saturating_add(quant);

        rel.matched = matched;
        rel.score = total;
        if quant > 0 {
            rel.reasons.push(format!("quant:+{quant}"));
        }
        rel.relevant = total >= threshold;
        if rel.relevant {
            rel.reasons.push(format!("threshold_ok:{threshold}"));
            dev_log_relevance("passed", text, &rel, threshold);
        } else {
            rel.reasons.push(format!("threshold_fail:{threshold}"));
            dev_log_relevance("below_threshold", text, &rel, threshold);
        }
        rel
    }
}

/* ----------------------------
Thread-safe handle + hot reload
---------------------------- */

/// A threadsafe handle that can hot-reload the underlying engine in dev/local.
/// - Enable by setting RELEVANCE_HOT_RELOAD=1
/// - Dev-gated: active only if cfg!(debug_assertions) OR RELAY_ENV is "local"/"development".
#[derive(Clone)]
pub struct RelevanceHandle {
    inner: Arc<RwLock<RelevanceEngine>>,
}

impl RelevanceHandle {
    pub fn new(engine: RelevanceEngine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    pub fn score(&self, text: &str) -> Relevance {
        match self.inner.read() {
            Ok(eng) => eng.score(text),
            Err(_) => Relevance::default(),
        }
    }

    /// Run `f` against the current engine (bonus tables live in its config).
    pub fn with_engine<R>(&self, f: impl FnOnce(&RelevanceEngine) -> R) -> Option<R> {
        self.inner.read().ok().map(|g| f(&g))
    }

    pub fn replace(&self, engine: RelevanceEngine) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = engine;
        }
    }
}

/// Returns true if we should enable hot reload (dev/local only).
fn hot_reload_enabled() -> bool {
    let want = std::env::var("RELEVANCE_HOT_RELOAD")
        .ok()
        .map(|v| v == "1")
        .unwrap_or(false);
    if !want {
        return false;
    }
    cfg!(debug_assertions) || is_dev_env()
}

/// Start a simple polling watcher on `path` to hot-reload into `handle`.
/// Polls mtime every 2s.
pub fn start_hot_reload_thread(handle: RelevanceHandle, path: PathBuf) {
    if !hot_reload_enabled() {
        return;
    }

    thread::spawn(move || {
        let poll = Duration::from_secs(2);
        let mut last_mtime: Option<SystemTime> = None;

        loop {
            if let Ok(mtime) = fs::metadata(&path).and_then(|m| m.modified()) {
                let changed = match last_mtime {
                    None => {
                        last_mtime = Some(mtime);
                        false
                    }
                    Some(prev) => mtime > prev,
                };
                if changed {
                    match fs::read_to_string(&path)
                        .map_err(anyhow::Error::from)
                        .and_then(|c| RelevanceEngine::from_toml_str(&c))
                    {
                        Ok(engine) => {
                            handle.replace(engine);
                            info!(target: "relevance", path = %path.display(), "lexicons reloaded");
                        }
                        Err(e) => {
                            warn!(target: "relevance", error = %e, "lexicon reload failed; keeping previous tables");
                        }
                    }
                    last_mtime = Some(mtime);
                }
            }
            thread::sleep(poll);
        }
    });
}

/* ----------------------------
Tests
---------------------------- */
