//! Score aggregation: classifier base score + contextual bonuses, then the
//! source reliability multiplier, clamped to an integer in [0,100].
//!
//! Order matters: bonuses are added *before* the multiplier, so a reliable
//! source amplifies them too.

use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::relevance::{BonusCfg, Relevance, RelevanceHandle};
use crate::source_weights::{Source, SourceWeightsConfig};

pub const MAX_SCORE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub relevant: bool,
    pub base: u32,
    pub urgency_bonus: u32,
    pub official_bonus: u32,
    pub visual_alert_bonus: u32,
    pub multiplier: f32,
    pub final_score: u8,
    #[serde(skip)]
    pub relevance: Relevance,
}

impl ScoreBreakdown {
    pub fn bonuses(&self) -> u32 {
        self.urgency_bonus + self.official_bonus + self.visual_alert_bonus
    }
}

fn contains_any(lower: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .map(|n| n.trim().to_lowercase())
        .any(|n| !n.is_empty() && lower.contains(&n))
}

/// Combine a classifier result with the bonus tables and a source multiplier.
/// Not-relevant input yields 0 regardless of bonuses or multiplier.
pub fn aggregate(rel: Relevance, text: &str, bonuses: &BonusCfg, multiplier: f32) -> ScoreBreakdown {
    if !rel.relevant {
        return ScoreBreakdown {
            relevant: false,
            base: rel.score,
            urgency_bonus: 0,
            official_bonus: 0,
            visual_alert_bonus: 0,
            multiplier,
            final_score: 0,
            relevance: rel,
        };
    }

    let lower = text.to_lowercase();
    let pick = |hit: bool, amount: u32| if hit { amount } else { 0 };
    let urgency_bonus = pick(contains_any(&lower, &bonuses.urgency_words), bonuses.urgency);
    let official_bonus = pick(contains_any(&lower, &bonuses.official_words), bonuses.official);
    let visual_alert_bonus = pick(
        contains_any(&lower, &bonuses.visual_alert_symbols),
        bonuses.visual_alert,
    );

    let sum = rel.score + urgency_bonus + official_bonus + visual_alert_bonus;
    let final_score = clamp_score(sum as f64 * multiplier as f64);

    ScoreBreakdown {
        relevant: true,
        base: rel.score,
        urgency_bonus,
        official_bonus,
        visual_alert_bonus,
        multiplier,
        final_score,
        relevance: rel,
    }
}

/// Truncate toward zero and clamp into [0,100]; NaN maps to 0.
pub fn clamp_score(raw: f64) -> u8 {
    if !raw.is_finite() {
        return if raw == f64::INFINITY { MAX_SCORE } else { 0 };
    }
    raw.clamp(0.0, MAX_SCORE as f64) as u8
}

/// Classifier + source table, shared by the pipeline and the operator API.
#[derive(Clone)]
pub struct Scorer {
    relevance: RelevanceHandle,
    sources: Arc<RwLock<SourceWeightsConfig>>,
}

impl Scorer {
    pub fn new(relevance: RelevanceHandle, sources: SourceWeightsConfig) -> Self {
        Self {
            relevance,
            sources: Arc::new(RwLock::new(sources)),
        }
    }

    pub fn relevance(&self) -> &RelevanceHandle {
        &self.relevance
    }

    pub fn resolve_source(&self, source: &str) -> Source {
        match self.sources.read() {
            Ok(g) => g.resolve(source),
            Err(_) => SourceWeightsConfig::default_seed().resolve(source),
        }
    }

    pub fn replace_sources(&self, cfg: SourceWeightsConfig) {
        if let Ok(mut g) = self.sources.write() {
            *g = cfg;
        }
    }

    pub fn score(&self, text: &str, source: &str) -> ScoreBreakdown {
        let rel = self.relevance.score(text);
        let bonuses = self
            .relevance
            .with_engine(|e| e.cfg.bonuses.clone())
            .unwrap_or_default();
        let multiplier = self.resolve_source(source).multiplier;
        aggregate(rel, text, &bonuses, multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bonuses() -> BonusCfg {
        BonusCfg {
            urgency: 10,
            official: 10,
            visual_alert: 5,
            urgency_words: vec!["breaking".into()],
            official_words: vec!["official".into()],
            visual_alert_symbols: vec!["🚨".into()],
        }
    }

    fn relevant(score: u32) -> Relevance {
        Relevance {
            relevant: true,
            score,
            ..Default::default()
        }
    }

    #[test]
    fn irrelevant_is_zero_even_with_bonuses() {
        let rel = Relevance {
            relevant: false,
            score: 45,
            ..Default::default()
        };
        let b = aggregate(rel, "🚨 BREAKING official", &bonuses(), 5.0);
        assert_eq!(b.final_score, 0);
        assert_eq!(b.bonuses(), 0);
    }

    #[test]
    fn multiplier_applies_to_bonuses_too() {
        // (50 + 10 + 10 + 5) * 1.2 = 90; multiplying only the base would give 85
        let b = aggregate(relevant(50), "🚨 Breaking: official note", &bonuses(), 1.2);
        assert_eq!(b.bonuses(), 25);
        assert_eq!(b.final_score, 90);
    }

    #[test]
    fn clamps_into_range() {
        assert_eq!(aggregate(relevant(95), "x", &bonuses(), 1.4).final_score, 100);
        assert_eq!(aggregate(relevant(60), "x", &bonuses(), 0.0).final_score, 0);
        assert_eq!(clamp_score(f64::NAN), 0);
        assert_eq!(clamp_score(-3.0), 0);
        assert_eq!(clamp_score(64.9), 64);
    }

    #[test]
    fn monotonic_in_multiplier() {
        let mut last = 0u8;
        for step in 0..40 {
            let m = step as f32 * 0.05;
            let s = aggregate(relevant(55), "breaking", &bonuses(), m).final_score;
            assert!(s >= last, "score dropped at multiplier {m}");
            last = s;
        }
    }
}
