// tests/scoring_properties.rs
// Aggregator properties over the built-in lexicons and source table.

use crypto_news_relay::rate_controller::Tier;
use crypto_news_relay::config::Thresholds;
use crypto_news_relay::relevance::{RelevanceEngine, RelevanceHandle};
use crypto_news_relay::scoring::{aggregate, Scorer};
use crypto_news_relay::source_weights::SourceWeightsConfig;

fn scorer() -> Scorer {
    Scorer::new(
        RelevanceHandle::new(RelevanceEngine::builtin().unwrap()),
        SourceWeightsConfig::default_seed(),
    )
}

const HEADLINES: &[&str] = &[
    "SEC approves Bitcoin ETF with $2B inflow",
    "🚨 BREAKING: Binance halts withdrawals after hack",
    "Officially confirmed: Coinbase lists Solana, SOL +18%",
    "Fed rate cut lifts BTC and ETH to all-time high",
    "free airdrop for early adopters",
    "gm",
    "",
];

#[test]
fn regulator_etf_headline_maps_to_critical() {
    let b = scorer().score("SEC approves Bitcoin ETF with $2B inflow", "US SEC");
    assert!(b.relevant);
    assert_eq!(b.base, 95);
    assert_eq!(b.final_score, 100);
    assert_eq!(Tier::for_score(b.final_score, &Thresholds::default()), Tier::Critical);
}

#[test]
fn alias_resolves_to_the_same_reliability() {
    let s = scorer();
    assert_eq!(s.resolve_source("@SECGov").name, "us sec");
    assert_eq!(s.resolve_source("SEC").multiplier, s.resolve_source("US SEC").multiplier);
    assert_eq!(s.resolve_source("some random blog").multiplier, 1.0);
}

#[test]
fn final_score_always_within_bounds() {
    let s = scorer();
    let engine = RelevanceEngine::builtin().unwrap();
    for text in HEADLINES {
        for m in [0.0_f32, 0.3, 1.0, 1.4, 5.0, 1e9] {
            let b = aggregate(engine.score(text), text, &Default::default(), m);
            assert!(b.final_score <= 100, "{text} × {m}");
        }
        for src in ["US SEC", "Crypto Pump Club", "unknown"] {
            assert!(s.score(text, src).final_score <= 100);
        }
    }
}

#[test]
fn final_score_is_monotone_in_multiplier() {
    let engine = RelevanceEngine::builtin().unwrap();
    for text in HEADLINES {
        let mut prev = 0u8;
        for step in 0..=40 {
            let m = step as f32 * 0.05;
            let b = aggregate(engine.score(text), text, &Default::default(), m);
            assert!(b.final_score >= prev, "{text}: {} < {prev} at ×{m}", b.final_score);
            prev = b.final_score;
        }
    }
}

#[test]
fn irrelevant_items_score_zero_whatever_the_source() {
    let s = scorer();
    for src in ["US SEC", "PeckShield", "Crypto Pump Club"] {
        let b = s.score("free airdrop for early adopters 🚨 BREAKING official", src);
        assert!(!b.relevant);
        assert_eq!(b.final_score, 0);
        assert_eq!(b.bonuses(), 0);
    }
}

#[test]
fn contextual_bonuses_stack_before_the_multiplier() {
    let b = scorer().score("🚨 BREAKING: Binance halts withdrawals after hack", "Decrypt");
    // Binance 15 + halts withdrawals 25 + hack 25
    assert_eq!(b.base, 65);
    assert_eq!(b.urgency_bonus, 10);
    assert_eq!(b.visual_alert_bonus, 5);
    assert_eq!(b.official_bonus, 0);
    assert_eq!(b.final_score, 80);
}
