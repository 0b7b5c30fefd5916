// tests/ingest_pipeline.rs
// End-to-end pipeline behavior with in-memory store, manual clock and mock
// collaborators (no network).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use tokio::sync::mpsc;

use crypto_news_relay::clock::ManualClock;
use crypto_news_relay::config::{Limits, Thresholds, Timeouts};
use crypto_news_relay::history::HistoryStore;
use crypto_news_relay::ingest::{self, IngestItem, Outcome, Pipeline};
use crypto_news_relay::notify::{AdminNotifier, Deliverer, Translator};
use crypto_news_relay::rate_controller::{DenyReason, RateController, Tier};
use crypto_news_relay::relevance::{RelevanceEngine, RelevanceHandle};
use crypto_news_relay::scoring::Scorer;
use crypto_news_relay::source_weights::SourceWeightsConfig;

// ---------- mocks ----------

#[derive(Default)]
struct RecordingDeliverer {
    sent: Mutex<Vec<(String, Tier)>>,
    fail: AtomicBool,
    // Simulated channel latency, in seconds.
    delay_secs: AtomicU64,
}

impl RecordingDeliverer {
    fn sent(&self) -> Vec<(String, Tier)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    async fn deliver(&self, rendered: &str, tier: Tier) -> Result<()> {
        let delay = self.delay_secs.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("channel down"));
        }
        self.sent.lock().unwrap().push((rendered.to_string(), tier));
        Ok(())
    }
    fn name(&self) -> &'static str {
        "recording"
    }
}

#[derive(Default)]
struct TaggingTranslator {
    fail: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail {
            return Err(anyhow!("translator unavailable"));
        }
        Ok(format!("[en] {text}"))
    }
    fn name(&self) -> &'static str {
        "tagging"
    }
}

struct ChannelAdmin {
    tx: mpsc::UnboundedSender<String>,
    fail: bool,
}

#[async_trait]
impl AdminNotifier for ChannelAdmin {
    async fn notify_admin(&self, text: &str) -> Result<()> {
        let _ = self.tx.send(text.to_string());
        if self.fail {
            return Err(anyhow!("admin channel down"));
        }
        Ok(())
    }
    fn name(&self) -> &'static str {
        "channel"
    }
}

// ---------- harness ----------

struct Harness {
    pipeline: Arc<Pipeline>,
    clock: Arc<ManualClock>,
    history: Arc<HistoryStore>,
    gate: Arc<RateController>,
    deliverer: Arc<RecordingDeliverer>,
    admin_rx: mpsc::UnboundedReceiver<String>,
}

fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2025, 9, 6, h, m, 0)
        .unwrap()
}

fn build(translator_fails: bool, admin_fails: bool) -> Harness {
    build_with(
        TaggingTranslator {
            fail: translator_fails,
            ..Default::default()
        },
        admin_fails,
    )
}

fn build_with(translator: TaggingTranslator, admin_fails: bool) -> Harness {
    let clock = Arc::new(ManualClock::new(at(10, 0)));
    let history = Arc::new(HistoryStore::open_in_memory().unwrap());
    let gate = Arc::new(RateController::new(
        Limits::default(),
        Thresholds::default(),
        history.clone(),
        clock.clone(),
    ));
    let scorer = Scorer::new(
        RelevanceHandle::new(RelevanceEngine::builtin().unwrap()),
        SourceWeightsConfig::default_seed(),
    );
    let deliverer = Arc::new(RecordingDeliverer::default());
    let (tx, admin_rx) = mpsc::unbounded_channel();
    let pipeline = Arc::new(Pipeline::new(
        scorer,
        history.clone(),
        gate.clone(),
        Arc::new(translator),
        deliverer.clone(),
        Arc::new(ChannelAdmin {
            tx,
            fail: admin_fails,
        }),
        Timeouts::default(),
    ));
    Harness {
        pipeline,
        clock,
        history,
        gate,
        deliverer,
        admin_rx,
    }
}

fn harness() -> Harness {
    build(false, false)
}

const SEC_ETF: &str = "SEC approves Bitcoin ETF with $2B inflow";
const BINANCE_HACK: &str = "Binance halts withdrawals after hack";
const COINBASE_HACK: &str = "Coinbase hacked, BTC withdrawals paused";

// ---------- tests ----------

#[tokio::test]
async fn sec_etf_from_regulator_publishes_critical_and_escalates() {
    let mut h = harness();
    let out = h
        .pipeline
        .process(&IngestItem::new("US SEC", "sec-1", SEC_ETF))
        .await;

    let Outcome::Published {
        id,
        score,
        tier,
        escalated,
    } = out
    else {
        panic!("expected Published, got {out:?}");
    };
    assert_eq!(score, 100);
    assert_eq!(tier, Tier::Critical);
    assert!(escalated);

    let sent = h.deliverer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.starts_with("🚨 BREAKING\n\n[en] SEC approves"));
    assert!(sent[0].0.ends_with("via US SEC"));
    assert_eq!(sent[0].1, Tier::Critical);

    let row = h.history.get(id).unwrap().unwrap();
    assert!(row.published);
    assert_eq!(row.tier.as_deref(), Some("CRITICAL"));
    assert_eq!(row.raw_text, SEC_ETF);
    assert_eq!(h.history.daily_published_count(at(12, 0)).unwrap(), 1);

    let escalation = tokio::time::timeout(Duration::from_secs(2), h.admin_rx.recv())
        .await
        .expect("escalation sent")
        .unwrap();
    assert!(escalation.contains("score 100"));
}

#[tokio::test]
async fn same_pair_is_skipped_even_with_different_text() {
    let h = harness();
    let first = h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "42", BINANCE_HACK))
        .await;
    assert!(first.is_published());

    let again = h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "42", "totally different text about ETH"))
        .await;
    assert_eq!(again, Outcome::AlreadyProcessed);

    let stats = h.history.stats().unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.processed_messages, 1);
    assert_eq!(h.deliverer.sent().len(), 1);
}

#[tokio::test]
async fn airdrop_promo_is_stored_but_never_delivered() {
    let h = harness();
    let out = h
        .pipeline
        .process(&IngestItem::new(
            "Crypto Pump Club",
            "p-1",
            "free airdrop for early adopters",
        ))
        .await;
    let Outcome::Irrelevant { id } = out else {
        panic!("expected Irrelevant, got {out:?}");
    };

    let row = h.history.get(id).unwrap().unwrap();
    assert!(!row.relevant);
    assert_eq!(row.final_score, 0);
    assert!(!row.published);
    assert!(h.deliverer.sent().is_empty());
}

#[tokio::test]
async fn identical_text_from_another_pair_is_not_regated() {
    let h = harness();
    let first = h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "a", BINANCE_HACK))
        .await;
    let Outcome::Published { id, score, tier, .. } = first else {
        panic!("expected Published, got {first:?}");
    };
    assert_eq!(score, 78);
    assert_eq!(tier, Tier::High);

    h.clock.advance_minutes(30);
    let dup = h
        .pipeline
        .process(&IngestItem::new("The Block", "b", BINANCE_HACK))
        .await;
    assert_eq!(dup, Outcome::DuplicateContent { id });
    assert_eq!(h.deliverer.sent().len(), 1);
    assert_eq!(h.history.stats().unwrap().processed_messages, 2);
}

#[tokio::test]
async fn moderately_relevant_item_stays_below_the_publish_gate() {
    let h = harness();
    let out = h
        .pipeline
        .process(&IngestItem::new("Decrypt", "d-1", "Ethereum ETF approved"))
        .await;
    assert!(matches!(out, Outcome::BelowGate { score: 50, .. }), "{out:?}");
    assert!(h.deliverer.sent().is_empty());
}

#[tokio::test]
async fn delivery_failure_leaves_item_stored_only_and_rate_state_untouched() {
    let h = harness();
    h.deliverer.fail.store(true, Ordering::SeqCst);

    let out = h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "f-1", BINANCE_HACK))
        .await;
    let Outcome::DeliveryFailed { id, tier, .. } = out else {
        panic!("expected DeliveryFailed, got {out:?}");
    };
    assert_eq!(tier, Tier::High);
    assert!(!h.history.get(id).unwrap().unwrap().published);

    let snap = h.gate.snapshot();
    assert_eq!(snap.hour_count, 0);
    assert_eq!(snap.in_flight, 0);
    assert!(snap.last_publish_at.is_none());

    // No spacing penalty: the next item goes straight out.
    h.deliverer.fail.store(false, Ordering::SeqCst);
    let next = h
        .pipeline
        .process(&IngestItem::new("Decrypt", "f-2", COINBASE_HACK))
        .await;
    assert!(next.is_published(), "{next:?}");
}

#[tokio::test]
async fn translation_failure_falls_back_to_original_text() {
    let h = build(true, false);
    let out = h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "t-1", BINANCE_HACK))
        .await;
    assert!(out.is_published());
    let sent = h.deliverer.sent();
    assert_eq!(sent[0].0, format!("⚡ {BINANCE_HACK}\n\nvia CoinDesk"));
}

#[tokio::test]
async fn comparison_signs_in_text_do_not_hide_keywords() {
    let h = harness();
    let text = "Bitcoin ETF outflows < $2B while SEC approves > 3 new filings";
    let out = h
        .pipeline
        .process(&IngestItem::new("US SEC", "lt-1", text))
        .await;
    let Outcome::Published { score, tier, .. } = out else {
        panic!("expected Published, got {out:?}");
    };
    assert_eq!(score, 100);
    assert_eq!(tier, Tier::Critical);
    assert!(h.deliverer.sent()[0].0.contains("SEC approves > 3 new filings"));
}

#[tokio::test(start_paused = true)]
async fn delivery_timeout_releases_the_permit() {
    let h = harness();
    h.deliverer.delay_secs.store(60, Ordering::SeqCst);

    let out = h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "slow-1", BINANCE_HACK))
        .await;
    let Outcome::DeliveryFailed { id, tier, .. } = out else {
        panic!("expected DeliveryFailed, got {out:?}");
    };
    assert_eq!(tier, Tier::High);
    assert!(!h.history.get(id).unwrap().unwrap().published);
    assert!(h.deliverer.sent().is_empty());

    let snap = h.gate.snapshot();
    assert_eq!(snap.in_flight, 0);
    assert_eq!(snap.hour_count, 0);
    assert!(snap.last_publish_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn translation_timeout_falls_back_to_original_text() {
    let h = build_with(
        TaggingTranslator {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        },
        false,
    );
    let out = h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "slow-2", BINANCE_HACK))
        .await;
    assert!(out.is_published(), "{out:?}");
    let sent = h.deliverer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, format!("⚡ {BINANCE_HACK}\n\nvia CoinDesk"));
}

#[tokio::test]
async fn failed_escalation_does_not_roll_back_publish() {
    let mut h = build(false, true);
    let out = h
        .pipeline
        .process(&IngestItem::new("US SEC", "e-1", SEC_ETF))
        .await;
    let Outcome::Published { id, escalated, .. } = out else {
        panic!("expected Published, got {out:?}");
    };
    assert!(escalated);

    // The escalation task ran (and failed) on its own.
    tokio::time::timeout(Duration::from_secs(2), h.admin_rx.recv())
        .await
        .expect("escalation attempted")
        .unwrap();
    assert!(h.history.get(id).unwrap().unwrap().published);
    assert_eq!(h.gate.snapshot().hour_count, 1);
}

#[tokio::test]
async fn spacing_holds_back_then_releases_after_interval() {
    let h = harness();
    assert!(h
        .pipeline
        .process(&IngestItem::new("CoinDesk", "s-1", BINANCE_HACK))
        .await
        .is_published());

    let held = h
        .pipeline
        .process(&IngestItem::new("Decrypt", "s-2", COINBASE_HACK))
        .await;
    assert!(
        matches!(
            held,
            Outcome::Gated {
                reason: DenyReason::MinSpacing,
                ..
            }
        ),
        "{held:?}"
    );

    // Held-back items are not retried: the pair is already processed.
    h.clock.advance_minutes(20);
    assert_eq!(
        h.pipeline
            .process(&IngestItem::new("Decrypt", "s-2", COINBASE_HACK))
            .await,
        Outcome::AlreadyProcessed
    );

    let later = h
        .pipeline
        .process(&IngestItem::new(
            "Decrypt",
            "s-3",
            "Coinbase hacked again, BTC withdrawals paused",
        ))
        .await;
    assert!(later.is_published(), "{later:?}");
}

#[tokio::test]
async fn consumer_drains_queue_until_closed() {
    let h = harness();
    let (tx, rx) = mpsc::channel(8);
    let worker = ingest::spawn(h.pipeline.clone(), rx);

    tx.send(IngestItem::new("CoinDesk", "q-1", BINANCE_HACK))
        .await
        .unwrap();
    tx.send(IngestItem::new("CoinDesk", "q-1", BINANCE_HACK))
        .await
        .unwrap();
    tx.send(IngestItem::new("Decrypt", "q-2", "free airdrop, join our vip"))
        .await
        .unwrap();
    drop(tx);
    worker.await.unwrap();

    let stats = h.history.stats().unwrap();
    assert_eq!(stats.processed_messages, 2);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.published, 1);
}
