// src/ingest/mod.rs
//! Per-item orchestration: idempotency guard → classify/score → store →
//! gate → render → deliver → mark published → best-effort escalation.

pub mod types;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Timeouts;
use crate::history::{HistoryStore, NewCandidate, RecordOutcome};
use crate::notify::{AdminNotifier, Deliverer, Translator};
use crate::rate_controller::{RateController, Tier};
use crate::relevance::anon_hash;
use crate::render::format_post;
use crate::scoring::Scorer;

pub use types::{IngestItem, Outcome};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_items_total", "Items received by the pipeline.");
        describe_counter!(
            "relay_skipped_total",
            "Items skipped because (source, external id) was already processed."
        );
        describe_counter!(
            "relay_irrelevant_total",
            "Items stored with relevance=false."
        );
        describe_counter!(
            "relay_gate_denied_total",
            "Relevant items held back by the publication gate, by reason."
        );
        describe_counter!("relay_published_total", "Items delivered, by tier.");
        describe_counter!(
            "relay_delivery_failures_total",
            "Accepted items whose delivery failed or timed out."
        );
        describe_counter!("relay_escalations_total", "Admin escalations attempted.");
        describe_histogram!("relay_final_score", "Final score of scored items.");
    });
}

/// Text cleanup before classification: decode entities, strip tags,
/// normalize typographic quotes, collapse whitespace, cap length.
/// The raw text (not this) is what gets hashed and stored.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (real tag syntax only; bare `<`/`>` in prose stay)
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| {
        regex::Regex::new(r"</?[A-Za-z][A-Za-z0-9]*(?:\s[^<>]*)?/?>").expect("tag regex")
    });
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 4000 chars
    if out.chars().count() > 4000 {
        out = out.chars().take(4000).collect();
    }

    out
}

/// The ingest pipeline. Meant to be driven by a single consumer (see [`spawn`]).
pub struct Pipeline {
    scorer: Scorer,
    history: Arc<HistoryStore>,
    gate: Arc<RateController>,
    translator: Arc<dyn Translator>,
    deliverer: Arc<dyn Deliverer>,
    admin: Arc<dyn AdminNotifier>,
    timeouts: Timeouts,
}

impl Pipeline {
    pub fn new(
        scorer: Scorer,
        history: Arc<HistoryStore>,
        gate: Arc<RateController>,
        translator: Arc<dyn Translator>,
        deliverer: Arc<dyn Deliverer>,
        admin: Arc<dyn AdminNotifier>,
        timeouts: Timeouts,
    ) -> Self {
        ensure_metrics_described();
        Self {
            scorer,
            history,
            gate,
            translator,
            deliverer,
            admin,
            timeouts,
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn gate(&self) -> &Arc<RateController> {
        &self.gate
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub async fn process(&self, item: &IngestItem) -> Outcome {
        counter!("relay_items_total").increment(1);
        let item_id = anon_hash(&item.text);

        match self
            .history
            .is_message_processed(&item.source, &item.external_id)
        {
            Ok(true) => {
                counter!("relay_skipped_total").increment(1);
                debug!(target: "pipeline", source = %item.source, external_id = %item.external_id, "already processed");
                return Outcome::AlreadyProcessed;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(target: "pipeline", error = %e, "processed-message lookup failed; continuing");
            }
        }

        let normalized = normalize_text(&item.text);
        let breakdown = self.scorer.score(&normalized, &item.source);
        let score = breakdown.final_score;
        histogram!("relay_final_score").record(f64::from(score));

        let now = self.gate.clock().now().with_timezone(&Utc);
        let recorded = self.history.record_candidate(&NewCandidate {
            source: &item.source,
            external_id: Some(&item.external_id),
            raw_text: &item.text,
            final_score: score,
            relevant: breakdown.relevant,
            collected_at: now,
        });

        // Marked regardless of the store outcome so a broken store cannot cause
        // endless reprocessing of the same upstream event.
        if let Err(e) = self
            .history
            .mark_message_processed(&item.source, &item.external_id)
        {
            warn!(target: "pipeline", error = %e, "marking message processed failed");
        }

        let id = match recorded {
            Ok(RecordOutcome::Inserted(id)) => id,
            Ok(RecordOutcome::AlreadyExists(id)) => {
                debug!(target: "pipeline", %item_id, id, "duplicate content");
                return Outcome::DuplicateContent { id };
            }
            Err(e) => {
                error!(target: "pipeline", %item_id, error = %e, "storing candidate failed");
                return Outcome::StoreFailed { score };
            }
        };

        info!(
            target: "pipeline",
            %item_id, id, source = %item.source,
            relevant = breakdown.relevant,
            base = breakdown.base,
            bonuses = breakdown.bonuses(),
            multiplier = breakdown.multiplier,
            score,
            "scored"
        );

        if !breakdown.relevant {
            counter!("relay_irrelevant_total").increment(1);
            return Outcome::Irrelevant { id };
        }

        let thresholds = self.gate.thresholds().clone();
        if score < thresholds.publish {
            return Outcome::BelowGate { id, score };
        }

        let permit = match self.gate.try_acquire(score) {
            Ok(p) => p,
            Err(reason) => {
                counter!("relay_gate_denied_total", "reason" => reason.as_str()).increment(1);
                info!(target: "gate", %item_id, id, score, reason = reason.as_str(), "held back");
                return Outcome::Gated { id, score, reason };
            }
        };
        let tier = permit.tier;

        // Network-bound work happens outside the gate lock; the permit holds the slot.
        let rendered = self.render(&normalized, &item.source, tier).await;
        let delivered = tokio::time::timeout(
            Duration::from_secs(self.timeouts.deliver_secs),
            self.deliverer.deliver(&rendered, tier),
        )
        .await;

        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                permit.release();
                counter!("relay_delivery_failures_total").increment(1);
                warn!(target: "pipeline", %item_id, id, error = %e, "delivery failed; stored only");
                return Outcome::DeliveryFailed { id, score, tier };
            }
            Err(_) => {
                permit.release();
                counter!("relay_delivery_failures_total").increment(1);
                warn!(target: "pipeline", %item_id, id, secs = self.timeouts.deliver_secs, "delivery timed out; stored only");
                return Outcome::DeliveryFailed { id, score, tier };
            }
        }

        let published_at = self.gate.clock().now().with_timezone(&Utc);
        match self.history.mark_published(id, &rendered, tier, published_at) {
            Ok(true) => {}
            Ok(false) => warn!(target: "history", id, "candidate was already marked published"),
            Err(e) => error!(target: "history", id, error = %e, "delivered but marking published failed"),
        }
        let overridden = permit.overridden;
        permit.commit();
        counter!("relay_published_total", "tier" => tier.as_str()).increment(1);
        info!(target: "pipeline", %item_id, id, score, %tier, overridden, "published");

        let escalated = score >= thresholds.admin_notify;
        if escalated {
            self.escalate(format!(
                "[{tier}] score {score} from {}\n\n{rendered}",
                item.source
            ));
        }

        Outcome::Published {
            id,
            score,
            tier,
            escalated,
        }
    }

    /// Translate (falling back to the input) and format for the channel.
    async fn render(&self, text: &str, source: &str, tier: Tier) -> String {
        let translated = match tokio::time::timeout(
            Duration::from_secs(self.timeouts.translate_secs),
            self.translator.translate(text),
        )
        .await
        {
            Ok(Ok(t)) => t,
            Ok(Err(e)) => {
                warn!(target: "pipeline", translator = self.translator.name(), error = %e, "translation failed; using original text");
                text.to_string()
            }
            Err(_) => {
                warn!(target: "pipeline", translator = self.translator.name(), "translation timed out; using original text");
                text.to_string()
            }
        };
        format_post(tier, &translated, source)
    }

    /// Fire-and-forget admin escalation with its own error boundary.
    fn escalate(&self, text: String) {
        counter!("relay_escalations_total").increment(1);
        let admin = Arc::clone(&self.admin);
        let limit = Duration::from_secs(self.timeouts.escalate_secs);
        tokio::spawn(async move {
            match tokio::time::timeout(limit, admin.notify_admin(&text)).await {
                Ok(Ok(())) => debug!(target: "notify", "admin escalation sent"),
                Ok(Err(e)) => warn!(target: "notify", error = %e, "admin escalation failed"),
                Err(_) => warn!(target: "notify", "admin escalation timed out"),
            }
        });
    }
}

/// Single sequential consumer draining the ingest queue.
pub fn spawn(pipeline: Arc<Pipeline>, mut rx: mpsc::Receiver<IngestItem>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let outcome = pipeline.process(&item).await;
            debug!(target: "pipeline", outcome = outcome.label(), source = %item.source, "item done");
        }
        info!(target: "pipeline", "ingest queue closed; consumer exiting");
    })
}
