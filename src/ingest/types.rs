// src/ingest/types.rs
use serde::{Deserialize, Serialize};

use crate::rate_controller::{DenyReason, Tier};

/// One item from an inbound feed. Delivery is at-least-once upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestItem {
    pub source: String,      // e.g., "CoinDesk", "@WatcherGuru"
    pub external_id: String, // upstream message id, unique per source
    pub text: String,        // raw text as received
}

impl IngestItem {
    pub fn new(
        source: impl Into<String>,
        external_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            external_id: external_id.into(),
            text: text.into(),
        }
    }
}

/// What the pipeline did with an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// (source, external id) seen before; nothing was done.
    AlreadyProcessed,
    /// Identical text already stored under `id`; not re-gated.
    DuplicateContent { id: i64 },
    /// The store attempt failed; the pair is still marked processed.
    StoreFailed { score: u8 },
    Irrelevant { id: i64 },
    BelowGate { id: i64, score: u8 },
    Gated { id: i64, score: u8, reason: DenyReason },
    DeliveryFailed { id: i64, score: u8, tier: Tier },
    Published { id: i64, score: u8, tier: Tier, escalated: bool },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::AlreadyProcessed => "already_processed",
            Outcome::DuplicateContent { .. } => "duplicate_content",
            Outcome::StoreFailed { .. } => "store_failed",
            Outcome::Irrelevant { .. } => "irrelevant",
            Outcome::BelowGate { .. } => "below_gate",
            Outcome::Gated { .. } => "gated",
            Outcome::DeliveryFailed { .. } => "delivery_failed",
            Outcome::Published { .. } => "published",
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Outcome::Published { .. })
    }
}
