// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod clock;
pub mod config;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod rate_controller;
pub mod relevance;
pub mod render;
pub mod scoring;
pub mod source_weights;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::ingest::{IngestItem, Outcome, Pipeline};
pub use crate::rate_controller::{DenyReason, GateVerdict, RateController, Tier};
