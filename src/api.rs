use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::history::{CandidateRow, HistoryStats, PublishedMeta};
use crate::ingest::{IngestItem, Pipeline};
use crate::rate_controller::{GateVerdict, RateSnapshot};
use crate::source_weights::SourceWeightsConfig;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    queue: mpsc::Sender<IngestItem>,
    sources_path: PathBuf,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        queue: mpsc::Sender<IngestItem>,
        sources_path: PathBuf,
    ) -> Self {
        Self {
            pipeline,
            queue,
            sources_path,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/gate/probe", get(gate_probe))
        .route("/ingest", post(ingest))
        .route("/debug/recent", get(debug_recent))
        .route("/admin/reload-source-weights", post(admin_reload_source_weights))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn store_err(e: rusqlite::Error) -> ApiError {
    warn!(target: "history", error = %e, "store read failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!("history store unavailable: {e}"),
    )
}

#[derive(Serialize)]
struct StatusOut {
    published_today: u32,
    daily_min: u32,
    daily_max: u32,
    below_daily_min: bool,
    last_published: Option<PublishedMeta>,
    rate: RateSnapshot,
    history: HistoryStats,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusOut>, ApiError> {
    let gate = state.pipeline.gate();
    let history = state.pipeline.history();
    let limits = gate.limits();

    let published_today = history
        .published_count_in(gate.clock().today_bounds())
        .map_err(store_err)?;
    let last_published = history.last_published().map_err(store_err)?;
    let stats = history.stats().map_err(store_err)?;

    Ok(Json(StatusOut {
        published_today,
        daily_min: limits.daily_min,
        daily_max: limits.daily_max,
        below_daily_min: published_today < limits.daily_min,
        last_published,
        rate: gate.snapshot(),
        history: stats,
    }))
}

#[derive(Deserialize)]
struct ProbeQuery {
    score: Option<u8>,
}

#[derive(Serialize)]
struct ProbeOut {
    can_publish: bool,
    score: u8,
    #[serde(flatten)]
    verdict: GateVerdict,
}

async fn gate_probe(State(state): State<AppState>, Query(q): Query<ProbeQuery>) -> Json<ProbeOut> {
    let gate = state.pipeline.gate();
    let score = q.score.unwrap_or(gate.thresholds().publish).min(100);
    let verdict = gate.evaluate(score);
    Json(ProbeOut {
        can_publish: verdict.is_allowed(),
        score,
        verdict,
    })
}

#[derive(Serialize)]
struct Accepted {
    queued: bool,
}

async fn ingest(
    State(state): State<AppState>,
    Json(item): Json<IngestItem>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    if item.source.trim().is_empty() || item.external_id.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "source and external_id must be non-empty".into(),
        ));
    }
    match state.queue.try_send(item) {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(Accepted { queued: true }))),
        Err(TrySendError::Full(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "ingest queue full".into(),
        )),
        Err(TrySendError::Closed(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "ingest consumer stopped".into(),
        )),
    }
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn debug_recent(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<Vec<CandidateRow>>, ApiError> {
    let limit = q.limit.unwrap_or(10).clamp(1, 100);
    let rows = state.pipeline.history().recent(limit).map_err(store_err)?;
    Ok(Json(rows))
}

async fn admin_reload_source_weights(State(state): State<AppState>) -> Result<String, ApiError> {
    let fresh = SourceWeightsConfig::try_load(&state.sources_path).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("reload failed: {e:#}"),
        )
    })?;
    let n = fresh.sources.len();
    state.pipeline.scorer().replace_sources(fresh);
    info!(target: "relevance", sources = n, "source weights reloaded");
    Ok(format!("reloaded {n} sources"))
}
