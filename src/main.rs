//! Crypto News Relay: binary entrypoint.
//! Loads configuration, opens the history store, starts the single ingest
//! consumer and serves the operator API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crypto_news_relay::api::{self, AppState};
use crypto_news_relay::clock::SystemClock;
use crypto_news_relay::config::{ChannelsConfig, RelayConfig};
use crypto_news_relay::history::HistoryStore;
use crypto_news_relay::ingest::{self, Pipeline};
use crypto_news_relay::metrics::Metrics;
use crypto_news_relay::notify::{deliverer_from_channels, translator_from_channels, AdminNotifierMux};
use crypto_news_relay::rate_controller::RateController;
use crypto_news_relay::relevance::{
    start_hot_reload_thread, RelevanceEngine, RelevanceHandle, DEFAULT_RELEVANCE_CONFIG_PATH,
    ENV_RELEVANCE_CONFIG_PATH,
};
use crypto_news_relay::scoring::Scorer;
use crypto_news_relay::source_weights::{
    SourceWeightsConfig, DEFAULT_SOURCE_WEIGHTS_PATH, ENV_SOURCE_WEIGHTS_PATH,
};

const DEFAULT_LOG_FILTER: &str =
    "crypto_news_relay=info,pipeline=info,gate=info,history=info,notify=info,relevance=info,config=info,warn";

/// Compact logs by default; JSON lines when LOG_FORMAT=json.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    // --- Configuration (any defect is fatal) ---
    let cfg = RelayConfig::load_default().context("relay config")?;
    let channels = ChannelsConfig::from_env().context("channel settings")?;

    let engine = RelevanceEngine::from_toml().context("relevance lexicons")?;
    let relevance = RelevanceHandle::new(engine);
    start_hot_reload_thread(
        relevance.clone(),
        env_path(ENV_RELEVANCE_CONFIG_PATH, DEFAULT_RELEVANCE_CONFIG_PATH),
    );

    let sources_path = env_path(ENV_SOURCE_WEIGHTS_PATH, DEFAULT_SOURCE_WEIGHTS_PATH);
    let sources = SourceWeightsConfig::load_from_file(&sources_path);
    let scorer = Scorer::new(relevance, sources);

    // Recorder first so pipeline metric descriptions land on it.
    let metrics = Metrics::init(&cfg.limits)?;

    // --- Store + gate ---
    let history = Arc::new(
        HistoryStore::open(&cfg.storage.database_path).context("history store")?,
    );
    let gate = Arc::new(RateController::new(
        cfg.limits.clone(),
        cfg.thresholds.clone(),
        Arc::clone(&history),
        Arc::new(SystemClock::new()),
    ));

    // --- Collaborators ---
    let translator = translator_from_channels(&channels);
    let deliverer = deliverer_from_channels(&channels);
    let admin = AdminNotifierMux::from_channels(&channels).context("admin notifiers")?;
    info!(
        translator = translator.name(),
        deliverer = deliverer.name(),
        admin_channels = admin.len(),
        "collaborators ready"
    );

    let pipeline = Arc::new(Pipeline::new(
        scorer,
        Arc::clone(&history),
        gate,
        Arc::from(translator),
        Arc::from(deliverer),
        Arc::new(admin),
        cfg.timeouts.clone(),
    ));

    let (tx, rx) = mpsc::channel(cfg.server.queue_capacity);
    let consumer = ingest::spawn(Arc::clone(&pipeline), rx);

    // --- HTTP ---
    let app = api::router(AppState::new(pipeline, tx, sources_path)).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.server.bind_addr))?;
    info!(addr = %cfg.server.bind_addr, db = %cfg.storage.database_path.display(), "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server")?;

    // The router (and its queue sender) is gone; let the consumer drain.
    let _ = consumer.await;
    Ok(())
}
