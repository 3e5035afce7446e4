use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use oss_tracker::collector::{scheduler, Collector};
use oss_tracker::config::Config;
use oss_tracker::fetcher::HttpMetricSource;
use oss_tracker::secrets::{EnvSecretStore, FileSecretStore, SecretProvider, SecretStore};
use oss_tracker::sqlite_repo::SqliteRepository;
use oss_tracker::{build_app, db, AppState};

fn build_cors(config: &Config) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
}

fn secret_store(config: &Config) -> Arc<dyn SecretStore> {
    match &config.secrets_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Reading secrets from files");
            Arc::new(FileSecretStore::new(dir))
        }
        None => Arc::new(EnvSecretStore),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let pool = db::init_pool(&config.database_url, &config.table_prefix)
        .await
        .expect("Failed to initialize database");

    tracing::info!(
        "Database initialized at {} (table prefix {:?})",
        config.database_url,
        config.table_prefix.as_str()
    );

    let cors = build_cors(&config);

    let tracker = Arc::new(config.tracker.clone());
    let store = Arc::new(SqliteRepository::new(pool, config.table_prefix.clone()));
    let source = Arc::new(HttpMetricSource::new(&tracker).expect("Failed to build HTTP client"));
    let collector = Arc::new(Collector::new(
        store.clone(),
        source,
        SecretProvider::new(secret_store(&config)),
        tracker.clone(),
    ));

    let state = AppState {
        store,
        tracker: tracker.clone(),
        collector: collector.clone(),
        admin_token: config.admin_token.clone(),
    };

    let app = build_app(state)
        .layer(RequestBodyLimitLayer::new(config.max_payload_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_request(trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    trace::DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Millis),
                ),
        )
        .layer(cors);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(scheduler::run(
        collector,
        tracker.collect_interval,
        shutdown_rx,
    ));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {addr}, tracking {}", tracker.repo);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!("Scheduler task failed: {e}");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutting down...");
}
