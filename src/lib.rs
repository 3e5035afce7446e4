pub mod bucket;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod query;
pub mod ratio;
pub mod repo_name;
pub mod repository;
pub mod secrets;
pub mod sqlite_repo;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use collector::Collector;
use config::TrackerConfig;
use repository::MetricStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub tracker: Arc<TrackerConfig>,
    pub collector: Arc<Collector>,
    /// Bearer token for `/admin`. `None` hides the admin routes.
    pub admin_token: Option<String>,
}

fn series_routes() -> Router<AppState> {
    Router::new()
        .route("/api/stars", get(handlers::series::get_stars))
        .route("/api/star-history", get(handlers::series::get_star_history))
        .route("/api/pr-velocity", get(handlers::series::get_pr_velocity))
        .route("/api/issue-health", get(handlers::series::get_issue_health))
        .route(
            "/api/package-downloads",
            get(handlers::series::get_package_downloads),
        )
}

fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health_check))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/metrics", get(handlers::admin::get_metrics))
        .route("/admin/points", post(handlers::admin::load_points))
        .route("/admin/collect", post(handlers::admin::collect_now))
        .route(
            "/admin/backfill/pr-closures",
            post(handlers::admin::backfill_pr_closures),
        )
        .route(
            "/admin/series/{family}",
            delete(handlers::admin::purge_series),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::admin_auth::require_admin_token,
        ))
}

/// Build the full application router (used by main and tests).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(series_routes())
        .merge(health_routes())
        .merge(admin_routes(&state))
        .with_state(state)
}
