use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::models::metric::MetricFamily;
use crate::models::series::{
    IssueHealthRow, PackageDownloadsRow, PrVelocityRow, SeriesQuery, StarHistoryRow, StarsResponse,
};
use crate::query;
use crate::AppState;

/// Resolve the optional `repo` parameter against the tracked repository.
fn tracked_repo(state: &AppState, requested: Option<&str>) -> Result<String, AppError> {
    match requested {
        None => Ok(state.tracker.repo.clone()),
        Some(repo) if repo.eq_ignore_ascii_case(&state.tracker.repo) => {
            Ok(state.tracker.repo.clone())
        }
        Some(repo) => Err(AppError::NotFound(format!("Repository {repo} is not tracked"))),
    }
}

/// GET /api/stars?repo=owner/name
pub async fn get_stars(
    State(state): State<AppState>,
    Query(params): Query<SeriesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let requested = params
        .repo
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing required query parameter: repo".into()))?;
    tracing::info!(handler = "get_stars", repo = %requested, "Handler: GET /api/stars");

    let repo = tracked_repo(&state, Some(requested))?;
    tracing::debug!(handler = "get_stars", "Dispatching to store.latest");
    let latest = state.store.latest(&repo, MetricFamily::Stars).await?;

    let response = match latest {
        Some(point) => StarsResponse {
            repo,
            count: point.value,
            timestamp: Some(point.bucket_key),
        },
        None => StarsResponse {
            repo,
            count: 0,
            timestamp: None,
        },
    };
    tracing::info!(
        handler = "get_stars",
        status = 200,
        count = response.count,
        "Responding: latest star count"
    );
    Ok(Json(response))
}

/// GET /api/star-history
pub async fn get_star_history(
    State(state): State<AppState>,
    Query(params): Query<SeriesQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(handler = "get_star_history", "Handler: GET /api/star-history");
    let repo = tracked_repo(&state, params.repo.as_deref())?;
    let rows: Vec<StarHistoryRow> =
        query::series(state.store.as_ref(), &repo, MetricFamily::Stars).await?;
    tracing::info!(
        handler = "get_star_history",
        status = 200,
        rows = rows.len(),
        "Responding: series"
    );
    Ok(Json(rows))
}

/// GET /api/pr-velocity
pub async fn get_pr_velocity(
    State(state): State<AppState>,
    Query(params): Query<SeriesQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(handler = "get_pr_velocity", "Handler: GET /api/pr-velocity");
    let repo = tracked_repo(&state, params.repo.as_deref())?;
    let rows: Vec<PrVelocityRow> =
        query::series(state.store.as_ref(), &repo, MetricFamily::PrVelocity).await?;
    tracing::info!(
        handler = "get_pr_velocity",
        status = 200,
        rows = rows.len(),
        "Responding: series"
    );
    Ok(Json(rows))
}

/// GET /api/issue-health
pub async fn get_issue_health(
    State(state): State<AppState>,
    Query(params): Query<SeriesQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(handler = "get_issue_health", "Handler: GET /api/issue-health");
    let repo = tracked_repo(&state, params.repo.as_deref())?;
    let rows: Vec<IssueHealthRow> =
        query::series(state.store.as_ref(), &repo, MetricFamily::IssueHealth).await?;
    tracing::info!(
        handler = "get_issue_health",
        status = 200,
        rows = rows.len(),
        "Responding: series"
    );
    Ok(Json(rows))
}

/// GET /api/package-downloads
pub async fn get_package_downloads(
    State(state): State<AppState>,
    Query(params): Query<SeriesQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(handler = "get_package_downloads", "Handler: GET /api/package-downloads");
    let repo = tracked_repo(&state, params.repo.as_deref())?;
    let rows: Vec<PackageDownloadsRow> =
        query::series(state.store.as_ref(), &repo, MetricFamily::PackageDownloads).await?;
    tracing::info!(
        handler = "get_package_downloads",
        status = 200,
        rows = rows.len(),
        "Responding: series"
    );
    Ok(Json(rows))
}
