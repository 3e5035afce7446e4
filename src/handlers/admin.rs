use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::bucket::{self, Granularity};
use crate::error::AppError;
use crate::models::admin::{
    BackfillQuery, BackfillResponse, CollectResponse, LoadPointsRequest, LoadPointsResponse,
    ManualPoint, PurgeResponse, SkippedPoint,
};
use crate::models::metric::{MetricFamily, MetricPoint};
use crate::AppState;

/// Closed-PR pages walked by one backfill unless the caller asks otherwise.
const DEFAULT_BACKFILL_PAGES: u32 = 10;

pub async fn get_metrics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let metrics = state.store.get_metrics(&state.tracker.repo).await?;
    Ok(Json(metrics))
}

/// POST /admin/points
///
/// Upserts hand-supplied points for the tracked repository through the same
/// store contract as the collector. Points that cannot be keyed or fail
/// validation are reported back instead of failing the whole batch.
pub async fn load_points(
    State(state): State<AppState>,
    Json(body): Json<LoadPointsRequest>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(
        handler = "load_points",
        point_count = body.points.len(),
        "Handler: POST /admin/points"
    );

    let mut loaded = 0usize;
    let mut skipped = Vec::new();

    for manual in body.points {
        let raw_key = manual.bucket_key.clone();
        match manual_point(&state, manual) {
            Ok(point) => {
                tracing::debug!(
                    handler = "load_points",
                    family = %point.family,
                    bucket_key = %point.bucket_key,
                    "Dispatching to store.upsert"
                );
                state.store.upsert(&point).await?;
                loaded += 1;
            }
            Err(reason) => {
                tracing::warn!(
                    handler = "load_points",
                    bucket_key = %raw_key,
                    %reason,
                    "Skipping point"
                );
                skipped.push(SkippedPoint {
                    bucket_key: raw_key,
                    reason,
                });
            }
        }
    }

    tracing::info!(
        handler = "load_points",
        status = 200,
        loaded,
        skipped = skipped.len(),
        "Responding: points loaded"
    );
    Ok(Json(LoadPointsResponse { loaded, skipped }))
}

fn manual_point(state: &AppState, manual: ManualPoint) -> Result<MetricPoint, String> {
    let family = manual.family;
    let key = manual_key(state, family, &manual.bucket_key)
        .ok_or_else(|| format!("unrecognized date {:?}", manual.bucket_key))?;
    let repo = state.tracker.repo.as_str();

    let point = match (family.has_ratio(), manual.secondary_value) {
        (true, Some(secondary)) => {
            MetricPoint::with_ratio(repo, family, key, manual.value, secondary)
                .map_err(|e| e.to_string())?
        }
        (true, None) => return Err(format!("{family} points need a secondary_value")),
        (false, None) => MetricPoint::count(repo, family, key, manual.value),
        (false, Some(_)) => return Err(format!("{family} points take no secondary_value")),
    };
    point.validate().map_err(|e| e.to_string())?;
    Ok(point)
}

/// Canonical key for a hand-written date. Star keys already in either stored
/// scheme are kept as they are; anything else is re-keyed by day.
fn manual_key(state: &AppState, family: MetricFamily, raw: &str) -> Option<String> {
    let raw = raw.trim();
    match family {
        MetricFamily::Stars if family.accepts_key(raw) => Some(raw.to_string()),
        MetricFamily::Stars => bucket::normalize_key(raw, Granularity::Day),
        other => bucket::normalize_key(raw, state.tracker.granularity(other)),
    }
}

/// POST /admin/collect
pub async fn collect_now(State(state): State<AppState>) -> impl IntoResponse {
    tracing::info!(handler = "collect_now", "Handler: POST /admin/collect");
    let reports = state.collector.run_tick(Utc::now()).await;
    tracing::info!(handler = "collect_now", status = 200, "Responding: tick reports");
    Json(CollectResponse { reports })
}

/// POST /admin/backfill/pr-closures
pub async fn backfill_pr_closures(
    State(state): State<AppState>,
    Query(query): Query<BackfillQuery>,
) -> Result<impl IntoResponse, AppError> {
    let max_pages = query.max_pages.unwrap_or(DEFAULT_BACKFILL_PAGES).max(1);
    tracing::info!(
        handler = "backfill_pr_closures",
        max_pages,
        "Handler: POST /admin/backfill/pr-closures"
    );
    let summary = state.collector.backfill_pr_closures(max_pages).await?;
    tracing::info!(
        handler = "backfill_pr_closures",
        status = 200,
        inserted = summary.inserted,
        "Responding: backfill summary"
    );
    Ok(Json(BackfillResponse { summary }))
}

/// DELETE /admin/series/{family}
pub async fn purge_series(
    State(state): State<AppState>,
    Path(family): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let family: MetricFamily = family.parse().map_err(AppError::BadRequest)?;
    tracing::info!(handler = "purge_series", family = %family, "Handler: DELETE /admin/series");

    let deleted = state.store.purge(&state.tracker.repo, family).await?;
    tracing::warn!(
        handler = "purge_series",
        family = %family,
        deleted,
        "Purged series"
    );
    Ok(Json(PurgeResponse { family, deleted }))
}
