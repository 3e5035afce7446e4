//! Read path shared by the series endpoints.

use crate::error::AppError;
use crate::models::metric::{MetricFamily, MetricPoint};
use crate::repository::MetricStore;

/// Sort by bucket key and keep the last point seen for each key.
///
/// The sort is stable, so among duplicates the one returned later by the
/// store wins.
pub fn latest_per_bucket(mut points: Vec<MetricPoint>) -> Vec<MetricPoint> {
    points.sort_by(|a, b| a.bucket_key.cmp(&b.bucket_key));
    let mut deduped: Vec<MetricPoint> = Vec::with_capacity(points.len());
    for point in points {
        match deduped.last_mut() {
            Some(last) if last.bucket_key == point.bucket_key => *last = point,
            _ => deduped.push(point),
        }
    }
    deduped
}

/// Full ordered series for `family`, mapped to its response row.
pub async fn series<R: From<MetricPoint>>(
    store: &dyn MetricStore,
    repo: &str,
    family: MetricFamily,
) -> Result<Vec<R>, AppError> {
    let points = store.query_range(repo, family).await?;
    Ok(latest_per_bucket(points).into_iter().map(R::from).collect())
}
