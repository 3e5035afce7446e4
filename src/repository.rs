use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::metric::{MetricFamily, MetricPoint, PrClosure};
use crate::models::metrics::StoreMetrics;

/// Persistence for metric series and the PR closure log.
///
/// Series are keyed by `(repo, family, bucket_key)` and always written with
/// upsert semantics. Closures are keyed by `(repo, pr_number)` and are never
/// overwritten once recorded.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Insert or overwrite the point at its identity. Last writer wins.
    async fn upsert(&self, point: &MetricPoint) -> Result<(), StoreError>;

    /// All points for the family, ascending by bucket key.
    async fn query_range(
        &self,
        repo: &str,
        family: MetricFamily,
    ) -> Result<Vec<MetricPoint>, StoreError>;

    async fn exists(
        &self,
        repo: &str,
        family: MetricFamily,
        bucket_key: &str,
    ) -> Result<bool, StoreError>;

    /// Point with the greatest bucket key, if any.
    async fn latest(
        &self,
        repo: &str,
        family: MetricFamily,
    ) -> Result<Option<MetricPoint>, StoreError>;

    /// Delete every point of the family for `repo`. Administrative only.
    async fn purge(&self, repo: &str, family: MetricFamily) -> Result<u64, StoreError>;

    async fn closure_exists(&self, repo: &str, pr_number: i64) -> Result<bool, StoreError>;

    /// Record a closure. Returns `false` if the PR was already recorded.
    async fn append_closure(&self, closure: &PrClosure) -> Result<bool, StoreError>;

    /// Closures ordered by PR number.
    async fn list_closures(&self, repo: &str) -> Result<Vec<PrClosure>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
    async fn get_metrics(&self, repo: &str) -> Result<StoreMetrics, StoreError>;
}
