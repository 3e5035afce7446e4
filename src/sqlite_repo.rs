use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::config::TablePrefix;
use crate::error::StoreError;
use crate::models::metric::{DbPoint, MetricFamily, MetricPoint, PrClosure};
use crate::models::metrics::{FamilyMetrics, StoreMetrics};
use crate::repository::MetricStore;

pub struct SqliteRepository {
    pool: SqlitePool,
    prefix: TablePrefix,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool, prefix: TablePrefix) -> Self {
        Self { pool, prefix }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Table names come from a fixed set plus a validated prefix, so they are
    /// safe to splice into SQL text.
    fn table(&self, family: MetricFamily) -> String {
        format!("{}{}", self.prefix.as_str(), family.table())
    }

    fn closures_table(&self) -> String {
        format!("{}pr_closures", self.prefix.as_str())
    }
}

#[async_trait]
impl MetricStore for SqliteRepository {
    async fn upsert(&self, point: &MetricPoint) -> Result<(), StoreError> {
        point.validate()?;

        let table = self.table(point.family);
        tracing::debug!(
            table = %table,
            repo = %point.repo,
            bucket_key = %point.bucket_key,
            value = point.value,
            "db: UPSERT point"
        );

        sqlx::query(&format!(
            "INSERT INTO {table} (repo, bucket_key, value, secondary_value, ratio, collected_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (repo, bucket_key) DO UPDATE SET \
               value = excluded.value, \
               secondary_value = excluded.secondary_value, \
               ratio = excluded.ratio, \
               collected_at = excluded.collected_at"
        ))
        .bind(&point.repo)
        .bind(&point.bucket_key)
        .bind(point.value)
        .bind(point.secondary_value)
        .bind(point.ratio)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(table = %table, bucket_key = %point.bucket_key, "db: point upserted");

        Ok(())
    }

    async fn query_range(
        &self,
        repo: &str,
        family: MetricFamily,
    ) -> Result<Vec<MetricPoint>, StoreError> {
        let table = self.table(family);
        tracing::debug!(table = %table, repo, "db: SELECT series");

        let rows: Vec<DbPoint> = sqlx::query_as(&format!(
            "SELECT bucket_key, value, secondary_value, ratio FROM {table} \
             WHERE repo = ? ORDER BY bucket_key ASC"
        ))
        .bind(repo)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(table = %table, rows_returned = rows.len(), "db: series fetched");

        Ok(rows.into_iter().map(|r| r.into_point(repo, family)).collect())
    }

    async fn exists(
        &self,
        repo: &str,
        family: MetricFamily,
        bucket_key: &str,
    ) -> Result<bool, StoreError> {
        let table = self.table(family);
        let found: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT 1 FROM {table} WHERE repo = ? AND bucket_key = ?"
        ))
        .bind(repo)
        .bind(bucket_key)
        .fetch_optional(&self.pool)
        .await?;

        tracing::debug!(table = %table, bucket_key, found = found.is_some(), "db: exists check");

        Ok(found.is_some())
    }

    async fn latest(
        &self,
        repo: &str,
        family: MetricFamily,
    ) -> Result<Option<MetricPoint>, StoreError> {
        let table = self.table(family);
        tracing::debug!(table = %table, repo, "db: SELECT latest point");

        let row: Option<DbPoint> = sqlx::query_as(&format!(
            "SELECT bucket_key, value, secondary_value, ratio FROM {table} \
             WHERE repo = ? ORDER BY bucket_key DESC LIMIT 1"
        ))
        .bind(repo)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_point(repo, family)))
    }

    async fn purge(&self, repo: &str, family: MetricFamily) -> Result<u64, StoreError> {
        let table = self.table(family);
        tracing::debug!(table = %table, repo, "db: DELETE series");

        let result = sqlx::query(&format!("DELETE FROM {table} WHERE repo = ?"))
            .bind(repo)
            .execute(&self.pool)
            .await?;

        let rows = result.rows_affected();
        tracing::debug!(table = %table, rows_affected = rows, "db: series purged");

        Ok(rows)
    }

    async fn closure_exists(&self, repo: &str, pr_number: i64) -> Result<bool, StoreError> {
        let table = self.closures_table();
        let found: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT 1 FROM {table} WHERE repo = ? AND pr_number = ?"
        ))
        .bind(repo)
        .bind(pr_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    async fn append_closure(&self, closure: &PrClosure) -> Result<bool, StoreError> {
        let table = self.closures_table();
        tracing::debug!(repo = %closure.repo, pr_number = closure.pr_number, "db: INSERT closure");

        let result = sqlx::query(&format!(
            "INSERT INTO {table} \
             (repo, pr_number, opened_at, closed_at, duration_hours, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (repo, pr_number) DO NOTHING"
        ))
        .bind(&closure.repo)
        .bind(closure.pr_number)
        .bind(&closure.opened_at)
        .bind(&closure.closed_at)
        .bind(closure.duration_hours)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        tracing::debug!(pr_number = closure.pr_number, inserted, "db: closure insert result");

        Ok(inserted)
    }

    async fn list_closures(&self, repo: &str) -> Result<Vec<PrClosure>, StoreError> {
        let table = self.closures_table();
        let rows: Vec<(i64, String, String, f64)> = sqlx::query_as(&format!(
            "SELECT pr_number, opened_at, closed_at, duration_hours FROM {table} \
             WHERE repo = ? ORDER BY pr_number ASC"
        ))
        .bind(repo)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(pr_number, opened_at, closed_at, duration_hours)| PrClosure {
                repo: repo.to_string(),
                pr_number,
                opened_at,
                closed_at,
                duration_hours,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_metrics(&self, repo: &str) -> Result<StoreMetrics, StoreError> {
        let mut families = Vec::with_capacity(MetricFamily::ALL.len());
        for family in MetricFamily::ALL {
            let table = self.table(family);
            let (rows, first_bucket, last_bucket): (i64, Option<String>, Option<String>) =
                sqlx::query_as(&format!(
                    "SELECT COUNT(*), MIN(bucket_key), MAX(bucket_key) FROM {table} WHERE repo = ?"
                ))
                .bind(repo)
                .fetch_one(&self.pool)
                .await?;
            families.push(FamilyMetrics {
                family,
                rows,
                first_bucket,
                last_bucket,
            });
        }

        let closures_table = self.closures_table();
        let (pr_closures,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {closures_table} WHERE repo = ?"))
                .bind(repo)
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreMetrics {
            repo: repo.to_string(),
            families,
            pr_closures,
            collected_at: Utc::now().to_rfc3339(),
        })
    }
}
