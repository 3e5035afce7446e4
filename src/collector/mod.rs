//! Scheduled collection: one run per metric family per tick.
//!
//! A run moves `Idle → Fetching → Bucketing → Storing → Done`, or ends in
//! `Failed` from fetching or storing. Failed runs are reported and left for
//! the next tick. Families run concurrently and never wait on each other.

pub mod backfill;
pub mod scheduler;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bucket;
use crate::config::TrackerConfig;
use crate::error::CollectError;
use crate::fetcher::MetricSource;
use crate::models::metric::{stored_count, MetricFamily, MetricPoint};
use crate::repository::MetricStore;
use crate::secrets::SecretProvider;

use self::backfill::BackfillSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Bucketing,
    Storing,
    Done,
    Failed,
    /// The family's previous run was still in flight; nothing was attempted.
    Skipped,
}

/// Outcome of one family's run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub family: MetricFamily,
    pub state: RunState,
    /// State the run was in when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    fn done(point: &MetricPoint) -> Self {
        Self {
            family: point.family,
            state: RunState::Done,
            failed_in: None,
            bucket_key: Some(point.bucket_key.clone()),
            value: Some(point.value),
            error: None,
        }
    }

    fn failed(family: MetricFamily, failed_in: RunState, error: &CollectError) -> Self {
        Self {
            family,
            state: RunState::Failed,
            failed_in: Some(failed_in),
            bucket_key: None,
            value: None,
            error: Some(error.to_string()),
        }
    }

    fn skipped(family: MetricFamily) -> Self {
        Self {
            family,
            state: RunState::Skipped,
            failed_in: None,
            bucket_key: None,
            value: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }
}

/// Inputs shared by every run in one tick.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub now: DateTime<Utc>,
    pub token: Option<String>,
}

enum RawCounts {
    Single(u64),
    Pair { value: u64, secondary: u64 },
}

struct Run {
    family: MetricFamily,
    state: RunState,
}

impl Run {
    fn new(family: MetricFamily) -> Self {
        Self {
            family,
            state: RunState::Idle,
        }
    }

    fn advance(&mut self, next: RunState) {
        tracing::debug!(family = %self.family, from = ?self.state, to = ?next, "Run state");
        self.state = next;
    }
}

/// Families with a run in flight. Claiming a busy family fails instead of
/// waiting, so an overlapping tick skips it.
#[derive(Default)]
struct InFlight {
    families: Mutex<HashSet<MetricFamily>>,
}

struct InFlightGuard<'a> {
    set: &'a InFlight,
    family: MetricFamily,
}

impl InFlight {
    fn try_claim(&self, family: MetricFamily) -> Option<InFlightGuard<'_>> {
        let mut families = self.families.lock().unwrap_or_else(|e| e.into_inner());
        families
            .insert(family)
            .then(|| InFlightGuard { set: self, family })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut families = self.set.families.lock().unwrap_or_else(|e| e.into_inner());
        families.remove(&self.family);
    }
}

pub struct Collector {
    store: Arc<dyn MetricStore>,
    source: Arc<dyn MetricSource>,
    secrets: SecretProvider,
    tracker: Arc<TrackerConfig>,
    in_flight: InFlight,
}

impl Collector {
    pub fn new(
        store: Arc<dyn MetricStore>,
        source: Arc<dyn MetricSource>,
        secrets: SecretProvider,
        tracker: Arc<TrackerConfig>,
    ) -> Self {
        Self {
            store,
            source,
            secrets,
            tracker,
            in_flight: InFlight::default(),
        }
    }

    pub fn tracker(&self) -> &TrackerConfig {
        &self.tracker
    }

    /// Run every family once for the tick at `now`.
    ///
    /// The hosting token is resolved once per tick. Reports come back in
    /// [`MetricFamily::ALL`] order.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Vec<RunReport> {
        let ctx = TickContext {
            now,
            token: self.secrets.resolve(&self.tracker.token_secret_name).await,
        };
        tracing::info!(
            repo = %self.tracker.repo,
            authenticated = ctx.token.is_some(),
            "Collection tick started"
        );

        let (stars, prs, issues, downloads) = tokio::join!(
            self.run_guarded(MetricFamily::Stars, &ctx),
            self.run_guarded(MetricFamily::PrVelocity, &ctx),
            self.run_guarded(MetricFamily::IssueHealth, &ctx),
            self.run_guarded(MetricFamily::PackageDownloads, &ctx),
        );
        let reports = vec![stars, prs, issues, downloads];

        let failed = reports.iter().filter(|r| r.state == RunState::Failed).count();
        tracing::info!(repo = %self.tracker.repo, failed, "Collection tick finished");
        reports
    }

    async fn run_guarded(&self, family: MetricFamily, ctx: &TickContext) -> RunReport {
        let Some(_guard) = self.in_flight.try_claim(family) else {
            tracing::info!(family = %family, "Previous run still in flight, skipping");
            return RunReport::skipped(family);
        };
        self.run_family(family, ctx).await
    }

    /// One family's run. Writes at most one point.
    pub async fn run_family(&self, family: MetricFamily, ctx: &TickContext) -> RunReport {
        let mut run = Run::new(family);
        match self.execute(&mut run, ctx).await {
            Ok(point) => {
                tracing::info!(
                    family = %family,
                    bucket_key = %point.bucket_key,
                    value = point.value,
                    "Run done"
                );
                RunReport::done(&point)
            }
            Err(e) => {
                let failed_in = run.state;
                run.advance(RunState::Failed);
                match &e {
                    CollectError::Invariant(v) => {
                        tracing::error!(
                            family = %family,
                            violation = %v,
                            "Invariant violation, point skipped"
                        )
                    }
                    CollectError::Store(err) => {
                        tracing::error!(family = %family, error = %err, "Store write failed")
                    }
                    CollectError::Upstream(err) => tracing::warn!(
                        family = %family,
                        status = err.status(),
                        rate_limited = err.is_rate_limited(),
                        error = %err,
                        "Fetch failed"
                    ),
                    CollectError::SecretUnavailable(name) => {
                        tracing::warn!(family = %family, secret = %name, "Required token missing")
                    }
                }
                RunReport::failed(family, failed_in, &e)
            }
        }
    }

    async fn execute(&self, run: &mut Run, ctx: &TickContext) -> Result<MetricPoint, CollectError> {
        let family = run.family;
        let repo = self.tracker.repo.as_str();

        run.advance(RunState::Fetching);
        let raw = self.fetch(family, ctx).await?;

        run.advance(RunState::Bucketing);
        let key = bucket::bucket_key(
            ctx.now,
            self.tracker.reference_offset,
            self.tracker.granularity(family),
        );
        let point = match raw {
            RawCounts::Single(value) => MetricPoint::count(repo, family, key, stored_count(value)?),
            RawCounts::Pair { value, secondary } => MetricPoint::with_ratio(
                repo,
                family,
                key,
                stored_count(value)?,
                stored_count(secondary)?,
            )?,
        };

        run.advance(RunState::Storing);
        self.store.upsert(&point).await?;

        run.advance(RunState::Done);
        Ok(point)
    }

    async fn fetch(
        &self,
        family: MetricFamily,
        ctx: &TickContext,
    ) -> Result<RawCounts, CollectError> {
        let repo = self.tracker.repo.as_str();
        match family {
            MetricFamily::Stars => {
                let token = self.hosting_token(ctx)?;
                let stars = self.source.fetch_star_count(repo, token).await?;
                Ok(RawCounts::Single(stars))
            }
            MetricFamily::PrVelocity => {
                let token = self.hosting_token(ctx)?;
                let as_of = bucket::local_date(ctx.now, self.tracker.reference_offset);
                let counts = self.source.fetch_pr_counts(repo, token, as_of).await?;
                Ok(RawCounts::Pair {
                    value: counts.merged,
                    secondary: counts.open,
                })
            }
            MetricFamily::IssueHealth => {
                let token = self.hosting_token(ctx)?;
                let counts = self.source.fetch_issue_counts(repo, token).await?;
                Ok(RawCounts::Pair {
                    value: counts.closed,
                    secondary: counts.open,
                })
            }
            MetricFamily::PackageDownloads => {
                let downloads = self
                    .source
                    .fetch_package_downloads(&self.tracker.package_name)
                    .await;
                Ok(RawCounts::Single(downloads))
            }
        }
    }

    /// Token for hosting API calls. Absent means unauthenticated unless the
    /// deployment requires one.
    fn hosting_token<'a>(&self, ctx: &'a TickContext) -> Result<Option<&'a str>, CollectError> {
        match ctx.token.as_deref() {
            None if self.tracker.require_token => Err(CollectError::SecretUnavailable(
                self.tracker.token_secret_name.clone(),
            )),
            token => Ok(token),
        }
    }

    /// Record closure durations for closed PRs not yet in the log.
    pub async fn backfill_pr_closures(
        &self,
        max_pages: u32,
    ) -> Result<BackfillSummary, CollectError> {
        let token = self.secrets.resolve(&self.tracker.token_secret_name).await;
        if token.is_none() && self.tracker.require_token {
            return Err(CollectError::SecretUnavailable(
                self.tracker.token_secret_name.clone(),
            ));
        }
        backfill::backfill_pr_closures(
            self.store.as_ref(),
            self.source.as_ref(),
            &self.tracker.repo,
            token.as_deref(),
            max_pages,
        )
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{StarBucketing, TablePrefix};
    use crate::db;
    use crate::error::UpstreamError;
    use crate::fetcher::{ClosedPr, IssueCounts, PrCounts};
    use crate::secrets::StaticSecretStore;
    use crate::sqlite_repo::SqliteRepository;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::time::Duration;

    /// Scripted [`MetricSource`]. `None` fields fail with a 503.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub stars: Option<u64>,
        pub prs: Option<PrCounts>,
        pub issues: Option<IssueCounts>,
        pub downloads: u64,
        pub closed_prs: Vec<Vec<ClosedPr>>,
        pub star_delay: Option<Duration>,
        pub seen_tokens: Mutex<Vec<Option<String>>>,
    }

    fn unavailable(what: &str) -> CollectError {
        CollectError::Upstream(UpstreamError::Status {
            url: format!("http://fake/{what}"),
            status: 503,
            message: "Service Unavailable".to_string(),
        })
    }

    #[async_trait]
    impl MetricSource for FakeSource {
        async fn fetch_star_count(
            &self,
            _repo: &str,
            token: Option<&str>,
        ) -> Result<u64, CollectError> {
            self.seen_tokens
                .lock()
                .unwrap()
                .push(token.map(str::to_string));
            if let Some(delay) = self.star_delay {
                tokio::time::sleep(delay).await;
            }
            self.stars.ok_or_else(|| unavailable("stars"))
        }

        async fn fetch_pr_counts(
            &self,
            _repo: &str,
            _token: Option<&str>,
            _as_of: NaiveDate,
        ) -> Result<PrCounts, CollectError> {
            self.prs.ok_or_else(|| unavailable("prs"))
        }

        async fn fetch_issue_counts(
            &self,
            _repo: &str,
            _token: Option<&str>,
        ) -> Result<IssueCounts, CollectError> {
            self.issues.ok_or_else(|| unavailable("issues"))
        }

        async fn fetch_package_downloads(&self, _package: &str) -> u64 {
            self.downloads
        }

        async fn fetch_closed_prs(
            &self,
            _repo: &str,
            _token: Option<&str>,
            page: u32,
        ) -> Result<Vec<ClosedPr>, CollectError> {
            Ok(self
                .closed_prs
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }
    }

    pub(crate) fn healthy_source() -> FakeSource {
        FakeSource {
            stars: Some(1200),
            prs: Some(PrCounts { merged: 5, open: 10 }),
            issues: Some(IssueCounts { open: 40, closed: 60 }),
            downloads: 5000,
            ..Default::default()
        }
    }

    async fn collector_with(
        source: Arc<FakeSource>,
        tracker: TrackerConfig,
        secrets: StaticSecretStore,
    ) -> (Arc<Collector>, Arc<SqliteRepository>) {
        let pool = db::init_pool("sqlite::memory:", &TablePrefix::default())
            .await
            .unwrap();
        let store = Arc::new(SqliteRepository::new(pool, TablePrefix::default()));
        let collector = Collector::new(
            store.clone(),
            source,
            SecretProvider::new(Arc::new(secrets)),
            Arc::new(tracker),
        );
        (Arc::new(collector), store)
    }

    async fn collector(source: FakeSource) -> (Arc<Collector>, Arc<SqliteRepository>) {
        collector_with(
            Arc::new(source),
            TrackerConfig::new("acme/widget"),
            StaticSecretStore::new(),
        )
        .await
    }

    fn at(h: u32) -> DateTime<Utc> {
        // Tuesday 2025-07-29 in UTC-8 for every hour from 08:00 UTC on.
        Utc.with_ymd_and_hms(2025, 7, 29, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_tick_writes_every_family() {
        let (collector, store) = collector(healthy_source()).await;
        let reports = collector.run_tick(at(12)).await;

        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(RunReport::succeeded));

        let prs = store.query_range("acme/widget", MetricFamily::PrVelocity).await.unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].bucket_key, "2025-07-29");
        assert_eq!(prs[0].value, 5);
        assert_eq!(prs[0].secondary_value, Some(10));
        assert_eq!(prs[0].ratio, Some(0.5));

        let issues = store.query_range("acme/widget", MetricFamily::IssueHealth).await.unwrap();
        assert_eq!(issues[0].value, 60);
        assert_eq!(issues[0].ratio, Some(1.5));

        let downloads = store
            .query_range("acme/widget", MetricFamily::PackageDownloads)
            .await
            .unwrap();
        assert_eq!(downloads[0].bucket_key, "2025-07-28");

        let stars = store.query_range("acme/widget", MetricFamily::Stars).await.unwrap();
        assert_eq!(stars[0].bucket_key, "2025-07-29T04:00:00.000Z");
        assert_eq!(stars[0].value, 1200);
    }

    #[tokio::test]
    async fn test_zero_counts_give_zero_ratio() {
        let source = FakeSource {
            prs: Some(PrCounts { merged: 0, open: 0 }),
            ..healthy_source()
        };
        let (collector, store) = collector(source).await;
        collector.run_tick(at(12)).await;

        let prs = store.query_range("acme/widget", MetricFamily::PrVelocity).await.unwrap();
        assert_eq!(prs[0].ratio, Some(0.0));
    }

    #[tokio::test]
    async fn test_two_ticks_same_day_overwrite() {
        let (collector, store) = collector(healthy_source()).await;
        collector.run_tick(at(9)).await;
        collector.run_tick(at(20)).await;

        let prs = store.query_range("acme/widget", MetricFamily::PrVelocity).await.unwrap();
        assert_eq!(prs.len(), 1);
        // Timestamp-keyed stars keep one row per tick.
        let stars = store.query_range("acme/widget", MetricFamily::Stars).await.unwrap();
        assert_eq!(stars.len(), 2);
    }

    #[tokio::test]
    async fn test_day_star_bucketing_overwrites() {
        let mut tracker = TrackerConfig::new("acme/widget");
        tracker.star_bucketing = StarBucketing::Day;
        let (collector, store) =
            collector_with(Arc::new(healthy_source()), tracker, StaticSecretStore::new()).await;
        collector.run_tick(at(9)).await;
        collector.run_tick(at(20)).await;

        let stars = store.query_range("acme/widget", MetricFamily::Stars).await.unwrap();
        assert_eq!(stars.len(), 1);
        assert_eq!(stars[0].bucket_key, "2025-07-29");
    }

    #[tokio::test]
    async fn test_zero_downloads_still_stored() {
        let source = FakeSource {
            downloads: 0,
            ..healthy_source()
        };
        let (collector, store) = collector(source).await;
        let reports = collector.run_tick(at(12)).await;

        let downloads = &reports[3];
        assert_eq!(downloads.family, MetricFamily::PackageDownloads);
        assert!(downloads.succeeded());
        let stored = store
            .latest("acme/widget", MetricFamily::PackageDownloads)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.value, 0);
    }

    #[tokio::test]
    async fn test_one_family_failure_does_not_block_others() {
        let source = FakeSource {
            stars: None,
            ..healthy_source()
        };
        let (collector, store) = collector(source).await;
        let reports = collector.run_tick(at(12)).await;

        assert_eq!(reports[0].state, RunState::Failed);
        assert_eq!(reports[0].failed_in, Some(RunState::Fetching));
        assert!(reports[0].error.as_deref().unwrap().contains("503"));
        assert!(reports[1..].iter().all(RunReport::succeeded));

        assert!(store
            .query_range("acme/widget", MetricFamily::Stars)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invariant_violation_skips_point() {
        let source = FakeSource {
            stars: Some(u64::MAX),
            ..healthy_source()
        };
        let (collector, store) = collector(source).await;
        let reports = collector.run_tick(at(12)).await;

        assert_eq!(reports[0].state, RunState::Failed);
        assert_eq!(reports[0].failed_in, Some(RunState::Bucketing));
        assert!(reports[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("invariant violation"));
        assert!(store
            .query_range("acme/widget", MetricFamily::Stars)
            .await
            .unwrap()
            .is_empty());
        assert!(reports[1..].iter().all(RunReport::succeeded));
    }

    #[tokio::test]
    async fn test_token_resolved_once_per_tick() {
        let source = Arc::new(healthy_source());
        let (collector, _) = collector_with(
            source.clone(),
            TrackerConfig::new("acme/widget"),
            StaticSecretStore::new().with("github-token", r#"{"token":"ghp_live"}"#),
        )
        .await;
        collector.run_tick(at(12)).await;

        let seen = source.seen_tokens.lock().unwrap().clone();
        assert_eq!(seen, vec![Some("ghp_live".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_token_goes_unauthenticated() {
        let source = Arc::new(healthy_source());
        let (collector, _) = collector_with(
            source.clone(),
            TrackerConfig::new("acme/widget"),
            StaticSecretStore::new(),
        )
        .await;
        let reports = collector.run_tick(at(12)).await;

        assert!(reports.iter().all(RunReport::succeeded));
        assert_eq!(*source.seen_tokens.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_missing_required_token_fails_hosting_families_only() {
        let mut tracker = TrackerConfig::new("acme/widget");
        tracker.require_token = true;
        let (collector, _) =
            collector_with(Arc::new(healthy_source()), tracker, StaticSecretStore::new()).await;
        let reports = collector.run_tick(at(12)).await;

        for report in &reports[..3] {
            assert_eq!(report.state, RunState::Failed);
            assert!(report.error.as_deref().unwrap().contains("github-token"));
        }
        assert!(reports[3].succeeded());
    }

    #[tokio::test]
    async fn test_overlapping_tick_skips_busy_family() {
        let source = FakeSource {
            star_delay: Some(Duration::from_millis(300)),
            ..healthy_source()
        };
        let (collector, _) = collector(source).await;

        let slow = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.run_tick(at(12)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let overlapping = collector.run_tick(at(13)).await;

        assert_eq!(overlapping[0].state, RunState::Skipped);
        assert!(overlapping[1..].iter().all(RunReport::succeeded));

        let first = slow.await.unwrap();
        assert!(first[0].succeeded());

        // Once the slow run is finished the family is free again.
        let after = collector.run_tick(at(14)).await;
        assert!(after[0].succeeded());
    }
}
