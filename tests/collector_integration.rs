use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oss_tracker::collector::{Collector, RunState};
use oss_tracker::config::{HttpPolicy, TablePrefix, TrackerConfig};
use oss_tracker::fetcher::HttpMetricSource;
use oss_tracker::models::metric::MetricFamily;
use oss_tracker::repository::MetricStore;
use oss_tracker::secrets::{SecretProvider, StaticSecretStore};
use oss_tracker::sqlite_repo::SqliteRepository;
use oss_tracker::db;

async fn mount_search(server: &MockServer, q: &str, total: u64) {
    Mock::given(method("GET"))
        .and(path("/search/issues"))
        .and(query_param("q", q))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total_count": total })))
        .mount(server)
        .await;
}

async fn mount_github(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget"))
        .and(header("authorization", "Bearer ghp_integration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "stargazers_count": 4321 })))
        .mount(server)
        .await;
    mount_search(server, "repo:acme/widget is:pr is:merged merged:2025-07-29", 5).await;
    mount_search(server, "repo:acme/widget is:pr created:<=2025-07-29", 110).await;
    mount_search(server, "repo:acme/widget is:pr closed:<2025-07-29", 100).await;
    mount_search(server, "repo:acme/widget is:issue is:open", 25).await;
    mount_search(server, "repo:acme/widget is:issue is:closed", 75).await;
}

async fn setup(github: &MockServer, npm: &MockServer) -> (Collector, Arc<SqliteRepository>) {
    let prefix = TablePrefix::new("it_").unwrap();
    let pool = db::init_pool("sqlite::memory:", &prefix).await.unwrap();
    let store = Arc::new(SqliteRepository::new(pool, prefix));

    let mut tracker = TrackerConfig::new("acme/widget");
    tracker.github_api_url = github.uri();
    tracker.npm_api_url = npm.uri();
    tracker.http = HttpPolicy {
        timeout: Duration::from_secs(2),
        max_retries: 1,
        base_delay: Duration::from_millis(5),
    };

    let source = Arc::new(HttpMetricSource::new(&tracker).unwrap());
    let secrets = StaticSecretStore::new().with("github-token", r#"{"token":"ghp_integration"}"#);
    let collector = Collector::new(
        store.clone(),
        source,
        SecretProvider::new(Arc::new(secrets)),
        Arc::new(tracker),
    );
    (collector, store)
}

fn tick_time() -> chrono::DateTime<Utc> {
    // 2025-07-29 12:00 in UTC-8.
    Utc.with_ymd_and_hms(2025, 7, 29, 20, 0, 0).unwrap()
}

#[tokio::test]
async fn test_tick_against_live_shaped_apis() {
    let github = MockServer::start().await;
    let npm = MockServer::start().await;
    mount_github(&github).await;
    Mock::given(method("GET"))
        .and(path("/downloads/point/last-week/widget"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "downloads": 777 })))
        .mount(&npm)
        .await;

    let (collector, store) = setup(&github, &npm).await;
    let reports = collector.run_tick(tick_time()).await;
    assert!(reports.iter().all(|r| r.succeeded()), "{reports:?}");

    let stars = store.latest("acme/widget", MetricFamily::Stars).await.unwrap().unwrap();
    assert_eq!(stars.value, 4321);
    assert_eq!(stars.bucket_key, "2025-07-29T12:00:00.000Z");

    let prs = store
        .query_range("acme/widget", MetricFamily::PrVelocity)
        .await
        .unwrap();
    assert_eq!(prs.len(), 1);
    assert_eq!((prs[0].value, prs[0].secondary_value), (5, Some(10)));
    assert_eq!(prs[0].ratio, Some(0.5));

    let issues = store
        .query_range("acme/widget", MetricFamily::IssueHealth)
        .await
        .unwrap();
    assert_eq!(issues[0].ratio, Some(3.0));

    let downloads = store
        .latest("acme/widget", MetricFamily::PackageDownloads)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(downloads.value, 777);
    assert_eq!(downloads.bucket_key, "2025-07-28");
}

#[tokio::test]
async fn test_registry_outage_records_zero_downloads() {
    let github = MockServer::start().await;
    let npm = MockServer::start().await;
    mount_github(&github).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&npm)
        .await;

    let (collector, store) = setup(&github, &npm).await;
    let reports = collector.run_tick(tick_time()).await;

    let downloads = reports
        .iter()
        .find(|r| r.family == MetricFamily::PackageDownloads)
        .unwrap();
    assert!(downloads.succeeded());
    let stored = store
        .latest("acme/widget", MetricFamily::PackageDownloads)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, 0);
}

#[tokio::test]
async fn test_rate_limited_family_fails_without_write() {
    let github = MockServer::start().await;
    let npm = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .expect(1)
        .mount(&github)
        .await;
    mount_github(&github).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "downloads": 1 })))
        .mount(&npm)
        .await;

    let (collector, store) = setup(&github, &npm).await;
    let reports = collector.run_tick(tick_time()).await;

    let stars = &reports[0];
    assert_eq!(stars.state, RunState::Failed);
    assert_eq!(stars.failed_in, Some(RunState::Fetching));
    assert!(stars.error.as_deref().unwrap().contains("rate limit"));
    assert!(store
        .query_range("acme/widget", MetricFamily::Stars)
        .await
        .unwrap()
        .is_empty());

    // The other hosting families were unaffected.
    assert!(reports[1].succeeded());
    assert!(reports[2].succeeded());
}
