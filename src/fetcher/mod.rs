//! Raw counts from the hosting and registry APIs.

pub mod github;
pub mod http;
pub mod npm;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::TrackerConfig;
use crate::error::{CollectError, UpstreamError};

pub use github::{ClosedPr, GitHubClient};
pub use http::HttpFetcher;
pub use npm::NpmClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrCounts {
    pub merged: u64,
    pub open: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueCounts {
    pub open: u64,
    pub closed: u64,
}

/// One fetch operation per metric family, plus the closed-PR listing used by
/// the closure backfill.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch_star_count(&self, repo: &str, token: Option<&str>) -> Result<u64, CollectError>;

    async fn fetch_pr_counts(
        &self,
        repo: &str,
        token: Option<&str>,
        as_of: NaiveDate,
    ) -> Result<PrCounts, CollectError>;

    async fn fetch_issue_counts(
        &self,
        repo: &str,
        token: Option<&str>,
    ) -> Result<IssueCounts, CollectError>;

    /// Never fails: an unreachable registry reads as zero downloads.
    async fn fetch_package_downloads(&self, package: &str) -> u64;

    async fn fetch_closed_prs(
        &self,
        repo: &str,
        token: Option<&str>,
        page: u32,
    ) -> Result<Vec<ClosedPr>, CollectError>;
}

/// [`MetricSource`] backed by the live HTTP APIs.
#[derive(Debug, Clone)]
pub struct HttpMetricSource {
    github: GitHubClient,
    npm: NpmClient,
}

impl HttpMetricSource {
    pub fn new(tracker: &TrackerConfig) -> Result<Self, UpstreamError> {
        let http = HttpFetcher::new(tracker.http)?;
        Ok(Self {
            github: GitHubClient::new(http.clone(), &tracker.github_api_url),
            npm: NpmClient::new(http, &tracker.npm_api_url),
        })
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn fetch_star_count(&self, repo: &str, token: Option<&str>) -> Result<u64, CollectError> {
        Ok(self.github.star_count(repo, token).await?)
    }

    async fn fetch_pr_counts(
        &self,
        repo: &str,
        token: Option<&str>,
        as_of: NaiveDate,
    ) -> Result<PrCounts, CollectError> {
        self.github.pr_counts(repo, token, as_of).await
    }

    async fn fetch_issue_counts(
        &self,
        repo: &str,
        token: Option<&str>,
    ) -> Result<IssueCounts, CollectError> {
        Ok(self.github.issue_counts(repo, token).await?)
    }

    async fn fetch_package_downloads(&self, package: &str) -> u64 {
        self.npm.weekly_downloads(package).await
    }

    async fn fetch_closed_prs(
        &self,
        repo: &str,
        token: Option<&str>,
        page: u32,
    ) -> Result<Vec<ClosedPr>, CollectError> {
        Ok(self.github.closed_prs(repo, token, page).await?)
    }
}
