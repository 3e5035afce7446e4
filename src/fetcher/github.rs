use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;
use serde::Deserialize;

use super::http::HttpFetcher;
use super::{IssueCounts, PrCounts};
use crate::error::{CollectError, InvariantViolation, UpstreamError};

const SEARCH_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: HttpFetcher,
    base_url: String,
}

#[derive(Deserialize)]
struct RepoResponse {
    stargazers_count: Option<u64>,
}

#[derive(Deserialize)]
struct SearchResponse {
    total_count: u64,
}

/// A pull request from the closed-PR listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ClosedPr {
    pub number: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl GitHubClient {
    pub fn new(http: HttpFetcher, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn star_count(&self, repo: &str, token: Option<&str>) -> Result<u64, UpstreamError> {
        let url = format!("{}/repos/{repo}", self.base_url);
        let body: RepoResponse = self.http.get_json(&url, token).await?;
        body.stargazers_count.ok_or(UpstreamError::Malformed {
            url,
            message: "missing stargazers_count".to_string(),
        })
    }

    /// Merged-on-day and open-as-of-day PR counts.
    ///
    /// The three searches run one after another; any failure fails the whole
    /// call so a ratio is never built from partial counts.
    pub async fn pr_counts(
        &self,
        repo: &str,
        token: Option<&str>,
        as_of: NaiveDate,
    ) -> Result<PrCounts, CollectError> {
        let day = as_of.format(SEARCH_DATE_FORMAT);
        let merged = self
            .search_count(&format!("repo:{repo} is:pr is:merged merged:{day}"), token)
            .await?;
        let created = self
            .search_count(&format!("repo:{repo} is:pr created:<={day}"), token)
            .await?;
        let closed = self
            .search_count(&format!("repo:{repo} is:pr closed:<{day}"), token)
            .await?;

        let open = created
            .checked_sub(closed)
            .ok_or(InvariantViolation::OpenCountUnderflow { created, closed })?;
        Ok(PrCounts { merged, open })
    }

    pub async fn issue_counts(
        &self,
        repo: &str,
        token: Option<&str>,
    ) -> Result<IssueCounts, UpstreamError> {
        let open = self
            .search_count(&format!("repo:{repo} is:issue is:open"), token)
            .await?;
        let closed = self
            .search_count(&format!("repo:{repo} is:issue is:closed"), token)
            .await?;
        Ok(IssueCounts { open, closed })
    }

    /// One page (100 per page, 1-based) of closed pull requests.
    pub async fn closed_prs(
        &self,
        repo: &str,
        token: Option<&str>,
        page: u32,
    ) -> Result<Vec<ClosedPr>, UpstreamError> {
        let url = format!(
            "{}/repos/{repo}/pulls?state=closed&per_page=100&page={page}",
            self.base_url
        );
        self.http.get_json(&url, token).await
    }

    async fn search_count(&self, query: &str, token: Option<&str>) -> Result<u64, UpstreamError> {
        let endpoint = format!("{}/search/issues", self.base_url);
        let url = Url::parse_with_params(&endpoint, &[("q", query), ("per_page", "1")])
            .map_err(|e| UpstreamError::Transport {
                url: endpoint.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(query, "GitHub search");
        let body: SearchResponse = self.http.get_json(url.as_str(), token).await?;
        Ok(body.total_count)
    }
}
