use serde::Deserialize;

use super::http::HttpFetcher;

#[derive(Debug, Clone)]
pub struct NpmClient {
    http: HttpFetcher,
    base_url: String,
}

#[derive(Deserialize)]
struct PointResponse {
    downloads: u64,
}

impl NpmClient {
    pub fn new(http: HttpFetcher, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Downloads over the trailing seven days. Any failure counts as zero.
    pub async fn weekly_downloads(&self, package: &str) -> u64 {
        let url = format!("{}/downloads/point/last-week/{package}", self.base_url);
        match self.http.get_json::<PointResponse>(&url, None).await {
            Ok(body) => body.downloads,
            Err(e) => {
                tracing::warn!(package, error = %e, "Package download fetch failed, recording 0");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpPolicy;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NpmClient {
        let http = HttpFetcher::new(HttpPolicy {
            timeout: Duration::from_secs(2),
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        })
        .unwrap();
        NpmClient::new(http, &server.uri())
    }

    #[tokio::test]
    async fn test_weekly_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/downloads/point/last-week/widget"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "downloads": 98765,
                "start": "2025-07-21",
                "end": "2025-07-27",
                "package": "widget"
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).weekly_downloads("widget").await, 98765);
    }

    #[tokio::test]
    async fn test_failure_counts_as_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "package widget not found"
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).weekly_downloads("widget").await, 0);
    }
}
