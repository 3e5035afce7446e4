//! Outbound GET with a per-request timeout and bounded retry.
//!
//! Requests go through [`seatbelt`] retry and timeout middleware. Only
//! transient failures are retried: connection-level errors and 5xx
//! responses. Timeouts and every 4xx (including rate limits) are terminal so
//! the caller sees the upstream status and the tick's run fails promptly.

use layered::{Execute, Service, Stack};
use reqwest::header::{HeaderValue, ACCEPT};
use seatbelt::retry::{Backoff, Retry};
use seatbelt::timeout::Timeout;
use seatbelt::{RecoveryInfo, ResilienceContext};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tick::Clock;

use crate::config::HttpPolicy;
use crate::error::UpstreamError;

const USER_AGENT: &str = concat!("oss-tracker/", env!("CARGO_PKG_VERSION"));

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: HttpPolicy,
}

/// GitHub error bodies look like `{"message": "..."}`.
#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Retry connection failures and 5xx. Timeouts, 4xx and successes are final.
fn classify(result: &Result<reqwest::Response, UpstreamError>) -> RecoveryInfo {
    match result {
        Err(UpstreamError::Transport { .. }) => RecoveryInfo::retry(),
        Err(_) => RecoveryInfo::never(),
        Ok(resp) if resp.status().is_server_error() => RecoveryInfo::retry(),
        Ok(_) => RecoveryInfo::never(),
    }
}

fn send_error(url: &str, e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout {
            url: url.to_string(),
        }
    } else {
        UpstreamError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

impl HttpFetcher {
    pub fn new(policy: HttpPolicy) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(policy.timeout)
            .build()
            .map_err(|e| UpstreamError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client, policy })
    }

    /// GET `url` and decode a JSON body, with an optional bearer token.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<T, UpstreamError> {
        let response = self.get(url, token).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout {
                    url: url.to_string(),
                }
            } else {
                UpstreamError::Malformed {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    async fn get(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let clock = Clock::new_tokio();
        let context = ResilienceContext::new(&clock).name("upstream_get");

        let client = self.client.clone();
        let timed_out = url.to_string();
        let service = (
            Retry::layer("retry", &context)
                .clone_input()
                .recovery_with(|result: &Result<reqwest::Response, UpstreamError>, _| {
                    classify(result)
                })
                .max_retry_attempts(self.policy.max_retries)
                .base_delay(self.policy.base_delay)
                .backoff(Backoff::Exponential)
                .on_retry(|_output, args| {
                    tracing::debug!(
                        attempt = args.attempt().index() + 1,
                        delay_ms = args.retry_delay().as_millis() as u64,
                        "Retrying upstream request"
                    );
                }),
            Timeout::layer("timeout", &context)
                .timeout_error(move |_| UpstreamError::Timeout {
                    url: timed_out.clone(),
                })
                .timeout(self.policy.timeout),
            Execute::new(move |(url, token): (String, Option<String>)| {
                let client = client.clone();
                async move {
                    let mut request = client
                        .get(&url)
                        .header(ACCEPT, HeaderValue::from_static("application/json"));
                    if let Some(token) = token {
                        request = request.bearer_auth(token);
                    }
                    request.send().await.map_err(|e| send_error(&url, e))
                }
            }),
        )
            .into_service();

        service
            .execute((url.to_string(), token.map(str::to_string)))
            .await
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let reason = response
        .status()
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string();
    let Ok(body) = response.text().await else {
        return reason;
    };
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
        return parsed.message;
    }
    let body = body.trim();
    if body.is_empty() {
        reason
    } else {
        body.chars().take(MAX_ERROR_BODY).collect()
    }
}
