use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::bucket::{self, Granularity};
use crate::models::metric::MetricFamily;
use crate::repo_name::{is_valid_repo, repo_short_name};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TABLE_PREFIX may only contain [a-z0-9_], got {0:?}")]
    InvalidTablePrefix(String),

    #[error("TRACKED_REPO must be owner/name, got {0:?}")]
    InvalidRepo(String),

    #[error("REFERENCE_UTC_OFFSET_HOURS out of range: {0}")]
    InvalidOffset(i32),
}

pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub table_prefix: TablePrefix,
    pub cors_origins: Vec<String>,
    pub max_payload_bytes: usize,
    pub admin_token: Option<String>,
    /// Directory of secret files; unset reads secrets from the environment.
    pub secrets_dir: Option<PathBuf>,
    pub tracker: TrackerConfig,
}

/// Everything the collector and the query surface need to know about the
/// tracked repository and its upstreams.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub repo: String,
    pub package_name: String,
    pub github_api_url: String,
    pub npm_api_url: String,
    pub token_secret_name: String,
    /// Treat a missing hosting token as fatal instead of going unauthenticated.
    pub require_token: bool,
    pub star_bucketing: StarBucketing,
    pub reference_offset: FixedOffset,
    pub collect_interval: Duration,
    pub http: HttpPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// How star counts are keyed. Both schemes exist in stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarBucketing {
    /// One row per reference-local day; later ticks overwrite earlier ones.
    Day,
    /// One row per collection, keyed by the reference-local timestamp.
    Timestamp,
}

impl StarBucketing {
    pub fn granularity(self) -> Granularity {
        match self {
            StarBucketing::Day => Granularity::Day,
            StarBucketing::Timestamp => Granularity::VerboseTimestamp,
        }
    }
}

impl FromStr for StarBucketing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(StarBucketing::Day),
            "timestamp" => Ok(StarBucketing::Timestamp),
            other => Err(format!("unknown star bucketing {other:?}")),
        }
    }
}

/// Environment prefix for table names (`prod_`, `staging_`, or empty).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePrefix(String);

impl TablePrefix {
    pub fn new(prefix: &str) -> Result<Self, ConfigError> {
        if prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            Ok(Self(prefix.to_string()))
        } else {
            Err(ConfigError::InvalidTablePrefix(prefix.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TrackerConfig {
    /// Defaults for tracking `repo` against the public upstreams.
    pub fn new(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            package_name: repo_short_name(repo).to_string(),
            github_api_url: "https://api.github.com".to_string(),
            npm_api_url: "https://api.npmjs.org".to_string(),
            token_secret_name: "github-token".to_string(),
            require_token: false,
            star_bucketing: StarBucketing::Timestamp,
            reference_offset: bucket::pacific_standard(),
            collect_interval: Duration::from_secs(3 * 60 * 60),
            http: HttpPolicy::default(),
        }
    }

    /// Bucket granularity new points of `family` are keyed with.
    pub fn granularity(&self, family: MetricFamily) -> Granularity {
        match family {
            MetricFamily::Stars => self.star_bucketing.granularity(),
            MetricFamily::PrVelocity | MetricFamily::IssueHealth => Granularity::Day,
            MetricFamily::PackageDownloads => Granularity::WeekStartMonday,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable numbers fall back
    /// to defaults; names that end up in SQL or URLs are rejected instead.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let repo = var("TRACKED_REPO").unwrap_or_else(|| "promptfoo/promptfoo".to_string());
        if !is_valid_repo(&repo) {
            return Err(ConfigError::InvalidRepo(repo));
        }

        let offset_hours: i32 = parse_var(&var, "REFERENCE_UTC_OFFSET_HOURS").unwrap_or(-8);
        let reference_offset = bucket::offset_from_hours(offset_hours)
            .ok_or(ConfigError::InvalidOffset(offset_hours))?;

        let defaults = TrackerConfig::new(&repo);
        let tracker = TrackerConfig {
            package_name: var("PACKAGE_NAME")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.package_name.clone()),
            github_api_url: var("GITHUB_API_URL").unwrap_or(defaults.github_api_url.clone()),
            npm_api_url: var("NPM_API_URL").unwrap_or(defaults.npm_api_url.clone()),
            token_secret_name: var("GITHUB_TOKEN_SECRET_NAME")
                .unwrap_or(defaults.token_secret_name.clone()),
            require_token: parse_var(&var, "REQUIRE_GITHUB_TOKEN").unwrap_or(false),
            star_bucketing: parse_var(&var, "STAR_BUCKETING").unwrap_or(defaults.star_bucketing),
            reference_offset,
            collect_interval: parse_var(&var, "COLLECT_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.collect_interval),
            http: HttpPolicy {
                timeout: parse_var(&var, "HTTP_TIMEOUT_SECS")
                    .filter(|s: &u64| *s > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.http.timeout),
                max_retries: parse_var(&var, "HTTP_MAX_RETRIES")
                    .unwrap_or(defaults.http.max_retries),
                base_delay: defaults.http.base_delay,
            },
            repo,
        };

        Ok(Self {
            port: parse_var(&var, "PORT").unwrap_or(4000),
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:oss-tracker.db".to_string()),
            table_prefix: TablePrefix::new(&var("TABLE_PREFIX").unwrap_or_default())?,
            cors_origins: var("CORS_ORIGINS")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            max_payload_bytes: parse_var(&var, "MAX_PAYLOAD_BYTES").unwrap_or(1_048_576), // 1 MB
            admin_token: var("ADMIN_TOKEN").filter(|t| !t.is_empty()),
            secrets_dir: var("SECRETS_DIR")
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
            tracker,
        })
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
