use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bucket::{self, Granularity};
use crate::error::InvariantViolation;
use crate::ratio;

/// The tracked metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    Stars,
    PrVelocity,
    IssueHealth,
    PackageDownloads,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 4] = [
        MetricFamily::Stars,
        MetricFamily::PrVelocity,
        MetricFamily::IssueHealth,
        MetricFamily::PackageDownloads,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricFamily::Stars => "stars",
            MetricFamily::PrVelocity => "pr_velocity",
            MetricFamily::IssueHealth => "issue_health",
            MetricFamily::PackageDownloads => "package_downloads",
        }
    }

    /// Unprefixed table holding this family's series.
    pub fn table(self) -> &'static str {
        match self {
            MetricFamily::Stars => "star_growth",
            MetricFamily::PrVelocity => "pr_velocity",
            MetricFamily::IssueHealth => "issue_health",
            MetricFamily::PackageDownloads => "package_downloads",
        }
    }

    /// Whether the family carries a `secondary_value` and a ratio.
    pub fn has_ratio(self) -> bool {
        matches!(self, MetricFamily::PrVelocity | MetricFamily::IssueHealth)
    }

    /// Whether `key` is a well-formed bucket key for this family.
    ///
    /// Star rows exist under both the day and the timestamp scheme, so both
    /// are accepted; the configured strategy decides which one new rows use.
    pub fn accepts_key(self, key: &str) -> bool {
        match self {
            MetricFamily::Stars => {
                bucket::is_valid_key(key, Granularity::Day)
                    || bucket::is_valid_key(key, Granularity::VerboseTimestamp)
            }
            MetricFamily::PrVelocity | MetricFamily::IssueHealth => {
                bucket::is_valid_key(key, Granularity::Day)
            }
            MetricFamily::PackageDownloads => {
                bucket::is_valid_key(key, Granularity::WeekStartMonday)
            }
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == s || f.as_str().replace('_', "-") == s)
            .ok_or_else(|| format!("unknown metric family {s:?}"))
    }
}

/// One observation in a family's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub repo: String,
    pub family: MetricFamily,
    pub bucket_key: String,
    pub value: i64,
    pub secondary_value: Option<i64>,
    pub ratio: Option<f64>,
}

impl MetricPoint {
    /// A single-count point (stars, downloads).
    pub fn count(
        repo: impl Into<String>,
        family: MetricFamily,
        bucket_key: impl Into<String>,
        value: i64,
    ) -> Self {
        Self {
            repo: repo.into(),
            family,
            bucket_key: bucket_key.into(),
            value,
            secondary_value: None,
            ratio: None,
        }
    }

    /// A two-count point whose ratio is `value / secondary_value`.
    pub fn with_ratio(
        repo: impl Into<String>,
        family: MetricFamily,
        bucket_key: impl Into<String>,
        value: i64,
        secondary_value: i64,
    ) -> Result<Self, InvariantViolation> {
        let ratio = ratio::ratio(value, secondary_value)?;
        Ok(Self {
            repo: repo.into(),
            family,
            bucket_key: bucket_key.into(),
            value,
            secondary_value: Some(secondary_value),
            ratio: Some(ratio),
        })
    }

    /// Reject points that must never reach the store.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.value < 0 {
            return Err(InvariantViolation::NegativeValue {
                field: "value",
                value: self.value,
            });
        }
        if let Some(secondary) = self.secondary_value {
            if secondary < 0 {
                return Err(InvariantViolation::NegativeValue {
                    field: "secondary_value",
                    value: secondary,
                });
            }
        }
        if !self.family.accepts_key(&self.bucket_key) {
            return Err(InvariantViolation::MalformedBucketKey {
                family: self.family.as_str(),
                key: self.bucket_key.clone(),
            });
        }
        Ok(())
    }
}

/// Convert an upstream count into a storable integer.
pub fn stored_count(count: u64) -> Result<i64, InvariantViolation> {
    i64::try_from(count).map_err(|_| InvariantViolation::CountOverflow(count))
}

/// A closed pull request in the append-only closure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrClosure {
    pub repo: String,
    pub pr_number: i64,
    pub opened_at: String,
    pub closed_at: String,
    pub duration_hours: f64,
}

/// Row shape shared by every family table.
#[derive(Debug, sqlx::FromRow)]
pub struct DbPoint {
    pub bucket_key: String,
    pub value: i64,
    pub secondary_value: Option<i64>,
    pub ratio: Option<f64>,
}

impl DbPoint {
    pub fn into_point(self, repo: &str, family: MetricFamily) -> MetricPoint {
        MetricPoint {
            repo: repo.to_string(),
            family,
            bucket_key: self.bucket_key,
            value: self.value,
            secondary_value: self.secondary_value,
            ratio: self.ratio,
        }
    }
}
