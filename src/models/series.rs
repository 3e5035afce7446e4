use serde::{Deserialize, Serialize};

use super::metric::MetricPoint;

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub repo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StarsResponse {
    pub repo: String,
    pub count: i64,
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StarHistoryRow {
    pub timestamp: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct PrVelocityRow {
    pub date: String,
    pub merged_count: i64,
    pub open_count: i64,
    pub ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct IssueHealthRow {
    pub date: String,
    pub closed_count: i64,
    pub open_count: i64,
    pub ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct PackageDownloadsRow {
    /// Monday starting the download week.
    pub date: String,
    pub downloads: i64,
}

impl From<MetricPoint> for StarHistoryRow {
    fn from(p: MetricPoint) -> Self {
        Self {
            timestamp: p.bucket_key,
            count: p.value,
        }
    }
}

impl From<MetricPoint> for PrVelocityRow {
    fn from(p: MetricPoint) -> Self {
        Self {
            date: p.bucket_key,
            merged_count: p.value,
            open_count: p.secondary_value.unwrap_or(0),
            ratio: p.ratio.unwrap_or(0.0),
        }
    }
}

impl From<MetricPoint> for IssueHealthRow {
    fn from(p: MetricPoint) -> Self {
        Self {
            date: p.bucket_key,
            closed_count: p.value,
            open_count: p.secondary_value.unwrap_or(0),
            ratio: p.ratio.unwrap_or(0.0),
        }
    }
}

impl From<MetricPoint> for PackageDownloadsRow {
    fn from(p: MetricPoint) -> Self {
        Self {
            date: p.bucket_key,
            downloads: p.value,
        }
    }
}
