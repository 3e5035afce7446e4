use serde::{Deserialize, Serialize};

use super::metric::MetricFamily;
use crate::collector::backfill::BackfillSummary;
use crate::collector::RunReport;

/// A point supplied by hand. The repository is always the tracked one.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualPoint {
    pub family: MetricFamily,
    pub bucket_key: String,
    pub value: i64,
    pub secondary_value: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LoadPointsRequest {
    pub points: Vec<ManualPoint>,
}

#[derive(Debug, Serialize)]
pub struct SkippedPoint {
    pub bucket_key: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct LoadPointsResponse {
    pub loaded: usize,
    pub skipped: Vec<SkippedPoint>,
}

#[derive(Debug, Serialize)]
pub struct CollectResponse {
    pub reports: Vec<RunReport>,
}

#[derive(Debug, Deserialize)]
pub struct BackfillQuery {
    pub max_pages: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BackfillResponse {
    #[serde(flatten)]
    pub summary: BackfillSummary,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub family: MetricFamily,
    pub deleted: u64,
}
