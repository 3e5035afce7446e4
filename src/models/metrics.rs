use serde::Serialize;

use super::metric::MetricFamily;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetrics {
    pub repo: String,
    pub families: Vec<FamilyMetrics>,
    pub pr_closures: i64,
    pub collected_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMetrics {
    pub family: MetricFamily,
    pub rows: i64,
    pub first_bucket: Option<String>,
    pub last_bucket: Option<String>,
}
