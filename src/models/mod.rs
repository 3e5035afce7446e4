pub mod admin;
pub mod metric;
pub mod metrics;
pub mod series;
