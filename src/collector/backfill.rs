use chrono::SecondsFormat;
use serde::Serialize;

use crate::error::CollectError;
use crate::fetcher::{ClosedPr, MetricSource};
use crate::models::metric::PrClosure;
use crate::repository::MetricStore;

/// Full page size of the closed-PR listing; a shorter page is the last one.
const PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub pages: u32,
    pub inserted: u64,
    pub skipped: u64,
}

/// Walk closed PRs newest first and append closures not yet recorded.
///
/// Already-recorded PRs are left untouched. PRs without both timestamps, or
/// closed before they were opened, are skipped.
pub async fn backfill_pr_closures(
    store: &dyn MetricStore,
    source: &dyn MetricSource,
    repo: &str,
    token: Option<&str>,
    max_pages: u32,
) -> Result<BackfillSummary, CollectError> {
    let mut summary = BackfillSummary::default();

    for page in 1..=max_pages {
        let prs = source.fetch_closed_prs(repo, token, page).await?;
        if prs.is_empty() {
            break;
        }
        summary.pages += 1;
        let last_page = prs.len() < PAGE_SIZE;

        for pr in &prs {
            if store.closure_exists(repo, pr.number).await? {
                summary.skipped += 1;
                continue;
            }
            let Some(closure) = closure_for(repo, pr) else {
                tracing::debug!(pr = pr.number, "Skipping PR without a usable closure");
                summary.skipped += 1;
                continue;
            };
            if store.append_closure(&closure).await? {
                summary.inserted += 1;
            } else {
                summary.skipped += 1;
            }
        }

        tracing::info!(
            repo,
            page,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Backfilled closure page"
        );
        if last_page {
            break;
        }
    }

    Ok(summary)
}

fn closure_for(repo: &str, pr: &ClosedPr) -> Option<PrClosure> {
    let opened = pr.created_at?;
    let closed = pr.closed_at?;
    let seconds = (closed - opened).num_seconds();
    if seconds < 0 {
        return None;
    }
    let hours = seconds as f64 / 3600.0;
    Some(PrClosure {
        repo: repo.to_string(),
        pr_number: pr.number,
        opened_at: opened.to_rfc3339_opts(SecondsFormat::Secs, true),
        closed_at: closed.to_rfc3339_opts(SecondsFormat::Secs, true),
        duration_hours: (hours * 100.0).round() / 100.0,
    })
}
