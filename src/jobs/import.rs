use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::database_ops::models::ImportMode;
use crate::database_ops::reconcile::Reconciler;
use crate::jobs::{JobKind, JobReport, JobStatus, SyncContext};

pub const DEFAULT_IMPORT_TOTAL: usize = 500;
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportParams {
    pub total: usize,
    pub batch_size: usize,
    pub mode: ImportMode,
}

impl Default for ImportParams {
    fn default() -> Self {
        Self {
            total: DEFAULT_IMPORT_TOTAL,
            batch_size: DEFAULT_BATCH_SIZE,
            mode: ImportMode::default(),
        }
    }
}

/// Page through the catalog until `total` records were received, the
/// upstream runs dry, or `cancel` fires. Cancellation is only observed
/// between pages.
#[instrument(skip(ctx, cancel), fields(job = "import", mode = %params.mode))]
pub async fn run_import(
    ctx: &SyncContext,
    params: ImportParams,
    cancel: &CancellationToken,
) -> JobReport {
    let mut report = JobReport::begin(JobKind::Import);
    let page_cap = ctx.catalog.max_page_size().max(1);
    let batch_size = params.batch_size.clamp(1, page_cap);
    if batch_size < params.batch_size {
        warn!(
            requested = params.batch_size,
            batch_size,
            source = ctx.catalog.name(),
            "batch size above the upstream page limit, clamping"
        );
    }

    let token = match ctx.catalog.acquire_token().await {
        Ok(t) => t,
        Err(err) => {
            error!(source = ctx.catalog.name(), error = %format!("{err:#}"), "token acquisition failed");
            return report.fail(&err);
        }
    };
    let reconciler = Reconciler::new(ctx.db.clone(), ctx.storefront.clone());

    let mut offset = 0usize;
    let status = loop {
        if cancel.is_cancelled() {
            info!(offset, "import stopped on request");
            break JobStatus::Cancelled;
        }
        if offset >= params.total {
            break JobStatus::Completed;
        }
        let limit = batch_size.min(params.total - offset);
        let page = match ctx
            .catalog
            .fetch_page(&token, params.mode, limit, offset)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                warn!(offset, limit, error = %format!("{err:#}"), "page request failed, ending import");
                break JobStatus::Completed;
            }
        };
        if page.is_empty() {
            info!(offset, "upstream returned an empty page");
            break JobStatus::Completed;
        }
        info!(offset, limit, received = page.len(), "processing page");

        for record in &page {
            report.processed += 1;
            match reconciler.reconcile(record).await {
                Ok(outcome) if outcome.created => report.created += 1,
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    warn!(title = %record.name, igdb_id = ?record.igdb_id, error = %format!("{err:#}"), "record failed");
                    report.record_failure(&record.name, &err);
                }
            }
        }

        offset += page.len();
        if page.len() < limit {
            break JobStatus::Completed;
        }
    };

    let report = report.finish(status);
    info!(
        status = ?report.status,
        processed = report.processed,
        created = report.created,
        skipped = report.skipped,
        failed = report.failed(),
        "import finished"
    );
    report
}
