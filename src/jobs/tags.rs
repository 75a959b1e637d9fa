use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::database_ops::catalog::list_store_linked;
use crate::database_ops::reconcile::Reconciler;
use crate::jobs::{JobKind, JobReport, JobStatus, SyncContext};

/// Pull storefront genres for every store-linked entry and link them as
/// catalog genres. Existing links and an existing primary are kept.
#[instrument(skip(ctx, cancel), fields(job = "tag-sync"))]
pub async fn run_tag_sync(ctx: &SyncContext, cancel: &CancellationToken) -> JobReport {
    let mut report = JobReport::begin(JobKind::TagSync);
    let games = match list_store_linked(&ctx.db).await {
        Ok(games) => games,
        Err(err) => {
            error!(error = %format!("{err:#}"), "failed to load store-linked entries");
            return report.fail(&err);
        }
    };
    info!(entries = games.len(), "tag sync started");
    let reconciler = Reconciler::new(ctx.db.clone(), ctx.storefront.clone());

    let mut status = JobStatus::Completed;
    for game in &games {
        if cancel.is_cancelled() {
            info!(processed = report.processed, "tag sync stopped on request");
            status = JobStatus::Cancelled;
            break;
        }
        report.processed += 1;
        let outcome = match ctx.storefront.fetch_tags(game.steam_app_id).await {
            Ok(tags) => reconciler.attach_tags(game.id, &tags).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(0) => report.skipped += 1,
            Ok(linked) => {
                debug!(title = %game.title, linked, "tags linked");
                report.created += linked;
            }
            Err(err) => {
                warn!(title = %game.title, app_id = game.steam_app_id, error = %format!("{err:#}"), "tag sync failed for entry");
                report.record_failure(&game.title, &err);
            }
        }
        if !ctx.throttle.is_zero() {
            tokio::time::sleep(ctx.throttle).await;
        }
    }

    let report = report.finish(status);
    info!(
        status = ?report.status,
        processed = report.processed,
        linked = report.created,
        failed = report.failed(),
        "tag sync finished"
    );
    report
}
