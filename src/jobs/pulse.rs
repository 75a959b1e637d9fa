use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::database_ops::catalog::{list_store_linked, update_live_fields};
use crate::jobs::{JobKind, JobReport, JobStatus, SyncContext};

/// Refresh online count and price for every store-linked entry.
///
/// The entry list is loaded once up front. Cancellation is checked before
/// each entry, and the storefront throttle is applied after each one.
#[instrument(skip(ctx, cancel), fields(job = "pulse"))]
pub async fn run_pulse(ctx: &SyncContext, cancel: &CancellationToken) -> JobReport {
    let mut report = JobReport::begin(JobKind::Pulse);
    let games = match list_store_linked(&ctx.db).await {
        Ok(games) => games,
        Err(err) => {
            error!(error = %format!("{err:#}"), "failed to load store-linked entries");
            return report.fail(&err);
        }
    };
    info!(entries = games.len(), "pulse started");

    let mut status = JobStatus::Completed;
    for game in &games {
        if cancel.is_cancelled() {
            info!(processed = report.processed, "pulse stopped on request");
            status = JobStatus::Cancelled;
            break;
        }
        let pulse = ctx.storefront.fetch_pulse(game.steam_app_id).await;
        report.processed += 1;
        match update_live_fields(&ctx.db, game.id, &pulse).await {
            Ok(()) => debug!(
                title = %game.title,
                online = pulse.current_online,
                price = ?pulse.price,
                "live fields updated"
            ),
            Err(err) => {
                warn!(title = %game.title, error = %format!("{err:#}"), "live field update failed");
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
        failed = report.failed(),
        "pulse finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::catalog::get_game;
    use crate::util::db::Db;
    use crate::database_ops::models::Pulse;
    use crate::database_ops::reconcile::Reconciler;
    use crate::test_support::{record, FakeCatalogSource, FakeStorefront};
    use std::sync::Arc;
    use std::time::Duration;

    async fn seeded(store: FakeStorefront) -> (SyncContext, Arc<FakeStorefront>, Vec<i64>) {
        let db = Db::connect_in_memory().await.unwrap();
        let store = Arc::new(store);
        let reconciler = Reconciler::new(db.clone(), store.clone());
        let mut ids = Vec::new();
        for (igdb_id, app_id) in [(1, Some(620)), (2, None), (3, Some(400))] {
            let mut rec = record(igdb_id, &format!("Game {igdb_id}"), &[]);
            rec.steam_app_id = app_id;
            ids.push(reconciler.reconcile(&rec).await.unwrap().game_id);
        }
        let ctx = SyncContext {
            db,
            catalog: Arc::new(FakeCatalogSource::default()),
            storefront: store.clone(),
            throttle: Duration::ZERO,
        };
        (ctx, store, ids)
    }

    #[tokio::test]
    async fn refreshes_only_store_linked_entries() {
        let store = FakeStorefront::default().with_pulse(
            620,
            Pulse {
                current_online: 31_000,
                price: Some(9.99),
            },
        );
        let (ctx, store, ids) = seeded(store).await;
        let report = run_pulse(&ctx, &CancellationToken::new()).await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.processed, 2);
        assert_eq!(store.pulse_calls(), vec![620, 400]);

        let portal2 = get_game(&ctx.db, ids[0]).await.unwrap().unwrap();
        assert_eq!(portal2.current_online, Some(31_000));
        assert_eq!(portal2.current_price, Some(9.99));

        let unlinked = get_game(&ctx.db, ids[1]).await.unwrap().unwrap();
        assert_eq!(unlinked.current_online, None);

        let portal = get_game(&ctx.db, ids[2]).await.unwrap().unwrap();
        assert_eq!(portal.current_online, Some(0));
        assert_eq!(portal.current_price, None);
    }

    #[tokio::test]
    async fn cancelled_before_first_entry() {
        let (ctx, store, _) = seeded(FakeStorefront::default()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run_pulse(&ctx, &cancel).await;
        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(report.processed, 0);
        assert!(store.pulse_calls().is_empty());
    }

    #[tokio::test]
    async fn stop_during_an_entry_halts_before_the_next() {
        let cancel = CancellationToken::new();
        let store = FakeStorefront::default()
            .with_pulse(
                620,
                Pulse {
                    current_online: 500,
                    price: None,
                },
            )
            .cancelling_on_pulse(620, cancel.clone());
        let (ctx, store, ids) = seeded(store).await;
        let report = run_pulse(&ctx, &cancel).await;

        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(report.processed, 1);
        assert_eq!(store.pulse_calls(), vec![620]);
        // The entry in flight is still written.
        let first = get_game(&ctx.db, ids[0]).await.unwrap().unwrap();
        assert_eq!(first.current_online, Some(500));
        let untouched = get_game(&ctx.db, ids[2]).await.unwrap().unwrap();
        assert_eq!(untouched.current_online, None);
    }
}
