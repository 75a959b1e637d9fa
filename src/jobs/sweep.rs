use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::database_ops::catalog::promote_released;
use crate::util::db::Db;

/// Promote every unavailable entry whose release moment has passed.
///
/// Stateless and idempotent; the second call in a row promotes nothing.
#[instrument(skip(db), fields(job = "sweep"))]
pub async fn run_sweep(db: &Db, now: DateTime<Utc>) -> Result<usize> {
    let promoted = promote_released(db, now).await?;
    for (id, title) in &promoted {
        info!(game_id = id, title = %title, "release reached, entry now available");
    }
    if !promoted.is_empty() {
        info!(count = promoted.len(), "availability sweep promoted entries");
    }
    Ok(promoted.len())
}
