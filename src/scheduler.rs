use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::jobs::StartOutcome;
use crate::orchestrator::{JobRequest, Orchestrator};
use crate::util::env::{env_flag, env_parse};

/// Env: SCHEDULER_ENABLED (default on), SWEEP_INTERVAL_SECS (default 60),
/// PULSE_INTERVAL_SECS (default 3600)
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub sweep_every: Duration,
    pub pulse_every: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_every: Duration::from_secs(60),
            pulse_every: Duration::from_secs(3600),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("SCHEDULER_ENABLED", true),
            sweep_every: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 60u64).max(1)),
            pulse_every: Duration::from_secs(env_parse("PULSE_INTERVAL_SECS", 3600u64).max(1)),
        }
    }
}

/// Spawn the sweep and pulse timers. Both loops exit when `shutdown` fires.
pub fn spawn_scheduler(
    orch: Arc<Orchestrator>,
    cfg: SchedulerConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    if !cfg.enabled {
        info!("scheduler disabled");
        return Vec::new();
    }
    info!(
        sweep_secs = cfg.sweep_every.as_secs(),
        pulse_secs = cfg.pulse_every.as_secs(),
        "scheduler started"
    );

    let sweep = {
        let orch = Arc::clone(&orch);
        let shutdown = shutdown.clone();
        let mut tick = interval(cfg.sweep_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(err) = orch.sweep().await {
                            error!(error = %format!("{err:#}"), "availability sweep failed");
                        }
                    }
                }
            }
            debug!("sweep timer stopped");
        })
    };

    let pulse = {
        // First pulse fires one full period after startup.
        let mut tick = interval_at(Instant::now() + cfg.pulse_every, cfg.pulse_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        if orch.start(JobRequest::Pulse) == StartOutcome::AlreadyRunning {
                            debug!("pulse tick skipped, previous run still active");
                        }
                    }
                }
            }
            debug!("pulse timer stopped");
        })
    };

    vec![sweep, pulse]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::catalog::get_game;
    use crate::util::db::Db;
    use crate::database_ops::reconcile::Reconciler;
    use crate::jobs::{JobKind, SyncContext};
    use crate::test_support::{record, FakeCatalogSource, FakeStorefront};
    use chrono::Utc;

    #[tokio::test]
    async fn sweep_timer_promotes_and_stops_on_shutdown() {
        let db = Db::connect_in_memory().await.unwrap();
        let store = Arc::new(FakeStorefront::default());
        let reconciler = Reconciler::new(db.clone(), store.clone());
        let mut soon = record(1, "Soon", &[]);
        soon.release = Some(Utc::now() + chrono::Duration::milliseconds(50));
        let id = reconciler.reconcile(&soon).await.unwrap().game_id;

        let orch = Arc::new(Orchestrator::new(SyncContext {
            db: db.clone(),
            catalog: Arc::new(FakeCatalogSource::default()),
            storefront: store,
            throttle: Duration::ZERO,
        }));
        let shutdown = CancellationToken::new();
        let handles = spawn_scheduler(
            orch.clone(),
            SchedulerConfig {
                enabled: true,
                sweep_every: Duration::from_millis(20),
                pulse_every: Duration::from_secs(3600),
            },
            shutdown.clone(),
        );

        let mut promoted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if get_game(&db, id).await.unwrap().unwrap().is_available {
                promoted = true;
                break;
            }
        }
        assert!(promoted);
        assert!(!orch.is_running(JobKind::Pulse));

        shutdown.cancel();
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn disabled_scheduler_spawns_nothing() {
        let orch = Arc::new(Orchestrator::new(SyncContext {
            db: Db::connect_in_memory().await.unwrap(),
            catalog: Arc::new(FakeCatalogSource::default()),
            storefront: Arc::new(FakeStorefront::default()),
            throttle: Duration::ZERO,
        }));
        let cfg = SchedulerConfig {
            enabled: false,
            ..SchedulerConfig::default()
        };
        assert!(spawn_scheduler(orch, cfg, CancellationToken::new()).is_empty());
    }
}
