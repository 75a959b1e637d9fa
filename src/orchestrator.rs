use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::util::db::Db;
use crate::database_ops::igdb::client::IgdbService;
use crate::database_ops::steam::provider::{SteamConfig, SteamProvider};
use crate::jobs::import::{run_import, ImportParams};
use crate::jobs::pulse::run_pulse;
use crate::jobs::sweep::run_sweep;
use crate::jobs::tags::run_tag_sync;
use crate::jobs::{JobKind, JobRegistry, JobReport, JobSnapshot, StartOutcome, SyncContext};

/// A job run the orchestrator can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRequest {
    Import(ImportParams),
    TagSync,
    Pulse,
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Import(_) => JobKind::Import,
            JobRequest::TagSync => JobKind::TagSync,
            JobRequest::Pulse => JobKind::Pulse,
        }
    }
}

/// Owns the job run states and launches job loops as background tasks.
pub struct Orchestrator {
    ctx: SyncContext,
    jobs: JobRegistry,
}

impl Orchestrator {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            jobs: JobRegistry::default(),
        }
    }

    /// Wire the live IGDB and Steam adapters from the environment.
    pub fn from_env(db: Db) -> Result<Self> {
        let steam_cfg = SteamConfig::from_env();
        let throttle = steam_cfg.throttle();
        let ctx = SyncContext {
            db,
            catalog: Arc::new(IgdbService::new_from_env()?),
            storefront: Arc::new(SteamProvider::new(steam_cfg)?),
            throttle,
        };
        Ok(Self::new(ctx))
    }

    pub fn db(&self) -> &Db {
        &self.ctx.db
    }

    /// Start `req` on its own task unless a run of the same kind is active.
    ///
    /// The run-state check happens before this returns, so a second call
    /// observes the first run even if its task has not been polled yet.
    pub fn launch(&self, req: JobRequest) -> Option<JoinHandle<JobReport>> {
        let kind = req.kind();
        let Some(guard) = self.jobs.get(kind).try_start() else {
            info!(job = %kind, "start ignored, job already running");
            return None;
        };
        info!(job = %kind, "job scheduled");
        let ctx = self.ctx.clone();
        Some(tokio::spawn(async move {
            let report = match req {
                JobRequest::Import(params) => run_import(&ctx, params, guard.token()).await,
                JobRequest::TagSync => run_tag_sync(&ctx, guard.token()).await,
                JobRequest::Pulse => run_pulse(&ctx, guard.token()).await,
            };
            guard.record(report.clone());
            report
        }))
    }

    pub fn start(&self, req: JobRequest) -> StartOutcome {
        match self.launch(req) {
            Some(_) => StartOutcome::Scheduled,
            None => StartOutcome::AlreadyRunning,
        }
    }

    /// Request a cooperative stop. Returns false when nothing was running.
    pub fn stop(&self, kind: JobKind) -> bool {
        let stopped = self.jobs.get(kind).stop();
        if stopped {
            info!(job = %kind, "stop requested");
        }
        stopped
    }

    pub async fn sweep(&self) -> Result<usize> {
        run_sweep(&self.ctx.db, Utc::now()).await
    }

    pub fn status(&self) -> Vec<JobSnapshot> {
        self.jobs.snapshots()
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.jobs.get(kind).is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::models::ImportMode;
    use crate::jobs::JobStatus;
    use crate::test_support::{record, FakeCatalogSource, FakeStorefront};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn orchestrator(catalog: FakeCatalogSource) -> Orchestrator {
        Orchestrator::new(SyncContext {
            db: Db::connect_in_memory().await.unwrap(),
            catalog: Arc::new(catalog),
            storefront: Arc::new(FakeStorefront::default()),
            throttle: Duration::ZERO,
        })
    }

    fn import(total: usize, batch_size: usize) -> JobRequest {
        JobRequest::Import(ImportParams {
            total,
            batch_size,
            mode: ImportMode::TopRated,
        })
    }

    #[tokio::test]
    async fn second_start_reports_already_running() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(
            FakeCatalogSource::default()
                .with_page(vec![record(1, "A", &[])])
                .gated(gate.clone()),
        )
        .await;

        let handle = orch.launch(import(10, 5)).expect("first run starts");
        assert_eq!(orch.start(import(10, 5)), StartOutcome::AlreadyRunning);
        assert!(orch.is_running(JobKind::Import));
        // Other kinds are independent.
        assert!(!orch.is_running(JobKind::Pulse));

        gate.add_permits(10);
        let report = handle.await.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert!(!orch.is_running(JobKind::Import));
    }

    #[tokio::test]
    async fn stop_mid_import_cancels_and_clears_flag() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(
            FakeCatalogSource::default()
                .with_page(vec![record(1, "A", &[]), record(2, "B", &[])])
                .with_page(vec![record(3, "C", &[]), record(4, "D", &[])])
                .gated(gate.clone()),
        )
        .await;

        let handle = orch.launch(import(10, 2)).unwrap();
        assert!(orch.stop(JobKind::Import));
        gate.add_permits(10);
        let report = handle.await.unwrap();

        assert_eq!(report.status, JobStatus::Cancelled);
        assert!(!orch.is_running(JobKind::Import));
        let snap = orch
            .status()
            .into_iter()
            .find(|s| s.kind == JobKind::Import)
            .unwrap();
        assert_eq!(snap.last_run.unwrap().status, JobStatus::Cancelled);
        assert!(!orch.stop(JobKind::Import));
    }

    #[tokio::test]
    async fn token_failure_marks_run_failed() {
        let orch = orchestrator(FakeCatalogSource::default().with_token_error("bad secret")).await;
        let report = orch.launch(import(10, 2)).unwrap().await.unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert!(!orch.is_running(JobKind::Import));
        assert_eq!(orch.start(import(10, 2)), StartOutcome::Scheduled);
    }
}
