//! Sync jobs and the per-kind run state that keeps each of them single-instance.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::util::db::Db;
use crate::database_ops::sources::{CatalogSource, Storefront};

pub mod import;
pub mod pulse;
pub mod sweep;
pub mod tags;

/// Jobs that hold run state. The sweeper is stateless and absent here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Import,
    TagSync,
    Pulse,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Import, JobKind::TagSync, JobKind::Pulse];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::TagSync => "tag-sync",
            JobKind::Pulse => "pulse",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Result of asking for a job to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Scheduled,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub title: String,
    pub error: String,
}

/// Summary of one finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub kind: JobKind,
    pub status: JobStatus,
    pub processed: usize,
    pub created: usize,
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn begin(kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            kind,
            status: JobStatus::Completed,
            processed: 0,
            created: 0,
            skipped: 0,
            failures: Vec::new(),
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn record_failure(&mut self, title: &str, err: &anyhow::Error) {
        self.failures.push(RecordFailure {
            title: title.to_string(),
            error: format!("{err:#}"),
        });
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn finish(mut self, status: JobStatus) -> Self {
        self.status = status;
        self.finished_at = Utc::now();
        self
    }

    pub fn fail(mut self, err: &anyhow::Error) -> Self {
        self.error = Some(format!("{err:#}"));
        self.finish(JobStatus::Failed)
    }
}

#[derive(Debug, Default)]
struct RunSlot {
    cancel: Option<CancellationToken>,
    started_at: Option<DateTime<Utc>>,
    last: Option<JobReport>,
}

/// Running flag, cancellation token and last report for one job kind.
#[derive(Debug)]
pub struct RunState {
    kind: JobKind,
    slot: Mutex<RunSlot>,
}

/// Point-in-time view of a [`RunState`].
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub kind: JobKind,
    pub running: bool,
    pub stop_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_run: Option<JobReport>,
}

impl RunState {
    pub fn new(kind: JobKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            slot: Mutex::new(RunSlot::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RunSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check-and-set under one lock. `None` means a run is already active and
    /// nothing changed.
    pub fn try_start(self: &Arc<Self>) -> Option<RunGuard> {
        let mut slot = self.lock();
        if slot.cancel.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        slot.cancel = Some(token.clone());
        slot.started_at = Some(Utc::now());
        Some(RunGuard {
            state: Arc::clone(self),
            token,
        })
    }

    /// Ask the active run to stop at its next checkpoint. Returns whether a
    /// run was active.
    pub fn stop(&self) -> bool {
        match &self.lock().cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().cancel.is_some()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let slot = self.lock();
        JobSnapshot {
            kind: self.kind,
            running: slot.cancel.is_some(),
            stop_requested: slot.cancel.as_ref().is_some_and(|t| t.is_cancelled()),
            started_at: slot.started_at,
            last_run: slot.last.clone(),
        }
    }
}

/// Held for the lifetime of a run; dropping it releases the running flag on
/// every exit path, panics included.
#[derive(Debug)]
pub struct RunGuard {
    state: Arc<RunState>,
    token: CancellationToken,
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn record(&self, report: JobReport) {
        self.state.lock().last = Some(report);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut slot = self.state.lock();
        slot.cancel = None;
        slot.started_at = None;
    }
}

/// One [`RunState`] per job kind.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    import: Arc<RunState>,
    tag_sync: Arc<RunState>,
    pulse: Arc<RunState>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self {
            import: RunState::new(JobKind::Import),
            tag_sync: RunState::new(JobKind::TagSync),
            pulse: RunState::new(JobKind::Pulse),
        }
    }
}

impl JobRegistry {
    pub fn get(&self, kind: JobKind) -> &Arc<RunState> {
        match kind {
            JobKind::Import => &self.import,
            JobKind::TagSync => &self.tag_sync,
            JobKind::Pulse => &self.pulse,
        }
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        JobKind::ALL.iter().map(|k| self.get(*k).snapshot()).collect()
    }
}

/// Dependencies shared by every job loop.
#[derive(Clone)]
pub struct SyncContext {
    pub db: Db,
    pub catalog: Arc<dyn CatalogSource>,
    pub storefront: Arc<dyn Storefront>,
    /// Pause between storefront calls in the per-entry jobs.
    pub throttle: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_start_is_exclusive_until_guard_drops() {
        let state = RunState::new(JobKind::Import);
        let guard = state.try_start().expect("first start");
        assert!(state.try_start().is_none());
        assert!(state.is_running());
        drop(guard);
        assert!(!state.is_running());
        assert!(state.try_start().is_some());
    }

    #[test]
    fn stop_cancels_only_the_active_run() {
        let state = RunState::new(JobKind::Pulse);
        assert!(!state.stop());
        let guard = state.try_start().unwrap();
        assert!(state.stop());
        assert!(guard.token().is_cancelled());
        assert!(state.snapshot().stop_requested);
        drop(guard);

        let next = state.try_start().unwrap();
        assert!(!next.token().is_cancelled());
    }

    #[test]
    fn flag_is_released_when_the_run_panics() {
        let state = RunState::new(JobKind::TagSync);
        let cloned = Arc::clone(&state);
        let result = std::thread::spawn(move || {
            let _guard = cloned.try_start().unwrap();
            panic!("job blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(!state.is_running());
    }

    #[test]
    fn last_report_survives_the_guard() {
        let state = RunState::new(JobKind::Import);
        let guard = state.try_start().unwrap();
        let mut report = JobReport::begin(JobKind::Import);
        report.processed = 4;
        report.record_failure("Broken", &anyhow::anyhow!("boom"));
        guard.record(report.finish(JobStatus::Completed));
        drop(guard);

        let snap = state.snapshot();
        assert!(!snap.running);
        let last = snap.last_run.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.failed(), 1);
        assert_eq!(last.failures[0].title, "Broken");
    }
}
