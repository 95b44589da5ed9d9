//! Live job state and the registry that tracks it.
//!
//! The registry owns one [`TrackedProcess`] per job. The job's own task holds
//! an `Arc` to it and is the only writer of its progress counters. Everything
//! else reads [`ImportProcess`] snapshots.
//!
//! Terminal processes expire after a retention window that depends on how
//! they ended. Expiry is checked lazily on every read and by a periodic
//! [`ProcessRegistry::sweep_expired`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Job lifecycle. Only `InProgress` may change, and only to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::InProgress => "IN_PROGRESS",
            ProcessState::Completed => "COMPLETED",
            ProcessState::Error => "ERROR",
            ProcessState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::InProgress)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a job's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProcess {
    pub id: String,
    pub total_records: u64,
    /// Rows of completed batches.
    pub processed_count: u64,
    /// Rows touched so far, updated per row.
    pub detailed_progress: u64,
    pub state: ProcessState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ImportProcess {
    /// `processed_count / total_records` as a percentage; 0 for an empty job.
    pub fn progress_percent(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.processed_count as f64 / self.total_records as f64 * 100.0
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TrackedProcess
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Lifecycle {
    state: ProcessState,
    finished_at: Option<DateTime<Utc>>,
    /// Monotonic finish time, used for expiry.
    finished_instant: Option<Instant>,
    error_message: Option<String>,
}

/// Shared, concurrently updated record of one job.
#[derive(Debug)]
pub struct TrackedProcess {
    id: String,
    total: u64,
    started_at: DateTime<Utc>,
    processed: AtomicU64,
    detailed: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
    cancel_token: CancellationToken,
}

impl TrackedProcess {
    fn new(id: String, total: u64) -> Self {
        Self {
            id,
            total,
            started_at: Utc::now(),
            processed: AtomicU64::new(0),
            detailed: AtomicU64::new(0),
            lifecycle: Mutex::new(Lifecycle {
                state: ProcessState::InProgress,
                finished_at: None,
                finished_instant: None,
                error_message: None,
            }),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn state(&self) -> ProcessState {
        self.lifecycle().state
    }

    /// Token cancelled when the job is cancelled; checked by the orchestrator.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Records that the row at zero-based `row_index` was touched.
    pub fn advance_row(&self, row_index: u64) {
        self.detailed.fetch_max(row_index + 1, Ordering::AcqRel);
    }

    /// Adds a finished batch to the coarse counter.
    pub fn advance_batch(&self, rows: u64) {
        self.processed.fetch_add(rows, Ordering::AcqRel);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Moves an in-progress job to `state`.
    ///
    /// Returns false, changing nothing, if the job is already terminal.
    pub fn try_finish(&self, state: ProcessState, error_message: Option<String>) -> bool {
        debug_assert!(state.is_terminal());
        let mut lifecycle = self.lifecycle();
        if lifecycle.state.is_terminal() {
            return false;
        }
        lifecycle.state = state;
        lifecycle.finished_at = Some(Utc::now());
        lifecycle.finished_instant = Some(Instant::now());
        lifecycle.error_message = error_message;
        true
    }

    /// Marks the job cancelled and signals its task. False if already terminal.
    pub fn cancel(&self) -> bool {
        let transitioned = self.try_finish(ProcessState::Cancelled, None);
        if transitioned {
            self.cancel_token.cancel();
        }
        transitioned
    }

    pub fn snapshot(&self) -> ImportProcess {
        let lifecycle = self.lifecycle();
        ImportProcess {
            id: self.id.clone(),
            total_records: self.total,
            processed_count: self.processed.load(Ordering::Acquire),
            detailed_progress: self.detailed.load(Ordering::Acquire),
            state: lifecycle.state,
            started_at: self.started_at,
            finished_at: lifecycle.finished_at,
            error_message: lifecycle.error_message.clone(),
        }
    }

    fn is_expired(&self, policy: &ExpiryPolicy, now: Instant) -> bool {
        let lifecycle = self.lifecycle();
        match lifecycle.finished_instant {
            Some(finished) => finished + policy.retention_for(lifecycle.state) <= now,
            None => false,
        }
    }

    // Counters stay consistent even if a holder panicked, so poisoning is ignored.
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// How long terminal processes stay visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// For COMPLETED and ERROR.
    pub retention: Duration,
    /// For CANCELLED.
    pub cancelled_retention: Duration,
}

impl ExpiryPolicy {
    fn retention_for(&self, state: ProcessState) -> Duration {
        match state {
            ProcessState::Cancelled => self.cancelled_retention,
            _ => self.retention,
        }
    }
}

/// Concurrent map of job id to live job state.
#[derive(Debug)]
pub struct ProcessRegistry {
    processes: RwLock<HashMap<String, Arc<TrackedProcess>>>,
    policy: ExpiryPolicy,
}

impl ProcessRegistry {
    pub fn new(policy: ExpiryPolicy) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Registers a new in-progress job.
    ///
    /// # Errors
    ///
    /// `AppError::DuplicateJob` if a live (unexpired) job already uses `id`.
    pub async fn create(&self, id: &str, total: u64) -> Result<Arc<TrackedProcess>, AppError> {
        let mut processes = self.processes.write().await;
        if let Some(existing) = processes.get(id) {
            if !existing.is_expired(&self.policy, Instant::now()) {
                return Err(AppError::DuplicateJob(id.to_string()));
            }
        }
        let process = Arc::new(TrackedProcess::new(id.to_string(), total));
        processes.insert(id.to_string(), process.clone());
        Ok(process)
    }

    /// Snapshot of `id`, or `None` if unknown or expired.
    pub async fn get(&self, id: &str) -> Option<ImportProcess> {
        let now = Instant::now();
        {
            let processes = self.processes.read().await;
            let process = processes.get(id)?;
            if !process.is_expired(&self.policy, now) {
                return Some(process.snapshot());
            }
        }
        self.remove_if_expired(id, now).await;
        None
    }

    /// Snapshot copies of every tracked, unexpired job.
    pub async fn list_active(&self) -> HashMap<String, ImportProcess> {
        let now = Instant::now();
        self.processes
            .read()
            .await
            .iter()
            .filter(|(_, process)| !process.is_expired(&self.policy, now))
            .map(|(id, process)| (id.clone(), process.snapshot()))
            .collect()
    }

    /// Cancels an in-progress job.
    ///
    /// Returns true only if the job was tracked and not yet terminal.
    pub async fn cancel(&self, id: &str) -> bool {
        let process = match self.processes.read().await.get(id) {
            Some(process) => process.clone(),
            None => return false,
        };
        let cancelled = process.cancel();
        if cancelled {
            debug!(job_id = %id, "process cancelled");
            self.remove_if_expired(id, Instant::now()).await;
        }
        cancelled
    }

    /// Drops every expired process. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut processes = self.processes.write().await;
        let before = processes.len();
        processes.retain(|_, process| !process.is_expired(&self.policy, now));
        before - processes.len()
    }

    /// Number of tracked entries, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.processes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processes.read().await.is_empty()
    }

    async fn remove_if_expired(&self, id: &str, now: Instant) {
        let mut processes = self.processes.write().await;
        // Re-check under the write lock: the id may have been re-created.
        if processes
            .get(id)
            .is_some_and(|process| process.is_expired(&self.policy, now))
        {
            processes.remove(id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(retention_secs: u64, cancelled_secs: u64) -> ProcessRegistry {
        ProcessRegistry::new(ExpiryPolicy {
            retention: Duration::from_secs(retention_secs),
            cancelled_retention: Duration::from_secs(cancelled_secs),
        })
    }

    #[tokio::test]
    async fn test_create_and_snapshot() {
        let registry = registry(600, 0);
        let process = registry.create("job-1", 10).await.unwrap();
        process.advance_row(0);
        process.advance_row(4);
        process.advance_row(2);
        process.advance_batch(5);

        let snapshot = registry.get("job-1").await.expect("tracked");
        assert_eq!(snapshot.state, ProcessState::InProgress);
        assert_eq!(snapshot.total_records, 10);
        assert_eq!(snapshot.processed_count, 5);
        assert_eq!(snapshot.detailed_progress, 5, "detailed progress never goes back");
        assert_eq!(snapshot.progress_percent(), 50.0);
        assert!(snapshot.finished_at.is_none());
    }

    #[tokio::test]
    async fn test_live_duplicate_id_rejected() {
        let registry = registry(600, 0);
        registry.create("job-1", 1).await.unwrap();
        assert!(matches!(
            registry.create("job-1", 1).await,
            Err(AppError::DuplicateJob(id)) if id == "job-1"
        ));
    }

    #[tokio::test]
    async fn test_terminal_state_never_changes() {
        let registry = registry(600, 0);
        let process = registry.create("job-1", 1).await.unwrap();
        assert!(process.try_finish(ProcessState::Completed, None));
        assert!(!process.try_finish(ProcessState::Error, Some("late".into())));
        assert!(!process.cancel());
        assert!(!registry.cancel("job-1").await);

        let snapshot = registry.get("job-1").await.unwrap();
        assert_eq!(snapshot.state, ProcessState::Completed);
        assert!(snapshot.error_message.is_none());
        assert!(!process.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_removes_immediately_by_default() {
        let registry = registry(600, 0);
        let process = registry.create("job-1", 100).await.unwrap();

        assert!(registry.cancel("job-1").await);
        assert!(process.is_cancelled());
        assert!(registry.get("job-1").await.is_none());
        assert!(registry.list_active().await.is_empty());
        assert_eq!(registry.len().await, 0);

        // The running task still holds the record; its updates go nowhere.
        process.advance_batch(50);
        assert!(!process.try_finish(ProcessState::Completed, None));
        assert!(registry.get("job-1").await.is_none());
        assert!(!registry.cancel("job-1").await);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = registry(600, 0);
        assert!(registry.get("missing").await.is_none());
        assert!(!registry.cancel("missing").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_process_expires_after_retention() {
        let registry = registry(600, 0);
        let process = registry.create("job-1", 1).await.unwrap();
        process.try_finish(ProcessState::Completed, None);

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(registry.get("job-1").await.is_some());
        assert_eq!(registry.list_active().await.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.get("job-1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_retention_is_configurable() {
        let registry = registry(600, 30);
        registry.create("job-1", 1).await.unwrap();
        assert!(registry.cancel("job-1").await);

        let snapshot = registry.get("job-1").await.expect("kept for 30s");
        assert_eq!(snapshot.state, ProcessState::Cancelled);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.get("job-1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let registry = registry(60, 0);
        let done = registry.create("done", 1).await.unwrap();
        let failed = registry.create("failed", 1).await.unwrap();
        registry.create("running", 1).await.unwrap();

        done.try_finish(ProcessState::Completed, None);
        tokio::time::advance(Duration::from_secs(30)).await;
        failed.try_finish(ProcessState::Error, Some("boom".into()));
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(registry.sweep_expired().await, 1);
        let active = registry.list_active().await;
        assert!(active.contains_key("failed"));
        assert!(active.contains_key("running"));
        assert_eq!(active["failed"].error_message.as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_id_can_be_reused() {
        let registry = registry(10, 0);
        let first = registry.create("job-1", 1).await.unwrap();
        first.try_finish(ProcessState::Completed, None);
        tokio::time::advance(Duration::from_secs(10)).await;

        let second = registry.create("job-1", 2).await.unwrap();
        assert_eq!(second.total(), 2);
        assert_eq!(registry.get("job-1").await.unwrap().state, ProcessState::InProgress);
    }

    #[test]
    fn test_state_serializes_upper_snake() {
        assert_eq!(
            serde_json::to_string(&ProcessState::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!(ProcessState::Cancelled.to_string(), "CANCELLED");
        assert!(ProcessState::Error.is_terminal());
    }
}
