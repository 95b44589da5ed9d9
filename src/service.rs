//! Public entry point of the import pipeline.
//!
//! `ImportService` owns the process registry, the worker pool and the expiry
//! sweeper. Submissions return immediately with an [`ImportHandle`]; the job
//! runs on a tracked background task and callers poll its status by id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::error::AppError;
use crate::extract::{self, ExtractedFile, RowRecord};
use crate::import::{
    BatchOrchestrator, ExpiryPolicy, ImportJob, ImportProcess, ImportResult, ImportScheduler,
    ProcessRegistry,
};
use crate::processor::ProcessorRegistry;
use crate::validation::{self, StructureReport};

// ─────────────────────────────────────────────────────────────────────────────
// ImportHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Returned by [`ImportService::submit_import`] before the job has run.
#[derive(Debug)]
pub struct ImportHandle {
    pub job_id: String,
    task: JoinHandle<ImportResult>,
}

impl ImportHandle {
    /// Waits for the job to reach a terminal state and returns its result.
    pub async fn result(self) -> Result<ImportResult, AppError> {
        self.task
            .await
            .map_err(|e| AppError::Internal(format!("Import task failed: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ImportService
// ─────────────────────────────────────────────────────────────────────────────

pub struct ImportService {
    config: ImportConfig,
    orchestrator: Arc<BatchOrchestrator>,
    processes: Arc<ProcessRegistry>,
    scheduler: ImportScheduler,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl ImportService {
    /// Builds the service and starts its expiry sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `config` does not validate.
    pub fn new(config: ImportConfig, processors: ProcessorRegistry) -> Result<Self, AppError> {
        config.validate()?;

        let processes = Arc::new(ProcessRegistry::new(ExpiryPolicy {
            retention: config.retention(),
            cancelled_retention: config.cancelled_retention(),
        }));
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        tracker.spawn(sweep_expired(
            processes.clone(),
            config.sweep_interval(),
            shutdown.clone(),
        ));

        info!(
            "[IMPORT-SERVICE] Ready: batch size {}, {} concurrent jobs, types {}",
            config.batch_size,
            config.max_concurrent_jobs,
            processors.supported_types().join(", ")
        );

        Ok(Self {
            orchestrator: Arc::new(BatchOrchestrator::new(processors, &config)),
            scheduler: ImportScheduler::new(config.max_concurrent_jobs),
            config,
            processes,
            tracker,
            shutdown,
        })
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.orchestrator.processors().supported_types()
    }

    // ── Request-path checks ─────────────────────────────────────────────────

    /// Structural pre-check of an upload for `entity_type`.
    pub fn validate_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        entity_type: &str,
    ) -> Result<StructureReport, AppError> {
        validation::validate_upload(file_name, bytes, entity_type, &self.config)
    }

    /// First `preview_rows` rows of an upload.
    pub fn preview(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedFile, AppError> {
        extract::check_upload(file_name, bytes.len() as u64, self.config.max_file_bytes)?;
        extract::preview_rows(file_name, bytes, self.config.preview_rows)
    }

    /// Checks the upload basics and extracts every data row.
    pub fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedFile, AppError> {
        extract::check_upload(file_name, bytes.len() as u64, self.config.max_file_bytes)?;
        extract::extract_rows(file_name, bytes)
    }

    // ── Jobs ────────────────────────────────────────────────────────────────

    /// Registers a job and schedules it. Returns without waiting for it to run.
    ///
    /// A missing or blank `job_id` gets a fresh UUID.
    ///
    /// # Errors
    ///
    /// - `AppError::ShuttingDown` after [`shutdown`](Self::shutdown)
    /// - `AppError::NoDataRows` for an empty row set
    /// - `AppError::TooManyRecords` above the entity's record limit
    /// - `AppError::DuplicateJob` if `job_id` is still tracked
    pub async fn submit_import(
        &self,
        entity_type: &str,
        rows: Vec<RowRecord>,
        file_name: &str,
        job_id: Option<String>,
    ) -> Result<ImportHandle, AppError> {
        // Keeps `shutdown()` waiting until this submission has either been
        // rejected or spawned onto the tracker.
        let _in_flight = self.tracker.token();
        if self.shutdown.is_cancelled() {
            return Err(AppError::ShuttingDown);
        }
        if rows.is_empty() {
            return Err(AppError::NoDataRows);
        }
        if let Some(rules) = self.config.rules_for(entity_type) {
            if rows.len() > rules.max_records {
                return Err(AppError::TooManyRecords {
                    entity_type: entity_type.trim().to_string(),
                    count: rows.len(),
                    max: rules.max_records,
                });
            }
        }

        let job_id = job_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let process = self.processes.create(&job_id, rows.len() as u64).await?;

        debug!(
            job_id = %job_id,
            entity_type = %entity_type,
            rows = rows.len(),
            "[IMPORT-SERVICE] Job submitted"
        );

        let job = ImportJob {
            job_id: job_id.clone(),
            entity_type: entity_type.trim().to_string(),
            file_name: file_name.to_string(),
            rows,
        };
        let orchestrator = self.orchestrator.clone();
        let scheduler = self.scheduler.clone();

        let task = self.tracker.spawn(async move {
            let cancelled = process.cancel_token().clone();
            tokio::select! {
                _permit = scheduler.acquire() => orchestrator.run(job, process).await,
                // Cancelled while queued: no row will run, so no slot is taken.
                _ = cancelled.cancelled() => orchestrator.run(job, process).await,
            }
        });

        Ok(ImportHandle { job_id, task })
    }

    pub async fn get_process_status(&self, job_id: &str) -> Option<ImportProcess> {
        self.processes.get(job_id).await
    }

    /// Snapshot of every tracked job, keyed by id.
    pub async fn list_active_processes(&self) -> HashMap<String, ImportProcess> {
        self.processes.list_active().await
    }

    /// Cancels a running or queued job. False if unknown or already finished.
    pub async fn cancel_process(&self, job_id: &str) -> bool {
        let cancelled = self.processes.cancel(job_id).await;
        if cancelled {
            info!("[IMPORT-SERVICE] Cancellation requested for job {}", job_id);
        }
        cancelled
    }

    /// Jobs currently holding a worker slot.
    pub fn running_jobs(&self) -> usize {
        self.scheduler.active_jobs()
    }

    /// Stops accepting jobs, stops the sweeper and waits for queued and
    /// running jobs to finish.
    pub async fn shutdown(&self) {
        info!("[IMPORT-SERVICE] Shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("[IMPORT-SERVICE] All jobs finished");
    }
}

async fn sweep_expired(
    processes: Arc<ProcessRegistry>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = processes.sweep_expired().await;
                if removed > 0 {
                    debug!(removed, "[IMPORT-SERVICE] Swept expired processes");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
