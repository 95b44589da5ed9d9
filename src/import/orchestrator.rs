//! Batch execution of one import job.
//!
//! Rows are split into fixed-size batches and processed strictly in file
//! order, one batch after another. Row-level problems are tallied and never
//! stop the job. A job-fatal error, or a panic inside a batch, stops the job
//! but keeps everything tallied so far.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::process::{ProcessState, TrackedProcess};
use super::result::{BatchTally, ImportResult};
use crate::config::ImportConfig;
use crate::error::AppError;
use crate::extract::RowRecord;
use crate::processor::{ProcessorRegistry, RowOutcome, RowProcessor, SavePolicy};

/// Everything needed to run one submitted import.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub job_id: String,
    pub entity_type: String,
    pub file_name: String,
    pub rows: Vec<RowRecord>,
}

/// How the batch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed { batches: usize },
    Cancelled,
}

/// Drives entity processors over a job's rows, batch by batch.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    processors: ProcessorRegistry,
    batch_size: usize,
    save_policy: SavePolicy,
}

impl BatchOrchestrator {
    pub fn new(processors: ProcessorRegistry, config: &ImportConfig) -> Self {
        Self {
            processors,
            batch_size: config.batch_size.max(1),
            save_policy: SavePolicy {
                attempts: config.save_attempts.max(1),
                backoff: config.retry_backoff(),
            },
        }
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Runs `job` against its already registered `process` and moves the
    /// process to its terminal state.
    ///
    /// Always yields a result: a cancelled or failed job returns what it had
    /// aggregated up to that point.
    pub async fn run(&self, job: ImportJob, process: Arc<TrackedProcess>) -> ImportResult {
        let started = Instant::now();
        let total = job.rows.len();
        let mut result = ImportResult::new(&job.job_id, &job.entity_type, &job.file_name);

        info!(
            job_id = %job.job_id,
            entity_type = %job.entity_type,
            "[IMPORT-ORCHESTRATOR] Starting job {} with {} rows from {}",
            job.job_id,
            total,
            job.file_name
        );

        match self.run_batches(&job, &process, &mut result).await {
            Ok(RunEnd::Completed { batches }) => {
                if process.try_finish(ProcessState::Completed, None) {
                    result
                        .info_messages
                        .push(format!("Processed {} rows in {} batches", total, batches));
                } else {
                    // Cancelled after the last row was handled.
                    push_cancelled(&mut result, total);
                }
            }
            Ok(RunEnd::Cancelled) => {
                push_cancelled(&mut result, total);
                info!(
                    job_id = %job.job_id,
                    "[IMPORT-ORCHESTRATOR] Job {} cancelled after {} of {} rows",
                    job.job_id,
                    rows_handled(&result),
                    total
                );
            }
            Err(e) => fail(&job, &process, &mut result, e),
        }

        result.finalize(started.elapsed().as_millis() as u64);

        info!(
            job_id = %job.job_id,
            state = %process.state(),
            "[IMPORT-ORCHESTRATOR] Job {} finished: {}",
            job.job_id,
            result.summary()
        );

        result
    }

    async fn run_batches(
        &self,
        job: &ImportJob,
        process: &TrackedProcess,
        result: &mut ImportResult,
    ) -> Result<RunEnd, AppError> {
        let processor = self.processors.resolve(&job.entity_type)?;
        let mut batches = 0;

        for (batch_index, batch) in job.rows.chunks(self.batch_size).enumerate() {
            if process.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            let offset = batch_index * self.batch_size;
            let mut tally = BatchTally::default();

            let run = AssertUnwindSafe(self.run_batch(
                processor.as_ref(),
                batch,
                offset,
                process,
                &mut tally,
            ))
            .catch_unwind()
            .await;

            process.advance_batch(tally.rows());
            result.merge(tally);
            batches += 1;

            debug!(
                job_id = %job.job_id,
                batch = batch_index + 1,
                processed = process.processed(),
                total = process.total(),
                "[IMPORT-ORCHESTRATOR] Batch {} done",
                batch_index + 1
            );

            match run {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return Ok(RunEnd::Cancelled),
                Ok(Err(e)) => return Err(e),
                Err(panic) => {
                    return Err(AppError::Internal(format!(
                        "batch {} panicked: {}",
                        batch_index + 1,
                        panic_message(panic.as_ref())
                    )))
                }
            }
        }

        Ok(RunEnd::Completed { batches })
    }

    /// Processes one batch into `tally`. Returns false if cancelled part-way.
    async fn run_batch(
        &self,
        processor: &dyn RowProcessor,
        batch: &[RowRecord],
        offset: usize,
        process: &TrackedProcess,
        tally: &mut BatchTally,
    ) -> Result<bool, AppError> {
        for (index, row) in batch.iter().enumerate() {
            if process.is_cancelled() {
                return Ok(false);
            }

            // Row 1 is the header.
            let row_number = offset + index + 2;
            let outcome = processor
                .process_row(row, row_number, self.save_policy)
                .await?;
            record_outcome(tally, row_number, outcome);
            process.advance_row((offset + index) as u64);
        }
        Ok(true)
    }
}

fn record_outcome(tally: &mut BatchTally, row_number: usize, outcome: RowOutcome) {
    let prefixed = |messages: Vec<String>| {
        messages
            .into_iter()
            .map(move |m| format!("Row {}: {}", row_number, m))
    };

    match outcome {
        RowOutcome::Saved { warnings } => {
            tally.succeeded += 1;
            tally.warnings.extend(prefixed(warnings));
        }
        RowOutcome::Duplicate { warnings } => {
            tally.skipped += 1;
            tally.warnings.extend(prefixed(warnings));
            tally
                .warnings
                .push(format!("Row {}: Duplicate record, skipped", row_number));
        }
        RowOutcome::Invalid { errors, warnings } => {
            tally.failed += 1;
            tally.errors.extend(prefixed(errors));
            tally.warnings.extend(prefixed(warnings));
        }
        RowOutcome::Failed { error, warnings } => {
            tally.failed += 1;
            tally
                .errors
                .push(format!("Row {}: {}", row_number, error.safe_message()));
            tally.warnings.extend(prefixed(warnings));
        }
    }
}

fn fail(job: &ImportJob, process: &TrackedProcess, result: &mut ImportResult, error: AppError) {
    let message = error.safe_message();
    error!(
        job_id = %job.job_id,
        entity_type = %job.entity_type,
        "[IMPORT-ORCHESTRATOR] Job {} failed: {}",
        job.job_id,
        message
    );
    result
        .errors
        .push(format!("General processing error: {}", message));
    process.try_finish(ProcessState::Error, Some(message));
}

fn rows_handled(result: &ImportResult) -> u64 {
    result.succeeded + result.failed + result.skipped
}

fn push_cancelled(result: &mut ImportResult, total: usize) {
    let handled = rows_handled(result);
    result
        .info_messages
        .push(format!("Import cancelled after {} of {} rows", handled, total));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::import::process::{ExpiryPolicy, ProcessRegistry};
    use crate::model::{Client, Product, User};
    use crate::repository::{BoxFuture, EntityRepository, InMemoryRepository};

    /// Product store that misbehaves on one specific code.
    struct TrapRepository {
        trap: &'static str,
        kind: Trap,
        saves: AtomicUsize,
    }

    enum Trap {
        Internal,
        Panic,
    }

    impl EntityRepository<Product> for TrapRepository {
        fn exists_by_key<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<bool, AppError>> {
            Box::pin(async { Ok(false) })
        }

        fn save<'a>(&'a self, product: &'a Product) -> BoxFuture<'a, Result<(), AppError>> {
            Box::pin(async move {
                if product.codigo == self.trap {
                    match self.kind {
                        Trap::Internal => {
                            return Err(AppError::Internal("connection pool gone".into()))
                        }
                        Trap::Panic => panic!("store exploded"),
                    }
                }
                self.saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn registry_with(products: Arc<dyn EntityRepository<Product>>) -> ProcessorRegistry {
        ProcessorRegistry::builtin(
            Arc::new(InMemoryRepository::<Client>::new()),
            products,
            Arc::new(InMemoryRepository::<User>::new()),
        )
    }

    fn config(batch_size: usize) -> ImportConfig {
        ImportConfig {
            batch_size,
            ..ImportConfig::default()
        }
    }

    fn product_rows(count: usize) -> Vec<RowRecord> {
        (0..count)
            .map(|i| {
                RowRecord::from_pairs([
                    ("codigo", format!("P{:04}", i)),
                    ("nombre", format!("Item {}", i)),
                    ("precio", "10".to_string()),
                ])
            })
            .collect()
    }

    fn job(entity_type: &str, rows: Vec<RowRecord>) -> ImportJob {
        ImportJob {
            job_id: "job-1".into(),
            entity_type: entity_type.into(),
            file_name: "upload.csv".into(),
            rows,
        }
    }

    fn processes() -> ProcessRegistry {
        ProcessRegistry::new(ExpiryPolicy {
            retention: Duration::from_secs(600),
            cancelled_retention: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_completes_and_numbers_rows_across_batches() {
        let orchestrator =
            BatchOrchestrator::new(registry_with(Arc::new(InMemoryRepository::<Product>::new())), &config(2));
        let mut rows = product_rows(5);
        rows[3] = RowRecord::from_pairs([("codigo", "P0003"), ("nombre", "x"), ("precio", "-1")]);

        let processes = processes();
        let process = processes.create("job-1", 5).await.unwrap();
        let result = orchestrator.run(job("producto", rows), process.clone()).await;

        assert_eq!((result.succeeded, result.failed, result.skipped), (4, 1, 0));
        // Fourth data row sits in the second batch: offset 2 + index 1 + 2.
        assert_eq!(result.errors, vec!["Row 5: Price must be greater than zero"]);
        assert_eq!(result.info_messages, vec!["Processed 5 rows in 3 batches"]);

        let snapshot = processes.get("job-1").await.unwrap();
        assert_eq!(snapshot.state, ProcessState::Completed);
        assert_eq!(snapshot.processed_count, 5);
        assert_eq!(snapshot.detailed_progress, 5);
    }

    #[tokio::test]
    async fn test_duplicates_are_skipped_with_warning() {
        let products = Arc::new(InMemoryRepository::<Product>::with_existing(["P0001"]));
        let orchestrator = BatchOrchestrator::new(registry_with(products.clone()), &config(10));
        let mut rows = product_rows(3);
        rows.push(RowRecord::from_pairs([("codigo", "p0000"), ("nombre", "again"), ("precio", "5")]));

        let processes = processes();
        let process = processes.create("job-1", 4).await.unwrap();
        let result = orchestrator.run(job("producto", rows), process).await;

        assert_eq!((result.succeeded, result.failed, result.skipped), (2, 0, 2));
        assert_eq!(
            result.warnings,
            vec!["Row 3: Duplicate record, skipped", "Row 5: Duplicate record, skipped"]
        );
        assert_eq!(products.saved_keys().await, vec!["P0001", "P0000", "P0002"]);
    }

    #[tokio::test]
    async fn test_unknown_entity_type_is_fatal() {
        let orchestrator =
            BatchOrchestrator::new(registry_with(Arc::new(InMemoryRepository::<Product>::new())), &config(10));
        let processes = processes();
        let process = processes.create("job-1", 3).await.unwrap();
        let result = orchestrator.run(job("pedido", product_rows(3)), process).await;

        assert_eq!(result.processed, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("General processing error: No processor for entity type 'pedido'"));

        let snapshot = processes.get("job-1").await.unwrap();
        assert_eq!(snapshot.state, ProcessState::Error);
        assert!(snapshot.error_message.is_some());
    }

    #[tokio::test]
    async fn test_internal_repository_error_keeps_partial_result() {
        let repo = Arc::new(TrapRepository {
            trap: "P0003",
            kind: Trap::Internal,
            saves: AtomicUsize::new(0),
        });
        let orchestrator = BatchOrchestrator::new(registry_with(repo.clone()), &config(2));
        let processes = processes();
        let process = processes.create("job-1", 6).await.unwrap();
        let result = orchestrator.run(job("producto", product_rows(6)), process).await;

        assert_eq!(result.succeeded, 3);
        assert_eq!(repo.saves.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.errors,
            vec!["General processing error: Internal error: connection pool gone"]
        );
        assert_eq!(processes.get("job-1").await.unwrap().state, ProcessState::Error);
    }

    #[tokio::test]
    async fn test_panic_in_batch_marks_error() {
        let repo = Arc::new(TrapRepository {
            trap: "P0001",
            kind: Trap::Panic,
            saves: AtomicUsize::new(0),
        });
        let orchestrator = BatchOrchestrator::new(registry_with(repo), &config(10));
        let processes = processes();
        let process = processes.create("job-1", 4).await.unwrap();
        let result = orchestrator.run(job("producto", product_rows(4)), process).await;

        assert_eq!(result.succeeded, 1, "row before the panic is kept");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("store exploded"));
        assert_eq!(processes.get("job-1").await.unwrap().state, ProcessState::Error);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let orchestrator =
            BatchOrchestrator::new(registry_with(Arc::new(InMemoryRepository::<Product>::new())), &config(10));
        let processes = processes();
        let process = processes.create("job-1", 3).await.unwrap();
        assert!(processes.cancel("job-1").await);

        let result = orchestrator.run(job("producto", product_rows(3)), process.clone()).await;
        assert_eq!(result.processed, 0);
        assert_eq!(result.info_messages, vec!["Import cancelled after 0 of 3 rows"]);
        assert_eq!(process.state(), ProcessState::Cancelled);
        assert!(processes.get("job-1").await.is_none());
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
