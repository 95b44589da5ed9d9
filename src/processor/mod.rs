//! Per-entity-type processing.
//!
//! Each entity type implements [`EntityProcessor`]: map a row to a typed
//! entity, validate it, check for a duplicate, save it. The orchestrator only
//! sees the object-safe [`RowProcessor`], which every `EntityProcessor` gets
//! for free and which runs that pipeline for a single row.

mod client;
mod product;
mod registry;
mod user;

use std::time::Duration;

use tracing::warn;

use crate::error::AppError;
use crate::extract::RowRecord;
use crate::repository::BoxFuture;
use crate::validation::ValidationOutcome;

pub use client::ClientProcessor;
pub use product::ProductProcessor;
pub use registry::ProcessorRegistry;
pub use user::UserProcessor;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Mapping, validation and persistence for one entity type.
pub trait EntityProcessor: Send + Sync + 'static {
    type Entity: Send + Sync + 'static;

    /// Identifier this processor answers to, e.g. `"cliente"`.
    fn entity_type(&self) -> &'static str;

    /// Builds an entity from a row. Coercion failures are [`AppError::Mapping`].
    fn map_row(&self, row: &RowRecord, row_number: usize) -> Result<Self::Entity, AppError>;

    /// Semantic checks on the mapped entity.
    fn validate(&self, entity: &Self::Entity, row_number: usize) -> ValidationOutcome;

    /// Whether the entity's natural key is already stored.
    fn exists<'a>(&'a self, entity: &'a Self::Entity) -> BoxFuture<'a, Result<bool, AppError>>;

    fn save<'a>(&'a self, entity: &'a Self::Entity) -> BoxFuture<'a, Result<(), AppError>>;
}

/// Type-erased single-row pipeline, as stored in the registry.
pub trait RowProcessor: Send + Sync {
    fn entity_type(&self) -> &'static str;

    /// Runs map, validate, duplicate check and save for one row.
    ///
    /// Row-level problems come back as a [`RowOutcome`]. `Err` is reserved for
    /// job-fatal errors that must stop the job.
    fn process_row<'a>(
        &'a self,
        row: &'a RowRecord,
        row_number: usize,
        policy: SavePolicy,
    ) -> BoxFuture<'a, Result<RowOutcome, AppError>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Row outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Retry policy for transient save failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavePolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for SavePolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// What happened to one row.
#[derive(Debug)]
pub enum RowOutcome {
    Saved {
        warnings: Vec<String>,
    },
    /// Valid, but the natural key is already stored.
    Duplicate {
        warnings: Vec<String>,
    },
    /// Failed semantic validation; never checked for duplicates.
    Invalid {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    /// Mapping or persistence failure.
    Failed {
        error: AppError,
        warnings: Vec<String>,
    },
}

impl<P: EntityProcessor> RowProcessor for P {
    fn entity_type(&self) -> &'static str {
        EntityProcessor::entity_type(self)
    }

    fn process_row<'a>(
        &'a self,
        row: &'a RowRecord,
        row_number: usize,
        policy: SavePolicy,
    ) -> BoxFuture<'a, Result<RowOutcome, AppError>> {
        Box::pin(async move {
            let entity = match self.map_row(row, row_number) {
                Ok(entity) => entity,
                Err(e) if e.is_job_fatal() => return Err(e),
                Err(e) => {
                    return Ok(RowOutcome::Failed {
                        error: e,
                        warnings: Vec::new(),
                    })
                }
            };

            let (errors, warnings) = self.validate(&entity, row_number).into_parts();
            if !errors.is_empty() {
                return Ok(RowOutcome::Invalid { errors, warnings });
            }

            match self.exists(&entity).await {
                Ok(true) => return Ok(RowOutcome::Duplicate { warnings }),
                Ok(false) => {}
                Err(e) if e.is_job_fatal() => return Err(e),
                Err(error) => return Ok(RowOutcome::Failed { error, warnings }),
            }

            let mut attempt = 1;
            loop {
                match self.save(&entity).await {
                    Ok(()) => return Ok(RowOutcome::Saved { warnings }),
                    Err(e) if e.is_job_fatal() => return Err(e),
                    Err(e) if e.is_transient() && attempt < policy.attempts => {
                        warn!(
                            row = row_number,
                            attempt,
                            max_attempts = policy.attempts,
                            error = %e,
                            "transient save failure, retrying"
                        );
                        tokio::time::sleep(policy.backoff).await;
                        attempt += 1;
                    }
                    Err(error) => return Ok(RowOutcome::Failed { error, warnings }),
                }
            }
        })
    }
}

/// Parses an optional numeric cell; empty text is `None`.
fn parse_optional<T: std::str::FromStr>(
    row: &RowRecord,
    field: &str,
    row_number: usize,
) -> Result<Option<T>, AppError> {
    let raw = row.text(field);
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>().map(Some).map_err(|_| AppError::Mapping {
        row: row_number,
        field: field.to_string(),
        message: format!("'{}' is not a valid number", raw),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
