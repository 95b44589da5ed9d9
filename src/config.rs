//! Import pipeline configuration.
//!
//! Defaults mirror the production import settings. Every scalar can be
//! overridden from an `IMPORT_*` environment variable.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Column contract and size limit for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRules {
    /// Columns that must be present in the file header.
    pub required_columns: Vec<String>,
    /// Columns that are understood but may be omitted.
    #[serde(default)]
    pub optional_columns: Vec<String>,
    /// Maximum number of data rows accepted in one submission.
    pub max_records: usize,
}

impl EntityRules {
    fn new(required: &[&str], optional: &[&str], max_records: usize) -> Self {
        Self {
            required_columns: required.iter().map(|c| c.to_string()).collect(),
            optional_columns: optional.iter().map(|c| c.to_string()).collect(),
            max_records,
        }
    }

    /// Returns true if `column` is required or optional (case-insensitive).
    pub fn is_known_column(&self, column: &str) -> bool {
        self.required_columns
            .iter()
            .chain(self.optional_columns.iter())
            .any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Configuration for the import service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Rows per batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Jobs allowed to run at the same time (default: 5).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Seconds a completed or failed job stays visible (default: 600).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Seconds a cancelled job stays visible (default: 0).
    #[serde(default)]
    pub cancelled_retention_secs: u64,
    /// Seconds between expiry sweeps (default: 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Data rows inspected by the structural check (default: 10).
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    /// Largest accepted upload in bytes (default: 10 MiB).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Rows returned by a preview (default: 10, allowed 1..=100).
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
    /// Save attempts per row for transient persistence failures (default: 3).
    #[serde(default = "default_save_attempts")]
    pub save_attempts: u32,
    /// Pause between save attempts in milliseconds (default: 100).
    #[serde(default = "default_retry_backoff_millis")]
    pub retry_backoff_millis: u64,
    /// Per-entity column contracts, keyed by lowercase entity type.
    #[serde(default = "default_entities")]
    pub entities: BTreeMap<String, EntityRules>,
}

/// Upper bound for `preview_rows`.
pub const MAX_PREVIEW_ROWS: usize = 100;

fn default_batch_size() -> usize {
    1000
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_retention_secs() -> u64 {
    600 // 10 minutes
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sample_rows() -> usize {
    10
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_preview_rows() -> usize {
    10
}

fn default_save_attempts() -> u32 {
    3
}

fn default_retry_backoff_millis() -> u64 {
    100
}

fn default_entities() -> BTreeMap<String, EntityRules> {
    let mut entities = BTreeMap::new();
    entities.insert(
        "cliente".to_string(),
        EntityRules::new(
            &["nombre", "apellido", "email", "rut"],
            &["telefono", "direccion", "categoria"],
            5000,
        ),
    );
    entities.insert(
        "producto".to_string(),
        EntityRules::new(
            &["codigo", "nombre", "precio"],
            &["descripcion", "stock", "marca", "modelo"],
            10_000,
        ),
    );
    entities.insert(
        "usuario".to_string(),
        EntityRules::new(
            &["username", "password", "nombre", "apellido", "email"],
            &["roles", "activo"],
            1000,
        ),
    );
    entities
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retention_secs: default_retention_secs(),
            cancelled_retention_secs: 0,
            sweep_interval_secs: default_sweep_interval_secs(),
            sample_rows: default_sample_rows(),
            max_file_bytes: default_max_file_bytes(),
            preview_rows: default_preview_rows(),
            save_attempts: default_save_attempts(),
            retry_backoff_millis: default_retry_backoff_millis(),
            entities: default_entities(),
        }
    }
}

impl ImportConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `IMPORT_BATCH_SIZE`
    /// - `IMPORT_MAX_CONCURRENT_JOBS`
    /// - `IMPORT_RETENTION_SECS`
    /// - `IMPORT_CANCELLED_RETENTION_SECS`
    /// - `IMPORT_SWEEP_INTERVAL_SECS`
    /// - `IMPORT_SAMPLE_ROWS`
    /// - `IMPORT_MAX_FILE_BYTES`
    /// - `IMPORT_PREVIEW_ROWS`
    /// - `IMPORT_SAVE_ATTEMPTS`
    /// - `IMPORT_RETRY_BACKOFF_MILLIS`
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let config = Self {
            batch_size: env_or("IMPORT_BATCH_SIZE", defaults.batch_size)?,
            max_concurrent_jobs: env_or("IMPORT_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            retention_secs: env_or("IMPORT_RETENTION_SECS", defaults.retention_secs)?,
            cancelled_retention_secs: env_or(
                "IMPORT_CANCELLED_RETENTION_SECS",
                defaults.cancelled_retention_secs,
            )?,
            sweep_interval_secs: env_or("IMPORT_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            sample_rows: env_or("IMPORT_SAMPLE_ROWS", defaults.sample_rows)?,
            max_file_bytes: env_or("IMPORT_MAX_FILE_BYTES", defaults.max_file_bytes)?,
            preview_rows: env_or("IMPORT_PREVIEW_ROWS", defaults.preview_rows)?,
            save_attempts: env_or("IMPORT_SAVE_ATTEMPTS", defaults.save_attempts)?,
            retry_backoff_millis: env_or(
                "IMPORT_RETRY_BACKOFF_MILLIS",
                defaults.retry_backoff_millis,
            )?,
            entities: defaults.entities,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::Config("IMPORT_BATCH_SIZE must be greater than 0".into()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(AppError::Config(
                "IMPORT_MAX_CONCURRENT_JOBS must be greater than 0".into(),
            ));
        }
        if self.save_attempts == 0 {
            return Err(AppError::Config("IMPORT_SAVE_ATTEMPTS must be greater than 0".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(AppError::Config(
                "IMPORT_SWEEP_INTERVAL_SECS must be greater than 0".into(),
            ));
        }
        if !(1..=MAX_PREVIEW_ROWS).contains(&self.preview_rows) {
            return Err(AppError::Config(format!(
                "IMPORT_PREVIEW_ROWS must be between 1 and {}, got: {}",
                MAX_PREVIEW_ROWS, self.preview_rows
            )));
        }
        for (entity, rules) in &self.entities {
            if rules.required_columns.is_empty() {
                return Err(AppError::Config(format!(
                    "entity '{}' must declare at least one required column",
                    entity
                )));
            }
        }
        Ok(())
    }

    /// Column contract for an entity type (case-insensitive).
    pub fn rules_for(&self, entity_type: &str) -> Option<&EntityRules> {
        self.entities
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(entity_type.trim()))
            .map(|(_, rules)| rules)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cancelled_retention(&self) -> Duration {
        Duration::from_secs(self.cancelled_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_millis)
    }
}

/// Reads `name` from the environment, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{} has an invalid value '{}': {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}
