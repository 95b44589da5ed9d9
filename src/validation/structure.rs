//! Structural pre-check of an upload against an entity's column contract.
//!
//! Runs synchronously on the request path before a job is created:
//! - required-column coverage (case-insensitive, trimmed, unquoted)
//! - extra columns (reported, ignored downstream)
//! - row shape on a sample of the first data rows
//! - headers-only files

use serde::{Deserialize, Serialize};

use crate::config::{EntityRules, ImportConfig};
use crate::error::AppError;
use crate::extract::{self, RawTable};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Result of the structural check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureReport {
    /// Whether the file passed (no errors).
    pub ok: bool,
    pub errors: Vec<StructureError>,
    pub warnings: Vec<StructureWarning>,
    pub stats: StructureStats,
}

impl StructureReport {
    /// Error messages in display form.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Warning messages in display form.
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// Statistics collected during the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureStats {
    /// Normalized headers found in the file.
    pub headers: Vec<String>,
    /// Column count every data row is expected to carry.
    pub expected_columns: usize,
    /// Data rows after the header.
    pub data_rows: usize,
    /// Data rows inspected for shape.
    pub sampled_rows: usize,
}

/// Problems that make the file unusable for the entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureError {
    UnknownEntityType { entity_type: String },
    MissingColumns { columns: Vec<String> },
    HeadersOnly,
}

impl std::fmt::Display for StructureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureError::UnknownEntityType { entity_type } => {
                write!(f, "Unrecognized entity type: {}", entity_type)
            }
            StructureError::MissingColumns { columns } => {
                write!(f, "Missing columns: {}", columns.join(", "))
            }
            StructureError::HeadersOnly => f.write_str("File contains headers only, no data rows"),
        }
    }
}

/// Advisory findings; the import can proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureWarning {
    ExtraColumns {
        columns: Vec<String>,
    },
    ColumnCountMismatch {
        /// 1-based file row (the header is row 1).
        row: usize,
        expected: usize,
        found: usize,
    },
}

impl std::fmt::Display for StructureWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureWarning::ExtraColumns { columns } => {
                write!(f, "Extra columns found (will be ignored): {}", columns.join(", "))
            }
            StructureWarning::ColumnCountMismatch {
                row,
                expected,
                found,
            } => write!(
                f,
                "Row {}: wrong number of columns (expected: {}, found: {})",
                row, expected, found
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Checks a parsed table against `rules`, inspecting up to `sample_rows` data rows.
pub fn validate_table(table: &RawTable, rules: &EntityRules, sample_rows: usize) -> StructureReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let headers: Vec<String> = table.headers.iter().map(|h| normalize(&h.name)).collect();

    let missing: Vec<String> = rules
        .required_columns
        .iter()
        .filter(|required| !headers.contains(&normalize(required)))
        .cloned()
        .collect();
    if !missing.is_empty() {
        errors.push(StructureError::MissingColumns { columns: missing });
    }

    let extra: Vec<String> = headers
        .iter()
        .filter(|header| !rules.is_known_column(header))
        .cloned()
        .collect();
    if !extra.is_empty() {
        warnings.push(StructureWarning::ExtraColumns { columns: extra });
    }

    let expected_columns = table.header_width;
    let sample = &table.rows[..table.rows.len().min(sample_rows)];
    for (index, row) in sample.iter().enumerate() {
        if row.cell_count != expected_columns {
            warnings.push(StructureWarning::ColumnCountMismatch {
                row: index + 2,
                expected: expected_columns,
                found: row.cell_count,
            });
        }
    }

    if table.rows.is_empty() {
        errors.push(StructureError::HeadersOnly);
    }

    StructureReport {
        ok: errors.is_empty(),
        errors,
        warnings,
        stats: StructureStats {
            headers,
            expected_columns,
            data_rows: table.rows.len(),
            sampled_rows: sample.len(),
        },
    }
}

/// Full pre-check of an upload: basic file checks, parsing, then column coverage.
///
/// # Errors
///
/// Returns `AppError` for input problems that stop the check outright (bad
/// name, empty or oversized file, unparseable content). Column findings are
/// returned in the report.
pub fn validate_upload(
    file_name: &str,
    bytes: &[u8],
    entity_type: &str,
    config: &ImportConfig,
) -> Result<StructureReport, AppError> {
    extract::check_upload(file_name, bytes.len() as u64, config.max_file_bytes)?;
    let table = extract::read_table(file_name, bytes)?;

    match config.rules_for(entity_type) {
        Some(rules) => Ok(validate_table(&table, rules, config.sample_rows)),
        None => Ok(StructureReport {
            ok: false,
            errors: vec![StructureError::UnknownEntityType {
                entity_type: entity_type.trim().to_string(),
            }],
            warnings: vec![],
            stats: StructureStats {
                headers: table.headers.iter().map(|h| normalize(&h.name)).collect(),
                expected_columns: table.header_width,
                data_rows: table.rows.len(),
                sampled_rows: 0,
            },
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn normalize(header: &str) -> String {
    header.trim().replace('"', "").trim().to_lowercase()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
