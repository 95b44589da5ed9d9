use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "bearer ",
    "access_token",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for callers of the import service.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Input ─────────────────────────────────────────────────────────────────
    #[error("Invalid file name")]
    InvalidFileName,

    #[error("Unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("File is empty")]
    EmptyFile,

    #[error("File size {size_bytes} bytes exceeds the limit of {max_bytes} bytes")]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("File has no valid headers")]
    NoHeaders,

    #[error("File has no data rows")]
    NoDataRows,

    #[error("Too many records for {entity_type}: {count} (maximum {max})")]
    TooManyRecords {
        entity_type: String,
        count: usize,
        max: usize,
    },

    #[error("Import job {0} is already registered")]
    DuplicateJob(String),

    // ── Extraction ────────────────────────────────────────────────────────────
    #[error("File is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    #[error("Invalid spreadsheet: {0}")]
    SpreadsheetInvalid(String),

    // ── Records ───────────────────────────────────────────────────────────────
    #[error("Invalid value for field '{field}': {message}")]
    Mapping {
        row: usize,
        field: String,
        message: String,
    },

    #[error("Failed to save record: {message}")]
    Persistence { message: String, transient: bool },

    // ── Processing ────────────────────────────────────────────────────────────
    #[error("No processor for entity type '{entity_type}' (supported: {})", .supported.join(", "))]
    NoProcessor {
        entity_type: String,
        supported: Vec<String>,
    },

    #[error("Import service is shutting down")]
    ShuttingDown,

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors detected before a job is created; reported synchronously.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidFileName
                | AppError::UnsupportedFormat { .. }
                | AppError::EmptyFile
                | AppError::FileTooLarge { .. }
                | AppError::NoHeaders
                | AppError::NoDataRows
                | AppError::TooManyRecords { .. }
                | AppError::DuplicateJob(_)
                | AppError::NotUtf8
                | AppError::CsvInvalid(_)
                | AppError::SpreadsheetInvalid(_)
        )
    }

    /// Errors that abort the remaining batches of a running job.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, AppError::NoProcessor { .. } | AppError::Internal(_))
    }

    /// Persistence failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Persistence { transient: true, .. })
    }

    /// Display text safe to store in a job result.
    pub fn safe_message(&self) -> String {
        sanitize_message(&self.to_string(), &self.to_presentation().message)
    }

    /// Converts the error into a user-friendly presentation.
    /// Never leaks credentials or other sensitive row content.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Input ─────────────────────────────────────────────────────────
            AppError::InvalidFileName => ErrorPresentation {
                title: "Invalid File Name".into(),
                message: "The uploaded file has no usable name or extension.".into(),
                action: Some("Rename the file with a .csv, .xlsx or .xls extension".into()),
            },

            AppError::UnsupportedFormat { extension } => ErrorPresentation {
                title: "Unsupported Format".into(),
                message: format!(
                    "Files with extension '{}' cannot be imported. Supported formats: csv, xlsx, xls.",
                    extension
                ),
                action: Some("Convert the file to CSV or Excel".into()),
            },

            AppError::EmptyFile => ErrorPresentation {
                title: "Empty File".into(),
                message: "The uploaded file is empty.".into(),
                action: Some("Select a file that contains data".into()),
            },

            AppError::FileTooLarge { size_bytes, max_bytes } => ErrorPresentation {
                title: "File Too Large".into(),
                message: format!(
                    "The file is {} but the maximum allowed size is {}.",
                    format_file_size(*size_bytes),
                    format_file_size(*max_bytes)
                ),
                action: Some("Split the file into smaller parts".into()),
            },

            AppError::NoHeaders => ErrorPresentation {
                title: "Missing Headers".into(),
                message: "The first row of the file must contain the column names.".into(),
                action: Some("Add a header row and try again".into()),
            },

            AppError::NoDataRows => ErrorPresentation {
                title: "No Data".into(),
                message: "The file contains headers only, no data rows.".into(),
                action: Some("Add at least one data row".into()),
            },

            AppError::TooManyRecords { entity_type, count, max } => ErrorPresentation {
                title: "Too Many Records".into(),
                message: format!(
                    "The file has {} {} records but at most {} can be imported at once.",
                    count, entity_type, max
                ),
                action: Some("Split the file into smaller parts".into()),
            },

            AppError::DuplicateJob(_) => ErrorPresentation {
                title: "Import Already Running".into(),
                message: "An import with the same identifier is still tracked.".into(),
                action: Some("Wait for it to finish or use a different identifier".into()),
            },

            // ── Extraction ────────────────────────────────────────────────────
            AppError::NotUtf8 => ErrorPresentation {
                title: "Invalid File Encoding".into(),
                message: "The file must be UTF-8 encoded. Please re-save your file with UTF-8 encoding.".into(),
                action: Some("Convert file to UTF-8".into()),
            },

            AppError::CsvInvalid(msg) => ErrorPresentation {
                title: "Invalid CSV".into(),
                message: format!(
                    "The CSV file has a formatting problem: {}",
                    sanitize_message(msg, "unreadable content")
                ),
                action: Some("Fix the CSV file and try again".into()),
            },

            AppError::SpreadsheetInvalid(msg) => ErrorPresentation {
                title: "Invalid Spreadsheet".into(),
                message: format!(
                    "The spreadsheet could not be read: {}",
                    sanitize_message(msg, "unreadable content")
                ),
                action: Some("Re-save the workbook and try again".into()),
            },

            // ── Records ───────────────────────────────────────────────────────
            AppError::Mapping { row, field, message } => ErrorPresentation {
                title: "Invalid Value".into(),
                message: format!(
                    "Row {}: field '{}' {}",
                    row,
                    field,
                    sanitize_message(message, "has an invalid value")
                ),
                action: Some("Correct the value and import the row again".into()),
            },

            AppError::Persistence { message, transient } => ErrorPresentation {
                title: "Save Failed".into(),
                message: sanitize_message(message, "A record could not be saved."),
                action: if *transient {
                    Some("Retry the import later".into())
                } else {
                    None
                },
            },

            // ── Processing ────────────────────────────────────────────────────
            AppError::NoProcessor { entity_type, supported } => ErrorPresentation {
                title: "Unknown Entity Type".into(),
                message: format!(
                    "'{}' cannot be imported. Supported types: {}.",
                    entity_type,
                    supported.join(", ")
                ),
                action: Some("Choose one of the supported entity types".into()),
            },

            AppError::ShuttingDown => ErrorPresentation {
                title: "Service Unavailable".into(),
                message: "The import service is shutting down and accepts no new jobs.".into(),
                action: Some("Retry once the service is back".into()),
            },

            // ── Configuration ─────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Configuration Error".into(),
                message: sanitize_message(msg, "The import configuration is invalid."),
                action: Some("Check the IMPORT_* settings".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

/// Renders a byte count as B, KB or MB with one decimal.
pub fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;

    let value = bytes as f64;
    if value < KB {
        format!("{} B", bytes)
    } else if value < MB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{:.1} MB", value / MB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns all AppError variants for exhaustive testing.
    fn all_variants() -> Vec<AppError> {
        vec![
            // Input
            AppError::InvalidFileName,
            AppError::UnsupportedFormat { extension: "pdf".into() },
            AppError::EmptyFile,
            AppError::FileTooLarge { size_bytes: 20 * 1024 * 1024, max_bytes: 10 * 1024 * 1024 },
            AppError::NoHeaders,
            AppError::NoDataRows,
            AppError::TooManyRecords { entity_type: "usuario".into(), count: 1500, max: 1000 },
            AppError::DuplicateJob("job-1".into()),
            // Extraction
            AppError::NotUtf8,
            AppError::CsvInvalid("unterminated quote".into()),
            AppError::SpreadsheetInvalid("no sheets".into()),
            // Records
            AppError::Mapping { row: 4, field: "precio".into(), message: "not a number".into() },
            AppError::Persistence { message: "connection reset".into(), transient: true },
            AppError::Persistence { message: "constraint violated".into(), transient: false },
            // Processing
            AppError::NoProcessor {
                entity_type: "pedido".into(),
                supported: vec!["cliente".into(), "producto".into()],
            },
            AppError::ShuttingDown,
            // Configuration
            AppError::Config("batch_size must be greater than 0".into()),
            // Generic
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(
                !presentation.title.trim().is_empty(),
                "Empty title for {:?}",
                variant
            );
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn input_errors_are_classified() {
        let input: Vec<AppError> = all_variants()
            .into_iter()
            .filter(AppError::is_input_error)
            .collect();
        assert_eq!(input.len(), 11);
        assert!(!AppError::Mapping { row: 2, field: "x".into(), message: "y".into() }.is_input_error());
        assert!(!AppError::ShuttingDown.is_input_error());
    }

    #[test]
    fn only_processor_and_internal_errors_are_job_fatal() {
        for variant in all_variants() {
            let expected = matches!(variant, AppError::NoProcessor { .. } | AppError::Internal(_));
            assert_eq!(variant.is_job_fatal(), expected, "{:?}", variant);
        }
    }

    #[test]
    fn transient_flag_drives_retry_classification() {
        assert!(AppError::Persistence { message: "timeout".into(), transient: true }.is_transient());
        assert!(!AppError::Persistence { message: "duplicate key".into(), transient: false }.is_transient());
        assert!(!AppError::Internal("timeout".into()).is_transient());
    }

    #[test]
    fn no_processor_lists_supported_types() {
        let err = AppError::NoProcessor {
            entity_type: "pedido".into(),
            supported: vec!["cliente".into(), "producto".into(), "usuario".into()],
        };
        let text = err.to_string();
        assert!(text.contains("pedido"));
        assert!(text.contains("cliente, producto, usuario"));
        assert!(err.to_presentation().message.contains("producto"));
    }

    #[test]
    fn file_too_large_uses_readable_sizes() {
        let presentation = AppError::FileTooLarge {
            size_bytes: 15 * 1024 * 1024,
            max_bytes: 10 * 1024 * 1024,
        }
        .to_presentation();
        assert!(presentation.message.contains("15.0 MB"), "{}", presentation.message);
        assert!(presentation.message.contains("10.0 MB"), "{}", presentation.message);
    }

    #[test]
    fn format_file_size_picks_unit() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(10 * 1024 * 1024), "10.0 MB");
    }

    #[test]
    fn serialization_produces_valid_json_with_required_fields() {
        for variant in all_variants() {
            let json = serde_json::to_string(&variant)
                .unwrap_or_else(|_| panic!("Failed to serialize {:?}", variant));

            let parsed: serde_json::Value = serde_json::from_str(&json)
                .unwrap_or_else(|_| panic!("Failed to parse JSON for {:?}", variant));

            assert!(parsed.get("title").is_some(), "{:?} missing 'title'", variant);
            assert!(parsed.get("message").is_some(), "{:?} missing 'message'", variant);
            // action can be null, but field should exist
            assert!(parsed.get("action").is_some(), "{:?} missing 'action'", variant);
        }
    }

    #[test]
    fn no_secret_leakage_in_presentation() {
        let test_cases: Vec<(&str, AppError)> = vec![
            ("CsvInvalid", AppError::CsvInvalid("password=hunter2 in row 3".into())),
            ("Mapping", AppError::Mapping {
                row: 3,
                field: "password".into(),
                message: "secret value rejected".into(),
            }),
            ("Persistence", AppError::Persistence {
                message: "Authorization: Bearer abc123".into(),
                transient: false,
            }),
            ("Internal", AppError::Internal("access_token leaked".into())),
            ("Config", AppError::Config("client_secret missing".into())),
        ];

        for (label, variant) in test_cases {
            let presentation = variant.to_presentation();
            let output = format!(
                "{} {} {}",
                presentation.title,
                presentation.message,
                presentation.action.as_deref().unwrap_or("")
            );
            let lower = output.to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                // The field name itself is allowed; its value is not.
                if *pattern == "password" && label == "Mapping" {
                    assert!(!lower.contains("secret value"), "{} leaked value", label);
                    continue;
                }
                assert!(!lower.contains(pattern), "{} presentation contains sensitive pattern", label);
            }
        }
    }
}
