//! Row extraction for delimited-text and spreadsheet uploads.
//!
//! Files are parsed into a [`RawTable`] (headers plus raw cell values, used by
//! the structural check) and then into header-keyed [`RowRecord`]s for the
//! import pipeline. Extraction carries no business semantics.

mod delimited;
mod record;
mod spreadsheet;

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::config::MAX_PREVIEW_ROWS;
use crate::error::AppError;

pub use record::RowRecord;

/// Extensions accepted at the upload boundary.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

/// File format inferred from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Comma-separated UTF-8 text.
    Delimited,
    /// Excel workbook; only the first sheet is read.
    Spreadsheet,
}

impl FileFormat {
    /// Infers the format from the extension after the last `.`.
    pub fn from_file_name(file_name: &str) -> Result<Self, AppError> {
        let name = file_name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidFileName);
        }

        let extension = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
            _ => return Err(AppError::InvalidFileName),
        };

        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::UnsupportedFormat { extension });
        }
        if extension == "csv" {
            Ok(FileFormat::Delimited)
        } else {
            Ok(FileFormat::Spreadsheet)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Delimited => "delimited",
            FileFormat::Spreadsheet => "spreadsheet",
        }
    }
}

/// A header cell kept after dropping empty ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    /// Zero-based column position in the source file.
    pub column: usize,
}

/// A data row as it appears in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Trimmed cell values in column order.
    pub values: Vec<String>,
    /// Number of cells the row actually carries.
    pub cell_count: usize,
}

/// Parsed file before records are keyed by header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub format: FileFormat,
    pub headers: Vec<Header>,
    /// Cells in the header row, unnamed columns included.
    pub header_width: usize,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn header_names(&self) -> Vec<String> {
        self.headers.iter().map(|h| h.name.clone()).collect()
    }

    /// Keys one row by header. Missing cells become `""`, surplus cells are ignored.
    pub fn record(&self, row: &RawRow) -> RowRecord {
        self.headers
            .iter()
            .map(|header| {
                let value = row.values.get(header.column).cloned().unwrap_or_default();
                (header.name.clone(), value)
            })
            .collect()
    }

    pub fn records(&self) -> Vec<RowRecord> {
        self.rows.iter().map(|row| self.record(row)).collect()
    }
}

/// Extraction output handed to the import pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedFile {
    pub file_name: String,
    pub format: FileFormat,
    pub headers: Vec<String>,
    pub rows: Vec<RowRecord>,
}

/// Fast input checks run before anything is parsed.
///
/// Rejects a blank name, an unsupported extension, an empty file and a file
/// larger than `max_bytes`.
pub fn check_upload(file_name: &str, size_bytes: u64, max_bytes: u64) -> Result<FileFormat, AppError> {
    let format = FileFormat::from_file_name(file_name)?;
    if size_bytes == 0 {
        return Err(AppError::EmptyFile);
    }
    if size_bytes > max_bytes {
        return Err(AppError::FileTooLarge {
            size_bytes,
            max_bytes,
        });
    }
    Ok(format)
}

/// Parses `bytes` into headers and raw rows, dispatching on the file extension.
pub fn read_table(file_name: &str, bytes: &[u8]) -> Result<RawTable, AppError> {
    let format = FileFormat::from_file_name(file_name)?;
    if bytes.is_empty() {
        return Err(AppError::EmptyFile);
    }

    let table = match format {
        FileFormat::Delimited => delimited::read(bytes)?,
        FileFormat::Spreadsheet => spreadsheet::read(bytes)?,
    };

    debug!(
        file = %file_name,
        format = format.as_str(),
        headers = table.headers.len(),
        rows = table.rows.len(),
        "extracted table"
    );

    Ok(table)
}

/// Extracts every data row of the file in file order.
pub fn extract_rows(file_name: &str, bytes: &[u8]) -> Result<ExtractedFile, AppError> {
    let table = read_table(file_name, bytes)?;
    Ok(ExtractedFile {
        file_name: file_name.to_string(),
        format: table.format,
        headers: table.header_names(),
        rows: table.records(),
    })
}

/// Extracts at most `limit` rows, with `limit` clamped to `1..=100`.
pub fn preview_rows(file_name: &str, bytes: &[u8], limit: usize) -> Result<ExtractedFile, AppError> {
    let limit = limit.clamp(1, MAX_PREVIEW_ROWS);
    let mut table = read_table(file_name, bytes)?;
    table.rows.truncate(limit);
    Ok(ExtractedFile {
        file_name: file_name.to_string(),
        format: table.format,
        headers: table.header_names(),
        rows: table.records(),
    })
}

/// Reads and extracts a file from disk. Parsing runs on the blocking pool.
pub async fn extract_file(path: &Path) -> Result<ExtractedFile, AppError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(AppError::InvalidFileName)?
        .to_string();

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))?;

    tokio::task::spawn_blocking(move || extract_rows(&file_name, &bytes))
        .await
        .map_err(|e| AppError::Internal(format!("Extraction task panicked: {}", e)))?
}
