//! Comma-separated text parsing.
//!
//! Uses the `csv` crate so quoted fields may contain commas, newlines and
//! doubled quotes. Rows are read as byte records and decoded one at a time, so
//! a single undecodable row is skipped instead of failing the whole file.

use csv::{ByteRecord, ReaderBuilder};
use tracing::warn;

use super::{FileFormat, Header, RawRow, RawTable};
use crate::error::AppError;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub(super) fn read(bytes: &[u8]) -> Result<RawTable, AppError> {
    let data = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true) // column mismatches are reported by validation, not here
        .from_reader(data);

    let mut headers: Option<Vec<Header>> = None;
    let mut header_width = 0;
    let mut rows = Vec::new();

    for (index, result) in reader.byte_records().enumerate() {
        let line = index + 1;

        let record = match result {
            Ok(record) => record,
            Err(e) if headers.is_none() => return Err(AppError::CsvInvalid(e.to_string())),
            Err(e) => {
                warn!(line, error = %e, "skipping unparseable CSV row");
                continue;
            }
        };

        let values = match decode(&record) {
            Some(values) => values,
            None if headers.is_none() => return Err(AppError::NotUtf8),
            None => {
                warn!(line, "skipping CSV row that is not valid UTF-8");
                continue;
            }
        };

        if values.iter().all(|v| v.trim().is_empty()) {
            continue;
        }

        match headers {
            None => {
                let parsed = parse_headers(&values);
                if parsed.is_empty() {
                    return Err(AppError::NoHeaders);
                }
                headers = Some(parsed);
                header_width = values.len();
            }
            Some(_) => rows.push(RawRow {
                cell_count: values.len(),
                values: values.into_iter().map(|v| v.trim().to_string()).collect(),
            }),
        }
    }

    let headers = headers.ok_or(AppError::NoHeaders)?;

    Ok(RawTable {
        format: FileFormat::Delimited,
        headers,
        header_width,
        rows,
    })
}

fn decode(record: &ByteRecord) -> Option<Vec<String>> {
    record
        .iter()
        .map(|field| std::str::from_utf8(field).ok().map(str::to_string))
        .collect()
}

/// Trims and unquotes header cells, dropping empty ones.
fn parse_headers(values: &[String]) -> Vec<Header> {
    values
        .iter()
        .enumerate()
        .filter_map(|(column, raw)| {
            let name = raw.trim().replace('"', "");
            let name = name.trim();
            (!name.is_empty()).then(|| Header {
                name: name.to_string(),
                column,
            })
        })
        .collect()
}
