//! Excel workbook parsing (first sheet only).

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, ExcelDateTime, Reader};
use chrono::Timelike;

use super::{FileFormat, Header, RawRow, RawTable};
use crate::error::AppError;

/// Largest magnitude that still renders exactly as an integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

pub(super) fn read(bytes: &[u8]) -> Result<RawTable, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::SpreadsheetInvalid(e.to_string()))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => return Err(AppError::SpreadsheetInvalid(e.to_string())),
        None => return Err(AppError::SpreadsheetInvalid("workbook has no sheets".into())),
    };

    // The header is sheet row 0; calamine trims leading empty rows from the range.
    if !matches!(range.start(), Some((0, _))) {
        return Err(AppError::NoHeaders);
    }

    let mut sheet_rows = range.rows();
    let header_row = sheet_rows.next().ok_or(AppError::NoHeaders)?;

    let headers: Vec<Header> = header_row
        .iter()
        .enumerate()
        .filter_map(|(column, cell)| {
            let name = render_cell(cell);
            (!name.is_empty()).then_some(Header { name, column })
        })
        .collect();

    if headers.is_empty() {
        return Err(AppError::NoHeaders);
    }

    let rows = sheet_rows
        .filter_map(|cells| {
            let values: Vec<String> = cells.iter().map(render_cell).collect();
            // Cell count ignores trailing empty cells, the range is rectangular.
            let cell_count = values
                .iter()
                .rposition(|v| !v.is_empty())
                .map(|last| last + 1)?;
            Some(RawRow { values, cell_count })
        })
        .collect();

    // Same rule as `cell_count`: trailing empty cells do not count.
    let header_width = headers.last().map_or(0, |h| h.column + 1);

    Ok(RawTable {
        format: FileFormat::Spreadsheet,
        headers,
        header_width,
        rows,
    })
}

/// Renders one cell as trimmed text.
///
/// Formula cells arrive as their cached result, so they take the same path
/// as literal values.
fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => render_number(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => render_datetime(dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(e) => e.to_string(),
    }
}

/// Integral values drop the fractional part: `100.0` renders as `"100"`.
fn render_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn render_datetime(value: &ExcelDateTime) -> String {
    if value.is_duration() {
        return render_number(value.as_f64());
    }
    match value.as_datetime() {
        Some(dt) if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 => {
            dt.format("%Y-%m-%d").to_string()
        }
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => render_number(value.as_f64()),
    }
}
