//! Result export: flatten extraction results into one table, then write it
//! as a single-sheet XLSX workbook.
//!
//! Flattening rules:
//! - every row starts with a `source_file` column naming its document;
//! - nested objects become dotted columns (`address.city`);
//! - a reply key that would land on a reserved column or on a name already
//!   used in the same row gets a numeric suffix (`source_file_1`, `a.b_1`);
//! - arrays nested inside a record are kept as compact JSON text;
//! - a `RecordList` contributes one row per element;
//! - a `RawText` reply becomes one row with a `raw_response` column;
//! - failures never enter the table body, they are listed in
//!   [`FlatTable::failures`].
//!
//! Column order is first-seen order across rows, so flattening the same
//! results twice yields the same table.

use crate::config::DEFAULT_EXPORT_PREFIX;
use crate::error::Img2XlsxError;
use crate::output::{DocumentFailure, ExtractionResult};
use chrono::{DateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_xlsxwriter::{DocProperties, ExcelDateTime, Format, Workbook};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// MIME type of the exported workbook.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Column naming the document each row came from.
pub const SOURCE_COLUMN: &str = "source_file";

/// Column holding a reply that was not structured JSON.
pub const RAW_TEXT_COLUMN: &str = "raw_response";

/// Name of the single worksheet.
pub const SHEET_NAME: &str = "Extracted data";

/// Longest string a worksheet cell accepts.
const MAX_CELL_CHARS: usize = 32_767;

/// Largest integer magnitude an `f64` cell holds exactly (2^53).
const MAX_EXACT_INTEGER: u64 = 1 << 53;

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

/// One table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CellValue::Empty,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => {
                let magnitude = n.as_i64().map(i64::unsigned_abs).or_else(|| n.as_u64());
                if magnitude.is_some_and(|m| m > MAX_EXACT_INTEGER) {
                    // Account and reference numbers keep every digit.
                    return CellValue::Text(n.to_string());
                }
                n.as_f64()
                    .map(CellValue::Number)
                    .unwrap_or_else(|| CellValue::Text(n.to_string()))
            }
            Value::String(s) => CellValue::Text(s.clone()),
            // Objects are expanded by the caller; arrays stay as JSON text.
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// Flattened view of a batch: a header, rows aligned with it, and the
/// documents that produced no rows because they failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatTable {
    pub columns: Vec<String>,
    /// Every row has exactly `columns.len()` cells.
    pub rows: Vec<Vec<CellValue>>,
    pub failures: Vec<DocumentFailure>,
}

impl FlatTable {
    /// Cell at `row` under `column`, if both exist.
    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Flatten results (in submission order) into a [`FlatTable`].
pub fn flatten(results: &[ExtractionResult]) -> FlatTable {
    let mut columns: Vec<String> = vec![SOURCE_COLUMN.to_string()];
    let mut index: HashMap<String, usize> = HashMap::from([(SOURCE_COLUMN.to_string(), 0)]);
    let mut sparse_rows: Vec<Vec<(usize, CellValue)>> = Vec::new();
    let mut failures = Vec::new();

    let mut push_row = |document: &str, cells: Vec<(String, CellValue)>| {
        let mut row = Vec::with_capacity(cells.len() + 1);
        row.push((0, CellValue::Text(document.to_string())));
        for (name, value) in cells {
            let col = *index.entry(name.clone()).or_insert_with(|| {
                columns.push(name);
                columns.len() - 1
            });
            row.push((col, value));
        }
        sparse_rows.push(row);
    };

    for result in results {
        match result {
            ExtractionResult::Record(record) => {
                push_row(&record.document, flatten_fields(&record.fields));
            }
            ExtractionResult::RecordList { document, records } => {
                for record in records {
                    push_row(document, flatten_fields(&record.fields));
                }
            }
            ExtractionResult::RawText { document, text } => {
                push_row(
                    document,
                    vec![(RAW_TEXT_COLUMN.to_string(), CellValue::Text(text.clone()))],
                );
            }
            ExtractionResult::Failure(failure) => failures.push(failure.clone()),
        }
    }

    let width = columns.len();
    let rows = sparse_rows
        .into_iter()
        .map(|cells| {
            let mut row = vec![CellValue::Empty; width];
            for (col, value) in cells {
                row[col] = value;
            }
            row
        })
        .collect();

    FlatTable {
        columns,
        rows,
        failures,
    }
}

/// Dotted-path flattening of one record's fields, in field order.
///
/// Every returned name is distinct within the record and never equal to
/// [`SOURCE_COLUMN`] or [`RAW_TEXT_COLUMN`].
fn flatten_fields(fields: &Map<String, Value>) -> Vec<(String, CellValue)> {
    let mut flat = Vec::new();
    flatten_into("", fields, &mut flat);

    let mut taken: HashSet<String> =
        HashSet::from([SOURCE_COLUMN.to_string(), RAW_TEXT_COLUMN.to_string()]);
    flat.into_iter()
        .map(|(path, value)| {
            let name = unique_name(path, &taken);
            taken.insert(name.clone());
            (name, value)
        })
        .collect()
}

/// `path`, or `path_1`, `path_2`, ... for the first name not in `taken`.
fn unique_name(path: String, taken: &HashSet<String>) -> String {
    if !taken.contains(&path) {
        return path;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{path}_{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn flatten_into(prefix: &str, fields: &Map<String, Value>, out: &mut Vec<(String, CellValue)>) {
    for (key, value) in fields {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(&path, nested, out),
            other => out.push((path, CellValue::from_json(other))),
        }
    }
}

/// Serialize the table as a single-sheet XLSX workbook.
///
/// The header row is bold; numbers and booleans keep their cell types.
/// The workbook creation timestamp is pinned rather than taken from the clock.
pub fn serialize(table: &FlatTable) -> Result<Vec<u8>, Img2XlsxError> {
    let mut workbook = Workbook::new();
    let created = ExcelDateTime::from_ymd(2000, 1, 1)?;
    workbook.set_properties(&DocProperties::new().set_creation_datetime(&created));

    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (c, name) in table.columns.iter().enumerate() {
        sheet.write_string_with_format(0, column_index(c)?, name.as_str(), &header)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let r = u32::try_from(r + 1)
            .map_err(|_| Img2XlsxError::ExportFailed(format!("too many rows: {}", r + 1)))?;
        for (c, cell) in row.iter().enumerate() {
            let c = column_index(c)?;
            match cell {
                CellValue::Empty => {}
                CellValue::Text(s) => {
                    sheet.write_string(r, c, clip(s).as_str())?;
                }
                CellValue::Number(n) => {
                    sheet.write_number(r, c, *n)?;
                }
                CellValue::Bool(b) => {
                    sheet.write_boolean(r, c, *b)?;
                }
            }
        }
    }

    let bytes = workbook.save_to_buffer()?;
    debug!(
        "Serialized {} rows × {} columns ({} bytes)",
        table.rows.len(),
        table.columns.len(),
        bytes.len()
    );
    Ok(bytes)
}

fn column_index(c: usize) -> Result<u16, Img2XlsxError> {
    u16::try_from(c).map_err(|_| Img2XlsxError::ExportFailed(format!("too many columns: {}", c + 1)))
}

fn clip(s: &str) -> String {
    if s.chars().count() <= MAX_CELL_CHARS {
        s.to_string()
    } else {
        s.chars().take(MAX_CELL_CHARS).collect()
    }
}

/// `<prefix>_<YYYYMMDD_HHMMSS>.xlsx` for the given instant.
///
/// Characters outside `[A-Za-z0-9._-]` in the prefix are replaced with `_`;
/// a prefix with nothing usable falls back to `document_data`.
pub fn export_filename<Tz: TimeZone>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(prefix.trim(), "_");
    let cleaned = cleaned.trim_matches('_');
    let prefix = if cleaned.is_empty() {
        DEFAULT_EXPORT_PREFIX
    } else {
        cleaned
    };
    format!("{}_{}.xlsx", prefix, at.format("%Y%m%d_%H%M%S"))
}

/// Serialize `table` and write it to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_xlsx(table: &FlatTable, path: impl AsRef<Path>) -> Result<(), Img2XlsxError> {
    let path = path.as_ref();
    let bytes = serialize(table)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Img2XlsxError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("xlsx.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| Img2XlsxError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Img2XlsxError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    info!(
        "Wrote {} rows to {} ({} bytes)",
        table.rows.len(),
        path.display(),
        bytes.len()
    );
    Ok(())
}
