//! Header-driven column lookup shared by every CSV reader.

use crate::error::{PipelineError, Result};
use csv::StringRecord;
use std::str::FromStr;

/// Column names used across artifacts.
pub mod columns {
    pub const POINT: &str = "point";
    pub const X: &str = "LAMBX";
    pub const Y: &str = "LAMBY";
    pub const DAY: &str = "day";
    pub const WEEK: &str = "week";
    pub const P: &str = "P";
    pub const ETP: &str = "ETP";
    pub const KC: &str = "Kc";
    pub const STOCK: &str = "Stock";
    pub const GAP: &str = "Gap";
    pub const RU_MAX: &str = "RU_max";
    pub const GRID_CELL: &str = "grid_cell";
    pub const POINT_COUNT: &str = "point_count";
}

/// Position of a column by (trimmed) header name.
pub fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Positions of all `names`, or an input schema error naming every missing
/// column.
pub fn require_columns<const N: usize>(
    headers: &StringRecord,
    names: [&str; N],
    path: &str,
) -> Result<[usize; N]> {
    let mut positions = [0usize; N];
    let mut missing = Vec::new();
    for (slot, name) in positions.iter_mut().zip(names) {
        match find_column(headers, name) {
            Some(pos) => *slot = pos,
            None => missing.push(name),
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::InputSchema {
            path: path.to_string(),
            missing: missing.join(", "),
        });
    }
    Ok(positions)
}

/// True for a data row that repeats the header (left behind when an
/// append-streaming writer was interrupted and restarted).
pub fn is_header_row(record: &StringRecord, headers: &StringRecord) -> bool {
    record.len() == headers.len()
        && record
            .iter()
            .zip(headers.iter())
            .all(|(field, header)| field.trim() == header.trim())
}

/// Parse one field of a row, reporting the file and line on failure.
pub fn parse_field<T: FromStr>(
    record: &StringRecord,
    position: usize,
    name: &str,
    path: &str,
) -> Result<T> {
    let line = record.position().map_or(0, |p| p.line());
    let raw = record.get(position).ok_or_else(|| PipelineError::MalformedRow {
        path: path.to_string(),
        line,
        reason: format!("missing field '{name}'"),
    })?;
    raw.trim().parse::<T>().map_err(|_| PipelineError::MalformedRow {
        path: path.to_string(),
        line,
        reason: format!("cannot parse '{raw}' as {name}"),
    })
}

/// Like [`parse_field`] but an empty field yields `None`.
pub fn parse_optional_field<T: FromStr>(
    record: &StringRecord,
    position: usize,
    name: &str,
    path: &str,
) -> Result<Option<T>> {
    match record.get(position).map(str::trim) {
        None | Some("") => Ok(None),
        Some(_) => parse_field(record, position, name, path).map(Some),
    }
}
