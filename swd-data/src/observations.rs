//! Daily forcing (precipitation and potential evapotranspiration) per point.
//!
//! Expected format (with headers): `LAMBX,LAMBY,DATE,PRE,ETP`, with `DATE`
//! as `YYYYMMDD`. Rows may arrive in any order.
//!
//! ```text
//! LAMBX,LAMBY,DATE,PRE,ETP
//! 600,24010,20200101,1.2,0.4
//! 600,24010,20200102,0.0,0.6
//! ```

use chrono::Datelike;
use log::info;
use std::{collections::BTreeMap, io::Read};
use swd_core::{
    config::PipelineConfig,
    error::{PipelineError, Result},
    observation::DailyObservation,
    point::Coordinates,
    schema::{columns, parse_field, parse_optional_field, require_columns},
};
use swd_utils::dates::parse_date_compact;

pub const DATE: &str = "DATE";
pub const PRE: &str = "PRE";
pub const ETP: &str = "ETP";

/// Load every series, grouped by point and sorted by date.
///
/// An empty `PRE` or `ETP` cell is kept as NaN so the balance rejects that
/// point's series instead of treating the day as dry. Rows outside the
/// configured year window are dropped.
pub fn load_observations<R: Read>(
    reader: R,
    source: &str,
    config: &PipelineConfig,
) -> Result<BTreeMap<Coordinates, Vec<DailyObservation>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    let [x_col, y_col, date_col, pre_col, etp_col] =
        require_columns(&headers, [columns::X, columns::Y, DATE, PRE, ETP], source)?;

    let mut series: BTreeMap<Coordinates, Vec<DailyObservation>> = BTreeMap::new();
    let mut count = 0u64;
    let mut outside_window = 0u64;

    for result in rdr.records() {
        let record = result?;
        let x: f64 = parse_field(&record, x_col, columns::X, source)?;
        let y: f64 = parse_field(&record, y_col, columns::Y, source)?;
        let raw_date: String = parse_field(&record, date_col, DATE, source)?;
        let date = parse_date_compact(&raw_date).map_err(|_| PipelineError::MalformedRow {
            path: source.to_string(),
            line: record.position().map_or(0, |p| p.line()),
            reason: format!("cannot parse '{raw_date}' as {DATE} (expected YYYYMMDD)"),
        })?;
        if !config.includes_year(date.year()) {
            outside_window += 1;
            continue;
        }
        let precipitation = parse_optional_field(&record, pre_col, PRE, source)?.unwrap_or(f64::NAN);
        let evapotranspiration =
            parse_optional_field(&record, etp_col, ETP, source)?.unwrap_or(f64::NAN);

        series
            .entry(Coordinates::new(x, y))
            .or_default()
            .push(DailyObservation::new(date, precipitation, evapotranspiration));
        count += 1;
    }

    for observations in series.values_mut() {
        observations.sort_by_key(|o| o.date);
    }
    info!(
        "Loaded {} observations for {} points from {}, skipped {} outside year window",
        count,
        series.len(),
        source,
        outside_window
    );
    Ok(series)
}
