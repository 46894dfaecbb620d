//! Multi-scale grid aggregation.
//!
//! A daily or weekly dataset is loaded once into a [`SpatialDataset`] and then
//! binned at any number of scale levels. Each point goes into the half-open
//! square bin `[ix * S, (ix + 1) * S)` on both axes and is represented by the
//! bin center. Within a (cell, time bucket) the four metrics are averaged and
//! the contributing rows are counted.

use crate::{MeanAccumulator, MetricMeans};
use csv::StringRecord;
use log::{debug, info};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    io::{Read, Write},
};
use swd_core::{
    error::{PipelineError, Result},
    point::Coordinates,
    scale::{ScaleLevel, ScaleSpec, ScaleTable},
    schema::{columns, find_column, is_header_row, parse_field, require_columns},
};

/// Largest `LAMBX` (and matching `LAMBY`) still read as kilometers.
const KM_MAX_X: f64 = 10_000.0;
const KM_MAX_Y: f64 = 100_000.0;

/// Unit of the input coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateUnit {
    Kilometers,
    Meters,
}

impl CoordinateUnit {
    /// Guess the unit from the coordinate maxima.
    pub fn detect(x_max: f64, y_max: f64) -> Self {
        if x_max < KM_MAX_X && y_max < KM_MAX_Y {
            CoordinateUnit::Kilometers
        } else {
            CoordinateUnit::Meters
        }
    }

    /// Meters per input unit.
    pub fn meters(self) -> f64 {
        match self {
            CoordinateUnit::Kilometers => 1000.0,
            CoordinateUnit::Meters => 1.0,
        }
    }
}

impl fmt::Display for CoordinateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateUnit::Kilometers => f.write_str("km"),
            CoordinateUnit::Meters => f.write_str("m"),
        }
    }
}

/// Integer bin indices of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId {
    pub ix: i64,
    pub iy: i64,
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ix, self.iy)
    }
}

/// Which column carries the time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeColumn {
    Day,
    Week,
}

impl TimeColumn {
    pub fn name(self) -> &'static str {
        match self {
            TimeColumn::Day => columns::DAY,
            TimeColumn::Week => columns::WEEK,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialRecord {
    pub coordinates: Coordinates,
    pub time: String,
    pub precipitation: f64,
    pub evapotranspiration: f64,
    pub stock: f64,
    pub gap: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// A fully loaded daily or weekly dataset, shared read-only by every level.
#[derive(Debug, Clone)]
pub struct SpatialDataset {
    pub source: String,
    pub time_column: TimeColumn,
    pub unit: CoordinateUnit,
    pub extent: Option<Extent>,
    pub unique_points: usize,
    pub records: Vec<SpatialRecord>,
}

impl SpatialDataset {
    /// Read the whole dataset and detect its time column and coordinate unit.
    pub fn load<R: Read>(input: R, source: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        let headers = reader.headers()?.clone();

        let time_column = if find_column(&headers, columns::DAY).is_some() {
            TimeColumn::Day
        } else if find_column(&headers, columns::WEEK).is_some() {
            TimeColumn::Week
        } else {
            return Err(PipelineError::NoTimeColumn {
                path: source.to_string(),
            });
        };
        let positions = require_columns(
            &headers,
            [
                columns::X,
                columns::Y,
                time_column.name(),
                columns::P,
                columns::ETP,
                columns::STOCK,
                columns::GAP,
            ],
            source,
        )?;

        let mut records = Vec::new();
        let mut record = StringRecord::new();
        let mut header_rows = 0u64;
        while reader.read_record(&mut record)? {
            if is_header_row(&record, &headers) {
                header_rows += 1;
                continue;
            }
            records.push(parse_record(&record, positions, time_column, source)?);
        }
        if header_rows > 0 {
            debug!("{source}: dropped {header_rows} embedded header rows");
        }

        let extent = records.iter().fold(None, |acc: Option<Extent>, r| {
            let (x, y) = (r.coordinates.x, r.coordinates.y);
            Some(match acc {
                None => Extent {
                    x_min: x,
                    x_max: x,
                    y_min: y,
                    y_max: y,
                },
                Some(e) => Extent {
                    x_min: e.x_min.min(x),
                    x_max: e.x_max.max(x),
                    y_min: e.y_min.min(y),
                    y_max: e.y_max.max(y),
                },
            })
        });
        let unit = extent.map_or(CoordinateUnit::Kilometers, |e| {
            CoordinateUnit::detect(e.x_max, e.y_max)
        });
        let unique_points = records
            .iter()
            .map(|r| r.coordinates)
            .collect::<BTreeSet<_>>()
            .len();

        info!(
            "Loaded {} records ({} points, time column '{}', coordinates in {}) from {}",
            records.len(),
            unique_points,
            time_column.name(),
            unit,
            source
        );
        Ok(SpatialDataset {
            source: source.to_string(),
            time_column,
            unit,
            extent,
            unique_points,
            records,
        })
    }
}

fn parse_record(
    record: &StringRecord,
    positions: [usize; 7],
    time_column: TimeColumn,
    source: &str,
) -> Result<SpatialRecord> {
    let [x, y, time, p, etp, stock, gap] = positions;
    Ok(SpatialRecord {
        coordinates: Coordinates::new(
            parse_field(record, x, columns::X, source)?,
            parse_field(record, y, columns::Y, source)?,
        ),
        time: parse_field(record, time, time_column.name(), source)?,
        precipitation: parse_field(record, p, columns::P, source)?,
        evapotranspiration: parse_field(record, etp, columns::ETP, source)?,
        stock: parse_field(record, stock, columns::STOCK, source)?,
        gap: parse_field(record, gap, columns::GAP, source)?,
    })
}

/// Bin a coordinate into a cell of `width_m` meters. Returns the cell and its
/// center in the input unit.
pub fn assign_cell(coordinates: Coordinates, unit: CoordinateUnit, width_m: f64) -> (CellId, Coordinates) {
    let scale = unit.meters();
    let ix = (coordinates.x * scale / width_m).floor() as i64;
    let iy = (coordinates.y * scale / width_m).floor() as i64;
    let center = Coordinates::new(
        (ix as f64 + 0.5) * width_m / scale,
        (iy as f64 + 0.5) * width_m / scale,
    );
    (CellId { ix, iy }, center)
}

/// Aggregated metrics of one (cell, time bucket).
#[derive(Debug, Clone, PartialEq)]
pub struct CellAggregate {
    pub cell: CellId,
    pub center: Coordinates,
    pub time: String,
    pub means: MetricMeans,
    pub point_count: u32,
}

/// Aggregate the dataset at one scale, sorted by (cell, time bucket).
pub fn aggregate_level(dataset: &SpatialDataset, spec: &ScaleSpec) -> Vec<CellAggregate> {
    let width_m = spec.grid_size_m();
    let mut groups: BTreeMap<(CellId, &str), (Coordinates, MeanAccumulator)> = BTreeMap::new();
    for record in &dataset.records {
        let (cell, center) = assign_cell(record.coordinates, dataset.unit, width_m);
        groups
            .entry((cell, record.time.as_str()))
            .or_insert_with(|| (center, MeanAccumulator::default()))
            .1
            .add(
                record.precipitation,
                record.evapotranspiration,
                record.stock,
                record.gap,
            );
    }
    groups
        .into_iter()
        .map(|((cell, time), (center, acc))| CellAggregate {
            cell,
            center,
            time: time.to_string(),
            means: acc.means(),
            point_count: acc.count(),
        })
        .collect()
}

/// Summary figures logged for a level.
///
/// `reduction_pct` compares output rows with input rows, while
/// `spatial_reduction_pct` compares occupied cells with distinct input points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelStats {
    pub input_points: usize,
    pub cells: usize,
    pub spatial_reduction_pct: f64,
    pub rows: usize,
    pub reduction_pct: f64,
    pub avg_points_per_cell: f64,
}

fn reduction(before: usize, after: usize) -> f64 {
    if before == 0 {
        0.0
    } else {
        (1.0 - after as f64 / before as f64) * 100.0
    }
}

impl LevelStats {
    pub fn new(dataset: &SpatialDataset, aggregates: &[CellAggregate]) -> Self {
        let cells = aggregates
            .iter()
            .map(|a| a.cell)
            .collect::<BTreeSet<_>>()
            .len();
        let rows = aggregates.len();
        let avg_points_per_cell = if rows == 0 {
            0.0
        } else {
            aggregates.iter().map(|a| a.point_count as f64).sum::<f64>() / rows as f64
        };
        LevelStats {
            input_points: dataset.unique_points,
            cells,
            spatial_reduction_pct: reduction(dataset.unique_points, cells),
            rows,
            reduction_pct: reduction(dataset.records.len(), rows),
            avg_points_per_cell,
        }
    }
}

/// File name of a level's artifact: `{stem}_{level}_{km}km.csv`.
pub fn level_file_name(stem: &str, spec: &ScaleSpec) -> String {
    format!("{}_{}_{}km.csv", stem, spec.level, spec.grid_size_km)
}

/// Write a level's rows with a single header line.
pub fn write_level<W: Write>(
    output: W,
    time_column: TimeColumn,
    aggregates: &[CellAggregate],
) -> Result<W> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(output);
    writer.write_record([
        columns::GRID_CELL,
        columns::X,
        columns::Y,
        time_column.name(),
        columns::P,
        columns::ETP,
        columns::STOCK,
        columns::GAP,
        columns::POINT_COUNT,
    ])?;
    for aggregate in aggregates {
        let [p, etp, stock, gap] = aggregate.means.to_fields();
        writer.write_record([
            aggregate.cell.to_string(),
            aggregate.center.x.to_string(),
            aggregate.center.y.to_string(),
            aggregate.time.clone(),
            p,
            etp,
            stock,
            gap,
            aggregate.point_count.to_string(),
        ])?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| {
        PipelineError::Io(std::io::Error::new(e.error().kind(), e.error().to_string()))
    })
}

/// Text of `scales_metadata.txt`. `produced` maps each level written in this
/// run to its file name.
pub fn metadata_text(
    dataset: &SpatialDataset,
    table: &ScaleTable,
    produced: &BTreeMap<ScaleLevel, String>,
) -> String {
    let mut out = String::new();
    out.push_str("Multi-scale spatial aggregation\n");
    out.push_str("===============================\n\n");
    out.push_str(&format!("Source file: {}\n", dataset.source));
    out.push_str(&format!("Base grid size: {} km\n", table.base_grid_size_km()));
    out.push_str(&format!("Time column: {}\n", dataset.time_column.name()));
    out.push_str(&format!("Coordinate unit: {}\n", dataset.unit));
    match dataset.extent {
        Some(e) => out.push_str(&format!(
            "Extent: LAMBX {} .. {}, LAMBY {} .. {}\n",
            e.x_min, e.x_max, e.y_min, e.y_max
        )),
        None => out.push_str("Extent: empty dataset\n"),
    }
    out.push_str(&format!("Unique points: {}\n", dataset.unique_points));
    out.push_str(&format!("Input rows: {}\n\nScale levels:\n", dataset.records.len()));
    for spec in table.iter() {
        out.push_str(&format!(
            "- {}: {} km, {}, {}",
            spec.level,
            spec.grid_size_km,
            spec.description,
            spec.level.zoom_hint()
        ));
        if let Some(file) = produced.get(&spec.level) {
            out.push_str(&format!(" -> {file}"));
        }
        out.push('\n');
    }
    out
}
