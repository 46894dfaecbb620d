//! Daily -> weekly roll-up under a fixed memory ceiling.
//!
//! Input is the point-major daily balance stream (`point, LAMBX, LAMBY, day,
//! P, ETP, ..., Stock, Gap, ...`). It is read in chunks of a fixed number of
//! rows. A point's rows may straddle two chunks, so the rows of the last point
//! in every chunk are held back in a [`ChunkCarry`] and prepended to the next
//! chunk; everything else is aggregated and appended to the output at once.
//! [`TemporalAggregator::finish`] flushes whatever is still carried at end of
//! stream.
//!
//! Every point is aggregated from all of its rows in a single pass, so the
//! output (rows, values and order) is the same for any chunk size. Memory is
//! bounded by the chunk size plus the longest single-point run.

use crate::{MeanAccumulator, MetricMeans};
use chrono::NaiveDate;
use csv::StringRecord;
use log::debug;
use std::{
    collections::HashMap,
    io::{Read, Write},
};
use swd_core::{
    error::{PipelineError, Result},
    point::Coordinates,
    schema::{columns, is_header_row, parse_field, require_columns},
};
use swd_utils::dates::{parse_date, week_id};

/// Header of the weekly artifact.
pub const WEEKLY_HEADER: [&str; 8] = [
    columns::POINT,
    columns::X,
    columns::Y,
    columns::WEEK,
    columns::P,
    columns::ETP,
    columns::STOCK,
    columns::GAP,
];

/// One parsed daily balance row.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub point: String,
    pub coordinates: Coordinates,
    pub date: NaiveDate,
    pub week: String,
    pub precipitation: f64,
    pub evapotranspiration: f64,
    pub stock: f64,
    pub gap: f64,
}

/// Chunked reader over a daily balance CSV.
pub struct DailyReader<R: Read> {
    reader: csv::Reader<R>,
    headers: StringRecord,
    positions: [usize; 8],
    source: String,
    rows_read: u64,
    header_rows_dropped: u64,
    exhausted: bool,
}

impl<R: Read> DailyReader<R> {
    /// Read the header and locate the required columns. Fails with an input
    /// schema error before anything is written downstream.
    pub fn new(input: R, source: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        let headers = reader.headers()?.clone();
        let positions = require_columns(
            &headers,
            [
                columns::POINT,
                columns::X,
                columns::Y,
                columns::DAY,
                columns::P,
                columns::ETP,
                columns::STOCK,
                columns::GAP,
            ],
            source,
        )?;
        Ok(DailyReader {
            reader,
            headers,
            positions,
            source: source.to_string(),
            rows_read: 0,
            header_rows_dropped: 0,
            exhausted: false,
        })
    }

    /// Data rows returned so far (embedded header rows excluded).
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn header_rows_dropped(&self) -> u64 {
        self.header_rows_dropped
    }

    fn parse(&self, record: &StringRecord) -> Result<DailyRow> {
        let [point, x, y, day, p, etp, stock, gap] = self.positions;
        let source = self.source.as_str();
        let raw_day: String = parse_field(record, day, columns::DAY, source)?;
        let date = parse_date(&raw_day).map_err(|_| PipelineError::MalformedRow {
            path: self.source.clone(),
            line: record.position().map_or(0, |pos| pos.line()),
            reason: format!("cannot parse '{raw_day}' as day (expected YYYY-MM-DD)"),
        })?;
        Ok(DailyRow {
            point: parse_field(record, point, columns::POINT, source)?,
            coordinates: Coordinates::new(
                parse_field(record, x, columns::X, source)?,
                parse_field(record, y, columns::Y, source)?,
            ),
            week: week_id(&date),
            date,
            precipitation: parse_field(record, p, columns::P, source)?,
            evapotranspiration: parse_field(record, etp, columns::ETP, source)?,
            stock: parse_field(record, stock, columns::STOCK, source)?,
            gap: parse_field(record, gap, columns::GAP, source)?,
        })
    }

    /// Read the next `chunk_size` raw rows, dropping repeated header rows.
    /// Returns `None` once the input is exhausted.
    pub fn next_chunk(&mut self, chunk_size: usize) -> Result<Option<Vec<DailyRow>>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut chunk = Vec::with_capacity(chunk_size.min(1 << 16));
        let mut record = StringRecord::new();
        let mut raw = 0usize;
        while raw < chunk_size {
            if !self.reader.read_record(&mut record)? {
                self.exhausted = true;
                break;
            }
            raw += 1;
            if is_header_row(&record, &self.headers) {
                self.header_rows_dropped += 1;
                continue;
            }
            chunk.push(self.parse(&record)?);
        }
        if raw == 0 {
            return Ok(None);
        }
        self.rows_read += chunk.len() as u64;
        Ok(Some(chunk))
    }
}

/// Raw rows of the point that ended the previous chunk.
#[derive(Debug, Default)]
pub struct ChunkCarry {
    rows: Vec<DailyRow>,
}

impl ChunkCarry {
    /// Prepend the carried rows to `chunk`, hold back every row of the
    /// resulting last point, and return the rest for aggregation.
    pub fn absorb(&mut self, chunk: Vec<DailyRow>) -> Vec<DailyRow> {
        let mut rows = std::mem::take(&mut self.rows);
        rows.extend(chunk);
        let Some(last) = rows.last().map(|r| r.point.clone()) else {
            return Vec::new();
        };
        let (carried, finalized): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.point == last);
        self.rows = carried;
        finalized
    }

    /// End of stream: everything still held back is final.
    pub fn flush(&mut self) -> Vec<DailyRow> {
        std::mem::take(&mut self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Weekly means of one point.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekBucket {
    pub point: String,
    pub coordinates: Coordinates,
    pub week: String,
    pub means: MetricMeans,
    pub days: u32,
}

impl WeekBucket {
    pub fn to_record(&self) -> [String; 8] {
        let [p, etp, stock, gap] = self.means.to_fields();
        [
            self.point.clone(),
            self.coordinates.x.to_string(),
            self.coordinates.y.to_string(),
            self.week.clone(),
            p,
            etp,
            stock,
            gap,
        ]
    }
}

/// Group rows by (point, coordinates, week), in order of first appearance.
pub fn aggregate_weeks(rows: &[DailyRow]) -> Vec<WeekBucket> {
    let mut index: HashMap<(&str, Coordinates, &str), usize> = HashMap::new();
    let mut groups: Vec<(&DailyRow, MeanAccumulator)> = Vec::new();
    for row in rows {
        let key = (row.point.as_str(), row.coordinates, row.week.as_str());
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push((row, MeanAccumulator::default()));
            groups.len() - 1
        });
        groups[slot]
            .1
            .add(row.precipitation, row.evapotranspiration, row.stock, row.gap);
    }
    groups
        .into_iter()
        .map(|(first, acc)| WeekBucket {
            point: first.point.clone(),
            coordinates: first.coordinates,
            week: first.week.clone(),
            means: acc.means(),
            days: acc.count(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemporalStats {
    pub rows_read: u64,
    pub header_rows_dropped: u64,
    pub weeks_written: u64,
    pub chunks: u64,
}

impl TemporalStats {
    /// Percentage of rows removed by the roll-up.
    pub fn reduction_pct(&self) -> f64 {
        if self.rows_read == 0 {
            return 0.0;
        }
        (1.0 - self.weeks_written as f64 / self.rows_read as f64) * 100.0
    }
}

/// Append-only weekly writer fed chunk by chunk.
pub struct TemporalAggregator<W: Write> {
    writer: csv::Writer<W>,
    carry: ChunkCarry,
    stats: TemporalStats,
}

impl<W: Write> TemporalAggregator<W> {
    /// Write the header line and start an empty carry.
    pub fn new(output: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(output);
        writer.write_record(WEEKLY_HEADER)?;
        Ok(TemporalAggregator {
            writer,
            carry: ChunkCarry::default(),
            stats: TemporalStats::default(),
        })
    }

    /// Rows currently held back for the next chunk.
    pub fn carried_rows(&self) -> usize {
        self.carry.len()
    }

    pub fn push_chunk(&mut self, chunk: Vec<DailyRow>) -> Result<()> {
        self.stats.chunks += 1;
        let finalized = self.carry.absorb(chunk);
        if finalized.is_empty() {
            return Ok(());
        }
        self.write_buckets(&aggregate_weeks(&finalized))
    }

    fn write_buckets(&mut self, buckets: &[WeekBucket]) -> Result<()> {
        for bucket in buckets {
            self.writer.write_record(bucket.to_record())?;
        }
        self.writer.flush()?;
        self.stats.weeks_written += buckets.len() as u64;
        Ok(())
    }

    /// Aggregate the carried tail and hand back the output.
    pub fn finish(mut self) -> Result<(W, TemporalStats)> {
        let tail = self.carry.flush();
        if !tail.is_empty() {
            let buckets = aggregate_weeks(&tail);
            self.write_buckets(&buckets)?;
        }
        let stats = self.stats;
        let output = self.writer.into_inner().map_err(|e| {
            PipelineError::Io(std::io::Error::new(e.error().kind(), e.error().to_string()))
        })?;
        Ok((output, stats))
    }
}

/// Drive a reader through the aggregator chunk by chunk.
pub fn aggregate_chunks<R: Read, W: Write>(
    reader: &mut DailyReader<R>,
    output: W,
    chunk_size: usize,
) -> Result<(W, TemporalStats)> {
    if chunk_size == 0 {
        return Err(PipelineError::InvalidConfiguration(
            "chunk size must be at least 1".to_string(),
        ));
    }
    let mut aggregator = TemporalAggregator::new(output)?;
    while let Some(chunk) = reader.next_chunk(chunk_size)? {
        aggregator.push_chunk(chunk)?;
        debug!(
            "Processed {} rows, carrying {}",
            reader.rows_read(),
            aggregator.carried_rows()
        );
    }
    let (output, mut stats) = aggregator.finish()?;
    stats.rows_read = reader.rows_read();
    stats.header_rows_dropped = reader.header_rows_dropped();
    Ok((output, stats))
}

/// Rewrite a weekly artifact in strict (point, week) order. Loads the whole
/// weekly file, which is several times smaller than the daily input.
pub fn sort_weekly<R: Read, W: Write>(input: R, source: &str, output: W) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);
    let headers = reader.headers()?.clone();
    let [point, week] = require_columns(&headers, [columns::POINT, columns::WEEK], source)?;
    let mut records = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    records.retain(|r| !is_header_row(r, &headers));
    records.sort_by(|a, b| {
        (a.get(point), a.get(week)).cmp(&(b.get(point), b.get(week)))
    });

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(output);
    writer.write_record(&headers)?;
    for record in &records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(records.len() as u64)
}
