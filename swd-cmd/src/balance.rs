//! `run balance`: daily Stock/Gap series for every point.

use crate::{ensure_input, input_dir, input_stem};
use anyhow::Context;
use log::{debug, info};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use swd_core::{
    balance::{simulate, BalanceRecord},
    config::PipelineConfig,
    observation::DailyObservation,
    point::{CropShares, Point},
    schema::columns,
    stats::BalanceStats,
    warnings::{Warning, WarningLog},
};
use swd_data::{
    join::pair_points,
    observations::load_observations,
    points::{load_points, CROP_SHARE_COLUMNS},
};
use swd_utils::{dates::format_date, fs::PendingArtifact, rounding::fmt_fixed};

/// Decimals written for P, ETP, Stock and Gap.
const VALUE_DECIMALS: u32 = 1;
/// Decimals written for Kc.
const KC_DECIMALS: u32 = 3;

/// `<observations dir>/<stem>_balance.csv`
pub fn default_output(observations: &Path) -> PathBuf {
    input_dir(observations).join(format!("{}_balance.csv", input_stem(observations)))
}

#[derive(Debug, Clone, Default)]
pub struct BalanceSummary {
    pub points_written: usize,
    pub points_skipped: usize,
    pub rows_written: u64,
    pub stats: BalanceStats,
}

/// Balance writer. Crop share columns are present when the points file
/// carried them.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
    with_crop_shares: bool,
    rows: u64,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(output: W, with_crop_shares: bool) -> anyhow::Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(output);
        let mut header = vec![
            columns::POINT,
            columns::X,
            columns::Y,
            columns::DAY,
            columns::P,
            columns::ETP,
            columns::KC,
            columns::STOCK,
            columns::GAP,
            columns::RU_MAX,
        ];
        if with_crop_shares {
            header.extend(CROP_SHARE_COLUMNS);
        }
        writer.write_record(&header)?;
        Ok(BalanceWriter {
            writer,
            with_crop_shares,
            rows: 0,
        })
    }

    pub fn write_point(&mut self, point: &Point, records: &[BalanceRecord]) -> anyhow::Result<()> {
        let id = point.id();
        let shares = self.with_crop_shares.then(|| crop_share_fields(point.crop_shares));
        for record in records {
            let mut row = vec![
                id.clone(),
                record.coordinates.x.to_string(),
                record.coordinates.y.to_string(),
                format_date(&record.date),
                fmt_fixed(record.precipitation, VALUE_DECIMALS),
                fmt_fixed(record.evapotranspiration, VALUE_DECIMALS),
                fmt_fixed(record.kc, KC_DECIMALS),
                fmt_fixed(record.stock, VALUE_DECIMALS),
                fmt_fixed(record.gap, VALUE_DECIMALS),
                record.ru_max.to_string(),
            ];
            if let Some(shares) = &shares {
                row.extend(shares.iter().cloned());
            }
            self.writer.write_record(&row)?;
        }
        self.rows += records.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> anyhow::Result<(W, u64)> {
        self.writer.flush()?;
        let rows = self.rows;
        let output = self
            .writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing balance output: {}", e.error()))?;
        Ok((output, rows))
    }
}

fn crop_share_fields(shares: Option<CropShares>) -> [String; 5] {
    match shares {
        Some(s) => [
            s.irrigated.to_string(),
            s.cereals.to_string(),
            s.prairies.to_string(),
            s.permanent.to_string(),
            s.vineyards.to_string(),
        ],
        None => Default::default(),
    }
}

/// Simulate every paired point and stream the rows out, point-major.
pub fn simulate_points<W: Write>(
    paired: &[(Point, Vec<DailyObservation>)],
    config: &PipelineConfig,
    writer: &mut BalanceWriter<W>,
    warnings: &mut WarningLog,
) -> anyhow::Result<BalanceSummary> {
    let mut summary = BalanceSummary::default();
    for (point, observations) in paired {
        match simulate(point, observations, config.reset_policy) {
            Ok(records) => {
                writer.write_point(point, &records)?;
                summary.stats.add_point(&records);
                summary.points_written += 1;
                summary.rows_written += records.len() as u64;
            }
            Err(e) => {
                debug!("Skipping {}: {}", point.id(), e);
                warnings.push(Warning::InvalidSeries {
                    point: point.id(),
                    reason: e.to_string(),
                });
                summary.points_skipped += 1;
            }
        }
    }
    Ok(summary)
}

fn log_stats(stats: &BalanceStats) {
    for point in stats.points() {
        debug!(
            "{}: total gap {:.1} mm, max {:.1} mm, {} deficit days (first {}), stock mean {:.1} min {:.1}",
            point.coordinates.point_id(),
            point.total_gap,
            point.max_gap,
            point.days_with_gap,
            point
                .first_gap_date
                .map_or_else(|| "none".to_string(), |d| format_date(&d)),
            point.mean_stock,
            point.min_stock
        );
    }
    info!(
        "Deficit on {} of {} points",
        stats.points_with_gap(),
        stats.points().len()
    );
    if let Some(worst) = stats.worst_point() {
        info!(
            "Largest cumulated deficit: {} with {:.1} mm over {} days",
            worst.coordinates.point_id(),
            worst.total_gap,
            worst.days_with_gap
        );
    }
    for year in stats.years() {
        info!(
            "{}: mean gap {:.2} mm/day, max gap {:.1} mm ({} point-days)",
            year.year, year.mean_gap, year.max_gap, year.days
        );
    }
}

/// Load the collaborator inputs, run the balance and write `output`.
pub fn run_balance(
    observations_path: &Path,
    points_path: &Path,
    output: &Path,
    config: &PipelineConfig,
) -> anyhow::Result<BalanceSummary> {
    ensure_input(observations_path)?;
    ensure_input(points_path)?;
    let mut warnings = WarningLog::new();

    let points = load_points(
        BufReader::new(File::open(points_path)?),
        &points_path.display().to_string(),
        config,
        &mut warnings,
    )?;
    let with_crop_shares = points.values().any(|p| p.crop_shares.is_some());
    let observations = load_observations(
        BufReader::new(File::open(observations_path)?),
        &observations_path.display().to_string(),
        config,
    )?;
    let paired = pair_points(points, observations, config, &mut warnings);

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let (pending, file) = PendingArtifact::create(output)?;
    let mut writer = BalanceWriter::new(BufWriter::new(file), with_crop_shares)?;
    let summary = simulate_points(&paired, config, &mut writer, &mut warnings)?;
    let (buffered, _) = writer.finish()?;
    buffered
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing {}: {}", output.display(), e.error()))?
        .sync_all()?;
    pending.commit()?;

    info!(
        "Balance: {} rows for {} points ({} skipped, {:?} reset) -> {}",
        summary.rows_written,
        summary.points_written,
        summary.points_skipped,
        config.reset_policy,
        output.display()
    );
    log_stats(&summary.stats);
    warnings.summarize("balance");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const POINTS: &str = "\
LAMBX,LAMBY,soil_class,avg_kc,pct_irrigated,pct_cereals,pct_prairies,pct_permanent,pct_vineyards
600,24010,3,1.0,3.5,41,30.2,1,0
680,24010,1,0.5,0,12,70.5,0,2.1
";

    const OBSERVATIONS: &str = "\
LAMBX,LAMBY,DATE,PRE,ETP
600,24010,20200102,0,95
600,24010,20200101,0,10
600,24010,20200103,200,5
680,24010,20200101,1,2
680,24010,20200103,1,2
760,24010,20200101,4,2
";

    fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let obs = dir.join("sim.csv");
        let points = dir.join("points.csv");
        fs::write(&obs, OBSERVATIONS).unwrap();
        fs::write(&points, POINTS).unwrap();
        (obs, points)
    }

    #[test]
    fn test_run_balance_writes_rounded_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (obs, points) = write_inputs(dir.path());
        let output = default_output(&obs);
        assert_eq!(output, dir.path().join("sim_balance.csv"));

        let summary = run_balance(&obs, &points, &output, &PipelineConfig::default()).unwrap();
        // (680,24010) has a missing day and is skipped; (760,24010) is defaulted
        assert_eq!(summary.points_written, 2);
        assert_eq!(summary.points_skipped, 1);
        assert_eq!(summary.rows_written, 4);

        let points = summary.stats.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].coordinates.point_id(), "(600,24010)");
        assert_eq!(points[0].total_gap, 5.0);
        assert_eq!(points[0].days_with_gap, 1);
        assert_eq!(
            points[0].first_gap_date.map(|d| format_date(&d)).as_deref(),
            Some("2020-01-02")
        );
        assert_eq!(points[0].min_stock, 0.0);
        assert!((points[0].mean_stock - 190.0 / 3.0).abs() < 1e-9);
        assert_eq!(points[1].days_with_gap, 0);
        assert_eq!(points[1].mean_stock, 120.0);
        let years = summary.stats.years();
        assert_eq!(years.len(), 1);
        assert_eq!(years[0].year, 2020);
        assert_eq!(years[0].days, 4);
        assert_eq!(years[0].mean_gap, 1.25);
        assert_eq!(years[0].max_gap, 5.0);

        let text = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "point,LAMBX,LAMBY,day,P,ETP,Kc,Stock,Gap,RU_max,pct_irrigated,pct_cereals,pct_prairies,pct_permanent,pct_vineyards"
        );
        assert_eq!(lines[1], "\"(600,24010)\",600,24010,2020-01-01,0.0,10.0,1.000,90.0,0.0,100,3.5,41,30.2,1,0");
        assert_eq!(lines[2], "\"(600,24010)\",600,24010,2020-01-02,0.0,95.0,1.000,0.0,5.0,100,3.5,41,30.2,1,0");
        assert_eq!(lines[3], "\"(600,24010)\",600,24010,2020-01-03,200.0,5.0,1.000,100.0,0.0,100,3.5,41,30.2,1,0");
        assert_eq!(lines[4], "\"(760,24010)\",760,24010,2020-01-01,4.0,2.0,0.900,120.0,0.0,120,,,,,");
        assert_eq!(lines.len(), 5);
        assert!(!dir.path().join("sim_balance.csv.partial").exists());
    }

    #[test]
    fn test_run_balance_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let (obs, _) = write_inputs(dir.path());
        let output = dir.path().join("out.csv");
        let err = run_balance(&obs, &dir.path().join("nope.csv"), &output, &PipelineConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(!output.exists());
    }

    #[test]
    fn test_balance_without_crop_shares() {
        let point = Point::new(swd_core::point::Coordinates::new(1.0, 2.0), 50.0, 0.5);
        let mut writer = BalanceWriter::new(Vec::new(), false).unwrap();
        writer.write_point(&point, &[]).unwrap();
        let (out, rows) = writer.finish().unwrap();
        assert_eq!(rows, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "point,LAMBX,LAMBY,day,P,ETP,Kc,Stock,Gap,RU_max\n"
        );
    }
}
