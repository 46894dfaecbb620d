//! `run temporal`: daily balance file -> weekly means.

use crate::ensure_input;
use anyhow::Context;
use log::info;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};
use swd_aggregate::temporal::{aggregate_chunks, sort_weekly, DailyReader, TemporalStats};
use swd_core::config::PipelineConfig;
use swd_utils::fs::PendingArtifact;

/// Stream `input` through the weekly roll-up into `output`.
///
/// The input header is checked before the output is created, so a schema
/// error leaves nothing behind. Rows are appended to `output.partial` chunk
/// by chunk and the file is renamed into place at the end.
pub fn run_temporal(
    input: &Path,
    output: &Path,
    config: &PipelineConfig,
) -> anyhow::Result<TemporalStats> {
    ensure_input(input)?;
    let source = input.display().to_string();
    let file = File::open(input).with_context(|| format!("opening {source}"))?;
    let mut reader = DailyReader::new(BufReader::new(file), &source)?;

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    info!(
        "Aggregating {} to weekly means in chunks of {} rows",
        source, config.chunk_size
    );
    let (pending, file) = PendingArtifact::create(output)?;
    let (buffered, stats) = aggregate_chunks(&mut reader, BufWriter::new(file), config.chunk_size)?;
    buffered
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing {}: {}", output.display(), e.error()))?
        .sync_all()?;
    pending.commit()?;

    if config.sort_output {
        sort_in_place(output)?;
    }

    info!(
        "Weekly: {} daily rows -> {} weekly rows ({:.1}% reduction) in {} chunks -> {}",
        stats.rows_read,
        stats.weeks_written,
        stats.reduction_pct(),
        stats.chunks,
        output.display()
    );
    if stats.header_rows_dropped > 0 {
        info!("Dropped {} embedded header rows", stats.header_rows_dropped);
    }
    Ok(stats)
}

/// Rewrite a committed weekly file in (point, week) order.
fn sort_in_place(path: &Path) -> anyhow::Result<()> {
    let source = path.display().to_string();
    let input = BufReader::new(File::open(path)?);
    let (pending, file) = PendingArtifact::create(path)?;
    let rows = sort_weekly(input, &source, BufWriter::new(file))?;
    pending.commit()?;
    info!("Sorted {rows} weekly rows by point and week");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use swd_core::error::PipelineError;

    const DAILY: &str = "\
point,LAMBX,LAMBY,day,P,ETP,Kc,Stock,Gap,RU_max
\"(680,24010)\",680,24010,2024-01-07,1.0,1.0,0.9,10.0,0.0,50
\"(680,24010)\",680,24010,2024-01-08,3.0,1.0,0.9,20.0,0.0,50
\"(600,24010)\",600,24010,2024-01-07,2.0,4.0,0.9,30.0,1.0,50
\"(600,24010)\",600,24010,2024-01-08,4.0,4.0,0.9,40.0,0.0,50
";

    #[test]
    fn test_run_temporal_chunked_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("daily.csv");
        fs::write(&input, DAILY).unwrap();
        let output = dir.path().join("out").join("weekly.csv");

        let config = PipelineConfig {
            chunk_size: 1,
            ..PipelineConfig::default()
        };
        let stats = run_temporal(&input, &output, &config).unwrap();
        assert_eq!(stats.rows_read, 4);
        assert_eq!(stats.weeks_written, 4);
        let streamed = fs::read_to_string(&output).unwrap();
        assert!(streamed.lines().nth(1).unwrap().starts_with("\"(680,24010)\""));

        let config = PipelineConfig {
            sort_output: true,
            ..config
        };
        run_temporal(&input, &output, &config).unwrap();
        let sorted = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = sorted.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("\"(600,24010)\",600,24010,2024-W01,"));
        assert!(lines[4].starts_with("\"(680,24010)\",680,24010,2024-W02,"));
        assert!(!dir.path().join("out").join("weekly.csv.partial").exists());
    }

    #[test]
    fn test_leftover_partial_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("daily.csv");
        fs::write(&input, DAILY).unwrap();
        let output = dir.path().join("weekly.csv");
        let partial = dir.path().join("weekly.csv.partial");
        fs::write(&partial, "leftover,from,an,interrupted,run\n1,2,3,4,5\n").unwrap();

        run_temporal(&input, &output, &PipelineConfig::default()).unwrap();
        let written = fs::read_to_string(&output).unwrap();
        assert!(!written.contains("leftover"));
        assert!(written.starts_with("point,LAMBX,LAMBY,week,P,ETP,Stock,Gap\n"));
        assert_eq!(written.lines().count(), 5);
        assert!(!partial.exists());
    }

    #[test]
    fn test_schema_error_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("daily.csv");
        fs::write(&input, "point,LAMBX,LAMBY,day,P,ETP\n").unwrap();
        let output = dir.path().join("weekly.csv");
        let err = run_temporal(&input, &output, &PipelineConfig::default()).unwrap_err();
        let schema = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(schema, PipelineError::InputSchema { missing, .. } if missing == "Stock, Gap"));
        assert!(!output.exists());
        assert!(!dir.path().join("weekly.csv.partial").exists());
    }
}
