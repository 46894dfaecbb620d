//! `run both`: weekly roll-up, then every spatial level on the weekly file.

use crate::{ensure_input, input_dir, input_stem, spatial::run_spatial, temporal::run_temporal};
use anyhow::Context;
use log::info;
use std::path::{Path, PathBuf};
use swd_aggregate::temporal::TemporalStats;
use swd_core::config::PipelineConfig;
use swd_utils::fs::{remove_stale, write_atomic};

/// Completion marker of the combined workflow.
pub const SUMMARY_FILE: &str = "aggregation_summary.txt";

/// `<input dir>/<stem>_weekly.csv`
pub fn default_weekly_path(input: &Path) -> PathBuf {
    input_dir(input).join(format!("{}_weekly.csv", input_stem(input)))
}

/// `<input dir>/spatial_scales`
pub fn default_spatial_dir(input: &Path) -> PathBuf {
    input_dir(input).join("spatial_scales")
}

/// Every path the combined workflow reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub weekly: PathBuf,
    pub spatial_dir: PathBuf,
    pub summary: PathBuf,
}

impl PipelinePaths {
    /// Lay out the outputs under `output_dir`, or `<input dir>/aggregated_data`.
    pub fn new(input: &Path, output_dir: Option<PathBuf>) -> Self {
        let output_dir = output_dir.unwrap_or_else(|| input_dir(input).join("aggregated_data"));
        PipelinePaths {
            input: input.to_path_buf(),
            weekly: output_dir.join(format!("{}_weekly.csv", input_stem(input))),
            spatial_dir: output_dir.join("spatial_scales"),
            summary: output_dir.join(SUMMARY_FILE),
            output_dir,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn summary_text(
    paths: &PipelinePaths,
    config: &PipelineConfig,
    stats: &TemporalStats,
    spatial_files: &[PathBuf],
) -> String {
    let mut out = String::new();
    out.push_str("Soil water deficit aggregation summary\n");
    out.push_str("======================================\n\n");
    out.push_str(&format!("Input: {}\n", paths.input.display()));
    out.push_str(&format!("Base grid size: {} km\n", config.base_grid_size_km));
    out.push_str(&format!("Chunk size: {} rows\n\n", config.chunk_size));
    out.push_str("Temporal aggregation:\n");
    out.push_str(&format!("- {}\n", file_name(&paths.weekly)));
    out.push_str(&format!(
        "  {} daily rows -> {} weekly rows ({:.1}% reduction)\n\n",
        stats.rows_read,
        stats.weeks_written,
        stats.reduction_pct()
    ));
    out.push_str(&format!("Spatial aggregation ({}):\n", file_name(&paths.spatial_dir)));
    for file in spatial_files {
        out.push_str(&format!("- {}\n", file_name(file)));
    }
    out
}

/// Run the weekly and spatial stages and write the summary last.
///
/// A stale summary is removed first so an interrupted re-run never looks
/// complete. Every artifact is rewritten, never appended to.
pub async fn run_both(paths: &PipelinePaths, config: &PipelineConfig) -> anyhow::Result<()> {
    ensure_input(&paths.input)?;
    std::fs::create_dir_all(&paths.output_dir)
        .with_context(|| format!("creating {}", paths.output_dir.display()))?;
    if remove_stale(&paths.summary)? {
        info!("Removed stale {}", paths.summary.display());
    }

    info!("Step 1/2: weekly aggregation of {}", paths.input.display());
    let stats = run_temporal(&paths.input, &paths.weekly, config)?;

    info!("Step 2/2: spatial aggregation of {}", paths.weekly.display());
    let spatial_files = run_spatial(&paths.weekly, &paths.spatial_dir, config, &[]).await?;

    write_atomic(
        &paths.summary,
        &summary_text(paths, config, &stats, &spatial_files),
    )?;
    info!("Aggregation complete: {}", paths.summary.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn daily(points: &[(u32, u32)], days: u32) -> String {
        let mut out = String::from("point,LAMBX,LAMBY,day,P,ETP,Kc,Stock,Gap,RU_max\n");
        for (x, y) in points {
            for d in 1..=days {
                out.push_str(&format!(
                    "\"({x},{y})\",{x},{y},2023-01-{d:02},{}.0,2.0,0.9,{}.0,0.0,120\n",
                    d % 3,
                    100 - d
                ));
            }
        }
        out
    }

    fn list(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_default_paths() {
        let input = Path::new("data/balance.csv");
        assert_eq!(default_weekly_path(input), PathBuf::from("data/balance_weekly.csv"));
        assert_eq!(default_spatial_dir(input), PathBuf::from("data/spatial_scales"));
        let paths = PipelinePaths::new(input, None);
        assert_eq!(paths.output_dir, PathBuf::from("data/aggregated_data"));
        assert_eq!(paths.weekly, PathBuf::from("data/aggregated_data/balance_weekly.csv"));
        assert_eq!(
            paths.spatial_dir,
            PathBuf::from("data/aggregated_data/spatial_scales")
        );
        assert_eq!(
            paths.summary,
            PathBuf::from("data/aggregated_data/aggregation_summary.txt")
        );
    }

    #[tokio::test]
    async fn test_run_both_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("balance.csv");
        fs::write(&input, daily(&[(600, 24010), (610, 24010), (900, 24010)], 20)).unwrap();
        let paths = PipelinePaths::new(&input, None);
        let config = PipelineConfig {
            chunk_size: 7,
            ..PipelineConfig::default()
        };

        run_both(&paths, &config).await.unwrap();
        let weekly = fs::read_to_string(&paths.weekly).unwrap();
        // 2023-01-01 is a Sunday: weeks 00, 01, 02 and 03 per point
        assert_eq!(weekly.lines().count(), 1 + 3 * 4);
        let level2 = paths.spatial_dir.join("balance_weekly_level_2_32km.csv");
        let first_level2 = fs::read(&level2).unwrap();
        let summary = fs::read_to_string(&paths.summary).unwrap();
        assert!(summary.contains("balance_weekly.csv"));
        assert!(summary.contains("balance_weekly_level_6_512km.csv"));
        assert!(summary.contains("60 daily rows -> 12 weekly rows (80.0% reduction)"));

        run_both(&paths, &config).await.unwrap();
        assert_eq!(fs::read_to_string(&paths.weekly).unwrap(), weekly);
        assert_eq!(fs::read(&level2).unwrap(), first_level2);
        assert_eq!(
            list(&paths.output_dir),
            vec!["aggregation_summary.txt", "balance_weekly.csv", "spatial_scales"]
        );
        assert_eq!(list(&paths.spatial_dir).len(), 8);
    }

    #[tokio::test]
    async fn test_leftover_partials_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("balance.csv");
        fs::write(&input, daily(&[(600, 24010)], 3)).unwrap();
        let paths = PipelinePaths::new(&input, None);
        fs::create_dir_all(&paths.spatial_dir).unwrap();
        let weekly_partial = paths.output_dir.join("balance_weekly.csv.partial");
        let level_partial = paths.spatial_dir.join("balance_weekly_level_0_8km.csv.partial");
        fs::write(&weekly_partial, "junk\n").unwrap();
        fs::write(&level_partial, "junk\n").unwrap();

        run_both(&paths, &PipelineConfig::default()).await.unwrap();
        assert!(!weekly_partial.exists());
        assert!(!level_partial.exists());
        let weekly = fs::read_to_string(&paths.weekly).unwrap();
        assert!(!weekly.contains("junk"));
        // 2023-01-01 is in week 00, 01-02 and 01-03 in week 01
        assert_eq!(weekly.lines().count(), 3);
        let level0 = fs::read_to_string(paths.spatial_dir.join("balance_weekly_level_0_8km.csv")).unwrap();
        assert!(!level0.contains("junk"));
        assert_eq!(list(&paths.spatial_dir).len(), 8);
    }

    #[tokio::test]
    async fn test_failed_run_leaves_no_summary() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("balance.csv");
        fs::write(&input, daily(&[(600, 24010)], 3)).unwrap();
        let paths = PipelinePaths::new(&input, Some(dir.path().join("out")));
        run_both(&paths, &PipelineConfig::default()).await.unwrap();
        assert!(paths.summary.exists());

        fs::write(&input, "point,LAMBX,LAMBY,week\n").unwrap();
        assert!(run_both(&paths, &PipelineConfig::default()).await.is_err());
        assert!(!paths.summary.exists());
    }
}
