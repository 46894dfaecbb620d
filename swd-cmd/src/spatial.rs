//! `run spatial`: one aggregated file per scale level plus the metadata file.

use crate::{ensure_input, input_stem};
use anyhow::Context;
use log::info;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};
use swd_aggregate::spatial::{
    aggregate_level, level_file_name, metadata_text, write_level, LevelStats, SpatialDataset,
};
use swd_core::{config::PipelineConfig, scale::ScaleLevel};
use swd_utils::fs::{remove_stale, write_atomic, PendingArtifact};

/// Completion marker of the spatial stage.
pub const METADATA_FILE: &str = "scales_metadata.txt";

/// Aggregate `input` at the requested levels (all levels when `levels` is
/// empty) into `output_dir`. Returns the level files written.
///
/// Levels run concurrently on the blocking pool over one shared copy of the
/// dataset; files are written here, one level at a time, and the metadata
/// file last.
pub async fn run_spatial(
    input: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
    levels: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    ensure_input(input)?;
    let table = config.scale_table()?;
    let selected = table.select(levels)?;

    let source = input.display().to_string();
    let file = File::open(input).with_context(|| format!("opening {source}"))?;
    let dataset = tokio::task::spawn_blocking(move || {
        SpatialDataset::load(BufReader::new(file), &source)
    })
    .await??;
    let dataset = Arc::new(dataset);

    // The previous outputs stay untouched until the new input has loaded.
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let marker = output_dir.join(METADATA_FILE);
    if remove_stale(&marker)? {
        info!("Removed stale {}", marker.display());
    }

    let tasks: Vec<_> = selected
        .iter()
        .map(|&level| {
            let spec = table.get(level).clone();
            let dataset = Arc::clone(&dataset);
            let task = tokio::task::spawn_blocking(move || aggregate_level(&dataset, &spec));
            (level, task)
        })
        .collect();

    let stem = input_stem(input);
    let mut produced = BTreeMap::new();
    let mut written = Vec::with_capacity(tasks.len());
    for (level, task) in tasks {
        let aggregates = task.await?;
        let spec = table.get(level);
        let name = level_file_name(&stem, spec);
        let path = output_dir.join(&name);

        let (pending, file) = PendingArtifact::create(&path)?;
        let buffered = write_level(BufWriter::new(file), dataset.time_column, &aggregates)?;
        buffered
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing {}: {}", path.display(), e.error()))?
            .sync_all()?;
        pending.commit()?;

        let stats = LevelStats::new(&dataset, &aggregates);
        info!(
            "{} ({} km): {} points -> {} cells ({:.1}% spatial reduction), {} rows ({:.1}% reduction), {:.1} points per cell -> {}",
            level,
            spec.grid_size_km,
            stats.input_points,
            stats.cells,
            stats.spatial_reduction_pct,
            stats.rows,
            stats.reduction_pct,
            stats.avg_points_per_cell,
            name
        );
        produced.insert(level, name);
        written.push(path);
    }

    for stale in stale_level_files(output_dir, &stem, &produced)? {
        std::fs::remove_file(&stale)
            .with_context(|| format!("removing {}", stale.display()))?;
        info!("Removed level file not in this run: {}", stale.display());
    }

    write_atomic(&marker, &metadata_text(&dataset, &table, &produced))?;
    info!(
        "Spatial: {} level(s) written to {}",
        written.len(),
        output_dir.display()
    );
    Ok(written)
}

/// Level files of `stem` in `dir` that this run did not produce, such as
/// levels left out of a subset run or files of another base grid size.
fn stale_level_files(
    dir: &Path,
    stem: &str,
    produced: &BTreeMap<ScaleLevel, String>,
) -> anyhow::Result<Vec<PathBuf>> {
    let prefix = format!("{stem}_level_");
    let mut stale = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix)
            && name.ends_with("km.csv")
            && !produced.values().any(|p| *p == name)
            && entry.file_type()?.is_file()
        {
            stale.push(entry.path());
        }
    }
    stale.sort();
    Ok(stale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use swd_core::error::PipelineError;

    const WEEKLY: &str = "\
point,LAMBX,LAMBY,week,P,ETP,Stock,Gap
\"(600,24010)\",600,24010,2024-W01,1.000,2.000,80.000,0.000
\"(605,24010)\",605,24010,2024-W01,3.000,4.000,60.000,1.000
\"(700,24050)\",700,24050,2024-W01,5.000,6.000,40.000,2.000
";

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("weekly.csv");
        fs::write(&input, WEEKLY).unwrap();
        (dir, input)
    }

    #[tokio::test]
    async fn test_all_levels_and_metadata() {
        let (dir, input) = setup();
        let out = dir.path().join("spatial_scales");
        let written = run_spatial(&input, &out, &PipelineConfig::default(), &[])
            .await
            .unwrap();
        assert_eq!(written.len(), 7);
        for km in [8u32, 16, 32, 64, 128, 256, 512] {
            let level = km.trailing_zeros() - 3;
            assert!(out.join(format!("weekly_level_{level}_{km}km.csv")).exists());
        }
        let level0 = fs::read_to_string(out.join("weekly_level_0_8km.csv")).unwrap();
        // 600 and 605 km share an 8 km bin ([600, 608))
        assert_eq!(level0.lines().count(), 3);
        let level6 = fs::read_to_string(out.join("weekly_level_6_512km.csv")).unwrap();
        assert_eq!(level6.lines().count(), 2);
        assert!(level6.lines().nth(1).unwrap().ends_with(",3"));

        let metadata = fs::read_to_string(out.join(METADATA_FILE)).unwrap();
        assert!(metadata.contains("weekly_level_3_64km.csv"));
        assert!(metadata.contains("Unique points: 3"));
    }

    #[tokio::test]
    async fn test_level_subset_and_rerun() {
        let (dir, input) = setup();
        let out = dir.path().join("scales");
        let levels = vec!["level_1".to_string()];
        let config = PipelineConfig::default();
        let written = run_spatial(&input, &out, &config, &levels).await.unwrap();
        assert_eq!(written, vec![out.join("weekly_level_1_16km.csv")]);
        let first = fs::read(&written[0]).unwrap();

        run_spatial(&input, &out, &config, &levels).await.unwrap();
        assert_eq!(fs::read(&written[0]).unwrap(), first);
        assert!(!out.join("weekly_level_0_8km.csv").exists());
    }

    #[tokio::test]
    async fn test_subset_run_removes_other_level_files() {
        let (dir, input) = setup();
        let out = dir.path().join("scales");
        let config = PipelineConfig::default();
        run_spatial(&input, &out, &config, &[]).await.unwrap();
        fs::write(out.join("notes.txt"), "kept").unwrap();

        let levels = vec!["level_1".to_string()];
        run_spatial(&input, &out, &config, &levels).await.unwrap();
        let mut names: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["notes.txt", "scales_metadata.txt", "weekly_level_1_16km.csv"]
        );
        let metadata = fs::read_to_string(out.join(METADATA_FILE)).unwrap();
        assert!(metadata.contains("-> weekly_level_1_16km.csv"));
        assert!(!metadata.contains("weekly_level_0_8km.csv"));
    }

    #[tokio::test]
    async fn test_bad_input_keeps_previous_outputs() {
        let (dir, input) = setup();
        let out = dir.path().join("scales");
        let config = PipelineConfig::default();
        run_spatial(&input, &out, &config, &[]).await.unwrap();
        let marker = out.join(METADATA_FILE);
        let metadata = fs::read_to_string(&marker).unwrap();

        fs::write(&input, "point,LAMBX,LAMBY,P,ETP,Stock,Gap
").unwrap();
        let err = run_spatial(&input, &out, &config, &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoTimeColumn { .. })
        ));
        assert_eq!(fs::read_to_string(&marker).unwrap(), metadata);
        assert!(out.join("weekly_level_0_8km.csv").exists());
    }

    #[tokio::test]
    async fn test_bad_input_creates_no_output_dir() {
        let (dir, input) = setup();
        fs::write(&input, "point,LAMBX,LAMBY,week,P
").unwrap();
        let out = dir.path().join("scales");
        assert!(run_spatial(&input, &out, &PipelineConfig::default(), &[])
            .await
            .is_err());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_unknown_level_rejected_before_output() {
        let (dir, input) = setup();
        let out = dir.path().join("scales");
        let levels = vec!["level_7".to_string()];
        let err = run_spatial(&input, &out, &PipelineConfig::default(), &levels)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownScaleLevel { .. })
        ));
        assert!(err.to_string().contains("level_0, level_1"));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_spatial(
            &dir.path().join("absent.csv"),
            dir.path(),
            &PipelineConfig::default(),
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput(_))
        ));
    }
}
