//! Command implementations for the SWD CLI.
//!
//! Each pipeline stage can be run on its own against an existing upstream
//! artifact, or the weekly and spatial stages can be chained with
//! `run both`.

use anyhow::Context;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use swd_core::{balance::ResetPolicy, config::PipelineConfig, error::PipelineError};

pub mod balance;
pub mod pipeline;
pub mod spatial;
pub mod temporal;

#[derive(Subcommand)]
pub enum Command {
    /// Run one pipeline stage, or the weekly and spatial stages together
    Run {
        #[command(subcommand)]
        stage: Stage,
    },
}

#[derive(Subcommand)]
pub enum Stage {
    /// Compute the daily Stock/Gap series for every point
    Balance {
        /// Daily observations CSV (LAMBX,LAMBY,DATE,PRE,ETP)
        observations: PathBuf,

        /// Points CSV (LAMBX,LAMBY,soil_class,avg_kc[,pct_*])
        points: PathBuf,

        /// Output CSV (default: <observations dir>/<stem>_balance.csv)
        output: Option<PathBuf>,

        /// Reservoir refill policy: yearly or run-start
        #[arg(long)]
        reset_policy: Option<ResetPolicy>,
    },

    /// Roll a daily balance file up to weekly means
    Temporal {
        /// Daily balance CSV, point-major
        input: PathBuf,

        /// Output CSV (default: <input dir>/<stem>_weekly.csv)
        output: Option<PathBuf>,

        /// Rows read per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Re-sort the weekly file by (point, week) once it is written
        #[arg(long)]
        sort_output: bool,
    },

    /// Aggregate a daily or weekly file onto the grid scale levels
    Spatial {
        /// Daily or weekly CSV with LAMBX, LAMBY and a day or week column
        input: PathBuf,

        /// Output directory (default: <input dir>/spatial_scales)
        output_dir: Option<PathBuf>,

        /// Size of the level_0 grid in km
        #[arg(long)]
        base_grid_size: Option<u32>,

        /// Only produce these levels (repeatable, e.g. --level level_2)
        #[arg(long = "level")]
        levels: Vec<String>,
    },

    /// Weekly roll-up followed by every spatial level
    Both {
        /// Daily balance CSV, point-major
        input: PathBuf,

        /// Output directory (default: <input dir>/aggregated_data)
        output_dir: Option<PathBuf>,

        /// Size of the level_0 grid in km
        #[arg(long)]
        base_grid_size: Option<u32>,

        /// Rows read per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
    },
}

/// Load the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Fail with a missing-input error before any output is touched.
pub(crate) fn ensure_input(path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingInput(path.display().to_string()))
    }
}

/// File stem of an input path, used to name derived artifacts.
pub(crate) fn input_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

/// Directory holding an input path (`.` for a bare file name).
pub(crate) fn input_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub async fn run(command: Command, config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    let Command::Run { stage } = command;
    match stage {
        Stage::Balance {
            observations,
            points,
            output,
            reset_policy,
        } => {
            if let Some(policy) = reset_policy {
                config.reset_policy = policy;
            }
            config.validate()?;
            let output = output.unwrap_or_else(|| balance::default_output(&observations));
            balance::run_balance(&observations, &points, &output, &config)?;
            Ok(())
        }
        Stage::Temporal {
            input,
            output,
            chunk_size,
            sort_output,
        } => {
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            config.sort_output |= sort_output;
            config.validate()?;
            let output = output.unwrap_or_else(|| pipeline::default_weekly_path(&input));
            temporal::run_temporal(&input, &output, &config)?;
            Ok(())
        }
        Stage::Spatial {
            input,
            output_dir,
            base_grid_size,
            levels,
        } => {
            if let Some(size) = base_grid_size {
                config.base_grid_size_km = size;
            }
            config.validate()?;
            let output_dir = output_dir.unwrap_or_else(|| pipeline::default_spatial_dir(&input));
            spatial::run_spatial(&input, &output_dir, &config, &levels).await?;
            Ok(())
        }
        Stage::Both {
            input,
            output_dir,
            base_grid_size,
            chunk_size,
        } => {
            if let Some(size) = base_grid_size {
                config.base_grid_size_km = size;
            }
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            config.validate()?;
            let paths = pipeline::PipelinePaths::new(&input, output_dir);
            pipeline::run_both(&paths, &config).await?;
            Ok(())
        }
    }
}
