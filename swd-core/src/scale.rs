//! The seven spatial resolutions used for multi-zoom map rendering.
//!
//! Level `k` bins points into square cells of `base_grid_size * 2^k` km.
//! With the default 8 km base the levels are 8, 16, 32, 64, 128, 256 and
//! 512 km.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Default spacing of the original sample grid, in km.
pub const DEFAULT_BASE_GRID_SIZE_KM: u32 = 8;

/// One of the fixed scale levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScaleLevel {
    Level0,
    Level1,
    Level2,
    Level3,
    Level4,
    Level5,
    Level6,
}

impl ScaleLevel {
    pub const ALL: [ScaleLevel; 7] = [
        ScaleLevel::Level0,
        ScaleLevel::Level1,
        ScaleLevel::Level2,
        ScaleLevel::Level3,
        ScaleLevel::Level4,
        ScaleLevel::Level5,
        ScaleLevel::Level6,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleLevel::Level0 => "level_0",
            ScaleLevel::Level1 => "level_1",
            ScaleLevel::Level2 => "level_2",
            ScaleLevel::Level3 => "level_3",
            ScaleLevel::Level4 => "level_4",
            ScaleLevel::Level5 => "level_5",
            ScaleLevel::Level6 => "level_6",
        }
    }

    /// Number of base cells along one side of a cell at this level.
    pub fn factor(self) -> u32 {
        1 << self.index()
    }

    /// Recommended web-map zoom for this level.
    pub fn zoom_hint(self) -> &'static str {
        match self {
            ScaleLevel::Level0 => "zoom >= 10",
            ScaleLevel::Level1 => "zoom 9-10",
            ScaleLevel::Level2 => "zoom 8-9",
            ScaleLevel::Level3 => "zoom 7-8",
            ScaleLevel::Level4 => "zoom 6-7",
            ScaleLevel::Level5 => "zoom 5-6",
            ScaleLevel::Level6 => "zoom <= 5",
        }
    }

    fn valid_names() -> String {
        ScaleLevel::ALL
            .iter()
            .map(|l| l.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ScaleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScaleLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        ScaleLevel::ALL
            .iter()
            .copied()
            .find(|l| l.name() == s)
            .ok_or_else(|| PipelineError::UnknownScaleLevel {
                requested: s.to_string(),
                valid: ScaleLevel::valid_names(),
            })
    }
}

/// Resolution and labels of one level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleSpec {
    pub level: ScaleLevel,
    pub grid_size_km: u32,
    pub description: String,
}

impl ScaleSpec {
    /// Cell width in meters.
    pub fn grid_size_m(&self) -> f64 {
        self.grid_size_km as f64 * 1000.0
    }
}

/// Immutable level -> resolution mapping built once from the base grid size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleTable {
    base_grid_size_km: u32,
    specs: Vec<ScaleSpec>,
}

impl ScaleTable {
    pub fn new(base_grid_size_km: u32) -> Result<Self> {
        if base_grid_size_km == 0 || base_grid_size_km > u32::MAX >> 6 {
            return Err(PipelineError::InvalidConfiguration(format!(
                "base grid size must be between 1 and {} km",
                u32::MAX >> 6
            )));
        }
        Ok(ScaleTable::build(base_grid_size_km))
    }

    fn build(base_grid_size_km: u32) -> Self {
        let specs = ScaleLevel::ALL
            .iter()
            .map(|&level| {
                let factor = level.factor();
                let grid_size_km = base_grid_size_km * factor;
                let description = if factor == 1 {
                    format!("Original {grid_size_km}km grid")
                } else {
                    format!("{grid_size_km}km grid ({factor}x{factor} aggregation)")
                };
                ScaleSpec {
                    level,
                    grid_size_km,
                    description,
                }
            })
            .collect();
        ScaleTable {
            base_grid_size_km,
            specs,
        }
    }

    pub fn base_grid_size_km(&self) -> u32 {
        self.base_grid_size_km
    }

    pub fn get(&self, level: ScaleLevel) -> &ScaleSpec {
        &self.specs[level.index() as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScaleSpec> {
        self.specs.iter()
    }

    /// Resolve requested level names. An empty request selects every level.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ScaleLevel>> {
        if names.is_empty() {
            return Ok(ScaleLevel::ALL.to_vec());
        }
        let mut levels = names
            .iter()
            .map(|n| n.as_ref().parse::<ScaleLevel>())
            .collect::<Result<Vec<_>>>()?;
        levels.sort();
        levels.dedup();
        Ok(levels)
    }
}

impl Default for ScaleTable {
    fn default() -> Self {
        ScaleTable::build(DEFAULT_BASE_GRID_SIZE_KM)
    }
}
