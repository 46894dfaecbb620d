//! Pipeline configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration. Command-line flags are applied on top of the loaded
//! values before [`PipelineConfig::validate`] is called.

use crate::{
    balance::ResetPolicy,
    error::{PipelineError, Result},
    scale::{ScaleTable, DEFAULT_BASE_GRID_SIZE_KM},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// Rows per chunk for the streaming weekly aggregation.
pub const DEFAULT_CHUNK_SIZE: usize = 500_000;

/// Capacity assigned to points without a known soil class, mm.
pub const DEFAULT_RU_MM: f64 = 120.0;

/// Crop coefficient assigned to points without a Kc entry.
pub const DEFAULT_KC: f64 = 0.9;

/// Soil class -> maximum water-holding capacity (mm).
pub fn default_soil_classes() -> BTreeMap<u32, f64> {
    BTreeMap::from([
        (1, 50.0),
        (2, 80.0),
        (3, 100.0),
        (4, 120.0),
        (5, 150.0),
        (6, 180.0),
        (9, 200.0),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub base_grid_size_km: u32,
    pub reset_policy: ResetPolicy,
    pub default_ru_mm: f64,
    pub default_kc: f64,
    pub soil_classes: BTreeMap<u32, f64>,
    /// Observations before this calendar year are ignored
    pub first_year: Option<i32>,
    /// Observations after this calendar year are ignored
    pub last_year: Option<i32>,
    /// Re-sort the weekly output by (point, week) after streaming
    pub sort_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            base_grid_size_km: DEFAULT_BASE_GRID_SIZE_KM,
            reset_policy: ResetPolicy::default(),
            default_ru_mm: DEFAULT_RU_MM,
            default_kc: DEFAULT_KC,
            soil_classes: default_soil_classes(),
            first_year: None,
            last_year: None,
            sort_output: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path)?;
        PipelineConfig::from_json(&json)
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        ScaleTable::new(self.base_grid_size_km)?;
        if !(self.default_ru_mm.is_finite() && self.default_ru_mm > 0.0) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "default_ru_mm must be positive, got {}",
                self.default_ru_mm
            )));
        }
        if !(self.default_kc.is_finite() && self.default_kc >= 0.0) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "default_kc must be non-negative, got {}",
                self.default_kc
            )));
        }
        if let Some((class, mm)) = self
            .soil_classes
            .iter()
            .find(|(_, mm)| !(mm.is_finite() && **mm > 0.0))
        {
            return Err(PipelineError::InvalidConfiguration(format!(
                "soil class {class} has invalid capacity {mm}"
            )));
        }
        if let (Some(first), Some(last)) = (self.first_year, self.last_year) {
            if first > last {
                return Err(PipelineError::InvalidConfiguration(format!(
                    "first_year {first} is after last_year {last}"
                )));
            }
        }
        Ok(())
    }

    /// The scale table for the configured base grid size.
    pub fn scale_table(&self) -> Result<ScaleTable> {
        ScaleTable::new(self.base_grid_size_km)
    }

    /// Whether a calendar year falls inside the configured window.
    pub fn includes_year(&self, year: i32) -> bool {
        self.first_year.map_or(true, |first| year >= first)
            && self.last_year.map_or(true, |last| year <= last)
    }
}
