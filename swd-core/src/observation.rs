use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One day of forcing data for a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyObservation {
    pub date: NaiveDate,
    /// Precipitation, mm/day
    pub precipitation: f64,
    /// Potential evapotranspiration, mm/day
    pub evapotranspiration: f64,
}

impl DailyObservation {
    pub fn new(date: NaiveDate, precipitation: f64, evapotranspiration: f64) -> Self {
        DailyObservation {
            date,
            precipitation,
            evapotranspiration,
        }
    }
}
