//! Collaborator inputs for the water balance.
//!
//! The soil capacity (`RU_max`) and crop coefficient (`Kc`) of every point
//! and the daily forcing series are produced outside this workspace. This
//! crate reads them, applies the documented defaults where an entry is
//! missing, and pairs every point with its daily series.

pub mod observations;
pub mod points;

/// Soil class -> capacity lookup.
pub mod soil {
    use std::collections::BTreeMap;

    /// Maps soil classes to maximum water-holding capacity (mm), with a
    /// fallback for unclassified points.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SoilClassTable {
        classes: BTreeMap<u32, f64>,
        default_mm: f64,
    }

    impl SoilClassTable {
        pub fn new(classes: BTreeMap<u32, f64>, default_mm: f64) -> Self {
            SoilClassTable {
                classes,
                default_mm,
            }
        }

        pub fn default_mm(&self) -> f64 {
            self.default_mm
        }

        /// Capacity for a class, `None` when the class is absent or unknown.
        ///
        /// Classes may arrive as `4` or `4.0`; any other fractional value is
        /// treated as unknown.
        pub fn lookup(&self, class: Option<f64>) -> Option<f64> {
            let class = class?;
            if class.fract() != 0.0 || class < 0.0 || class > u32::MAX as f64 {
                return None;
            }
            self.classes.get(&(class as u32)).copied()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use swd_core::config::{default_soil_classes, DEFAULT_RU_MM};

        #[test]
        fn test_lookup_known_classes() {
            let table = SoilClassTable::new(default_soil_classes(), DEFAULT_RU_MM);
            assert_eq!(table.lookup(Some(1.0)), Some(50.0));
            assert_eq!(table.lookup(Some(9.0)), Some(200.0));
        }

        #[test]
        fn test_lookup_unknown_classes() {
            let table = SoilClassTable::new(default_soil_classes(), DEFAULT_RU_MM);
            assert_eq!(table.lookup(None), None);
            assert_eq!(table.lookup(Some(7.0)), None);
            assert_eq!(table.lookup(Some(2.5)), None);
            assert_eq!(table.default_mm(), 120.0);
        }
    }
}

/// Pairing of points with their daily series.
pub mod join {
    use std::collections::BTreeMap;
    use swd_core::{
        config::PipelineConfig,
        observation::DailyObservation,
        point::{Coordinates, Point},
        warnings::{Warning, WarningLog},
    };

    /// Pair each point with its series, in coordinate order.
    ///
    /// A series without a point entry gets the default capacity and crop
    /// coefficient; a point without a series is skipped. Both cases are
    /// recorded in `warnings`.
    pub fn pair_points(
        mut points: BTreeMap<Coordinates, Point>,
        observations: BTreeMap<Coordinates, Vec<DailyObservation>>,
        config: &PipelineConfig,
        warnings: &mut WarningLog,
    ) -> Vec<(Point, Vec<DailyObservation>)> {
        let mut paired = Vec::with_capacity(observations.len());
        for (coordinates, series) in observations {
            let point = match points.remove(&coordinates) {
                Some(point) => point,
                None => {
                    let id = coordinates.point_id();
                    warnings.push(Warning::MissingCollaboratorData {
                        point: id.clone(),
                        field: "RU",
                        default: config.default_ru_mm,
                    });
                    warnings.push(Warning::MissingCollaboratorData {
                        point: id,
                        field: "Kc",
                        default: config.default_kc,
                    });
                    Point::new(coordinates, config.default_ru_mm, config.default_kc)
                }
            };
            paired.push((point, series));
        }
        for point in points.into_values() {
            warnings.push(Warning::PointWithoutObservations { point: point.id() });
        }
        paired
    }

}
