//! Point table: coordinates, soil class, crop coefficient and crop shares.
//!
//! Expected format (with headers):
//! `LAMBX,LAMBY,soil_class,avg_kc[,pct_irrigated,pct_cereals,pct_prairies,pct_permanent,pct_vineyards]`
//!
//! ```text
//! LAMBX,LAMBY,soil_class,avg_kc,pct_irrigated,pct_cereals,pct_prairies,pct_permanent,pct_vineyards
//! 600,24010,4,0.82,3.5,41.0,30.2,1.0,0.0
//! 680,24010,,0.75,0.0,12.0,70.5,0.0,2.1
//! ```

use crate::soil::SoilClassTable;
use log::{debug, info};
use std::{collections::BTreeMap, io::Read};
use swd_core::{
    config::PipelineConfig,
    error::Result,
    point::{Coordinates, CropShares, Point},
    schema::{columns, find_column, parse_field, parse_optional_field, require_columns},
    warnings::{Warning, WarningLog},
};

pub const SOIL_CLASS: &str = "soil_class";
pub const AVG_KC: &str = "avg_kc";
pub const CROP_SHARE_COLUMNS: [&str; 5] = [
    "pct_irrigated",
    "pct_cereals",
    "pct_prairies",
    "pct_permanent",
    "pct_vineyards",
];

/// Load the point table, resolving soil classes to capacities.
///
/// Missing or unknown soil classes and missing Kc values fall back to the
/// configured defaults and are recorded in `warnings`. When a point appears
/// more than once the first entry wins.
pub fn load_points<R: Read>(
    reader: R,
    source: &str,
    config: &PipelineConfig,
    warnings: &mut WarningLog,
) -> Result<BTreeMap<Coordinates, Point>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    let [x_col, y_col, class_col, kc_col] =
        require_columns(&headers, [columns::X, columns::Y, SOIL_CLASS, AVG_KC], source)?;
    let share_cols: Option<Vec<usize>> = CROP_SHARE_COLUMNS
        .iter()
        .map(|name| find_column(&headers, name))
        .collect();

    let soil = SoilClassTable::new(config.soil_classes.clone(), config.default_ru_mm);
    let mut points = BTreeMap::new();
    let mut duplicates = 0u32;

    for result in rdr.records() {
        let record = result?;
        let x: f64 = parse_field(&record, x_col, columns::X, source)?;
        let y: f64 = parse_field(&record, y_col, columns::Y, source)?;
        let coordinates = Coordinates::new(x, y);
        if points.contains_key(&coordinates) {
            duplicates += 1;
            continue;
        }

        let class: Option<f64> = parse_optional_field(&record, class_col, SOIL_CLASS, source)?;
        let ru_max = match soil.lookup(class) {
            Some(mm) => mm,
            None => {
                warnings.push(Warning::MissingCollaboratorData {
                    point: coordinates.point_id(),
                    field: "RU",
                    default: soil.default_mm(),
                });
                soil.default_mm()
            }
        };

        let kc = match parse_optional_field::<f64>(&record, kc_col, AVG_KC, source)? {
            Some(kc) if kc.is_finite() => kc,
            _ => {
                warnings.push(Warning::MissingCollaboratorData {
                    point: coordinates.point_id(),
                    field: "Kc",
                    default: config.default_kc,
                });
                config.default_kc
            }
        };

        let crop_shares = match &share_cols {
            Some(cols) => {
                let mut values = [0.0f64; 5];
                for (value, (&col, name)) in values
                    .iter_mut()
                    .zip(cols.iter().zip(CROP_SHARE_COLUMNS))
                {
                    *value = parse_optional_field(&record, col, name, source)?.unwrap_or(0.0);
                }
                Some(CropShares {
                    irrigated: values[0],
                    cereals: values[1],
                    prairies: values[2],
                    permanent: values[3],
                    vineyards: values[4],
                })
            }
            None => None,
        };

        points.insert(
            coordinates,
            Point {
                coordinates,
                ru_max,
                kc,
                crop_shares,
            },
        );
    }

    if duplicates > 0 {
        debug!("{source}: ignored {duplicates} duplicate point rows");
    }
    info!("Loaded {} points from {}", points.len(), source);
    Ok(points)
}
