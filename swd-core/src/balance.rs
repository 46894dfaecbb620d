//! Daily soil water balance.
//!
//! The reservoir of a point starts full (`RU_max`) and is updated once per
//! day:
//!
//! ```text
//! raw(d)   = Stock(d-1) + P(d) - ETP(d) * Kc
//! Stock(d) = clamp(raw(d), 0, RU_max)
//! Gap(d)   = max(0, -raw(d))
//! ```
//!
//! Water above `RU_max` is lost. A deficit is reported on the day it occurs
//! and is not carried into the next day.

use crate::{
    error::SeriesError,
    observation::DailyObservation,
    point::{Coordinates, Point},
};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use swd_utils::dates::crosses_year;

/// When the reservoir is refilled to `RU_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetPolicy {
    /// Filled once, before the first day of the series.
    RunStart,
    /// Filled before the first day and again on the first day of each new
    /// calendar year.
    #[default]
    Yearly,
}

impl std::str::FromStr for ResetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run-start" => Ok(ResetPolicy::RunStart),
            "yearly" => Ok(ResetPolicy::Yearly),
            other => Err(format!(
                "unknown reset policy '{other}' (expected 'yearly' or 'run-start')"
            )),
        }
    }
}

/// Result of one day of the recurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceDay {
    /// Unclamped `Stock(d-1) + P - ETP * Kc`
    pub raw: f64,
    pub stock: f64,
    pub gap: f64,
}

/// State carried from one day to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceState {
    pub stock: f64,
    pub last_date: Option<NaiveDate>,
}

impl BalanceState {
    pub fn initial(ru_max: f64) -> Self {
        BalanceState {
            stock: ru_max,
            last_date: None,
        }
    }

    /// Advance by one observation.
    pub fn step(
        self,
        observation: &DailyObservation,
        ru_max: f64,
        kc: f64,
        policy: ResetPolicy,
    ) -> (BalanceState, BalanceDay) {
        let previous = match (policy, self.last_date) {
            (ResetPolicy::Yearly, Some(last)) if crosses_year(&last, &observation.date) => ru_max,
            _ => self.stock,
        };
        let consumption = observation.evapotranspiration * kc;
        let raw = previous + observation.precipitation - consumption;
        let stock = raw.clamp(0.0, ru_max);
        let gap = (-raw).max(0.0);
        (
            BalanceState {
                stock,
                last_date: Some(observation.date),
            },
            BalanceDay { raw, stock, gap },
        )
    }
}

/// One computed day for one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub coordinates: Coordinates,
    pub date: NaiveDate,
    pub precipitation: f64,
    pub evapotranspiration: f64,
    pub kc: f64,
    pub stock: f64,
    pub gap: f64,
    pub ru_max: f64,
}

/// Check that a date-sorted series has exactly one finite row per day.
fn validate(observations: &[DailyObservation]) -> Result<(), SeriesError> {
    for observation in observations {
        if !observation.precipitation.is_finite() {
            return Err(SeriesError::MissingValue {
                date: observation.date,
                field: "P",
            });
        }
        if !observation.evapotranspiration.is_finite() {
            return Err(SeriesError::MissingValue {
                date: observation.date,
                field: "ETP",
            });
        }
    }
    for pair in observations.windows(2) {
        let (before, after) = (pair[0].date, pair[1].date);
        if before == after {
            return Err(SeriesError::DuplicateDay(after));
        }
        if before.succ_opt() != Some(after) {
            return Err(SeriesError::MissingDay {
                after: before,
                next: after,
            });
        }
    }
    Ok(())
}

/// Run the balance over a point's daily series.
///
/// Observations are sorted by date if they are not already; a series with a
/// duplicate day, a missing day or a non-finite value is rejected whole.
pub fn simulate(
    point: &Point,
    observations: &[DailyObservation],
    policy: ResetPolicy,
) -> Result<Vec<BalanceRecord>, SeriesError> {
    if observations.is_empty() {
        return Err(SeriesError::Empty);
    }
    let mut ordered = observations.to_vec();
    if !ordered.windows(2).all(|w| w[0].date <= w[1].date) {
        debug!("Series for {} was not date-sorted; sorting", point.id());
        ordered.sort_by_key(|o| o.date);
    }
    validate(&ordered)?;

    let records = ordered
        .iter()
        .scan(BalanceState::initial(point.ru_max), |state, observation| {
            let (next, day) = state.step(observation, point.ru_max, point.kc, policy);
            *state = next;
            Some(BalanceRecord {
                coordinates: point.coordinates,
                date: observation.date,
                precipitation: observation.precipitation,
                evapotranspiration: observation.evapotranspiration,
                kc: point.kc,
                stock: day.stock,
                gap: day.gap,
                ru_max: point.ru_max,
            })
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn point(ru_max: f64, kc: f64) -> Point {
        Point::new(Coordinates::new(600.0, 24010.0), ru_max, kc)
    }

    fn series(start: NaiveDate, values: &[(f64, f64)]) -> Vec<DailyObservation> {
        values
            .iter()
            .enumerate()
            .map(|(i, (p, etp))| {
                DailyObservation::new(start + chrono::Duration::days(i as i64), *p, *etp)
            })
            .collect()
    }

    #[test]
    fn test_deficit_then_refill() {
        let obs = series(date(2021, 6, 1), &[(0.0, 10.0), (0.0, 95.0), (200.0, 5.0)]);
        let records = simulate(&point(100.0, 1.0), &obs, ResetPolicy::RunStart).unwrap();

        assert_eq!(records[0].stock, 90.0);
        assert_eq!(records[0].gap, 0.0);

        assert_eq!(records[1].stock, 0.0);
        assert_eq!(records[1].gap, 5.0);

        // 195 mm available, 95 mm above capacity is lost
        assert_eq!(records[2].stock, 100.0);
        assert_eq!(records[2].gap, 0.0);
    }

    #[test]
    fn test_kc_scales_consumption() {
        let obs = series(date(2021, 6, 1), &[(0.0, 10.0)]);
        let records = simulate(&point(100.0, 0.5), &obs, ResetPolicy::RunStart).unwrap();
        assert_eq!(records[0].stock, 95.0);
        assert_eq!(records[0].kc, 0.5);
        assert_eq!(records[0].ru_max, 100.0);
    }

    #[test]
    fn test_gap_is_not_carried_forward() {
        let obs = series(date(2021, 6, 1), &[(0.0, 150.0), (3.0, 1.0)]);
        let records = simulate(&point(100.0, 1.0), &obs, ResetPolicy::RunStart).unwrap();
        assert_eq!(records[0].gap, 50.0);
        assert_eq!(records[1].stock, 2.0);
        assert_eq!(records[1].gap, 0.0);
    }

    #[test]
    fn test_bounds_hold_for_every_day() {
        let values: Vec<(f64, f64)> = (0..400)
            .map(|i| {
                let p = if i % 11 == 0 { 60.0 } else { (i % 3) as f64 * 0.7 };
                let etp = 2.0 + (i % 7) as f64 * 1.3;
                (p, etp)
            })
            .collect();
        let obs = series(date(2020, 3, 1), &values);
        let ru_max = 80.0;
        let records = simulate(&point(ru_max, 0.9), &obs, ResetPolicy::Yearly).unwrap();
        assert_eq!(records.len(), 400);
        for r in &records {
            assert!(r.stock >= 0.0 && r.stock <= ru_max);
            assert!(r.gap >= 0.0);
            if r.gap > 0.0 {
                assert_eq!(r.stock, 0.0);
            }
        }
    }

    #[test]
    fn test_conservation_below_capacity() {
        let ru_max = 50.0;
        let kc = 1.2;
        let obs = series(
            date(2021, 7, 1),
            &[(0.0, 8.0), (1.0, 9.0), (0.0, 30.0), (4.0, 2.0), (80.0, 1.0)],
        );
        let mut state = BalanceState::initial(ru_max);
        for o in &obs {
            let (next, day) = state.step(o, ru_max, kc, ResetPolicy::RunStart);
            if day.stock < ru_max {
                assert!((day.raw - (day.stock - day.gap)).abs() < 1e-12);
            } else {
                assert!(day.raw >= ru_max);
            }
            state = next;
        }
    }

    #[test]
    fn test_yearly_reset_refills_on_january_first() {
        let obs = series(date(2020, 12, 30), &[(0.0, 40.0), (0.0, 40.0), (0.0, 10.0)]);
        let yearly = simulate(&point(100.0, 1.0), &obs, ResetPolicy::Yearly).unwrap();
        assert_eq!(yearly[1].stock, 20.0);
        assert_eq!(yearly[2].date, date(2021, 1, 1));
        assert_eq!(yearly[2].stock, 90.0);

        let once = simulate(&point(100.0, 1.0), &obs, ResetPolicy::RunStart).unwrap();
        assert_eq!(once[2].stock, 10.0);
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let mut obs = series(date(2021, 6, 1), &[(0.0, 10.0), (0.0, 95.0), (200.0, 5.0)]);
        obs.reverse();
        let records = simulate(&point(100.0, 1.0), &obs, ResetPolicy::RunStart).unwrap();
        assert_eq!(records[0].date, date(2021, 6, 1));
        assert_eq!(records[1].gap, 5.0);
    }

    #[test]
    fn test_missing_day_rejects_series() {
        let obs = vec![
            DailyObservation::new(date(2021, 6, 1), 0.0, 1.0),
            DailyObservation::new(date(2021, 6, 3), 0.0, 1.0),
        ];
        let err = simulate(&point(100.0, 1.0), &obs, ResetPolicy::Yearly).unwrap_err();
        assert_eq!(
            err,
            SeriesError::MissingDay {
                after: date(2021, 6, 1),
                next: date(2021, 6, 3)
            }
        );
    }

    #[test]
    fn test_duplicate_day_rejects_series() {
        let obs = vec![
            DailyObservation::new(date(2021, 6, 1), 0.0, 1.0),
            DailyObservation::new(date(2021, 6, 1), 2.0, 1.0),
        ];
        let err = simulate(&point(100.0, 1.0), &obs, ResetPolicy::Yearly).unwrap_err();
        assert_eq!(err, SeriesError::DuplicateDay(date(2021, 6, 1)));
    }

    #[test]
    fn test_non_finite_value_rejects_series() {
        let obs = vec![DailyObservation::new(date(2021, 6, 1), f64::NAN, 1.0)];
        let err = simulate(&point(100.0, 1.0), &obs, ResetPolicy::Yearly).unwrap_err();
        assert!(matches!(err, SeriesError::MissingValue { field: "P", .. }));
        assert_eq!(
            simulate(&point(100.0, 1.0), &[], ResetPolicy::Yearly).unwrap_err(),
            SeriesError::Empty
        );
    }

    #[test]
    fn test_reset_policy_from_str() {
        assert_eq!("yearly".parse::<ResetPolicy>(), Ok(ResetPolicy::Yearly));
        assert_eq!("run-start".parse::<ResetPolicy>(), Ok(ResetPolicy::RunStart));
        assert!("monthly".parse::<ResetPolicy>().is_err());
    }
}
