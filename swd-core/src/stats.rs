//! Deficit statistics folded over computed balance series.

use crate::{balance::BalanceRecord, point::Coordinates};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

/// Statistics of one point's series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointStatistics {
    pub coordinates: Coordinates,
    pub days: u32,
    pub total_gap: f64,
    pub max_gap: f64,
    pub days_with_gap: u32,
    pub first_gap_date: Option<NaiveDate>,
    pub mean_stock: f64,
    pub min_stock: f64,
}

impl PointStatistics {
    /// `None` for an empty series. Records are expected in date order.
    pub fn from_records(records: &[BalanceRecord]) -> Option<Self> {
        let first = records.first()?;
        let mut stats = PointStatistics {
            coordinates: first.coordinates,
            days: 0,
            total_gap: 0.0,
            max_gap: 0.0,
            days_with_gap: 0,
            first_gap_date: None,
            mean_stock: 0.0,
            min_stock: f64::INFINITY,
        };
        let mut stock_sum = 0.0;
        for record in records {
            stats.days += 1;
            stats.total_gap += record.gap;
            stats.max_gap = stats.max_gap.max(record.gap);
            if record.gap > 0.0 {
                stats.days_with_gap += 1;
                stats.first_gap_date.get_or_insert(record.date);
            }
            stock_sum += record.stock;
            stats.min_stock = stats.min_stock.min(record.stock);
        }
        stats.mean_stock = stock_sum / stats.days as f64;
        Some(stats)
    }
}

/// Gap statistics of one calendar year over every point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearStatistics {
    pub year: i32,
    pub days: u64,
    pub mean_gap: f64,
    pub max_gap: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct YearAccumulator {
    days: u64,
    gap_sum: f64,
    max_gap: f64,
}

/// Running fold of the balance output, one point at a time.
#[derive(Debug, Clone, Default)]
pub struct BalanceStats {
    points: Vec<PointStatistics>,
    years: BTreeMap<i32, YearAccumulator>,
}

impl BalanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, records: &[BalanceRecord]) {
        let Some(point) = PointStatistics::from_records(records) else {
            return;
        };
        self.points.push(point);
        for record in records {
            let year = self.years.entry(record.date.year()).or_default();
            year.days += 1;
            year.gap_sum += record.gap;
            year.max_gap = year.max_gap.max(record.gap);
        }
    }

    /// Per-point statistics in the order the points were added.
    pub fn points(&self) -> &[PointStatistics] {
        &self.points
    }

    /// Per-year statistics, oldest year first.
    pub fn years(&self) -> Vec<YearStatistics> {
        self.years
            .iter()
            .map(|(&year, acc)| YearStatistics {
                year,
                days: acc.days,
                mean_gap: acc.gap_sum / acc.days as f64,
                max_gap: acc.max_gap,
            })
            .collect()
    }

    /// Points with at least one deficit day.
    pub fn points_with_gap(&self) -> usize {
        self.points.iter().filter(|p| p.days_with_gap > 0).count()
    }

    /// Point with the largest cumulated deficit.
    pub fn worst_point(&self) -> Option<&PointStatistics> {
        self.points
            .iter()
            .filter(|p| p.total_gap > 0.0)
            .max_by(|a, b| a.total_gap.total_cmp(&b.total_gap))
    }

    /// Year with the highest mean daily deficit.
    pub fn driest_year(&self) -> Option<YearStatistics> {
        self.years()
            .into_iter()
            .filter(|y| y.max_gap > 0.0)
            .max_by(|a, b| a.mean_gap.total_cmp(&b.mean_gap))
    }
}
