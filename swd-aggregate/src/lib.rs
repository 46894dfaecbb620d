//! Temporal and spatial aggregation of daily balance records.
//!
//! - [`temporal`] rolls a point-ordered daily stream up to weekly means in
//!   fixed-size chunks, carrying the trailing point of each chunk forward so
//!   the result does not depend on the chunk size.
//! - [`spatial`] bins a daily or weekly dataset into square grid cells at
//!   each requested scale level.

pub mod spatial;
pub mod temporal;

/// Decimals kept when aggregated means are written out.
pub const MEAN_DECIMALS: u32 = 3;

/// Mean P, ETP, Stock and Gap of a group of records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricMeans {
    pub precipitation: f64,
    pub evapotranspiration: f64,
    pub stock: f64,
    pub gap: f64,
}

impl MetricMeans {
    /// The four means rendered for an output row.
    pub fn to_fields(&self) -> [String; 4] {
        use swd_utils::rounding::fmt_fixed;
        [
            fmt_fixed(self.precipitation, MEAN_DECIMALS),
            fmt_fixed(self.evapotranspiration, MEAN_DECIMALS),
            fmt_fixed(self.stock, MEAN_DECIMALS),
            fmt_fixed(self.gap, MEAN_DECIMALS),
        ]
    }
}

/// Running sums for [`MetricMeans`]. Values are summed in arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MeanAccumulator {
    sums: [f64; 4],
    count: u32,
}

impl MeanAccumulator {
    pub(crate) fn add(&mut self, precipitation: f64, evapotranspiration: f64, stock: f64, gap: f64) {
        self.sums[0] += precipitation;
        self.sums[1] += evapotranspiration;
        self.sums[2] += stock;
        self.sums[3] += gap;
        self.count += 1;
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn means(&self) -> MetricMeans {
        let n = self.count.max(1) as f64;
        MetricMeans {
            precipitation: self.sums[0] / n,
            evapotranspiration: self.sums[1] / n,
            stock: self.sums[2] / n,
            gap: self.sums[3] / n,
        }
    }
}
