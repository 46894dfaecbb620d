//! Core types for soil water deficit computation.
//!
//! Holds the point/observation model, the daily water-balance recurrence,
//! the fixed set of spatial scale levels and the pipeline configuration
//! shared by the aggregation and command crates.

pub mod balance;
pub mod config;
pub mod error;
pub mod observation;
pub mod point;
pub mod scale;
pub mod schema;
pub mod stats;
pub mod warnings;
