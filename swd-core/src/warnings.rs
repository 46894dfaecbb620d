//! Recoverable per-point problems.
//!
//! Each occurrence is logged at debug level when it happens; the log is then
//! summarized once, at warn level, when the stage finishes.

use log::{debug, warn};
use std::fmt;

/// How many example points are listed per warning kind in the summary.
const SUMMARY_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WarningKind {
    MissingCollaboratorData,
    PointWithoutObservations,
    InvalidSeries,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::MissingCollaboratorData => write!(f, "missing RU/Kc data (default applied)"),
            WarningKind::PointWithoutObservations => write!(f, "no daily observations (skipped)"),
            WarningKind::InvalidSeries => write!(f, "invalid daily series (skipped)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A point had no RU and/or Kc entry and received the default value
    MissingCollaboratorData {
        point: String,
        field: &'static str,
        default: f64,
    },
    /// A point had capacity data but no daily series
    PointWithoutObservations { point: String },
    /// A point's daily series was rejected
    InvalidSeries { point: String, reason: String },
}

impl Warning {
    pub fn kind(&self) -> WarningKind {
        match self {
            Warning::MissingCollaboratorData { .. } => WarningKind::MissingCollaboratorData,
            Warning::PointWithoutObservations { .. } => WarningKind::PointWithoutObservations,
            Warning::InvalidSeries { .. } => WarningKind::InvalidSeries,
        }
    }

    pub fn point(&self) -> &str {
        match self {
            Warning::MissingCollaboratorData { point, .. }
            | Warning::PointWithoutObservations { point }
            | Warning::InvalidSeries { point, .. } => point,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MissingCollaboratorData {
                point,
                field,
                default,
            } => write!(f, "point {point}: no {field} entry, using default {default}"),
            Warning::PointWithoutObservations { point } => {
                write!(f, "point {point}: no daily observations, skipped")
            }
            Warning::InvalidSeries { point, reason } => {
                write!(f, "point {point}: {reason}, skipped")
            }
        }
    }
}

/// Accumulates warnings for one run.
#[derive(Debug, Default)]
pub struct WarningLog {
    entries: Vec<Warning>,
}

impl WarningLog {
    pub fn new() -> Self {
        WarningLog::default()
    }

    pub fn push(&mut self, warning: Warning) {
        debug!("{warning}");
        self.entries.push(warning);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.entries.iter().filter(|w| w.kind() == kind).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.entries.iter()
    }

    /// Summary lines, one per warning kind present.
    pub fn summary_lines(&self) -> Vec<String> {
        [
            WarningKind::MissingCollaboratorData,
            WarningKind::PointWithoutObservations,
            WarningKind::InvalidSeries,
        ]
        .iter()
        .filter_map(|&kind| {
            let count = self.count(kind);
            if count == 0 {
                return None;
            }
            let mut examples: Vec<&str> = self
                .entries
                .iter()
                .filter(|w| w.kind() == kind)
                .map(Warning::point)
                .collect();
            examples.dedup();
            let more = if examples.len() > SUMMARY_EXAMPLES { ", ..." } else { "" };
            examples.truncate(SUMMARY_EXAMPLES);
            Some(format!("{count} x {kind}: {}{more}", examples.join(", ")))
        })
        .collect()
    }

    /// Emit the end-of-stage summary.
    pub fn summarize(&self, stage: &str) {
        if self.entries.is_empty() {
            return;
        }
        warn!("{stage}: {} warning(s)", self.entries.len());
        for line in self.summary_lines() {
            warn!("  {line}");
        }
    }
}
