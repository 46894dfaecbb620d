/// Error types for the soil water deficit pipeline
use chrono::NaiveDate;
use thiserror::Error;

/// Fatal pipeline errors. Any of these aborts the current stage before its
/// artifact is committed.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Required columns are absent from an input header
    #[error("Input schema error in {path}: missing column(s) {missing}")]
    InputSchema { path: String, missing: String },

    /// No `day` or `week` column to use as the time bucket
    #[error("Input schema error in {path}: no 'day' or 'week' column found")]
    NoTimeColumn { path: String },

    /// A scale level name outside the fixed set
    #[error("Invalid configuration: unknown scale level '{requested}' (valid levels: {valid})")]
    UnknownScaleLevel { requested: String, valid: String },

    /// Any other rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Input path does not exist
    #[error("Input file '{0}' not found")]
    MissingInput(String),

    /// A data row with an unparsable field
    #[error("Malformed row in {path} at line {line}: {reason}")]
    MalformedRow {
        path: String,
        line: u64,
        reason: String,
    },

    /// Failed to read or write CSV data
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Failed to parse a configuration file
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reasons a single point's daily series is rejected. These never abort a
/// batch: the point is skipped and reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    #[error("series is empty")]
    Empty,

    #[error("duplicate observation for {0}")]
    DuplicateDay(NaiveDate),

    #[error("missing day(s) between {after} and {next}")]
    MissingDay { after: NaiveDate, next: NaiveDate },

    #[error("missing {field} value on {date}")]
    MissingValue {
        date: NaiveDate,
        field: &'static str,
    },
}

/// Type alias for Results using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
