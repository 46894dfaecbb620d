//! Shared utility functions for SWD crates.

/// Date utility functions
pub mod dates {
    use chrono::{Datelike, NaiveDate};

    /// Format used for the `day` column of every artifact.
    pub const DAY_FORMAT: &str = "%Y-%m-%d";

    /// Format used by the upstream observation files.
    pub const COMPACT_FORMAT: &str = "%Y%m%d";

    /// Week label: year plus Monday-based week of the year (`00`-`53`).
    pub const WEEK_FORMAT: &str = "%Y-W%W";

    /// Format a NaiveDate as "YYYY-MM-DD"
    pub fn format_date(date: &NaiveDate) -> String {
        date.format(DAY_FORMAT).to_string()
    }

    /// Parse a date string in "YYYY-MM-DD" format
    pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
        Ok(NaiveDate::parse_from_str(s, DAY_FORMAT)?)
    }

    /// Parse a date string in "YYYYMMDD" format (SIM compact format)
    pub fn parse_date_compact(s: &str) -> anyhow::Result<NaiveDate> {
        Ok(NaiveDate::parse_from_str(s, COMPACT_FORMAT)?)
    }

    /// Week identifier for a date, e.g. 2024-01-08 -> "2024-W02".
    ///
    /// Days before the first Monday of a year fall in week `00` of that year,
    /// so labels sort in date order.
    pub fn week_id(date: &NaiveDate) -> String {
        date.format(WEEK_FORMAT).to_string()
    }

    /// True when `date` starts a new calendar year relative to `previous`.
    pub fn crosses_year(previous: &NaiveDate, date: &NaiveDate) -> bool {
        previous.year() != date.year()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        #[test]
        fn test_week_id_monday_based() {
            // 2024-01-01 is a Monday
            let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            assert_eq!(week_id(&jan1), "2024-W01");
            let jan7 = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
            assert_eq!(week_id(&jan7), "2024-W01");
            let jan8 = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
            assert_eq!(week_id(&jan8), "2024-W02");
        }

        #[test]
        fn test_week_id_before_first_monday() {
            // 2023-01-01 is a Sunday
            let jan1 = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
            assert_eq!(week_id(&jan1), "2023-W00");
            let dec31 = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();
            assert!(week_id(&dec31) < week_id(&jan1));
        }

        #[test]
        fn test_format_and_parse() {
            let date = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
            let formatted = format_date(&date);
            assert_eq!(formatted, "2023-06-15");
            assert_eq!(parse_date(&formatted).unwrap(), date);
            assert_eq!(parse_date_compact("20230615").unwrap(), date);
            assert!(parse_date("20230615").is_err());
        }

        #[test]
        fn test_crosses_year() {
            let dec31 = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();
            let jan1 = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
            let jan2 = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
            assert!(crosses_year(&dec31, &jan1));
            assert!(!crosses_year(&jan1, &jan2));
        }
    }
}

/// Rounding applied when values are written out. Never fed back into
/// computations.
pub mod rounding {
    /// Round to a fixed number of decimals.
    pub fn round_to(value: f64, decimals: u32) -> f64 {
        let factor = 10f64.powi(decimals as i32);
        (value * factor).round() / factor
    }

    /// Render a value with exactly `decimals` digits after the point.
    /// Negative zero is written as zero.
    pub fn fmt_fixed(value: f64, decimals: u32) -> String {
        let rounded = round_to(value, decimals);
        let rounded = if rounded == 0.0 { 0.0 } else { rounded };
        format!("{:.*}", decimals as usize, rounded)
    }

}

/// Artifact writing: every output goes to a sibling `.partial` file that is
/// renamed into place once complete.
pub mod fs {
    use anyhow::Context;
    use std::ffi::OsString;
    use std::fs::File;
    use std::io;
    use std::path::{Path, PathBuf};

    /// Suffix of in-progress artifacts.
    pub const PARTIAL_SUFFIX: &str = ".partial";

    /// `data/out.csv` -> `data/out.csv.partial`
    pub fn partial_path(path: &Path) -> PathBuf {
        let mut name: OsString = path
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(PARTIAL_SUFFIX);
        path.with_file_name(name)
    }

    /// Remove a file if it exists. Returns whether something was removed.
    pub fn remove_stale(path: &Path) -> io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// An artifact being written. Dropping it without [`PendingArtifact::commit`]
    /// deletes the partial file so failed runs leave no output behind.
    #[derive(Debug)]
    pub struct PendingArtifact {
        target: PathBuf,
        partial: PathBuf,
        committed: bool,
    }

    impl PendingArtifact {
        /// Start a fresh artifact at `target`, discarding any stale partial
        /// file from an interrupted run.
        pub fn create(target: impl Into<PathBuf>) -> anyhow::Result<(Self, File)> {
            let target = target.into();
            let partial = partial_path(&target);
            if remove_stale(&partial)? {
                log::info!("Removed stale {}", partial.display());
            }
            let file = File::create(&partial)
                .with_context(|| format!("creating {}", partial.display()))?;
            Ok((
                PendingArtifact {
                    target,
                    partial,
                    committed: false,
                },
                file,
            ))
        }

        pub fn target(&self) -> &Path {
            &self.target
        }

        /// Move the finished partial file over the target. The writer must be
        /// flushed and dropped first.
        pub fn commit(mut self) -> anyhow::Result<PathBuf> {
            std::fs::rename(&self.partial, &self.target).with_context(|| {
                format!(
                    "renaming {} to {}",
                    self.partial.display(),
                    self.target.display()
                )
            })?;
            self.committed = true;
            Ok(self.target.clone())
        }
    }

    impl Drop for PendingArtifact {
        fn drop(&mut self) {
            if !self.committed {
                let _ = remove_stale(&self.partial);
            }
        }
    }

    /// Write a small text artifact in one go.
    pub fn write_atomic(target: &Path, contents: &str) -> anyhow::Result<()> {
        use std::io::Write;
        let (pending, mut file) = PendingArtifact::create(target)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);
        pending.commit()?;
        Ok(())
    }

}
