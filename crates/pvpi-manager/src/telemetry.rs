//! Telemetry persistence.
//!
//! Rows go to one CSV file per day, named `YYYY-MM-DD.csv`. A header is
//! written when a file is created. Files older than the retention period
//! are deleted when the log is opened and before every append; files whose
//! name is not a date are never touched.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, NaiveDateTime};
use pvpi_client::TelemetrySample;
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};

/// Column names of every telemetry file.
pub const CSV_HEADER: [&str; 6] = [
    "Timestamp",
    "Battery Voltage",
    "Battery Current",
    "PV Voltage",
    "PV Current",
    "PV PI Temperature",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One timestamped set of readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRow {
    pub timestamp: NaiveDateTime,
    pub sample: TelemetrySample,
}

impl TelemetryRow {
    /// Render as one CSV line, without the terminator.
    pub fn to_csv(&self) -> String {
        let s = &self.sample;
        format!(
            "{},{},{},{},{},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            s.battery_voltage,
            s.battery_current,
            s.pv_voltage,
            s.pv_current,
            s.temperature
        )
    }
}

/// Somewhere telemetry rows are kept.
pub trait TelemetrySink: Send {
    fn append(&mut self, row: &TelemetryRow) -> ManagerResult<()>;
}

/// Daily-rotating CSV telemetry log.
#[derive(Debug)]
pub struct CsvTelemetryLog {
    directory: PathBuf,
    retention_days: u32,
}

impl CsvTelemetryLog {
    /// Create the directory if needed and purge expired files.
    pub fn open(directory: impl Into<PathBuf>, retention_days: u32, today: NaiveDate) -> ManagerResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| ManagerError::Telemetry {
            path: directory.clone(),
            source,
        })?;
        let log = CsvTelemetryLog {
            directory,
            retention_days,
        };
        log.purge(today)?;
        info!(
            "Telemetry log in {} (keeping {} days)",
            log.directory.display(),
            log.retention_days
        );
        Ok(log)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File that holds the rows of `date`.
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.directory.join(format!("{}.csv", date.format(DATE_FORMAT)))
    }

    /// Delete files dated `retention_days` or more before `today`.
    ///
    /// Returns the number of files removed.
    pub fn purge(&self, today: NaiveDate) -> ManagerResult<usize> {
        let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(self.retention_days))) else {
            return Ok(0);
        };
        let entries = fs::read_dir(&self.directory).map_err(|source| ManagerError::Telemetry {
            path: self.directory.clone(),
            source,
        })?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(date) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
            else {
                continue;
            };
            if date <= cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("Removed expired telemetry file {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("Could not remove {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }
}

impl TelemetrySink for CsvTelemetryLog {
    fn append(&mut self, row: &TelemetryRow) -> ManagerResult<()> {
        let date = row.timestamp.date();
        self.purge(date)?;

        let path = self.file_for(date);
        let io_err = |source| ManagerError::Telemetry {
            path: path.clone(),
            source,
        };
        let write_header = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        if write_header {
            writeln!(file, "{}", CSV_HEADER.join(",")).map_err(io_err)?;
        }
        writeln!(file, "{}", row.to_csv()).map_err(io_err)?;
        Ok(())
    }
}
