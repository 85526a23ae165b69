//! Trace persistence with clean feature flag handling.
//!
//! Traces are stored as two-column CSV files with a `voltage,current` header
//! and one row per aligned pair. Columns are located by name on load, so
//! extra columns and reordered headers are tolerated.
use crate::data::trace::TraceStore;
#[cfg(not(feature = "storage_csv"))]
use crate::error::EchemError;
use crate::error::AppResult;
use std::path::{Path, PathBuf};

/// Header of the voltage column.
pub const VOLTAGE_COLUMN: &str = "voltage";
/// Header of the current column.
pub const CURRENT_COLUMN: &str = "current";

/// Default file name for a newly saved trace, stamped with the current UTC time.
pub fn default_file_name() -> String {
    format!("trace_{}.csv", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Default save location inside `dir`.
pub fn default_path(dir: &Path) -> PathBuf {
    dir.join(default_file_name())
}

// ============================================================================
// CSV
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use crate::error::EchemError;
    use std::fs::File;

    /// Writes `trace` to `path`, truncating the longer series.
    pub fn save(path: &Path, trace: &TraceStore) -> AppResult<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record([VOLTAGE_COLUMN, CURRENT_COLUMN])?;
        for (v, i) in trace.to_rows() {
            writer.write_record([v.to_string(), i.to_string()])?;
        }
        writer.flush()?;
        tracing::info!(path = %path.display(), rows = trace.len(), "Trace saved");
        Ok(())
    }

    /// Reads a trace written by [`save`] (or any CSV with the two named columns).
    pub fn load(path: &Path) -> AppResult<TraceStore> {
        let file = File::open(path)?;
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| EchemError::Format(format!("missing '{}' column", name)))
        };
        let v_idx = column(VOLTAGE_COLUMN)?;
        let i_idx = column(CURRENT_COLUMN)?;

        let mut voltage = Vec::new();
        let mut current = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let cell = |idx: usize, name: &str| -> AppResult<f64> {
                let raw = record.get(idx).unwrap_or_default();
                raw.parse::<f64>().map_err(|_| {
                    EchemError::Format(format!(
                        "row {}: '{}' is not a number in column '{}'",
                        row + 1,
                        raw,
                        name
                    ))
                })
            };
            voltage.push(cell(v_idx, VOLTAGE_COLUMN)?);
            current.push(cell(i_idx, CURRENT_COLUMN)?);
        }

        tracing::info!(path = %path.display(), rows = voltage.len(), "Trace loaded");
        Ok(TraceStore::from_series(voltage, current))
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    pub fn save(_path: &Path, _trace: &TraceStore) -> AppResult<()> {
        Err(EchemError::FeatureNotEnabled("storage_csv".to_string()))
    }

    pub fn load(_path: &Path) -> AppResult<TraceStore> {
        Err(EchemError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{load, save};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{load, save};
