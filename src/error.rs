//! Custom error types for the application.
//!
//! This module defines the primary error type, `EchemError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single, consistent way to report
//! everything that can go wrong, from a missing technique parameter to a
//! malformed data file or a failure reported by the instrument driver.
//!
//! ## Error Hierarchy
//!
//! - **Session errors** (`NotConnected`, `NoDevicesFound`, `AlreadyConnected`,
//!   `MeasurementInProgress`): the requested operation is not valid in the current
//!   connection state.
//! - **Technique errors** (`UnknownTechnique`, `MissingParameter`, `OutOfRange`):
//!   a measurement method could not be built from the user's parameter values.
//! - **`Device`**: a failure reported by the instrument driver, carried verbatim.
//! - **`Io`** / **`Format`**: persistence failures. `Io` covers unwritable or missing
//!   paths, `Format` covers files that are readable but not shaped like a trace.
//! - **`Image`** / **`Export`**: plot export failures, from the PNG encoder or the
//!   chart renderer.
//! - **`Config`** / **`Configuration`**: `Config` wraps `figment` load errors, while
//!   `Configuration` covers values that parse but fail validation.
//! - **`FeatureNotEnabled`**: functionality that was not compiled in via feature flags.
//!
//! Every user-initiated action in the GUI catches these at its own boundary and turns
//! them into a one-line status message; none of them is fatal on its own.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, EchemError>;

#[derive(Error, Debug)]
pub enum EchemError {
    #[error("No device connected")]
    NotConnected,

    #[error("No devices found")]
    NoDevicesFound,

    #[error("A device is already connected")]
    AlreadyConnected,

    #[error("A measurement is already running")]
    MeasurementInProgress,

    #[error("Unknown technique '{0}' (expected DPV, CV or SWV)")]
    UnknownTechnique(String),

    #[error("Missing parameter '{name}' for {technique}")]
    MissingParameter { technique: String, name: String },

    #[error("Parameter '{name}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Device error: {0}")]
    Device(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data format error: {0}")]
    Format(String),

    #[error("No data to analyze")]
    NoData,

    #[error("Unsupported export format '{0}' (use .png or .svg)")]
    UnsupportedExport(String),

    #[error("Image export error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Plot rendering error: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

#[cfg(feature = "storage_csv")]
impl From<csv::Error> for EchemError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io) => EchemError::Io(io),
                other => EchemError::Format(format!("{:?}", other)),
            }
        } else {
            EchemError::Format(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EchemError::Device("usb timeout".to_string());
        assert_eq!(err.to_string(), "Device error: usb timeout");
    }

    #[test]
    fn test_missing_parameter_names_technique() {
        let err = EchemError::MissingParameter {
            technique: "DPV".into(),
            name: "Pulse Width (s)".into(),
        };
        assert_eq!(err.to_string(), "Missing parameter 'Pulse Width (s)' for DPV");
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_io_error_maps_to_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EchemError = csv::Error::from(io).into();
        assert!(matches!(err, EchemError::Io(_)));
    }
}
