//! Configuration loading using Figment.
//!
//! Configuration is layered, highest precedence last:
//! 1. Built-in defaults (`Settings::default()`)
//! 2. A TOML file (`config/default.toml`, or the path given on the command line)
//! 3. Environment variables prefixed with `ECHEM_`, nested keys separated by `__`
//!
//! ```text
//! ECHEM_APPLICATION__LOG_LEVEL=debug
//! ECHEM_INSTRUMENT__TIME_SCALE=0.1
//! ECHEM_STORAGE__DATA_DIR=/tmp/echem
//! ```

use crate::error::{AppResult, EchemError};
use crate::technique::Technique;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub application: ApplicationConfig,
    pub acquisition: AcquisitionConfig,
    pub instrument: InstrumentConfig,
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Window title
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Electrochemical Sensor Interface".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Acquisition pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Capacity of the bounded sample channels
    pub sample_channel_capacity: usize,
    /// Capacity of the session actor's command queue
    pub command_channel_capacity: usize,
    /// Technique selected at startup (DPV, CV, SWV)
    pub default_technique: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_channel_capacity: 1024,
            command_channel_capacity: 32,
            default_technique: "DPV".to_string(),
        }
    }
}

/// Instrument driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Driver name. Only "mock" ships with this crate.
    pub driver: String,
    /// Devices reported by the simulated driver's discovery
    pub devices: Vec<String>,
    /// Multiplier applied to simulated point timing (0 = as fast as possible)
    pub time_scale: f64,
    /// Peak-to-peak amplitude of simulated current noise, A
    pub noise_amplitude: f64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            driver: "mock".to_string(),
            devices: vec!["MockSens-0001".to_string()],
            time_scale: 1.0,
            noise_amplitude: 2.0e-8,
        }
    }
}

/// Storage and export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory offered by file dialogs and used for headless output
    pub data_dir: PathBuf,
    /// Exported plot width in pixels
    pub export_width: u32,
    /// Exported plot height in pixels
    pub export_height: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            export_width: 1600,
            export_height: 1200,
        }
    }
}

impl Settings {
    /// Loads settings from the given file, or from [`DEFAULT_CONFIG_PATH`] if it
    /// exists, layered over the defaults and under `ECHEM_` environment variables.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(EchemError::Configuration(format!(
                        "config file '{}' not found",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                figment = figment.merge(Toml::file(DEFAULT_CONFIG_PATH));
            }
        }

        let settings: Settings = figment
            .merge(Env::prefixed("ECHEM_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(EchemError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.sample_channel_capacity == 0
            || self.acquisition.command_channel_capacity == 0
        {
            return Err(EchemError::Configuration(
                "channel capacities must be greater than zero".to_string(),
            ));
        }

        self.default_technique()?;

        if self.instrument.driver != "mock" {
            return Err(EchemError::Configuration(format!(
                "Unknown instrument driver '{}'. Must be: mock",
                self.instrument.driver
            )));
        }

        if !self.instrument.time_scale.is_finite() || self.instrument.time_scale < 0.0 {
            return Err(EchemError::Configuration(format!(
                "time_scale must be finite and non-negative, got {}",
                self.instrument.time_scale
            )));
        }

        if self.storage.export_width == 0 || self.storage.export_height == 0 {
            return Err(EchemError::Configuration(
                "export size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The technique selected at startup.
    pub fn default_technique(&self) -> AppResult<Technique> {
        self.acquisition
            .default_technique
            .parse()
            .map_err(|_| {
                EchemError::Configuration(format!(
                    "Unknown default_technique '{}'",
                    self.acquisition.default_technique
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.default_technique().unwrap(), Technique::Dpv);
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "echem.toml",
                r#"
                [acquisition]
                default_technique = "CV"

                [instrument]
                time_scale = 0.5
                "#,
            )?;
            jail.set_env("ECHEM_INSTRUMENT__TIME_SCALE", "0");
            jail.set_env("ECHEM_STORAGE__EXPORT_WIDTH", "800");

            let settings = Settings::load(Some(Path::new("echem.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.default_technique().unwrap(), Technique::Cv);
            assert_eq!(settings.instrument.time_scale, 0.0);
            assert_eq!(settings.storage.export_width, 800);
            // Untouched sections keep their defaults
            assert_eq!(settings.acquisition.sample_channel_capacity, 1024);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Settings::load(Some(Path::new("does/not/exist.toml"))).unwrap_err();
        assert!(matches!(err, EchemError::Configuration(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.acquisition.default_technique = "EIS".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.acquisition.sample_channel_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.instrument.driver = "palmsens".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.instrument.time_scale = f64::INFINITY;
        assert!(settings.validate().is_err());
    }
}
