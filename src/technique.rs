//! Measurement techniques, their bounded parameter presets, and the methods
//! built from them.
//!
//! Each technique has a fixed preset describing the numeric controls shown to
//! the user: a name, an inclusive range, a default and a step. When a
//! measurement starts, the live control values are translated into a
//! [`MeasurementMethod`] that is handed to the instrument session.

use crate::error::{AppResult, EchemError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Live control values keyed by parameter name.
pub type ParameterValues = BTreeMap<String, f64>;

pub const START_POTENTIAL: &str = "Start Potential (V)";
pub const END_POTENTIAL: &str = "End Potential (V)";
pub const STEP_POTENTIAL: &str = "Step Potential (V)";
pub const PULSE_AMPLITUDE: &str = "Pulse Amplitude (V)";
pub const PULSE_WIDTH: &str = "Pulse Width (s)";
pub const SCAN_RATE: &str = "Scan Rate (V/s)";
pub const FIRST_VERTEX: &str = "First Vertex Potential (V)";
pub const SECOND_VERTEX: &str = "Second Vertex Potential (V)";
pub const NUMBER_OF_SCANS: &str = "Number of Scans";
pub const AMPLITUDE: &str = "Amplitude (V)";
pub const FREQUENCY: &str = "Frequency (Hz)";

/// Supported voltammetric techniques.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Technique {
    /// Differential pulse voltammetry
    #[default]
    #[serde(rename = "DPV")]
    Dpv,
    /// Cyclic voltammetry
    #[serde(rename = "CV")]
    Cv,
    /// Square wave voltammetry
    #[serde(rename = "SWV")]
    Swv,
}

impl Technique {
    /// All techniques in selector order.
    pub const ALL: [Technique; 3] = [Technique::Dpv, Technique::Cv, Technique::Swv];

    /// Short identifier ("DPV", "CV", "SWV").
    pub fn id(&self) -> &'static str {
        match self {
            Technique::Dpv => "DPV",
            Technique::Cv => "CV",
            Technique::Swv => "SWV",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Technique {
    type Err = EchemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DPV" => Ok(Technique::Dpv),
            "CV" => Ok(Technique::Cv),
            "SWV" => Ok(Technique::Swv),
            _ => Err(EchemError::UnknownTechnique(s.to_string())),
        }
    }
}

/// A bounded numeric control.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
}

impl ParameterSpec {
    const fn new(name: &'static str, min: f64, max: f64, default: f64, step: f64) -> Self {
        Self {
            name,
            min,
            max,
            default,
            step,
        }
    }

    /// Clamps `value` into the control's range.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Rejects values outside the control's range.
    pub fn validate(&self, value: f64) -> AppResult<()> {
        if value.is_nan() || value < self.min || value > self.max {
            return Err(EchemError::OutOfRange {
                name: self.name.to_string(),
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// The parameter set for one technique.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TechniquePreset {
    pub technique: Technique,
    pub parameters: &'static [ParameterSpec],
}

impl TechniquePreset {
    /// Looks up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Initial control values.
    pub fn defaults(&self) -> ParameterValues {
        self.parameters
            .iter()
            .map(|p| (p.name.to_string(), p.default))
            .collect()
    }
}

static DPV_PARAMETERS: [ParameterSpec; 6] = [
    ParameterSpec::new(START_POTENTIAL, -2.0, 2.0, -0.5, 0.1),
    ParameterSpec::new(END_POTENTIAL, -2.0, 2.0, 0.5, 0.1),
    ParameterSpec::new(STEP_POTENTIAL, 0.001, 0.1, 0.005, 0.001),
    ParameterSpec::new(PULSE_AMPLITUDE, 0.001, 0.25, 0.05, 0.001),
    ParameterSpec::new(PULSE_WIDTH, 0.001, 1.0, 0.05, 0.001),
    ParameterSpec::new(SCAN_RATE, 0.01, 1.0, 0.05, 0.01),
];

static CV_PARAMETERS: [ParameterSpec; 6] = [
    ParameterSpec::new(START_POTENTIAL, -2.0, 2.0, -0.5, 0.1),
    ParameterSpec::new(FIRST_VERTEX, -2.0, 2.0, 0.5, 0.1),
    ParameterSpec::new(SECOND_VERTEX, -2.0, 2.0, -0.5, 0.1),
    ParameterSpec::new(STEP_POTENTIAL, 0.001, 0.1, 0.01, 0.001),
    ParameterSpec::new(SCAN_RATE, 0.01, 10.0, 0.1, 0.01),
    ParameterSpec::new(NUMBER_OF_SCANS, 1.0, 10.0, 1.0, 1.0),
];

static SWV_PARAMETERS: [ParameterSpec; 5] = [
    ParameterSpec::new(START_POTENTIAL, -2.0, 2.0, -0.5, 0.1),
    ParameterSpec::new(END_POTENTIAL, -2.0, 2.0, 0.5, 0.1),
    ParameterSpec::new(STEP_POTENTIAL, 0.001, 0.1, 0.004, 0.001),
    ParameterSpec::new(AMPLITUDE, 0.001, 0.25, 0.02, 0.001),
    ParameterSpec::new(FREQUENCY, 1.0, 1000.0, 25.0, 1.0),
];

/// Returns the preset for a technique.
pub fn preset(technique: Technique) -> TechniquePreset {
    let parameters: &'static [ParameterSpec] = match technique {
        Technique::Dpv => &DPV_PARAMETERS,
        Technique::Cv => &CV_PARAMETERS,
        Technique::Swv => &SWV_PARAMETERS,
    };
    TechniquePreset {
        technique,
        parameters,
    }
}

/// Returns the preset for a technique identifier such as "CV".
pub fn get_preset(technique_id: &str) -> AppResult<TechniquePreset> {
    Ok(preset(technique_id.parse()?))
}

/// Differential pulse voltammetry method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DpvMethod {
    pub e_begin: f64,
    pub e_end: f64,
    pub e_step: f64,
    pub pulse_height: f64,
    pub pulse_width: f64,
    pub scan_rate: f64,
}

/// Cyclic voltammetry method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvMethod {
    pub e_begin: f64,
    pub e_vertex1: f64,
    pub e_vertex2: f64,
    pub e_step: f64,
    pub scan_rate: f64,
    pub n_scans: u32,
}

/// Square wave voltammetry method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwvMethod {
    pub e_begin: f64,
    pub e_end: f64,
    pub e_step: f64,
    pub e_amplitude: f64,
    pub frequency: f64,
}

/// Parameters submitted to the instrument for one measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "technique")]
pub enum MeasurementMethod {
    #[serde(rename = "DPV")]
    Dpv(DpvMethod),
    #[serde(rename = "CV")]
    Cv(CvMethod),
    #[serde(rename = "SWV")]
    Swv(SwvMethod),
}

impl MeasurementMethod {
    /// The technique this method runs.
    pub fn technique(&self) -> Technique {
        match self {
            MeasurementMethod::Dpv(_) => Technique::Dpv,
            MeasurementMethod::Cv(_) => Technique::Cv,
            MeasurementMethod::Swv(_) => Technique::Swv,
        }
    }
}

/// Builds a method for `technique_id` from live control values.
pub fn build_method(technique_id: &str, values: &ParameterValues) -> AppResult<MeasurementMethod> {
    build(technique_id.parse()?, values)
}

/// Builds a method for an already parsed technique.
pub fn build(technique: Technique, values: &ParameterValues) -> AppResult<MeasurementMethod> {
    let get = |name: &str| -> AppResult<f64> {
        values
            .get(name)
            .copied()
            .ok_or_else(|| EchemError::MissingParameter {
                technique: technique.to_string(),
                name: name.to_string(),
            })
    };

    let method = match technique {
        Technique::Dpv => MeasurementMethod::Dpv(DpvMethod {
            e_begin: get(START_POTENTIAL)?,
            e_end: get(END_POTENTIAL)?,
            e_step: get(STEP_POTENTIAL)?,
            pulse_height: get(PULSE_AMPLITUDE)?,
            pulse_width: get(PULSE_WIDTH)?,
            scan_rate: get(SCAN_RATE)?,
        }),
        Technique::Cv => MeasurementMethod::Cv(CvMethod {
            e_begin: get(START_POTENTIAL)?,
            e_vertex1: get(FIRST_VERTEX)?,
            e_vertex2: get(SECOND_VERTEX)?,
            e_step: get(STEP_POTENTIAL)?,
            scan_rate: get(SCAN_RATE)?,
            // Truncates toward zero; negative values saturate to 0.
            n_scans: get(NUMBER_OF_SCANS)?.trunc() as u32,
        }),
        Technique::Swv => MeasurementMethod::Swv(SwvMethod {
            e_begin: get(START_POTENTIAL)?,
            e_end: get(END_POTENTIAL)?,
            e_step: get(STEP_POTENTIAL)?,
            e_amplitude: get(AMPLITUDE)?,
            frequency: get(FREQUENCY)?,
        }),
    };
    Ok(method)
}
