//! Peak analysis of a completed trace.

use crate::data::trace::TraceStore;
use crate::error::{AppResult, EchemError};
use serde::Serialize;

/// Result of [`analyze`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakAnalysis {
    /// Largest absolute current, A
    pub peak_current: f64,
    /// Potential at which the peak occurred, V
    pub peak_voltage: f64,
    /// Number of current samples in the trace
    pub points: usize,
}

impl PeakAnalysis {
    /// Text block appended to the results panel.
    pub fn report(&self) -> String {
        format!(
            "Analysis Results:\n\
             Peak Current: {:.2e} A\n\
             Peak Voltage: {:.3} V\n\
             Data Points: {}\n\
             ------------------------\n",
            self.peak_current, self.peak_voltage, self.points
        )
    }
}

/// Finds the point of largest absolute current.
///
/// Only index-paired rows are searched for the peak, so a ragged trace is
/// analysed up to its shorter series. Ties keep the first occurrence.
/// `points` counts every current sample, paired or not.
pub fn analyze(trace: &TraceStore) -> AppResult<PeakAnalysis> {
    if trace.voltage().is_empty() || trace.current().is_empty() {
        return Err(EchemError::NoData);
    }

    let mut peak: Option<(f64, f64)> = None;
    for (v, i) in trace.to_rows() {
        match peak {
            Some((_, best)) if i.abs() <= best => {}
            _ => peak = Some((v, i.abs())),
        }
    }

    let (peak_voltage, peak_current) = peak.ok_or(EchemError::NoData)?;
    Ok(PeakAnalysis {
        peak_current,
        peak_voltage,
        points: trace.current().len(),
    })
}
