//! Accumulated voltage/current series for the current measurement.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Parallel voltage and current sequences, index-aligned by arrival order.
///
/// Nothing forces the two sequences to stay the same length. Readers pair
/// them by index through [`TraceStore::to_rows`], which stops at the shorter
/// one rather than inventing values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStore {
    voltage: Vec<f64>,
    current: Vec<f64>,
}

impl TraceStore {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a trace from existing series.
    pub fn from_series(voltage: Vec<f64>, current: Vec<f64>) -> Self {
        Self { voltage, current }
    }

    /// Clears both series. Called right before a new measurement starts.
    pub fn reset(&mut self) {
        self.voltage.clear();
        self.current.clear();
    }

    /// Replaces both series wholesale (file load).
    pub fn replace(&mut self, voltage: Vec<f64>, current: Vec<f64>) {
        self.voltage = voltage;
        self.current = current;
    }

    /// Splits the trace into its voltage and current series.
    pub fn into_series(self) -> (Vec<f64>, Vec<f64>) {
        (self.voltage, self.current)
    }

    pub fn push_voltage(&mut self, value: f64) {
        self.voltage.push(value);
    }

    pub fn push_current(&mut self, value: f64) {
        self.current.push(value);
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Number of complete (voltage, current) pairs.
    pub fn len(&self) -> usize {
        self.voltage.len().min(self.current.len())
    }

    /// True when there is no complete pair, consistent with [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the two series have diverged in length.
    pub fn is_ragged(&self) -> bool {
        self.voltage.len() != self.current.len()
    }

    /// Lazily pairs the series by index, truncated to the shorter one.
    pub fn to_rows(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.voltage
            .iter()
            .copied()
            .zip(self.current.iter().copied())
    }

    /// Text shown in the data panel: a header and one tab-separated row per pair.
    pub fn data_text(&self) -> String {
        let mut text = String::from("Voltage (V)\tCurrent (A)\n");
        for (v, i) in self.to_rows() {
            // Writing into a String cannot fail.
            let _ = writeln!(text, "{:.6}\t{:.6e}", v, i);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_truncate_to_shorter_series() {
        let trace = TraceStore::from_series(vec![-0.5, -0.4, -0.3], vec![1e-6, 2e-6]);
        let rows: Vec<_> = trace.to_rows().collect();
        assert_eq!(rows, vec![(-0.5, 1e-6), (-0.4, 2e-6)]);
        assert_eq!(trace.len(), 2);
        assert!(trace.is_ragged());
    }

    #[test]
    fn test_ragged_trace_without_pairs_is_empty() {
        let trace = TraceStore::from_series(vec![0.1, 0.2], vec![]);
        assert_eq!(trace.len(), 0);
        assert!(trace.is_empty());
        assert!(trace.is_ragged());
        assert_eq!(trace.voltage().len(), 2);
    }

    #[test]
    fn test_reset_clears_both_series() {
        let mut trace = TraceStore::from_series(vec![0.1], vec![0.2, 0.3]);
        trace.reset();
        assert!(trace.is_empty());
        assert_eq!(trace.to_rows().count(), 0);
    }

    #[test]
    fn test_replace_discards_previous_series() {
        let mut trace = TraceStore::from_series(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]);
        let (voltage, current) = TraceStore::from_series(vec![-0.1], vec![2e-6]).into_series();
        trace.replace(voltage, current);
        assert_eq!(trace.voltage(), &[-0.1]);
        assert_eq!(trace.current(), &[2e-6]);
        assert!(!trace.is_ragged());
    }

    #[test]
    fn test_data_text_format() {
        let trace = TraceStore::from_series(vec![-0.5], vec![1.2e-6]);
        assert_eq!(
            trace.data_text(),
            "Voltage (V)\tCurrent (A)\n-0.500000\t1.200000e-6\n"
        );
    }
}
