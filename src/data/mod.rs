//! Trace storage, sample routing, persistence and analysis.

pub mod analysis;
pub mod sink;
pub mod storage;
pub mod trace;

pub use analysis::{analyze, PeakAnalysis};
pub use sink::{DrainReport, SampleSink};
pub use trace::TraceStore;
