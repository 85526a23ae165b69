//! Routes streamed samples into the trace.
//!
//! The sink lives on the thread that owns the [`TraceStore`]. Samples arrive
//! on a bounded channel fed by the acquisition side and are absorbed in
//! batches, once per UI frame (or in a loop for headless runs). Nothing here
//! can abort acquisition: unrecognised labels are counted and reported.

use crate::core::{Sample, SampleChannel};
use crate::data::trace::TraceStore;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

/// Outcome of one [`SampleSink::drain`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Samples appended to a series
    pub absorbed: usize,
    /// Samples whose label matched neither series
    pub dropped: usize,
    /// The producer closed the channel and everything queued has been read
    pub finished: bool,
}

impl DrainReport {
    /// True if the trace changed and should be redrawn.
    pub fn needs_redraw(&self) -> bool {
        self.absorbed > 0
    }

    /// One-line status message for dropped samples, if any.
    pub fn status_message(&self) -> Option<String> {
        (self.dropped > 0).then(|| {
            format!(
                "Dropped {} sample(s) with unrecognised channel labels",
                self.dropped
            )
        })
    }
}

/// Classifies samples and appends them to a trace.
#[derive(Debug, Default)]
pub struct SampleSink {
    receiver: Option<mpsc::Receiver<Sample>>,
    dropped: usize,
}

impl SampleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts reading from a new acquisition, discarding any previous one.
    pub fn attach(&mut self, receiver: mpsc::Receiver<Sample>) {
        self.receiver = Some(receiver);
        self.dropped = 0;
    }

    /// Stops reading. Queued samples are discarded with the receiver.
    pub fn detach(&mut self) {
        self.receiver = None;
    }

    /// True while a receiver is attached.
    pub fn is_attached(&self) -> bool {
        self.receiver.is_some()
    }

    /// Total samples dropped since the last attach.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Absorbs a single sample.
    ///
    /// Appends to `voltage` if the label contains "potential"
    /// (case-insensitive), otherwise to `current` if it contains "current",
    /// otherwise drops it. Returns the series the value went to.
    pub fn on_sample(
        &mut self,
        trace: &mut TraceStore,
        label: &str,
        value: f64,
    ) -> Option<SampleChannel> {
        let channel = SampleChannel::classify(label);
        match channel {
            Some(SampleChannel::Potential) => trace.push_voltage(value),
            Some(SampleChannel::Current) => trace.push_current(value),
            None => {
                debug!(label, value, "Dropping sample with unrecognised label");
                self.dropped += 1;
                return None;
            }
        }
        channel
    }

    /// Absorbs every sample currently queued without blocking.
    pub fn drain(&mut self, trace: &mut TraceStore) -> DrainReport {
        let mut report = DrainReport::default();
        let Some(mut receiver) = self.receiver.take() else {
            return report;
        };

        loop {
            match receiver.try_recv() {
                Ok(sample) => match self.on_sample(trace, &sample.label, sample.value) {
                    Some(_) => report.absorbed += 1,
                    None => report.dropped += 1,
                },
                Err(TryRecvError::Empty) => {
                    self.receiver = Some(receiver);
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    report.finished = true;
                    break;
                }
            }
        }

        if report.dropped > 0 {
            warn!(dropped = report.dropped, "Samples with unrecognised labels");
        }
        report
    }

    /// Awaits samples until the producer closes the channel. Used by headless runs.
    pub async fn run_to_end(&mut self, trace: &mut TraceStore) -> DrainReport {
        let mut report = DrainReport::default();
        let Some(mut receiver) = self.receiver.take() else {
            return report;
        };
        while let Some(sample) = receiver.recv().await {
            match self.on_sample(trace, &sample.label, sample.value) {
                Some(_) => report.absorbed += 1,
                None => report.dropped += 1,
            }
        }
        report.finished = true;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_interleaved_samples() {
        let mut sink = SampleSink::new();
        let mut trace = TraceStore::new();
        sink.on_sample(&mut trace, "E_potential", -0.5);
        sink.on_sample(&mut trace, "I_current", 1.2e-6);
        sink.on_sample(&mut trace, "E_potential", -0.4);
        sink.on_sample(&mut trace, "I_current", 1.5e-6);
        assert_eq!(trace.voltage(), &[-0.5, -0.4]);
        assert_eq!(trace.current(), &[1.2e-6, 1.5e-6]);
    }

    #[test]
    fn test_potential_labels_never_touch_current() {
        let mut sink = SampleSink::new();
        let mut trace = TraceStore::new();
        for label in ["potential", "POTENTIAL", "E_Potential_we", "potential current"] {
            assert_eq!(
                sink.on_sample(&mut trace, label, 0.1),
                Some(SampleChannel::Potential)
            );
        }
        assert_eq!(trace.voltage().len(), 4);
        assert!(trace.current().is_empty());
    }

    #[test]
    fn test_current_labels_never_touch_voltage() {
        let mut sink = SampleSink::new();
        let mut trace = TraceStore::new();
        for label in ["current", "I_Current", "WE CURRENT"] {
            sink.on_sample(&mut trace, label, 1e-6);
        }
        assert_eq!(trace.current().len(), 3);
        assert!(trace.voltage().is_empty());
    }

    #[test]
    fn test_unrecognised_labels_leave_trace_unchanged() {
        let mut sink = SampleSink::new();
        let mut trace = TraceStore::from_series(vec![0.1], vec![0.2]);
        for label in ["charge", "", "time", "pot", "curr"] {
            assert_eq!(sink.on_sample(&mut trace, label, 9.9), None);
        }
        assert_eq!(trace, TraceStore::from_series(vec![0.1], vec![0.2]));
        assert_eq!(sink.dropped(), 5);
    }

    #[test]
    fn test_reset_then_counts_match_classified_calls() {
        let mut sink = SampleSink::new();
        let mut trace = TraceStore::from_series(vec![1.0, 2.0], vec![3.0]);
        trace.reset();
        let labels = ["potential", "current", "potential", "noise", "potential", "current"];
        for (i, label) in labels.iter().enumerate() {
            sink.on_sample(&mut trace, label, i as f64);
        }
        assert_eq!(trace.voltage().len(), 3);
        assert_eq!(trace.current().len(), 2);
    }

    #[tokio::test]
    async fn test_drain_reports_and_detects_close() {
        let (tx, rx) = mpsc::channel(8);
        let mut sink = SampleSink::new();
        let mut trace = TraceStore::new();
        sink.attach(rx);

        tx.send(Sample::new("potential", -0.1)).await.unwrap();
        tx.send(Sample::new("current", 2e-6)).await.unwrap();
        tx.send(Sample::new("temperature", 25.0)).await.unwrap();

        let report = sink.drain(&mut trace);
        assert_eq!(report.absorbed, 2);
        assert_eq!(report.dropped, 1);
        assert!(!report.finished);
        assert!(report.needs_redraw());
        assert!(report.status_message().is_some());
        assert!(sink.is_attached());

        drop(tx);
        let report = sink.drain(&mut trace);
        assert!(report.finished);
        assert!(!sink.is_attached());
        assert_eq!(trace.len(), 1);
    }

    #[tokio::test]
    async fn test_run_to_end_consumes_everything() {
        let (tx, rx) = mpsc::channel(4);
        let mut sink = SampleSink::new();
        let mut trace = TraceStore::new();
        sink.attach(rx);

        tokio::spawn(async move {
            for i in 0..10 {
                tx.send(Sample::new("potential", i as f64)).await.unwrap();
                tx.send(Sample::new("current", i as f64 * 1e-6)).await.unwrap();
            }
        });

        let report = sink.run_to_end(&mut trace).await;
        assert!(report.finished);
        assert_eq!(report.absorbed, 20);
        assert_eq!(trace.len(), 10);
    }
}
