//! Application state shared by the GUI panels.
//!
//! `AppState` is owned by the UI thread. It holds the trace, the sink that
//! feeds it, the per-technique control values and the text shown in the
//! status bar and results panel. User actions that touch files never return
//! errors to the caller; failures become a status line and a log entry.

use crate::config::Settings;
use crate::core::{ConnectionState, Sample};
use crate::data::{analyze, storage, DrainReport, SampleSink, TraceStore};
use crate::error::{AppResult, EchemError};
use crate::plot::{self, PlotModel, PlotRenderer};
use crate::technique::{self, MeasurementMethod, ParameterValues, Technique, TechniquePreset};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct AppState {
    /// Last connection state reported by the session actor
    pub connection: ConnectionState,
    pub technique: Technique,
    parameters: HashMap<Technique, ParameterValues>,
    pub trace: TraceStore,
    pub sink: SampleSink,
    renderer: PlotRenderer,
    plot: PlotModel,
    /// Accumulated analysis output
    pub results: String,
    /// One-line status bar text
    pub status: String,
    pub data_dir: PathBuf,
    pub export_size: (u32, u32),
    /// Set when a live measurement lost its sink and the session should be stopped
    stop_requested: bool,
}

impl AppState {
    pub fn new(settings: &Settings) -> AppResult<Self> {
        let parameters = Technique::ALL
            .iter()
            .map(|t| (*t, technique::preset(*t).defaults()))
            .collect();
        let renderer = PlotRenderer::new();
        let trace = TraceStore::new();
        let plot = renderer.render(&trace);

        Ok(Self {
            connection: ConnectionState::Disconnected,
            technique: settings.default_technique()?,
            parameters,
            trace,
            sink: SampleSink::new(),
            renderer,
            plot,
            results: String::new(),
            status: "Ready".to_string(),
            data_dir: settings.storage.data_dir.clone(),
            export_size: (settings.storage.export_width, settings.storage.export_height),
            stop_requested: false,
        })
    }

    pub fn preset(&self) -> TechniquePreset {
        technique::preset(self.technique)
    }

    /// Control values of the selected technique.
    pub fn parameters(&self) -> &ParameterValues {
        // Every technique is seeded in `new`
        &self.parameters[&self.technique]
    }

    /// Sets a control value of the selected technique, clamped to its range.
    /// Unknown names are ignored.
    pub fn set_parameter(&mut self, name: &str, value: f64) {
        let preset = self.preset();
        if let Some(spec) = preset.parameter(name) {
            self.parameters
                .entry(self.technique)
                .or_default()
                .insert(name.to_string(), spec.clamp(value));
        }
    }

    /// Builds the method for the selected technique from its control values.
    pub fn current_method(&self) -> AppResult<MeasurementMethod> {
        technique::build(self.technique, self.parameters())
    }

    pub fn plot(&self) -> &PlotModel {
        &self.plot
    }

    fn refresh_plot(&mut self) {
        self.plot = self.renderer.render(&self.trace);
    }

    /// Clears the trace and starts reading samples from `samples`.
    ///
    /// Called only once the session has accepted the measurement, so a
    /// rejected request leaves the previous trace on screen.
    pub fn begin_measurement(&mut self, samples: mpsc::Receiver<Sample>) {
        self.trace.reset();
        self.sink.attach(samples);
        self.refresh_plot();
        self.status = format!("Measuring ({})", self.technique);
    }

    /// Absorbs whatever samples have arrived since the last frame.
    pub fn pump(&mut self) -> DrainReport {
        let report = self.sink.drain(&mut self.trace);
        if report.needs_redraw() {
            self.refresh_plot();
        }
        if let Some(message) = report.status_message() {
            self.status = message;
        } else if report.finished {
            self.status = format!("Measurement finished: {} points", self.trace.len());
        }
        report
    }

    /// Reports a failed action on the status bar.
    pub fn report_error(&mut self, action: &str, err: &EchemError) {
        warn!(action, error = %err, "Action failed");
        self.status = format!("{} failed: {}", action, err);
    }

    /// True once after an action abandoned a running measurement. The caller
    /// owes the session a Stop so the connection state leaves `Measuring`.
    pub fn take_stop_request(&mut self) -> bool {
        std::mem::take(&mut self.stop_requested)
    }

    pub fn load_data(&mut self, path: &Path) {
        match storage::load(path) {
            Ok(trace) => {
                // Loaded data replaces the trace wholesale; a live stream would mix into it
                if self.sink.is_attached() {
                    info!("Abandoning live measurement for loaded data");
                    self.sink.detach();
                    self.stop_requested = true;
                }
                let (voltage, current) = trace.into_series();
                self.trace.replace(voltage, current);
                self.refresh_plot();
                info!(path = %path.display(), points = self.trace.len(), "Loaded trace");
                self.status = format!("Loaded {} points from {}", self.trace.len(), path.display());
            }
            Err(e) => self.report_error("Open Data", &e),
        }
    }

    pub fn save_data(&mut self, path: &Path) {
        match storage::save(path, &self.trace) {
            Ok(()) => {
                info!(path = %path.display(), points = self.trace.len(), "Saved trace");
                self.status = format!("Saved {} points to {}", self.trace.len(), path.display());
            }
            Err(e) => self.report_error("Save Data", &e),
        }
    }

    pub fn export_plot(&mut self, path: &Path) {
        let (width, height) = self.export_size;
        match plot::export(&self.plot, path, width, height) {
            Ok(()) => self.status = format!("Exported plot to {}", path.display()),
            Err(e) => self.report_error("Export Plot", &e),
        }
    }

    pub fn analyze_data(&mut self) {
        match analyze(&self.trace) {
            Ok(analysis) => {
                self.results.push_str(&analysis.report());
                self.status = "Analysis complete".to_string();
            }
            Err(e) => self.report_error("Analyze Data", &e),
        }
    }
}
