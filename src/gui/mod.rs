//! The eframe/egui implementation for the GUI.
//!
//! ## Architecture
//!
//! `EchemGui` implements `eframe::App` and owns the [`AppState`]. It never
//! awaits: every session request is queued on the [`SessionClient`] and its
//! oneshot response is polled once per frame from `pending`.
//!
//! - **Panels:**
//!   - `TopBottomPanel` (Top): File and Tools menus.
//!   - `SidePanel` (Left): connect/disconnect toggle, technique controls,
//!     Start and Stop.
//!   - `CentralPanel`: Plot, Data and Results tabs.
//!   - `TopBottomPanel` (Bottom): status bar.
//!
//! - **Data Flow:** during a measurement the session actor forwards samples
//!   into a bounded channel read by [`AppState::pump`] at the start of each
//!   frame, and requests a repaint after each sample. The trace is only ever
//!   touched on the UI thread.
//!
//! ## Modules
//!
//! - `technique_controls`: technique selector and bounded parameter controls.

mod technique_controls;

use crate::{
    app_actor::{SessionActor, SessionClient},
    config::Settings,
    core::{ConnectionState, DeviceId, RedrawHook, Sample},
    error::{AppResult, EchemError},
    instrument::{self, InstrumentSession, MeasurementHandle},
    messages::SessionCommand,
    plot,
    state::AppState,
};
use anyhow::Context;
use eframe::egui;
use std::time::Duration;
use tokio::{
    runtime::Runtime,
    sync::{mpsc, oneshot},
};
use tracing::{error, info};

/// Central panel tabs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tab {
    Plot,
    Data,
    Results,
}

/// User intents collected while drawing, executed after the frame's UI pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingAction {
    ToggleConnection,
    Start,
    Stop,
    OpenData,
    SaveData,
    ExportPlot,
    Analyze,
}

/// A session request awaiting its response.
enum PendingOperation {
    Connect(oneshot::Receiver<AppResult<DeviceId>>),
    Disconnect(oneshot::Receiver<AppResult<()>>),
    Measure {
        response: oneshot::Receiver<AppResult<MeasurementHandle>>,
        samples: mpsc::Receiver<Sample>,
    },
    Stop(oneshot::Receiver<AppResult<()>>),
    State(oneshot::Receiver<ConnectionState>),
}

impl PendingOperation {
    fn is_connection_change(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Disconnect(_))
    }
}

/// Outcome of polling one oneshot.
enum Poll<T> {
    Ready(T),
    Waiting,
    Lost,
}

fn poll<T>(rx: &mut oneshot::Receiver<T>) -> Poll<T> {
    match rx.try_recv() {
        Ok(value) => Poll::Ready(value),
        Err(oneshot::error::TryRecvError::Empty) => Poll::Waiting,
        Err(oneshot::error::TryRecvError::Closed) => Poll::Lost,
    }
}

/// The main GUI struct.
pub struct EchemGui {
    state: AppState,
    client: SessionClient,
    redraw: RedrawHook,
    sample_channel_capacity: usize,
    pending: Vec<PendingOperation>,
    refresh_state: bool,
    tab: Tab,
    // Keeps the session actor's runtime alive for the lifetime of the window
    runtime: Runtime,
}

impl EchemGui {
    /// Creates a new GUI around an already spawned session.
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        state: AppState,
        client: SessionClient,
        runtime: Runtime,
        sample_channel_capacity: usize,
    ) -> Self {
        let ctx = cc.egui_ctx.clone();
        Self {
            state,
            client,
            redraw: RedrawHook::new(move || ctx.request_repaint()),
            sample_channel_capacity,
            pending: Vec::new(),
            refresh_state: false,
            tab: Tab::Plot,
            runtime,
        }
    }

    fn send(&mut self, action: &str, command: SessionCommand) -> bool {
        match self.client.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                self.state.report_error(action, &e);
                false
            }
        }
    }

    fn connection_busy(&self) -> bool {
        self.pending.iter().any(PendingOperation::is_connection_change)
            || self.state.connection == ConnectionState::Connecting
    }

    fn execute(&mut self, action: PendingAction) {
        match action {
            PendingAction::ToggleConnection => self.toggle_connection(),
            PendingAction::Start => self.start_measurement(),
            PendingAction::Stop => {
                let (command, rx) = SessionCommand::stop();
                if self.send("Stop", command) {
                    self.pending.push(PendingOperation::Stop(rx));
                }
            }
            PendingAction::OpenData => {
                if let Some(path) = self.file_dialog("CSV", &["csv"]).pick_file() {
                    self.state.load_data(&path);
                }
            }
            PendingAction::SaveData => {
                let name = crate::data::storage::default_file_name();
                if let Some(path) = self
                    .file_dialog("CSV", &["csv"])
                    .set_file_name(name)
                    .save_file()
                {
                    self.state.save_data(&path);
                }
            }
            PendingAction::ExportPlot => {
                if let Some(path) = self
                    .file_dialog("Image", &["png", "svg"])
                    .set_file_name("plot.png")
                    .save_file()
                {
                    self.state.export_plot(&path);
                }
            }
            PendingAction::Analyze => {
                self.state.analyze_data();
                self.tab = Tab::Results;
            }
        }
    }

    fn file_dialog(&self, name: &str, extensions: &[&str]) -> rfd::FileDialog {
        let dialog = rfd::FileDialog::new().add_filter(name, extensions);
        if self.state.data_dir.is_dir() {
            dialog.set_directory(&self.state.data_dir)
        } else {
            dialog
        }
    }

    fn toggle_connection(&mut self) {
        if self.state.connection == ConnectionState::Disconnected {
            let (command, rx) = SessionCommand::connect_first();
            if self.send("Connect", command) {
                self.state.connection = ConnectionState::Connecting;
                self.state.status = "Connecting...".to_string();
                self.pending.push(PendingOperation::Connect(rx));
            }
        } else {
            let (command, rx) = SessionCommand::disconnect();
            if self.send("Disconnect", command) {
                self.pending.push(PendingOperation::Disconnect(rx));
            }
        }
    }

    fn start_measurement(&mut self) {
        let method = match self.state.current_method() {
            Ok(method) => method,
            Err(e) => {
                self.state.report_error("Start Measurement", &e);
                return;
            }
        };

        let (tx, samples) = mpsc::channel(self.sample_channel_capacity);
        let (command, response) = SessionCommand::measure(method, tx, self.redraw.clone());
        if self.send("Start Measurement", command) {
            self.pending
                .push(PendingOperation::Measure { response, samples });
        }
    }

    /// Polls every in-flight request, keeping those still waiting.
    fn poll_pending(&mut self) {
        for op in std::mem::take(&mut self.pending) {
            if let Some(op) = self.poll_operation(op) {
                self.pending.push(op);
            }
        }
    }

    fn poll_operation(&mut self, op: PendingOperation) -> Option<PendingOperation> {
        match op {
            PendingOperation::Connect(mut rx) => match poll(&mut rx) {
                Poll::Ready(Ok(device)) => {
                    self.state.status = format!("Connected to {}", device);
                    self.state.connection = ConnectionState::Connected(device);
                    None
                }
                Poll::Ready(Err(e)) => {
                    self.state.connection = ConnectionState::Disconnected;
                    self.state.report_error("Connect", &e);
                    None
                }
                Poll::Waiting => Some(PendingOperation::Connect(rx)),
                Poll::Lost => {
                    self.session_lost();
                    None
                }
            },
            PendingOperation::Disconnect(mut rx) => match poll(&mut rx) {
                Poll::Ready(Ok(())) => {
                    self.state.connection = ConnectionState::Disconnected;
                    self.state.status = "Disconnected".to_string();
                    None
                }
                Poll::Ready(Err(e)) => {
                    self.state.report_error("Disconnect", &e);
                    self.refresh_state = true;
                    None
                }
                Poll::Waiting => Some(PendingOperation::Disconnect(rx)),
                Poll::Lost => {
                    self.session_lost();
                    None
                }
            },
            PendingOperation::Measure {
                mut response,
                samples,
            } => match poll(&mut response) {
                Poll::Ready(Ok(handle)) => {
                    info!(id = handle.id, technique = %handle.technique, "Measurement accepted");
                    self.state.begin_measurement(samples);
                    self.state.connection = ConnectionState::Measuring(handle.device);
                    self.tab = Tab::Plot;
                    None
                }
                Poll::Ready(Err(e)) => {
                    self.state.report_error("Start Measurement", &e);
                    None
                }
                Poll::Waiting => Some(PendingOperation::Measure { response, samples }),
                Poll::Lost => {
                    self.session_lost();
                    None
                }
            },
            PendingOperation::Stop(mut rx) => match poll(&mut rx) {
                Poll::Ready(Ok(())) => {
                    self.state.status = "Measurement stopped".to_string();
                    self.refresh_state = true;
                    None
                }
                Poll::Ready(Err(e)) => {
                    self.state.report_error("Stop", &e);
                    None
                }
                Poll::Waiting => Some(PendingOperation::Stop(rx)),
                Poll::Lost => {
                    self.session_lost();
                    None
                }
            },
            PendingOperation::State(mut rx) => match poll(&mut rx) {
                Poll::Ready(connection) => {
                    // The driver task may outlive the last forwarded sample by a moment
                    self.refresh_state = connection.is_measuring() && !self.state.sink.is_attached();
                    self.state.connection = connection;
                    None
                }
                Poll::Waiting => Some(PendingOperation::State(rx)),
                Poll::Lost => {
                    self.session_lost();
                    None
                }
            },
        }
    }

    fn session_lost(&mut self) {
        error!("Session actor stopped responding");
        self.state.report_error(
            "Session",
            &EchemError::ChannelClosed("session actor has stopped".to_string()),
        );
        self.state.connection = ConnectionState::Disconnected;
    }

    fn request_state(&mut self) {
        if self
            .pending
            .iter()
            .any(|op| matches!(op, PendingOperation::State(_)))
        {
            return;
        }
        let (command, rx) = SessionCommand::get_state();
        if self.send("Refresh", command) {
            self.pending.push(PendingOperation::State(rx));
            self.refresh_state = false;
        }
    }

    fn menu_bar(&self, ui: &mut egui::Ui, actions: &mut Vec<PendingAction>) {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open Data...").clicked() {
                    actions.push(PendingAction::OpenData);
                    ui.close_menu();
                }
                if ui.button("Save Data...").clicked() {
                    actions.push(PendingAction::SaveData);
                    ui.close_menu();
                }
                if ui.button("Export Plot...").clicked() {
                    actions.push(PendingAction::ExportPlot);
                    ui.close_menu();
                }
            });
            ui.menu_button("Tools", |ui| {
                if ui.button("Analyze Data").clicked() {
                    actions.push(PendingAction::Analyze);
                    ui.close_menu();
                }
            });
        });
    }

    fn control_panel(&mut self, ui: &mut egui::Ui, actions: &mut Vec<PendingAction>) {
        ui.heading("Instrument");
        ui.separator();

        let connection = self.state.connection.clone();
        let busy = self.connection_busy();
        ui.horizontal(|ui| {
            let (color, text) = match &connection {
                ConnectionState::Disconnected => (egui::Color32::GRAY, "● Disconnected"),
                ConnectionState::Connecting => (egui::Color32::YELLOW, "● Connecting"),
                ConnectionState::Connected(_) => (egui::Color32::GREEN, "● Connected"),
                ConnectionState::Measuring(_) => (egui::Color32::LIGHT_BLUE, "● Measuring"),
            };
            ui.colored_label(color, text);
            if let Some(device) = connection.device() {
                ui.label(device.to_string());
            }
        });

        let toggle_label = if connection == ConnectionState::Disconnected {
            "Connect"
        } else {
            "Disconnect"
        };
        if ui
            .add_enabled(!busy, egui::Button::new(toggle_label))
            .clicked()
        {
            actions.push(PendingAction::ToggleConnection);
        }

        ui.add_space(10.0);
        ui.heading("Technique");
        ui.separator();
        technique_controls::ui(ui, &mut self.state, !connection.is_measuring());

        ui.add_space(10.0);
        ui.horizontal(|ui| {
            let can_start = connection.is_connected() && !connection.is_measuring();
            if ui
                .add_enabled(can_start, egui::Button::new("▶ Start"))
                .clicked()
            {
                actions.push(PendingAction::Start);
            }
            if ui
                .add_enabled(connection.is_measuring(), egui::Button::new("■ Stop"))
                .clicked()
            {
                actions.push(PendingAction::Stop);
            }
        });
    }

    fn central_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.tab, Tab::Plot, "Plot");
            ui.selectable_value(&mut self.tab, Tab::Data, "Data");
            ui.selectable_value(&mut self.tab, Tab::Results, "Results");
        });
        ui.separator();

        match self.tab {
            Tab::Plot => plot::show(ui, self.state.plot()),
            Tab::Data => {
                let text = self.state.trace.data_text();
                read_only_text(ui, "data_text", &text);
            }
            Tab::Results => read_only_text(ui, "results_text", &self.state.results),
        }
    }
}

fn read_only_text(ui: &mut egui::Ui, id: &str, text: &str) {
    egui::ScrollArea::both()
        .id_salt(id)
        .auto_shrink([false, false])
        .show(ui, |ui| {
            let mut text = text;
            ui.add(
                egui::TextEdit::multiline(&mut text)
                    .code_editor()
                    .desired_width(f32::INFINITY),
            );
        });
}

impl eframe::App for EchemGui {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_pending();
        let report = self.state.pump();
        if report.finished {
            self.refresh_state = true;
        }
        if self.refresh_state {
            self.request_state();
        }

        let mut actions = Vec::new();

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            self.menu_bar(ui, &mut actions);
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.state.status);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("{} points", self.state.trace.len()));
                });
            });
        });

        egui::SidePanel::left("control_panel")
            .resizable(true)
            .min_width(260.0)
            .show(ctx, |ui| {
                self.control_panel(ui, &mut actions);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.central_panel(ui);
        });

        for action in actions {
            self.execute(action);
        }
        if self.state.take_stop_request() {
            self.execute(PendingAction::Stop);
        }

        // Responses arrive without a redraw request of their own
        if !self.pending.is_empty() || self.refresh_state || self.state.sink.is_attached() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }
}

impl Drop for EchemGui {
    fn drop(&mut self) {
        // Give the actor a chance to disconnect cleanly before the runtime goes away
        let shutdown = tokio::time::timeout(Duration::from_secs(2), self.client.shutdown());
        match self.runtime.block_on(shutdown) {
            Ok(Ok(())) => info!("Session shut down"),
            Ok(Err(e)) => error!(error = %e, "Session shutdown failed"),
            Err(_) => error!("Session shutdown timed out"),
        }
    }
}

/// Spawns the session and runs the window until it is closed.
pub fn run(settings: Settings) -> anyhow::Result<()> {
    let runtime = Runtime::new().context("failed to start async runtime")?;
    let driver = instrument::driver_from_config(&settings.instrument)?;
    let actor = SessionActor::new(
        InstrumentSession::new(driver),
        settings.acquisition.sample_channel_capacity,
    );
    let (client, _task) = {
        let _guard = runtime.enter();
        SessionClient::spawn(actor, settings.acquisition.command_channel_capacity)
    };
    if let Err(e) = std::fs::create_dir_all(&settings.storage.data_dir) {
        error!(dir = %settings.storage.data_dir.display(), error = %e, "Could not create data directory");
    }
    let state = AppState::new(&settings)?;
    let sample_channel_capacity = settings.acquisition.sample_channel_capacity;
    let title = settings.application.name.clone();

    info!(%title, "Starting GUI");
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title(&title),
        ..Default::default()
    };

    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| {
            Ok(Box::new(EchemGui::new(
                cc,
                state,
                client,
                runtime,
                sample_channel_capacity,
            )))
        }),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {e}"))
}
