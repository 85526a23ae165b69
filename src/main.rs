//! # echem
//!
//! Desktop front end and headless tools for PalmSens-family potentiostats.
//!
//! ## Usage
//!
//! ```bash
//! # Open the GUI (default)
//! echem
//!
//! # List technique presets
//! echem presets --json
//!
//! # Run a measurement on the configured driver and save it
//! echem measure --technique CV --set "Number of Scans=3" --output cv.csv --plot cv.png
//!
//! # Analyse or plot an existing data file
//! echem analyze cv.csv
//! echem export cv.csv --output cv.svg
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use echem_daq::{
    app_actor::{self, SessionActor, SessionClient},
    config::Settings,
    data::{analyze, storage, TraceStore},
    instrument::{self, InstrumentSession},
    plot::{self, PlotRenderer},
    technique::{self, Technique},
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// echem - potentiostat acquisition, plotting and storage
#[derive(Parser)]
#[command(name = "echem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/default.toml if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the graphical interface
    Gui,

    /// List techniques and their parameter ranges
    Presets {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one measurement headlessly
    Measure {
        /// DPV, CV or SWV (defaults to the configured technique)
        #[arg(short, long)]
        technique: Option<String>,

        /// Override a parameter, e.g. --set "Scan Rate (V/s)=0.1"
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        overrides: Vec<(String, f64)>,

        /// CSV output (defaults to a timestamped file in the data directory)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Also export the plot (.png or .svg)
        #[arg(long, value_name = "IMAGE")]
        plot: Option<PathBuf>,
    },

    /// Print peak analysis of a data file
    Analyze {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Export the plot of a data file
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Image path (.png or .svg)
        #[arg(short, long, value_name = "IMAGE")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;

    // RUST_LOG takes precedence over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.application.log_level.to_lowercase())),
        )
        .init();

    match cli.command.unwrap_or(Commands::Gui) {
        Commands::Gui => run_gui(settings),
        Commands::Presets { json } => run_presets(json),
        Commands::Measure {
            technique,
            overrides,
            output,
            plot,
        } => run_measure(&settings, technique.as_deref(), &overrides, output, plot),
        Commands::Analyze { file } => run_analyze(&file),
        Commands::Export { file, output } => run_export(&settings, &file, &output),
    }
}

#[cfg(feature = "gui")]
fn run_gui(settings: Settings) -> Result<()> {
    echem_daq::gui::run(settings)
}

#[cfg(not(feature = "gui"))]
fn run_gui(_settings: Settings) -> Result<()> {
    Err(echem_daq::error::EchemError::FeatureNotEnabled("gui".to_string()).into())
}

fn run_presets(json: bool) -> Result<()> {
    let presets: Vec<_> = Technique::ALL.iter().map(|t| technique::preset(*t)).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }

    for preset in &presets {
        println!("{}", preset.technique);
        for spec in preset.parameters {
            println!(
                "  {:<30} default {:>8}  range [{}, {}]  step {}",
                spec.name, spec.default, spec.min, spec.max, spec.step
            );
        }
    }
    Ok(())
}

/// Parses `NAME=VALUE`, splitting on the last `=`.
fn parse_assignment(raw: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    Ok((name.trim().to_string(), value))
}

fn run_measure(
    settings: &Settings,
    technique: Option<&str>,
    overrides: &[(String, f64)],
    output: Option<PathBuf>,
    plot_path: Option<PathBuf>,
) -> Result<()> {
    let technique = match technique {
        Some(id) => id.parse::<Technique>()?,
        None => settings.default_technique()?,
    };
    let preset = technique::preset(technique);
    let mut values = preset.defaults();
    for (name, value) in overrides {
        let Some(spec) = preset.parameter(name) else {
            bail!("{} has no parameter '{}'", technique, name);
        };
        spec.validate(*value)?;
        values.insert(name.clone(), *value);
    }
    let method = technique::build(technique, &values)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let (trace, report) = runtime.block_on(async {
        let driver = instrument::driver_from_config(&settings.instrument)?;
        let actor = SessionActor::new(
            InstrumentSession::new(driver),
            settings.acquisition.sample_channel_capacity,
        );
        let (client, task) =
            SessionClient::spawn(actor, settings.acquisition.command_channel_capacity);

        let device = client.connect_first().await?;
        info!(%device, %technique, "Measuring");
        let result = app_actor::acquire(
            &client,
            method,
            settings.acquisition.sample_channel_capacity,
        )
        .await;

        client.shutdown().await?;
        app_actor::join_actor(task).await;
        anyhow::Ok(result?)
    })?;

    if let Some(message) = report.status_message() {
        eprintln!("{}", message);
    }
    println!("{} points acquired", trace.len());

    let output = match output {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&settings.storage.data_dir).with_context(|| {
                format!("failed to create {}", settings.storage.data_dir.display())
            })?;
            storage::default_path(&settings.storage.data_dir)
        }
    };
    storage::save(&output, &trace)?;
    println!("Saved {}", output.display());

    if let Some(path) = plot_path {
        export_trace(settings, &trace, &path)?;
    }
    if let Ok(analysis) = analyze(&trace) {
        print!("{}", analysis.report());
    }
    Ok(())
}

fn run_analyze(file: &Path) -> Result<()> {
    let trace = storage::load(file).with_context(|| format!("failed to load {}", file.display()))?;
    print!("{}", analyze(&trace)?.report());
    Ok(())
}

fn run_export(settings: &Settings, file: &Path, output: &Path) -> Result<()> {
    let trace = storage::load(file).with_context(|| format!("failed to load {}", file.display()))?;
    export_trace(settings, &trace, output)
}

fn export_trace(settings: &Settings, trace: &TraceStore, path: &Path) -> Result<()> {
    let model = PlotRenderer::new().render(trace);
    plot::export(
        &model,
        path,
        settings.storage.export_width,
        settings.storage.export_height,
    )?;
    println!("Exported {}", path.display());
    Ok(())
}
