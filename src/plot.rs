//! Current-vs-potential plot.
//!
//! [`PlotRenderer::render`] turns a [`TraceStore`] into a [`PlotModel`]: a
//! single line series plus axis styling. The model holds no history, so
//! rendering the same trace twice yields equal models. The GUI draws the model
//! with `egui_plot`; [`export`] writes it headlessly to PNG or SVG through
//! `plotters`.

use crate::data::TraceStore;
use crate::error::{AppResult, EchemError};
use image::{ImageFormat, RgbImage};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

pub const X_LABEL: &str = "Potential (V)";
pub const Y_LABEL: &str = "Current (A)";

const TICKS: usize = 5;

/// Everything needed to draw one trace.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlotModel {
    /// `[voltage, current]` pairs in arrival order
    pub points: Vec<[f64; 2]>,
    pub x_label: String,
    pub y_label: String,
    pub grid: bool,
}

impl PlotModel {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Data bounds, padded so that a flat or empty series still spans an area.
    pub fn bounds(&self) -> PlotBounds {
        if self.points.is_empty() {
            return PlotBounds {
                x_min: 0.0,
                x_max: 1.0,
                y_min: 0.0,
                y_max: 1.0,
            };
        }

        let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for [x, y] in self.points.iter().copied().filter(|[x, y]| x.is_finite() && y.is_finite()) {
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
        if !x_min.is_finite() || !y_min.is_finite() {
            return PlotBounds {
                x_min: 0.0,
                x_max: 1.0,
                y_min: 0.0,
                y_max: 1.0,
            };
        }

        let (x_min, x_max) = pad(x_min, x_max, 0.0);
        let (y_min, y_max) = pad(y_min, y_max, 0.05);
        PlotBounds {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }
}

fn pad(min: f64, max: f64, margin: f64) -> (f64, f64) {
    let span = max - min;
    if span <= 0.0 {
        let half = if min == 0.0 { 0.5 } else { min.abs() * 0.1 };
        return (min - half, max + half);
    }
    (min - span * margin, max + span * margin)
}

/// Axis ranges of a plot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PlotBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// Builds plot models from traces.
#[derive(Clone, Debug, Default)]
pub struct PlotRenderer;

impl PlotRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, trace: &TraceStore) -> PlotModel {
        PlotModel {
            points: trace.to_rows().map(|(v, i)| [v, i]).collect(),
            x_label: X_LABEL.to_string(),
            y_label: Y_LABEL.to_string(),
            grid: true,
        }
    }
}

/// Writes `model` to `path` as PNG or SVG, chosen by extension.
///
/// Both formats carry the axis labels, tick values and grid.
pub fn export(model: &PlotModel, path: &Path, width: u32, height: u32) -> AppResult<()> {
    if width == 0 || height == 0 {
        return Err(EchemError::Configuration(
            "export size must be non-zero".to_string(),
        ));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "png" => {
            let mut buffer = vec![0u8; width as usize * height as usize * 3];
            {
                let root = BitMapBackend::with_buffer(&mut buffer, (width, height))
                    .into_drawing_area();
                draw_chart(&root, model)?;
            }
            let img = RgbImage::from_raw(width, height, buffer)
                .ok_or_else(|| EchemError::Export("bitmap size mismatch".to_string()))?;
            img.save_with_format(path, ImageFormat::Png)?;
        }
        "svg" => {
            let mut svg = String::new();
            {
                let root = SVGBackend::with_string(&mut svg, (width, height)).into_drawing_area();
                draw_chart(&root, model)?;
            }
            std::fs::write(path, svg)?;
        }
        _ => return Err(EchemError::UnsupportedExport(extension)),
    }

    info!(path = %path.display(), width, height, points = model.points.len(), "Exported plot");
    Ok(())
}

const FONT_FAMILY: &str = "sans-serif";
const SERIES: RGBColor = RGBColor(31, 119, 180);

/// Makes egui's bundled sans-serif face available to plotters. Exports must
/// not depend on system fonts being installed.
fn register_fonts() -> AppResult<()> {
    static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();
    REGISTERED
        .get_or_init(|| {
            register_font(FONT_FAMILY, FontStyle::Normal, epaint_default_fonts::UBUNTU_LIGHT)
                .map_err(|_| "invalid font data".to_string())
        })
        .clone()
        .map_err(EchemError::Export)
}

fn render_error(err: impl std::fmt::Display) -> EchemError {
    EchemError::Export(err.to_string())
}

fn draw_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    model: &PlotModel,
) -> AppResult<()> {
    register_fonts()?;
    root.fill(&WHITE).map_err(render_error)?;

    let bounds = model.bounds();
    let (_, height) = root.dim_in_pixel();
    let font = (height / 40).max(10);
    let mut chart = ChartBuilder::on(root)
        .margin(font)
        .x_label_area_size(font * 3)
        .y_label_area_size(font * 6)
        .build_cartesian_2d(bounds.x_min..bounds.x_max, bounds.y_min..bounds.y_max)
        .map_err(render_error)?;

    let current_tick = |y: &f64| format!("{:.1e}", y);
    let mut mesh = chart.configure_mesh();
    mesh.x_desc(model.x_label.as_str())
        .y_desc(model.y_label.as_str())
        .x_labels(TICKS)
        .y_labels(TICKS)
        .y_label_formatter(&current_tick)
        .label_style((FONT_FAMILY, font))
        .axis_desc_style((FONT_FAMILY, font + 2));
    if !model.grid {
        mesh.disable_mesh();
    }
    mesh.draw().map_err(render_error)?;

    chart
        .draw_series(LineSeries::new(
            model.points.iter().map(|&[x, y]| (x, y)),
            SERIES.stroke_width(2),
        ))
        .map_err(render_error)?;
    root.present().map_err(render_error)?;
    Ok(())
}

/// Draws the model into an egui panel.
#[cfg(feature = "gui")]
pub fn show(ui: &mut egui::Ui, model: &PlotModel) {
    use egui_plot::{Line, Plot, PlotPoints};

    let line = Line::new(PlotPoints::from_iter(model.points.iter().copied())).name("Current");
    Plot::new("trace_plot")
        .x_axis_label(model.x_label.clone())
        .y_axis_label(model.y_label.clone())
        .show_grid(model.grid)
        .show(ui, |plot_ui| {
            plot_ui.line(line);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn trace() -> TraceStore {
        TraceStore::from_series(
            vec![-0.2, -0.1, 0.0, 0.1, 0.2],
            vec![1.0e-7, 2.0e-7, 5.0e-7, 2.0e-7, 1.0e-7],
        )
    }

    #[test]
    fn test_render_is_idempotent() {
        let renderer = PlotRenderer::new();
        let trace = trace();
        let first = renderer.render(&trace);
        let second = renderer.render(&trace);
        assert_eq!(first, second);
        assert_eq!(first.points.len(), 5);
        assert_eq!(first.x_label, "Potential (V)");
        assert_eq!(first.y_label, "Current (A)");
        assert!(first.grid);
    }

    #[test]
    fn test_render_pairs_to_shorter_series() {
        let ragged = TraceStore::from_series(vec![0.1, 0.2, 0.3], vec![1.0]);
        let model = PlotRenderer::new().render(&ragged);
        assert_eq!(model.points, vec![[0.1, 1.0]]);
    }

    #[test]
    fn test_bounds_of_flat_and_empty_series() {
        let empty = PlotRenderer::new().render(&TraceStore::new());
        let b = empty.bounds();
        assert!(b.x_max > b.x_min && b.y_max > b.y_min);

        let flat = TraceStore::from_series(vec![0.0, 0.0], vec![2.0, 2.0]);
        let b = PlotRenderer::new().render(&flat).bounds();
        assert!(b.x_max > b.x_min && b.y_max > b.y_min);
    }

    #[test]
    fn test_png_export_has_requested_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plot.png");
        let model = PlotRenderer::new().render(&trace());
        export(&model, &path, 640, 480).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.width(), 640);
        assert_eq!(img.height(), 480);

        // Series drawn in blue
        assert!(img.pixels().any(|p| p[2] > 150 && p[0] < 100));

        // Tick values and the axis description sit below the x axis: the
        // bottom label strip (12 px margin, 36 px label area) holds text
        let text_rows = 440..468;
        let inked = (0..img.width())
            .flat_map(|x| text_rows.clone().map(move |y| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y).0.iter().any(|&c| c < 200))
            .count();
        assert!(inked > 20, "no label text in the PNG ({} inked pixels)", inked);
    }

    #[test]
    fn test_svg_export_carries_axis_labels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plot.SVG");
        let model = PlotRenderer::new().render(&trace());
        export(&model, &path, 800, 600).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Potential (V)"));
        assert!(svg.contains("Current (A)"));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plot.bmp");
        let model = PlotRenderer::new().render(&trace());
        let err = export(&model, &path, 100, 100).unwrap_err();
        assert!(matches!(err, EchemError::UnsupportedExport(ext) if ext == "bmp"));
        assert!(!path.exists());
    }
}
