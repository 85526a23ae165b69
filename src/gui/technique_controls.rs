//! Technique selector and bounded parameter controls.
//!
//! One `DragValue` per parameter of the selected preset, limited to the
//! preset's range and stepped by its increment. Values are kept per technique
//! in [`AppState`], so switching back and forth keeps what the user typed.

use crate::state::AppState;
use crate::technique::Technique;
use egui::{ComboBox, DragValue, Grid, Ui};

/// Renders the controls. Returns true if anything changed.
pub fn ui(ui: &mut Ui, state: &mut AppState, enabled: bool) -> bool {
    let mut changed = false;

    ui.add_enabled_ui(enabled, |ui| {
        let mut selected = state.technique;
        ComboBox::from_label("Technique")
            .selected_text(selected.id())
            .show_ui(ui, |ui| {
                for technique in Technique::ALL {
                    ui.selectable_value(&mut selected, technique, technique.id());
                }
            });
        if selected != state.technique {
            state.technique = selected;
            changed = true;
        }

        ui.add_space(6.0);

        let preset = state.preset();
        Grid::new("technique_parameters")
            .num_columns(2)
            .spacing([8.0, 4.0])
            .show(ui, |ui| {
                for spec in preset.parameters {
                    let mut value = state
                        .parameters()
                        .get(spec.name)
                        .copied()
                        .unwrap_or(spec.default);

                    ui.label(spec.name);
                    let response = ui.add(
                        DragValue::new(&mut value)
                            .range(spec.min..=spec.max)
                            .speed(spec.step)
                            .max_decimals(decimals(spec.step)),
                    );
                    if response.changed() {
                        state.set_parameter(spec.name, value);
                        changed = true;
                    }
                    ui.end_row();
                }
            });
    });

    changed
}

/// Decimal places needed to show multiples of `step`.
fn decimals(step: f64) -> usize {
    if step <= 0.0 || !step.is_finite() {
        return 6;
    }
    (-step.log10() - 1e-9).ceil().max(0.0) as usize
}
