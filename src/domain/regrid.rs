use crate::domain::models::{Settings, Slots};
use crate::domain::slot_grid;
use std::collections::HashMap;

/// Re-shapes `old_slots` to the grid of `settings`.
///
/// Task text follows its exact time label. Labels absent from the new grid
/// are dropped, new labels start empty.
pub fn adapt(old_slots: &Slots, settings: &Settings) -> Slots {
    let mut by_label: HashMap<&str, &str> = HashMap::new();
    for slot in old_slots.iter().flatten() {
        if !slot.task_text.is_empty() {
            by_label.entry(slot.label.as_str()).or_insert(slot.task_text.as_str());
        }
    }

    let mut fresh = slot_grid::generate(settings);
    for slot in fresh.iter_mut().flatten() {
        if let Some(task_text) = by_label.remove(slot.label.as_str()) {
            slot.task_text = task_text.to_string();
        }
    }

    if !by_label.is_empty() {
        tracing::info!(
            dropped = by_label.len(),
            "regrid dropped slots with no matching time label"
        );
    }
    fresh
}
