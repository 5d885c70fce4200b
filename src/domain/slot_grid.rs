use crate::domain::models::{Settings, Slots, TimeSlot};
use chrono::{NaiveTime, Timelike};

/// Builds the empty grid for `settings`: one row per hour in
/// `[start_hour, end_hour)`, `segments_per_hour` slots per row.
pub fn generate(settings: &Settings) -> Slots {
    let segments = settings.segments_per_hour.max(1);
    (settings.start_hour..settings.end_hour)
        .map(|hour| {
            (0..segments)
                .map(|segment| TimeSlot {
                    id: slot_id(hour, segment),
                    label: slot_label(hour, segment, segments),
                    task_text: String::new(),
                })
                .collect()
        })
        .collect()
}

pub fn slot_id(hour: u32, segment: u32) -> String {
    format!("{hour}-{segment}")
}

/// Label such as `"7:00 - 7:20"`; an end minute of 60 rolls into the next hour.
pub fn slot_label(hour: u32, segment: u32, segments_per_hour: u32) -> String {
    let (start_minute, end_minute) = segment_bounds(segment, segments_per_hour);
    let (end_hour, end_minute) = if end_minute >= 60 {
        (hour + 1, 0)
    } else {
        (hour, end_minute)
    };
    format!(
        "{hour}:{} - {end_hour}:{}",
        format_minute(start_minute),
        format_minute(end_minute)
    )
}

fn segment_bounds(segment: u32, segments_per_hour: u32) -> (u32, u32) {
    let segments = segments_per_hour.max(1);
    (segment * 60 / segments, (segment + 1) * 60 / segments)
}

fn format_minute(minute: u32) -> String {
    if minute == 0 {
        "00".to_string()
    } else {
        minute.to_string()
    }
}

/// Grid position containing `time`, or `None` outside the configured hours.
pub fn locate_slot(settings: &Settings, time: NaiveTime) -> Option<(usize, usize)> {
    let hour = time.hour();
    if hour < settings.start_hour || hour >= settings.end_hour {
        return None;
    }
    let segments = settings.segments_per_hour.max(1);
    let minute = time.minute();
    let segment = (0..segments)
        .find(|segment| minute < segment_bounds(*segment, segments).1)
        .unwrap_or(segments - 1);
    Some(((hour - settings.start_hour) as usize, segment as usize))
}

/// True when `slots` has exactly the labels `generate(settings)` would produce.
pub fn matches_settings(slots: &Slots, settings: &Settings) -> bool {
    let expected = generate(settings);
    slots.len() == expected.len()
        && slots.iter().zip(&expected).all(|(row, expected_row)| {
            row.len() == expected_row.len()
                && row
                    .iter()
                    .zip(expected_row)
                    .all(|(slot, expected_slot)| slot.label == expected_slot.label)
        })
}
