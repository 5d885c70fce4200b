use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_START_HOUR: u32 = 7;
pub const DEFAULT_END_HOUR: u32 = 22;
pub const DEFAULT_SEGMENTS_PER_HOUR: u32 = 3;
pub const MAX_SEGMENTS_PER_HOUR: u32 = 60;

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Time range and granularity of the daily grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub start_hour: u32,
    pub end_hour: u32,
    pub segments_per_hour: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_START_HOUR,
            end_hour: DEFAULT_END_HOUR,
            segments_per_hour: DEFAULT_SEGMENTS_PER_HOUR,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        if self.end_hour > 24 {
            return Err("settings.end_hour must be <= 24".to_string());
        }
        if self.end_hour <= self.start_hour {
            return Err("settings.end_hour must be after settings.start_hour".to_string());
        }
        if self.segments_per_hour == 0 {
            return Err("settings.segments_per_hour must be > 0".to_string());
        }
        if self.segments_per_hour > MAX_SEGMENTS_PER_HOUR {
            return Err(format!(
                "settings.segments_per_hour must be <= {MAX_SEGMENTS_PER_HOUR}"
            ));
        }
        Ok(())
    }

    pub fn hour_count(&self) -> usize {
        self.end_hour.saturating_sub(self.start_hour) as usize
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Initial,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "initial" => Some(Self::Initial),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Display status of a whole slot, derived from its entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Initial,
    Completed,
    Failed,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskEntry {
    pub content: String,
    pub status: TaskStatus,
}

impl TaskEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: TaskStatus::Initial,
        }
    }

    pub fn with_status(content: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            content: content.into(),
            status,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.content, "task.content")?;
        if self.content.trim() != self.content {
            return Err("task.content must not start or end with whitespace".to_string());
        }
        if self.content.contains('\n') || self.content.contains('\r') {
            return Err("task.content must be a single line".to_string());
        }
        if self.content.contains(crate::domain::task_codec::MARKER_PREFIX) {
            return Err("task.content must not contain a status marker".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    pub id: String,
    #[serde(rename = "time")]
    pub label: String,
    #[serde(rename = "task", default)]
    pub task_text: String,
}

/// Slots grouped by hour, in grid order.
pub type Slots = Vec<Vec<TimeSlot>>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    #[serde(rename = "initial", alias = "pending")]
    pub pending: u32,
}

impl Stats {
    pub fn is_consistent(&self) -> bool {
        self.total == self.completed + self.failed + self.pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayRecord {
    #[serde(default)]
    pub date: String,
    #[serde(rename = "timeSlots", default)]
    pub slots: Slots,
    #[serde(rename = "dailyTasks", default)]
    pub daily_note: String,
    #[serde(default)]
    pub stats: Stats,
    /// Unix epoch milliseconds of the last write.
    #[serde(rename = "timestamp", default)]
    pub updated_at: i64,
}

impl DayRecord {
    pub fn slot(&self, hour_index: usize, segment_index: usize) -> Option<&TimeSlot> {
        self.slots.get(hour_index)?.get(segment_index)
    }

    pub fn slot_mut(&mut self, hour_index: usize, segment_index: usize) -> Option<&mut TimeSlot> {
        self.slots.get_mut(hour_index)?.get_mut(segment_index)
    }
}

/// Full persisted history, one record per calendar date key.
pub type Archive = BTreeMap<String, DayRecord>;

pub fn format_date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_KEY_FORMAT).ok()
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
