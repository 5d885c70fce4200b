use crate::application::clock::LocalClock;
use crate::application::schedule_config::ScheduleConfig;
use crate::domain::models::{
    format_date_key, parse_date_key, Archive, DayRecord, Settings, Stats, TaskEntry, TaskStatus,
};
use crate::domain::{regrid, slot_grid, status, task_codec};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{
    ChangeFeed, KeyValueStore, COPIED_TASKS_KEY, HISTORY_KEY, LEGACY_KEYS,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of a mutation. `record` is always usable; `persisted` is false when
/// the change only lives in this session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WriteOutcome {
    pub record: DayRecord,
    pub applied: bool,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub date: String,
    pub stats: Stats,
    pub updated_at: i64,
}

#[derive(Debug, Default)]
struct SessionState {
    // records whose last write failed; they shadow storage until a write succeeds
    unsaved: Archive,
}

/// Sole owner of the persisted archive.
pub struct DayRecordStore<S>
where
    S: KeyValueStore,
{
    store: Arc<S>,
    schedule: ScheduleConfig<S>,
    clock: LocalClock,
    feed: ChangeFeed,
    session: Mutex<SessionState>,
}

impl<S> DayRecordStore<S>
where
    S: KeyValueStore,
{
    pub fn new(store: Arc<S>, clock: LocalClock, feed: ChangeFeed) -> Self {
        let schedule = ScheduleConfig::new(Arc::clone(&store), feed.clone());
        Self {
            store,
            schedule,
            clock,
            feed,
            session: Mutex::new(SessionState::default()),
        }
    }

    pub fn schedule(&self) -> &ScheduleConfig<S> {
        &self.schedule
    }

    pub fn clock(&self) -> &LocalClock {
        &self.clock
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Today's record, created from the active settings when missing. Never regrids.
    pub fn ensure_today(&self) -> DayRecord {
        self.ensure_today_outcome().record
    }

    /// `ensure_today` reporting whether the record reached storage. `applied` is
    /// true when the record had to be created.
    pub fn ensure_today_outcome(&self) -> WriteOutcome {
        let mut session = self.lock_session();
        let mut archive = self.load_archive(&session);
        let key = format_date_key(self.clock.today());

        if let Some(record) = archive.get(&key) {
            return WriteOutcome {
                persisted: !session.unsaved.contains_key(&key),
                record: record.clone(),
                applied: false,
                error: None,
            };
        }

        let record = self.fresh_record(&key, &self.schedule.resolve());
        archive.insert(key.clone(), record.clone());
        let error = self
            .persist(&mut session, &archive, &record)
            .err()
            .map(|error| error.to_string());
        tracing::info!(date = %key, persisted = error.is_none(), "created record for today");

        WriteOutcome {
            persisted: error.is_none(),
            record,
            applied: true,
            error,
        }
    }

    /// Like `ensure_today`, but also re-shapes the record to the active settings.
    pub fn load_today(&self) -> DayRecord {
        let mut session = self.lock_session();
        let mut archive = self.load_archive(&session);
        let (record, dirty) = self.day_record(&archive, self.clock.today(), &self.schedule.resolve());
        if dirty {
            archive.insert(record.date.clone(), record.clone());
            if let Err(error) = self.persist(&mut session, &archive, &record) {
                tracing::debug!(%error, date = %record.date, "serving today's record from memory");
            }
        }
        record
    }

    /// Replaces the text of one slot. Stale indices are a no-op.
    pub fn update_slot(&self, hour_index: usize, segment_index: usize, task_text: &str) -> WriteOutcome {
        self.mutate_today(|record, _| match record.slot_mut(hour_index, segment_index) {
            Some(slot) => {
                slot.task_text = task_text.to_string();
                true
            }
            None => {
                tracing::debug!(hour_index, segment_index, "update_slot ignored stale index");
                false
            }
        })
    }

    pub fn update_daily_note(&self, text: &str) -> WriteOutcome {
        self.update_daily_note_for(self.clock.today(), text)
    }

    /// Note write addressed to `date`, so text typed before midnight stays on
    /// the day it was typed on. Only today's record is ever re-shaped.
    pub fn update_daily_note_for(&self, date: NaiveDate, text: &str) -> WriteOutcome {
        let mut session = self.lock_session();
        self.mutate_day(&mut session, date, |record, _| {
            record.daily_note = text.to_string();
            true
        })
    }

    /// Fresh empty grid and note for today; also clears the copied-task log.
    pub fn reset(&self) -> WriteOutcome {
        let mut session = self.lock_session();
        let outcome = self.mutate_day(&mut session, self.clock.today(), |record, settings| {
            record.slots = slot_grid::generate(settings);
            record.daily_note.clear();
            true
        });
        if let Err(error) = self.store.remove(COPIED_TASKS_KEY) {
            tracing::warn!(%error, "failed to clear copied task log");
        }
        outcome
    }

    /// Read-only lookup of any date.
    pub fn query(&self, date: NaiveDate) -> Option<DayRecord> {
        let session = self.lock_session();
        self.load_archive(&session).remove(&format_date_key(date))
    }

    /// Dates up to today, newest first.
    pub fn list_history(&self) -> Vec<HistoryEntry> {
        let today = format_date_key(self.clock.today());
        let session = self.lock_session();
        self.load_archive(&session)
            .into_iter()
            .rev()
            .filter(|(date, _)| date.as_str() <= today.as_str())
            .map(|(date, record)| HistoryEntry {
                date,
                stats: record.stats,
                updated_at: record.updated_at,
            })
            .collect()
    }

    pub fn add_entry(&self, hour_index: usize, segment_index: usize, content: &str) -> WriteOutcome {
        let entry = TaskEntry::new(content.trim());
        if entry.validate().is_err() {
            return self.unapplied();
        }
        self.edit_entries(hour_index, segment_index, |entries| {
            entries.push(entry);
            true
        })
    }

    pub fn edit_entry(
        &self,
        hour_index: usize,
        segment_index: usize,
        entry_index: usize,
        content: &str,
    ) -> WriteOutcome {
        let content = content.trim();
        if TaskEntry::new(content).validate().is_err() {
            return self.unapplied();
        }
        self.edit_entries(hour_index, segment_index, |entries| {
            match entries.get_mut(entry_index) {
                Some(entry) => {
                    entry.content = content.to_string();
                    true
                }
                None => false,
            }
        })
    }

    pub fn remove_entry(&self, hour_index: usize, segment_index: usize, entry_index: usize) -> WriteOutcome {
        self.edit_entries(hour_index, segment_index, |entries| {
            if entry_index < entries.len() {
                entries.remove(entry_index);
                true
            } else {
                false
            }
        })
    }

    /// Setting the status an entry already has returns it to `Initial`.
    pub fn set_entry_status(
        &self,
        hour_index: usize,
        segment_index: usize,
        entry_index: usize,
        status: TaskStatus,
    ) -> WriteOutcome {
        self.edit_entries(hour_index, segment_index, |entries| {
            let Some(entry) = entries.get_mut(entry_index) else {
                return false;
            };
            entry.status = if entry.status == status {
                TaskStatus::Initial
            } else {
                status
            };
            true
        })
    }

    /// Adds `content` to the slot covering the current local time unless that
    /// slot already holds it. Successful copies are appended to the copied-task log.
    pub fn copy_task_to_current(&self, content: &str) -> WriteOutcome {
        let content = content.trim().to_string();
        if TaskEntry::new(content.as_str()).validate().is_err() {
            return self.unapplied();
        }

        let now = self.clock.local_time();
        // the copied-task log is updated under the same lock as the record
        let mut session = self.lock_session();
        let outcome = self.mutate_day(&mut session, self.clock.today(), |record, settings| {
            let Some((hour_index, segment_index)) = slot_grid::locate_slot(settings, now) else {
                tracing::debug!(%now, "current time is outside the grid");
                return false;
            };
            let Some(slot) = record.slot_mut(hour_index, segment_index) else {
                return false;
            };
            let mut entries = task_codec::decode(&slot.task_text);
            if entries.iter().any(|entry| entry.content == content) {
                return false;
            }
            entries.push(TaskEntry::new(content.as_str()));
            slot.task_text = task_codec::encode(&entries);
            true
        });

        if outcome.applied {
            let mut copied = self.copied_tasks();
            copied.push(content);
            let written = serde_json::to_string(&copied)
                .map_err(InfraError::from)
                .and_then(|payload| self.store.set(COPIED_TASKS_KEY, &payload));
            if let Err(error) = written {
                tracing::warn!(%error, "failed to append to copied task log");
            }
        }
        outcome
    }

    pub fn copied_tasks(&self) -> Vec<String> {
        match self.store.get(COPIED_TASKS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                tracing::warn!(%error, "malformed copied task log, starting over");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(error) => {
                tracing::warn!(%error, "failed to read copied task log");
                Vec::new()
            }
        }
    }

    pub fn cleanup_legacy_keys(&self) {
        for key in LEGACY_KEYS {
            if let Err(error) = self.store.remove(key) {
                tracing::warn!(%error, key, "failed to remove legacy key");
            }
        }
    }

    fn edit_entries<F>(&self, hour_index: usize, segment_index: usize, edit: F) -> WriteOutcome
    where
        F: FnOnce(&mut Vec<TaskEntry>) -> bool,
    {
        self.mutate_today(|record, _| {
            let Some(slot) = record.slot_mut(hour_index, segment_index) else {
                return false;
            };
            let mut entries = task_codec::decode(&slot.task_text);
            if !edit(&mut entries) {
                return false;
            }
            slot.task_text = task_codec::encode(&entries);
            true
        })
    }

    fn mutate_today<F>(&self, mutation: F) -> WriteOutcome
    where
        F: FnOnce(&mut DayRecord, &Settings) -> bool,
    {
        let mut session = self.lock_session();
        self.mutate_day(&mut session, self.clock.today(), mutation)
    }

    fn mutate_day<F>(&self, session: &mut SessionState, date: NaiveDate, mutation: F) -> WriteOutcome
    where
        F: FnOnce(&mut DayRecord, &Settings) -> bool,
    {
        let mut archive = self.load_archive(session);
        let settings = self.schedule.resolve();
        let (mut record, regridded) = self.day_record(&archive, date, &settings);

        let applied = mutation(&mut record, &settings);
        if applied {
            self.touch(&mut record);
        }

        let mut error = None;
        if applied || regridded {
            archive.insert(record.date.clone(), record.clone());
            error = self
                .persist(session, &archive, &record)
                .err()
                .map(|error| error.to_string());
        }

        WriteOutcome {
            persisted: !session.unsaved.contains_key(&record.date),
            record,
            applied,
            error,
        }
    }

    fn unapplied(&self) -> WriteOutcome {
        let record = self.load_today();
        let session = self.lock_session();
        WriteOutcome {
            persisted: !session.unsaved.contains_key(&record.date),
            record,
            applied: false,
            error: None,
        }
    }

    // second value is true when the record had to be created or re-shaped;
    // past days keep the shape they were recorded with
    fn day_record(&self, archive: &Archive, date: NaiveDate, settings: &Settings) -> (DayRecord, bool) {
        let key = format_date_key(date);
        let is_today = date == self.clock.today();
        match archive.get(&key) {
            None => (self.fresh_record(&key, settings), true),
            Some(record)
                if is_today
                    && (record.slots.is_empty()
                        || !slot_grid::matches_settings(&record.slots, settings)) =>
            {
                let mut adapted = record.clone();
                adapted.slots = regrid::adapt(&record.slots, settings);
                self.touch(&mut adapted);
                tracing::info!(date = %key, "regridded record to current settings");
                (adapted, true)
            }
            Some(record) => (record.clone(), false),
        }
    }

    fn fresh_record(&self, key: &str, settings: &Settings) -> DayRecord {
        DayRecord {
            date: key.to_string(),
            slots: slot_grid::generate(settings),
            daily_note: String::new(),
            stats: Stats::default(),
            updated_at: self.clock.now().timestamp_millis(),
        }
    }

    fn touch(&self, record: &mut DayRecord) {
        record.stats = status::calculate_stats(&record.slots);
        record.updated_at = self.clock.now().timestamp_millis();
    }

    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_archive(&self, session: &SessionState) -> Archive {
        let mut archive = self.read_archive();
        for (date, record) in &session.unsaved {
            archive.insert(date.clone(), record.clone());
        }
        archive
    }

    fn read_archive(&self) -> Archive {
        let raw = match self.store.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Archive::new(),
            Err(error) => {
                tracing::warn!(%error, "failed to read archive, treating it as empty");
                return Archive::new();
            }
        };

        let entries = match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(%error, "malformed archive, treating it as empty");
                return Archive::new();
            }
        };

        let mut archive = Archive::new();
        for (key, value) in entries {
            let Some(date) = parse_date_key(&key) else {
                tracing::warn!(key = %key, "dropping archive entry with invalid date key");
                continue;
            };
            match serde_json::from_value::<DayRecord>(value) {
                Ok(mut record) => {
                    if !record.stats.is_consistent() {
                        tracing::debug!(key = %key, "stored stats inconsistent, recomputing");
                    }
                    let date_key = format_date_key(date);
                    record.date = date_key.clone();
                    record.stats = status::calculate_stats(&record.slots);
                    archive.insert(date_key, record);
                }
                Err(error) => {
                    tracing::warn!(key = %key, %error, "dropping undecodable archive entry");
                }
            }
        }
        archive
    }

    fn persist(
        &self,
        session: &mut SessionState,
        archive: &Archive,
        record: &DayRecord,
    ) -> Result<(), InfraError> {
        let written = serde_json::to_string(archive)
            .map_err(InfraError::from)
            .and_then(|payload| self.store.set(HISTORY_KEY, &payload));

        match written {
            Ok(()) => {
                session.unsaved.clear();
                self.feed.publish(HISTORY_KEY);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, date = %record.date, "archive write failed, keeping change in memory");
                session.unsaved.insert(record.date.clone(), record.clone());
                Err(error)
            }
        }
    }
}
