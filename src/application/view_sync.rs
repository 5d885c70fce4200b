use crate::application::day_boundary::PersistSignal;
use crate::application::day_record_store::{DayRecordStore, WriteOutcome};
use crate::domain::models::{format_date_key, parse_date_key, DayRecord};
use crate::infrastructure::kv_store::{KeyValueStore, StorageChange, HISTORY_KEY, SETTINGS_KEY};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// In-memory copy of today's record held by an open view.
///
/// Slot edits write through at once. Note edits stay pending until `flush`,
/// a persist signal, or a reload that keeps them on top of the stored note.
/// Pending edits are always written to the day they were typed on.
pub struct ActiveView<S>
where
    S: KeyValueStore,
{
    records: Arc<DayRecordStore<S>>,
    record: DayRecord,
    pending_note: Option<String>,
    visible: bool,
    stale: bool,
}

impl<S> ActiveView<S>
where
    S: KeyValueStore,
{
    pub fn open(records: Arc<DayRecordStore<S>>) -> Self {
        let record = records.load_today();
        Self {
            records,
            record,
            pending_note: None,
            visible: true,
            stale: false,
        }
    }

    pub fn record(&self) -> &DayRecord {
        &self.record
    }

    pub fn has_pending_edits(&self) -> bool {
        self.pending_note.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn edit_note(&mut self, text: &str) {
        self.record.daily_note = text.to_string();
        self.pending_note = Some(text.to_string());
    }

    pub fn edit_slot(&mut self, hour_index: usize, segment_index: usize, task_text: &str) -> WriteOutcome {
        let outcome = self.records.update_slot(hour_index, segment_index, task_text);
        self.adopt(outcome.record.clone());
        outcome
    }

    /// Writes pending note edits. `None` when there was nothing to write.
    pub fn flush(&mut self) -> Option<WriteOutcome> {
        let note = self.pending_note.take()?;
        let outcome = match parse_date_key(&self.record.date) {
            Some(date) => self.records.update_daily_note_for(date, &note),
            None => self.records.update_daily_note(&note),
        };
        if !outcome.persisted {
            tracing::warn!(date = %outcome.record.date, "pending note kept in memory only");
        }
        self.adopt(outcome.record.clone());
        Some(outcome)
    }

    pub fn handle_persist_signal(&mut self, signal: &PersistSignal) -> Option<WriteOutcome> {
        tracing::debug!(action = %signal.action, timestamp = signal.timestamp, "persist signal received");
        let outcome = self.flush();
        if self.record.date != format_date_key(self.records.today()) {
            self.reload();
        }
        outcome
    }

    /// Invalidation hint; the value is re-read through the store, never taken
    /// from the notification. Returns true when the view reloaded.
    pub fn handle_storage_change(&mut self, change: &StorageChange) -> bool {
        if change.key != SETTINGS_KEY && change.key != HISTORY_KEY {
            return false;
        }
        if !self.visible {
            self.stale = true;
            return false;
        }
        self.reload();
        true
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if visible && self.stale {
            self.reload();
        }
    }

    pub fn reload(&mut self) {
        let record = self.records.load_today();
        self.adopt(record);
    }

    /// Follows both channels until either closes.
    pub async fn follow(
        &mut self,
        mut changes: broadcast::Receiver<StorageChange>,
        mut signals: broadcast::Receiver<PersistSignal>,
    ) {
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => {
                        self.handle_storage_change(&change);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "storage changes lagged, reloading");
                        self.reload();
                    }
                    Err(RecvError::Closed) => break,
                },
                signal = signals.recv() => match signal {
                    Ok(signal) => {
                        self.handle_persist_signal(&signal);
                    }
                    Err(RecvError::Lagged(_)) => {
                        self.flush();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    fn adopt(&mut self, mut record: DayRecord) {
        if record.date != self.record.date {
            tracing::info!(from = %self.record.date, to = %record.date, "view moved to a new day");
            self.flush();
        }
        if let Some(note) = &self.pending_note {
            record.daily_note = note.clone();
        }
        self.record = record;
        self.stale = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::LocalClock;
    use crate::application::day_boundary::{DayBoundaryScheduler, PersistSignals};
    use crate::domain::models::Settings;
    use crate::infrastructure::kv_store::{ChangeFeed, InMemoryKeyValueStore};
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use std::sync::Mutex;

    fn records(at: &str) -> (ChangeFeed, Arc<DayRecordStore<InMemoryKeyValueStore>>) {
        let instant = DateTime::parse_from_rfc3339(at)
            .expect("valid instant")
            .with_timezone(&Utc);
        let clock = LocalClock::system()
            .with_timezone(Some(chrono_tz::UTC))
            .with_now_provider(Arc::new(move || instant));
        let feed = ChangeFeed::default();
        let store = DayRecordStore::new(
            Arc::new(InMemoryKeyValueStore::default()),
            clock,
            feed.clone(),
        );
        (feed, Arc::new(store))
    }

    struct MidnightFixture {
        now: Arc<Mutex<DateTime<Utc>>>,
        kv: Arc<InMemoryKeyValueStore>,
        records: Arc<DayRecordStore<InMemoryKeyValueStore>>,
    }

    impl MidnightFixture {
        fn new(at: &str) -> Self {
            let instant = DateTime::parse_from_rfc3339(at)
                .expect("valid instant")
                .with_timezone(&Utc);
            let now = Arc::new(Mutex::new(instant));
            let provider = Arc::clone(&now);
            let clock = LocalClock::system()
                .with_timezone(Some(chrono_tz::UTC))
                .with_now_provider(Arc::new(move || *provider.lock().expect("clock lock")));
            let kv = Arc::new(InMemoryKeyValueStore::default());
            let records = Arc::new(DayRecordStore::new(
                Arc::clone(&kv),
                clock,
                ChangeFeed::default(),
            ));
            Self { now, kv, records }
        }

        fn advance(&self, duration: Duration) {
            *self.now.lock().expect("clock lock") += duration;
        }

        fn note_on(&self, year: i32, month: u32, day: u32) -> Option<String> {
            let date = NaiveDate::from_ymd_opt(year, month, day).expect("date");
            self.records.query(date).map(|record| record.daily_note)
        }
    }

    fn change(key: &str) -> StorageChange {
        StorageChange {
            key: key.to_string(),
        }
    }

    #[test]
    fn note_edits_wait_for_flush() {
        let (_, records) = records("2026-02-16T10:00:00Z");
        let mut view = ActiveView::open(Arc::clone(&records));

        view.edit_note("draft");
        assert!(view.has_pending_edits());
        assert_eq!(records.load_today().daily_note, "");

        let outcome = view.flush().expect("pending note written");
        assert!(outcome.persisted);
        assert_eq!(records.load_today().daily_note, "draft");
        assert!(view.flush().is_none());
    }

    #[test]
    fn persist_signal_flushes_pending_note() {
        let (_, records) = records("2026-02-16T23:59:59Z");
        let mut view = ActiveView::open(Arc::clone(&records));
        view.edit_note("before midnight");

        let signal = PersistSignal::at(Utc::now());
        assert!(view.handle_persist_signal(&signal).is_some());
        assert_eq!(records.load_today().daily_note, "before midnight");
    }

    #[test]
    fn pending_note_stays_on_its_day_across_midnight() {
        let fixture = MidnightFixture::new("2026-02-16T23:58:00Z");
        let signals = PersistSignals::default();
        let mut receiver = signals.subscribe();
        let scheduler = DayBoundaryScheduler::new(
            Arc::clone(&fixture.records),
            Arc::clone(&fixture.kv),
            signals,
        );
        let mut view = ActiveView::open(Arc::clone(&fixture.records));
        view.edit_note("written on the 16th");

        fixture.advance(Duration::minutes(2));
        scheduler.fire();
        let signal = receiver.try_recv().expect("persist signal");
        let outcome = view.handle_persist_signal(&signal).expect("pending note written");

        assert_eq!(outcome.record.date, "2026-02-16");
        assert_eq!(fixture.note_on(2026, 2, 16).as_deref(), Some("written on the 16th"));
        assert_eq!(fixture.note_on(2026, 2, 17).as_deref(), Some(""));
        assert_eq!(view.record().date, "2026-02-17");
        assert_eq!(view.record().daily_note, "");
        assert!(!view.has_pending_edits());
    }

    #[test]
    fn reload_after_midnight_saves_pending_note_to_previous_day() {
        let fixture = MidnightFixture::new("2026-02-16T23:59:00Z");
        let mut view = ActiveView::open(Arc::clone(&fixture.records));
        view.edit_note("late thought");

        fixture.advance(Duration::minutes(5));
        view.reload();

        assert_eq!(fixture.note_on(2026, 2, 16).as_deref(), Some("late thought"));
        assert_eq!(view.record().date, "2026-02-17");
        assert_eq!(view.record().daily_note, "");
        assert!(!view.has_pending_edits());
    }

    #[test]
    fn settings_change_reloads_visible_view() {
        let (_, records) = records("2026-02-16T10:00:00Z");
        let mut view = ActiveView::open(Arc::clone(&records));
        view.edit_slot(2, 0, "Standup");

        records
            .schedule()
            .save(Settings {
                start_hour: 9,
                end_hour: 12,
                segments_per_hour: 3,
            })
            .expect("save settings");

        assert!(view.handle_storage_change(&change(SETTINGS_KEY)));
        assert_eq!(view.record().slots.len(), 3);
        assert_eq!(view.record().slots[0][0].task_text, "Standup");
    }

    #[test]
    fn hidden_view_reloads_when_visible_again() {
        let (_, records) = records("2026-02-16T10:00:00Z");
        let mut view = ActiveView::open(Arc::clone(&records));
        view.set_visible(false);

        records.update_slot(0, 0, "from another view");
        assert!(!view.handle_storage_change(&change(HISTORY_KEY)));
        assert!(view.is_stale());
        assert_eq!(view.record().slots[0][0].task_text, "");

        view.set_visible(true);
        assert!(!view.is_stale());
        assert_eq!(view.record().slots[0][0].task_text, "from another view");
    }

    #[test]
    fn reload_keeps_pending_note() {
        let (_, records) = records("2026-02-16T10:00:00Z");
        let mut view = ActiveView::open(Arc::clone(&records));
        view.edit_note("unsaved");
        records.update_daily_note("saved elsewhere");

        view.reload();
        assert_eq!(view.record().daily_note, "unsaved");
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let (_, records) = records("2026-02-16T10:00:00Z");
        let mut view = ActiveView::open(records);
        assert!(!view.handle_storage_change(&change("copiedTasks")));
    }

    #[tokio::test]
    async fn follow_applies_changes_and_signals_until_closed() {
        let (feed, records) = records("2026-02-16T10:00:00Z");
        let (signal_sender, signals) = broadcast::channel(4);
        let changes = feed.subscribe();
        let mut view = ActiveView::open(Arc::clone(&records));
        view.edit_note("flush me");

        records.update_slot(1, 1, "Deep work");
        signal_sender
            .send(PersistSignal::at(Utc::now()))
            .expect("send signal");
        drop(signal_sender);

        view.follow(changes, signals).await;

        assert_eq!(view.record().slots[1][1].task_text, "Deep work");
        assert_eq!(records.load_today().daily_note, "flush me");
    }
}
