use crate::application::day_record_store::DayRecordStore;
use crate::domain::models::{format_date_key, parse_date_key, DayRecord};
use crate::infrastructure::kv_store::{KeyValueStore, LAST_BOUNDARY_DATE_KEY};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub const SAVE_ACTION: &str = "SAVE_DAILY_TASKS";

const PERSIST_SIGNAL_CAPACITY: usize = 16;

/// "Flush your pending edits" hand-off sent to active views before rollover.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PersistSignal {
    pub action: String,
    pub timestamp: i64,
}

impl PersistSignal {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            action: SAVE_ACTION.to_string(),
            timestamp: instant.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistSignals {
    sender: broadcast::Sender<PersistSignal>,
}

impl Default for PersistSignals {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(PERSIST_SIGNAL_CAPACITY);
        Self { sender }
    }
}

impl PersistSignals {
    pub fn publish(&self, signal: PersistSignal) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PersistSignal> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Armed { next_boundary: DateTime<Utc> },
    Firing { at: DateTime<Utc> },
}

/// Advances "today" at every local midnight.
pub struct DayBoundaryScheduler<S>
where
    S: KeyValueStore,
{
    records: Arc<DayRecordStore<S>>,
    store: Arc<S>,
    signals: PersistSignals,
}

impl<S> Clone for DayBoundaryScheduler<S>
where
    S: KeyValueStore,
{
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            store: Arc::clone(&self.store),
            signals: self.signals.clone(),
        }
    }
}

impl<S> DayBoundaryScheduler<S>
where
    S: KeyValueStore + 'static,
{
    pub fn new(records: Arc<DayRecordStore<S>>, store: Arc<S>, signals: PersistSignals) -> Self {
        Self {
            records,
            store,
            signals,
        }
    }

    pub fn last_boundary_date(&self) -> Option<NaiveDate> {
        match self.store.get(LAST_BOUNDARY_DATE_KEY) {
            Ok(value) => value.as_deref().and_then(parse_date_key),
            Err(error) => {
                tracing::warn!(%error, "failed to read last boundary date");
                None
            }
        }
    }

    /// True when the boundary into today has not been processed yet.
    pub fn needs_catch_up(&self) -> bool {
        self.last_boundary_date() != Some(self.records.today())
    }

    /// Processes one boundary: signal views, then make sure today's record exists
    /// whether or not anybody listened. The boundary only counts as processed
    /// once today's record is stored.
    pub fn fire(&self) -> DayRecord {
        let now = self.records.clock().now();
        let listeners = self.signals.publish(PersistSignal::at(now));
        let outcome = self.records.ensure_today_outcome();

        if !outcome.persisted {
            tracing::warn!(
                date = %outcome.record.date,
                error = outcome.error.as_deref().unwrap_or("earlier write failed"),
                "today's record not stored, boundary left pending"
            );
            return outcome.record;
        }
        if let Err(error) = self.store.set(LAST_BOUNDARY_DATE_KEY, &outcome.record.date) {
            tracing::warn!(%error, "failed to record boundary date");
        }
        tracing::info!(date = %outcome.record.date, listeners, "day boundary processed");
        outcome.record
    }

    /// Runs the armed/firing loop on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let clock = self.records.clock().clone();
        let (state_sender, state) = watch::channel(SchedulerState::Armed {
            next_boundary: clock.next_midnight(),
        });

        let task = tokio::spawn(async move {
            if self.needs_catch_up() {
                tracing::info!(
                    last = ?self.last_boundary_date().map(format_date_key),
                    "missed day boundary, catching up"
                );
                state_sender.send_replace(SchedulerState::Firing { at: clock.now() });
                self.fire();
            }

            loop {
                let next_boundary = clock.next_midnight();
                let delay = clock.duration_until_next_midnight();
                state_sender.send_replace(SchedulerState::Armed { next_boundary });
                tracing::debug!(%next_boundary, delay_secs = delay.as_secs(), "day boundary armed");

                tokio::time::sleep(delay).await;

                state_sender.send_replace(SchedulerState::Firing { at: clock.now() });
                self.fire();
            }
        });

        SchedulerHandle { task, state }
    }
}

/// Owner of a running scheduler; dropping it cancels the wake-up.
#[derive(Debug)]
pub struct SchedulerHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
