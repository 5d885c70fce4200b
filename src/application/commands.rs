use crate::application::bootstrap::bootstrap_workspace;
use crate::application::clock::{parse_timezone, LocalClock, NowProvider};
use crate::application::day_boundary::{DayBoundaryScheduler, PersistSignals, SchedulerState};
use crate::application::day_record_store::{DayRecordStore, HistoryEntry, WriteOutcome};
use crate::application::view_sync::ActiveView;
use crate::domain::models::{
    format_date_key, parse_date_key, DayRecord, Settings, SlotStatus, TaskEntry, TaskStatus,
};
use crate::domain::{slot_grid, status, task_codec};
use crate::infrastructure::config::{read_app_name, read_timezone, save_timezone};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{ChangeFeed, SqliteKeyValueStore};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use url::Url;

const DATE_HINT_BASE: &str = "http://localhost/";

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    kv: Arc<SqliteKeyValueStore>,
    records: Arc<DayRecordStore<SqliteKeyValueStore>>,
    signals: PersistSignals,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::build(workspace_root, None)
    }

    pub fn with_now_provider(
        workspace_root: PathBuf,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        Self::build(workspace_root, Some(now_provider))
    }

    fn build(workspace_root: PathBuf, now_provider: Option<NowProvider>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let timezone = parse_timezone(read_timezone(&bootstrap.config_dir)?.as_deref())?;

        let mut clock = LocalClock::system().with_timezone(timezone);
        if let Some(now_provider) = now_provider {
            clock = clock.with_now_provider(now_provider);
        }

        let kv = Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));
        let records = Arc::new(DayRecordStore::new(
            Arc::clone(&kv),
            clock,
            ChangeFeed::default(),
        ));
        records.cleanup_legacy_keys();

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            kv,
            records,
            signals: PersistSignals::default(),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrentSlotResponse {
    pub hour_index: usize,
    pub segment_index: usize,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub id: String,
    pub label: String,
    pub status: SlotStatus,
    pub entries: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodayResponse {
    pub app_name: String,
    pub settings: Settings,
    pub current_slot: Option<CurrentSlotResponse>,
    pub hours: Vec<Vec<SlotView>>,
    pub record: DayRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResponse {
    pub date: String,
    pub is_today: bool,
    pub hint_ignored: bool,
    pub record: Option<DayRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsResponse {
    pub settings: Settings,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyNowResponse {
    pub outcome: WriteOutcome,
    pub copied_tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchSummary {
    pub state: SchedulerState,
    pub last_boundary_date: Option<String>,
    pub today: DayRecord,
}

fn slot_views(record: &DayRecord) -> Vec<Vec<SlotView>> {
    record
        .slots
        .iter()
        .map(|hour| {
            hour.iter()
                .map(|slot| {
                    let entries = task_codec::decode(&slot.task_text);
                    SlotView {
                        id: slot.id.clone(),
                        label: slot.label.clone(),
                        status: status::slot_status(&entries),
                        entries,
                    }
                })
                .collect()
        })
        .collect()
}

fn validate_content(content: &str) -> Result<String, InfraError> {
    let entry = TaskEntry::new(content.trim());
    entry.validate().map_err(InfraError::InvalidInput)?;
    Ok(entry.content)
}

fn require_applied(outcome: WriteOutcome, what: impl FnOnce() -> String) -> Result<WriteOutcome, InfraError> {
    if outcome.applied {
        Ok(outcome)
    } else {
        Err(InfraError::InvalidInput(what()))
    }
}

fn log_outcome(state: &AppState, command: &str, detail: &str, outcome: &WriteOutcome) {
    if outcome.persisted {
        state.log_info(command, &format!("{detail} date={}", outcome.record.date));
    } else {
        state.log_error(
            command,
            &format!(
                "{detail} date={} kept in memory only: {}",
                outcome.record.date,
                outcome.error.as_deref().unwrap_or("earlier write failed")
            ),
        );
    }
}

/// Accepts `YYYY-MM-DD`, a query string such as `?date=YYYY-MM-DD`, or a full URL
/// carrying a `date` parameter.
pub fn parse_date_hint(hint: &str) -> Option<NaiveDate> {
    let hint = hint.trim();
    if hint.is_empty() {
        return None;
    }
    if let Some(date) = parse_date_key(hint) {
        return Some(date);
    }
    let base = Url::parse(DATE_HINT_BASE).ok()?;
    let url = base.join(hint).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "date")
        .and_then(|(_, value)| parse_date_key(&value))
}

pub fn today_impl(state: &AppState) -> Result<TodayResponse, InfraError> {
    let record = state.records.load_today();
    let settings = state.records.schedule().resolve();
    let current_slot = slot_grid::locate_slot(&settings, state.records.clock().local_time()).and_then(
        |(hour_index, segment_index)| {
            record
                .slot(hour_index, segment_index)
                .map(|slot| CurrentSlotResponse {
                    hour_index,
                    segment_index,
                    label: slot.label.clone(),
                })
        },
    );

    Ok(TodayResponse {
        app_name: read_app_name(&state.config_dir)?,
        settings,
        current_slot,
        hours: slot_views(&record),
        record,
    })
}

pub fn add_entry_impl(
    state: &AppState,
    hour_index: usize,
    segment_index: usize,
    content: String,
) -> Result<WriteOutcome, InfraError> {
    let content = validate_content(&content)?;
    let outcome = state.records.add_entry(hour_index, segment_index, &content);
    let outcome = require_applied(outcome, || format!("no slot at {hour_index}:{segment_index}"))?;
    log_outcome(state, "add", &format!("added entry to slot {hour_index}:{segment_index}"), &outcome);
    Ok(outcome)
}

pub fn edit_entry_impl(
    state: &AppState,
    hour_index: usize,
    segment_index: usize,
    entry_index: usize,
    content: String,
) -> Result<WriteOutcome, InfraError> {
    let content = validate_content(&content)?;
    let outcome = state
        .records
        .edit_entry(hour_index, segment_index, entry_index, &content);
    let outcome = require_applied(outcome, || {
        format!("no entry {entry_index} in slot {hour_index}:{segment_index}")
    })?;
    log_outcome(state, "edit", &format!("edited entry {entry_index} in slot {hour_index}:{segment_index}"), &outcome);
    Ok(outcome)
}

pub fn remove_entry_impl(
    state: &AppState,
    hour_index: usize,
    segment_index: usize,
    entry_index: usize,
) -> Result<WriteOutcome, InfraError> {
    let outcome = state
        .records
        .remove_entry(hour_index, segment_index, entry_index);
    let outcome = require_applied(outcome, || {
        format!("no entry {entry_index} in slot {hour_index}:{segment_index}")
    })?;
    log_outcome(state, "remove", &format!("removed entry {entry_index} from slot {hour_index}:{segment_index}"), &outcome);
    Ok(outcome)
}

pub fn set_status_impl(
    state: &AppState,
    hour_index: usize,
    segment_index: usize,
    entry_index: usize,
    status: String,
) -> Result<WriteOutcome, InfraError> {
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        InfraError::InvalidInput(format!(
            "status must be initial, completed or failed: {status}"
        ))
    })?;
    let outcome = state
        .records
        .set_entry_status(hour_index, segment_index, entry_index, status);
    let outcome = require_applied(outcome, || {
        format!("no entry {entry_index} in slot {hour_index}:{segment_index}")
    })?;
    log_outcome(
        state,
        "status",
        &format!("set entry {entry_index} in slot {hour_index}:{segment_index} to {}", status.as_str()),
        &outcome,
    );
    Ok(outcome)
}

pub fn set_slot_impl(
    state: &AppState,
    hour_index: usize,
    segment_index: usize,
    task_text: String,
) -> Result<WriteOutcome, InfraError> {
    let outcome = state
        .records
        .update_slot(hour_index, segment_index, &task_text);
    let outcome = require_applied(outcome, || format!("no slot at {hour_index}:{segment_index}"))?;
    log_outcome(state, "set-slot", &format!("replaced slot {hour_index}:{segment_index}"), &outcome);
    Ok(outcome)
}

pub fn note_impl(state: &AppState, text: String) -> Result<WriteOutcome, InfraError> {
    let outcome = state.records.update_daily_note(&text);
    log_outcome(state, "note", "updated daily note", &outcome);
    Ok(outcome)
}

pub fn copy_now_impl(state: &AppState, content: String) -> Result<CopyNowResponse, InfraError> {
    let content = validate_content(&content)?;
    let outcome = state.records.copy_task_to_current(&content);
    if outcome.applied {
        log_outcome(state, "copy-now", "copied task to current slot", &outcome);
    }
    Ok(CopyNowResponse {
        outcome,
        copied_tasks: state.records.copied_tasks(),
    })
}

pub fn reset_impl(state: &AppState) -> Result<WriteOutcome, InfraError> {
    let outcome = state.records.reset();
    log_outcome(state, "reset", "reset today's record", &outcome);
    Ok(outcome)
}

pub fn history_impl(state: &AppState) -> Result<Vec<HistoryEntry>, InfraError> {
    Ok(state.records.list_history())
}

/// Unparseable hints fall back to today.
pub fn show_impl(state: &AppState, date_hint: Option<String>) -> Result<ShowResponse, InfraError> {
    let today = state.records.today();
    let parsed = date_hint.as_deref().map(parse_date_hint);
    let hint_ignored = matches!(parsed, Some(None));
    let date = parsed.flatten().unwrap_or(today);

    let record = if date == today {
        Some(state.records.load_today())
    } else {
        state.records.query(date)
    };

    Ok(ShowResponse {
        date: format_date_key(date),
        is_today: date == today,
        hint_ignored,
        record,
    })
}

pub fn settings_impl(
    state: &AppState,
    start_hour: Option<u32>,
    end_hour: Option<u32>,
    segments_per_hour: Option<u32>,
    timezone: Option<String>,
) -> Result<SettingsResponse, InfraError> {
    let schedule = state.records.schedule();
    let mut settings = schedule.resolve();

    if start_hour.is_some() || end_hour.is_some() || segments_per_hour.is_some() {
        settings = schedule.save(Settings {
            start_hour: start_hour.unwrap_or(settings.start_hour),
            end_hour: end_hour.unwrap_or(settings.end_hour),
            segments_per_hour: segments_per_hour.unwrap_or(settings.segments_per_hour),
        })?;
        state.records.load_today();
        state.log_info(
            "settings",
            &format!(
                "saved settings start_hour={} end_hour={} segments_per_hour={}",
                settings.start_hour, settings.end_hour, settings.segments_per_hour
            ),
        );
    }

    if let Some(timezone) = timezone {
        save_timezone(&state.config_dir, Some(&timezone))?;
        state.log_info("settings", &format!("saved timezone={timezone}"));
    }

    Ok(SettingsResponse {
        settings,
        timezone: read_timezone(&state.config_dir)?,
    })
}

/// Runs the day-boundary scheduler and an active view until `shutdown` resolves.
pub async fn watch_impl<F>(state: &AppState, shutdown: F) -> Result<WatchSummary, InfraError>
where
    F: Future<Output = ()>,
{
    let changes = state.records.feed().subscribe();
    let signals = state.signals.subscribe();
    let scheduler = DayBoundaryScheduler::new(
        Arc::clone(&state.records),
        Arc::clone(&state.kv),
        state.signals.clone(),
    );
    let handle = scheduler.clone().spawn();
    let mut view = ActiveView::open(Arc::clone(&state.records));

    tokio::select! {
        _ = view.follow(changes, signals) => {}
        _ = shutdown => {}
    }
    view.flush();
    handle.cancel();

    Ok(WatchSummary {
        state: handle.state(),
        last_boundary_date: scheduler.last_boundary_date().map(format_date_key),
        today: state.records.load_today(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "efficiency-tracker-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            self.app_state_at("2026-02-16T10:25:00Z")
        }

        fn app_state_at(&self, at: &str) -> AppState {
            fs::create_dir_all(self.path.join("config")).expect("create config dir");
            fs::write(
                self.path.join("config").join("app.json"),
                "{\"schema\":1,\"appName\":\"Efficiency Tracker\",\"timezone\":\"UTC\"}\n",
            )
            .expect("write app config");
            let instant = DateTime::parse_from_rfc3339(at)
                .expect("valid instant")
                .with_timezone(&Utc);
            AppState::with_now_provider(self.path.clone(), Arc::new(move || instant))
                .expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn parse_date_hint_accepts_plain_query_and_url() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 14);
        assert_eq!(parse_date_hint("2026-02-14"), expected);
        assert_eq!(parse_date_hint("?date=2026-02-14"), expected);
        assert_eq!(parse_date_hint("history.html?date=2026-02-14&x=1"), expected);
        assert_eq!(
            parse_date_hint("https://tracker.example/history?date=2026-02-14"),
            expected
        );
        assert_eq!(parse_date_hint("?date=yesterday"), None);
        assert_eq!(parse_date_hint(""), None);
    }

    #[test]
    fn today_reports_current_slot_and_views() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let response = today_impl(&state).expect("today");
        assert!(state.database_path().exists());
        assert_eq!(state.config_dir(), workspace.path.join("config").as_path());
        assert_eq!(response.record.date, "2026-02-16");
        assert_eq!(response.settings, Settings::default());
        assert_eq!(
            response.current_slot,
            Some(CurrentSlotResponse {
                hour_index: 3,
                segment_index: 1,
                label: "10:20 - 10:40".to_string(),
            })
        );
        assert_eq!(response.hours.len(), 15);
        assert_eq!(response.hours[0][0].status, SlotStatus::Initial);
    }

    #[test]
    fn entry_commands_edit_and_report_stats() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        add_entry_impl(&state, 0, 0, "Write report".to_string()).expect("add first");
        add_entry_impl(&state, 0, 1, "Write report".to_string()).expect("add duplicate");
        let outcome = set_status_impl(&state, 0, 1, 0, "completed".to_string()).expect("complete");

        assert!(outcome.persisted);
        assert_eq!(outcome.record.stats.total, 1);
        assert_eq!(outcome.record.stats.completed, 1);

        let today = today_impl(&state).expect("today");
        assert_eq!(today.hours[0][1].status, SlotStatus::Completed);
    }

    #[test]
    fn entry_commands_reject_bad_input() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        assert!(matches!(
            add_entry_impl(&state, 0, 0, "   ".to_string()),
            Err(InfraError::InvalidInput(_))
        ));
        assert!(matches!(
            add_entry_impl(&state, 42, 0, "Gym".to_string()),
            Err(InfraError::InvalidInput(_))
        ));
        assert!(matches!(
            set_status_impl(&state, 0, 0, 0, "mixed".to_string()),
            Err(InfraError::InvalidInput(_))
        ));
        assert!(matches!(
            remove_entry_impl(&state, 0, 0, 3),
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[test]
    fn copy_now_and_reset_manage_copied_log() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let copied = copy_now_impl(&state, "Review PR".to_string()).expect("copy");
        assert!(copied.outcome.applied);
        assert_eq!(copied.copied_tasks, vec!["Review PR".to_string()]);

        reset_impl(&state).expect("reset");
        let again = copy_now_impl(&state, "Review PR".to_string()).expect("copy after reset");
        assert_eq!(again.copied_tasks, vec!["Review PR".to_string()]);
    }

    #[test]
    fn settings_command_validates_and_regrids() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        set_slot_impl(&state, 2, 0, "Standup".to_string()).expect("set slot");

        let invalid = settings_impl(&state, Some(20), Some(8), None, None);
        assert!(matches!(invalid, Err(InfraError::InvalidInput(_))));

        let response = settings_impl(&state, Some(9), None, None, Some("Asia/Tokyo".to_string()))
            .expect("save settings");
        assert_eq!(response.settings.start_hour, 9);
        assert_eq!(response.settings.end_hour, 22);
        assert_eq!(response.timezone.as_deref(), Some("Asia/Tokyo"));

        let show = show_impl(&state, None).expect("show today");
        let record = show.record.expect("today exists");
        assert_eq!(record.slots.len(), 13);
        assert_eq!(record.slots[0][0].task_text, "Standup");
    }

    #[test]
    fn show_falls_back_to_today_on_bad_hint() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        note_impl(&state, "today's note".to_string()).expect("note");

        let response = show_impl(&state, Some("not a date".to_string())).expect("show");
        assert!(response.hint_ignored);
        assert!(response.is_today);
        assert_eq!(
            response.record.map(|record| record.daily_note),
            Some("today's note".to_string())
        );

        let past = show_impl(&state, Some("?date=2026-01-01".to_string())).expect("show past");
        assert_eq!(past.date, "2026-01-01");
        assert!(past.record.is_none());
    }

    #[test]
    fn history_lists_days_newest_first() {
        let workspace = TempWorkspace::new();
        {
            let state = workspace.app_state_at("2026-02-15T09:00:00Z");
            note_impl(&state, "first day".to_string()).expect("note");
        }
        let state = workspace.app_state_at("2026-02-16T09:00:00Z");
        today_impl(&state).expect("today");

        let history = history_impl(&state).expect("history");
        let dates: Vec<&str> = history.iter().map(|entry| entry.date.as_str()).collect();
        assert_eq!(dates, vec!["2026-02-16", "2026-02-15"]);
    }

    #[test]
    fn command_errors_are_logged() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let error = InfraError::InvalidInput("bad index".to_string());

        let message = state.command_error("remove", &error);
        assert!(message.contains("bad index"));

        let log = fs::read_to_string(workspace.path.join("logs").join("commands.log"))
            .expect("read command log");
        let line: serde_json::Value =
            serde_json::from_str(log.lines().last().expect("log line")).expect("json log line");
        assert_eq!(line["level"], "error");
        assert_eq!(line["command"], "remove");
    }

    #[tokio::test(start_paused = true)]
    async fn watch_catches_up_and_stops_on_shutdown() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let summary = watch_impl(
            &state,
            tokio::time::sleep(std::time::Duration::from_secs(1)),
        )
        .await
        .expect("watch");

        assert_eq!(summary.last_boundary_date.as_deref(), Some("2026-02-16"));
        assert_eq!(summary.today.date, "2026-02-16");
        assert!(matches!(summary.state, SchedulerState::Armed { .. }));
    }
}
