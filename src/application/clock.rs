use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// a skipped midnight (DST gap) is searched forward in these steps
const GAP_SEARCH_STEP_MINUTES: i64 = 15;
const GAP_SEARCH_LIMIT_MINUTES: i64 = 180;

/// Wall clock of the user: "today" and the next local midnight.
///
/// Without an explicit zone the system local zone is used.
#[derive(Clone)]
pub struct LocalClock {
    now_provider: NowProvider,
    timezone: Option<Tz>,
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for LocalClock {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LocalClock")
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl LocalClock {
    pub fn system() -> Self {
        Self {
            now_provider: Arc::new(Utc::now),
            timezone: None,
        }
    }

    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_naive(self.now()).date()
    }

    pub fn local_time(&self) -> NaiveTime {
        self.local_naive(self.now()).time()
    }

    /// First instant of the next local calendar day, strictly after now.
    pub fn next_midnight(&self) -> DateTime<Utc> {
        let now = self.now();
        let mut date = self.local_naive(now).date();
        for _ in 0..3 {
            let Some(next) = date.succ_opt() else {
                break;
            };
            if let Some(start) = self.start_of_day(next) {
                if start > now {
                    return start;
                }
            }
            date = next;
        }
        now + Duration::days(1)
    }

    pub fn duration_until_next_midnight(&self) -> std::time::Duration {
        (self.next_midnight() - self.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    fn local_naive(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self.timezone {
            Some(timezone) => at.with_timezone(&timezone).naive_local(),
            None => at.with_timezone(&Local).naive_local(),
        }
    }

    fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.timezone {
            Some(timezone) => timezone
                .from_local_datetime(&local)
                .earliest()
                .map(|value| value.with_timezone(&Utc)),
            None => Local
                .from_local_datetime(&local)
                .earliest()
                .map(|value| value.with_timezone(&Utc)),
        }
    }

    fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = date.and_time(NaiveTime::MIN);
        (0..=GAP_SEARCH_LIMIT_MINUTES)
            .step_by(GAP_SEARCH_STEP_MINUTES as usize)
            .find_map(|offset| self.to_utc(midnight + Duration::minutes(offset)))
    }
}

pub fn parse_timezone(name: Option<&str>) -> Result<Option<Tz>, InfraError> {
    match name.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value
            .parse::<Tz>()
            .map(Some)
            .map_err(|_| InfraError::InvalidConfig(format!("unknown timezone: {value}"))),
        None => Ok(None),
    }
}
