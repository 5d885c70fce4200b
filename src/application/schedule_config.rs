use crate::domain::models::Settings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{ChangeFeed, KeyValueStore, SETTINGS_KEY};
use std::sync::Arc;

/// Reads and writes the grid settings shared by every view.
pub struct ScheduleConfig<S>
where
    S: KeyValueStore,
{
    store: Arc<S>,
    feed: ChangeFeed,
}

impl<S> Clone for ScheduleConfig<S>
where
    S: KeyValueStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            feed: self.feed.clone(),
        }
    }
}

impl<S> ScheduleConfig<S>
where
    S: KeyValueStore,
{
    pub fn new(store: Arc<S>, feed: ChangeFeed) -> Self {
        Self { store, feed }
    }

    /// Active settings. Missing, unreadable or out-of-range data yields the defaults.
    pub fn resolve(&self) -> Settings {
        let raw = match self.store.get(SETTINGS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Settings::default(),
            Err(error) => {
                tracing::warn!(%error, "failed to read settings, using defaults");
                return Settings::default();
            }
        };

        let settings = match serde_json::from_str::<Settings>(&raw) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(%error, "malformed settings, using defaults");
                return Settings::default();
            }
        };

        if let Err(message) = settings.validate() {
            tracing::warn!(%message, "stored settings out of range, using defaults");
            return Settings::default();
        }
        settings
    }

    pub fn save(&self, settings: Settings) -> Result<Settings, InfraError> {
        settings.validate().map_err(InfraError::InvalidInput)?;
        let payload = serde_json::to_string(&settings)?;
        self.store.set(SETTINGS_KEY, &payload)?;
        self.feed.publish(SETTINGS_KEY);
        tracing::info!(
            start_hour = settings.start_hour,
            end_hour = settings.end_hour,
            segments_per_hour = settings.segments_per_hour,
            "schedule settings saved"
        );
        Ok(settings)
    }
}
