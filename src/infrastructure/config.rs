use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const DEFAULT_APP_NAME: &str = "Efficiency Tracker";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
}

impl ConfigBundle {
    pub fn app_name(&self) -> String {
        self.app_str("appName")
            .unwrap_or(DEFAULT_APP_NAME)
            .to_string()
    }

    pub fn timezone(&self) -> Option<String> {
        self.app_str("timezone").map(ToOwned::to_owned)
    }

    fn app_str(&self, field: &str) -> Option<&str> {
        self.app
            .get(field)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([(
        APP_JSON,
        serde_json::json!({
            "schema": 1,
            "appName": DEFAULT_APP_NAME,
            "timezone": null
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
    })
}

pub fn read_app_name(config_dir: &Path) -> Result<String, InfraError> {
    Ok(load_configs(config_dir)?.app_name())
}

pub fn read_timezone(config_dir: &Path) -> Result<Option<String>, InfraError> {
    Ok(load_configs(config_dir)?.timezone())
}

/// Writes the zone used for "today"; `None` or blank falls back to the system zone.
pub fn save_timezone(config_dir: &Path, timezone: Option<&str>) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    let mut app = read_config(&path)?;
    let object = app.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;

    let value = match timezone.map(str::trim).filter(|value| !value.is_empty()) {
        Some(name) => {
            name.parse::<chrono_tz::Tz>().map_err(|_| {
                InfraError::InvalidConfig(format!("unknown timezone: {name}"))
            })?;
            serde_json::Value::String(name.to_string())
        }
        None => serde_json::Value::Null,
    };
    object.insert("timezone".to_string(), value);

    let formatted = serde_json::to_string_pretty(&app)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}
