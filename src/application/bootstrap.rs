use crate::infrastructure::config::{ensure_default_configs, load_configs};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "EFFICIENCY_TRACKER_HOME";
const DEFAULT_DIR_NAME: &str = ".efficiency-tracker";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

/// `--root` wins, then `$EFFICIENCY_TRACKER_HOME`, then `~/.efficiency-tracker`.
pub fn resolve_workspace_root(explicit: Option<PathBuf>) -> Result<PathBuf, InfraError> {
    resolve_workspace_root_from(explicit, |key| std::env::var_os(key).map(PathBuf::from))
}

fn resolve_workspace_root_from<F>(explicit: Option<PathBuf>, lookup: F) -> Result<PathBuf, InfraError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = lookup(HOME_ENV).filter(|path| !path.as_os_str().is_empty()) {
        return Ok(path);
    }
    let home = lookup("HOME")
        .or_else(|| lookup("USERPROFILE"))
        .ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "cannot locate a home directory; set {HOME_ENV} or pass --root"
            ))
        })?;
    Ok(home.join(DEFAULT_DIR_NAME))
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("tracker.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_configs(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_wins() {
        let root = resolve_workspace_root_from(Some(PathBuf::from("/tmp/explicit")), |_| {
            Some(PathBuf::from("/ignored"))
        })
        .expect("resolve root");
        assert_eq!(root, PathBuf::from("/tmp/explicit"));
    }

    #[test]
    fn env_root_beats_home_directory() {
        let root = resolve_workspace_root_from(None, |key| match key {
            HOME_ENV => Some(PathBuf::from("/data/tracker")),
            "HOME" => Some(PathBuf::from("/home/someone")),
            _ => None,
        })
        .expect("resolve root");
        assert_eq!(root, PathBuf::from("/data/tracker"));
    }

    #[test]
    fn home_directory_is_the_fallback() {
        let root = resolve_workspace_root_from(None, |key| match key {
            "HOME" => Some(PathBuf::from("/home/someone")),
            _ => None,
        })
        .expect("resolve root");
        assert_eq!(root, PathBuf::from("/home/someone/.efficiency-tracker"));

        let missing = resolve_workspace_root_from(None, |_| None);
        assert!(matches!(missing, Err(InfraError::InvalidConfig(_))));
    }

    #[test]
    fn bootstrap_creates_layout() {
        let root = std::env::temp_dir().join(format!(
            "efficiency-tracker-bootstrap-tests-{}",
            std::process::id()
        ));
        let result = bootstrap_workspace(&root).expect("bootstrap workspace");

        assert!(result.config_dir.join("app.json").exists());
        assert!(result.logs_dir.is_dir());
        assert!(result.database_path.exists());
        bootstrap_workspace(&root).expect("bootstrap is repeatable");

        let _ = fs::remove_dir_all(&root);
    }
}
