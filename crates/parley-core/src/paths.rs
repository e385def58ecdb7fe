//! Path resolution utilities.

use crate::env::{get_var, vars};
use crate::error::ConfigError;
use std::path::PathBuf;

/// Get the Parley base directory (`~/.parley`, or `$PARLEY_HOME`).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    if let Some(home) = get_var(vars::PARLEY_HOME) {
        return Ok(expand_tilde(&home));
    }
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine home directory".to_string())
    })?;
    Ok(home.join(".parley"))
}

/// Get the main config file path (`~/.parley/parley.json5`).
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("parley.json5"))
}

/// Get the default database file path (`~/.parley/parley.db`).
pub fn database_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("parley.db"))
}

/// Default SQLite URL pointing at [`database_file`].
pub fn default_database_url() -> Result<String, ConfigError> {
    Ok(format!("sqlite://{}", database_file()?.display()))
}

/// Ensure the base directory exists.
pub fn ensure_dirs() -> Result<(), ConfigError> {
    std::fs::create_dir_all(base_dir()?)?;
    Ok(())
}

/// Expand tilde (~) in a path.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
