//! Configuration loading and persistence.

use super::{BindMode, Config, MAX_HISTORY_PAGE_SIZE};
use crate::env::{self, vars};
use crate::error::ConfigError;
use crate::paths;
use crate::secret::SecretString;
use std::fs;
use std::path::{Path, PathBuf};

impl Config {
    /// Path of the config file: `$PARLEY_CONFIG` or `~/.parley/parley.json5`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        match env::get_var(vars::PARLEY_CONFIG) {
            Some(path) => Ok(paths::expand_tilde(&path)),
            None => paths::config_file(),
        }
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 has no serializer; pretty JSON is valid JSON5.
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from `path` (or the default path), falling back to defaults when
    /// no file exists, then apply environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let loaded = match path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        };
        let mut config = match loaded {
            Ok(config) => config,
            Err(ConfigError::NotFound(path)) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `PARLEY_PORT`, `PARLEY_DATABASE_URL` and `PARLEY_TOKEN_SECRET`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env::get_u16(vars::PARLEY_PORT) {
            self.gateway.port = port;
        }
        if let Some(url) = env::get_var(vars::PARLEY_DATABASE_URL) {
            self.store.database_url = Some(url);
        }
        if let Some(secret) = env::get_var(vars::PARLEY_TOKEN_SECRET) {
            self.auth.token_secret = Some(SecretString::new(secret));
        }
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.gateway.port == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }
        if self.gateway.max_connections == 0 {
            errors.push("Gateway max_connections must be greater than 0".to_string());
        }
        if self.gateway.handshake_timeout_secs == 0 {
            errors.push("Gateway handshake_timeout_secs must be greater than 0".to_string());
        }
        if self.gateway.outbound_buffer == 0 {
            errors.push("Gateway outbound_buffer must be greater than 0".to_string());
        }
        if self.gateway.max_events_per_second == 0 {
            errors.push("Gateway max_events_per_second must be greater than 0".to_string());
        }

        if self.store.max_connections == 0 {
            errors.push("Store max_connections must be greater than 0".to_string());
        }
        if let Some(url) = &self.store.database_url {
            if !url.starts_with("sqlite:") {
                errors.push(format!(
                    "Store database_url '{}' must be a sqlite: URL",
                    url
                ));
            }
        }

        // Exposing the gateway beyond loopback requires real credentials.
        let has_secret = self
            .auth
            .token_secret
            .as_ref()
            .is_some_and(|s| !s.is_empty());
        if self.gateway.bind == BindMode::Lan && !has_secret {
            errors.push("Auth token_secret is required when gateway bind is 'lan'".to_string());
        }

        if self.chat.typing_timeout_ms == 0 {
            errors.push("Chat typing_timeout_ms must be greater than 0".to_string());
        }
        if self.chat.max_body_len == 0 {
            errors.push("Chat max_body_len must be greater than 0".to_string());
        }
        if self.chat.history_page_size == 0 {
            errors.push("Chat history_page_size must be greater than 0".to_string());
        }
        if self.chat.history_page_size > MAX_HISTORY_PAGE_SIZE {
            errors.push(format!(
                "Chat history_page_size {} exceeds maximum of {}",
                self.chat.history_page_size, MAX_HISTORY_PAGE_SIZE
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
