//! Configuration management for manim-heal
//!
//! Stores settings in ~/.config/manim-heal/config.json. Environment variables
//! override the file; secrets are read from the environment only.

use crate::heal::DEFAULT_MAX_RETRIES;
use crate::llm::OpenAiSettings;
use crate::store::{RestStoreSettings, DEFAULT_TABLE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "manim-heal";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_RENDER_URL: &str = "MANIM_HEAL_RENDER_URL";
pub const ENV_RENDER_TOKEN: &str = "MANIM_HEAL_RENDER_TOKEN";
pub const ENV_STORE_URL: &str = "MANIM_HEAL_STORE_URL";
pub const ENV_STORE_KEY: &str = "MANIM_HEAL_STORE_KEY";
pub const ENV_STORE_TABLE: &str = "MANIM_HEAL_STORE_TABLE";
pub const ENV_PRIMARY_MODEL: &str = "MANIM_HEAL_PRIMARY_MODEL";
pub const ENV_FALLBACK_MODEL: &str = "MANIM_HEAL_FALLBACK_MODEL";
pub const ENV_MAX_RETRIES: &str = "MANIM_HEAL_MAX_RETRIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    /// Render web endpoint
    pub render_url: Option<String>,
    /// PostgREST base URL of the job store
    pub store_url: Option<String>,
    pub store_table: String,
    pub max_retries: usize,
    pub connect_timeout_secs: u64,
    #[serde(skip)]
    pub openai_api_key: Option<String>,
    #[serde(skip)]
    pub render_token: Option<String>,
    #[serde(skip)]
    pub store_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let openai = OpenAiSettings::default();
        Self {
            openai_base_url: openai.base_url,
            primary_model: openai.primary_model,
            fallback_model: openai.fallback_model,
            render_url: None,
            store_url: None,
            store_table: DEFAULT_TABLE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            openai_api_key: None,
            render_token: None,
            store_key: None,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// File settings plus environment overrides.
    pub fn load() -> Self {
        Self::load_file().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// File settings only, for editing and saving back.
    pub fn load_file() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load config from `path`, or return defaults. A corrupt file is moved
    /// aside so the next save does not clobber it silently.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Empty values are ignored, as are unparseable retry budgets.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = get(ENV_OPENAI_API_KEY) {
            self.openai_api_key = Some(key);
        }
        if let Some(url) = get(ENV_RENDER_URL) {
            self.render_url = Some(url);
        }
        if let Some(token) = get(ENV_RENDER_TOKEN) {
            self.render_token = Some(token);
        }
        if let Some(url) = get(ENV_STORE_URL) {
            self.store_url = Some(url);
        }
        if let Some(key) = get(ENV_STORE_KEY) {
            self.store_key = Some(key);
        }
        if let Some(table) = get(ENV_STORE_TABLE) {
            self.store_table = table;
        }
        if let Some(model) = get(ENV_PRIMARY_MODEL) {
            self.primary_model = model;
        }
        if let Some(model) = get(ENV_FALLBACK_MODEL) {
            self.fallback_model = model;
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => self.max_retries = n,
                _ => tracing::warn!(value = %raw, "ignoring invalid {}", ENV_MAX_RETRIES),
            }
        }
        self
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(path, &content)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn openai_settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            primary_model: self.primary_model.clone(),
            fallback_model: self.fallback_model.clone(),
            connect_timeout: self.connect_timeout(),
        }
    }

    /// Store settings, when both the URL and key are configured.
    pub fn rest_store_settings(&self) -> Option<RestStoreSettings> {
        Some(RestStoreSettings {
            base_url: self.store_url.clone()?,
            api_key: self.store_key.clone()?,
            table: self.store_table.clone(),
            connect_timeout: self.connect_timeout(),
        })
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("~/.config/{}/config.json", APP_DIR))
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> Result<(), ConfigError> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.primary_model, "gpt-5");
        assert_eq!(config.fallback_model, "gpt-4o");
        assert_eq!(config.store_table, "explainers");
        assert!(config.rest_store_settings().is_none());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("config.json.corrupt")).unwrap(),
            "{not json"
        );
    }

    #[test]
    fn test_save_round_trip_never_writes_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            render_url: Some("https://render.example.invalid".to_string()),
            max_retries: 7,
            openai_api_key: Some("sk-secret".to_string()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-secret"));
        let loaded = Config::load_from(&path);
        assert_eq!(loaded.max_retries, 7);
        assert_eq!(loaded.render_url, config.render_url);
        assert!(loaded.openai_api_key.is_none());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"max_retries": 2}"#).unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.primary_model, "gpt-5");
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_env_overrides(env(&[
            (ENV_OPENAI_API_KEY, "sk-env"),
            (ENV_STORE_URL, "https://db.example.invalid"),
            (ENV_STORE_KEY, "service-key"),
            (ENV_STORE_TABLE, "jobs"),
            (ENV_PRIMARY_MODEL, "gpt-5-mini"),
            (ENV_MAX_RETRIES, "3"),
            (ENV_RENDER_TOKEN, "  "),
        ]));
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.primary_model, "gpt-5-mini");
        assert_eq!(config.max_retries, 3);
        assert!(config.render_token.is_none());
        let store = config.rest_store_settings().unwrap();
        assert_eq!(store.table, "jobs");
        assert_eq!(config.openai_settings().api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn test_invalid_retry_override_is_ignored() {
        let config = Config::default().with_env_overrides(env(&[(ENV_MAX_RETRIES, "lots")]));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        let config = Config::default().with_env_overrides(env(&[(ENV_MAX_RETRIES, "0")]));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }
}
