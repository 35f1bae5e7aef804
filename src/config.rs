//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then the TOML file, then environment
//! variables. CLI flags are applied on top by `main`. The API key only ever
//! comes from the environment and is never serialized.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, ScribeError};
use crate::store::StoreBackend;

pub const DEFAULT_API_URL: &str = "https://api.siliconflow.cn/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V2.5";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_PORT: u16 = 8787;

/// Primary environment variable for the API key.
pub const API_KEY_VAR: &str = "FLOW_SCRIBE_API_KEY";
/// Accepted as a fallback for setups that already export it.
pub const LEGACY_API_KEY_VAR: &str = "SILICON_FLOW_API_KEY";
pub const API_URL_VAR: &str = "FLOW_SCRIBE_API_URL";
pub const MODEL_VAR: &str = "FLOW_SCRIBE_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StoreBackend,
    /// Directory for the file backend, database file for SQLite.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { backend: StoreBackend::File, path: default_data_dir() }
    }
}

impl StorageConfig {
    /// Path actually handed to the store: SQLite gets a file inside the
    /// configured directory unless the path already names a `.db` file.
    pub fn resolved_path(&self) -> PathBuf {
        match self.backend {
            StoreBackend::Sqlite if self.path.extension().is_none() => {
                self.path.join("flow-scribe.db")
            }
            _ => self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("flow-scribe").join("config.toml"))
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flow-scribe")
}

impl Config {
    /// Load from `path` (or the default location) and apply the process
    /// environment. A missing file is not an error when no path was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Config::default(),
            },
        };
        config.apply_env(|k| std::env::var(k).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScribeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay values from an environment lookup. Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        if let Some(key) = get(API_KEY_VAR).or_else(|| get(LEGACY_API_KEY_VAR)) {
            self.api.api_key = Some(key);
        }
        if let Some(url) = get(API_URL_VAR) {
            self.api.url = url;
        }
        if let Some(model) = get(MODEL_VAR) {
            self.api.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api.url.starts_with("http://") || self.api.url.starts_with("https://")) {
            return Err(ScribeError::Config(format!("api.url must be http(s): {}", self.api.url)));
        }
        if self.api.model.trim().is_empty() {
            return Err(ScribeError::Config("api.model must not be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.api.temperature) {
            return Err(ScribeError::Config(format!(
                "api.temperature must be within 0.0..=2.0, got {}",
                self.api.temperature
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.api.url, DEFAULT_API_URL);
        assert_eq!(c.api.model, DEFAULT_MODEL);
        assert_eq!(c.server.port, DEFAULT_PORT);
        assert_eq!(c.storage.backend, StoreBackend::File);
        assert!(c.api.api_key.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = Config::from_toml("[api]\nmodel = \"Qwen/Qwen2.5-7B-Instruct\"\n").unwrap();
        assert_eq!(c.api.model, "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(c.api.url, DEFAULT_API_URL);
        assert_eq!(c.server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_full_toml() {
        let raw = r#"
            [api]
            url = "http://127.0.0.1:9000/v1/chat/completions"
            temperature = 0.2

            [storage]
            backend = "sqlite"
            path = "/tmp/scribe"

            [server]
            port = 9999
        "#;
        let c = Config::from_toml(raw).unwrap();
        assert_eq!(c.storage.backend, StoreBackend::Sqlite);
        assert_eq!(c.storage.resolved_path(), PathBuf::from("/tmp/scribe/flow-scribe.db"));
        assert_eq!(c.server.port, 9999);
        assert!((c.api.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_api_key_never_read_from_toml() {
        let c = Config::from_toml("[api]\napi_key = \"sk-in-file\"\n").unwrap();
        assert!(c.api.api_key.is_none());
    }

    #[test]
    fn test_bad_toml_is_configuration_error() {
        let err = Config::from_toml("[api\nurl=").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(env(&[
            (API_KEY_VAR, "sk-primary"),
            (LEGACY_API_KEY_VAR, "sk-legacy"),
            (MODEL_VAR, "other/model"),
        ]));
        assert_eq!(c.api.api_key.as_deref(), Some("sk-primary"));
        assert_eq!(c.api.model, "other/model");
    }

    #[test]
    fn test_legacy_key_fallback_and_blank_ignored() {
        let mut c = Config::default();
        c.apply_env(env(&[(API_KEY_VAR, "  "), (LEGACY_API_KEY_VAR, "sk-legacy")]));
        assert_eq!(c.api.api_key.as_deref(), Some("sk-legacy"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = Config::default();
        c.api.url = "ftp://nope".to_string();
        assert!(c.validate().unwrap_err().is_configuration());
        let mut c = Config::default();
        c.api.temperature = 3.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let err = Config::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.is_configuration());
    }
}
