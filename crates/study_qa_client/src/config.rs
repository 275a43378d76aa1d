//! Client config load/save for `~/.study-qa/config.yaml`.
//! Two sections: `api.*` (generative-language service) and `cache.*` (local answer cache).

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "STUDY_QA_CONFIG";
/// Environment variable consulted when the config file carries no API key.
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for university students. \
Answer the following question concisely and accurately.";

const APP_DIR: &str = ".study-qa";

/// API section (base_url, api_key, model, timeout_secs, system_prompt).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ApiSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Cache section (enabled, path).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Full config file.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub cache: CacheSection,
}

impl Config {
    /// Resolve the API credential: config value first, then `GEMINI_API_KEY`.
    /// Blank values count as missing.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = non_blank(self.api.api_key.as_deref()) {
            return Ok(key.to_string());
        }
        std::env::var(API_KEY_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn base_url(&self) -> &str {
        non_blank(self.api.base_url.as_deref())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn model(&self) -> &str {
        non_blank(self.api.model.as_deref()).unwrap_or(DEFAULT_MODEL)
    }

    pub fn system_prompt(&self) -> &str {
        non_blank(self.api.system_prompt.as_deref()).unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// Request timeout for the external service. Zero is rejected.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        match self.api.timeout_secs {
            Some(0) => Err(ConfigError::Invalid(
                "api.timeout_secs must be greater than zero".into(),
            )),
            Some(secs) => Ok(Duration::from_secs(secs)),
            None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.enabled.unwrap_or(true)
    }

    /// Cache database location; defaults to `~/.study-qa/cache.db`.
    pub fn cache_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.cache.path {
            return Ok(path.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(APP_DIR).join("cache.db"))
            .ok_or(ConfigError::NoHomeDirectory)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Returns the default config file path: `~/.study-qa/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(APP_DIR).join("config.yaml"))
}

/// Pick the config path: explicit override, then `STUDY_QA_CONFIG`, then the default.
pub fn resolve_config_path(override_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(p) = override_path {
        return Ok(p.to_path_buf());
    }
    if let Some(val) = std::env::var_os(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(val));
    }
    default_config_path().ok_or(ConfigError::NoHomeDirectory)
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Like [`load`], but a missing file yields the default config.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    load(path)
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Config load/save error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no API key configured (set api.api_key in the config file or GEMINI_API_KEY)")]
    MissingApiKey,

    #[error("unable to determine home directory (pass --config or set STUDY_QA_CONFIG)")]
    NoHomeDirectory,

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let cfg = Config::default();
        assert_eq!(cfg.base_url(), DEFAULT_BASE_URL);
        assert_eq!(cfg.model(), DEFAULT_MODEL);
        assert_eq!(cfg.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(cfg.timeout().unwrap(), Duration::from_secs(30));
        assert!(cfg.cache_enabled());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let mut cfg = Config::default();
        cfg.api.model = Some("  ".into());
        cfg.api.base_url = Some("http://localhost:9999/v1/".into());
        assert_eq!(cfg.model(), DEFAULT_MODEL);
        assert_eq!(cfg.base_url(), "http://localhost:9999/v1");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = Config::default();
        cfg.api.timeout_secs = Some(0);
        assert!(matches!(cfg.timeout(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn configured_key_wins_over_environment() {
        let mut cfg = Config::default();
        cfg.api.api_key = Some("from-file".into());
        assert_eq!(cfg.api_key().unwrap(), "from-file");
    }

    #[test]
    fn explicit_cache_path_is_used() {
        let mut cfg = Config::default();
        cfg.cache.path = Some(PathBuf::from("/tmp/answers.db"));
        assert_eq!(cfg.cache_path().unwrap(), PathBuf::from("/tmp/answers.db"));
    }
}
