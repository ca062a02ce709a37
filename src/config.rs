use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::click::ClickSettings;
use crate::retry::RetryPolicy;
use crate::simplify::Complexity;

/// Environment variable consulted when the config file has no API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Application configuration loaded from TOML config file.
/// Every field has a default; the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub input: InputConfig,
    pub click: ClickConfig,
    pub display: DisplayConfig,
}

/// Generative model endpoint and model ids.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    pub primary: String,
    /// Tried when the primary is unavailable or keeps failing. Empty = none.
    pub fallback: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Ask for `application/json` responses.
    pub json_mode: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            primary: "gemini-2.5-pro".into(),
            fallback: "gemini-2.5-flash".into(),
            api_key: None,
            timeout_secs: 300,
            json_mode: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Largest file accepted for upload, in MiB.
    pub max_upload_mb: f64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { max_upload_mb: 9.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    pub lookahead_ms: u64,
    /// How often the scheduler runs.
    pub interval_ms: u64,
    pub tolerance_ms: u64,
    pub volume: f32,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 100,
            interval_ms: 25,
            tolerance_ms: 50,
            volume: 0.8,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub complexity: Complexity,
    pub frame_rate: u32,
    /// Width of the scrolling chord strip in `play`.
    pub strip_width: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            complexity: Complexity::Advanced,
            frame_rate: 30,
            strip_width: 48,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/chordia/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// API key from the config file, else from `GEMINI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.model
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn fallback_model(&self) -> Option<&str> {
        let f = self.model.fallback.trim();
        (!f.is_empty()).then_some(f)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.model.timeout_secs.max(1))
    }

    pub fn max_upload_bytes(&self) -> u64 {
        (self.input.max_upload_mb.max(0.0) * 1024.0 * 1024.0) as u64
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn click_settings(&self) -> ClickSettings {
        ClickSettings {
            lookahead: self.click.lookahead_ms as f64 / 1000.0,
            tolerance: self.click.tolerance_ms as f64 / 1000.0,
            volume: self.click.volume.clamp(0.0, 1.0),
        }
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.click.interval_ms.max(1))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
