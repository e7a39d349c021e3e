//! Configuration loading for the VERISCAN client.
//!
//! All fields are required. No defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use veriscan_core::UploadPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub credentials_path: PathBuf,
    /// Where the application navigates when credentials are rejected.
    pub sign_in_path: String,
    pub retry: RetryConfig,
    pub stream: StreamConfig,
    pub upload: UploadConfig,
    pub rate_limit: RateLimitConfig,
    pub notifications: NotificationSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub connect_timeout_ms: u64,
    /// Upper bound on silence between progress events.
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    pub max_size_mb: u64,
    pub allowed_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub analysis_max_requests: usize,
    pub analysis_window_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationSettings {
    pub analysis: bool,
    pub security: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or VERISCAN_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(invalid("api_base_url", "must start with http:// or https://"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.credentials_path.as_os_str().is_empty() {
            return Err(invalid("credentials_path", "must not be empty"));
        }
        if !self.sign_in_path.starts_with('/') {
            return Err(invalid("sign_in_path", "must be an absolute path"));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(invalid("retry.base_delay_ms", "must be > 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid("retry.max_delay_ms", "must be >= base_delay_ms"));
        }
        if self.stream.connect_timeout_ms == 0 {
            return Err(invalid("stream.connect_timeout_ms", "must be > 0"));
        }
        if self.stream.idle_timeout_ms == 0 {
            return Err(invalid("stream.idle_timeout_ms", "must be > 0"));
        }
        if self.upload.max_size_mb == 0 {
            return Err(invalid("upload.max_size_mb", "must be > 0"));
        }
        if self.upload.allowed_types.is_empty() {
            return Err(invalid("upload.allowed_types", "must list at least one type"));
        }
        if self.rate_limit.analysis_max_requests == 0 {
            return Err(invalid("rate_limit.analysis_max_requests", "must be > 0"));
        }
        if self.rate_limit.analysis_window_ms == 0 {
            return Err(invalid("rate_limit.analysis_window_ms", "must be > 0"));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(invalid("logging.filter", "must not be empty"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy::new(self.upload.max_size_mb, self.upload.allowed_types.clone())
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl RateLimitConfig {
    pub fn analysis_window(&self) -> Duration {
        Duration::from_millis(self.analysis_window_ms)
    }
}
