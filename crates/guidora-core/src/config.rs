//! Application configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file
//! (`guidora.toml`, or the path in `GUIDORA_CONFIG`), then `GUIDORA_*`
//! environment variables using `__` between section and key, for example
//! `GUIDORA_AUTH__JWT_SECRET`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "GUIDORA_CONFIG";

/// Config file read when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "guidora.toml";

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A single value is out of range.
    #[error("Invalid configuration value for '{field}': {message}")]
    ValidationError {
        /// Dotted key, e.g. `auth.jwt_secret`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several values are out of range.
    #[error("Configuration validation failed: {}", join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),

    /// No data directory is configured and none could be derived.
    #[error("Cannot determine a data directory. Set storage.data_dir.")]
    NoDataDir,
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// JSON file logging instead of pretty console output.
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            production: false,
        }
    }
}

impl ServerConfig {
    /// `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Login and session settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret. Required.
    pub jwt_secret: String,
    /// Session token lifetime.
    pub token_ttl_days: u32,
    /// OTP lifetime.
    pub otp_ttl_secs: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_days: 3,
            otp_ttl_secs: 180,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_days", &self.token_ttl_days)
            .field("otp_ttl_secs", &self.otp_ttl_secs)
            .finish()
    }
}

/// SMS provider settings. Without `api_url`, SMS delivery is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    /// Provider endpoint.
    pub api_url: Option<String>,
    /// Provider API key.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Request timeout.
    pub timeout_secs: u64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `accounts.json`.
    pub data_dir: Option<PathBuf>,
}

/// Booking settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Attempts at crediting a user before the transfer is rolled back.
    pub transfer_retries: u32,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            transfer_retries: 3,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Login and sessions.
    pub auth: AuthConfig,
    /// SMS provider.
    pub sms: SmsConfig,
    /// Persistence.
    pub storage: StorageConfig,
    /// Booking.
    pub reservation: ReservationConfig,
}

impl AppConfig {
    /// Load from the default file location and the environment, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::load_from(&path)
    }

    /// Load from `path` (if it exists) and the environment, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("GUIDORA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for one problem or
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        check(
            !self.auth.jwt_secret.trim().is_empty(),
            "auth.jwt_secret",
            "must be set",
        );
        check(
            self.auth.token_ttl_days > 0,
            "auth.token_ttl_days",
            "must be at least 1",
        );
        check(
            self.auth.otp_ttl_secs > 0,
            "auth.otp_ttl_secs",
            "must be at least 1",
        );
        check(
            self.sms.timeout_secs > 0,
            "sms.timeout_secs",
            "must be at least 1",
        );
        check(
            self.sms
                .api_url
                .as_deref()
                .map_or(true, |u| u.starts_with("http://") || u.starts_with("https://")),
            "sms.api_url",
            "must be an http(s) URL",
        );
        check(
            self.reservation.transfer_retries > 0,
            "reservation.transfer_retries",
            "must be at least 1",
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Directory for persistent data.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDataDir`] if none is configured and the
    /// platform data directory cannot be determined.
    pub fn data_dir(&self) -> ConfigResult<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("app", "guidora", "guidora")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoDataDir)
    }
}
