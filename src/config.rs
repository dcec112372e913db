use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::{deserialize_bool_from_anything, deserialize_number_from_string};

use crate::domain::EmailAddress;

#[derive(Clone, serde::Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub smtp: SmtpSettings,
    pub security: SecuritySettings,
}

#[derive(Clone, serde::Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
}

#[derive(Clone, serde::Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// Implicit TLS when set; otherwise a plain connection is attempted
    /// (the upstream may still upgrade via STARTTLS).
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub secure: bool,
    pub username: String,
    pub password: Secret<String>,
    /// Mailbox the relay sends from. Falls back to `username`.
    pub sender: Option<String>,
    pub sender_name: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub pool_size: u32,
}

#[derive(Clone, serde::Deserialize)]
pub struct SecuritySettings {
    pub api_key: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub rate_limit_window_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub rate_limit_max: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_concurrent: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub request_timeout_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_delay_ms: u64,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub throttle_enabled: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub throttle_delay_ms: u64,
}

impl SmtpSettings {
    pub fn sender(&self) -> Result<EmailAddress, String> {
        let sender = self.sender.clone().unwrap_or_else(|| self.username.clone());
        EmailAddress::parse(sender)
    }
}

impl SecuritySettings {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn throttle_delay(&self) -> Option<Duration> {
        if self.throttle_enabled {
            Some(Duration::from_millis(self.throttle_delay_ms))
        } else {
            None
        }
    }
}

/// Load settings from an optional `config.*` file, overridden by
/// environment variables (`SMTP__HOST`, `SECURITY__API_KEY`, ...).
pub fn settings() -> Result<Settings, ConfigError> {
    let mut settings = Config::default();

    settings.set_default("application.host", "0.0.0.0")?;
    settings.set_default("application.port", 3000i64)?;
    settings.set_default("smtp.port", 587i64)?;
    settings.set_default("smtp.secure", false)?;
    settings.set_default("smtp.sender_name", "Verification")?;
    settings.set_default("smtp.pool_size", 5i64)?;
    settings.set_default("security.rate_limit_window_secs", 300i64)?;
    settings.set_default("security.rate_limit_max", 3i64)?;
    settings.set_default("security.max_concurrent", 50i64)?;
    settings.set_default("security.request_timeout_ms", 30_000i64)?;
    settings.set_default("security.retry_attempts", 3i64)?;
    settings.set_default("security.retry_delay_ms", 1_000i64)?;
    settings.set_default("security.throttle_enabled", false)?;
    settings.set_default("security.throttle_delay_ms", 100i64)?;

    settings.merge(File::with_name("config").required(false))?;
    settings.merge(Environment::new().separator("__"))?;

    let settings: Settings = settings.try_into()?;
    validate(&settings)?;
    Ok(settings)
}

// The relay is useless without an upstream and a shared secret; refuse
// to start rather than limp along with placeholder values.
fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let required = [
        ("smtp.host", settings.smtp.host.as_str()),
        ("smtp.username", settings.smtp.username.as_str()),
        ("smtp.password", settings.smtp.password.expose_secret().as_str()),
        ("security.api_key", settings.security.api_key.expose_secret().as_str()),
    ];
    for (key, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::Message(format!("`{}` must be set and non-empty", key)));
        }
    }
    settings
        .smtp
        .sender()
        .map_err(|err| ConfigError::Message(format!("`smtp.sender` is invalid: {}", err)))?;
    Ok(())
}
