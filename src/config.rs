use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use thiserror::Error;

const DEFAULT_HTTP_PORT: u16 = 5000;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_client_id: Option<String>,
    pub mqtt_keep_alive_secs: u64,
    pub mqtt_retry_interval_ms: u64,

    pub debug: bool,
    pub auth_key: String,
    pub http_port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is missing or invalid.")]
    MissingOrInvalid(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

impl Config {
    /// Validate timeout values and other critical configurations.
    fn validate_timeouts(&self) -> Result<(), ConfigError> {
        const MIN_TIMEOUT: u64 = 100;
        const MAX_TIMEOUT: u64 = 1_000_000;

        if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&self.mqtt_retry_interval_ms) {
            return Err(ConfigError::ParsingError(format!(
                "MQTT_RETRY_INTERVAL_MS must be between {} and {} ms",
                MIN_TIMEOUT, MAX_TIMEOUT
            )));
        }

        if self.mqtt_keep_alive_secs == 0 {
            return Err(ConfigError::MissingOrInvalid("MQTT_KEEP_ALIVE_SECS".to_string()));
        }

        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok(); // Load environment variables from .env file

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as unset, so `PORT=` falls back to the default port.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let parse_number = |name: &str, default: u64| -> Result<u64, ConfigError> {
            match var(name) {
                Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                    ConfigError::ParsingError(format!("{} must be a valid number", name))
                }),
                None => Ok(default),
            }
        };

        let http_port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::ParsingError("PORT must be a valid port number".to_string()))?,
            None => DEFAULT_HTTP_PORT,
        };

        let config = Self {
            // MQTT Configuration
            mqtt_host: var("MQTT_HOST").unwrap_or_default(),
            mqtt_username: var("MQTT_USER").unwrap_or_default(),
            mqtt_password: var("MQTT_PASS").unwrap_or_default(),
            mqtt_client_id: var("MQTT_CLIENT_ID").map(|id| id.trim().to_string()),
            mqtt_keep_alive_secs: parse_number("MQTT_KEEP_ALIVE_SECS", DEFAULT_KEEP_ALIVE_SECS)?,
            mqtt_retry_interval_ms: parse_number("MQTT_RETRY_INTERVAL_MS", DEFAULT_RETRY_INTERVAL_MS)?,

            // HTTP Configuration
            debug: var("DEBUG_MODE").map(|raw| is_enabled(&raw)).unwrap_or(false),
            auth_key: var("AUTH_KEY").unwrap_or_default(),
            http_port,
        };

        // Validate timeouts after constructing the configuration
        config.validate_timeouts()?;

        Ok(config)
    }

    /// True when requests must carry the shared secret.
    pub fn requires_auth(&self) -> bool {
        !self.auth_key.is_empty()
    }
}

fn is_enabled(raw: &str) -> bool {
    let value = raw.trim();
    !(value == "0" || value.eq_ignore_ascii_case("false"))
}
