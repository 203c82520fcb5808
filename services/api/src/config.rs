//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Timeout and retry settings applied to every call to an external API.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub extraction_model: String,
    pub generation_model: String,
    pub llama_cloud_api_key: Option<String>,
    pub llama_cloud_base_url: String,
    pub retry: RetryPolicy,
    pub max_upload_bytes: usize,
    pub cors_origin: String,
    pub session_ttl_days: i64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address = parse::<SocketAddr>("BIND_ADDRESS", &var("BIND_ADDRESS", "0.0.0.0:3000"))?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let database_max_connections =
            parse::<u32>("DATABASE_MAX_CONNECTIONS", &var("DATABASE_MAX_CONNECTIONS", "5"))?;

        let log_level_str = var("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- External Services ---
        let openai_api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());
        let extraction_model = var("EXTRACTION_MODEL", "gpt-4o");
        let generation_model = var("GENERATION_MODEL", "gpt-4o");
        let llama_cloud_api_key = lookup("LLAMA_CLOUD_API_KEY").filter(|k| !k.is_empty());
        let llama_cloud_base_url = var("LLAMA_CLOUD_BASE_URL", "https://api.cloud.llamaindex.ai")
            .trim_end_matches('/')
            .to_string();

        let max_attempts = parse::<u32>("EXTERNAL_MAX_ATTEMPTS", &var("EXTERNAL_MAX_ATTEMPTS", "3"))?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "EXTERNAL_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let retry = RetryPolicy {
            timeout: Duration::from_secs(parse::<u64>(
                "EXTERNAL_TIMEOUT_SECS",
                &var("EXTERNAL_TIMEOUT_SECS", "60"),
            )?),
            max_attempts,
            base_delay: Duration::from_millis(parse::<u64>(
                "EXTERNAL_RETRY_BASE_MS",
                &var("EXTERNAL_RETRY_BASE_MS", "500"),
            )?),
        };

        // --- HTTP Settings ---
        let max_upload_bytes =
            parse::<usize>("MAX_UPLOAD_BYTES", &var("MAX_UPLOAD_BYTES", "10485760"))?;
        let cors_origin = var("CORS_ORIGIN", "http://localhost:3000");
        let session_ttl_days = parse::<i64>("SESSION_TTL_DAYS", &var("SESSION_TTL_DAYS", "30"))?;
        if !(1..=MAX_SESSION_TTL_DAYS).contains(&session_ttl_days) {
            return Err(ConfigError::InvalidValue(
                "SESSION_TTL_DAYS".to_string(),
                format!("must be between 1 and {}", MAX_SESSION_TTL_DAYS),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            openai_api_key,
            extraction_model,
            generation_model,
            llama_cloud_api_key,
            llama_cloud_base_url,
            retry,
            max_upload_bytes,
            cors_origin,
            session_ttl_days,
        })
    }
}

/// Ten years.
const MAX_SESSION_TTL_DAYS: i64 = 3650;

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/autorfp")]))
            .unwrap();

        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.llama_cloud_base_url, "https://api.cloud.llamaindex.ai");
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn database_url_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "DATABASE_URL"));
    }

    #[test]
    fn invalid_values_are_reported_with_their_key() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/autorfp"),
            ("EXTERNAL_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "EXTERNAL_TIMEOUT_SECS"));

        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/autorfp"),
            ("EXTERNAL_MAX_ATTEMPTS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "EXTERNAL_MAX_ATTEMPTS"));
    }

    #[test]
    fn session_ttl_must_be_within_bounds() {
        for value in ["0", "-1", "3651", "9223372036854775807"] {
            let err = Config::from_lookup(lookup(&[
                ("DATABASE_URL", "postgres://localhost/autorfp"),
                ("SESSION_TTL_DAYS", value),
            ]))
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "SESSION_TTL_DAYS"));
        }

        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/autorfp"),
            ("SESSION_TTL_DAYS", "3650"),
        ]))
        .unwrap();
        assert_eq!(config.session_ttl_days, 3650);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/autorfp"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("RUST_LOG", "debug"),
            ("EXTERNAL_MAX_ATTEMPTS", "5"),
            ("LLAMA_CLOUD_BASE_URL", "http://localhost:9000/"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.llama_cloud_base_url, "http://localhost:9000");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
    }
}
