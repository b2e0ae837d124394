//! services/screening/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

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

/// Which analysis backend the gateway talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Structured,
    Generative,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" => Ok(BackendKind::Structured),
            "generative" => Ok(BackendKind::Generative),
            other => Err(format!("'{}' is not one of: structured, generative", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: BackendKind,
    pub backend_url: String,
    pub generative_api_key: Option<String>,
    pub generative_api_base: Option<String>,
    pub generative_model: String,
    pub database_url: String,
    pub request_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Backend Selection ---
        let backend_str = lookup("ANALYSIS_BACKEND").unwrap_or_else(|| "structured".to_string());
        let backend = backend_str
            .parse::<BackendKind>()
            .map_err(|e| ConfigError::InvalidValue("ANALYSIS_BACKEND".to_string(), e))?;

        let backend_url = lookup("BACKEND_URL")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "BACKEND_URL".to_string(),
                format!("'{}' is not an http(s) URL", backend_url),
            ));
        }

        // --- Generative Backend (all optional) ---
        let generative_api_key = lookup("GENERATIVE_API_KEY").filter(|k| !k.trim().is_empty());
        let generative_api_base = lookup("GENERATIVE_API_BASE").filter(|b| !b.trim().is_empty());
        let generative_model =
            lookup("GENERATIVE_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        // --- Local Store ---
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://hemoscan.db?mode=rwc".to_string());
        if database_url.trim().is_empty() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let timeout_str = lookup("REQUEST_TIMEOUT_SECS").unwrap_or_else(|| "30".to_string());
        let timeout_secs = timeout_str
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "REQUEST_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a positive number of seconds", timeout_str),
                )
            })?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            backend,
            backend_url,
            generative_api_key,
            generative_api_base,
            generative_model,
            database_url,
            request_timeout: Duration::from_secs(timeout_secs),
            log_level,
        })
    }
}
