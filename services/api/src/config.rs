//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Output format of the tracing subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs every store in memory.
    pub database_url: Option<String>,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub content_path: PathBuf,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub llm_timeout: Duration,
    pub piper_base_url: String,
    pub tts_default_voice: String,
    pub tts_probe_ttl: Duration,
    pub cors_origin: Option<String>,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address_str = or_default("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = var("DATABASE_URL").filter(|url| !url.trim().is_empty());

        // --- Logging ---
        let log_filter = or_default("RUST_LOG", "info");
        EnvFilter::try_new(&log_filter).map_err(|e| {
            ConfigError::InvalidValue("RUST_LOG".to_string(), e.to_string())
        })?;
        let log_format = match or_default("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LOG_FORMAT".to_string(),
                    format!("'{}' is not one of pretty, json", other),
                ))
            }
        };

        let content_path = PathBuf::from(or_default("CONTENT_PATH", "./content"));

        // --- LLM Settings ---
        let ollama_base_url = parse_url("OLLAMA_BASE_URL", or_default("OLLAMA_BASE_URL", "http://localhost:11434"))?;
        let ollama_model = or_default("OLLAMA_MODEL", "llama3.1:8b");
        let llm_timeout = parse_secs("LLM_TIMEOUT_SECS", &or_default("LLM_TIMEOUT_SECS", "30"))?;

        // --- TTS Settings ---
        let piper_base_url = parse_url("PIPER_BASE_URL", or_default("PIPER_BASE_URL", "http://localhost:5000"))?;
        let tts_default_voice = or_default("TTS_DEFAULT_VOICE", "de_DE-thorsten-medium");
        let tts_probe_ttl = parse_secs("TTS_PROBE_TTL_SECS", &or_default("TTS_PROBE_TTL_SECS", "30"))?;

        let cors_origin = var("CORS_ORIGIN").filter(|origin| !origin.trim().is_empty());
        if let Some(origin) = &cors_origin {
            reqwest::header::HeaderValue::from_str(origin).map_err(|e| {
                ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
            })?;
        }

        Ok(Self {
            bind_address,
            database_url,
            log_filter,
            log_format,
            content_path,
            ollama_base_url,
            ollama_model,
            llm_timeout,
            piper_base_url,
            tts_default_voice,
            tts_probe_ttl,
            cors_origin,
        })
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("'{}' is not a positive number of seconds", value),
        )),
    }
}

fn parse_url(key: &str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    reqwest::Url::parse(trimmed)
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))?;
    Ok(trimmed.to_string())
}
