//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use bookwise_core::settings::DEFAULT_MODELS;
use std::net::SocketAddr;
use tracing::Level;

/// OpenAI-compatible endpoint of the Gemini API.
pub const DEFAULT_COMPLETION_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_SPEECH_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Postgres connection string. Without one the service keeps everything in memory.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub completion_api_key: Option<String>,
    pub completion_api_base: String,
    pub available_models: Vec<String>,
    pub speech_api_key: Option<String>,
    pub speech_api_base: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub cors_origin: String,
    /// Largest book PDF accepted for upload, in decoded bytes.
    pub max_upload_bytes: usize,
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
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // --- Server and Database Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = var("DATABASE_URL");

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Completion Settings ---
        let completion_api_key = var("COMPLETION_API_KEY")
            .or_else(|| var("GEMINI_API_KEY"))
            .or_else(|| var("OPENAI_API_KEY"));
        let completion_api_base = var("COMPLETION_API_BASE")
            .unwrap_or_else(|| DEFAULT_COMPLETION_API_BASE.to_string());

        let available_models = match var("AVAILABLE_MODELS") {
            Some(list) => {
                let models: Vec<String> = list
                    .split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect();
                if models.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "AVAILABLE_MODELS".to_string(),
                        "expected a comma-separated list of model ids".to_string(),
                    ));
                }
                models
            }
            None => DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        };

        // --- Speech Settings ---
        let speech_api_key = var("SPEECH_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        let speech_api_base =
            var("SPEECH_API_BASE").unwrap_or_else(|| DEFAULT_SPEECH_API_BASE.to_string());
        let tts_model = var("TTS_MODEL").unwrap_or_else(|| "tts-1".to_string());
        let tts_voice = var("TTS_VOICE").unwrap_or_else(|| "alloy".to_string());

        let cors_origin =
            var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Upload Settings ---
        let max_upload_bytes = match var("MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "MAX_UPLOAD_BYTES".to_string(),
                        format!("'{}' is not a positive byte count", raw),
                    )
                })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            completion_api_key,
            completion_api_base,
            available_models,
            speech_api_key,
            speech_api_base,
            tts_model,
            tts_voice,
            cors_origin,
            max_upload_bytes,
        })
    }

    /// Request body limit for the API: room for the largest upload once
    /// base64-encoded, plus the surrounding JSON.
    pub fn body_limit(&self) -> usize {
        self.max_upload_bytes.div_ceil(3) * 4 + 64 * 1024
    }

    /// The completion key is the only setting the service cannot start without.
    pub fn require_completion_key(&self) -> Result<&str, ConfigError> {
        self.completion_api_key.as_deref().ok_or_else(|| {
            ConfigError::MissingVar("COMPLETION_API_KEY (or GEMINI_API_KEY / OPENAI_API_KEY)".to_string())
        })
    }
}
