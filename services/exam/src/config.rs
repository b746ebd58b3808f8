//! Application Configuration Module
//!
//! Centralizes the configuration for the exam service. Settings come from
//! environment variables (with a `.env` file honored for local development)
//! and are validated once at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

// --- Application Constants ---

/// Timeout the shell enforces around each external call (examiner and
/// transcription). A timed-out call surfaces as `ServiceUnavailable`.
pub const EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Advisory exam duration shown to the student. It never terminates the
/// session; completion is decided by the question count alone.
pub const EXAM_DURATION: Duration = Duration::from_secs(5 * 60);

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub chat_model: String,
    pub questions_url: String,
    pub answers_url: String,
    pub max_questions: usize,
    pub report_path: PathBuf,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Your secret key for the OpenAI API. Required.
    // *   `QUESTIONS_URL` / `ANSWERS_URL`: Where the question and reference
    //     answer lists are fetched from (one entry per line). Required
    //     unless given on the command line.
    // *   `CHAT_MODEL`: (Optional) The examiner model. Defaults to "gpt-4o-mini".
    // *   `MAX_QUESTIONS`: (Optional) Exam length. Defaults to 5, must be >= 1.
    // *   `REPORT_PATH`: (Optional) Where the transcript report is written.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Ignored if not present.
        dotenvy::dotenv().ok();

        let openai_api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let questions_url = env::var("QUESTIONS_URL").unwrap_or_default();
        let answers_url = env::var("ANSWERS_URL").unwrap_or_default();

        let chat_model = env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let max_questions = match env::var("MAX_QUESTIONS") {
            Ok(raw) => parse_max_questions(&raw)?,
            Err(_) => 5,
        };

        let report_path = env::var("REPORT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("pruefungsprotokoll.txt"));

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            openai_api_key,
            chat_model,
            questions_url,
            answers_url,
            max_questions,
            report_path,
            log_level,
        })
    }
}

pub fn parse_max_questions(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: "MAX_QUESTIONS",
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_questions_must_be_at_least_one() {
        assert_eq!(parse_max_questions("7").unwrap(), 7);
        assert!(parse_max_questions("0").is_err());
        assert!(parse_max_questions("viele").is_err());
    }
}
