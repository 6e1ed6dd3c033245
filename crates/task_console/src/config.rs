//! Environment configuration.

use std::env;
use std::time::Duration;

use task_stream::ServiceProfile;
use task_stream_http::DEFAULT_BASE_URL;
use thiserror::Error;

pub const BASE_URL_ENV_VAR: &str = "TASK_STREAM_BASE_URL";
pub const PROFILE_ENV_VAR: &str = "TASK_STREAM_PROFILE";
pub const TIMEOUT_ENV_VAR: &str = "TASK_STREAM_TIMEOUT_SEC";
pub const LOG_ENV_VAR: &str = "TASK_STREAM_LOG";

pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported profile '{0}'. Available profiles: auto-command, coding, agentic-edit, mock")]
    UnknownProfile(String),
    #[error("{TIMEOUT_ENV_VAR} must be a positive number of seconds, got '{0}'")]
    InvalidTimeout(String),
}

/// Which service the console talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileChoice {
    #[default]
    AutoCommand,
    Coding,
    AgenticEdit,
    /// Offline scripted run; no server needed.
    Mock,
}

impl ProfileChoice {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "auto-command" => Ok(Self::AutoCommand),
            "coding" => Ok(Self::Coding),
            "agentic-edit" => Ok(Self::AgenticEdit),
            "mock" => Ok(Self::Mock),
            unknown => Err(ConfigError::UnknownProfile(unknown.to_string())),
        }
    }

    pub fn service_profile(self) -> ServiceProfile {
        match self {
            Self::AutoCommand | Self::Mock => ServiceProfile::auto_command(),
            Self::Coding => ServiceProfile::coding(),
            Self::AgenticEdit => ServiceProfile::agentic_edit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    pub base_url: String,
    pub profile: ProfileChoice,
    pub timeout: Option<Duration>,
    pub log_filter: String,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = match env_string_opt(PROFILE_ENV_VAR) {
            Some(value) => ProfileChoice::parse(&value)?,
            None => ProfileChoice::default(),
        };
        let timeout = env_string_opt(TIMEOUT_ENV_VAR)
            .map(|value| parse_timeout(&value))
            .transpose()?;

        Ok(Self {
            base_url: env_string_opt(BASE_URL_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            profile,
            timeout,
            log_filter: env_string_opt(LOG_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }
}

fn parse_timeout(value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 => Ok(Duration::from_secs_f64(seconds)),
        _ => Err(ConfigError::InvalidTimeout(value.to_string())),
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
