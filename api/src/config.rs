//! Process configuration from environment variables.
//!
//! `AppConfig::from_env` reads the real environment; `from_lookup` takes any
//! lookup function so parsing can be tested without touching process state.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono_tz::Tz;
use dashboard_core::alerts::Observations;

use crate::google_auth::ServiceAccountKey;
use crate::llm::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SCHEDULER_OBSERVATIONS: &str = r#"{"temperature":32}"#;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be set")]
    Missing { var: &'static str },

    #[error("{var} is invalid: {message}")]
    Invalid { var: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub observations: Observations,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub firebase_key: ServiceAccountKey,
    pub google_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub upstream_timeout: Duration,
    pub port: u16,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub display_tz: Tz,
    pub admin_uids: HashSet<String>,
    pub chat_rate_limit: bool,
    /// `None` when periodic evaluation is disabled.
    pub scheduler: Option<SchedulerConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let credentials = get("FIREBASE_CREDENTIALS").ok_or(ConfigError::Missing {
            var: "FIREBASE_CREDENTIALS",
        })?;
        let firebase_key: ServiceAccountKey =
            serde_json::from_str(&credentials).map_err(|e| ConfigError::Invalid {
                var: "FIREBASE_CREDENTIALS",
                message: format!("expected a service account JSON object ({e})"),
            })?;
        for (name, value) in [
            ("project_id", &firebase_key.project_id),
            ("client_email", &firebase_key.client_email),
            ("private_key", &firebase_key.private_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    var: "FIREBASE_CREDENTIALS",
                    message: format!("field `{name}` is empty"),
                });
            }
        }

        let google_api_key = get("GOOGLE_API_KEY").ok_or(ConfigError::Missing {
            var: "GOOGLE_API_KEY",
        })?;

        let upstream_timeout = Duration::from_secs(parse_positive(
            "UPSTREAM_TIMEOUT_SECS",
            get("UPSTREAM_TIMEOUT_SECS"),
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?);

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "PORT",
                message: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let display_tz = match get("DASHBOARD_DISPLAY_TZ") {
            Some(raw) => raw.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                var: "DASHBOARD_DISPLAY_TZ",
                message: e.to_string(),
            })?,
            None => Tz::UTC,
        };

        let chat_rate_limit = match get("DASHBOARD_CHAT_RATE_LIMIT") {
            Some(raw) => parse_flag("DASHBOARD_CHAT_RATE_LIMIT", &raw)?,
            None => true,
        };

        let scheduler = match get("ALERT_SCHEDULER_INTERVAL_SECS") {
            Some(raw) => {
                let secs = parse_positive("ALERT_SCHEDULER_INTERVAL_SECS", Some(raw), 0)?;
                let observations = get("ALERT_SCHEDULER_OBSERVATIONS")
                    .unwrap_or_else(|| DEFAULT_SCHEDULER_OBSERVATIONS.to_string());
                let observations: HashMap<String, f64> = serde_json::from_str(&observations)
                    .map_err(|e| ConfigError::Invalid {
                        var: "ALERT_SCHEDULER_OBSERVATIONS",
                        message: format!("expected a JSON object of numbers ({e})"),
                    })?;
                Some(SchedulerConfig {
                    interval: Duration::from_secs(secs),
                    observations,
                })
            }
            None => None,
        };

        Ok(Self {
            firebase_key,
            google_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: get("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            upstream_timeout,
            port,
            cors_origins: split_list(get("DASHBOARD_CORS_ORIGINS")),
            display_tz,
            admin_uids: split_list(get("DASHBOARD_ADMIN_UIDS")).into_iter().collect(),
            chat_rate_limit,
            scheduler,
        })
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            message: format!("expected true or false, got '{other}'"),
        }),
    }
}

fn parse_positive(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            var,
            message: format!("expected a positive number of seconds, got '{raw}'"),
        }),
    }
}
