//! Conference service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default Redis URL for the event bus.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default pub/sub channel for domain events.
pub const DEFAULT_EVENT_CHANNEL: &str = "conference.events";

/// Default Prometheus exporter bind address.
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:9300";

/// Default switch event-socket address.
pub const DEFAULT_SWITCH_ADDRESS: &str = "127.0.0.1:8021";

/// Default deadline for a live switch membership query in seconds.
pub const DEFAULT_SWITCH_QUERY_TIMEOUT_SECONDS: u64 = 5;

/// Default time a participant may sit in `connecting` before the monitor
/// force-disconnects it, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 120;

/// Default grace period an active conference must be observed empty before
/// it is ended, in seconds.
pub const DEFAULT_EMPTY_TIMEOUT_SECONDS: u64 = 120;

/// Default empty-conference monitor interval in seconds.
pub const DEFAULT_MONITOR_INTERVAL_SECONDS: u64 = 30;

/// Default reminder scheduler interval in seconds.
pub const DEFAULT_REMINDER_INTERVAL_SECONDS: u64 = 60;

/// Default stale-conference janitor interval in seconds.
pub const DEFAULT_JANITOR_INTERVAL_SECONDS: u64 = 300;

/// Default recurrence scheduler interval in seconds.
pub const DEFAULT_RECURRENCE_INTERVAL_SECONDS: u64 = 900;

/// Default hard ceiling on conference age in hours.
pub const DEFAULT_MAX_CONFERENCE_AGE_HOURS: u64 = 24;

/// Conference service configuration.
///
/// Loaded from environment variables with sensible defaults. Connection
/// URLs and the switch password are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Redis connection URL for the event bus.
    pub redis_url: String,

    /// Pub/sub channel domain events are published to.
    pub event_channel: String,

    /// Prometheus exporter bind address.
    pub metrics_bind_address: String,

    /// Switch event-socket address.
    pub switch_address: String,

    /// Optional switch event-socket password.
    pub switch_password: Option<String>,

    /// Deadline for a live switch membership query.
    pub switch_query_timeout: Duration,

    /// Time a participant may sit in `connecting` before force-disconnect.
    pub connect_timeout: Duration,

    /// Grace period an active conference must be observed empty before
    /// it is ended.
    pub empty_timeout: Duration,

    /// Empty-conference monitor tick interval.
    pub monitor_interval: Duration,

    /// Reminder scheduler tick interval.
    pub reminder_interval: Duration,

    /// Stale-conference janitor tick interval.
    pub janitor_interval: Duration,

    /// Recurrence scheduler tick interval.
    pub recurrence_interval: Duration,

    /// Hard ceiling on how long a conference may run, in hours.
    pub max_conference_age_hours: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("event_channel", &self.event_channel)
            .field("metrics_bind_address", &self.metrics_bind_address)
            .field("switch_address", &self.switch_address)
            .field(
                "switch_password",
                &self.switch_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("switch_query_timeout", &self.switch_query_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("empty_timeout", &self.empty_timeout)
            .field("monitor_interval", &self.monitor_interval)
            .field("reminder_interval", &self.reminder_interval)
            .field("janitor_interval", &self.janitor_interval)
            .field("recurrence_interval", &self.recurrence_interval)
            .field("max_conference_age_hours", &self.max_conference_age_hours)
            .finish()
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A variable was set to something unusable.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// The offending variable name.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `DATABASE_URL` is absent or any numeric
    /// setting fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let redis_url = vars
            .get("REDIS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

        let event_channel = vars
            .get("CONF_EVENT_CHANNEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_EVENT_CHANNEL.to_string());

        let metrics_bind_address = vars
            .get("CONF_METRICS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_METRICS_BIND_ADDRESS.to_string());

        let switch_address = vars
            .get("CONF_SWITCH_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SWITCH_ADDRESS.to_string());

        let switch_password = vars.get("CONF_SWITCH_PASSWORD").cloned();

        let switch_query_timeout = Duration::from_secs(positive_seconds(
            vars,
            "CONF_SWITCH_QUERY_TIMEOUT_SECONDS",
            DEFAULT_SWITCH_QUERY_TIMEOUT_SECONDS,
        )?);

        let connect_timeout = Duration::from_secs(positive_seconds(
            vars,
            "CONF_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_CONNECT_TIMEOUT_SECONDS,
        )?);

        let empty_timeout = Duration::from_secs(positive_seconds(
            vars,
            "CONF_EMPTY_TIMEOUT_SECONDS",
            DEFAULT_EMPTY_TIMEOUT_SECONDS,
        )?);

        let monitor_interval = Duration::from_secs(positive_seconds(
            vars,
            "CONF_MONITOR_INTERVAL_SECONDS",
            DEFAULT_MONITOR_INTERVAL_SECONDS,
        )?);

        let reminder_interval = Duration::from_secs(positive_seconds(
            vars,
            "CONF_REMINDER_INTERVAL_SECONDS",
            DEFAULT_REMINDER_INTERVAL_SECONDS,
        )?);

        let janitor_interval = Duration::from_secs(positive_seconds(
            vars,
            "CONF_JANITOR_INTERVAL_SECONDS",
            DEFAULT_JANITOR_INTERVAL_SECONDS,
        )?);

        let recurrence_interval = Duration::from_secs(positive_seconds(
            vars,
            "CONF_RECURRENCE_INTERVAL_SECONDS",
            DEFAULT_RECURRENCE_INTERVAL_SECONDS,
        )?);

        let max_conference_age_hours = positive_seconds(
            vars,
            "CONF_MAX_CONFERENCE_AGE_HOURS",
            DEFAULT_MAX_CONFERENCE_AGE_HOURS,
        )?;

        Ok(Config {
            database_url,
            redis_url,
            event_channel,
            metrics_bind_address,
            switch_address,
            switch_password,
            switch_query_timeout,
            connect_timeout,
            empty_timeout,
            monitor_interval,
            reminder_interval,
            janitor_interval,
            recurrence_interval,
            max_conference_age_hours,
        })
    }
}

/// Parse a positive integer setting, falling back to a default when unset.
fn positive_seconds(
    vars: &HashMap<String, String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(var) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| ConfigError::InvalidValue {
        var,
        reason: format!("must be a valid positive integer, got '{value_str}': {e}"),
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            reason: "must be greater than 0".to_string(),
        });
    }

    Ok(value)
}
