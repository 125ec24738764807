//! Environment-driven configuration.
//!
//! # Responsibility
//! - Collect every tunable of the process from `ROSTER_*` variables.
//! - Supply safe defaults so a bare environment still boots.
//!
//! # Invariants
//! - Parsing is pure: the same variable set always yields the same config.
//! - Invalid values are rejected with the offending key named, never
//!   silently replaced by a default.

use crate::logging::default_log_level;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "ROSTER_DB_PATH";
pub const ENV_DB_MAX_CONNS: &str = "ROSTER_DB_MAX_CONNS";
pub const ENV_DB_BUSY_TIMEOUT_MS: &str = "ROSTER_DB_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "ROSTER_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "ROSTER_LOG_DIR";

pub const DEFAULT_MAX_CONNS: usize = 4;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug)]
pub enum ConfigError {
    MissingKey {
        key: &'static str,
    },
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKey { key } => write!(f, "missing required environment variable `{key}`"),
            Self::InvalidValue {
                key,
                value,
                expected,
            } => write!(f, "invalid value `{value}` for `{key}`: expected {expected}"),
        }
    }
}

impl Error for ConfigError {}

/// Database settings consumed by [`crate::db::ConnectionPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
    /// Upper bound on simultaneously open connections.
    pub max_conns: usize,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// Creates a database config for `path` with default pool settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_conns: DEFAULT_MAX_CONNS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Logging settings consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// One of trace|debug|info|warn|error.
    pub level: String,
    /// Log directory for the rolling file sink; stderr when `None`.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db: DbConfig,
    pub log: LogConfig,
}

impl Config {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    /// - [`ConfigError::MissingKey`] when `ROSTER_DB_PATH` is absent.
    /// - [`ConfigError::InvalidValue`] when a numeric variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = get(ENV_DB_PATH)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingKey { key: ENV_DB_PATH })?;

        let max_conns = match get(ENV_DB_MAX_CONNS) {
            Some(raw) => parse_positive(ENV_DB_MAX_CONNS, &raw)?,
            None => DEFAULT_MAX_CONNS,
        };

        let busy_timeout = match get(ENV_DB_BUSY_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(parse_positive(ENV_DB_BUSY_TIMEOUT_MS, &raw)? as u64),
            None => DEFAULT_BUSY_TIMEOUT,
        };

        let level = get(ENV_LOG_LEVEL)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default_log_level().to_string());

        let dir = get(ENV_LOG_DIR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            db: DbConfig {
                path: PathBuf::from(path),
                max_conns,
                busy_timeout,
            },
            log: LogConfig { level, dir },
        })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            expected: "a positive integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|value| value.to_string())
    }

    #[test]
    fn db_path_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { key } if key == ENV_DB_PATH));
    }

    #[test]
    fn defaults_apply_when_only_path_is_set() {
        let config = Config::from_lookup(lookup(&[(ENV_DB_PATH, "/var/lib/roster/roster.db")]))
            .expect("minimal environment should parse");

        assert_eq!(config.db.path, PathBuf::from("/var/lib/roster/roster.db"));
        assert_eq!(config.db.max_conns, DEFAULT_MAX_CONNS);
        assert_eq!(config.db.busy_timeout, DEFAULT_BUSY_TIMEOUT);
        assert_eq!(config.log.level, default_log_level());
        assert_eq!(config.log.dir, None);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_DB_PATH, "/tmp/roster.db"),
            (ENV_DB_MAX_CONNS, "8"),
            (ENV_DB_BUSY_TIMEOUT_MS, "250"),
            (ENV_LOG_LEVEL, "warn"),
            (ENV_LOG_DIR, "/var/log/roster"),
        ]))
        .expect("full environment should parse");

        assert_eq!(config.db.max_conns, 8);
        assert_eq!(config.db.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.dir, Some(PathBuf::from("/var/log/roster")));
    }

    #[test]
    fn zero_max_conns_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            (ENV_DB_PATH, "/tmp/roster.db"),
            (ENV_DB_MAX_CONNS, "0"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == ENV_DB_MAX_CONNS));
    }

    #[test]
    fn malformed_busy_timeout_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            (ENV_DB_PATH, "/tmp/roster.db"),
            (ENV_DB_BUSY_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();

        assert!(
            matches!(err, ConfigError::InvalidValue { key, .. } if key == ENV_DB_BUSY_TIMEOUT_MS)
        );
    }
}
