//! # Configuration Module
//!
//! Process settings read once at startup from the environment (after `.env`
//! has been loaded). Missing required values are fatal.

use chrono::FixedOffset;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default pool size for the PostgreSQL connection pool
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
/// Default statement timeout (and pool acquire timeout) in seconds
pub const DEFAULT_DB_COMMAND_TIMEOUT_SECS: u64 = 30;
/// Default root directory for relative textbook file paths
pub const DEFAULT_TEXTBOOKS_DIR: &str = "uploads/textbooks";

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                name: "LOG_FORMAT",
                value: s.to_string(),
            }),
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub command_timeout: Duration,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = required(&lookup, "DATABASE_URL")?;
        let max_connections =
            positive_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;
        let timeout_secs = positive_or(
            &lookup,
            "DB_COMMAND_TIMEOUT_SECS",
            DEFAULT_DB_COMMAND_TIMEOUT_SECS,
        )?;

        Ok(Self {
            url,
            max_connections,
            command_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Sliding-window rate limiting settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: usize,
    /// Window length in seconds
    pub window_secs: u64,
    /// Users idle longer than this are dropped by the sweeper (hours)
    pub cleanup_hours: u64,
    /// How often the sweeper runs (hours)
    pub sweep_interval_hours: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_secs: 60,
            cleanup_hours: 24,
            sweep_interval_hours: 6,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cleanup_horizon(&self) -> Duration {
        Duration::from_secs(self.cleanup_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_hours * 3600)
    }
}

/// Everything the bot binary needs to run
#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: String,
    /// Telegram id of the single administrator
    pub admin_id: i64,
    pub database: DatabaseConfig,
    pub textbooks_dir: PathBuf,
    /// Calendar-day boundary used by "today" statistics
    pub stats_offset: FixedOffset,
    pub rate_limit: RateLimitConfig,
    pub log_format: LogFormat,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| lookup("BOT_TOKEN").filter(|v| !v.trim().is_empty()))
            .ok_or(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN"))?;

        let admin_raw = required(&lookup, "ADMIN_ID")?;
        let admin_id = admin_raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::InvalidValue {
                name: "ADMIN_ID",
                value: admin_raw.clone(),
            })?;

        let database = DatabaseConfig::from_lookup(&lookup)?;

        let textbooks_dir = lookup("TEXTBOOKS_DIR")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_TEXTBOOKS_DIR), PathBuf::from);

        let stats_offset = match lookup("STATS_UTC_OFFSET").filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<FixedOffset>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "STATS_UTC_OFFSET",
                    value: raw.clone(),
                })?,
            None => FixedOffset::east_opt(0).ok_or(ConfigError::InvalidValue {
                name: "STATS_UTC_OFFSET",
                value: "+00:00".to_string(),
            })?,
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: positive_or(&lookup, "RATE_LIMIT_REQUESTS", defaults.max_requests)?,
            window_secs: positive_or(&lookup, "RATE_LIMIT_WINDOW_SECS", defaults.window_secs)?,
            cleanup_hours: positive_or(&lookup, "RATE_LIMIT_CLEANUP_HOURS", defaults.cleanup_hours)?,
            sweep_interval_hours: positive_or(
                &lookup,
                "RATE_LIMIT_SWEEP_INTERVAL_HOURS",
                defaults.sweep_interval_hours,
            )?,
        };

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bot_token,
            admin_id,
            database,
            textbooks_dir,
            stats_offset,
            rate_limit,
            log_format,
        })
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingEnvVar(name))
}

fn parsed_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

/// Like [`parsed_or`], but zero is rejected
fn positive_or<T: FromStr + Default + PartialEq>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parsed_or(lookup, name, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            name,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("ADMIN_ID", "42"),
        ("DATABASE_URL", "postgres://localhost/ruuchebnik"),
    ];

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_lookup(lookup_from(&BASE)).unwrap();
        assert_eq!(settings.bot_token, "123:abc");
        assert_eq!(settings.admin_id, 42);
        assert_eq!(settings.database.max_connections, DEFAULT_DB_MAX_CONNECTIONS);
        assert_eq!(settings.database.command_timeout, Duration::from_secs(30));
        assert_eq!(settings.textbooks_dir, PathBuf::from(DEFAULT_TEXTBOOKS_DIR));
        assert_eq!(settings.stats_offset.local_minus_utc(), 0);
        assert_eq!(settings.rate_limit, RateLimitConfig::default());
        assert_eq!(settings.log_format, LogFormat::Text);
    }

    #[test]
    fn test_bot_token_fallback() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("BOT_TOKEN", "fallback"),
            ("ADMIN_ID", "1"),
            ("DATABASE_URL", "postgres://db"),
        ]))
        .unwrap();
        assert_eq!(settings.bot_token, "fallback");
    }

    #[test]
    fn test_missing_required_values() {
        let err = Settings::from_lookup(lookup_from(&[("ADMIN_ID", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN")));

        let err = Settings::from_lookup(lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("ADMIN_ID", "1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("DATABASE_URL")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("RATE_LIMIT_REQUESTS", "many"));
        assert!(matches!(
            Settings::from_lookup(lookup_from(&pairs)),
            Err(ConfigError::InvalidValue { name: "RATE_LIMIT_REQUESTS", .. })
        ));

        let pairs = [
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("ADMIN_ID", "admin"),
            ("DATABASE_URL", "postgres://db"),
        ];
        assert!(matches!(
            Settings::from_lookup(lookup_from(&pairs)),
            Err(ConfigError::InvalidValue { name: "ADMIN_ID", .. })
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        for name in [
            "RATE_LIMIT_REQUESTS",
            "RATE_LIMIT_WINDOW_SECS",
            "RATE_LIMIT_CLEANUP_HOURS",
            "RATE_LIMIT_SWEEP_INTERVAL_HOURS",
            "DB_MAX_CONNECTIONS",
            "DB_COMMAND_TIMEOUT_SECS",
        ] {
            let mut pairs = BASE.to_vec();
            pairs.push((name, "0"));
            match Settings::from_lookup(lookup_from(&pairs)) {
                Err(ConfigError::InvalidValue { name: rejected, value }) => {
                    assert_eq!(rejected, name);
                    assert_eq!(value, "0");
                }
                other => panic!("{name}=0 should be rejected, got {other:?}"),
            }
        }

        let mut pairs = BASE.to_vec();
        pairs.push(("RATE_LIMIT_SWEEP_INTERVAL_HOURS", "00"));
        assert!(Settings::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("STATS_UTC_OFFSET", "+03:00"),
            ("RATE_LIMIT_REQUESTS", "5"),
            ("RATE_LIMIT_WINDOW_SECS", "10"),
            ("TEXTBOOKS_DIR", "/srv/books"),
            ("LOG_FORMAT", "json"),
        ]);
        let settings = Settings::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(settings.stats_offset.local_minus_utc(), 3 * 3600);
        assert_eq!(settings.rate_limit.max_requests, 5);
        assert_eq!(settings.rate_limit.window(), Duration::from_secs(10));
        assert_eq!(settings.textbooks_dir, PathBuf::from("/srv/books"));
        assert_eq!(settings.log_format, LogFormat::Json);
    }
}
