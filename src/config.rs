use std::env;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub dispatch: DispatchConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the institute web front-end).
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Without a token, Telegram dispatch is disabled; in-app delivery still works.
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Number of dispatch workers, i.e. the ceiling on concurrently running dispatches.
    pub workers: usize,
    /// Capacity of the dispatch queue. Enqueue attempts beyond it are dropped.
    pub queue_capacity: usize,
    /// Concurrent sends within a single notification's dispatch.
    pub per_notification_concurrency: usize,
    /// Hard timeout for a single provider call.
    pub send_timeout_ms: u64,
    /// Attempts per recipient within one dispatch run (first try included).
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Whether the periodic re-dispatch of pending Telegram rows is enabled.
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Only notifications younger than this are re-dispatched.
    pub max_age_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: parse_env_strict("PORT", defaults.server.port)?,
                frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.server.frontend_url),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_env(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN")
                    .ok()
                    .filter(|token| !token.trim().is_empty()),
            },
            dispatch: DispatchConfig {
                workers: parse_env("DISPATCH_WORKERS", defaults.dispatch.workers),
                queue_capacity: parse_env(
                    "DISPATCH_QUEUE_CAPACITY",
                    defaults.dispatch.queue_capacity,
                ),
                per_notification_concurrency: parse_env(
                    "DISPATCH_PER_NOTIFICATION_CONCURRENCY",
                    defaults.dispatch.per_notification_concurrency,
                ),
                send_timeout_ms: parse_env(
                    "DISPATCH_SEND_TIMEOUT_MS",
                    defaults.dispatch.send_timeout_ms,
                ),
                max_attempts: parse_env("DISPATCH_MAX_ATTEMPTS", defaults.dispatch.max_attempts),
                initial_backoff_ms: parse_env(
                    "DISPATCH_INITIAL_BACKOFF_MS",
                    defaults.dispatch.initial_backoff_ms,
                ),
                max_backoff_ms: parse_env(
                    "DISPATCH_MAX_BACKOFF_MS",
                    defaults.dispatch.max_backoff_ms,
                ),
            },
            sweep: SweepConfig {
                enabled: env::var("REDISPATCH_ENABLED")
                    .ok()
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(defaults.sweep.enabled),
                interval_seconds: parse_env(
                    "REDISPATCH_INTERVAL_SECONDS",
                    defaults.sweep.interval_seconds,
                ),
                max_age_hours: parse_env("REDISPATCH_MAX_AGE_HOURS", defaults.sweep.max_age_hours),
            },
        })
    }
}

/// Read and parse an optional environment variable, falling back to `default`
/// when it is missing or malformed.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Like [`parse_env`], but a malformed value is an error instead of a fallback.
fn parse_env_strict<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

/// Accepted values: "true"/"false", "1"/"0", "yes"/"no" (case-insensitive).
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/institute.db".to_string(),
                max_connections: 5,
            },
            telegram: TelegramConfig { bot_token: None },
            dispatch: DispatchConfig {
                workers: 4,
                queue_capacity: 256,
                per_notification_concurrency: 8,
                send_timeout_ms: 10_000,
                max_attempts: 3,
                initial_backoff_ms: 500,
                max_backoff_ms: 10_000,
            },
            sweep: SweepConfig {
                enabled: true,
                interval_seconds: 15 * 60,
                max_age_hours: 24,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" yes "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_env_falls_back_on_missing_or_invalid() {
        assert_eq!(parse_env("INSTITUTE_TEST_SURELY_UNSET_VAR", 7u32), 7);

        env::set_var("INSTITUTE_TEST_INVALID_NUMBER", "not-a-number");
        assert_eq!(parse_env("INSTITUTE_TEST_INVALID_NUMBER", 3u64), 3);
        env::remove_var("INSTITUTE_TEST_INVALID_NUMBER");
    }

    #[test]
    fn strict_parse_uses_default_only_when_missing() {
        assert_eq!(
            parse_env_strict("INSTITUTE_TEST_UNSET_PORT", 9090u16).unwrap(),
            9090
        );

        env::set_var("INSTITUTE_TEST_BAD_PORT", "eighty");
        let err = parse_env_strict("INSTITUTE_TEST_BAD_PORT", 9090u16).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key) if key == "INSTITUTE_TEST_BAD_PORT"));
        env::remove_var("INSTITUTE_TEST_BAD_PORT");

        env::set_var("INSTITUTE_TEST_GOOD_PORT", " 8181 ");
        assert_eq!(parse_env_strict("INSTITUTE_TEST_GOOD_PORT", 9090u16).unwrap(), 8181);
        env::remove_var("INSTITUTE_TEST_GOOD_PORT");
    }

    #[test]
    fn defaults_bound_dispatch_resources() {
        let cfg = Config::default();
        assert!(cfg.dispatch.workers > 0);
        assert!(cfg.dispatch.per_notification_concurrency > 0);
        assert!(cfg.dispatch.send_timeout_ms > 0);
        assert!(cfg.dispatch.initial_backoff_ms <= cfg.dispatch.max_backoff_ms);
    }
}
