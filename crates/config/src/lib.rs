//! Configuration loading for the outbox/inbox toolkit.
//!
//! Loads the recognized options table from environment variables, the
//! same way `CoreConfig::from_env` does it upstream: `dotenvy::dotenv()`
//! once, then `env::var` with `.context`-style error messages, parsed
//! eagerly at startup so a bad value is a fatal error before any row is
//! touched rather than a surprise mid-batch.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0} must be a valid integer: {1}")]
    InvalidInt(&'static str, std::num::ParseIntError),

    #[error("unknown transport driver: {0}")]
    UnknownDriver(String),

    #[error("services.{0} has no configured base URL")]
    MissingServiceUrl(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Transport selector (§6 `driver`). `Http` is the only reference
/// transport this workspace ships; an unknown value is a fatal
/// configuration error at startup, never a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Http,
}

impl Driver {
    fn parse(raw: &str) -> ConfigResult<Self> {
        match raw {
            "http" => Ok(Driver::Http),
            other => Err(ConfigError::UnknownDriver(other.to_string())),
        }
    }
}

/// Header name overrides for the inbound ingress adapter (§6).
#[derive(Debug, Clone)]
pub struct HeaderNames {
    pub message_id: String,
    pub source_service: String,
    pub event_type: String,
    pub custom_prefix: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            message_id: "X-Message-Id".to_string(),
            source_service: "X-Source-Service".to_string(),
            event_type: "X-Event-Type".to_string(),
            custom_prefix: "X-".to_string(),
        }
    }
}

/// Batch-processing knobs shared by the relay and the dispatcher.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub batch_size: i64,
    pub max_retries: i32,
    /// Advisory minimum seconds between retries of the same row; actual
    /// cadence is a function of how often the CLI/cron invokes a batch.
    pub retry_delay_secs: u64,
    pub visibility_timeout_secs: i64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 5,
            retry_delay_secs: 30,
            visibility_timeout_secs: 120,
        }
    }
}

/// Top-level configuration, assembled once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub service_name: String,
    /// Bind address for the ingress HTTP server (`outboxkit-ingress`'s own
    /// binary); unused by the CLI binary.
    pub host: String,
    pub port: u16,
    pub driver: Driver,
    /// Logical service name -> base URL, used by the HTTP transport to
    /// resolve `destination_service`.
    pub services: HashMap<String, String>,
    pub headers: HeaderNames,
    pub processing: ProcessingConfig,
    /// Event types the process should register handlers for; the CLI/ingress
    /// binary maps each name to a constructor (handlers themselves are code,
    /// not config — this is the allowlist of which ones to wire up).
    pub enabled_handlers: Vec<String>,
}

impl Config {
    /// Load configuration from the environment, calling `dotenvy::dotenv()`
    /// once so a local `.env` file is picked up the same way the rest of
    /// the workspace does it.
    pub fn from_env() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();

        let database_url = require("DATABASE_URL")?;
        let db_max_connections = parse_or("OUTBOXKIT_DB_MAX_CONNECTIONS", 10u32)?;
        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "outboxkit".to_string());
        let host = env::var("OUTBOXKIT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_or("OUTBOXKIT_PORT", 8080u16)?;
        let driver = Driver::parse(&env::var("OUTBOXKIT_DRIVER").unwrap_or_else(|_| "http".to_string()))?;

        let services = parse_services();

        let headers = HeaderNames {
            message_id: env::var("OUTBOXKIT_HEADER_MESSAGE_ID")
                .unwrap_or_else(|_| HeaderNames::default().message_id),
            source_service: env::var("OUTBOXKIT_HEADER_SOURCE_SERVICE")
                .unwrap_or_else(|_| HeaderNames::default().source_service),
            event_type: env::var("OUTBOXKIT_HEADER_EVENT_TYPE")
                .unwrap_or_else(|_| HeaderNames::default().event_type),
            custom_prefix: env::var("OUTBOXKIT_HEADER_CUSTOM_PREFIX")
                .unwrap_or_else(|_| HeaderNames::default().custom_prefix),
        };

        let defaults = ProcessingConfig::default();
        let processing = ProcessingConfig {
            batch_size: parse_or("OUTBOXKIT_BATCH_SIZE", defaults.batch_size)?,
            max_retries: parse_or("OUTBOXKIT_MAX_RETRIES", defaults.max_retries)?,
            retry_delay_secs: parse_or("OUTBOXKIT_RETRY_DELAY_SECS", defaults.retry_delay_secs)?,
            visibility_timeout_secs: parse_or(
                "OUTBOXKIT_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout_secs,
            )?,
        };

        let enabled_handlers = env::var("OUTBOXKIT_INBOX_HANDLERS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self {
            database_url,
            db_max_connections,
            service_name,
            host,
            port,
            driver,
            services,
            headers,
            processing,
            enabled_handlers,
        })
    }

    /// Resolve a `destination_service` to a base URL, the HTTP transport's
    /// configuration-error path (§4.3): absent mapping is not retried.
    pub fn resolve_service_url(&self, name: &str) -> ConfigResult<&str> {
        self.services
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingServiceUrl(name.to_string()))
    }
}

fn require(key: &'static str) -> ConfigResult<String> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parse_or<T>(key: &'static str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidInt(key, e)),
        Err(_) => Ok(default),
    }
}

/// `SERVICES_<NAME>_URL=...` environment variables populate the
/// `services[name]` map (§6); unlike the scalar fields there is no fixed
/// set of keys, so we scan the environment once rather than `env::var`-ing
/// a specific name.
fn parse_services() -> HashMap<String, String> {
    const PREFIX: &str = "OUTBOXKIT_SERVICE_";
    const SUFFIX: &str = "_URL";

    env::vars()
        .filter_map(|(key, value)| {
            let rest = key.strip_prefix(PREFIX)?;
            let name = rest.strip_suffix(SUFFIX)?;
            Some((name.to_lowercase(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for (key, _) in env::vars() {
            if key.starts_with("OUTBOXKIT_") || key == "DATABASE_URL" || key == "SERVICE_NAME" {
                unsafe { env::remove_var(key) };
            }
        }
    }

    #[test]
    #[serial]
    fn missing_database_url_is_an_error() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    #[serial]
    fn unknown_driver_is_fatal() {
        clear_env();
        unsafe {
            env::set_var("DATABASE_URL", "postgres://localhost/test");
            env::set_var("OUTBOXKIT_DRIVER", "carrier-pigeon");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDriver(ref d) if d == "carrier-pigeon"));
        clear_env();
    }

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        clear_env();
        unsafe { env::set_var("DATABASE_URL", "postgres://localhost/test") };
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.processing.max_retries, 5);
        assert_eq!(cfg.service_name, "outboxkit");
        clear_env();
    }

    #[test]
    #[serial]
    fn services_map_is_populated_from_prefixed_vars() {
        clear_env();
        unsafe {
            env::set_var("DATABASE_URL", "postgres://localhost/test");
            env::set_var("OUTBOXKIT_SERVICE_BILLING_URL", "https://billing.internal");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(
            cfg.resolve_service_url("billing").unwrap(),
            "https://billing.internal"
        );
        assert!(matches!(
            cfg.resolve_service_url("unknown"),
            Err(ConfigError::MissingServiceUrl(_))
        ));
        clear_env();
    }
}
