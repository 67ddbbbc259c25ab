//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{RetryPolicy, SagaConfig, SecurityContext};

/// How log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Which implementations of the collaborating services to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceMode {
    /// Call the inventory, payment and notification services over HTTP.
    #[default]
    Http,
    /// Use in-process services. For local runs and tests.
    InMemory,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8003`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `SERVICE_MODE`: `http` or `in-memory` (default: `http`)
/// - `INVENTORY_SERVICE_URL`, `PAYMENT_SERVICE_URL`, `NOTIFICATION_SERVICE_URL`
/// - `SERVICE_AUTHORIZATION`: credentials used when resuming sagas at
///   start-up, when no caller is around to supply them
/// - `SERVICE_CALL_TIMEOUT_MS` (default: `5000`)
/// - `SAGA_MAX_ATTEMPTS` (default: `3`), `SAGA_RETRY_MIN_DELAY_MS`
///   (default: `100`), `SAGA_RETRY_MAX_DELAY_MS` (default: `2000`)
/// - `COMPENSATION_MAX_ATTEMPTS` (default: `5`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub service_mode: ServiceMode,
    pub inventory_url: String,
    pub payment_url: String,
    pub notification_url: String,
    pub service_authorization: Option<String>,
    pub call_timeout: Duration,
    pub max_attempts: u32,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    pub compensation_max_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };
        let count = |key: &str, default: u32| {
            parsed(key)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            service_mode: match lookup("SERVICE_MODE").as_deref() {
                Some("in-memory" | "in_memory" | "memory") => ServiceMode::InMemory,
                _ => ServiceMode::Http,
            },
            inventory_url: lookup("INVENTORY_SERVICE_URL").unwrap_or(defaults.inventory_url),
            payment_url: lookup("PAYMENT_SERVICE_URL").unwrap_or(defaults.payment_url),
            notification_url: lookup("NOTIFICATION_SERVICE_URL")
                .unwrap_or(defaults.notification_url),
            service_authorization: lookup("SERVICE_AUTHORIZATION").filter(|v| !v.is_empty()),
            call_timeout: millis("SERVICE_CALL_TIMEOUT_MS", defaults.call_timeout),
            max_attempts: count("SAGA_MAX_ATTEMPTS", defaults.max_attempts),
            retry_min_delay: millis("SAGA_RETRY_MIN_DELAY_MS", defaults.retry_min_delay),
            retry_max_delay: millis("SAGA_RETRY_MAX_DELAY_MS", defaults.retry_max_delay),
            compensation_max_attempts: count(
                "COMPENSATION_MAX_ATTEMPTS",
                defaults.compensation_max_attempts,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the saga timeouts and retry policies.
    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig::default()
            .with_call_timeout(self.call_timeout)
            .with_forward_retry(RetryPolicy::new(
                self.max_attempts,
                self.retry_min_delay,
                self.retry_max_delay,
            ))
            .with_compensation_retry(RetryPolicy::new(
                self.compensation_max_attempts,
                self.retry_min_delay,
                self.retry_max_delay,
            ))
    }

    /// Returns the credentials used for sagas resumed at start-up.
    pub fn service_security(&self) -> SecurityContext {
        match &self.service_authorization {
            Some(authorization) => SecurityContext::new(authorization.clone()),
            None => SecurityContext::anonymous(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8003,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            service_mode: ServiceMode::Http,
            inventory_url: "http://inventory-service:8005".to_string(),
            payment_url: "http://payment-service:8004".to_string(),
            notification_url: "http://notification-service:8006".to_string(),
            service_authorization: None,
            call_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_min_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(2),
            compensation_max_attempts: 5,
        }
    }
}
