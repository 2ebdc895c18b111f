//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use adapters::HealthConfig;
use queue::RouterConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL for sagas and the audit log; in-memory if unset
/// - `QUEUE_DURABLE`: `false` runs every job inline (default: `true`)
/// - `CIRCUIT_FAILURE_THRESHOLD`: failures that open a circuit (default: `5`)
/// - `CIRCUIT_COOLDOWN_MS`: open-circuit cool-down (default: `30000`)
/// - `BACKOFF_BASE_MS`: adapter retry backoff base (default: `1000`)
/// - `QUEUE_MAX_DELIVERIES`: deliveries per job (default: `3`)
/// - `HEALTH_PROBE_INTERVAL_MS`: background probe period (default: `30000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub queue_durable: bool,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    pub backoff_base: Duration,
    pub queue_max_deliveries: u32,
    pub probe_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            queue_durable: env_or("QUEUE_DURABLE", defaults.queue_durable),
            circuit_failure_threshold: env_or(
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_failure_threshold,
            ),
            circuit_cooldown: millis_or("CIRCUIT_COOLDOWN_MS", defaults.circuit_cooldown),
            backoff_base: millis_or("BACKOFF_BASE_MS", defaults.backoff_base),
            queue_max_deliveries: env_or("QUEUE_MAX_DELIVERIES", defaults.queue_max_deliveries),
            probe_interval: millis_or("HEALTH_PROBE_INTERVAL_MS", defaults.probe_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: self.circuit_cooldown,
            ..HealthConfig::default()
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_deliveries: self.queue_max_deliveries,
            ..RouterConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            queue_durable: true,
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(30),
            backoff_base: Duration::from_millis(1000),
            queue_max_deliveries: 3,
            probe_interval: Duration::from_secs(30),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn millis_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.queue_durable);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_component_configs() {
        let config = Config {
            circuit_failure_threshold: 2,
            circuit_cooldown: Duration::from_millis(500),
            queue_max_deliveries: 7,
            ..Config::default()
        };
        let health = config.health_config();
        assert_eq!(health.failure_threshold, 2);
        assert_eq!(health.cooldown, Duration::from_millis(500));
        assert_eq!(health.degraded_latency, HealthConfig::default().degraded_latency);
        assert_eq!(config.router_config().max_deliveries, 7);
    }
}
