//! Configuration management for the Backstage workflow engine
//!
//! Handles server configuration, database connection, scheduler cadence and
//! execution limits. Every value can be overridden through environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Schedule reconciler configuration
    pub scheduler: SchedulerConfig,
    /// Execution engine configuration
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (e.g., "sqlite://data/backstage.db").
    /// The file is created if it does not exist yet.
    pub url: String,
}

/// Schedule reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two reconciliation passes
    pub reconcile_interval_secs: u64,
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for a single action handler invocation, in seconds
    pub action_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

impl EngineConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: env_or("BACKSTAGE_RECONCILE_INTERVAL_SECS", 300),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: env_or("BACKSTAGE_ACTION_TIMEOUT_SECS", 30),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("BACKSTAGE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("BACKSTAGE_PORT", 3004),
            },
            database: DatabaseConfig {
                url: std::env::var("BACKSTAGE_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/backstage.db".to_string()),
            },
            scheduler: SchedulerConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Read a numeric environment variable, falling back to `default` when it is
/// unset or unparseable.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_garbage() {
        std::env::set_var("BACKSTAGE_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("BACKSTAGE_TEST_GARBAGE", 42u64), 42);
        assert_eq!(env_or("BACKSTAGE_TEST_UNSET_KEY", 7u16), 7);
    }

    #[test]
    fn durations_are_never_zero() {
        let scheduler = SchedulerConfig { reconcile_interval_secs: 0 };
        assert_eq!(scheduler.reconcile_interval(), Duration::from_secs(1));

        let engine = EngineConfig { action_timeout_secs: 30 };
        assert_eq!(engine.action_timeout(), Duration::from_secs(30));
    }
}
