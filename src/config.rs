//! # Configuration
//!
//! Layered configuration for the orchestration engine: built-in defaults,
//! then an optional TOML file, then `MIGFLOW_`-prefixed environment
//! variables with `__` between the section and the field
//! (`MIGFLOW_DATABASE__URL`, `MIGFLOW_EXECUTION__LEASE_TTL_SECS`). Every
//! section has a working default so tests and embedded deployments can
//! construct a config without any external input.

use crate::error::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigflowConfig {
    /// Database connection and pooling
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Background execution and leasing
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Stuck-flow monitoring
    #[serde(default)]
    pub health: HealthConfig,

    /// HTTP API server
    #[serde(default)]
    pub web: WebConfig,

    /// Log filtering and format
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; empty selects the in-memory store.
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Background runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Execution lease lifetime. Must comfortably exceed the heartbeat
    /// interval or healthy runners lose their own lease.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// How often a running flow renews its lease and touches its master
    /// record.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Fallback per-phase timeout for specs without an explicit one.
    #[serde(default = "default_phase_timeout")]
    pub default_phase_timeout_secs: u64,

    /// Attempts for persistence writes inside the runner before the flow is
    /// marked failed.
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,

    /// Delay between persistence attempts.
    #[serde(default = "default_persist_backoff")]
    pub persist_backoff_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            default_phase_timeout_secs: default_phase_timeout(),
            persist_attempts: default_persist_attempts(),
            persist_backoff_ms: default_persist_backoff(),
        }
    }
}

impl ExecutionConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs as i64)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn default_phase_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.default_phase_timeout_secs)
    }

    pub fn persist_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.persist_backoff_ms)
    }
}

/// Stuck-flow monitor configuration. Thresholds are per-phase: the expected
/// duration from the phase definition times a multiplier, clamped to a
/// floor so short phases are not reclaimed aggressively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Max candidates examined per sweep.
    #[serde(default = "default_scan_batch")]
    pub scan_batch_limit: i64,

    /// Staleness ceiling without a live lease: `expected_duration * this`.
    #[serde(default = "default_stale_multiplier")]
    pub stale_failure_multiplier: f64,

    /// Higher ceiling at which even lease-holding flows are force
    /// cancelled: `expected_duration * this`.
    #[serde(default = "default_force_cancel_multiplier")]
    pub force_cancel_multiplier: f64,

    /// Lower bound for both ceilings.
    #[serde(default = "default_stale_floor")]
    pub staleness_floor_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            scan_interval_secs: default_scan_interval(),
            scan_batch_limit: default_scan_batch(),
            stale_failure_multiplier: default_stale_multiplier(),
            force_cancel_multiplier: default_force_cancel_multiplier(),
            staleness_floor_secs: default_stale_floor(),
        }
    }
}

impl HealthConfig {
    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_secs)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_body_limit")]
    pub request_body_limit_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            request_body_limit_bytes: default_body_limit(),
        }
    }
}

/// Logging configuration consumed by the server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridable by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_lease_ttl() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_phase_timeout() -> u64 {
    3600
}

fn default_persist_attempts() -> u32 {
    3
}

fn default_persist_backoff() -> u64 {
    250
}

fn default_scan_interval() -> u64 {
    60
}

fn default_scan_batch() -> i64 {
    100
}

fn default_stale_multiplier() -> f64 {
    3.0
}

fn default_force_cancel_multiplier() -> f64 {
    10.0
}

fn default_stale_floor() -> u64 {
    900
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_body_limit() -> usize {
    1024 * 1024
}

fn default_log_filter() -> String {
    "info,migflow_core=debug".to_string()
}

impl MigflowConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `MIGFLOW_`-prefixed environment variables (e.g. `MIGFLOW_DATABASE__URL`).
    pub fn load(path: Option<&str>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&MigflowConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Double underscore separates section from field so multi-word
        // field names like `max_connections` survive the split.
        builder = builder.add_source(
            config::Environment::with_prefix("MIGFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Short intervals and small batches for tests.
    pub fn for_testing() -> Self {
        Self {
            execution: ExecutionConfig {
                lease_ttl_secs: 5,
                heartbeat_interval_secs: 1,
                default_phase_timeout_secs: 5,
                persist_attempts: 2,
                persist_backoff_ms: 10,
            },
            health: HealthConfig {
                enabled: true,
                scan_interval_secs: 1,
                scan_batch_limit: 10,
                stale_failure_multiplier: 2.0,
                force_cancel_multiplier: 4.0,
                staleness_floor_secs: 1,
            },
            ..Default::default()
        }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.execution.heartbeat_interval_secs == 0 {
            return Err(OrchestrationError::Configuration {
                reason: "execution.heartbeat_interval_secs must be positive".to_string(),
            });
        }
        if self.execution.lease_ttl_secs <= self.execution.heartbeat_interval_secs {
            return Err(OrchestrationError::Configuration {
                reason: format!(
                    "execution.lease_ttl_secs ({}) must exceed heartbeat_interval_secs ({})",
                    self.execution.lease_ttl_secs, self.execution.heartbeat_interval_secs
                ),
            });
        }
        if self.health.stale_failure_multiplier <= 0.0
            || self.health.force_cancel_multiplier <= self.health.stale_failure_multiplier
        {
            return Err(OrchestrationError::Configuration {
                reason: format!(
                    "health.force_cancel_multiplier ({}) must exceed stale_failure_multiplier ({}), both positive",
                    self.health.force_cancel_multiplier, self.health.stale_failure_multiplier
                ),
            });
        }
        if self.health.scan_batch_limit <= 0 {
            return Err(OrchestrationError::Configuration {
                reason: "health.scan_batch_limit must be positive".to_string(),
            });
        }
        Ok(())
    }
}
