use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::engine::{MonitorConfig, PropagationConfig};
use crate::protocol::{ProtocolConfig, WorkerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub api_port: u16,
    pub propagation: PropagationConfig,
    pub protocol: ProtocolConfig,
    pub monitor: MonitorConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            api_port: 8080,
            propagation: PropagationConfig::default(),
            protocol: ProtocolConfig::default(),
            monitor: MonitorConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Used by the service binary only; library components take their
    /// config structs explicitly.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut propagation = defaults.propagation;
        propagation.concurrency = env_or("CANCELQ_PROPAGATION_CONCURRENCY", propagation.concurrency);
        propagation.retry.max_attempts =
            env_or("CANCELQ_RETRY_MAX_ATTEMPTS", propagation.retry.max_attempts);
        propagation.retry.initial_backoff_ms = env_or(
            "CANCELQ_RETRY_INITIAL_BACKOFF_MS",
            propagation.retry.initial_backoff_ms,
        );
        propagation.retry.max_backoff_ms =
            env_or("CANCELQ_RETRY_MAX_BACKOFF_MS", propagation.retry.max_backoff_ms);

        let mut protocol = defaults.protocol;
        protocol.retry = propagation.retry.clone();
        protocol.claim_batch_size = env_or("CANCELQ_CLAIM_BATCH_SIZE", protocol.claim_batch_size);

        let mut monitor = defaults.monitor;
        monitor.interval_ms = env_or("CANCELQ_MONITOR_INTERVAL_MS", monitor.interval_ms);
        monitor.grace_period_secs = env_or("CANCELQ_GRACE_PERIOD_SECS", monitor.grace_period_secs);
        monitor.staleness_threshold_secs = env_or(
            "CANCELQ_STALENESS_THRESHOLD_SECS",
            monitor.staleness_threshold_secs,
        );

        let mut worker = defaults.worker;
        worker.poll_interval_ms = env_or("CANCELQ_WORKER_POLL_INTERVAL_MS", worker.poll_interval_ms);

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            max_connections: env_or("CANCELQ_MAX_CONNECTIONS", defaults.max_connections),
            api_port: env_or("CANCELQ_API_PORT", defaults.api_port),
            propagation,
            protocol,
            monitor,
            worker,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring unparsable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
