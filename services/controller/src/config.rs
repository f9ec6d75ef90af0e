//! Configuration for the rollout controller.
//!
//! Resolved once at startup from environment variables and passed by value;
//! nothing here is mutated after construction.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Admin API listen address.
    pub listen_addr: SocketAddr,

    /// Directory for the durable rollout store. `None` keeps state in
    /// memory (dev only; progress does not survive restarts).
    pub data_dir: Option<String>,

    /// Number of reconciliation workers draining the queue.
    pub workers: usize,

    /// Interval for the periodic full resync (every rollout re-enqueued).
    pub resync_interval: Duration,

    /// Superseded replica sets retained per rollout before pruning.
    pub history_limit: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("TIDEWAY_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8400".to_string())
            .parse()
            .context("invalid TIDEWAY_LISTEN_ADDR")?;

        let data_dir = std::env::var("TIDEWAY_DATA_DIR").ok();

        let workers = std::env::var("TIDEWAY_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);

        let resync_interval = std::env::var("TIDEWAY_RESYNC_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let history_limit = std::env::var("TIDEWAY_HISTORY_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let log_level = std::env::var("TIDEWAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            data_dir,
            workers,
            resync_interval,
            history_limit,
            log_level,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8400".parse().unwrap_or_else(|_| {
                SocketAddr::from(([127, 0, 0, 1], 8400))
            }),
            data_dir: None,
            workers: 4,
            resync_interval: Duration::from_secs(300),
            history_limit: 10,
            log_level: "info".to_string(),
        }
    }
}
