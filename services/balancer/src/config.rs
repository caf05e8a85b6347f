//! Balancer configuration (env-driven).

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::health::{DEFAULT_CHECK_INTERVAL, DEFAULT_PROBE_CONCURRENCY, DEFAULT_PROBE_TIMEOUT};
use crate::proxy::DEFAULT_ROTATION_INTERVAL;

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the control API listens on.
    pub listen_addr: SocketAddr,

    /// Path of the persisted service configuration.
    pub data_file: PathBuf,

    /// Interval between health ticks.
    pub check_interval: Duration,

    /// Minimum time between round-robin rotations.
    pub rotation_interval: Duration,

    /// Hard bound for each probe.
    pub probe_timeout: Duration,

    /// Maximum probes in flight per tick.
    pub probe_concurrency: usize,

    /// Optional dashboard asset tree served at `/`.
    pub static_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("STEER_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
            .parse()
            .context("STEER_LISTEN_ADDR must be an address:port pair.")?;

        let data_file = std::env::var("STEER_DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/servers.json"));

        let check_interval = duration_from_env(
            "STEER_CHECK_INTERVAL_MS",
            DEFAULT_CHECK_INTERVAL,
            Duration::from_millis(50),
        )?;

        let rotation_interval = duration_from_env(
            "STEER_ROTATION_INTERVAL_MS",
            DEFAULT_ROTATION_INTERVAL,
            Duration::from_millis(50),
        )?;

        let probe_timeout = duration_from_env(
            "STEER_PROBE_TIMEOUT_MS",
            DEFAULT_PROBE_TIMEOUT,
            Duration::from_millis(10),
        )?;

        let probe_concurrency: usize = std::env::var("STEER_PROBE_CONCURRENCY")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("STEER_PROBE_CONCURRENCY must be an integer.")?
            .unwrap_or(DEFAULT_PROBE_CONCURRENCY)
            .max(1);

        let static_dir = std::env::var("STEER_STATIC_DIR").ok().map(PathBuf::from);

        let log_level = std::env::var("STEER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            data_file,
            check_interval,
            rotation_interval,
            probe_timeout,
            probe_concurrency,
            static_dir,
            log_level,
        })
    }
}

fn duration_from_env(var: &str, default: Duration, floor: Duration) -> Result<Duration> {
    let ms: Option<u64> = std::env::var(var)
        .ok()
        .map(|v| v.parse())
        .transpose()
        .with_context(|| format!("{} must be an integer (milliseconds).", var))?;

    Ok(ms
        .map(Duration::from_millis)
        .unwrap_or(default)
        .max(floor))
}
