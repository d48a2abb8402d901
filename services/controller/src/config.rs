//! Controller configuration, loaded from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use flotilla_reconcile::{DEFAULT_DISRUPTION_INTERVAL, DEFAULT_RECONCILE_INTERVAL};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,

    /// Name of the cluster this controller manages; stamped into the
    /// ownership tags of every launched instance.
    pub cluster: String,

    /// Path to the pool definition file (TOML).
    pub pool_file: PathBuf,

    pub reconcile_interval: Duration,
    pub disruption_interval: Duration,
    pub catalog_refresh_interval: Duration,
    pub interruption_poll_interval: Duration,

    /// Event bus channel capacity.
    pub event_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("FLOTILLA_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid FLOTILLA_LISTEN_ADDR")?;

        let log_level = std::env::var("FLOTILLA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let cluster = std::env::var("FLOTILLA_CLUSTER").unwrap_or_else(|_| "default".to_string());

        let pool_file = std::env::var("FLOTILLA_POOL_FILE")
            .unwrap_or_else(|_| "pools.toml".to_string())
            .into();

        let reconcile_interval =
            env_duration_secs("FLOTILLA_RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL)?;
        let disruption_interval =
            env_duration_secs("FLOTILLA_DISRUPTION_INTERVAL_SECS", DEFAULT_DISRUPTION_INTERVAL)?;
        let catalog_refresh_interval =
            env_duration_secs("FLOTILLA_CATALOG_REFRESH_SECS", Duration::from_secs(60))?;
        let interruption_poll_interval =
            env_duration_secs("FLOTILLA_INTERRUPTION_POLL_SECS", Duration::from_secs(5))?;

        let event_capacity = match std::env::var("FLOTILLA_EVENT_CAPACITY") {
            Ok(raw) => raw.parse().context("invalid FLOTILLA_EVENT_CAPACITY")?,
            Err(_) => 256,
        };

        Ok(Self {
            listen_addr,
            log_level,
            cluster,
            pool_file,
            reconcile_interval,
            disruption_interval,
            catalog_refresh_interval,
            interruption_poll_interval,
            event_capacity,
        })
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw.parse().with_context(|| format!("invalid {key}"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
