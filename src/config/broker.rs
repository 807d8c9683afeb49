//! Broker configuration structures.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::EngineLimits;

/// Store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// In-memory store for development/testing; state is lost on restart.
    InMemory,
    /// File-backed JSON-lines store.
    File {
        /// Directory holding the store log.
        path: PathBuf,
    },
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5555))
}

fn default_management_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

const fn default_maintenance_interval_secs() -> u64 {
    30
}

/// Root broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Listen address of the client-facing HTTP surface.
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
    /// Listen address of the management HTTP surface.
    #[serde(default = "default_management_addr")]
    pub management_addr: SocketAddr,
    /// Store backend selection.
    #[serde(default = "BrokerConfig::default_store")]
    pub store: StoreBackendConfig,
    /// Upper bound on waiting for the broker lock, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Retention for cancelled/errored ledger entries, in seconds. Unset keeps them forever.
    #[serde(default)]
    pub retention_secs: Option<u64>,
    /// Period of the maintenance loop (re-match and eviction), in seconds.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    /// Emit request lifecycle and management audit events through tracing.
    #[serde(default)]
    pub audit_log: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            management_addr: default_management_addr(),
            store: Self::default_store(),
            lock_timeout_ms: default_lock_timeout_ms(),
            retention_secs: None,
            maintenance_interval_secs: default_maintenance_interval_secs(),
            audit_log: false,
        }
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{name}: {e}")),
        _ => Ok(None),
    }
}

impl BrokerConfig {
    const fn default_store() -> StoreBackendConfig {
        StoreBackendConfig::InMemory
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout_ms == 0 {
            return Err("lock_timeout_ms must be greater than 0".into());
        }
        if self.maintenance_interval_secs == 0 {
            return Err("maintenance_interval_secs must be greater than 0".into());
        }
        if self.retention_secs == Some(0) {
            return Err("retention_secs must be greater than 0 when set".into());
        }
        if self.http_addr == self.management_addr {
            return Err("http_addr and management_addr must differ".into());
        }
        if let StoreBackendConfig::File { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err("file store path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse broker configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `QRM_*` environment variables on top of the defaults.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(addr) = env_var("QRM_HTTP_ADDR")? {
            cfg.http_addr = addr;
        }
        if let Some(addr) = env_var("QRM_MANAGEMENT_ADDR")? {
            cfg.management_addr = addr;
        }
        if let Some(path) = env_var::<PathBuf>("QRM_STORE_PATH")? {
            cfg.store = StoreBackendConfig::File { path };
        }
        if let Some(ms) = env_var("QRM_LOCK_TIMEOUT_MS")? {
            cfg.lock_timeout_ms = ms;
        }
        if let Some(secs) = env_var("QRM_RETENTION_SECS")? {
            cfg.retention_secs = Some(secs);
        }
        if let Some(secs) = env_var("QRM_MAINTENANCE_INTERVAL_SECS")? {
            cfg.maintenance_interval_secs = secs;
        }
        if let Some(enabled) = env_var("QRM_AUDIT_LOG")? {
            cfg.audit_log = enabled;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Engine limits derived from this configuration.
    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            retention: self.retention_secs.map(Duration::from_secs),
        }
    }

    /// Maintenance loop period.
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}
