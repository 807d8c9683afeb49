//! Builders to construct the engine from configuration.

use crate::config::{BrokerConfig, StoreBackendConfig};
use crate::core::{KvStore, QrmError, QueueManager, TracingAuditSink};
use crate::infra::store::{InMemoryStore, JsonlStore};

/// Stream name of the file-backed store log.
pub const STORE_STREAM: &str = "qrm";

/// Open the store selected by configuration.
pub fn open_store(cfg: &StoreBackendConfig) -> Result<Box<dyn KvStore>, QrmError> {
    match cfg {
        StoreBackendConfig::InMemory => Ok(Box::new(InMemoryStore::new())),
        StoreBackendConfig::File { path } => Ok(Box::new(JsonlStore::open(path, STORE_STREAM)?)),
    }
}

/// Build the engine from configuration using the provided store factory.
pub fn build_manager<S, FS>(cfg: &BrokerConfig, store_factory: FS) -> Result<QueueManager<S>, QrmError>
where
    S: KvStore + 'static,
    FS: FnOnce(&StoreBackendConfig) -> Result<S, QrmError>,
{
    cfg.validate()
        .map_err(|e| QrmError::InvalidRequest(format!("config invalid: {e}")))?;

    let store = store_factory(&cfg.store)?;
    let manager = QueueManager::new(store, cfg.engine_limits());
    if cfg.audit_log {
        Ok(manager.with_audit(Box::new(TracingAuditSink)))
    } else {
        Ok(manager)
    }
}
