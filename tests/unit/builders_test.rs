//! Tests for builder modules

use qrm_broker::builders::{build_manager, open_store};
use qrm_broker::config::{BrokerConfig, StoreBackendConfig};
use qrm_broker::core::{QrmError, Resource};
use qrm_broker::infra::InMemoryStore;

#[test]
fn test_build_manager_with_memory_store() {
    let cfg = BrokerConfig::default();
    let manager = build_manager(&cfg, |_| Ok(InMemoryStore::new())).unwrap();
    assert_eq!(manager.limits().retention, None);
    assert_eq!(manager.add_resources(vec![Resource::new("res1", "server")]).unwrap(), 1);
}

#[test]
fn test_build_manager_rejects_invalid_config() {
    let cfg = BrokerConfig {
        lock_timeout_ms: 0,
        ..BrokerConfig::default()
    };
    let err = build_manager(&cfg, |_| Ok(InMemoryStore::new())).err().unwrap();
    assert!(matches!(err, QrmError::InvalidRequest(_)));
}

#[test]
fn test_open_store_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = BrokerConfig {
        store: StoreBackendConfig::File {
            path: dir.path().to_path_buf(),
        },
        audit_log: true,
        ..BrokerConfig::default()
    };
    let manager = build_manager(&cfg, open_store).unwrap();
    manager
        .add_resources(vec![Resource::new("res1", "server")])
        .unwrap();
    drop(manager);

    let reopened = build_manager(&cfg, open_store).unwrap();
    let snapshot = reopened.status().unwrap();
    assert_eq!(snapshot.resources.len(), 1);
    assert_eq!(snapshot.resources[0].name, "res1");
}
