//! Tests for configuration validation

use std::path::PathBuf;
use std::time::Duration;

use qrm_broker::config::{BrokerConfig, StoreBackendConfig};

#[test]
fn test_default_config_is_valid() {
    let cfg = BrokerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.http_addr.port(), 5555);
    assert_eq!(cfg.management_addr.port(), 8080);
    assert_eq!(cfg.store, StoreBackendConfig::InMemory);
    assert_eq!(cfg.retention_secs, None);
    assert!(!cfg.audit_log);
}

#[test]
fn test_zero_lock_timeout_rejected() {
    let cfg = BrokerConfig {
        lock_timeout_ms: 0,
        ..BrokerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_retention_rejected() {
    let cfg = BrokerConfig {
        retention_secs: Some(0),
        ..BrokerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_shared_listen_address_rejected() {
    let cfg = BrokerConfig {
        management_addr: BrokerConfig::default().http_addr,
        ..BrokerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_empty_store_path_rejected() {
    let cfg = BrokerConfig {
        store: StoreBackendConfig::File {
            path: PathBuf::new(),
        },
        ..BrokerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = BrokerConfig::from_json_str(
        r#"{
            "http_addr": "127.0.0.1:6000",
            "store": {"file": {"path": "/var/lib/qrm"}},
            "retention_secs": 3600,
            "audit_log": true
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.http_addr.port(), 6000);
    assert_eq!(cfg.management_addr.port(), 8080);
    assert_eq!(
        cfg.store,
        StoreBackendConfig::File {
            path: PathBuf::from("/var/lib/qrm")
        }
    );
    assert!(cfg.audit_log);

    let limits = cfg.engine_limits();
    assert_eq!(limits.lock_timeout, Duration::from_millis(5_000));
    assert_eq!(limits.retention, Some(Duration::from_secs(3600)));
    assert_eq!(cfg.maintenance_interval(), Duration::from_secs(30));
}

#[test]
fn test_from_json_str_rejects_invalid() {
    assert!(BrokerConfig::from_json_str("not json").is_err());
    assert!(BrokerConfig::from_json_str(r#"{"maintenance_interval_secs": 0}"#).is_err());
}
