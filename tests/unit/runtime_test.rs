//! Tests for spawner and maintenance utilities

use std::time::Duration;

use qrm_broker::core::{EngineLimits, QrmIfc, QueueManager, Resource, ResourceSpec, ResourcesRequest, ServerStatus};
use qrm_broker::infra::InMemoryStore;
use qrm_broker::runtime::{run_maintenance_pass, spawn_maintenance, Spawn, TokioSpawner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test]
async fn test_maintenance_pass_evicts_expired_entries() {
    let manager = QueueManager::new(
        InMemoryStore::new(),
        EngineLimits {
            lock_timeout: Duration::from_secs(1),
            retention: Some(Duration::from_millis(1)),
        },
    );
    manager
        .add_resources(vec![Resource::new("res1", "server")])
        .unwrap();
    manager.set_server_status(ServerStatus::Disabled).unwrap();

    let queued = manager
        .new_request(ResourcesRequest::new("t", vec![ResourceSpec::by_type("server", 1)]))
        .await
        .unwrap();
    let doomed = manager
        .new_request(ResourcesRequest::new("t", vec![ResourceSpec::by_name("res1")]))
        .await
        .unwrap();
    manager.cancel_request(&doomed.token).await.unwrap();

    manager.set_server_status(ServerStatus::Active).unwrap();
    assert!(manager.is_request_active(&queued.token).await.unwrap());

    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = run_maintenance_pass(&manager);
    assert_eq!(report.activated, 0);
    assert_eq!(report.evicted, 1);
    assert!(manager.get_filled_request(&doomed.token).await.is_err());
}

#[tokio::test]
async fn test_maintenance_loop_stops_on_shutdown() {
    let manager = QueueManager::new(InMemoryStore::new(), EngineLimits::default());
    let handle = spawn_maintenance(manager, Duration::from_millis(10), &TokioSpawner::current());
    assert!(!handle.is_shutdown());
    handle.shutdown();
    assert!(handle.is_shutdown());
    tokio::time::sleep(Duration::from_millis(30)).await;
}
