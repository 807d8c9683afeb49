//! Integration tests for the management plane
//!
//! Covers operator writes under the engine lock, the fill lifecycle driven by
//! job attachment, ledger retention and startup recovery from a file store.

use std::time::Duration;

use qrm_broker::core::{
    EngineLimits, LedgerEntry, QrmError, QrmIfc, QueueManager, RecordStore, RequestStatus,
    Resource, ResourceSpec, ResourceStatus, ResourcesRequest, ServerStatus,
};
use qrm_broker::infra::{InMemoryStore, JsonlStore};

const STREAM: &str = "qrm";

fn manager_with(resources: Vec<Resource>) -> QueueManager<InMemoryStore> {
    let manager = QueueManager::new(InMemoryStore::new(), EngineLimits::default());
    manager.add_resources(resources).unwrap();
    manager
}

fn lab_pool() -> Vec<Resource> {
    vec![Resource::new("res1", "server"), Resource::new("res2", "server")]
}

fn by_type(kind: &str, count: usize) -> ResourcesRequest {
    ResourcesRequest::new("tester", vec![ResourceSpec::by_type(kind, count)])
}

fn resource(manager: &QueueManager<InMemoryStore>, name: &str) -> Resource {
    manager
        .status()
        .unwrap()
        .resources
        .into_iter()
        .find(|r| r.name == name)
        .unwrap()
}

// ============================================================================
// POOL EDITS
// ============================================================================

#[test]
fn test_add_resources_skips_existing_names() {
    let manager = manager_with(lab_pool());
    let added = manager
        .add_resources(vec![
            Resource::new("res1", "device"),
            Resource::new("res3", "server"),
        ])
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(resource(&manager, "res1").resource_type, "server");
    assert_eq!(manager.status().unwrap().resources.len(), 3);
}

#[test]
fn test_add_resources_rejects_allocated_or_blank() {
    let manager = manager_with(vec![]);
    let mut allocated = Resource::new("res1", "server");
    allocated.status = ResourceStatus::Allocated;
    assert!(matches!(
        manager.add_resources(vec![allocated]),
        Err(QrmError::InvalidRequest(_))
    ));
    assert!(matches!(
        manager.add_resources(vec![Resource::new("", "server")]),
        Err(QrmError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_adding_resources_grants_waiting_request() {
    let manager = manager_with(vec![]);
    manager.add_resources(vec![Resource::new("res0", "server")]).unwrap();
    let waiting = manager.new_request(by_type("server", 2)).await.unwrap();
    assert_eq!(waiting.status, RequestStatus::Pending);

    manager.add_resources(lab_pool()).unwrap();

    let granted = manager.get_filled_request(&waiting.token).await.unwrap();
    assert_eq!(granted.status, RequestStatus::Active);
    assert_eq!(granted.assigned_resources, vec!["res0", "res1"]);
}

#[tokio::test]
async fn test_remove_allocated_without_force_is_busy() {
    let manager = manager_with(lab_pool());
    manager.new_request(by_type("server", 1)).await.unwrap();

    let err = manager
        .remove_resources(&["res2".into(), "res1".into()], false)
        .unwrap_err();

    assert!(matches!(err, QrmError::ResourceBusy(_)));
    assert_eq!(manager.status().unwrap().resources.len(), 2);
}

#[tokio::test]
async fn test_forced_remove_fails_the_holder() {
    let manager = manager_with(lab_pool());
    let holder = manager.new_request(by_type("server", 2)).await.unwrap();

    let removed = manager.remove_resources(&["res1".into()], true).unwrap();

    assert_eq!(removed, 1);
    let after = manager.get_filled_request(&holder.token).await.unwrap();
    assert_eq!(after.status, RequestStatus::Error);
    assert!(after.assigned_resources.is_empty());
    assert_eq!(resource(&manager, "res2").status, ResourceStatus::Free);
}

#[tokio::test]
async fn test_remove_fails_pending_requests_it_makes_impossible() {
    let manager = manager_with(vec![
        Resource::new("res1", "server"),
        Resource::new("res2", "server"),
        Resource::new("gpu1", "gpu"),
    ]);
    let holder = manager.new_request(by_type("server", 2)).await.unwrap();
    let gpu_holder = manager.new_request(by_type("gpu", 1)).await.unwrap();
    let wants_res1 = manager
        .new_request(ResourcesRequest::new(
            "tester",
            vec![ResourceSpec::by_name("res1")],
        ))
        .await
        .unwrap();
    let wants_gpu = manager.new_request(by_type("gpu", 1)).await.unwrap();
    let wants_server = manager.new_request(by_type("server", 1)).await.unwrap();
    assert_eq!(manager.status().unwrap().pending_requests, 3);

    manager
        .remove_resources(&["res1".into(), "gpu1".into()], true)
        .unwrap();

    let status_of = |token: String| {
        let manager = manager.clone();
        async move { manager.get_filled_request(&token).await.unwrap().status }
    };
    assert_eq!(status_of(holder.token).await, RequestStatus::Error);
    assert_eq!(status_of(gpu_holder.token).await, RequestStatus::Error);
    assert_eq!(status_of(wants_res1.token).await, RequestStatus::Error);
    assert_eq!(status_of(wants_gpu.token).await, RequestStatus::Error);
    assert_eq!(status_of(wants_server.token.clone()).await, RequestStatus::Active);
    assert_eq!(resource(&manager, "res2").token, Some(wants_server.token));
    assert_eq!(manager.status().unwrap().pending_requests, 0);
}

#[test]
fn test_remove_unknown_is_skipped() {
    let manager = manager_with(lab_pool());
    assert_eq!(manager.remove_resources(&["nope".into()], false).unwrap(), 0);
}

#[tokio::test]
async fn test_force_release_hands_resource_to_next_request() {
    let manager = manager_with(vec![Resource::new("res1", "server")]);
    let holder = manager.new_request(by_type("server", 1)).await.unwrap();
    let waiting = manager.new_request(by_type("server", 1)).await.unwrap();

    let released = manager.force_release("res1").unwrap();

    assert_eq!(released.as_deref(), Some(holder.token.as_str()));
    assert!(!manager.is_request_active(&holder.token).await.unwrap());
    assert!(manager.is_request_active(&waiting.token).await.unwrap());
    assert_eq!(manager.force_release("missing"), Err(QrmError::ResourceNotFound("missing".into())));
}

#[test]
fn test_force_release_of_free_resource_is_noop() {
    let manager = manager_with(lab_pool());
    assert_eq!(manager.force_release("res1").unwrap(), None);
}

// ============================================================================
// STATUS WRITES
// ============================================================================

#[tokio::test]
async fn test_disabled_resource_is_never_matched() {
    let manager = manager_with(lab_pool());
    manager
        .set_resource_status("res1", ResourceStatus::Disabled, false)
        .unwrap();

    let response = manager.new_request(by_type("server", 2)).await.unwrap();
    assert_eq!(response.status, RequestStatus::Pending);

    manager
        .set_resource_status("res1", ResourceStatus::Free, false)
        .unwrap();
    assert!(manager.is_request_active(&response.token).await.unwrap());
}

#[tokio::test]
async fn test_set_status_of_allocated_resource_requires_force() {
    let manager = manager_with(lab_pool());
    let holder = manager.new_request(by_type("server", 1)).await.unwrap();

    assert!(matches!(
        manager.set_resource_status("res1", ResourceStatus::Disabled, false),
        Err(QrmError::ResourceBusy(_))
    ));
    manager
        .set_resource_status("res1", ResourceStatus::Disabled, true)
        .unwrap();

    assert_eq!(resource(&manager, "res1").status, ResourceStatus::Disabled);
    let after = manager.get_filled_request(&holder.token).await.unwrap();
    assert_eq!(after.status, RequestStatus::Error);
}

#[test]
fn test_status_cannot_be_set_to_allocated() {
    let manager = manager_with(lab_pool());
    assert!(matches!(
        manager.set_resource_status("res1", ResourceStatus::Allocated, true),
        Err(QrmError::InvalidRequest(_))
    ));
    assert!(matches!(
        manager.set_resource_status("res9", ResourceStatus::Free, false),
        Err(QrmError::ResourceNotFound(_))
    ));
}

#[test]
fn test_server_status_round_trips_through_snapshot() {
    let manager = manager_with(lab_pool());
    assert_eq!(manager.status().unwrap().server_status, ServerStatus::Active);
    manager.set_server_status(ServerStatus::Disabled).unwrap();
    assert_eq!(manager.status().unwrap().server_status, ServerStatus::Disabled);
}

// ============================================================================
// JOBS AND FILL STATE
// ============================================================================

#[tokio::test]
async fn test_request_is_filled_once_every_resource_has_a_job() {
    let manager = manager_with(lab_pool());
    let response = manager.new_request(by_type("server", 2)).await.unwrap();

    manager.add_job_to_resource("res1", "job-a").unwrap();
    let partial = manager.get_filled_request(&response.token).await.unwrap();
    assert_eq!(partial.status, RequestStatus::Active);

    manager.add_job_to_resource("res2", "job-b").unwrap();
    let filled = manager.get_filled_request(&response.token).await.unwrap();
    assert_eq!(filled.status, RequestStatus::Filled);
    assert!(manager.is_request_active(&response.token).await.unwrap());
    assert_eq!(resource(&manager, "res2").assigned_job.as_deref(), Some("job-b"));

    manager.remove_job("res2").unwrap();
    let back = manager.get_filled_request(&response.token).await.unwrap();
    assert_eq!(back.status, RequestStatus::Active);
}

#[tokio::test]
async fn test_cancel_of_filled_request_clears_jobs() {
    let manager = manager_with(lab_pool());
    let response = manager.new_request(by_type("server", 1)).await.unwrap();
    manager.add_job_to_resource("res1", "job-a").unwrap();

    manager.cancel_request(&response.token).await.unwrap();

    let res1 = resource(&manager, "res1");
    assert_eq!(res1.status, ResourceStatus::Free);
    assert_eq!(res1.assigned_job, None);
}

#[test]
fn test_job_requires_allocated_resource() {
    let manager = manager_with(lab_pool());
    assert!(matches!(
        manager.add_job_to_resource("res1", "job-a"),
        Err(QrmError::InvalidRequest(_))
    ));
    assert!(matches!(
        manager.add_job_to_resource("res9", "job-a"),
        Err(QrmError::ResourceNotFound(_))
    ));
    assert!(manager.remove_job("res1").is_ok());
}

// ============================================================================
// RETENTION
// ============================================================================

#[tokio::test]
async fn test_eviction_removes_only_expired_terminal_entries() {
    let manager = QueueManager::new(
        InMemoryStore::new(),
        EngineLimits {
            lock_timeout: Duration::from_secs(1),
            retention: Some(Duration::from_secs(60)),
        },
    );
    manager.add_resources(lab_pool()).unwrap();
    let cancelled = manager.new_request(by_type("server", 1)).await.unwrap();
    let live = manager.new_request(by_type("server", 1)).await.unwrap();
    manager.cancel_request(&cancelled.token).await.unwrap();

    let now = qrm_broker::util::now_ms();
    assert_eq!(manager.evict_terminal(now).unwrap(), 0);
    assert_eq!(manager.evict_terminal(now + 61_000).unwrap(), 1);

    assert!(matches!(
        manager.get_filled_request(&cancelled.token).await,
        Err(QrmError::TokenNotFound(_))
    ));
    assert!(manager.is_request_active(&live.token).await.unwrap());
}

#[tokio::test]
async fn test_without_retention_nothing_is_evicted() {
    let manager = manager_with(lab_pool());
    let response = manager.new_request(by_type("server", 1)).await.unwrap();
    manager.cancel_request(&response.token).await.unwrap();
    assert_eq!(manager.evict_terminal(u64::MAX).unwrap(), 0);
}

// ============================================================================
// RECOVERY
// ============================================================================

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let token = {
        let store = JsonlStore::open(dir.path(), STREAM).unwrap();
        let manager = QueueManager::new(store, EngineLimits::default());
        manager.add_resources(lab_pool()).unwrap();
        manager.new_request(by_type("server", 1)).await.unwrap().token
    };

    let store = JsonlStore::open(dir.path(), STREAM).unwrap();
    let manager = QueueManager::new(store, EngineLimits::default());
    let report = manager.recover().unwrap();

    assert_eq!(report.freed_resources, 0);
    assert_eq!(report.failed_requests, 0);
    let response = manager.get_filled_request(&token).await.unwrap();
    assert_eq!(response.assigned_resources, vec!["res1"]);
}

#[tokio::test]
async fn test_recovery_repairs_interrupted_writes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = JsonlStore::open(dir.path(), STREAM).unwrap();
        // allocated to a token that never reached the ledger
        let mut orphan = Resource::new("res1", "server");
        orphan.allocate("ghost");
        store.put_resource(&orphan).unwrap();
        store.put_resource(&Resource::new("res2", "server")).unwrap();

        // ledger says active on res2 but the resource record was never written
        let mut request = by_type("server", 1);
        request.token = "broken".into();
        let mut entry = LedgerEntry::new(request, 1);
        entry.activate(vec!["res2".into()], 2);
        store.put_entry(&entry).unwrap();

        let mut waiting = by_type("server", 2);
        waiting.token = "waiting".into();
        store.put_entry(&LedgerEntry::new(waiting, 3)).unwrap();
    }

    let store = JsonlStore::open(dir.path(), STREAM).unwrap();
    let manager = QueueManager::new(store, EngineLimits::default());
    let report = manager.recover().unwrap();

    assert_eq!(report.freed_resources, 1);
    assert_eq!(report.failed_requests, 1);
    assert_eq!(report.activated, 1);

    let broken = manager.get_filled_request("broken").await.unwrap();
    assert_eq!(broken.status, RequestStatus::Error);
    let waiting = manager.get_filled_request("waiting").await.unwrap();
    assert_eq!(waiting.status, RequestStatus::Active);
    assert_eq!(waiting.assigned_resources, vec!["res1", "res2"]);
}
