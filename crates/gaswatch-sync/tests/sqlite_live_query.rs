//! End-to-end tests of LiveQuery over the SQLite record store

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;

use gaswatch_cache::{DatabasePool, ReadPolicy, SqliteDataService};
use gaswatch_core::domain::{CollectionQuery, DocumentQuery, ErrorKind, Phase, SyncState};
use gaswatch_sync::{FaultBus, LiveQuery};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, PartialEq)]
struct Device {
    id: String,
    status: String,
}

async fn setup() -> (DatabasePool, Arc<SqliteDataService>) {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let service = Arc::new(SqliteDataService::new(pool.pool().clone()));
    (pool, service)
}

async fn wait_until(
    rx: &mut watch::Receiver<SyncState>,
    predicate: impl FnMut(&SyncState) -> bool,
) -> SyncState {
    let state = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
    (*state).clone()
}

fn devices(state: &SyncState) -> Vec<Device> {
    state
        .data
        .as_ref()
        .map(|data| data.decode_rows().expect("rows decode"))
        .unwrap_or_default()
}

#[tokio::test]
async fn test_collection_follows_writes() {
    let (_pool, service) = setup().await;
    service
        .insert("devices", json!({ "id": "d1", "user_id": "u1", "status": "ok" }))
        .await
        .unwrap();

    let live = LiveQuery::new(service.clone(), service.clone()).with_fault_bus(FaultBus::new());
    let mut rx = live.observe(Some(
        CollectionQuery::new("devices").filter("user_id", "u1").into(),
    ));

    let state = wait_until(&mut rx, |s| s.phase() == Phase::Ready).await;
    assert_eq!(devices(&state).len(), 1);
    assert_eq!(service.open_subscriptions(), 1);

    service
        .update("devices", "d1", json!({ "status": "leak" }))
        .await
        .unwrap();
    let state = wait_until(&mut rx, |s| {
        s.phase() == Phase::Ready && devices(s).iter().any(|d| d.status == "leak")
    })
    .await;
    assert_eq!(
        devices(&state),
        vec![Device {
            id: "d1".into(),
            status: "leak".into()
        }]
    );

    // Rows of other users do not match the filter but still refetch.
    service
        .insert("devices", json!({ "id": "d2", "user_id": "u2", "status": "ok" }))
        .await
        .unwrap();
    service.delete("devices", "d1").await.unwrap();
    wait_until(&mut rx, |s| s.phase() == Phase::Ready && devices(s).is_empty()).await;

    drop(live);
    assert_eq!(service.open_subscriptions(), 0);
}

#[tokio::test]
async fn test_document_appears_after_insert() {
    let (_pool, service) = setup().await;
    let live = LiveQuery::new(service.clone(), service.clone()).with_fault_bus(FaultBus::new());

    let mut rx = live.observe(Some(DocumentQuery::new("devices", "d9").into()));
    let state = wait_until(&mut rx, |s| s.phase() == Phase::Ready).await;
    assert!(state.data.is_none());

    service
        .insert("devices", json!({ "id": "d9", "status": "ok" }))
        .await
        .unwrap();

    let state = wait_until(&mut rx, |s| s.data.is_some()).await;
    let device: Option<Device> = state
        .data
        .as_ref()
        .and_then(|data| data.decode_document().expect("document decodes"));
    assert_eq!(device.map(|d| d.id), Some("d9".to_string()));
}

#[tokio::test]
async fn test_policy_denial_surfaces_as_permission_fault() {
    let pool = DatabasePool::in_memory().await.unwrap();
    let service = Arc::new(
        SqliteDataService::new(pool.pool().clone()).with_policy(ReadPolicy::only(["sensors"])),
    );

    let bus = FaultBus::new();
    let (tx, mut faults) = tokio::sync::mpsc::unbounded_channel();
    let _sub = bus.on(ErrorKind::PermissionDenied, move |fault| {
        let _ = tx.send(fault.resource_path.clone());
    });

    let live = LiveQuery::new(service.clone(), service.clone()).with_fault_bus(bus);
    live.set_descriptor(Some(CollectionQuery::new("devices").into()));

    // The subscription is refused before any read happens.
    let state = live.state();
    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(
        state.error.map(|e| e.kind),
        Some(ErrorKind::PermissionDenied)
    );
    assert_eq!(faults.recv().await, Some("/devices".to_string()));
}
