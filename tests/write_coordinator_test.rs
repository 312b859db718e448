//! Integration tests for the write coordinator
//!
//! These tests drive `WriteCoordinator` against `MockServer` and check
//! registration caching, item exclusion, busy handling, status transitions
//! and the connection lifecycle.

use opcda_write::coordinator::{CoordinatorEvent, DropReason, WriteCoordinator, WriteOutcome};
use opcda_write::item::{DeclaredType, EncodedValue, ItemId, TypeTag, WriteItem, WriteRequest};
use opcda_write::status::CoordinatorStatus;
use opcda_write::transport::{MockFailure, MockServer};
use serde_json::json;
use std::sync::Arc;

async fn open_coordinator(server: &MockServer) -> Arc<WriteCoordinator> {
    let coordinator = Arc::new(WriteCoordinator::new("g1", Some(Arc::new(server.clone()))));
    coordinator.init().await.unwrap();
    coordinator
}

fn int_request(ids: &[&str]) -> WriteRequest {
    ids.iter()
        .enumerate()
        .map(|(i, id)| WriteItem::new(*id, i as i64, DeclaredType::Integer))
        .collect()
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test]
async fn test_single_integer_write_on_empty_cache() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    let mut events = coordinator.subscribe_events();

    let request = WriteRequest::new(vec![WriteItem::new("tag1", 42, DeclaredType::Integer)]);
    let outcome = coordinator.write(&request).await;

    let result = outcome.result().unwrap();
    assert!(result.success);
    assert_eq!(result.written, vec![ItemId::new("tag1")]);

    let adds = server.add_calls().await;
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].len(), 1);
    assert_eq!(adds[0][0].item_id, ItemId::new("tag1"));
    assert_eq!(adds[0][0].client_handle, 1);

    let writes = server.write_calls().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].len(), 1);
    assert_eq!(writes[0][0].value, EncodedValue::Raw(json!(42)));
    assert_eq!(writes[0][0].type_tag, TypeTag::Integer);
    assert_eq!(writes[0][0].handle, 1000);

    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Result { success: true }
    );
    assert_eq!(coordinator.status(), CoordinatorStatus::Ready);
}

#[tokio::test]
async fn test_repeated_item_registers_only_once() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    let request = WriteRequest::new(vec![WriteItem::new("tag1", 42, DeclaredType::Integer)]);

    for _ in 0..5 {
        assert!(coordinator.write(&request).await.is_success());
    }

    assert_eq!(server.add_calls().await.len(), 1);
    let writes = server.write_calls().await;
    assert_eq!(writes.len(), 5);
    assert!(writes.iter().all(|batch| batch[0].handle == 1000));
}

#[tokio::test]
async fn test_rejected_item_is_excluded_from_write() {
    let server = MockServer::connected();
    server.reject_item("badTag", 0xC004_0008).await;
    let coordinator = open_coordinator(&server).await;
    let mut events = coordinator.subscribe_events();

    let outcome = coordinator
        .write(&int_request(&["tag1", "badTag", "tag2"]))
        .await;

    let result = outcome.result().unwrap();
    assert!(result.success);
    assert_eq!(result.written, vec![ItemId::new("tag1"), ItemId::new("tag2")]);
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].item_id, ItemId::new("badTag"));
    assert_eq!(result.rejected[0].code, 0xC004_0008);

    match events.recv().await.unwrap() {
        CoordinatorEvent::Warning { item, message } => {
            assert_eq!(item, ItemId::new("badTag"));
            assert!(message.contains("badTag"));
            assert!(message.contains("item ID doesn't conform"));
        }
        other => panic!("expected warning, got {other:?}"),
    }
    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Result { success: true }
    );

    // tag1 and tag2 got handles 1000 and 1001; badTag got none.
    let writes = server.write_calls().await;
    let handles: Vec<_> = writes[0].iter().map(|o| o.handle).collect();
    assert_eq!(handles, vec![1000, 1001]);
    assert!(coordinator.cached_handle(&ItemId::new("badTag")).await.is_none());
}

#[tokio::test]
async fn test_rejected_item_is_retried_on_next_request() {
    let server = MockServer::connected();
    server.reject_item("late", 0xC004_0007).await;
    let coordinator = open_coordinator(&server).await;
    let request = int_request(&["late"]);

    coordinator.write(&request).await;
    coordinator.write(&request).await;
    server.accept_item(&ItemId::new("late")).await;
    coordinator.write(&request).await;
    coordinator.write(&request).await;

    // Two rejected attempts, one success, then cached.
    let adds = server.add_calls().await;
    assert_eq!(adds.len(), 3);
    let client_handles: Vec<_> = adds.iter().map(|call| call[0].client_handle).collect();
    assert_eq!(client_handles, vec![1, 2, 3]);
    assert_eq!(server.write_calls().await.len(), 2);
}

#[tokio::test]
async fn test_write_call_failure_reports_translated_error() {
    let server = MockServer::connected();
    server
        .fail_writes(Some(MockFailure::Status(0xC004_0006)))
        .await;
    let coordinator = open_coordinator(&server).await;
    let mut events = coordinator.subscribe_events();

    let outcome = coordinator.write(&int_request(&["tag1"])).await;

    let result = outcome.result().unwrap();
    assert!(!result.success);
    assert!(result.written.is_empty());
    assert_eq!(
        result.error.as_deref(),
        Some("The Items AccessRights do not allow the operation.")
    );
    assert_eq!(coordinator.status(), CoordinatorStatus::Error);
    assert!(!coordinator.is_writing());

    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Error {
            message: "The Items AccessRights do not allow the operation.".to_string()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Result { success: false }
    );
}

#[tokio::test]
async fn test_unknown_failure_keeps_its_own_message() {
    let server = MockServer::connected();
    server
        .fail_writes(Some(MockFailure::Message("RPC server unavailable".into())))
        .await;
    let coordinator = open_coordinator(&server).await;

    let outcome = coordinator.write(&int_request(&["tag1"])).await;
    assert_eq!(
        outcome.result().unwrap().error.as_deref(),
        Some("RPC server unavailable")
    );
}

#[tokio::test]
async fn test_registration_call_failure_fails_request() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    let mut events = coordinator.subscribe_events();
    server
        .fail_adds(Some(MockFailure::Status(0xC004_0007)))
        .await;

    let outcome = coordinator.write(&int_request(&["tag1", "tag2"])).await;

    let expected = "The item ID is not defined in the server address space (on add or validate) \
                    or no longer exists in the server address space (for read or write).";
    let result = outcome.result().unwrap();
    assert!(!result.success);
    assert!(result.written.is_empty());
    assert_eq!(result.error.as_deref(), Some(expected));
    assert_eq!(coordinator.status(), CoordinatorStatus::Error);
    assert!(!coordinator.is_writing());
    assert!(server.write_calls().await.is_empty());

    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Error {
            message: expected.to_string()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Result { success: false }
    );

    // Nothing was cached, so the next request registers both items again.
    server.fail_adds(None).await;
    assert!(coordinator
        .write(&int_request(&["tag1", "tag2"]))
        .await
        .is_success());
    let adds = server.add_calls().await;
    assert_eq!(adds.len(), 2);
    assert_eq!(adds[1].len(), 2);
}

#[tokio::test]
async fn test_short_registration_answer_fails_request() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    let mut events = coordinator.subscribe_events();
    server.short_adds(true);

    let outcome = coordinator.write(&int_request(&["tag1", "tag2"])).await;

    let expected = "Server returned 1 registration results for 2 items";
    let result = outcome.result().unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(expected));
    assert_eq!(coordinator.status(), CoordinatorStatus::Error);
    assert!(!coordinator.is_writing());
    assert!(server.write_calls().await.is_empty());
    assert_eq!(coordinator.cached_items().await, 0);

    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Error {
            message: expected.to_string()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Result { success: false }
    );
}

#[tokio::test]
async fn test_close_failure_sets_error_and_releases_everything() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    let mut events = coordinator.subscribe_events();
    server
        .fail_ends(Some(MockFailure::Message("RPC server unavailable".into())))
        .await;

    let err = coordinator.close().await.unwrap_err();
    assert_eq!(err.diagnostic(), "RPC server unavailable");
    assert_eq!(coordinator.status(), CoordinatorStatus::Error);
    assert!(!coordinator.is_open().await);
    assert!(!server.is_busy());
    assert_eq!(server.ended().await, vec!["sync_io", "item_manager", "group"]);

    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Error {
            message: "RPC server unavailable".to_string()
        }
    );
}

// =============================================================================
// Status transitions
// =============================================================================

#[tokio::test]
async fn test_status_recovers_after_failed_write() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    server
        .fail_writes(Some(MockFailure::Status(0xC004_000B)))
        .await;

    coordinator.write(&int_request(&["tag1"])).await;
    assert_eq!(coordinator.status(), CoordinatorStatus::Error);

    server.fail_writes(None).await;
    assert!(coordinator.write(&int_request(&["tag1"])).await.is_success());
    assert_eq!(coordinator.status(), CoordinatorStatus::Ready);

    // The item registered during the failed request stays cached.
    assert_eq!(server.add_calls().await.len(), 1);
}

#[tokio::test]
async fn test_string_values_are_wrapped() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    let request = WriteRequest::from_json(
        r#"[{"itemID": "Bucket.Name", "value": "north", "type": "string"},
            {"itemID": "Bucket.Flag", "value": false, "type": "boolean"}]"#,
    )
    .unwrap();

    assert!(coordinator.write(&request).await.is_success());

    let batch = &server.write_calls().await[0];
    assert!(matches!(&batch[0].value, EncodedValue::ComString(s) if s.as_str() == "north"));
    assert_eq!(batch[0].type_tag, TypeTag::ComString);
    assert_eq!(batch[1].value, EncodedValue::Raw(json!(false)));
    assert_eq!(batch[1].type_tag, TypeTag::Boolean);
}

// =============================================================================
// Busy exclusion
// =============================================================================

#[tokio::test]
async fn test_concurrent_write_is_dropped() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    let mut events = coordinator.subscribe_events();
    server.hold_writes();

    let first = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.write(&int_request(&["tag1"])).await })
    };
    server.wait_for_writes_entered(1).await;
    assert!(coordinator.is_writing());
    assert_eq!(coordinator.status(), CoordinatorStatus::Writing);

    let second = coordinator.write(&int_request(&["tag2"])).await;
    assert_eq!(second, WriteOutcome::Dropped(DropReason::Busy));

    server.release_writes();
    let first = first.await.unwrap();
    assert!(first.is_success());
    assert!(!coordinator.is_writing());

    assert_eq!(
        events.recv().await.unwrap(),
        CoordinatorEvent::Result { success: true }
    );
    assert!(events.try_recv().is_err());

    // tag2 was never registered or written.
    assert_eq!(server.add_calls().await.len(), 1);
    assert_eq!(server.write_calls().await.len(), 1);
}

#[tokio::test]
async fn test_close_waits_for_in_flight_write() {
    let server = MockServer::connected();
    let coordinator = open_coordinator(&server).await;
    server.hold_writes();

    let write = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.write(&int_request(&["tag1"])).await })
    };
    server.wait_for_writes_entered(1).await;

    let close = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.close().await })
    };
    tokio::task::yield_now().await;
    assert!(server.ended().await.is_empty());

    server.release_writes();
    assert!(write.await.unwrap().is_success());
    close.await.unwrap().unwrap();
    assert_eq!(server.ended().await, vec!["sync_io", "item_manager", "group"]);
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test]
async fn test_follows_connection_manager_status() {
    let server = MockServer::new();
    let coordinator = Arc::new(WriteCoordinator::new("g1", Some(Arc::new(server.clone()))));
    let mut status = coordinator.subscribe_status();

    let listener = coordinator.start().unwrap();
    status
        .wait_for(|s| *s == CoordinatorStatus::Ready)
        .await
        .unwrap();
    assert_eq!(server.reconnect_requests(), 1);
    assert_eq!(server.groups_opened().await, vec!["g1".to_string()]);

    coordinator.write(&int_request(&["tag1"])).await;
    assert_eq!(coordinator.cached_items().await, 1);

    server.disconnect();
    status
        .wait_for(|s| *s == CoordinatorStatus::Disconnected)
        .await
        .unwrap();
    assert_eq!(
        coordinator.write(&int_request(&["tag1"])).await,
        WriteOutcome::Dropped(DropReason::NotConnected)
    );

    server.announce(opcda_write::transport::ConnectionStatus::Connecting);
    status
        .wait_for(|s| *s == CoordinatorStatus::Connecting)
        .await
        .unwrap();

    server.connect();
    status
        .wait_for(|s| *s == CoordinatorStatus::Ready)
        .await
        .unwrap();

    // The rebuilt session starts with an empty cache.
    assert_eq!(server.groups_opened().await.len(), 2);
    assert_eq!(coordinator.cached_items().await, 0);
    assert_eq!(server.ended().await, vec!["sync_io", "item_manager", "group"]);

    coordinator.close().await.unwrap();
    listener.await.unwrap();
    assert!(!server.is_busy());
}

#[tokio::test]
async fn test_unconfigured_coordinator_never_starts() {
    let coordinator = Arc::new(WriteCoordinator::new("g1", None));
    assert!(coordinator.start().is_none());
    assert_eq!(coordinator.status(), CoordinatorStatus::Error);
    assert_eq!(
        coordinator.write(&int_request(&["tag1"])).await,
        WriteOutcome::Dropped(DropReason::Unconfigured)
    );
}
