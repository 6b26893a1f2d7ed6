use palimpsest::{
    DocumentId, EventDraft, EventReplayer, EventStore, HandlerRegistry, InMemoryEventStore,
    InMemorySnapshotStore, Payload, SnapshotManager, SnapshotSerializer,
};
use serde_json::json;
use std::sync::Arc;

fn registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register_handler("cell.set", |mut state, event| {
        let key = event
            .payload
            .get("key")
            .and_then(|k| k.as_str())
            .ok_or("missing key")?
            .to_string();
        let value = event.payload.get("value").cloned().unwrap_or(json!(null));
        state[key] = value;
        Ok(state)
    });
    Arc::new(registry)
}

fn set_draft(key: &str, value: i64) -> EventDraft {
    let mut payload = Payload::new();
    payload.insert("key".into(), json!(key));
    payload.insert("value".into(), json!(value));
    EventDraft::new("cell.set", payload)
}

async fn seed_events(store: &InMemoryEventStore, doc: &DocumentId, count: u64) {
    for i in 0..count {
        store
            .insert_event(doc, set_draft(&format!("k{}", i % 7), i as i64))
            .await
            .unwrap();
    }
}

fn replayer(
    events: Arc<InMemoryEventStore>,
    snapshots: Arc<InMemorySnapshotStore>,
) -> EventReplayer {
    EventReplayer::new(events, snapshots, registry(), SnapshotSerializer::new(true))
}

#[tokio::test]
async fn replay_is_deterministic() {
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let doc = DocumentId::from("doc");
    seed_events(&events, &doc, 50).await;

    let replayer = replayer(events, snapshots);
    let first = replayer.replay(&doc, 0, Some(49)).await.unwrap();
    let second = replayer.replay(&doc, 0, Some(49)).await.unwrap();

    assert_eq!(first.state, second.state);
    assert!(!first.has_issues());
}

#[tokio::test]
async fn snapshot_replay_equals_full_replay_with_zero_delta() {
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let doc = DocumentId::from("doc");
    seed_events(&events, &doc, 20).await;

    let replayer = replayer(events.clone(), snapshots.clone());

    // Take a real snapshot at sequence 9 (after 10 events).
    let at_9 = replayer.replay(&doc, 0, Some(9)).await.unwrap().state;
    let manager = SnapshotManager::new(snapshots.clone(), SnapshotSerializer::new(true), 10, 10);
    manager.create_snapshot(&doc, 9, &at_9).await;

    let full = replayer.replay(&doc, 0, Some(9)).await.unwrap();
    let assisted = replayer.replay_from_snapshot(&doc, 9).await.unwrap();

    assert_eq!(full.state, assisted.state);
    assert!(!assisted.has_issues());
}

#[tokio::test]
async fn corrupt_snapshot_falls_back_to_older_one() {
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let doc = DocumentId::from("doc");
    seed_events(&events, &doc, 20).await;

    let replayer = replayer(events.clone(), snapshots.clone());
    let manager = SnapshotManager::new(snapshots.clone(), SnapshotSerializer::new(true), 5, 10);
    for seq in [4u64, 9, 14] {
        let state = replayer.replay(&doc, 0, Some(seq)).await.unwrap().state;
        manager.create_snapshot(&doc, seq, &state).await;
    }

    // Newest two snapshots rot on disk.
    snapshots.corrupt(&doc, 14, b"garbage".to_vec());
    snapshots.corrupt(&doc, 9, b"more garbage".to_vec());

    let expected = replayer.replay(&doc, 0, Some(19)).await.unwrap().state;
    let recovered = replayer.replay_from_snapshot(&doc, 19).await.unwrap();

    assert_eq!(recovered.state, expected);
    // Both corrupt snapshots are named in warnings; events were not skipped.
    assert_eq!(recovered.warnings.len(), 2);
    assert!(recovered.warnings[0].contains("14"));
    assert!(recovered.warnings[1].contains("9"));
    assert!(recovered.skipped_sequences.is_empty());
}

#[tokio::test]
async fn all_snapshots_corrupt_degrades_to_full_replay() {
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let doc = DocumentId::from("doc");
    seed_events(&events, &doc, 12).await;

    let replayer = replayer(events.clone(), snapshots.clone());
    let manager = SnapshotManager::new(snapshots.clone(), SnapshotSerializer::new(true), 5, 10);
    for seq in [4u64, 9] {
        let state = replayer.replay(&doc, 0, Some(seq)).await.unwrap().state;
        manager.create_snapshot(&doc, seq, &state).await;
    }
    snapshots.corrupt(&doc, 4, vec![0xde, 0xad]);
    snapshots.corrupt(&doc, 9, vec![0xbe, 0xef]);

    let expected = replayer.replay(&doc, 0, Some(11)).await.unwrap().state;
    let recovered = replayer.replay_from_snapshot(&doc, 11).await.unwrap();

    assert_eq!(recovered.state, expected);
    assert_eq!(recovered.warnings.len(), 2);
}

#[tokio::test]
async fn replay_to_latest_with_open_end() {
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let doc = DocumentId::from("doc");
    seed_events(&events, &doc, 8).await;

    let replayer = replayer(events, snapshots);
    let open = replayer.replay(&doc, 0, None).await.unwrap();
    let closed = replayer.replay(&doc, 0, Some(7)).await.unwrap();
    assert_eq!(open.state, closed.state);
}
