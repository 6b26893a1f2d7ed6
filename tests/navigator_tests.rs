use palimpsest::{
    DocumentId, EngineError, EventDraft, EventNavigator, EventReplayer, EventStore,
    HandlerRegistry, InMemoryEventStore, InMemorySnapshotStore, Payload, SnapshotSerializer,
};
use serde_json::json;
use std::sync::Arc;

fn registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register_handler("append", |mut state, event| {
        if !state["items"].is_array() {
            state["items"] = json!([]);
        }
        let item = event.payload.get("item").cloned().unwrap_or(json!(null));
        state["items"].as_array_mut().unwrap().push(item);
        Ok(state)
    });
    Arc::new(registry)
}

async fn navigator_over(count: u64, cache_capacity: usize) -> EventNavigator {
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let doc = DocumentId::from("doc");

    for i in 0..count {
        let mut payload = Payload::new();
        payload.insert("item".into(), json!(i));
        events
            .insert_event(&doc, EventDraft::new("append", payload))
            .await
            .unwrap();
    }

    let replayer = EventReplayer::new(
        events.clone(),
        snapshots,
        registry(),
        SnapshotSerializer::new(true),
    );
    EventNavigator::new(doc, events, replayer, cache_capacity)
}

#[tokio::test]
async fn undo_redo_symmetry_returns_to_start() {
    let mut nav = navigator_over(10, 10).await;
    let initial = nav.initialize().await.unwrap();
    assert_eq!(nav.current_sequence(), Some(9));

    for _ in 0..4 {
        nav.undo().await.unwrap();
    }
    assert_eq!(nav.current_sequence(), Some(5));

    let mut last = json!(null);
    for _ in 0..4 {
        last = nav.redo().await.unwrap();
    }
    assert_eq!(nav.current_sequence(), Some(9));
    assert_eq!(last, initial);
}

#[tokio::test]
async fn boundaries_raise_the_right_errors() {
    let mut nav = navigator_over(3, 10).await;
    nav.initialize().await.unwrap();

    // Ceiling.
    assert!(matches!(
        nav.redo().await.unwrap_err(),
        EngineError::State(_)
    ));

    // Floor.
    nav.navigate_to_sequence(0).await.unwrap();
    assert!(matches!(
        nav.undo().await.unwrap_err(),
        EngineError::State(_)
    ));

    // Past the end: a caller bug, not a state problem.
    assert!(matches!(
        nav.navigate_to_sequence(4).await.unwrap_err(),
        EngineError::Validation(_)
    ));
}

#[tokio::test]
async fn lru_holds_only_the_most_recent_sequences() {
    let capacity = 10usize;
    let mut nav = navigator_over(20, capacity).await;
    nav.initialize().await.unwrap();

    // Visit capacity + 5 distinct sequences.
    for seq in 0..(capacity as u64 + 5) {
        nav.navigate_to_sequence(seq).await.unwrap();
    }

    let stats = nav.cache_stats();
    assert!(stats.size <= capacity);
    assert_eq!(stats.capacity, capacity);
    let mut held = stats.sequences.clone();
    held.sort_unstable();
    assert_eq!(held, (5u64..15).collect::<Vec<_>>());
}

#[tokio::test]
async fn cached_results_are_isolated_from_caller_mutation() {
    let mut nav = navigator_over(6, 10).await;
    nav.initialize().await.unwrap();

    let mut state = nav.navigate_to_sequence(2).await.unwrap();
    state["items"] = json!("stomped");

    let again = nav.navigate_to_sequence(2).await.unwrap();
    assert_eq!(again["items"], json!([0, 1, 2]));
}

#[tokio::test]
async fn refresh_extends_redo_range() {
    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let doc = DocumentId::from("doc");

    let push = |i: u64| {
        let mut payload = Payload::new();
        payload.insert("item".into(), json!(i));
        EventDraft::new("append", payload)
    };
    for i in 0..3 {
        events.insert_event(&doc, push(i)).await.unwrap();
    }

    let replayer = EventReplayer::new(
        events.clone(),
        snapshots,
        registry(),
        SnapshotSerializer::new(true),
    );
    let mut nav = EventNavigator::new(doc.clone(), events.clone(), replayer, 10);
    nav.initialize().await.unwrap();
    assert!(nav.redo().await.is_err());

    events.insert_event(&doc, push(3)).await.unwrap();
    nav.refresh().await.unwrap();
    let state = nav.redo().await.unwrap();
    assert_eq!(state["items"], json!([0, 1, 2, 3]));
}
