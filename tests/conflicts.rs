mod common;

use align_sync::api::{connect, Generation};
use align_sync::conflicts::ConflictWorkspace;
use align_sync::model::{ConflictKind, Resolution};
use align_sync::AlignError;
use common::FakeServer;
use serde_json::json;
use std::collections::BTreeMap;

fn conflict(id: i64, batch: i64) -> serde_json::Value {
    json!({
        "id": id,
        "batch_id": batch,
        "type": "chain",
        "data": {"from": [id * 10], "to": [id * 10 + 1]},
    })
}

fn workspace(server: &std::sync::Arc<FakeServer>) -> ConflictWorkspace {
    ConflictWorkspace::new(connect(Generation::Current, server.clone()), "g1")
}

#[tokio::test]
async fn resolving_refetches_the_unresolved_set() {
    let server = FakeServer::new();
    {
        let mut state = server.state();
        state.conflicts = vec![conflict(1, 0), conflict(2, 0), conflict(3, 1)];
        state.conflicts_after_resolve = Some(vec![conflict(3, 1)]);
    }
    let mut ws = workspace(&server);
    assert_eq!(ws.refresh().await.unwrap().len(), 3);

    let mut decisions = BTreeMap::new();
    decisions.insert("1".to_string(), 0usize);
    decisions.insert("2".to_string(), 1usize);
    let remaining = ws.resolve(&Resolution::Decisions(decisions)).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, 3);

    assert_eq!(ws.conflicts().map(<[_]>::len), Some(1));
    assert_eq!(server.calls("GET alignments/g1/conflicts"), 2);
}

#[tokio::test]
async fn details_are_fetched_once_and_cleared_by_refresh() {
    let server = FakeServer::new();
    server.state().conflicts = vec![conflict(4, 2)];
    let mut ws = workspace(&server);
    ws.refresh().await.unwrap();

    let detail = ws.detail(4).await.unwrap();
    assert!(matches!(detail.kind, ConflictKind::Chain(_)));
    assert_eq!(detail.left, vec!["left a", "left b"]);
    assert_eq!(detail.candidates.len(), 2);
    ws.detail(4).await.unwrap();
    assert_eq!(server.calls("GET alignments/g1/conflicts/4"), 1);

    ws.refresh().await.unwrap();
    ws.detail(4).await.unwrap();
    assert_eq!(server.calls("GET alignments/g1/conflicts/4"), 2);
}

#[tokio::test]
async fn stale_resolution_drops_the_cached_list() {
    let server = FakeServer::new();
    let mut ws = workspace(&server);
    ws.refresh().await.unwrap();
    assert!(ws.conflicts().is_some());

    let err = ws
        .resolve(&Resolution::batches(vec![0]))
        .await
        .unwrap_err();
    assert!(err.is_stale());
    assert!(ws.conflicts().is_none());
}

#[tokio::test]
async fn empty_resolution_is_rejected_locally() {
    let server = FakeServer::new();
    let mut ws = workspace(&server);
    let err = ws
        .resolve(&Resolution::Decisions(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, AlignError::InvalidArgument(_)));
    assert_eq!(server.calls("POST alignments/g1/resolve"), 0);
}
