use netwarden::status::{normalize_identifier, StatusStore};
use netwarden::types::{Health, NodeStatus};

#[test]
fn normalize_strips_protocol_and_trailing_slash() {
    assert_eq!(normalize_identifier("https://host:80/"), "host:80");
    assert_eq!(normalize_identifier("http://host:80"), "host:80");
    assert_eq!(normalize_identifier("host:80"), "host:80");
    assert_eq!(normalize_identifier("https://10.1.2.3:8443/admin/"), "10.1.2.3:8443/admin");
}

#[test]
fn normalize_is_idempotent() {
    let samples = [
        "https://host:80/",
        "http://nas.local",
        "10.0.0.1:3000",
        "https://svc.lan/app/",
        "",
    ];
    for s in samples {
        let once = normalize_identifier(s);
        let twice = normalize_identifier(&once);
        assert_eq!(once, twice, "not idempotent for {s:?}");
    }
}

#[tokio::test]
async fn snapshot_is_a_copy_not_a_live_view() {
    let store = StatusStore::new();
    store
        .insert("a:80".into(), NodeStatus::initial("a:80".into()))
        .await;

    let snap = store.snapshot().await;
    store
        .insert("b:80".into(), NodeStatus::initial("b:80".into()))
        .await;

    assert_eq!(snap.len(), 1);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn reconciliation_keeps_new_and_drops_stale() {
    let store = StatusStore::new();
    let mut live = NodeStatus::initial("live:80".into());
    live.status = Health::Offline;
    live.error = Some("connection refused".into());
    store.insert("live:80".into(), live.clone()).await;
    store
        .insert("gone:80".into(), NodeStatus::initial("gone:80".into()))
        .await;

    store
        .reconcile(&["live:80".to_string(), "fresh:443".to_string()])
        .await;

    let snap = store.snapshot().await;
    assert_eq!(snap["live:80"], live, "surviving record must be untouched");
    assert_eq!(snap["fresh:443"].status, Health::Checking);
    assert!(!snap.contains_key("gone:80"));
}
