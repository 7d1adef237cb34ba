// SPDX-License-Identifier: PMPL-1.0-or-later
//! End-to-end scenarios: store writes observed through the HTTP watch
//! endpoint by the remote watch client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use tank_api::{serve_on, ApiConfig};
use tank_condition::Condition;
use tank_core::{Document, EventType, WatchOptions, WatchRequest};
use tank_document::{DocumentDriver, InMemoryDocumentDb, ListenerConfig, ListenerRegistry};
use tank_store::{GetOption, PutOption, RemoveOption, Store, StoreConfig};
use tank_watch_client::{ClientState, WatchClient};

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

async fn start_store(config: StoreConfig) -> Store {
    let driver = DocumentDriver::connect(
        "cluster",
        Arc::new(InMemoryDocumentDb::new()),
        ListenerConfig::named("e2e"),
        Arc::new(ListenerRegistry::new()),
    )
    .unwrap();
    driver.listener().wait_ready().await.unwrap();
    Store::with_driver(driver, config)
}

/// Serve `store` on an ephemeral port; returns the watch URL of `resource`.
async fn start_server(store: Store, resource: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ApiConfig::default();
    tokio::spawn(async move {
        serve_on(listener, &config, store).await.unwrap();
    });
    format!("http://{addr}/api/v1/watch/{resource}")
}

async fn next(client: &mut WatchClient) -> tank_core::Event {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("event in time")
}

#[tokio::test]
async fn test_nodes_scenario() {
    let store = start_store(StoreConfig::default()).await;
    let url = start_server(store.clone(), "nodes").await;
    let request: WatchRequest = WatchOptions::default().with_max_events(3).into();
    let mut client = WatchClient::connect(&[url.as_str()], request).await.unwrap();

    let put = PutOption::unique(&["ip"]).with_times("createTime", "updateTime");
    store
        .put("nodes", doc(json!({"ip": "10.0.0.1", "role": "db"})), put.clone())
        .await
        .unwrap();
    store
        .put("nodes", doc(json!({"ip": "10.0.0.2", "role": "web"})), put.clone())
        .await
        .unwrap();
    store
        .put("nodes", doc(json!({"ip": "10.0.0.1", "role": "cache"})), put)
        .await
        .unwrap();

    let first = next(&mut client).await;
    assert_eq!(first.event_type, EventType::Add);
    assert_eq!(first.value.unwrap()["ip"], json!("10.0.0.1"));
    assert_eq!(next(&mut client).await.event_type, EventType::Add);
    let change = next(&mut client).await;
    assert_eq!(change.event_type, EventType::Change);
    assert_eq!(change.value.unwrap()["role"], json!("cache"));
    assert!(next(&mut client).await.is_break());
    assert_eq!(client.state(), ClientState::Closed);

    let nodes = store
        .get(
            "nodes",
            GetOption::with_cond(Condition::truth().eq("ip", "10.0.0.1")),
        )
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    let created = nodes[0]["createTime"].as_str().unwrap();
    let updated = nodes[0]["updateTime"].as_str().unwrap();
    assert!(created <= updated);
}

#[tokio::test]
async fn test_selector_filters_events() {
    let store = start_store(StoreConfig::default()).await;
    let url = start_server(store.clone(), "nodes").await;
    let request = WatchRequest {
        options: WatchOptions::default().with_max_events(1),
        selector: Some("role=db".to_string()),
    };
    let mut client = WatchClient::connect(&[url.as_str()], request).await.unwrap();

    let put = PutOption::unique(&["ip"]);
    store
        .put("nodes", doc(json!({"ip": "a", "role": "web"})), put.clone())
        .await
        .unwrap();
    store
        .put("nodes", doc(json!({"ip": "b", "role": "db"})), put)
        .await
        .unwrap();

    let event = next(&mut client).await;
    assert_eq!(event.event_type, EventType::Add);
    assert_eq!(event.value.unwrap()["ip"], json!("b"));
    assert!(next(&mut client).await.is_break());
}

#[tokio::test]
async fn test_soft_delete_seen_as_delete() {
    let config = StoreConfig {
        soft_delete: true,
        ..StoreConfig::default()
    };
    let store = start_store(config).await;
    let url = start_server(store.clone(), "nodes").await;
    let request: WatchRequest = WatchOptions::default().with_max_events(2).into();
    let mut client = WatchClient::connect(&[url.as_str()], request).await.unwrap();

    store
        .put("nodes", doc(json!({"ip": "a"})), PutOption::unique(&["ip"]))
        .await
        .unwrap();
    store
        .remove(
            "nodes",
            RemoveOption {
                cond: Condition::truth().eq("ip", "a"),
                ignore_not_found: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(next(&mut client).await.event_type, EventType::Add);
    let delete = next(&mut client).await;
    assert_eq!(delete.event_type, EventType::Delete);
    assert!(!delete.value.unwrap().contains_key("deleted"));
    assert!(next(&mut client).await.is_break());
}

#[tokio::test]
async fn test_timeout_body_is_a_single_break() {
    let store = start_store(StoreConfig::default()).await;
    let url = start_server(store, "nodes").await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({"timeout": "100ms"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body = response.text().await.unwrap();
    assert_eq!(body, r#"{"type":-1,"value":null}"#);
}

#[tokio::test]
async fn test_bad_selector_rejected_over_http() {
    let store = start_store(StoreConfig::default()).await;
    let url = start_server(store, "nodes").await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({"selector": "=oops"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], json!(400));
}
