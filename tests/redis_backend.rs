//! Tests against a live Redis instance.
//!
//! Run them with a local server (or point `REDIS_URL` somewhere else):
//!
//! ```text
//! cargo test --features redis-backend -- --ignored
//! ```

#![cfg(feature = "redis-backend")]

mod common;
use common::*;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use steploom::bus::{MessageBus, RedisBus, Subscription};
use steploom::event::{FlowEvent, new_trace_id};
use steploom::observer::NoticePublisher;
use steploom::pattern::TopicPattern;
use steploom::registry::StepId;
use steploom::state::{RedisStateStore, StateStore};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned())
}

/// Fresh key/channel prefix per test so parallel runs stay out of each
/// other's keyspace.
fn unique_prefix(label: &str) -> String {
    format!("steploom-test:{label}:{}:", new_trace_id())
}

#[tokio::test]
#[ignore = "needs a running Redis"]
async fn state_round_trips_and_isolates_traces() {
    let store = RedisStateStore::connect(&redis_url(), unique_prefix("state"))
        .await
        .unwrap();

    store.set("t1", "order", json!({"id": 7}), None).await.unwrap();
    store.set("t2", "order", json!({"id": 8}), None).await.unwrap();
    assert_eq!(store.get("t1", "order").await.unwrap(), Some(json!({"id": 7})));
    assert_eq!(store.get("t2", "order").await.unwrap(), Some(json!({"id": 8})));

    store.set("t1", "order", json!({"id": 9}), None).await.unwrap();
    assert_eq!(store.get("t1", "order").await.unwrap(), Some(json!({"id": 9})));

    store.clear("t1").await.unwrap();
    assert_eq!(store.get("t1", "order").await.unwrap(), None);
    assert_eq!(store.get("t2", "order").await.unwrap(), Some(json!({"id": 8})));

    store.clear("t2").await.unwrap();
}

#[tokio::test]
#[ignore = "needs a running Redis"]
async fn state_entries_expire_server_side() {
    let store = RedisStateStore::connect(&redis_url(), unique_prefix("ttl"))
        .await
        .unwrap();

    store
        .set("t1", "blink", json!(true), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    store.set("t1", "stay", json!(true), None).await.unwrap();
    assert_eq!(store.get("t1", "blink").await.unwrap(), Some(json!(true)));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.get("t1", "blink").await.unwrap(), None);
    assert_eq!(store.get("t1", "stay").await.unwrap(), Some(json!(true)));

    store.clear("t1").await.unwrap();
}

#[tokio::test]
#[ignore = "needs a running Redis"]
async fn published_events_come_back_through_the_channel() {
    let bus = RedisBus::connect(
        &redis_url(),
        unique_prefix("bus"),
        NoticePublisher::disabled(),
    )
    .await
    .unwrap();

    let recorder = RecordingHandler::new();
    bus.subscribe(Subscription::new(
        TopicPattern::parse("order.*").unwrap(),
        StepId::from("listener"),
        Arc::new(recorder.clone()),
    ));

    bus.publish(FlowEvent::trigger("order.created", json!({"id": 1}), "t-redis"))
        .await
        .unwrap();
    bus.publish(FlowEvent::trigger("billing.created", json!({}), "t-redis"))
        .await
        .unwrap();

    wait_until("redis delivery", || recorder.count() == 1).await;
    let events = recorder.events();
    assert_eq!(events[0].topic, "order.created");
    assert_eq!(events[0].metadata.trace_id, "t-redis");

    bus.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a running Redis"]
async fn every_connected_runtime_sees_each_event() {
    let prefix = unique_prefix("fanout");
    let bus_a = RedisBus::connect(&redis_url(), prefix.clone(), NoticePublisher::disabled())
        .await
        .unwrap();
    let bus_b = RedisBus::connect(&redis_url(), prefix, NoticePublisher::disabled())
        .await
        .unwrap();

    let seen_a = RecordingHandler::new();
    let seen_b = RecordingHandler::new();
    bus_a.subscribe(Subscription::new(
        TopicPattern::parse("*").unwrap(),
        StepId::from("a"),
        Arc::new(seen_a.clone()),
    ));
    bus_b.subscribe(Subscription::new(
        TopicPattern::parse("*").unwrap(),
        StepId::from("b"),
        Arc::new(seen_b.clone()),
    ));

    bus_a
        .publish(FlowEvent::trigger("ping", json!({}), "t-fan"))
        .await
        .unwrap();

    // Both processes dispatch the event to their own steps, the publisher
    // included.
    wait_until("fanout to a", || seen_a.count() == 1).await;
    wait_until("fanout to b", || seen_b.count() == 1).await;

    bus_a.shutdown().await.unwrap();
    bus_b.shutdown().await.unwrap();

    // A closed bus refuses further publishes.
    let err = bus_a
        .publish(FlowEvent::trigger("ping", json!({}), "t-fan"))
        .await
        .unwrap_err();
    assert!(matches!(err, steploom::bus::BusError::Closed));
}
