//! End-to-end tests for the dashboard subscription endpoint.

mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use common::{
    agent_barrier, body_json, connect, connect_with_token, get_with_token, metrics_payload,
    recv_frame, send_frame, spawn_app, user_token, MemoryStore,
};
use futures::SinkExt;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Error as WsError;
use vmwatch_api::store::MonitorStore;
use vmwatch_core::protocol::AgentMetrics;
use vmwatch_db::models::vm_metric::MetricsSample;

// ---------------------------------------------------------------------------
// Test: no session, no upgrade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn monitor_requires_session() {
    let app = spawn_app(MemoryStore::new()).await;

    let result = tokio_tungstenite::connect_async(app.ws_url("/api/v1/ws/monitor")).await;
    assert_matches!(result, Err(WsError::Http(response)) => {
        assert_eq!(response.status(), 401);
    });
}

// ---------------------------------------------------------------------------
// Test: subscribing by page streams exactly the page's VMs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn page_subscription_streams_only_member_vms() {
    let store = MemoryStore::new();
    for id in [7, 9, 11] {
        store.add_vm(id, &format!("secret-{id}"));
    }
    store.add_page(3, &[7, 9]);
    let app = spawn_app(store).await;

    let mut monitor =
        connect_with_token(&app.ws_url("/api/v1/ws/monitor"), &user_token(1)).await;
    send_frame(&mut monitor, "startMonitor", json!({ "pageId": 3 })).await;
    assert_eq!(
        recv_frame(&mut monitor).await,
        json!({ "type": "monitoring", "data": { "vmIds": [7, 9] } })
    );

    let mut agents = Vec::new();
    for id in [7, 9, 11] {
        let url = app.ws_url(&format!("/api/v1/ws/agent?secret=secret-{id}"));
        agents.push(connect(&url).await);
    }

    // VM 11 reports first; its sample is fully handled before 7 and 9 send.
    send_frame(&mut agents[2], "metrics", metrics_payload(11.0)).await;
    agent_barrier(&mut agents[2]).await;

    send_frame(&mut agents[0], "metrics", metrics_payload(7.0)).await;
    send_frame(&mut agents[1], "metrics", metrics_payload(9.0)).await;

    let mut seen = HashSet::new();
    for _ in 0..2 {
        let frame = recv_frame(&mut monitor).await;
        assert_eq!(frame["type"], "liveMetrics");
        seen.insert(frame["data"]["vmId"].as_i64().unwrap());
    }
    assert_eq!(seen, HashSet::from([7, 9]));
}

// ---------------------------------------------------------------------------
// Test: unknown page acknowledges an empty subscription
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_page_resolves_to_no_vms() {
    let app = spawn_app(MemoryStore::new()).await;

    let mut monitor =
        connect_with_token(&app.ws_url("/api/v1/ws/monitor"), &user_token(1)).await;
    send_frame(&mut monitor, "startMonitor", json!({ "pageId": 404 })).await;
    assert_eq!(
        recv_frame(&mut monitor).await,
        json!({ "type": "monitoring", "data": { "vmIds": [] } })
    );
}

// ---------------------------------------------------------------------------
// Test: getMonitorMetrics returns persisted rows newest first
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_monitor_metrics_returns_history() {
    let store = MemoryStore::new();
    store.add_vm(7, "secret-7");
    store.add_vm(9, "secret-9");
    let app = spawn_app(store).await;

    let mut agent = connect(&app.ws_url("/api/v1/ws/agent?secret=secret-7")).await;
    send_frame(&mut agent, "metrics", metrics_payload(10.0)).await;
    send_frame(&mut agent, "metrics", metrics_payload(20.5)).await;
    agent_barrier(&mut agent).await;

    let mut other = connect(&app.ws_url("/api/v1/ws/agent?secret=secret-9")).await;
    send_frame(&mut other, "metrics", metrics_payload(99.0)).await;
    agent_barrier(&mut other).await;

    let mut monitor =
        connect_with_token(&app.ws_url("/api/v1/ws/monitor"), &user_token(1)).await;
    send_frame(&mut monitor, "getMonitorMetrics", json!({ "vmIds": [7] })).await;

    let reply = recv_frame(&mut monitor).await;
    assert_eq!(reply["type"], "monitorMetrics");
    let rows = reply["data"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["vmId"] == 7));
    assert_eq!(rows[0]["cpuUsage"], "20.5");

    send_frame(
        &mut monitor,
        "getMonitorMetrics",
        json!({ "vmIds": [7, 9], "limit": 1 }),
    )
    .await;
    let reply = recv_frame(&mut monitor).await;
    assert_eq!(reply["data"].as_array().map(Vec::len), Some(1));

    // History does not subscribe.
    assert_eq!(app.fabric().subscriptions.subscriber_count(7).await, 0);
}

// ---------------------------------------------------------------------------
// Test: history without a limit is not truncated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_monitor_metrics_without_limit_returns_everything() {
    let store = MemoryStore::new();
    store.add_vm(7, "secret-7");
    for _ in 0..600 {
        let sample = MetricsSample::from_agent(7, &AgentMetrics::default(), Utc::now());
        store.insert_metrics(&sample).await.unwrap();
    }
    let app = spawn_app(store).await;

    let mut monitor =
        connect_with_token(&app.ws_url("/api/v1/ws/monitor"), &user_token(1)).await;
    send_frame(&mut monitor, "getMonitorMetrics", json!({ "vmIds": [7] })).await;
    let reply = recv_frame(&mut monitor).await;
    assert_eq!(reply["data"].as_array().map(Vec::len), Some(600));

    send_frame(
        &mut monitor,
        "getMonitorMetrics",
        json!({ "vmIds": [7], "limit": 10 }),
    )
    .await;
    let reply = recv_frame(&mut monitor).await;
    assert_eq!(reply["data"].as_array().map(Vec::len), Some(10));
}

// ---------------------------------------------------------------------------
// Test: stopMonitor and disconnect drop subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_and_disconnect_drop_subscriptions() {
    let app = spawn_app(MemoryStore::new()).await;
    let subs = &app.fabric().subscriptions;

    let mut monitor =
        connect_with_token(&app.ws_url("/api/v1/ws/monitor"), &user_token(1)).await;
    send_frame(&mut monitor, "startMonitor", json!({ "vmIds": [7, 9, 11] })).await;
    recv_frame(&mut monitor).await;
    assert_eq!(subs.subscriber_count(9).await, 1);

    send_frame(&mut monitor, "stopMonitor", json!({ "vmIds": [9] })).await;
    // The next reply proves the stop was handled.
    send_frame(&mut monitor, "getMonitorMetrics", json!({ "vmIds": [] })).await;
    recv_frame(&mut monitor).await;
    assert_eq!(subs.subscriber_count(7).await, 1);
    assert_eq!(subs.subscriber_count(9).await, 0);

    monitor.close(None).await.unwrap();

    let fabric = app.fabric().clone();
    assert!(
        common::eventually(|| {
            let f = fabric.clone();
            async move {
                f.subscriptions.subscriber_count(7).await == 0
                    && f.sockets.connection_count().await == 0
            }
        })
        .await
    );
    assert_eq!(subs.subscriber_count(11).await, 0);
}

// ---------------------------------------------------------------------------
// Test: undecodable commands are ignored without an error frame
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_commands_are_ignored() {
    let app = spawn_app(MemoryStore::new()).await;

    let mut monitor =
        connect_with_token(&app.ws_url("/api/v1/ws/monitor"), &user_token(1)).await;
    send_frame(&mut monitor, "reboot", json!({})).await;
    monitor
        .send(tokio_tungstenite::tungstenite::Message::Binary(vec![0xc1]))
        .await
        .unwrap();
    send_frame(&mut monitor, "startMonitor", json!({ "vmIds": [5] })).await;

    // The first frame back is the ack, not an error.
    assert_eq!(recv_frame(&mut monitor).await["type"], "monitoring");
}

// ---------------------------------------------------------------------------
// Test: VM status reflects the agent link
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vm_status_reports_agent_liveness() {
    let store = MemoryStore::new();
    store.add_vm(7, "secret-7");
    let app = spawn_app(store).await;
    let token = user_token(1);

    let response = get_with_token(app.router(), "/api/v1/vms/7/status", &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "data": { "vmId": 7, "online": false } })
    );

    let mut agent = connect(&app.ws_url("/api/v1/ws/agent?secret=secret-7")).await;
    agent_barrier(&mut agent).await;

    let json: Value =
        body_json(get_with_token(app.router(), "/api/v1/vms/7/status", &token).await).await;
    assert_eq!(json["data"]["online"], true);

    let response = get_with_token(app.router(), "/api/v1/vms/8/status", &token).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get_with_token(app.router(), "/api/v1/vms/7/status", "bogus").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
