//! HTTP and WebSocket surface of a memory-mode worker, wired the way
//! `dispatch-worker` wires it.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

use adcrm_core::{Category, Config, Level, NewNotification, Payload};
use adcrm_dispatch::{assemble, build_router, open_store, Worker, SEND_CHAT, SEND_EMAIL, SEND_SOCKET};
use adcrm_notify::GroupHub;
use adcrm_queue::{RoutingTable, TaskOutcome, TaskReport};
use adcrm_store::NotificationStore;

const USER: i64 = 7;

/// Every channel configured, pointed at local ports nothing listens on.
fn worker_config() -> Config {
    let mut config = Config::for_profile("ADCRM_API_TEST_UNSET");
    config.telegram.bot_token = Some("123:abc".to_string());
    config.telegram.api_base = "http://127.0.0.1:9".to_string();
    config.smtp.host = Some("127.0.0.1".to_string());
    config.smtp.port = Some(2525);
    config.smtp.tls = false;
    config.smtp.username = None;
    config.smtp.password = None;
    config
}

async fn memory_worker() -> Worker {
    let config = worker_config();
    let (store, directory) = open_store(&config, true).await.unwrap();
    assemble(&config, store, directory, RoutingTable::default(), &[]).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

async fn depths(app: &Router) -> HashMap<String, u64> {
    let (status, body) = call(app, get("/queues")).await;
    assert_eq!(status, StatusCode::OK);
    body.as_array()
        .unwrap()
        .iter()
        .map(|d| (d["queue"].as_str().unwrap().to_string(), d["depth"].as_u64().unwrap()))
        .collect()
}

fn create_body(channels: Option<Value>) -> Value {
    let mut body = json!({
        "recipient_id": USER,
        "level": "critical",
        "category": "ad_account",
        "payload": { "message": "Ad account 1234 was disabled" },
    });
    if let Some(channels) = channels {
        body["channels"] = channels;
    }
    body
}

#[tokio::test]
async fn health_reports_ok() {
    let worker = memory_worker().await;
    let app = build_router(worker.state);

    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_enqueues_one_task_per_requested_channel() {
    let worker = memory_worker().await;
    let app = build_router(worker.state);

    let request = post_json("/api/notifications", create_body(Some(json!(["socket", "email"]))));
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["recipient"], USER);
    assert!(body["socket_sent_at"].is_null());

    let depths = depths(&app).await;
    assert_eq!(depths["socket"], 1);
    assert_eq!(depths["email"], 1);
    assert_eq!(depths["telegram"], 0);
}

#[tokio::test]
async fn empty_message_is_rejected_without_enqueueing() {
    let worker = memory_worker().await;
    let app = build_router(worker.state);

    let mut body = create_body(None);
    body["payload"]["message"] = json!("");
    let (status, _) = call(&app, post_json("/api/notifications", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(depths(&app).await.values().all(|d| *d == 0));
    let (_, feed) = call(&app, get(&format!("/api/notifications/{USER}"))).await;
    assert_eq!(feed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn feed_limit_defaults_to_fifty_and_caps_at_five_hundred() {
    let worker = memory_worker().await;
    let store = worker.state.service.store().clone();
    for i in 0..502 {
        store
            .create(NewNotification::new(
                USER,
                Level::Info,
                Category::Proxy,
                Payload::new(format!("proxy {i} renewed")),
            ))
            .await
            .unwrap();
    }
    let app = build_router(worker.state);

    let (_, feed) = call(&app, get(&format!("/api/notifications/{USER}"))).await;
    assert_eq!(feed.as_array().unwrap().len(), 50);
    assert_eq!(feed[0]["payload"]["message"], "proxy 501 renewed");

    let (_, feed) = call(&app, get(&format!("/api/notifications/{USER}?limit=10000"))).await;
    assert_eq!(feed.as_array().unwrap().len(), 500);

    let (_, feed) = call(&app, get(&format!("/api/notifications/{}?limit=10", USER + 1))).await;
    assert_eq!(feed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn memory_worker_delivers_to_an_unknown_user_over_socket() {
    let Worker { state, pool, .. } = memory_worker().await;
    let mut events = state.hub.subscribe(&GroupHub::group_name(USER));
    let app = build_router(state);

    let (tx, mut reports) = mpsc::unbounded_channel::<TaskReport>();
    let (stop, stop_rx) = watch::channel(false);
    let pool = tokio::spawn(pool.reports(tx).run(stop_rx));

    let (status, created) = call(&app, post_json("/api/notifications", create_body(None))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().unwrap();

    let mut finals = HashMap::new();
    while finals.len() < 3 {
        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .expect("report in time")
            .expect("report channel open");
        if report.is_final() {
            finals.insert(report.name.clone(), report);
        }
    }

    // Socket needs nothing but the user id.
    assert_eq!(finals[SEND_SOCKET].outcome, TaskOutcome::Succeeded);
    let event: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "notification");
    assert_eq!(event["data"]["id"], id);

    // A bare recipient has no chat id: terminal on the first attempt.
    assert_eq!(finals[SEND_CHAT].attempt, 1);
    assert!(matches!(
        finals[SEND_CHAT].outcome,
        TaskOutcome::Failed { exhausted: false, .. }
    ));

    // No address: skipped, which finishes the task without a stamp.
    assert_eq!(finals[SEND_EMAIL].outcome, TaskOutcome::Succeeded);

    let (_, feed) = call(&app, get(&format!("/api/notifications/{USER}"))).await;
    let row = &feed[0];
    assert_eq!(row["id"], id);
    assert!(row["socket_sent_at"].is_string());
    assert!(row["chat_sent_at"].is_null());
    assert!(row["email_sent_at"].is_null());

    stop.send(true).unwrap();
    pool.await.unwrap();
}

#[tokio::test]
async fn websocket_forwards_group_events() {
    let worker = memory_worker().await;
    let hub = worker.state.hub.clone();
    let app = build_router(worker.state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let url = format!("ws://{addr}/ws/notifications/{USER}");
    let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let group = GroupHub::group_name(USER);
    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.subscriber_count(&group) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket client joined its group");

    let event = json!({ "type": "notification", "data": { "id": 1 } }).to_string();
    assert_eq!(hub.publish(&group, event.clone()), 1);
    // Other users' groups do not reach this client.
    hub.publish(&GroupHub::group_name(USER + 1), "{}".to_string());

    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("frame in time")
        .expect("stream open")
        .unwrap();
    assert_eq!(frame.to_text().unwrap(), event);

    server.abort();
}
