// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// REST control surface driven through the router without a socket

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bsread_recorder::stream::{memory_stream, MemoryConnector, MemorySink};
use bsread_recorder::{
    control_router, ChannelDefinition, ChannelType, MemoryEngine, Message, RecorderManager,
    RecorderSettings, SchemaHeader, Termination, Timestamp,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct Writer {
    router: Router,
    sink: MemorySink,
    engine: MemoryEngine,
    terminations: mpsc::UnboundedReceiver<Termination>,
}

fn writer() -> Writer {
    let (sink, source) = memory_stream();
    let engine = MemoryEngine::new();
    let (tx, terminations) = mpsc::unbounded_channel();
    let manager = Arc::new(RecorderManager::new(
        Arc::new(MemoryConnector::new(source)),
        Box::new(engine.clone()),
        RecorderSettings {
            receive_timeout: Duration::from_millis(20),
            startup_timeout: Duration::from_secs(2),
        },
        tx,
    ));

    Writer {
        router: control_router(manager),
        sink,
        engine,
        terminations,
    }
}

fn parameters() -> Value {
    json!({
        "general/created": "2024-05-01T10:00:00",
        "general/user": "p11057",
        "general/process": "control_tests",
        "general/instrument": "test-bench",
    })
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> Value {
    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_initial_status_is_waiting() {
    let writer = writer();
    let status = call(&writer.router, Method::GET, "/status", None).await;
    assert_eq!(status, json!({"state": "ok", "status": "waiting"}));

    let params = call(&writer.router, Method::GET, "/parameters", None).await;
    assert_eq!(params["parameters"], Value::Null);
}

#[tokio::test]
async fn test_parameters_round_trip() {
    let writer = writer();
    let set = call(&writer.router, Method::POST, "/parameters", Some(parameters())).await;
    assert_eq!(set["state"], "ok");

    let get = call(&writer.router, Method::GET, "/parameters", None).await;
    assert_eq!(get["parameters"]["general/user"], "p11057");
    assert_eq!(get["parameters"]["general/instrument"], "test-bench");
}

#[tokio::test]
async fn test_missing_parameters_rejected() {
    let writer = writer();
    let reply = call(
        &writer.router,
        Method::POST,
        "/parameters",
        Some(json!({"general/user": "p11057"})),
    )
    .await;

    assert_eq!(reply["state"], "error");
    assert!(reply["status"]
        .as_str()
        .unwrap()
        .contains("Missing mandatory parameters"));
}

#[tokio::test]
async fn test_invalid_json_body_rejected() {
    let writer = writer();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/parameters")
        .body(Body::from("not json"))
        .unwrap();
    let response = writer.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reply: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(reply["state"], "error");
}

#[tokio::test]
async fn test_start_without_parameters_is_error() {
    let writer = writer();
    let reply = call(&writer.router, Method::PUT, "/start_pulse_id/100", None).await;
    assert_eq!(reply["state"], "error");

    let status = call(&writer.router, Method::GET, "/status", None).await;
    assert_eq!(status["status"], "waiting");
}

#[tokio::test]
async fn test_non_integer_pulse_id_is_error() {
    let writer = writer();
    call(&writer.router, Method::POST, "/parameters", Some(parameters())).await;

    let reply = call(&writer.router, Method::PUT, "/start_pulse_id/abc", None).await;
    assert_eq!(reply["state"], "error");
    assert!(reply["status"].as_str().unwrap().contains("pulse_id"));
}

#[tokio::test]
async fn test_stop_before_start_is_error() {
    let writer = writer();
    let reply = call(&writer.router, Method::PUT, "/stop_pulse_id/10", None).await;
    assert_eq!(reply["state"], "error");
}

#[tokio::test]
async fn test_full_session_over_rest() {
    let mut writer = writer();
    call(&writer.router, Method::POST, "/parameters", Some(parameters())).await;

    let started = call(&writer.router, Method::PUT, "/start_pulse_id/2", None).await;
    assert_eq!(started["state"], "ok");
    assert_eq!(started["status"], "writing");

    let stop = call(&writer.router, Method::PUT, "/stop_pulse_id/4", None).await;
    assert_eq!(stop["state"], "ok");

    let header = SchemaHeader::new(vec![ChannelDefinition::new(
        "A",
        ChannelType::Float64,
        vec![1],
    )]);
    for pulse_id in 0..6u64 {
        let mut message = Message::new(
            pulse_id,
            Timestamp::default(),
            vec![Some((pulse_id as f64).into())],
        );
        if pulse_id == 0 {
            message = message.with_header(header.clone());
        }
        writer.sink.push(message).unwrap();
    }

    let termination = tokio::time::timeout(Duration::from_secs(5), writer.terminations.recv())
        .await
        .unwrap();
    assert_eq!(termination, Some(Termination::Completed));

    let stats = call(&writer.router, Method::GET, "/statistics", None).await;
    assert_eq!(stats["status"], "finished");
    assert_eq!(stats["statistics"]["start_pulse_id"], 2);
    assert_eq!(stats["statistics"]["stop_pulse_id"], 4);
    assert_eq!(stats["statistics"]["last_pulse_id"], 5);
    assert_eq!(stats["statistics"]["rows_written"], 3);

    let file = writer.engine.snapshot().await;
    assert_eq!(file.row_count("/data/A/data"), Some(3));
}

#[tokio::test]
async fn test_start_now_and_stop_command() {
    let mut writer = writer();
    call(&writer.router, Method::POST, "/parameters", Some(parameters())).await;

    let started = call(&writer.router, Method::PUT, "/start_now", None).await;
    assert_eq!(started["state"], "ok");

    let stats = call(&writer.router, Method::GET, "/statistics", None).await;
    assert!(stats["statistics"]["start_timestamp"].as_f64().unwrap() > 0.0);
    assert_eq!(stats["statistics"]["start_pulse_id"], Value::Null);

    let again = call(&writer.router, Method::PUT, "/start_now", None).await;
    assert_eq!(again["state"], "error");

    let stopped = call(&writer.router, Method::GET, "/stop", None).await;
    assert_eq!(stopped["state"], "ok");
    assert_eq!(stopped["status"], "finished");
    assert_eq!(writer.terminations.recv().await, Some(Termination::Stopped));
    assert!(writer.engine.snapshot().await.closed);
}

#[tokio::test]
async fn test_stop_now_sets_timestamp_boundary() {
    let writer = writer();
    call(&writer.router, Method::POST, "/parameters", Some(parameters())).await;
    call(&writer.router, Method::PUT, "/start_pulse_id/0", None).await;

    let reply = call(&writer.router, Method::PUT, "/stop_now", None).await;
    assert_eq!(reply["state"], "ok");

    let stats = call(&writer.router, Method::GET, "/statistics", None).await;
    assert!(stats["statistics"]["stop_timestamp"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_kill_terminates() {
    let mut writer = writer();
    let reply = call(&writer.router, Method::GET, "/kill", None).await;
    assert_eq!(reply["state"], "ok");
    assert_eq!(writer.terminations.recv().await, Some(Termination::Killed));
}
