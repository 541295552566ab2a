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

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::protocol::{
    ErrorResponse, ParametersResponse, ResponseState, StatisticsResponse, StatusResponse,
};
use crate::recorder::RecorderManager;
use crate::window::Boundary;

/// Build the REST routes of the writer
///
/// Every call answers HTTP 200; failures use the `{state: "error"}` envelope.
pub fn control_router(recorder_manager: Arc<RecorderManager>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/parameters", get(get_parameters).post(set_parameters))
        .route("/start_pulse_id/{pulse_id}", put(start_pulse_id))
        .route("/start_now", put(start_now))
        .route("/stop_pulse_id/{pulse_id}", put(stop_pulse_id))
        .route("/stop_now", put(stop_now))
        .route("/statistics", get(statistics))
        .route("/stop", get(stop))
        .route("/kill", get(kill))
        .with_state(recorder_manager)
}

/// Control interface for the recorder over HTTP
pub struct ControlInterface {
    recorder_manager: Arc<RecorderManager>,
    host: String,
    port: u16,
}

impl ControlInterface {
    pub fn new(recorder_manager: Arc<RecorderManager>, host: String, port: u16) -> Self {
        Self {
            recorder_manager,
            host,
            port,
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind control interface on {}", addr))?;

        info!("Control interface listening on http://{}", addr);

        axum::serve(listener, control_router(self.recorder_manager))
            .with_graceful_shutdown(shutdown)
            .await
            .context("Control interface failed")?;

        info!("Control interface stopped");
        Ok(())
    }
}

fn reply<T: Serialize>(result: RecorderResult<T>) -> Json<serde_json::Value> {
    let value = match result {
        Ok(body) => serde_json::to_value(body)
            .unwrap_or_else(|e| error_value(format!("Failed to encode response: {}", e))),
        Err(e) => {
            if e.is_fatal() {
                error!("Control request failed: {}", e);
            } else {
                warn!("Control request rejected: {}", e);
            }
            error_value(e.to_string())
        }
    };
    Json(value)
}

fn error_value(message: String) -> serde_json::Value {
    let envelope = ErrorResponse::new(message);
    serde_json::json!({
        "state": envelope.state,
        "status": envelope.status,
    })
}

fn parse_pulse_id(raw: &str) -> RecorderResult<u64> {
    raw.trim().parse().map_err(|_| {
        RecorderError::InvalidArgument(format!("pulse_id must be an integer, got '{}'", raw))
    })
}

async fn status(State(manager): State<Arc<RecorderManager>>) -> Json<serde_json::Value> {
    reply(Ok(StatusResponse::ok(manager.get_status())))
}

async fn get_parameters(State(manager): State<Arc<RecorderManager>>) -> Json<serde_json::Value> {
    reply(Ok(ParametersResponse {
        state: ResponseState::Ok,
        status: manager.get_status(),
        parameters: manager.get_parameters().await,
    }))
}

async fn set_parameters(
    State(manager): State<Arc<RecorderManager>>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let result = async {
        let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            RecorderError::InvalidArgument(format!("parameters are not valid JSON: {}", e))
        })?;
        manager.set_parameters(value).await?;
        Ok::<_, RecorderError>(ParametersResponse {
            state: ResponseState::Ok,
            status: manager.get_status(),
            parameters: manager.get_parameters().await,
        })
    }
    .await;
    reply(result)
}

async fn start_pulse_id(
    State(manager): State<Arc<RecorderManager>>,
    Path(pulse_id): Path<String>,
) -> Json<serde_json::Value> {
    let result = async {
        let pulse_id = parse_pulse_id(&pulse_id)?;
        manager.start(Some(Boundary::PulseId(pulse_id))).await?;
        let response = StatusResponse::ok(manager.get_status())
            .with_message(format!("Recording starts at pulse_id {}", pulse_id));
        Ok::<_, RecorderError>(response)
    }
    .await;
    reply(result)
}

async fn start_now(State(manager): State<Arc<RecorderManager>>) -> Json<serde_json::Value> {
    let result = async {
        manager.start(None).await?;
        let response = StatusResponse::ok(manager.get_status()).with_message("Recording started");
        Ok::<_, RecorderError>(response)
    }
    .await;
    reply(result)
}

async fn stop_pulse_id(
    State(manager): State<Arc<RecorderManager>>,
    Path(pulse_id): Path<String>,
) -> Json<serde_json::Value> {
    let result = async {
        let pulse_id = parse_pulse_id(&pulse_id)?;
        manager.request_stop(Some(Boundary::PulseId(pulse_id))).await?;
        let response = StatusResponse::ok(manager.get_status())
            .with_message(format!("Recording stops at pulse_id {}", pulse_id));
        Ok::<_, RecorderError>(response)
    }
    .await;
    reply(result)
}

async fn stop_now(State(manager): State<Arc<RecorderManager>>) -> Json<serde_json::Value> {
    let result = async {
        manager.request_stop(None).await?;
        let response = StatusResponse::ok(manager.get_status()).with_message("Recording stops now");
        Ok::<_, RecorderError>(response)
    }
    .await;
    reply(result)
}

async fn statistics(State(manager): State<Arc<RecorderManager>>) -> Json<serde_json::Value> {
    reply(Ok(StatisticsResponse {
        state: ResponseState::Ok,
        status: manager.get_status(),
        statistics: manager.get_statistics().await,
    }))
}

async fn stop(State(manager): State<Arc<RecorderManager>>) -> Json<serde_json::Value> {
    manager.stop().await;
    reply(Ok(StatusResponse::ok(manager.get_status()).with_message("Writer stopped")))
}

async fn kill(State(manager): State<Arc<RecorderManager>>) -> Json<serde_json::Value> {
    manager.kill().await;
    reply(Ok(StatusResponse::ok(manager.get_status()).with_message("Writer killed")))
}
