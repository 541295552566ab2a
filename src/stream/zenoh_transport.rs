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

// Zenoh transport: one JSON encoded message per sample

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;
use zenoh::{Config, Session};

use super::{StreamConnector, StreamSink, StreamSource};
use crate::config::ZenohConfig;
use crate::message::Message;

/// Build a Zenoh config from our settings and open a session
pub async fn open_session(config: &ZenohConfig) -> Result<Session> {
    let mut zenoh_config = Config::default();

    // Set mode
    let mode = match config.mode.as_str() {
        "peer" | "client" | "router" => config.mode.as_str(),
        _ => "peer",
    };
    zenoh_config
        .insert_json5("mode", &serde_json::to_string(mode)?)
        .map_err(|e| anyhow!("Invalid zenoh mode: {}", e))?;

    // Set connect endpoints
    if let Some(connect_config) = &config.connect {
        zenoh_config
            .insert_json5(
                "connect/endpoints",
                &serde_json::to_string(&connect_config.endpoints)?,
            )
            .map_err(|e| anyhow!("Invalid connect endpoints: {}", e))?;
    }

    // Set listen endpoints
    if let Some(listen_config) = &config.listen {
        zenoh_config
            .insert_json5(
                "listen/endpoints",
                &serde_json::to_string(&listen_config.endpoints)?,
            )
            .map_err(|e| anyhow!("Invalid listen endpoints: {}", e))?;
    }

    let session = zenoh::open(zenoh_config)
        .await
        .map_err(|e| anyhow!("Failed to open Zenoh session: {}", e))?;

    info!("Zenoh session opened in {} mode", mode);
    Ok(session)
}

/// Subscriber side of a stream
pub struct ZenohSource {
    key_expr: String,
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
}

#[async_trait]
impl StreamSource for ZenohSource {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            let sample = match tokio::time::timeout_at(deadline, self.subscriber.recv_async()).await
            {
                Ok(Ok(sample)) => sample,
                Ok(Err(e)) => {
                    return Err(anyhow!(
                        "Subscriber on '{}' closed: {}",
                        self.key_expr,
                        e
                    ))
                }
                Err(_) => return Ok(None),
            };

            let payload = sample.payload().to_bytes();
            match Message::decode(&payload) {
                Ok(message) => {
                    debug!(
                        "Received message with pulse_id {} on '{}'",
                        message.pulse_id, self.key_expr
                    );
                    return Ok(Some(message));
                }
                Err(e) => warn!(
                    "Skipping malformed sample ({} bytes) on '{}': {:#}",
                    payload.len(),
                    self.key_expr,
                    e
                ),
            }
        }
    }
}

/// Publisher side of a stream
pub struct ZenohSink {
    publisher: Publisher<'static>,
}

impl ZenohSink {
    pub async fn declare(session: &Session, key_expr: String) -> Result<Self> {
        info!("Output stream publishing on '{}'", key_expr);

        let publisher = session
            .declare_publisher(key_expr)
            .await
            .map_err(|e| anyhow!("Failed to declare publisher: {}", e))?;

        Ok(Self { publisher })
    }
}

#[async_trait]
impl StreamSink for ZenohSink {
    async fn send(&mut self, message: &Message) -> Result<()> {
        self.publisher
            .put(message.encode()?)
            .await
            .map_err(|e| anyhow!("Failed to publish pulse_id {}: {}", message.pulse_id, e))
    }
}

/// Declares a subscriber on a fixed key expression
pub struct ZenohConnector {
    session: Session,
    key_expr: String,
}

impl ZenohConnector {
    pub fn new(session: Session, key_expr: String) -> Self {
        Self { session, key_expr }
    }
}

#[async_trait]
impl StreamConnector for ZenohConnector {
    async fn connect(&self) -> Result<Box<dyn StreamSource>> {
        info!("Input stream connecting to '{}'", self.key_expr);

        let subscriber = self
            .session
            .declare_subscriber(self.key_expr.clone())
            .await
            .map_err(|e| anyhow!("Failed to subscribe to '{}': {}", self.key_expr, e))?;

        Ok(Box::new(ZenohSource {
            key_expr: self.key_expr.clone(),
            subscriber,
        }))
    }

    fn address(&self) -> String {
        self.key_expr.clone()
    }
}
