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

// Stream relay
//
// An ingest worker fills a bounded relay buffer from the input stream and a
// forward worker drains it to the output stream. Schema headers are held
// apart from the buffered messages so eviction never loses one.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::buffer::RelayBuffer;
use crate::config::RelaySettings;
use crate::message::{Message, SchemaHeader};
use crate::stream::{StreamSink, StreamSource};

/// Buffered message together with the schema in force when it arrived
#[derive(Debug, Clone)]
pub struct Framed {
    pub message: Message,
    pub schema: Option<Arc<SchemaHeader>>,
}

/// Strips schema headers off incoming messages and remembers the latest
#[derive(Debug, Default)]
pub struct Ingester {
    schema: Option<Arc<SchemaHeader>>,
}

impl Ingester {
    pub fn frame(&mut self, mut message: Message) -> Framed {
        if let Some(header) = message.header.take() {
            debug!(
                "Schema header with {} channels at pulse_id {}",
                header.len(),
                message.pulse_id
            );
            self.schema = Some(Arc::new(header));
        }

        Framed {
            message,
            schema: self.schema.clone(),
        }
    }

    pub fn schema(&self) -> Option<&SchemaHeader> {
        self.schema.as_deref()
    }
}

/// Re-attaches a header whenever the schema differs from the last one sent
#[derive(Debug, Default)]
pub struct Forwarder {
    last_schema: Option<Arc<SchemaHeader>>,
}

impl Forwarder {
    pub fn unframe(&mut self, framed: Framed) -> Message {
        let mut message = framed.message;

        if let Some(schema) = framed.schema {
            let changed = self
                .last_schema
                .as_ref()
                .map_or(true, |last| !Arc::ptr_eq(last, &schema));
            if changed {
                message.header = Some(schema.as_ref().clone());
                self.last_schema = Some(schema);
            }
        }

        message
    }
}

/// Names of the channels absent from this message
pub fn analyze_message(message: &Message, schema: Option<&SchemaHeader>) -> Vec<String> {
    let Some(schema) = schema else {
        return Vec::new();
    };

    let absent: Vec<String> = schema
        .channels
        .iter()
        .zip(&message.values)
        .filter(|(_, value)| value.is_none())
        .map(|(definition, _)| definition.name.clone())
        .collect();

    for name in &absent {
        debug!("Channel '{}' absent at pulse_id {}", name, message.pulse_id);
    }

    absent
}

/// Read a channel list: one name per line, `#` comments and blank lines ignored
pub fn load_channels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read channel list {:?}", path))?;

    Ok(parse_channels(&content))
}

pub fn parse_channels(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Ingest and forward workers sharing one relay buffer
pub struct RelayService {
    buffer: Arc<RelayBuffer<Framed>>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
    poll_interval: Duration,
    analyze: bool,
}

impl RelayService {
    pub fn new(settings: &RelaySettings, receive_timeout: Duration) -> Result<Self> {
        Ok(Self {
            buffer: Arc::new(RelayBuffer::new(settings.capacity)?),
            running: Arc::new(AtomicBool::new(false)),
            receive_timeout,
            poll_interval: settings.poll_interval(),
            analyze: settings.analyze,
        })
    }

    pub fn buffer(&self) -> &RelayBuffer<Framed> {
        &self.buffer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        info!("Stopping relay");
        self.running.store(false, Ordering::Release);
    }

    /// Run both workers until one fails or `stop` is called
    pub async fn run(
        &self,
        source: Box<dyn StreamSource>,
        sink: Box<dyn StreamSink>,
    ) -> Result<()> {
        self.running.store(true, Ordering::Release);
        info!("Relay running with capacity {}", self.buffer.capacity());

        let ingest = tokio::spawn(ingest_loop(
            source,
            self.buffer.clone(),
            self.running.clone(),
            self.receive_timeout,
            self.analyze,
        ));
        let forward = tokio::spawn(forward_loop(
            sink,
            self.buffer.clone(),
            self.running.clone(),
            self.poll_interval,
        ));

        let (ingest_result, forward_result) = tokio::join!(ingest, forward);

        let (ingested, evicted) = self.buffer.stats();
        info!(
            "Relay stopped: {} messages ingested, {} evicted",
            ingested, evicted
        );

        ingest_result.context("Ingest worker panicked")??;
        forward_result.context("Forward worker panicked")??;
        Ok(())
    }
}

async fn ingest_loop(
    mut source: Box<dyn StreamSource>,
    buffer: Arc<RelayBuffer<Framed>>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
    analyze: bool,
) -> Result<()> {
    let mut ingester = Ingester::default();

    while running.load(Ordering::Acquire) {
        let message = match source.receive(receive_timeout).await {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                error!("Ingest worker failed: {:#}", e);
                running.store(false, Ordering::Release);
                return Err(e.context("Ingest worker failed"));
            }
        };

        let framed = ingester.frame(message);
        if analyze {
            analyze_message(&framed.message, ingester.schema());
        }
        buffer.ingest(framed);
    }

    Ok(())
}

async fn forward_loop(
    mut sink: Box<dyn StreamSink>,
    buffer: Arc<RelayBuffer<Framed>>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) -> Result<()> {
    let mut forwarder = Forwarder::default();

    while running.load(Ordering::Acquire) {
        let Some(framed) = buffer.relay() else {
            tokio::time::sleep(poll_interval).await;
            continue;
        };

        let message = forwarder.unframe(framed);
        if let Err(e) = sink.send(&message).await {
            error!("Forward worker failed: {:#}", e);
            running.store(false, Ordering::Release);
            return Err(e.context("Forward worker failed"));
        }
    }

    Ok(())
}
