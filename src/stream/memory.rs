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

// In-process stream over a tokio channel
//
// Payloads travel encoded, exactly as they would on the wire.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::warn;

use super::{StreamConnector, StreamSink, StreamSource};
use crate::message::Message;

/// Create a connected sink/source pair
///
/// The source reports a transport fault once every sink is dropped and the
/// queued messages are drained, like a closed network connection.
pub fn memory_stream() -> (MemorySink, MemorySource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemorySink { tx }, MemorySource { rx })
}

#[derive(Clone)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl MemorySink {
    /// Non-async send, convenient for feeding test streams
    pub fn push(&self, message: Message) -> Result<()> {
        self.push_payload(message.encode()?)
    }

    /// Send a raw payload, which need not decode
    pub fn push_payload(&self, payload: Bytes) -> Result<()> {
        self.tx
            .send(payload)
            .map_err(|_| anyhow!("memory stream receiver dropped"))
    }
}

#[async_trait]
impl StreamSink for MemorySink {
    async fn send(&mut self, message: &Message) -> Result<()> {
        self.push_payload(message.encode()?)
    }
}

pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl StreamSource for MemorySource {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            let payload = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(payload)) => payload,
                Ok(None) => bail!("memory stream closed"),
                Err(_) => return Ok(None),
            };

            match Message::decode(&payload) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("Skipping malformed payload ({} bytes): {:#}", payload.len(), e),
            }
        }
    }
}

/// Connector handing out a single pre-built source
pub struct MemoryConnector {
    source: Mutex<Option<MemorySource>>,
}

impl MemoryConnector {
    pub fn new(source: MemorySource) -> Self {
        Self {
            source: Mutex::new(Some(source)),
        }
    }
}

#[async_trait]
impl StreamConnector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn StreamSource>> {
        let source = self
            .source
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("memory stream already connected"))?;
        Ok(Box::new(source))
    }

    fn address(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Timestamp;

    #[tokio::test]
    async fn test_receive_timeout_yields_none() {
        let (_sink, mut source) = memory_stream();
        let result = source.receive(Duration::from_millis(10)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_closed_stream_is_transport_fault() {
        let (sink, mut source) = memory_stream();
        sink.push(Message::new(1, Timestamp::default(), vec![])).unwrap();
        drop(sink);

        let first = source.receive(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.map(|m| m.pulse_id), Some(1));
        assert!(source.receive(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let (sink, mut source) = memory_stream();
        sink.push_payload(Bytes::from_static(b"{not json")).unwrap();
        sink.push(Message::new(7, Timestamp::default(), vec![])).unwrap();

        let message = source.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(message.map(|m| m.pulse_id), Some(7));
    }

    #[tokio::test]
    async fn test_only_malformed_payloads_time_out() {
        let (sink, mut source) = memory_stream();
        sink.push_payload(Bytes::from_static(b"garbage")).unwrap();

        let result = source.receive(Duration::from_millis(10)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_connector_connects_once() {
        let (_sink, source) = memory_stream();
        let connector = MemoryConnector::new(source);
        assert!(connector.connect().await.is_ok());
        assert!(connector.connect().await.is_err());
    }
}
