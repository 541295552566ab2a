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

// Stream transport abstraction
//
// The recorder and the relay only see decoded `Message`s; how they travel
// (Zenoh, in-process channels) is hidden behind these traits.

pub mod memory;
pub mod zenoh_transport;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::message::Message;

pub use self::memory::{memory_stream, MemoryConnector, MemorySink, MemorySource};
pub use self::zenoh_transport::{open_session, ZenohConnector, ZenohSink, ZenohSource};

/// Receiving end of a message stream
#[async_trait]
pub trait StreamSource: Send {
    /// Wait up to `timeout` for the next message
    ///
    /// `Ok(None)` means nothing arrived in time; errors are transport faults.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>>;
}

/// Sending end of a message stream
#[async_trait]
pub trait StreamSink: Send {
    async fn send(&mut self, message: &Message) -> Result<()>;
}

/// Opens a source on demand, from inside the worker that consumes it
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamSource>>;

    /// Human readable address for logs
    fn address(&self) -> String;
}
