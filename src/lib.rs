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

// Beam-synchronous stream relay and recorder over Zenoh
//
// Two jobs:
// - Relay a live per-pulse stream through a bounded buffer that evicts the
//   oldest message instead of applying backpressure
// - Record an externally triggered pulse-id or timestamp window of the stream
//   into append-only per-channel datasets, creating and migrating them as
//   channel types and shapes appear or change mid-stream

pub mod buffer;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod protocol;
pub mod recorder;
pub mod relay;
pub mod schema;
pub mod storage;
pub mod stream;
pub mod window;

// Re-export main types
pub use buffer::RelayBuffer;
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use control::{control_router, ControlInterface};
pub use dispatcher::{HttpDispatcher, StaticDispatcher, StreamDispatcher};
pub use error::{RecorderError, RecorderResult};
pub use message::{
    ChannelDefinition, ChannelType, ChannelValue, Encoding, Message, Scalar, SchemaHeader,
    Timestamp,
};
pub use protocol::{Statistics, StatusResponse, WriterStatus};
pub use recorder::{RecorderManager, RecorderSettings, RecorderState, Termination};
pub use relay::RelayService;
pub use schema::{CachedDefinition, ChannelSchemaStore, SessionMetadata};
pub use storage::{AppendEngine, EngineFactory, FilesystemEngine, MemoryEngine};
pub use window::{Boundary, Classification, Position, Window};
