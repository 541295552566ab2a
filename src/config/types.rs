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

// Configuration types for bsread-recorder

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub zenoh: ZenohConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub writer: WriterSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Zenoh configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZenohConfig {
    #[serde(default = "default_mode")]
    pub mode: String, // "peer", "client", or "router"

    #[serde(default)]
    pub connect: Option<ConnectConfig>,

    #[serde(default)]
    pub listen: Option<ListenConfig>,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: None,
            listen: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectConfig {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    pub endpoints: Vec<String>,
}

/// Input stream
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Key expression the beam-synchronous stream is published on
    #[serde(default = "default_stream_key")]
    pub key_expr: String,

    /// Receive timeout; an idle stream yields "no message" after this long
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            key_expr: default_stream_key(),
            receive_timeout_ms: default_receive_timeout(),
        }
    }
}

impl StreamConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// Channel name resolution
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Dispatcher REST endpoint; the configured stream key is used when unset
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_dispatcher_timeout")]
    pub timeout_seconds: u64,
}

/// Relay (ring buffer) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    #[serde(default = "default_relay_capacity")]
    pub capacity: usize,

    /// Key expression the relayed stream is published on
    #[serde(default = "default_relay_output")]
    pub output_key_expr: String,

    /// Sleep of the forward worker when the buffer is empty
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Log channels missing data on every ingested message
    #[serde(default)]
    pub analyze: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            capacity: default_relay_capacity(),
            output_key_expr: default_relay_output(),
            poll_interval_ms: default_poll_interval(),
            analyze: false,
        }
    }
}

impl RelaySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Writer (recording) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriterSettings {
    /// How long `start` waits for the writer to confirm it is receiving
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    #[serde(default)]
    pub rest: RestConfig,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout(),
            rest: RestConfig::default(),
        }
    }
}

impl WriterSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_host")]
    pub host: String,
    #[serde(default = "default_rest_port")]
    pub port: u16,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            host: default_rest_host(),
            port: default_rest_port(),
        }
    }
}

/// Storage configuration with engine selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Engine type: "filesystem" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub filesystem: FilesystemConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            filesystem: FilesystemConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    /// Output location of the recording
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/data/recordings/output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_mode() -> String { "peer".to_string() }
fn default_stream_key() -> String { "bsread/stream".to_string() }
fn default_receive_timeout() -> u64 { 1000 }
fn default_dispatcher_timeout() -> u64 { 10 }
fn default_relay_capacity() -> usize { 100 }
fn default_relay_output() -> String { "bsread/relay".to_string() }
fn default_poll_interval() -> u64 { 10 }
fn default_startup_timeout() -> u64 { 2000 }
fn default_rest_host() -> String { "127.0.0.1".to_string() }
fn default_rest_port() -> u16 { 10002 }
fn default_backend() -> String { "filesystem".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
