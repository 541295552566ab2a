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

// Beam-synchronous message model
//
// One `Message` per accelerator pulse. The schema header is delta encoded:
// it is only present when the channel set or a channel definition changed
// since the previous message on the same stream.

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Global timestamp of a pulse: seconds plus nanosecond offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    #[serde(default)]
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self {
            secs: time.timestamp(),
            nanos: time.timestamp_subsec_nanos(),
        }
    }

    /// Epoch seconds as a single floating value
    pub fn as_f64(&self) -> f64 {
        self.secs as f64 + f64::from(self.nanos) * 1e-9
    }
}

/// Channel element type as announced in the schema header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Bool,
    String,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    #[default]
    Float64,
}

impl ChannelType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ChannelType::Int8
                | ChannelType::Uint8
                | ChannelType::Int16
                | ChannelType::Uint16
                | ChannelType::Int32
                | ChannelType::Uint32
                | ChannelType::Int64
                | ChannelType::Uint64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ChannelType::Float32 | ChannelType::Float64)
    }

    /// Element size in bytes, `None` for variable length strings
    pub fn element_size(self) -> Option<usize> {
        match self {
            ChannelType::Bool | ChannelType::Int8 | ChannelType::Uint8 => Some(1),
            ChannelType::Int16 | ChannelType::Uint16 => Some(2),
            ChannelType::Int32 | ChannelType::Uint32 | ChannelType::Float32 => Some(4),
            ChannelType::Int64 | ChannelType::Uint64 | ChannelType::Float64 => Some(8),
            ChannelType::String => None,
        }
    }
}

/// Byte order of the channel on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Little,
    Big,
}

fn default_shape() -> Vec<usize> {
    vec![1]
}

/// Type, shape and encoding of one channel
///
/// `shape` is in wire order (fastest varying dimension first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
    #[serde(default = "default_shape")]
    pub shape: Vec<usize>,
    #[serde(default)]
    pub encoding: Encoding,
}

impl ChannelDefinition {
    pub fn new(name: impl Into<String>, channel_type: ChannelType, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            channel_type,
            shape,
            encoding: Encoding::Little,
        }
    }

    /// Definitions are compared on type, shape and encoding only.
    pub fn same_layout(&self, other: &ChannelDefinition) -> bool {
        self.channel_type == other.channel_type
            && self.shape == other.shape
            && self.encoding == other.encoding
    }

    /// Number of elements carried per pulse
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Ordered channel definitions, parallel to `Message::values`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaHeader {
    pub channels: Vec<ChannelDefinition>,
}

impl SchemaHeader {
    pub fn new(channels: Vec<ChannelDefinition>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// A single element of a channel value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Whether this element can be stored in a column of `channel_type`
    pub fn fits(&self, channel_type: ChannelType) -> bool {
        match self {
            Scalar::Bool(_) => channel_type == ChannelType::Bool,
            Scalar::Text(_) => channel_type == ChannelType::String,
            Scalar::Int(v) => integer_fits(i128::from(*v), channel_type),
            Scalar::UInt(v) => integer_fits(i128::from(*v), channel_type),
            Scalar::Float(_) => channel_type.is_float(),
        }
    }
}

/// Integers must fall inside the column's range, floats accept any integer
fn integer_fits(value: i128, channel_type: ChannelType) -> bool {
    match channel_type {
        ChannelType::Int8 => i8::try_from(value).is_ok(),
        ChannelType::Uint8 => u8::try_from(value).is_ok(),
        ChannelType::Int16 => i16::try_from(value).is_ok(),
        ChannelType::Uint16 => u16::try_from(value).is_ok(),
        ChannelType::Int32 => i32::try_from(value).is_ok(),
        ChannelType::Uint32 => u32::try_from(value).is_ok(),
        ChannelType::Int64 => i64::try_from(value).is_ok(),
        ChannelType::Uint64 => u64::try_from(value).is_ok(),
        ChannelType::Float32 | ChannelType::Float64 => true,
        ChannelType::Bool | ChannelType::String => false,
    }
}

/// Concrete value of one channel for one pulse
///
/// Arrays are flat, in wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

impl ChannelValue {
    pub fn len(&self) -> usize {
        match self {
            ChannelValue::Scalar(_) => 1,
            ChannelValue::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn elements(&self) -> &[Scalar] {
        match self {
            ChannelValue::Scalar(scalar) => std::slice::from_ref(scalar),
            ChannelValue::Array(items) => items,
        }
    }
}

impl From<i64> for ChannelValue {
    fn from(value: i64) -> Self {
        ChannelValue::Scalar(Scalar::Int(value))
    }
}

impl From<u64> for ChannelValue {
    fn from(value: u64) -> Self {
        ChannelValue::Scalar(Scalar::UInt(value))
    }
}

impl From<f64> for ChannelValue {
    fn from(value: f64) -> Self {
        ChannelValue::Scalar(Scalar::Float(value))
    }
}

impl From<bool> for ChannelValue {
    fn from(value: bool) -> Self {
        ChannelValue::Scalar(Scalar::Bool(value))
    }
}

impl From<&str> for ChannelValue {
    fn from(value: &str) -> Self {
        ChannelValue::Scalar(Scalar::Text(value.to_string()))
    }
}

impl From<Vec<i64>> for ChannelValue {
    fn from(values: Vec<i64>) -> Self {
        ChannelValue::Array(values.into_iter().map(Scalar::Int).collect())
    }
}

impl From<Vec<f64>> for ChannelValue {
    fn from(values: Vec<f64>) -> Self {
        ChannelValue::Array(values.into_iter().map(Scalar::Float).collect())
    }
}

/// One decoded pulse record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub pulse_id: u64,
    #[serde(default)]
    pub timestamp: Timestamp,
    /// `None` marks a channel without data for this pulse
    pub values: Vec<Option<ChannelValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<SchemaHeader>,
}

impl Message {
    pub fn new(pulse_id: u64, timestamp: Timestamp, values: Vec<Option<ChannelValue>>) -> Self {
        Self {
            pulse_id,
            timestamp,
            values,
            header: None,
        }
    }

    pub fn with_header(mut self, header: SchemaHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Encode for the pub/sub transport
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .context("Failed to encode message")
    }

    /// Decode a payload received from the pub/sub transport
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("Failed to decode message")
    }
}
