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

// Channel schema store
//
// Turns a stream of delta-encoded schema headers into append-only column
// storage. Every channel gets three datasets under `/data/<name>/`:
// `data` (current generation, retired ones become `data(1)`, `data(2)`...),
// `pulse_id` and `is_data_present`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::message::{
    ChannelDefinition, ChannelType, ChannelValue, Message, Scalar, SchemaHeader,
};
use crate::storage::{AppendEngine, Cell, DatasetLayout};
use crate::window::Boundary;

pub const PARAM_CREATED: &str = "general/created";
pub const PARAM_USER: &str = "general/user";
pub const PARAM_PROCESS: &str = "general/process";
pub const PARAM_INSTRUMENT: &str = "general/instrument";

pub const REQUIRED_PARAMETERS: [&str; 4] =
    [PARAM_CREATED, PARAM_USER, PARAM_PROCESS, PARAM_INSTRUMENT];

/// Session metadata supplied once through the control surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionMetadata(BTreeMap<String, serde_json::Value>);

impl SessionMetadata {
    /// Accepts any JSON object holding at least the required keys
    pub fn from_json(value: serde_json::Value) -> RecorderResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(RecorderError::InvalidArgument(
                "parameters must be a JSON object".to_string(),
            ));
        };

        let metadata = Self(map.into_iter().collect());
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if REQUIRED_PARAMETERS.iter().all(|key| self.0.contains_key(*key)) {
            return Ok(());
        }

        Err(RecorderError::MissingParameters {
            required: REQUIRED_PARAMETERS.iter().map(|k| k.to_string()).collect(),
            received: self.0.keys().cloned().collect(),
        })
    }

    /// Parameter rendered as a plain string
    pub fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone().into_iter().collect())
    }
}

/// Cached view of one channel slot
#[derive(Debug, Clone, PartialEq)]
pub enum CachedDefinition {
    Unset,
    /// Channel seen in a header but never with data
    Stub,
    Concrete(ChannelDefinition),
}

/// Storage layout for a channel definition
///
/// Wire shapes are fastest dimension first, storage shapes slowest first.
/// Strings are stored as one variable length string per row.
pub fn layout_for(definition: &ChannelDefinition) -> DatasetLayout {
    if definition.channel_type == ChannelType::String {
        return DatasetLayout::var_string();
    }

    DatasetLayout {
        dtype: definition.channel_type,
        encoding: definition.encoding,
        shape: definition.shape.iter().rev().copied().collect(),
    }
}

pub fn data_path(channel: &str) -> String {
    format!("/data/{}/data", channel)
}

pub fn pulse_id_path(channel: &str) -> String {
    format!("/data/{}/pulse_id", channel)
}

pub fn presence_path(channel: &str) -> String {
    format!("/data/{}/is_data_present", channel)
}

pub fn retired_data_path(channel: &str, generation: u32) -> String {
    format!("/data/{}/data({})", channel, generation)
}

struct ChannelSlot {
    name: String,
    cached: CachedDefinition,
    /// Latest definition a header announced for this slot
    announced: ChannelDefinition,
    retired_generations: u32,
}

/// Per-session dynamic dataset manager on top of an append engine
pub struct ChannelSchemaStore {
    engine: Box<dyn AppendEngine>,
    metadata: SessionMetadata,
    /// Empty until the first schema header; its length never changes afterwards
    slots: Vec<ChannelSlot>,
    initialized: bool,
    rows_written: u64,
    closed: bool,
}

impl ChannelSchemaStore {
    pub fn new(engine: Box<dyn AppendEngine>, metadata: SessionMetadata) -> Self {
        Self {
            engine,
            metadata,
            slots: Vec::new(),
            initialized: false,
            rows_written: 0,
            closed: false,
        }
    }

    /// Prepare the engine's output location
    pub async fn open(&mut self) -> RecorderResult<()> {
        self.engine.initialize().await.map_err(storage_error)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn cached_definitions(&self) -> Vec<CachedDefinition> {
        self.slots.iter().map(|slot| slot.cached.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reconcile the schema if the message carries a header, then append its row
    pub async fn write(&mut self, message: &Message) -> RecorderResult<()> {
        if self.closed {
            return Err(RecorderError::InvalidState {
                operation: "write",
                state: "closed",
            });
        }

        if let Some(header) = &message.header {
            self.reconcile(header, &message.values).await?;
        }

        if !self.initialized {
            warn!(
                "Skipping message with pulse_id {}: no schema header received yet",
                message.pulse_id
            );
            return Ok(());
        }

        if message.values.len() != self.slots.len() {
            return Err(RecorderError::SchemaViolation(format!(
                "message with pulse_id {} carries {} values for {} channels",
                message.pulse_id,
                message.values.len(),
                self.slots.len()
            )));
        }

        // Headers are only resent on change, so a stub may first see data
        // under the definition it was announced with
        for (index, value) in message.values.iter().enumerate() {
            if value.is_some() && self.slots[index].cached == CachedDefinition::Stub {
                let definition = self.slots[index].announced.clone();
                info!(
                    "First data for channel '{}' without a header, materializing dataset stub",
                    self.slots[index].name
                );
                self.create_data(index, &definition).await?;
            }
        }

        let mut cells = Vec::with_capacity(self.slots.len() * 3);
        for (slot, value) in self.slots.iter().zip(&message.values) {
            if let CachedDefinition::Concrete(_) = slot.cached {
                cells.push(Cell::new(data_path(&slot.name), value.clone()));
            }
            cells.push(Cell::new(
                pulse_id_path(&slot.name),
                Some(ChannelValue::Scalar(Scalar::UInt(message.pulse_id))),
            ));
            cells.push(Cell::new(
                presence_path(&slot.name),
                Some(ChannelValue::Scalar(Scalar::UInt(u64::from(value.is_some())))),
            ));
        }

        self.engine.append_row(cells).await.map_err(storage_error)?;
        self.rows_written += 1;

        debug!("Wrote row {} (pulse_id {})", self.rows_written, message.pulse_id);
        Ok(())
    }

    async fn reconcile(
        &mut self,
        header: &SchemaHeader,
        values: &[Option<ChannelValue>],
    ) -> RecorderResult<()> {
        info!("Data header change detected ({} channels)", header.len());

        if !self.initialized {
            self.write_metadata().await?;
            self.slots = header
                .channels
                .iter()
                .map(|definition| ChannelSlot {
                    name: definition.name.clone(),
                    cached: CachedDefinition::Unset,
                    announced: definition.clone(),
                    retired_generations: 0,
                })
                .collect();
            self.initialized = true;
        }

        if header.len() != self.slots.len() {
            return Err(RecorderError::SchemaViolation(format!(
                "number of channels in the stream changed from {} to {}",
                self.slots.len(),
                header.len()
            )));
        }

        if values.len() != header.len() {
            return Err(RecorderError::SchemaViolation(format!(
                "header announces {} channels but message carries {} values",
                header.len(),
                values.len()
            )));
        }

        for index in 0..header.len() {
            let definition = &header.channels[index];
            let present = values[index].is_some();
            self.reconcile_channel(index, definition, present).await?;
        }

        Ok(())
    }

    async fn reconcile_channel(
        &mut self,
        index: usize,
        definition: &ChannelDefinition,
        present: bool,
    ) -> RecorderResult<()> {
        let backfill = self.rows_written;
        let name = self.slots[index].name.clone();

        if definition.name != name {
            warn!(
                "Channel at index {} renamed from '{}' to '{}', keeping original name",
                index, name, definition.name
            );
        }

        self.slots[index].announced = definition.clone();

        let cached = self.slots[index].cached.clone();
        match (cached, present) {
            (CachedDefinition::Unset, _) => {
                debug!("Creating datasets for channel '{}' at index {}", name, index);

                self.engine
                    .create_group(&format!("/data/{}", name))
                    .await
                    .map_err(storage_error)?;
                self.engine
                    .create_dataset(
                        &pulse_id_path(&name),
                        &DatasetLayout::scalar(ChannelType::Int64),
                        backfill,
                    )
                    .await
                    .map_err(storage_error)?;
                self.engine
                    .create_dataset(
                        &presence_path(&name),
                        &DatasetLayout::scalar(ChannelType::Uint8),
                        backfill,
                    )
                    .await
                    .map_err(storage_error)?;

                if present {
                    self.create_data(index, definition).await?;
                } else {
                    info!(
                        "No data for channel '{}' was received, creating dataset stub",
                        name
                    );
                    self.slots[index].cached = CachedDefinition::Stub;
                }
            }

            // A header without accompanying data is never trusted to change anything
            (_, false) => {}

            (CachedDefinition::Stub, true) => {
                info!(
                    "First data for channel '{}', materializing dataset stub",
                    name
                );
                self.create_data(index, definition).await?;
            }

            (CachedDefinition::Concrete(current), true) => {
                if !current.same_layout(definition) {
                    info!(
                        "Channel definition changed for channel '{}'. Old definition: {:?}, new definition: {:?}",
                        name, current, definition
                    );
                    self.migrate(index, definition).await?;
                }
            }
        }

        Ok(())
    }

    async fn create_data(
        &mut self,
        index: usize,
        definition: &ChannelDefinition,
    ) -> RecorderResult<()> {
        let name = &self.slots[index].name;
        self.engine
            .create_dataset(&data_path(name), &layout_for(definition), self.rows_written)
            .await
            .map_err(storage_error)?;
        self.slots[index].cached = CachedDefinition::Concrete(definition.clone());
        Ok(())
    }

    async fn migrate(
        &mut self,
        index: usize,
        definition: &ChannelDefinition,
    ) -> RecorderResult<()> {
        let slot = &mut self.slots[index];
        slot.retired_generations += 1;
        let retired = retired_data_path(&slot.name, slot.retired_generations);
        let current = data_path(&slot.name);

        self.engine
            .replace_dataset(&current, &retired, &layout_for(definition), self.rows_written)
            .await
            .map_err(storage_error)?;

        self.slots[index].cached = CachedDefinition::Concrete(definition.clone());
        Ok(())
    }

    async fn write_metadata(&mut self) -> RecorderResult<()> {
        info!("Initializing format datasets");

        for key in REQUIRED_PARAMETERS {
            let value = self.metadata.get(key).ok_or_else(|| {
                RecorderError::MissingParameters {
                    required: REQUIRED_PARAMETERS.iter().map(|k| k.to_string()).collect(),
                    received: Vec::new(),
                }
            })?;
            self.engine
                .write_attribute(&format!("/{}", key), &value)
                .await
                .map_err(storage_error)?;
        }

        Ok(())
    }

    /// Close the file once the stop boundary has been passed
    ///
    /// Rows are only ever written for in-window messages, so nothing past
    /// the boundary needs pruning.
    pub async fn finalize(&mut self, stop: Option<Boundary>) -> RecorderResult<()> {
        match stop {
            Some(boundary) => info!(
                "Finalizing recording at {} after {} rows",
                boundary, self.rows_written
            ),
            None => info!("Finalizing recording after {} rows", self.rows_written),
        }
        self.close().await
    }

    /// Flush and close the output. Safe to call more than once.
    pub async fn close(&mut self) -> RecorderResult<()> {
        if self.closed {
            return Ok(());
        }
        self.engine.close().await.map_err(storage_error)?;
        self.closed = true;
        Ok(())
    }
}

fn storage_error(e: anyhow::Error) -> RecorderError {
    RecorderError::Storage(format!("{:#}", e))
}
