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

// Append engine trait for columnar recording files

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::{ChannelType, ChannelValue, Encoding, Scalar};

/// Element type and per-row shape of a growable dataset
///
/// `shape` is in storage order (slowest varying dimension first) and excludes
/// the leading unbounded row dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    pub dtype: ChannelType,
    #[serde(default)]
    pub encoding: Encoding,
    pub shape: Vec<usize>,
}

impl DatasetLayout {
    pub fn new(dtype: ChannelType, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            encoding: Encoding::Little,
            shape,
        }
    }

    /// One element per row
    pub fn scalar(dtype: ChannelType) -> Self {
        Self::new(dtype, vec![1])
    }

    /// Variable length string, one per row
    pub fn var_string() -> Self {
        Self::new(ChannelType::String, Vec::new())
    }

    pub fn is_var_string(&self) -> bool {
        self.dtype == ChannelType::String
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Shape of the dataset after `rows` rows
    pub fn dataset_shape(&self, rows: u64) -> Vec<u64> {
        std::iter::once(rows)
            .chain(self.shape.iter().map(|&dim| dim as u64))
            .collect()
    }

    /// Maximum shape: unbounded rows, fixed per-row dimensions
    pub fn max_shape(&self) -> Vec<Option<usize>> {
        std::iter::once(None)
            .chain(self.shape.iter().map(|&dim| Some(dim)))
            .collect()
    }

    /// Array-interface style type code, e.g. `<f8`, `|u1`, `vlen-str`
    pub fn dtype_code(&self) -> String {
        let order = match self.encoding {
            Encoding::Little => '<',
            Encoding::Big => '>',
        };

        let (kind, order) = match self.dtype {
            ChannelType::String => return "vlen-str".to_string(),
            ChannelType::Bool => ('b', '|'),
            ChannelType::Int8 => ('i', '|'),
            ChannelType::Uint8 => ('u', '|'),
            ChannelType::Int16 | ChannelType::Int32 | ChannelType::Int64 => ('i', order),
            ChannelType::Uint16 | ChannelType::Uint32 | ChannelType::Uint64 => ('u', order),
            ChannelType::Float32 | ChannelType::Float64 => ('f', order),
        };

        format!("{}{}{}", order, kind, self.dtype.element_size().unwrap_or(0))
    }

    /// Neutral value appended for rows that carry no data
    pub fn fill_value(&self) -> ChannelValue {
        let element = match self.dtype {
            ChannelType::Bool => Scalar::Bool(false),
            ChannelType::String => Scalar::Text(String::new()),
            ChannelType::Float32 | ChannelType::Float64 => Scalar::Float(0.0),
            ChannelType::Int8 | ChannelType::Int16 | ChannelType::Int32 | ChannelType::Int64 => {
                Scalar::Int(0)
            }
            _ => Scalar::UInt(0),
        };

        match self.element_count() {
            0 | 1 => ChannelValue::Scalar(element),
            n => ChannelValue::Array(vec![element; n]),
        }
    }

    /// Check that a value can be stored as one row of this dataset
    pub fn check(&self, value: &ChannelValue) -> Result<()> {
        if self.is_var_string() {
            return match value {
                ChannelValue::Scalar(Scalar::Text(_)) => Ok(()),
                other => bail!("expected a string, got {:?}", other),
            };
        }

        let expected = self.element_count();
        if value.len() != expected {
            bail!(
                "expected {} elements for shape {:?}, got {}",
                expected,
                self.shape,
                value.len()
            );
        }

        if let Some(bad) = value.elements().iter().find(|e| !e.fits(self.dtype)) {
            bail!("element {:?} does not fit type {:?}", bad, self.dtype);
        }

        Ok(())
    }
}

/// One dataset's share of a row
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub dataset: String,
    /// `None` appends the dataset's fill value
    pub value: Option<ChannelValue>,
}

impl Cell {
    pub fn new(dataset: impl Into<String>, value: Option<ChannelValue>) -> Self {
        Self {
            dataset: dataset.into(),
            value,
        }
    }
}

/// Engine performing the physical appends for one recording file
///
/// The engine knows nothing about channels or schemas; it is told which
/// datasets exist and what to append to them. Paths are slash separated,
/// e.g. `/data/CHANNEL/data`.
#[async_trait]
pub trait AppendEngine: Send + Sync {
    /// Prepare the output location (create directories, open the file)
    async fn initialize(&mut self) -> Result<()>;

    /// Store a scalar string entry
    async fn write_attribute(&mut self, path: &str, value: &str) -> Result<()>;

    /// Reserve a group without committing any dataset in it
    async fn create_group(&mut self, path: &str) -> Result<()>;

    /// Create a growable dataset, pre-filled with `backfill_rows` fill rows
    async fn create_dataset(
        &mut self,
        path: &str,
        layout: &DatasetLayout,
        backfill_rows: u64,
    ) -> Result<()>;

    /// Freeze the dataset at `path` under `retired_path` and start a new one
    async fn replace_dataset(
        &mut self,
        path: &str,
        retired_path: &str,
        layout: &DatasetLayout,
        backfill_rows: u64,
    ) -> Result<()>;

    /// Append one logical row across several datasets
    ///
    /// Every cell is validated before any is applied.
    async fn append_row(&mut self, cells: Vec<Cell>) -> Result<()>;

    /// Flush and close. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Get backend type identifier
    fn backend_type(&self) -> &str;
}
