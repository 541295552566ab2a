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

// In-memory append engine

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{AppendEngine, Cell, DatasetLayout};
use crate::message::ChannelValue;

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDataset {
    pub layout: DatasetLayout,
    pub rows: Vec<ChannelValue>,
    /// Retired generations accept no further rows
    pub frozen: bool,
}

/// Contents of one in-memory recording file
#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    pub attributes: BTreeMap<String, String>,
    pub groups: BTreeSet<String>,
    pub datasets: BTreeMap<String, MemoryDataset>,
    pub closed: bool,
}

impl MemoryFile {
    pub fn dataset(&self, path: &str) -> Option<&MemoryDataset> {
        self.datasets.get(path)
    }

    pub fn row_count(&self, path: &str) -> Option<usize> {
        self.datasets.get(path).map(|d| d.rows.len())
    }
}

/// Append engine keeping the whole file in memory
///
/// Clones share the same file, so a clone kept outside the recorder can
/// inspect what was written.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    file: Arc<RwLock<MemoryFile>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryFile {
        self.file.read().await.clone()
    }
}

fn ensure_open(file: &MemoryFile) -> Result<()> {
    if file.closed {
        bail!("file is closed");
    }
    Ok(())
}

fn insert_dataset(
    file: &mut MemoryFile,
    path: &str,
    layout: &DatasetLayout,
    backfill_rows: u64,
) -> Result<()> {
    if file.datasets.contains_key(path) {
        bail!("dataset '{}' already exists", path);
    }

    let fill = layout.fill_value();
    file.datasets.insert(
        path.to_string(),
        MemoryDataset {
            layout: layout.clone(),
            rows: vec![fill; backfill_rows as usize],
            frozen: false,
        },
    );
    Ok(())
}

#[async_trait]
impl AppendEngine for MemoryEngine {
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn write_attribute(&mut self, path: &str, value: &str) -> Result<()> {
        let mut file = self.file.write().await;
        ensure_open(&file)?;
        file.attributes.insert(path.to_string(), value.to_string());
        Ok(())
    }

    async fn create_group(&mut self, path: &str) -> Result<()> {
        let mut file = self.file.write().await;
        ensure_open(&file)?;
        file.groups.insert(path.to_string());
        Ok(())
    }

    async fn create_dataset(
        &mut self,
        path: &str,
        layout: &DatasetLayout,
        backfill_rows: u64,
    ) -> Result<()> {
        let mut file = self.file.write().await;
        ensure_open(&file)?;
        insert_dataset(&mut file, path, layout, backfill_rows)?;
        debug!("Created dataset '{}' ({})", path, layout.dtype_code());
        Ok(())
    }

    async fn replace_dataset(
        &mut self,
        path: &str,
        retired_path: &str,
        layout: &DatasetLayout,
        backfill_rows: u64,
    ) -> Result<()> {
        let mut file = self.file.write().await;
        ensure_open(&file)?;

        if file.datasets.contains_key(retired_path) {
            bail!("dataset '{}' already exists", retired_path);
        }

        let mut retired = file
            .datasets
            .remove(path)
            .ok_or_else(|| anyhow!("dataset '{}' does not exist", path))?;
        retired.frozen = true;
        file.datasets.insert(retired_path.to_string(), retired);

        insert_dataset(&mut file, path, layout, backfill_rows)
    }

    async fn append_row(&mut self, cells: Vec<Cell>) -> Result<()> {
        let mut file = self.file.write().await;
        ensure_open(&file)?;

        for cell in &cells {
            let dataset = file
                .datasets
                .get(&cell.dataset)
                .ok_or_else(|| anyhow!("dataset '{}' does not exist", cell.dataset))?;
            if dataset.frozen {
                bail!("dataset '{}' is retired", cell.dataset);
            }
            if let Some(value) = &cell.value {
                dataset
                    .layout
                    .check(value)
                    .map_err(|e| anyhow!("dataset '{}': {}", cell.dataset, e))?;
            }
        }

        for cell in cells {
            if let Some(dataset) = file.datasets.get_mut(&cell.dataset) {
                let value = cell.value.unwrap_or_else(|| dataset.layout.fill_value());
                dataset.rows.push(value);
            }
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.file.write().await.closed = true;
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChannelType;

    #[tokio::test]
    async fn test_backfill_and_append() {
        let mut engine = MemoryEngine::new();
        let layout = DatasetLayout::scalar(ChannelType::Int64);
        engine.create_dataset("/a", &layout, 2).await.unwrap();
        engine
            .append_row(vec![Cell::new("/a", Some(5i64.into()))])
            .await
            .unwrap();
        engine.append_row(vec![Cell::new("/a", None)]).await.unwrap();

        let file = engine.snapshot().await;
        let rows = &file.dataset("/a").unwrap().rows;
        let expected: Vec<ChannelValue> =
            vec![0i64.into(), 0i64.into(), 5i64.into(), 0i64.into()];
        assert_eq!(rows, &expected);
    }

    #[tokio::test]
    async fn test_row_is_all_or_nothing() {
        let mut engine = MemoryEngine::new();
        engine
            .create_dataset("/a", &DatasetLayout::scalar(ChannelType::Int64), 0)
            .await
            .unwrap();

        let result = engine
            .append_row(vec![
                Cell::new("/a", Some(1i64.into())),
                Cell::new("/missing", Some(1i64.into())),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(engine.snapshot().await.row_count("/a"), Some(0));
    }

    #[tokio::test]
    async fn test_replace_freezes_old_generation() {
        let mut engine = MemoryEngine::new();
        engine
            .create_dataset("/d", &DatasetLayout::scalar(ChannelType::Int64), 0)
            .await
            .unwrap();
        engine
            .append_row(vec![Cell::new("/d", Some(1i64.into()))])
            .await
            .unwrap();

        let new_layout = DatasetLayout::new(ChannelType::Int64, vec![3]);
        engine
            .replace_dataset("/d", "/d(1)", &new_layout, 1)
            .await
            .unwrap();

        let file = engine.snapshot().await;
        assert!(file.dataset("/d(1)").unwrap().frozen);
        assert_eq!(file.row_count("/d(1)"), Some(1));
        assert_eq!(file.dataset("/d").unwrap().layout, new_layout);
        assert_eq!(file.row_count("/d"), Some(1));

        assert!(engine
            .append_row(vec![Cell::new("/d(1)", Some(2i64.into()))])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_closed_file_rejects_writes() {
        let mut engine = MemoryEngine::new();
        engine.close().await.unwrap();
        engine.close().await.unwrap();
        assert!(engine.write_attribute("/general/user", "x").await.is_err());
    }
}
