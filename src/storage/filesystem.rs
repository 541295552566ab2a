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

// Filesystem append engine
//
// A recording is a directory. Every dataset is a JSON-lines file (one row
// per line), every attribute a small text file, and `manifest.json` written
// on close describes layouts and row counts of all generations.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use super::backend::{AppendEngine, Cell, DatasetLayout};
use crate::config::FilesystemConfig;

pub const MANIFEST_FILE: &str = "manifest.json";

struct OpenDataset {
    layout: DatasetLayout,
    rows: u64,
    writer: BufWriter<fs::File>,
}

/// Description of one dataset in `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDataset {
    pub dtype: String,
    pub shape: Vec<u64>,
    pub max_shape: Vec<Option<usize>>,
    pub layout: DatasetLayout,
    pub retired: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub attributes: BTreeMap<String, String>,
    pub groups: Vec<String>,
    pub datasets: BTreeMap<String, ManifestDataset>,
}

impl Manifest {
    pub async fn load(base_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(base_path.join(MANIFEST_FILE))
            .await
            .context("Failed to read manifest")?;
        serde_json::from_str(&content).context("Failed to parse manifest")
    }
}

/// Filesystem engine writing one recording directory
pub struct FilesystemEngine {
    base_path: PathBuf,
    datasets: HashMap<String, OpenDataset>,
    manifest: Manifest,
    closed: bool,
}

impl FilesystemEngine {
    pub fn new(config: FilesystemConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem engine at: {}",
            base_path.display()
        );

        Ok(Self {
            base_path,
            datasets: HashMap::new(),
            manifest: Manifest::default(),
            closed: false,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a slash separated dataset path below the base directory
    ///
    /// Every segment must be a plain name; channel names come off the wire.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.base_path.clone();
        for segment in path.trim_start_matches('/').split('/') {
            if matches!(segment, "" | "." | "..") || segment.contains('\\') {
                bail!("invalid segment '{}' in dataset path '{}'", segment, path);
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }

    /// File holding the rows of a dataset
    pub fn dataset_file(&self, path: &str) -> Result<PathBuf> {
        let mut file = self.resolve(path)?.into_os_string();
        file.push(".jsonl");
        Ok(PathBuf::from(file))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            bail!("recording '{}' is closed", self.base_path.display());
        }
        Ok(())
    }

    async fn ensure_parent(&self, file: &Path) -> Result<()> {
        if let Some(parent) = file.parent() {
            if !parent.exists() {
                debug!("Creating directory: {}", parent.display());
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create dataset directory")?;
            }
        }
        Ok(())
    }

    async fn open_dataset(
        &mut self,
        path: &str,
        layout: &DatasetLayout,
        backfill_rows: u64,
    ) -> Result<()> {
        if self.datasets.contains_key(path) || self.manifest.datasets.contains_key(path) {
            bail!("dataset '{}' already exists", path);
        }

        let file_path = self.dataset_file(path)?;
        self.ensure_parent(&file_path).await?;

        let file = fs::File::create(&file_path)
            .await
            .context(format!("Failed to create file: {}", file_path.display()))?;
        let mut writer = BufWriter::new(file);

        if backfill_rows > 0 {
            let mut line = serde_json::to_vec(&layout.fill_value())?;
            line.push(b'\n');
            for _ in 0..backfill_rows {
                writer.write_all(&line).await.context("Failed to write fill row")?;
            }
        }

        debug!(
            "Created dataset '{}' ({}, {} fill rows)",
            path,
            layout.dtype_code(),
            backfill_rows
        );

        self.datasets.insert(
            path.to_string(),
            OpenDataset {
                layout: layout.clone(),
                rows: backfill_rows,
                writer,
            },
        );
        Ok(())
    }

    fn describe(layout: &DatasetLayout, rows: u64, retired: bool) -> ManifestDataset {
        ManifestDataset {
            dtype: layout.dtype_code(),
            shape: layout.dataset_shape(rows),
            max_shape: layout.max_shape(),
            layout: layout.clone(),
            retired,
        }
    }
}

#[async_trait]
impl AppendEngine for FilesystemEngine {
    async fn initialize(&mut self) -> Result<()> {
        if !self.base_path.exists() {
            info!("Creating output directory: {}", self.base_path.display());
            fs::create_dir_all(&self.base_path)
                .await
                .context("Failed to create output directory")?;
        } else {
            info!(
                "Output directory already exists: {}",
                self.base_path.display()
            );
        }
        Ok(())
    }

    async fn write_attribute(&mut self, path: &str, value: &str) -> Result<()> {
        self.ensure_open()?;

        let file_path = self.resolve(path)?;
        self.ensure_parent(&file_path).await?;
        fs::write(&file_path, value)
            .await
            .context(format!("Failed to write attribute: {}", file_path.display()))?;

        self.manifest
            .attributes
            .insert(path.to_string(), value.to_string());
        Ok(())
    }

    async fn create_group(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;

        fs::create_dir_all(self.resolve(path)?)
            .await
            .context("Failed to create group directory")?;
        if !self.manifest.groups.iter().any(|g| g == path) {
            self.manifest.groups.push(path.to_string());
        }
        Ok(())
    }

    async fn create_dataset(
        &mut self,
        path: &str,
        layout: &DatasetLayout,
        backfill_rows: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        self.open_dataset(path, layout, backfill_rows).await
    }

    async fn replace_dataset(
        &mut self,
        path: &str,
        retired_path: &str,
        layout: &DatasetLayout,
        backfill_rows: u64,
    ) -> Result<()> {
        self.ensure_open()?;

        if self.manifest.datasets.contains_key(retired_path) {
            bail!("dataset '{}' already exists", retired_path);
        }

        let mut current = self
            .datasets
            .remove(path)
            .ok_or_else(|| anyhow!("dataset '{}' does not exist", path))?;
        current.writer.flush().await.context("Failed to flush dataset")?;
        drop(current.writer);

        fs::rename(self.dataset_file(path)?, self.dataset_file(retired_path)?)
            .await
            .context(format!("Failed to retire dataset '{}'", path))?;

        info!(
            "Retired dataset '{}' as '{}' after {} rows",
            path, retired_path, current.rows
        );

        self.manifest.datasets.insert(
            retired_path.to_string(),
            Self::describe(&current.layout, current.rows, true),
        );

        self.open_dataset(path, layout, backfill_rows).await
    }

    async fn append_row(&mut self, cells: Vec<Cell>) -> Result<()> {
        self.ensure_open()?;

        let mut lines = Vec::with_capacity(cells.len());
        for cell in &cells {
            let dataset = self.datasets.get(&cell.dataset).ok_or_else(|| {
                anyhow!("dataset '{}' does not exist or is retired", cell.dataset)
            })?;
            let value = match &cell.value {
                Some(value) => {
                    dataset
                        .layout
                        .check(value)
                        .map_err(|e| anyhow!("dataset '{}': {}", cell.dataset, e))?;
                    serde_json::to_vec(value)?
                }
                None => serde_json::to_vec(&dataset.layout.fill_value())?,
            };
            lines.push(value);
        }

        for (cell, mut line) in cells.iter().zip(lines) {
            if let Some(dataset) = self.datasets.get_mut(&cell.dataset) {
                line.push(b'\n');
                dataset
                    .writer
                    .write_all(&line)
                    .await
                    .context("Failed to append row")?;
                dataset.rows += 1;
            }
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        for (path, dataset) in self.datasets.iter_mut() {
            dataset
                .writer
                .flush()
                .await
                .context(format!("Failed to flush dataset '{}'", path))?;
            self.manifest.datasets.insert(
                path.clone(),
                Self::describe(&dataset.layout, dataset.rows, false),
            );
        }

        let manifest_json = serde_json::to_string_pretty(&self.manifest)
            .context("Failed to serialize manifest")?;
        fs::write(self.base_path.join(MANIFEST_FILE), manifest_json)
            .await
            .context("Failed to write manifest")?;

        self.datasets.clear();
        self.closed = true;

        info!("Closed recording at {}", self.base_path.display());
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}
