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

// Engine factory for creating append engines from configuration

use super::backend::AppendEngine;
use super::filesystem::FilesystemEngine;
use super::memory::MemoryEngine;
use crate::config::StorageConfig;
use anyhow::{bail, Result};

pub struct EngineFactory;

impl EngineFactory {
    /// Create the append engine for one recording
    pub fn create(config: &StorageConfig) -> Result<Box<dyn AppendEngine>> {
        match config.backend.as_str() {
            "filesystem" => {
                let engine = FilesystemEngine::new(config.filesystem.clone())?;
                Ok(Box::new(engine))
            }

            "memory" => Ok(Box::new(MemoryEngine::new())),

            unknown => bail!(
                "Unknown storage backend: '{}'. Supported: filesystem, memory",
                unknown
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesystemConfig;

    #[test]
    fn test_create_filesystem_engine() {
        let storage_config = StorageConfig {
            backend: "filesystem".to_string(),
            filesystem: FilesystemConfig {
                base_path: "/tmp/bsread-recorder-test".to_string(),
            },
        };

        let engine = EngineFactory::create(&storage_config);
        assert!(engine.is_ok());
        assert_eq!(engine.unwrap().backend_type(), "filesystem");
    }

    #[test]
    fn test_create_memory_engine() {
        let storage_config = StorageConfig {
            backend: "memory".to_string(),
            ..Default::default()
        };

        let engine = EngineFactory::create(&storage_config).unwrap();
        assert_eq!(engine.backend_type(), "memory");
    }

    #[test]
    fn test_create_unknown_engine() {
        let storage_config = StorageConfig {
            backend: "unknown_backend".to_string(),
            ..Default::default()
        };

        let engine = EngineFactory::create(&storage_config);
        assert!(engine.is_err());
        if let Err(e) = engine {
            assert!(e.to_string().contains("Unknown storage backend"));
        }
    }
}
