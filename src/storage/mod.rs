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

// Storage module
//
// Provides a trait-based abstraction for the append engine that performs
// the physical writes of a recording file, so the schema logic never
// touches a concrete file format.
//
// This module focuses on APPEND-ONLY operations.

pub mod backend;
pub mod factory;
pub mod filesystem;
pub mod memory;

pub use backend::{AppendEngine, Cell, DatasetLayout};
pub use factory::EngineFactory;
pub use filesystem::{FilesystemEngine, Manifest};
pub use memory::{MemoryEngine, MemoryFile};
