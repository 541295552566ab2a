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

use anyhow::{bail, Result};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Bounded FIFO between the ingest worker and the forward worker
///
/// Holds at most `capacity` entries. Ingesting into a full buffer evicts the
/// oldest entry instead of blocking the producer, so memory stays bounded no
/// matter how far the consumer falls behind.
pub struct RelayBuffer<T> {
    queue: ArrayQueue<T>,

    // Statistics
    total_ingested: AtomicU64,
    total_evicted: AtomicU64,
}

impl<T> RelayBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("relay buffer capacity must be > 0");
        }

        Ok(Self {
            queue: ArrayQueue::new(capacity),
            total_ingested: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        })
    }

    /// Append an entry, evicting the oldest one when full. Never blocks.
    pub fn ingest(&self, item: T) {
        self.total_ingested.fetch_add(1, Ordering::Relaxed);

        if self.queue.force_push(item).is_some() {
            let evicted = self.total_evicted.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                "Relay buffer full (capacity {}), evicted oldest entry ({} total)",
                self.queue.capacity(),
                evicted
            );
        }
    }

    /// Remove and return the oldest entry, `None` when empty
    pub fn relay(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// (ingested, evicted) since construction
    pub fn stats(&self) -> (u64, u64) {
        (
            self.total_ingested.load(Ordering::Relaxed),
            self.total_evicted.load(Ordering::Relaxed),
        )
    }
}
