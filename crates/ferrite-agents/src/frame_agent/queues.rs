// Copyright 2025 eraflo
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

use super::FrameError;
use ferrite_core::gpu::{GpuDriver, QueueFamilyLayout, QueueOperations};
use ferrite_data::DeviceQueue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The device queues used by frames: one queue per selected family.
///
/// Logical queues mapped to the same family share one [`DeviceQueue`], whose
/// submission lock keeps a single submission in flight per slot.
#[derive(Debug)]
pub struct QueueSet {
    layout: QueueFamilyLayout,
    queues: BTreeMap<u32, Arc<DeviceQueue>>,
}

impl QueueSet {
    /// Selects the queue families of `device` and retrieves their first queue.
    pub fn new(device: Arc<dyn GpuDriver>) -> Result<Self, FrameError> {
        let layout = QueueFamilyLayout::select(&device.queue_families()).ok_or(FrameError::NoQueueFamily)?;
        let mut queues = BTreeMap::new();
        for family in [layout.graphics, layout.present, layout.transfer, layout.compute] {
            if !queues.contains_key(&family) {
                queues.insert(family, Arc::new(DeviceQueue::new(device.clone(), family, 0)?));
            }
        }
        log::info!(
            "Frame queues: graphics {}, present {}, transfer {}, compute {} ({} distinct)",
            layout.graphics,
            layout.present,
            layout.transfer,
            layout.compute,
            queues.len()
        );
        Ok(Self { layout, queues })
    }

    /// The family chosen for each logical queue.
    pub fn layout(&self) -> &QueueFamilyLayout {
        &self.layout
    }

    /// The queue of `family`, if it is one of the selected families.
    pub fn queue_for_family(&self, family: u32) -> Option<&Arc<DeviceQueue>> {
        self.queues.get(&family)
    }

    /// The queue executing work that requires `ops`.
    pub fn queue_for(&self, ops: QueueOperations) -> &Arc<DeviceQueue> {
        let family = self.layout.family_for(ops);
        // Every family of the layout got a queue in `new`.
        &self.queues[&family]
    }

    /// The graphics queue.
    pub fn graphics(&self) -> &Arc<DeviceQueue> {
        &self.queues[&self.layout.graphics]
    }

    /// The present queue.
    pub fn present(&self) -> &Arc<DeviceQueue> {
        &self.queues[&self.layout.present]
    }

    /// The transfer queue.
    pub fn transfer(&self) -> &Arc<DeviceQueue> {
        &self.queues[&self.layout.transfer]
    }

    /// The compute queue.
    pub fn compute(&self) -> &Arc<DeviceQueue> {
        &self.queues[&self.layout.compute]
    }

    /// Number of distinct queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Always `false`; a set holds at least the graphics queue.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
