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

use super::{allocate_standalone, DeviceMemory};
use crate::allocator::{AllocationUsage, Allocator};
use ferrite_core::gpu::{
    DedicatedTarget, DriverError, GpuDriver, ImageCreateInfo, ImageId, ImageMemoryBarrier,
    ImageSubresourceRange,
};
use std::sync::{Arc, Mutex};

/// A long-lived device image bound to device memory.
///
/// Same ownership rules as [`Buffer`](super::Buffer), including the pending
/// ownership-transfer barrier.
#[derive(Debug)]
pub struct Image {
    device: Arc<dyn GpuDriver>,
    id: ImageId,
    name: String,
    info: ImageCreateInfo,
    memory: Arc<DeviceMemory>,
    offset: u64,
    pending: Mutex<Option<ImageMemoryBarrier>>,
    validate_barriers: bool,
}

impl Image {
    /// Wraps a driver image that is already bound to `memory` at `offset`.
    pub fn from_bound(
        name: impl Into<String>,
        id: ImageId,
        info: ImageCreateInfo,
        memory: Arc<DeviceMemory>,
        offset: u64,
    ) -> Self {
        Self {
            device: memory.allocator().device().clone(),
            id,
            name: name.into(),
            info,
            memory,
            offset,
            pending: Mutex::new(None),
            validate_barriers: cfg!(debug_assertions),
        }
    }

    /// Creates an image with its own allocation of the given usage class.
    pub fn create(
        allocator: &Arc<Allocator>,
        name: impl Into<String>,
        info: ImageCreateInfo,
        usage: AllocationUsage,
    ) -> Result<Self, DriverError> {
        let name = name.into();
        let device = allocator.device();
        let id = device.create_image(&info)?;

        let bound = allocator
            .image_memory_requirements(id)
            .and_then(|req| allocate_standalone(allocator, &req, usage, DedicatedTarget::Image(id)))
            .and_then(|memory| {
                device.bind_image_memory(id, memory.id(), 0)?;
                Ok(memory)
            });

        match bound {
            Ok(memory) => Ok(Self::from_bound(name, id, info, memory, 0)),
            Err(e) => {
                device.destroy_image(id);
                log::error!("Fail to create image '{}': {}", name, e);
                Err(e)
            }
        }
    }

    /// Enables or disables the unacquired-release check on drop.
    pub fn with_barrier_validation(mut self, enabled: bool) -> Self {
        self.validate_barriers = enabled;
        self
    }

    /// The driver handle.
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor the image was created with.
    pub fn info(&self) -> &ImageCreateInfo {
        &self.info
    }

    /// The memory backing this image.
    pub fn memory(&self) -> &Arc<DeviceMemory> {
        &self.memory
    }

    /// Offset of the image inside its memory.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns `true` if the backing memory belongs to this image alone.
    pub fn is_dedicated(&self) -> bool {
        self.memory.is_dedicated()
    }

    /// Every mip level and layer of the image's aspects.
    pub fn full_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange::full(
            self.info.format.aspects(true),
            self.info.mip_levels,
            self.info.array_layers,
        )
    }

    /// Stores the release half of an ownership transfer.
    pub fn set_pending_barrier(&self, barrier: ImageMemoryBarrier) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(barrier);
        }
    }

    /// The stored release barrier, if any.
    pub fn pending_barrier(&self) -> Option<ImageMemoryBarrier> {
        self.pending.lock().ok().and_then(|pending| *pending)
    }

    /// Removes and returns the stored release barrier.
    pub fn take_pending_barrier(&self) -> Option<ImageMemoryBarrier> {
        self.pending.lock().ok().and_then(|mut pending| pending.take())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if self.validate_barriers {
            if let Some(barrier) = self.take_pending_barrier() {
                if barrier.is_ownership_transfer() {
                    log::error!(
                        "Image '{}' destroyed with an unacquired ownership release ({} -> {})",
                        self.name,
                        barrier.src_queue_family,
                        barrier.dst_queue_family
                    );
                }
            }
        }
        self.device.destroy_image(self.id);
    }
}
