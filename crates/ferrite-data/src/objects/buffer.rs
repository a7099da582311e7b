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
    BufferCreateInfo, BufferId, BufferMemoryBarrier, DedicatedTarget, DriverError, GpuDriver,
};
use std::sync::{Arc, Mutex};

/// A long-lived device buffer bound to device memory.
///
/// The buffer owns its driver handle and destroys it on drop. Its memory is
/// either a dedicated allocation or a range of a shared one; see
/// [`DeviceMemory`].
///
/// A buffer may carry a *pending barrier*: the release half of a queue-family
/// ownership transfer recorded by the pass that produced it. The pass that
/// consumes the buffer on the acquiring family takes it with
/// [`Buffer::take_pending_barrier`] and records the acquire half.
#[derive(Debug)]
pub struct Buffer {
    device: Arc<dyn GpuDriver>,
    id: BufferId,
    name: String,
    info: BufferCreateInfo,
    memory: Arc<DeviceMemory>,
    offset: u64,
    pending: Mutex<Option<BufferMemoryBarrier>>,
    validate_barriers: bool,
}

impl Buffer {
    /// Wraps a driver buffer that is already bound to `memory` at `offset`.
    pub fn from_bound(
        name: impl Into<String>,
        id: BufferId,
        info: BufferCreateInfo,
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

    /// Creates a buffer with its own allocation of the given usage class.
    ///
    /// Uses a dedicated allocation when the driver supports it. Every
    /// partially created object is released on failure.
    pub fn create(
        allocator: &Arc<Allocator>,
        name: impl Into<String>,
        info: BufferCreateInfo,
        usage: AllocationUsage,
    ) -> Result<Self, DriverError> {
        let name = name.into();
        let device = allocator.device();
        let id = device.create_buffer(&info)?;

        let bound = allocator
            .buffer_memory_requirements(id)
            .and_then(|req| {
                allocate_standalone(allocator, &req, usage, DedicatedTarget::Buffer(id))
            })
            .and_then(|memory| {
                device.bind_buffer_memory(id, memory.id(), 0)?;
                Ok(memory)
            });

        match bound {
            Ok(memory) => Ok(Self::from_bound(name, id, info, memory, 0)),
            Err(e) => {
                device.destroy_buffer(id);
                log::error!("Fail to create buffer '{}': {}", name, e);
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
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor the buffer was created with.
    pub fn info(&self) -> &BufferCreateInfo {
        &self.info
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// The memory backing this buffer.
    pub fn memory(&self) -> &Arc<DeviceMemory> {
        &self.memory
    }

    /// Offset of the buffer inside its memory.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns `true` if the backing memory belongs to this buffer alone.
    pub fn is_dedicated(&self) -> bool {
        self.memory.is_dedicated()
    }

    /// Writes `data` at `offset` through a host mapping.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), DriverError> {
        self.write_with(offset, data.len() as u64, |dst| dst.copy_from_slice(data))
    }

    /// Maps `len` bytes at `offset` and lets `f` fill them.
    pub fn write_with<F>(&self, offset: u64, len: u64, f: F) -> Result<(), DriverError>
    where
        F: FnOnce(&mut [u8]),
    {
        self.check_range(offset, len)?;
        self.memory.write_with(self.offset + offset, len, f)
    }

    /// Reads `len` bytes at `offset` through a host mapping.
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, DriverError> {
        self.check_range(offset, len)?;
        self.memory.read(self.offset + offset, len)
    }

    /// Stores the release half of an ownership transfer.
    pub fn set_pending_barrier(&self, barrier: BufferMemoryBarrier) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(barrier);
        }
    }

    /// The stored release barrier, if any.
    pub fn pending_barrier(&self) -> Option<BufferMemoryBarrier> {
        self.pending.lock().ok().and_then(|pending| *pending)
    }

    /// Removes and returns the stored release barrier.
    pub fn take_pending_barrier(&self) -> Option<BufferMemoryBarrier> {
        self.pending.lock().ok().and_then(|mut pending| pending.take())
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), DriverError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.info.size => Ok(()),
            _ => Err(DriverError::MapFailed {
                memory: self.memory.id(),
                details: format!(
                    "range {}..+{} exceeds buffer '{}' of {} bytes",
                    offset, len, self.name, self.info.size
                ),
            }),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.validate_barriers {
            if let Some(barrier) = self.take_pending_barrier() {
                if barrier.is_ownership_transfer() {
                    log::error!(
                        "Buffer '{}' destroyed with an unacquired ownership release ({} -> {})",
                        self.name,
                        barrier.src_queue_family,
                        barrier.dst_queue_family
                    );
                }
            }
        }
        self.device.destroy_buffer(self.id);
    }
}
