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

use crate::allocator::{Allocator, MemoryType};
use ferrite_core::gpu::{DriverError, MappedMemoryRange, MemoryId};
use std::sync::{Arc, Mutex};

/// An allocation of device memory, freed when the last owner drops it.
///
/// A shared allocation is held through `Arc<DeviceMemory>` by every buffer and
/// image bound into it; each of those owns only its byte range, never the
/// allocation handle. A dedicated allocation has exactly one owner.
#[derive(Debug)]
pub struct DeviceMemory {
    allocator: Arc<Allocator>,
    id: MemoryId,
    size: u64,
    memory_type: MemoryType,
    dedicated: bool,
    map_lock: Mutex<()>,
}

impl DeviceMemory {
    /// Takes ownership of memory returned by [`Allocator::allocate`].
    pub fn new(
        allocator: Arc<Allocator>,
        id: MemoryId,
        size: u64,
        memory_type: MemoryType,
        dedicated: bool,
    ) -> Self {
        Self {
            allocator,
            id,
            size,
            memory_type,
            dedicated,
            map_lock: Mutex::new(()),
        }
    }

    /// The driver handle.
    pub fn id(&self) -> MemoryId {
        self.id
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Memory type of the allocation.
    pub fn memory_type(&self) -> &MemoryType {
        &self.memory_type
    }

    /// Returns `true` if the allocation backs a single object.
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    /// The allocator that owns the underlying memory.
    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Maps `[offset, offset + len)`, lets `f` write into it, then flushes
    /// non-coherent memory and unmaps.
    ///
    /// # Errors
    ///
    /// Fails if the memory is not host-visible, the range is out of bounds or
    /// the driver refuses to map or flush.
    pub fn write_with<F>(&self, offset: u64, len: u64, f: F) -> Result<(), DriverError>
    where
        F: FnOnce(&mut [u8]),
    {
        self.check_range(offset, len)?;
        let _mapped = self.lock_mapping()?;
        let device = self.allocator.device();
        let ptr = device.map_memory(self.id, offset, len)?;
        // SAFETY: the driver mapped `len` bytes at `ptr` and they stay mapped
        // until `unmap_memory` below; no other view of the range exists here.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len as usize) };
        f(bytes);

        let flushed = if self.memory_type.is_host_coherent() {
            Ok(())
        } else {
            device.flush_mapped_memory_ranges(&[MappedMemoryRange::whole(self.id)])
        };
        device.unmap_memory(self.id);
        flushed
    }

    /// Copies `len` bytes starting at `offset` out of host-visible memory.
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, DriverError> {
        self.check_range(offset, len)?;
        let _mapped = self.lock_mapping()?;
        let device = self.allocator.device();
        let ptr = device.map_memory(self.id, offset, len)?;
        // SAFETY: see `write_with`.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len as usize) }.to_vec();
        device.unmap_memory(self.id);
        Ok(bytes)
    }

    // An allocation can only be mapped once at a time.
    fn lock_mapping(&self) -> Result<std::sync::MutexGuard<'_, ()>, DriverError> {
        self.map_lock
            .lock()
            .map_err(|e| DriverError::Backend(format!("Mutex poisoned (map_lock): {e}")))
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), DriverError> {
        if !self.memory_type.is_host_visible() {
            return Err(DriverError::MapFailed {
                memory: self.id,
                details: "memory is not host-visible".to_string(),
            });
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(DriverError::MapFailed {
                memory: self.id,
                details: format!(
                    "range {}..+{} exceeds allocation of {} bytes",
                    offset, len, self.size
                ),
            }),
        }
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        self.allocator.free(self.id, self.size);
    }
}
