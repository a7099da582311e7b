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

//! Device memory allocation.
//!
//! The [`Allocator`] enumerates the memory types of a device once, answers
//! memory-type queries for the packing code in `ferrite-lanes`, and is the only
//! place that calls the driver's allocate and free entry points, so the global
//! counters of [`ferrite_core::memory`] stay exact.

use ferrite_core::gpu::{
    BufferId, DedicatedTarget, DeviceLimits, DriverError, GpuDriver, ImageId, MemoryAllocateInfo,
    MemoryHeapInfo, MemoryId, MemoryPropertyFlags, MemoryRequirements,
};
use ferrite_core::memory;
use std::sync::Arc;

/// One memory type of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Index of the type, as used in type masks.
    pub index: u32,
    /// Heap the type allocates from.
    pub heap: u32,
    /// Property flags.
    pub flags: MemoryPropertyFlags,
}

impl MemoryType {
    /// The bit of this type in a memory-type mask.
    pub const fn mask_bit(&self) -> u32 {
        1 << self.index
    }

    /// Memory the host can map.
    pub fn is_host_visible(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Host writes are visible without explicit flushes.
    pub fn is_host_coherent(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Host reads go through the CPU cache.
    pub fn is_host_cached(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::HOST_CACHED)
    }

    /// Memory local to the device.
    pub fn is_device_local(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::DEVICE_LOCAL)
    }
}

/// The intended use of an allocation, used to rank memory types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationUsage {
    /// Device-local; non-host-visible types are preferred, unified memory is
    /// accepted.
    DeviceLocal,
    /// Device-local and mappable; coherent types are preferred.
    DeviceLocalHostVisible,
    /// Staging memory written by the host and read by transfers.
    HostTransitionSource,
    /// Read-back memory written by transfers and read by the host.
    HostTransitionDestination,
}

impl AllocationUsage {
    fn required(self) -> MemoryPropertyFlags {
        match self {
            Self::DeviceLocal => MemoryPropertyFlags::DEVICE_LOCAL,
            Self::DeviceLocalHostVisible => {
                MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE
            }
            Self::HostTransitionSource | Self::HostTransitionDestination => {
                MemoryPropertyFlags::HOST_VISIBLE
            }
        }
    }

    // Lower is better.
    fn cost(self, ty: &MemoryType) -> u32 {
        match self {
            Self::DeviceLocal => ty.is_host_visible() as u32,
            Self::DeviceLocalHostVisible => !ty.is_host_coherent() as u32,
            Self::HostTransitionSource => {
                (!ty.is_host_coherent() as u32) * 2
                    + ty.is_host_cached() as u32
                    + (ty.is_device_local() as u32) * 4
            }
            Self::HostTransitionDestination => {
                (!ty.is_host_cached() as u32) * 2 + !ty.is_host_coherent() as u32
            }
        }
    }
}

/// Device memory allocator.
///
/// Read-only after construction and shared as `Arc<Allocator>` between the
/// transfer pipeline, the render passes and the long-lived objects that free
/// their memory on drop.
#[derive(Debug)]
pub struct Allocator {
    device: Arc<dyn GpuDriver>,
    types: Vec<MemoryType>,
    heaps: Vec<MemoryHeapInfo>,
    limits: DeviceLimits,
    dedicated: bool,
}

impl Allocator {
    /// Enumerates the memory types and limits of `device`.
    pub fn new(device: Arc<dyn GpuDriver>) -> Self {
        let properties = device.memory_properties();
        let types = properties
            .types
            .iter()
            .enumerate()
            .take(32)
            .map(|(index, info)| MemoryType {
                index: index as u32,
                heap: info.heap_index,
                flags: info.flags,
            })
            .collect::<Vec<_>>();
        let limits = device.limits();
        let dedicated = device.supports_dedicated_allocation();

        log::debug!(
            "Allocator: {} memory types, {} heaps, atom {} granularity {} dedicated {}",
            types.len(),
            properties.heaps.len(),
            limits.non_coherent_atom_size,
            limits.buffer_image_granularity,
            dedicated
        );

        Self {
            device,
            types,
            heaps: properties.heaps,
            limits,
            dedicated,
        }
    }

    /// The driver this allocator allocates from.
    pub fn device(&self) -> &Arc<dyn GpuDriver> {
        &self.device
    }

    /// All memory types, indexed by their type index.
    pub fn memory_types(&self) -> &[MemoryType] {
        &self.types
    }

    /// Memory heaps of the device.
    pub fn memory_heaps(&self) -> &[MemoryHeapInfo] {
        &self.heaps
    }

    /// The memory type with the given index.
    pub fn memory_type(&self, index: u32) -> Option<&MemoryType> {
        self.types.get(index as usize)
    }

    /// A mask with one bit set for every memory type of the device.
    pub fn initial_type_mask(&self) -> u32 {
        match self.types.len() {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }

    /// Finds a memory type allowed by `type_mask` that fits `usage`.
    ///
    /// Among the candidates, the one with the lowest mapping cost for the usage
    /// wins; ties go to the lowest index. Returns `None` when nothing matches,
    /// which callers treat as fatal for the resource being allocated.
    pub fn find_memory_type(&self, type_mask: u32, usage: AllocationUsage) -> Option<&MemoryType> {
        let required = usage.required();
        self.types
            .iter()
            .filter(|ty| type_mask & ty.mask_bit() != 0 && ty.flags.contains(required))
            .min_by_key(|ty| (usage.cost(ty), ty.index))
    }

    /// Alignment of flushed ranges in non-coherent memory.
    pub fn non_coherent_atom_size(&self) -> u64 {
        self.limits.non_coherent_atom_size.max(1)
    }

    /// Granularity separating linear and optimal resources in one allocation.
    pub fn buffer_image_granularity(&self) -> u64 {
        self.limits.buffer_image_granularity.max(1)
    }

    /// Returns `true` if the driver supports dedicated allocations.
    pub fn has_dedicated_feature(&self) -> bool {
        self.dedicated
    }

    /// Memory requirements of a buffer.
    pub fn buffer_memory_requirements(
        &self,
        buffer: BufferId,
    ) -> Result<MemoryRequirements, DriverError> {
        let mut req = self.device.buffer_memory_requirements(buffer)?;
        if !self.dedicated {
            req.prefers_dedicated = false;
            req.requires_dedicated = false;
        }
        Ok(req)
    }

    /// Memory requirements of an image.
    pub fn image_memory_requirements(&self, image: ImageId) -> Result<MemoryRequirements, DriverError> {
        let mut req = self.device.image_memory_requirements(image)?;
        if !self.dedicated {
            req.prefers_dedicated = false;
            req.requires_dedicated = false;
        }
        Ok(req)
    }

    /// Allocates `size` bytes of `memory_type`, optionally dedicated to one object.
    ///
    /// # Errors
    ///
    /// Propagates the driver failure; nothing is recorded in that case.
    pub fn allocate(
        &self,
        size: u64,
        memory_type: &MemoryType,
        dedicated: Option<DedicatedTarget>,
    ) -> Result<MemoryId, DriverError> {
        let dedicated = dedicated.filter(|_| self.dedicated);
        let id = self.device.allocate_memory(&MemoryAllocateInfo {
            size,
            memory_type_index: memory_type.index,
            dedicated,
        })?;
        memory::record_allocation(size, dedicated.is_some());
        log::trace!(
            "Allocated {} bytes of memory type {} as {:?}",
            size,
            memory_type.index,
            id
        );
        Ok(id)
    }

    /// Frees memory obtained from [`Allocator::allocate`].
    pub fn free(&self, memory: MemoryId, size: u64) {
        self.device.free_memory(memory);
        memory::record_free(size);
        log::trace!("Freed {:?} ({} bytes)", memory, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(index: u32, flags: MemoryPropertyFlags) -> MemoryType {
        MemoryType {
            index,
            heap: 0,
            flags,
        }
    }

    #[test]
    fn staging_prefers_coherent_uncached_system_memory() {
        let bar = ty(
            0,
            MemoryPropertyFlags::DEVICE_LOCAL
                | MemoryPropertyFlags::HOST_VISIBLE
                | MemoryPropertyFlags::HOST_COHERENT,
        );
        let system = ty(
            1,
            MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        );
        let cached = ty(2, MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED);

        let usage = AllocationUsage::HostTransitionSource;
        assert!(usage.cost(&system) < usage.cost(&bar));
        assert!(usage.cost(&system) < usage.cost(&cached));
    }

    #[test]
    fn readback_prefers_cached() {
        let coherent = ty(
            0,
            MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        );
        let cached = ty(1, MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED);
        let usage = AllocationUsage::HostTransitionDestination;
        assert!(usage.cost(&cached) < usage.cost(&coherent));
    }

    #[test]
    fn device_local_accepts_unified_memory() {
        let unified = ty(
            0,
            MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE,
        );
        assert!(unified
            .flags
            .contains(AllocationUsage::DeviceLocal.required()));
        assert_eq!(AllocationUsage::DeviceLocal.cost(&unified), 1);
    }
}
