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

//! Device memory heaps, memory types and allocation descriptors.

use super::handles::{BufferId, ImageId, MemoryId};
use crate::ferrite_bitflags;

/// Sentinel size meaning "up to the end of the allocation" in map/flush ranges
/// and buffer barriers.
pub const WHOLE_SIZE: u64 = u64::MAX;

ferrite_bitflags! {
    /// Properties of one memory type. Values match the driver's bit layout.
    pub struct MemoryPropertyFlags: u32 {
        /// Most efficient for device access.
        const DEVICE_LOCAL = 0x0000_0001;
        /// Can be mapped for host access.
        const HOST_VISIBLE = 0x0000_0002;
        /// Host writes are visible without explicit flushes.
        const HOST_COHERENT = 0x0000_0004;
        /// Host reads are cached.
        const HOST_CACHED = 0x0000_0008;
        /// Backing may be committed lazily.
        const LAZILY_ALLOCATED = 0x0000_0010;
    }
}

ferrite_bitflags! {
    /// Properties of one memory heap.
    pub struct MemoryHeapFlags: u32 {
        /// The heap lives in device-local memory.
        const DEVICE_LOCAL = 0x0000_0001;
    }
}

/// One memory heap as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapInfo {
    /// Total size of the heap in bytes.
    pub size: u64,
    /// Heap properties.
    pub flags: MemoryHeapFlags,
}

/// One memory type as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTypeInfo {
    /// Index of the heap this type allocates from.
    pub heap_index: u32,
    /// Properties of the type.
    pub flags: MemoryPropertyFlags,
}

/// The full memory topology of a device, enumerated once at init.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryProperties {
    /// Memory types, indexed by their position.
    pub types: Vec<MemoryTypeInfo>,
    /// Memory heaps, indexed by their position.
    pub heaps: Vec<MemoryHeapInfo>,
}

/// Limits the transfer core needs from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Alignment of mapped ranges flushed on non-coherent memory.
    pub non_coherent_atom_size: u64,
    /// Granularity separating linear and optimal resources in one allocation.
    pub buffer_image_granularity: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            non_coherent_atom_size: 64,
            buffer_image_granularity: 1024,
        }
    }
}

/// Memory requirements of a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRequirements {
    /// Required size in bytes.
    pub size: u64,
    /// Required offset alignment in bytes.
    pub alignment: u64,
    /// Bitmask of memory type indices able to back the object.
    pub memory_type_bits: u32,
    /// The driver would rather have a dedicated allocation for this object.
    pub prefers_dedicated: bool,
    /// The object must be bound to a dedicated allocation.
    pub requires_dedicated: bool,
}

impl MemoryRequirements {
    /// Returns `true` when the object must not join a shared allocation.
    pub const fn is_dedicated(&self) -> bool {
        self.prefers_dedicated || self.requires_dedicated
    }
}

/// The single object a dedicated allocation is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedicatedTarget {
    /// A dedicated buffer allocation.
    Buffer(BufferId),
    /// A dedicated image allocation.
    Image(ImageId),
}

/// Parameters of one device memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAllocateInfo {
    /// Allocation size in bytes.
    pub size: u64,
    /// Memory type to allocate from.
    pub memory_type_index: u32,
    /// The object this allocation is dedicated to, if any.
    pub dedicated: Option<DedicatedTarget>,
}

/// A range of mapped memory to flush to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedMemoryRange {
    /// The mapped allocation.
    pub memory: MemoryId,
    /// Start of the range in bytes.
    pub offset: u64,
    /// Length of the range in bytes, or [`WHOLE_SIZE`].
    pub size: u64,
}

impl MappedMemoryRange {
    /// A range covering the whole allocation.
    pub const fn whole(memory: MemoryId) -> Self {
        Self {
            memory,
            offset: 0,
            size: WHOLE_SIZE,
        }
    }
}
