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

//! The host-visible buffer that feeds device-local targets.

use ferrite_core::gpu::{BufferCreateInfo, BufferId, BufferUsage, DriverError};
use ferrite_data::{AllocationUsage, Allocator, Buffer};
use std::sync::Arc;

/// The object a staging entry is copied into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingTarget {
    /// Buffer at this index of the bundle.
    Buffer(usize),
    /// Image at this index of the bundle.
    Image(usize),
}

/// One region of the staging buffer and where it goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingCopy {
    /// Offset of the region in the staging buffer.
    pub source_offset: u64,
    /// Size of the region in bytes.
    pub size: u64,
    /// Destination.
    pub target: StagingTarget,
}

/// A transient staging buffer and the copies that read from it.
///
/// The buffer must outlive the command buffer its copies are recorded into.
/// Dropping it destroys the driver buffer and frees its memory.
#[derive(Debug)]
pub struct StagingBuffer {
    buffer: Buffer,
    copies: Vec<StagingCopy>,
}

impl StagingBuffer {
    /// Creates a staging buffer of `size` bytes in host-visible memory.
    ///
    /// The allocation is dedicated when the driver supports it.
    pub(crate) fn create(
        allocator: &Arc<Allocator>,
        name: &str,
        size: u64,
        copies: Vec<StagingCopy>,
    ) -> Result<Self, DriverError> {
        let buffer = Buffer::create(
            allocator,
            format!("{name}:staging"),
            BufferCreateInfo::new(BufferUsage::TRANSFER_SRC, size),
            AllocationUsage::HostTransitionSource,
        )?;
        Ok(Self { buffer, copies })
    }

    /// The driver buffer.
    pub fn id(&self) -> BufferId {
        self.buffer.id()
    }

    /// Size of the staging buffer.
    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    /// Memory type the staging memory was allocated from.
    pub fn memory_type_index(&self) -> u32 {
        self.buffer.memory().memory_type().index
    }

    /// Copy regions in staging order.
    pub fn copies(&self) -> &[StagingCopy] {
        &self.copies
    }

    /// Sum of the sizes of every copy region.
    pub fn copied_bytes(&self) -> u64 {
        self.copies.iter().map(|copy| copy.size).sum()
    }

    pub(crate) fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}
