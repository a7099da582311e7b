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

//! Descriptors for driver buffer objects.

use crate::ferrite_bitflags;

ferrite_bitflags! {
    /// Creation flags of a buffer. Values match the driver's bit layout.
    pub struct BufferFlags: u32 {
        /// Sparse binding.
        const SPARSE_BINDING = 0x0000_0001;
        /// Sparse residency.
        const SPARSE_RESIDENCY = 0x0000_0002;
        /// Sparse aliased.
        const SPARSE_ALIASED = 0x0000_0004;
        /// Protected memory.
        const PROTECTED = 0x0000_0008;
    }
}

ferrite_bitflags! {
    /// Allowed usages of a buffer. Values match the driver's bit layout.
    pub struct BufferUsage: u32 {
        /// The buffer can be the source of a transfer command.
        const TRANSFER_SRC = 0x0000_0001;
        /// The buffer can be the destination of a transfer command.
        const TRANSFER_DST = 0x0000_0002;
        /// Uniform texel buffer.
        const UNIFORM_TEXEL_BUFFER = 0x0000_0004;
        /// Storage texel buffer.
        const STORAGE_TEXEL_BUFFER = 0x0000_0008;
        /// Uniform buffer.
        const UNIFORM_BUFFER = 0x0000_0010;
        /// Storage buffer.
        const STORAGE_BUFFER = 0x0000_0020;
        /// Index buffer.
        const INDEX_BUFFER = 0x0000_0040;
        /// Vertex buffer.
        const VERTEX_BUFFER = 0x0000_0080;
        /// Indirect command buffer.
        const INDIRECT_BUFFER = 0x0000_0100;
    }
}

/// How a resource may be accessed from several queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SharingMode {
    /// Owned by one family at a time; ownership moves with barrier pairs.
    #[default]
    Exclusive,
    /// Accessible from several families without ownership transfers.
    Concurrent,
}

/// The driver-level description of a buffer to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferCreateInfo {
    /// Creation flags.
    pub flags: BufferFlags,
    /// Allowed usages.
    pub usage: BufferUsage,
    /// Size in bytes.
    pub size: u64,
    /// Queue family sharing mode. The transfer core always creates exclusive buffers.
    pub sharing: SharingMode,
}

impl BufferCreateInfo {
    /// Describes an exclusive buffer with the given usage and size.
    pub fn new(usage: BufferUsage, size: u64) -> Self {
        Self {
            flags: BufferFlags::empty(),
            usage,
            size,
            sharing: SharingMode::Exclusive,
        }
    }
}
