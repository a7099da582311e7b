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

//! Pipeline barriers and the access/stage masks they carry.
//!
//! Queue-family ownership transfers are expressed as a *release* barrier
//! recorded on the source family and an *acquire* barrier recorded on the
//! destination family. Both halves carry the same `(src, dst)` family pair and
//! the same access masks; [`BufferMemoryBarrier::acquire_half`] and
//! [`ImageMemoryBarrier::acquire_half`] build the second half from the first.

use super::handles::{BufferId, ImageId};
use super::image::{ImageAspect, ImageLayout};
use super::memory::WHOLE_SIZE;
use crate::ferrite_bitflags;

/// Queue family index meaning "no ownership transfer".
pub const QUEUE_FAMILY_IGNORED: u32 = u32::MAX;

ferrite_bitflags! {
    /// Memory access types. Values match the driver's bit layout.
    pub struct AccessFlags: u32 {
        /// Indirect command read.
        const INDIRECT_COMMAND_READ = 0x0000_0001;
        /// Index buffer read.
        const INDEX_READ = 0x0000_0002;
        /// Vertex attribute read.
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        /// Uniform buffer read.
        const UNIFORM_READ = 0x0000_0008;
        /// Input attachment read.
        const INPUT_ATTACHMENT_READ = 0x0000_0010;
        /// Shader read.
        const SHADER_READ = 0x0000_0020;
        /// Shader write.
        const SHADER_WRITE = 0x0000_0040;
        /// Color attachment read.
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        /// Color attachment write.
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        /// Transfer read.
        const TRANSFER_READ = 0x0000_0800;
        /// Transfer write.
        const TRANSFER_WRITE = 0x0000_1000;
        /// Host read.
        const HOST_READ = 0x0000_2000;
        /// Host write.
        const HOST_WRITE = 0x0000_4000;
        /// Any read.
        const MEMORY_READ = 0x0000_8000;
        /// Any write.
        const MEMORY_WRITE = 0x0001_0000;
    }
}

ferrite_bitflags! {
    /// Pipeline stages. Values match the driver's bit layout.
    pub struct PipelineStageFlags: u32 {
        /// Start of the pipeline.
        const TOP_OF_PIPE = 0x0000_0001;
        /// Indirect draw/dispatch parameter reads.
        const DRAW_INDIRECT = 0x0000_0002;
        /// Vertex and index fetch.
        const VERTEX_INPUT = 0x0000_0004;
        /// Vertex shader.
        const VERTEX_SHADER = 0x0000_0008;
        /// Fragment shader.
        const FRAGMENT_SHADER = 0x0000_0080;
        /// Color attachment output.
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        /// Compute shader.
        const COMPUTE_SHADER = 0x0000_0800;
        /// Transfer commands.
        const TRANSFER = 0x0000_1000;
        /// End of the pipeline.
        const BOTTOM_OF_PIPE = 0x0000_2000;
        /// Host access.
        const HOST = 0x0000_4000;
        /// All commands.
        const ALL_COMMANDS = 0x0001_0000;
    }
}

impl PipelineStageFlags {
    /// Every shader stage that may read uploaded resources.
    pub const ALL_SHADERS: Self = Self::from_bits_retain(
        Self::VERTEX_SHADER.bits() | Self::FRAGMENT_SHADER.bits() | Self::COMPUTE_SHADER.bits(),
    );
}

/// The mip levels and layers a barrier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    /// Addressed aspects.
    pub aspect: ImageAspect,
    /// First mip level.
    pub base_mip_level: u32,
    /// Number of mip levels.
    pub level_count: u32,
    /// First array layer.
    pub base_array_layer: u32,
    /// Number of array layers.
    pub layer_count: u32,
}

impl ImageSubresourceRange {
    /// All `levels` mips and `layers` layers of the given aspect.
    pub const fn full(aspect: ImageAspect, levels: u32, layers: u32) -> Self {
        Self {
            aspect,
            base_mip_level: 0,
            level_count: levels,
            base_array_layer: 0,
            layer_count: layers,
        }
    }
}

/// A memory barrier on a buffer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferMemoryBarrier {
    /// Accesses that must complete before the barrier.
    pub src_access: AccessFlags,
    /// Accesses that wait for the barrier.
    pub dst_access: AccessFlags,
    /// Releasing queue family, or [`QUEUE_FAMILY_IGNORED`].
    pub src_queue_family: u32,
    /// Acquiring queue family, or [`QUEUE_FAMILY_IGNORED`].
    pub dst_queue_family: u32,
    /// The buffer.
    pub buffer: BufferId,
    /// Start of the range.
    pub offset: u64,
    /// Length of the range, or [`WHOLE_SIZE`].
    pub size: u64,
}

impl BufferMemoryBarrier {
    /// A barrier on the whole buffer without an ownership transfer.
    pub const fn whole(buffer: BufferId, src_access: AccessFlags, dst_access: AccessFlags) -> Self {
        Self {
            src_access,
            dst_access,
            src_queue_family: QUEUE_FAMILY_IGNORED,
            dst_queue_family: QUEUE_FAMILY_IGNORED,
            buffer,
            offset: 0,
            size: WHOLE_SIZE,
        }
    }

    /// Turns the barrier into a queue-family ownership transfer.
    pub const fn with_families(mut self, src: u32, dst: u32) -> Self {
        self.src_queue_family = src;
        self.dst_queue_family = dst;
        self
    }

    /// Returns `true` if the barrier moves ownership between two families.
    pub const fn is_ownership_transfer(&self) -> bool {
        self.src_queue_family != QUEUE_FAMILY_IGNORED
            && self.dst_queue_family != QUEUE_FAMILY_IGNORED
            && self.src_queue_family != self.dst_queue_family
    }

    /// The acquire-side counterpart of a release barrier.
    pub const fn acquire_half(&self) -> Self {
        *self
    }
}

/// A memory barrier with a layout transition on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageMemoryBarrier {
    /// Accesses that must complete before the barrier.
    pub src_access: AccessFlags,
    /// Accesses that wait for the barrier.
    pub dst_access: AccessFlags,
    /// Layout before the barrier.
    pub old_layout: ImageLayout,
    /// Layout after the barrier.
    pub new_layout: ImageLayout,
    /// Releasing queue family, or [`QUEUE_FAMILY_IGNORED`].
    pub src_queue_family: u32,
    /// Acquiring queue family, or [`QUEUE_FAMILY_IGNORED`].
    pub dst_queue_family: u32,
    /// The image.
    pub image: ImageId,
    /// Affected subresources.
    pub range: ImageSubresourceRange,
}

impl ImageMemoryBarrier {
    /// A layout transition without an ownership transfer.
    pub const fn transition(
        image: ImageId,
        src_access: AccessFlags,
        dst_access: AccessFlags,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        range: ImageSubresourceRange,
    ) -> Self {
        Self {
            src_access,
            dst_access,
            old_layout,
            new_layout,
            src_queue_family: QUEUE_FAMILY_IGNORED,
            dst_queue_family: QUEUE_FAMILY_IGNORED,
            image,
            range,
        }
    }

    /// Turns the barrier into a queue-family ownership transfer.
    pub const fn with_families(mut self, src: u32, dst: u32) -> Self {
        self.src_queue_family = src;
        self.dst_queue_family = dst;
        self
    }

    /// Returns `true` if the barrier moves ownership between two families.
    pub const fn is_ownership_transfer(&self) -> bool {
        self.src_queue_family != QUEUE_FAMILY_IGNORED
            && self.dst_queue_family != QUEUE_FAMILY_IGNORED
            && self.src_queue_family != self.dst_queue_family
    }

    /// The acquire-side counterpart of a release barrier.
    pub const fn acquire_half(&self) -> Self {
        *self
    }
}
