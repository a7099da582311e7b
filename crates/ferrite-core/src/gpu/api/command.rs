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

//! Copy regions and queue submission descriptors.

use super::handles::{CommandBufferId, SemaphoreId};
use super::image::{Extent3, ImageAspect};
use super::sync::PipelineStageFlags;

/// One region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopy {
    /// Offset in the source buffer.
    pub src_offset: u64,
    /// Offset in the destination buffer.
    pub dst_offset: u64,
    /// Number of bytes to copy.
    pub size: u64,
}

/// The mip level and layers a buffer-to-image copy writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSubresourceLayers {
    /// Addressed aspects.
    pub aspect: ImageAspect,
    /// Mip level.
    pub mip_level: u32,
    /// First array layer.
    pub base_array_layer: u32,
    /// Number of array layers.
    pub layer_count: u32,
}

/// One region of a buffer-to-image copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferImageCopy {
    /// Offset of the texel data in the source buffer.
    pub buffer_offset: u64,
    /// Row length in texels, or zero for tightly packed rows.
    pub buffer_row_length: u32,
    /// Image height in texels, or zero for tightly packed slices.
    pub buffer_image_height: u32,
    /// Destination subresource.
    pub image_subresource: ImageSubresourceLayers,
    /// Destination offset in texels.
    pub image_offset: [i32; 3],
    /// Size of the copied region in texels.
    pub image_extent: Extent3,
}

/// One batch of command buffers submitted to a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Semaphores waited on before the batch starts, with the stage that waits.
    pub wait_semaphores: Vec<(SemaphoreId, PipelineStageFlags)>,
    /// Command buffers executed in order.
    pub command_buffers: Vec<CommandBufferId>,
    /// Semaphores signaled once the batch completes.
    pub signal_semaphores: Vec<SemaphoreId>,
}
