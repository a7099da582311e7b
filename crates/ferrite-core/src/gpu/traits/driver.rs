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

//! Defines the `GpuDriver` trait, the explicit driver call surface the
//! transfer core is written against.

use crate::gpu::api::{
    BufferCopy, BufferCreateInfo, BufferId, BufferImageCopy, BufferMemoryBarrier,
    CommandBufferId, CommandPoolId, DeviceLimits, FenceId, ImageCreateInfo, ImageId,
    ImageLayout, ImageMemoryBarrier, MappedMemoryRange, MemoryAllocateInfo, MemoryId,
    MemoryProperties, MemoryRequirements, PipelineStageFlags, QueueFamilyInfo, QueueId,
    SemaphoreId, SubmitInfo,
};
use crate::gpu::error::DriverError;
use std::fmt::Debug;
use std::ptr::NonNull;

/// The explicit, Vulkan-style driver interface consumed by the transfer core.
///
/// Implementations expose device memory heaps and types, queue families, raw
/// object creation, memory binding and mapping, command recording with
/// pipeline barriers, and fenced queue submission. Nothing in this trait
/// manages lifetimes: the long-lived wrappers in `ferrite-data` own the ids they
/// create and destroy them exactly once.
///
/// All methods take `&self`; implementations are shared as `Arc<dyn GpuDriver>`
/// across recording and submission threads and must synchronize internally.
pub trait GpuDriver: Send + Sync + Debug {
    // --- Device information ---

    /// Returns the memory heaps and types of the device.
    ///
    /// The result never changes for the lifetime of the device.
    fn memory_properties(&self) -> MemoryProperties;

    /// Returns the alignment limits used when packing allocations.
    fn limits(&self) -> DeviceLimits;

    /// Returns the queue families of the device.
    fn queue_families(&self) -> Vec<QueueFamilyInfo>;

    /// Returns `true` if the device supports dedicated allocations.
    fn supports_dedicated_allocation(&self) -> bool;

    // --- Objects ---

    /// Creates a buffer object without memory.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CreationFailed`] when the driver refuses the descriptor.
    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<BufferId, DriverError>;

    /// Destroys a buffer object. Unknown ids are ignored.
    fn destroy_buffer(&self, buffer: BufferId);

    /// Creates an image object without memory.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CreationFailed`] when the driver refuses the descriptor.
    fn create_image(&self, info: &ImageCreateInfo) -> Result<ImageId, DriverError>;

    /// Destroys an image object. Unknown ids are ignored.
    fn destroy_image(&self, image: ImageId);

    /// Returns the memory requirements of a buffer, including the dedicated
    /// allocation preference.
    fn buffer_memory_requirements(&self, buffer: BufferId)
        -> Result<MemoryRequirements, DriverError>;

    /// Returns the memory requirements of an image, including the dedicated
    /// allocation preference.
    fn image_memory_requirements(&self, image: ImageId) -> Result<MemoryRequirements, DriverError>;

    // --- Memory ---

    /// Allocates device memory.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::OutOfDeviceMemory`] when the heap is exhausted.
    fn allocate_memory(&self, info: &MemoryAllocateInfo) -> Result<MemoryId, DriverError>;

    /// Frees device memory. Unknown ids are ignored.
    fn free_memory(&self, memory: MemoryId);

    /// Binds a buffer to `memory` at `offset`.
    fn bind_buffer_memory(
        &self,
        buffer: BufferId,
        memory: MemoryId,
        offset: u64,
    ) -> Result<(), DriverError>;

    /// Binds an image to `memory` at `offset`.
    fn bind_image_memory(
        &self,
        image: ImageId,
        memory: MemoryId,
        offset: u64,
    ) -> Result<(), DriverError>;

    /// Maps a range of host-visible memory and returns its first byte.
    ///
    /// The pointer stays valid until [`GpuDriver::unmap_memory`] is called on the
    /// same allocation. `size` may be [`WHOLE_SIZE`](crate::gpu::api::WHOLE_SIZE).
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MapFailed`] if the memory is not host-visible or
    /// already mapped.
    fn map_memory(&self, memory: MemoryId, offset: u64, size: u64)
        -> Result<NonNull<u8>, DriverError>;

    /// Unmaps previously mapped memory.
    fn unmap_memory(&self, memory: MemoryId);

    /// Makes host writes to non-coherent memory visible to the device.
    fn flush_mapped_memory_ranges(&self, ranges: &[MappedMemoryRange]) -> Result<(), DriverError>;

    // --- Commands ---

    /// Creates a command pool for the given queue family.
    fn create_command_pool(&self, queue_family: u32) -> Result<CommandPoolId, DriverError>;

    /// Destroys a command pool and every command buffer allocated from it.
    fn destroy_command_pool(&self, pool: CommandPoolId);

    /// Allocates a primary command buffer from a pool.
    fn allocate_command_buffer(&self, pool: CommandPoolId) -> Result<CommandBufferId, DriverError>;

    /// Begins recording a one-time-submit command buffer.
    fn begin_command_buffer(&self, command_buffer: CommandBufferId) -> Result<(), DriverError>;

    /// Ends recording.
    fn end_command_buffer(&self, command_buffer: CommandBufferId) -> Result<(), DriverError>;

    /// Records a buffer-to-buffer copy.
    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferId,
        src: BufferId,
        dst: BufferId,
        regions: &[BufferCopy],
    );

    /// Records a buffer-to-image copy. `layout` is the image layout at execution time.
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferId,
        src: BufferId,
        dst: ImageId,
        layout: ImageLayout,
        regions: &[BufferImageCopy],
    );

    /// Records a pipeline barrier.
    fn cmd_pipeline_barrier(
        &self,
        command_buffer: CommandBufferId,
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        buffer_barriers: &[BufferMemoryBarrier],
        image_barriers: &[ImageMemoryBarrier],
    );

    // --- Synchronization & submission ---

    /// Creates a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> Result<FenceId, DriverError>;

    /// Destroys a fence.
    fn destroy_fence(&self, fence: FenceId);

    /// Returns `true` if the fence is signaled. Never blocks.
    fn fence_status(&self, fence: FenceId) -> Result<bool, DriverError>;

    /// Blocks until the fence is signaled or `timeout_ns` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_for_fence(&self, fence: FenceId, timeout_ns: u64) -> Result<bool, DriverError>;

    /// Returns a fence to the unsignaled state.
    fn reset_fence(&self, fence: FenceId) -> Result<(), DriverError>;

    /// Creates a binary semaphore.
    fn create_semaphore(&self) -> Result<SemaphoreId, DriverError>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&self, semaphore: SemaphoreId);

    /// Returns queue `index` of family `family`.
    fn get_queue(&self, family: u32, index: u32) -> Result<QueueId, DriverError>;

    /// Submits batches to a queue. The optional fence is signaled once every
    /// batch has completed.
    ///
    /// Callers must serialize submissions to one queue; see `DeviceQueue` in
    /// `ferrite-data`.
    fn queue_submit(
        &self,
        queue: QueueId,
        submits: &[SubmitInfo],
        fence: Option<FenceId>,
    ) -> Result<(), DriverError>;
}
