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

//! The headless software driver.

use super::failure::FailPoint;
use super::profile::HeadlessProfile;
use super::state::{
    Binding, BufferEntry, CommandBufferEntry, CommandBufferState, FenceEntry, HeadlessState,
    ImageEntry, LiveObjects, MemoryEntry, Ownership, PendingSubmission, RecordedCommand,
    SubmissionRecord,
};
use ferrite_core::gpu::{
    BufferCopy, BufferCreateInfo, BufferId, BufferImageCopy, BufferMemoryBarrier,
    CommandBufferId, CommandPoolId, DedicatedTarget, DeviceLimits, DriverError, FenceId,
    GpuDriver, ImageCreateInfo, ImageFormat, ImageId, ImageLayout, ImageMemoryBarrier,
    ImageTiling, MappedMemoryRange, MemoryAllocateInfo, MemoryId, MemoryProperties,
    MemoryPropertyFlags, MemoryRequirements, ObjectKind, PipelineStageFlags, QueueFamilyInfo,
    QueueId, SemaphoreId, SubmitInfo, WHOLE_SIZE,
};
use ferrite_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};
use ferrite_core::utils::align_up;
use std::borrow::Cow;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

/// Queues per family are encoded as `family * QUEUE_STRIDE + index`.
const QUEUE_STRIDE: usize = 64;

/// A software implementation of [`GpuDriver`].
///
/// Memory is plain host memory, copies run when a batch executes, and fences
/// signal as soon as their batch has run. Non-coherent memory is simulated
/// with a shadow copy that only reaches the device on flush, so a missing
/// flush loses the write exactly as it can on hardware.
///
/// Beyond executing commands, the device validates what a driver validation
/// layer would: binding rules, image layouts, semaphore waits and queue-family
/// ownership of exclusive resources. Violations are logged and collected in
/// [`HeadlessDevice::validation_errors`]. Driver entry points can be made to
/// fail on demand with [`HeadlessDevice::fail_after`].
#[derive(Debug)]
pub struct HeadlessDevice {
    profile: HeadlessProfile,
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    /// Creates a device simulating `profile`.
    pub fn new(profile: HeadlessProfile) -> Self {
        log::info!("Headless device '{}' created", profile.name);
        let heaps = profile.memory.heaps.len();
        Self {
            profile,
            state: Mutex::new(HeadlessState::new(heaps)),
        }
    }

    /// A device simulating [`HeadlessProfile::discrete`].
    pub fn discrete() -> Self {
        Self::new(HeadlessProfile::discrete())
    }

    /// A device simulating [`HeadlessProfile::unified`].
    pub fn unified() -> Self {
        Self::new(HeadlessProfile::unified())
    }

    /// The simulated profile.
    pub fn profile(&self) -> &HeadlessProfile {
        &self.profile
    }

    fn state(&self) -> Result<MutexGuard<'_, HeadlessState>, DriverError> {
        self.state
            .lock()
            .map_err(|e| DriverError::Backend(format!("Mutex poisoned (headless state): {e}")))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut HeadlessState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut state| f(&mut state))
    }

    // --- Failure injection ---

    /// Lets `successes` calls of `point` succeed, then fails the next one.
    pub fn fail_after(&self, point: FailPoint, successes: usize) {
        self.with_state(|s| s.failures.arm(point, successes));
    }

    /// Fails the next call of `point`.
    pub fn fail_next(&self, point: FailPoint) {
        self.fail_after(point, 0);
    }

    /// Disarms every scripted failure.
    pub fn clear_failures(&self) {
        self.with_state(|s| s.failures.clear());
    }

    // --- Execution control ---

    /// When enabled, submissions are queued and only run when a fence is
    /// waited on or [`HeadlessDevice::complete_pending`] is called.
    pub fn set_deferred_completion(&self, deferred: bool) {
        self.with_state(|s| s.deferred = deferred);
    }

    /// Makes fresh allocations start filled with `byte` instead of zeros, so
    /// reads of memory nobody wrote stand out.
    pub fn set_allocation_fill(&self, byte: u8) {
        self.with_state(|s| s.fill_byte = byte);
    }

    /// Runs every queued submission.
    pub fn complete_pending(&self) {
        self.with_state(|s| s.drain_pending(None));
    }

    // --- Inspection ---

    /// Live objects of every kind.
    pub fn live_objects(&self) -> LiveObjects {
        self.with_state(|s| s.live_objects()).unwrap_or_default()
    }

    /// Validation errors collected so far.
    pub fn validation_errors(&self) -> Vec<String> {
        self.with_state(|s| s.validation_errors.clone())
            .unwrap_or_default()
    }

    /// Every executed batch, in execution order.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.with_state(|s| s.submissions.clone()).unwrap_or_default()
    }

    /// Forgets the executed batches.
    pub fn clear_submissions(&self) {
        self.with_state(|s| s.submissions.clear());
    }

    /// Commands recorded into a command buffer so far.
    pub fn recorded_commands(&self, cb: CommandBufferId) -> Vec<RecordedCommand> {
        self.with_state(|s| {
            s.command_buffers
                .get(&cb)
                .map(|entry| entry.commands.clone())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Where a buffer is bound.
    pub fn buffer_binding(&self, buffer: BufferId) -> Option<Binding> {
        self.with_state(|s| {
            s.buffers.get(&buffer).and_then(|entry| {
                entry.binding.map(|(memory, offset)| Binding {
                    memory,
                    offset,
                    size: entry.requirements.size,
                })
            })
        })
        .flatten()
    }

    /// Where an image is bound.
    pub fn image_binding(&self, image: ImageId) -> Option<Binding> {
        self.with_state(|s| {
            s.images.get(&image).and_then(|entry| {
                entry.binding.map(|(memory, offset)| Binding {
                    memory,
                    offset,
                    size: entry.requirements.size,
                })
            })
        })
        .flatten()
    }

    /// Memory type index of an allocation.
    pub fn memory_type_of(&self, memory: MemoryId) -> Option<u32> {
        self.with_state(|s| s.memories.get(&memory).map(|m| m.type_index))
            .flatten()
    }

    /// The object an allocation is dedicated to.
    pub fn dedicated_target(&self, memory: MemoryId) -> Option<DedicatedTarget> {
        self.with_state(|s| s.memories.get(&memory).and_then(|m| m.dedicated))
            .flatten()
    }

    /// Device-side contents of a bound buffer.
    pub fn read_buffer(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.with_state(|s| {
            let entry = s.buffers.get(&buffer)?;
            let (memory, offset) = entry.binding?;
            s.read_memory(memory, offset, entry.info.size).ok()
        })
        .flatten()
    }

    /// Device-side contents of a bound image, tightly packed.
    pub fn read_image(&self, image: ImageId) -> Option<Vec<u8>> {
        self.with_state(|s| {
            let entry = s.images.get(&image)?;
            let (memory, offset) = entry.binding?;
            s.read_memory(memory, offset, entry.info.texel_data_size())
                .ok()
        })
        .flatten()
    }

    /// Current layout of an image.
    pub fn image_layout(&self, image: ImageId) -> Option<ImageLayout> {
        self.with_state(|s| s.images.get(&image).map(|entry| entry.layout))
            .flatten()
    }

    /// Family owning a buffer, once it was used by a queue.
    pub fn buffer_owner(&self, buffer: BufferId) -> Option<u32> {
        self.with_state(|s| s.buffers.get(&buffer).and_then(|e| e.ownership.owner()))
            .flatten()
    }

    /// Family owning an image, once it was used by a queue.
    pub fn image_owner(&self, image: ImageId) -> Option<u32> {
        self.with_state(|s| s.images.get(&image).and_then(|e| e.ownership.owner()))
            .flatten()
    }

    /// Number of live objects released to another family and not acquired yet.
    pub fn pending_releases(&self) -> usize {
        self.with_state(|s| {
            s.buffers.values().filter(|e| e.ownership.is_released()).count()
                + s.images.values().filter(|e| e.ownership.is_released()).count()
        })
        .unwrap_or(0)
    }

    /// Bytes currently allocated.
    pub fn allocated_bytes(&self) -> u64 {
        self.with_state(|s| s.allocated_bytes).unwrap_or(0)
    }

    // --- Helpers ---

    fn check_failure(&self, state: &mut HeadlessState, point: FailPoint) -> bool {
        let fail = state.failures.should_fail(point);
        if fail {
            log::warn!("Headless device: injected failure at {:?}", point);
        }
        fail
    }

    fn image_size(info: &ImageCreateInfo) -> u64 {
        let block = info.format.block_size();
        (0..info.mip_levels.max(1))
            .map(|level| {
                let w = (info.extent.width >> level).max(1) as u64;
                let h = (info.extent.height >> level).max(1) as u64;
                let d = (info.extent.depth >> level).max(1) as u64;
                w * h * d * block
            })
            .sum::<u64>()
            * info.array_layers.max(1) as u64
    }

    fn record(&self, cb: CommandBufferId, command: RecordedCommand) {
        let Ok(mut state) = self.state() else {
            return;
        };
        let message = match state.command_buffers.get_mut(&cb) {
            Some(entry) if entry.state == CommandBufferState::Recording => {
                entry.commands.push(command);
                return;
            }
            Some(_) => format!("{:?} is not recording", cb),
            None => format!("recording into unknown {:?}", cb),
        };
        state.validation_error(message);
    }

    fn bind(
        state: &mut HeadlessState,
        kind: ObjectKind,
        target: DedicatedTarget,
        requirements: MemoryRequirements,
        memory: MemoryId,
        offset: u64,
    ) -> Result<(), DriverError> {
        let entry = state.memories.get(&memory).ok_or(DriverError::InvalidHandle {
            kind: ObjectKind::Memory,
            id: memory.0,
        })?;
        if requirements.memory_type_bits & (1 << entry.type_index) == 0 {
            return Err(DriverError::BindFailed(format!(
                "{kind} does not accept memory type {}",
                entry.type_index
            )));
        }
        if requirements.alignment > 1 && offset % requirements.alignment != 0 {
            return Err(DriverError::BindFailed(format!(
                "{kind} offset {offset} is not aligned to {}",
                requirements.alignment
            )));
        }
        if offset + requirements.size > entry.data.len() as u64 {
            return Err(DriverError::BindFailed(format!(
                "{kind} range {offset}..+{} exceeds {:?} of {} bytes",
                requirements.size,
                memory,
                entry.data.len()
            )));
        }
        match entry.dedicated {
            Some(dedicated) if dedicated != target || offset != 0 => {
                return Err(DriverError::BindFailed(format!(
                    "{:?} is dedicated to {:?}",
                    memory, dedicated
                )));
            }
            None if requirements.requires_dedicated => {
                return Err(DriverError::BindFailed(format!(
                    "{kind} requires a dedicated allocation"
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::discrete()
    }
}

impl GpuDriver for HeadlessDevice {
    fn memory_properties(&self) -> MemoryProperties {
        self.profile.memory.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.profile.limits
    }

    fn queue_families(&self) -> Vec<QueueFamilyInfo> {
        self.profile.queue_families.clone()
    }

    fn supports_dedicated_allocation(&self) -> bool {
        self.profile.dedicated_allocation
    }

    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<BufferId, DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::CreateBuffer) {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::Buffer,
                details: "injected failure".to_string(),
            });
        }
        if info.size == 0 {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::Buffer,
                details: "size is zero".to_string(),
            });
        }

        let id = BufferId(state.next_id());
        let requirements = MemoryRequirements {
            size: align_up(info.size, 4),
            alignment: self.profile.buffer_alignment,
            memory_type_bits: self.profile.all_types_mask(),
            prefers_dedicated: false,
            requires_dedicated: false,
        };
        state.buffers.insert(
            id,
            BufferEntry {
                info: info.clone(),
                requirements,
                binding: None,
                ownership: Ownership::default(),
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        self.with_state(|s| s.buffers.remove(&buffer));
    }

    fn create_image(&self, info: &ImageCreateInfo) -> Result<ImageId, DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::CreateImage) {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::Image,
                details: "injected failure".to_string(),
            });
        }
        if info.format == ImageFormat::Undefined || info.extent.texel_count() == 0 {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::Image,
                details: format!("invalid format {:?} or extent {:?}", info.format, info.extent),
            });
        }

        let id = ImageId(state.next_id());
        let size = align_up(Self::image_size(info), 4);
        let memory_type_bits = match info.tiling {
            ImageTiling::Optimal => self.profile.optimal_image_type_mask(),
            ImageTiling::Linear => self.profile.all_types_mask(),
        };
        let requirements = MemoryRequirements {
            size,
            alignment: self.profile.image_alignment,
            memory_type_bits,
            prefers_dedicated: self.profile.dedicated_allocation
                && size >= self.profile.dedicated_image_threshold,
            requires_dedicated: false,
        };
        state.images.insert(
            id,
            ImageEntry {
                info: info.clone(),
                requirements,
                binding: None,
                layout: info.initial_layout,
                ownership: Ownership::default(),
            },
        );
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        self.with_state(|s| s.images.remove(&image));
    }

    fn buffer_memory_requirements(
        &self,
        buffer: BufferId,
    ) -> Result<MemoryRequirements, DriverError> {
        let state = self.state()?;
        state
            .buffers
            .get(&buffer)
            .map(|entry| entry.requirements)
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::Buffer,
                id: buffer.0,
            })
    }

    fn image_memory_requirements(&self, image: ImageId) -> Result<MemoryRequirements, DriverError> {
        let state = self.state()?;
        state
            .images
            .get(&image)
            .map(|entry| entry.requirements)
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::Image,
                id: image.0,
            })
    }

    fn allocate_memory(&self, info: &MemoryAllocateInfo) -> Result<MemoryId, DriverError> {
        let mut state = self.state()?;
        let ty = self
            .profile
            .memory
            .types
            .get(info.memory_type_index as usize)
            .copied()
            .ok_or(DriverError::OutOfDeviceMemory {
                requested: info.size,
                memory_type_index: info.memory_type_index,
            })?;
        let heap = ty.heap_index as usize;
        let heap_size = self.profile.memory.heaps.get(heap).map_or(0, |h| h.size);
        let used = state.heap_usage.get(heap).copied().unwrap_or(0);

        if self.check_failure(&mut state, FailPoint::AllocateMemory)
            || info.size == 0
            || used + info.size > heap_size
        {
            return Err(DriverError::OutOfDeviceMemory {
                requested: info.size,
                memory_type_index: info.memory_type_index,
            });
        }
        if info.dedicated.is_some() && !self.profile.dedicated_allocation {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::Memory,
                details: "dedicated allocations are not supported".to_string(),
            });
        }

        let id = MemoryId(state.next_id());
        let fill = state.fill_byte;
        state.memories.insert(
            id,
            MemoryEntry {
                type_index: info.memory_type_index,
                heap: ty.heap_index,
                coherent: ty.flags.contains(MemoryPropertyFlags::HOST_COHERENT),
                host_visible: ty.flags.contains(MemoryPropertyFlags::HOST_VISIBLE),
                data: vec![fill; info.size as usize],
                shadow: None,
                mapped: false,
                dedicated: info.dedicated,
            },
        );
        if let Some(usage) = state.heap_usage.get_mut(heap) {
            *usage += info.size;
        }
        state.allocated_bytes += info.size;
        state.peak_bytes = state.peak_bytes.max(state.allocated_bytes);
        Ok(id)
    }

    fn free_memory(&self, memory: MemoryId) {
        self.with_state(|s| {
            if let Some(entry) = s.memories.remove(&memory) {
                let size = entry.data.len() as u64;
                if let Some(usage) = s.heap_usage.get_mut(entry.heap as usize) {
                    *usage = usage.saturating_sub(size);
                }
                s.allocated_bytes = s.allocated_bytes.saturating_sub(size);
            }
        });
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferId,
        memory: MemoryId,
        offset: u64,
    ) -> Result<(), DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::BindMemory) {
            return Err(DriverError::BindFailed("injected failure".to_string()));
        }
        let (requirements, bound) = state
            .buffers
            .get(&buffer)
            .map(|entry| (entry.requirements, entry.binding.is_some()))
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::Buffer,
                id: buffer.0,
            })?;
        if bound {
            return Err(DriverError::BindFailed(format!("{:?} is already bound", buffer)));
        }
        Self::bind(
            &mut state,
            ObjectKind::Buffer,
            DedicatedTarget::Buffer(buffer),
            requirements,
            memory,
            offset,
        )?;
        if let Some(entry) = state.buffers.get_mut(&buffer) {
            entry.binding = Some((memory, offset));
        }
        Ok(())
    }

    fn bind_image_memory(
        &self,
        image: ImageId,
        memory: MemoryId,
        offset: u64,
    ) -> Result<(), DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::BindMemory) {
            return Err(DriverError::BindFailed("injected failure".to_string()));
        }
        let (requirements, bound) = state
            .images
            .get(&image)
            .map(|entry| (entry.requirements, entry.binding.is_some()))
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::Image,
                id: image.0,
            })?;
        if bound {
            return Err(DriverError::BindFailed(format!("{:?} is already bound", image)));
        }
        Self::bind(
            &mut state,
            ObjectKind::Image,
            DedicatedTarget::Image(image),
            requirements,
            memory,
            offset,
        )?;
        if let Some(entry) = state.images.get_mut(&image) {
            entry.binding = Some((memory, offset));
        }
        Ok(())
    }

    fn map_memory(
        &self,
        memory: MemoryId,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DriverError> {
        let mut state = self.state()?;
        let fail = self.check_failure(&mut state, FailPoint::MapMemory);
        let map_failed = |details: &str| DriverError::MapFailed {
            memory,
            details: details.to_string(),
        };

        let entry = state.memories.get_mut(&memory).ok_or(DriverError::InvalidHandle {
            kind: ObjectKind::Memory,
            id: memory.0,
        })?;
        if fail {
            return Err(map_failed("injected failure"));
        }
        if !entry.host_visible {
            return Err(map_failed("memory is not host-visible"));
        }
        if entry.mapped {
            return Err(map_failed("memory is already mapped"));
        }
        let len = entry.data.len() as u64;
        let size = if size == WHOLE_SIZE {
            len.saturating_sub(offset)
        } else {
            size
        };
        if offset + size > len || size == 0 {
            return Err(map_failed("range exceeds the allocation"));
        }

        entry.mapped = true;
        let base = if entry.coherent {
            entry.data.as_mut_ptr()
        } else {
            entry.shadow.insert(entry.data.clone()).as_mut_ptr()
        };
        // SAFETY: `offset < len`, so the pointer stays inside the allocation,
        // whose heap storage is neither moved nor freed while mapped.
        let ptr = unsafe { base.add(offset as usize) };
        NonNull::new(ptr).ok_or_else(|| map_failed("null mapping"))
    }

    fn unmap_memory(&self, memory: MemoryId) {
        self.with_state(|s| {
            if let Some(entry) = s.memories.get_mut(&memory) {
                entry.mapped = false;
                entry.shadow = None;
            }
        });
    }

    fn flush_mapped_memory_ranges(&self, ranges: &[MappedMemoryRange]) -> Result<(), DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::FlushMemory) {
            return Err(DriverError::Backend("injected flush failure".to_string()));
        }
        let atom = self.profile.limits.non_coherent_atom_size.max(1);
        for range in ranges {
            let entry = state
                .memories
                .get_mut(&range.memory)
                .ok_or(DriverError::InvalidHandle {
                    kind: ObjectKind::Memory,
                    id: range.memory.0,
                })?;
            let len = entry.data.len() as u64;
            let end = if range.size == WHOLE_SIZE {
                len
            } else {
                range.offset + range.size
            };
            if range.offset % atom != 0 || (end != len && end % atom != 0) || end > len {
                return Err(DriverError::Backend(format!(
                    "flush range {}..{} of {:?} is not atom aligned",
                    range.offset, end, range.memory
                )));
            }
            if let Some(shadow) = entry.shadow.as_ref() {
                let (start, end) = (range.offset as usize, end as usize);
                entry.data[start..end].copy_from_slice(&shadow[start..end]);
            }
        }
        Ok(())
    }

    fn create_command_pool(&self, queue_family: u32) -> Result<CommandPoolId, DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::CreateCommandPool)
            || !self
                .profile
                .queue_families
                .iter()
                .any(|f| f.index == queue_family)
        {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::CommandPool,
                details: format!("cannot create a pool for family {queue_family}"),
            });
        }
        let id = CommandPoolId(state.next_id());
        state.pools.insert(id, queue_family);
        Ok(id)
    }

    fn destroy_command_pool(&self, pool: CommandPoolId) {
        self.with_state(|s| {
            s.pools.remove(&pool);
            s.command_buffers.retain(|_, entry| entry.pool != pool);
        });
    }

    fn allocate_command_buffer(&self, pool: CommandPoolId) -> Result<CommandBufferId, DriverError> {
        let mut state = self.state()?;
        let family = *state.pools.get(&pool).ok_or(DriverError::InvalidHandle {
            kind: ObjectKind::CommandPool,
            id: pool.0,
        })?;
        if self.check_failure(&mut state, FailPoint::AllocateCommandBuffer) {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::CommandBuffer,
                details: "injected failure".to_string(),
            });
        }
        let id = CommandBufferId(state.next_id());
        state.command_buffers.insert(
            id,
            CommandBufferEntry {
                pool,
                family,
                state: CommandBufferState::Initial,
                commands: Vec::new(),
            },
        );
        Ok(id)
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferId) -> Result<(), DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::BeginCommandBuffer) {
            return Err(DriverError::RecordingFailed("injected begin failure".to_string()));
        }
        let entry = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::CommandBuffer,
                id: command_buffer.0,
            })?;
        if entry.state == CommandBufferState::Recording {
            return Err(DriverError::RecordingFailed(format!(
                "{:?} is already recording",
                command_buffer
            )));
        }
        entry.state = CommandBufferState::Recording;
        entry.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferId) -> Result<(), DriverError> {
        let mut state = self.state()?;
        let fail = self.check_failure(&mut state, FailPoint::EndCommandBuffer);
        let entry = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::CommandBuffer,
                id: command_buffer.0,
            })?;
        if fail || entry.state != CommandBufferState::Recording {
            return Err(DriverError::RecordingFailed(format!(
                "cannot end {:?}",
                command_buffer
            )));
        }
        entry.state = CommandBufferState::Executable;
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferId,
        src: BufferId,
        dst: BufferId,
        regions: &[BufferCopy],
    ) {
        self.record(
            command_buffer,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferId,
        src: BufferId,
        dst: ImageId,
        layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        self.record(
            command_buffer,
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                layout,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: CommandBufferId,
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        buffer_barriers: &[BufferMemoryBarrier],
        image_barriers: &[ImageMemoryBarrier],
    ) {
        self.record(
            command_buffer,
            RecordedCommand::PipelineBarrier {
                src_stage,
                dst_stage,
                buffers: buffer_barriers.to_vec(),
                images: image_barriers.to_vec(),
            },
        );
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceId, DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::CreateFence) {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::Fence,
                details: "injected failure".to_string(),
            });
        }
        let id = FenceId(state.next_id());
        state.fences.insert(
            id,
            FenceEntry {
                signaled,
                pending: 0,
            },
        );
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.with_state(|s| s.fences.remove(&fence));
    }

    fn fence_status(&self, fence: FenceId) -> Result<bool, DriverError> {
        let state = self.state()?;
        state
            .fences
            .get(&fence)
            .map(|entry| entry.signaled)
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::Fence,
                id: fence.0,
            })
    }

    fn wait_for_fence(&self, fence: FenceId, _timeout_ns: u64) -> Result<bool, DriverError> {
        let mut state = self.state()?;
        let entry = state.fences.get(&fence).ok_or(DriverError::InvalidHandle {
            kind: ObjectKind::Fence,
            id: fence.0,
        })?;
        if entry.signaled {
            return Ok(true);
        }
        if entry.pending == 0 {
            // Nothing was submitted with this fence; it can never signal.
            return Ok(false);
        }
        state.drain_pending(Some(fence));
        Ok(state.fences.get(&fence).is_some_and(|entry| entry.signaled))
    }

    fn reset_fence(&self, fence: FenceId) -> Result<(), DriverError> {
        let mut state = self.state()?;
        let entry = state.fences.get_mut(&fence).ok_or(DriverError::InvalidHandle {
            kind: ObjectKind::Fence,
            id: fence.0,
        })?;
        entry.signaled = false;
        Ok(())
    }

    fn create_semaphore(&self) -> Result<SemaphoreId, DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::CreateSemaphore) {
            return Err(DriverError::CreationFailed {
                kind: ObjectKind::Semaphore,
                details: "injected failure".to_string(),
            });
        }
        let id = SemaphoreId(state.next_id());
        state.semaphores.insert(id, false);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.with_state(|s| s.semaphores.remove(&semaphore));
    }

    fn get_queue(&self, family: u32, index: u32) -> Result<QueueId, DriverError> {
        self.profile
            .queue_families
            .iter()
            .find(|f| f.index == family && index < f.count)
            .map(|_| QueueId(family as usize * QUEUE_STRIDE + index as usize))
            .ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::Queue,
                id: family as usize * QUEUE_STRIDE + index as usize,
            })
    }

    fn queue_submit(
        &self,
        queue: QueueId,
        submits: &[SubmitInfo],
        fence: Option<FenceId>,
    ) -> Result<(), DriverError> {
        let mut state = self.state()?;
        if self.check_failure(&mut state, FailPoint::Submit) {
            return Err(DriverError::SubmitFailed("injected failure".to_string()));
        }
        let family = (queue.0 / QUEUE_STRIDE) as u32;

        for batch in submits {
            for cb in &batch.command_buffers {
                let entry = state.command_buffers.get(cb).ok_or_else(|| {
                    DriverError::SubmitFailed(format!("unknown {:?}", cb))
                })?;
                if entry.state != CommandBufferState::Executable {
                    return Err(DriverError::SubmitFailed(format!(
                        "{:?} is not executable ({:?})",
                        cb, entry.state
                    )));
                }
                if entry.family != family {
                    return Err(DriverError::SubmitFailed(format!(
                        "{:?} was recorded for family {} but submitted to family {}",
                        cb, entry.family, family
                    )));
                }
            }
        }

        if let Some(fence) = fence {
            let entry = state.fences.get_mut(&fence).ok_or(DriverError::InvalidHandle {
                kind: ObjectKind::Fence,
                id: fence.0,
            })?;
            if entry.signaled {
                return Err(DriverError::SubmitFailed(format!(
                    "{:?} is already signaled",
                    fence
                )));
            }
            entry.pending += 1;
        }
        for cb in submits.iter().flat_map(|batch| batch.command_buffers.iter()) {
            if let Some(entry) = state.command_buffers.get_mut(cb) {
                entry.state = CommandBufferState::Submitted;
            }
        }

        let submission = PendingSubmission {
            queue,
            family,
            batches: submits.to_vec(),
            fence,
        };
        if state.deferred {
            state.pending.push_back(submission);
        } else {
            state.drain_pending(None);
            state.execute(submission);
        }
        Ok(())
    }
}

impl ResourceMonitor for HeadlessDevice {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Owned(format!("{} Memory", self.profile.name))
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::Gpu
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        let (current, peak) = self
            .with_state(|s| (s.allocated_bytes, s.peak_bytes))
            .unwrap_or((0, 0));
        ResourceUsageReport {
            current_bytes: current,
            peak_bytes: Some(peak),
            total_capacity_bytes: Some(self.profile.memory.heaps.iter().map(|h| h.size).sum()),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
