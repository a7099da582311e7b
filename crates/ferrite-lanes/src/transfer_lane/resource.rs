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

//! Upload of one resource bundle into device memory.
//!
//! A [`TransferResource`] walks a bundle through
//! `Created -> Initialized -> Allocated -> Uploaded -> Compiled`. Any failure
//! along the way invalidates it: every driver object and allocation it still
//! owns is released and the completion callback runs with `false`.

use super::error::{TransferError, TransferState};
use super::packing::{pack, PackClass, PackItem};
use super::staging::{StagingBuffer, StagingCopy, StagingTarget};
use ferrite_core::gpu::{
    AccessFlags, BufferCopy, BufferCreateInfo, BufferId, BufferImageCopy, BufferMemoryBarrier,
    BufferUsage, CommandBufferId, DedicatedTarget, FrameSettings, GpuDriver, ImageCreateInfo,
    ImageId, ImageLayout, ImageMemoryBarrier, ImageSubresourceLayers, ImageSubresourceRange,
    ImageTiling, ImageUsage, MemoryRequirements, PipelineStageFlags, QueueFamilyLayout,
    SharingMode, SubmitInfo,
};
use ferrite_core::memory;
use ferrite_core::utils::align_up;
use ferrite_data::{
    AllocationUsage, Allocator, Buffer, CommandPool, DataSource, DeviceMemory, DeviceQueue, Fence,
    Image, MemoryType, RenderPassType, Resource,
};
use std::fmt;
use std::sync::Arc;

/// Accesses and stages of the first reads of an uploaded buffer.
///
/// Vertex and index buffers are read by vertex input; every other use is a
/// shader read.
fn buffer_read_scope(usage: BufferUsage) -> (AccessFlags, PipelineStageFlags) {
    let mut access = AccessFlags::empty();
    let mut stages = PipelineStageFlags::empty();
    if usage.contains(BufferUsage::VERTEX_BUFFER) {
        access |= AccessFlags::VERTEX_ATTRIBUTE_READ;
        stages |= PipelineStageFlags::VERTEX_INPUT;
    }
    if usage.contains(BufferUsage::INDEX_BUFFER) {
        access |= AccessFlags::INDEX_READ;
        stages |= PipelineStageFlags::VERTEX_INPUT;
    }
    let shader_usage = BufferUsage::UNIFORM_BUFFER
        | BufferUsage::STORAGE_BUFFER
        | BufferUsage::UNIFORM_TEXEL_BUFFER
        | BufferUsage::STORAGE_TEXEL_BUFFER;
    if usage.intersects(shader_usage) || access.is_empty() {
        access |= AccessFlags::SHADER_READ;
        stages |= PipelineStageFlags::ALL_SHADERS;
    }
    (access, stages)
}

/// Called once with `true` after [`TransferResource::compile`], or with
/// `false` when the transfer is invalidated.
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Driver-side state of one buffer of the bundle.
#[derive(Debug)]
pub struct BufferAllocInfo {
    info: BufferCreateInfo,
    id: Option<BufferId>,
    requirements: MemoryRequirements,
    offset: u64,
    dedicated: Option<Arc<DeviceMemory>>,
    use_staging: bool,
    staging_offset: u64,
    barrier: Option<BufferMemoryBarrier>,
}

impl BufferAllocInfo {
    /// The descriptor the buffer was created with.
    pub fn info(&self) -> &BufferCreateInfo {
        &self.info
    }

    /// The driver handle, until the transfer is compiled or invalidated.
    pub fn id(&self) -> Option<BufferId> {
        self.id
    }

    /// Memory requirements reported by the driver.
    pub fn requirements(&self) -> &MemoryRequirements {
        &self.requirements
    }

    /// Offset in the shared allocation; zero for dedicated buffers.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns `true` if the buffer gets its own allocation.
    pub fn is_dedicated(&self) -> bool {
        self.requirements.is_dedicated()
    }

    /// Returns `true` if the contents go through the staging buffer.
    pub fn use_staging(&self) -> bool {
        self.use_staging
    }

    /// Offset of the contents in the staging buffer.
    pub fn staging_offset(&self) -> u64 {
        self.staging_offset
    }

    /// The release barrier recorded for the consuming queue family, if any.
    pub fn pending_barrier(&self) -> Option<&BufferMemoryBarrier> {
        self.barrier.as_ref()
    }
}

/// Driver-side state of one image of the bundle.
#[derive(Debug)]
pub struct ImageAllocInfo {
    info: ImageCreateInfo,
    id: Option<ImageId>,
    requirements: MemoryRequirements,
    offset: u64,
    dedicated: Option<Arc<DeviceMemory>>,
    use_staging: bool,
    staging_offset: u64,
    barrier: Option<ImageMemoryBarrier>,
}

impl ImageAllocInfo {
    /// The descriptor the image was created with.
    pub fn info(&self) -> &ImageCreateInfo {
        &self.info
    }

    /// The driver handle, until the transfer is compiled or invalidated.
    pub fn id(&self) -> Option<ImageId> {
        self.id
    }

    /// Memory requirements reported by the driver.
    pub fn requirements(&self) -> &MemoryRequirements {
        &self.requirements
    }

    /// Offset in the shared allocation; zero for dedicated images.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns `true` if the image gets its own allocation.
    pub fn is_dedicated(&self) -> bool {
        self.requirements.is_dedicated()
    }

    /// Returns `true` if the contents go through the staging buffer.
    pub fn use_staging(&self) -> bool {
        self.use_staging
    }

    /// Offset of the contents in the staging buffer.
    pub fn staging_offset(&self) -> u64 {
        self.staging_offset
    }

    /// The release barrier recorded for the consuming queue family, if any.
    pub fn pending_barrier(&self) -> Option<&ImageMemoryBarrier> {
        self.barrier.as_ref()
    }

    fn full_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange::full(
            self.info.format.aspects(true),
            self.info.mip_levels,
            self.info.array_layers,
        )
    }
}

/// Uploads a [`Resource`] bundle and publishes the resulting device objects
/// into the bundle's output slots.
pub struct TransferResource {
    allocator: Arc<Allocator>,
    resource: Arc<Resource>,
    callback: Option<CompletionCallback>,
    state: TransferState,
    families: Option<QueueFamilyLayout>,
    buffers: Vec<BufferAllocInfo>,
    images: Vec<ImageAllocInfo>,
    memory_type: Option<MemoryType>,
    atom: u64,
    required_size: u64,
    memory: Option<Arc<DeviceMemory>>,
    staging: Option<StagingBuffer>,
    staging_alignment: u64,
    validate_ownership: bool,
}

impl fmt::Debug for TransferResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferResource")
            .field("resource", &self.resource.name())
            .field("state", &self.state)
            .field("buffers", &self.buffers.len())
            .field("images", &self.images.len())
            .field("required_size", &self.required_size)
            .finish()
    }
}

impl TransferResource {
    /// Prepares the upload of `resource`. Creates nothing yet.
    pub fn new(
        allocator: Arc<Allocator>,
        resource: Arc<Resource>,
        callback: Option<CompletionCallback>,
    ) -> Self {
        let families = QueueFamilyLayout::select(&allocator.device().queue_families());
        let defaults = FrameSettings::default();
        Self {
            allocator,
            resource,
            callback,
            state: TransferState::Created,
            families,
            buffers: Vec::new(),
            images: Vec::new(),
            memory_type: None,
            atom: 1,
            required_size: 0,
            memory: None,
            staging: None,
            staging_alignment: defaults.min_staging_alignment,
            validate_ownership: defaults.validate_ownership_transfers,
        }
    }

    /// Applies the staging alignment and ownership validation settings.
    pub fn with_settings(mut self, settings: &FrameSettings) -> Self {
        self.staging_alignment = settings.min_staging_alignment.max(1);
        self.validate_ownership = settings.validate_ownership_transfers;
        self
    }

    /// The bundle being uploaded.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Per-buffer driver state, in bundle order.
    pub fn buffers(&self) -> &[BufferAllocInfo] {
        &self.buffers
    }

    /// Per-image driver state, in bundle order.
    pub fn images(&self) -> &[ImageAllocInfo] {
        &self.images
    }

    /// Memory type of the shared allocation, once initialized.
    pub fn memory_type(&self) -> Option<&MemoryType> {
        self.memory_type.as_ref()
    }

    /// Size of the shared allocation.
    pub fn required_size(&self) -> u64 {
        self.required_size
    }

    /// The shared allocation, between `allocate` and `compile`.
    pub fn memory(&self) -> Option<&Arc<DeviceMemory>> {
        self.memory.as_ref()
    }

    /// The staging buffer, between `upload` and `compile`.
    pub fn staging(&self) -> Option<&StagingBuffer> {
        self.staging.as_ref()
    }

    /// Hands the staging buffer to a caller that keeps it alive until the
    /// recorded copies have executed.
    pub fn take_staging(&mut self) -> Option<StagingBuffer> {
        self.staging.take()
    }

    /// Creates the driver objects, intersects their memory-type masks and
    /// lays out the shared allocation.
    pub fn initialize(&mut self) -> Result<(), TransferError> {
        self.expect_state("initialize", TransferState::Created)?;
        match self.create_objects() {
            Ok(()) => {
                self.transition(TransferState::Initialized);
                Ok(())
            }
            Err(e) => self.fail("initialize resource", e),
        }
    }

    /// Allocates the shared pool and the dedicated allocations, then binds
    /// every object.
    pub fn allocate(&mut self) -> Result<(), TransferError> {
        self.expect_state("allocate", TransferState::Initialized)?;
        match self.allocate_and_bind() {
            Ok(()) => {
                self.transition(TransferState::Allocated);
                Ok(())
            }
            Err(e) => self.fail("allocate memory", e),
        }
    }

    /// Writes initial contents, directly into host-visible memory or into a
    /// freshly created staging buffer.
    ///
    /// Returns the staging size, `0` when nothing needed staging.
    pub fn upload(&mut self) -> Result<u64, TransferError> {
        self.expect_state("upload", TransferState::Allocated)?;
        let (staging_size, copies) = match self.pre_transfer_data() {
            Ok(planned) => planned,
            Err(e) => return self.fail("write mapped memory", e),
        };

        if staging_size > 0 {
            if let Err(e) = self.create_staging(staging_size, copies) {
                return self.fail("create staging buffer", e);
            }
        }

        self.transition(TransferState::Uploaded);
        Ok(staging_size)
    }

    /// Runs `initialize`, `allocate` and `upload` in order.
    pub fn prepare(&mut self) -> Result<u64, TransferError> {
        self.initialize()?;
        self.allocate()?;
        self.upload()
    }

    /// Records the staging copies into `cb`, which records for `family`.
    ///
    /// Staged images are first moved to `TransferDstOptimal`. The
    /// transfer-write to shader-read barriers are returned through the output
    /// vectors rather than recorded, so the caller can batch them. A barrier
    /// whose target belongs to another queue family is the release half of an
    /// ownership transfer and is also kept for [`TransferResource::compile`]
    /// to attach to the published object.
    pub fn prepare_commands(
        &mut self,
        cb: CommandBufferId,
        family: u32,
        out_buffer_barriers: &mut Vec<BufferMemoryBarrier>,
        out_image_barriers: &mut Vec<ImageMemoryBarrier>,
    ) -> Result<(), TransferError> {
        self.expect_state("prepare_commands", TransferState::Uploaded)?;
        let Some(staging) = self.staging.as_ref() else {
            return Ok(());
        };
        let device = self.allocator.device().clone();

        let input_barriers: Vec<ImageMemoryBarrier> = self
            .images
            .iter()
            .filter(|image| image.use_staging)
            .filter_map(|image| {
                image.id.map(|id| {
                    ImageMemoryBarrier::transition(
                        id,
                        AccessFlags::HOST_WRITE,
                        AccessFlags::TRANSFER_WRITE,
                        ImageLayout::Undefined,
                        ImageLayout::TransferDstOptimal,
                        image.full_range(),
                    )
                })
            })
            .collect();
        if !input_barriers.is_empty() {
            device.cmd_pipeline_barrier(
                cb,
                PipelineStageFlags::HOST,
                PipelineStageFlags::TRANSFER,
                &[],
                &input_barriers,
            );
        }

        for copy in staging.copies() {
            self.record_copy(device.as_ref(), cb, staging.id(), copy);
        }

        for (index, buffer) in self.buffers.iter_mut().enumerate() {
            let (Some(id), true) = (buffer.id, buffer.use_staging) else {
                continue;
            };
            let (dst_access, _) = buffer_read_scope(buffer.info.usage);
            let mut barrier = BufferMemoryBarrier::whole(id, AccessFlags::TRANSFER_WRITE, dst_access);
            if let Some(target) = Self::target_family(self.families, self.resource.buffers()[index].pass) {
                if target != family {
                    barrier = barrier.with_families(family, target);
                    buffer.barrier = Some(barrier);
                }
            }
            out_buffer_barriers.push(barrier);
        }

        for (index, image) in self.images.iter_mut().enumerate() {
            let (Some(id), true) = (image.id, image.use_staging) else {
                continue;
            };
            let mut barrier = ImageMemoryBarrier::transition(
                id,
                AccessFlags::TRANSFER_WRITE,
                AccessFlags::SHADER_READ,
                ImageLayout::TransferDstOptimal,
                ImageLayout::ShaderReadOnlyOptimal,
                image.full_range(),
            );
            if let Some(target) = Self::target_family(self.families, self.resource.images()[index].pass) {
                if target != family {
                    barrier = barrier.with_families(family, target);
                    image.barrier = Some(barrier);
                }
            }
            out_image_barriers.push(barrier);
        }

        Ok(())
    }

    /// Pipeline stages that first read the staged targets.
    pub fn read_stages(&self) -> PipelineStageFlags {
        let buffers = self
            .buffers
            .iter()
            .filter(|buffer| buffer.use_staging)
            .fold(PipelineStageFlags::empty(), |stages, buffer| {
                stages | buffer_read_scope(buffer.info.usage).1
            });
        if self.images.iter().any(|image| image.use_staging) {
            buffers | PipelineStageFlags::ALL_SHADERS
        } else {
            buffers
        }
    }

    /// Records the whole upload into `cb`: staging copies followed by one
    /// barrier batch making the targets visible to shaders.
    ///
    /// `cb` must be in the recording state.
    pub fn record_commands(&mut self, cb: CommandBufferId, family: u32) -> Result<(), TransferError> {
        let mut buffer_barriers = Vec::new();
        let mut image_barriers = Vec::new();
        self.prepare_commands(cb, family, &mut buffer_barriers, &mut image_barriers)?;
        if !buffer_barriers.is_empty() || !image_barriers.is_empty() {
            self.allocator.device().cmd_pipeline_barrier(
                cb,
                PipelineStageFlags::TRANSFER,
                self.read_stages(),
                &buffer_barriers,
                &image_barriers,
            );
        }
        Ok(())
    }

    /// Records the upload into a fresh command buffer from `pool` and submits
    /// it to `queue`, signaling `fence`.
    ///
    /// The caller owns the fence and must wait for it before calling
    /// [`TransferResource::compile`].
    pub fn transfer(
        &mut self,
        queue: &DeviceQueue,
        pool: &CommandPool,
        fence: &Fence,
    ) -> Result<(), TransferError> {
        self.expect_state("transfer", TransferState::Uploaded)?;
        if pool.family() != queue.family() {
            return Err(TransferError::InvalidState {
                operation: "transfer with a pool of another family",
                state: self.state,
            });
        }

        let device = self.allocator.device().clone();
        let submitted = pool
            .allocate_buffer()
            .map_err(TransferError::from)
            .and_then(|cb| {
                device.begin_command_buffer(cb)?;
                self.record_commands(cb, pool.family())?;
                device.end_command_buffer(cb)?;
                Ok(cb)
            })
            .and_then(|cb| {
                let batch = SubmitInfo {
                    command_buffers: vec![cb],
                    ..Default::default()
                };
                queue.submit(&[batch], Some(fence))?;
                Ok(())
            });

        match submitted {
            Ok(()) => Ok(()),
            Err(e) => self.fail("submit transfer", e),
        }
    }

    /// Wraps every driver object into a long-lived [`Buffer`] or [`Image`],
    /// publishes them into the bundle and runs the completion callback with
    /// `true`.
    ///
    /// Objects in the shared allocation share one `Arc<DeviceMemory>`;
    /// dedicated ones own theirs. The staging buffer, if still held, is
    /// dropped.
    pub fn compile(&mut self) -> Result<(), TransferError> {
        self.expect_state("compile", TransferState::Uploaded)?;
        self.staging = None;

        let shared = self.memory.take();
        let resource = self.resource.clone();

        for (info, data) in self.buffers.iter_mut().zip(resource.buffers()) {
            let Some(id) = info.id.take() else { continue };
            let (memory, offset) = match (info.dedicated.take(), shared.as_ref()) {
                (Some(dedicated), _) => (dedicated, 0),
                (None, Some(shared)) => (shared.clone(), info.offset),
                (None, None) => {
                    log::error!("Fail to compile buffer '{}' for {}: no memory", data.name, resource.name());
                    self.allocator.device().destroy_buffer(id);
                    continue;
                }
            };
            let buffer = Buffer::from_bound(data.name.clone(), id, info.info.clone(), memory, offset)
                .with_barrier_validation(self.validate_ownership);
            if let Some(barrier) = info.barrier.take() {
                buffer.set_pending_barrier(barrier);
            }
            if !data.set_output(Arc::new(buffer)) {
                log::warn!("Buffer '{}' of {} was already published", data.name, resource.name());
            }
        }

        for (info, data) in self.images.iter_mut().zip(resource.images()) {
            let Some(id) = info.id.take() else { continue };
            let (memory, offset) = match (info.dedicated.take(), shared.as_ref()) {
                (Some(dedicated), _) => (dedicated, 0),
                (None, Some(shared)) => (shared.clone(), info.offset),
                (None, None) => {
                    log::error!("Fail to compile image '{}' for {}: no memory", data.name, resource.name());
                    self.allocator.device().destroy_image(id);
                    continue;
                }
            };
            let image = Image::from_bound(data.name.clone(), id, info.info.clone(), memory, offset)
                .with_barrier_validation(self.validate_ownership);
            if let Some(barrier) = info.barrier.take() {
                image.set_pending_barrier(barrier);
            }
            if !data.set_output(Arc::new(image)) {
                log::warn!("Image '{}' of {} was already published", data.name, resource.name());
            }
        }

        self.transition(TransferState::Compiled);
        if let Some(callback) = self.callback.take() {
            callback(true);
        }
        Ok(())
    }

    /// Releases every driver object and allocation still owned and runs the
    /// completion callback with `false`.
    ///
    /// Calling it again, or after `compile`, does nothing.
    pub fn invalidate(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        let device = self.allocator.device().clone();
        self.staging = None;
        for buffer in &mut self.buffers {
            if let Some(id) = buffer.id.take() {
                device.destroy_buffer(id);
            }
            buffer.dedicated = None;
            buffer.barrier = None;
        }
        for image in &mut self.images {
            if let Some(id) = image.id.take() {
                device.destroy_image(id);
            }
            image.dedicated = None;
            image.barrier = None;
        }
        self.memory = None;

        self.transition(TransferState::Invalidated);
        if let Some(callback) = self.callback.take() {
            callback(false);
        }
    }

    fn create_objects(&mut self) -> Result<(), TransferError> {
        let device = self.allocator.device().clone();
        let resource = self.resource.clone();

        for data in resource.buffers() {
            let mut info = data.info.clone();
            info.usage |= BufferUsage::TRANSFER_DST;
            info.sharing = SharingMode::Exclusive;
            let id = device.create_buffer(&info)?;
            self.buffers.push(BufferAllocInfo {
                info,
                id: Some(id),
                requirements: MemoryRequirements::default(),
                offset: 0,
                dedicated: None,
                use_staging: false,
                staging_offset: 0,
                barrier: None,
            });
            let requirements = self.allocator.buffer_memory_requirements(id)?;
            if let Some(last) = self.buffers.last_mut() {
                last.requirements = requirements;
            }
        }

        for data in resource.images() {
            let mut info = data.info.clone();
            info.usage |= ImageUsage::TRANSFER_DST;
            info.initial_layout = ImageCreateInfo::initial_layout_for(info.tiling);
            let id = device.create_image(&info)?;
            self.images.push(ImageAllocInfo {
                info,
                id: Some(id),
                requirements: MemoryRequirements::default(),
                offset: 0,
                dedicated: None,
                use_staging: false,
                staging_offset: 0,
                barrier: None,
            });
            let requirements = self.allocator.image_memory_requirements(id)?;
            if let Some(last) = self.images.last_mut() {
                last.requirements = requirements;
            }
        }

        let shared_reqs = self
            .buffers
            .iter()
            .map(|b| &b.requirements)
            .chain(self.images.iter().map(|i| &i.requirements))
            .filter(|req| !req.is_dedicated())
            .collect::<Vec<_>>();
        if shared_reqs.is_empty() {
            return Ok(());
        }

        let mask = shared_reqs
            .iter()
            .fold(self.allocator.initial_type_mask(), |mask, req| {
                mask & req.memory_type_bits
            });
        if mask == 0 {
            return Err(TransferError::NoMemoryType { mask });
        }
        let memory_type = *self
            .allocator
            .find_memory_type(mask, AllocationUsage::DeviceLocal)
            .ok_or(TransferError::NoMemoryType { mask })?;

        self.atom = if memory_type.is_host_visible() && !memory_type.is_host_coherent() {
            self.allocator.non_coherent_atom_size()
        } else {
            1
        };
        self.memory_type = Some(memory_type);
        self.layout_shared();
        Ok(())
    }

    fn layout_shared(&mut self) {
        let mut items = Vec::new();
        let mut slots = Vec::new();
        for (index, image) in self.images.iter().enumerate() {
            if image.is_dedicated() {
                continue;
            }
            let class = match image.info.tiling {
                ImageTiling::Optimal => PackClass::OptimalImage,
                ImageTiling::Linear => PackClass::LinearImage,
            };
            items.push(PackItem {
                class,
                size: image.requirements.size,
                alignment: image.requirements.alignment,
            });
            slots.push(StagingTarget::Image(index));
        }
        for (index, buffer) in self.buffers.iter().enumerate() {
            if buffer.is_dedicated() {
                continue;
            }
            items.push(PackItem {
                class: PackClass::Buffer,
                size: buffer.requirements.size,
                alignment: buffer.requirements.alignment,
            });
            slots.push(StagingTarget::Buffer(index));
        }

        let (offsets, total) = pack(&items, self.allocator.buffer_image_granularity(), self.atom);
        for (slot, offset) in slots.into_iter().zip(offsets) {
            match slot {
                StagingTarget::Buffer(index) => self.buffers[index].offset = offset,
                StagingTarget::Image(index) => self.images[index].offset = offset,
            }
        }
        self.required_size = total;
        log::trace!(
            "Packed {} objects of {} into {} bytes",
            items.len(),
            self.resource.name(),
            total
        );
    }

    fn allocate_and_bind(&mut self) -> Result<(), TransferError> {
        let device = self.allocator.device().clone();

        if self.required_size > 0 {
            let memory_type = self
                .memory_type
                .ok_or(TransferError::NoMemoryType { mask: 0 })?;
            let id = self.allocator.allocate(self.required_size, &memory_type, None)?;
            let memory = Arc::new(DeviceMemory::new(
                self.allocator.clone(),
                id,
                self.required_size,
                memory_type,
                false,
            ));
            self.memory = Some(memory);
        }

        for index in 0..self.buffers.len() {
            let Some(id) = self.buffers[index].id else { continue };
            if self.buffers[index].is_dedicated() {
                let requirements = self.buffers[index].requirements;
                let memory = self.allocate_dedicated(&requirements, DedicatedTarget::Buffer(id))?;
                device.bind_buffer_memory(id, memory.id(), 0)?;
                self.buffers[index].dedicated = Some(memory);
            } else if let Some(memory) = &self.memory {
                device.bind_buffer_memory(id, memory.id(), self.buffers[index].offset)?;
            }
        }

        for index in 0..self.images.len() {
            let Some(id) = self.images[index].id else { continue };
            if self.images[index].is_dedicated() {
                let requirements = self.images[index].requirements;
                let memory = self.allocate_dedicated(&requirements, DedicatedTarget::Image(id))?;
                device.bind_image_memory(id, memory.id(), 0)?;
                self.images[index].dedicated = Some(memory);
            } else if let Some(memory) = &self.memory {
                device.bind_image_memory(id, memory.id(), self.images[index].offset)?;
            }
        }

        Ok(())
    }

    fn allocate_dedicated(
        &self,
        requirements: &MemoryRequirements,
        target: DedicatedTarget,
    ) -> Result<Arc<DeviceMemory>, TransferError> {
        let mask = requirements.memory_type_bits & self.allocator.initial_type_mask();
        let memory_type = *self
            .allocator
            .find_memory_type(mask, AllocationUsage::DeviceLocal)
            .ok_or(TransferError::NoMemoryType { mask })?;
        let id = self
            .allocator
            .allocate(requirements.size, &memory_type, Some(target))?;
        Ok(Arc::new(DeviceMemory::new(
            self.allocator.clone(),
            id,
            requirements.size,
            memory_type,
            self.allocator.has_dedicated_feature(),
        )))
    }

    // Writes what the host can reach and plans the staging buffer for the
    // rest, buffers first.
    fn pre_transfer_data(&mut self) -> Result<(u64, Vec<StagingCopy>), TransferError> {
        let resource = self.resource.clone();
        let pool_visible = self
            .memory
            .as_ref()
            .is_some_and(|memory| memory.memory_type().is_host_visible());
        let alignment = self.staging_alignment.max(self.atom);

        let mut direct: Vec<(u64, u64, &DataSource)> = Vec::new();
        let mut copies = Vec::new();
        let mut staging_size = 0u64;
        let mut stage = |size: u64, target: StagingTarget| {
            let offset = align_up(staging_size, alignment);
            copies.push(StagingCopy {
                source_offset: offset,
                size,
                target,
            });
            staging_size = offset + size;
            offset
        };

        for (index, (info, data)) in self.buffers.iter_mut().zip(resource.buffers()).enumerate() {
            if data.source.is_empty() || info.id.is_none() {
                continue;
            }
            let size = info.info.size;
            match &info.dedicated {
                Some(memory) if memory.memory_type().is_host_visible() => {
                    write_mapped(memory, 0, size, &data.source)?;
                }
                None if pool_visible => direct.push((info.offset, size, &data.source)),
                _ => {
                    info.use_staging = true;
                    info.staging_offset = stage(size, StagingTarget::Buffer(index));
                }
            }
        }

        for (index, (info, data)) in self.images.iter_mut().zip(resource.images()).enumerate() {
            if data.source.is_empty() || info.id.is_none() {
                continue;
            }
            let size = info.info.texel_data_size();
            let linear = info.info.tiling == ImageTiling::Linear;
            match &info.dedicated {
                Some(memory) if linear && memory.memory_type().is_host_visible() => {
                    write_mapped(memory, 0, size, &data.source)?;
                }
                None if linear && pool_visible => direct.push((info.offset, size, &data.source)),
                _ => {
                    info.use_staging = true;
                    info.staging_offset = stage(size, StagingTarget::Image(index));
                }
            }
        }

        if let (false, Some(memory)) = (direct.is_empty(), &self.memory) {
            memory
                .write_with(0, memory.size(), |bytes| {
                    for (offset, size, source) in &direct {
                        let start = *offset as usize;
                        source.write_into(&mut bytes[start..start + *size as usize]);
                    }
                })
                .map_err(TransferError::Map)?;
        }

        Ok((staging_size, copies))
    }

    fn create_staging(&mut self, size: u64, copies: Vec<StagingCopy>) -> Result<(), TransferError> {
        let staging = StagingBuffer::create(&self.allocator, self.resource.name(), size, copies)?;
        let resource = self.resource.clone();
        staging
            .buffer()
            .write_with(0, size, |bytes| {
                for copy in staging.copies() {
                    let source = match copy.target {
                        StagingTarget::Buffer(index) => &resource.buffers()[index].source,
                        StagingTarget::Image(index) => &resource.images()[index].source,
                    };
                    let start = copy.source_offset as usize;
                    source.write_into(&mut bytes[start..start + copy.size as usize]);
                }
            })
            .map_err(TransferError::Map)?;
        memory::record_staging(size);
        log::debug!(
            "Staged {} bytes in {} regions for {}",
            staging.copied_bytes(),
            staging.copies().len(),
            resource.name()
        );
        self.staging = Some(staging);
        Ok(())
    }

    fn record_copy(&self, device: &dyn GpuDriver, cb: CommandBufferId, src: BufferId, copy: &StagingCopy) {
        match copy.target {
            StagingTarget::Buffer(index) => {
                let Some(dst) = self.buffers[index].id else { return };
                device.cmd_copy_buffer(
                    cb,
                    src,
                    dst,
                    &[BufferCopy {
                        src_offset: copy.source_offset,
                        dst_offset: 0,
                        size: copy.size,
                    }],
                );
            }
            StagingTarget::Image(index) => {
                let image = &self.images[index];
                let Some(dst) = image.id else { return };
                let region = BufferImageCopy {
                    buffer_offset: copy.source_offset,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: ImageSubresourceLayers {
                        aspect: image.info.format.aspects(true),
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: image.info.array_layers,
                    },
                    image_offset: [0, 0, 0],
                    image_extent: image.info.extent,
                };
                device.cmd_copy_buffer_to_image(cb, src, dst, ImageLayout::TransferDstOptimal, &[region]);
            }
        }
    }

    // `None` when the pass type names no consuming queue.
    fn target_family(families: Option<QueueFamilyLayout>, pass: RenderPassType) -> Option<u32> {
        let ops = pass.queue_operations();
        if ops.is_empty() {
            return None;
        }
        families.map(|layout| layout.family_for(ops))
    }

    fn expect_state(&self, operation: &'static str, expected: TransferState) -> Result<(), TransferError> {
        if self.state == TransferState::Invalidated {
            return Err(TransferError::Invalidated);
        }
        if self.state != expected {
            return Err(TransferError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: TransferState) {
        log::debug!(
            "Transfer of {}: {:?} -> {:?}",
            self.resource.name(),
            self.state,
            next
        );
        self.state = next;
    }

    fn fail<T>(&mut self, action: &str, err: TransferError) -> Result<T, TransferError> {
        log::error!("Fail to {} for {}: {}", action, self.resource.name(), err);
        self.invalidate();
        Err(err)
    }
}

impl Drop for TransferResource {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.invalidate();
        }
    }
}

fn write_mapped(
    memory: &DeviceMemory,
    offset: u64,
    size: u64,
    source: &DataSource,
) -> Result<(), TransferError> {
    memory
        .write_with(offset, size, |bytes| {
            source.write_into(bytes);
        })
        .map_err(TransferError::Map)
}
