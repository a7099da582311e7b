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

use super::{begin_pass_commands, PassError, RenderOrdering, RenderPass, RenderPassData, RenderPassHandle};
use crate::attachment_lane::{
    Attachment, AttachmentHandle, DescriptorBufferInfo, MaterialAttachment, MaterialHandle,
    VertexBufferAttachment, VertexBufferHandle,
};
use crate::frame::FrameContext;
use crate::transfer_lane::{StagingBuffer, TransferResource};
use ferrite_core::gpu::{
    BufferCreateInfo, BufferMemoryBarrier, BufferUsage, CommandBufferId, GpuDriver, ImageMemoryBarrier,
    PipelineStageFlags, QueueOperations,
};
use ferrite_data::{
    Buffer, BufferData, CommandPool, DataSource, Image, MaterialSet, RenderPassType, Resource, VertexData,
    VertexSpan,
};
use std::fmt;
use std::sync::Arc;

/// Descriptor slot of the vertex and index buffers.
pub const VERTEX_DESCRIPTOR_SLOT: u32 = 0;
/// Descriptor slot of the material table.
pub const MATERIAL_DESCRIPTOR_SLOT: u32 = 1;

/// Everything a [`MaterialCommandRecorder`] needs to draw one frame.
#[derive(Debug)]
pub struct MaterialDraw<'a> {
    /// Generation of the frame counter.
    pub generation: u64,
    /// The material generation the frame renders with.
    pub materials: &'a MaterialSet,
    /// Uploaded vertices.
    pub vertex_buffer: &'a Buffer,
    /// Uploaded indexes.
    pub index_buffer: &'a Buffer,
    /// One draw range per run of triangles sharing a material.
    pub spans: &'a [VertexSpan],
    /// Descriptors whose backing object changed, as `(slot, index, info)`.
    pub descriptor_writes: &'a [(u32, u32, DescriptorBufferInfo)],
}

/// Records the actual draw commands of a [`MaterialRenderPass`].
///
/// Pipeline creation and descriptor set management live outside this crate;
/// the recorder receives resolved buffers and draw ranges.
pub trait MaterialCommandRecorder: Send + Sync {
    /// Records draws into `cb`, which is in the recording state.
    fn record(&self, device: &dyn GpuDriver, cb: CommandBufferId, draw: &MaterialDraw<'_>) -> Result<(), PassError>;
}

/// Draws frame geometry with the material table.
///
/// Every frame it acquires the material table and material images released
/// to the graphics family, uploads the submitted vertices, and hands the
/// result to the optional [`MaterialCommandRecorder`].
pub struct MaterialRenderPass {
    data: RenderPassData,
    recorder: Option<Arc<dyn MaterialCommandRecorder>>,
}

impl fmt::Debug for MaterialRenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialRenderPass")
            .field("data", &self.data)
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}

impl MaterialRenderPass {
    /// Creates the pass and registers it as a graphics consumer of
    /// `materials`.
    pub fn new(
        name: impl Into<String>,
        vertices: Arc<VertexBufferAttachment>,
        materials: Arc<MaterialAttachment>,
    ) -> Self {
        materials.add_consumer(QueueOperations::GRAPHICS);
        Self {
            data: RenderPassData::new(name, RenderOrdering::DEFAULT)
                .with_attachment(vertices)
                .with_attachment(materials),
            recorder: None,
        }
    }

    /// Delegates draw recording to `recorder`.
    pub fn with_recorder(mut self, recorder: Arc<dyn MaterialCommandRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

impl RenderPass for MaterialRenderPass {
    fn data(&self) -> &RenderPassData {
        &self.data
    }

    fn queue_operations(&self) -> QueueOperations {
        QueueOperations::GRAPHICS
    }

    fn make_frame_handle(self: Arc<Self>, _frame: &dyn FrameContext) -> Box<dyn RenderPassHandle> {
        Box::new(MaterialPassHandle {
            pass: self,
            vertices: None,
            materials: None,
            acquired: Vec::new(),
            staging: None,
            pool: None,
        })
    }
}

// A release barrier taken off its object by this frame.
enum TakenRelease {
    Buffer(Arc<Buffer>, BufferMemoryBarrier),
    Image(Arc<Image>, ImageMemoryBarrier),
}

impl TakenRelease {
    // Hands the release back so a later frame acquires it.
    fn restore(self) {
        match self {
            Self::Buffer(buffer, release) => buffer.set_pending_barrier(release),
            Self::Image(image, release) => image.set_pending_barrier(release),
        }
    }
}

/// Frame handle of a [`MaterialRenderPass`].
///
/// Release barriers the handle acquires stay with it until the frame is
/// finalized. If the frame does not complete, or recording fails, they go
/// back to their buffer or image.
pub struct MaterialPassHandle {
    pass: Arc<MaterialRenderPass>,
    vertices: Option<VertexBufferHandle>,
    materials: Option<MaterialHandle>,
    acquired: Vec<TakenRelease>,
    staging: Option<StagingBuffer>,
    pool: Option<CommandPool>,
}

impl MaterialPassHandle {
    // Moves every release barrier aimed at `family` onto this command buffer.
    fn acquire_materials(
        &mut self,
        set: &MaterialSet,
        family: u32,
    ) -> (Vec<BufferMemoryBarrier>, Vec<ImageMemoryBarrier>) {
        let mut buffers = Vec::new();
        let mut images = Vec::new();

        if let Some(table) = set.buffer() {
            if table.pending_barrier().is_some_and(|b| b.dst_queue_family == family) {
                if let Some(release) = table.take_pending_barrier() {
                    buffers.push(release.acquire_half());
                    self.acquired.push(TakenRelease::Buffer(table.clone(), release));
                }
            }
        }

        let layout = set.layout();
        for slot in 0..layout.slot_count() as u32 {
            let Some(image) = layout.image(slot) else { continue };
            if image.pending_barrier().is_some_and(|b| b.dst_queue_family == family) {
                if let Some(release) = image.take_pending_barrier() {
                    images.push(release.acquire_half());
                    self.acquired.push(TakenRelease::Image(image.clone(), release));
                }
            }
        }

        (buffers, images)
    }

    fn restore_releases(&mut self) {
        if !self.acquired.is_empty() {
            log::debug!(
                "Pass '{}' returns {} unexecuted acquires",
                self.pass.data.name(),
                self.acquired.len()
            );
        }
        for release in self.acquired.drain(..) {
            release.restore();
        }
    }

    fn record_geometry(
        &mut self,
        frame: &dyn FrameContext,
        cb: CommandBufferId,
        family: u32,
        vertex_handle: &VertexBufferHandle,
        vertices: &Arc<VertexData>,
        set: &MaterialSet,
    ) -> Result<(), PassError> {
        if vertices.is_empty() || vertices.data.is_empty() {
            return Ok(());
        }
        let (vertex_buffer, index_buffer) = self.upload_vertices(frame, cb, family, vertices)?;
        vertex_handle.set_buffers(vertex_buffer.clone(), index_buffer.clone());

        if let Some(recorder) = &self.pass.recorder {
            let spans = vertex_handle.spans();
            let descriptor_writes = self.dirty_descriptors();
            recorder.record(
                frame.device().as_ref(),
                cb,
                &MaterialDraw {
                    generation: frame.generation(),
                    materials: set,
                    vertex_buffer: &vertex_buffer,
                    index_buffer: &index_buffer,
                    spans: &spans,
                    descriptor_writes: &descriptor_writes,
                },
            )?;
        }
        Ok(())
    }

    // Uploads the frame's geometry on `cb` and returns the vertex and index
    // buffers.
    fn upload_vertices(
        &mut self,
        frame: &dyn FrameContext,
        cb: CommandBufferId,
        family: u32,
        vertices: &Arc<VertexData>,
    ) -> Result<(Arc<Buffer>, Arc<Buffer>), PassError> {
        let name = format!("{}:geometry#{}", self.pass.data.name(), frame.generation());
        let vertex_data = vertices.clone();
        let index_data = vertices.clone();
        let resource = Arc::new(
            Resource::new(name)
                .with_buffer(
                    BufferData::new(
                        "vertices",
                        BufferCreateInfo::new(
                            BufferUsage::VERTEX_BUFFER | BufferUsage::STORAGE_BUFFER,
                            vertices.vertex_bytes().len() as u64,
                        ),
                        DataSource::callback(move |sink| sink(vertex_data.vertex_bytes())),
                    )
                    .with_pass(RenderPassType::Graphics),
                )
                .with_buffer(
                    BufferData::new(
                        "indexes",
                        BufferCreateInfo::new(BufferUsage::INDEX_BUFFER, vertices.index_bytes().len() as u64),
                        DataSource::callback(move |sink| sink(index_data.index_bytes())),
                    )
                    .with_pass(RenderPassType::Graphics),
                ),
        );

        let mut transfer =
            TransferResource::new(frame.allocator().clone(), resource.clone(), None).with_settings(frame.settings());
        transfer.prepare()?;
        transfer.record_commands(cb, family)?;
        self.staging = transfer.take_staging();
        transfer.compile()?;

        match (resource.buffers()[0].output(), resource.buffers()[1].output()) {
            (Some(vertex), Some(index)) => Ok((vertex.clone(), index.clone())),
            _ => Err(PassError::Recording(format!(
                "geometry of {} was not published",
                resource.name()
            ))),
        }
    }

    fn dirty_descriptors(&self) -> Vec<(u32, u32, DescriptorBufferInfo)> {
        let data = &self.pass.data;
        let mut writes = Vec::new();
        let (Some(vertices), Some(materials)) = (&self.vertices, &self.materials) else {
            return writes;
        };
        let bindings = [
            (vertices as &dyn AttachmentHandle, VERTEX_DESCRIPTOR_SLOT, 0),
            (vertices as &dyn AttachmentHandle, VERTEX_DESCRIPTOR_SLOT, 1),
            (materials as &dyn AttachmentHandle, MATERIAL_DESCRIPTOR_SLOT, 0),
        ];
        for (handle, slot, index) in bindings {
            if handle.is_descriptor_dirty(data, slot, index, false) {
                let mut info = DescriptorBufferInfo::default();
                if handle.write_descriptor(data, slot, index, false, &mut info) {
                    writes.push((slot, index, info));
                }
            }
        }
        writes
    }
}

impl RenderPassHandle for MaterialPassHandle {
    fn name(&self) -> &str {
        self.pass.data.name()
    }

    fn queue_operations(&self) -> QueueOperations {
        QueueOperations::GRAPHICS
    }

    fn add_required_attachment(&mut self, _attachment: &Arc<dyn Attachment>, handle: &Arc<dyn AttachmentHandle>) {
        let any = handle.as_any();
        if let Some(vertices) = any.downcast_ref::<VertexBufferHandle>() {
            self.vertices = Some(vertices.clone());
        } else if let Some(materials) = any.downcast_ref::<MaterialHandle>() {
            self.materials = Some(materials.clone());
        }
    }

    fn do_prepare_commands(&mut self, frame: &dyn FrameContext) -> Result<Vec<CommandBufferId>, PassError> {
        let vertex_handle = self.vertices.clone().ok_or(PassError::MissingAttachment("vertices"))?;
        let material_handle = self.materials.clone().ok_or(PassError::MissingAttachment("materials"))?;
        let vertices = vertex_handle
            .vertices()
            .ok_or(PassError::MissingInput(vertex_handle.attachment_id()))?;
        let set = material_handle
            .materials()
            .unwrap_or_else(|| material_handle.attachment().materials());

        let (pool, cb) = begin_pass_commands(frame, QueueOperations::GRAPHICS)?;
        let family = pool.family();
        self.pool = Some(pool);
        let device = frame.device().clone();

        let (buffer_acquires, image_acquires) = self.acquire_materials(&set, family);
        if !buffer_acquires.is_empty() || !image_acquires.is_empty() {
            log::trace!(
                "Pass '{}' acquires {} buffers and {} images",
                self.pass.data.name(),
                buffer_acquires.len(),
                image_acquires.len()
            );
            device.cmd_pipeline_barrier(
                cb,
                PipelineStageFlags::TRANSFER,
                PipelineStageFlags::ALL_SHADERS,
                &buffer_acquires,
                &image_acquires,
            );
        }

        let recorded = self
            .record_geometry(frame, cb, family, &vertex_handle, &vertices, &set)
            .and_then(|()| Ok(device.end_command_buffer(cb)?));
        if let Err(e) = recorded {
            self.restore_releases();
            return Err(e);
        }
        Ok(vec![cb])
    }

    fn finalize(&mut self, _frame: &dyn FrameContext, success: bool) {
        if success {
            self.acquired.clear();
        } else {
            self.restore_releases();
        }
        self.staging = None;
        self.pool = None;
    }
}
