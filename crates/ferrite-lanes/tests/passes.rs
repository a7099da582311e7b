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

mod common;

use common::TestFrame;
use ferrite_core::gpu::{BufferCreateInfo, BufferUsage, CommandBufferId, GpuDriver, QueueOperations};
use ferrite_data::{BufferData, DataSource, Material, MaterialInputData, Resource, VertexArray, VertexData};
use ferrite_infra::FailPoint;
use ferrite_lanes::{
    Attachment, AttachmentHandle, AttachmentInputData, FrameContext, MaterialAttachment, MaterialCommandRecorder,
    MaterialCompilationAttachment, MaterialCompilationHandle, MaterialCompilationRenderPass, MaterialDraw,
    MaterialHandle, MaterialRenderPass, PassError, RenderPass, RenderPassHandle, TransferAttachment,
    TransferRenderPass, TransferResource, VertexBufferAttachment, VertexBufferHandle,
};
use std::sync::{Arc, Mutex};

fn materials(ids: &[u32]) -> AttachmentInputData {
    AttachmentInputData::Materials(MaterialInputData {
        materials: ids.iter().map(|&id| Arc::new(Material::new(id, 0, Vec::new()))).collect(),
        removed: Vec::new(),
    })
}

fn two_quads(first: u32, second: u32) -> Arc<VertexData> {
    let mut array = VertexArray::default();
    array.add_quad().set_geometry([0.0, 0.0, 0.0], [1.0, 1.0]).set_material(first);
    array.add_quad().set_geometry([1.0, 0.0, 0.0], [1.0, 1.0]).set_material(second);
    array.pop()
}

/// Builds the frame handles of `attachments` and hands them to `pass`.
fn bind(
    frame: &TestFrame,
    pass: &mut Box<dyn RenderPassHandle>,
    attachments: &[Arc<dyn Attachment>],
) -> Vec<Arc<dyn AttachmentHandle>> {
    attachments
        .iter()
        .map(|attachment| {
            let handle = attachment.clone().make_frame_handle(frame);
            assert!(handle.setup(frame));
            pass.add_required_attachment(attachment, &handle);
            handle
        })
        .collect()
}

/// Compiles `ids` into `table` through a one-off frame and publishes them.
fn compile_materials(frame: &TestFrame, table: &Arc<MaterialAttachment>, ids: &[u32]) {
    compile_input(frame, table, materials(ids));
}

fn compile_input(frame: &TestFrame, table: &Arc<MaterialAttachment>, input: AttachmentInputData) {
    let compilation = Arc::new(MaterialCompilationAttachment::new("compile", table.clone()));
    let pass = Arc::new(MaterialCompilationRenderPass::new([compilation.clone()]));
    let mut handle = pass.make_frame_handle(frame);
    let attachment: Arc<dyn Attachment> = compilation;
    let handles = bind(frame, &mut handle, &[attachment]);

    assert!(handles[0].submit_input(frame, input));
    frame.run_tasks();

    let commands = handle.prepare_commands(frame);
    assert_eq!(commands.len(), 1);
    frame.execute(handle.queue_operations(), commands);
    handle.finalize(frame, true);
}

#[derive(Default)]
struct CountingRecorder {
    draws: Mutex<Vec<(u64, usize, usize)>>,
}

impl MaterialCommandRecorder for CountingRecorder {
    fn record(&self, _device: &dyn GpuDriver, _cb: CommandBufferId, draw: &MaterialDraw<'_>) -> Result<(), PassError> {
        self.draws
            .lock()
            .unwrap()
            .push((draw.materials.generation(), draw.spans.len(), draw.descriptor_writes.len()));
        Ok(())
    }
}

#[test]
fn handles_reject_input_of_another_kind() {
    let frame = TestFrame::discrete();
    let vertices = Arc::new(VertexBufferAttachment::new("vertices")).make_frame_handle(&frame);
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    let material = table.clone().make_frame_handle(&frame);
    let transfer = Arc::new(TransferAttachment::new("uploads")).make_frame_handle(&frame);

    assert!(!vertices.submit_input(&frame, materials(&[1])));
    assert!(!transfer.submit_input(&frame, AttachmentInputData::Vertices(two_quads(1, 1))));
    assert!(!material.submit_input(&frame, materials(&[1])));
    assert_eq!(frame.pending_tasks(), 0);
    assert!(!frame.is_input_submitted(vertices.attachment_id()));
}

#[test]
fn vertex_input_is_applied_by_the_frame_task() {
    let frame = TestFrame::discrete();
    let attachment = Arc::new(VertexBufferAttachment::new("vertices"));
    let handle = attachment.clone().make_frame_handle(&frame);
    assert!(handle.is_input_required());

    assert!(handle.submit_input(&frame, AttachmentInputData::Vertices(two_quads(3, 4))));
    let vertices = handle.as_any().downcast_ref::<VertexBufferHandle>().unwrap();
    assert!(vertices.vertices().is_none());
    assert!(!frame.is_input_submitted(attachment.id()));

    assert_eq!(frame.run_tasks(), 1);
    assert!(frame.is_input_submitted(attachment.id()));
    let spans = vertices.spans();
    assert_eq!(spans.len(), 2);
    assert_eq!((spans[0].material, spans[0].first_index, spans[0].index_count), (3, 0, 6));
    assert_eq!((spans[1].material, spans[1].first_index, spans[1].index_count), (4, 6, 6));
}

#[test]
fn compiled_materials_start_a_new_generation() {
    let frame = TestFrame::discrete();
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    table.add_consumer(QueueOperations::GRAPHICS);
    let before = table.materials();

    compile_materials(&frame, &table, &[1, 2]);

    let after = table.materials();
    assert_eq!(after.generation(), before.generation() + 1);
    assert_eq!(after.len(), 2);
    assert!(before.is_empty());
    assert!(before.buffer().is_none());

    let buffer = after.buffer().unwrap();
    assert_eq!(frame.device.read_buffer(buffer.id()).unwrap(), after.encode());
    let release = buffer.pending_barrier().unwrap();
    assert_eq!(release.src_queue_family, frame.queue_families().transfer);
    assert_eq!(release.dst_queue_family, frame.queue_families().graphics);
}

#[test]
fn readers_keep_the_generation_they_started_with() {
    let frame = TestFrame::discrete();
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    compile_materials(&frame, &table, &[1]);

    let reader = table.clone().make_frame_handle(&frame);
    assert!(reader.setup(&frame));
    let reader = reader.as_any().downcast_ref::<MaterialHandle>().unwrap().clone();
    let seen = reader.materials().unwrap();

    compile_materials(&frame, &table, &[2]);

    assert_eq!(reader.materials().unwrap().generation(), seen.generation());
    assert!(reader.materials().unwrap().material(2).is_none());
    assert!(table.materials().material(1).is_some());
    assert!(table.materials().material(2).is_some());
}

#[test]
fn an_abandoned_compilation_keeps_the_current_generation() {
    let frame = TestFrame::discrete();
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    let compilation = Arc::new(MaterialCompilationAttachment::new("compile", table.clone()));
    let pass = Arc::new(MaterialCompilationRenderPass::new([compilation.clone()]));
    let mut handle = pass.clone().make_frame_handle(&frame);
    let attachment: Arc<dyn Attachment> = compilation.clone();
    let handles = bind(&frame, &mut handle, &[attachment]);

    assert!(handles[0].submit_input(&frame, materials(&[1])));
    frame.run_tasks();
    assert_eq!(handle.prepare_commands(&frame).len(), 1);
    assert!(pass.in_progress(table.id()));

    let output = handles[0]
        .as_any()
        .downcast_ref::<MaterialCompilationHandle>()
        .unwrap()
        .output();
    assert_eq!(output.unwrap().generation(), 1);

    handle.finalize(&frame, false);
    assert_eq!(table.materials().generation(), 0);
    assert!(!pass.in_progress(table.id()));
    assert!(pass.has_request(table.id()));
}

#[test]
fn a_failed_compilation_is_retried_by_the_next_frame() {
    let frame = TestFrame::discrete();
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    let compilation = Arc::new(MaterialCompilationAttachment::new("compile", table.clone()));
    let pass = Arc::new(MaterialCompilationRenderPass::new([compilation.clone()]));
    let attachment: Arc<dyn Attachment> = compilation;

    let mut handle = pass.clone().make_frame_handle(&frame);
    let handles = bind(&frame, &mut handle, &[attachment.clone()]);
    assert!(handles[0].submit_input(&frame, materials(&[4, 5])));
    frame.run_tasks();
    frame.device.fail_next(FailPoint::CreateBuffer);
    assert!(handle.prepare_commands(&frame).is_empty());
    assert!(pass.has_request(table.id()));
    handle.finalize(&frame, false);

    // A newer removal of 5 wins over the re-queued addition.
    pass.append_request(
        table.id(),
        MaterialInputData {
            materials: Vec::new(),
            removed: vec![5],
        },
    );

    let mut handle = pass.clone().make_frame_handle(&frame);
    bind(&frame, &mut handle, &[attachment]);
    let commands = handle.prepare_commands(&frame);
    assert_eq!(commands.len(), 1);
    frame.execute(handle.queue_operations(), commands);
    handle.finalize(&frame, true);

    let compiled = table.materials();
    assert_eq!(compiled.generation(), 1);
    assert!(compiled.material(4).is_some());
    assert!(compiled.material(5).is_none());
    assert!(!pass.has_request(table.id()));
}

#[test]
fn an_empty_table_uploads_zeroed_records() {
    let frame = TestFrame::discrete();
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    frame.device.set_allocation_fill(0xCD);

    // Removing an unknown material still compiles a generation without records.
    compile_input(
        &frame,
        &table,
        AttachmentInputData::Materials(MaterialInputData {
            materials: Vec::new(),
            removed: vec![7],
        }),
    );

    let empty = table.materials();
    assert_eq!(empty.generation(), 1);
    assert!(empty.encode().is_empty());
    let buffer = empty.buffer().unwrap();
    assert_eq!(
        frame.device.read_buffer(buffer.id()).unwrap(),
        vec![0; empty.table_size() as usize]
    );
}

#[test]
fn transfer_pass_uploads_the_submitted_bundle() {
    let frame = TestFrame::discrete();
    let attachment = Arc::new(TransferAttachment::new("uploads"));
    let pass = Arc::new(TransferRenderPass::new(attachment.clone()));
    let mut handle = pass.make_frame_handle(&frame);
    let dynamic: Arc<dyn Attachment> = attachment;
    let handles = bind(&frame, &mut handle, &[dynamic]);

    let resource = Arc::new(Resource::new("frame data").with_buffer(BufferData::new(
        "constants",
        BufferCreateInfo::new(BufferUsage::STORAGE_BUFFER, 128),
        DataSource::Bytes(vec![9; 128]),
    )));
    let completed = Arc::new(Mutex::new(None));
    let sink = completed.clone();
    let transfer = TransferResource::new(
        frame.allocator().clone(),
        resource.clone(),
        Some(Box::new(move |ok| *sink.lock().unwrap() = Some(ok))),
    );
    assert!(handles[0].submit_input(&frame, AttachmentInputData::Transfer(transfer)));
    frame.run_tasks();

    let commands = handle.prepare_commands(&frame);
    assert_eq!(commands.len(), 1);
    frame.execute(handle.queue_operations(), commands);
    handle.finalize(&frame, true);

    assert_eq!(*completed.lock().unwrap(), Some(true));
    let buffer = resource.buffers()[0].output().unwrap();
    assert_eq!(frame.device.read_buffer(buffer.id()).unwrap(), vec![9; 128]);
}

#[test]
fn transfer_pass_without_input_is_fatal() {
    let frame = TestFrame::discrete();
    let attachment = Arc::new(TransferAttachment::new("uploads"));
    let pass = Arc::new(TransferRenderPass::new(attachment.clone()));
    let mut handle = pass.make_frame_handle(&frame);
    let dynamic: Arc<dyn Attachment> = attachment;
    bind(&frame, &mut handle, &[dynamic]);

    assert!(handle.prepare_commands(&frame).is_empty());
    assert!(handle.is_fatal_on_failure());
}

#[test]
fn material_pass_acquires_the_table_and_draws_uploaded_geometry() {
    let frame = TestFrame::discrete();
    let vertices = Arc::new(VertexBufferAttachment::new("vertices"));
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    let recorder = Arc::new(CountingRecorder::default());
    let pass = Arc::new(
        MaterialRenderPass::new("sprites", vertices.clone(), table.clone()).with_recorder(recorder.clone()),
    );
    assert!(table.consumers().contains(QueueOperations::GRAPHICS));

    compile_materials(&frame, &table, &[1, 2]);
    assert!(table.materials().buffer().unwrap().pending_barrier().is_some());

    let mut handle = pass.clone().make_frame_handle(&frame);
    let handles = bind(&frame, &mut handle, pass.data().attachments());
    let geometry = two_quads(1, 2);
    assert!(handles[0].submit_input(&frame, AttachmentInputData::Vertices(geometry.clone())));
    frame.run_tasks();

    let commands = handle.prepare_commands(&frame);
    assert_eq!(commands.len(), 1);
    frame.execute(handle.queue_operations(), commands);
    handle.finalize(&frame, true);

    assert!(frame.device.validation_errors().is_empty(), "{:?}", frame.device.validation_errors());
    let table_buffer = table.materials().buffer().unwrap().clone();
    assert!(table_buffer.pending_barrier().is_none());
    assert_eq!(frame.device.buffer_owner(table_buffer.id()), Some(frame.queue_families().graphics));

    let uploaded = handles[0].as_any().downcast_ref::<VertexBufferHandle>().unwrap();
    let vertex_buffer = uploaded.vertex_buffer().unwrap();
    let index_buffer = uploaded.index_buffer().unwrap();
    assert_eq!(frame.device.read_buffer(vertex_buffer.id()).unwrap(), geometry.vertex_bytes());
    assert_eq!(
        frame.device.read_buffer(index_buffer.id()).unwrap(),
        bytemuck::cast_slice::<u32, u8>(&geometry.indexes)
    );

    // Generation 1, two material runs, and all three descriptors written once.
    assert_eq!(*recorder.draws.lock().unwrap(), vec![(1, 2, 3)]);
}

/// Binds a fresh handle of `pass` with `geometry` and records it.
fn record_sprites(
    frame: &TestFrame,
    pass: &Arc<MaterialRenderPass>,
    geometry: Arc<VertexData>,
) -> (Box<dyn RenderPassHandle>, Vec<CommandBufferId>) {
    let mut handle = pass.clone().make_frame_handle(frame);
    let handles = bind(frame, &mut handle, pass.data().attachments());
    assert!(handles[0].submit_input(frame, AttachmentInputData::Vertices(geometry)));
    frame.run_tasks();
    let commands = handle.prepare_commands(frame);
    (handle, commands)
}

#[test]
fn material_pass_hands_back_releases_it_did_not_execute() {
    let frame = TestFrame::discrete();
    let vertices = Arc::new(VertexBufferAttachment::new("vertices"));
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    let pass = Arc::new(MaterialRenderPass::new("sprites", vertices, table.clone()));
    compile_materials(&frame, &table, &[1, 2]);
    let table_buffer = table.materials().buffer().unwrap().clone();

    // Recording fails after the acquire was built.
    frame.device.fail_next(FailPoint::CreateBuffer);
    let (mut handle, commands) = record_sprites(&frame, &pass, two_quads(1, 2));
    assert!(commands.is_empty());
    assert!(table_buffer.pending_barrier().is_some());
    handle.finalize(&frame, true);
    assert!(table_buffer.pending_barrier().is_some());

    // Recorded, but the frame never ran.
    let (mut handle, commands) = record_sprites(&frame, &pass, two_quads(1, 2));
    assert_eq!(commands.len(), 1);
    assert!(table_buffer.pending_barrier().is_none());
    handle.finalize(&frame, false);
    assert!(table_buffer.pending_barrier().is_some());

    let (mut handle, commands) = record_sprites(&frame, &pass, two_quads(1, 2));
    assert_eq!(commands.len(), 1);
    frame.execute(handle.queue_operations(), commands);
    handle.finalize(&frame, true);

    assert!(table_buffer.pending_barrier().is_none());
    assert_eq!(frame.device.buffer_owner(table_buffer.id()), Some(frame.queue_families().graphics));
    assert_eq!(frame.device.pending_releases(), 0);
    assert!(frame.device.validation_errors().is_empty(), "{:?}", frame.device.validation_errors());
}

#[test]
fn material_pass_without_geometry_records_no_draw() {
    let frame = TestFrame::discrete();
    let vertices = Arc::new(VertexBufferAttachment::new("vertices"));
    let table = Arc::new(MaterialAttachment::new("materials", 16));
    let recorder = Arc::new(CountingRecorder::default());
    let pass = Arc::new(MaterialRenderPass::new("sprites", vertices, table).with_recorder(recorder.clone()));

    let mut handle = pass.clone().make_frame_handle(&frame);
    let handles = bind(&frame, &mut handle, pass.data().attachments());
    assert!(handles[0].submit_input(&frame, AttachmentInputData::Vertices(Arc::new(VertexData::default()))));
    frame.run_tasks();

    let commands = handle.prepare_commands(&frame);
    assert_eq!(commands.len(), 1);
    frame.execute(handle.queue_operations(), commands);
    handle.finalize(&frame, true);
    assert!(recorder.draws.lock().unwrap().is_empty());
}
