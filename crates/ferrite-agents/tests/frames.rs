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

use ferrite_agents::{FrameError, FrameScheduler, FrameState, RenderQueue};
use ferrite_core::gpu::{BufferCreateInfo, BufferUsage, FrameSettings};
use ferrite_data::{Allocator, BufferData, DataSource, Material, MaterialInputData, Resource, VertexArray, VertexData};
use ferrite_infra::{FailPoint, HeadlessDevice};
use ferrite_lanes::{
    Attachment, AttachmentInputData, MaterialAttachment, MaterialCompilationAttachment,
    MaterialCompilationRenderPass, MaterialRenderPass, TransferAttachment, TransferRenderPass, TransferResource,
    VertexBufferAttachment,
};
use std::sync::{Arc, Mutex};

fn scheduler(device: &Arc<HeadlessDevice>, max_frames_in_flight: usize) -> FrameScheduler {
    ferrite_telemetry::init_test_logging();
    let allocator = Arc::new(Allocator::new(device.clone()));
    let settings = FrameSettings {
        max_frames_in_flight,
        validate_ownership_transfers: true,
        ..FrameSettings::default()
    };
    FrameScheduler::new(allocator, settings).unwrap()
}

fn materials(ids: &[u32]) -> AttachmentInputData {
    AttachmentInputData::Materials(MaterialInputData {
        materials: ids.iter().map(|&id| Arc::new(Material::new(id, 0, Vec::new()))).collect(),
        removed: Vec::new(),
    })
}

fn quads(first: u32, second: u32) -> AttachmentInputData {
    let mut array = VertexArray::default();
    array.add_quad().set_geometry([0.0, 0.0, 0.0], [1.0, 1.0]).set_material(first);
    array.add_quad().set_geometry([1.0, 0.0, 0.0], [1.0, 1.0]).set_material(second);
    let data: Arc<VertexData> = array.pop();
    AttachmentInputData::Vertices(data)
}

struct Scene {
    table: Arc<MaterialAttachment>,
    compilation: Arc<MaterialCompilationAttachment>,
    vertices: Arc<VertexBufferAttachment>,
    queue: RenderQueue,
}

fn scene(device: &HeadlessDevice, settings: &FrameSettings) -> Scene {
    let table = Arc::new(MaterialAttachment::from_settings("materials", settings));
    let compilation = Arc::new(MaterialCompilationAttachment::new("compile", table.clone()));
    let vertices = Arc::new(VertexBufferAttachment::new("vertices"));
    let queue = RenderQueue::new()
        .with_pass(device, Arc::new(MaterialRenderPass::new("sprites", vertices.clone(), table.clone())))
        .unwrap()
        .with_pass(device, Arc::new(MaterialCompilationRenderPass::new([compilation.clone()])))
        .unwrap();
    Scene {
        table,
        compilation,
        vertices,
        queue,
    }
}

/// A bundle with one buffer whose completion is recorded in the returned
/// slot.
fn bundle(allocator: &Arc<Allocator>) -> (Arc<Resource>, TransferResource, Arc<Mutex<Option<bool>>>) {
    let resource = Arc::new(Resource::new("frame data").with_buffer(BufferData::new(
        "constants",
        BufferCreateInfo::new(BufferUsage::STORAGE_BUFFER, 128),
        DataSource::Bytes(vec![7; 128]),
    )));
    let completed = Arc::new(Mutex::new(None));
    let sink = completed.clone();
    let transfer = TransferResource::new(
        allocator.clone(),
        resource.clone(),
        Some(Box::new(move |ok| *sink.lock().unwrap() = Some(ok))),
    );
    (resource, transfer, completed)
}

#[test]
fn compiled_materials_reach_the_graphics_family_through_a_semaphore() {
    let device = Arc::new(HeadlessDevice::discrete());
    let mut scheduler = scheduler(&device, 2);
    let scene = scene(&device, scheduler.settings());
    let before = scene.table.materials().generation();

    let frame = scheduler.begin_frame(&scene.queue).unwrap();
    assert_eq!(frame.generation(), 1);
    frame.submit_input(scene.compilation.id(), materials(&[1, 2])).unwrap();
    frame.submit_input(scene.vertices.id(), quads(1, 2)).unwrap();
    assert!(frame.is_ready());
    assert_eq!(scheduler.submit_frame(frame).unwrap(), 1);

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].family, 2);
    assert_eq!(submissions[1].family, 0);
    assert!(submissions[0].waits.is_empty());
    assert_eq!(submissions[0].signals.len(), 1);
    assert_eq!(submissions[1].waits, submissions[0].signals);
    assert!(submissions[1].signals.is_empty());

    // The new generation becomes current only once the frame retired.
    scheduler.wait_idle().unwrap();
    let compiled = scene.table.materials();
    assert_eq!(compiled.generation(), before + 1);
    let table = compiled.buffer().unwrap().id();
    assert_eq!(device.pending_releases(), 1);

    let frame = scheduler.begin_frame(&scene.queue).unwrap();
    assert_eq!(frame.generation(), 2);
    frame.submit_input(scene.vertices.id(), quads(2, 2)).unwrap();
    device.clear_submissions();
    scheduler.submit_frame(frame).unwrap();
    scheduler.wait_idle().unwrap();

    // Nothing left to compile, so the frame runs on graphics alone.
    let submissions = device.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].family, 0);
    assert!(submissions[0].waits.is_empty());
    assert_eq!(device.buffer_owner(table), Some(0));
    assert_eq!(device.pending_releases(), 0);
    assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
}

#[test]
fn unified_device_submits_one_batch() {
    let device = Arc::new(HeadlessDevice::unified());
    let mut scheduler = scheduler(&device, 2);
    let scene = scene(&device, scheduler.settings());

    let frame = scheduler.begin_frame(&scene.queue).unwrap();
    frame.submit_input(scene.compilation.id(), materials(&[4])).unwrap();
    frame.submit_input(scene.vertices.id(), quads(4, 4)).unwrap();
    scheduler.submit_frame(frame).unwrap();
    scheduler.wait_idle().unwrap();

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0].waits.is_empty() && submissions[0].signals.is_empty());
    assert_eq!(scheduler.queues().len(), 1);
    assert_eq!(scene.table.materials().len(), 1);
    assert_eq!(device.pending_releases(), 0);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn frames_in_flight_are_capped() {
    let device = Arc::new(HeadlessDevice::discrete());
    device.set_deferred_completion(true);
    let mut scheduler = scheduler(&device, 2);
    let scene = scene(&device, scheduler.settings());

    for expected in [vec![1], vec![1, 2]] {
        let frame = scheduler.begin_frame(&scene.queue).unwrap();
        frame.submit_input(scene.vertices.id(), quads(1, 1)).unwrap();
        scheduler.submit_frame(frame).unwrap();
        assert_eq!(scheduler.generations_in_flight(), expected);
    }
    assert_eq!(scheduler.poll().unwrap(), 0);

    // Starting a third frame waits for the first one.
    let frame = scheduler.begin_frame(&scene.queue).unwrap();
    assert_eq!(frame.generation(), 3);
    assert_eq!(scheduler.generations_in_flight(), vec![2]);
    frame.submit_input(scene.vertices.id(), quads(1, 1)).unwrap();
    scheduler.submit_frame(frame).unwrap();
    assert_eq!(scheduler.generations_in_flight(), vec![2, 3]);

    device.complete_pending();
    assert_eq!(scheduler.poll().unwrap(), 2);
    assert_eq!(scheduler.frames_in_flight(), 0);
    assert_eq!(scheduler.last_generation(), 3);
}

#[test]
fn missing_transfer_input_abandons_the_frame() {
    let device = Arc::new(HeadlessDevice::discrete());
    let mut scheduler = scheduler(&device, 2);
    let uploads = Arc::new(TransferAttachment::new("uploads"));
    let queue = RenderQueue::new()
        .with_pass(device.as_ref(), Arc::new(TransferRenderPass::new(uploads.clone())))
        .unwrap();

    let frame = scheduler.begin_frame(&queue).unwrap();
    assert_eq!(frame.missing_inputs(), vec![uploads.id()]);
    assert!(!frame.is_ready());

    let result = scheduler.submit_frame(frame);
    assert!(matches!(result, Err(FrameError::FatalPass(ref name)) if name == "transfer"));
    assert!(device.submissions().is_empty());
    assert_eq!(scheduler.frames_in_flight(), 0);
}

#[test]
fn skipped_passes_leave_a_frame_without_work() {
    let device = Arc::new(HeadlessDevice::discrete());
    let mut scheduler = scheduler(&device, 2);
    let scene = scene(&device, scheduler.settings());

    let mut frame = scheduler.begin_frame(&scene.queue).unwrap();
    frame.record().unwrap();
    frame.submit().unwrap();
    assert!(frame.is_complete().unwrap());
    frame.finalize().unwrap();
    assert_eq!(frame.state(), FrameState::Finalized);
    assert!(device.submissions().is_empty());
}

#[test]
fn transfers_publish_after_the_frame_retires() {
    let device = Arc::new(HeadlessDevice::discrete());
    let mut scheduler = scheduler(&device, 2);
    let uploads = Arc::new(TransferAttachment::new("uploads"));
    let queue = RenderQueue::new()
        .with_pass(device.as_ref(), Arc::new(TransferRenderPass::new(uploads.clone())))
        .unwrap();

    let frame = scheduler.begin_frame(&queue).unwrap();
    let (resource, transfer, completed) = bundle(scheduler.allocator());
    frame
        .submit_input(uploads.id(), AttachmentInputData::Transfer(transfer))
        .unwrap();
    scheduler.submit_frame(frame).unwrap();
    assert_eq!(*completed.lock().unwrap(), None);
    assert!(resource.buffers()[0].output().is_none());

    assert_eq!(scheduler.poll().unwrap(), 1);
    assert_eq!(*completed.lock().unwrap(), Some(true));
    let buffer = resource.buffers()[0].output().unwrap();
    assert_eq!(device.read_buffer(buffer.id()).unwrap(), vec![7; 128]);
}

#[test]
fn dropping_a_submitted_frame_retires_its_work() {
    let device = Arc::new(HeadlessDevice::discrete());
    device.set_deferred_completion(true);
    let mut scheduler = scheduler(&device, 2);
    let uploads = Arc::new(TransferAttachment::new("uploads"));
    let queue = RenderQueue::new()
        .with_pass(device.as_ref(), Arc::new(TransferRenderPass::new(uploads.clone())))
        .unwrap();

    let mut frame = scheduler.begin_frame(&queue).unwrap();
    let (resource, transfer, completed) = bundle(scheduler.allocator());
    frame
        .submit_input(uploads.id(), AttachmentInputData::Transfer(transfer))
        .unwrap();
    frame.record().unwrap();
    frame.submit().unwrap();
    assert!(device.submissions().is_empty());
    drop(frame);

    assert_eq!(device.submissions().len(), 1);
    assert_eq!(*completed.lock().unwrap(), Some(true));
    let buffer = resource.buffers()[0].output().unwrap();
    assert_eq!(device.read_buffer(buffer.id()).unwrap(), vec![7; 128]);
}

#[test]
fn dropping_a_recorded_frame_abandons_its_passes() {
    let device = Arc::new(HeadlessDevice::discrete());
    let mut scheduler = scheduler(&device, 2);
    let uploads = Arc::new(TransferAttachment::new("uploads"));
    let queue = RenderQueue::new()
        .with_pass(device.as_ref(), Arc::new(TransferRenderPass::new(uploads.clone())))
        .unwrap();
    let baseline = device.live_objects().buffers;

    let mut frame = scheduler.begin_frame(&queue).unwrap();
    let (resource, transfer, completed) = bundle(scheduler.allocator());
    frame
        .submit_input(uploads.id(), AttachmentInputData::Transfer(transfer))
        .unwrap();
    frame.record().unwrap();
    drop(frame);

    assert_eq!(*completed.lock().unwrap(), Some(false));
    assert!(resource.buffers()[0].output().is_none());
    assert_eq!(device.live_objects().buffers, baseline);
    assert!(device.submissions().is_empty());
}

#[test]
fn a_partly_submitted_frame_waits_for_the_batches_that_left() {
    let device = Arc::new(HeadlessDevice::discrete());
    device.set_deferred_completion(true);
    let mut scheduler = scheduler(&device, 2);
    let scene = scene(&device, scheduler.settings());
    let before = scene.table.materials().generation();

    let frame = scheduler.begin_frame(&scene.queue).unwrap();
    frame.submit_input(scene.compilation.id(), materials(&[1, 2])).unwrap();
    frame.submit_input(scene.vertices.id(), quads(1, 2)).unwrap();
    // The transfer batch goes out, the graphics batch is refused.
    device.fail_after(FailPoint::Submit, 1);
    assert!(matches!(scheduler.submit_frame(frame), Err(FrameError::Driver(_))));
    assert_eq!(scheduler.frames_in_flight(), 0);

    // The transfer batch ran before its staging buffer was released.
    let submissions = device.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].family, 2);
    assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());

    // The compilation completed, so its generation and release stand.
    let compiled = scene.table.materials();
    assert_eq!(compiled.generation(), before + 1);
    let table = compiled.buffer().unwrap().id();
    assert_eq!(device.pending_releases(), 1);

    let frame = scheduler.begin_frame(&scene.queue).unwrap();
    frame.submit_input(scene.vertices.id(), quads(2, 1)).unwrap();
    scheduler.submit_frame(frame).unwrap();
    scheduler.wait_idle().unwrap();

    assert_eq!(device.pending_releases(), 0);
    assert_eq!(device.buffer_owner(table), Some(0));
    assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
}

#[test]
fn frames_reject_input_they_cannot_take() {
    let device = Arc::new(HeadlessDevice::discrete());
    let mut scheduler = scheduler(&device, 2);
    let scene = scene(&device, scheduler.settings());
    let stranger = VertexBufferAttachment::new("unused");

    let mut frame = scheduler.begin_frame(&scene.queue).unwrap();
    assert!(matches!(
        frame.submit_input(stranger.id(), quads(1, 1)),
        Err(FrameError::UnknownAttachment(id)) if id == stranger.id()
    ));
    assert!(matches!(
        frame.submit_input(scene.vertices.id(), materials(&[1])),
        Err(FrameError::InputRejected { kind: "Materials", .. })
    ));
    assert!(matches!(
        frame.submit(),
        Err(FrameError::InvalidState {
            generation: 1,
            state: FrameState::Setup,
            ..
        })
    ));

    frame.submit_input(scene.vertices.id(), quads(1, 1)).unwrap();
    frame.record().unwrap();
    assert!(frame.submit_input(scene.vertices.id(), quads(1, 1)).is_err());
}

#[test]
fn out_of_range_settings_are_rejected() {
    let device: Arc<HeadlessDevice> = Arc::new(HeadlessDevice::discrete());
    let allocator = Arc::new(Allocator::new(device.clone()));
    let settings = FrameSettings {
        max_frames_in_flight: 0,
        ..FrameSettings::default()
    };
    assert!(matches!(
        FrameScheduler::new(allocator, settings),
        Err(FrameError::Settings(_))
    ));
}
