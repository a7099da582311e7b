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
use ferrite_core::gpu::{
    AccessFlags, BufferCreateInfo, BufferId, BufferUsage, GpuDriver, ImageCreateInfo, ImageFormat, ImageLayout, ImageTiling, ImageUsage,
    PipelineStageFlags, QueueOperations, SubmitInfo,
};
use ferrite_data::{BufferData, CommandPool, DataSource, DeviceQueue, Fence, ImageData, Resource};
use ferrite_infra::headless::RecordedCommand;
use ferrite_infra::{FailPoint, HeadlessDevice};
use ferrite_lanes::{CompletionCallback, FrameContext, StagingCopy, StagingTarget, TransferError, TransferResource, TransferState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const BUFFER_SIZE: usize = 256;
const IMAGE_SIDE: u32 = 64;

fn buffer_bytes() -> Vec<u8> {
    (0..BUFFER_SIZE).map(|i| i as u8).collect()
}

fn image_bytes(side: u32) -> Vec<u8> {
    (0..side * side * 4).map(|i| (i % 251) as u8).collect()
}

fn texture_info(width: u32, height: u32) -> ImageCreateInfo {
    ImageCreateInfo::texture_2d(
        ImageFormat::R8G8B8A8Unorm,
        width,
        height,
        ImageTiling::Optimal,
        ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
    )
}

/// One storage buffer and one 64x64 sampled texture.
fn scene() -> Arc<Resource> {
    Arc::new(
        Resource::new("scene")
            .with_buffer(BufferData::new(
                "uniforms",
                BufferCreateInfo::new(BufferUsage::STORAGE_BUFFER, BUFFER_SIZE as u64),
                DataSource::Bytes(buffer_bytes()),
            ))
            .with_image(ImageData::new(
                "albedo",
                texture_info(IMAGE_SIDE, IMAGE_SIDE),
                DataSource::Bytes(image_bytes(IMAGE_SIDE)),
            )),
    )
}

/// Records every completion callback result.
fn recorder() -> (Arc<Mutex<Vec<bool>>>, CompletionCallback) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    (results, Box::new(move |ok| sink.lock().unwrap().push(ok)))
}

fn driver(frame: &TestFrame) -> Arc<dyn GpuDriver> {
    frame.device.clone()
}

#[test]
fn discrete_layout_puts_the_image_first_in_device_local_memory() {
    let frame = TestFrame::discrete();
    let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), None);

    transfer.initialize().unwrap();
    assert_eq!(transfer.state(), TransferState::Initialized);
    assert_eq!(transfer.memory_type().unwrap().index, 0);
    assert_eq!(transfer.images()[0].offset(), 0);
    assert_eq!(transfer.buffers()[0].offset(), 16384);
    assert_eq!(transfer.required_size(), 16640);
    assert!(!transfer.images()[0].is_dedicated());
}

#[test]
fn discrete_upload_stages_every_target() {
    let frame = TestFrame::discrete();
    let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), None);

    assert_eq!(transfer.prepare().unwrap(), 16640);
    assert!(transfer.buffers()[0].use_staging());
    assert!(transfer.images()[0].use_staging());

    let staging = transfer.staging().unwrap();
    assert_eq!(
        staging.copies(),
        &[
            StagingCopy {
                source_offset: 0,
                size: 256,
                target: StagingTarget::Buffer(0),
            },
            StagingCopy {
                source_offset: 256,
                size: 16384,
                target: StagingTarget::Image(0),
            },
        ]
    );
    assert_eq!(staging.copied_bytes(), 256 + 16384);
    assert!(staging.copied_bytes() <= staging.size());

    let memory_type = frame.device.memory_type_of(frame.device.buffer_binding(staging.id()).unwrap().memory);
    assert!(matches!(memory_type, Some(1) | Some(2) | Some(3)));
}

#[test]
fn shared_bindings_do_not_overlap() {
    let frame = TestFrame::discrete();
    let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), None);
    transfer.prepare().unwrap();

    let buffer = frame.device.buffer_binding(transfer.buffers()[0].id().unwrap()).unwrap();
    let image = frame.device.image_binding(transfer.images()[0].id().unwrap()).unwrap();
    assert_eq!(buffer.memory, image.memory);
    assert!(image.offset + image.size <= buffer.offset);
    assert!(buffer.offset + buffer.size <= transfer.required_size());
}

#[test]
fn transfer_then_compile_publishes_the_uploaded_contents() {
    let frame = TestFrame::discrete();
    let resource = scene();
    let (results, callback) = recorder();
    let mut transfer = TransferResource::new(frame.allocator().clone(), resource.clone(), Some(callback))
        .with_settings(frame.settings());
    transfer.prepare().unwrap();

    let family = frame.queue_families().transfer;
    assert_eq!(family, 2);
    let queue = DeviceQueue::new(driver(&frame), family, 0).unwrap();
    let pool = CommandPool::new(driver(&frame), family).unwrap();
    let fence = Fence::new(driver(&frame)).unwrap();
    transfer.transfer(&queue, &pool, &fence).unwrap();
    fence.wait(frame.settings().fence_timeout_ns).unwrap();
    transfer.compile().unwrap();

    assert_eq!(transfer.state(), TransferState::Compiled);
    assert_eq!(*results.lock().unwrap(), vec![true]);
    assert!(resource.is_compiled());

    let buffer = resource.buffers()[0].output().unwrap();
    let image = resource.images()[0].output().unwrap();
    assert_eq!(frame.device.read_buffer(buffer.id()).unwrap(), buffer_bytes());
    assert_eq!(frame.device.read_image(image.id()).unwrap(), image_bytes(IMAGE_SIDE));
    assert_eq!(frame.device.image_layout(image.id()), Some(ImageLayout::ShaderReadOnlyOptimal));
    assert!(Arc::ptr_eq(buffer.memory(), image.memory()));

    // Both objects were released from the transfer family to graphics.
    let buffer_release = buffer.take_pending_barrier().unwrap();
    let image_release = image.take_pending_barrier().unwrap();
    assert_eq!((buffer_release.src_queue_family, buffer_release.dst_queue_family), (2, 0));
    assert_eq!((image_release.src_queue_family, image_release.dst_queue_family), (2, 0));

    let graphics = DeviceQueue::new(driver(&frame), 0, 0).unwrap();
    let graphics_pool = CommandPool::new(driver(&frame), 0).unwrap();
    let cb = graphics_pool.allocate_buffer().unwrap();
    let device = driver(&frame);
    device.begin_command_buffer(cb).unwrap();
    device.cmd_pipeline_barrier(
        cb,
        PipelineStageFlags::TRANSFER,
        PipelineStageFlags::ALL_SHADERS,
        &[buffer_release.acquire_half()],
        &[image_release.acquire_half()],
    );
    device.end_command_buffer(cb).unwrap();
    let acquired = Fence::new(driver(&frame)).unwrap();
    graphics
        .submit(
            &[SubmitInfo {
                command_buffers: vec![cb],
                ..Default::default()
            }],
            Some(&acquired),
        )
        .unwrap();
    acquired.wait(frame.settings().fence_timeout_ns).unwrap();

    assert!(frame.device.validation_errors().is_empty(), "{:?}", frame.device.validation_errors());
    assert_eq!(frame.device.buffer_owner(buffer.id()), Some(0));
    assert_eq!(frame.device.image_owner(image.id()), Some(0));
    assert_eq!(frame.device.pending_releases(), 0);
}

#[test]
fn frame_recording_on_the_graphics_family_needs_no_ownership_transfer() {
    let frame = TestFrame::discrete();
    let resource = scene();
    let mut transfer = TransferResource::new(frame.allocator().clone(), resource.clone(), None);
    transfer.prepare().unwrap();

    let pool = CommandPool::new(driver(&frame), 0).unwrap();
    let cb = pool.allocate_buffer().unwrap();
    let device = driver(&frame);
    device.begin_command_buffer(cb).unwrap();
    transfer.record_commands(cb, 0).unwrap();
    device.end_command_buffer(cb).unwrap();
    frame.execute(QueueOperations::GRAPHICS, vec![cb]);
    transfer.compile().unwrap();

    let buffer = resource.buffers()[0].output().unwrap();
    assert!(buffer.pending_barrier().is_none());
    assert!(resource.images()[0].output().unwrap().pending_barrier().is_none());
    assert!(frame.device.validation_errors().is_empty());
}

#[test]
fn invalidate_releases_everything_and_reports_once() {
    let frame = TestFrame::discrete();
    let baseline = frame.device.live_objects();
    let (results, callback) = recorder();
    let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), Some(callback));
    transfer.prepare().unwrap();
    assert!(frame.device.live_objects().total() > baseline.total());

    transfer.invalidate();
    transfer.invalidate();

    assert_eq!(transfer.state(), TransferState::Invalidated);
    assert_eq!(*results.lock().unwrap(), vec![false]);
    assert_eq!(frame.device.live_objects(), baseline);
    assert!(matches!(transfer.compile(), Err(TransferError::Invalidated)));
}

#[test]
fn dropping_an_unfinished_transfer_invalidates_it() {
    let frame = TestFrame::discrete();
    let baseline = frame.device.live_objects();
    let (results, callback) = recorder();
    {
        let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), Some(callback));
        transfer.initialize().unwrap();
        transfer.allocate().unwrap();
    }
    assert_eq!(*results.lock().unwrap(), vec![false]);
    assert_eq!(frame.device.live_objects(), baseline);
}

#[test]
fn driver_failures_leak_nothing() {
    for point in [
        FailPoint::CreateBuffer,
        FailPoint::CreateImage,
        FailPoint::AllocateMemory,
        FailPoint::BindMemory,
        FailPoint::MapMemory,
    ] {
        let frame = TestFrame::discrete();
        let baseline = frame.device.live_objects();
        let (results, callback) = recorder();
        let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), Some(callback));

        frame.device.fail_next(point);
        assert!(transfer.prepare().is_err(), "{point:?} did not fail the transfer");

        assert_eq!(transfer.state(), TransferState::Invalidated, "{point:?}");
        assert_eq!(*results.lock().unwrap(), vec![false], "{point:?}");
        assert_eq!(frame.device.live_objects(), baseline, "{point:?} leaked");
        assert_eq!(frame.device.allocated_bytes(), 0, "{point:?} leaked memory");
    }
}

#[test]
fn calls_out_of_order_are_refused_without_invalidating() {
    let frame = TestFrame::discrete();
    let (results, callback) = recorder();
    let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), Some(callback));

    assert!(matches!(
        transfer.upload(),
        Err(TransferError::InvalidState {
            operation: "upload",
            state: TransferState::Created
        })
    ));
    assert_eq!(transfer.state(), TransferState::Created);
    assert!(results.lock().unwrap().is_empty());

    transfer.initialize().unwrap();
    assert!(matches!(transfer.initialize(), Err(TransferError::InvalidState { .. })));
    assert_eq!(transfer.state(), TransferState::Initialized);
}

#[test]
fn unified_memory_is_written_directly() {
    let frame = TestFrame::unified();
    let resource = Arc::new(
        Resource::new("direct")
            .with_buffer(BufferData::new(
                "positions",
                BufferCreateInfo::new(BufferUsage::VERTEX_BUFFER, BUFFER_SIZE as u64),
                DataSource::Bytes(buffer_bytes()),
            ))
            .with_buffer(BufferData::new(
                "indexes",
                BufferCreateInfo::new(BufferUsage::INDEX_BUFFER, 64),
                DataSource::Bytes(vec![7; 64]),
            )),
    );
    let mut transfer = TransferResource::new(frame.allocator().clone(), resource.clone(), None);

    assert_eq!(transfer.prepare().unwrap(), 0);
    assert!(transfer.staging().is_none());
    assert!(transfer.buffers().iter().all(|buffer| !buffer.use_staging()));
    transfer.compile().unwrap();

    let positions = resource.buffers()[0].output().unwrap();
    let indexes = resource.buffers()[1].output().unwrap();
    assert_eq!(frame.device.read_buffer(positions.id()).unwrap(), buffer_bytes());
    assert_eq!(frame.device.read_buffer(indexes.id()).unwrap(), vec![7; 64]);
    assert!(frame.device.submissions().is_empty());
}

#[test]
fn data_callbacks_run_once() {
    let frame = TestFrame::discrete();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let resource = Arc::new(Resource::new("lazy").with_buffer(BufferData::new(
        "lazy",
        BufferCreateInfo::new(BufferUsage::STORAGE_BUFFER, BUFFER_SIZE as u64),
        DataSource::callback(move |sink| {
            counter.fetch_add(1, Ordering::SeqCst);
            sink(&buffer_bytes());
        }),
    )));
    let mut transfer = TransferResource::new(frame.allocator().clone(), resource, None);

    transfer.prepare().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn large_images_get_their_own_allocation() {
    let frame = TestFrame::discrete();
    let resource = Arc::new(
        Resource::new("large")
            .with_buffer(BufferData::new(
                "small",
                BufferCreateInfo::new(BufferUsage::STORAGE_BUFFER, BUFFER_SIZE as u64),
                DataSource::Bytes(buffer_bytes()),
            ))
            .with_image(ImageData::new("atlas", texture_info(2048, 1024), DataSource::Empty)),
    );
    let mut transfer = TransferResource::new(frame.allocator().clone(), resource.clone(), None);
    transfer.prepare().unwrap();

    let image = &transfer.images()[0];
    assert!(image.is_dedicated());
    assert_eq!(image.offset(), 0);
    assert!(!image.use_staging());
    assert_eq!(transfer.buffers()[0].offset(), 0);
    assert_eq!(transfer.required_size(), BUFFER_SIZE as u64);

    let binding = frame.device.image_binding(image.id().unwrap()).unwrap();
    assert_ne!(Some(binding.memory), transfer.memory().map(|memory| memory.id()));
    assert!(frame.device.dedicated_target(binding.memory).is_some());

    transfer.compile().unwrap();
    assert!(resource.images()[0].output().unwrap().is_dedicated());
}

#[test]
fn transfer_refuses_a_pool_of_another_family() {
    let frame = TestFrame::discrete();
    let mut transfer = TransferResource::new(frame.allocator().clone(), scene(), None);
    transfer.prepare().unwrap();

    let queue = DeviceQueue::new(driver(&frame), 2, 0).unwrap();
    let pool = CommandPool::new(driver(&frame), 0).unwrap();
    let fence = Fence::new(driver(&frame)).unwrap();
    assert!(matches!(
        transfer.transfer(&queue, &pool, &fence),
        Err(TransferError::InvalidState { .. })
    ));
    assert_eq!(transfer.state(), TransferState::Uploaded);
}

#[test]
fn headless_unified_device_has_a_single_family() {
    let frame = TestFrame::new(HeadlessDevice::unified(), 7);
    assert_eq!(frame.generation(), 7);
    let families = frame.queue_families();
    assert_eq!((families.graphics, families.transfer, families.compute), (0, 0, 0));
}

/// Vertex and index data with sizes that are not multiples of any alignment,
/// between two textures.
fn mixed() -> Arc<Resource> {
    Arc::new(
        Resource::new("mixed")
            .with_buffer(BufferData::new(
                "positions",
                BufferCreateInfo::new(BufferUsage::VERTEX_BUFFER, 100),
                DataSource::Bytes(vec![1; 100]),
            ))
            .with_image(ImageData::new("mask", texture_info(32, 32), DataSource::Bytes(image_bytes(32))))
            .with_buffer(BufferData::new(
                "indexes",
                BufferCreateInfo::new(BufferUsage::INDEX_BUFFER, 37),
                DataSource::Bytes(vec![2; 37]),
            ))
            .with_image(ImageData::new("detail", texture_info(16, 16), DataSource::Bytes(image_bytes(16)))),
    )
}

/// Records the upload of `transfer` on the transfer family and returns the
/// recorded commands.
fn record_upload(frame: &TestFrame, transfer: &mut TransferResource) -> Vec<RecordedCommand> {
    let family = frame.queue_families().transfer;
    let pool = CommandPool::new(driver(frame), family).unwrap();
    let cb = pool.allocate_buffer().unwrap();
    let device = driver(frame);
    device.begin_command_buffer(cb).unwrap();
    transfer.record_commands(cb, family).unwrap();
    device.end_command_buffer(cb).unwrap();
    frame.device.recorded_commands(cb)
}

#[test]
fn every_copy_region_fits_inside_its_target() {
    let frame = TestFrame::discrete();
    let mut transfer = TransferResource::new(frame.allocator().clone(), mixed(), None);
    transfer.prepare().unwrap();

    let staging_size = transfer.staging().unwrap().size();
    let copies = transfer.staging().unwrap().copies().to_vec();
    assert_eq!(copies.len(), 4);
    for copy in &copies {
        assert!(copy.source_offset + copy.size <= staging_size, "{copy:?}");
        let target_size = match copy.target {
            StagingTarget::Buffer(index) => transfer.buffers()[index].info().size,
            StagingTarget::Image(index) => transfer.images()[index].info().texel_data_size(),
        };
        assert_eq!(copy.size, target_size, "{copy:?}");
    }

    let commands = record_upload(&frame, &mut transfer);
    let mut regions = 0;
    for command in commands {
        match command {
            RecordedCommand::CopyBuffer { dst, regions: copied, .. } => {
                let target = transfer.buffers().iter().find(|b| b.id() == Some(dst)).unwrap();
                for region in copied {
                    assert!(region.dst_offset + region.size <= target.info().size);
                    assert!(region.src_offset + region.size <= staging_size);
                    regions += 1;
                }
            }
            RecordedCommand::CopyBufferToImage { dst, regions: copied, .. } => {
                let target = transfer.images().iter().find(|i| i.id() == Some(dst)).unwrap();
                let extent = target.info().extent;
                for region in copied {
                    assert!(region.image_offset.iter().all(|&o| o >= 0));
                    assert!(region.image_offset[0] as u32 + region.image_extent.width <= extent.width);
                    assert!(region.image_offset[1] as u32 + region.image_extent.height <= extent.height);
                    assert!(region.image_offset[2] as u32 + region.image_extent.depth <= extent.depth);
                    assert!(region.buffer_offset + target.info().texel_data_size() <= staging_size);
                    regions += 1;
                }
            }
            _ => {}
        }
    }
    assert_eq!(regions, 4);
}

#[test]
fn geometry_uploads_are_made_visible_to_vertex_input() {
    let frame = TestFrame::discrete();
    let mut transfer = TransferResource::new(frame.allocator().clone(), mixed(), None);
    transfer.prepare().unwrap();
    let positions = transfer.buffers()[0].id().unwrap();
    let indexes = transfer.buffers()[1].id().unwrap();

    let commands = record_upload(&frame, &mut transfer);
    let (dst_stage, buffers) = commands
        .into_iter()
        .filter_map(|command| match command {
            RecordedCommand::PipelineBarrier {
                src_stage,
                dst_stage,
                buffers,
                ..
            } if src_stage == PipelineStageFlags::TRANSFER => Some((dst_stage, buffers)),
            _ => None,
        })
        .last()
        .unwrap();

    assert!(dst_stage.contains(PipelineStageFlags::VERTEX_INPUT));
    assert!(dst_stage.contains(PipelineStageFlags::FRAGMENT_SHADER));
    let access_of = |id: BufferId| buffers.iter().find(|b| b.buffer == id).unwrap().dst_access;
    assert_eq!(access_of(positions), AccessFlags::VERTEX_ATTRIBUTE_READ);
    assert_eq!(access_of(indexes), AccessFlags::INDEX_READ);
}
