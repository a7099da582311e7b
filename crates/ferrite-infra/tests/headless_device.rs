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

use ferrite_core::gpu::{
    AccessFlags, BufferCopy, BufferCreateInfo, BufferMemoryBarrier, BufferUsage, DriverError,
    GpuDriver, ImageCreateInfo, ImageFormat, ImageTiling, ImageUsage, MappedMemoryRange,
    MemoryAllocateInfo, PipelineStageFlags, SubmitInfo, WHOLE_SIZE,
};
use ferrite_infra::headless::RecordedCommand;
use ferrite_infra::{FailPoint, HeadlessDevice};

fn host_buffer(device: &HeadlessDevice, size: u64, memory_type_index: u32) -> (ferrite_core::gpu::BufferId, ferrite_core::gpu::MemoryId) {
    let buffer = device
        .create_buffer(&BufferCreateInfo::new(
            BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
            size,
        ))
        .unwrap();
    let req = device.buffer_memory_requirements(buffer).unwrap();
    let memory = device
        .allocate_memory(&MemoryAllocateInfo {
            size: req.size,
            memory_type_index,
            dedicated: None,
        })
        .unwrap();
    device.bind_buffer_memory(buffer, memory, 0).unwrap();
    (buffer, memory)
}

#[test]
fn non_coherent_writes_need_a_flush() {
    let device = HeadlessDevice::discrete();
    // Type 2 of the discrete profile is host-visible but not coherent.
    let (buffer, memory) = host_buffer(&device, 128, 2);

    let ptr = device.map_memory(memory, 0, WHOLE_SIZE).unwrap();
    unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0xAB, 128) };
    assert_eq!(device.read_buffer(buffer).unwrap()[0], 0);

    device
        .flush_mapped_memory_ranges(&[MappedMemoryRange::whole(memory)])
        .unwrap();
    device.unmap_memory(memory);
    assert!(device.read_buffer(buffer).unwrap().iter().all(|&b| b == 0xAB));
}

#[test]
fn unaligned_flush_is_rejected() {
    let device = HeadlessDevice::discrete();
    let (_buffer, memory) = host_buffer(&device, 256, 2);
    device.map_memory(memory, 0, WHOLE_SIZE).unwrap();
    let result = device.flush_mapped_memory_ranges(&[MappedMemoryRange {
        memory,
        offset: 3,
        size: 64,
    }]);
    assert!(result.is_err());
}

#[test]
fn device_local_memory_cannot_be_mapped() {
    let device = HeadlessDevice::discrete();
    let (_buffer, memory) = host_buffer(&device, 64, 0);
    assert!(matches!(
        device.map_memory(memory, 0, WHOLE_SIZE),
        Err(DriverError::MapFailed { .. })
    ));
}

#[test]
fn optimal_images_reject_host_memory() {
    let device = HeadlessDevice::discrete();
    let image = device
        .create_image(&ImageCreateInfo::texture_2d(
            ImageFormat::R8G8B8A8Unorm,
            16,
            16,
            ImageTiling::Optimal,
            ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
        ))
        .unwrap();
    let req = device.image_memory_requirements(image).unwrap();
    assert_eq!(req.memory_type_bits & (1 << 1), 0);

    let memory = device
        .allocate_memory(&MemoryAllocateInfo {
            size: req.size,
            memory_type_index: 1,
            dedicated: None,
        })
        .unwrap();
    assert!(matches!(
        device.bind_image_memory(image, memory, 0),
        Err(DriverError::BindFailed(_))
    ));
}

#[test]
fn heap_budget_is_enforced() {
    let device = HeadlessDevice::unified();
    let heap = device.memory_properties().heaps[0].size;
    let result = device.allocate_memory(&MemoryAllocateInfo {
        size: heap + 1,
        memory_type_index: 0,
        dedicated: None,
    });
    assert!(matches!(result, Err(DriverError::OutOfDeviceMemory { .. })));
}

#[test]
fn injected_failures_fire_once() {
    let device = HeadlessDevice::discrete();
    device.fail_after(FailPoint::CreateBuffer, 1);
    let info = BufferCreateInfo::new(BufferUsage::VERTEX_BUFFER, 64);

    let first = device.create_buffer(&info).unwrap();
    assert!(device.create_buffer(&info).is_err());
    let third = device.create_buffer(&info).unwrap();

    device.destroy_buffer(first);
    device.destroy_buffer(third);
    assert_eq!(device.live_objects().total(), 0);
}

#[test]
fn submitted_copy_reaches_destination() {
    let device = HeadlessDevice::discrete();
    let (src, src_memory) = host_buffer(&device, 64, 1);
    let (dst, _) = host_buffer(&device, 64, 1);

    let ptr = device.map_memory(src_memory, 0, WHOLE_SIZE).unwrap();
    unsafe { std::ptr::write_bytes(ptr.as_ptr(), 7, 64) };
    device.unmap_memory(src_memory);

    let pool = device.create_command_pool(0).unwrap();
    let cb = device.allocate_command_buffer(pool).unwrap();
    device.begin_command_buffer(cb).unwrap();
    device.cmd_copy_buffer(
        cb,
        src,
        dst,
        &[BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: 64,
        }],
    );
    device.end_command_buffer(cb).unwrap();

    let queue = device.get_queue(0, 0).unwrap();
    let fence = device.create_fence(false).unwrap();
    device.set_deferred_completion(true);
    device
        .queue_submit(
            queue,
            &[SubmitInfo {
                command_buffers: vec![cb],
                ..Default::default()
            }],
            Some(fence),
        )
        .unwrap();

    assert!(!device.fence_status(fence).unwrap());
    assert!(device.wait_for_fence(fence, u64::MAX).unwrap());
    assert_eq!(device.read_buffer(dst).unwrap(), vec![7; 64]);
    assert!(matches!(
        device.submissions()[0].commands[0],
        RecordedCommand::CopyBuffer { .. }
    ));
    assert!(device.validation_errors().is_empty());
}

#[test]
fn unmatched_ownership_release_is_reported() {
    let device = HeadlessDevice::discrete();
    let (buffer, _) = host_buffer(&device, 64, 1);
    let release = BufferMemoryBarrier::whole(buffer, AccessFlags::TRANSFER_WRITE, AccessFlags::empty())
        .with_families(2, 0);

    let pool = device.create_command_pool(2).unwrap();
    let cb = device.allocate_command_buffer(pool).unwrap();
    device.begin_command_buffer(cb).unwrap();
    device.cmd_pipeline_barrier(
        cb,
        PipelineStageFlags::TRANSFER,
        PipelineStageFlags::BOTTOM_OF_PIPE,
        &[release],
        &[],
    );
    device.end_command_buffer(cb).unwrap();
    let queue = device.get_queue(2, 0).unwrap();
    device
        .queue_submit(
            queue,
            &[SubmitInfo {
                command_buffers: vec![cb],
                ..Default::default()
            }],
            None,
        )
        .unwrap();
    assert_eq!(device.pending_releases(), 1);

    // Using the buffer on graphics without the acquire half is a violation.
    let graphics_pool = device.create_command_pool(0).unwrap();
    let graphics_cb = device.allocate_command_buffer(graphics_pool).unwrap();
    device.begin_command_buffer(graphics_cb).unwrap();
    device.cmd_copy_buffer(
        graphics_cb,
        buffer,
        buffer,
        &[BufferCopy {
            src_offset: 0,
            dst_offset: 32,
            size: 16,
        }],
    );
    device.end_command_buffer(graphics_cb).unwrap();
    device
        .queue_submit(
            device.get_queue(0, 0).unwrap(),
            &[SubmitInfo {
                command_buffers: vec![graphics_cb],
                ..Default::default()
            }],
            None,
        )
        .unwrap();
    assert!(!device.validation_errors().is_empty());
}
