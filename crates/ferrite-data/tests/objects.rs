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

use std::sync::Arc;

use ferrite_core::gpu::{
    BufferCreateInfo, BufferUsage, GpuDriver, ImageCreateInfo, ImageFormat, ImageTiling,
    ImageUsage,
};
use ferrite_data::material::MaterialRecord;
use ferrite_data::{
    AllocationUsage, Allocator, Buffer, Image, Material, MaterialInputData, MaterialSet,
};
use ferrite_infra::{FailPoint, HeadlessDevice};

fn setup(device: HeadlessDevice) -> (Arc<HeadlessDevice>, Arc<Allocator>) {
    let device = Arc::new(device);
    let allocator = Arc::new(Allocator::new(device.clone()));
    (device, allocator)
}

fn texture(allocator: &Arc<Allocator>, name: &str) -> Arc<Image> {
    let info = ImageCreateInfo::texture_2d(
        ImageFormat::R8G8B8A8Unorm,
        8,
        8,
        ImageTiling::Optimal,
        ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
    );
    Arc::new(Image::create(allocator, name, info, AllocationUsage::DeviceLocal).unwrap())
}

#[test]
fn discrete_profile_memory_type_choices() {
    let (_device, allocator) = setup(HeadlessDevice::discrete());
    let all = allocator.initial_type_mask();

    let device_local = allocator
        .find_memory_type(all, AllocationUsage::DeviceLocal)
        .unwrap();
    assert!(device_local.is_device_local());
    assert!(!device_local.is_host_visible());

    let staging = allocator
        .find_memory_type(all, AllocationUsage::HostTransitionSource)
        .unwrap();
    assert!(staging.is_host_visible());
    assert!(!staging.is_device_local());

    let readback = allocator
        .find_memory_type(all, AllocationUsage::HostTransitionDestination)
        .unwrap();
    assert!(readback.is_host_cached());

    // A mask that excludes every host-visible type cannot satisfy staging.
    assert!(allocator
        .find_memory_type(1 << device_local.index, AllocationUsage::HostTransitionSource)
        .is_none());
}

#[test]
fn buffer_write_then_read_on_host_memory() {
    let (device, allocator) = setup(HeadlessDevice::discrete());
    let buffer = Buffer::create(
        &allocator,
        "upload",
        BufferCreateInfo::new(BufferUsage::TRANSFER_SRC, 100),
        AllocationUsage::HostTransitionSource,
    )
    .unwrap();

    let payload: Vec<u8> = (0..100).collect();
    buffer.write(0, &payload).unwrap();
    assert_eq!(buffer.read(0, 100).unwrap(), payload);
    assert_eq!(device.read_buffer(buffer.id()).unwrap(), payload);
}

#[test]
fn writes_to_non_coherent_memory_are_flushed() {
    let (device, allocator) = setup(HeadlessDevice::discrete());
    let buffer = Buffer::create(
        &allocator,
        "readback",
        BufferCreateInfo::new(BufferUsage::TRANSFER_DST, 64),
        AllocationUsage::HostTransitionDestination,
    )
    .unwrap();
    assert!(!buffer.memory().memory_type().is_host_coherent());

    buffer.write(16, &[9; 16]).unwrap();
    let contents = device.read_buffer(buffer.id()).unwrap();
    assert_eq!(&contents[16..32], &[9; 16]);
}

#[test]
fn device_local_buffers_reject_host_writes() {
    let (_device, allocator) = setup(HeadlessDevice::discrete());
    let buffer = Buffer::create(
        &allocator,
        "vertices",
        BufferCreateInfo::new(BufferUsage::VERTEX_BUFFER, 64),
        AllocationUsage::DeviceLocal,
    )
    .unwrap();
    assert!(buffer.write(0, &[1, 2, 3]).is_err());
}

#[test]
fn large_images_get_dedicated_memory() {
    let (device, allocator) = setup(HeadlessDevice::discrete());
    let info = ImageCreateInfo::texture_2d(
        ImageFormat::R8G8B8A8Unorm,
        1024,
        1024,
        ImageTiling::Optimal,
        ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
    );
    let image = Image::create(&allocator, "atlas", info, AllocationUsage::DeviceLocal).unwrap();
    assert!(image.is_dedicated());
    assert!(device.dedicated_target(image.memory().id()).is_some());
}

#[test]
fn failed_creation_releases_everything() {
    let (device, allocator) = setup(HeadlessDevice::discrete());
    let info = BufferCreateInfo::new(BufferUsage::VERTEX_BUFFER, 256);

    for point in [FailPoint::AllocateMemory, FailPoint::BindMemory] {
        device.fail_next(point);
        assert!(Buffer::create(&allocator, "broken", info.clone(), AllocationUsage::DeviceLocal)
            .is_err());
        assert_eq!(device.live_objects().total(), 0, "leak after {:?}", point);
    }
}

#[test]
fn dropping_objects_frees_driver_state() {
    let (device, allocator) = setup(HeadlessDevice::unified());
    {
        let _buffer = Buffer::create(
            &allocator,
            "temp",
            BufferCreateInfo::new(BufferUsage::UNIFORM_BUFFER, 32),
            AllocationUsage::DeviceLocalHostVisible,
        )
        .unwrap();
        let _image = texture(&allocator, "temp-image");
        assert_eq!(device.live_objects().buffers, 1);
        assert_eq!(device.live_objects().images, 1);
    }
    assert_eq!(device.live_objects().total(), 0);
    assert_eq!(device.allocated_bytes(), 0);
}

#[test]
fn material_set_generation_shares_images() {
    let (_device, allocator) = setup(HeadlessDevice::discrete());
    let stone = texture(&allocator, "stone");
    let grass = texture(&allocator, "grass");

    let mut set = MaterialSet::new(8);
    set.update(&MaterialInputData {
        materials: vec![
            Arc::new(Material::new(1, 0, vec![stone.clone()])),
            Arc::new(Material::new(2, 0, vec![stone.clone(), grass.clone()])),
        ],
        removed: Vec::new(),
    })
    .unwrap();
    assert_eq!(set.layout().used_slots(), 2);

    let mut next = set.next_generation();
    assert_eq!(next.generation(), set.generation() + 1);
    let changed = next
        .update(&MaterialInputData {
            materials: Vec::new(),
            removed: vec![2],
        })
        .unwrap();
    assert_eq!(changed.len(), 1);

    // The previous generation still sees both materials.
    assert_eq!(set.len(), 2);
    assert_eq!(next.len(), 1);
    assert_eq!(next.layout().used_slots(), 1);
    assert_eq!(
        next.encode().len(),
        next.records().len() * std::mem::size_of::<MaterialRecord>()
    );
}
