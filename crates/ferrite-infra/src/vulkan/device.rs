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

//! Vulkan driver built on `ash`.

use super::conversions::{
    buffer_barrier_into_vk, buffer_image_copy_into_vk, image_barrier_into_vk,
    memory_heap_flags_from_vk, memory_property_flags_from_vk, queue_operations_from_vk, IntoVk,
};
use anyhow::{anyhow, Context};
use ash::vk;
use ferrite_core::gpu::{
    BufferCopy, BufferCreateInfo, BufferId, BufferImageCopy, BufferMemoryBarrier,
    CommandBufferId, CommandPoolId, DedicatedTarget, DeviceLimits, DriverError, FenceId,
    GpuDriver, ImageCreateInfo, ImageId, ImageLayout, ImageMemoryBarrier, MappedMemoryRange,
    MemoryAllocateInfo, MemoryHeapInfo, MemoryId, MemoryProperties, MemoryRequirements,
    MemoryTypeInfo, ObjectKind, PipelineStageFlags, QueueFamilyInfo, QueueId, SemaphoreId,
    SharingMode, SubmitInfo,
};
use ferrite_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};
use std::borrow::Cow;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Queues per family are encoded as `family * QUEUE_STRIDE + index`.
const QUEUE_STRIDE: usize = 64;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let message = if (*p_callback_data).p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!(target: "vulkan", "{:?}: {}", message_type, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!(target: "vulkan", "{:?}: {}", message_type, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::debug!(target: "vulkan", "{:?}: {}", message_type, message)
        }
        _ => log::trace!(target: "vulkan", "{:?}: {}", message_type, message),
    }
    vk::FALSE
}

/// Driver handles owned by the device, keyed by engine ids.
#[derive(Default)]
struct HandleTables {
    next_id: usize,
    buffers: HashMap<BufferId, vk::Buffer>,
    images: HashMap<ImageId, vk::Image>,
    memories: HashMap<MemoryId, (vk::DeviceMemory, u64)>,
    pools: HashMap<CommandPoolId, vk::CommandPool>,
    command_buffers: HashMap<CommandBufferId, (vk::CommandBuffer, CommandPoolId)>,
    fences: HashMap<FenceId, vk::Fence>,
    semaphores: HashMap<SemaphoreId, vk::Semaphore>,
}

impl HandleTables {
    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }
}

fn invalid(kind: ObjectKind, id: usize) -> DriverError {
    DriverError::InvalidHandle { kind, id }
}

fn vk_error(result: vk::Result) -> DriverError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => DriverError::DeviceLost,
        vk::Result::TIMEOUT => DriverError::Timeout,
        other => DriverError::Backend(format!("{other:?}")),
    }
}

/// A [`GpuDriver`] talking to a real Vulkan device.
///
/// One queue is created per queue family. Vulkan 1.1 is required so that
/// dedicated allocations are part of the core API.
pub struct AshDevice {
    name: String,
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    device: ash::Device,
    memory: MemoryProperties,
    limits: DeviceLimits,
    families: Vec<QueueFamilyInfo>,
    queues: HashMap<QueueId, vk::Queue>,
    tables: Mutex<HandleTables>,
    allocated_bytes: AtomicU64,
}

impl std::fmt::Debug for AshDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AshDevice")
            .field("name", &self.name)
            .field("families", &self.families)
            .finish_non_exhaustive()
    }
}

impl AshDevice {
    /// Loads Vulkan, picks a physical device and creates a logical device.
    ///
    /// Discrete GPUs are preferred over integrated ones.
    pub fn new(application_name: &str, enable_validation: bool) -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load()? };
        let app_name = CString::new(application_name)?;
        let engine_name = CString::new("ferrite")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let layer_name = CString::new(VALIDATION_LAYER)?;
        let mut layers: Vec<*const c_char> = Vec::new();
        let mut extensions: Vec<*const c_char> = Vec::new();
        if enable_validation {
            layers.push(layer_name.as_ptr());
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .context("Failed to create Vulkan instance")?;
        log::info!("Vulkan instance created");

        let debug = if enable_validation {
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let loader = ash::extensions::ext::DebugUtils::new(&entry, &instance);
            let messenger = unsafe { loader.create_debug_utils_messenger(&messenger_info, None) }?;
            Some((loader, messenger))
        } else {
            None
        };

        let physical = match Self::select_physical_device(&instance) {
            Ok(physical) => physical,
            Err(e) => {
                unsafe {
                    if let Some((loader, messenger)) = &debug {
                        loader.destroy_debug_utils_messenger(*messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(physical) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let memory = Self::memory_properties_of(&instance, physical);
        let limits = DeviceLimits {
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            buffer_image_granularity: properties.limits.buffer_image_granularity,
        };

        let family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical) };
        let families: Vec<QueueFamilyInfo> = family_properties
            .iter()
            .enumerate()
            .map(|(index, props)| QueueFamilyInfo {
                index: index as u32,
                ops: queue_operations_from_vk(props.queue_flags),
                count: props.queue_count.min(1),
            })
            .collect();

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .filter(|family| family.count > 0)
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family.index)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();
        let device_info = vk::DeviceCreateInfo::builder().queue_create_infos(&queue_infos);
        let device = match unsafe { instance.create_device(physical, &device_info, None) } {
            Ok(device) => device,
            Err(e) => {
                unsafe {
                    if let Some((loader, messenger)) = &debug {
                        loader.destroy_debug_utils_messenger(*messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(anyhow!("Failed to create logical device: {e:?}"));
            }
        };

        let queues = families
            .iter()
            .filter(|family| family.count > 0)
            .map(|family| {
                let queue = unsafe { device.get_device_queue(family.index, 0) };
                (QueueId(family.index as usize * QUEUE_STRIDE), queue)
            })
            .collect();

        log::info!(
            "Vulkan device '{}' created with {} queue families",
            name,
            families.len()
        );

        Ok(Self {
            name,
            _entry: entry,
            instance,
            debug,
            device,
            memory,
            limits,
            families,
            queues,
            tables: Mutex::new(HandleTables::default()),
            allocated_bytes: AtomicU64::new(0),
        })
    }

    /// The physical device's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn select_physical_device(instance: &ash::Instance) -> anyhow::Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        log::info!("Found {} physical devices", devices.len());

        devices
            .into_iter()
            .filter(|&pd| {
                let props = unsafe { instance.get_physical_device_properties(pd) };
                props.api_version >= vk::API_VERSION_1_1
            })
            .max_by_key(|&pd| {
                let props = unsafe { instance.get_physical_device_properties(pd) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    _ => 0,
                }
            })
            .ok_or_else(|| anyhow!("No Vulkan 1.1 physical device found"))
    }

    fn memory_properties_of(
        instance: &ash::Instance,
        physical: vk::PhysicalDevice,
    ) -> MemoryProperties {
        let props = unsafe { instance.get_physical_device_memory_properties(physical) };
        MemoryProperties {
            types: props.memory_types[..props.memory_type_count as usize]
                .iter()
                .map(|ty| MemoryTypeInfo {
                    heap_index: ty.heap_index,
                    flags: memory_property_flags_from_vk(ty.property_flags),
                })
                .collect(),
            heaps: props.memory_heaps[..props.memory_heap_count as usize]
                .iter()
                .map(|heap| MemoryHeapInfo {
                    size: heap.size,
                    flags: memory_heap_flags_from_vk(heap.flags),
                })
                .collect(),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, HandleTables>, DriverError> {
        self.tables
            .lock()
            .map_err(|e| DriverError::Backend(format!("Mutex poisoned (vulkan handles): {e}")))
    }

    fn requirements_from_vk(
        requirements: vk::MemoryRequirements,
        dedicated: &vk::MemoryDedicatedRequirements,
    ) -> MemoryRequirements {
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
            prefers_dedicated: dedicated.prefers_dedicated_allocation == vk::TRUE,
            requires_dedicated: dedicated.requires_dedicated_allocation == vk::TRUE,
        }
    }

    fn command_buffer(&self, id: CommandBufferId) -> Option<vk::CommandBuffer> {
        let tables = self.tables().ok()?;
        let handle = tables.command_buffers.get(&id).map(|(cb, _)| *cb);
        if handle.is_none() {
            log::error!("Recording into unknown {:?}", id);
        }
        handle
    }
}

impl GpuDriver for AshDevice {
    fn memory_properties(&self) -> MemoryProperties {
        self.memory.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn queue_families(&self) -> Vec<QueueFamilyInfo> {
        self.families.clone()
    }

    fn supports_dedicated_allocation(&self) -> bool {
        true
    }

    fn create_buffer(&self, info: &BufferCreateInfo) -> Result<BufferId, DriverError> {
        let families: Vec<u32> = self.families.iter().map(|f| f.index).collect();
        let mut create_info = vk::BufferCreateInfo::builder()
            .flags(info.flags.into_vk())
            .size(info.size)
            .usage(info.usage.into_vk())
            .sharing_mode(info.sharing.into_vk());
        if info.sharing == SharingMode::Concurrent {
            create_info = create_info.queue_family_indices(&families);
        }
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }.map_err(|e| {
            DriverError::CreationFailed {
                kind: ObjectKind::Buffer,
                details: format!("{e:?}"),
            }
        })?;

        let mut tables = self.tables()?;
        let id = BufferId(tables.next_id());
        tables.buffers.insert(id, buffer);
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if let Some(handle) = self.tables().ok().and_then(|mut t| t.buffers.remove(&buffer)) {
            unsafe { self.device.destroy_buffer(handle, None) };
        }
    }

    fn create_image(&self, info: &ImageCreateInfo) -> Result<ImageId, DriverError> {
        let create_info = vk::ImageCreateInfo::builder()
            .flags(info.flags.into_vk())
            .image_type(info.image_type.into_vk())
            .format(info.format.into_vk())
            .extent(vk::Extent3D {
                width: info.extent.width,
                height: info.extent.height,
                depth: info.extent.depth,
            })
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(info.samples.into_vk())
            .tiling(info.tiling.into_vk())
            .usage(info.usage.into_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(info.initial_layout.into_vk());
        let image = unsafe { self.device.create_image(&create_info, None) }.map_err(|e| {
            DriverError::CreationFailed {
                kind: ObjectKind::Image,
                details: format!("{e:?}"),
            }
        })?;

        let mut tables = self.tables()?;
        let id = ImageId(tables.next_id());
        tables.images.insert(id, image);
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        if let Some(handle) = self.tables().ok().and_then(|mut t| t.images.remove(&image)) {
            unsafe { self.device.destroy_image(handle, None) };
        }
    }

    fn buffer_memory_requirements(
        &self,
        buffer: BufferId,
    ) -> Result<MemoryRequirements, DriverError> {
        let handle = *self
            .tables()?
            .buffers
            .get(&buffer)
            .ok_or(invalid(ObjectKind::Buffer, buffer.0))?;
        let info = vk::BufferMemoryRequirementsInfo2::builder().buffer(handle);
        let mut dedicated = vk::MemoryDedicatedRequirements::default();
        let mut requirements = vk::MemoryRequirements2::builder().push_next(&mut dedicated);
        unsafe {
            self.device
                .get_buffer_memory_requirements2(&info, &mut requirements)
        };
        let base = requirements.memory_requirements;
        Ok(Self::requirements_from_vk(base, &dedicated))
    }

    fn image_memory_requirements(&self, image: ImageId) -> Result<MemoryRequirements, DriverError> {
        let handle = *self
            .tables()?
            .images
            .get(&image)
            .ok_or(invalid(ObjectKind::Image, image.0))?;
        let info = vk::ImageMemoryRequirementsInfo2::builder().image(handle);
        let mut dedicated = vk::MemoryDedicatedRequirements::default();
        let mut requirements = vk::MemoryRequirements2::builder().push_next(&mut dedicated);
        unsafe {
            self.device
                .get_image_memory_requirements2(&info, &mut requirements)
        };
        let base = requirements.memory_requirements;
        Ok(Self::requirements_from_vk(base, &dedicated))
    }

    fn allocate_memory(&self, info: &MemoryAllocateInfo) -> Result<MemoryId, DriverError> {
        let (buffer, image) = {
            let tables = self.tables()?;
            match info.dedicated {
                Some(DedicatedTarget::Buffer(id)) => (
                    *tables.buffers.get(&id).ok_or(invalid(ObjectKind::Buffer, id.0))?,
                    vk::Image::null(),
                ),
                Some(DedicatedTarget::Image(id)) => (
                    vk::Buffer::null(),
                    *tables.images.get(&id).ok_or(invalid(ObjectKind::Image, id.0))?,
                ),
                None => (vk::Buffer::null(), vk::Image::null()),
            }
        };

        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::builder()
            .buffer(buffer)
            .image(image);
        let mut allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(info.size)
            .memory_type_index(info.memory_type_index);
        if info.dedicated.is_some() {
            allocate_info = allocate_info.push_next(&mut dedicated_info);
        }

        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }.map_err(
            |e| match e {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    DriverError::OutOfDeviceMemory {
                        requested: info.size,
                        memory_type_index: info.memory_type_index,
                    }
                }
                other => vk_error(other),
            },
        )?;
        self.allocated_bytes.fetch_add(info.size, Ordering::Relaxed);

        let mut tables = self.tables()?;
        let id = MemoryId(tables.next_id());
        tables.memories.insert(id, (memory, info.size));
        Ok(id)
    }

    fn free_memory(&self, memory: MemoryId) {
        if let Some((handle, size)) = self.tables().ok().and_then(|mut t| t.memories.remove(&memory)) {
            unsafe { self.device.free_memory(handle, None) };
            self.allocated_bytes.fetch_sub(size, Ordering::Relaxed);
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferId,
        memory: MemoryId,
        offset: u64,
    ) -> Result<(), DriverError> {
        let (buffer_handle, memory_handle) = {
            let tables = self.tables()?;
            (
                *tables.buffers.get(&buffer).ok_or(invalid(ObjectKind::Buffer, buffer.0))?,
                tables.memories.get(&memory).ok_or(invalid(ObjectKind::Memory, memory.0))?.0,
            )
        };
        unsafe {
            self.device
                .bind_buffer_memory(buffer_handle, memory_handle, offset)
        }
        .map_err(|e| DriverError::BindFailed(format!("{e:?}")))
    }

    fn bind_image_memory(
        &self,
        image: ImageId,
        memory: MemoryId,
        offset: u64,
    ) -> Result<(), DriverError> {
        let (image_handle, memory_handle) = {
            let tables = self.tables()?;
            (
                *tables.images.get(&image).ok_or(invalid(ObjectKind::Image, image.0))?,
                tables.memories.get(&memory).ok_or(invalid(ObjectKind::Memory, memory.0))?.0,
            )
        };
        unsafe { self.device.bind_image_memory(image_handle, memory_handle, offset) }
            .map_err(|e| DriverError::BindFailed(format!("{e:?}")))
    }

    fn map_memory(
        &self,
        memory: MemoryId,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DriverError> {
        let handle = self
            .tables()?
            .memories
            .get(&memory)
            .ok_or(invalid(ObjectKind::Memory, memory.0))?
            .0;
        let ptr = unsafe {
            self.device
                .map_memory(handle, offset, size, vk::MemoryMapFlags::empty())
        }
        .map_err(|e| DriverError::MapFailed {
            memory,
            details: format!("{e:?}"),
        })?;
        NonNull::new(ptr.cast::<u8>()).ok_or(DriverError::MapFailed {
            memory,
            details: "driver returned a null mapping".to_string(),
        })
    }

    fn unmap_memory(&self, memory: MemoryId) {
        if let Some(handle) = self
            .tables()
            .ok()
            .and_then(|t| t.memories.get(&memory).map(|(handle, _)| *handle))
        {
            unsafe { self.device.unmap_memory(handle) };
        }
    }

    fn flush_mapped_memory_ranges(&self, ranges: &[MappedMemoryRange]) -> Result<(), DriverError> {
        let vk_ranges = {
            let tables = self.tables()?;
            ranges
                .iter()
                .map(|range| {
                    let handle = tables
                        .memories
                        .get(&range.memory)
                        .ok_or(invalid(ObjectKind::Memory, range.memory.0))?
                        .0;
                    Ok(vk::MappedMemoryRange::builder()
                        .memory(handle)
                        .offset(range.offset)
                        .size(range.size)
                        .build())
                })
                .collect::<Result<Vec<_>, DriverError>>()?
        };
        unsafe { self.device.flush_mapped_memory_ranges(&vk_ranges) }.map_err(vk_error)
    }

    fn create_command_pool(&self, queue_family: u32) -> Result<CommandPoolId, DriverError> {
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { self.device.create_command_pool(&info, None) }.map_err(|e| {
            DriverError::CreationFailed {
                kind: ObjectKind::CommandPool,
                details: format!("{e:?}"),
            }
        })?;
        let mut tables = self.tables()?;
        let id = CommandPoolId(tables.next_id());
        tables.pools.insert(id, pool);
        Ok(id)
    }

    fn destroy_command_pool(&self, pool: CommandPoolId) {
        let Ok(mut tables) = self.tables() else {
            return;
        };
        tables.command_buffers.retain(|_, (_, owner)| *owner != pool);
        if let Some(handle) = tables.pools.remove(&pool) {
            unsafe { self.device.destroy_command_pool(handle, None) };
        }
    }

    fn allocate_command_buffer(&self, pool: CommandPoolId) -> Result<CommandBufferId, DriverError> {
        let mut tables = self.tables()?;
        let pool_handle = *tables
            .pools
            .get(&pool)
            .ok_or(invalid(ObjectKind::CommandPool, pool.0))?;
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool_handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }.map_err(|e| {
            DriverError::CreationFailed {
                kind: ObjectKind::CommandBuffer,
                details: format!("{e:?}"),
            }
        })?;
        let handle = buffers.first().copied().ok_or(DriverError::CreationFailed {
            kind: ObjectKind::CommandBuffer,
            details: "driver returned no command buffer".to_string(),
        })?;
        let id = CommandBufferId(tables.next_id());
        tables.command_buffers.insert(id, (handle, pool));
        Ok(id)
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferId) -> Result<(), DriverError> {
        let handle = self
            .command_buffer(command_buffer)
            .ok_or(invalid(ObjectKind::CommandBuffer, command_buffer.0))?;
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(handle, &info) }
            .map_err(|e| DriverError::RecordingFailed(format!("{e:?}")))
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferId) -> Result<(), DriverError> {
        let handle = self
            .command_buffer(command_buffer)
            .ok_or(invalid(ObjectKind::CommandBuffer, command_buffer.0))?;
        unsafe { self.device.end_command_buffer(handle) }
            .map_err(|e| DriverError::RecordingFailed(format!("{e:?}")))
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferId,
        src: BufferId,
        dst: BufferId,
        regions: &[BufferCopy],
    ) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        let Some((src, dst)) = self
            .tables()
            .ok()
            .and_then(|t| Some((*t.buffers.get(&src)?, *t.buffers.get(&dst)?)))
        else {
            log::error!("Copy between unknown buffers {:?} -> {:?}", src, dst);
            return;
        };
        let regions: Vec<vk::BufferCopy> = regions.iter().map(|r| r.into_vk()).collect();
        unsafe { self.device.cmd_copy_buffer(cb, src, dst, &regions) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferId,
        src: BufferId,
        dst: ImageId,
        layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        let Some((src, dst)) = self
            .tables()
            .ok()
            .and_then(|t| Some((*t.buffers.get(&src)?, *t.images.get(&dst)?)))
        else {
            log::error!("Copy between unknown objects {:?} -> {:?}", src, dst);
            return;
        };
        let regions: Vec<vk::BufferImageCopy> =
            regions.iter().map(buffer_image_copy_into_vk).collect();
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cb, src, dst, layout.into_vk(), &regions)
        };
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: CommandBufferId,
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        buffer_barriers: &[BufferMemoryBarrier],
        image_barriers: &[ImageMemoryBarrier],
    ) {
        let Some(cb) = self.command_buffer(command_buffer) else {
            return;
        };
        let Ok(tables) = self.tables() else {
            return;
        };
        let buffers: Vec<vk::BufferMemoryBarrier> = buffer_barriers
            .iter()
            .filter_map(|b| {
                let handle = tables.buffers.get(&b.buffer)?;
                Some(buffer_barrier_into_vk(b, *handle))
            })
            .collect();
        let images: Vec<vk::ImageMemoryBarrier> = image_barriers
            .iter()
            .filter_map(|b| {
                let handle = tables.images.get(&b.image)?;
                Some(image_barrier_into_vk(b, *handle))
            })
            .collect();
        drop(tables);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                src_stage.into_vk(),
                dst_stage.into_vk(),
                vk::DependencyFlags::empty(),
                &[],
                &buffers,
                &images,
            )
        };
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceId, DriverError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }.map_err(|e| {
            DriverError::CreationFailed {
                kind: ObjectKind::Fence,
                details: format!("{e:?}"),
            }
        })?;
        let mut tables = self.tables()?;
        let id = FenceId(tables.next_id());
        tables.fences.insert(id, fence);
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        if let Some(handle) = self.tables().ok().and_then(|mut t| t.fences.remove(&fence)) {
            unsafe { self.device.destroy_fence(handle, None) };
        }
    }

    fn fence_status(&self, fence: FenceId) -> Result<bool, DriverError> {
        let handle = *self
            .tables()?
            .fences
            .get(&fence)
            .ok_or(invalid(ObjectKind::Fence, fence.0))?;
        unsafe { self.device.get_fence_status(handle) }.map_err(vk_error)
    }

    fn wait_for_fence(&self, fence: FenceId, timeout_ns: u64) -> Result<bool, DriverError> {
        let handle = *self
            .tables()?
            .fences
            .get(&fence)
            .ok_or(invalid(ObjectKind::Fence, fence.0))?;
        match unsafe { self.device.wait_for_fences(&[handle], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error(e)),
        }
    }

    fn reset_fence(&self, fence: FenceId) -> Result<(), DriverError> {
        let handle = *self
            .tables()?
            .fences
            .get(&fence)
            .ok_or(invalid(ObjectKind::Fence, fence.0))?;
        unsafe { self.device.reset_fences(&[handle]) }.map_err(vk_error)
    }

    fn create_semaphore(&self) -> Result<SemaphoreId, DriverError> {
        let info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.device.create_semaphore(&info, None) }.map_err(|e| {
            DriverError::CreationFailed {
                kind: ObjectKind::Semaphore,
                details: format!("{e:?}"),
            }
        })?;
        let mut tables = self.tables()?;
        let id = SemaphoreId(tables.next_id());
        tables.semaphores.insert(id, semaphore);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        if let Some(handle) = self
            .tables()
            .ok()
            .and_then(|mut t| t.semaphores.remove(&semaphore))
        {
            unsafe { self.device.destroy_semaphore(handle, None) };
        }
    }

    fn get_queue(&self, family: u32, index: u32) -> Result<QueueId, DriverError> {
        let id = QueueId(family as usize * QUEUE_STRIDE + index as usize);
        if self.queues.contains_key(&id) {
            Ok(id)
        } else {
            Err(invalid(ObjectKind::Queue, id.0))
        }
    }

    fn queue_submit(
        &self,
        queue: QueueId,
        submits: &[SubmitInfo],
        fence: Option<FenceId>,
    ) -> Result<(), DriverError> {
        let queue_handle = *self
            .queues
            .get(&queue)
            .ok_or(invalid(ObjectKind::Queue, queue.0))?;

        struct Batch {
            waits: Vec<vk::Semaphore>,
            stages: Vec<vk::PipelineStageFlags>,
            command_buffers: Vec<vk::CommandBuffer>,
            signals: Vec<vk::Semaphore>,
        }

        let (batches, fence_handle) = {
            let tables = self.tables()?;
            let semaphore = |id: &SemaphoreId| {
                tables
                    .semaphores
                    .get(id)
                    .copied()
                    .ok_or(invalid(ObjectKind::Semaphore, id.0))
            };
            let batches = submits
                .iter()
                .map(|submit| {
                    Ok(Batch {
                        waits: submit
                            .wait_semaphores
                            .iter()
                            .map(|(id, _)| semaphore(id))
                            .collect::<Result<_, DriverError>>()?,
                        stages: submit
                            .wait_semaphores
                            .iter()
                            .map(|(_, stage)| stage.into_vk())
                            .collect(),
                        command_buffers: submit
                            .command_buffers
                            .iter()
                            .map(|id| {
                                tables
                                    .command_buffers
                                    .get(id)
                                    .map(|(cb, _)| *cb)
                                    .ok_or(invalid(ObjectKind::CommandBuffer, id.0))
                            })
                            .collect::<Result<_, DriverError>>()?,
                        signals: submit
                            .signal_semaphores
                            .iter()
                            .map(&semaphore)
                            .collect::<Result<_, DriverError>>()?,
                    })
                })
                .collect::<Result<Vec<_>, DriverError>>()?;
            let fence_handle = match fence {
                Some(id) => *tables
                    .fences
                    .get(&id)
                    .ok_or(invalid(ObjectKind::Fence, id.0))?,
                None => vk::Fence::null(),
            };
            (batches, fence_handle)
        };

        let infos: Vec<vk::SubmitInfo> = batches
            .iter()
            .map(|batch| {
                vk::SubmitInfo::builder()
                    .wait_semaphores(&batch.waits)
                    .wait_dst_stage_mask(&batch.stages)
                    .command_buffers(&batch.command_buffers)
                    .signal_semaphores(&batch.signals)
                    .build()
            })
            .collect();

        unsafe { self.device.queue_submit(queue_handle, &infos, fence_handle) }
            .map_err(|e| DriverError::SubmitFailed(format!("{e:?}")))
    }
}

impl ResourceMonitor for AshDevice {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Owned(format!("Vulkan_{}", self.name))
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::Gpu
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        let current = self.allocated_bytes.load(Ordering::Relaxed);
        ResourceUsageReport {
            current_bytes: current,
            peak_bytes: None,
            total_capacity_bytes: Some(self.memory.heaps.iter().map(|h| h.size).sum()),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during shutdown: {:?}", e);
            }

            let tables = match self.tables.get_mut() {
                Ok(tables) => std::mem::take(tables),
                Err(poisoned) => std::mem::take(poisoned.into_inner()),
            };
            let leaked = tables.buffers.len()
                + tables.images.len()
                + tables.memories.len()
                + tables.pools.len()
                + tables.fences.len()
                + tables.semaphores.len();
            if leaked > 0 {
                log::warn!("Destroying {} Vulkan objects still alive at shutdown", leaked);
            }
            for (_, fence) in tables.fences {
                self.device.destroy_fence(fence, None);
            }
            for (_, semaphore) in tables.semaphores {
                self.device.destroy_semaphore(semaphore, None);
            }
            for (_, pool) in tables.pools {
                self.device.destroy_command_pool(pool, None);
            }
            for (_, buffer) in tables.buffers {
                self.device.destroy_buffer(buffer, None);
            }
            for (_, image) in tables.images {
                self.device.destroy_image(image, None);
            }
            for (_, (memory, _)) in tables.memories {
                self.device.free_memory(memory, None);
            }

            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Vulkan device '{}' destroyed", self.name);
    }
}
