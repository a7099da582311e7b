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

//! Device presets for the headless driver.

use ferrite_core::gpu::{
    DeviceLimits, MemoryHeapFlags, MemoryHeapInfo, MemoryProperties, MemoryPropertyFlags,
    MemoryTypeInfo, QueueFamilyInfo, QueueOperations,
};

/// Everything the headless driver reports about the device it simulates.
#[derive(Debug, Clone)]
pub struct HeadlessProfile {
    /// Device name used in logs and monitor ids.
    pub name: String,
    /// Memory heaps and types.
    pub memory: MemoryProperties,
    /// Alignment limits.
    pub limits: DeviceLimits,
    /// Queue families.
    pub queue_families: Vec<QueueFamilyInfo>,
    /// Whether dedicated allocations are supported.
    pub dedicated_allocation: bool,
    /// Alignment reported for buffers.
    pub buffer_alignment: u64,
    /// Alignment reported for images.
    pub image_alignment: u64,
    /// Images at least this large report a dedicated-allocation preference.
    pub dedicated_image_threshold: u64,
}

impl HeadlessProfile {
    /// A discrete GPU: device-local memory the host cannot map, coherent and
    /// cached system memory, a small host-visible device-local window, and
    /// separate compute and transfer families.
    pub fn discrete() -> Self {
        let device_heap = MemoryHeapInfo {
            size: 256 << 20,
            flags: MemoryHeapFlags::DEVICE_LOCAL,
        };
        let system_heap = MemoryHeapInfo {
            size: 512 << 20,
            flags: MemoryHeapFlags::empty(),
        };
        let types = vec![
            MemoryTypeInfo {
                heap_index: 0,
                flags: MemoryPropertyFlags::DEVICE_LOCAL,
            },
            MemoryTypeInfo {
                heap_index: 1,
                flags: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
            },
            MemoryTypeInfo {
                heap_index: 1,
                flags: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED,
            },
            MemoryTypeInfo {
                heap_index: 0,
                flags: MemoryPropertyFlags::DEVICE_LOCAL
                    | MemoryPropertyFlags::HOST_VISIBLE
                    | MemoryPropertyFlags::HOST_COHERENT,
            },
        ];

        Self {
            name: "Headless Discrete".to_string(),
            memory: MemoryProperties {
                types,
                heaps: vec![device_heap, system_heap],
            },
            limits: DeviceLimits {
                non_coherent_atom_size: 64,
                buffer_image_granularity: 1024,
            },
            queue_families: vec![
                QueueFamilyInfo {
                    index: 0,
                    ops: QueueOperations::GRAPHICS
                        | QueueOperations::COMPUTE
                        | QueueOperations::TRANSFER
                        | QueueOperations::PRESENT,
                    count: 1,
                },
                QueueFamilyInfo {
                    index: 1,
                    ops: QueueOperations::COMPUTE | QueueOperations::TRANSFER,
                    count: 1,
                },
                QueueFamilyInfo {
                    index: 2,
                    ops: QueueOperations::TRANSFER | QueueOperations::SPARSE_BINDING,
                    count: 1,
                },
            ],
            dedicated_allocation: true,
            buffer_alignment: 256,
            image_alignment: 4096,
            dedicated_image_threshold: 4 << 20,
        }
    }

    /// A unified-memory device: every type is device-local and mappable, one
    /// family does everything, no dedicated allocations.
    pub fn unified() -> Self {
        Self {
            name: "Headless Unified".to_string(),
            memory: MemoryProperties {
                types: vec![
                    MemoryTypeInfo {
                        heap_index: 0,
                        flags: MemoryPropertyFlags::DEVICE_LOCAL
                            | MemoryPropertyFlags::HOST_VISIBLE
                            | MemoryPropertyFlags::HOST_COHERENT,
                    },
                    MemoryTypeInfo {
                        heap_index: 0,
                        flags: MemoryPropertyFlags::DEVICE_LOCAL
                            | MemoryPropertyFlags::HOST_VISIBLE
                            | MemoryPropertyFlags::HOST_CACHED,
                    },
                ],
                heaps: vec![MemoryHeapInfo {
                    size: 512 << 20,
                    flags: MemoryHeapFlags::DEVICE_LOCAL,
                }],
            },
            limits: DeviceLimits {
                non_coherent_atom_size: 64,
                buffer_image_granularity: 1,
            },
            queue_families: vec![QueueFamilyInfo {
                index: 0,
                ops: QueueOperations::GRAPHICS
                    | QueueOperations::COMPUTE
                    | QueueOperations::TRANSFER
                    | QueueOperations::PRESENT,
                count: 1,
            }],
            dedicated_allocation: false,
            buffer_alignment: 64,
            image_alignment: 1024,
            dedicated_image_threshold: u64::MAX,
        }
    }

    /// Types an optimal-tiling image may live in: device-local ones only.
    pub(crate) fn optimal_image_type_mask(&self) -> u32 {
        self.type_mask(|flags| flags.contains(MemoryPropertyFlags::DEVICE_LOCAL))
    }

    /// Every type of the device.
    pub(crate) fn all_types_mask(&self) -> u32 {
        self.type_mask(|_| true)
    }

    fn type_mask(&self, filter: impl Fn(MemoryPropertyFlags) -> bool) -> u32 {
        self.memory
            .types
            .iter()
            .enumerate()
            .filter(|(_, ty)| filter(ty.flags))
            .fold(0u32, |mask, (index, _)| mask | (1 << index))
    }
}

impl Default for HeadlessProfile {
    fn default() -> Self {
        Self::discrete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_optimal_images_avoid_system_memory() {
        let profile = HeadlessProfile::discrete();
        assert_eq!(profile.all_types_mask(), 0b1111);
        assert_eq!(profile.optimal_image_type_mask(), 0b1001);
    }

    #[test]
    fn unified_images_can_use_every_type() {
        let profile = HeadlessProfile::unified();
        assert_eq!(profile.optimal_image_type_mask(), profile.all_types_mask());
    }
}
