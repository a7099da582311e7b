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

//! Long-lived wrappers around driver objects.
//!
//! Every wrapper exclusively owns its driver handle and releases it on drop.
//! Device memory shared by several buffers or images is reference counted
//! through `Arc<DeviceMemory>`.

mod buffer;
mod command;
mod image;
mod memory;
mod queue;
mod sync;

pub use self::buffer::Buffer;
pub use self::command::CommandPool;
pub use self::image::Image;
pub use self::memory::DeviceMemory;
pub use self::queue::DeviceQueue;
pub use self::sync::{Fence, Semaphore};

use crate::allocator::{AllocationUsage, Allocator};
use ferrite_core::gpu::{DedicatedTarget, DriverError, MemoryRequirements};
use std::sync::Arc;

/// Allocates memory for a single object, dedicated when the driver allows it.
fn allocate_standalone(
    allocator: &Arc<Allocator>,
    req: &MemoryRequirements,
    usage: AllocationUsage,
    target: DedicatedTarget,
) -> Result<Arc<DeviceMemory>, DriverError> {
    let memory_type = *allocator
        .find_memory_type(req.memory_type_bits & allocator.initial_type_mask(), usage)
        .ok_or(DriverError::NoMemoryType {
            type_mask: req.memory_type_bits,
        })?;
    let dedicated = allocator.has_dedicated_feature();
    let id = allocator.allocate(req.size, &memory_type, dedicated.then_some(target))?;
    Ok(Arc::new(DeviceMemory::new(
        allocator.clone(),
        id,
        req.size,
        memory_type,
        dedicated,
    )))
}
