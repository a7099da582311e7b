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

use ferrite_core::gpu::{CommandBufferId, CommandPoolId, DriverError, GpuDriver};
use std::sync::Arc;

/// A command pool bound to one queue family.
///
/// Command buffers allocated from the pool live as long as the pool; a frame
/// keeps one pool per pass handle and drops it once the frame is retired.
#[derive(Debug)]
pub struct CommandPool {
    device: Arc<dyn GpuDriver>,
    id: CommandPoolId,
    family: u32,
}

impl CommandPool {
    /// Creates a pool for `family`.
    pub fn new(device: Arc<dyn GpuDriver>, family: u32) -> Result<Self, DriverError> {
        let id = device.create_command_pool(family)?;
        Ok(Self { device, id, family })
    }

    /// The driver handle.
    pub fn id(&self) -> CommandPoolId {
        self.id
    }

    /// Queue family the pool records for.
    pub fn family(&self) -> u32 {
        self.family
    }

    /// Allocates a primary command buffer.
    pub fn allocate_buffer(&self) -> Result<CommandBufferId, DriverError> {
        self.device.allocate_command_buffer(self.id)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.id);
    }
}
