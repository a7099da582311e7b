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

use ferrite_core::gpu::{DriverError, FenceId, GpuDriver, SemaphoreId};
use std::sync::Arc;

/// An owned fence.
#[derive(Debug)]
pub struct Fence {
    device: Arc<dyn GpuDriver>,
    id: FenceId,
}

impl Fence {
    /// Creates an unsignaled fence.
    pub fn new(device: Arc<dyn GpuDriver>) -> Result<Self, DriverError> {
        let id = device.create_fence(false)?;
        Ok(Self { device, id })
    }

    /// The driver handle.
    pub fn id(&self) -> FenceId {
        self.id
    }

    /// Returns `true` once the work the fence was submitted with completed.
    pub fn is_signaled(&self) -> Result<bool, DriverError> {
        self.device.fence_status(self.id)
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Timeout`] when `timeout_ns` elapses first.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), DriverError> {
        if self.device.wait_for_fence(self.id, timeout_ns)? {
            Ok(())
        } else {
            Err(DriverError::Timeout)
        }
    }

    /// Returns the fence to the unsignaled state.
    pub fn reset(&self) -> Result<(), DriverError> {
        self.device.reset_fence(self.id)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.id);
    }
}

/// An owned binary semaphore.
#[derive(Debug)]
pub struct Semaphore {
    device: Arc<dyn GpuDriver>,
    id: SemaphoreId,
}

impl Semaphore {
    /// Creates a semaphore.
    pub fn new(device: Arc<dyn GpuDriver>) -> Result<Self, DriverError> {
        let id = device.create_semaphore()?;
        Ok(Self { device, id })
    }

    /// The driver handle.
    pub fn id(&self) -> SemaphoreId {
        self.id
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.id);
    }
}
