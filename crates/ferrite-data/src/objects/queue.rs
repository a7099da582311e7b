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

use super::Fence;
use ferrite_core::gpu::{DriverError, GpuDriver, QueueId, SubmitInfo};
use std::sync::{Arc, Mutex};

/// One device queue slot.
///
/// Submission is the only operation that needs exclusive access to a queue,
/// so it is guarded here rather than by every caller.
#[derive(Debug)]
pub struct DeviceQueue {
    device: Arc<dyn GpuDriver>,
    id: QueueId,
    family: u32,
    index: u32,
    submit_lock: Mutex<()>,
}

impl DeviceQueue {
    /// Retrieves queue `index` of `family`.
    pub fn new(device: Arc<dyn GpuDriver>, family: u32, index: u32) -> Result<Self, DriverError> {
        let id = device.get_queue(family, index)?;
        Ok(Self {
            device,
            id,
            family,
            index,
            submit_lock: Mutex::new(()),
        })
    }

    /// The driver handle.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Family of the queue.
    pub fn family(&self) -> u32 {
        self.family
    }

    /// Index of the queue inside its family.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Submits `batches`, signaling `fence` when all of them complete.
    pub fn submit(&self, batches: &[SubmitInfo], fence: Option<&Fence>) -> Result<(), DriverError> {
        let _slot = self
            .submit_lock
            .lock()
            .map_err(|e| DriverError::Backend(format!("Mutex poisoned (submit_lock): {e}")))?;
        self.device
            .queue_submit(self.id, batches, fence.map(Fence::id))
    }
}
