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

//! Scripted driver failures.

use std::collections::HashMap;

/// A driver entry point that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `create_buffer`.
    CreateBuffer,
    /// `create_image`.
    CreateImage,
    /// `allocate_memory`.
    AllocateMemory,
    /// `bind_buffer_memory` and `bind_image_memory`.
    BindMemory,
    /// `map_memory`.
    MapMemory,
    /// `flush_mapped_memory_ranges`.
    FlushMemory,
    /// `create_command_pool`.
    CreateCommandPool,
    /// `allocate_command_buffer`.
    AllocateCommandBuffer,
    /// `begin_command_buffer`.
    BeginCommandBuffer,
    /// `end_command_buffer`.
    EndCommandBuffer,
    /// `create_fence`.
    CreateFence,
    /// `create_semaphore`.
    CreateSemaphore,
    /// `queue_submit`.
    Submit,
}

/// Countdown of successful calls left before each armed point fails once.
#[derive(Debug, Default)]
pub(crate) struct FailureInjector {
    armed: HashMap<FailPoint, usize>,
}

impl FailureInjector {
    pub(crate) fn arm(&mut self, point: FailPoint, successes: usize) {
        self.armed.insert(point, successes);
    }

    pub(crate) fn clear(&mut self) {
        self.armed.clear();
    }

    /// Returns `true` if this call must fail. A point fails once, then disarms.
    pub(crate) fn should_fail(&mut self, point: FailPoint) -> bool {
        match self.armed.get_mut(&point) {
            Some(0) => {
                self.armed.remove(&point);
                true
            }
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        }
    }
}
