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

//! The view of a frame that attachments and passes work against.

use crate::attachment_lane::AttachmentId;
use ferrite_core::gpu::{FrameSettings, GpuDriver, QueueFamilyLayout};
use ferrite_data::Allocator;
use std::sync::Arc;

/// A unit of work deferred onto the thread that orchestrates a frame.
pub type FrameTask = Box<dyn FnOnce(&dyn FrameContext) + Send + 'static>;

/// Everything a lane may ask of the frame it is working for.
///
/// Implemented by the frame orchestrator. Recording may happen on any thread,
/// so every method takes `&self`.
pub trait FrameContext: Send + Sync {
    /// Monotonic generation of the frame. Never reused.
    fn generation(&self) -> u64;

    /// The allocator backing every object created for the frame.
    fn allocator(&self) -> &Arc<Allocator>;

    /// The queue family chosen for each logical queue.
    fn queue_families(&self) -> &QueueFamilyLayout;

    /// Frame pipeline settings.
    fn settings(&self) -> &FrameSettings;

    /// Queues `task` to run on the orchestrating thread.
    ///
    /// Tasks run in submission order, before the frame starts recording.
    fn perform(&self, task: FrameTask);

    /// Marks the input of `attachment` as satisfied.
    fn set_input_submitted(&self, attachment: AttachmentId);

    /// Returns `true` once [`FrameContext::set_input_submitted`] was called for
    /// `attachment`.
    fn is_input_submitted(&self, attachment: AttachmentId) -> bool;

    /// The device of the frame.
    fn device(&self) -> &Arc<dyn GpuDriver> {
        self.allocator().device()
    }
}
