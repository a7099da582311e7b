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

use super::FrameError;
use ferrite_core::gpu::GpuDriver;
use ferrite_lanes::{Attachment, AttachmentId, RenderPass};
use std::sync::Arc;

/// The passes every frame runs, in execution order.
///
/// Passes are kept sorted by descending [`RenderOrdering`](ferrite_lanes::RenderOrdering);
/// passes with equal ordering keep their insertion order. Attachments shared
/// by several passes are listed once.
#[derive(Default)]
pub struct RenderQueue {
    passes: Vec<Arc<dyn RenderPass>>,
    attachments: Vec<Arc<dyn Attachment>>,
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("passes", &self.passes.iter().map(|p| p.data().name()).collect::<Vec<_>>())
            .field("attachments", &self.attachments.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl RenderQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the pass's `prepare` hook and inserts it at its ordering.
    ///
    /// # Errors
    ///
    /// Returns the hook's error; the pass is not added.
    pub fn add_pass(&mut self, device: &dyn GpuDriver, pass: Arc<dyn RenderPass>) -> Result<(), FrameError> {
        pass.prepare(device)?;

        let ordering = pass.data().ordering();
        let position = self
            .passes
            .iter()
            .position(|existing| existing.data().ordering() < ordering)
            .unwrap_or(self.passes.len());
        log::debug!(
            "Render queue: pass '{}' ({:?}) at position {}",
            pass.data().name(),
            ordering,
            position
        );

        for attachment in pass.data().attachments() {
            if self.attachment(attachment.id()).is_none() {
                self.attachments.push(attachment.clone());
            }
        }
        self.passes.insert(position, pass);
        Ok(())
    }

    /// Builder form of [`RenderQueue::add_pass`].
    pub fn with_pass(mut self, device: &dyn GpuDriver, pass: Arc<dyn RenderPass>) -> Result<Self, FrameError> {
        self.add_pass(device, pass)?;
        Ok(self)
    }

    /// Passes in execution order.
    pub fn passes(&self) -> &[Arc<dyn RenderPass>] {
        &self.passes
    }

    /// Every attachment used by at least one pass.
    pub fn attachments(&self) -> &[Arc<dyn Attachment>] {
        &self.attachments
    }

    /// The attachment with id `id`.
    pub fn attachment(&self, id: AttachmentId) -> Option<&Arc<dyn Attachment>> {
        self.attachments.iter().find(|attachment| attachment.id() == id)
    }

    /// Returns `true` if no pass was added.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}
