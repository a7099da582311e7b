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

//! Render pass lane - per-frame command recording.
//!
//! A [`RenderPass`] is the static description of one step of a frame; every
//! frame asks it for a [`RenderPassHandle`] that records that step's command
//! buffers against the frame's attachment handles.

use crate::attachment_lane::{Attachment, AttachmentHandle, AttachmentId, DescriptorCache};
use crate::frame::FrameContext;
use crate::transfer_lane::TransferError;
use ferrite_core::gpu::{CommandBufferId, DriverError, GpuDriver, QueueOperations};
use ferrite_data::material::MaterialError;
use ferrite_data::CommandPool;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

mod compilation_pass;
mod material_pass;
mod transfer_pass;

pub use compilation_pass::*;
pub use material_pass::*;
pub use transfer_pass::*;

/// Sort key of passes within a frame. Higher orderings record and submit
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RenderOrdering(pub u32);

impl RenderOrdering {
    /// Runs before everything else.
    pub const HIGHEST: Self = Self(u32::MAX);
    /// Resource uploads, right after material compilation.
    pub const TRANSFER: Self = Self(u32::MAX - 1);
    /// Ordinary rendering.
    pub const DEFAULT: Self = Self(0);
}

/// Errors that abort a pass's contribution to a frame.
#[derive(Debug, Error)]
pub enum PassError {
    /// A driver call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Uploading a resource bundle failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A material update was rejected.
    #[error(transparent)]
    Material(#[from] MaterialError),

    /// A required attachment handle was never added to the pass handle.
    #[error("Attachment '{0}' was not provided to the pass")]
    MissingAttachment(&'static str),

    /// A required attachment received no input this frame.
    #[error("No input was submitted to attachment {0:?}")]
    MissingInput(AttachmentId),

    /// Custom command recording failed.
    #[error("Command recording failed: {0}")]
    Recording(String),
}

/// Static description of a pass, shared by all its frame handles.
pub struct RenderPassData {
    name: String,
    ordering: RenderOrdering,
    subpass_count: u32,
    attachments: Vec<Arc<dyn Attachment>>,
    descriptors: DescriptorCache,
}

impl fmt::Debug for RenderPassData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPassData")
            .field("name", &self.name)
            .field("ordering", &self.ordering)
            .field("subpass_count", &self.subpass_count)
            .field(
                "attachments",
                &self.attachments.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl RenderPassData {
    /// Describes a pass with one subpass and no attachment.
    pub fn new(name: impl Into<String>, ordering: RenderOrdering) -> Self {
        Self {
            name: name.into(),
            ordering,
            subpass_count: 1,
            attachments: Vec::new(),
            descriptors: DescriptorCache::new(),
        }
    }

    /// Adds an attachment the pass requires every frame.
    pub fn with_attachment(mut self, attachment: Arc<dyn Attachment>) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets the number of subpasses.
    pub fn with_subpasses(mut self, count: u32) -> Self {
        self.subpass_count = count.max(1);
        self
    }

    /// Name of the pass.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sort key within a frame.
    pub fn ordering(&self) -> RenderOrdering {
        self.ordering
    }

    /// Number of subpasses.
    pub fn subpass_count(&self) -> u32 {
        self.subpass_count
    }

    /// Attachments required by the pass.
    pub fn attachments(&self) -> &[Arc<dyn Attachment>] {
        &self.attachments
    }

    /// Last written state of every descriptor of the pass.
    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }
}

/// A step of every frame.
pub trait RenderPass: Send + Sync + 'static {
    /// The static description of the pass.
    fn data(&self) -> &RenderPassData;

    /// Operations the queue executing the pass must support.
    fn queue_operations(&self) -> QueueOperations;

    /// Called once when the pass joins a render queue.
    fn prepare(&self, _device: &dyn GpuDriver) -> Result<(), PassError> {
        Ok(())
    }

    /// Creates the handle recording this pass for `frame`.
    ///
    /// # Arguments
    ///
    /// * `frame`: The frame the handle records for.
    ///
    /// # Returns
    ///
    /// A handle that receives the frame's attachment handles through
    /// [`RenderPassHandle::add_required_attachment`] before recording.
    fn make_frame_handle(self: Arc<Self>, frame: &dyn FrameContext) -> Box<dyn RenderPassHandle>;
}

/// One pass recording for one frame.
pub trait RenderPassHandle: Send {
    /// Name of the pass, for logs.
    fn name(&self) -> &str;

    /// Operations the queue executing the recorded commands must support.
    fn queue_operations(&self) -> QueueOperations;

    /// Hands over the frame handle of one of the pass's attachments.
    fn add_required_attachment(&mut self, attachment: &Arc<dyn Attachment>, handle: &Arc<dyn AttachmentHandle>);

    /// Records the pass.
    ///
    /// A failure is logged and yields no command buffer. The frame treats an
    /// empty result as "no work", unless [`RenderPassHandle::is_fatal_on_failure`]
    /// holds.
    fn prepare_commands(&mut self, frame: &dyn FrameContext) -> Vec<CommandBufferId> {
        match self.do_prepare_commands(frame) {
            Ok(commands) => commands,
            Err(e) => {
                log::error!("Fail to prepare commands for pass '{}': {}", self.name(), e);
                Vec::new()
            }
        }
    }

    /// Records the pass and reports failures.
    fn do_prepare_commands(&mut self, frame: &dyn FrameContext) -> Result<Vec<CommandBufferId>, PassError>;

    /// Returns `true` if the frame cannot run without this pass's commands.
    fn is_fatal_on_failure(&self) -> bool {
        false
    }

    /// Called once the frame's GPU work completed (`success`) or was
    /// abandoned.
    fn finalize(&mut self, _frame: &dyn FrameContext, _success: bool) {}
}

/// Creates a pool for the family serving `ops` and begins one command
/// buffer from it.
pub(crate) fn begin_pass_commands(
    frame: &dyn FrameContext,
    ops: QueueOperations,
) -> Result<(CommandPool, CommandBufferId), DriverError> {
    let family = frame.queue_families().family_for(ops);
    let pool = CommandPool::new(frame.device().clone(), family)?;
    let cb = pool.allocate_buffer()?;
    frame.device().begin_command_buffer(cb)?;
    Ok((pool, cb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orderings_sort_compilation_then_transfer_then_rendering() {
        let mut orderings = vec![
            RenderOrdering::DEFAULT,
            RenderOrdering::HIGHEST,
            RenderOrdering(10),
            RenderOrdering::TRANSFER,
        ];
        orderings.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            orderings,
            vec![
                RenderOrdering::HIGHEST,
                RenderOrdering::TRANSFER,
                RenderOrdering(10),
                RenderOrdering::DEFAULT
            ]
        );
    }

    #[test]
    fn subpass_count_is_at_least_one() {
        let data = RenderPassData::new("empty", RenderOrdering::DEFAULT).with_subpasses(0);
        assert_eq!(data.subpass_count(), 1);
        assert!(data.attachments().is_empty());
    }
}
