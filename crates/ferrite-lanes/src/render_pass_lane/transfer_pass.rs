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

use super::{begin_pass_commands, PassError, RenderOrdering, RenderPass, RenderPassData, RenderPassHandle};
use crate::attachment_lane::{Attachment, AttachmentHandle, TransferAttachment, TransferHandle};
use crate::frame::FrameContext;
use crate::transfer_lane::TransferResource;
use ferrite_core::gpu::{CommandBufferId, QueueOperations};
use ferrite_data::CommandPool;
use std::sync::Arc;

/// Uploads the bundle submitted to a [`TransferAttachment`] each frame.
///
/// Its commands are a hard dependency of later passes, so a failure aborts
/// the whole frame.
#[derive(Debug)]
pub struct TransferRenderPass {
    data: RenderPassData,
}

impl TransferRenderPass {
    /// Creates the pass around `attachment`.
    pub fn new(attachment: Arc<TransferAttachment>) -> Self {
        Self {
            data: RenderPassData::new("transfer", RenderOrdering::TRANSFER).with_attachment(attachment),
        }
    }
}

impl RenderPass for TransferRenderPass {
    fn data(&self) -> &RenderPassData {
        &self.data
    }

    fn queue_operations(&self) -> QueueOperations {
        QueueOperations::TRANSFER
    }

    fn make_frame_handle(self: Arc<Self>, _frame: &dyn FrameContext) -> Box<dyn RenderPassHandle> {
        Box::new(TransferPassHandle {
            pass: self,
            input: None,
            resource: None,
            pool: None,
        })
    }
}

/// Frame handle of a [`TransferRenderPass`].
#[derive(Debug)]
pub struct TransferPassHandle {
    pass: Arc<TransferRenderPass>,
    input: Option<TransferHandle>,
    resource: Option<TransferResource>,
    pool: Option<CommandPool>,
}

impl TransferPassHandle {
    /// The bundle recorded this frame, until finalization.
    pub fn resource(&self) -> Option<&TransferResource> {
        self.resource.as_ref()
    }
}

impl RenderPassHandle for TransferPassHandle {
    fn name(&self) -> &str {
        self.pass.data.name()
    }

    fn queue_operations(&self) -> QueueOperations {
        QueueOperations::TRANSFER
    }

    fn add_required_attachment(&mut self, _attachment: &Arc<dyn Attachment>, handle: &Arc<dyn AttachmentHandle>) {
        if let Some(transfer) = handle.as_any().downcast_ref::<TransferHandle>() {
            self.input = Some(transfer.clone());
        }
    }

    fn do_prepare_commands(&mut self, frame: &dyn FrameContext) -> Result<Vec<CommandBufferId>, PassError> {
        let input = self.input.as_ref().ok_or(PassError::MissingAttachment("transfer"))?;
        let mut resource = input
            .take()
            .ok_or(PassError::MissingInput(input.attachment_id()))?
            .with_settings(frame.settings());

        resource.prepare()?;
        let (pool, cb) = begin_pass_commands(frame, QueueOperations::TRANSFER)?;
        resource.record_commands(cb, pool.family())?;
        frame.device().end_command_buffer(cb)?;

        log::debug!(
            "Recorded transfer of {} ({} staged bytes) for frame {}",
            resource.resource().name(),
            resource.staging().map_or(0, |staging| staging.size()),
            frame.generation()
        );
        self.resource = Some(resource);
        self.pool = Some(pool);
        Ok(vec![cb])
    }

    fn is_fatal_on_failure(&self) -> bool {
        true
    }

    fn finalize(&mut self, _frame: &dyn FrameContext, success: bool) {
        if let Some(mut resource) = self.resource.take() {
            if success {
                if let Err(e) = resource.compile() {
                    log::error!("Fail to compile {}: {}", resource.resource().name(), e);
                }
            } else {
                resource.invalidate();
            }
        }
        self.pool = None;
    }
}
