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

use super::{lock_state, Attachment, AttachmentHandle, AttachmentId, AttachmentInputData, DescriptorBufferInfo};
use crate::frame::FrameContext;
use crate::transfer_lane::TransferResource;
use std::any::Any;
use std::sync::{Arc, Mutex};

/// Receives the resource bundle a transfer pass uploads.
#[derive(Debug)]
pub struct TransferAttachment {
    id: AttachmentId,
    name: String,
}

impl TransferAttachment {
    /// Creates the attachment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AttachmentId::next(),
            name: name.into(),
        }
    }
}

impl Attachment for TransferAttachment {
    fn id(&self) -> AttachmentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn make_frame_handle(self: Arc<Self>, _frame: &dyn FrameContext) -> Arc<dyn AttachmentHandle> {
        Arc::new(TransferHandle {
            attachment: self.id,
            pending: Arc::new(Mutex::new(None)),
        })
    }
}

/// Frame handle of a [`TransferAttachment`].
#[derive(Debug, Clone)]
pub struct TransferHandle {
    attachment: AttachmentId,
    pending: Arc<Mutex<Option<TransferResource>>>,
}

impl TransferHandle {
    /// Takes the submitted bundle out of the handle.
    pub fn take(&self) -> Option<TransferResource> {
        lock_state(&self.pending).take()
    }
}

impl AttachmentHandle for TransferHandle {
    fn attachment_id(&self) -> AttachmentId {
        self.attachment
    }

    fn is_input_required(&self) -> bool {
        true
    }

    fn submit_input(&self, frame: &dyn FrameContext, data: AttachmentInputData) -> bool {
        let AttachmentInputData::Transfer(transfer) = data else {
            return false;
        };
        let pending = self.pending.clone();
        let attachment = self.attachment;
        frame.perform(Box::new(move |frame| {
            let replaced = lock_state(&pending).replace(transfer);
            if let Some(replaced) = replaced {
                log::warn!(
                    "Transfer of {} replaced before it was recorded",
                    replaced.resource().name()
                );
            }
            frame.set_input_submitted(attachment);
        }));
        true
    }

    fn describe(&self, _index: u32, _out: &mut DescriptorBufferInfo) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
