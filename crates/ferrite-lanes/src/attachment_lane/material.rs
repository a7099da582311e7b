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
use ferrite_core::gpu::{FrameSettings, QueueOperations};
use ferrite_data::MaterialSet;
use std::any::Any;
use std::sync::{Arc, Mutex};

/// The material table consumed by shading passes.
///
/// Holds the current [`MaterialSet`] generation. A new generation is
/// produced by a material compilation pass and swapped in once the upload
/// that produced it has completed; frames that took a snapshot of an older
/// generation keep reading that one.
#[derive(Debug)]
pub struct MaterialAttachment {
    id: AttachmentId,
    name: String,
    current: Mutex<Arc<MaterialSet>>,
    consumers: Mutex<QueueOperations>,
}

impl MaterialAttachment {
    /// Creates the attachment with an empty set of `max_slots` image slots.
    pub fn new(name: impl Into<String>, max_slots: u32) -> Self {
        Self {
            id: AttachmentId::next(),
            name: name.into(),
            current: Mutex::new(Arc::new(MaterialSet::new(max_slots))),
            consumers: Mutex::new(QueueOperations::empty()),
        }
    }

    /// Creates the attachment sized by [`FrameSettings::material_slots`].
    pub fn from_settings(name: impl Into<String>, settings: &FrameSettings) -> Self {
        Self::new(name, settings.material_slots)
    }

    /// The current generation.
    pub fn materials(&self) -> Arc<MaterialSet> {
        lock_state(&self.current).clone()
    }

    /// Replaces the current generation.
    pub fn set_materials(&self, set: Arc<MaterialSet>) {
        let mut current = lock_state(&self.current);
        log::debug!(
            "Material table '{}': generation {} -> {}",
            self.name,
            current.generation(),
            set.generation()
        );
        *current = set;
    }

    /// Starts the next generation as a copy of the current one.
    pub fn clone_set(&self) -> MaterialSet {
        lock_state(&self.current).next_generation()
    }

    /// Declares that passes needing `ops` read the table.
    pub fn add_consumer(&self, ops: QueueOperations) {
        *lock_state(&self.consumers) |= ops;
    }

    /// Union of the operations of every consuming pass.
    pub fn consumers(&self) -> QueueOperations {
        *lock_state(&self.consumers)
    }
}

impl Attachment for MaterialAttachment {
    fn id(&self) -> AttachmentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn make_frame_handle(self: Arc<Self>, _frame: &dyn FrameContext) -> Arc<dyn AttachmentHandle> {
        Arc::new(MaterialHandle {
            attachment: self,
            snapshot: Arc::new(Mutex::new(None)),
        })
    }
}

/// Frame handle of a [`MaterialAttachment`]: the generation the frame
/// renders with.
#[derive(Debug, Clone)]
pub struct MaterialHandle {
    attachment: Arc<MaterialAttachment>,
    snapshot: Arc<Mutex<Option<Arc<MaterialSet>>>>,
}

impl MaterialHandle {
    /// The attachment this handle was made from.
    pub fn attachment(&self) -> &Arc<MaterialAttachment> {
        &self.attachment
    }

    /// The generation taken at setup.
    pub fn materials(&self) -> Option<Arc<MaterialSet>> {
        lock_state(&self.snapshot).clone()
    }
}

impl AttachmentHandle for MaterialHandle {
    fn attachment_id(&self) -> AttachmentId {
        self.attachment.id
    }

    fn setup(&self, _frame: &dyn FrameContext) -> bool {
        *lock_state(&self.snapshot) = Some(self.attachment.materials());
        true
    }

    fn submit_input(&self, _frame: &dyn FrameContext, data: AttachmentInputData) -> bool {
        log::warn!(
            "Material table '{}' takes no direct input, got {}",
            self.attachment.name,
            data.kind()
        );
        false
    }

    fn describe(&self, index: u32, out: &mut DescriptorBufferInfo) -> bool {
        if index != 0 {
            return false;
        }
        let snapshot = lock_state(&self.snapshot);
        let Some(buffer) = snapshot.as_ref().and_then(|set| set.buffer()) else {
            return false;
        };
        *out = DescriptorBufferInfo {
            buffer: buffer.id(),
            offset: 0,
            range: buffer.size(),
        };
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
