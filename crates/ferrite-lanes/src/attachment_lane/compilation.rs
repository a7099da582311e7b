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

use super::{
    lock_state, Attachment, AttachmentHandle, AttachmentId, AttachmentInputData, DescriptorBufferInfo,
    MaterialAttachment,
};
use crate::frame::FrameContext;
use ferrite_data::{MaterialInputData, MaterialSet};
use std::any::Any;
use std::sync::{Arc, Mutex};

/// Collects material changes for one [`MaterialAttachment`] and exposes the
/// generation a compilation pass built from them.
#[derive(Debug)]
pub struct MaterialCompilationAttachment {
    id: AttachmentId,
    name: String,
    target: Arc<MaterialAttachment>,
}

impl MaterialCompilationAttachment {
    /// Creates an attachment compiling into `target`.
    pub fn new(name: impl Into<String>, target: Arc<MaterialAttachment>) -> Self {
        Self {
            id: AttachmentId::next(),
            name: name.into(),
            target,
        }
    }

    /// The material table compiled into.
    pub fn target(&self) -> &Arc<MaterialAttachment> {
        &self.target
    }
}

impl Attachment for MaterialCompilationAttachment {
    fn id(&self) -> AttachmentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn make_frame_handle(self: Arc<Self>, _frame: &dyn FrameContext) -> Arc<dyn AttachmentHandle> {
        Arc::new(MaterialCompilationHandle {
            attachment: self.id,
            target: self.target.clone(),
            state: Arc::new(Mutex::new(CompilationState::default())),
        })
    }
}

#[derive(Debug, Default)]
struct CompilationState {
    input: Option<MaterialInputData>,
    original: Option<Arc<MaterialSet>>,
    output: Option<Arc<MaterialSet>>,
}

/// Frame handle of a [`MaterialCompilationAttachment`].
#[derive(Debug, Clone)]
pub struct MaterialCompilationHandle {
    attachment: AttachmentId,
    target: Arc<MaterialAttachment>,
    state: Arc<Mutex<CompilationState>>,
}

impl MaterialCompilationHandle {
    /// The material table compiled into.
    pub fn target(&self) -> &Arc<MaterialAttachment> {
        &self.target
    }

    /// Takes the changes submitted this frame.
    pub fn take_input(&self) -> Option<MaterialInputData> {
        lock_state(&self.state).input.take()
    }

    /// The generation that was current when the frame started.
    pub fn original(&self) -> Option<Arc<MaterialSet>> {
        lock_state(&self.state).original.clone()
    }

    /// Publishes the generation compiled this frame.
    pub fn set_output(&self, set: Arc<MaterialSet>) {
        lock_state(&self.state).output = Some(set);
    }

    /// The generation compiled this frame, if any.
    pub fn output(&self) -> Option<Arc<MaterialSet>> {
        lock_state(&self.state).output.clone()
    }
}

impl AttachmentHandle for MaterialCompilationHandle {
    fn attachment_id(&self) -> AttachmentId {
        self.attachment
    }

    fn setup(&self, _frame: &dyn FrameContext) -> bool {
        lock_state(&self.state).original = Some(self.target.materials());
        true
    }

    fn submit_input(&self, frame: &dyn FrameContext, data: AttachmentInputData) -> bool {
        let AttachmentInputData::Materials(input) = data else {
            return false;
        };
        let state = self.state.clone();
        let attachment = self.attachment;
        frame.perform(Box::new(move |frame| {
            {
                let mut state = lock_state(&state);
                match state.input.as_mut() {
                    Some(pending) => {
                        pending.materials.extend(input.materials);
                        pending.removed.extend(input.removed);
                    }
                    None => state.input = Some(input),
                }
            }
            frame.set_input_submitted(attachment);
        }));
        true
    }

    fn describe(&self, index: u32, out: &mut DescriptorBufferInfo) -> bool {
        if index != 0 {
            return false;
        }
        let state = lock_state(&self.state);
        let Some(buffer) = state.output.as_ref().and_then(|set| set.buffer()) else {
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
