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
use ferrite_data::{Buffer, VertexData, VertexSpan};
use std::any::Any;
use std::sync::{Arc, Mutex};

/// Vertex and index buffers built from a [`VertexArray`](ferrite_data::VertexArray)
/// snapshot every frame.
///
/// Descriptor index `0` binds the vertex buffer, index `1` the index buffer.
#[derive(Debug)]
pub struct VertexBufferAttachment {
    id: AttachmentId,
    name: String,
}

impl VertexBufferAttachment {
    /// Creates the attachment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AttachmentId::next(),
            name: name.into(),
        }
    }
}

impl Attachment for VertexBufferAttachment {
    fn id(&self) -> AttachmentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn make_frame_handle(self: Arc<Self>, _frame: &dyn FrameContext) -> Arc<dyn AttachmentHandle> {
        Arc::new(VertexBufferHandle {
            attachment: self.id,
            state: Arc::new(Mutex::new(VertexState::default())),
        })
    }
}

#[derive(Debug, Default)]
struct VertexState {
    vertices: Option<Arc<VertexData>>,
    spans: Vec<VertexSpan>,
    vertex_buffer: Option<Arc<Buffer>>,
    index_buffer: Option<Arc<Buffer>>,
}

/// Frame handle of a [`VertexBufferAttachment`].
#[derive(Debug, Clone)]
pub struct VertexBufferHandle {
    attachment: AttachmentId,
    state: Arc<Mutex<VertexState>>,
}

impl VertexBufferHandle {
    /// The geometry submitted for this frame.
    pub fn vertices(&self) -> Option<Arc<VertexData>> {
        lock_state(&self.state).vertices.clone()
    }

    /// Draw ranges of the submitted geometry, one per run of triangles
    /// sharing a material.
    pub fn spans(&self) -> Vec<VertexSpan> {
        lock_state(&self.state).spans.clone()
    }

    /// Stores the device buffers the geometry was uploaded into.
    pub fn set_buffers(&self, vertex_buffer: Arc<Buffer>, index_buffer: Arc<Buffer>) {
        let mut state = lock_state(&self.state);
        state.vertex_buffer = Some(vertex_buffer);
        state.index_buffer = Some(index_buffer);
    }

    /// The resolved vertex buffer.
    pub fn vertex_buffer(&self) -> Option<Arc<Buffer>> {
        lock_state(&self.state).vertex_buffer.clone()
    }

    /// The resolved index buffer.
    pub fn index_buffer(&self) -> Option<Arc<Buffer>> {
        lock_state(&self.state).index_buffer.clone()
    }
}

impl AttachmentHandle for VertexBufferHandle {
    fn attachment_id(&self) -> AttachmentId {
        self.attachment
    }

    fn is_input_required(&self) -> bool {
        true
    }

    fn submit_input(&self, frame: &dyn FrameContext, data: AttachmentInputData) -> bool {
        let AttachmentInputData::Vertices(vertices) = data else {
            return false;
        };
        let state = self.state.clone();
        let attachment = self.attachment;
        frame.perform(Box::new(move |frame| {
            let spans = material_spans(&vertices);
            {
                let mut state = lock_state(&state);
                state.vertices = Some(vertices);
                state.spans = spans;
            }
            frame.set_input_submitted(attachment);
        }));
        true
    }

    fn describe(&self, index: u32, out: &mut DescriptorBufferInfo) -> bool {
        let state = lock_state(&self.state);
        let buffer = match index {
            0 => state.vertex_buffer.as_ref(),
            1 => state.index_buffer.as_ref(),
            _ => None,
        };
        match buffer {
            Some(buffer) => {
                *out = DescriptorBufferInfo {
                    buffer: buffer.id(),
                    offset: 0,
                    range: buffer.size(),
                };
                true
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Groups consecutive triangles by the material of their first vertex.
pub fn material_spans(data: &VertexData) -> Vec<VertexSpan> {
    let mut spans: Vec<VertexSpan> = Vec::new();
    for (triangle, indexes) in data.indexes.chunks_exact(3).enumerate() {
        let Some(vertex) = data.data.get(indexes[0] as usize) else {
            continue;
        };
        match spans.last_mut() {
            Some(span) if span.material == vertex.material => span.index_count += 3,
            _ => spans.push(VertexSpan {
                material: vertex.material,
                index_count: 3,
                instance_count: 1,
                first_index: (triangle * 3) as u32,
            }),
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_data::VertexArray;

    #[test]
    fn spans_merge_runs_of_one_material() {
        let mut array = VertexArray::default();
        array.add_quad().set_material(1);
        array.add_quad().set_material(1);
        array.add_quad().set_material(4);
        let spans = material_spans(&array.pop());

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].material, 1);
        assert_eq!(spans[0].index_count, 12);
        assert_eq!(spans[0].first_index, 0);
        assert_eq!(spans[1].material, 4);
        assert_eq!(spans[1].index_count, 6);
        assert_eq!(spans[1].first_index, 12);
    }

    #[test]
    fn empty_geometry_has_no_spans() {
        assert!(material_spans(&VertexData::default()).is_empty());
    }
}
