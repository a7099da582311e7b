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

//! CPU-side vertex storage with copy-on-write sharing.
//!
//! A [`VertexArray`] is edited by the scene layer every frame and handed to a
//! vertex attachment with [`VertexArray::pop`]. The popped
//! `Arc<VertexData>` is shared with the frame; the next mutation of the array
//! copies the storage first, so a frame in flight never sees later edits.

use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// The vertex layout consumed by the material pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Position.
    pub pos: [f32; 4],
    /// Linear RGBA color.
    pub color: [f32; 4],
    /// Texture coordinates.
    pub tex: [f32; 2],
    /// Material table index.
    pub material: u32,
    /// Object id, for picking.
    pub object: u32,
}

/// Vertices and triangle-list indices of one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexData {
    /// Vertices.
    pub data: Vec<Vertex>,
    /// Indices into `data`.
    pub indexes: Vec<u32>,
}

impl VertexData {
    /// The vertices as raw bytes.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// The indices as raw bytes.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indexes)
    }

    /// Returns `true` if there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

/// A range of indices drawn with one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexSpan {
    /// Material the indices are drawn with.
    pub material: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Number of instances.
    pub instance_count: u32,
    /// First index.
    pub first_index: u32,
}

/// Mutable view of four vertices forming a quad.
///
/// Corner order is top-left, bottom-left, top-right, bottom-right.
#[derive(Debug)]
pub struct Quad<'a> {
    vertices: &'a mut [Vertex],
    first_vertex: usize,
    first_index: usize,
}

impl<'a> Quad<'a> {
    /// Index of the quad's first vertex in the array.
    pub fn first_vertex(&self) -> usize {
        self.first_vertex
    }

    /// Index of the quad's first index in the array.
    pub fn first_index(&self) -> usize {
        self.first_index
    }

    /// Places an axis-aligned quad with its bottom-left corner at `pos`.
    pub fn set_geometry(&mut self, pos: [f32; 3], size: [f32; 2]) -> &mut Self {
        let (x1, y1, z) = (pos[0], pos[1], pos[2]);
        let (x2, y2) = (x1 + size[0], y1 + size[1]);
        self.vertices[0].pos = [x1, y2, z, 1.0];
        self.vertices[1].pos = [x1, y1, z, 1.0];
        self.vertices[2].pos = [x2, y2, z, 1.0];
        self.vertices[3].pos = [x2, y1, z, 1.0];
        self
    }

    /// Sets one color on all four corners.
    pub fn set_color(&mut self, color: [f32; 4]) -> &mut Self {
        for v in self.vertices.iter_mut() {
            v.color = color;
        }
        self
    }

    /// Sets the corner colors, in corner order.
    pub fn set_colors(&mut self, colors: [[f32; 4]; 4]) -> &mut Self {
        for (v, color) in self.vertices.iter_mut().zip(colors) {
            v.color = color;
        }
        self
    }

    /// Maps a texel rectangle `[x, y, width, height]` of a texture of
    /// `tex_size` texels onto the quad.
    pub fn set_texture_rect(
        &mut self,
        rect: [f32; 4],
        tex_size: [f32; 2],
        flipped_x: bool,
        flipped_y: bool,
        rotated: bool,
    ) -> &mut Self {
        let mut left = rect[0] / tex_size[0];
        let mut right = (rect[0] + rect[2]) / tex_size[0];
        let mut top = rect[1] / tex_size[1];
        let mut bottom = (rect[1] + rect[3]) / tex_size[1];
        if flipped_x {
            std::mem::swap(&mut left, &mut right);
        }
        if flipped_y {
            std::mem::swap(&mut top, &mut bottom);
        }

        self.vertices[0].tex = [left, top];
        self.vertices[3].tex = [right, bottom];
        if rotated {
            self.vertices[1].tex = [right, top];
            self.vertices[2].tex = [left, bottom];
        } else {
            self.vertices[1].tex = [left, bottom];
            self.vertices[2].tex = [right, top];
        }
        self
    }

    /// Sets the material table index of all four corners.
    pub fn set_material(&mut self, material: u32) -> &mut Self {
        for v in self.vertices.iter_mut() {
            v.material = material;
        }
        self
    }

    /// Sets the object id of all four corners.
    pub fn set_object(&mut self, object: u32) -> &mut Self {
        for v in self.vertices.iter_mut() {
            v.object = object;
        }
        self
    }
}

/// A copy-on-write vertex array.
///
/// Cloning the array shares its storage; the first mutation of a shared
/// storage copies it.
#[derive(Debug, Clone, Default)]
pub struct VertexArray {
    data: Arc<VertexData>,
}

impl VertexArray {
    /// Creates an empty array with room for the given number of vertices and indices.
    pub fn with_capacity(vertices: usize, indexes: usize) -> Self {
        Self {
            data: Arc::new(VertexData {
                data: Vec::with_capacity(vertices),
                indexes: Vec::with_capacity(indexes),
            }),
        }
    }

    /// Wraps existing storage without copying it.
    pub fn from_data(data: Arc<VertexData>) -> Self {
        Self { data }
    }

    /// Read-only access to the storage.
    pub fn data(&self) -> &VertexData {
        &self.data
    }

    /// Returns `true` if the storage is shared with another array or a frame.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Reserves room for additional vertices and indices.
    pub fn reserve(&mut self, vertices: usize, indexes: usize) {
        let data = Arc::make_mut(&mut self.data);
        data.data.reserve(vertices);
        data.indexes.reserve(indexes);
    }

    /// Removes every vertex and index.
    pub fn clear(&mut self) {
        let data = Arc::make_mut(&mut self.data);
        data.data.clear();
        data.indexes.clear();
    }

    /// Appends a quad and returns a view to fill it in.
    ///
    /// Indices are `[v0, v1, v2, v3, v2, v1]`: two counter-clockwise triangles.
    pub fn add_quad(&mut self) -> Quad<'_> {
        let data = Arc::make_mut(&mut self.data);
        let first_vertex = data.data.len();
        let first_index = data.indexes.len();
        let base = first_vertex as u32;

        data.data.resize(first_vertex + 4, Vertex::default());
        data.indexes
            .extend_from_slice(&[base, base + 1, base + 2, base + 3, base + 2, base + 1]);

        Quad {
            vertices: &mut data.data[first_vertex..first_vertex + 4],
            first_vertex,
            first_index,
        }
    }

    /// Returns a view of an existing quad, or `None` if it is out of range.
    pub fn get_quad(&mut self, first_vertex: usize, first_index: usize) -> Option<Quad<'_>> {
        if first_vertex + 4 > self.data.data.len() || first_index + 6 > self.data.indexes.len() {
            return None;
        }
        let data = Arc::make_mut(&mut self.data);
        Some(Quad {
            vertices: &mut data.data[first_vertex..first_vertex + 4],
            first_vertex,
            first_index,
        })
    }

    /// Sets the color of every vertex.
    pub fn update_color(&mut self, color: [f32; 4]) {
        for v in Arc::make_mut(&mut self.data).data.iter_mut() {
            v.color = color;
        }
    }

    /// Shares the current storage with a consumer.
    ///
    /// The array keeps referencing the same storage; its next mutation copies.
    pub fn pop(&self) -> Arc<VertexData> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_48_bytes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(std::mem::size_of::<Vertex>() % 16, 0);
    }

    #[test]
    fn add_quad_appends_two_triangles() {
        let mut array = VertexArray::default();
        array.add_quad();
        array.add_quad();

        let data = array.data();
        assert_eq!(data.data.len(), 8);
        assert_eq!(&data.indexes[6..], &[4, 5, 6, 7, 6, 5]);
    }

    #[test]
    fn quad_geometry_follows_corner_order() {
        let mut array = VertexArray::default();
        array
            .add_quad()
            .set_geometry([1.0, 2.0, 0.5], [10.0, 20.0])
            .set_color([1.0, 0.0, 0.0, 1.0]);

        let data = array.data();
        assert_eq!(data.data[0].pos, [1.0, 22.0, 0.5, 1.0]);
        assert_eq!(data.data[1].pos, [1.0, 2.0, 0.5, 1.0]);
        assert_eq!(data.data[2].pos, [11.0, 22.0, 0.5, 1.0]);
        assert_eq!(data.data[3].pos, [11.0, 2.0, 0.5, 1.0]);
        assert!(data.data.iter().all(|v| v.color == [1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn texture_rect_is_normalized_and_flipped() {
        let mut array = VertexArray::default();
        array
            .add_quad()
            .set_texture_rect([0.0, 0.0, 32.0, 64.0], [64.0, 64.0], true, false, false);

        let data = array.data();
        assert_eq!(data.data[0].tex, [0.5, 0.0]);
        assert_eq!(data.data[3].tex, [0.0, 1.0]);
    }

    #[test]
    fn popped_storage_survives_later_edits() {
        let mut array = VertexArray::default();
        array.add_quad().set_color([0.0, 1.0, 0.0, 1.0]);

        let frame = array.pop();
        assert!(array.is_shared());
        array.update_color([1.0, 1.0, 1.0, 1.0]);

        assert!(!array.is_shared());
        assert_eq!(frame.data[0].color, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(array.data().data[0].color, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn get_quad_rejects_out_of_range() {
        let mut array = VertexArray::default();
        assert!(array.get_quad(0, 0).is_none());
        array.add_quad();
        array.get_quad(0, 0).unwrap().set_object(7);
        assert!(array.data().data.iter().all(|v| v.object == 7));
    }
}
