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

//! # Ferrite Data
//!
//! Device memory allocation and the long-lived objects built on it: buffers,
//! images, command pools, fences, semaphores and queues. Also home of the
//! resource bundles uploaded by the transfer pipeline, the copy-on-write
//! vertex arrays, and the versioned material tables.

#![warn(missing_docs)]

pub mod allocator;
pub mod material;
pub mod objects;
pub mod resource;
pub mod vertex;

pub use allocator::{AllocationUsage, Allocator, MemoryType};
pub use material::{Material, MaterialId, MaterialInputData, MaterialLayout, MaterialSet};
pub use objects::{Buffer, CommandPool, DeviceMemory, DeviceQueue, Fence, Image, Semaphore};
pub use resource::{BufferData, DataSource, ImageData, RenderPassType, Resource};
pub use vertex::{Quad, Vertex, VertexArray, VertexData, VertexSpan};
