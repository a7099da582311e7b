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

//! Resource bundles: named sets of buffer and image descriptors with their
//! initial contents, and write-once slots for the compiled device objects.

use crate::objects::{Buffer, Image};
use ferrite_core::gpu::{BufferCreateInfo, ImageCreateInfo, QueueOperations};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A producer of initial contents.
///
/// The callback receives a sink and calls it with the actual bytes. Repeated
/// sink calls append.
pub type DataCallback = Arc<dyn Fn(&mut dyn FnMut(&[u8])) + Send + Sync>;

/// Where the initial contents of a buffer or image come from.
#[derive(Clone, Default)]
pub enum DataSource {
    /// No initial contents.
    #[default]
    Empty,
    /// Inline bytes.
    Bytes(Vec<u8>),
    /// Bytes produced lazily at upload time.
    Callback(DataCallback),
}

impl DataSource {
    /// Wraps a closure as a lazy data source.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&mut dyn FnMut(&[u8])) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    /// Returns `true` if nothing will be written.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Callback(_) => false,
        }
    }

    /// Writes the contents into `dst` and returns the number of bytes written.
    ///
    /// Contents longer than `dst` are truncated. A callback runs exactly once
    /// per call.
    pub fn write_into(&self, dst: &mut [u8]) -> usize {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => {
                let len = bytes.len().min(dst.len());
                dst[..len].copy_from_slice(&bytes[..len]);
                len
            }
            Self::Callback(callback) => {
                let mut cursor = 0usize;
                let mut sink = |bytes: &[u8]| {
                    let len = bytes.len().min(dst.len() - cursor);
                    dst[cursor..cursor + len].copy_from_slice(&bytes[..len]);
                    cursor += len;
                };
                (**callback)(&mut sink);
                cursor
            }
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// The kind of pass a resource is meant for; decides which queue family
/// must own it after upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderPassType {
    /// Consumed by graphics passes.
    #[default]
    Graphics,
    /// Consumed by compute passes.
    Compute,
    /// Consumed by transfer passes.
    Transfer,
    /// No particular consumer; ownership stays with the uploading family.
    Generic,
}

impl RenderPassType {
    /// Operations the consuming queue needs.
    pub fn queue_operations(self) -> QueueOperations {
        match self {
            Self::Graphics => QueueOperations::GRAPHICS,
            Self::Compute => QueueOperations::COMPUTE,
            Self::Transfer => QueueOperations::TRANSFER,
            Self::Generic => QueueOperations::empty(),
        }
    }
}

/// One buffer of a resource bundle.
#[derive(Debug)]
pub struct BufferData {
    /// Debug name.
    pub name: String,
    /// Descriptor. The transfer pipeline adds `TRANSFER_DST` to the usage.
    pub info: BufferCreateInfo,
    /// Consumer of the buffer.
    pub pass: RenderPassType,
    /// Initial contents.
    pub source: DataSource,
    output: OnceLock<Arc<Buffer>>,
}

impl BufferData {
    /// Describes a buffer consumed by graphics passes.
    pub fn new(name: impl Into<String>, info: BufferCreateInfo, source: DataSource) -> Self {
        Self {
            name: name.into(),
            info,
            pass: RenderPassType::default(),
            source,
            output: OnceLock::new(),
        }
    }

    /// Sets the consuming pass type.
    pub fn with_pass(mut self, pass: RenderPassType) -> Self {
        self.pass = pass;
        self
    }

    /// The compiled buffer, once published.
    pub fn output(&self) -> Option<&Arc<Buffer>> {
        self.output.get()
    }

    /// Publishes the compiled buffer. Returns `false` if one was published already.
    pub fn set_output(&self, buffer: Arc<Buffer>) -> bool {
        self.output.set(buffer).is_ok()
    }
}

/// One image of a resource bundle.
#[derive(Debug)]
pub struct ImageData {
    /// Debug name.
    pub name: String,
    /// Descriptor. The transfer pipeline adds `TRANSFER_DST` to the usage of
    /// images it has to stage.
    pub info: ImageCreateInfo,
    /// Consumer of the image.
    pub pass: RenderPassType,
    /// Initial contents, tightly packed texels.
    pub source: DataSource,
    output: OnceLock<Arc<Image>>,
}

impl ImageData {
    /// Describes an image consumed by graphics passes.
    pub fn new(name: impl Into<String>, info: ImageCreateInfo, source: DataSource) -> Self {
        Self {
            name: name.into(),
            info,
            pass: RenderPassType::default(),
            source,
            output: OnceLock::new(),
        }
    }

    /// Sets the consuming pass type.
    pub fn with_pass(mut self, pass: RenderPassType) -> Self {
        self.pass = pass;
        self
    }

    /// The compiled image, once published.
    pub fn output(&self) -> Option<&Arc<Image>> {
        self.output.get()
    }

    /// Publishes the compiled image. Returns `false` if one was published already.
    pub fn set_output(&self, image: Arc<Image>) -> bool {
        self.output.set(image).is_ok()
    }
}

/// A named bundle of buffers and images uploaded together.
#[derive(Debug, Default)]
pub struct Resource {
    name: String,
    buffers: Vec<BufferData>,
    images: Vec<ImageData>,
}

impl Resource {
    /// Creates an empty bundle.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a buffer to the bundle.
    pub fn with_buffer(mut self, buffer: BufferData) -> Self {
        self.buffers.push(buffer);
        self
    }

    /// Adds an image to the bundle.
    pub fn with_image(mut self, image: ImageData) -> Self {
        self.images.push(image);
        self
    }

    /// Name of the bundle.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffers in declaration order.
    pub fn buffers(&self) -> &[BufferData] {
        &self.buffers
    }

    /// Images in declaration order.
    pub fn images(&self) -> &[ImageData] {
        &self.images
    }

    /// Returns `true` if the bundle declares nothing.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    /// Returns `true` once every member has a published device object.
    pub fn is_compiled(&self) -> bool {
        self.buffers.iter().all(|b| b.output().is_some())
            && self.images.iter().all(|i| i.output().is_some())
    }
}
