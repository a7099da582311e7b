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

//! Descriptors, formats and layouts for driver image objects.

use crate::ferrite_bitflags;

ferrite_bitflags! {
    /// Creation flags of an image. Values match the driver's bit layout.
    pub struct ImageFlags: u32 {
        /// Sparse binding.
        const SPARSE_BINDING = 0x0000_0001;
        /// Sparse residency.
        const SPARSE_RESIDENCY = 0x0000_0002;
        /// Sparse aliased.
        const SPARSE_ALIASED = 0x0000_0004;
        /// Views may use a different format.
        const MUTABLE_FORMAT = 0x0000_0008;
        /// Cube-compatible 2D array.
        const CUBE_COMPATIBLE = 0x0000_0010;
    }
}

ferrite_bitflags! {
    /// Allowed usages of an image. Values match the driver's bit layout.
    pub struct ImageUsage: u32 {
        /// The image can be the source of a transfer command.
        const TRANSFER_SRC = 0x0000_0001;
        /// The image can be the destination of a transfer command.
        const TRANSFER_DST = 0x0000_0002;
        /// The image can be sampled from shaders.
        const SAMPLED = 0x0000_0004;
        /// The image can be used as a storage image.
        const STORAGE = 0x0000_0008;
        /// Color attachment.
        const COLOR_ATTACHMENT = 0x0000_0010;
        /// Depth/stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT = 0x0000_0020;
        /// Transient attachment.
        const TRANSIENT_ATTACHMENT = 0x0000_0040;
        /// Input attachment.
        const INPUT_ATTACHMENT = 0x0000_0080;
    }
}

ferrite_bitflags! {
    /// Image aspects addressed by a subresource range.
    pub struct ImageAspect: u32 {
        /// Color data.
        const COLOR = 0x0000_0001;
        /// Depth data.
        const DEPTH = 0x0000_0002;
        /// Stencil data.
        const STENCIL = 0x0000_0004;
    }
}

/// Dimensionality of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageType {
    /// One-dimensional image.
    Image1D,
    /// Two-dimensional image.
    #[default]
    Image2D,
    /// Three-dimensional image.
    Image3D,
}

/// Memory arrangement of texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageTiling {
    /// Implementation-defined arrangement, only reachable through copies.
    #[default]
    Optimal,
    /// Row-major arrangement, writable from the host.
    Linear,
}

/// Layout of an image's memory at a given point of the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents are undefined and may be discarded.
    #[default]
    Undefined,
    /// Generic layout usable for everything.
    General,
    /// Host-written contents are preserved on the first transition.
    Preinitialized,
    /// Destination of a transfer command.
    TransferDstOptimal,
    /// Source of a transfer command.
    TransferSrcOptimal,
    /// Read-only access from shaders.
    ShaderReadOnlyOptimal,
    /// Color attachment.
    ColorAttachmentOptimal,
    /// Depth/stencil attachment.
    DepthStencilAttachmentOptimal,
}

/// Number of samples per texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleCount {
    /// One sample.
    #[default]
    X1,
    /// Two samples.
    X2,
    /// Four samples.
    X4,
    /// Eight samples.
    X8,
}

/// Texel formats understood by the transfer core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// No format; images with this format cannot be created.
    #[default]
    Undefined,
    /// One 8-bit unsigned normalized channel.
    R8Unorm,
    /// Two 8-bit unsigned normalized channels.
    R8G8Unorm,
    /// Four 8-bit unsigned normalized channels.
    R8G8B8A8Unorm,
    /// Four 8-bit sRGB channels.
    R8G8B8A8Srgb,
    /// Four 8-bit unsigned normalized channels, BGRA order.
    B8G8R8A8Unorm,
    /// Four 16-bit float channels.
    R16G16B16A16Sfloat,
    /// Four 32-bit float channels.
    R32G32B32A32Sfloat,
    /// 16-bit depth.
    D16Unorm,
    /// 24-bit depth packed into 32 bits.
    X8D24UnormPack32,
    /// 32-bit float depth.
    D32Sfloat,
    /// 8-bit stencil.
    S8Uint,
    /// 16-bit depth, 8-bit stencil.
    D16UnormS8Uint,
    /// 24-bit depth, 8-bit stencil.
    D24UnormS8Uint,
    /// 32-bit float depth, 8-bit stencil.
    D32SfloatS8Uint,
}

impl ImageFormat {
    /// Size in bytes of one texel block.
    pub const fn block_size(self) -> u64 {
        match self {
            ImageFormat::Undefined => 0,
            ImageFormat::R8Unorm | ImageFormat::S8Uint => 1,
            ImageFormat::R8G8Unorm | ImageFormat::D16Unorm => 2,
            ImageFormat::D16UnormS8Uint => 3,
            ImageFormat::R8G8B8A8Unorm
            | ImageFormat::R8G8B8A8Srgb
            | ImageFormat::B8G8R8A8Unorm
            | ImageFormat::X8D24UnormPack32
            | ImageFormat::D32Sfloat
            | ImageFormat::D24UnormS8Uint => 4,
            ImageFormat::D32SfloatS8Uint => 5,
            ImageFormat::R16G16B16A16Sfloat => 8,
            ImageFormat::R32G32B32A32Sfloat => 16,
        }
    }

    /// The aspects a barrier or copy must address for this format.
    ///
    /// With `separate_depth_stencil`, depth-only and stencil-only formats
    /// report just their own aspect; combined formats always report both.
    pub fn aspects(self, separate_depth_stencil: bool) -> ImageAspect {
        match self {
            ImageFormat::D16Unorm | ImageFormat::X8D24UnormPack32 | ImageFormat::D32Sfloat => {
                if separate_depth_stencil {
                    ImageAspect::DEPTH
                } else {
                    ImageAspect::DEPTH | ImageAspect::STENCIL
                }
            }
            ImageFormat::D16UnormS8Uint
            | ImageFormat::D24UnormS8Uint
            | ImageFormat::D32SfloatS8Uint => ImageAspect::DEPTH | ImageAspect::STENCIL,
            ImageFormat::S8Uint => {
                if separate_depth_stencil {
                    ImageAspect::STENCIL
                } else {
                    ImageAspect::DEPTH | ImageAspect::STENCIL
                }
            }
            _ => ImageAspect::COLOR,
        }
    }
}

/// A three-dimensional extent in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3 {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels.
    pub depth: u32,
}

impl Extent3 {
    /// Creates an extent.
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Number of texels covered by the extent.
    pub const fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }
}

impl Default for Extent3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

/// The driver-level description of an image to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCreateInfo {
    /// Creation flags.
    pub flags: ImageFlags,
    /// Dimensionality.
    pub image_type: ImageType,
    /// Texel format.
    pub format: ImageFormat,
    /// Extent of mip level zero.
    pub extent: Extent3,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// Number of array layers.
    pub array_layers: u32,
    /// Samples per texel.
    pub samples: SampleCount,
    /// Texel arrangement.
    pub tiling: ImageTiling,
    /// Allowed usages.
    pub usage: ImageUsage,
    /// Layout of the image right after creation.
    ///
    /// `Undefined` for optimal tiling, `Preinitialized` for linear tiling.
    pub initial_layout: ImageLayout,
}

impl ImageCreateInfo {
    /// A single-sample, single-mip 2D image with the matching initial layout.
    pub fn texture_2d(
        format: ImageFormat,
        width: u32,
        height: u32,
        tiling: ImageTiling,
        usage: ImageUsage,
    ) -> Self {
        Self {
            flags: ImageFlags::empty(),
            image_type: ImageType::Image2D,
            format,
            extent: Extent3::new(width, height, 1),
            mip_levels: 1,
            array_layers: 1,
            samples: SampleCount::X1,
            tiling,
            usage,
            initial_layout: Self::initial_layout_for(tiling),
        }
    }

    /// The initial layout the transfer core uses for a given tiling.
    pub const fn initial_layout_for(tiling: ImageTiling) -> ImageLayout {
        match tiling {
            ImageTiling::Optimal => ImageLayout::Undefined,
            ImageTiling::Linear => ImageLayout::Preinitialized,
        }
    }

    /// Tightly packed size in bytes of mip level zero across all layers.
    pub const fn texel_data_size(&self) -> u64 {
        self.format.block_size() * self.extent.texel_count() * self.array_layers as u64
    }
}
