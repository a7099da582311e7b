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

//! Conversions from the engine's driver types into `ash::vk` types.
//!
//! Flag types share the driver's bit layout, so they convert with `from_raw`.

use ash::vk;

use ferrite_core::gpu::{
    AccessFlags, BufferCopy, BufferFlags, BufferImageCopy, BufferMemoryBarrier, BufferUsage,
    ImageAspect, ImageFlags, ImageFormat, ImageLayout, ImageMemoryBarrier,
    ImageSubresourceLayers, ImageSubresourceRange, ImageTiling, ImageType, ImageUsage,
    MemoryHeapFlags, MemoryPropertyFlags, PipelineStageFlags, QueueOperations, SampleCount,
    SharingMode,
};

/// A local extension trait converting engine types into `vk` types.
pub trait IntoVk<T> {
    /// Consumes self and converts it into its `vk` counterpart.
    fn into_vk(self) -> T;
}

// --- Flags ---

macro_rules! flags_into_vk {
    ($($ours:ty => $theirs:ty),* $(,)?) => {
        $(
            impl IntoVk<$theirs> for $ours {
                fn into_vk(self) -> $theirs {
                    <$theirs>::from_raw(self.bits())
                }
            }
        )*
    };
}

flags_into_vk! {
    BufferFlags => vk::BufferCreateFlags,
    BufferUsage => vk::BufferUsageFlags,
    ImageFlags => vk::ImageCreateFlags,
    ImageUsage => vk::ImageUsageFlags,
    ImageAspect => vk::ImageAspectFlags,
    AccessFlags => vk::AccessFlags,
    PipelineStageFlags => vk::PipelineStageFlags,
}

/// Memory property flags reported by the driver.
pub fn memory_property_flags_from_vk(flags: vk::MemoryPropertyFlags) -> MemoryPropertyFlags {
    MemoryPropertyFlags::from_bits_truncate(flags.as_raw())
}

/// Memory heap flags reported by the driver.
pub fn memory_heap_flags_from_vk(flags: vk::MemoryHeapFlags) -> MemoryHeapFlags {
    MemoryHeapFlags::from_bits_truncate(flags.as_raw())
}

/// Queue capabilities reported by the driver. Presentation is not a queue flag
/// and is never set here.
pub fn queue_operations_from_vk(flags: vk::QueueFlags) -> QueueOperations {
    let mut ops = QueueOperations::empty();
    ops.set(QueueOperations::GRAPHICS, flags.contains(vk::QueueFlags::GRAPHICS));
    ops.set(QueueOperations::COMPUTE, flags.contains(vk::QueueFlags::COMPUTE));
    ops.set(QueueOperations::TRANSFER, flags.contains(vk::QueueFlags::TRANSFER));
    ops.set(
        QueueOperations::SPARSE_BINDING,
        flags.contains(vk::QueueFlags::SPARSE_BINDING),
    );
    ops
}

// --- Enums ---

impl IntoVk<vk::SharingMode> for SharingMode {
    fn into_vk(self) -> vk::SharingMode {
        match self {
            SharingMode::Exclusive => vk::SharingMode::EXCLUSIVE,
            SharingMode::Concurrent => vk::SharingMode::CONCURRENT,
        }
    }
}

impl IntoVk<vk::ImageType> for ImageType {
    fn into_vk(self) -> vk::ImageType {
        match self {
            ImageType::Image1D => vk::ImageType::TYPE_1D,
            ImageType::Image2D => vk::ImageType::TYPE_2D,
            ImageType::Image3D => vk::ImageType::TYPE_3D,
        }
    }
}

impl IntoVk<vk::ImageTiling> for ImageTiling {
    fn into_vk(self) -> vk::ImageTiling {
        match self {
            ImageTiling::Optimal => vk::ImageTiling::OPTIMAL,
            ImageTiling::Linear => vk::ImageTiling::LINEAR,
        }
    }
}

impl IntoVk<vk::SampleCountFlags> for SampleCount {
    fn into_vk(self) -> vk::SampleCountFlags {
        match self {
            SampleCount::X1 => vk::SampleCountFlags::TYPE_1,
            SampleCount::X2 => vk::SampleCountFlags::TYPE_2,
            SampleCount::X4 => vk::SampleCountFlags::TYPE_4,
            SampleCount::X8 => vk::SampleCountFlags::TYPE_8,
        }
    }
}

impl IntoVk<vk::ImageLayout> for ImageLayout {
    fn into_vk(self) -> vk::ImageLayout {
        match self {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::General => vk::ImageLayout::GENERAL,
            ImageLayout::Preinitialized => vk::ImageLayout::PREINITIALIZED,
            ImageLayout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::TransferSrcOptimal => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::ColorAttachmentOptimal => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::DepthStencilAttachmentOptimal => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
        }
    }
}

impl IntoVk<vk::Format> for ImageFormat {
    fn into_vk(self) -> vk::Format {
        match self {
            ImageFormat::Undefined => vk::Format::UNDEFINED,
            ImageFormat::R8Unorm => vk::Format::R8_UNORM,
            ImageFormat::R8G8Unorm => vk::Format::R8G8_UNORM,
            ImageFormat::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            ImageFormat::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
            ImageFormat::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            ImageFormat::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
            ImageFormat::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
            ImageFormat::D16Unorm => vk::Format::D16_UNORM,
            ImageFormat::X8D24UnormPack32 => vk::Format::X8_D24_UNORM_PACK32,
            ImageFormat::D32Sfloat => vk::Format::D32_SFLOAT,
            ImageFormat::S8Uint => vk::Format::S8_UINT,
            ImageFormat::D16UnormS8Uint => vk::Format::D16_UNORM_S8_UINT,
            ImageFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            ImageFormat::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }
}

// --- Structs ---

impl IntoVk<vk::BufferCopy> for BufferCopy {
    fn into_vk(self) -> vk::BufferCopy {
        vk::BufferCopy {
            src_offset: self.src_offset,
            dst_offset: self.dst_offset,
            size: self.size,
        }
    }
}

impl IntoVk<vk::ImageSubresourceLayers> for ImageSubresourceLayers {
    fn into_vk(self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect.into_vk(),
            mip_level: self.mip_level,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }
}

impl IntoVk<vk::ImageSubresourceRange> for ImageSubresourceRange {
    fn into_vk(self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect.into_vk(),
            base_mip_level: self.base_mip_level,
            level_count: self.level_count,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }
}

/// Converts a copy region. Image offsets are signed in the driver API.
pub fn buffer_image_copy_into_vk(region: &BufferImageCopy) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: region.buffer_offset,
        buffer_row_length: region.buffer_row_length,
        buffer_image_height: region.buffer_image_height,
        image_subresource: region.image_subresource.into_vk(),
        image_offset: vk::Offset3D {
            x: region.image_offset[0],
            y: region.image_offset[1],
            z: region.image_offset[2],
        },
        image_extent: vk::Extent3D {
            width: region.image_extent.width,
            height: region.image_extent.height,
            depth: region.image_extent.depth,
        },
    }
}

/// Converts a buffer barrier, given the driver handle of its buffer.
pub fn buffer_barrier_into_vk(
    barrier: &BufferMemoryBarrier,
    buffer: vk::Buffer,
) -> vk::BufferMemoryBarrier {
    vk::BufferMemoryBarrier::builder()
        .src_access_mask(barrier.src_access.into_vk())
        .dst_access_mask(barrier.dst_access.into_vk())
        .src_queue_family_index(barrier.src_queue_family)
        .dst_queue_family_index(barrier.dst_queue_family)
        .buffer(buffer)
        .offset(barrier.offset)
        .size(barrier.size)
        .build()
}

/// Converts an image barrier, given the driver handle of its image.
pub fn image_barrier_into_vk(
    barrier: &ImageMemoryBarrier,
    image: vk::Image,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(barrier.src_access.into_vk())
        .dst_access_mask(barrier.dst_access.into_vk())
        .old_layout(barrier.old_layout.into_vk())
        .new_layout(barrier.new_layout.into_vk())
        .src_queue_family_index(barrier.src_queue_family)
        .dst_queue_family_index(barrier.dst_queue_family)
        .image(image)
        .subresource_range(barrier.range.into_vk())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_are_preserved() {
        let usage = BufferUsage::TRANSFER_SRC | BufferUsage::VERTEX_BUFFER;
        let vk_usage: vk::BufferUsageFlags = usage.into_vk();
        assert_eq!(
            vk_usage,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::VERTEX_BUFFER
        );

        let stages: vk::PipelineStageFlags = PipelineStageFlags::ALL_SHADERS.into_vk();
        assert!(stages.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(stages.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
    }

    #[test]
    fn queue_flags_drop_unknown_bits() {
        let ops = queue_operations_from_vk(vk::QueueFlags::TRANSFER | vk::QueueFlags::PROTECTED);
        assert_eq!(ops, QueueOperations::TRANSFER);
    }

    #[test]
    fn layouts_map_one_to_one() {
        let layout: vk::ImageLayout = ImageLayout::TransferDstOptimal.into_vk();
        assert_eq!(layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
