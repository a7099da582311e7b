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

//! Object tables of the headless driver and the software execution of
//! recorded command buffers.

use super::failure::FailureInjector;
use ferrite_core::gpu::{
    BufferCopy, BufferCreateInfo, BufferId, BufferImageCopy, BufferMemoryBarrier, CommandBufferId,
    CommandPoolId, DedicatedTarget, FenceId, ImageCreateInfo, ImageId, ImageLayout,
    ImageMemoryBarrier, MemoryId, MemoryRequirements, PipelineStageFlags, QueueId, SemaphoreId,
    SharingMode, SubmitInfo, QUEUE_FAMILY_IGNORED,
};
use std::collections::{HashMap, VecDeque};

/// A command as recorded into a headless command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// `cmd_copy_buffer`.
    CopyBuffer {
        /// Source buffer.
        src: BufferId,
        /// Destination buffer.
        dst: BufferId,
        /// Copied regions.
        regions: Vec<BufferCopy>,
    },
    /// `cmd_copy_buffer_to_image`.
    CopyBufferToImage {
        /// Source buffer.
        src: BufferId,
        /// Destination image.
        dst: ImageId,
        /// Layout the image is expected in.
        layout: ImageLayout,
        /// Copied regions.
        regions: Vec<BufferImageCopy>,
    },
    /// `cmd_pipeline_barrier`.
    PipelineBarrier {
        /// Source stages.
        src_stage: PipelineStageFlags,
        /// Destination stages.
        dst_stage: PipelineStageFlags,
        /// Buffer barriers.
        buffers: Vec<BufferMemoryBarrier>,
        /// Image barriers.
        images: Vec<ImageMemoryBarrier>,
    },
}

/// One executed submit batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    /// Queue the batch ran on.
    pub queue: QueueId,
    /// Family of that queue.
    pub family: u32,
    /// Semaphores waited on.
    pub waits: Vec<SemaphoreId>,
    /// Semaphores signaled.
    pub signals: Vec<SemaphoreId>,
    /// Commands of every command buffer of the batch, in execution order.
    pub commands: Vec<RecordedCommand>,
}

/// Where an object is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// The allocation.
    pub memory: MemoryId,
    /// Offset inside it.
    pub offset: u64,
    /// Bytes the object occupies.
    pub size: u64,
}

/// Live driver objects, for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    /// Buffers.
    pub buffers: usize,
    /// Images.
    pub images: usize,
    /// Memory allocations.
    pub memories: usize,
    /// Command pools.
    pub command_pools: usize,
    /// Fences.
    pub fences: usize,
    /// Semaphores.
    pub semaphores: usize,
}

impl LiveObjects {
    /// Total number of live objects.
    pub fn total(&self) -> usize {
        self.buffers
            + self.images
            + self.memories
            + self.command_pools
            + self.fences
            + self.semaphores
    }
}

#[derive(Debug, Default)]
pub(crate) struct Ownership {
    owner: Option<u32>,
    released_to: Option<u32>,
}

impl Ownership {
    pub(crate) fn owner(&self) -> Option<u32> {
        self.owner
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released_to.is_some()
    }

    fn touch(&mut self, family: u32) -> Result<(), String> {
        if let Some(to) = self.released_to {
            return Err(format!("used on family {family} while released to family {to}"));
        }
        match self.owner {
            Some(owner) if owner != family => Err(format!(
                "used on family {family} while owned by family {owner}"
            )),
            _ => {
                self.owner = Some(family);
                Ok(())
            }
        }
    }

    fn barrier(&mut self, family: u32, src: u32, dst: u32) -> Result<(), String> {
        if src == QUEUE_FAMILY_IGNORED || dst == QUEUE_FAMILY_IGNORED || src == dst {
            return self.touch(family);
        }
        if family == src {
            if let Some(owner) = self.owner.filter(|&owner| owner != src) {
                return Err(format!(
                    "released from family {src} while owned by family {owner}"
                ));
            }
            self.owner = Some(src);
            self.released_to = Some(dst);
            Ok(())
        } else if family == dst {
            if self.released_to != Some(dst) {
                return Err(format!(
                    "acquired on family {dst} without a matching release from family {src}"
                ));
            }
            self.owner = Some(dst);
            self.released_to = None;
            Ok(())
        } else {
            Err(format!(
                "ownership transfer {src} -> {dst} recorded on family {family}"
            ))
        }
    }
}

#[derive(Debug)]
pub(crate) struct MemoryEntry {
    pub(crate) type_index: u32,
    pub(crate) heap: u32,
    pub(crate) coherent: bool,
    pub(crate) host_visible: bool,
    pub(crate) data: Vec<u8>,
    pub(crate) shadow: Option<Vec<u8>>,
    pub(crate) mapped: bool,
    pub(crate) dedicated: Option<DedicatedTarget>,
}

#[derive(Debug)]
pub(crate) struct BufferEntry {
    pub(crate) info: BufferCreateInfo,
    pub(crate) requirements: MemoryRequirements,
    pub(crate) binding: Option<(MemoryId, u64)>,
    pub(crate) ownership: Ownership,
}

#[derive(Debug)]
pub(crate) struct ImageEntry {
    pub(crate) info: ImageCreateInfo,
    pub(crate) requirements: MemoryRequirements,
    pub(crate) binding: Option<(MemoryId, u64)>,
    pub(crate) layout: ImageLayout,
    pub(crate) ownership: Ownership,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Submitted,
}

#[derive(Debug)]
pub(crate) struct CommandBufferEntry {
    pub(crate) pool: CommandPoolId,
    pub(crate) family: u32,
    pub(crate) state: CommandBufferState,
    pub(crate) commands: Vec<RecordedCommand>,
}

#[derive(Debug)]
pub(crate) struct FenceEntry {
    pub(crate) signaled: bool,
    pub(crate) pending: usize,
}

#[derive(Debug)]
pub(crate) struct PendingSubmission {
    pub(crate) queue: QueueId,
    pub(crate) family: u32,
    pub(crate) batches: Vec<SubmitInfo>,
    pub(crate) fence: Option<FenceId>,
}

#[derive(Debug, Default)]
pub(crate) struct HeadlessState {
    next_id: usize,
    pub(crate) buffers: HashMap<BufferId, BufferEntry>,
    pub(crate) images: HashMap<ImageId, ImageEntry>,
    pub(crate) memories: HashMap<MemoryId, MemoryEntry>,
    pub(crate) pools: HashMap<CommandPoolId, u32>,
    pub(crate) command_buffers: HashMap<CommandBufferId, CommandBufferEntry>,
    pub(crate) fences: HashMap<FenceId, FenceEntry>,
    pub(crate) semaphores: HashMap<SemaphoreId, bool>,
    pub(crate) heap_usage: Vec<u64>,
    pub(crate) allocated_bytes: u64,
    pub(crate) peak_bytes: u64,
    pub(crate) failures: FailureInjector,
    pub(crate) validation_errors: Vec<String>,
    pub(crate) submissions: Vec<SubmissionRecord>,
    pub(crate) pending: VecDeque<PendingSubmission>,
    pub(crate) deferred: bool,
    /// Byte every fresh allocation starts with.
    pub(crate) fill_byte: u8,
}

impl HeadlessState {
    pub(crate) fn new(heaps: usize) -> Self {
        Self {
            next_id: 1,
            heap_usage: vec![0; heaps],
            ..Default::default()
        }
    }

    pub(crate) fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn validation_error(&mut self, message: String) {
        log::error!("Headless validation: {}", message);
        self.validation_errors.push(message);
    }

    pub(crate) fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            buffers: self.buffers.len(),
            images: self.images.len(),
            memories: self.memories.len(),
            command_pools: self.pools.len(),
            fences: self.fences.len(),
            semaphores: self.semaphores.len(),
        }
    }

    /// Runs queued submissions up to and including the one signaling `fence`,
    /// or all of them when `fence` is `None`.
    pub(crate) fn drain_pending(&mut self, fence: Option<FenceId>) {
        while let Some(submission) = self.pending.pop_front() {
            let done = fence.is_some() && submission.fence == fence;
            self.execute(submission);
            if done {
                break;
            }
        }
    }

    pub(crate) fn execute(&mut self, submission: PendingSubmission) {
        for batch in &submission.batches {
            for (semaphore, _) in &batch.wait_semaphores {
                match self.semaphores.get(semaphore).copied() {
                    Some(true) => {
                        self.semaphores.insert(*semaphore, false);
                    }
                    Some(false) => self.validation_error(format!(
                        "batch on family {} waits on unsignaled {:?}",
                        submission.family, semaphore
                    )),
                    None => self.validation_error(format!("wait on unknown {:?}", semaphore)),
                }
            }

            let mut record = SubmissionRecord {
                queue: submission.queue,
                family: submission.family,
                waits: batch.wait_semaphores.iter().map(|(s, _)| *s).collect(),
                signals: batch.signal_semaphores.clone(),
                commands: Vec::new(),
            };

            for cb in &batch.command_buffers {
                let commands = match self.command_buffers.get(cb) {
                    Some(entry) => entry.commands.clone(),
                    None => {
                        self.validation_error(format!("submitted unknown {:?}", cb));
                        continue;
                    }
                };
                for command in &commands {
                    self.execute_command(submission.family, command);
                }
                record.commands.extend(commands);
            }

            for semaphore in &batch.signal_semaphores {
                if let Some(signaled) = self.semaphores.get_mut(semaphore) {
                    *signaled = true;
                }
            }
            self.submissions.push(record);
        }

        if let Some(fence) = submission.fence.and_then(|f| self.fences.get_mut(&f)) {
            fence.pending = fence.pending.saturating_sub(1);
            if fence.pending == 0 {
                fence.signaled = true;
            }
        }
    }

    fn execute_command(&mut self, family: u32, command: &RecordedCommand) {
        let result = match command {
            RecordedCommand::CopyBuffer { src, dst, regions } => {
                self.copy_buffer(family, *src, *dst, regions)
            }
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                layout,
                regions,
            } => self.copy_buffer_to_image(family, *src, *dst, *layout, regions),
            RecordedCommand::PipelineBarrier {
                buffers, images, ..
            } => self.barrier(family, buffers, images),
        };
        if let Err(message) = result {
            self.validation_error(message);
        }
    }

    fn touch_buffer(&mut self, family: u32, id: BufferId) -> Result<(), String> {
        let entry = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| format!("unknown {:?}", id))?;
        if entry.info.sharing == SharingMode::Concurrent {
            return Ok(());
        }
        entry
            .ownership
            .touch(family)
            .map_err(|e| format!("{:?} {}", id, e))
    }

    fn buffer_range(&self, id: BufferId, offset: u64, len: u64) -> Result<(MemoryId, u64), String> {
        let entry = self
            .buffers
            .get(&id)
            .ok_or_else(|| format!("unknown {:?}", id))?;
        let (memory, base) = entry
            .binding
            .ok_or_else(|| format!("{:?} used before it was bound", id))?;
        if offset + len > entry.info.size {
            return Err(format!(
                "range {}..+{} exceeds {:?} of {} bytes",
                offset, len, id, entry.info.size
            ));
        }
        Ok((memory, base + offset))
    }

    pub(crate) fn read_memory(&self, memory: MemoryId, offset: u64, len: u64) -> Result<Vec<u8>, String> {
        let entry = self
            .memories
            .get(&memory)
            .ok_or_else(|| format!("unknown {:?}", memory))?;
        let (start, end) = (offset as usize, (offset + len) as usize);
        entry
            .data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| format!("read {}..{} outside {:?}", start, end, memory))
    }

    fn write_memory(&mut self, memory: MemoryId, offset: u64, bytes: &[u8]) -> Result<(), String> {
        let entry = self
            .memories
            .get_mut(&memory)
            .ok_or_else(|| format!("unknown {:?}", memory))?;
        let start = offset as usize;
        let dst = entry
            .data
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| format!("write at {} outside {:?}", start, memory))?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        family: u32,
        src: BufferId,
        dst: BufferId,
        regions: &[BufferCopy],
    ) -> Result<(), String> {
        self.touch_buffer(family, src)?;
        self.touch_buffer(family, dst)?;
        for region in regions {
            let (src_memory, src_offset) = self.buffer_range(src, region.src_offset, region.size)?;
            let (dst_memory, dst_offset) = self.buffer_range(dst, region.dst_offset, region.size)?;
            let bytes = self.read_memory(src_memory, src_offset, region.size)?;
            self.write_memory(dst_memory, dst_offset, &bytes)?;
        }
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        family: u32,
        src: BufferId,
        dst: ImageId,
        layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) -> Result<(), String> {
        self.touch_buffer(family, src)?;
        let (info, binding) = {
            let entry = self
                .images
                .get_mut(&dst)
                .ok_or_else(|| format!("unknown {:?}", dst))?;
            if entry.layout != layout {
                return Err(format!(
                    "{:?} copied as {:?} but is in {:?}",
                    dst, layout, entry.layout
                ));
            }
            if !matches!(layout, ImageLayout::TransferDstOptimal | ImageLayout::General) {
                return Err(format!("{:?} is not a copy destination in {:?}", dst, layout));
            }
            entry
                .ownership
                .touch(family)
                .map_err(|e| format!("{:?} {}", dst, e))?;
            let binding = entry
                .binding
                .ok_or_else(|| format!("{:?} used before it was bound", dst))?;
            (entry.info.clone(), binding)
        };

        let block = info.format.block_size();
        let image_width = info.extent.width as u64;
        let image_height = info.extent.height as u64;
        let layer_size = block * info.extent.texel_count();

        for region in regions {
            let extent = region.image_extent;
            let row_length = match region.buffer_row_length {
                0 => extent.width,
                n => n,
            } as u64;
            let slice_height = match region.buffer_image_height {
                0 => extent.height,
                n => n,
            } as u64;
            let [ox, oy, oz] = region.image_offset.map(|v| v.max(0) as u64);
            if ox + extent.width as u64 > image_width
                || oy + extent.height as u64 > image_height
                || oz + extent.depth as u64 > info.extent.depth as u64
            {
                return Err(format!("copy region {:?} exceeds {:?}", region, dst));
            }

            let row_bytes = extent.width as u64 * block;
            let layers = region.image_subresource.layer_count as u64;
            for layer in 0..layers {
                let src_layer = layer * row_length * slice_height * extent.depth as u64 * block;
                let dst_layer =
                    (region.image_subresource.base_array_layer as u64 + layer) * layer_size;
                for z in 0..extent.depth as u64 {
                    for y in 0..extent.height as u64 {
                        let src_offset = region.buffer_offset
                            + src_layer
                            + ((z * slice_height + y) * row_length) * block;
                        let dst_offset = binding.1
                            + dst_layer
                            + (((oz + z) * image_height + oy + y) * image_width + ox) * block;
                        let (src_memory, src_at) = self.buffer_range(src, src_offset, row_bytes)?;
                        let bytes = self.read_memory(src_memory, src_at, row_bytes)?;
                        self.write_memory(binding.0, dst_offset, &bytes)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn barrier(
        &mut self,
        family: u32,
        buffers: &[BufferMemoryBarrier],
        images: &[ImageMemoryBarrier],
    ) -> Result<(), String> {
        for barrier in buffers {
            let entry = self
                .buffers
                .get_mut(&barrier.buffer)
                .ok_or_else(|| format!("barrier on unknown {:?}", barrier.buffer))?;
            if entry.info.sharing == SharingMode::Concurrent {
                continue;
            }
            entry
                .ownership
                .barrier(family, barrier.src_queue_family, barrier.dst_queue_family)
                .map_err(|e| format!("{:?} {}", barrier.buffer, e))?;
        }

        for barrier in images {
            let entry = self
                .images
                .get_mut(&barrier.image)
                .ok_or_else(|| format!("barrier on unknown {:?}", barrier.image))?;
            let acquiring = barrier.is_ownership_transfer() && family == barrier.dst_queue_family;
            let layout_ok = barrier.old_layout == ImageLayout::Undefined
                || barrier.old_layout == entry.layout
                || (acquiring && barrier.new_layout == entry.layout);
            if !layout_ok {
                return Err(format!(
                    "{:?} transitions from {:?} but is in {:?}",
                    barrier.image, barrier.old_layout, entry.layout
                ));
            }
            entry
                .ownership
                .barrier(family, barrier.src_queue_family, barrier.dst_queue_family)
                .map_err(|e| format!("{:?} {}", barrier.image, e))?;
            entry.layout = barrier.new_layout;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_then_acquire_moves_ownership() {
        let mut ownership = Ownership::default();
        ownership.touch(2).unwrap();
        ownership.barrier(2, 2, 0).unwrap();
        assert!(ownership.is_released());
        assert!(ownership.touch(0).is_err());

        ownership.barrier(0, 2, 0).unwrap();
        assert_eq!(ownership.owner(), Some(0));
        assert!(!ownership.is_released());
    }

    #[test]
    fn acquire_without_release_is_reported() {
        let mut ownership = Ownership::default();
        ownership.touch(2).unwrap();
        assert!(ownership.barrier(0, 2, 0).is_err());
    }

    #[test]
    fn same_family_barrier_is_plain_use() {
        let mut ownership = Ownership::default();
        ownership
            .barrier(1, QUEUE_FAMILY_IGNORED, QUEUE_FAMILY_IGNORED)
            .unwrap();
        assert_eq!(ownership.owner(), Some(1));
        assert!(ownership.touch(0).is_err());
    }
}
