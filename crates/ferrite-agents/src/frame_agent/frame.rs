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

use super::{FrameError, FrameState, QueueSet, RenderQueue};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use ferrite_core::gpu::{
    CommandBufferId, FrameSettings, PipelineStageFlags, QueueFamilyLayout, SemaphoreId, SubmitInfo,
};
use ferrite_data::{Allocator, DeviceQueue, Fence, Semaphore};
use ferrite_lanes::{
    Attachment, AttachmentHandle, AttachmentId, AttachmentInputData, FrameContext, FrameTask, RenderPass,
    RenderPassHandle,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// The [`FrameContext`] lanes see while working for a [`FrameHandle`].
struct FrameShared {
    generation: u64,
    allocator: Arc<Allocator>,
    families: QueueFamilyLayout,
    settings: FrameSettings,
    tasks: Sender<FrameTask>,
    submitted: Mutex<HashSet<AttachmentId>>,
}

impl FrameContext for FrameShared {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    fn queue_families(&self) -> &QueueFamilyLayout {
        &self.families
    }

    fn settings(&self) -> &FrameSettings {
        &self.settings
    }

    fn perform(&self, task: FrameTask) {
        // The receiver lives in the same FrameHandle as this sender.
        if self.tasks.send(task).is_err() {
            log::error!("Frame {} dropped a deferred task", self.generation);
        }
    }

    fn set_input_submitted(&self, attachment: AttachmentId) {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(attachment);
    }

    fn is_input_submitted(&self, attachment: AttachmentId) -> bool {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&attachment)
    }
}

struct AttachmentSlot {
    attachment: Arc<dyn Attachment>,
    handle: Arc<dyn AttachmentHandle>,
    ready: bool,
}

/// Command buffers of consecutive passes on one queue family.
struct Batch {
    queue: Arc<DeviceQueue>,
    commands: Vec<CommandBufferId>,
    passes: Vec<usize>,
}

struct PassSlot {
    pass: Arc<dyn RenderPass>,
    handle: Box<dyn RenderPassHandle>,
    enabled: bool,
    commands: Vec<CommandBufferId>,
}

/// One frame: collects attachment input, records every pass, submits the
/// command buffers and finalizes the passes once the GPU is done.
///
/// ```text
/// new -> submit_input* -> record -> submit -> finalize
/// ```
///
/// Dropping a submitted frame waits for its fence and finalizes its passes as
/// completed. Dropping a frame that never reached the queues finalizes its
/// passes as failed.
pub struct FrameHandle {
    context: FrameShared,
    tasks: Receiver<FrameTask>,
    queues: Arc<QueueSet>,
    attachments: Vec<AttachmentSlot>,
    passes: Vec<PassSlot>,
    fence: Option<Fence>,
    semaphores: Vec<Semaphore>,
    state: FrameState,
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("generation", &self.context.generation)
            .field("state", &self.state)
            .field("passes", &self.passes.iter().map(|slot| slot.handle.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl FrameHandle {
    /// Creates the attachment and pass handles of `render_queue` for frame
    /// `generation`.
    ///
    /// An attachment whose `setup` fails disables every pass that requires it
    /// for this frame.
    pub fn new(
        generation: u64,
        allocator: Arc<Allocator>,
        queues: Arc<QueueSet>,
        settings: FrameSettings,
        render_queue: &RenderQueue,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let context = FrameShared {
            generation,
            allocator,
            families: *queues.layout(),
            settings,
            tasks: sender,
            submitted: Mutex::new(HashSet::new()),
        };

        let attachments: Vec<AttachmentSlot> = render_queue
            .attachments()
            .iter()
            .map(|attachment| {
                let handle = attachment.clone().make_frame_handle(&context);
                let ready = handle.setup(&context);
                if !ready {
                    log::warn!("Frame {}: attachment '{}' failed to set up", generation, attachment.name());
                }
                AttachmentSlot {
                    attachment: attachment.clone(),
                    handle,
                    ready,
                }
            })
            .collect();

        let passes = render_queue
            .passes()
            .iter()
            .map(|pass| {
                let mut handle = pass.clone().make_frame_handle(&context);
                let mut enabled = true;
                for required in pass.data().attachments() {
                    match attachments.iter().find(|slot| slot.attachment.id() == required.id()) {
                        Some(slot) if slot.ready => handle.add_required_attachment(&slot.attachment, &slot.handle),
                        _ => enabled = false,
                    }
                }
                if !enabled {
                    log::warn!("Frame {}: pass '{}' is disabled", generation, pass.data().name());
                }
                PassSlot {
                    pass: pass.clone(),
                    handle,
                    enabled,
                    commands: Vec::new(),
                }
            })
            .collect();

        log::trace!("Frame {} created", generation);
        Self {
            context,
            tasks: receiver,
            queues,
            attachments,
            passes,
            fence: None,
            semaphores: Vec::new(),
            state: FrameState::Setup,
        }
    }

    /// Generation of the frame.
    pub fn generation(&self) -> u64 {
        self.context.generation
    }

    /// Current state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The context handed to attachments and passes.
    pub fn context(&self) -> &dyn FrameContext {
        &self.context
    }

    /// This frame's handle of attachment `id`.
    pub fn attachment_handle(&self, id: AttachmentId) -> Option<&Arc<dyn AttachmentHandle>> {
        self.attachments
            .iter()
            .find(|slot| slot.attachment.id() == id)
            .map(|slot| &slot.handle)
    }

    /// Hands `data` to the frame handle of attachment `id`.
    ///
    /// The attachment applies it through a deferred task; see
    /// [`FrameHandle::run_tasks`].
    pub fn submit_input(&self, id: AttachmentId, data: AttachmentInputData) -> Result<(), FrameError> {
        self.expect_state("submit input", FrameState::Setup)?;
        let slot = self
            .attachments
            .iter()
            .find(|slot| slot.attachment.id() == id)
            .ok_or(FrameError::UnknownAttachment(id))?;

        let kind = data.kind();
        if slot.ready && slot.handle.submit_input(&self.context, data) {
            Ok(())
        } else {
            Err(FrameError::InputRejected {
                name: slot.attachment.name().to_string(),
                kind,
            })
        }
    }

    /// Runs the deferred attachment tasks, including the ones they queue.
    /// Returns how many ran.
    pub fn run_tasks(&self) -> usize {
        let mut count = 0;
        loop {
            match self.tasks.try_recv() {
                Ok(task) => {
                    task(&self.context);
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return count,
            }
        }
    }

    /// Attachments that require input and did not get it yet.
    pub fn missing_inputs(&self) -> Vec<AttachmentId> {
        self.attachments
            .iter()
            .filter(|slot| slot.ready && slot.handle.is_input_required())
            .map(|slot| slot.attachment.id())
            .filter(|id| !self.context.is_input_submitted(*id))
            .collect()
    }

    /// Runs pending tasks and returns `true` if every required input arrived.
    pub fn is_ready(&self) -> bool {
        self.run_tasks();
        self.missing_inputs().is_empty()
    }

    /// Records every enabled pass in execution order.
    ///
    /// A pass whose required input is missing, or whose recording fails, is
    /// skipped for this frame. If that pass is fatal on failure, the whole
    /// frame is abandoned: every pass handle is finalized as failed and
    /// [`FrameError::FatalPass`] is returned.
    pub fn record(&mut self) -> Result<(), FrameError> {
        self.expect_state("record", FrameState::Setup)?;
        self.run_tasks();
        let missing = self.missing_inputs();

        for index in 0..self.passes.len() {
            let slot = &self.passes[index];
            let name = slot.handle.name().to_string();
            let starved = slot.pass.data().attachments().iter().any(|a| missing.contains(&a.id()));

            let commands = if !slot.enabled || starved {
                log::warn!(
                    "Frame {}: skipping pass '{}' ({})",
                    self.context.generation,
                    name,
                    if starved { "missing input" } else { "disabled" }
                );
                Vec::new()
            } else {
                self.passes[index].handle.prepare_commands(&self.context)
            };

            if commands.is_empty() && self.passes[index].handle.is_fatal_on_failure() {
                log::error!("Frame {}: pass '{}' is required, abandoning the frame", self.context.generation, name);
                self.finish(false);
                return Err(FrameError::FatalPass(name));
            }
            self.passes[index].commands = commands;
        }

        self.state = FrameState::Recorded;
        log::trace!("Frame {} recorded", self.context.generation);
        Ok(())
    }

    /// Submits the recorded command buffers.
    ///
    /// Consecutive passes on the same queue family share one batch. When the
    /// family changes, the earlier batch signals a semaphore the next one
    /// waits on, so releases always execute before their acquires. The last
    /// batch signals the frame fence.
    ///
    /// A submission failure abandons the frame. Batches that already reached
    /// their queue are waited for first; their passes are finalized as
    /// completed and the rest as failed.
    pub fn submit(&mut self) -> Result<(), FrameError> {
        self.expect_state("submit", FrameState::Recorded)?;

        let mut batches: Vec<Batch> = Vec::new();
        for (index, slot) in self.passes.iter().enumerate() {
            if slot.commands.is_empty() {
                continue;
            }
            let queue = self.queues.queue_for(slot.handle.queue_operations());
            match batches.last_mut() {
                Some(batch) if batch.queue.family() == queue.family() => {
                    batch.commands.extend_from_slice(&slot.commands);
                    batch.passes.push(index);
                }
                _ => batches.push(Batch {
                    queue: queue.clone(),
                    commands: slot.commands.clone(),
                    passes: vec![index],
                }),
            }
        }

        if batches.is_empty() {
            log::debug!("Frame {} recorded no work", self.context.generation);
            self.state = FrameState::Submitted;
            return Ok(());
        }

        let mut sent = 0;
        match self.submit_batches(&batches, &mut sent) {
            Ok(()) => {
                self.state = FrameState::Submitted;
                Ok(())
            }
            Err(e) => {
                log::error!("Fail to submit frame {}: {}", self.context.generation, e);
                self.retire_partial(&batches[..sent]);
                Err(e)
            }
        }
    }

    fn submit_batches(&mut self, batches: &[Batch], sent: &mut usize) -> Result<(), FrameError> {
        let device = self.context.device().clone();
        let fence = Fence::new(device.clone())?;
        let count = batches.len();
        let mut wait: Option<SemaphoreId> = None;

        for (index, Batch { queue, commands, .. }) in batches.iter().enumerate() {
            let last = index + 1 == count;
            let signal = if last {
                None
            } else {
                Some(Semaphore::new(device.clone())?)
            };
            let batch = SubmitInfo {
                wait_semaphores: wait
                    .map(|semaphore| vec![(semaphore, PipelineStageFlags::ALL_COMMANDS)])
                    .unwrap_or_default(),
                command_buffers: commands.clone(),
                signal_semaphores: signal.iter().map(Semaphore::id).collect(),
            };
            log::trace!(
                "Frame {}: batch {} of {} on family {} ({} command buffers)",
                self.context.generation,
                index + 1,
                count,
                queue.family(),
                batch.command_buffers.len()
            );
            queue.submit(&[batch], last.then_some(&fence))?;
            *sent += 1;

            wait = signal.as_ref().map(Semaphore::id);
            self.semaphores.extend(signal);
        }

        self.fence = Some(fence);
        Ok(())
    }

    /// Finalizes a frame whose submission stopped after `sent`.
    fn retire_partial(&mut self, sent: &[Batch]) {
        if sent.is_empty() {
            self.finish(false);
            return;
        }
        if let Err(e) = self.wait_queues_idle(sent.iter().map(|batch| &batch.queue)) {
            log::error!(
                "Frame {}: cannot wait for its submitted batches, releasing them anyway: {}",
                self.context.generation,
                e
            );
            self.finish(false);
            return;
        }
        let completed: HashSet<usize> = sent.iter().flat_map(|batch| batch.passes.iter().copied()).collect();
        self.finish_passes(|index| completed.contains(&index));
    }

    /// Blocks until every batch already on `queues` executed.
    fn wait_queues_idle<'a>(&self, queues: impl Iterator<Item = &'a Arc<DeviceQueue>>) -> Result<(), FrameError> {
        let fence = Fence::new(self.context.device().clone())?;
        let mut families = HashSet::new();
        for queue in queues {
            // An empty submission signals once the work before it is done.
            if families.insert(queue.family()) {
                queue.submit(&[], Some(&fence))?;
            }
        }
        fence.wait(self.context.settings.fence_timeout_ns)?;
        Ok(())
    }

    /// Returns `true` once the submitted work completed.
    pub fn is_complete(&self) -> Result<bool, FrameError> {
        match self.state {
            FrameState::Submitted => match &self.fence {
                Some(fence) => Ok(fence.is_signaled()?),
                None => Ok(true),
            },
            FrameState::Finalized => Ok(true),
            FrameState::Setup | FrameState::Recorded => Ok(false),
        }
    }

    /// Blocks until the submitted work completes.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), FrameError> {
        if let (FrameState::Submitted, Some(fence)) = (self.state, &self.fence) {
            fence.wait(timeout_ns)?;
        }
        Ok(())
    }

    /// Waits for the frame's fence, then finalizes every pass as successful.
    ///
    /// Passes publish their results here: compiled transfers, new material
    /// generations.
    pub fn finalize(&mut self) -> Result<(), FrameError> {
        self.expect_state("finalize", FrameState::Submitted)?;
        self.wait(self.context.settings.fence_timeout_ns)?;
        self.finish(true);
        Ok(())
    }

    fn finish(&mut self, success: bool) {
        self.finish_passes(|_| success);
    }

    /// Finalizes pass `index` with `completed(index)`.
    fn finish_passes(&mut self, completed: impl Fn(usize) -> bool) {
        let mut retired = 0;
        for (index, slot) in self.passes.iter_mut().enumerate() {
            let success = completed(index);
            slot.handle.finalize(&self.context, success);
            slot.commands.clear();
            retired += usize::from(success);
        }
        self.semaphores.clear();
        self.fence = None;
        self.state = FrameState::Finalized;
        log::debug!(
            "Frame {} finalized ({} of {} passes completed)",
            self.context.generation,
            retired,
            self.passes.len()
        );
    }

    fn expect_state(&self, operation: &'static str, expected: FrameState) -> Result<(), FrameError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FrameError::InvalidState {
                generation: self.context.generation,
                operation,
                state: self.state,
            })
        }
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        match self.state {
            FrameState::Finalized => {}
            FrameState::Submitted => match self.wait(self.context.settings.fence_timeout_ns) {
                Ok(()) => self.finish(true),
                Err(e) => {
                    log::error!("Frame {} dropped before completion: {}", self.context.generation, e);
                    self.finish(false);
                }
            },
            FrameState::Setup | FrameState::Recorded => self.finish(false),
        }
    }
}
