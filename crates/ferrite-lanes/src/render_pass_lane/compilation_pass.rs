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

use super::{begin_pass_commands, PassError, RenderOrdering, RenderPass, RenderPassData, RenderPassHandle};
use crate::attachment_lane::{
    Attachment, AttachmentHandle, AttachmentId, MaterialAttachment, MaterialCompilationAttachment,
    MaterialCompilationHandle,
};
use crate::frame::FrameContext;
use ferrite_core::gpu::{
    AccessFlags, BufferCopy, BufferCreateInfo, BufferMemoryBarrier, BufferUsage, CommandBufferId,
    PipelineStageFlags, QueueOperations,
};
use ferrite_data::{AllocationUsage, Buffer, CommandPool, Material, MaterialId, MaterialInputData, MaterialSet};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// Pending changes of one material table. `None` marks a removal.
type PendingMaterials = BTreeMap<MaterialId, Option<Arc<Material>>>;

#[derive(Debug, Default)]
struct CompilationRequests {
    pending: HashMap<AttachmentId, PendingMaterials>,
    in_progress: HashSet<AttachmentId>,
}

/// Builds new [`MaterialSet`] generations from submitted material changes
/// and uploads their tables.
///
/// Requests are queued per material table. At most one compilation per
/// table is in flight: a table stays "in progress" from the frame that
/// started compiling it until that frame is finalized, and requests arriving
/// in between wait in the queue.
#[derive(Debug)]
pub struct MaterialCompilationRenderPass {
    data: RenderPassData,
    requests: Mutex<CompilationRequests>,
    order: AtomicU64,
}

impl MaterialCompilationRenderPass {
    /// Creates a pass compiling every attachment of `attachments`.
    pub fn new(attachments: impl IntoIterator<Item = Arc<MaterialCompilationAttachment>>) -> Self {
        let data = attachments.into_iter().fold(
            RenderPassData::new("material-compilation", RenderOrdering::HIGHEST),
            |data, attachment| data.with_attachment(attachment),
        );
        Self {
            data,
            requests: Mutex::new(CompilationRequests::default()),
            order: AtomicU64::new(0),
        }
    }

    /// Merges `input` into the requests of `target`.
    ///
    /// The last change per material id wins: adding a material cancels its
    /// pending removal and removing one drops its pending addition.
    pub fn append_request(&self, target: AttachmentId, input: MaterialInputData) {
        let mut requests = self.lock();
        let pending = requests.pending.entry(target).or_default();
        for material in input.materials {
            pending.insert(material.id(), Some(material));
        }
        for id in input.removed {
            pending.insert(id, None);
        }
    }

    /// Takes every pending change of `target` as one bundle.
    pub fn pop_request(&self, target: AttachmentId) -> Option<MaterialInputData> {
        let pending = self.lock().pending.remove(&target)?;
        let mut input = MaterialInputData::default();
        for (id, change) in pending {
            match change {
                Some(material) => input.materials.push(material),
                None => input.removed.push(id),
            }
        }
        Some(input)
    }

    /// Returns `true` if changes are queued for `target`.
    pub fn has_request(&self, target: AttachmentId) -> bool {
        self.lock()
            .pending
            .get(&target)
            .is_some_and(|pending| !pending.is_empty())
    }

    /// Puts back changes of `target` whose compilation did not complete.
    ///
    /// Changes queued for the same materials in the meantime are newer and
    /// stay as they are.
    pub fn restore_request(&self, target: AttachmentId, input: MaterialInputData) {
        let mut requests = self.lock();
        let pending = requests.pending.entry(target).or_default();
        for material in input.materials {
            pending.entry(material.id()).or_insert(Some(material));
        }
        for id in input.removed {
            pending.entry(id).or_insert(None);
        }
    }

    /// Discards the queued changes of `target`.
    pub fn clear_requests(&self, target: AttachmentId) {
        self.lock().pending.remove(&target);
    }

    /// Returns `true` while a compilation of `target` is in flight.
    pub fn in_progress(&self, target: AttachmentId) -> bool {
        self.lock().in_progress.contains(&target)
    }

    /// Marks a compilation of `target` as in flight.
    ///
    /// Returns `false` if one already was.
    pub fn set_in_progress(&self, target: AttachmentId) -> bool {
        self.lock().in_progress.insert(target)
    }

    /// Ends the in-flight compilation of `target`.
    pub fn drop_in_progress(&self, target: AttachmentId) {
        self.lock().in_progress.remove(&target);
    }

    /// Counts one more compilation and returns its sequence number.
    pub fn increment_order(&self) -> u64 {
        self.order.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Starts compiling `target` if changes are queued and no compilation of
    /// it is in flight.
    ///
    /// Returns the changes to apply; `target` is then in progress.
    pub fn begin_compilation(&self, target: AttachmentId) -> Option<MaterialInputData> {
        let mut requests = self.lock();
        if requests.in_progress.contains(&target) {
            return None;
        }
        let pending = requests.pending.remove(&target).filter(|p| !p.is_empty())?;
        requests.in_progress.insert(target);
        drop(requests);

        let mut input = MaterialInputData::default();
        for (id, change) in pending {
            match change {
                Some(material) => input.materials.push(material),
                None => input.removed.push(id),
            }
        }
        Some(input)
    }

    fn lock(&self) -> MutexGuard<'_, CompilationRequests> {
        self.requests.lock().unwrap_or_else(|poisoned| {
            log::warn!("Recovering poisoned material compilation requests");
            poisoned.into_inner()
        })
    }
}

impl RenderPass for MaterialCompilationRenderPass {
    fn data(&self) -> &RenderPassData {
        &self.data
    }

    fn queue_operations(&self) -> QueueOperations {
        QueueOperations::TRANSFER
    }

    fn make_frame_handle(self: Arc<Self>, _frame: &dyn FrameContext) -> Box<dyn RenderPassHandle> {
        Box::new(MaterialCompilationPassHandle {
            pass: self,
            inputs: Vec::new(),
            started: Vec::new(),
            requested: Vec::new(),
            compiled: Vec::new(),
            staging: Vec::new(),
            pool: None,
        })
    }
}

/// Frame handle of a [`MaterialCompilationRenderPass`].
#[derive(Debug)]
pub struct MaterialCompilationPassHandle {
    pass: Arc<MaterialCompilationRenderPass>,
    inputs: Vec<MaterialCompilationHandle>,
    started: Vec<AttachmentId>,
    requested: Vec<(MaterialCompilationHandle, MaterialInputData)>,
    compiled: Vec<(Arc<MaterialAttachment>, Arc<MaterialSet>)>,
    staging: Vec<Buffer>,
    pool: Option<CommandPool>,
}

impl MaterialCompilationPassHandle {
    /// Tables whose compilation this frame started.
    pub fn started(&self) -> &[AttachmentId] {
        &self.started
    }

    // Queues the changes of this frame again, for a later frame to compile.
    fn requeue(&mut self) {
        for (handle, input) in self.requested.drain(..) {
            let target = handle.target();
            let mut ids: Vec<MaterialId> = input.materials.iter().map(|m| m.id()).collect();
            ids.extend(&input.removed);
            log::error!(
                "Material table '{}' was not compiled, re-queueing materials {:?}",
                target.name(),
                ids
            );
            self.pass.restore_request(target.id(), input);
        }
    }

    fn record(
        &mut self,
        frame: &dyn FrameContext,
        work: &[(MaterialCompilationHandle, MaterialInputData)],
    ) -> Result<CommandBufferId, PassError> {
        let (pool, cb) = begin_pass_commands(frame, QueueOperations::TRANSFER)?;
        let family = pool.family();
        self.pool = Some(pool);
        for (handle, input) in work {
            self.compile(frame, cb, family, handle, input)?;
        }
        frame.device().end_command_buffer(cb)?;
        Ok(cb)
    }

    fn compile(
        &mut self,
        frame: &dyn FrameContext,
        cb: CommandBufferId,
        family: u32,
        handle: &MaterialCompilationHandle,
        input: &MaterialInputData,
    ) -> Result<(), PassError> {
        let target = handle.target().clone();
        let order = self.pass.increment_order();
        let mut set = target.clone_set();
        let changed = set.update(input)?;
        log::debug!(
            "Compiling material table '{}' #{} (generation {}, {} changed records)",
            target.name(),
            order,
            set.generation(),
            changed.len()
        );

        let size = set.table_size();
        if size > 0 {
            let allocator = frame.allocator();
            let validate = frame.settings().validate_ownership_transfers;
            let staging = Buffer::create(
                allocator,
                format!("{}:staging#{}", target.name(), order),
                BufferCreateInfo::new(BufferUsage::TRANSFER_SRC, size),
                AllocationUsage::HostTransitionSource,
            )?;
            let encoded = set.encode();
            let mut table_bytes = vec![0u8; size as usize];
            table_bytes[..encoded.len()].copy_from_slice(encoded);
            staging.write(0, &table_bytes)?;
            let table = Buffer::create(
                allocator,
                format!("{}#{}", target.name(), order),
                BufferCreateInfo::new(BufferUsage::STORAGE_BUFFER | BufferUsage::TRANSFER_DST, size),
                AllocationUsage::DeviceLocal,
            )?
            .with_barrier_validation(validate);

            let device = frame.device();
            device.cmd_copy_buffer(
                cb,
                staging.id(),
                table.id(),
                &[BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            );

            let consumers = target.consumers();
            let mut barrier =
                BufferMemoryBarrier::whole(table.id(), AccessFlags::TRANSFER_WRITE, AccessFlags::SHADER_READ);
            if !consumers.is_empty() {
                let consumer_family = frame.queue_families().family_for(consumers);
                if consumer_family != family {
                    barrier = barrier.with_families(family, consumer_family);
                    table.set_pending_barrier(barrier);
                }
            }
            device.cmd_pipeline_barrier(
                cb,
                PipelineStageFlags::TRANSFER,
                PipelineStageFlags::ALL_SHADERS,
                &[barrier],
                &[],
            );

            set.set_buffer(Arc::new(table));
            self.staging.push(staging);
        }

        let set = Arc::new(set);
        handle.set_output(set.clone());
        self.compiled.push((target, set));
        Ok(())
    }
}

impl RenderPassHandle for MaterialCompilationPassHandle {
    fn name(&self) -> &str {
        self.pass.data.name()
    }

    fn queue_operations(&self) -> QueueOperations {
        QueueOperations::TRANSFER
    }

    fn add_required_attachment(&mut self, _attachment: &Arc<dyn Attachment>, handle: &Arc<dyn AttachmentHandle>) {
        if let Some(compilation) = handle.as_any().downcast_ref::<MaterialCompilationHandle>() {
            self.inputs.push(compilation.clone());
        }
    }

    fn do_prepare_commands(&mut self, frame: &dyn FrameContext) -> Result<Vec<CommandBufferId>, PassError> {
        let mut work = Vec::new();
        for handle in &self.inputs {
            let target = handle.target().id();
            if let Some(input) = handle.take_input() {
                self.pass.append_request(target, input);
            }
            if self.pass.in_progress(target) {
                if self.pass.has_request(target) {
                    log::debug!(
                        "Material table '{}' is still compiling, keeping its requests queued",
                        handle.target().name()
                    );
                }
                continue;
            }
            if let Some(input) = self.pass.begin_compilation(target) {
                self.started.push(target);
                work.push((handle.clone(), input));
            }
        }
        if work.is_empty() {
            return Ok(Vec::new());
        }

        let recorded = self.record(frame, &work);
        self.requested = work;
        match recorded {
            Ok(cb) => Ok(vec![cb]),
            Err(e) => {
                // Nothing recorded here will execute; keep the current generations.
                self.compiled.clear();
                self.staging.clear();
                self.requeue();
                Err(e)
            }
        }
    }

    fn finalize(&mut self, _frame: &dyn FrameContext, success: bool) {
        if success {
            self.requested.clear();
        } else {
            self.requeue();
        }
        for (target, set) in self.compiled.drain(..) {
            if success {
                target.set_materials(set);
            }
        }
        for target in self.started.drain(..) {
            self.pass.drop_in_progress(target);
        }
        self.staging.clear();
        self.pool = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_data::Image;

    fn pass() -> MaterialCompilationRenderPass {
        MaterialCompilationRenderPass::new(std::iter::empty())
    }

    fn material(id: MaterialId) -> Arc<Material> {
        Arc::new(Material::new(id, 0, Vec::<Arc<Image>>::new()))
    }

    fn adding(ids: &[MaterialId]) -> MaterialInputData {
        MaterialInputData {
            materials: ids.iter().map(|&id| material(id)).collect(),
            removed: Vec::new(),
        }
    }

    fn removing(ids: &[MaterialId]) -> MaterialInputData {
        MaterialInputData {
            materials: Vec::new(),
            removed: ids.to_vec(),
        }
    }

    #[test]
    fn last_write_wins_per_material() {
        let pass = pass();
        let table = AttachmentId(1);
        pass.append_request(table, adding(&[1, 2]));
        pass.append_request(table, removing(&[2, 3]));
        pass.append_request(table, adding(&[3]));

        let input = pass.pop_request(table).unwrap();
        let added: Vec<_> = input.materials.iter().map(|m| m.id()).collect();
        assert_eq!(added, vec![1, 3]);
        assert_eq!(input.removed, vec![2]);
        assert!(!pass.has_request(table));
        assert!(pass.pop_request(table).is_none());
    }

    #[test]
    fn requests_are_kept_per_table() {
        let pass = pass();
        pass.append_request(AttachmentId(1), adding(&[1]));
        pass.append_request(AttachmentId(2), adding(&[9]));
        pass.clear_requests(AttachmentId(1));
        assert!(!pass.has_request(AttachmentId(1)));
        assert!(pass.has_request(AttachmentId(2)));
    }

    #[test]
    fn set_in_progress_twice_blocks_compilation_until_dropped() {
        let pass = pass();
        let table = AttachmentId(5);
        assert!(pass.set_in_progress(table));
        assert!(pass.in_progress(table));
        assert!(!pass.set_in_progress(table));
        assert!(pass.in_progress(table));

        pass.append_request(table, adding(&[1]));
        assert!(pass.begin_compilation(table).is_none());
        assert!(pass.has_request(table));

        pass.drop_in_progress(table);
        assert!(!pass.in_progress(table));
        let input = pass.begin_compilation(table).unwrap();
        assert_eq!(input.materials.len(), 1);
        assert!(pass.in_progress(table));
    }

    #[test]
    fn nothing_to_compile_leaves_table_idle() {
        let pass = pass();
        assert!(pass.begin_compilation(AttachmentId(3)).is_none());
        assert!(!pass.in_progress(AttachmentId(3)));
    }

    #[test]
    fn order_increments() {
        let pass = pass();
        assert_eq!(pass.increment_order(), 1);
        assert_eq!(pass.increment_order(), 2);
    }
}
