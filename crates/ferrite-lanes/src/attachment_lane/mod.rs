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

//! Attachment lane - typed GPU resource slots of render passes.
//!
//! An [`Attachment`] declares a resource role once; every frame gets its own
//! [`AttachmentHandle`] that receives input, resolves the backing device
//! object and writes descriptor bindings pointing at it.

use crate::frame::FrameContext;
use crate::render_pass_lane::RenderPassData;
use crate::transfer_lane::TransferResource;
use ferrite_core::gpu::BufferId;
use ferrite_data::{MaterialInputData, VertexData};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

mod compilation;
mod material;
mod transfer;
mod vertex;

pub use compilation::*;
pub use material::*;
pub use transfer::*;
pub use vertex::*;

/// Process-unique identity of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub usize);

impl AttachmentId {
    /// Returns a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Data a frame hands to an attachment handle.
///
/// Each attachment kind accepts exactly one variant.
pub enum AttachmentInputData {
    /// CPU-side geometry, accepted by [`VertexBufferAttachment`].
    Vertices(Arc<VertexData>),
    /// Added and removed materials, accepted by
    /// [`MaterialCompilationAttachment`].
    Materials(MaterialInputData),
    /// A resource bundle to upload, accepted by [`TransferAttachment`].
    Transfer(TransferResource),
}

impl AttachmentInputData {
    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Vertices(_) => "Vertices",
            Self::Materials(_) => "Materials",
            Self::Transfer(_) => "Transfer",
        }
    }
}

impl fmt::Debug for AttachmentInputData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertices(data) => write!(f, "Vertices({} vertices)", data.data.len()),
            Self::Materials(input) => write!(
                f,
                "Materials(+{}, -{})",
                input.materials.len(),
                input.removed.len()
            ),
            Self::Transfer(transfer) => write!(f, "Transfer({})", transfer.resource().name()),
        }
    }
}

/// Driver descriptor record for a buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBufferInfo {
    /// The bound buffer.
    pub buffer: BufferId,
    /// Offset of the bound range.
    pub offset: u64,
    /// Size of the bound range.
    pub range: u64,
}

impl Default for DescriptorBufferInfo {
    fn default() -> Self {
        Self {
            buffer: BufferId(usize::MAX),
            offset: 0,
            range: 0,
        }
    }
}

/// Remembers what every descriptor of a pass was last written with.
///
/// Keyed by `(slot, index, is_external)`.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    written: Mutex<HashMap<(u32, u32, bool), DescriptorBufferInfo>>,
}

impl DescriptorCache {
    /// Creates an empty cache; every descriptor starts dirty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the descriptor was never written or was written
    /// with something other than `current`.
    pub fn is_dirty(&self, slot: u32, index: u32, is_external: bool, current: &DescriptorBufferInfo) -> bool {
        match self.written.lock() {
            Ok(written) => written.get(&(slot, index, is_external)) != Some(current),
            Err(e) => {
                log::error!("Mutex poisoned (descriptor cache): {}", e);
                true
            }
        }
    }

    /// Records that the descriptor now points at `info`.
    pub fn record(&self, slot: u32, index: u32, is_external: bool, info: DescriptorBufferInfo) {
        match self.written.lock() {
            Ok(mut written) => {
                written.insert((slot, index, is_external), info);
            }
            Err(e) => log::error!("Mutex poisoned (descriptor cache): {}", e),
        }
    }

    /// Forgets every write, for instance after the descriptor set was
    /// reallocated.
    pub fn clear(&self) {
        if let Ok(mut written) = self.written.lock() {
            written.clear();
        }
    }
}

/// A resource role in one or more render passes.
///
/// Attachments are shared between passes and frames and hold no per-frame
/// state; that lives in the handle made by
/// [`Attachment::make_frame_handle`].
pub trait Attachment: Send + Sync + 'static {
    /// Identity used to match input submissions and pass requirements.
    fn id(&self) -> AttachmentId;

    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Creates the handle through which `frame` uses this attachment.
    ///
    /// # Arguments
    ///
    /// * `frame`: The frame the handle belongs to.
    ///
    /// # Returns
    ///
    /// A handle shared by every pass of the frame that requires this
    /// attachment.
    fn make_frame_handle(self: Arc<Self>, frame: &dyn FrameContext) -> Arc<dyn AttachmentHandle>;
}

/// Per-frame state of one attachment.
///
/// Handles are shared between the frame orchestrator and the pass handles
/// that require them, so every method takes `&self`.
pub trait AttachmentHandle: Send + Sync {
    /// The attachment this handle was made from.
    fn attachment_id(&self) -> AttachmentId;

    /// Called once before the frame accepts input.
    ///
    /// Returns `false` if the handle cannot serve the frame.
    fn setup(&self, _frame: &dyn FrameContext) -> bool {
        true
    }

    /// Returns `true` if the frame must not record before input was
    /// submitted to this handle.
    fn is_input_required(&self) -> bool {
        false
    }

    /// Accepts input for this frame.
    ///
    /// The state update is deferred onto the frame through
    /// [`FrameContext::perform`], which then marks the input as submitted.
    ///
    /// # Returns
    ///
    /// `false` without any state change when `data` is not the variant this
    /// attachment expects.
    fn submit_input(&self, frame: &dyn FrameContext, data: AttachmentInputData) -> bool;

    /// Returns `true` if the backing object changed since the descriptor
    /// `(slot, index, is_external)` of `pass` was last written.
    ///
    /// Returns `false` while nothing is resolved, as there is nothing to
    /// write yet.
    fn is_descriptor_dirty(&self, pass: &RenderPassData, slot: u32, index: u32, is_external: bool) -> bool {
        let mut current = DescriptorBufferInfo::default();
        self.describe(index, &mut current) && pass.descriptors().is_dirty(slot, index, is_external, &current)
    }

    /// Fills `out` with the binding of the backing object and records it in
    /// the descriptor cache of `pass`.
    ///
    /// # Returns
    ///
    /// `false` if nothing is resolved yet; the caller skips the binding.
    fn write_descriptor(
        &self,
        pass: &RenderPassData,
        slot: u32,
        index: u32,
        is_external: bool,
        out: &mut DescriptorBufferInfo,
    ) -> bool {
        if !self.describe(index, out) {
            return false;
        }
        pass.descriptors().record(slot, index, is_external, *out);
        true
    }

    /// Writes the current binding for array element `index` into `out`.
    ///
    /// Returns `false` if no backing object is resolved for it.
    fn describe(&self, index: u32, out: &mut DescriptorBufferInfo) -> bool;

    /// Enables downcasting to the concrete handle type.
    fn as_any(&self) -> &dyn Any;
}

// Locks per-frame handle state. A poisoned lock means a task panicked while
// holding it; the state is still structurally valid, so it is recovered.
pub(crate) fn lock_state<T>(state: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| {
        log::warn!("Recovering poisoned attachment state");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(buffer: usize, range: u64) -> DescriptorBufferInfo {
        DescriptorBufferInfo {
            buffer: BufferId(buffer),
            offset: 0,
            range,
        }
    }

    #[test]
    fn descriptors_start_dirty() {
        let cache = DescriptorCache::new();
        assert!(cache.is_dirty(0, 0, false, &info(1, 64)));
    }

    #[test]
    fn recorded_descriptor_is_clean_until_identity_changes() {
        let cache = DescriptorCache::new();
        cache.record(0, 0, false, info(1, 64));
        assert!(!cache.is_dirty(0, 0, false, &info(1, 64)));
        assert!(cache.is_dirty(0, 0, false, &info(2, 64)));
        assert!(cache.is_dirty(0, 0, false, &info(1, 128)));
    }

    #[test]
    fn keys_include_the_external_flag() {
        let cache = DescriptorCache::new();
        cache.record(3, 1, false, info(7, 16));
        assert!(cache.is_dirty(3, 1, true, &info(7, 16)));
        cache.clear();
        assert!(cache.is_dirty(3, 1, false, &info(7, 16)));
    }

    #[test]
    fn attachment_ids_are_unique() {
        let a = AttachmentId::next();
        let b = AttachmentId::next();
        assert_ne!(a, b);
    }
}
