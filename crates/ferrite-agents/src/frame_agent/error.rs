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

use ferrite_core::gpu::{DriverError, SettingsError};
use ferrite_lanes::{AttachmentId, PassError};
use thiserror::Error;

/// Lifecycle of a [`FrameHandle`](super::FrameHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// Accepting attachment input.
    Setup,
    /// Every pass recorded its command buffers.
    Recorded,
    /// Command buffers are on the queues.
    Submitted,
    /// Pass handles were finalized; terminal.
    Finalized,
}

/// Errors of frame orchestration.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A driver call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A pass could not join the render queue.
    #[error(transparent)]
    Pass(#[from] PassError),

    /// The frame settings are out of range.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// No queue family supports graphics and presentation.
    #[error("The device exposes no graphics and present capable queue family")]
    NoQueueFamily,

    /// The attachment is not used by any pass of the frame.
    #[error("Attachment {0:?} is not part of the frame")]
    UnknownAttachment(AttachmentId),

    /// The attachment refused the input.
    #[error("Attachment '{name}' rejected {kind} input")]
    InputRejected {
        /// Name of the attachment.
        name: String,
        /// Kind of the rejected input.
        kind: &'static str,
    },

    /// A pass the frame cannot run without produced no commands.
    #[error("Pass '{0}' failed; the frame was abandoned")]
    FatalPass(String),

    /// The operation was called out of order.
    #[error("Frame {generation} cannot {operation} while {state:?}")]
    InvalidState {
        /// Generation of the frame.
        generation: u64,
        /// The refused operation.
        operation: &'static str,
        /// State at the time of the call.
        state: FrameState,
    },
}
