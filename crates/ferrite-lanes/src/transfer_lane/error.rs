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

use ferrite_core::gpu::DriverError;
use thiserror::Error;

/// Lifecycle of a [`TransferResource`](super::TransferResource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Constructed, no driver object exists yet.
    Created,
    /// Driver objects exist and the shared allocation is laid out.
    Initialized,
    /// Every object is bound to memory.
    Allocated,
    /// Initial contents are written or staged.
    Uploaded,
    /// Objects were published; terminal.
    Compiled,
    /// Everything was released; terminal.
    Invalidated,
}

impl TransferState {
    /// Returns `true` for `Compiled` and `Invalidated`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Compiled | Self::Invalidated)
    }
}

/// Errors of the transfer pipeline.
///
/// Every error except [`TransferError::InvalidState`] invalidates the
/// transfer before it is returned.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A driver call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// No memory type can back the objects.
    #[error("No memory type satisfies type mask {mask:#x}")]
    NoMemoryType {
        /// The intersected type mask.
        mask: u32,
    },

    /// Writing initial contents through a host mapping failed.
    #[error("Failed to write mapped memory: {0}")]
    Map(DriverError),

    /// The operation was called out of order.
    #[error("'{operation}' is not valid in state {state:?}")]
    InvalidState {
        /// The refused operation.
        operation: &'static str,
        /// State at the time of the call.
        state: TransferState,
    },

    /// The transfer was invalidated earlier.
    #[error("The transfer was invalidated")]
    Invalidated,
}
