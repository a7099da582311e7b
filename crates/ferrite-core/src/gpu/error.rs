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

//! Error types of the driver contract and of the settings loader.

use crate::gpu::api::MemoryId;
use std::fmt;

/// The kind of driver object an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A buffer.
    Buffer,
    /// An image.
    Image,
    /// A device memory allocation.
    Memory,
    /// A command pool.
    CommandPool,
    /// A command buffer.
    CommandBuffer,
    /// A fence.
    Fence,
    /// A semaphore.
    Semaphore,
    /// A queue.
    Queue,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Buffer => "buffer",
            ObjectKind::Image => "image",
            ObjectKind::Memory => "device memory",
            ObjectKind::CommandPool => "command pool",
            ObjectKind::CommandBuffer => "command buffer",
            ObjectKind::Fence => "fence",
            ObjectKind::Semaphore => "semaphore",
            ObjectKind::Queue => "queue",
        };
        f.write_str(name)
    }
}

/// A failed driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver refused to create an object.
    CreationFailed {
        /// What was being created.
        kind: ObjectKind,
        /// Backend-specific details.
        details: String,
    },
    /// A handle did not name a live object of the expected kind.
    InvalidHandle {
        /// The expected kind.
        kind: ObjectKind,
        /// The raw handle value.
        id: usize,
    },
    /// No memory left in the requested memory type.
    OutOfDeviceMemory {
        /// Requested size in bytes.
        requested: u64,
        /// Memory type the allocation targeted.
        memory_type_index: u32,
    },
    /// No memory type satisfies both the object's type mask and the usage.
    NoMemoryType {
        /// The memory-type mask that was searched.
        type_mask: u32,
    },
    /// Mapping device memory into the host address space failed.
    MapFailed {
        /// The allocation that could not be mapped.
        memory: MemoryId,
        /// Backend-specific details.
        details: String,
    },
    /// Binding an object to memory was rejected.
    BindFailed(String),
    /// A command buffer could not be begun, recorded or ended.
    RecordingFailed(String),
    /// A queue submission was rejected.
    SubmitFailed(String),
    /// Waiting on a fence timed out.
    Timeout,
    /// The device was lost.
    DeviceLost,
    /// Any other backend failure.
    Backend(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::CreationFailed { kind, details } => {
                write!(f, "Failed to create {kind}: {details}")
            }
            DriverError::InvalidHandle { kind, id } => {
                write!(f, "Invalid {kind} handle: {id}")
            }
            DriverError::OutOfDeviceMemory {
                requested,
                memory_type_index,
            } => write!(
                f,
                "Out of device memory: {requested} bytes requested from memory type {memory_type_index}"
            ),
            DriverError::NoMemoryType { type_mask } => {
                write!(f, "No memory type matches mask {type_mask:#x}")
            }
            DriverError::MapFailed { memory, details } => {
                write!(f, "Failed to map memory {memory:?}: {details}")
            }
            DriverError::BindFailed(msg) => write!(f, "Failed to bind memory: {msg}"),
            DriverError::RecordingFailed(msg) => {
                write!(f, "Command recording failed: {msg}")
            }
            DriverError::SubmitFailed(msg) => write!(f, "Queue submission failed: {msg}"),
            DriverError::Timeout => write!(f, "Timed out waiting for the device."),
            DriverError::DeviceLost => write!(f, "The device was lost."),
            DriverError::Backend(msg) => write!(f, "Backend-specific driver error: {msg}"),
        }
    }
}

impl std::error::Error for DriverError {}

/// An error raised while loading [`FrameSettings`](crate::gpu::api::FrameSettings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// The document could not be parsed.
    Parse(String),
    /// A value is outside its allowed range.
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Parse(msg) => write!(f, "Failed to parse frame settings: {msg}"),
            SettingsError::Invalid { field, reason } => {
                write!(f, "Invalid frame setting '{field}': {reason}")
            }
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_creation_failed() {
        let err = DriverError::CreationFailed {
            kind: ObjectKind::Buffer,
            details: "out of handles".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to create buffer: out of handles");
    }

    #[test]
    fn display_out_of_memory() {
        let err = DriverError::OutOfDeviceMemory {
            requested: 4096,
            memory_type_index: 1,
        };
        assert_eq!(
            err.to_string(),
            "Out of device memory: 4096 bytes requested from memory type 1"
        );
    }

    #[test]
    fn display_invalid_handle() {
        let err = DriverError::InvalidHandle {
            kind: ObjectKind::Memory,
            id: 7,
        };
        assert_eq!(err.to_string(), "Invalid device memory handle: 7");
    }

    #[test]
    fn display_settings_error() {
        let err = SettingsError::Invalid {
            field: "material_slots",
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid frame setting 'material_slots': must be at least 1"
        );
    }
}
