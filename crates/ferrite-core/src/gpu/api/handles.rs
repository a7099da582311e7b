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

//! Opaque identifiers for driver objects.
//!
//! Every object created through a [`GpuDriver`](crate::gpu::GpuDriver) is named by
//! one of these ids. They carry no ownership: destroying the object is the job of
//! whoever created it (see the long-lived wrappers in `ferrite-data`).

macro_rules! driver_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);
    };
}

driver_id!(
    /// An opaque handle to a driver buffer object.
    BufferId
);
driver_id!(
    /// An opaque handle to a driver image object.
    ImageId
);
driver_id!(
    /// An opaque handle to one device memory allocation.
    MemoryId
);
driver_id!(
    /// An opaque handle to a command pool bound to one queue family.
    CommandPoolId
);
driver_id!(
    /// An opaque handle to a recorded (or recording) command buffer.
    CommandBufferId
);
driver_id!(
    /// An opaque handle to a fence used to observe submission completion.
    FenceId
);
driver_id!(
    /// An opaque handle to a semaphore used to order submissions across queues.
    SemaphoreId
);
driver_id!(
    /// An opaque handle to one device queue.
    QueueId
);
