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

//! A software driver that runs on the host.
//!
//! [`HeadlessDevice`] implements the whole [`GpuDriver`](ferrite_core::gpu::GpuDriver)
//! contract without a GPU. Tests and tools use it to exercise allocation,
//! staging uploads and frame submission, then inspect what reached "device"
//! memory and which validation rules were broken.

mod device;
mod failure;
mod profile;
mod state;

pub use device::HeadlessDevice;
pub use failure::FailPoint;
pub use profile::HeadlessProfile;
pub use state::{Binding, LiveObjects, RecordedCommand, SubmissionRecord};
