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

//! # Ferrite Infra
//!
//! Concrete drivers for the `GpuDriver` contract of `ferrite-core`.
//!
//! - [`headless`]: a software driver with validation, used by tests and tools.
//! - `vulkan` (feature `vulkan`): a driver for real devices built on `ash`.
//! - [`telemetry`]: monitors reading the engine's device-memory counters.

#![warn(missing_docs)]

pub mod headless;
pub mod telemetry;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use headless::{FailPoint, HeadlessDevice, HeadlessProfile};
pub use telemetry::DeviceMemoryMonitor;
#[cfg(feature = "vulkan")]
pub use vulkan::AshDevice;
