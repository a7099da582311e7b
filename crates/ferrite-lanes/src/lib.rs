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

//! # Ferrite Lanes
//!
//! Hot-path execution of the frame core: uploading resource bundles into
//! device memory, the per-frame attachment handles that receive CPU data, and
//! the render passes that record command buffers for one frame.
//!
//! Lanes never submit work themselves. They record into command buffers and
//! hand them to the frame orchestrator in `ferrite-agents`, which owns the
//! queues and the fences.

#![warn(missing_docs)]

pub mod attachment_lane;
pub mod frame;
pub mod render_pass_lane;
pub mod transfer_lane;

pub use attachment_lane::*;
pub use frame::{FrameContext, FrameTask};
pub use render_pass_lane::*;
pub use transfer_lane::*;
