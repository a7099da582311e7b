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

//! Acts as the **[A]gent** driving frame execution.
//!
//! The lanes record; this module decides when. It owns the device queues,
//! runs the deferred attachment tasks on the orchestrating thread, orders the
//! pass handles, chains their submissions with semaphores when consecutive
//! passes run on different queue families, and retires frames once their
//! fence signals.

mod error;
mod frame;
mod queues;
mod render_queue;
mod scheduler;

pub use error::*;
pub use frame::*;
pub use queues::*;
pub use render_queue::*;
pub use scheduler::*;
