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

//! A minimal frame orchestrator for driving lanes in tests.

#![allow(dead_code)]

use ferrite_core::gpu::{FrameSettings, GpuDriver, QueueFamilyLayout, QueueOperations, SubmitInfo};
use ferrite_data::{Allocator, DeviceQueue, Fence};
use ferrite_infra::HeadlessDevice;
use ferrite_lanes::{AttachmentId, FrameContext, FrameTask};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub struct TestFrame {
    pub device: Arc<HeadlessDevice>,
    allocator: Arc<Allocator>,
    families: QueueFamilyLayout,
    settings: FrameSettings,
    generation: u64,
    tasks: Mutex<Vec<FrameTask>>,
    submitted: Mutex<HashSet<AttachmentId>>,
}

impl TestFrame {
    pub fn new(device: HeadlessDevice, generation: u64) -> Self {
        let device = Arc::new(device);
        let allocator = Arc::new(Allocator::new(device.clone()));
        let families = QueueFamilyLayout::select(&device.queue_families()).unwrap();
        Self {
            device,
            allocator,
            families,
            settings: FrameSettings {
                validate_ownership_transfers: true,
                ..FrameSettings::default()
            },
            generation,
            tasks: Mutex::new(Vec::new()),
            submitted: Mutex::new(HashSet::new()),
        }
    }

    pub fn discrete() -> Self {
        Self::new(HeadlessDevice::discrete(), 1)
    }

    pub fn unified() -> Self {
        Self::new(HeadlessDevice::unified(), 1)
    }

    /// Runs deferred tasks, including the ones they queue, until none is left.
    pub fn run_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
            if tasks.is_empty() {
                return ran;
            }
            for task in tasks {
                task(self);
                ran += 1;
            }
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Submits `commands` to the first queue of the family serving `ops` and
    /// waits for them.
    pub fn execute(&self, ops: QueueOperations, commands: Vec<ferrite_core::gpu::CommandBufferId>) {
        let family = self.families.family_for(ops);
        let driver: Arc<dyn GpuDriver> = self.device.clone();
        let queue = DeviceQueue::new(driver.clone(), family, 0).unwrap();
        let fence = Fence::new(driver).unwrap();
        queue
            .submit(
                &[SubmitInfo {
                    command_buffers: commands,
                    ..Default::default()
                }],
                Some(&fence),
            )
            .unwrap();
        fence.wait(self.settings.fence_timeout_ns).unwrap();
    }
}

impl FrameContext for TestFrame {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    fn queue_families(&self) -> &QueueFamilyLayout {
        &self.families
    }

    fn settings(&self) -> &FrameSettings {
        &self.settings
    }

    fn perform(&self, task: FrameTask) {
        self.tasks.lock().unwrap().push(task);
    }

    fn set_input_submitted(&self, attachment: AttachmentId) {
        self.submitted.lock().unwrap().insert(attachment);
    }

    fn is_input_submitted(&self, attachment: AttachmentId) -> bool {
        self.submitted.lock().unwrap().contains(&attachment)
    }
}
