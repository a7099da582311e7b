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

use super::{FrameError, FrameHandle, FrameState, QueueSet, RenderQueue};
use ferrite_core::gpu::FrameSettings;
use ferrite_data::Allocator;
use std::collections::VecDeque;
use std::sync::Arc;

/// Creates frames with increasing generations and keeps at most
/// `max_frames_in_flight` of them submitted at once.
///
/// Frames retire in submission order: each one is finalized as soon as its
/// fence signals and every older frame retired.
#[derive(Debug)]
pub struct FrameScheduler {
    allocator: Arc<Allocator>,
    queues: Arc<QueueSet>,
    settings: FrameSettings,
    last_generation: u64,
    in_flight: VecDeque<FrameHandle>,
}

impl FrameScheduler {
    /// Creates a scheduler over the device of `allocator`.
    pub fn new(allocator: Arc<Allocator>, settings: FrameSettings) -> Result<Self, FrameError> {
        settings.validate()?;
        let queues = Arc::new(QueueSet::new(allocator.device().clone())?);
        log::info!(
            "Frame scheduler ready: {} frames in flight, {} queues",
            settings.max_frames_in_flight,
            queues.len()
        );
        Ok(Self {
            allocator,
            queues,
            settings,
            last_generation: 0,
            in_flight: VecDeque::new(),
        })
    }

    /// Starts the next frame of `render_queue`.
    ///
    /// Blocks on the oldest frame in flight while the limit is reached.
    pub fn begin_frame(&mut self, render_queue: &RenderQueue) -> Result<FrameHandle, FrameError> {
        self.poll()?;
        while self.in_flight.len() >= self.settings.max_frames_in_flight {
            self.retire_oldest()?;
        }

        self.last_generation += 1;
        Ok(FrameHandle::new(
            self.last_generation,
            self.allocator.clone(),
            self.queues.clone(),
            self.settings.clone(),
            render_queue,
        ))
    }

    /// Records `frame` if that was not done yet, submits it and keeps it
    /// until it completes. Returns its generation.
    pub fn submit_frame(&mut self, mut frame: FrameHandle) -> Result<u64, FrameError> {
        if frame.state() == FrameState::Setup {
            frame.record()?;
        }
        frame.submit()?;
        let generation = frame.generation();
        self.in_flight.push_back(frame);
        Ok(generation)
    }

    /// Finalizes the frames that completed, oldest first. Returns how many
    /// retired.
    pub fn poll(&mut self) -> Result<usize, FrameError> {
        let mut retired = 0;
        while let Some(frame) = self.in_flight.front() {
            if !frame.is_complete()? {
                break;
            }
            self.retire_oldest()?;
            retired += 1;
        }
        Ok(retired)
    }

    /// Waits for every frame in flight and finalizes them.
    pub fn wait_idle(&mut self) -> Result<(), FrameError> {
        while !self.in_flight.is_empty() {
            self.retire_oldest()?;
        }
        Ok(())
    }

    fn retire_oldest(&mut self) -> Result<(), FrameError> {
        if let Some(mut frame) = self.in_flight.pop_front() {
            log::trace!("Retiring frame {}", frame.generation());
            frame.finalize()?;
        }
        Ok(())
    }

    /// Number of submitted frames not retired yet.
    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Generations of the frames in flight, oldest first.
    pub fn generations_in_flight(&self) -> Vec<u64> {
        self.in_flight.iter().map(FrameHandle::generation).collect()
    }

    /// Generation of the last frame started.
    pub fn last_generation(&self) -> u64 {
        self.last_generation
    }

    /// The device queues.
    pub fn queues(&self) -> &Arc<QueueSet> {
        &self.queues
    }

    /// The allocator frames record with.
    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// The validated settings.
    pub fn settings(&self) -> &FrameSettings {
        &self.settings
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Fail to drain frames on shutdown: {}", e);
        }
    }
}
