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

//! Periodic sampling of the registered resource monitors.

use crate::monitoring::registry::MonitorRegistry;
use ferrite_core::telemetry::ResourceUsageReport;
use std::time::{Duration, Instant};

/// Samples every registered monitor at most once per interval and keeps the
/// reports of the last sample.
///
/// Meant to be ticked from the frame loop, e.g. after each
/// `FrameScheduler::poll`.
#[derive(Debug)]
pub struct TelemetryService {
    monitors: MonitorRegistry,
    interval: Duration,
    last_sample: Option<Instant>,
    samples: u64,
    latest: Vec<(String, ResourceUsageReport)>,
}

impl TelemetryService {
    /// Creates a service sampling every `interval`. The first tick always
    /// samples.
    pub fn new(interval: Duration) -> Self {
        Self {
            monitors: MonitorRegistry::new(),
            interval,
            last_sample: None,
            samples: 0,
            latest: Vec::new(),
        }
    }

    /// Samples the monitors if the interval elapsed. Returns `true` if it did.
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    /// [`TelemetryService::tick`] with an explicit clock.
    pub fn tick_at(&mut self, now: Instant) -> bool {
        let due = self
            .last_sample
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.sample(now);
        }
        due
    }

    /// Samples the monitors now, regardless of the interval.
    pub fn force_update(&mut self) {
        self.sample(Instant::now());
    }

    fn sample(&mut self, now: Instant) {
        self.monitors.update_all();
        self.latest = self.monitors.reports();
        self.samples += 1;
        self.last_sample = Some(now);

        for (id, report) in &self.latest {
            log::debug!(
                "{}: {} bytes (peak {:?}, capacity {:?})",
                id,
                report.current_bytes,
                report.peak_bytes,
                report.total_capacity_bytes
            );
        }
    }

    /// Reports gathered by the last sample, by monitor id.
    pub fn latest_reports(&self) -> &[(String, ResourceUsageReport)] {
        &self.latest
    }

    /// Report of monitor `id` at the last sample.
    pub fn latest_report(&self, id: &str) -> Option<ResourceUsageReport> {
        self.latest
            .iter()
            .find(|(monitor, _)| monitor == id)
            .map(|(_, report)| *report)
    }

    /// Number of samples taken so far.
    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    /// The monitors sampled by this service.
    pub fn monitor_registry(&self) -> &MonitorRegistry {
        &self.monitors
    }
}

impl Default for TelemetryService {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
