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

//! Device memory resource monitor.
//!
//! Reads the counters the allocator maintains in `ferrite_core::memory` and
//! keeps the latest snapshot around for reporting.

use std::borrow::Cow;
use std::sync::Mutex;

use ferrite_core::memory::{get_device_memory_stats, DeviceMemoryStats};
use ferrite_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};

/// A detailed snapshot taken by [`DeviceMemoryMonitor::update`](ResourceMonitor::update).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceMemoryReport {
    /// The raw counters at sampling time.
    pub stats: DeviceMemoryStats,
    /// Bytes allocated since the previous sample, zero if usage went down.
    pub allocation_delta_bytes: u64,
    /// Number of samples taken so far.
    pub sample_count: u64,
}

#[derive(Debug, Default)]
struct MonitorState {
    last_report: Option<DeviceMemoryReport>,
    last_bytes: u64,
    sample_count: u64,
}

/// Device memory resource monitor.
#[derive(Debug)]
pub struct DeviceMemoryMonitor {
    id: String,
    capacity_bytes: Option<u64>,
    state: Mutex<MonitorState>,
}

impl DeviceMemoryMonitor {
    /// Creates a monitor. `capacity_bytes` is usually the sum of the device heaps.
    pub fn new(id: String, capacity_bytes: Option<u64>) -> Self {
        Self {
            id,
            capacity_bytes,
            state: Mutex::new(MonitorState {
                last_bytes: get_device_memory_stats().current_bytes,
                ..Default::default()
            }),
        }
    }

    /// Returns the latest detailed report, if the monitor was updated at least once.
    pub fn get_memory_report(&self) -> Option<DeviceMemoryReport> {
        self.state.lock().ok().and_then(|state| state.last_report)
    }

    fn update_internal_stats(&self) {
        let stats = get_device_memory_stats();
        let Ok(mut state) = self.state.lock() else {
            log::warn!("Device memory monitor '{}' is poisoned", self.id);
            return;
        };
        let delta = stats.current_bytes.saturating_sub(state.last_bytes);
        state.last_bytes = stats.current_bytes;
        state.sample_count += 1;
        state.last_report = Some(DeviceMemoryReport {
            stats,
            allocation_delta_bytes: delta,
            sample_count: state.sample_count,
        });
    }
}

impl ResourceMonitor for DeviceMemoryMonitor {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Owned(self.id.clone())
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::DeviceMemory
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        let stats = get_device_memory_stats();
        ResourceUsageReport {
            current_bytes: stats.current_bytes,
            peak_bytes: Some(stats.peak_bytes),
            total_capacity_bytes: self.capacity_bytes,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn update(&self) {
        self.update_internal_stats();
    }
}
