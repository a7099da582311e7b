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

//! Traits and data structures for active resource monitoring.
//!
//! A monitor polls a resource (device memory, a GPU queue) for a snapshot of
//! its state; the telemetry service owns a set of monitors and asks each one
//! for a report.

use std::borrow::Cow;
use std::fmt::Debug;

/// A stateful object that knows how to query one system resource.
///
/// Monitors typically live in `ferrite-infra` and are registered with the
/// `TelemetryService` of `ferrite-telemetry`.
pub trait ResourceMonitor: Send + Sync + Debug + 'static {
    /// Returns a unique, human-readable identifier for this monitor instance.
    fn monitor_id(&self) -> Cow<'static, str>;

    /// Returns the general type of resource being monitored.
    fn resource_type(&self) -> MonitoredResourceType;

    /// Returns a snapshot of the current usage data.
    fn get_usage_report(&self) -> ResourceUsageReport;

    /// Allows downcasting to a concrete monitor type.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Polls the resource. Monitors that update passively keep the default.
    fn update(&self) {}
}

/// The types of resources that can be monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoredResourceType {
    /// Device memory allocated through the engine allocator.
    DeviceMemory,
    /// Driver objects and queue activity of a GPU.
    Gpu,
}

/// A unified usage report, in bytes or objects depending on the resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsageReport {
    /// Amount currently in use.
    pub current_bytes: u64,
    /// Peak amount ever in use simultaneously, if tracked.
    pub peak_bytes: Option<u64>,
    /// Total capacity, if known.
    pub total_capacity_bytes: Option<u64>,
}

impl ResourceUsageReport {
    /// Fraction of the known capacity currently in use.
    pub fn utilization(&self) -> Option<f64> {
        match self.total_capacity_bytes {
            Some(0) | None => None,
            Some(total) => Some(self.current_bytes as f64 / total as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_requires_capacity() {
        let report = ResourceUsageReport {
            current_bytes: 256,
            peak_bytes: Some(512),
            total_capacity_bytes: Some(1024),
        };
        assert_eq!(report.utilization(), Some(0.25));

        let unknown = ResourceUsageReport {
            current_bytes: 256,
            ..Default::default()
        };
        assert_eq!(unknown.utilization(), None);
    }
}
