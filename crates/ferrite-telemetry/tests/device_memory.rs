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

use ferrite_core::memory::{record_allocation, record_free};
use ferrite_core::telemetry::{MonitoredResourceType, ResourceMonitor};
use ferrite_infra::DeviceMemoryMonitor;
use ferrite_telemetry::{init_test_logging, TelemetryService};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn service_samples_device_memory() {
    init_test_logging();
    let mut service = TelemetryService::new(Duration::ZERO);
    let monitor = Arc::new(DeviceMemoryMonitor::new("device_memory".to_string(), Some(1 << 30)));
    service.monitor_registry().register(monitor.clone());

    record_allocation(4096, false);
    assert!(service.tick());
    record_free(4096);
    assert_eq!(service.sample_count(), 1);
    assert!(service.latest_report("device_memory").is_some());

    let registered = service.monitor_registry().get("device_memory").unwrap();
    assert_eq!(registered.resource_type(), MonitoredResourceType::DeviceMemory);

    let report = monitor.get_memory_report().unwrap();
    assert_eq!(report.sample_count, 1);
    assert!(report.stats.peak_bytes >= 4096);
    assert_eq!(monitor.get_usage_report().total_capacity_bytes, Some(1 << 30));
}
