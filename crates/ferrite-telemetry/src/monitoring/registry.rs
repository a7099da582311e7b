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

//! Registry for managing resource monitors.

use ferrite_core::telemetry::{ResourceMonitor, ResourceUsageReport};
use std::sync::{Arc, Mutex, MutexGuard};

/// A thread-safe registry for resource monitors.
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    monitors: Arc<Mutex<Vec<Arc<dyn ResourceMonitor>>>>,
}

impl MonitorRegistry {
    /// Creates a new, empty monitor registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn ResourceMonitor>>> {
        self.monitors.lock().unwrap_or_else(|poisoned| {
            log::warn!("Monitor registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Registers a new resource monitor.
    ///
    /// A monitor whose id is already registered replaces the previous one.
    pub fn register(&self, monitor: Arc<dyn ResourceMonitor>) {
        let id = monitor.monitor_id();
        let mut monitors = self.lock();
        monitors.retain(|existing| existing.monitor_id() != id);
        monitors.push(monitor);
        log::info!("Registered resource monitor: {}", id);
    }

    /// Removes the monitor registered under `id`. Returns `true` if one was.
    pub fn unregister(&self, id: &str) -> bool {
        let mut monitors = self.lock();
        let before = monitors.len();
        monitors.retain(|monitor| monitor.monitor_id() != id);
        before != monitors.len()
    }

    /// Calls the `update` method on all registered monitors.
    pub fn update_all(&self) {
        for monitor in self.lock().iter() {
            monitor.update();
        }
    }

    /// The monitor registered under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ResourceMonitor>> {
        self.lock().iter().find(|monitor| monitor.monitor_id() == id).cloned()
    }

    /// Returns a clone of all registered monitors.
    pub fn get_all_monitors(&self) -> Vec<Arc<dyn ResourceMonitor>> {
        self.lock().clone()
    }

    /// The current usage report of every monitor, by id.
    pub fn reports(&self) -> Vec<(String, ResourceUsageReport)> {
        self.lock()
            .iter()
            .map(|monitor| (monitor.monitor_id().into_owned(), monitor.get_usage_report()))
            .collect()
    }

    /// Number of registered monitors.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no monitor is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
