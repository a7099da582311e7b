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

//! Global counters for device-memory allocations.
//!
//! The `Allocator` in `ferrite-data` records every driver allocation and free
//! here, and the transfer pipeline records the bytes it pushes through staging
//! buffers. Any part of the engine can read a consistent-enough snapshot with
//! [`get_device_memory_stats`]; the monitor in `ferrite-infra` turns it into a
//! [`ResourceUsageReport`](crate::telemetry::ResourceUsageReport).

use std::sync::atomic::{AtomicU64, Ordering};

// --- Global Device Memory Counters ---

/// Bytes of device memory currently allocated through the engine's allocator.
pub static CURRENT_DEVICE_BYTES: AtomicU64 = AtomicU64::new(0);

/// Peak number of device bytes allocated simultaneously.
pub static PEAK_DEVICE_BYTES: AtomicU64 = AtomicU64::new(0);

/// Number of successful device allocation calls.
pub static TOTAL_DEVICE_ALLOCATIONS: AtomicU64 = AtomicU64::new(0);

/// Number of device free calls.
pub static TOTAL_DEVICE_FREES: AtomicU64 = AtomicU64::new(0);

/// Number of allocations made for a single dedicated buffer or image.
pub static DEDICATED_ALLOCATIONS: AtomicU64 = AtomicU64::new(0);

/// Cumulative bytes written into staging buffers.
pub static STAGING_BYTES_LIFETIME: AtomicU64 = AtomicU64::new(0);

/// A snapshot of the device-memory counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceMemoryStats {
    /// Bytes currently allocated.
    pub current_bytes: u64,
    /// Peak bytes allocated simultaneously.
    pub peak_bytes: u64,
    /// Successful allocation calls.
    pub allocations: u64,
    /// Free calls.
    pub frees: u64,
    /// Allocations bound to a single object.
    pub dedicated_allocations: u64,
    /// Bytes ever written through staging buffers.
    pub staging_bytes: u64,
}

impl DeviceMemoryStats {
    /// Number of allocations that have not been freed yet.
    pub fn live_allocations(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }
}

/// Records a successful allocation of `size` bytes.
pub fn record_allocation(size: u64, dedicated: bool) {
    let current = CURRENT_DEVICE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_DEVICE_BYTES.fetch_max(current, Ordering::Relaxed);
    TOTAL_DEVICE_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    if dedicated {
        DEDICATED_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    }
}

/// Records that an allocation of `size` bytes was freed.
pub fn record_free(size: u64) {
    // Saturate so a mismatched free can never wrap the counter.
    let _ = CURRENT_DEVICE_BYTES.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(size))
    });
    TOTAL_DEVICE_FREES.fetch_add(1, Ordering::Relaxed);
}

/// Records `size` bytes written into a staging buffer.
pub fn record_staging(size: u64) {
    STAGING_BYTES_LIFETIME.fetch_add(size, Ordering::Relaxed);
}

/// Takes a snapshot of all device-memory counters.
pub fn get_device_memory_stats() -> DeviceMemoryStats {
    DeviceMemoryStats {
        current_bytes: CURRENT_DEVICE_BYTES.load(Ordering::Relaxed),
        peak_bytes: PEAK_DEVICE_BYTES.load(Ordering::Relaxed),
        allocations: TOTAL_DEVICE_ALLOCATIONS.load(Ordering::Relaxed),
        frees: TOTAL_DEVICE_FREES.load(Ordering::Relaxed),
        dedicated_allocations: DEDICATED_ALLOCATIONS.load(Ordering::Relaxed),
        staging_bytes: STAGING_BYTES_LIFETIME.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The counters are process-wide and other tests allocate concurrently, so
    // only monotonic properties are asserted here.

    #[test]
    fn test_allocation_counters_advance() {
        let before = get_device_memory_stats();
        record_allocation(4096, true);
        record_staging(128);
        let after = get_device_memory_stats();

        assert!(after.allocations > before.allocations);
        assert!(after.dedicated_allocations > before.dedicated_allocations);
        assert!(after.staging_bytes >= before.staging_bytes + 128);
        assert!(after.peak_bytes >= 4096);

        record_free(4096);
        assert!(get_device_memory_stats().frees > before.frees);
    }

    #[test]
    fn test_live_allocations_saturates() {
        let stats = DeviceMemoryStats {
            allocations: 1,
            frees: 3,
            ..Default::default()
        };
        assert_eq!(stats.live_allocations(), 0);
    }
}
