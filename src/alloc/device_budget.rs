//! Per-device VRAM/staging budget tracking wrapped around an `Allocator`
//! (spec §4.6, invariant B2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::budget::ResourceBudget;
use crate::config::CacheSystemConfig;
use crate::device::{Event, EventBus, SubscriptionId};

/// Snapshot taken at `on_frame_start`, compared against at `on_frame_end` to
/// compute the per-frame allocation delta (invariant B2).
#[derive(Debug, Clone, Copy, Default)]
struct FrameSnapshot {
    total_allocated: u64,
    staging_in_use: u64,
    allocation_count: u64,
}

/// Result of `on_frame_end`, reported to callers who want per-frame
/// telemetry beyond the warning log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDelta {
    pub allocated_this_frame: u64,
    pub freed_this_frame: u64,
    pub net_delta: i64,
}

/// Wraps an `Allocator`'s `DeviceMemory` usage and a `StagingQuota` budget,
/// with optional automatic frame-delta tracking via an `EventBus`.
pub struct DeviceBudget {
    device_memory: ResourceBudget,
    staging_quota: ResourceBudget,
    frame_delta_warning_threshold: u64,
    allocation_count: AtomicU64,
    snapshot: Mutex<FrameSnapshot>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl DeviceBudget {
    /// `vram_bytes` is the total device-local heap size detected from the
    /// physical device (`Device::total_device_local_heap_bytes`); the
    /// `DeviceMemory` budget defaults to `device_budget_fraction` of it.
    pub fn new(config: &CacheSystemConfig, vram_bytes: u64) -> Self {
        let limit = (vram_bytes as f64 * config.device_budget_fraction as f64) as u64;
        let warning = (vram_bytes as f64 * config.device_warning_fraction as f64) as u64;
        Self {
            device_memory: ResourceBudget::new(
                "DeviceMemory",
                limit,
                warning,
                config.device_budget_strict,
            ),
            staging_quota: ResourceBudget::new(
                "StagingQuota",
                config.staging_quota_bytes,
                config.staging_quota_bytes * 3 / 4,
                true,
            ),
            frame_delta_warning_threshold: config.frame_delta_warning_threshold,
            allocation_count: AtomicU64::new(0),
            snapshot: Mutex::new(FrameSnapshot::default()),
            subscription: Mutex::new(None),
        }
    }

    pub fn try_reserve_device_memory(&self, bytes: u64) -> bool {
        let ok = self.device_memory.try_reserve(bytes);
        if ok {
            self.allocation_count.fetch_add(1, Ordering::AcqRel);
        }
        ok
    }

    pub fn release_device_memory(&self, bytes: u64) {
        self.device_memory.release(bytes);
        self.allocation_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Whether the `DeviceMemory` budget is strict (hard-fails over budget)
    /// or advisory (warns and proceeds).
    pub fn device_memory_strict(&self) -> bool {
        self.device_memory.strict()
    }

    /// Unconditionally reserve `bytes` against `DeviceMemory`, logging a
    /// warning. Used when the budget is non-strict and a `try_reserve`
    /// already failed (spec §7: "OverBudget under non-strict mode is
    /// converted to a warning and the allocation proceeds").
    pub fn force_reserve_device_memory(&self, bytes: u64) {
        self.device_memory.force_reserve(bytes);
        self.allocation_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn try_reserve_staging_quota(&self, bytes: u64) -> bool {
        self.staging_quota.try_reserve(bytes)
    }

    pub fn release_staging_quota(&self, bytes: u64) {
        self.staging_quota.release(bytes);
    }

    pub fn device_memory_usage(&self) -> u64 {
        self.device_memory.usage()
    }

    pub fn device_memory_limit(&self) -> u64 {
        self.device_memory.limit_bytes()
    }

    pub fn staging_quota_usage(&self) -> u64 {
        self.staging_quota.usage()
    }

    pub fn on_frame_start(&self) {
        *self.snapshot.lock() = FrameSnapshot {
            total_allocated: self.device_memory.usage(),
            staging_in_use: self.staging_quota.usage(),
            allocation_count: self.allocation_count.load(Ordering::Acquire),
        };
    }

    pub fn on_frame_end(&self) -> FrameDelta {
        let before = *self.snapshot.lock();
        let after_total = self.device_memory.usage();
        let allocated_this_frame = after_total.saturating_sub(before.total_allocated);
        let freed_this_frame = before.total_allocated.saturating_sub(after_total);
        let net_delta = after_total as i64 - before.total_allocated as i64;

        if allocated_this_frame > self.frame_delta_warning_threshold {
            log::warn!(
                "[device-budget] allocated {} bytes this frame, above warning threshold {}",
                allocated_this_frame,
                self.frame_delta_warning_threshold
            );
        }

        FrameDelta {
            allocated_this_frame,
            freed_this_frame,
            net_delta,
        }
    }

    /// Subscribe to `FrameStart`/`FrameEnd` on `bus` so `on_frame_start`/
    /// `on_frame_end` fire automatically. Replaces any existing subscription.
    pub fn bind_event_bus(self: &Arc<Self>, bus: &dyn EventBus) {
        let weak_self = Arc::downgrade(self);
        let id = bus.subscribe(Box::new(move |event| {
            let Some(budget) = weak_self.upgrade() else {
                return;
            };
            match event {
                Event::FrameStart { .. } => budget.on_frame_start(),
                Event::FrameEnd { .. } => {
                    budget.on_frame_end();
                }
                Event::DeviceInvalidation => {}
            }
        }));
        *self.subscription.lock() = Some(id);
    }

    pub fn unbind_event_bus(&self, bus: &dyn EventBus) {
        if let Some(id) = self.subscription.lock().take() {
            bus.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CacheSystemConfig {
        CacheSystemConfig {
            device_budget_fraction: 0.80,
            device_warning_fraction: 0.75,
            device_budget_strict: true,
            staging_quota_bytes: 1000,
            frame_delta_warning_threshold: 100,
            ..Default::default()
        }
    }

    #[test]
    fn vram_budget_defaults_to_eighty_percent() {
        let budget = DeviceBudget::new(&config(), 1_000_000);
        assert_eq!(budget.device_memory_limit(), 800_000);
    }

    #[test]
    fn frame_delta_reports_allocated_and_freed() {
        let budget = DeviceBudget::new(&config(), 1_000_000);
        budget.on_frame_start();
        assert!(budget.try_reserve_device_memory(500));
        let delta = budget.on_frame_end();
        assert_eq!(delta.allocated_this_frame, 500);
        assert_eq!(delta.freed_this_frame, 0);

        budget.on_frame_start();
        budget.release_device_memory(500);
        let delta = budget.on_frame_end();
        assert_eq!(delta.freed_this_frame, 500);
    }

    #[test]
    fn staging_quota_enforced_independently_of_device_memory() {
        let budget = DeviceBudget::new(&config(), 1_000_000);
        assert!(budget.try_reserve_staging_quota(900));
        assert!(!budget.try_reserve_staging_quota(200));
        budget.release_staging_quota(900);
        assert!(budget.try_reserve_staging_quota(900));
    }

    #[test]
    fn non_strict_device_memory_proceeds_past_the_limit() {
        let mut cfg = config();
        cfg.device_budget_strict = false;
        let budget = DeviceBudget::new(&cfg, 1_000_000);

        assert!(budget.try_reserve_device_memory(800_000));
        assert!(!budget.try_reserve_device_memory(50_000), "try_reserve still refuses over-limit");
        assert!(!budget.device_memory_strict(), "config carries through as advisory");

        budget.force_reserve_device_memory(50_000);
        assert_eq!(budget.device_memory_usage(), 850_000);
    }
}
