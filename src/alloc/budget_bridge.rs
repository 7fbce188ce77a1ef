//! Coordinates staging quota bookkeeping between host callers and the
//! device-side budget (spec §4.10).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::device_budget::DeviceBudget;

struct PendingUpload {
    staging_bytes: u64,
    frame_submitted: u64,
    fence_value: u64,
}

/// Tracks staging reservations made on behalf of uploads whose GPU
/// completion is observed separately (by fence or timeline value), so the
/// quota is released exactly once per reservation.
pub struct BudgetBridge {
    device_budget: Arc<DeviceBudget>,
    max_staging_quota: u64,
    local_usage: AtomicU64,
    max_pending_uploads: usize,
    frames_to_keep_pending: u64,
    pending: Mutex<VecDeque<PendingUpload>>,
}

impl BudgetBridge {
    pub fn new(
        device_budget: Arc<DeviceBudget>,
        max_staging_quota: u64,
        max_pending_uploads: usize,
        frames_to_keep_pending: u64,
    ) -> Self {
        Self {
            device_budget,
            max_staging_quota,
            local_usage: AtomicU64::new(0),
            max_pending_uploads,
            frames_to_keep_pending,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Reserve `bytes` against both the local counter and the device
    /// budget's staging quota. Rolls back the local reservation if the
    /// device-side reservation fails.
    pub fn reserve_staging_quota(&self, bytes: u64) -> bool {
        loop {
            let current = self.local_usage.load(Ordering::Acquire);
            let Some(next) = current.checked_add(bytes) else {
                return false;
            };
            if next > self.max_staging_quota {
                return false;
            }
            if self
                .local_usage
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        if self.device_budget.try_reserve_staging_quota(bytes) {
            true
        } else {
            self.local_usage.fetch_sub(bytes, Ordering::AcqRel);
            false
        }
    }

    /// Record an in-flight upload awaiting GPU completion. If the pending
    /// list is already at capacity, evict the oldest entry first (assuming
    /// it has completed, per spec §4.10) before recording the new one.
    pub fn record_upload(&self, staging_bytes: u64, frame_submitted: u64, fence_value: u64) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.max_pending_uploads {
            if let Some(evicted) = pending.pop_front() {
                self.release(evicted.staging_bytes);
            }
        }
        pending.push_back(PendingUpload {
            staging_bytes,
            frame_submitted,
            fence_value,
        });
    }

    /// Release staging quota for every pending upload whose fence has passed
    /// `completed_fence_value`, or whose submission is older than
    /// `frames_to_keep_pending` relative to `current_frame`.
    pub fn process_completed_uploads(&self, completed_fence_value: u64, current_frame: u64) -> u32 {
        let mut released = 0;
        let mut pending = self.pending.lock();
        while let Some(front) = pending.front() {
            let fence_done = front.fence_value <= completed_fence_value;
            let aged_out = current_frame.saturating_sub(front.frame_submitted) >= self.frames_to_keep_pending;
            if !fence_done && !aged_out {
                break;
            }
            let entry = pending.pop_front().unwrap();
            drop(pending);
            self.release(entry.staging_bytes);
            released += 1;
            pending = self.pending.lock();
        }
        released
    }

    fn release(&self, bytes: u64) {
        self.local_usage.fetch_sub(bytes, Ordering::AcqRel);
        self.device_budget.release_staging_quota(bytes);
    }

    pub fn local_usage(&self) -> u64 {
        self.local_usage.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSystemConfig;

    fn bridge() -> BudgetBridge {
        let config = CacheSystemConfig {
            staging_quota_bytes: 10_000,
            ..Default::default()
        };
        let device_budget = Arc::new(DeviceBudget::new(&config, 1_000_000));
        BudgetBridge::new(device_budget, 4_000, 4, 3)
    }

    #[test]
    fn reserve_rolls_back_local_on_device_failure() {
        let bridge = bridge();
        assert!(bridge.reserve_staging_quota(3_999));
        assert!(!bridge.reserve_staging_quota(2));
        assert_eq!(bridge.local_usage(), 3_999);
    }

    #[test]
    fn process_completed_releases_by_fence_value() {
        let bridge = bridge();
        bridge.reserve_staging_quota(100);
        bridge.record_upload(100, 0, 5);
        assert_eq!(bridge.process_completed_uploads(4, 0), 0);
        assert_eq!(bridge.process_completed_uploads(5, 0), 1);
        assert_eq!(bridge.local_usage(), 0);
    }

    #[test]
    fn process_completed_ages_out_stale_entries() {
        let bridge = bridge();
        bridge.reserve_staging_quota(100);
        bridge.record_upload(100, 0, 999);
        assert_eq!(bridge.process_completed_uploads(0, 2), 0);
        assert_eq!(bridge.process_completed_uploads(0, 3), 1);
    }

    #[test]
    fn full_pending_list_evicts_oldest_on_record() {
        let bridge = bridge();
        for frame in 0..4 {
            bridge.reserve_staging_quota(100);
            bridge.record_upload(100, frame, frame);
        }
        assert_eq!(bridge.pending_count(), 4);
        bridge.reserve_staging_quota(100);
        bridge.record_upload(100, 4, 4);
        assert_eq!(bridge.pending_count(), 4);
    }
}
