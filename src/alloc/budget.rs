//! Named, atomically-tracked memory budgets (spec §3.4, invariant B1).

use std::sync::atomic::{AtomicU64, Ordering};

/// A single named resource class (`DeviceMemory`, `HostMemory`,
/// `StagingQuota`, ...) with an atomic usage counter, a hard limit, a warning
/// threshold, and a strictness flag controlling whether over-budget
/// allocations are rejected or merely warned about.
pub struct ResourceBudget {
    name: &'static str,
    limit_bytes: u64,
    warning_bytes: u64,
    strict: bool,
    usage: AtomicU64,
    warned: std::sync::atomic::AtomicBool,
}

impl ResourceBudget {
    pub fn new(name: &'static str, limit_bytes: u64, warning_bytes: u64, strict: bool) -> Self {
        Self {
            name,
            limit_bytes,
            warning_bytes,
            strict,
            usage: AtomicU64::new(0),
            warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// CAS-increment `usage` by `n` bytes, only if the result would not
    /// exceed `limit_bytes`. Under `strict = false`, the caller should
    /// interpret a `false` return as "proceed anyway" per spec B1. This
    /// method itself never silently grows past the limit; callers choose
    /// the non-strict bypass explicitly via [`Self::force_reserve`].
    pub fn try_reserve(&self, n: u64) -> bool {
        loop {
            let current = self.usage.load(Ordering::Acquire);
            let Some(next) = current.checked_add(n) else {
                return false;
            };
            if next > self.limit_bytes {
                return false;
            }
            if self
                .usage
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.maybe_warn(next);
                return true;
            }
        }
    }

    /// Increment usage unconditionally (non-strict over-budget path). The
    /// caller is responsible for having decided this allocation should
    /// proceed despite exceeding the limit; a warning is still raised.
    pub fn force_reserve(&self, n: u64) {
        let next = self.usage.fetch_add(n, Ordering::AcqRel) + n;
        self.maybe_warn(next);
    }

    fn maybe_warn(&self, usage_after: u64) {
        if usage_after >= self.warning_bytes
            && !self.warned.swap(true, Ordering::AcqRel)
        {
            log::warn!(
                "[budget:{}] usage {} crossed warning threshold {} (limit {})",
                self.name,
                usage_after,
                self.warning_bytes,
                self.limit_bytes
            );
        } else if usage_after < self.warning_bytes {
            self.warned.store(false, Ordering::Release);
        }
    }

    /// Release `n` bytes previously reserved. Saturates at zero rather than
    /// underflowing on a mismatched release.
    pub fn release(&self, n: u64) {
        let mut current = self.usage.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(n);
            match self
                .usage
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_budget_rejects_over_limit_allocation() {
        let budget = ResourceBudget::new("DeviceMemory", 1024 * 1024, 768 * 1024, true);
        assert!(budget.try_reserve(512 * 1024));
        assert!(!budget.try_reserve(600 * 1024));
        assert_eq!(budget.usage(), 512 * 1024);
    }

    #[test]
    fn release_restores_capacity() {
        let budget = ResourceBudget::new("DeviceMemory", 1024 * 1024, 768 * 1024, true);
        assert!(budget.try_reserve(512 * 1024));
        budget.release(512 * 1024);
        assert_eq!(budget.usage(), 0);
        assert!(budget.try_reserve(1024 * 1024));
    }

    #[test]
    fn usage_never_exceeds_limit_under_contention() {
        use std::sync::Arc;
        use std::thread;

        let budget = Arc::new(ResourceBudget::new("DeviceMemory", 1000, 900, true));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let budget = Arc::clone(&budget);
            handles.push(thread::spawn(move || budget.try_reserve(100)));
        }
        let successes: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(successes, 10);
        assert_eq!(budget.usage(), 1000);
        assert!(budget.usage() <= budget.limit_bytes());
    }
}
