//! FIFO ring buffer of pending resource destructions.
//!
//! GPU commands execute asynchronously relative to the CPU; a resource that
//! becomes unreferenced this frame may still be read by the GPU for up to
//! `max_frames_in_flight` frames. Rather than destroying eagerly, every
//! release funnels through this queue and is only actually destroyed once
//! the frame counter proves the GPU is done (spec §3.5, §4.11).

use std::collections::VecDeque;

use parking_lot::Mutex;

/// A single pending destruction: an opaque closure plus the frame it was
/// submitted on.
struct PendingDestruction {
    destroy_fn: Box<dyn FnOnce() + Send>,
    submitted_frame: u64,
}

/// Running counters exposed for diagnostics and capacity tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeferredDestroyStats {
    pub capacity: usize,
    pub current_size: usize,
    pub max_size_reached: usize,
    pub growth_count: u64,
    pub total_queued: u64,
    pub total_destroyed: u64,
    pub total_flushed: u64,
}

struct Inner {
    queue: VecDeque<PendingDestruction>,
    capacity: usize,
    max_size_reached: usize,
    growth_count: u64,
    total_queued: u64,
    total_destroyed: u64,
    total_flushed: u64,
}

/// FIFO queue of closures awaiting destruction, gated on a frame counter.
///
/// Destruction is strictly in submission order: because `add` only ever
/// appends and `submitted_frame` is monotone non-decreasing across calls in
/// a correctly operating engine, the head of the queue is always the oldest
/// undrained entry (spec invariant D1).
pub struct DeferredDestroyQueue {
    inner: Mutex<Inner>,
}

impl DeferredDestroyQueue {
    /// Create a queue pre-reserving space for `pre_reserve` entries. Growth
    /// beyond this is tracked via `growth_count` as a signal to retune the
    /// reservation.
    pub fn new(pre_reserve: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(pre_reserve),
                capacity: pre_reserve,
                max_size_reached: 0,
                growth_count: 0,
                total_queued: 0,
                total_destroyed: 0,
                total_flushed: 0,
            }),
        }
    }

    /// Enqueue a destruction closure submitted on `frame`.
    pub fn add(&self, frame: u64, destroy_fn: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.queue.len() == inner.capacity {
            inner.capacity = (inner.capacity * 2).max(1);
            inner.growth_count += 1;
        }
        inner.queue.push_back(PendingDestruction {
            destroy_fn: Box::new(destroy_fn),
            submitted_frame: frame,
        });
        inner.total_queued += 1;
        inner.max_size_reached = inner.max_size_reached.max(inner.queue.len());
    }

    /// Drain every entry whose GPU-visible lifetime has expired:
    /// `current >= submitted && current - submitted >= max_frames_in_flight`.
    ///
    /// Stops at the first entry that isn't yet drainable, since enqueues are
    /// monotone in `submitted_frame` (invariant D1): a later entry can never
    /// be drainable while an earlier one isn't.
    pub fn process_frame(&self, current_frame: u64, max_frames_in_flight: u64) -> u32 {
        let mut drained = Vec::new();
        {
            let mut inner = self.inner.lock();
            while let Some(front) = inner.queue.front() {
                let drainable = current_frame >= front.submitted_frame
                    && current_frame - front.submitted_frame >= max_frames_in_flight;
                if !drainable {
                    break;
                }
                let entry = inner.queue.pop_front().unwrap();
                inner.total_destroyed += 1;
                drained.push(entry);
            }
        }
        let count = drained.len() as u32;
        for entry in drained {
            (entry.destroy_fn)();
        }
        count
    }

    /// Invoke and drop every pending entry regardless of frame timing. Used
    /// at shutdown, after the device has been made idle.
    pub fn flush(&self) -> u32 {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            let drained: Vec<_> = inner.queue.drain(..).collect();
            inner.total_flushed += drained.len() as u64;
            drained
        };
        let count = drained.len() as u32;
        for entry in drained {
            (entry.destroy_fn)();
        }
        count
    }

    /// Current queue length.
    pub fn current_size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Snapshot of running counters.
    pub fn stats(&self) -> DeferredDestroyStats {
        let inner = self.inner.lock();
        DeferredDestroyStats {
            capacity: inner.capacity,
            current_size: inner.queue.len(),
            max_size_reached: inner.max_size_reached,
            growth_count: inner.growth_count,
            total_queued: inner.total_queued,
            total_destroyed: inner.total_destroyed,
            total_flushed: inner.total_flushed,
        }
    }
}

impl Default for DeferredDestroyQueue {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn destruction_latency_matches_max_frames_in_flight() {
        let queue = DeferredDestroyQueue::default();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&destroyed);
        queue.add(5, move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(queue.process_frame(6, 3), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(queue.process_frame(7, 3), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(queue.process_frame(8, 3), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fifo_ordering_is_preserved() {
        let queue = DeferredDestroyQueue::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (id, frame) in [(1, 1), (2, 1), (3, 2)] {
            let order = Arc::clone(&order);
            queue.add(frame, move || order.lock().push(id));
        }

        queue.process_frame(10, 1);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn no_underflow_when_current_precedes_submitted() {
        let queue = DeferredDestroyQueue::default();
        queue.add(100, || {});
        // current_frame < submitted_frame cannot happen in normal flow, but
        // must not panic or destroy early if it somehow does.
        assert_eq!(queue.process_frame(5, 3), 0);
        assert_eq!(queue.current_size(), 1);
    }

    #[test]
    fn flush_destroys_everything_immediately() {
        let queue = DeferredDestroyQueue::default();
        for frame in 0..5 {
            queue.add(frame, || {});
        }
        assert_eq!(queue.flush(), 5);
        assert_eq!(queue.current_size(), 0);
    }

    #[test]
    fn growth_count_increments_past_pre_reserve() {
        let queue = DeferredDestroyQueue::new(1);
        queue.add(0, || {});
        queue.add(0, || {});
        assert!(queue.stats().growth_count >= 1);
    }
}
