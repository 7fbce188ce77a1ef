//! Intrusive atomic refcounting for GPU resources, wired to deferred destruction.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::deferred_destroy::DeferredDestroyQueue;

/// Classifies how a resource's lifetime is intended to be managed; purely
/// informational (diagnostics, `LifetimeScope` bookkeeping); the refcount
/// itself behaves identically regardless of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    /// Expected to live for at most a handful of frames (per-frame scratch).
    Transient,
    /// Expected to live for the lifetime of a level/scene.
    Persistent,
    /// Explicitly shared across multiple owners with no single expected
    /// lifetime (e.g. a descriptor-set layout embedded in many pipelines).
    Shared,
}

/// Where a released resource's destruction is enqueued: the queue to push
/// into, and a shared cursor giving the current frame number at release
/// time. `SharedHandle` doesn't know "what frame it is" on its own; the
/// owner (typically a `DeviceRegistry`) publishes its frame counter here.
struct DestroySink<T> {
    queue: Arc<DeferredDestroyQueue>,
    current_frame: Arc<AtomicU64>,
    free_fn: Box<dyn FnOnce(T) + Send>,
}

struct Inner<T: Send + 'static> {
    payload: Option<T>,
    refcount: AtomicU32,
    scope: ResourceScope,
    sink: Option<DestroySink<T>>,
}

impl<T: Send + 'static> Inner<T> {
    fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the refcount. On the 1->0 transition, take the payload and
    /// hand it to the destroy sink (if any) or simply drop it in place.
    fn release(&mut self) {
        let previous = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous != 0, "refcount underflow: released more than acquired");
        if previous != 1 {
            return;
        }
        let Some(payload) = self.payload.take() else {
            return;
        };
        match self.sink.take() {
            Some(sink) => {
                let frame = sink.current_frame.load(Ordering::Acquire);
                sink.queue.add(frame, move || (sink.free_fn)(payload));
            }
            None => drop(payload),
        }
    }
}

/// A standalone intrusive-refcounted wrapper, for call sites that want the
/// bookkeeping without the `Arc<Mutex<..>>` indirection `SharedHandle` adds
/// (e.g. a cache's own internal storage before it hands out clones).
pub struct SharedResource<T: Send + 'static> {
    inner: Inner<T>,
}

impl<T: Send + 'static> SharedResource<T> {
    pub fn new(payload: T, scope: ResourceScope) -> Self {
        Self {
            inner: Inner {
                payload: Some(payload),
                refcount: AtomicU32::new(1),
                scope,
                sink: None,
            },
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.inner.refcount.load(Ordering::Acquire)
    }

    pub fn scope(&self) -> ResourceScope {
        self.inner.scope
    }

    /// Consume this resource, enqueueing `free_fn(payload)` into `queue`
    /// stamped with `current_frame` once the refcount (currently expected to
    /// be 1, i.e. no other references exist) reaches zero.
    pub fn queue_destruction(
        mut self,
        queue: &Arc<DeferredDestroyQueue>,
        current_frame: u64,
        free_fn: impl FnOnce(T) + Send + 'static,
    ) {
        self.inner.sink = Some(DestroySink {
            queue: Arc::clone(queue),
            current_frame: Arc::new(AtomicU64::new(current_frame)),
            free_fn: Box::new(free_fn),
        });
        self.inner.release();
    }
}

/// A clonable smart pointer over a refcounted resource. Holding a handle
/// guarantees the resource has not yet been enqueued for destruction
/// (invariant R1); cloning is always safe and cheap (one atomic increment).
///
/// The last clone to drop triggers destruction: if the handle was created
/// with [`SharedHandle::with_destroy_sink`], that means enqueueing into a
/// [`DeferredDestroyQueue`]; otherwise the payload is simply dropped in
/// place (appropriate for pure-CPU payloads with no GPU handles).
pub struct SharedHandle<T: Send + 'static> {
    inner: Arc<parking_lot::Mutex<Inner<T>>>,
}

impl<T: Send + 'static> SharedHandle<T> {
    pub fn new(payload: T, scope: ResourceScope) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(Inner {
                payload: Some(payload),
                refcount: AtomicU32::new(1),
                scope,
                sink: None,
            })),
        }
    }

    /// Like [`Self::new`], but the last release enqueues `free_fn(payload)`
    /// into `queue`, stamped with whatever `current_frame` holds at that
    /// moment (typically a `DeviceRegistry`'s shared frame counter).
    pub fn with_destroy_sink(
        payload: T,
        scope: ResourceScope,
        queue: Arc<DeferredDestroyQueue>,
        current_frame: Arc<AtomicU64>,
        free_fn: impl FnOnce(T) + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(Inner {
                payload: Some(payload),
                refcount: AtomicU32::new(1),
                scope,
                sink: Some(DestroySink {
                    queue,
                    current_frame,
                    free_fn: Box::new(free_fn),
                }),
            })),
        }
    }

    /// Run `f` against the wrapped payload, if it hasn't been released yet.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.lock().payload.as_ref().map(f)
    }

    pub fn ref_count(&self) -> u32 {
        self.inner.lock().refcount.load(Ordering::Acquire)
    }

    pub fn scope(&self) -> ResourceScope {
        self.inner.lock().scope
    }
}

impl<T: Send + 'static> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        self.inner.lock().add_ref();
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        self.inner.lock().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as O};

    #[test]
    fn destructor_runs_exactly_once_on_1_to_0_transition() {
        let queue = Arc::new(DeferredDestroyQueue::default());
        let runs = Arc::new(AtomicUsize::new(0));

        let resource = SharedResource::new(42u32, ResourceScope::Transient);
        let counter = Arc::clone(&runs);
        resource.queue_destruction(&queue, 0, move |_payload| {
            counter.fetch_add(1, O::SeqCst);
        });

        assert_eq!(queue.flush(), 1);
        assert_eq!(runs.load(O::SeqCst), 1);
    }

    #[test]
    fn clone_keeps_payload_alive_until_last_handle_drops() {
        let handle = SharedHandle::new(String::from("mesh"), ResourceScope::Shared);
        let clone_a = handle.clone();
        assert_eq!(handle.ref_count(), 2);
        drop(handle);
        assert_eq!(clone_a.with(|s| s.clone()), Some(String::from("mesh")));
    }

    #[test]
    fn last_release_enqueues_destruction_exactly_once() {
        let queue = Arc::new(DeferredDestroyQueue::default());
        let frame = Arc::new(AtomicU64::new(7));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let handle = SharedHandle::with_destroy_sink(
            123u32,
            ResourceScope::Persistent,
            Arc::clone(&queue),
            frame,
            move |_payload| {
                counter.fetch_add(1, O::SeqCst);
            },
        );
        let clone_a = handle.clone();
        drop(handle);
        assert_eq!(queue.current_size(), 0, "still one handle alive");
        drop(clone_a);
        assert_eq!(queue.current_size(), 1);
        assert_eq!(queue.flush(), 1);
        assert_eq!(runs.load(O::SeqCst), 1);
    }
}
