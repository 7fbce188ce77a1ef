//! Hierarchical groups of resources released together.

use parking_lot::Mutex;

use super::shared_resource::SharedHandle;

/// A named group of shared handles released together. Ending a scope clears
/// its handle vectors; each contained resource drops one reference,
/// triggering destruction only for resources with no other referents (spec
/// §3.7, §4.12).
pub struct LifetimeScope<B: Send + 'static, I: Send + 'static> {
    name: String,
    buffers: Vec<SharedHandle<B>>,
    images: Vec<SharedHandle<I>>,
    ended: bool,
}

impl<B: Send + 'static, I: Send + 'static> LifetimeScope<B, I> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffers: Vec::new(),
            images: Vec::new(),
            ended: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Track `handle` so `end_scope` releases it.
    pub fn track_buffer(&mut self, handle: SharedHandle<B>) {
        debug_assert!(!self.ended, "tracking into an ended scope");
        self.buffers.push(handle);
    }

    pub fn track_image(&mut self, handle: SharedHandle<I>) {
        debug_assert!(!self.ended, "tracking into an ended scope");
        self.images.push(handle);
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Release one reference to every tracked resource. Idempotent: calling
    /// this twice is a no-op the second time.
    pub fn end_scope(&mut self) {
        if self.ended {
            return;
        }
        self.buffers.clear();
        self.images.clear();
        self.ended = true;
    }
}

/// Owns a perpetual frame scope plus a stack of nested scopes, ended in LIFO
/// order. `push_scope`/`pop_scope` bracket a render pass or similar unit of
/// work that should release its resources together but before the frame as
/// a whole ends.
pub struct LifetimeScopeManager<B: Send + 'static, I: Send + 'static> {
    frame_scope: Mutex<LifetimeScope<B, I>>,
    stack: Mutex<Vec<LifetimeScope<B, I>>>,
}

impl<B: Send + 'static, I: Send + 'static> LifetimeScopeManager<B, I> {
    pub fn new() -> Self {
        Self {
            frame_scope: Mutex::new(LifetimeScope::new("frame")),
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Push a new nested scope, returning its index for later `pop_scope`
    /// bookkeeping (callers are expected to pop in LIFO order; popping
    /// anything but the top is a logic error caught by `debug_assert`).
    pub fn push_scope(&self, name: impl Into<String>) {
        self.stack.lock().push(LifetimeScope::new(name));
    }

    /// End and remove the innermost scope.
    pub fn pop_scope(&self) -> Option<LifetimeScope<B, I>> {
        let mut popped = self.stack.lock().pop()?;
        popped.end_scope();
        Some(popped)
    }

    /// Track a buffer into the innermost active scope, or the frame scope if
    /// the stack is empty.
    pub fn track_buffer(&self, handle: SharedHandle<B>) {
        let mut stack = self.stack.lock();
        match stack.last_mut() {
            Some(scope) => scope.track_buffer(handle),
            None => self.frame_scope.lock().track_buffer(handle),
        }
    }

    pub fn track_image(&self, handle: SharedHandle<I>) {
        let mut stack = self.stack.lock();
        match stack.last_mut() {
            Some(scope) => scope.track_image(handle),
            None => self.frame_scope.lock().track_image(handle),
        }
    }

    /// End the frame scope, releasing every resource tracked since the last
    /// call, and start a fresh one. Any nested scopes still on the stack are
    /// ended first, in LIFO order.
    pub fn end_frame(&self) {
        let mut stack = self.stack.lock();
        while let Some(mut scope) = stack.pop() {
            scope.end_scope();
        }
        drop(stack);

        let mut frame_scope = self.frame_scope.lock();
        frame_scope.end_scope();
        *frame_scope = LifetimeScope::new("frame");
    }

    pub fn nested_scope_count(&self) -> usize {
        self.stack.lock().len()
    }
}

impl<B: Send + 'static, I: Send + 'static> Default for LifetimeScopeManager<B, I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_scope_is_idempotent() {
        let mut scope = LifetimeScope::<u32, u32>::new("test");
        scope.track_buffer(SharedHandle::new(1, super::super::shared_resource::ResourceScope::Transient));
        scope.end_scope();
        assert_eq!(scope.buffer_count(), 0);
        scope.end_scope();
        assert_eq!(scope.buffer_count(), 0);
    }

    #[test]
    fn nested_scopes_pop_lifo() {
        let manager = LifetimeScopeManager::<u32, u32>::new();
        manager.push_scope("outer");
        manager.push_scope("inner");
        assert_eq!(manager.nested_scope_count(), 2);
        let inner = manager.pop_scope().unwrap();
        assert_eq!(inner.name(), "inner");
        let outer = manager.pop_scope().unwrap();
        assert_eq!(outer.name(), "outer");
        assert!(manager.pop_scope().is_none());
    }

    #[test]
    fn tracking_goes_to_innermost_scope() {
        let manager = LifetimeScopeManager::<u32, u32>::new();
        manager.track_buffer(SharedHandle::new(1, super::super::shared_resource::ResourceScope::Transient));
        manager.push_scope("pass");
        manager.track_buffer(SharedHandle::new(2, super::super::shared_resource::ResourceScope::Transient));
        let pass = manager.pop_scope().unwrap();
        assert_eq!(pass.buffer_count(), 1);
        manager.end_frame();
    }
}
