//! L1: deferred destruction, refcounted shared resources, lifetime scopes.

pub mod deferred_destroy;
pub mod scope;
pub mod shared_resource;

pub use deferred_destroy::{DeferredDestroyQueue, DeferredDestroyStats};
pub use scope::{LifetimeScope, LifetimeScopeManager};
pub use shared_resource::{ResourceScope, SharedHandle, SharedResource};
