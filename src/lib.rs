//! Device-scoped resource cache and GPU allocation substrate for a Vulkan
//! rendering engine.
//!
//! Three layers, bottom to top: [`lifetime`] (deferred destruction, shared
//! reference counting, scope nesting), [`alloc`] (host/device budgets,
//! staging, batched uploads/updates), [`cache`] (content-addressed,
//! single-flight caches over the first two layers). [`device`], [`device_id`],
//! [`hash`], [`error`] and [`config`] are shared support types used throughout.

pub mod alloc;
pub mod cache;
pub mod config;
pub mod device;
pub mod device_id;
pub mod error;
pub mod hash;
pub mod lifetime;

pub use config::CacheSystemConfig;
pub use device::{Device, DescriptorBinding, Event, EventBus, PushConstantRange, ShaderReflection, SubscriptionId};
pub use device_id::DeviceId;
pub use error::{AllocError, CacheError, SerializationError};
pub use hash::{CacheKeyHasher, Fingerprint};
