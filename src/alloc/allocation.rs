//! Buffer/image allocation records returned by the `Allocator` trait.

use ash::vk;
use gpu_allocator::vulkan::Allocation;

/// A GPU buffer plus the allocator-internal record backing its memory.
///
/// `is_aliased = true` means this allocation does not own its backing
/// memory: it must never be freed directly, only have its `buffer` handle
/// destroyed, and the source allocation it aliases must outlive it (spec
/// invariant A1).
pub struct BufferAllocation {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
    pub offset: u64,
    /// `Some` iff created with a persistent mapping.
    pub mapped_ptr: Option<std::ptr::NonNull<u8>>,
    /// Nonzero iff created with `DEVICE_ADDRESS` usage.
    pub device_address: vk::DeviceAddress,
    pub can_alias: bool,
    pub is_aliased: bool,
}

// SAFETY: the raw pointer is into Vulkan-mapped host memory; access is
// synchronized by the caller the same way any other mapped-buffer access
// would be (the pointer itself carries no thread affinity).
unsafe impl Send for BufferAllocation {}
unsafe impl Sync for BufferAllocation {}

impl BufferAllocation {
    pub fn mapped_slice(&self) -> Option<&[u8]> {
        self.mapped_ptr
            .map(|p| unsafe { std::slice::from_raw_parts(p.as_ptr(), self.size as usize) })
    }

    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.mapped_ptr
            .map(|p| unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), self.size as usize) })
    }
}

/// A GPU image plus the allocator-internal record backing its memory.
pub struct ImageAllocation {
    pub image: vk::Image,
    pub view: Option<vk::ImageView>,
    pub allocation: Option<Allocation>,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub can_alias: bool,
    pub is_aliased: bool,
}

unsafe impl Send for ImageAllocation {}
unsafe impl Sync for ImageAllocation {}

/// Tracks which allocation currently "owns" a shared memory region so
/// aliased buffers/images with overlapping backing memory are never
/// concurrently live (Design Note open question #2, aliasing group).
///
/// This crate does not insert the barriers that make a tenant transition
/// safe; it only records who the current tenant is so misuse can at least
/// be asserted against in debug builds. Barrier insertion remains the
/// caller's responsibility, exactly as the source engine leaves it.
pub struct AliasGroup {
    name: String,
    current_tenant: Option<String>,
}

impl AliasGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_tenant: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record that `tenant` is about to become the active alias. Panics in
    /// debug builds if a different tenant is already active; that would
    /// mean two aliases were live at once without an intervening release.
    pub fn begin_tenancy(&mut self, tenant: impl Into<String>) {
        let tenant = tenant.into();
        debug_assert!(
            self.current_tenant.is_none(),
            "alias group '{}' still tenanted by '{:?}' when '{}' began",
            self.name,
            self.current_tenant,
            tenant
        );
        self.current_tenant = Some(tenant);
    }

    pub fn end_tenancy(&mut self) {
        self.current_tenant = None;
    }

    pub fn current_tenant(&self) -> Option<&str> {
        self.current_tenant.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_group_tracks_tenant_handoff() {
        let mut group = AliasGroup::new("gbuffer-scratch");
        group.begin_tenancy("depth-prepass");
        assert_eq!(group.current_tenant(), Some("depth-prepass"));
        group.end_tenancy();
        group.begin_tenancy("ssao");
        assert_eq!(group.current_tenant(), Some("ssao"));
    }

    #[test]
    #[should_panic(expected = "still tenanted")]
    fn overlapping_tenancy_is_caught_in_debug() {
        let mut group = AliasGroup::new("gbuffer-scratch");
        group.begin_tenancy("a");
        group.begin_tenancy("b");
    }
}
