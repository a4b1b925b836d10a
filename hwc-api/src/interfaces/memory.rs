//! Platform memory allocator contract

use bitflags::bitflags;

use crate::core::MemoryId;
use crate::error::Result;

bitflags! {
    /// Heap selection for an allocation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UsageFlags: u32 {
        /// Content-protected buffer
        const PROTECTED = 1 << 0;
        /// Multimedia carveout heap
        const MM_HEAP = 1 << 1;
        /// IOMMU backed system heap
        const IOMMU_HEAP = 1 << 2;
        /// Legacy writeback heap
        const WRITEBACK_HEAP = 1 << 3;
        const UNCACHED = 1 << 4;
    }
}

/// Memory region handed out by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub memory: MemoryId,
    pub base: usize,
    pub size: usize,
    pub usage: UsageFlags,
}

/// Platform allocator for rotator intermediate buffers
///
/// `allocate` reports a heap the platform does not have with
/// [`Error::NotSupported`](crate::error::Error::NotSupported); callers use
/// that to walk their fallback chain.
pub trait MemoryAllocator: Send + Sync {
    fn allocate(&self, size: usize, usage: UsageFlags) -> Result<Allocation>;

    fn free(&self, allocation: &Allocation) -> Result<()>;
}
