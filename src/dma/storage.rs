//! Storage for DMA system base and write-back addresses.

use super::descriptor::TransferDescriptor;
use super::CHANMAX;

/// Access to the base and write-back descriptor memory of a DMA system.
///
/// # Safety
///
/// Both pointers must be 128-bit aligned, point to `channel_count()`
/// consecutive descriptors each, stay at the same address and remain valid
/// for as long as the storage is borrowed by a controller. `channel_count()`
/// must lie in `1..=CHANMAX`.
pub unsafe trait DmaStorage {
    /// The number of channels supported.
    fn channel_count(&self) -> usize;

    /// Get the address for the base descriptor memory.
    fn baseaddr(&mut self) -> *mut TransferDescriptor;

    /// Get the address for the write-back descriptor memory.
    fn wbaddr(&mut self) -> *mut TransferDescriptor;
}

/// Storage type for base and write-back memory of `N` channels.
///
/// `N` must lie in `1..=CHANMAX`; anything else fails to compile.
///
/// The DMAC keeps using this memory for as long as it is enabled, so the
/// storage usually lives in a `static`.
#[derive(Debug)]
pub struct Storage<const N: usize> {
    base: [TransferDescriptor; N],
    writeback: [TransferDescriptor; N],
}

impl<const N: usize> Storage<N> {
    const SIZE_OK: () = assert!(N >= 1 && N <= CHANMAX, "DMA storage must hold 1..=CHANMAX channels");

    /// Create zeroed storage.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SIZE_OK;
        Self {
            base: [TransferDescriptor::new(); N],
            writeback: [TransferDescriptor::new(); N],
        }
    }
}

impl<const N: usize> Default for Storage<N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the arrays are part of `self`, so they stay put while borrowed, and
// TransferDescriptor carries the 128-bit alignment.
unsafe impl<const N: usize> DmaStorage for Storage<N> {
    fn channel_count(&self) -> usize {
        N
    }

    fn baseaddr(&mut self) -> *mut TransferDescriptor {
        self.base.as_mut_ptr()
    }

    fn wbaddr(&mut self) -> *mut TransferDescriptor {
        self.writeback.as_mut_ptr()
    }
}

/// A user allocated storage type.
///
/// Lets the caller place descriptor memory anywhere, for instance in a linker
/// section reserved for DMA.
#[derive(Debug)]
pub struct UnsafeStorage {
    base: *mut TransferDescriptor,
    writeback: *mut TransferDescriptor,
    channels: usize,
}

impl UnsafeStorage {
    /// Create a custom DMA memory storage unit.
    ///
    /// # Safety
    ///
    /// `base` and `writeback` must each point to `channels` consecutive,
    /// 128-bit aligned descriptors that do not overlap and stay valid and
    /// unaliased for as long as a controller uses them. `channels` must lie in
    /// `1..=CHANMAX`.
    pub const unsafe fn new(
        base: *mut TransferDescriptor,
        writeback: *mut TransferDescriptor,
        channels: usize,
    ) -> Self {
        Self {
            base,
            writeback,
            channels,
        }
    }

    /// Get back the memory pointers to the base and write-back descriptors.
    pub fn into_inner(self) -> (*mut TransferDescriptor, *mut TransferDescriptor) {
        (self.base, self.writeback)
    }
}

// SAFETY: upheld by the caller of `UnsafeStorage::new`
unsafe impl DmaStorage for UnsafeStorage {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn baseaddr(&mut self) -> *mut TransferDescriptor {
        self.base
    }

    fn wbaddr(&mut self) -> *mut TransferDescriptor {
        self.writeback
    }
}
