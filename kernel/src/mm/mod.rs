//! Physical frame pool, page tables, and per-address-space VMAs.
//!
//! [`frame_pool`] is the bitmap-backed physical allocator (Component A).
//! [`page_table`] wraps the arch-specific 4-level page table walk.
//! [`vas`] is the per-process virtual address space manager, including
//! copy-on-write fork (Component B). [`user_check`] validates user-supplied
//! pointers before the kernel dereferences them.

pub mod frame_pool;
pub mod page_table;
pub mod user_check;
pub mod vas;

use core::sync::atomic::{AtomicU64, Ordering};

/// Offset at which all physical memory is identity-mapped into the kernel's
/// address space (set once at boot from the bootloader's memory map).
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Set the physical-memory mapping offset. Called once during `arch::init`.
pub fn set_phys_mem_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

/// Translate a physical address to a kernel-virtual address through the
/// identity-mapped physical memory window.
pub fn phys_to_virt_addr(phys: PhysicalAddress) -> u64 {
    phys.as_u64() + PHYS_MEM_OFFSET.load(Ordering::Acquire)
}

/// A physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_aligned(&self, align: u64) -> bool {
        self.0 % align == 0
    }
}

/// A virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    pub fn align_down(&self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    pub fn align_up(&self, align: u64) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }

    pub const fn is_aligned(&self, align: u64) -> bool {
        self.0 % align == 0
    }
}

bitflags::bitflags! {
    /// Page table entry permission/attribute bits, arch-neutral subset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const HUGE = 1 << 7;
        const GLOBAL = 1 << 8;
        /// Software-only bit (ignored by the MMU when PRESENT is clear):
        /// marks a not-present page as a copy-on-write source awaiting its
        /// first write fault.
        const COW = 1 << 9;
        /// Software-only bit: this virtual range belongs to the kernel and
        /// must never be mapped into a user address space.
        const KRSV = 1 << 10;
        const NO_EXECUTE = 1 << 63;
    }
}

impl PageFlags {
    /// Flags for a user read/write page (heap, stack, anonymous mmap).
    pub const USER_RW: Self = Self::PRESENT
        .union(Self::WRITABLE)
        .union(Self::USER)
        .union(Self::NO_EXECUTE);

    /// Flags for a user read-only page.
    pub const USER_RO: Self = Self::PRESENT.union(Self::USER).union(Self::NO_EXECUTE);
}
