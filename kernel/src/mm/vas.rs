//! Per-process virtual address space: allocated regions, CoW regions, and
//! fork.
//!
//! Grounded on the teacher's `vas.rs`, trimmed down from its
//! `BTreeMap<VirtualAddress, VirtualMapping>` tracker (which supported
//! arbitrary partial-munmap hole-punching and per-mapping `MappingType`
//! metadata) to the two flat lists the design calls for: `AllocatedRegion`
//! for pages this VMA owns outright, `SharedRegion` for copy-on-write
//! sources. One mutex per VMA serializes every operation, matching the
//! concurrency model's "operations on a single VMA are serialized".

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use crate::{
    error::{KernelResult, VmaError},
    mm::{
        frame_pool,
        page_table::{PageMapper, PageTableHandle},
        phys_to_virt_addr, user_check, PageFlags, PhysicalAddress, VirtualAddress,
    },
    sync::once_lock::OnceLock,
};

pub const PAGE_SIZE: u64 = 4096;

/// Default placement window for anonymous/file-backed `mmap` calls that
/// don't request a fixed address.
const USER_MMAP_BASE: u64 = 0x0000_7000_0000_0000;
/// Start of the heap `brk` grows from.
const USER_HEAP_BASE: u64 = 0x0000_0000_1000_0000;

static KERNEL_ROOT: OnceLock<PhysicalAddress> = OnceLock::new();

/// Snapshot the currently active (boot) page table as the template every
/// new address space copies its kernel half from. Must run once, after
/// `arch::init` has established the identity-mapped physical window.
pub fn init_kernel_template() -> KernelResult<()> {
    let root = PageTableHandle::current();
    let _ = KERNEL_ROOT.set(root.root);
    Ok(())
}

fn copy_kernel_half(dst_root: PhysicalAddress) {
    let src_root = *KERNEL_ROOT.get().expect("kernel template not initialized");
    // SAFETY: both roots are live page table frames; only the upper half
    // (indices 256..512, i.e. the canonical-kernel half) is copied, so no
    // user-space entries are touched.
    unsafe {
        let src = &*(phys_to_virt_addr(src_root) as *const crate::mm::page_table::PageTable);
        let dst = &mut *(phys_to_virt_addr(dst_root) as *mut crate::mm::page_table::PageTable);
        for i in 256..512 {
            dst[i] = src[i];
        }
    }
}

fn perm_flags(read: bool, write: bool, exec: bool) -> PageFlags {
    let _ = read;
    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if write {
        flags |= PageFlags::WRITABLE;
    }
    if !exec {
        flags |= PageFlags::NO_EXECUTE;
    }
    flags
}

/// Pages this VMA owns outright; must be returned to the frame pool when
/// the region is freed or the process exits.
#[derive(Debug, Clone)]
pub struct AllocatedRegion {
    pub base: VirtualAddress,
    pub pages: usize,
    pub protected: bool,
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

/// A copy-on-write source: PTEs in `[base, base+len)` are not present but
/// tagged `CoW` until the first write fault materializes a private copy.
#[derive(Debug, Clone)]
pub struct SharedRegion {
    pub base: VirtualAddress,
    pub len: usize,
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub fixed: bool,
    pub shared: bool,
}

struct VmaState {
    page_table: PageTableHandle,
    allocated: Vec<AllocatedRegion>,
    shared: Vec<SharedRegion>,
    next_mmap_addr: u64,
    heap_start: u64,
    heap_break: u64,
}

/// Per-process owner of a page table: maps/unmaps/remaps regions, handles
/// CoW faults, and forks into a child address space.
pub struct VirtualAddressSpace {
    inner: Mutex<VmaState>,
}

impl VirtualAddressSpace {
    /// Create a fresh address space with a freshly allocated root table
    /// whose kernel half is copied from the boot template.
    pub fn new() -> KernelResult<Self> {
        let page_table = PageTableHandle::allocate()?;
        copy_kernel_half(page_table.root);
        Ok(Self {
            inner: Mutex::new(VmaState {
                page_table,
                allocated: Vec::new(),
                shared: Vec::new(),
                next_mmap_addr: USER_MMAP_BASE,
                heap_start: USER_HEAP_BASE,
                heap_break: USER_HEAP_BASE,
            }),
        })
    }

    pub fn activate(&self) {
        self.inner.lock().page_table.activate();
    }

    pub fn page_table_root(&self) -> PhysicalAddress {
        self.inner.lock().page_table.root
    }

    /// Current program break, as last set by [`Self::brk`] (or the initial
    /// heap base for a freshly created address space).
    pub fn heap_break(&self) -> u64 {
        self.inner.lock().heap_break
    }

    /// translate(va) -> pa
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let state = self.inner.lock();
        let mapper = PageMapper::new(state.page_table.root);
        mapper.translate(va).and_then(|e| e.addr())
    }

    fn reject_kernel_reserved(va: VirtualAddress, pages: usize) -> KernelResult<()> {
        if !user_check::is_user_addr_valid(va.as_u64())
            || !user_check::is_user_addr_valid(va.as_u64() + pages as u64 * PAGE_SIZE - 1)
        {
            return Err(VmaError::PermissionDenied.into());
        }
        Ok(())
    }

    /// Allocate `pages` fresh frames, map them at a VMA-chosen (or `fixed`)
    /// address with the given permissions, and record an `AllocatedRegion`.
    pub fn alloc_region(
        &self,
        pages: usize,
        read: bool,
        write: bool,
        exec: bool,
        fixed: Option<VirtualAddress>,
        protected: bool,
    ) -> KernelResult<VirtualAddress> {
        if pages == 0 {
            return Err(VmaError::CountMismatch { expected: 1, got: 0 }.into());
        }
        let mut state = self.inner.lock();
        let base = match fixed {
            Some(va) => va,
            None => {
                let va = VirtualAddress::new(state.next_mmap_addr);
                state.next_mmap_addr += pages as u64 * PAGE_SIZE;
                va
            }
        };
        Self::reject_kernel_reserved(base, pages)?;

        let flags = perm_flags(read, write, exec);
        let mut mapper = PageMapper::new(state.page_table.root);
        let mut mapped = 0;
        for i in 0..pages {
            let frame = frame_pool::alloc()?;
            let page = base.add(i * PAGE_SIZE as usize);
            if let Err(e) = mapper.map_page(page, frame, flags) {
                let _ = frame_pool::free(frame);
                for j in 0..mapped {
                    if let Ok(f) = mapper.unmap_page(base.add(j * PAGE_SIZE as usize)) {
                        let _ = frame_pool::free(f);
                    }
                }
                return Err(e);
            }
            mapped += 1;
        }

        state.allocated.push(AllocatedRegion {
            base,
            pages,
            protected,
            read,
            write,
            exec,
        });
        Ok(base)
    }

    /// Free a previously allocated region, unmapping and returning every
    /// frame to the pool. Protected regions refuse to be freed.
    pub fn free_region(&self, base: VirtualAddress) -> KernelResult<()> {
        let mut state = self.inner.lock();
        let idx = state
            .allocated
            .iter()
            .position(|r| r.base == base)
            .ok_or(VmaError::NotMapped)?;
        if state.allocated[idx].protected {
            return Err(VmaError::Protected.into());
        }
        let region = state.allocated.remove(idx);
        let mut mapper = PageMapper::new(state.page_table.root);
        for i in 0..region.pages {
            let page = region.base.add(i * PAGE_SIZE as usize);
            if let Ok(frame) = mapper.unmap_page(page) {
                let _ = frame_pool::free(frame);
            }
        }
        Ok(())
    }

    /// Map a single already-owned frame at `va` with the given permissions.
    /// Unlike `alloc_region`, this neither allocates the frame nor tracks
    /// it in `allocated` -- the caller (e.g. a future procfs/devfs mmap)
    /// owns the frame's lifetime and is responsible for `unmap`ping it.
    pub fn map(
        &self,
        va: VirtualAddress,
        frame: frame_pool::FrameNumber,
        read: bool,
        write: bool,
        exec: bool,
    ) -> KernelResult<()> {
        Self::reject_kernel_reserved(va, 1)?;
        let state = self.inner.lock();
        let mut mapper = PageMapper::new(state.page_table.root);
        mapper.map_page(va, frame, perm_flags(read, write, exec))
    }

    /// Tear down the mapping at `va`, returning the frame it was backed by.
    /// Does not free the frame -- the caller decides whether it goes back
    /// to the pool or is reused elsewhere.
    pub fn unmap(&self, va: VirtualAddress) -> KernelResult<frame_pool::FrameNumber> {
        let state = self.inner.lock();
        let mut mapper = PageMapper::new(state.page_table.root);
        mapper.unmap_page(va)
    }

    /// Change the permissions of an existing mapping at `va` in place,
    /// keeping the same backing frame. Returns the frame so callers that
    /// need to flush or re-validate it can do so without a second lookup.
    pub fn remap(
        &self,
        va: VirtualAddress,
        read: bool,
        write: bool,
        exec: bool,
    ) -> KernelResult<frame_pool::FrameNumber> {
        let state = self.inner.lock();
        let mut mapper = PageMapper::new(state.page_table.root);
        let frame = mapper.unmap_page(va)?;
        let flags = perm_flags(read, write, exec);
        mapper.map_page(va, frame, flags)?;
        crate::arch::tlb_flush_address(va.as_u64());
        Ok(frame)
    }

    /// Reserve a virtual range as copy-on-write: PTEs are left not-present
    /// but tagged `CoW` until the first write fault.
    pub fn create_cow_region(
        &self,
        base: VirtualAddress,
        len: usize,
        read: bool,
        write: bool,
        exec: bool,
        fixed: bool,
        shared: bool,
    ) -> KernelResult<VirtualAddress> {
        let mut state = self.inner.lock();
        state.shared.push(SharedRegion {
            base,
            len,
            read,
            write,
            exec,
            fixed,
            shared,
        });
        Ok(base)
    }

    /// Handle a page fault. If `fault_va` falls in a non-shared CoW region,
    /// materialize a fresh zeroed page with the region's permissions, clear
    /// the CoW tag, and return true. Shared-region CoW and faults outside
    /// any tracked region return false.
    pub fn handle_cow(&self, fault_va: VirtualAddress) -> bool {
        let mut state = self.inner.lock();
        let page = fault_va.align_down(PAGE_SIZE);
        let region = state
            .shared
            .iter()
            .find(|r| {
                !r.shared
                    && page.as_u64() >= r.base.as_u64()
                    && page.as_u64() < r.base.as_u64() + r.len as u64
            })
            .cloned();
        let Some(region) = region else {
            return false;
        };

        let frame = match frame_pool::alloc() {
            Ok(f) => f,
            Err(_) => return false,
        };
        // SAFETY: frame was just allocated and is not yet referenced by any
        // page table, so zeroing it through the identity window is sound.
        unsafe {
            let dst = phys_to_virt_addr(PhysicalAddress::new(frame.0 << 12)) as *mut u8;
            core::ptr::write_bytes(dst, 0, PAGE_SIZE as usize);
        }

        let flags = perm_flags(region.read, region.write, region.exec);
        let mut mapper = PageMapper::new(state.page_table.root);
        if mapper.map_page(page, frame, flags).is_err() {
            let _ = frame_pool::free(frame);
            return false;
        }
        crate::arch::tlb_flush_address(page.as_u64());
        true
    }

    /// `fork(parent)`: deep-copy every non-protected allocated region
    /// byte-for-byte with a matching `(pages, flags)` pair, and turn every
    /// parent shared region into an equivalent CoW region with its bytes
    /// copied too.
    pub fn fork(&self) -> KernelResult<Self> {
        let parent = self.inner.lock();
        let child = Self::new()?;
        {
            let mut child_state = child.inner.lock();
            for region in &parent.allocated {
                let parent_mapper = PageMapper::new(parent.page_table.root);
                let mut child_mapper = PageMapper::new(child_state.page_table.root);
                let flags = perm_flags(region.read, region.write, region.exec);
                for i in 0..region.pages {
                    let page = region.base.add(i * PAGE_SIZE as usize);
                    let Some(src_entry) = parent_mapper.translate(page) else {
                        continue;
                    };
                    let Some(src_phys) = src_entry.addr() else {
                        continue;
                    };
                    let dst_frame = frame_pool::alloc()?;
                    // SAFETY: src_phys is a live parent page, dst_frame was
                    // just allocated and is not aliased anywhere else; both
                    // are reachable through the identity-mapped window.
                    unsafe {
                        let src = phys_to_virt_addr(src_phys) as *const u8;
                        let dst =
                            phys_to_virt_addr(PhysicalAddress::new(dst_frame.0 << 12)) as *mut u8;
                        core::ptr::copy_nonoverlapping(src, dst, PAGE_SIZE as usize);
                    }
                    child_mapper.map_page(page, dst_frame, flags)?;
                }
                child_state.allocated.push(region.clone());
            }

            for region in &parent.shared {
                child_state.shared.push(region.clone());
                let parent_mapper = PageMapper::new(parent.page_table.root);
                let mut child_mapper = PageMapper::new(child_state.page_table.root);
                let pages = (region.len as u64).div_ceil(PAGE_SIZE);
                for i in 0..pages {
                    let page = region.base.add((i * PAGE_SIZE) as usize);
                    let Some(entry) = parent_mapper.translate(page) else {
                        continue;
                    };
                    let Some(src_phys) = entry.addr() else {
                        continue;
                    };
                    let dst_frame = frame_pool::alloc()?;
                    // SAFETY: same reasoning as the allocated-region copy
                    // above.
                    unsafe {
                        let src = phys_to_virt_addr(src_phys) as *const u8;
                        let dst =
                            phys_to_virt_addr(PhysicalAddress::new(dst_frame.0 << 12)) as *mut u8;
                        core::ptr::copy_nonoverlapping(src, dst, PAGE_SIZE as usize);
                    }
                    let flags = perm_flags(region.read, region.write, region.exec);
                    let _ = child_mapper.map_page(page, dst_frame, flags);
                }
            }

            child_state.next_mmap_addr = parent.next_mmap_addr;
            child_state.heap_start = parent.heap_start;
            child_state.heap_break = parent.heap_break;
        }
        Ok(child)
    }

    /// `user_check(ptr, len) -> pa | null`
    pub fn user_check(&self, ptr: u64, len: usize) -> Option<PhysicalAddress> {
        let state = self.inner.lock();
        let mapper = PageMapper::new(state.page_table.root);
        user_check::check_range(&mapper, ptr, len)
    }

    /// `brk(end)`: grows the heap by mapping fresh user pages, shrinks it
    /// by unmapping. `end` must be page-aligned.
    pub fn brk(&self, end: u64) -> KernelResult<u64> {
        if end % PAGE_SIZE != 0 {
            return Err(crate::error::ProcError::UnalignedBreak.into());
        }
        let mut state = self.inner.lock();
        let old_break = state.heap_break;
        if end == old_break {
            return Ok(old_break);
        }
        let mut mapper = PageMapper::new(state.page_table.root);
        if end > old_break {
            let mut va = old_break;
            while va < end {
                let frame = frame_pool::alloc()?;
                mapper.map_page(VirtualAddress::new(va), frame, PageFlags::USER_RW)?;
                va += PAGE_SIZE;
            }
        } else {
            let mut va = end;
            while va < old_break {
                if let Ok(frame) = mapper.unmap_page(VirtualAddress::new(va)) {
                    let _ = frame_pool::free(frame);
                }
                va += PAGE_SIZE;
            }
        }
        state.heap_break = end;
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{MemoryMapEntry, MemoryRegionKind};

    fn setup() {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 64 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }];
        let _ = frame_pool::init(&map, 0x0010_0000, 0x10_0000);
        let _ = init_kernel_template();
    }

    #[test]
    fn user_check_rejects_kernel_half() {
        setup();
        let vas = VirtualAddressSpace::new().unwrap();
        assert!(vas.user_check(0xFFFF_8000_0000_0000, 4096).is_none());
    }

    #[test]
    fn map_then_unmap_round_trips_an_already_owned_frame() {
        setup();
        let vas = VirtualAddressSpace::new().unwrap();
        let frame = frame_pool::alloc().unwrap();
        let va = VirtualAddress::new(USER_MMAP_BASE);

        vas.map(va, frame, true, true, false).unwrap();
        assert_eq!(vas.translate(va), Some(frame.addr(frame_pool::base_address())));

        let returned = vas.unmap(va).unwrap();
        assert_eq!(returned, frame);
        assert!(vas.translate(va).is_none());
        frame_pool::free(frame).unwrap();
    }

    #[test]
    fn remap_changes_permissions_but_keeps_the_frame() {
        setup();
        let vas = VirtualAddressSpace::new().unwrap();
        let frame = frame_pool::alloc().unwrap();
        let va = VirtualAddress::new(USER_MMAP_BASE);
        vas.map(va, frame, true, false, false).unwrap();

        let same_frame = vas.remap(va, true, true, false).unwrap();
        assert_eq!(same_frame, frame);
        assert_eq!(vas.translate(va), Some(frame.addr(frame_pool::base_address())));
    }
}
