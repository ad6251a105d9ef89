//! `brk`/`mmap` surface over a process's address space.
//!
//! Grounded on `mm::vas::VirtualAddressSpace`'s `alloc_region`/`brk` for the
//! mechanics; this module adds only the syscall-facing argument validation
//! (page alignment, `fd == -1` requires `MAP_ANONYMOUS`) the spec's
//! `mmap`/`brk` contract calls out, then delegates.

use alloc::sync::Arc;

use crate::{
    error::{KernelError, KernelResult, VmaError},
    mm::{
        phys_to_virt_addr,
        vas::{VirtualAddressSpace, PAGE_SIZE},
        VirtualAddress,
    },
    process::fd_table::FdTable,
};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MmapFlags: u32 {
        const ANONYMOUS = 0b0001;
        const PRIVATE    = 0b0010;
        const SHARED     = 0b0100;
        const FIXED      = 0b1000;
    }
}

/// Grow or shrink the heap to `end`, delegating to [`VirtualAddressSpace::brk`].
pub fn brk(vas: &VirtualAddressSpace, end: u64) -> KernelResult<u64> {
    vas.brk(end)
}

/// `mmap(addr, length, read, write, exec, flags, fd, offset)`. Anonymous
/// private mappings are backed by fresh zeroed frames; file-backed private
/// mappings additionally read `length` bytes from `fd` at `offset` into the
/// freshly allocated region. Shared mappings are reserved (tracked as a CoW
/// region, never actually shared between address spaces) since nothing in
/// this substrate runs more than one address space against the same
/// physical pages outside of fork.
#[allow(clippy::too_many_arguments)]
pub fn mmap(
    vas: &VirtualAddressSpace,
    fds: &FdTable,
    addr: Option<u64>,
    length: usize,
    read: bool,
    write: bool,
    exec: bool,
    flags: MmapFlags,
    fd: i64,
    offset: u64,
) -> KernelResult<u64> {
    if length == 0 {
        return Err(VmaError::CountMismatch { expected: 1, got: 0 }.into());
    }
    if fd < 0 && !flags.contains(MmapFlags::ANONYMOUS) {
        return Err(KernelError::InvalidArgument { name: "fd" });
    }
    if fd >= 0 && offset % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument { name: "offset" });
    }

    let pages = (length as u64).div_ceil(PAGE_SIZE) as usize;
    let fixed = if flags.contains(MmapFlags::FIXED) {
        addr.map(VirtualAddress::new)
    } else {
        None
    };

    if flags.contains(MmapFlags::SHARED) {
        let base = match fixed {
            Some(va) => va,
            None => return vas.alloc_region(pages, read, write, exec, None, false).map(|va| va.as_u64()),
        };
        return vas
            .create_cow_region(base, pages * PAGE_SIZE as usize, read, write, exec, true, true)
            .map(|va| va.as_u64());
    }

    let base = vas.alloc_region(pages, read, write, exec, fixed, false)?;

    if flags.contains(MmapFlags::ANONYMOUS) || fd < 0 {
        return Ok(base.as_u64());
    }

    let mut remaining = length;
    let mut file_offset = offset;
    let mut cursor = base.as_u64();
    let mut buf = [0u8; 512];
    while remaining > 0 {
        // Never read across a page boundary in one go: each page of
        // `cursor` is translated independently below, since `vas` need not
        // be the currently active address space and its pages need not be
        // physically contiguous.
        let page_left = (PAGE_SIZE - cursor % PAGE_SIZE) as usize;
        let chunk = remaining.min(buf.len()).min(page_left);
        let n = fds.pread(fd as u32, &mut buf[..chunk], file_offset)?;
        if n == 0 {
            break;
        }
        let phys = vas
            .translate(VirtualAddress::new(cursor))
            .ok_or(KernelError::InvalidArgument { name: "addr" })?;
        // SAFETY: `phys` is the frame `alloc_region` just mapped read/write
        // for this address space; `phys_to_virt_addr` resolves it through
        // the kernel's physmap, which is valid regardless of which address
        // space's page tables are currently active.
        unsafe {
            let dst = phys_to_virt_addr(phys) as *mut u8;
            core::ptr::copy_nonoverlapping(buf.as_ptr(), dst, n);
        }
        cursor += n as u64;
        file_offset += n as u64;
        remaining -= n;
    }

    Ok(base.as_u64())
}

/// `munmap(addr)`: delegates to [`VirtualAddressSpace::free_region`].
pub fn munmap(vas: &VirtualAddressSpace, addr: u64) -> KernelResult<()> {
    vas.free_region(VirtualAddress::new(addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{MemoryMapEntry, MemoryRegionKind};

    fn fresh_vas() -> Arc<VirtualAddressSpace> {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 16 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }];
        let _ = crate::mm::frame_pool::init(&map, 0x0010_0000, 0x10_0000);
        let _ = crate::mm::vas::init_kernel_template();
        Arc::new(VirtualAddressSpace::new().expect("vas"))
    }

    #[test]
    fn anonymous_mmap_then_munmap_round_trips() {
        let vas = fresh_vas();
        let fds = FdTable::new();
        let addr = mmap(
            &vas,
            &fds,
            None,
            4096,
            true,
            true,
            false,
            MmapFlags::ANONYMOUS | MmapFlags::PRIVATE,
            -1,
            0,
        )
        .expect("mmap");
        assert!(addr > 0);
        munmap(&vas, addr).expect("munmap");
    }

    #[test]
    fn negative_fd_without_anonymous_flag_rejected() {
        let vas = fresh_vas();
        let fds = FdTable::new();
        let result = mmap(
            &vas,
            &fds,
            None,
            4096,
            true,
            true,
            false,
            MmapFlags::PRIVATE,
            -1,
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn brk_delegates_to_vas() {
        let vas = fresh_vas();
        let start = vas.heap_break();
        let grown = brk(&vas, start + PAGE_SIZE).expect("brk grow");
        assert_eq!(grown, start + PAGE_SIZE);
    }
}
