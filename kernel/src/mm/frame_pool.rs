//! Physical frame pool: a single bitmap plus a forward-moving search cursor.
//!
//! Grounded on the simpler half of the original physical memory manager:
//! one bitmap over all usable frames, a cursor that only moves forward on
//! allocation and is pulled back when a free lands below it, and a small set
//! of atomic counters for total/free/reserved frames. The original's
//! NUMA-node-aware buddy allocator and per-CPU free-list caches are dropped;
//! this pool targets a single, flat physical address range.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    bootstrap::{MemoryMapEntry, MemoryRegionKind},
    error::{FrameError, KernelResult},
    mm::PhysicalAddress,
    sync::once_lock::OnceLock,
};

pub const FRAME_SIZE: u64 = 4096;

/// Opaque handle to one physical frame, expressed as a frame index rather
/// than a raw address so the bitmap can be indexed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    pub fn addr(&self, base: PhysicalAddress) -> PhysicalAddress {
        PhysicalAddress::new(base.as_u64() + self.0 * FRAME_SIZE)
    }
}

/// Point-in-time counters over the frame pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePoolStats {
    pub total: u64,
    pub free: u64,
    pub reserved: u64,
}

struct FramePool {
    base: PhysicalAddress,
    frame_count: u64,
    bitmap: Mutex<alloc::vec::Vec<u64>>,
    search_cursor: AtomicU64,
    total: AtomicU64,
    free: AtomicU64,
    reserved: AtomicU64,
    double_free_count: AtomicUsize,
}

static POOL: OnceLock<FramePool> = OnceLock::new();

fn words_for(frame_count: u64) -> usize {
    ((frame_count + 63) / 64) as usize
}

impl FramePool {
    fn is_set(&self, bitmap: &[u64], frame: u64) -> bool {
        let word = (frame / 64) as usize;
        let bit = frame % 64;
        (bitmap[word] >> bit) & 1 == 1
    }

    fn set(&self, bitmap: &mut [u64], frame: u64) {
        let word = (frame / 64) as usize;
        let bit = frame % 64;
        bitmap[word] |= 1 << bit;
    }

    fn clear(&self, bitmap: &mut [u64], frame: u64) {
        let word = (frame / 64) as usize;
        let bit = frame % 64;
        bitmap[word] &= !(1 << bit);
    }

    fn from_map(
        memory_map: &[MemoryMapEntry],
        kernel_phys_base: u64,
        kernel_phys_size: u64,
    ) -> Self {
        let usable = memory_map
            .iter()
            .filter(|e| e.kind == MemoryRegionKind::Usable)
            .fold((u64::MAX, 0u64), |(min, max), e| {
                (min.min(e.base), max.max(e.base + e.len))
            });
        let (base, end) = if usable.1 > usable.0 {
            usable
        } else {
            (0, 0)
        };
        let frame_count = (end - base) / FRAME_SIZE;

        let mut bitmap = alloc::vec![0u64; words_for(frame_count)];
        let pool = FramePool {
            base: PhysicalAddress::new(base),
            frame_count,
            bitmap: Mutex::new(alloc::vec::Vec::new()),
            search_cursor: AtomicU64::new(0),
            total: AtomicU64::new(frame_count),
            free: AtomicU64::new(frame_count),
            reserved: AtomicU64::new(0),
            double_free_count: AtomicUsize::new(0),
        };

        // Carve out every memory-map entry that is not usable, plus the
        // kernel image itself, as permanently reserved.
        for entry in memory_map {
            if entry.kind != MemoryRegionKind::Usable {
                reserve_range(&pool, &mut bitmap, entry.base, entry.len);
            }
        }
        reserve_range(&pool, &mut bitmap, kernel_phys_base, kernel_phys_size);

        *pool.bitmap.lock() = bitmap;
        pool
    }

    fn do_alloc(&self) -> KernelResult<FrameNumber> {
        let mut bitmap = self.bitmap.lock();
        let start = self.search_cursor.load(Ordering::Acquire);

        for offset in 0..self.frame_count {
            let frame = (start + offset) % self.frame_count;
            if !self.is_set(&bitmap, frame) {
                self.set(&mut bitmap, frame);
                self.free.fetch_sub(1, Ordering::AcqRel);
                self.search_cursor
                    .store((frame + 1) % self.frame_count, Ordering::Release);
                return Ok(FrameNumber(frame));
            }
        }
        Err(FrameError::OutOfMemory.into())
    }

    fn do_free(&self, frame: FrameNumber) -> KernelResult<()> {
        if frame.0 >= self.frame_count {
            return Err(FrameError::InvalidFrame { frame: frame.0 }.into());
        }
        let mut bitmap = self.bitmap.lock();
        if !self.is_set(&bitmap, frame.0) {
            self.double_free_count.fetch_add(1, Ordering::AcqRel);
            log::warn!("frame_pool: double-free of frame {}", frame.0);
            return Ok(());
        }
        self.clear(&mut bitmap, frame.0);
        self.free.fetch_add(1, Ordering::AcqRel);

        let cursor = self.search_cursor.load(Ordering::Acquire);
        if frame.0 < cursor {
            self.search_cursor.store(frame.0, Ordering::Release);
        }
        Ok(())
    }

    fn do_reserve(&self, frame: FrameNumber) -> KernelResult<()> {
        if frame.0 >= self.frame_count {
            return Err(FrameError::InvalidFrame { frame: frame.0 }.into());
        }
        let mut bitmap = self.bitmap.lock();
        if self.is_set(&bitmap, frame.0) {
            return Err(FrameError::ReservedConflict { frame: frame.0 }.into());
        }
        self.set(&mut bitmap, frame.0);
        self.free.fetch_sub(1, Ordering::AcqRel);
        self.reserved.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn do_unreserve(&self, frame: FrameNumber) -> KernelResult<()> {
        let mut bitmap = self.bitmap.lock();
        if !self.is_set(&bitmap, frame.0) {
            return Ok(());
        }
        self.clear(&mut bitmap, frame.0);
        self.free.fetch_add(1, Ordering::AcqRel);
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Reserve every frame overlapping `[phys_base, phys_base + len)`,
    /// skipping frames already reserved. Used both during `from_map` (ACPI
    /// reclaim/NVS/bad-memory entries, kernel image) and after init (RSDP,
    /// boot modules) once the bitmap is behind the pool's mutex.
    fn do_reserve_range(&self, phys_base: u64, len: u64) -> KernelResult<()> {
        if phys_base < self.base.as_u64() {
            return Ok(());
        }
        let start = (phys_base - self.base.as_u64()) / FRAME_SIZE;
        let count = (len + FRAME_SIZE - 1) / FRAME_SIZE;
        let mut bitmap = self.bitmap.lock();
        for i in 0..count {
            let frame = start + i;
            if frame >= self.frame_count {
                break;
            }
            if !self.is_set(&bitmap, frame) {
                self.set(&mut bitmap, frame);
                self.free.fetch_sub(1, Ordering::AcqRel);
                self.reserved.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    /// First-fit contiguous run of `count` free frames, marked used as one
    /// unit. Unlike `do_alloc`, which hands out whatever single frame the
    /// cursor lands on, this never wraps mid-run -- a run that would wrap
    /// past the end of the bitmap is rejected rather than split.
    fn do_request_pages(&self, count: u64) -> KernelResult<FrameNumber> {
        if count == 0 || count > self.frame_count {
            return Err(FrameError::NoContiguousRun { frames: count }.into());
        }
        let mut bitmap = self.bitmap.lock();
        let mut run_start = 0u64;
        let mut run_len = 0u64;
        for frame in 0..self.frame_count {
            if self.is_set(&bitmap, frame) {
                run_len = 0;
                run_start = frame + 1;
                continue;
            }
            run_len += 1;
            if run_len == count {
                for f in run_start..run_start + count {
                    self.set(&mut bitmap, f);
                }
                self.free.fetch_sub(count, Ordering::AcqRel);
                let cursor = self.search_cursor.load(Ordering::Acquire);
                if run_start < cursor {
                    self.search_cursor.store(run_start, Ordering::Release);
                }
                return Ok(FrameNumber(run_start));
            }
        }
        Err(FrameError::NoContiguousRun { frames: count }.into())
    }

    /// Mark `count` frames starting at `base` used without searching --
    /// the caller already knows the physical range (e.g. a DMA buffer
    /// handed out by firmware). Rolls back what it locked if any frame in
    /// the range is already reserved.
    fn do_lock_pages(&self, base: FrameNumber, count: u64) -> KernelResult<()> {
        for i in 0..count {
            let frame = FrameNumber(base.0 + i);
            if let Err(e) = self.do_reserve(frame) {
                for j in 0..i {
                    let _ = self.do_unreserve(FrameNumber(base.0 + j));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn do_stats(&self) -> FramePoolStats {
        FramePoolStats {
            total: self.total.load(Ordering::Acquire),
            free: self.free.load(Ordering::Acquire),
            reserved: self.reserved.load(Ordering::Acquire),
        }
    }
}

/// Initialize the global frame pool from the boot memory map.
///
/// `kernel_phys_base`/`kernel_phys_size` are reserved up front so the
/// allocator never hands out frames the kernel image itself occupies.
/// Calling this more than once is a no-op: the global pool is single-init.
pub fn init(
    memory_map: &[MemoryMapEntry],
    kernel_phys_base: u64,
    kernel_phys_size: u64,
) -> KernelResult<()> {
    let pool = FramePool::from_map(memory_map, kernel_phys_base, kernel_phys_size);
    let _ = POOL.set(pool);
    Ok(())
}

fn reserve_range(pool: &FramePool, bitmap: &mut [u64], phys_base: u64, len: u64) {
    if phys_base < pool.base.as_u64() {
        return;
    }
    let start = (phys_base - pool.base.as_u64()) / FRAME_SIZE;
    let count = (len + FRAME_SIZE - 1) / FRAME_SIZE;
    for i in 0..count {
        let frame = start + i;
        if frame >= pool.frame_count {
            break;
        }
        if !pool.is_set(bitmap, frame) {
            pool.set(bitmap, frame);
            pool.free.fetch_sub(1, Ordering::AcqRel);
            pool.reserved.fetch_add(1, Ordering::AcqRel);
        }
    }
}

fn pool() -> &'static FramePool {
    POOL.get().expect("frame pool not initialized")
}

/// Allocate a single free frame, returning [`FrameError::OutOfMemory`] when
/// the pool is exhausted. Search starts at `search_cursor` and wraps once.
pub fn alloc() -> KernelResult<FrameNumber> {
    pool().do_alloc()
}

/// Release a previously allocated frame. Freeing a frame that is already
/// free is a double-free: it is counted and logged, not treated as fatal,
/// since a wedged caller should not be able to crash the allocator.
pub fn free(frame: FrameNumber) -> KernelResult<()> {
    pool().do_free(frame)
}

/// Reserve a specific frame for boot-time fencing (e.g. modules loaded
/// after the frame map was parsed). Reserving an already-reserved frame is
/// a conflict, not a crash.
pub fn reserve(frame: FrameNumber) -> KernelResult<()> {
    pool().do_reserve(frame)
}

/// Undo a boot-time [`reserve`].
pub fn unreserve(frame: FrameNumber) -> KernelResult<()> {
    pool().do_unreserve(frame)
}

/// Reserve every frame overlapping a physical range, e.g. the RSDP or a
/// boot module the memory map didn't already carve out. A no-op past the
/// end of the pool or below its base.
pub fn reserve_physical_range(phys_base: u64, len: u64) -> KernelResult<()> {
    pool().do_reserve_range(phys_base, len)
}

/// Allocate a contiguous run of `count` frames as a single unit.
pub fn request_pages(count: u64) -> KernelResult<FrameNumber> {
    pool().do_request_pages(count)
}

/// Pin `count` frames starting at `base`, bypassing the free-frame search.
pub fn lock_pages(base: FrameNumber, count: u64) -> KernelResult<()> {
    pool().do_lock_pages(base, count)
}

/// Pin a single frame. Shorthand for `lock_pages(frame, 1)`.
pub fn lock_page(frame: FrameNumber) -> KernelResult<()> {
    pool().do_lock_pages(frame, 1)
}

/// Base physical address the pool's frame numbers are relative to.
pub fn base_address() -> PhysicalAddress {
    pool().base
}

pub fn stats() -> FramePoolStats {
    pool().do_stats()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> [MemoryMapEntry; 1] {
        [MemoryMapEntry {
            base: 0x0010_0000,
            len: 16 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }]
    }

    #[test]
    fn alloc_then_free_restores_count() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let before = pool.do_stats().free;
        let f = pool.do_alloc().unwrap();
        assert_eq!(pool.do_stats().free, before - 1);
        pool.do_free(f).unwrap();
        assert_eq!(pool.do_stats().free, before);
    }

    #[test]
    fn cursor_pulls_back_on_free_below_it() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let a = pool.do_alloc().unwrap();
        let _b = pool.do_alloc().unwrap();
        pool.do_free(a).unwrap();
        let c = pool.do_alloc().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn double_free_is_not_fatal() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let f = pool.do_alloc().unwrap();
        pool.do_free(f).unwrap();
        assert!(pool.do_free(f).is_ok());
    }

    #[test]
    fn kernel_image_is_reserved() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        assert!(pool.do_stats().reserved >= 16);
    }

    #[test]
    fn request_pages_returns_a_contiguous_run() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let base = pool.do_request_pages(4).unwrap();
        for i in 0..4 {
            assert!(pool.is_set(&pool.bitmap.lock(), base.0 + i));
        }
    }

    #[test]
    fn request_pages_fails_past_pool_capacity() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let total = pool.do_stats().total;
        assert!(matches!(
            pool.do_request_pages(total + 1),
            Err(crate::error::KernelError::Frame(FrameError::NoContiguousRun { .. }))
        ));
    }

    #[test]
    fn lock_pages_marks_a_range_used_without_search() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let before = pool.do_stats().free;
        pool.do_lock_pages(FrameNumber(500), 3).unwrap();
        assert_eq!(pool.do_stats().free, before - 3);
        assert!(pool.do_lock_pages(FrameNumber(500), 1).is_err(), "already locked");
    }

    #[test]
    fn reserve_range_skips_already_reserved_frames() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let before = pool.do_stats().reserved;
        pool.do_reserve_range(0x0010_0000, 0x10_0000).unwrap();
        assert_eq!(pool.do_stats().reserved, before, "kernel image was already reserved");
    }

    #[test]
    fn out_of_memory_when_exhausted() {
        let pool = FramePool::from_map(&map(), 0x0010_0000, 0x10_0000);
        let total = pool.do_stats().free;
        for _ in 0..total {
            pool.do_alloc().unwrap();
        }
        assert!(matches!(
            pool.do_alloc(),
            Err(crate::error::KernelError::Frame(FrameError::OutOfMemory))
        ));
    }
}
