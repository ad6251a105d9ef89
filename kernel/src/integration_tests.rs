//! Cross-subsystem integration tests.
//!
//! These exercise the frame pool, address-space, VFS, and process table
//! together rather than in isolation, the way `bootstrap::init` drives them
//! at real boot.

#![cfg(test)]

use crate::{
    bootstrap::{BootModule, MemoryMapEntry, MemoryRegionKind, TaskingMode},
    error::KernelError,
    fs, mm, process,
};

fn fresh_memory_map() -> [MemoryMapEntry; 1] {
    [MemoryMapEntry {
        base: 0x0010_0000,
        len: 64 * 1024 * 1024,
        kind: MemoryRegionKind::Usable,
    }]
}

#[test_case]
fn frame_pool_and_vas_share_accounting() -> Result<(), KernelError> {
    let map = fresh_memory_map();
    mm::frame_pool::init(&map, 0x0010_0000, 0x10_0000)?;
    let before = mm::frame_pool::stats().free;

    let frame = mm::frame_pool::alloc()?;
    assert_eq!(mm::frame_pool::stats().free, before - 1);

    mm::frame_pool::free(frame)?;
    assert_eq!(mm::frame_pool::stats().free, before);
    Ok(())
}

#[test_case]
fn vfs_mount_then_process_table_bring_up() -> Result<(), KernelError> {
    let map = fresh_memory_map();
    mm::frame_pool::init(&map, 0x0010_0000, 0x10_0000)?;
    fs::init()?;
    process::init(TaskingMode::Multi)?;

    let pid = process::spawn_kernel_task("integration-probe")?;
    assert!(process::lookup(pid).is_some());
    Ok(())
}

#[test_case]
fn boot_modules_table_stays_within_bound() {
    let modules: [BootModule; 2] = [
        BootModule { addr: 0x20_0000, size: 4096 },
        BootModule { addr: 0x21_0000, size: 8192 },
    ];
    assert!(modules.len() <= crate::bootstrap::MAX_MODULES);
}
