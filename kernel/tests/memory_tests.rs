//! Frame pool and virtual address space integration tests, exercising the
//! public `mm` surface the way `bootstrap::init` drives it at real boot
//! rather than through any single module's own unit tests.

extern crate alloc;

use fennix_core::{
    bootstrap::{MemoryMapEntry, MemoryRegionKind},
    mm::{frame_pool, vas::VirtualAddressSpace, VirtualAddress},
};

fn fresh_map() -> [MemoryMapEntry; 1] {
    [MemoryMapEntry {
        base: 0x0010_0000,
        len: 32 * 1024 * 1024,
        kind: MemoryRegionKind::Usable,
    }]
}

#[test]
fn frame_pool_alloc_and_free_round_trips_stats() {
    let map = fresh_map();
    frame_pool::init(&map, 0x0010_0000, 0x10_0000).expect("frame_pool::init");
    let before = frame_pool::stats().free;

    let frame = frame_pool::alloc().expect("alloc");
    assert_eq!(frame_pool::stats().free, before - 1);

    frame_pool::free(frame).expect("free");
    assert_eq!(frame_pool::stats().free, before);
}

#[test]
fn frame_pool_exhaustion_is_reported_not_panicked() {
    let map = [MemoryMapEntry {
        base: 0x0010_0000,
        len: 4096,
        kind: MemoryRegionKind::Usable,
    }];
    frame_pool::init(&map, 0x0010_0000, 0x10_0000).expect("frame_pool::init");

    let first = frame_pool::alloc();
    let second = frame_pool::alloc();
    assert!(first.is_ok());
    assert!(second.is_err(), "a single-frame pool must refuse a second allocation");
}

#[test]
fn vas_alloc_region_then_free_region_round_trips() {
    let map = fresh_map();
    frame_pool::init(&map, 0x0010_0000, 0x10_0000).expect("frame_pool::init");
    fennix_core::mm::vas::init_kernel_template().expect("kernel template");

    let vas = VirtualAddressSpace::new().expect("vas");
    let addr = vas
        .alloc_region(4, true, true, false, None, false)
        .expect("alloc_region");
    assert!(vas.translate(addr).is_some());

    vas.free_region(addr).expect("free_region");
    assert!(vas.translate(addr).is_none());
}

#[test]
fn brk_grows_then_shrinks_the_heap_break() {
    let map = fresh_map();
    frame_pool::init(&map, 0x0010_0000, 0x10_0000).expect("frame_pool::init");
    fennix_core::mm::vas::init_kernel_template().expect("kernel template");

    let vas = VirtualAddressSpace::new().expect("vas");
    let start = vas.heap_break();
    let grown = vas.brk(start + 2 * 4096).expect("brk grow");
    assert_eq!(grown, start + 2 * 4096);

    let shrunk = vas.brk(start + 4096).expect("brk shrink");
    assert_eq!(shrunk, start + 4096);
    assert_eq!(vas.heap_break(), start + 4096);
}

#[test]
fn brk_rejects_an_unaligned_target() {
    let map = fresh_map();
    frame_pool::init(&map, 0x0010_0000, 0x10_0000).expect("frame_pool::init");
    fennix_core::mm::vas::init_kernel_template().expect("kernel template");

    let vas = VirtualAddressSpace::new().expect("vas");
    let start = vas.heap_break();
    assert!(vas.brk(start + 1).is_err());
}

#[test]
fn fork_deep_copies_allocated_regions_into_the_child() {
    let map = fresh_map();
    frame_pool::init(&map, 0x0010_0000, 0x10_0000).expect("frame_pool::init");
    fennix_core::mm::vas::init_kernel_template().expect("kernel template");

    let parent = VirtualAddressSpace::new().expect("parent vas");
    let addr = parent
        .alloc_region(1, true, true, false, None, false)
        .expect("alloc_region");

    let child = parent.fork().expect("fork");
    assert!(child.translate(addr).is_some());
    assert_ne!(
        child.translate(addr).unwrap().as_u64(),
        parent.translate(addr).unwrap().as_u64(),
        "fork must give the child its own physical frame, not alias the parent's"
    );
}

#[test]
fn fork_carries_an_unmaterialized_private_cow_region_to_the_child() {
    let map = fresh_map();
    frame_pool::init(&map, 0x0010_0000, 0x10_0000).expect("frame_pool::init");
    fennix_core::mm::vas::init_kernel_template().expect("kernel template");

    let parent = VirtualAddressSpace::new().expect("parent vas");
    let addr = parent
        .create_cow_region(VirtualAddress::new(0x0000_7fff_0000_0000), 4096, true, true, false, true, false)
        .expect("create_cow_region");
    assert!(parent.translate(addr).is_none(), "a private CoW region is lazily materialized");

    let child = parent.fork().expect("fork");
    assert!(child.handle_cow(addr), "the child must materialize its copy of the region on first fault");
    assert!(child.translate(addr).is_some());
}
