//! VFS node-cache and mountpoint integration tests against the public `fs`
//! surface: create/lookup/write round trips, directory removal guards, and
//! the symlink loop bound.

extern crate alloc;

use fennix_core::{error::KernelError, fs, fs::inode};

fn bring_up() {
    let _ = fs::init();
}

#[test]
fn create_then_lookup_round_trips_a_regular_file() {
    bring_up();
    let vfs = fs::vfs();
    let root = vfs.root();
    let node = vfs
        .create(&root, "probe.txt", 0o644 | inode::S_IFREG, false)
        .expect("create");
    let found = vfs.lookup(&root, "probe.txt").expect("lookup");
    assert_eq!(node.inode.mode(), found.inode.mode());
}

#[test]
fn write_then_read_round_trips_bytes_at_an_offset() {
    bring_up();
    let vfs = fs::vfs();
    let root = vfs.root();
    let node = vfs
        .create(&root, "data.bin", 0o644 | inode::S_IFREG, false)
        .expect("create");

    let written = vfs.write(&node, b"hello world", 0).expect("write");
    assert_eq!(written, 11);

    let mut buf = [0u8; 5];
    let read = vfs.read(&node, &mut buf, 6).expect("read");
    assert_eq!(read, 5);
    assert_eq!(&buf, b"world");
}

#[test]
fn reading_a_directory_is_rejected() {
    bring_up();
    let vfs = fs::vfs();
    let root = vfs.root();
    let mut buf = [0u8; 16];
    let err = vfs.read(&root, &mut buf, 0).expect_err("directories aren't readable as files");
    assert!(matches!(err, KernelError::Fs(fennix_core::error::FsError::IsADirectory)));
}

#[test]
fn create_without_error_if_exists_returns_the_existing_node() {
    bring_up();
    let vfs = fs::vfs();
    let root = vfs.root();
    let first = vfs
        .create(&root, "shared", 0o755 | inode::S_IFDIR, false)
        .expect("first create");
    let second = vfs
        .create(&root, "shared", 0o755 | inode::S_IFDIR, false)
        .expect("second create without error_if_exists");
    assert!(alloc::sync::Arc::ptr_eq(&first, &second));

    let err = vfs
        .create(&root, "shared", 0o755 | inode::S_IFDIR, true)
        .expect_err("error_if_exists must reject a duplicate");
    assert!(matches!(err, KernelError::Fs(fennix_core::error::FsError::AlreadyExists)));
}

#[test]
fn symlink_chain_resolves_to_its_target() {
    bring_up();
    let vfs = fs::vfs();
    let root = vfs.root();
    vfs.create(&root, "target.txt", 0o644 | inode::S_IFREG, false)
        .expect("create target");
    vfs.create_link(&root, "link.txt", "target.txt").expect("create_link");

    let resolved = vfs.lookup(&root, "link.txt").expect("lookup through symlink");
    assert!(inode::is_regular(resolved.inode.mode()));
}

#[test]
fn a_self_referential_symlink_hits_the_loop_bound() {
    bring_up();
    let vfs = fs::vfs();
    let root = vfs.root();
    vfs.create_link(&root, "loopy", "loopy").expect("create_link");

    let err = vfs.lookup(&root, "loopy").expect_err("a self-referential symlink must not resolve");
    assert!(matches!(err, KernelError::Fs(fennix_core::error::FsError::LoopDetected)));
}

#[test]
fn devfs_and_procfs_are_mounted_at_boot() {
    bring_up();
    let vfs = fs::vfs();
    let root = vfs.root();
    assert!(vfs.lookup(&root, "dev").is_ok());
    assert!(vfs.lookup(&root, "proc").is_ok());
}
