//! Per-process file descriptor table.
//!
//! Grounded on the teacher's process-level fd bookkeeping idiom (a locked
//! map keyed by small integer handles) and on the VFS open-file model
//! `examples/original_source/Kernel/fs/vfs.cpp` uses: the open-file
//! description (node + offset + flags) is distinct from the fd number that
//! names it, so `dup`/`dup2` share the description rather than copying it.

use alloc::{collections::BTreeMap, string::String, sync::Arc};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    error::{FsError, KernelError, KernelResult},
    fs::{self, NodeCache},
};

/// `lseek`'s reference point for a relative offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Current,
    End,
}

bitflags::bitflags! {
    /// Open-flags bit layout, POSIX-shaped per the spec's fd operation
    /// contract.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ       = 0b0000_0001;
        const WRITE      = 0b0000_0010;
        const CREATE     = 0b0000_0100;
        const TRUNCATE   = 0b0000_1000;
        const APPEND     = 0b0001_0000;
        const EXCLUSIVE  = 0b0010_0000;
        const CLOEXEC    = 0b0100_0000;
        const DIRECTORY  = 0b1000_0000;
    }
}

/// An open file description: the (node, offset, flags) triple that a fd
/// number resolves to. Duplicated fds (`dup`/`dup2`) point at the same
/// `OpenFile`, so advancing the offset through one is visible through all
/// of them.
pub struct OpenFile {
    pub node: Arc<NodeCache>,
    offset: AtomicU64,
    flags: Mutex<OpenFlags>,
}

impl OpenFile {
    fn new(node: Arc<NodeCache>, flags: OpenFlags, initial_offset: u64) -> Arc<Self> {
        Arc::new(Self {
            node,
            offset: AtomicU64::new(initial_offset),
            flags: Mutex::new(flags),
        })
    }

    pub fn flags(&self) -> OpenFlags {
        *self.flags.lock()
    }

    fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }
}

/// A process's file descriptor table: fd number -> shared open-file
/// description. Lowest-free-number allocation, matching POSIX `open`.
pub struct FdTable {
    entries: Mutex<BTreeMap<u32, Arc<OpenFile>>>,
}

/// Bound on open fds per process, per the spec's resource limits.
pub const MAX_OPEN_FILES: u32 = 1024;

impl FdTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Build a fresh table pre-seeded with stdin/stdout/stderr pointed at
    /// `console`, mirroring the teacher's init-process fd setup.
    pub fn with_stdio(console: Arc<NodeCache>) -> Self {
        let table = Self::new();
        let flags = OpenFlags::READ | OpenFlags::WRITE;
        let mut entries = table.entries.lock();
        for fd in 0..3u32 {
            entries.insert(fd, OpenFile::new(console.clone(), flags, 0));
        }
        drop(entries);
        table
    }

    fn lowest_free(entries: &BTreeMap<u32, Arc<OpenFile>>) -> KernelResult<u32> {
        let mut candidate = 0u32;
        for &fd in entries.keys() {
            if fd == candidate {
                candidate += 1;
            } else if fd > candidate {
                break;
            }
        }
        if candidate >= MAX_OPEN_FILES {
            return Err(KernelError::Fs(FsError::TooManyOpenFiles));
        }
        Ok(candidate)
    }

    /// Resolve `path` against `base` (the caller picks cwd or root),
    /// honoring `O_CREAT`/`O_EXCL`/`O_TRUNC`/`O_APPEND`, and install the
    /// result at the lowest free fd.
    pub fn open(
        &self,
        base: &Arc<NodeCache>,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> KernelResult<u32> {
        let vfs = fs::vfs();
        let node = match vfs.lookup(base, path) {
            Ok(node) => {
                if flags.contains(OpenFlags::EXCLUSIVE) && flags.contains(OpenFlags::CREATE) {
                    return Err(KernelError::Fs(FsError::AlreadyExists));
                }
                node
            }
            Err(KernelError::Fs(FsError::NotFound)) if flags.contains(OpenFlags::CREATE) => {
                let (parent_path, name) = split_parent(path);
                let parent = vfs.lookup(base, parent_path)?;
                vfs.create(&parent, name, fs::inode::S_IFREG | (mode & 0o7777), true)?
            }
            Err(e) => return Err(e),
        };

        if flags.contains(OpenFlags::TRUNCATE) && fs::inode::is_regular(node.inode.mode()) {
            vfs.truncate(&node, 0)?;
        }

        let initial_offset = if flags.contains(OpenFlags::APPEND) {
            vfs.stat(&node)?.size
        } else {
            0
        };

        let open_file = OpenFile::new(node, flags, initial_offset);
        let mut entries = self.entries.lock();
        let fd = Self::lowest_free(&entries)?;
        entries.insert(fd, open_file);
        Ok(fd)
    }

    fn get(&self, fd: u32) -> KernelResult<Arc<OpenFile>> {
        self.entries
            .lock()
            .get(&fd)
            .cloned()
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))
    }

    pub fn read(&self, fd: u32, buf: &mut [u8]) -> KernelResult<usize> {
        let file = self.get(fd)?;
        if !file.flags().contains(OpenFlags::READ) {
            return Err(KernelError::Fs(FsError::NotSupported));
        }
        let offset = file.offset();
        let n = fs::vfs().read(&file.node, buf, offset)?;
        file.offset.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    pub fn write(&self, fd: u32, buf: &[u8]) -> KernelResult<usize> {
        let file = self.get(fd)?;
        if !file.flags().contains(OpenFlags::WRITE) {
            return Err(KernelError::Fs(FsError::NotSupported));
        }
        let offset = if file.flags().contains(OpenFlags::APPEND) {
            fs::vfs().stat(&file.node)?.size
        } else {
            file.offset()
        };
        let n = fs::vfs().write(&file.node, buf, offset)?;
        file.offset.store(offset + n as u64, Ordering::Release);
        Ok(n)
    }

    /// Read `buf.len()` bytes from `fd`'s node at an explicit `offset`
    /// without disturbing the fd's own cursor, for callers (like `mmap`)
    /// that need positioned reads.
    pub fn pread(&self, fd: u32, buf: &mut [u8], offset: u64) -> KernelResult<usize> {
        let file = self.get(fd)?;
        if !file.flags().contains(OpenFlags::READ) {
            return Err(KernelError::Fs(FsError::NotSupported));
        }
        fs::vfs().read(&file.node, buf, offset)
    }

    /// Move `fd`'s cursor relative to `whence`, rejecting a negative
    /// result, and let the underlying inode validate the target before it
    /// is committed.
    pub fn seek(&self, fd: u32, offset: i64, whence: SeekWhence) -> KernelResult<u64> {
        let file = self.get(fd)?;
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Current => file.offset(),
            SeekWhence::End => fs::vfs().stat(&file.node)?.size,
        };
        let target = base as i64 + offset;
        if target < 0 {
            return Err(KernelError::InvalidArgument { name: "seek offset" });
        }
        let validated = file.node.inode.seek(target as u64)?;
        file.offset.store(validated, Ordering::Release);
        Ok(validated)
    }

    /// Forward to the inode's `ioctl`, per the spec's fd operation table.
    pub fn ioctl(&self, fd: u32, request: u32, arg: u64) -> KernelResult<i64> {
        let file = self.get(fd)?;
        file.node.inode.ioctl(request, arg)
    }

    pub fn close(&self, fd: u32) -> KernelResult<()> {
        self.entries
            .lock()
            .remove(&fd)
            .map(|_| ())
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))
    }

    /// Duplicate `fd` to the lowest free number, sharing the same
    /// open-file description (offset and flags included).
    pub fn dup(&self, fd: u32) -> KernelResult<u32> {
        let mut entries = self.entries.lock();
        let file = entries
            .get(&fd)
            .cloned()
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
        let new_fd = Self::lowest_free(&entries)?;
        entries.insert(new_fd, file);
        Ok(new_fd)
    }

    /// Duplicate `old` onto `new`, closing whatever `new` previously held.
    pub fn dup2(&self, old: u32, new: u32) -> KernelResult<u32> {
        let mut entries = self.entries.lock();
        let file = entries
            .get(&old)
            .cloned()
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))?;
        if old == new {
            return Ok(new);
        }
        entries.insert(new, file);
        Ok(new)
    }

    /// Drop every fd flagged `O_CLOEXEC`, called on successful `exec`.
    pub fn close_on_exec(&self) {
        self.entries
            .lock()
            .retain(|_, file| !file.flags().contains(OpenFlags::CLOEXEC));
    }

    /// Clone the whole table for `fork`, sharing each open-file description
    /// with the parent (same `Arc`) but honoring `O_CLOEXEC` is left to the
    /// subsequent `exec`, matching the fork-then-exec contract.
    pub fn fork(&self) -> Self {
        let entries = self.entries.lock();
        Self {
            entries: Mutex::new(entries.clone()),
        }
    }

    /// Replace this table's entries with `other`'s, used by `fork` to swap
    /// a freshly cloned table into a just-constructed child `Process`.
    pub fn adopt(&self, other: FdTable) {
        *self.entries.lock() = other.entries.into_inner();
    }

    pub fn stat(&self, fd: u32) -> KernelResult<fs::inode::Stat> {
        let file = self.get(fd)?;
        fs::vfs().stat(&file.node)
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (".", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{inode, ramfs};

    fn fresh_fd_table() -> (FdTable, Arc<NodeCache>) {
        let _ = fs::init();
        let table = FdTable::new();
        (table, fs::vfs().root())
    }

    #[test]
    fn open_create_write_read_round_trips() {
        let (table, root) = fresh_fd_table();
        let fd = table
            .open(
                &root,
                "hello.txt",
                OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
                0o644,
            )
            .expect("open");
        table.write(fd, b"hi").expect("write");
        table.close(fd).unwrap();

        let fd2 = table
            .open(&root, "hello.txt", OpenFlags::READ, 0)
            .expect("reopen");
        let mut buf = [0u8; 8];
        let n = table.read(fd2, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"hi");
    }

    #[test]
    fn dup_shares_offset_with_original() {
        let (table, root) = fresh_fd_table();
        let fd = table
            .open(
                &root,
                "shared.txt",
                OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
                0o644,
            )
            .unwrap();
        table.write(fd, b"abcd").unwrap();
        let dup_fd = table.dup(fd).unwrap();
        table.write(dup_fd, b"ef").unwrap();

        let mut buf = [0u8; 8];
        let n = table.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ef");
    }

    #[test]
    fn seek_set_then_read_starts_at_the_new_offset() {
        let (table, root) = fresh_fd_table();
        let fd = table
            .open(
                &root,
                "seek.txt",
                OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
                0o644,
            )
            .unwrap();
        table.write(fd, b"hello world").unwrap();

        let pos = table.seek(fd, 6, SeekWhence::Set).unwrap();
        assert_eq!(pos, 6);
        let mut buf = [0u8; 5];
        let n = table.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn seek_end_then_current_are_relative_to_the_right_base() {
        let (table, root) = fresh_fd_table();
        let fd = table
            .open(
                &root,
                "seek2.txt",
                OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
                0o644,
            )
            .unwrap();
        table.write(fd, b"0123456789").unwrap();

        let end = table.seek(fd, -4, SeekWhence::End).unwrap();
        assert_eq!(end, 6);
        let forward = table.seek(fd, 2, SeekWhence::Current).unwrap();
        assert_eq!(forward, 8);
    }

    #[test]
    fn seek_before_the_start_of_the_file_is_rejected() {
        let (table, root) = fresh_fd_table();
        let fd = table
            .open(
                &root,
                "seek3.txt",
                OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
                0o644,
            )
            .unwrap();
        assert!(matches!(
            table.seek(fd, -1, SeekWhence::Set),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn close_on_exec_drops_only_flagged_fds() {
        let (table, root) = fresh_fd_table();
        let keep = table
            .open(
                &root,
                "keep.txt",
                OpenFlags::READ | OpenFlags::CREATE,
                0o644,
            )
            .unwrap();
        let drop_fd = table
            .open(
                &root,
                "drop.txt",
                OpenFlags::READ | OpenFlags::CREATE | OpenFlags::CLOEXEC,
                0o644,
            )
            .unwrap();
        table.close_on_exec();
        assert!(table.stat(keep).is_ok());
        assert!(matches!(
            table.stat(drop_fd),
            Err(KernelError::Fs(FsError::BadFileDescriptor))
        ));
    }

    #[test]
    fn open_missing_without_create_fails() {
        let (table, root) = fresh_fd_table();
        assert!(matches!(
            table.open(&root, "nope.txt", OpenFlags::READ, 0),
            Err(KernelError::Fs(FsError::NotFound))
        ));
    }

    #[test]
    fn exclusive_create_on_existing_fails() {
        let (table, root) = fresh_fd_table();
        fs::vfs()
            .create(&root, "x.txt", inode::S_IFREG | 0o644, true)
            .unwrap();
        assert!(matches!(
            table.open(
                &root,
                "x.txt",
                OpenFlags::CREATE | OpenFlags::EXCLUSIVE,
                0o644
            ),
            Err(KernelError::Fs(FsError::AlreadyExists))
        ));
    }
}
