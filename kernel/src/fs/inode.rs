//! The abstract file object every filesystem implements against.
//!
//! Grounded on the teacher's `VfsNode` trait (`fs/mod.rs`) and on
//! `examples/original_source/Kernel/fs/vfs.cpp`'s `Inode` vtable shape:
//! the mode carries the POSIX type bits, and the same trait covers regular
//! files, directories, and symlinks rather than splitting them into
//! separate traits.

use alloc::{string::String, sync::Arc, vec::Vec};

use crate::error::{FsError, KernelError, KernelResult};

/// POSIX file type bits, packed into the high bits of `mode` the way
/// `st_mode` does.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFIFO: u32 = 0o010000;

pub const fn file_type(mode: u32) -> u32 {
    mode & S_IFMT
}

pub fn is_dir(mode: u32) -> bool {
    file_type(mode) == S_IFDIR
}

pub fn is_regular(mode: u32) -> bool {
    file_type(mode) == S_IFREG
}

pub fn is_symlink(mode: u32) -> bool {
    file_type(mode) == S_IFLNK
}

/// Stat-equivalent metadata returned by [`Inode::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub inode: u64,
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub modified: u64,
}

/// One entry produced by [`Inode::readdir`], before the VFS layer merges it
/// with cached children and re-encodes it for the caller's buffer.
#[derive(Debug, Clone)]
pub struct RawDirEntry {
    pub name: String,
    pub inode: u64,
    pub mode: u32,
}

/// An open file object: offset plus whatever private state the filesystem
/// wants to carry (a RAM-backed `Vec` cursor, a device's internal buffer).
///
/// Grounded on the spec's Inode data model `{device, raw_device, index,
/// mode, offset, private, flags}`: `device`/`index`/`mode` live on the
/// `Inode` itself, `offset` is tracked by the caller (VFS passes it
/// explicitly to `read`/`write`/`truncate`), and `private` is whatever the
/// concrete filesystem's `Inode` impl closes over.
pub trait Inode: Send + Sync {
    fn mode(&self) -> u32;
    fn device(&self) -> u32;
    fn index(&self) -> u64;

    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let _ = (offset, buf);
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        let _ = (offset, buf);
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn truncate(&self, size: u64) -> KernelResult<()> {
        let _ = size;
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Inode>> {
        let _ = name;
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn create(&self, name: &str, mode: u32) -> KernelResult<Arc<dyn Inode>> {
        let _ = (name, mode);
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn mkdir(&self, name: &str, mode: u32) -> KernelResult<Arc<dyn Inode>> {
        let _ = (name, mode);
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn symlink(&self, name: &str, target: &str) -> KernelResult<Arc<dyn Inode>> {
        let _ = (name, target);
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn readlink(&self) -> KernelResult<String> {
        Err(KernelError::Fs(FsError::NotASymlink))
    }

    fn remove(&self, name: &str) -> KernelResult<()> {
        let _ = name;
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn rename_child(&self, old_name: &str, new_name: &str) -> KernelResult<()> {
        let _ = (old_name, new_name);
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn readdir(&self) -> KernelResult<Vec<RawDirEntry>> {
        Err(KernelError::Fs(FsError::NotSupported))
    }

    fn ioctl(&self, request: u32, arg: u64) -> KernelResult<i64> {
        let _ = (request, arg);
        Err(KernelError::Fs(FsError::NotSupported))
    }

    /// Validate a seek target before `FdTable::seek` commits it as the fd's
    /// new cursor. The default accepts any offset unchanged; a filesystem
    /// whose nodes have a fixed or synthesized size (devfs, procfs) can
    /// override this to clamp or reject it.
    fn seek(&self, offset: u64) -> KernelResult<u64> {
        Ok(offset)
    }

    fn stat(&self) -> KernelResult<Stat>;
}
