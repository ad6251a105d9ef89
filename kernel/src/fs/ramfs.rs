//! In-memory filesystem: the default root and the VFS test fixture.
//!
//! Grounded on the teacher's `RamFs`/`RamNode` (`fs/ramfs.rs`) for the
//! overall shape, generalized to implement the new [`Inode`] vtable and
//! to use the global `node_count` AtomicU64 the teacher also kept.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::inode::{is_dir, Inode, RawDirEntry, Stat, S_IFDIR, S_IFLNK, S_IFREG};
use crate::error::{FsError, KernelError, KernelResult};

enum Content {
    File(Vec<u8>),
    Dir(BTreeMap<String, Arc<RamInode>>),
    Symlink(String),
}

pub struct RamInode {
    index: u64,
    device: u32,
    mode: Mutex<u32>,
    content: Mutex<Content>,
    modified: AtomicU64,
}

impl RamInode {
    fn new(device: u32, index: u64, mode: u32, content: Content) -> Arc<Self> {
        Arc::new(Self {
            index,
            device,
            mode: Mutex::new(mode),
            content: Mutex::new(content),
            modified: AtomicU64::new(0),
        })
    }

    fn touch(&self) {
        self.modified.fetch_add(1, Ordering::Relaxed);
    }
}

impl Inode for RamInode {
    fn mode(&self) -> u32 {
        *self.mode.lock()
    }

    fn device(&self) -> u32 {
        self.device
    }

    fn index(&self) -> u64 {
        self.index
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let content = self.content.lock();
        let Content::File(data) = &*content else {
            return Err(KernelError::Fs(FsError::NotAFile));
        };
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        let mut content = self.content.lock();
        let Content::File(data) = &mut *content else {
            return Err(KernelError::Fs(FsError::NotAFile));
        };
        let offset = offset as usize;
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        drop(content);
        self.touch();
        Ok(buf.len())
    }

    fn truncate(&self, size: u64) -> KernelResult<()> {
        let mut content = self.content.lock();
        let Content::File(data) = &mut *content else {
            return Err(KernelError::Fs(FsError::NotAFile));
        };
        data.resize(size as usize, 0);
        drop(content);
        self.touch();
        Ok(())
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Inode>> {
        let content = self.content.lock();
        let Content::Dir(children) = &*content else {
            return Err(KernelError::Fs(FsError::NotADirectory));
        };
        children
            .get(name)
            .cloned()
            .map(|n| n as Arc<dyn Inode>)
            .ok_or(KernelError::Fs(FsError::NotFound))
    }

    fn create(&self, name: &str, mode: u32) -> KernelResult<Arc<dyn Inode>> {
        let mut content = self.content.lock();
        let Content::Dir(children) = &mut *content else {
            return Err(KernelError::Fs(FsError::NotADirectory));
        };
        if children.contains_key(name) {
            return Err(KernelError::Fs(FsError::AlreadyExists));
        }
        let index = next_index();
        let node = RamInode::new(self.device, index, mode | S_IFREG, Content::File(Vec::new()));
        children.insert(name.to_string(), node.clone());
        Ok(node)
    }

    fn mkdir(&self, name: &str, mode: u32) -> KernelResult<Arc<dyn Inode>> {
        let mut content = self.content.lock();
        let Content::Dir(children) = &mut *content else {
            return Err(KernelError::Fs(FsError::NotADirectory));
        };
        if children.contains_key(name) {
            return Err(KernelError::Fs(FsError::AlreadyExists));
        }
        let index = next_index();
        let node = RamInode::new(
            self.device,
            index,
            mode | S_IFDIR,
            Content::Dir(BTreeMap::new()),
        );
        children.insert(name.to_string(), node.clone());
        Ok(node)
    }

    fn symlink(&self, name: &str, target: &str) -> KernelResult<Arc<dyn Inode>> {
        let mut content = self.content.lock();
        let Content::Dir(children) = &mut *content else {
            return Err(KernelError::Fs(FsError::NotADirectory));
        };
        if children.contains_key(name) {
            return Err(KernelError::Fs(FsError::AlreadyExists));
        }
        let index = next_index();
        let node = RamInode::new(
            self.device,
            index,
            0o777 | S_IFLNK,
            Content::Symlink(target.to_string()),
        );
        children.insert(name.to_string(), node.clone());
        Ok(node)
    }

    fn readlink(&self) -> KernelResult<String> {
        let content = self.content.lock();
        match &*content {
            Content::Symlink(target) => Ok(target.clone()),
            _ => Err(KernelError::Fs(FsError::NotASymlink)),
        }
    }

    fn remove(&self, name: &str) -> KernelResult<()> {
        let mut content = self.content.lock();
        let Content::Dir(children) = &mut *content else {
            return Err(KernelError::Fs(FsError::NotADirectory));
        };
        let target = children.get(name).ok_or(KernelError::Fs(FsError::NotFound))?;
        if is_dir(target.mode()) {
            let target_content = target.content.lock();
            if let Content::Dir(grandchildren) = &*target_content {
                if !grandchildren.is_empty() {
                    return Err(KernelError::Fs(FsError::DirectoryNotEmpty));
                }
            }
        }
        children.remove(name);
        Ok(())
    }

    fn rename_child(&self, old_name: &str, new_name: &str) -> KernelResult<()> {
        let mut content = self.content.lock();
        let Content::Dir(children) = &mut *content else {
            return Err(KernelError::Fs(FsError::NotADirectory));
        };
        if children.contains_key(new_name) {
            return Err(KernelError::Fs(FsError::AlreadyExists));
        }
        let node = children.remove(old_name).ok_or(KernelError::Fs(FsError::NotFound))?;
        children.insert(new_name.to_string(), node);
        Ok(())
    }

    fn readdir(&self) -> KernelResult<Vec<RawDirEntry>> {
        let content = self.content.lock();
        let Content::Dir(children) = &*content else {
            return Err(KernelError::Fs(FsError::NotADirectory));
        };
        Ok(children
            .iter()
            .map(|(name, node)| RawDirEntry {
                name: name.clone(),
                inode: node.index,
                mode: node.mode(),
            })
            .collect())
    }

    fn stat(&self) -> KernelResult<Stat> {
        let size = match &*self.content.lock() {
            Content::File(data) => data.len() as u64,
            Content::Symlink(target) => target.len() as u64,
            Content::Dir(children) => children.len() as u64,
        };
        Ok(Stat {
            inode: self.index,
            mode: self.mode(),
            size,
            uid: 0,
            gid: 0,
            modified: self.modified.load(Ordering::Relaxed),
        })
    }
}

static NEXT_INDEX: AtomicU64 = AtomicU64::new(2);

fn next_index() -> u64 {
    NEXT_INDEX.fetch_add(1, Ordering::Relaxed)
}

/// An instance of the in-memory filesystem, bound to one `device` id.
pub struct RamFs {
    device: u32,
    root: Arc<RamInode>,
}

impl RamFs {
    pub fn new(device: u32) -> Self {
        let root = RamInode::new(device, 1, 0o755 | S_IFDIR, Content::Dir(BTreeMap::new()));
        Self { device, root }
    }

    pub fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }

    pub fn device(&self) -> u32 {
        self.device
    }
}

impl super::Filesystem for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn device(&self) -> u32 {
        self.device
    }

    fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }
}
