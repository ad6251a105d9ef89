//! Device filesystem mounted at `/dev`: a handful of well-known char
//! devices plus whatever a driver registers at runtime.
//!
//! Grounded on the teacher's `DevFs`/`DevNode` (`fs/devfs.rs`) for the
//! `null`/`zero`/`console` builtins, generalized onto the new [`Inode`]
//! vtable. The teacher's block-device nodes are dropped: no block device
//! driver exists in this crate's module list.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use spin::Mutex;

use super::inode::{Inode, RawDirEntry, Stat, S_IFCHR, S_IFDIR};
use crate::error::{FsError, KernelError, KernelResult};

/// Behavior of a single character device node.
pub trait CharDevice: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> KernelResult<usize>;
    fn write(&self, buf: &[u8]) -> KernelResult<usize>;
}

struct NullDevice;
impl CharDevice for NullDevice {
    fn read(&self, _buf: &mut [u8]) -> KernelResult<usize> {
        Ok(0)
    }
    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        Ok(buf.len())
    }
}

struct ZeroDevice;
impl CharDevice for ZeroDevice {
    fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }
    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        Ok(buf.len())
    }
}

struct ConsoleDevice;
impl CharDevice for ConsoleDevice {
    fn read(&self, _buf: &mut [u8]) -> KernelResult<usize> {
        Ok(0)
    }
    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        if let Ok(s) = core::str::from_utf8(buf) {
            crate::print!("{s}");
        }
        Ok(buf.len())
    }
}

struct DevInode {
    index: u64,
    device: u32,
    inner: DevInodeKind,
}

enum DevInodeKind {
    Dir(Mutex<BTreeMap<String, Arc<DevInode>>>),
    Char(Arc<dyn CharDevice>),
}

impl Inode for DevInode {
    fn mode(&self) -> u32 {
        match self.inner {
            DevInodeKind::Dir(_) => 0o755 | S_IFDIR,
            DevInodeKind::Char(_) => 0o666 | S_IFCHR,
        }
    }

    fn device(&self) -> u32 {
        self.device
    }

    fn index(&self) -> u64 {
        self.index
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        match &self.inner {
            DevInodeKind::Char(dev) => dev.read(buf),
            DevInodeKind::Dir(_) => {
                let _ = offset;
                Err(KernelError::Fs(FsError::IsADirectory))
            }
        }
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> KernelResult<usize> {
        match &self.inner {
            DevInodeKind::Char(dev) => dev.write(buf),
            DevInodeKind::Dir(_) => Err(KernelError::Fs(FsError::IsADirectory)),
        }
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Inode>> {
        match &self.inner {
            DevInodeKind::Dir(children) => children
                .lock()
                .get(name)
                .cloned()
                .map(|n| n as Arc<dyn Inode>)
                .ok_or(KernelError::Fs(FsError::NotFound)),
            DevInodeKind::Char(_) => Err(KernelError::Fs(FsError::NotADirectory)),
        }
    }

    fn readdir(&self) -> KernelResult<Vec<RawDirEntry>> {
        match &self.inner {
            DevInodeKind::Dir(children) => Ok(children
                .lock()
                .iter()
                .map(|(name, node)| RawDirEntry {
                    name: name.clone(),
                    inode: node.index,
                    mode: node.mode(),
                })
                .collect()),
            DevInodeKind::Char(_) => Err(KernelError::Fs(FsError::NotADirectory)),
        }
    }

    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat {
            inode: self.index,
            mode: self.mode(),
            size: 0,
            uid: 0,
            gid: 0,
            modified: 0,
        })
    }
}

pub struct DevFs {
    device: u32,
    root: Arc<DevInode>,
}

impl DevFs {
    pub fn new(device: u32) -> Self {
        let root_children = BTreeMap::new();
        let root = Arc::new(DevInode {
            index: 1,
            device,
            inner: DevInodeKind::Dir(Mutex::new(root_children)),
        });
        let fs = Self { device, root };
        fs.register("null", Arc::new(NullDevice));
        fs.register("zero", Arc::new(ZeroDevice));
        fs.register("console", Arc::new(ConsoleDevice));
        fs
    }

    /// Register a new character device node under `/dev/<name>`, for
    /// drivers that attach after boot.
    pub fn register(&self, name: &str, device: Arc<dyn CharDevice>) {
        let DevInodeKind::Dir(children) = &self.root.inner else {
            unreachable!("devfs root is always a directory");
        };
        let index = children.lock().len() as u64 + 2;
        children.lock().insert(
            name.to_string(),
            Arc::new(DevInode {
                index,
                device: self.device,
                inner: DevInodeKind::Char(device),
            }),
        );
    }

    pub fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }

    pub fn device(&self) -> u32 {
        self.device
    }
}

impl super::Filesystem for DevFs {
    fn name(&self) -> &'static str {
        "devfs"
    }

    fn device(&self) -> u32 {
        self.device
    }

    fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_device_discards_writes_and_reads_eof() {
        let fs = DevFs::new(1);
        let null = fs.root_inode().lookup("null").expect("null device");
        assert_eq!(null.write(0, b"discarded").unwrap(), 9);
        let mut buf = [1u8; 4];
        assert_eq!(null.read(0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn zero_device_fills_buffer() {
        let fs = DevFs::new(1);
        let zero = fs.root_inode().lookup("zero").expect("zero device");
        let mut buf = [0xffu8; 8];
        zero.read(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
