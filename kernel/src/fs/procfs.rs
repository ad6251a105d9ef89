//! `/proc`: one directory per live process, each exposing its open file
//! descriptors as symlinks.
//!
//! Grounded on the teacher's `ProcFs` (`fs/procfs.rs`) for the mount
//! shape, generalized so the process substrate attaches and detaches a
//! `/proc/<pid>` directory as processes are created and reaped.

use alloc::{
    collections::BTreeMap,
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use spin::Mutex;

use super::inode::{Inode, RawDirEntry, Stat, S_IFDIR, S_IFLNK};
use crate::error::{FsError, KernelError, KernelResult};

struct ProcInode {
    index: u64,
    device: u32,
    inner: ProcInodeKind,
}

enum ProcInodeKind {
    Dir(Mutex<BTreeMap<String, Arc<ProcInode>>>),
    FdLink(Mutex<String>),
}

impl Inode for ProcInode {
    fn mode(&self) -> u32 {
        match self.inner {
            ProcInodeKind::Dir(_) => 0o555 | S_IFDIR,
            ProcInodeKind::FdLink(_) => 0o777 | S_IFLNK,
        }
    }

    fn device(&self) -> u32 {
        self.device
    }

    fn index(&self) -> u64 {
        self.index
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Inode>> {
        match &self.inner {
            ProcInodeKind::Dir(children) => children
                .lock()
                .get(name)
                .cloned()
                .map(|n| n as Arc<dyn Inode>)
                .ok_or(KernelError::Fs(FsError::NotFound)),
            ProcInodeKind::FdLink(_) => Err(KernelError::Fs(FsError::NotADirectory)),
        }
    }

    fn readlink(&self) -> KernelResult<String> {
        match &self.inner {
            ProcInodeKind::FdLink(target) => Ok(target.lock().clone()),
            ProcInodeKind::Dir(_) => Err(KernelError::Fs(FsError::NotASymlink)),
        }
    }

    fn readdir(&self) -> KernelResult<Vec<RawDirEntry>> {
        match &self.inner {
            ProcInodeKind::Dir(children) => Ok(children
                .lock()
                .iter()
                .map(|(name, node)| RawDirEntry {
                    name: name.clone(),
                    inode: node.index,
                    mode: node.mode(),
                })
                .collect()),
            ProcInodeKind::FdLink(_) => Err(KernelError::Fs(FsError::NotADirectory)),
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

fn new_dir(device: u32, index: u64) -> Arc<ProcInode> {
    Arc::new(ProcInode {
        index,
        device,
        inner: ProcInodeKind::Dir(Mutex::new(BTreeMap::new())),
    })
}

pub struct ProcFs {
    device: u32,
    root: Arc<ProcInode>,
    next_index: Mutex<u64>,
}

impl ProcFs {
    pub fn new(device: u32) -> Self {
        Self {
            device,
            root: new_dir(device, 1),
            next_index: Mutex::new(2),
        }
    }

    pub fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }

    fn alloc_index(&self) -> u64 {
        let mut next = self.next_index.lock();
        let index = *next;
        *next += 1;
        index
    }

    /// Create `/proc/<pid>` with an empty `fd/` subdirectory. Called by the
    /// task substrate from `create_process`.
    pub fn attach_process(&self, pid: u64) {
        let Some(root_dir) = self.as_dir(&self.root) else {
            return;
        };
        let pid_name = pid.to_string();
        if root_dir.lock().contains_key(&pid_name) {
            return;
        }
        let pid_dir = new_dir(self.device, self.alloc_index());
        let fd_dir = new_dir(self.device, self.alloc_index());
        if let Some(pid_children) = self.as_dir(&pid_dir) {
            pid_children.lock().insert("fd".to_string(), fd_dir);
        }
        root_dir.lock().insert(pid_name, pid_dir);
    }

    /// Remove `/proc/<pid>` entirely. Called when a PCB is reaped.
    pub fn detach_process(&self, pid: u64) {
        if let Some(root_dir) = self.as_dir(&self.root) {
            root_dir.lock().remove(&pid.to_string());
        }
    }

    /// Publish `/proc/<pid>/fd/<fd>` as a symlink describing what it
    /// points at (e.g. `ramfs:/etc/passwd`), mirroring a real `/proc`'s
    /// `readlink`-able fd entries.
    pub fn set_fd_link(&self, pid: u64, fd: u32, target: &str) {
        let Some(root_dir) = self.as_dir(&self.root) else {
            return;
        };
        let Some(pid_dir) = root_dir.lock().get(&pid.to_string()).cloned() else {
            return;
        };
        let Some(pid_children) = self.as_dir(&pid_dir) else {
            return;
        };
        let Some(fd_dir) = pid_children.lock().get("fd").cloned() else {
            return;
        };
        let Some(fd_children) = self.as_dir(&fd_dir) else {
            return;
        };
        let index = self.alloc_index();
        fd_children.lock().insert(
            format!("{fd}"),
            Arc::new(ProcInode {
                index,
                device: self.device,
                inner: ProcInodeKind::FdLink(Mutex::new(target.to_string())),
            }),
        );
    }

    #[allow(clippy::type_complexity)]
    fn as_dir<'a>(
        &self,
        node: &'a Arc<ProcInode>,
    ) -> Option<&'a Mutex<BTreeMap<String, Arc<ProcInode>>>> {
        match &node.inner {
            ProcInodeKind::Dir(children) => Some(children),
            ProcInodeKind::FdLink(_) => None,
        }
    }

    pub fn device(&self) -> u32 {
        self.device
    }
}

impl super::Filesystem for ProcFs {
    fn name(&self) -> &'static str {
        "procfs"
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
    fn attach_then_detach_process_round_trips() {
        let fs = ProcFs::new(2);
        fs.attach_process(42);
        let root = fs.root_inode();
        let pid_dir = root.lookup("42").expect("pid directory");
        assert!(pid_dir.lookup("fd").is_ok());

        fs.detach_process(42);
        assert!(matches!(
            root.lookup("42"),
            Err(KernelError::Fs(FsError::NotFound))
        ));
    }

    #[test]
    fn fd_link_readlink_reports_target() {
        let fs = ProcFs::new(2);
        fs.attach_process(7);
        fs.set_fd_link(7, 3, "ramfs:/etc/passwd");
        let root = fs.root_inode();
        let fd_dir = root.lookup("7").unwrap().lookup("fd").unwrap();
        let link = fd_dir.lookup("3").expect("fd link");
        assert_eq!(link.readlink().unwrap(), "ramfs:/etc/passwd");
    }
}
