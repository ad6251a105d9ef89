//! The in-memory, mount-aware directory graph that sits in front of every
//! filesystem's inodes.
//!
//! Grounded on `examples/original_source/Kernel/fs/vfs.cpp`'s `NodeCache`
//! (`Convert`, parent-linking, `Path` field kept canonical on insert) and on
//! the teacher's `Arc`-based node handles (`fs/mod.rs`'s `Arc<dyn VfsNode>`).
//! Unlike the teacher, children are addressed through an explicit
//! `BTreeMap<String, Arc<NodeCache>>` rather than a `Vec`, since the spec
//! requires children to be unique by name.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec::Vec,
};
use spin::Mutex;

use super::inode::Inode;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u32 {
        /// This node is the root of a mounted filesystem distinct from its
        /// parent's.
        const MOUNTPOINT = 1 << 0;
    }
}

/// One node in the cached directory tree. Every non-root node has a
/// `parent`; `path` is always the canonical absolute path to this node.
pub struct NodeCache {
    pub inode: Arc<dyn Inode>,
    /// Device id of the filesystem this node belongs to.
    pub fsi_device: u32,
    pub parent: Mutex<Option<Weak<NodeCache>>>,
    pub children: Mutex<BTreeMap<String, Arc<NodeCache>>>,
    pub name: Mutex<String>,
    pub path: Mutex<String>,
    /// Symlink target text, populated only for symlink nodes.
    pub link: Mutex<Option<String>>,
    pub flags: Mutex<NodeFlags>,
}

impl NodeCache {
    /// Wrap `inode` as a standalone root node (no parent).
    pub fn new_root(inode: Arc<dyn Inode>, fsi_device: u32) -> Arc<Self> {
        Arc::new(Self {
            inode,
            fsi_device,
            parent: Mutex::new(None),
            children: Mutex::new(BTreeMap::new()),
            name: Mutex::new(String::from("/")),
            path: Mutex::new(String::from("/")),
            link: Mutex::new(None),
            flags: Mutex::new(NodeFlags::empty()),
        })
    }

    /// Wrap `inode` as a child of `parent` named `name`, link it into the
    /// parent's children map, and return it. The node inherits the
    /// parent's `fsi_device` unless `fsi_device` is given explicitly --
    /// mountpoints pass the new filesystem's device id instead.
    pub fn insert_child(
        parent: &Arc<NodeCache>,
        name: &str,
        inode: Arc<dyn Inode>,
        fsi_device: Option<u32>,
    ) -> Arc<Self> {
        let path = join_path(&parent.path.lock(), name);
        let child = Arc::new(Self {
            inode,
            fsi_device: fsi_device.unwrap_or(parent.fsi_device),
            parent: Mutex::new(Some(Arc::downgrade(parent))),
            children: Mutex::new(BTreeMap::new()),
            name: Mutex::new(name.to_string()),
            path: Mutex::new(path),
            link: Mutex::new(None),
            flags: Mutex::new(NodeFlags::empty()),
        });
        parent
            .children
            .lock()
            .insert(name.to_string(), child.clone());
        child
    }

    pub fn is_mountpoint(&self) -> bool {
        self.flags.lock().contains(NodeFlags::MOUNTPOINT)
    }

    pub fn mark_mountpoint(&self) {
        self.flags.lock().insert(NodeFlags::MOUNTPOINT);
    }

    /// `..` resolution: a root node (no parent) resolves to itself.
    pub fn parent_or_self(self: &Arc<Self>) -> Arc<Self> {
        self.parent
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .unwrap_or_else(|| self.clone())
    }

    pub fn child_named(&self, name: &str) -> Option<Arc<Self>> {
        self.children.lock().get(name).cloned()
    }

    /// Detach this node from its parent's children map. Does not touch the
    /// underlying inode or this node's own `children` map.
    pub fn detach(self: &Arc<Self>) {
        if let Some(parent) = self.parent.lock().as_ref().and_then(Weak::upgrade) {
            parent.children.lock().remove(&*self.name.lock());
        }
    }

    pub fn rename(self: &Arc<Self>, new_name: &str) {
        let old_name = core::mem::replace(&mut *self.name.lock(), new_name.to_string());
        if let Some(parent) = self.parent.lock().as_ref().and_then(Weak::upgrade) {
            let mut children = parent.children.lock();
            if let Some(node) = children.remove(&old_name) {
                children.insert(new_name.to_string(), node);
            }
            *self.path.lock() = join_path(&parent.path.lock(), new_name);
        }
    }

    /// Every currently cached child, independent of what the backing
    /// filesystem's `readdir` would report.
    pub fn cached_children(&self) -> Vec<(String, Arc<NodeCache>)> {
        self.children
            .lock()
            .iter()
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect()
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        alloc::format!("/{name}")
    } else {
        alloc::format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::inode::{RawDirEntry, Stat};

    struct DummyInode(u64);
    impl Inode for DummyInode {
        fn mode(&self) -> u32 {
            crate::fs::inode::S_IFDIR
        }
        fn device(&self) -> u32 {
            0
        }
        fn index(&self) -> u64 {
            self.0
        }
        fn readdir(&self) -> crate::error::KernelResult<Vec<RawDirEntry>> {
            Ok(Vec::new())
        }
        fn stat(&self) -> crate::error::KernelResult<Stat> {
            Ok(Stat {
                inode: self.0,
                mode: self.mode(),
                size: 0,
                uid: 0,
                gid: 0,
                modified: 0,
            })
        }
    }

    #[test]
    fn child_path_is_canonical() {
        let root = NodeCache::new_root(Arc::new(DummyInode(1)), 0);
        let child = NodeCache::insert_child(&root, "etc", Arc::new(DummyInode(2)), None);
        assert_eq!(&*child.path.lock(), "/etc");
        let grandchild = NodeCache::insert_child(&child, "passwd", Arc::new(DummyInode(3)), None);
        assert_eq!(&*grandchild.path.lock(), "/etc/passwd");
    }

    #[test]
    fn dotdot_at_root_stays_at_root() {
        let root = NodeCache::new_root(Arc::new(DummyInode(1)), 0);
        assert!(Arc::ptr_eq(&root.parent_or_self(), &root));
    }

    #[test]
    fn rename_updates_parent_map_and_path() {
        let root = NodeCache::new_root(Arc::new(DummyInode(1)), 0);
        let child = NodeCache::insert_child(&root, "old", Arc::new(DummyInode(2)), None);
        child.rename("new");
        assert!(root.child_named("old").is_none());
        assert!(root.child_named("new").is_some());
        assert_eq!(&*child.path.lock(), "/new");
    }
}
