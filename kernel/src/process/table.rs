//! Global process table.
//!
//! Grounded on the teacher's `ProcessTable` (`process/table.rs`) for the
//! locked-map-keyed-by-pid shape, replacing its `Box<Process>` +
//! pointer-extension `get_process`/`get_process_mut` pattern (sound only
//! because processes were never actually freed) with `Arc<Process>`, so a
//! lookup can outlive the table lock without unsafe lifetime extension.

use alloc::{collections::BTreeMap, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    error::{KernelResult, ProcError},
    process::pcb::{Process, ProcessId, ProcessState},
};

pub struct ProcessTable {
    entries: Mutex<BTreeMap<ProcessId, alloc::sync::Arc<Process>>>,
    count: AtomicUsize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            count: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, process: alloc::sync::Arc<Process>) -> KernelResult<()> {
        let pid = process.pid;
        let mut entries = self.entries.lock();
        if entries.contains_key(&pid) {
            return Err(ProcError::InvalidState.into());
        }
        entries.insert(pid, process);
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn remove(&self, pid: ProcessId) -> Option<alloc::sync::Arc<Process>> {
        let removed = self.entries.lock().remove(&pid);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn get(&self, pid: ProcessId) -> Option<alloc::sync::Arc<Process>> {
        self.entries.lock().get(&pid).cloned()
    }

    pub fn exists(&self, pid: ProcessId) -> bool {
        self.entries.lock().contains_key(&pid)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Drop every entry. Only meant for (re-)bring-up: a real boot calls
    /// this implicitly by starting from an empty table; tests that exercise
    /// [`crate::process::init`] more than once in the same process need it
    /// explicit.
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.count.store(0, Ordering::Relaxed);
    }

    pub fn children_of(&self, parent: ProcessId) -> Vec<ProcessId> {
        self.entries
            .lock()
            .values()
            .filter(|p| p.parent == Some(parent))
            .map(|p| p.pid)
            .collect()
    }

    pub fn for_each<F: FnMut(&alloc::sync::Arc<Process>)>(&self, mut f: F) {
        for process in self.entries.lock().values() {
            f(process);
        }
    }

    /// Reap zombie children of `parent`, returning their `(pid, exit_code)`.
    pub fn reap_zombie_children(&self, parent: ProcessId) -> Vec<(ProcessId, i32)> {
        let zombies: Vec<ProcessId> = self
            .entries
            .lock()
            .values()
            .filter(|p| p.parent == Some(parent) && p.state() == ProcessState::Zombie)
            .map(|p| p.pid)
            .collect();

        let mut reaped = Vec::new();
        for pid in zombies {
            if let Some(process) = self.remove(pid) {
                reaped.push((pid, process.exit_code()));
            }
        }
        reaped
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

pub static PROCESS_TABLE: ProcessTable = ProcessTable::new();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::{MemoryMapEntry, MemoryRegionKind},
        mm::{frame_pool, vas::VirtualAddressSpace},
        process::pcb::{Compat, ExecMode, ProcessPriority},
    };
    use alloc::{string::String, sync::Arc};

    fn fresh_process(pid: u64) -> Arc<Process> {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 16 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }];
        let _ = frame_pool::init(&map, 0x0010_0000, 0x10_0000);
        let _ = crate::mm::vas::init_kernel_template();
        let vas = Arc::new(VirtualAddressSpace::new().expect("vas"));
        Process::new(
            ProcessId(pid),
            None,
            ProcessId(pid),
            ProcessId(pid),
            String::from("test"),
            ProcessPriority::Normal,
            Compat::Native,
            ExecMode::User,
            vas,
            String::from("/"),
            String::from("/"),
            0,
            0,
        )
    }

    #[test]
    fn insert_then_get_round_trips() {
        let table = ProcessTable::new();
        let p = fresh_process(100);
        table.insert(p.clone()).unwrap();
        assert!(table.exists(ProcessId(100)));
        assert_eq!(table.get(ProcessId(100)).unwrap().pid, ProcessId(100));
    }

    #[test]
    fn duplicate_insert_fails() {
        let table = ProcessTable::new();
        table.insert(fresh_process(101)).unwrap();
        assert!(table.insert(fresh_process(101)).is_err());
    }

    fn fresh_child(pid: u64, parent: u64) -> Arc<Process> {
        Process::new(
            ProcessId(pid),
            Some(ProcessId(parent)),
            ProcessId(parent),
            ProcessId(parent),
            String::from("child"),
            ProcessPriority::Normal,
            Compat::Native,
            ExecMode::User,
            Arc::new(VirtualAddressSpace::new().expect("vas")),
            String::from("/"),
            String::from("/"),
            0,
            0,
        )
    }

    #[test]
    fn reap_zombie_children_removes_only_dead_children() {
        let table = ProcessTable::new();
        table.insert(fresh_process(1)).unwrap();

        let alive = fresh_child(2, 1);
        table.insert(alive).unwrap();

        let dead = fresh_child(3, 1);
        dead.set_state(ProcessState::Zombie);
        table.insert(dead).unwrap();

        let reaped = table.reap_zombie_children(ProcessId(1));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].0, ProcessId(3));
        assert!(!table.exists(ProcessId(3)));
        assert!(table.exists(ProcessId(2)));
    }
}
