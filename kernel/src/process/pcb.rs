//! Process control block.
//!
//! Grounded on the teacher's `Process` (`process/pcb.rs`) for the overall
//! shape (atomic state field, per-process mutexes), generalized to the
//! ten-state machine and dropping the capability/IPC-endpoint fields the
//! teacher's microkernel design needed and this one does not.

use alloc::{string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use crate::{
    error::{KernelResult, ProcError},
    mm::vas::VirtualAddressSpace,
    process::{
        fd_table::FdTable,
        signal::SignalState,
        thread::ThreadId,
    },
};

/// A process identifier. PID 0 is reserved for kernel bookkeeping, PID 1 is
/// the init process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority tier. Lower numeric value runs first within the
/// ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessPriority {
    RealTime = 0,
    System = 1,
    Normal = 2,
    Low = 3,
    Idle = 4,
}

/// Process/thread state machine. Transitions are driven by the scheduler
/// (`Ready` <-> `Running`), syscalls (`Sleeping`/`Blocked`/`Waiting`),
/// signals (`Stopped` <-> `Running`, `Zombie`/`CoreDump`/`Terminated` on
/// fatal), and OOM (`Terminated`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready = 0,
    Running = 1,
    Sleeping = 2,
    Blocked = 3,
    Stopped = 4,
    Waiting = 5,
    Zombie = 6,
    CoreDump = 7,
    Terminated = 8,
    Frozen = 9,
}

impl ProcessState {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Sleeping,
            3 => Self::Blocked,
            4 => Self::Stopped,
            5 => Self::Waiting,
            6 => Self::Zombie,
            7 => Self::CoreDump,
            8 => Self::Terminated,
            _ => Self::Frozen,
        }
    }

    /// Whether a process/thread in this state can ever be scheduled or
    /// signalled again; once dead there is no way back.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Zombie | Self::CoreDump | Self::Terminated)
    }
}

/// Process-wide syscall compatibility flavor, selecting one of the three
/// syscall tables a thread's `compat` field indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compat {
    Native,
    Linux,
    Windows,
}

/// Whether a process runs kernel-side with no user-mode entry point, or as
/// an ordinary user process. Kernel-mode processes are exempt from signal
/// delivery the way `exec` reaches a thread through `usermode.rs` never
/// does for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Kernel,
    User,
}

/// The process-wide TLS template an `exec`'d image's loader records, so
/// each new thread can map its own copy at thread-creation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsTemplate {
    pub base: u64,
    pub len: u64,
}

/// Resource limits, the `rlimit`-style caps `setrlimit`/`getrlimit` would
/// read and write.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_fds: u64,
    pub max_memory: u64,
    pub max_threads: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_fds: 1024,
            max_memory: u64::MAX,
            max_threads: 256,
        }
    }
}

/// Process control block. Owns the address space, the fd table, and the
/// signal disposition/queue state; threads are tracked by id since a
/// process may host several.
pub struct Process {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub pgid: ProcessId,
    pub sid: ProcessId,
    pub name: RwLock<String>,
    state: AtomicU32,
    pub priority: ProcessPriority,
    pub critical: bool,
    pub compat: Compat,
    pub exec_mode: ExecMode,
    pub vas: Arc<VirtualAddressSpace>,
    pub threads: Mutex<Vec<ThreadId>>,
    pub fds: FdTable,
    pub signals: SignalState,
    pub children: Mutex<Vec<ProcessId>>,
    pub cwd: RwLock<String>,
    pub root: RwLock<String>,
    pub exe: RwLock<String>,
    pub exit_code: AtomicI32,
    pub uid: u32,
    pub gid: u32,
    pub created_at: u64,
    pub cpu_time: AtomicU64,
    pub tls: Mutex<TlsTemplate>,
    pub limits: Mutex<ResourceLimits>,
}

impl Process {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: ProcessId,
        parent: Option<ProcessId>,
        pgid: ProcessId,
        sid: ProcessId,
        name: String,
        priority: ProcessPriority,
        compat: Compat,
        exec_mode: ExecMode,
        vas: Arc<VirtualAddressSpace>,
        cwd: String,
        exe: String,
        uid: u32,
        gid: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            critical: pid.0 <= 1,
            pid,
            parent,
            pgid,
            sid,
            name: RwLock::new(name),
            state: AtomicU32::new(ProcessState::Ready as u32),
            priority,
            compat,
            exec_mode,
            vas,
            threads: Mutex::new(Vec::new()),
            fds: FdTable::new(),
            signals: SignalState::new(),
            children: Mutex::new(Vec::new()),
            cwd: RwLock::new(cwd),
            root: RwLock::new(String::from("/")),
            exe: RwLock::new(exe),
            exit_code: AtomicI32::new(0),
            uid,
            gid,
            created_at: crate::arch::timer::get_ticks(),
            cpu_time: AtomicU64::new(0),
            tls: Mutex::new(TlsTemplate::default()),
            limits: Mutex::new(ResourceLimits::default()),
        })
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Transition to `Running`, refusing if the process is already dead.
    pub fn try_run(&self) -> KernelResult<()> {
        if self.state().is_dead() {
            return Err(ProcError::InvalidState.into());
        }
        self.set_state(ProcessState::Running);
        Ok(())
    }

    pub fn add_thread(&self, tid: ThreadId) {
        self.threads.lock().push(tid);
    }

    pub fn remove_thread(&self, tid: ThreadId) {
        self.threads.lock().retain(|&t| t != tid);
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn add_child(&self, pid: ProcessId) {
        self.children.lock().push(pid);
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn add_cpu_time(&self, ticks: u64) {
        self.cpu_time.fetch_add(ticks, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::{MemoryMapEntry, MemoryRegionKind},
        mm::frame_pool,
    };

    fn fresh(pid: u64) -> Arc<Process> {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 64 * 1024 * 1024,
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
            String::from("/sbin/init"),
            0,
            0,
        )
    }

    #[test]
    fn new_process_starts_ready_and_not_critical_above_pid_one() {
        let p = fresh(42);
        assert_eq!(p.state(), ProcessState::Ready);
        assert!(!p.critical);
    }

    #[test]
    fn pid_one_is_critical() {
        let p = fresh(1);
        assert!(p.critical);
    }

    #[test]
    fn dead_state_refuses_try_run() {
        let p = fresh(7);
        p.set_state(ProcessState::Zombie);
        assert!(p.try_run().is_err());
    }
}
