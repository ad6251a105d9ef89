//! Thread control block.
//!
//! Grounded on the teacher's `Thread`/`Tcb` (`process/thread.rs`) for the
//! stack-allocation and register-context idiom, trimmed of the teacher's
//! `TaskPtr`/scheduler-pointer plumbing since this substrate tracks threads
//! by id through the process table rather than raw pointers into a
//! scheduler-owned task array.

use alloc::{string::String, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    arch::context::{ArchThreadContext, ThreadContext},
    error::KernelResult,
    mm::frame_pool::{self, FrameNumber},
    process::pcb::{Compat, ProcessId, ProcessState},
};

/// Default kernel stack size: 64KB (16 pages), matching the teacher's
/// default.
pub const DEFAULT_KERNEL_STACK_PAGES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// FPU/SIMD state is saved and restored as an opaque byte blob sized to the
/// architecture's save-area (FXSAVE on x86_64); fork duplicates it verbatim.
pub const FPU_STATE_SIZE: usize = 512;

/// Thread control block. One per schedulable unit of execution; shares its
/// process's address space, fd table, and signal state.
pub struct Thread {
    pub tid: ThreadId,
    pub pid: ProcessId,
    pub name: String,
    pub compat: Compat,
    state: AtomicU32,
    pub context: Mutex<ArchThreadContext>,
    pub fpu_state: Mutex<[u8; FPU_STATE_SIZE]>,
    kernel_stack: Vec<FrameNumber>,
    pub kernel_time: AtomicU64,
    pub user_time: AtomicU64,
    /// Per-TCB signal mask; a set bit blocks that signal's delivery to this
    /// thread without affecting other threads in the process.
    pub blocked_mask: AtomicU64,
    /// Whether killing this specific thread should be treated as a fatal
    /// event even if its process is not itself `critical` -- a process can
    /// have one critical thread (e.g. the one holding a lock the rest of
    /// the kernel depends on) alongside ordinary worker threads.
    critical: AtomicBool,
    exit_code: AtomicI32,
}

fn alloc_kernel_stack() -> KernelResult<Vec<FrameNumber>> {
    let mut frames = Vec::with_capacity(DEFAULT_KERNEL_STACK_PAGES);
    for _ in 0..DEFAULT_KERNEL_STACK_PAGES {
        frames.push(frame_pool::alloc()?);
    }
    Ok(frames)
}

impl Thread {
    /// Allocate a kernel stack and build an initial register frame pointed
    /// at `entry_point` running on `user_stack_top`.
    pub fn new(
        tid: ThreadId,
        pid: ProcessId,
        name: String,
        compat: Compat,
        entry_point: usize,
        user_stack_top: usize,
    ) -> KernelResult<Self> {
        let kernel_stack = alloc_kernel_stack()?;
        let context = ArchThreadContext::new_user(entry_point, user_stack_top);
        Ok(Self {
            tid,
            pid,
            name,
            compat,
            state: AtomicU32::new(ProcessState::Ready as u32),
            context: Mutex::new(context),
            fpu_state: Mutex::new([0u8; FPU_STATE_SIZE]),
            kernel_stack,
            kernel_time: AtomicU64::new(0),
            user_time: AtomicU64::new(0),
            blocked_mask: AtomicU64::new(0),
            critical: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
        })
    }

    pub fn state(&self) -> ProcessState {
        match self.state.load(Ordering::Acquire) {
            0 => ProcessState::Ready,
            1 => ProcessState::Running,
            2 => ProcessState::Sleeping,
            3 => ProcessState::Blocked,
            4 => ProcessState::Stopped,
            5 => ProcessState::Waiting,
            6 => ProcessState::Zombie,
            7 => ProcessState::CoreDump,
            8 => ProcessState::Terminated,
            _ => ProcessState::Frozen,
        }
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Clone this thread's register frame, FPU state, and stack contents
    /// for `sys_fork` step 6. The kernel stack itself is a fresh allocation
    /// since the child runs on its own; only live register/FPU state
    /// carries over.
    pub fn fork_for_child(&self, child_tid: ThreadId, child_pid: ProcessId) -> KernelResult<Self> {
        let context = self.context.lock().clone();
        let fpu_state = *self.fpu_state.lock();
        let kernel_stack = alloc_kernel_stack()?;
        Ok(Self {
            tid: child_tid,
            pid: child_pid,
            name: self.name.clone(),
            compat: self.compat,
            state: AtomicU32::new(ProcessState::Ready as u32),
            context: Mutex::new(context),
            fpu_state: Mutex::new(fpu_state),
            kernel_stack,
            kernel_time: AtomicU64::new(0),
            user_time: AtomicU64::new(0),
            blocked_mask: AtomicU64::new(self.blocked_mask.load(Ordering::Acquire)),
            critical: AtomicBool::new(self.critical.load(Ordering::Acquire)),
            exit_code: AtomicI32::new(0),
        })
    }

    pub fn add_kernel_time(&self, ticks: u64) {
        self.kernel_time.fetch_add(ticks, Ordering::Relaxed);
    }

    pub fn add_user_time(&self, ticks: u64) {
        self.user_time.fetch_add(ticks, Ordering::Relaxed);
    }

    pub fn critical(&self) -> bool {
        self.critical.load(Ordering::Acquire)
    }

    pub fn set_critical(&self, critical: bool) {
        self.critical.store(critical, Ordering::Release);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        for frame in self.kernel_stack.drain(..) {
            let _ = frame_pool::free(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{MemoryMapEntry, MemoryRegionKind};

    fn setup() {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 16 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }];
        let _ = frame_pool::init(&map, 0x0010_0000, 0x10_0000);
    }

    #[test]
    fn new_thread_starts_ready() {
        setup();
        let t = Thread::new(
            ThreadId(1),
            ProcessId(1),
            String::from("main"),
            Compat::Native,
            0x4000_0000,
            0x7fff_0000,
        )
        .expect("thread");
        assert_eq!(t.state(), ProcessState::Ready);
    }

    #[test]
    fn fork_for_child_copies_register_frame() {
        setup();
        let parent = Thread::new(
            ThreadId(1),
            ProcessId(1),
            String::from("main"),
            Compat::Native,
            0x4000_0000,
            0x7fff_0000,
        )
        .expect("thread");
        let child = parent
            .fork_for_child(ThreadId(2), ProcessId(2))
            .expect("fork");
        assert_eq!(
            child.context.lock().get_instruction_pointer(),
            parent.context.lock().get_instruction_pointer()
        );
        assert_eq!(child.state(), ProcessState::Ready);
    }

    #[test]
    fn critical_flag_carries_over_to_the_forked_child() {
        setup();
        let parent = Thread::new(
            ThreadId(1),
            ProcessId(1),
            String::from("main"),
            Compat::Native,
            0x4000_0000,
            0x7fff_0000,
        )
        .expect("thread");
        parent.set_critical(true);
        let child = parent
            .fork_for_child(ThreadId(2), ProcessId(2))
            .expect("fork");
        assert!(child.critical());
    }

    #[test]
    fn exit_code_defaults_to_zero_until_set() {
        setup();
        let t = Thread::new(
            ThreadId(1),
            ProcessId(1),
            String::from("main"),
            Compat::Native,
            0x4000_0000,
            0x7fff_0000,
        )
        .expect("thread");
        assert_eq!(t.exit_code(), 0);
        t.set_exit_code(7);
        assert_eq!(t.exit_code(), 7);
    }
}
