//! Process/thread substrate: PCBs, TCBs, fd tables, program break, the
//! fork/exec path, signals, and the process table tying them together.
//!
//! Grounded on the teacher's `process/mod.rs` for the staged bring-up shape
//! (table init, then the PID-1 init process, then hand off to the
//! scheduler), replacing its direct `sched::SCHEDULER` pointer reach-throughs
//! with lookups through [`table::PROCESS_TABLE`] and a small thread table
//! kept alongside it, since threads here are owned by `Arc`, not tracked
//! through raw task pointers.

use alloc::{collections::BTreeMap, string::String, sync::Arc};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    arch::context::ThreadContext as _,
    bootstrap::TaskingMode,
    error::{KernelResult, ProcError},
    mm::vas::VirtualAddressSpace,
};

pub mod brk_mmap;
pub mod fd_table;
pub mod fork;
pub mod pcb;
pub mod signal;
pub mod table;
pub mod thread;

pub use fd_table::{FdTable, OpenFlags};
pub use fork::{fork_process, ForkResult};
pub use pcb::{Compat, ExecMode, Process, ProcessId, ProcessPriority, ProcessState, ResourceLimits, TlsTemplate};
pub use signal::{Action, Signal, SignalState};
pub use table::PROCESS_TABLE;
pub use thread::{Thread, ThreadId};

static NEXT_PID: AtomicU64 = AtomicU64::new(1);
static NEXT_TID: AtomicU64 = AtomicU64::new(1);
static TASKING_MODE: Mutex<TaskingMode> = Mutex::new(TaskingMode::Multi);

/// Threads are looked up by id independently of their owning process (the
/// scheduler's `wake(tid)` needs this without knowing the pid), so they get
/// their own small table next to the process table.
static THREAD_TABLE: Mutex<BTreeMap<ThreadId, Arc<Thread>>> = Mutex::new(BTreeMap::new());

pub fn alloc_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

fn register_thread(thread: Arc<Thread>) {
    THREAD_TABLE.lock().insert(thread.tid, thread);
}

fn unregister_thread(tid: ThreadId) {
    THREAD_TABLE.lock().remove(&tid);
}

pub fn find_thread(tid: ThreadId) -> Option<Arc<Thread>> {
    THREAD_TABLE.lock().get(&tid).cloned()
}

/// Bring up the process table, the scheduler, and PID 1 (`init`).
/// `tasking` gates whether more than one process may ever be created: in
/// [`TaskingMode::Single`] everything after PID 1 is refused.
pub fn init(tasking: TaskingMode) -> KernelResult<()> {
    *TASKING_MODE.lock() = tasking;
    PROCESS_TABLE.clear();
    THREAD_TABLE.lock().clear();
    crate::sched::init();

    let vas = Arc::new(VirtualAddressSpace::new()?);
    let init_process = Process::new(
        ProcessId(1),
        None,
        ProcessId(1),
        ProcessId(1),
        String::from("init"),
        ProcessPriority::System,
        Compat::Native,
        ExecMode::User,
        vas,
        String::from("/"),
        String::from("/sbin/init"),
        0,
        0,
    );
    let main_thread = Arc::new(Thread::new(
        alloc_tid(),
        ProcessId(1),
        String::from("init"),
        Compat::Native,
        0,
        0,
    )?);
    init_process.add_thread(main_thread.tid);
    register_thread(main_thread.clone());
    PROCESS_TABLE.insert(init_process)?;
    crate::sched::enqueue(main_thread);
    crate::fs::procfs().attach_process(1);

    log::info!("process: PID 1 (init) ready, tasking={:?}", tasking);
    Ok(())
}

fn tasking_mode() -> TaskingMode {
    *TASKING_MODE.lock()
}

/// Spawn a kernel-mode process with a single thread and no user-mode entry
/// point, used for housekeeping tasks the kernel itself runs (log flushers,
/// reapers, the bring-up self-test in [`crate::integration_tests`]).
pub fn spawn_kernel_task(name: &str) -> KernelResult<ProcessId> {
    if tasking_mode() == TaskingMode::Single && PROCESS_TABLE.count() >= 1 {
        return Err(ProcError::NotPermitted.into());
    }

    let pid = alloc_pid();
    let tid = alloc_tid();
    let vas = Arc::new(VirtualAddressSpace::new()?);
    let process = Process::new(
        pid,
        Some(ProcessId(1)),
        pid,
        ProcessId(1),
        String::from(name),
        ProcessPriority::System,
        Compat::Native,
        ExecMode::Kernel,
        vas,
        String::from("/"),
        String::from(name),
        0,
        0,
    );
    let thread = Arc::new(Thread::new(
        tid,
        pid,
        String::from(name),
        Compat::Native,
        0,
        0,
    )?);
    process.add_thread(tid);
    register_thread(thread.clone());
    if let Some(init) = PROCESS_TABLE.get(ProcessId(1)) {
        init.add_child(pid);
    }
    PROCESS_TABLE.insert(process)?;
    crate::sched::enqueue(thread);
    crate::fs::procfs().attach_process(pid.0);
    Ok(pid)
}

pub fn lookup(pid: ProcessId) -> Option<Arc<Process>> {
    PROCESS_TABLE.get(pid)
}

/// `fork()`: duplicate `parent`'s current thread into a brand-new child
/// process, registering both in the global tables.
pub fn fork(parent: &Arc<Process>, parent_thread: &Arc<Thread>) -> KernelResult<ProcessId> {
    if tasking_mode() == TaskingMode::Single {
        return Err(ProcError::NotPermitted.into());
    }
    let child_pid = alloc_pid();
    let child_tid = alloc_tid();
    let result = fork_process(parent, parent_thread, child_pid, child_tid)?;
    result.child.signals.add_watcher(parent.pid);
    register_thread(result.child_thread.clone());
    PROCESS_TABLE.insert(result.child)?;
    crate::sched::enqueue(result.child_thread);
    crate::fs::procfs().attach_process(child_pid.0);
    Ok(child_pid)
}

/// `exec()`: reset signal handlers to default for catchable signals, close
/// `O_CLOEXEC` fds, and hand the process a fresh entry point. The loader
/// that actually builds the new VMA contents lives outside this substrate;
/// callers supply the fully prepared image's entry point and user stack.
pub fn exec(
    process: &Arc<Process>,
    thread: &Arc<Thread>,
    entry_point: usize,
    user_stack_top: usize,
) -> KernelResult<()> {
    process.fds.close_on_exec();
    process.signals.reset_for_exec();
    let mut ctx = thread.context.lock();
    ctx.set_instruction_pointer(entry_point);
    ctx.set_stack_pointer(user_stack_top);
    Ok(())
}

/// Terminate the calling thread. If it was the process's last thread, the
/// process transitions to `Zombie` and its exit code is recorded; any
/// zombie children it left behind are reparented nowhere (this substrate
/// has no reaper-of-last-resort — the parent is expected to `wait`).
pub fn exit_thread(process: &Arc<Process>, thread: &Arc<Thread>, exit_code: i32) {
    thread.set_exit_code(exit_code);
    thread.set_state(ProcessState::Zombie);
    unregister_thread(thread.tid);
    process.remove_thread(thread.tid);
    if process.thread_count() == 0 {
        process.set_exit_code(exit_code);
        process.set_state(ProcessState::Zombie);
        crate::fs::procfs().detach_process(process.pid.0);
        for watcher in process.signals.watchers() {
            if let Some(watcher_process) = lookup(watcher) {
                let linux_compat = watcher_process.compat == Compat::Linux;
                let _ = watcher_process
                    .signals
                    .send(signal::SIGCHLD, 0, -1, linux_compat);
            }
        }
    }
}

/// `waitpid`-equivalent: reap an already-zombied child of `parent`. Returns
/// `None` if no child of `parent` has exited yet.
pub fn wait_for_child(parent: ProcessId) -> Option<(ProcessId, i32)> {
    PROCESS_TABLE.reap_zombie_children(parent).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{MemoryMapEntry, MemoryRegionKind};

    fn bring_up() {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 64 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }];
        let _ = crate::mm::frame_pool::init(&map, 0x0010_0000, 0x10_0000);
        let _ = crate::mm::vas::init_kernel_template();
        let _ = crate::fs::init();
    }

    #[test]
    fn init_creates_pid_one() {
        bring_up();
        init(TaskingMode::Multi).expect("init");
        assert!(lookup(ProcessId(1)).is_some());
    }

    #[test]
    fn spawn_kernel_task_registers_child_of_init() {
        bring_up();
        init(TaskingMode::Multi).expect("init");
        let pid = spawn_kernel_task("probe").expect("spawn");
        assert!(lookup(pid).is_some());
        let init_process = lookup(ProcessId(1)).unwrap();
        assert!(init_process.children.lock().contains(&pid));
    }

    #[test]
    fn single_tasking_mode_refuses_extra_processes() {
        bring_up();
        init(TaskingMode::Single).expect("init");
        assert!(spawn_kernel_task("extra").is_err());
    }

    #[test]
    fn exit_thread_zombifies_single_threaded_process() {
        bring_up();
        init(TaskingMode::Multi).expect("init");
        let pid = spawn_kernel_task("short-lived").expect("spawn");
        let process = lookup(pid).unwrap();
        let tid = *process.threads.lock().first().unwrap();
        let thread = find_thread(tid).unwrap();
        exit_thread(&process, &thread, 7);
        assert_eq!(process.state(), ProcessState::Zombie);
        assert_eq!(process.exit_code(), 7);
    }
}
