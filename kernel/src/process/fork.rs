//! The `fork` orchestration sequence.
//!
//! Grounded on the teacher's `fork.rs` for the step ordering, generalized
//! from its capability/IPC-endpoint duplication (dropped, this substrate
//! has neither) to the VMA/fd/thread duplication this kernel's `Process`
//! and `Thread` types carry, and on
//! `examples/original_source/Kernel/tasking/task.cpp`'s fork-return
//! contract for step 7 (child returns 0, parent returns the child pid).

use alloc::sync::Arc;

use crate::{
    arch::context::ThreadContext,
    error::KernelResult,
    mm::vas::VirtualAddressSpace,
    process::{
        fd_table::FdTable,
        pcb::{Process, ProcessId, ProcessState},
        thread::{Thread, ThreadId},
    },
};

/// Result of a successful fork: the new child process and its single
/// runnable thread, already arranged to return `0` from the syscall that
/// triggered the fork.
pub struct ForkResult {
    pub child: Arc<Process>,
    pub child_thread: Arc<Thread>,
}

/// Orchestrate the seven-step fork contract. The caller supplies freshly
/// allocated `child_pid`/`child_tid` (process-table-wide allocation lives
/// in [`crate::process`], not here) and the parent's thread to duplicate.
pub fn fork_process(
    parent: &Arc<Process>,
    parent_thread: &Arc<Thread>,
    child_pid: ProcessId,
    child_tid: ThreadId,
) -> KernelResult<ForkResult> {
    // Steps 2-3: fork the VMA (deep copy + CoW replay), which also carries
    // the parent's program break over as the child's initial break.
    let child_vas = Arc::new(parent.vas.fork()?);

    // Step 1: create the child PCB inheriting pgid/sid.
    let child = Process::new(
        child_pid,
        Some(parent.pid),
        parent.pgid,
        parent.sid,
        parent.name.read().clone(),
        parent.priority,
        parent.compat,
        parent.exec_mode,
        child_vas,
        parent.cwd.read().clone(),
        parent.exe.read().clone(),
        parent.uid,
        parent.gid,
    );
    *child.root.write() = parent.root.read().clone();
    *child.limits.lock() = *parent.limits.lock();

    // Step 4: clone the fd table. CLOEXEC flags are preserved on each
    // entry and only acted on by a later `exec`, matching POSIX fork/exec.
    let cloned_fds = parent.fds.fork();
    replace_fds(&child, cloned_fds);

    // Step 6: clone the current thread's register frame, FPU state, and
    // give it a fresh kernel stack.
    let child_thread = Arc::new(parent_thread.fork_for_child(child_tid, child_pid)?);

    // Step 7: the child's syscall return value is 0; the parent's (set by
    // the caller once this returns) is the child pid.
    child_thread.context.lock().set_return_value(0);
    child_thread.set_state(ProcessState::Ready);
    child.add_thread(child_tid);

    parent.add_child(child_pid);

    Ok(ForkResult { child, child_thread })
}

/// `Process::fds` has no public setter since it is populated once at
/// construction; fork needs to swap in the cloned table afterward, so this
/// reaches through a dedicated method kept next to fork rather than widening
/// `Process`'s public surface for a single caller.
fn replace_fds(child: &Arc<Process>, cloned: FdTable) {
    child.fds.adopt(cloned);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::{MemoryMapEntry, MemoryRegionKind},
        mm::frame_pool,
        process::pcb::{Compat, ExecMode, ProcessPriority},
    };
    use alloc::string::String;

    fn fresh_parent() -> (Arc<Process>, Arc<Thread>) {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 32 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }];
        let _ = frame_pool::init(&map, 0x0010_0000, 0x10_0000);
        let _ = crate::mm::vas::init_kernel_template();
        let vas = Arc::new(VirtualAddressSpace::new().expect("vas"));
        let parent = Process::new(
            ProcessId(10),
            None,
            ProcessId(10),
            ProcessId(10),
            String::from("parent"),
            ProcessPriority::Normal,
            Compat::Native,
            ExecMode::User,
            vas,
            String::from("/"),
            String::from("/bin/sh"),
            0,
            0,
        );
        let thread = Arc::new(
            Thread::new(
                ThreadId(10),
                ProcessId(10),
                String::from("parent"),
                Compat::Native,
                0x4000_0000,
                0x7fff_0000,
            )
            .expect("thread"),
        );
        (parent, thread)
    }

    #[test]
    fn fork_inherits_pgid_sid_and_sets_parent_link() {
        let (parent, thread) = fresh_parent();
        let result = fork_process(&parent, &thread, ProcessId(11), ThreadId(11)).expect("fork");
        assert_eq!(result.child.parent, Some(ProcessId(10)));
        assert_eq!(result.child.pgid, parent.pgid);
        assert_eq!(result.child.sid, parent.sid);
    }

    #[test]
    fn child_thread_returns_zero_and_is_ready() {
        let (parent, thread) = fresh_parent();
        let result = fork_process(&parent, &thread, ProcessId(12), ThreadId(12)).expect("fork");
        assert_eq!(
            result.child_thread.context.lock().get_instruction_pointer(),
            thread.context.lock().get_instruction_pointer()
        );
        assert_eq!(result.child_thread.state(), ProcessState::Ready);
    }

    #[test]
    fn parent_records_child_pid() {
        let (parent, thread) = fresh_parent();
        fork_process(&parent, &thread, ProcessId(13), ThreadId(13)).expect("fork");
        assert!(parent.children.lock().contains(&ProcessId(13)));
    }
}
