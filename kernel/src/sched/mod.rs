//! The ready-queue scheduler substrate.
//!
//! Grounded on the teacher's `sched/queue.rs` for the priority-tiered
//! ready-queue idiom, replaced here with an `Arc<Thread>`-based queue
//! instead of the teacher's `NonNull<Task>`/`TaskPtr` unsafe pointer
//! design, since processes and threads in this kernel are owned by
//! [`crate::process::table::PROCESS_TABLE`] through `Arc`, not by the
//! scheduler itself.

use alloc::{collections::VecDeque, sync::Arc};

use spin::Mutex;

use crate::{
    process::{
        pcb::ProcessState,
        thread::{Thread, ThreadId},
    },
    sync::once_lock::OnceLock,
};

struct Scheduler {
    ready: Mutex<VecDeque<Arc<Thread>>>,
    current: Mutex<Option<Arc<Thread>>>,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
        }
    }
}

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

fn scheduler() -> &'static Scheduler {
    SCHEDULER.get().expect("sched::init must run before scheduling")
}

pub fn init() {
    let _ = SCHEDULER.set(Scheduler::new());
    log::info!("scheduler: ready queue initialized");
}

/// Add a thread to the back of the ready queue.
pub fn enqueue(thread: Arc<Thread>) {
    thread.set_state(ProcessState::Ready);
    scheduler().ready.lock().push_back(thread);
}

/// Pop the next ready thread, if any, and mark it current/running.
pub fn schedule_next() -> Option<Arc<Thread>> {
    let sched = scheduler();
    let next = sched.ready.lock().pop_front()?;
    next.set_state(ProcessState::Running);
    *sched.current.lock() = Some(next.clone());
    Some(next)
}

/// The thread currently marked running on this (single, for now) core.
pub fn current_thread() -> Option<Arc<Thread>> {
    scheduler().current.lock().clone()
}

/// Cooperative yield: the current thread goes back to the end of the ready
/// queue in `Ready` state.
pub fn yield_now() {
    let sched = scheduler();
    if let Some(thread) = sched.current.lock().take() {
        thread.set_state(ProcessState::Ready);
        sched.ready.lock().push_back(thread);
    }
}

/// Move the current thread to `Blocked` without re-enqueuing it; a later
/// [`wake`] call is required to make it ready again.
pub fn block_current() {
    let sched = scheduler();
    if let Some(thread) = sched.current.lock().take() {
        thread.set_state(ProcessState::Blocked);
    }
}

/// Re-enqueue a thread that was previously blocked or sleeping, by id,
/// searching the process table since a blocked thread isn't tracked by the
/// scheduler itself once it leaves the ready queue.
pub fn wake(tid: ThreadId) -> bool {
    let Some(thread) = crate::process::find_thread(tid) else {
        return false;
    };
    if thread.state().is_dead() {
        return false;
    }
    enqueue(thread);
    true
}

/// Entry point for the idle core loop: schedule whatever is ready, and
/// `hlt`/`wfi` otherwise. Actual user-mode context switching is out of
/// scope for this substrate (no loader produces executable user images),
/// so "running" a thread here means it stays `Running` until the next
/// voluntary yield or block observed through the syscall layer.
pub fn run() -> ! {
    log::info!("scheduler: entering run loop");
    loop {
        if schedule_next().is_none() {
            crate::arch::idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::{MemoryMapEntry, MemoryRegionKind},
        mm::frame_pool,
        process::pcb::{Compat, ProcessId},
    };
    use alloc::string::String;

    fn fresh_thread(tid: u64) -> Arc<Thread> {
        let map = [MemoryMapEntry {
            base: 0x0010_0000,
            len: 16 * 1024 * 1024,
            kind: MemoryRegionKind::Usable,
        }];
        let _ = frame_pool::init(&map, 0x0010_0000, 0x10_0000);
        Arc::new(
            Thread::new(
                ThreadId(tid),
                ProcessId(1),
                String::from("t"),
                Compat::Native,
                0x4000_0000,
                0x7fff_0000,
            )
            .expect("thread"),
        )
    }

    #[test]
    fn enqueue_then_schedule_next_marks_running() {
        init();
        let t = fresh_thread(900);
        enqueue(t.clone());
        let scheduled = schedule_next().expect("ready thread");
        assert_eq!(scheduled.tid, t.tid);
        assert_eq!(scheduled.state(), ProcessState::Running);
    }

    #[test]
    fn yield_now_requeues_current_thread() {
        init();
        let t = fresh_thread(901);
        enqueue(t.clone());
        schedule_next().unwrap();
        yield_now();
        assert_eq!(t.state(), ProcessState::Ready);
        let rescheduled = schedule_next().expect("requeued thread");
        assert_eq!(rescheduled.tid, t.tid);
    }

    #[test]
    fn block_current_does_not_requeue() {
        init();
        let t = fresh_thread(902);
        enqueue(t.clone());
        schedule_next().unwrap();
        block_current();
        assert_eq!(t.state(), ProcessState::Blocked);
        assert!(current_thread().is_none());
    }
}
