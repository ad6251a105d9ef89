//! Process/thread substrate integration tests: bring-up, fork, exec, and
//! the exit/wait lifecycle, exercised through the public `process` surface
//! rather than any one module's own unit tests.

extern crate alloc;

use fennix_core::{
    arch::context::ThreadContext as _,
    bootstrap::{MemoryMapEntry, MemoryRegionKind, TaskingMode},
    process::{self, fd_table::OpenFlags, ProcessState},
};

fn bring_up(tasking: TaskingMode) {
    let map = [MemoryMapEntry {
        base: 0x0010_0000,
        len: 64 * 1024 * 1024,
        kind: MemoryRegionKind::Usable,
    }];
    let _ = fennix_core::mm::frame_pool::init(&map, 0x0010_0000, 0x10_0000);
    let _ = fennix_core::mm::vas::init_kernel_template();
    let _ = fennix_core::fs::init();
    process::init(tasking).expect("process::init");
}

#[test]
fn init_brings_up_pid_one_as_ready() {
    bring_up(TaskingMode::Multi);
    let init_process = process::lookup(process::ProcessId(1)).expect("pid 1");
    assert_eq!(init_process.state(), ProcessState::Ready);
}

#[test]
fn fork_then_wait_reaps_the_exited_child() {
    bring_up(TaskingMode::Multi);
    let pid = process::spawn_kernel_task("forker").expect("spawn");
    let parent = process::lookup(pid).expect("parent");
    let parent_tid = *parent.threads.lock().first().expect("thread");
    let parent_thread = process::find_thread(parent_tid).expect("thread lookup");

    let child_pid = process::fork(&parent, &parent_thread).expect("fork");
    assert!(process::wait_for_child(pid).is_none(), "child hasn't exited yet");

    let child = process::lookup(child_pid).expect("child");
    let child_tid = *child.threads.lock().first().expect("child thread");
    let child_thread = process::find_thread(child_tid).expect("child thread lookup");
    process::exit_thread(&child, &child_thread, 42);

    let (reaped_pid, code) = process::wait_for_child(pid).expect("reap");
    assert_eq!(reaped_pid, child_pid);
    assert_eq!(code, 42);
    assert!(process::wait_for_child(pid).is_none(), "a child is only reaped once");
}

#[test]
fn exec_closes_cloexec_fds_and_sets_the_new_entry_point() {
    bring_up(TaskingMode::Multi);
    let pid = process::spawn_kernel_task("execer").expect("spawn");
    let proc = process::lookup(pid).expect("process");
    let tid = *proc.threads.lock().first().expect("thread");
    let thread = process::find_thread(tid).expect("thread lookup");

    let root = fennix_core::fs::vfs().root();
    let fd = proc
        .fds
        .open(&root, "tmp", OpenFlags::READ | OpenFlags::CLOEXEC, 0)
        .expect("open tmp with cloexec");
    assert!(proc.fds.stat(fd).is_ok());

    process::exec(&proc, &thread, 0x0040_0000, 0x7fff_e000).expect("exec");

    assert!(proc.fds.stat(fd).is_err(), "exec must close O_CLOEXEC descriptors");
    assert_eq!(thread.context.lock().get_instruction_pointer(), 0x0040_0000);
}

#[test]
fn single_tasking_mode_refuses_fork() {
    bring_up(TaskingMode::Single);
    let init_process = process::lookup(process::ProcessId(1)).expect("pid 1");
    let tid = *init_process.threads.lock().first().expect("thread");
    let thread = process::find_thread(tid).expect("thread lookup");
    assert!(process::fork(&init_process, &thread).is_err());
}
