//! Signal delivery.
//!
//! Grounded on the default-disposition and queuing contract in
//! `examples/original_source/Kernel/tasking/signal.cpp`, generalized from
//! its Fennix-specific signal set to the POSIX numbering the spec's exit
//! code formulas (`100+s` native, `128+linux(s)` Linux-compat) assume.

use alloc::{collections::VecDeque, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{error::{KernelResult, SignalError}, process::ProcessId};

pub type Signal = u32;

pub const SIGHUP: Signal = 1;
pub const SIGINT: Signal = 2;
pub const SIGQUIT: Signal = 3;
pub const SIGILL: Signal = 4;
pub const SIGTRAP: Signal = 5;
pub const SIGABRT: Signal = 6;
pub const SIGBUS: Signal = 7;
pub const SIGFPE: Signal = 8;
pub const SIGKILL: Signal = 9;
pub const SIGUSR1: Signal = 10;
pub const SIGSEGV: Signal = 11;
pub const SIGUSR2: Signal = 12;
pub const SIGPIPE: Signal = 13;
pub const SIGALRM: Signal = 14;
pub const SIGTERM: Signal = 15;
pub const SIGCHLD: Signal = 17;
pub const SIGCONT: Signal = 18;
pub const SIGSTOP: Signal = 19;
pub const SIGTSTP: Signal = 20;
pub const SIGTTIN: Signal = 21;
pub const SIGTTOU: Signal = 22;
pub const SIGURG: Signal = 23;

/// Start and end of the realtime signal range (glibc's `SIGRTMIN`/
/// `SIGRTMAX`): queued rather than merged, delivered lowest-number-first,
/// and otherwise carrying the same default disposition as any other
/// unhandled signal (`Disposition::Terminate`).
pub const SIGRTMIN: Signal = 34;
pub const SIGRTMAX: Signal = 64;

pub const NSIG: usize = (SIGRTMAX + 1) as usize;

/// Handler value meaning "restore the default disposition".
pub const SIG_DFL: u64 = 0;
/// Handler value meaning "discard pending instances of this signal".
pub const SIG_IGN: u64 = 1;

/// Default action applied to a signal when no handler is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Terminate,
    Ignore,
    Core,
    Stop,
    Continue,
}

pub fn default_disposition(sig: Signal) -> Disposition {
    match sig {
        SIGCHLD | SIGURG => Disposition::Ignore,
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => Disposition::Stop,
        SIGCONT => Disposition::Continue,
        SIGQUIT | SIGILL | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGTRAP => Disposition::Core,
        _ => Disposition::Terminate,
    }
}

/// Whether `sig` falls in the realtime range.
pub fn is_realtime(sig: Signal) -> bool {
    (SIGRTMIN..=SIGRTMAX).contains(&sig)
}

/// User response to a signal: `{handler, mask, flags, restorer}`.
#[derive(Debug, Clone, Copy)]
pub struct Action {
    pub handler: u64,
    pub mask: u64,
    pub flags: u32,
    pub restorer: u64,
}

impl Action {
    pub const DEFAULT: Action = Action {
        handler: SIG_DFL,
        mask: 0,
        flags: 0,
        restorer: 0,
    };
}

/// A queued, not-yet-delivered signal.
#[derive(Debug, Clone, Copy)]
pub struct QueueEntry {
    pub signal: Signal,
    pub value: i64,
    /// `-1` targets any thread in the process; otherwise a specific tid.
    pub target_tid: i64,
}

pub fn is_unmaskable(sig: Signal) -> bool {
    sig == SIGKILL || sig == SIGSTOP
}

/// Outcome of [`SignalState::send`]: either the signal was queued for later
/// delivery to a handler, or its default disposition fired immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    Terminated { exit_code: i32 },
    CoreDumped { exit_code: i32 },
    Stopped,
    Continued,
    Ignored,
}

/// Per-process signal state: action table, pending queue, and the
/// user-mode trampoline the fork/exec contract arranges returns through.
pub struct SignalState {
    actions: Mutex<[Action; NSIG]>,
    queue: Mutex<VecDeque<QueueEntry>>,
    process_mask: AtomicU64,
    pub trampoline_va: AtomicU64,
    pub trampoline_len: AtomicU64,
    /// Processes to notify with `SIGCHLD` when this process terminates or
    /// core-dumps, e.g. the parent across a `fork`.
    watchers: Mutex<Vec<ProcessId>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new([Action::DEFAULT; NSIG]),
            queue: Mutex::new(VecDeque::new()),
            process_mask: AtomicU64::new(0),
            trampoline_va: AtomicU64::new(0),
            trampoline_len: AtomicU64::new(0),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Register `watcher` to be sent `SIGCHLD` when this process's default
    /// disposition terminates or core-dumps it.
    pub fn add_watcher(&self, watcher: ProcessId) {
        let mut watchers = self.watchers.lock();
        if !watchers.contains(&watcher) {
            watchers.push(watcher);
        }
    }

    /// Undo a prior [`Self::add_watcher`]. A no-op if `watcher` wasn't
    /// registered.
    pub fn remove_watcher(&self, watcher: ProcessId) {
        self.watchers.lock().retain(|w| *w != watcher);
    }

    /// Current watcher list, for the caller to notify after a terminating
    /// disposition fires.
    pub fn watchers(&self) -> Vec<ProcessId> {
        self.watchers.lock().clone()
    }

    fn validate(sig: Signal) -> KernelResult<()> {
        if sig == 0 || sig as usize >= NSIG {
            return Err(SignalError::InvalidSignal { signum: sig }.into());
        }
        Ok(())
    }

    /// Record `action` for `sig`. `SIG_IGN` discards any pending instances
    /// of the signal; `SIG_DFL` restores the table default.
    pub fn set_action(&self, sig: Signal, action: Action) -> KernelResult<()> {
        Self::validate(sig)?;
        if is_unmaskable(sig) {
            return Err(SignalError::Unmaskable { signum: sig }.into());
        }
        self.actions.lock()[sig as usize] = action;
        if action.handler == SIG_IGN {
            self.queue.lock().retain(|e| e.signal != sig);
        }
        Ok(())
    }

    fn action_for(&self, sig: Signal) -> Action {
        self.actions.lock()[sig as usize]
    }

    /// Queue `sig` if a user handler is installed; otherwise return the
    /// default-disposition outcome the caller should apply to the target
    /// process/thread immediately.
    pub fn send(
        &self,
        sig: Signal,
        value: i64,
        target_tid: i64,
        linux_compat: bool,
    ) -> KernelResult<SendOutcome> {
        Self::validate(sig)?;

        if is_unmaskable(sig) {
            return Ok(self.apply_default(sig, linux_compat));
        }

        let handler = self.action_for(sig).handler;
        if handler != SIG_DFL && handler != SIG_IGN {
            self.queue.lock().push_back(QueueEntry {
                signal: sig,
                value,
                target_tid,
            });
            return Ok(SendOutcome::Queued);
        }
        if handler == SIG_IGN {
            return Ok(SendOutcome::Ignored);
        }
        Ok(self.apply_default(sig, linux_compat))
    }

    fn apply_default(&self, sig: Signal, linux_compat: bool) -> SendOutcome {
        match default_disposition(sig) {
            Disposition::Ignore => SendOutcome::Ignored,
            Disposition::Stop => SendOutcome::Stopped,
            Disposition::Continue => SendOutcome::Continued,
            Disposition::Terminate => SendOutcome::Terminated {
                exit_code: exit_code_for(sig, linux_compat),
            },
            Disposition::Core => SendOutcome::CoreDumped {
                exit_code: exit_code_for(sig, linux_compat),
            },
        }
    }

    /// Pop the next deliverable signal for a thread whose blocked mask is
    /// `blocked_mask`, honoring process-wide blocking too.
    pub fn next_deliverable(&self, blocked_mask: u64) -> Option<QueueEntry> {
        let process_mask = self.process_mask.load(Ordering::Acquire);
        let mut queue = self.queue.lock();
        let idx = queue.iter().position(|e| {
            let bit = 1u64 << (e.signal % 64);
            bit & blocked_mask == 0 && bit & process_mask == 0
        })?;
        queue.remove(idx)
    }

    /// Reset all catchable handlers to default, per the `exec` contract.
    /// `SIG_IGN` dispositions survive `exec`, matching POSIX.
    pub fn reset_for_exec(&self) {
        let mut actions = self.actions.lock();
        for action in actions.iter_mut() {
            if action.handler != SIG_IGN {
                *action = Action::DEFAULT;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Native exit code is `100 + s`; Linux-compat is `128 + linux(s)`. This
/// substrate uses one canonical numbering for both, so `linux(s) == s`.
pub fn exit_code_for(sig: Signal, linux_compat: bool) -> i32 {
    if linux_compat {
        128 + sig as i32
    } else {
        100 + sig as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhandled_term_signal_terminates_with_native_exit_code() {
        let state = SignalState::new();
        let outcome = state.send(SIGTERM, 0, -1, false).unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Terminated {
                exit_code: 100 + SIGTERM as i32
            }
        );
    }

    #[test]
    fn unhandled_term_signal_uses_linux_exit_code_in_compat_mode() {
        let state = SignalState::new();
        let outcome = state.send(SIGTERM, 0, -1, true).unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Terminated {
                exit_code: 128 + SIGTERM as i32
            }
        );
    }

    #[test]
    fn handler_installed_queues_instead_of_terminating() {
        let state = SignalState::new();
        state
            .set_action(
                SIGTERM,
                Action {
                    handler: 0x4000_1000,
                    mask: 0,
                    flags: 0,
                    restorer: 0,
                },
            )
            .unwrap();
        let outcome = state.send(SIGTERM, 0, -1, false).unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(state.pending_count(), 1);
        let next = state.next_deliverable(0).expect("deliverable");
        assert_eq!(next.signal, SIGTERM);
    }

    #[test]
    fn sig_ign_discards_pending_instances() {
        let state = SignalState::new();
        state
            .set_action(
                SIGTERM,
                Action {
                    handler: 0x4000_1000,
                    ..Action::DEFAULT
                },
            )
            .unwrap();
        state.send(SIGTERM, 0, -1, false).unwrap();
        assert_eq!(state.pending_count(), 1);
        state
            .set_action(SIGTERM, Action { handler: SIG_IGN, ..Action::DEFAULT })
            .unwrap();
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn sigkill_bypasses_handler_and_masking() {
        let state = SignalState::new();
        state
            .set_action(
                SIGTERM,
                Action {
                    handler: 0x4000_1000,
                    ..Action::DEFAULT
                },
            )
            .ok();
        assert!(matches!(
            state.set_action(SIGKILL, Action::DEFAULT),
            Err(crate::error::KernelError::Signal(SignalError::Unmaskable { .. }))
        ));
        let outcome = state.send(SIGKILL, 0, -1, false).unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Terminated {
                exit_code: 100 + SIGKILL as i32
            }
        );
    }

    #[test]
    fn sigchld_default_is_ignore() {
        let state = SignalState::new();
        let outcome = state.send(SIGCHLD, 0, -1, false).unwrap();
        assert_eq!(outcome, SendOutcome::Ignored);
    }

    #[test]
    fn blocked_signal_is_not_deliverable_until_unblocked() {
        let state = SignalState::new();
        state
            .set_action(
                SIGUSR1,
                Action {
                    handler: 0x4000_2000,
                    ..Action::DEFAULT
                },
            )
            .unwrap();
        state.send(SIGUSR1, 0, -1, false).unwrap();
        let blocked = 1u64 << (SIGUSR1 % 64);
        assert!(state.next_deliverable(blocked).is_none());
        assert!(state.next_deliverable(0).is_some());
    }
}
