//! The crash/panic pipeline: exception ingress, quiescing, and the handoff
//! to the interactive post-mortem shell and diagnostic dump.
//!
//! Grounded on `examples/original_source/Kernel/core/panic/handler.cpp`'s
//! `ExceptionLock`/`HandleException`/`HandleExceptionInsideException`
//! sequence: the first entrant takes a single global spinlock and proceeds
//! through quiescing; any further entrant (a fault inside the handler
//! itself) takes the "exception inside exception" path and halts
//! immediately instead of recursing. There is no framebuffer/graphics stack
//! in this crate (`examples/original_source`'s VGA/font rendering is out of
//! scope per the explicit "no graphics" non-goal), so the four-screen model
//! renders as formatted text over the serial backend `log_service.rs`
//! already installs, rather than painted glyphs.

pub mod dump;
pub mod screens;

use core::sync::atomic::{AtomicBool, Ordering};

/// Whether the interactive shell accepts commands on crash, set from the
/// `--ioc` kernel command-line flag.
static INTERACTIVE_ON_CRASH: AtomicBool = AtomicBool::new(true);

/// First entrant wins; a second concurrent fault sees this already `true`
/// and takes [`exception_inside_exception`] instead.
static EXCEPTION_LOCK: AtomicBool = AtomicBool::new(false);

/// A captured register/exception snapshot. Fields mirror the x86_64 trap
/// frame the teacher's `arch::x86_64::idt` stub would save; architectures
/// that don't populate a field (e.g. a Rust-level panic with no faulting
/// instruction) leave it zeroed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionFrame {
    pub vector: u64,
    pub error_code: u64,
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
    pub code_segment: u64,
    pub stack_segment: u64,
    pub cr0: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rflags: u64,
}

impl ExceptionFrame {
    /// Best-effort mnemonic for the captured vector, matching the teacher's
    /// `x86ExceptionMnemonics` table for the handful of vectors this
    /// substrate's IDT installs handlers for.
    pub fn mnemonic(&self) -> &'static str {
        match self.vector {
            0 => "Divide Error",
            3 => "Breakpoint",
            6 => "Invalid Opcode",
            8 => "Double Fault",
            13 => "General Protection Fault",
            14 => "Page Fault",
            _ => "Unknown Exception",
        }
    }
}

/// Arm the panic pipeline. Called once from [`crate::bootstrap::init`]
/// after every other subsystem is up, so a panic during bring-up itself
/// still reaches [`handle`] with a best-effort (mostly empty) frame.
pub fn init(interactive_on_crash: bool) {
    INTERACTIVE_ON_CRASH.store(interactive_on_crash, Ordering::Release);
    log::info!("panic: pipeline armed, interactive_on_crash={interactive_on_crash}");
}

/// Hardware exception ingress: the arch trap stub has already captured
/// `frame` and switched to the kernel page table (section 4.E "Entry").
/// Never returns.
pub fn enter(frame: ExceptionFrame) -> ! {
    if EXCEPTION_LOCK
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        exception_inside_exception(&frame);
    }
    quiesce();
    run_pipeline(&frame)
}

/// `#[panic_handler]` ingress for a Rust-level panic (an unwrap, an
/// assertion, an explicit `panic!`). There is no faulting instruction to
/// capture, so the frame carries only what's knowable: vector `0xFF`
/// (reserved, not a real exception number) and zeroed registers.
pub fn handle(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    let frame = ExceptionFrame {
        vector: 0xFF,
        ..ExceptionFrame::default()
    };
    if EXCEPTION_LOCK
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        exception_inside_exception(&frame);
    }
    quiesce();
    run_pipeline(&frame)
}

/// Quiescing (section 4.E): on a single-core build this is just the
/// bookkeeping the teacher's `HandleException` does unconditionally
/// (`Interrupts::RemoveAll()`, `TaskManager->Panic()`); `halt_other_cores`
/// is a documented no-op since this substrate has no SMP bring-up
/// protocol to IPI against.
fn quiesce() {
    halt_other_cores();
    log::error!("panic: quiescing, task dispatch stopped");
}

fn halt_other_cores() {
    // No-op: this substrate brings up exactly one core (no SMP bring-up
    // protocol, per the explicit non-goal). A multi-core build would send
    // an IPI here the way the teacher's `HaltAllCores` does.
}

fn exception_inside_exception(frame: &ExceptionFrame) -> ! {
    log::error!(
        "panic: exception inside exception ({} at ip={:#x}), halting",
        frame.mnemonic(),
        frame.instruction_pointer
    );
    halt_forever()
}

fn run_pipeline(frame: &ExceptionFrame) -> ! {
    log::error!(
        "panic: entering post-mortem ({} vector={:#x} ip={:#x})",
        frame.mnemonic(),
        frame.vector,
        frame.instruction_pointer
    );
    screens::render(screens::Screen::Main, frame);

    if INTERACTIVE_ON_CRASH.load(Ordering::Acquire) {
        log::info!("panic: interactive shell available; feed commands to screens::handle_command");
    }

    halt_forever()
}

fn halt_forever() -> ! {
    loop {
        crate::arch::idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_resolves_known_vectors() {
        let frame = ExceptionFrame { vector: 14, ..ExceptionFrame::default() };
        assert_eq!(frame.mnemonic(), "Page Fault");
    }

    #[test]
    fn mnemonic_falls_back_for_unknown_vector() {
        let frame = ExceptionFrame { vector: 200, ..ExceptionFrame::default() };
        assert_eq!(frame.mnemonic(), "Unknown Exception");
    }

    #[test]
    fn init_records_interactive_flag() {
        init(false);
        assert!(!INTERACTIVE_ON_CRASH.load(Ordering::Acquire));
        init(true);
        assert!(INTERACTIVE_ON_CRASH.load(Ordering::Acquire));
    }
}
