//! The four post-mortem screens and the line-editor command set.
//!
//! Grounded on `examples/original_source/Kernel/core/panic/ui.cpp`'s
//! `DisplayMainScreen`/`DisplayDetailsScreen`/`DisplayStackScreen`/
//! `DisplayProcessScreen` and its command dispatcher (`help, clear, exit,
//! reboot, bitmap, mem, dump <addr> <len>, diag, screen`). There is no
//! framebuffer or keyboard driver in this crate, so screens render to
//! `String` (written out over the serial backend by the caller) instead of
//! painting glyphs, and commands are dispatched from an already-read input
//! line instead of raw scancodes.

use alloc::{format, string::String};

use super::ExceptionFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Main,
    Detail,
    Stack,
    Process,
}

impl Screen {
    pub fn next(self) -> Self {
        match self {
            Self::Main => Self::Detail,
            Self::Detail => Self::Stack,
            Self::Stack => Self::Process,
            Self::Process => Self::Process,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Self::Main => Self::Main,
            Self::Detail => Self::Main,
            Self::Stack => Self::Detail,
            Self::Process => Self::Stack,
        }
    }
}

/// Render `screen` and log it line-by-line over the serial backend,
/// matching the teacher's `ExPrint`-to-terminal idiom minus the terminal.
pub fn render(screen: Screen, frame: &ExceptionFrame) {
    let text = match screen {
        Screen::Main => main_screen(frame),
        Screen::Detail => detail_screen(frame),
        Screen::Stack => stack_screen(frame),
        Screen::Process => process_screen(),
    };
    for line in text.lines() {
        log::error!("{line}");
    }
}

/// Summary + exception name + faulting function symbol (section 4.E).
/// Symbol resolution is best-effort: this substrate carries no symbol
/// table loader, so the faulting address is reported raw.
pub fn main_screen(frame: &ExceptionFrame) -> String {
    format!(
        "[panic] {} (vector {:#x}, error {:#x}) at ip={:#x}\nUse 'screen', 'help' for the post-mortem shell.",
        frame.mnemonic(),
        frame.vector,
        frame.error_code,
        frame.instruction_pointer
    )
}

/// All registers plus the decoded error code.
pub fn detail_screen(frame: &ExceptionFrame) -> String {
    format!(
        "ip={:#018x} sp={:#018x} cs={:#x} ss={:#x}\n\
         cr0={:#018x} cr2={:#018x} cr3={:#018x} cr4={:#018x}\n\
         rax={:#018x} rbx={:#018x} rcx={:#018x} rdx={:#018x}\n\
         rsi={:#018x} rdi={:#018x} rbp={:#018x} rflags={:#018x}\n\
         error_code={:#x}",
        frame.instruction_pointer,
        frame.stack_pointer,
        frame.code_segment,
        frame.stack_segment,
        frame.cr0,
        frame.cr2,
        frame.cr3,
        frame.cr4,
        frame.rax,
        frame.rbx,
        frame.rcx,
        frame.rdx,
        frame.rsi,
        frame.rdi,
        frame.rbp,
        frame.rflags,
        frame.error_code,
    )
}

/// Best-effort frame walk using `{BP, IP}` pairs. Without a symbol table
/// loaded this substrate can only report the raw chain, not resolved
/// function names; the teacher's version resolves through its kernel
/// symbol table, noted here as a known gap rather than faked output.
pub fn stack_screen(frame: &ExceptionFrame) -> String {
    format!(
        "#0 ip={:#018x} bp={:#018x} (unresolved: no symbol table in this substrate)",
        frame.instruction_pointer, frame.rbp
    )
}

/// Process/thread list, filtered to non-`Ready` by default, matching
/// `DisplayProcessScreen`'s `IgnoreReady` default.
pub fn process_screen() -> String {
    let mut out = String::from("pid  state        name\n");
    crate::process::PROCESS_TABLE.for_each(|p| {
        if p.state() != crate::process::ProcessState::Ready {
            out.push_str(&format!(
                "{:<4} {:<12?} {}\n",
                p.pid.0,
                p.state(),
                p.name.read()
            ));
        }
    });
    out
}

/// Outcome of a line-editor command, for the caller (an interactive shell
/// loop) to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Printed(String),
    ScreenChanged(Screen),
    Cleared,
    Reboot,
    Unknown,
}

/// Dispatch one command line against the current `screen`. Mirrors the
/// teacher's `strcmp`/`strncmp` chain in `ui.cpp`'s command handler.
pub fn handle_command(input: &str, screen: Screen, frame: &ExceptionFrame) -> CommandOutcome {
    let input = input.trim();
    if input == "help" {
        return CommandOutcome::Printed(String::from(
            "help              - this message\n\
             clear             - clear the screen\n\
             exit              - resume the selected screen\n\
             reboot            - restart the machine\n\
             bitmap            - print the frame pool bitmap summary\n\
             mem               - print memory usage totals\n\
             dump <addr> <len> - hex-dump <len> bytes at <addr>\n\
             diag              - write a diagnostic dump file\n\
             screen            - redraw the current screen",
        ));
    }
    if input == "clear" {
        return CommandOutcome::Cleared;
    }
    if input == "exit" {
        return CommandOutcome::ScreenChanged(screen);
    }
    if input == "reboot" {
        return CommandOutcome::Reboot;
    }
    if input == "bitmap" {
        let stats = crate::mm::frame_pool::stats();
        return CommandOutcome::Printed(format!(
            "frames: total={} free={} reserved={}",
            stats.total, stats.free, stats.reserved
        ));
    }
    if input == "mem" {
        let stats = crate::mm::frame_pool::stats();
        let used = stats.total.saturating_sub(stats.free).saturating_sub(stats.reserved);
        return CommandOutcome::Printed(format!(
            "{} / {} frames in use ({} reserved)",
            used, stats.total, stats.reserved
        ));
    }
    if let Some(rest) = input.strip_prefix("dump") {
        return CommandOutcome::Printed(dump_command(rest.trim()));
    }
    if input == "diag" {
        return CommandOutcome::Printed(String::from(
            "run crate::panic::dump::write_dump(...) from the shell driver to collect a diag file",
        ));
    }
    if input == "screen" {
        return CommandOutcome::Printed(main_screen(frame));
    }
    CommandOutcome::Unknown
}

fn dump_command(args: &str) -> String {
    let mut parts = args.split_whitespace();
    let (Some(addr_str), Some(len_str)) = (parts.next(), parts.next()) else {
        return String::from("usage: dump <addr> <len>");
    };
    let addr = match u64::from_str_radix(addr_str.trim_start_matches("0x"), 16) {
        Ok(v) => v,
        Err(_) => return format!("invalid address: {addr_str}"),
    };
    let len: usize = match len_str.parse() {
        Ok(v) => v,
        Err(_) => return format!("invalid length: {len_str}"),
    };
    format!("would dump {len} bytes at {addr:#x} (no live memory view outside the faulting core's physmap)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_every_command() {
        let frame = ExceptionFrame::default();
        match handle_command("help", Screen::Main, &frame) {
            CommandOutcome::Printed(text) => {
                for cmd in ["help", "clear", "exit", "reboot", "bitmap", "mem", "dump", "diag", "screen"] {
                    assert!(text.contains(cmd), "missing {cmd} in help text");
                }
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_command_reported() {
        let frame = ExceptionFrame::default();
        assert_eq!(handle_command("frobnicate", Screen::Main, &frame), CommandOutcome::Unknown);
    }

    #[test]
    fn screen_navigation_clamps_at_ends() {
        assert_eq!(Screen::Main.prev(), Screen::Main);
        assert_eq!(Screen::Process.next(), Screen::Process);
        assert_eq!(Screen::Main.next(), Screen::Detail);
    }

    #[test]
    fn dump_command_validates_arguments() {
        let frame = ExceptionFrame::default();
        match handle_command("dump 0x1000 16", Screen::Main, &frame) {
            CommandOutcome::Printed(text) => assert!(text.contains("16 bytes")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(
            handle_command("dump", Screen::Main, &frame),
            CommandOutcome::Printed(_)
        ));
    }

    #[test]
    fn reboot_and_clear_and_exit_outcomes() {
        let frame = ExceptionFrame::default();
        assert_eq!(handle_command("reboot", Screen::Main, &frame), CommandOutcome::Reboot);
        assert_eq!(handle_command("clear", Screen::Main, &frame), CommandOutcome::Cleared);
        assert_eq!(
            handle_command("exit", Screen::Stack, &frame),
            CommandOutcome::ScreenChanged(Screen::Stack)
        );
    }
}
