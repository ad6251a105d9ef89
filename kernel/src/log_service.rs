//! Installs the `log` facade over the serial backend.
//!
//! Boot-time diagnostics across every subsystem (`mm::frame_pool::init`,
//! `fs::init`, process table bring-up, the panic pipeline) log through
//! `log::{info, warn, error, debug, trace}` rather than raw `println!`. The
//! level filter is set from the `--quiet` kernel command line flag: quiet
//! mode only lets `Warn` and above through, normal boot keeps `Info`.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};

static LOGGER: SerialLogger = SerialLogger;
static INSTALLED: AtomicBool = AtomicBool::new(false);

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = level_tag(record.level());
        let target = record.target();
        let mut port = crate::serial::SerialPort::from_inner(unsafe_default_inner());
        let _ = writeln!(port, "[{tag}] {target}: {}", record.args());
    }

    fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

#[cfg(target_arch = "x86_64")]
fn unsafe_default_inner() -> uart_16550::SerialPort {
    // SAFETY: 0x3F8 is the standard COM1 I/O port; constructing a
    // `SerialPort` does not perform I/O until a write call touches the port.
    unsafe { uart_16550::SerialPort::new(0x3F8) }
}

#[cfg(target_arch = "aarch64")]
fn unsafe_default_inner() -> crate::serial::Pl011Uart {
    crate::serial::Pl011Uart::new(0x0900_0000)
}

#[cfg(target_arch = "riscv64")]
fn unsafe_default_inner() -> crate::serial::Uart16550Compat {
    crate::serial::Uart16550Compat::new(0x1000_0000)
}

/// Install the global logger and set the level filter.
///
/// `quiet` corresponds to the `--quiet` command-line flag: when set, only
/// `Warn` and above reach the serial backend, matching the "suppress boot
/// log" description in the command-line table.
pub fn init(quiet: bool) {
    if INSTALLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    let filter = if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    log::set_max_level(filter);
    // SAFETY-equivalent: `set_logger` only fails if called twice; the
    // compare_exchange above guarantees this path runs once.
    let _ = log::set_logger(&LOGGER);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_tags_are_fixed_width() {
        assert_eq!(level_tag(Level::Error).len(), 5);
        assert_eq!(level_tag(Level::Warn).len(), 5);
        assert_eq!(level_tag(Level::Trace).len(), 5);
    }
}
