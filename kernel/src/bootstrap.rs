//! Boot info, kernel command line, and staged subsystem bring-up.
//!
//! Mirrors the teacher's multi-stage initialization style (`arch` then `mm`
//! then the higher subsystems) but drives it from a [`BootInfo`] value
//! instead of per-architecture globals, and trims bring-up to the subsystems
//! this crate actually has: `arch`, `mm`, `fs`, `process`, `panic`.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::{arch, error::KernelResult, fs, mm, panic as panic_pipeline, process};

/// Type of a boot-reported physical memory map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    Unknown,
}

/// One entry of the boot-provided physical memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub len: u64,
    pub kind: MemoryRegionKind,
}

/// A boot module (initrd, driver image, ...).
#[derive(Debug, Clone, Copy)]
pub struct BootModule {
    pub addr: u64,
    pub size: u64,
}

pub const MAX_MODULES: usize = 32;

/// Everything the bootloader hands the kernel before subsystem bring-up.
pub struct BootInfo<'a> {
    pub memory_map: &'a [MemoryMapEntry],
    pub kernel_phys_base: u64,
    pub kernel_phys_size: u64,
    pub rsdp: Option<u64>,
    pub modules: &'a [BootModule],
    pub bootloader_name: &'a str,
    pub cmdline: &'a str,
}

/// Scheduler tasking mode, from `--tasking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskingMode {
    Multi,
    Single,
}

/// Parsed kernel command line. Unknown flags are logged and otherwise
/// ignored -- the command line table states "unknown flags are reported,
/// not fatal".
#[derive(Debug, Clone)]
pub struct CmdlineConfig {
    pub alloc: Option<&'static str>,
    pub cores: Option<u32>,
    pub ioapic_irq: Option<u32>,
    pub tasking: TaskingMode,
    pub drvdir: Option<&'static str>,
    pub init: &'static str,
    pub linux_compat_default: bool,
    pub auto_unlock_deadlock: bool,
    pub interactive_on_crash: bool,
    pub simd: bool,
    pub quiet: bool,
    pub help: bool,
}

impl Default for CmdlineConfig {
    fn default() -> Self {
        Self {
            alloc: None,
            cores: None,
            ioapic_irq: None,
            tasking: TaskingMode::Multi,
            drvdir: None,
            init: "/sbin/init",
            linux_compat_default: false,
            auto_unlock_deadlock: false,
            interactive_on_crash: true,
            simd: true,
            quiet: false,
            help: false,
        }
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v, "true" | "1" | "yes")
}

/// Parse the whitespace-separated `key=value` kernel command line.
///
/// `'static` leaks are acceptable here: the command line is provided once at
/// boot and parsed exactly once, so the handful of string slices this
/// retains live for the life of the kernel.
#[cfg(feature = "alloc")]
pub fn parse_cmdline(line: &str) -> CmdlineConfig {
    let mut cfg = CmdlineConfig::default();
    for token in line.split_whitespace() {
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (token, None),
        };
        match key {
            "--alloc" => cfg.alloc = value.map(leak_str),
            "--cores" => cfg.cores = value.and_then(|v| v.parse().ok()),
            "--ioapicirq" => cfg.ioapic_irq = value.and_then(|v| v.parse().ok()),
            "--tasking" => {
                cfg.tasking = match value {
                    Some("single") => TaskingMode::Single,
                    _ => TaskingMode::Multi,
                }
            }
            "--drvdir" => cfg.drvdir = value.map(leak_str),
            "--init" => {
                if let Some(v) = value {
                    cfg.init = leak_str(v);
                }
            }
            "--linux" => cfg.linux_compat_default = value.map(parse_bool).unwrap_or(true),
            "--udl" => cfg.auto_unlock_deadlock = value.map(parse_bool).unwrap_or(true),
            "--ioc" => cfg.interactive_on_crash = value.map(parse_bool).unwrap_or(true),
            "--simd" => cfg.simd = value.map(parse_bool).unwrap_or(true),
            "--quiet" => cfg.quiet = value.map(parse_bool).unwrap_or(true),
            "-h" | "--help" => cfg.help = true,
            other => log::warn!("unrecognized kernel command-line flag: {other}"),
        }
    }
    cfg
}

#[cfg(feature = "alloc")]
fn leak_str(s: &str) -> &'static str {
    let owned: Vec<u8> = s.as_bytes().to_vec();
    let bytes: &'static [u8] = Vec::leak(owned);
    // SAFETY: `bytes` was just copied from a valid `&str`, so it is valid
    // UTF-8.
    unsafe { core::str::from_utf8_unchecked(bytes) }
}

/// Run the staged bring-up: arch, then the physical frame pool, then the
/// VFS, then the process table, then arm the panic pipeline.
pub fn init(info: &BootInfo, cfg: &CmdlineConfig) -> KernelResult<()> {
    crate::log_service::init(cfg.quiet);
    log::info!("fennix-core boot: bootloader={}", info.bootloader_name);

    arch::init();

    mm::frame_pool::init(info.memory_map, info.kernel_phys_base, info.kernel_phys_size)?;
    if let Some(rsdp) = info.rsdp {
        mm::frame_pool::reserve_physical_range(rsdp, mm::frame_pool::FRAME_SIZE)?;
    }
    for module in info.modules {
        mm::frame_pool::reserve_physical_range(module.addr, module.size)?;
    }
    mm::vas::init_kernel_template()?;

    fs::init()?;
    process::init(cfg.tasking)?;
    panic_pipeline::init(cfg.interactive_on_crash);

    log::info!("fennix-core boot: subsystems ready, init={}", cfg.init);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "alloc")]
    #[test]
    fn unknown_flags_are_not_fatal() {
        let cfg = parse_cmdline("--quiet=true --bogus=1 --tasking=single");
        assert!(cfg.quiet);
        assert_eq!(cfg.tasking, TaskingMode::Single);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn defaults_match_table() {
        let cfg = CmdlineConfig::default();
        assert!(!cfg.quiet);
        assert!(cfg.simd);
        assert_eq!(cfg.tasking, TaskingMode::Multi);
    }
}
