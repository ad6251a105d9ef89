//! fennix-core entry point.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![test_runner(fennix_core::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use fennix_core::{
    bootstrap::{self, BootInfo},
    exit_qemu, println, serial_println, QemuExitCode,
};

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fennix_core::panic::handle(info)
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[KERNEL PANIC] {}", info);
    exit_qemu(QemuExitCode::Failed);
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    println!(
        "fennix-core v{} ({})",
        env!("CARGO_PKG_VERSION"),
        &env!("GIT_HASH")[..12.min(env!("GIT_HASH").len())]
    );

    let memory_map = [];
    let modules = [];
    let boot_info = BootInfo {
        memory_map: &memory_map,
        kernel_phys_base: 0x0010_0000,
        kernel_phys_size: 0x0040_0000,
        rsdp: None,
        modules: &modules,
        bootloader_name: "unknown",
        cmdline: "",
    };
    let cfg = bootstrap::parse_cmdline(boot_info.cmdline);

    if let Err(e) = bootstrap::init(&boot_info, &cfg) {
        serial_println!("[BOOT] fatal: {e}");
        exit_qemu(QemuExitCode::Failed);
    }

    #[cfg(test)]
    test_main();

    println!("fennix-core: subsystems ready");

    fennix_core::sched::run();
}
