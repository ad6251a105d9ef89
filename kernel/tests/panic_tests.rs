//! Panic/diagnostics integration tests: the dump file format end to end
//! (create directory, probe filename, write, verify header) and the
//! post-mortem shell's command surface, against the public `panic` module.

extern crate alloc;

use fennix_core::{
    bootstrap::{MemoryMapEntry, MemoryRegionKind},
    panic::{
        dump::{build_dump, write_dump, DiagHeader},
        screens::{handle_command, CommandOutcome, Screen},
        ExceptionFrame,
    },
};

fn bring_up_fs() {
    let map = [MemoryMapEntry {
        base: 0x0010_0000,
        len: 16 * 1024 * 1024,
        kind: MemoryRegionKind::Usable,
    }];
    let _ = fennix_core::mm::frame_pool::init(&map, 0x0010_0000, 0x10_0000);
    let _ = fennix_core::fs::init();
}

/// Section 6's dump-file layout: a divide-by-zero style fault written out
/// under `/sys/log/panic`, with the exact magic/width/length header the
/// external reader tool depends on.
#[test]
fn write_dump_produces_a_well_formed_diag_file_under_sys_log_panic() {
    bring_up_fs();
    let frame = ExceptionFrame {
        vector: 0,
        instruction_pointer: 0x0010_2000,
        ..ExceptionFrame::default()
    };
    let kernel_image = [0xCCu8; 32];

    let path = write_dump(&frame, &kernel_image).expect("write_dump");
    assert!(path.starts_with("/sys/log/panic/dump-"));
    assert!(path.ends_with(".dmp"));

    let vfs = fennix_core::fs::vfs();
    let node = vfs.lookup(&vfs.root(), &path).expect("lookup written dump");
    let stat = vfs.stat(&node).expect("stat");

    let expected = build_dump(&frame, &kernel_image);
    assert_eq!(stat.size as usize, expected.len());

    let mut buf = alloc::vec![0u8; expected.len()];
    vfs.read(&node, &mut buf, 0).expect("read back dump");
    assert_eq!(buf, expected);
    assert_eq!(&buf[0..5], b"DIAG\0");
}

#[test]
fn write_dump_probes_past_an_already_used_filename() {
    bring_up_fs();
    let frame = ExceptionFrame::default();
    let first = write_dump(&frame, &[]).expect("first dump");
    let second = write_dump(&frame, &[]).expect("second dump");
    assert_ne!(first, second, "two dumps in the same tick window must not collide");
}

#[test]
fn diag_header_reports_native_pointer_width() {
    let header = DiagHeader::new(64);
    let bytes = header.to_bytes();
    assert_eq!(&bytes[0..5], b"DIAG\0");
    assert_eq!(bytes[9], (core::mem::size_of::<usize>() == 8) as u8);
}

#[test]
fn shell_dump_command_rejects_a_malformed_address() {
    let frame = ExceptionFrame::default();
    match handle_command("dump zzzz 16", Screen::Main, &frame) {
        CommandOutcome::Printed(text) => assert!(text.contains("invalid address")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn shell_screen_command_redraws_the_main_screen() {
    let frame = ExceptionFrame {
        vector: 14,
        instruction_pointer: 0xdead_beef,
        ..ExceptionFrame::default()
    };
    match handle_command("screen", Screen::Detail, &frame) {
        CommandOutcome::Printed(text) => assert!(text.contains("Page Fault")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
