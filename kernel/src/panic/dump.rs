//! The `DIAG` dump file format and writer.
//!
//! Grounded on `examples/original_source/Kernel/core/panic/diag.cpp`:
//! `/sys/log/panic` is created on demand, the filename counter probes
//! `dump-<date>-N.dmp` for the first `N` not already present, and the file
//! itself is `{header, exception frame, kernel image length, kernel image
//! bytes}`. This substrate has no RTC/calendar driver (no specific driver
//! model is fixed by this design), so the date component of the filename is
//! derived from the monotonic boot tick counter instead of a wall-clock
//! date; the header layout and probing loop are otherwise exact.

use alloc::{format, string::String, sync::Arc, vec::Vec};

use crate::{
    error::KernelResult,
    fs::{self, inode, NodeCache},
};

use super::ExceptionFrame;

/// Fixed 16-byte-aligned header: magic, version, pointer-width flag, total
/// length.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct DiagHeader {
    pub magic: [u8; 5],
    pub version: u32,
    pub is_64: u8,
    pub length: u32,
}

impl DiagHeader {
    pub const MAGIC: [u8; 5] = *b"DIAG\0";

    pub fn new(length: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: 1,
            is_64: (core::mem::size_of::<usize>() == 8) as u8,
            length,
        }
    }

    pub fn to_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..5].copy_from_slice(&self.magic);
        buf[5..9].copy_from_slice(&self.version.to_le_bytes());
        buf[9] = self.is_64;
        buf[12..16].copy_from_slice(&self.length.to_le_bytes());
        buf
    }
}

/// Flatten `{header, frame, kernel_image.len() as u32, kernel_image}` into
/// one byte buffer, in the exact order the dump-file layout (section 6)
/// requires.
pub fn build_dump(frame: &ExceptionFrame, kernel_image: &[u8]) -> Vec<u8> {
    let frame_bytes = exception_frame_bytes(frame);
    let body_len = frame_bytes.len() + 4 + kernel_image.len();
    let total_len = 16 + body_len;

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&DiagHeader::new(total_len as u32).to_bytes());
    out.extend_from_slice(&frame_bytes);
    out.extend_from_slice(&(kernel_image.len() as u32).to_le_bytes());
    out.extend_from_slice(kernel_image);
    out
}

/// Serialize the register frame as fixed-width little-endian fields, in
/// struct-declaration order.
fn exception_frame_bytes(frame: &ExceptionFrame) -> Vec<u8> {
    let fields = [
        frame.vector,
        frame.error_code,
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
    ];
    let mut out = Vec::with_capacity(fields.len() * 8);
    for field in fields {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out
}

/// Create `/sys/log/panic` if missing, probe for the first unused
/// `dump-<tick>-N.dmp` name, and write the flattened dump there. Returns
/// the path written on success.
pub fn write_dump(frame: &ExceptionFrame, kernel_image: &[u8]) -> KernelResult<String> {
    let vfs = fs::vfs();
    let root = vfs.root();
    let panic_dir = vfs.create(&root, "sys", 0o755 | inode::S_IFDIR, false)?;
    let panic_dir = vfs.create(&panic_dir, "log", 0o755 | inode::S_IFDIR, false)?;
    let panic_dir = vfs.create(&panic_dir, "panic", 0o755 | inode::S_IFDIR, false)?;

    let day_component = crate::arch::timer::get_ticks() / (86_400 * 1_000);
    let (filename, dump_node) = probe_filename(vfs, &panic_dir, day_component)?;

    let data = build_dump(frame, kernel_image);
    vfs.write(&dump_node, &data, 0)?;

    Ok(format!("/sys/log/panic/{filename}"))
}

fn probe_filename(
    vfs: &fs::Vfs,
    panic_dir: &Arc<NodeCache>,
    day_component: u64,
) -> KernelResult<(String, Arc<NodeCache>)> {
    for n in 0..i32::MAX {
        let filename = format!("dump-{day_component}-{n}.dmp");
        if vfs.lookup(panic_dir, &filename).is_ok() {
            continue;
        }
        let node = vfs.create(panic_dir, &filename, 0o644 | inode::S_IFREG, true)?;
        return Ok((filename, node));
    }
    Err(crate::error::KernelError::Fs(crate::error::FsError::TooManyOpenFiles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panic::ExceptionFrame;

    #[test]
    fn header_round_trips_magic_and_flags() {
        let header = DiagHeader::new(128);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..5], b"DIAG\0");
        assert_eq!(u32::from_le_bytes(bytes[5..9].try_into().unwrap()), 1);
        assert_eq!(bytes[9], (core::mem::size_of::<usize>() == 8) as u8);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 128);
    }

    #[test]
    fn build_dump_length_matches_header() {
        let frame = ExceptionFrame::default();
        let image = [0xAAu8; 64];
        let dump = build_dump(&frame, &image);
        let total_len = u32::from_le_bytes(dump[12..16].try_into().unwrap()) as usize;
        assert_eq!(total_len, dump.len());
    }

    #[test]
    fn write_dump_creates_file_under_sys_log_panic() {
        let _ = fs::init();
        let frame = ExceptionFrame::default();
        let path = write_dump(&frame, &[0u8; 8]).expect("write_dump");
        assert!(path.starts_with("/sys/log/panic/dump-"));
        assert!(path.ends_with(".dmp"));
    }
}
