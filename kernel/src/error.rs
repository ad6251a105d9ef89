//! Kernel-wide error types.
//!
//! Every fallible kernel API returns `KernelResult<T>` rather than using
//! exceptions or panics for recoverable conditions. `KernelError` carries
//! enough structure to map onto a negative-errno value at the syscall
//! boundary (see [`KernelError::to_errno`]) while still being useful for
//! internal diagnostics.

use core::fmt;

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Frame pool failures (Component A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    OutOfMemory,
    InvalidFrame { frame: u64 },
    ReservedConflict { frame: u64 },
    NoContiguousRun { frames: u64 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::OutOfMemory => write!(f, "physical frame pool exhausted"),
            FrameError::InvalidFrame { frame } => write!(f, "invalid frame index {frame}"),
            FrameError::ReservedConflict { frame } => {
                write!(f, "frame {frame} is reserved, cannot be used")
            }
            FrameError::NoContiguousRun { frames } => {
                write!(f, "no contiguous run of {frames} free frames")
            }
        }
    }
}

/// Address-space / VMA failures (Component B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaError {
    PermissionDenied,
    Protected,
    CountMismatch { expected: usize, got: usize },
    Overlap,
    NotMapped,
    OutOfVirtualSpace,
}

impl fmt::Display for VmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmaError::PermissionDenied => write!(f, "permission denied on kernel-reserved range"),
            VmaError::Protected => write!(f, "region is protected and cannot be freed"),
            VmaError::CountMismatch { expected, got } => {
                write!(f, "page count mismatch: expected {expected}, got {got}")
            }
            VmaError::Overlap => write!(f, "region overlaps an existing mapping"),
            VmaError::NotMapped => write!(f, "address is not mapped"),
            VmaError::OutOfVirtualSpace => write!(f, "no virtual address range available"),
        }
    }
}

/// VFS failures (Component C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotADirectory,
    NotAFile,
    IsADirectory,
    AlreadyExists,
    NotSupported,
    ReadOnly,
    InvalidPath,
    NoRootFs,
    AlreadyMounted,
    NotMounted,
    TooManyOpenFiles,
    BadFileDescriptor,
    LoopDetected,
    NotASymlink,
    DirectoryNotEmpty,
    IoError,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsError::NotFound => "no such file or directory",
            FsError::NotADirectory => "not a directory",
            FsError::NotAFile => "is not a regular file",
            FsError::IsADirectory => "is a directory",
            FsError::AlreadyExists => "file exists",
            FsError::NotSupported => "operation not supported",
            FsError::ReadOnly => "filesystem is read-only",
            FsError::InvalidPath => "invalid path",
            FsError::NoRootFs => "no root filesystem mounted",
            FsError::AlreadyMounted => "mountpoint already in use",
            FsError::NotMounted => "not a mountpoint",
            FsError::TooManyOpenFiles => "too many open files",
            FsError::BadFileDescriptor => "bad file descriptor",
            FsError::LoopDetected => "too many levels of symbolic links",
            FsError::NotASymlink => "not a symbolic link",
            FsError::DirectoryNotEmpty => "directory not empty",
            FsError::IoError => "i/o error",
        };
        write!(f, "{s}")
    }
}

/// Process/thread substrate failures (Component D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    ProcessNotFound { pid: u64 },
    ThreadNotFound { tid: u64 },
    TooManyThreads,
    TooManyProcesses,
    InvalidState,
    NotPermitted,
    UnalignedBreak,
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcError::ProcessNotFound { pid } => write!(f, "no such process: {pid}"),
            ProcError::ThreadNotFound { tid } => write!(f, "no such thread: {tid}"),
            ProcError::TooManyThreads => write!(f, "thread limit exceeded"),
            ProcError::TooManyProcesses => write!(f, "process limit exceeded"),
            ProcError::InvalidState => write!(f, "invalid process/thread state for operation"),
            ProcError::NotPermitted => write!(f, "operation not permitted"),
            ProcError::UnalignedBreak => write!(f, "program break must be page-aligned"),
        }
    }
}

/// Signal subsystem failures (Component D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    InvalidSignal { signum: u32 },
    Unmaskable { signum: u32 },
    NotHandleable { signum: u32 },
    KernelProcess,
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::InvalidSignal { signum } => write!(f, "invalid signal number {signum}"),
            SignalError::Unmaskable { signum } => {
                write!(f, "signal {signum} cannot be masked or caught")
            }
            SignalError::NotHandleable { signum } => {
                write!(f, "signal {signum} cannot be given a handler")
            }
            SignalError::KernelProcess => write!(f, "cannot install a handler in a kernel task"),
        }
    }
}

/// Crate-wide error type. Every subsystem's native error wraps into one of
/// these variants so callers can propagate with `?` across module
/// boundaries.
#[must_use = "kernel errors must be handled, not silently discarded"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    Frame(FrameError),
    Vma(VmaError),
    Fs(FsError),
    Proc(ProcError),
    Signal(SignalError),
    InvalidArgument { name: &'static str },
    WouldBlock,
    Timeout,
    NotInitialized { subsystem: &'static str },
    /// Catch-all for call sites mid-migration to a typed variant above.
    LegacyError { message: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Frame(e) => write!(f, "{e}"),
            KernelError::Vma(e) => write!(f, "{e}"),
            KernelError::Fs(e) => write!(f, "{e}"),
            KernelError::Proc(e) => write!(f, "{e}"),
            KernelError::Signal(e) => write!(f, "{e}"),
            KernelError::InvalidArgument { name } => write!(f, "invalid argument: {name}"),
            KernelError::WouldBlock => write!(f, "operation would block"),
            KernelError::Timeout => write!(f, "operation timed out"),
            KernelError::NotInitialized { subsystem } => {
                write!(f, "{subsystem} is not initialized")
            }
            KernelError::LegacyError { message } => write!(f, "{message}"),
        }
    }
}

impl From<FrameError> for KernelError {
    fn from(e: FrameError) -> Self {
        KernelError::Frame(e)
    }
}
impl From<VmaError> for KernelError {
    fn from(e: VmaError) -> Self {
        KernelError::Vma(e)
    }
}
impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        KernelError::Fs(e)
    }
}
impl From<ProcError> for KernelError {
    fn from(e: ProcError) -> Self {
        KernelError::Proc(e)
    }
}
impl From<SignalError> for KernelError {
    fn from(e: SignalError) -> Self {
        KernelError::Signal(e)
    }
}
impl From<&'static str> for KernelError {
    fn from(message: &'static str) -> Self {
        KernelError::LegacyError { message }
    }
}

impl KernelError {
    /// Map to a negative-errno value, per the external errno surface: return
    /// values are negative-errno on failure, non-negative on success.
    pub fn to_errno(&self) -> i64 {
        let positive: i64 = match self {
            KernelError::Frame(FrameError::OutOfMemory) => 12, // ENOMEM
            KernelError::Frame(_) => 22,                       // EINVAL
            KernelError::Vma(VmaError::PermissionDenied) => 13, // EACCES
            KernelError::Vma(VmaError::Protected) => 13,
            KernelError::Vma(VmaError::OutOfVirtualSpace) => 12,
            KernelError::Vma(_) => 22,
            KernelError::Fs(FsError::NotFound) => 2,        // ENOENT
            KernelError::Fs(FsError::NotADirectory) => 20,  // ENOTDIR
            KernelError::Fs(FsError::IsADirectory) => 21,   // EISDIR
            KernelError::Fs(FsError::AlreadyExists) => 17,  // EEXIST
            KernelError::Fs(FsError::NotSupported) => 95,   // ENOTSUP
            KernelError::Fs(FsError::ReadOnly) => 30,       // EROFS
            KernelError::Fs(FsError::TooManyOpenFiles) => 24, // EMFILE
            KernelError::Fs(FsError::BadFileDescriptor) => 9, // EBADF
            KernelError::Fs(FsError::LoopDetected) => 40,   // ELOOP
            KernelError::Fs(FsError::NotASymlink) => 22,
            KernelError::Fs(FsError::DirectoryNotEmpty) => 39, // ENOTEMPTY
            KernelError::Fs(_) => 5,                           // EIO
            KernelError::Proc(ProcError::ProcessNotFound { .. }) => 3, // ESRCH
            KernelError::Proc(ProcError::ThreadNotFound { .. }) => 3,
            KernelError::Proc(ProcError::NotPermitted) => 1, // EPERM
            KernelError::Proc(_) => 22,
            KernelError::Signal(SignalError::InvalidSignal { .. }) => 22,
            KernelError::Signal(_) => 1, // EPERM
            KernelError::InvalidArgument { .. } => 22,
            KernelError::WouldBlock => 11,            // EAGAIN
            KernelError::Timeout => 110,              // ETIMEDOUT
            KernelError::NotInitialized { .. } => 19, // ENODEV
            KernelError::LegacyError { .. } => 5,
        };
        -positive
    }
}

/// Convenience constructor macro mirroring the teacher's `kernel_error!`
/// macro for call sites that want a one-line typed error.
#[macro_export]
macro_rules! kernel_error {
    (frame_oom) => {
        $crate::error::KernelError::Frame($crate::error::FrameError::OutOfMemory)
    };
    (not_found) => {
        $crate::error::KernelError::Fs($crate::error::FsError::NotFound)
    };
    (perm_denied) => {
        $crate::error::KernelError::Vma($crate::error::VmaError::PermissionDenied)
    };
    ($msg:literal) => {
        $crate::error::KernelError::LegacyError { message: $msg }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_always_negative_on_error() {
        let e = KernelError::Fs(FsError::NotFound);
        assert!(e.to_errno() < 0);
        assert_eq!(e.to_errno(), -2);
    }

    #[test]
    fn display_round_trips_through_kernel_error() {
        let e: KernelError = FrameError::OutOfMemory.into();
        assert_eq!(alloc::format!("{e}"), "physical frame pool exhausted");
    }
}
