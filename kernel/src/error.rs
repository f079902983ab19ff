//! Kernel-wide error taxonomy.
//!
//! Every fallible kernel API returns one of these variants (or an `Option`
//! when there is exactly one failure mode and no useful context to attach).
//! Syscall and VFS boundaries collapse any `Err`/`None` to `-1` at the last
//! possible moment; the typed error is never discarded before that point.

use core::fmt;

/// The six error kinds named in the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Frame allocator empty, heap cannot grow, descriptor table full.
    OutOfResources { resource: &'static str },
    /// Bad vector number, unknown syscall, null user pointer, malformed path.
    InvalidArgument { what: &'static str },
    /// Unresolved path, unknown device, absent inode.
    NotFound { what: &'static str },
    /// Descriptor not opened for the requested operation, or the operation
    /// is not implemented (e.g. filesystem writes).
    PermissionOrMode { what: &'static str },
    /// Disk timeout, drive error bit set, or other device failure.
    Hardware { device: &'static str },
    /// Unhandled CPU exception, heap corruption, or other unrecoverable
    /// condition. The only variant that escalates to a halt.
    Fatal { reason: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfResources { resource } => {
                write!(f, "out of resources: {resource}")
            }
            KernelError::InvalidArgument { what } => write!(f, "invalid argument: {what}"),
            KernelError::NotFound { what } => write!(f, "not found: {what}"),
            KernelError::PermissionOrMode { what } => write!(f, "permission or mode: {what}"),
            KernelError::Hardware { device } => write!(f, "hardware error: {device}"),
            KernelError::Fatal { reason } => write!(f, "fatal: {reason}"),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Collapse any fallible kernel result to the syscall/VFS `-1` convention.
/// The error is logged before being discarded so it is never silent.
pub fn to_errno<T>(result: KernelResult<T>) -> Result<T, isize> {
    result.map_err(|e| {
        log::warn!("{e}");
        -1
    })
}
