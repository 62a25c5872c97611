//! # Error Types
//!
//! General error handling for the debugger control core.
//!
//! We use `thiserror` to generate `Error` trait implementations and
//! consistent error messages across the tracing, breakpoint, and register
//! surfaces.

use thiserror::Error;

use crate::types::{Address, Tid};

/// Main error type for debugger control core operations.
///
/// Every variant corresponds to one of the error kinds named in the kernel
/// request layer and execution controller: kernel refusals, not-found
/// lookups, resource exhaustion, and duplicate registration. There is
/// deliberately no "classification-unknown" variant: the call/return
/// recognizer treats an unclassifiable instruction window as a plain `bool`
/// (not a call, not a return), never as an error.
#[derive(Error, Debug)]
pub enum TracerError
{
    /// A tracing or sibling syscall returned an error.
    ///
    /// Carries the `errno` the kernel reported so callers can distinguish,
    /// e.g., `ESRCH` (no such process) from `EPERM` (permission denied).
    #[error("ptrace request '{operation}' failed: {errno}")]
    KernelRefused
    {
        /// Name of the request that failed (e.g. `"PTRACE_CONT"`).
        operation: &'static str,
        /// The errno the kernel reported.
        errno: nix::errno::Errno,
    },

    /// No such thread is registered in the Thread Registry.
    #[error("no such thread: tid {0}")]
    NoSuchThread(Tid),

    /// No software breakpoint is registered at the given address.
    #[error("no software breakpoint at {0}")]
    NoSoftwareBreakpoint(Address),

    /// No hardware breakpoint is registered for the given (thread, address) pair.
    #[error("no hardware breakpoint for tid {tid} at {address}")]
    NoHardwareBreakpoint
    {
        /// Owning thread.
        tid: Tid,
        /// Breakpoint address.
        address: Address,
    },

    /// A hardware breakpoint already exists for this (thread, address) pair.
    #[error("hardware breakpoint already registered for tid {tid} at {address}")]
    DuplicateHardwareBreakpoint
    {
        /// Owning thread.
        tid: Tid,
        /// Breakpoint address.
        address: Address,
    },

    /// No free hardware debug slot remains on the owning thread.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation requires an active tracee; none is attached.
    #[error("not attached to a tracee")]
    NotAttached,

    /// Argument failed validation before reaching the kernel.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error, e.g. reading `/proc/<pid>/...` when probing debug-register counts.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for `Result<T, TracerError>`.
///
/// ```rust
/// use proctracer_core::error::TracerResult;
/// fn foo() -> TracerResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type TracerResult<T> = std::result::Result<T, TracerError>;

impl TracerError
{
    /// Build a [`TracerError::KernelRefused`] from the last OS error, as
    /// `errno` is left by the ptrace request that just failed.
    pub(crate) fn kernel_refused(operation: &'static str) -> Self
    {
        TracerError::KernelRefused {
            operation,
            errno: nix::errno::Errno::last(),
        }
    }
}
