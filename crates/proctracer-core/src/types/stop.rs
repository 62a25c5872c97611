//! Transient wait-status records produced by reaping a stop.

use nix::sys::wait::WaitStatus;

use super::Tid;

/// A `(tid, kernel wait status)` pair produced when reaping a stop.
///
/// Always a member of the chain returned by a single `wait_all_and_update_regs`
/// call; never retained across a resume. We reuse `nix::sys::wait::WaitStatus`
/// directly rather than re-deriving our own stop-reason enum. It already
/// distinguishes `Exited`, `Signaled`, `Stopped`, `PtraceEvent`, and
/// `PtraceSyscall` the way the kernel reports them.
#[derive(Debug, Clone, Copy)]
pub struct ThreadStop
{
    /// Thread the status belongs to.
    pub tid: Tid,
    /// Raw wait status as reaped from the kernel.
    pub status: WaitStatus,
}

impl ThreadStop
{
    /// Build a new transient stop record.
    pub const fn new(tid: Tid, status: WaitStatus) -> Self
    {
        ThreadStop { tid, status }
    }

    /// `true` if this stop reports a plain `SIGSTOP` delivery with no other
    /// ptrace event attached. This is the sentinel the Execution Controller
    /// checks for while stepping a thread past a software breakpoint (see
    /// `prepare_for_run`'s step 2).
    pub fn is_plain_sigstop(&self) -> bool
    {
        matches!(self.status, WaitStatus::Stopped(_, nix::sys::signal::Signal::SIGSTOP))
    }

    /// `true` if the tracee has exited or was killed by a signal, meaning the
    /// thread is no longer live and should move to the Thread Registry's
    /// graveyard.
    pub fn is_terminal(&self) -> bool
    {
        matches!(self.status, WaitStatus::Exited(..) | WaitStatus::Signaled(..))
    }
}
