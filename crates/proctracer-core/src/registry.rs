//! # Thread Registry
//!
//! Tracks every thread the controller currently knows about: a live set plus
//! a graveyard of detached/exited threads whose memory is kept around until
//! teardown (so in-flight [`ThreadStop`](crate::types::ThreadStop) chains
//! stay valid).

use nix::sys::signal::Signal;

use crate::arch::{ArchAdapter, CurrentAdapter, FpRegs, Gpr};
use crate::error::{TracerError, TracerResult};
use crate::types::Tid;

/// A single tracee thread and its register mirrors.
///
/// Register caches are authoritative between a stop and the next resume;
/// the Execution Controller flushes them back to the kernel before every
/// resume (`prepare_for_run` step 1).
#[derive(Debug, Clone)]
pub struct Thread
{
    /// Kernel thread id.
    pub tid: Tid,
    /// Cached general-purpose registers.
    pub gpr: Gpr,
    /// Cached floating-point/vector state, fetched lazily on first access
    /// via [`ThreadRegistry::fp_ptr`].
    pub fp: Option<FpRegs>,
    /// Signal to forward on the next resume, if any (`None` == 0 == no signal).
    pub pending_signal: Option<Signal>,
    /// AArch64's sticky syscall-number override. Always `None` on x86-64.
    pub syscall_override: Option<i64>,
}

/// Set of live threads plus a graveyard of detached/exited ones.
///
/// Backed by plain `Vec`s rather than a linked list. The only ordering
/// constraint is insertion-LIFO (new registrations become the new head), and
/// the only access patterns are full scan and single insertion, both cheap
/// at realistic thread counts.
#[derive(Debug, Default)]
pub struct ThreadRegistry
{
    live: Vec<Thread>,
    dead: Vec<Thread>,
}

impl ThreadRegistry
{
    /// Create an empty registry.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register `tid`, fetching its initial GPRs on first registration.
    /// Idempotent: registering an already-live tid just returns its record.
    pub fn register(&mut self, tid: Tid) -> TracerResult<&mut Thread>
    {
        if let Some(pos) = self.live.iter().position(|t| t.tid == tid) {
            return Ok(&mut self.live[pos]);
        }

        let gpr = CurrentAdapter::get_regs(tid)?;
        self.live.insert(
            0,
            Thread {
                tid,
                gpr,
                fp: None,
                pending_signal: None,
                syscall_override: None,
            },
        );

        Ok(&mut self.live[0])
    }

    /// Move `tid`'s record to the graveyard. A no-op if `tid` isn't live.
    /// Memory is freed only at [`ThreadRegistry::free_all`], not here.
    pub fn unregister(&mut self, tid: Tid)
    {
        if let Some(pos) = self.live.iter().position(|t| t.tid == tid) {
            let thread = self.live.remove(pos);
            self.dead.push(thread);
        }
    }

    /// Look up a live thread by tid.
    pub fn lookup(&self, tid: Tid) -> Option<&Thread>
    {
        self.live.iter().find(|t| t.tid == tid)
    }

    /// Look up a live thread by tid, mutably.
    pub fn lookup_mut(&mut self, tid: Tid) -> Option<&mut Thread>
    {
        self.live.iter_mut().find(|t| t.tid == tid)
    }

    /// Get a mutable reference to `tid`'s floating-point cache, fetching it
    /// from the kernel on first access.
    pub fn fp_ptr(&mut self, tid: Tid) -> TracerResult<&mut FpRegs>
    {
        let thread = self.lookup_mut(tid).ok_or(TracerError::NoSuchThread(tid))?;

        if thread.fp.is_none() {
            thread.fp = Some(CurrentAdapter::get_fp_regs(tid)?);
        }

        Ok(thread.fp.as_mut().expect("just populated"))
    }

    /// All live threads, head (most recently registered) first.
    pub fn live_threads(&self) -> &[Thread]
    {
        &self.live
    }

    /// All live threads, mutably.
    pub fn live_threads_mut(&mut self) -> &mut [Thread]
    {
        &mut self.live
    }

    /// `true` if no live threads remain.
    pub fn is_empty(&self) -> bool
    {
        self.live.is_empty()
    }

    /// Number of live threads.
    pub fn len(&self) -> usize
    {
        self.live.len()
    }

    /// Drop every live and dead record. Called at final teardown.
    pub fn free_all(&mut self)
    {
        self.live.clear();
        self.dead.clear();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn register_on_an_untraced_process_reports_kernel_refused()
    {
        // Our own pid is a real, running process, but not stopped under
        // ptrace, so PTRACE_GETREGS on it must fail (EPERM/ESRCH), exercising
        // the error-propagation path without needing a real tracee.
        let mut registry = ThreadRegistry::new();
        let self_tid = Tid::from(std::process::id());

        let err = registry.register(self_tid).expect_err("GETREGS on an untraced process must fail");
        assert!(matches!(
            err,
            TracerError::KernelRefused { operation: "PTRACE_GETREGS" | "PTRACE_GETREGSET", .. }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_of_unknown_tid_is_a_no_op()
    {
        let mut registry = ThreadRegistry::new();
        registry.unregister(Tid::from(999_999));
        assert!(registry.is_empty());
    }

    #[test]
    fn lookup_of_unknown_tid_is_none()
    {
        let registry = ThreadRegistry::new();
        assert!(registry.lookup(Tid::from(1)).is_none());
    }
}
