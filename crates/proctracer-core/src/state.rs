//! # Global State
//!
//! Process-wide state for one tracee: its thread registry, both breakpoint
//! tables, and the syscall-tracing toggle. Created at attach, destroyed at
//! final detach.
//!
//! Kept as an explicit struct passed by `&mut` to every controller
//! operation, never a hidden global, so a caller can run more than one
//! tracee side by side, each with its own `GlobalState`.

use crate::breakpoints::{HardwareBreakpointTable, SoftwareBreakpointTable};
use crate::registry::ThreadRegistry;
use crate::types::Pid;

/// Process-wide state for a single tracee.
#[derive(Debug)]
pub struct GlobalState
{
    /// Process id of the tracee's thread-group leader.
    pub pid: Pid,
    /// Live and graveyard threads.
    pub threads: ThreadRegistry,
    /// Address-ordered software breakpoint patches.
    pub software_breakpoints: SoftwareBreakpointTable,
    /// Per-thread hardware debug-slot reservations.
    pub hardware_breakpoints: HardwareBreakpointTable,
    /// When `true`, resumes use `PTRACE_SYSCALL` instead of `PTRACE_CONT`.
    pub syscall_trace_enabled: bool,
}

impl GlobalState
{
    /// Create state for a tracee identified by `pid`, with no threads or
    /// breakpoints registered yet. The Execution Controller populates the
    /// thread registry as attach/clone events are observed.
    pub fn new(pid: Pid) -> Self
    {
        GlobalState {
            pid,
            threads: ThreadRegistry::new(),
            software_breakpoints: SoftwareBreakpointTable::new(),
            hardware_breakpoints: HardwareBreakpointTable::new(),
            syscall_trace_enabled: false,
        }
    }

    /// Toggle whether subsequent resumes trace syscalls.
    pub fn set_syscall_trace(&mut self, enabled: bool)
    {
        self.syscall_trace_enabled = enabled;
    }

    /// `true` once every thread has exited or detached and no breakpoints
    /// remain; the state is ready to be dropped.
    pub fn is_torn_down(&self) -> bool
    {
        self.threads.is_empty()
    }
}
