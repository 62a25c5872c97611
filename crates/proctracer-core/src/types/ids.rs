//! Process, thread, and breakpoint identifiers.

use std::fmt;

/// Process identifier (PID) of the tracee.
///
/// A newtype over `nix::unistd::Pid`'s raw representation so PIDs can't be
/// confused with thread IDs, addresses, or breakpoint IDs elsewhere in the
/// API.
///
/// ## Example
///
/// ```rust
/// use proctracer_core::types::Pid;
///
/// let pid = Pid::from(12345);
/// assert_eq!(pid.raw(), 12345);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(i32);

impl Pid
{
    /// Raw PID value, as the kernel understands it.
    pub const fn raw(self) -> i32
    {
        self.0
    }
}

impl From<i32> for Pid
{
    fn from(value: i32) -> Self
    {
        Pid(value)
    }
}

impl From<u32> for Pid
{
    fn from(value: u32) -> Self
    {
        Pid(value as i32)
    }
}

impl From<Pid> for nix::unistd::Pid
{
    fn from(pid: Pid) -> Self
    {
        nix::unistd::Pid::from_raw(pid.0)
    }
}

impl From<nix::unistd::Pid> for Pid
{
    fn from(pid: nix::unistd::Pid) -> Self
    {
        Pid(pid.as_raw())
    }
}

impl fmt::Display for Pid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier (Linux TID) of a tracee thread.
///
/// On Linux every thread is itself a schedulable task with its own TID; the
/// thread group leader's TID equals the process's PID. `ptrace` attaches and
/// operates on individual TIDs, not on the process as a whole, which is why
/// the Thread Registry keys everything by `Tid` rather than `Pid`.
///
/// ## Example
///
/// ```rust
/// use proctracer_core::types::Tid;
///
/// let tid = Tid::from(12345);
/// assert_eq!(tid.raw(), 12345);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(i32);

impl Tid
{
    /// Raw TID value, as the kernel understands it.
    pub const fn raw(self) -> i32
    {
        self.0
    }
}

impl From<i32> for Tid
{
    fn from(value: i32) -> Self
    {
        Tid(value)
    }
}

impl From<u32> for Tid
{
    fn from(value: u32) -> Self
    {
        Tid(value as i32)
    }
}

impl From<Tid> for nix::unistd::Pid
{
    fn from(tid: Tid) -> Self
    {
        nix::unistd::Pid::from_raw(tid.0)
    }
}

impl From<nix::unistd::Pid> for Tid
{
    fn from(pid: nix::unistd::Pid) -> Self
    {
        Tid(pid.as_raw())
    }
}

impl fmt::Display for Tid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a software breakpoint, stable for the life of the entry.
///
/// Assigned sequentially by the `SoftwareBreakpointTable` at insertion time;
/// never reused after removal within a single `GlobalState` lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Construct from a raw sequence value. Only the allocator in
    /// `SoftwareBreakpointTable` should call this.
    pub(crate) const fn new(value: u64) -> Self
    {
        BreakpointId(value)
    }

    /// Raw numeric value of this identifier.
    pub const fn value(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn pid_and_tid_roundtrip_through_nix()
    {
        let pid = Pid::from(4242);
        let nix_pid: nix::unistd::Pid = pid.into();
        assert_eq!(Pid::from(nix_pid), pid);

        let tid = Tid::from(4243);
        let nix_tid: nix::unistd::Pid = tid.into();
        assert_eq!(Tid::from(nix_tid), tid);
    }

    #[test]
    fn breakpoint_ids_are_distinct_and_ordered()
    {
        let a = BreakpointId::new(0);
        let b = BreakpointId::new(1);
        assert!(a < b);
        assert_ne!(a, b);
        assert_eq!(a.value(), 0);
    }
}
