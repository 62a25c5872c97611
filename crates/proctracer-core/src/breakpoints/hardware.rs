//! # Hardware Breakpoint/Watchpoint Table
//!
//! Per-thread reservation of the host's debug slots: 4 on x86-64 (DR0-DR3),
//! up to 16 on AArch64 (as reported by the kernel's debug-info register).

use crate::arch::{ArchAdapter, CurrentAdapter};
use crate::error::{TracerError, TracerResult};
use crate::types::{Address, BreakpointKind, Tid};

/// One programmed hardware debug slot.
#[derive(Debug, Clone, Copy)]
pub struct HardwareBreakpoint
{
    /// Watched address.
    pub address: Address,
    /// Owning thread. A debug slot is per-thread, so the same address can be
    /// watched independently on multiple threads.
    pub tid: Tid,
    /// Access kind the slot traps on.
    pub kind: BreakpointKind,
    /// Watched length in bytes: `1`, `2`, `4`, or `8`. Execute breakpoints
    /// are coerced to `4` on AArch64 by the Arch Adapter regardless of what
    /// is stored here.
    pub length: u8,
    /// Whether the slot is currently programmed in the kernel.
    pub enabled: bool,
}

/// Per-thread hardware breakpoint/watchpoint table.
///
/// Unlike [`SoftwareBreakpointTable`](super::software::SoftwareBreakpointTable),
/// there is no address ordering invariant. Records are kept in
/// insertion-LIFO order (new registrations at the head), matching the thread
/// registry's convention.
#[derive(Debug, Default)]
pub struct HardwareBreakpointTable
{
    entries: Vec<HardwareBreakpoint>,
}

impl HardwareBreakpointTable
{
    /// Create an empty table.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register and immediately program a hardware breakpoint/watchpoint.
    ///
    /// Rejects a duplicate `(tid, address)` pair with
    /// [`TracerError::DuplicateHardwareBreakpoint`]. Propagates
    /// [`TracerError::ResourceExhausted`] from the Arch Adapter if no debug
    /// slot is free on `tid`.
    pub fn register(&mut self, tid: Tid, address: Address, kind: BreakpointKind, length: u8) -> TracerResult<()>
    {
        if self.entries.iter().any(|b| b.tid == tid && b.address == address) {
            return Err(TracerError::DuplicateHardwareBreakpoint { tid, address });
        }

        CurrentAdapter::install_hw(tid, address, kind, length)?;

        self.entries.insert(
            0,
            HardwareBreakpoint {
                address,
                tid,
                kind,
                length,
                enabled: true,
            },
        );

        Ok(())
    }

    /// Unregister the breakpoint at `(tid, address)`, if any: clear the slot
    /// if it's enabled, then always remove the record.
    pub fn unregister(&mut self, tid: Tid, address: Address) -> TracerResult<()>
    {
        let Some(pos) = self.entries.iter().position(|b| b.tid == tid && b.address == address) else {
            return Ok(());
        };

        let bp = self.entries[pos];

        if bp.enabled {
            CurrentAdapter::remove_hw(tid, address, bp.kind, bp.length)?;
        }

        self.entries.remove(pos);

        Ok(())
    }

    /// Program the slot and set the enabled flag for `(tid, address)`.
    pub fn enable(&mut self, tid: Tid, address: Address) -> TracerResult<()>
    {
        let Some(bp) = self.entries.iter_mut().find(|b| b.tid == tid && b.address == address) else {
            return Err(TracerError::NoHardwareBreakpoint { tid, address });
        };

        CurrentAdapter::install_hw(tid, address, bp.kind, bp.length)?;
        bp.enabled = true;

        Ok(())
    }

    /// Clear the slot and unset the enabled flag for `(tid, address)`.
    pub fn disable(&mut self, tid: Tid, address: Address) -> TracerResult<()>
    {
        let Some(bp) = self.entries.iter_mut().find(|b| b.tid == tid && b.address == address) else {
            return Err(TracerError::NoHardwareBreakpoint { tid, address });
        };

        CurrentAdapter::remove_hw(tid, address, bp.kind, bp.length)?;
        bp.enabled = false;

        Ok(())
    }

    /// The first enabled breakpoint owned by `tid` whose slot reports a hit,
    /// if any.
    pub fn get_hit(&self, tid: Tid) -> TracerResult<Option<Address>>
    {
        for bp in self.entries.iter().filter(|b| b.enabled && b.tid == tid) {
            if CurrentAdapter::hw_was_hit(tid, bp.address)? {
                return Ok(Some(bp.address));
            }
        }

        Ok(None)
    }

    /// All records owned by `tid`.
    pub fn for_thread(&self, tid: Tid) -> impl Iterator<Item = &HardwareBreakpoint>
    {
        self.entries.iter().filter(move |b| b.tid == tid)
    }

    /// All records, in insertion-LIFO order.
    pub fn entries(&self) -> &[HardwareBreakpoint]
    {
        &self.entries
    }
}
