//! # Software Breakpoint Table
//!
//! Address-ordered list of patched instructions. Memory patches are applied
//! once at registration, then re-applied/reverted each stop-resume cycle by
//! the Execution Controller (`prepare_for_run` / `wait_all_and_update_regs`).
//! See [`SoftwareBreakpointTable::apply_all`] and
//! [`SoftwareBreakpointTable::restore_all`].

use crate::arch::{ArchAdapter, CurrentAdapter};
use crate::error::TracerResult;
use crate::kernel;
use crate::types::{Address, BreakpointId};

/// One patched instruction.
///
/// Invariant upheld by the owning table: the list is sorted by ascending
/// `address`, so overlapping breakpoints can never shadow each other's
/// original bytes.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareBreakpoint
{
    /// Stable identifier.
    pub id: BreakpointId,
    /// Patched address.
    pub address: Address,
    /// The 8-byte word originally at `address`, before patching.
    pub original: u64,
    /// The patched word (original with the breakpoint opcode spliced in).
    pub patched: u64,
    /// Whether this breakpoint is currently armed. Toggling this flag does
    /// not by itself touch tracee memory; see module docs.
    pub enabled: bool,
}

/// Address-ordered software breakpoint table.
#[derive(Debug, Default)]
pub struct SoftwareBreakpointTable
{
    entries: Vec<SoftwareBreakpoint>,
    next_id: u64,
}

impl SoftwareBreakpointTable
{
    /// Create an empty table.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register a breakpoint at `address`, patching tracee memory through
    /// `tid` (any live, attached thread works; memory is process-wide).
    ///
    /// Re-registering an address that already has a record just re-enables
    /// it and returns the existing id; it does not double-patch.
    pub fn register(&mut self, tid: crate::types::Tid, address: Address) -> TracerResult<BreakpointId>
    {
        if let Some(existing) = self.entries.iter_mut().find(|b| b.address == address) {
            existing.enabled = true;
            return Ok(existing.id);
        }

        let original = kernel::peek_data(tid, address)?;
        let patched = CurrentAdapter::install_breakpoint_word(original);
        kernel::poke_data(tid, address, patched)?;

        let id = BreakpointId::new(self.next_id);
        self.next_id += 1;

        let record = SoftwareBreakpoint {
            id,
            address,
            original,
            patched,
            enabled: true,
        };

        let pos = self.entries.partition_point(|b| b.address < address);
        self.entries.insert(pos, record);

        Ok(id)
    }

    /// Remove the record at `address`, if any.
    ///
    /// Known rough edge (preserved, not silently fixed): this does **not**
    /// restore the original bytes. Callers that want pristine memory back
    /// must disable-then-let-the-wait-path-restore, or poke the original
    /// word themselves before unregistering.
    pub fn unregister(&mut self, address: Address)
    {
        self.entries.retain(|b| b.address != address);
    }

    /// Enable a breakpoint. Does not touch tracee memory; `apply_all` at the
    /// next `prepare_for_run` installs the patch.
    pub fn enable(&mut self, address: Address)
    {
        if let Some(bp) = self.entries.iter_mut().find(|b| b.address == address) {
            bp.enabled = true;
        }
    }

    /// Disable a breakpoint. Does not touch tracee memory.
    pub fn disable(&mut self, address: Address)
    {
        if let Some(bp) = self.entries.iter_mut().find(|b| b.address == address) {
            bp.enabled = false;
        }
    }

    /// All registered breakpoints, in ascending address order.
    pub fn entries(&self) -> &[SoftwareBreakpoint]
    {
        &self.entries
    }

    /// `true` if `address` holds an enabled breakpoint.
    pub fn is_enabled_at(&self, address: Address) -> bool
    {
        self.entries.iter().any(|b| b.address == address && b.enabled)
    }

    /// Apply every enabled breakpoint's patched word to tracee memory.
    /// Part of `prepare_for_run`, step 4.
    ///
    /// A failure patching one address is logged and does not stop the loop,
    /// since this is invoked from the resume path, which must still patch
    /// every other breakpoint and let the tracee run.
    pub fn apply_all(&self, tid: crate::types::Tid) -> TracerResult<()>
    {
        for bp in self.entries.iter().filter(|b| b.enabled) {
            if let Err(err) = kernel::poke_data(tid, bp.address, bp.patched) {
                tracing::warn!("failed to patch breakpoint at {}: {err}", bp.address);
            }
        }

        Ok(())
    }

    /// Restore every enabled breakpoint's original word to tracee memory, so
    /// a stopped tracee's memory reads back pristine. Part of
    /// `wait_all_and_update_regs`'s final step.
    ///
    /// Same log-and-continue policy as [`Self::apply_all`]: one address that
    /// can no longer be written (e.g. the tracee unmapped that page) must not
    /// prevent every other breakpoint from being restored.
    pub fn restore_all(&self, tid: crate::types::Tid) -> TracerResult<()>
    {
        for bp in self.entries.iter().filter(|b| b.enabled) {
            if let Err(err) = kernel::poke_data(tid, bp.address, bp.original) {
                tracing::warn!("failed to restore breakpoint at {}: {err}", bp.address);
            }
        }

        Ok(())
    }
}
