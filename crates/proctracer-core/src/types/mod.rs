//! Shared value types: addresses, identifiers, wait status, and register banks.

mod address;
mod ids;
mod stop;

pub use address::Address;
pub use ids::{BreakpointId, Pid, Tid};
pub use stop::ThreadStop;

pub use crate::arch::{Architecture, FpRegs, Gpr};

/// Access mode a hardware breakpoint/watchpoint traps on.
///
/// x86-64's DR7 condition field and AArch64's HW-break/HW-watch control word
/// both encode the same three cases, just with different bit patterns. The
/// Arch Adapter is responsible for that encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind
{
    /// Trap on instruction execution at the address.
    Execute,
    /// Trap on a data write to the address.
    Write,
    /// Trap on a data read or write at the address.
    ReadWrite,
}
