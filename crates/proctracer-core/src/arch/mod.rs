//! # Architecture Adapter
//!
//! Per-architecture register layout, floating-point transport, breakpoint
//! opcode, call/return recognition, and debug-register programming.
//!
//! Only one of `x86_64`/`aarch64` is ever compiled into a given binary.
//! `ptrace` is a local-host facility and cross-architecture debugging is out
//! of scope, but the rest of the crate never branches on `target_arch`
//! itself. Every call site goes through the [`ArchAdapter`] trait via the
//! [`CurrentAdapter`] alias, the same way `platform/mod.rs` picked one OS
//! backend and re-exported it under a common name.

mod nt;

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "aarch64")]
mod aarch64;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("proctracer-core only supports x86_64 and aarch64 Linux hosts");

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{FpRegs, Gpr, X86_64Adapter as CurrentAdapter};

#[cfg(target_arch = "aarch64")]
pub use self::aarch64::{AArch64Adapter as CurrentAdapter, FpRegs, Gpr};

use crate::error::TracerResult;
use crate::types::{Address, BreakpointKind, Tid};

/// CPU architecture of the host (and therefore of the tracee, since `ptrace`
/// cannot debug across architectures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit x86 (Intel/AMD).
    X86_64,
    /// 64-bit ARM.
    AArch64,
}

impl Architecture
{
    /// Architecture of the currently running binary.
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "aarch64")]
        {
            Architecture::AArch64
        }
    }
}

impl std::fmt::Display for Architecture
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self {
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::AArch64 => write!(f, "aarch64"),
        }
    }
}

/// The per-architecture contract the Execution Controller drives through.
///
/// Implemented once by [`CurrentAdapter`] for whichever architecture this
/// binary was built for. All methods are associated functions (no `self`)
/// since the adapter carries no state of its own; all state lives in the
/// kernel (the tracee's registers and debug registers) or in the Thread
/// Registry / breakpoint tables above this layer.
pub trait ArchAdapter
{
    /// Fetch general-purpose registers for `tid`.
    fn get_regs(tid: Tid) -> TracerResult<Gpr>;

    /// Write general-purpose registers for `tid`.
    ///
    /// `syscall_override`, when `Some`, additionally overrides the in-flight
    /// syscall number (AArch64's sticky `override_syscall_number` field, a
    /// no-op on x86-64 where the syscall number lives in a GPR already
    /// covered by `regs`).
    fn set_regs(tid: Tid, regs: &Gpr, syscall_override: Option<i64>) -> TracerResult<()>;

    /// Fetch floating-point/vector state for `tid`.
    fn get_fp_regs(tid: Tid) -> TracerResult<FpRegs>;

    /// Write floating-point/vector state for `tid`.
    fn set_fp_regs(tid: Tid, regs: &FpRegs) -> TracerResult<()>;

    /// Program a free hardware debug slot on `tid` to trap on `kind` access
    /// to `address`/`length`. `ResourceExhausted` if no slot is free.
    fn install_hw(tid: Tid, address: Address, kind: BreakpointKind, length: u8) -> TracerResult<()>;

    /// Clear the debug slot programmed for `address` on `tid`, if any.
    fn remove_hw(tid: Tid, address: Address, kind: BreakpointKind, length: u8) -> TracerResult<()>;

    /// `true` if the most recent stop of `tid` was caused by the hardware
    /// breakpoint/watchpoint at `address`.
    fn hw_was_hit(tid: Tid, address: Address) -> TracerResult<bool>;

    /// Number of free hardware *execute* slots remaining on `tid`.
    fn remaining_hw_break_slots(tid: Tid) -> TracerResult<u32>;

    /// Number of free hardware *data* (write/read-write) slots remaining on
    /// `tid`. On x86-64 this is the same pool as execute slots; see the
    /// known rough edge documented on `HardwareBreakpointTable`.
    fn remaining_hw_watch_slots(tid: Tid) -> TracerResult<u32>;

    /// Splice the architecture's breakpoint opcode into `original`, an
    /// 8-byte-aligned word read from tracee memory, returning the patched
    /// word to poke back.
    fn install_breakpoint_word(original: u64) -> u64;

    /// Number of low-order bytes of a word actually altered by
    /// [`install_breakpoint_word`]: 1 on x86-64 (`INT3`), 4 on AArch64 (`BRK`
    /// occupies one fixed-width instruction word). Used to rewind a reported
    /// trap's program counter back to the breakpoint's own address.
    fn breakpoint_patch_len() -> u64;

    /// `true` if `window` (at least 8 bytes, starting at the instruction
    /// under inspection) begins a call instruction.
    fn is_call(window: &[u8]) -> bool;

    /// `true` if `window` begins a return instruction.
    fn is_ret(window: &[u8]) -> bool;

    /// `true` if `window` begins with this architecture's software-breakpoint
    /// opcode.
    fn is_sw_breakpoint(window: &[u8]) -> bool;

    /// Read the instruction pointer out of a GPR snapshot.
    fn instruction_pointer(regs: &Gpr) -> Address;

    /// Overwrite the instruction pointer in a GPR snapshot.
    fn set_instruction_pointer(regs: &mut Gpr, addr: Address);
}
