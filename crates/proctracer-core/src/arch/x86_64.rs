//! x86-64 register layout, debug registers, and opcode recognition.

use crate::error::{TracerError, TracerResult};
use crate::kernel;
use crate::types::{Address, BreakpointKind, Tid};

use super::ArchAdapter;

/// x86-64 general-purpose register snapshot; matches the kernel's
/// `user_regs_struct` layout exactly (`PTRACE_GETREGS`/`SETREGS`).
pub type Gpr = libc::user_regs_struct;

/// 1-byte `INT3` software breakpoint opcode.
const INT3: u8 = 0xCC;

/// Number of hardware debug address slots (DR0-DR3).
const DEBUG_SLOT_COUNT: usize = 4;

/// Index of the DR6 status register within `user.u_debugreg`.
const DR6_INDEX: usize = 6;

/// Index of the DR7 control register within `user.u_debugreg`.
const DR7_INDEX: usize = 7;

fn dr_offset(index: usize) -> usize
{
    std::mem::offset_of!(libc::user, u_debugreg) + index * std::mem::size_of::<u64>()
}

fn dr7_fields(kind: BreakpointKind, length: u8) -> (u64, u64)
{
    let rw = match kind {
        BreakpointKind::Execute => 0b00,
        BreakpointKind::Write => 0b01,
        BreakpointKind::ReadWrite => 0b11,
    };

    let len = match length {
        1 => 0b00,
        2 => 0b01,
        8 => 0b10,
        _ => 0b11, // 4 bytes, and AArch64-style execute-coerced-to-4 callers
    };

    (rw, len)
}

fn free_slot(tid: Tid) -> TracerResult<Option<usize>>
{
    for slot in 0..DEBUG_SLOT_COUNT {
        if kernel::peek_user(tid, dr_offset(slot))? == 0 {
            return Ok(Some(slot));
        }
    }

    Ok(None)
}

fn find_slot_for(tid: Tid, address: Address) -> TracerResult<Option<usize>>
{
    for slot in 0..DEBUG_SLOT_COUNT {
        if kernel::peek_user(tid, dr_offset(slot))? == address.value() {
            return Ok(Some(slot));
        }
    }

    Ok(None)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "fp-legacy")] {
        /// Legacy FXSAVE-layout floating-point state (`PTRACE_GETFPREGS`).
        pub type FpRegs = libc::user_fpregs_struct;

        const _: () = assert!(std::mem::size_of::<FpRegs>() == 512);

        pub(super) fn read_fp(tid: Tid) -> TracerResult<FpRegs>
        {
            nix::sys::ptrace::getfpregs(tid.into()).map_err(|_| TracerError::kernel_refused("PTRACE_GETFPREGS"))
        }

        pub(super) fn write_fp(tid: Tid, regs: &FpRegs) -> TracerResult<()>
        {
            nix::sys::ptrace::setfpregs(tid.into(), *regs).map_err(|_| TracerError::kernel_refused("PTRACE_SETFPREGS"))
        }
    } else if #[cfg(feature = "fp-avx")] {
        /// AVX-layout XSTATE area (`PTRACE_GETREGSET` + `NT_X86_XSTATE`).
        #[derive(Debug, Clone, Copy)]
        #[repr(C)]
        pub struct FpRegs([u8; 904]);

        const _: () = assert!(std::mem::size_of::<FpRegs>() == 904);

        pub(super) fn read_fp(tid: Tid) -> TracerResult<FpRegs>
        {
            unsafe { kernel::get_regset(tid, super::nt::NT_X86_XSTATE) }
        }

        pub(super) fn write_fp(tid: Tid, regs: &FpRegs) -> TracerResult<()>
        {
            unsafe { kernel::set_regset(tid, super::nt::NT_X86_XSTATE, regs) }
        }
    } else if #[cfg(feature = "fp-avx512")] {
        /// AVX-512-layout XSTATE area (`PTRACE_GETREGSET` + `NT_X86_XSTATE`).
        #[derive(Debug, Clone, Copy)]
        #[repr(C)]
        pub struct FpRegs([u8; 2704]);

        const _: () = assert!(std::mem::size_of::<FpRegs>() == 2704);

        pub(super) fn read_fp(tid: Tid) -> TracerResult<FpRegs>
        {
            unsafe { kernel::get_regset(tid, super::nt::NT_X86_XSTATE) }
        }

        pub(super) fn write_fp(tid: Tid, regs: &FpRegs) -> TracerResult<()>
        {
            unsafe { kernel::set_regset(tid, super::nt::NT_X86_XSTATE, regs) }
        }
    }
}

/// Marker type implementing [`ArchAdapter`] for x86-64 hosts.
pub struct X86_64Adapter;

impl ArchAdapter for X86_64Adapter
{
    fn get_regs(tid: Tid) -> TracerResult<Gpr>
    {
        nix::sys::ptrace::getregs(tid.into()).map_err(|_| TracerError::kernel_refused("PTRACE_GETREGS"))
    }

    fn set_regs(tid: Tid, regs: &Gpr, _syscall_override: Option<i64>) -> TracerResult<()>
    {
        // x86-64 has no sticky syscall-number override; the syscall number
        // lives in `orig_rax`, already part of `regs`.
        nix::sys::ptrace::setregs(tid.into(), *regs).map_err(|_| TracerError::kernel_refused("PTRACE_SETREGS"))
    }

    fn get_fp_regs(tid: Tid) -> TracerResult<FpRegs>
    {
        read_fp(tid)
    }

    fn set_fp_regs(tid: Tid, regs: &FpRegs) -> TracerResult<()>
    {
        write_fp(tid, regs)
    }

    fn install_hw(tid: Tid, address: Address, kind: BreakpointKind, length: u8) -> TracerResult<()>
    {
        let slot = free_slot(tid)?.ok_or_else(|| {
            TracerError::ResourceExhausted(format!("no free hardware debug slot on tid {tid}"))
        })?;

        kernel::poke_user(tid, dr_offset(slot), address.value())?;

        let mut dr7 = kernel::peek_user(tid, dr_offset(DR7_INDEX))?;
        let (rw, len) = dr7_fields(kind, length);

        dr7 |= 1 << (2 * slot); // local enable
        dr7 &= !(0b11 << (16 + 4 * slot));
        dr7 |= rw << (16 + 4 * slot);
        dr7 &= !(0b11 << (18 + 4 * slot));
        dr7 |= len << (18 + 4 * slot);

        kernel::poke_user(tid, dr_offset(DR7_INDEX), dr7)
    }

    fn remove_hw(tid: Tid, address: Address, _kind: BreakpointKind, _length: u8) -> TracerResult<()>
    {
        let Some(slot) = find_slot_for(tid, address)? else {
            return Ok(());
        };

        kernel::poke_user(tid, dr_offset(slot), 0)?;

        let mut dr7 = kernel::peek_user(tid, dr_offset(DR7_INDEX))?;
        dr7 &= !(1 << (2 * slot));
        kernel::poke_user(tid, dr_offset(DR7_INDEX), dr7)
    }

    fn hw_was_hit(tid: Tid, address: Address) -> TracerResult<bool>
    {
        let Some(slot) = find_slot_for(tid, address)? else {
            return Ok(false);
        };

        let dr6 = kernel::peek_user(tid, dr_offset(DR6_INDEX))?;
        let hit = dr6 & (1 << slot) != 0;

        if hit {
            kernel::poke_user(tid, dr_offset(DR6_INDEX), dr6 & !(1 << slot))?;
        }

        Ok(hit)
    }

    fn remaining_hw_break_slots(tid: Tid) -> TracerResult<u32>
    {
        remaining_slots(tid)
    }

    fn remaining_hw_watch_slots(tid: Tid) -> TracerResult<u32>
    {
        // x86-64 shares one pool of 4 slots between breakpoints and
        // watchpoints; callers must not assume independence here.
        remaining_slots(tid)
    }

    fn install_breakpoint_word(original: u64) -> u64
    {
        (original & !0xFF) | u64::from(INT3)
    }

    fn breakpoint_patch_len() -> u64
    {
        1
    }

    fn is_call(window: &[u8]) -> bool
    {
        match window.first() {
            Some(0xE8) => true,
            Some(0xFF) if window.len() > 1 => {
                let reg_field = (window[1] >> 3) & 0b111;
                reg_field == 2 || reg_field == 3
            }
            _ => false,
        }
    }

    fn is_ret(window: &[u8]) -> bool
    {
        matches!(window.first(), Some(0xC3 | 0xC2 | 0xCB | 0xCA))
    }

    fn is_sw_breakpoint(window: &[u8]) -> bool
    {
        window.first() == Some(&INT3)
    }

    fn instruction_pointer(regs: &Gpr) -> Address
    {
        Address::from(regs.rip)
    }

    fn set_instruction_pointer(regs: &mut Gpr, addr: Address)
    {
        regs.rip = addr.value();
    }
}

fn remaining_slots(tid: Tid) -> TracerResult<u32>
{
    let mut free = 0u32;

    for slot in 0..DEBUG_SLOT_COUNT {
        if kernel::peek_user(tid, dr_offset(slot))? == 0 {
            free += 1;
        }
    }

    Ok(free)
}
