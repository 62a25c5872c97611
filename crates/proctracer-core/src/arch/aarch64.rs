//! AArch64 register layout, hardware debug registers, and opcode recognition.

use crate::error::{TracerError, TracerResult};
use crate::kernel;
use crate::types::{Address, BreakpointKind, Tid};

use super::ArchAdapter;
use super::nt;

/// AArch64 general-purpose register snapshot (`struct user_pt_regs`): X0-X30,
/// SP, PC, PSTATE. Fetched via `PTRACE_GETREGSET` with `NT_PRSTATUS` (AArch64
/// has no native `PTRACE_GETREGS`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Gpr
{
    /// X0-X30.
    pub regs: [u64; 31],
    /// Stack pointer.
    pub sp: u64,
    /// Program counter.
    pub pc: u64,
    /// Processor state (NZCV, etc.).
    pub pstate: u64,
}

/// AArch64 NEON/SIMD register snapshot (`struct user_fpsimd_struct`): V0-V31
/// plus FPSR/FPCR. Fetched via `NT_FPREGSET`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FpRegs
{
    /// V0-V31, 128 bits each.
    pub vregs: [u128; 32],
    /// Floating-point status register.
    pub fpsr: u32,
    /// Floating-point control register.
    pub fpcr: u32,
}

const _: () = assert!(std::mem::size_of::<FpRegs>() == 520);

/// BRK #0, encoded little-endian as `00 00 20 D4`.
const BRK_INSTRUCTION: u32 = 0xD420_0000;

/// Number of hardware debug slots the kernel regset header can describe.
const MAX_DEBUG_SLOTS: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HwDebugReg
{
    addr: u64,
    ctrl: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HwDebugState
{
    /// Low byte: number of implemented slots. Upper bits: debug architecture version.
    dbg_info: u32,
    pad: u32,
    regs: [HwDebugReg; MAX_DEBUG_SLOTS],
}

fn nt_type_for(kind: BreakpointKind) -> i32
{
    match kind {
        BreakpointKind::Execute => nt::NT_ARM_HW_BREAK,
        BreakpointKind::Write | BreakpointKind::ReadWrite => nt::NT_ARM_HW_WATCH,
    }
}

fn implemented_slots(state: &HwDebugState) -> usize
{
    ((state.dbg_info & 0xFF) as usize).min(MAX_DEBUG_SLOTS)
}

fn control_word(kind: BreakpointKind, length: u8) -> u32
{
    let condition: u32 = match kind {
        BreakpointKind::Execute => 0,
        BreakpointKind::Write => 2,
        BreakpointKind::ReadWrite => 3,
    };

    let len_mask: u32 = (1u32 << length) - 1;
    let fixed = (2 << 1) | 1; // PMC = user mode (0b10), E = enabled

    (len_mask << 5) | (condition << 3) | fixed
}

/// Marker type implementing [`ArchAdapter`] for AArch64 hosts.
pub struct AArch64Adapter;

impl ArchAdapter for AArch64Adapter
{
    fn get_regs(tid: Tid) -> TracerResult<Gpr>
    {
        unsafe { kernel::get_regset(tid, nt::NT_PRSTATUS) }
    }

    fn set_regs(tid: Tid, regs: &Gpr, syscall_override: Option<i64>) -> TracerResult<()>
    {
        unsafe { kernel::set_regset(tid, nt::NT_PRSTATUS, regs) }?;

        if let Some(number) = syscall_override {
            let number = number as i32;
            unsafe { kernel::set_regset(tid, nt::NT_ARM_SYSTEM_CALL, &number) }?;
        }

        Ok(())
    }

    fn get_fp_regs(tid: Tid) -> TracerResult<FpRegs>
    {
        unsafe { kernel::get_regset(tid, nt::NT_FPREGSET) }
    }

    fn set_fp_regs(tid: Tid, regs: &FpRegs) -> TracerResult<()>
    {
        unsafe { kernel::set_regset(tid, nt::NT_FPREGSET, regs) }
    }

    fn install_hw(tid: Tid, address: Address, kind: BreakpointKind, length: u8) -> TracerResult<()>
    {
        // Execute breakpoints are always coerced to 4-byte length (one
        // AArch64 instruction word) regardless of what the caller asked for.
        let length = if kind == BreakpointKind::Execute { 4 } else { length };
        let nt_type = nt_type_for(kind);

        let mut state: HwDebugState = unsafe { kernel::get_regset(tid, nt_type)? };
        let slots = implemented_slots(&state);

        let free = (0..slots)
            .find(|&i| state.regs[i].addr == 0)
            .ok_or_else(|| TracerError::ResourceExhausted(format!("no free hardware debug slot on tid {tid}")))?;

        state.regs[free] = HwDebugReg {
            addr: address.value(),
            ctrl: control_word(kind, length),
            pad: 0,
        };

        unsafe { kernel::set_regset(tid, nt_type, &state) }
    }

    fn remove_hw(tid: Tid, address: Address, kind: BreakpointKind, _length: u8) -> TracerResult<()>
    {
        let nt_type = nt_type_for(kind);
        let mut state: HwDebugState = unsafe { kernel::get_regset(tid, nt_type)? };
        let slots = implemented_slots(&state);

        let Some(slot) = (0..slots).find(|&i| state.regs[i].addr == address.value()) else {
            return Ok(());
        };

        state.regs[slot] = HwDebugReg { addr: 0, ctrl: 0, pad: 0 };

        unsafe { kernel::set_regset(tid, nt_type, &state) }
    }

    fn hw_was_hit(tid: Tid, address: Address) -> TracerResult<bool>
    {
        let info = kernel::get_sig_info(tid)?;

        if info.si_signo != libc::SIGTRAP || info.si_code != 4 {
            return Ok(false);
        }

        let hit_addr = unsafe { info.si_addr() } as u64;
        Ok(hit_addr == address.value())
    }

    fn remaining_hw_break_slots(tid: Tid) -> TracerResult<u32>
    {
        remaining_slots(tid, nt::NT_ARM_HW_BREAK)
    }

    fn remaining_hw_watch_slots(tid: Tid) -> TracerResult<u32>
    {
        remaining_slots(tid, nt::NT_ARM_HW_WATCH)
    }

    fn install_breakpoint_word(original: u64) -> u64
    {
        (original & !0xFFFF_FFFF) | u64::from(BRK_INSTRUCTION)
    }

    fn breakpoint_patch_len() -> u64
    {
        4
    }

    fn is_call(window: &[u8]) -> bool
    {
        let Some(insn) = read_insn(window) else { return false };
        (insn & 0xFC00_0000) == 0x9400_0000 // BL
            || (insn & 0xFFFF_FC1F) == 0xD63F_0000 // BLR Rn
    }

    fn is_ret(window: &[u8]) -> bool
    {
        let Some(insn) = read_insn(window) else { return false };
        (insn & 0xFFFF_FC1F) == 0xD65F_0000 // RET Rn
    }

    fn is_sw_breakpoint(window: &[u8]) -> bool
    {
        window.len() >= 4 && window[0..4] == [0x00, 0x00, 0x20, 0xD4]
    }

    fn instruction_pointer(regs: &Gpr) -> Address
    {
        Address::from(regs.pc)
    }

    fn set_instruction_pointer(regs: &mut Gpr, addr: Address)
    {
        regs.pc = addr.value();
    }
}

fn read_insn(window: &[u8]) -> Option<u32>
{
    if window.len() < 4 {
        return None;
    }

    Some(u32::from_le_bytes([window[0], window[1], window[2], window[3]]))
}

fn remaining_slots(tid: Tid, nt_type: i32) -> TracerResult<u32>
{
    let state: HwDebugState = unsafe { kernel::get_regset(tid, nt_type)? };
    let slots = implemented_slots(&state);

    Ok((0..slots).filter(|&i| state.regs[i].addr == 0).count() as u32)
}
