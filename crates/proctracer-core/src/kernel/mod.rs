//! # Kernel Request Layer
//!
//! Typed wrappers over `ptrace(2)` and its sibling syscalls (`waitpid`,
//! `tgkill`, `kill`). `nix::sys::ptrace` already wraps the common requests
//! safely; where it doesn't reach (`GETREGSET`/`SETREGSET`, `PEEKUSER`/
//! `POKEUSER`, `GETEVENTMSG` on some configurations) we fall through to raw
//! `libc::ptrace`, always clearing `errno` first and lifting the signed
//! return value into [`TracerResult`]. The raw syscall conflates success
//! values and `-1`-on-error, so every wrapper here is the single place that
//! distinguishes them.

use std::mem::MaybeUninit;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid as NixPid;

use crate::error::{TracerError, TracerResult};
use crate::types::{Address, Tid};

/// `PTRACE_TRACEME`: request the parent become this process's tracer.
/// Called in the child immediately after `fork`, before `exec`.
pub fn trace_me() -> TracerResult<()>
{
    nix::sys::ptrace::traceme().map_err(|_| TracerError::kernel_refused("PTRACE_TRACEME"))
}

/// `PTRACE_ATTACH`: attach to an already-running thread.
pub fn attach(tid: Tid) -> TracerResult<()>
{
    nix::sys::ptrace::attach(tid.into()).map_err(|_| TracerError::kernel_refused("PTRACE_ATTACH"))
}

/// `PTRACE_DETACH`, optionally forwarding a pending signal on resume.
pub fn detach(tid: Tid, signal: Option<Signal>) -> TracerResult<()>
{
    nix::sys::ptrace::detach(tid.into(), signal).map_err(|_| TracerError::kernel_refused("PTRACE_DETACH"))
}

/// `PTRACE_CONT`, forwarding `signal` if present.
pub fn cont(tid: Tid, signal: Option<Signal>) -> TracerResult<()>
{
    nix::sys::ptrace::cont(tid.into(), signal).map_err(|_| TracerError::kernel_refused("PTRACE_CONT"))
}

/// `PTRACE_SYSCALL`: continue until the next syscall entry/exit (or signal),
/// forwarding `signal` if present.
pub fn syscall(tid: Tid, signal: Option<Signal>) -> TracerResult<()>
{
    nix::sys::ptrace::syscall(tid.into(), signal).map_err(|_| TracerError::kernel_refused("PTRACE_SYSCALL"))
}

/// `PTRACE_SINGLESTEP`, forwarding `signal` if present.
pub fn single_step(tid: Tid, signal: Option<Signal>) -> TracerResult<()>
{
    nix::sys::ptrace::step(tid.into(), signal).map_err(|_| TracerError::kernel_refused("PTRACE_SINGLESTEP"))
}

/// `PTRACE_SETOPTIONS` enabling `FORK|VFORK|CLONE|EXEC|EXIT|SYSGOOD`, issued
/// once after the first stop following attach.
pub fn set_standard_options(tid: Tid) -> TracerResult<()>
{
    use nix::sys::ptrace::Options;

    let options = Options::PTRACE_O_TRACEFORK
        | Options::PTRACE_O_TRACEVFORK
        | Options::PTRACE_O_TRACECLONE
        | Options::PTRACE_O_TRACEEXEC
        | Options::PTRACE_O_TRACEEXIT
        | Options::PTRACE_O_TRACESYSGOOD;

    nix::sys::ptrace::setoptions(tid.into(), options).map_err(|_| TracerError::kernel_refused("PTRACE_SETOPTIONS"))
}

/// `PTRACE_GETEVENTMSG`: auxiliary event data for the most recent
/// `PTRACE_EVENT_*` stop (new pid for fork/clone, exit status for exit).
pub fn get_event_msg(tid: Tid) -> TracerResult<u64>
{
    nix::sys::ptrace::getevent(tid.into())
        .map(|v| v as u64)
        .map_err(|_| TracerError::kernel_refused("PTRACE_GETEVENTMSG"))
}

/// `PTRACE_GETSIGINFO`: details of the signal that caused the current stop,
/// used by the AArch64 hardware breakpoint hit detector (`si_code == 4`,
/// `si_addr`).
pub fn get_sig_info(tid: Tid) -> TracerResult<libc::siginfo_t>
{
    nix::sys::ptrace::getsiginfo(tid.into()).map_err(|_| TracerError::kernel_refused("PTRACE_GETSIGINFO"))
}

/// `PTRACE_PEEKDATA`: read one machine word from the tracee's address space.
pub fn peek_data(tid: Tid, addr: Address) -> TracerResult<u64>
{
    nix::sys::ptrace::read(tid.into(), addr.value() as *mut libc::c_void)
        .map(|v| v as u64)
        .map_err(|_| TracerError::kernel_refused("PTRACE_PEEKDATA"))
}

/// `PTRACE_POKEDATA`: write one machine word into the tracee's address space.
pub fn poke_data(tid: Tid, addr: Address, word: u64) -> TracerResult<()>
{
    unsafe { nix::sys::ptrace::write(tid.into(), addr.value() as *mut libc::c_void, word as i64) }
        .map_err(|_| TracerError::kernel_refused("PTRACE_POKEDATA"))
}

/// `PTRACE_PEEKUSER`: read one word from the tracee's `user` area (register
/// file / debug registers) at byte `offset`.
///
/// On AArch64 there is no native `PEEKUSER`; the hardware breakpoint module
/// emulates it via regset read-modify-write and never calls this directly.
pub fn peek_user(tid: Tid, offset: usize) -> TracerResult<u64>
{
    Errno::clear();
    let result = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKUSER,
            tid.raw(),
            offset as *mut libc::c_void,
            std::ptr::null_mut::<libc::c_void>(),
        )
    };

    if result == -1 && nix::errno::errno() != 0 {
        Err(TracerError::kernel_refused("PTRACE_PEEKUSER"))
    } else {
        Ok(result as u64)
    }
}

/// `PTRACE_POKEUSER`: write one word into the tracee's `user` area at byte
/// `offset`.
pub fn poke_user(tid: Tid, offset: usize, value: u64) -> TracerResult<()>
{
    Errno::clear();
    let result = unsafe {
        libc::ptrace(
            libc::PTRACE_POKEUSER,
            tid.raw(),
            offset as *mut libc::c_void,
            value as *mut libc::c_void,
        )
    };

    if result == -1 {
        Err(TracerError::kernel_refused("PTRACE_POKEUSER"))
    } else {
        Ok(())
    }
}

/// `PTRACE_GETREGSET`: read a register set identified by `nt_type` (e.g.
/// `NT_PRSTATUS`, `NT_ARM_HW_BREAK`) into a fixed-size buffer `T`.
///
/// # Safety
///
/// `T` must be a plain-old-data struct whose layout matches the kernel's
/// expectation for `nt_type` exactly (no padding the kernel doesn't expect,
/// correctly sized). Callers are the per-architecture adapter modules, which
/// own that invariant for each `nt_type` they use.
pub unsafe fn get_regset<T: Copy>(tid: Tid, nt_type: i32) -> TracerResult<T>
{
    let mut value: MaybeUninit<T> = MaybeUninit::uninit();
    let mut iov = libc::iovec {
        iov_base: value.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: std::mem::size_of::<T>(),
    };

    Errno::clear();
    let result = libc::ptrace(
        libc::PTRACE_GETREGSET,
        tid.raw(),
        nt_type as *mut libc::c_void,
        std::ptr::addr_of_mut!(iov).cast::<libc::c_void>(),
    );

    if result == -1 {
        Err(TracerError::kernel_refused("PTRACE_GETREGSET"))
    } else {
        Ok(value.assume_init())
    }
}

/// `PTRACE_SETREGSET`: write a register set identified by `nt_type` from `value`.
///
/// # Safety
///
/// Same layout requirement as [`get_regset`].
pub unsafe fn set_regset<T: Copy>(tid: Tid, nt_type: i32, value: &T) -> TracerResult<()>
{
    let mut iov = libc::iovec {
        iov_base: std::ptr::addr_of!(*value).cast_mut().cast::<libc::c_void>(),
        iov_len: std::mem::size_of::<T>(),
    };

    Errno::clear();
    let result = libc::ptrace(
        libc::PTRACE_SETREGSET,
        tid.raw(),
        nt_type as *mut libc::c_void,
        std::ptr::addr_of_mut!(iov).cast::<libc::c_void>(),
    );

    if result == -1 {
        Err(TracerError::kernel_refused("PTRACE_SETREGSET"))
    } else {
        Ok(())
    }
}

/// `waitpid` on the negated process-group id, optionally non-blocking
/// (`WNOHANG`), used to drain any stops that are already pending after the
/// head-of-chain thread has been reaped.
pub fn wait_group(pgid: Tid, no_hang: bool) -> TracerResult<Option<WaitStatus>>
{
    use nix::sys::wait::WaitPidFlag;

    let flags = if no_hang {
        WaitPidFlag::WNOHANG | WaitPidFlag::__WALL
    } else {
        WaitPidFlag::__WALL
    };

    let group = NixPid::from_raw(-pgid.raw());
    match nix::sys::wait::waitpid(group, Some(flags)) {
        Ok(status) => Ok(Some(status)),
        Err(Errno::ECHILD) => Ok(None),
        Err(_) => Err(TracerError::kernel_refused("waitpid")),
    }
}

/// `waitpid` on a specific tid, blocking.
pub fn wait_tid(tid: Tid) -> TracerResult<WaitStatus>
{
    nix::sys::wait::waitpid(NixPid::from(tid), None).map_err(|_| TracerError::kernel_refused("waitpid"))
}

/// `tgkill(pid, tid, sig)`: deliver a signal to one specific thread, as
/// opposed to `kill`'s whole-process delivery.
pub fn tgkill(pid: Tid, tid: Tid, signal: Signal) -> TracerResult<()>
{
    Errno::clear();
    let result = unsafe { libc::syscall(libc::SYS_tgkill, pid.raw(), tid.raw(), signal as libc::c_int) };

    if result == -1 {
        Err(TracerError::kernel_refused("tgkill"))
    } else {
        Ok(())
    }
}

/// `kill(pid, sig)`: deliver a signal to an entire process (used for
/// whole-process `SIGCONT` after detach-and-continue).
pub fn kill(pid: Tid, signal: Signal) -> TracerResult<()>
{
    nix::sys::signal::kill(NixPid::from(pid), signal).map_err(|_| TracerError::kernel_refused("kill"))
}
