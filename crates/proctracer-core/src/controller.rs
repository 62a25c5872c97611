//! # Execution Controller
//!
//! Orchestrates stop/resume transitions: attach/detach, the prepare-for-run
//! sequence, continue-all, wait-all-and-update-registers, single-step,
//! step-until, step-out, and the four detach variants.
//!
//! The controller is not reentrant and keeps no state of its own; every
//! operation takes the [`GlobalState`] it drives explicitly, the way the
//! Kernel Request Layer takes a [`Tid`] explicitly rather than remembering
//! "the current thread". Callers must serialize invocations; concurrency
//! here is external (the tracee's own threads), never internal.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

use crate::arch::{ArchAdapter, CurrentAdapter};
use crate::error::{TracerError, TracerResult};
use crate::kernel;
use crate::state::GlobalState;
use crate::types::{Address, Tid, ThreadStop};

/// Stateless driver for one [`GlobalState`]. All operations are associated
/// functions; there is nothing to construct.
pub struct ExecutionController;

impl ExecutionController
{
    /// `PTRACE_TRACEME`, called in a forked child immediately before `exec`.
    pub fn trace_me() -> TracerResult<()>
    {
        kernel::trace_me()
    }

    /// Attach to an already-running thread and register it once its first
    /// stop is reaped. The caller is responsible for calling this once per
    /// thread of a multi-threaded target (the controller has no process-wide
    /// "attach all"; threads are discovered one at a time via clone events
    /// or explicit calls).
    pub fn attach(state: &mut GlobalState, tid: Tid) -> TracerResult<()>
    {
        tracing::debug!("attaching to tid {tid}");

        kernel::attach(tid)?;
        kernel::wait_tid(tid)?;
        state.threads.register(tid)?;
        kernel::set_standard_options(tid)?;

        tracing::debug!("attached to tid {tid}, trace options armed");

        Ok(())
    }

    /// Register a thread that stopped itself via `trace_me` (the forked-child
    /// path) and arm the standard trace options.
    pub fn attach_self(state: &mut GlobalState, tid: Tid) -> TracerResult<()>
    {
        tracing::debug!("reaping PTRACE_TRACEME stop for tid {tid}");

        kernel::wait_tid(tid)?;
        state.threads.register(tid)?;
        kernel::set_standard_options(tid)?;

        Ok(())
    }

    /// The fixed sequence run before every resume of any form.
    fn prepare_for_run(state: &mut GlobalState) -> TracerResult<()>
    {
        // Step 1: flush cached GPRs back to the kernel.
        let live: Vec<(Tid, crate::arch::Gpr, Option<i64>)> = state
            .threads
            .live_threads()
            .iter()
            .map(|t| (t.tid, t.gpr, t.syscall_override))
            .collect();

        for (tid, gpr, syscall_override) in &live {
            CurrentAdapter::set_regs(*tid, gpr, *syscall_override)?;
        }

        // The syscall-number override is sticky only until the Adapter
        // writes it once; clear our own copy so it isn't reapplied on the
        // next resume (spec.md's AArch64 paragraph on `override_syscall_number`).
        for (tid, ..) in &live {
            if let Some(thread) = state.threads.lookup_mut(*tid) {
                thread.syscall_override = None;
            }
        }

        // Step 2: step any thread parked on a software breakpoint past it.
        let live_tids_and_pcs: Vec<(Tid, Address)> =
            live.iter().map(|(tid, gpr, _)| (*tid, CurrentAdapter::instruction_pointer(gpr))).collect();

        for (tid, pc) in &live_tids_and_pcs {
            if !state.software_breakpoints.is_enabled_at(*pc) {
                continue;
            }

            kernel::single_step(*tid, None)?;
            let status = kernel::wait_tid(*tid)?;

            if ThreadStop::new(*tid, status).is_plain_sigstop() {
                kernel::single_step(*tid, None)?;
                kernel::wait_tid(*tid)?;
            }
        }

        // Step 3 (AArch64 only): step any thread parked on an enabled
        // hardware breakpoint past it, since hit detection there relies on
        // `si_addr` rather than a sticky status register like DR6.
        #[cfg(target_arch = "aarch64")]
        {
            for (tid, pc) in &live_tids_and_pcs {
                let hit = state
                    .hardware_breakpoints
                    .entries()
                    .iter()
                    .find(|b| b.tid == *tid && b.enabled && b.address == *pc)
                    .copied();

                let Some(bp) = hit else { continue };

                CurrentAdapter::remove_hw(*tid, bp.address, bp.kind, bp.length)?;
                kernel::single_step(*tid, None)?;
                kernel::wait_tid(*tid)?;
                CurrentAdapter::install_hw(*tid, bp.address, bp.kind, bp.length)?;
            }
        }

        // Step 4: apply every enabled software-breakpoint patch.
        if let Some(tid) = live.first().map(|(tid, ..)| *tid) {
            state.software_breakpoints.apply_all(tid)?;
        }

        Ok(())
    }

    /// Prepare-for-run, then resume every live thread (syscall-tracing or
    /// plain, per `state.syscall_trace_enabled`), forwarding and clearing
    /// each thread's pending signal.
    pub fn continue_all(state: &mut GlobalState) -> TracerResult<()>
    {
        Self::prepare_for_run(state)?;

        let tids: Vec<Tid> = state.threads.live_threads().iter().map(|t| t.tid).collect();

        for tid in tids {
            let signal = state.threads.lookup_mut(tid).and_then(|t| t.pending_signal.take());

            if state.syscall_trace_enabled {
                kernel::syscall(tid, signal)?;
            } else {
                kernel::cont(tid, signal)?;
            }
        }

        Ok(())
    }

    /// Block until some thread stops, then stop-and-reap every other live
    /// thread, drain any remaining ready statuses, refresh every GPR cache,
    /// and restore original bytes at every enabled software breakpoint.
    ///
    /// Returns the chain of stops reaped this cycle, head first.
    pub fn wait_all_and_update_regs(state: &mut GlobalState) -> TracerResult<Vec<ThreadStop>>
    {
        let pgid = Tid::from(state.pid.raw());

        let head_status = kernel::wait_group(pgid, false)?.ok_or(TracerError::NotAttached)?;
        let head_tid = status_tid(&head_status)?;
        tracing::trace!("reaped head stop: tid {head_tid}, status {head_status:?}");
        let mut chain = vec![ThreadStop::new(head_tid, head_status)];

        let other_tids: Vec<Tid> =
            state.threads.live_threads().iter().map(|t| t.tid).filter(|&tid| tid != head_tid).collect();

        for tid in other_tids {
            if CurrentAdapter::get_regs(tid).is_ok() {
                // A successful register fetch only succeeds on a stopped
                // tracee; this thread is already parked, nothing to reap.
                continue;
            }

            kernel::tgkill(pgid, tid, Signal::SIGSTOP)?;
            let status = kernel::wait_tid(tid)?;
            chain.insert(0, ThreadStop::new(tid, status));
        }

        while let Some(status) = kernel::wait_group(pgid, true)? {
            let tid = status_tid(&status)?;
            chain.insert(0, ThreadStop::new(tid, status));
        }

        for stop in &chain {
            if stop.is_terminal() {
                state.threads.unregister(stop.tid);
            }
        }

        for thread in state.threads.live_threads_mut() {
            thread.gpr = CurrentAdapter::get_regs(thread.tid)?;
        }

        // x86-64's INT3 reports the trap with the instruction pointer
        // already past the patched byte (the CPU pushes the return address
        // as part of raising #BP). Rewind the cached PC back to the
        // breakpoint's own address so every other part of the controller
        // (step 2 of `prepare_for_run`, the caller reading "where did we
        // stop") can compare PC to a breakpoint address directly. AArch64's
        // BRK reports PC at the trapping instruction itself, so no rewind
        // is needed there.
        #[cfg(target_arch = "x86_64")]
        {
            for thread in state.threads.live_threads_mut() {
                let pc = CurrentAdapter::instruction_pointer(&thread.gpr);
                if let Some(bp_addr) = pc.checked_sub(CurrentAdapter::breakpoint_patch_len()) {
                    if state.software_breakpoints.is_enabled_at(bp_addr) {
                        CurrentAdapter::set_instruction_pointer(&mut thread.gpr, bp_addr);
                    }
                }
            }
        }

        if let Some(tid) = state.threads.live_threads().first().map(|t| t.tid) {
            state.software_breakpoints.restore_all(tid)?;
        }

        Ok(chain)
    }

    /// Flush GPR caches, then issue one single-step request for `tid`,
    /// forwarding and clearing its pending signal. On AArch64, if `tid` is
    /// currently parked on an enabled hardware breakpoint, the breakpoint is
    /// removed, stepped past, and reinstalled around the step.
    ///
    /// Returns `true` if this call already waited on `tid` itself (the
    /// AArch64 hw-bp dance needs to reap the step before it can reinstall the
    /// slot), `false` if the issued step is still outstanding. Callers
    /// (`step_until`, `step_out`, or a direct `wait_tid`) must check this and
    /// skip their own `wait_tid` when it's `true`, or they'll block forever
    /// waiting on a stop that was already reaped.
    pub fn single_step(state: &mut GlobalState, tid: Tid) -> TracerResult<bool>
    {
        let live: Vec<(Tid, crate::arch::Gpr, Option<i64>)> =
            state.threads.live_threads().iter().map(|t| (t.tid, t.gpr, t.syscall_override)).collect();

        for (t, gpr, syscall_override) in &live {
            CurrentAdapter::set_regs(*t, gpr, *syscall_override)?;
        }

        if let Some(thread) = state.threads.lookup_mut(tid) {
            thread.syscall_override = None;
        }

        let signal = state.threads.lookup_mut(tid).and_then(|t| t.pending_signal.take());

        #[cfg(target_arch = "aarch64")]
        {
            let pc = state
                .threads
                .lookup(tid)
                .map(|t| CurrentAdapter::instruction_pointer(&t.gpr))
                .ok_or(TracerError::NoSuchThread(tid))?;

            let hit = state
                .hardware_breakpoints
                .entries()
                .iter()
                .find(|b| b.tid == tid && b.enabled && b.address == pc)
                .copied();

            if let Some(bp) = hit {
                CurrentAdapter::remove_hw(tid, bp.address, bp.kind, bp.length)?;
                kernel::single_step(tid, signal)?;
                kernel::wait_tid(tid)?;
                CurrentAdapter::install_hw(tid, bp.address, bp.kind, bp.length)?;

                return Ok(true);
            }
        }

        kernel::single_step(tid, signal)?;
        Ok(false)
    }

    /// Repeatedly single-step `tid`, waiting after each step, until its PC
    /// reaches `target` or `max_steps` single-steps have been consumed. A
    /// step that leaves the PC unchanged (a hardware-breakpoint retry) does
    /// not consume the budget.
    pub fn step_until(state: &mut GlobalState, tid: Tid, target: Address, max_steps: u32) -> TracerResult<()>
    {
        let mut steps_taken = 0;

        loop {
            let before_pc = state
                .threads
                .lookup(tid)
                .map(|t| CurrentAdapter::instruction_pointer(&t.gpr))
                .ok_or(TracerError::NoSuchThread(tid))?;

            if before_pc == target || steps_taken >= max_steps {
                return Ok(());
            }

            let already_waited = Self::single_step(state, tid)?;
            if !already_waited {
                kernel::wait_tid(tid)?;
            }

            let gpr = CurrentAdapter::get_regs(tid)?;
            if let Some(thread) = state.threads.lookup_mut(tid) {
                thread.gpr = gpr;
            }

            let after_pc = CurrentAdapter::instruction_pointer(&gpr);

            if after_pc != before_pc {
                steps_taken += 1;
            }
        }
    }

    /// Step `tid` until it returns from the function it is currently
    /// executing, tracking nested calls so a callee's own returns don't
    /// terminate early. On exit (any path), restores original bytes at every
    /// enabled software breakpoint.
    pub fn step_out(state: &mut GlobalState, tid: Tid) -> TracerResult<()>
    {
        Self::prepare_for_run(state)?;

        let mut nested_call_counter: i64 = 1;
        let mut landing_step = false;

        loop {
            let before_pc = state
                .threads
                .lookup(tid)
                .map(|t| CurrentAdapter::instruction_pointer(&t.gpr))
                .ok_or(TracerError::NoSuchThread(tid))?;

            let already_waited = Self::single_step(state, tid)?;
            if !already_waited {
                kernel::wait_tid(tid)?;
            }

            let gpr = CurrentAdapter::get_regs(tid)?;
            if let Some(thread) = state.threads.lookup_mut(tid) {
                thread.gpr = gpr;
            }

            let after_pc = CurrentAdapter::instruction_pointer(&gpr);

            if after_pc == before_pc {
                // hardware-breakpoint retry: counter stays frozen.
                continue;
            }

            if landing_step {
                break;
            }

            let window = read_window(tid, after_pc)?;

            if CurrentAdapter::is_sw_breakpoint(&window) {
                // The caller handles this stop; step-out terminates early.
                break;
            }

            if CurrentAdapter::is_call(&window) {
                nested_call_counter += 1;
            } else if CurrentAdapter::is_ret(&window) {
                nested_call_counter -= 1;

                if nested_call_counter == 0 {
                    landing_step = true;
                }
            }
        }

        state.software_breakpoints.restore_all(tid)?;

        Ok(())
    }

    /// Detach-for-kill: stop every thread that isn't already stopped, detach
    /// it, then `SIGKILL` it. The main thread is processed last because the
    /// thread registry keeps it at the tail.
    pub fn detach_kill(state: &mut GlobalState) -> TracerResult<()>
    {
        let pgid = Tid::from(state.pid.raw());
        let tids: Vec<Tid> = state.threads.live_threads().iter().map(|t| t.tid).collect();

        tracing::info!("detaching pid {pgid} for kill ({} live threads)", tids.len());

        for tid in tids {
            if CurrentAdapter::get_regs(tid).is_err() {
                kernel::tgkill(pgid, tid, Signal::SIGSTOP)?;
                kernel::wait_tid(tid)?;
            }

            kernel::detach(tid, None)?;
            kernel::tgkill(pgid, tid, Signal::SIGKILL)?;
        }

        while kernel::wait_group(pgid, true)?.is_some() {}

        state.threads.free_all();

        Ok(())
    }

    /// Detach-for-migration: flush each thread's GPRs (retrying through a
    /// stop if the write fails because the thread was running), freeze it
    /// with `SIGSTOP` so it stays put across the hand-off, then detach. The
    /// main thread is processed last.
    pub fn detach_migration(state: &mut GlobalState) -> TracerResult<()>
    {
        let pgid = Tid::from(state.pid.raw());
        let tids: Vec<Tid> = state.threads.live_threads().iter().map(|t| t.tid).collect();

        tracing::info!("detaching pid {pgid} for migration handoff ({} live threads)", tids.len());

        for tid in tids {
            let (gpr, syscall_override) = state
                .threads
                .lookup(tid)
                .map(|t| (t.gpr, t.syscall_override))
                .ok_or(TracerError::NoSuchThread(tid))?;

            if CurrentAdapter::set_regs(tid, &gpr, syscall_override).is_err() {
                kernel::tgkill(pgid, tid, Signal::SIGSTOP)?;
                kernel::wait_tid(tid)?;
                CurrentAdapter::set_regs(tid, &gpr, syscall_override)?;
            }

            kernel::tgkill(pgid, tid, Signal::SIGSTOP)?;
            kernel::wait_tid(tid)?;
            kernel::detach(tid, None)?;
        }

        Ok(())
    }

    /// Reattach: the inverse of [`Self::detach_migration`]. Attach to every
    /// tid in the same order and refresh its GPR cache. The main thread is
    /// processed last.
    pub fn reattach(state: &mut GlobalState) -> TracerResult<()>
    {
        let tids: Vec<Tid> = state.threads.live_threads().iter().map(|t| t.tid).collect();

        for tid in tids {
            kernel::attach(tid)?;
            kernel::wait_tid(tid)?;

            let gpr = CurrentAdapter::get_regs(tid)?;
            if let Some(thread) = state.threads.lookup_mut(tid) {
                thread.gpr = gpr;
            }
        }

        Ok(())
    }

    /// Detach-for-migration, then deliver `SIGCONT` to the whole process so
    /// it resumes running untraced.
    pub fn detach_and_continue(state: &mut GlobalState) -> TracerResult<()>
    {
        Self::detach_migration(state)?;
        let pgid = Tid::from(state.pid.raw());
        kernel::kill(pgid, Signal::SIGCONT)?;
        tracing::debug!("delivered SIGCONT to pid {pgid} after migration handoff");
        state.threads.free_all();

        Ok(())
    }
}

fn status_tid(status: &WaitStatus) -> TracerResult<Tid>
{
    status.pid().map(Tid::from).ok_or_else(|| TracerError::InvalidArgument("wait status carries no pid".into()))
}

/// Read the 8 bytes starting at `addr` in `tid`'s address space, for
/// call/return/breakpoint-opcode classification.
fn read_window(tid: Tid, addr: Address) -> TracerResult<[u8; 8]>
{
    Ok(kernel::peek_data(tid, addr)?.to_le_bytes())
}
