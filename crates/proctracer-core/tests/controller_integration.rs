//! Process-driving tests for the Execution Controller's stop/resume
//! orchestration: single-step, step-until, step-out, and the detach
//! variants, against real forked tracees.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult};

use proctracer_core::arch::{ArchAdapter, CurrentAdapter};
use proctracer_core::types::Tid;
use proctracer_core::{ExecutionController, GlobalState};

#[inline(never)]
extern "C" fn leaf() -> u64
{
    std::hint::black_box(1)
}

#[inline(never)]
extern "C" fn middle() -> u64
{
    leaf() + std::hint::black_box(1)
}

#[inline(never)]
extern "C" fn outer() -> u64
{
    middle() + std::hint::black_box(1)
}

fn spawn_stopped_child() -> (GlobalState, Tid)
{
    match unsafe { fork() }.expect("fork")
    {
        ForkResult::Child => {
            ExecutionController::trace_me().expect("PTRACE_TRACEME");
            nix::sys::signal::raise(Signal::SIGSTOP).expect("raise SIGSTOP");
            std::hint::black_box(outer());
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            let tid = Tid::from(child.as_raw());
            let mut state = GlobalState::new(child.into());
            ExecutionController::attach_self(&mut state, tid).expect("attach_self");
            (state, tid)
        }
    }
}

#[test]
fn single_step_advances_the_program_counter()
{
    let (mut state, tid) = spawn_stopped_child();

    let before_pc = state.threads.lookup(tid).map(|t| CurrentAdapter::instruction_pointer(&t.gpr)).unwrap();

    let already_waited = ExecutionController::single_step(&mut state, tid).expect("single_step");
    if !already_waited {
        nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(tid.raw()), None).expect("wait after step");
    }

    let gpr = CurrentAdapter::get_regs(tid).expect("regs after step");
    let after_pc = CurrentAdapter::instruction_pointer(&gpr);

    assert_ne!(before_pc, after_pc, "single-step must move the instruction pointer");

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
fn step_until_reaches_target_or_exhausts_budget()
{
    let (mut state, tid) = spawn_stopped_child();

    let current_pc = state.threads.lookup(tid).map(|t| CurrentAdapter::instruction_pointer(&t.gpr)).unwrap();

    // `target` == current pc: step_until must return immediately without
    // consuming any step of the budget.
    ExecutionController::step_until(&mut state, tid, current_pc, 5).expect("step_until no-op");

    let gpr = CurrentAdapter::get_regs(tid).expect("regs");
    assert_eq!(CurrentAdapter::instruction_pointer(&gpr), current_pc);

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
fn wait_all_and_update_regs_populates_every_live_threads_cache()
{
    let (mut state, tid) = spawn_stopped_child();

    let entry = proctracer_core::types::Address::from(outer as usize as u64);
    state.software_breakpoints.register(tid, entry).expect("register sw bp");

    ExecutionController::continue_all(&mut state).expect("continue_all");
    let chain = ExecutionController::wait_all_and_update_regs(&mut state).expect("wait_all");

    assert!(!chain.is_empty());
    assert!(state.threads.lookup(tid).is_some(), "the tracee must still be live at the breakpoint stop");

    for thread in state.threads.live_threads() {
        let kernel_regs = CurrentAdapter::get_regs(thread.tid).expect("kernel regs for a stopped thread");
        assert_eq!(
            CurrentAdapter::instruction_pointer(&thread.gpr),
            CurrentAdapter::instruction_pointer(&kernel_regs),
            "cached GPRs must match the kernel's after wait_all_and_update_regs"
        );
    }

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
fn step_out_lands_after_the_call_site_in_the_caller()
{
    let (mut state, tid) = spawn_stopped_child();

    let entry = proctracer_core::types::Address::from(leaf as usize as u64);
    state.software_breakpoints.register(tid, entry).expect("register sw bp at leaf's entry");

    ExecutionController::continue_all(&mut state).expect("continue_all to leaf");
    let chain = ExecutionController::wait_all_and_update_regs(&mut state).expect("wait_all");
    assert!(chain.iter().any(|s| s.tid == tid), "must have stopped at leaf's entry");

    state.software_breakpoints.unregister(entry);

    ExecutionController::step_out(&mut state, tid).expect("step_out");

    let gpr = CurrentAdapter::get_regs(tid).expect("regs after step_out");
    let pc = CurrentAdapter::instruction_pointer(&gpr);

    // `leaf` has no calls of its own, so step_out's nested_call_counter
    // starts and ends at its one return: the landing PC must have left
    // `leaf` behind (function layout isn't guaranteed, so we check "moved
    // off the entry address" rather than comparing against another
    // function's address).
    assert_ne!(pc, entry, "step_out must return into the caller, not stay at leaf's entry");

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
fn detach_for_migration_then_reattach_round_trips()
{
    let (mut state, tid) = spawn_stopped_child();

    ExecutionController::detach_migration(&mut state).expect("detach_migration");
    ExecutionController::reattach(&mut state).expect("reattach");

    assert!(state.threads.lookup(tid).is_some());

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
fn detach_and_continue_leaves_the_tracee_running_untraced()
{
    let (mut state, tid) = spawn_stopped_child();

    ExecutionController::detach_and_continue(&mut state).expect("detach_and_continue");
    assert!(state.is_torn_down());

    // Best-effort reap so the now-untraced, SIGCONT'd child doesn't linger
    // as a zombie once it runs to completion.
    let _ = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(tid.raw()), None);
}

#[test]
fn detach_kill_reaps_the_process()
{
    let (mut state, tid) = spawn_stopped_child();

    ExecutionController::detach_kill(&mut state).expect("detach_kill");
    assert!(state.is_torn_down());

    // The kernel must have actually reaped the child; a second wait reports
    // no such child.
    let result = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(tid.raw()), None);
    assert!(matches!(result, Err(nix::errno::Errno::ECHILD)) || matches!(result, Ok(WaitStatus::Exited(..))));
}
