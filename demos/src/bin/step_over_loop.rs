//! End-to-end demo of the public API: attach to a forked child, plant a
//! software breakpoint at a function's entry, and observe ten stops at the
//! same address before letting the child run to completion.
//!
//! Not part of the debugger control core itself, just a thin harness around it.

use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult};
use proctracer_core::types::{Address, Tid};
use proctracer_core::{ExecutionController, GlobalState};

const ITERATIONS: u64 = 100_000;

/// The function the demo plants a breakpoint on. `#[inline(never)]` keeps
/// its entry address stable and distinct from the call site.
#[inline(never)]
extern "C" fn f(i: u64) -> u64
{
    std::hint::black_box(i.wrapping_mul(2654435761))
}

fn main() -> proctracer_core::TracerResult<()>
{
    proctracer_utils::init_logging().ok();

    // SAFETY: single-threaded at fork time, and the child only calls
    // async-signal-safe functions (`trace_me`, raise, and a pure loop)
    // before the parent observes its first stop.
    match unsafe { fork() }.expect("fork")
    {
        ForkResult::Child => {
            ExecutionController::trace_me().expect("PTRACE_TRACEME");
            nix::sys::signal::raise(nix::sys::signal::Signal::SIGSTOP).expect("raise");

            let mut acc = 0u64;
            for i in 0..ITERATIONS {
                acc = acc.wrapping_add(f(i));
            }

            std::process::exit((acc & 0xFF) as i32);
        }
        ForkResult::Parent { child } => {
            let tid = Tid::from(child.as_raw());
            let mut state = GlobalState::new(child.into());

            ExecutionController::attach_self(&mut state, tid)?;

            let entry = Address::from(f as usize as u64);
            state.software_breakpoints.register(tid, entry)?;

            for hit in 0..10 {
                ExecutionController::continue_all(&mut state)?;
                let chain = ExecutionController::wait_all_and_update_regs(&mut state)?;

                let stop = chain.first().expect("at least one stop");
                assert_eq!(stop.tid, tid);
                assert!(
                    matches!(stop.status, WaitStatus::Stopped(_, nix::sys::signal::Signal::SIGTRAP)),
                    "expected a breakpoint trap on hit {hit}"
                );

                println!("hit {hit}: stopped at {entry}");
            }

            state.software_breakpoints.unregister(entry);

            loop {
                ExecutionController::continue_all(&mut state)?;
                let chain = ExecutionController::wait_all_and_update_regs(&mut state)?;
                if chain.iter().any(|s| s.is_terminal()) {
                    break;
                }
            }

            println!("child exited");
            Ok(())
        }
    }
}
