//! Process-driving tests for software and hardware breakpoints: forks a
//! real child, traces it, and asserts on live `ptrace` state rather than
//! mocking the platform layer.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult};

use proctracer_core::arch::{ArchAdapter, CurrentAdapter};
use proctracer_core::kernel;
use proctracer_core::types::{Address, BreakpointKind, Tid};
use proctracer_core::{ExecutionController, GlobalState};

/// The function under test plants a breakpoint at this entry and expects to
/// see it hit once per loop iteration in the child.
#[inline(never)]
extern "C" fn counted(i: u64) -> u64
{
    std::hint::black_box(i)
}

// Three more distinct, real function entries for tests that register
// several software breakpoints at once: addresses must land in mapped,
// readable tracee memory, which arbitrary constants like `0x1000` do not,
// since the fork (no exec) means the child shares this very binary's code pages.
#[inline(never)]
extern "C" fn marker_a(i: u64) -> u64
{
    std::hint::black_box(i.wrapping_add(1))
}

#[inline(never)]
extern "C" fn marker_b(i: u64) -> u64
{
    std::hint::black_box(i.wrapping_add(2))
}

#[inline(never)]
extern "C" fn marker_c(i: u64) -> u64
{
    std::hint::black_box(i.wrapping_add(3))
}

/// A real, mapped memory location for the hardware watchpoint test to watch.
/// Forking gives the child its own copy at the same virtual address, so a
/// watchpoint set on the child's `tid` sees only the child's own writes.
static WATCHED: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Busy loop for the multithreaded test's worker threads: long enough that a
/// worker is virtually always still mid-flight, not naturally parked, when
/// the main thread's software breakpoint trips.
fn spin_worker()
{
    let mut acc = 0u64;
    for i in 0..20_000_000u64 {
        acc = acc.wrapping_add(i);
    }
    std::hint::black_box(acc);
}

fn spawn_traced_child(iterations: u64) -> (GlobalState, Tid)
{
    match unsafe { fork() }.expect("fork")
    {
        ForkResult::Child => {
            ExecutionController::trace_me().expect("PTRACE_TRACEME");
            nix::sys::signal::raise(Signal::SIGSTOP).expect("raise SIGSTOP");

            let mut acc = 0u64;
            for i in 0..iterations {
                acc = acc.wrapping_add(counted(i));
            }
            std::hint::black_box(acc);

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

/// Like [`spawn_traced_child`], but the child repeatedly writes `WATCHED`
/// instead of looping on `counted`.
fn spawn_traced_child_writing_watched(iterations: u64) -> (GlobalState, Tid)
{
    match unsafe { fork() }.expect("fork")
    {
        ForkResult::Child => {
            ExecutionController::trace_me().expect("PTRACE_TRACEME");
            nix::sys::signal::raise(Signal::SIGSTOP).expect("raise SIGSTOP");

            for i in 0..iterations {
                WATCHED.store(i, std::sync::atomic::Ordering::SeqCst);
            }

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

/// Like [`spawn_traced_child`], but the child spawns `worker_count` extra
/// OS threads (each running [`spin_worker`]) before entering its own loop.
/// The returned state has only the main thread registered; worker threads
/// are discovered one at a time via `PTRACE_EVENT_CLONE` stops, the way
/// [`ExecutionController::attach`]'s docs describe.
fn spawn_multithreaded_traced_child(iterations: u64, worker_count: usize) -> (GlobalState, Tid)
{
    match unsafe { fork() }.expect("fork")
    {
        ForkResult::Child => {
            ExecutionController::trace_me().expect("PTRACE_TRACEME");
            nix::sys::signal::raise(Signal::SIGSTOP).expect("raise SIGSTOP");

            let workers: Vec<_> = (0..worker_count).map(|_| std::thread::spawn(spin_worker)).collect();

            let mut acc = 0u64;
            for i in 0..iterations {
                acc = acc.wrapping_add(counted(i));
            }
            std::hint::black_box(acc);

            for w in workers {
                w.join().ok();
            }
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
fn single_thread_software_breakpoint_hits_ten_times_then_runs_to_completion()
{
    let (mut state, tid) = spawn_traced_child(100_000);

    let entry = Address::from(counted as usize as u64);
    state.software_breakpoints.register(tid, entry).expect("register sw bp");

    for _ in 0..10 {
        ExecutionController::continue_all(&mut state).expect("continue_all");
        let chain = ExecutionController::wait_all_and_update_regs(&mut state).expect("wait_all");

        let stop = chain.first().expect("at least one stop reaped");
        assert_eq!(stop.tid, tid);
        assert!(matches!(stop.status, WaitStatus::Stopped(_, Signal::SIGTRAP)));

        // The reported stop must land exactly on the breakpoint's own
        // address, not one byte past it (x86-64's INT3 reports the trap
        // with RIP already advanced; the controller rewinds it back).
        let pc = state.threads.lookup(tid).map(|t| CurrentAdapter::instruction_pointer(&t.gpr)).unwrap();
        assert_eq!(pc, entry, "reported stop must be exactly at the breakpoint address");

        // The breakpoint's original bytes must be visible to a stopped
        // reader: stopped => original instruction, running => patched.
        assert!(!state.software_breakpoints.entries().is_empty());
    }

    state.software_breakpoints.unregister(entry);

    loop {
        ExecutionController::continue_all(&mut state).expect("continue_all");
        let chain = ExecutionController::wait_all_and_update_regs(&mut state).expect("wait_all");
        if chain.iter().any(|s| s.is_terminal()) {
            assert!(matches!(chain[0].status, WaitStatus::Exited(_, 0)));
            break;
        }
    }
}

#[test]
fn register_is_idempotent_and_keeps_the_address_ordered_list_sorted()
{
    let (mut state, tid) = spawn_traced_child(1);

    let a = Address::from(marker_a as usize as u64);
    let b = Address::from(marker_b as usize as u64);
    let c = Address::from(marker_c as usize as u64);

    state.software_breakpoints.register(tid, a).unwrap();
    state.software_breakpoints.register(tid, b).unwrap();
    let first_id = state.software_breakpoints.register(tid, a).unwrap();
    let second_id = state.software_breakpoints.register(tid, a).unwrap();
    assert_eq!(first_id, second_id, "re-registering must not create a second record");
    state.software_breakpoints.register(tid, c).unwrap();

    let addresses: Vec<Address> = state.software_breakpoints.entries().iter().map(|bp| bp.address).collect();
    let mut sorted = addresses.clone();
    sorted.sort();
    assert_eq!(addresses, sorted, "breakpoint list must stay address-ordered after every register");
    assert_eq!(addresses.len(), 3, "re-registration must not double-insert");

    // Let the tracee die so the test doesn't leak a zombie.
    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
fn unregister_of_nonexistent_address_is_a_no_op()
{
    let (mut state, tid) = spawn_traced_child(1);

    let entry = Address::from(marker_a as usize as u64);
    state.software_breakpoints.register(tid, entry).unwrap();
    // `unregister` touches only the table, never tracee memory, so an
    // address that was never mapped is safe to pass here.
    state.software_breakpoints.unregister(Address::from(0xdead_beef));
    assert_eq!(state.software_breakpoints.entries().len(), 1);

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
#[cfg(target_arch = "x86_64")]
fn hardware_breakpoint_duplicate_registration_is_rejected()
{
    let (mut state, tid) = spawn_traced_child(1);

    state
        .hardware_breakpoints
        .register(tid, Address::from(0x4000), BreakpointKind::Write, 8)
        .expect("first registration succeeds");

    let err = state
        .hardware_breakpoints
        .register(tid, Address::from(0x4000), BreakpointKind::Write, 8)
        .expect_err("duplicate (tid, address) must be rejected");

    assert!(matches!(
        err,
        proctracer_core::TracerError::DuplicateHardwareBreakpoint { .. }
    ));

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
#[cfg(target_arch = "x86_64")]
fn debug_slot_exhaustion_leaves_earlier_breakpoints_intact()
{
    let (mut state, tid) = spawn_traced_child(1);

    let addresses = [0x1000u64, 0x2000, 0x3000, 0x4000];
    for &addr in &addresses {
        state
            .hardware_breakpoints
            .register(tid, Address::from(addr), BreakpointKind::Write, 8)
            .expect("one of the first four slots");
    }

    let overflow = state.hardware_breakpoints.register(tid, Address::from(0x5000), BreakpointKind::Write, 8);
    assert!(matches!(overflow, Err(proctracer_core::TracerError::ResourceExhausted(_))));

    // The first four records must survive the failed fifth registration.
    assert_eq!(state.hardware_breakpoints.entries().len(), 4);
    for &addr in &addresses {
        assert!(state.hardware_breakpoints.entries().iter().any(|bp| bp.address == Address::from(addr)));
    }

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
#[cfg(target_arch = "x86_64")]
fn hardware_watchpoint_trips_on_a_real_memory_write()
{
    let (mut state, tid) = spawn_traced_child_writing_watched(1_000_000);

    let watch_addr = Address::from(std::ptr::addr_of!(WATCHED) as u64);
    state
        .hardware_breakpoints
        .register(tid, watch_addr, BreakpointKind::Write, 8)
        .expect("register hw watchpoint");

    let mut tripped = false;

    for _ in 0..1_000_000 {
        ExecutionController::continue_all(&mut state).expect("continue_all");
        let chain = ExecutionController::wait_all_and_update_regs(&mut state).expect("wait_all");

        if chain.iter().any(|s| s.is_terminal()) {
            break;
        }

        if state.hardware_breakpoints.get_hit(tid).expect("get_hit") == Some(watch_addr) {
            tripped = true;
            break;
        }
    }

    assert!(tripped, "a real write to the watched address must trip the hardware watchpoint");

    ExecutionController::detach_kill(&mut state).ok();
}

#[test]
#[cfg(target_arch = "x86_64")]
fn multithreaded_stop_reaps_every_live_sibling_thread()
{
    const WORKER_COUNT: usize = 2;

    let (mut state, main_tid) = spawn_multithreaded_traced_child(500_000, WORKER_COUNT);

    let entry = Address::from(counted as usize as u64);
    state.software_breakpoints.register(main_tid, entry).expect("register sw bp");

    let mut discovered_workers: Vec<Tid> = Vec::new();
    let mut saw_full_sibling_chain = false;

    for _ in 0..5_000 {
        ExecutionController::continue_all(&mut state).expect("continue_all");
        let chain = ExecutionController::wait_all_and_update_regs(&mut state).expect("wait_all");

        if chain.iter().any(|s| s.is_terminal()) {
            break;
        }

        // A worker thread clone shows up as a PTRACE_EVENT_CLONE stop on the
        // main thread; the new tid is auto-attached by PTRACE_O_TRACECLONE
        // but still needs its own initial stop reaped before it can be
        // registered as a live thread.
        for stop in &chain {
            if discovered_workers.len() >= WORKER_COUNT {
                break;
            }

            if let WaitStatus::PtraceEvent(pid, _, libc::PTRACE_EVENT_CLONE) = stop.status {
                if pid.as_raw() == main_tid.raw() {
                    let new_tid = Tid::from(kernel::get_event_msg(main_tid).expect("event msg") as i32);
                    kernel::wait_tid(new_tid).expect("reap worker's initial auto-stop");
                    state.threads.register(new_tid).expect("register worker thread");
                    discovered_workers.push(new_tid);
                }
            }
        }

        if discovered_workers.len() == WORKER_COUNT {
            // Every currently-live tid must appear in this cycle's chain:
            // the head stop plus every sibling that `wait_all_and_update_regs`
            // had to SIGSTOP-and-reap because it wasn't already parked.
            let live_tids: Vec<Tid> = state.threads.live_threads().iter().map(|t| t.tid).collect();
            let reaped_tids: Vec<Tid> = chain.iter().map(|s| s.tid).collect();

            if live_tids.iter().all(|tid| reaped_tids.contains(tid)) {
                saw_full_sibling_chain = true;
                break;
            }
        }
    }

    assert_eq!(discovered_workers.len(), WORKER_COUNT, "both worker threads must be discovered via clone events");
    assert!(
        saw_full_sibling_chain,
        "wait_all_and_update_regs must reap every live sibling thread alongside the head stop"
    );

    ExecutionController::detach_kill(&mut state).ok();
}
