//! Bootstrap: the staged kernel bring-up sequence run from `_start`.
//!
//! Order matters and mirrors the dependency chain: the architecture layer
//! (GDT/IDT/PIC) before memory management (nothing above depends on a heap
//! until this point), memory management before the scheduler (tasks are
//! heap-allocated), the scheduler before interrupts are enabled (so a stray
//! timer tick has somewhere to land), and drivers/filesystem last since
//! they're the first things allowed to fail without taking the whole boot
//! down.

use crate::error::KernelResult;
use crate::{arch, drivers, fs, mm, sched};

/// Entry point for the scheduler's own idle task. Registering this (rather
/// than relying solely on `run`'s bare loop below) guarantees the ready
/// queue is never empty: without it, a task that calls `sleep_current`/
/// `block_current` with nothing else runnable would have `on_timer` find
/// `ready.pop_front()` empty and simply resume it instead of suspending.
extern "C" fn idle_task_entry() -> ! {
    loop {
        arch::x86_64::idle();
    }
}

pub fn kernel_init() -> KernelResult<()> {
    crate::logger::init();

    log::info!("bootstrap: stage 1, architecture");
    arch::init();

    log::info!("bootstrap: stage 2, memory management");
    mm::init();

    log::info!("bootstrap: stage 3, scheduler");
    sched::init();
    let idle_task = sched::Task::new_kernel(idle_task_entry as u64, "idle", sched::Priority::Idle)
        .expect("kernel stack for idle task");
    sched::scheduler::add(idle_task).expect("scheduler has room for the idle task");
    sched::scheduler::start();

    log::info!("bootstrap: stage 4, timer");
    arch::x86_64::timer::timer_init(100);
    arch::x86_64::enable_interrupts();

    log::info!("bootstrap: stage 5, drivers and filesystem");
    drivers::init();
    fs::init();

    log::info!("bootstrap: complete");
    Ok(())
}

/// Run the bootstrap sequence, then idle until the scheduler preempts us.
pub fn run() -> ! {
    if let Err(e) = kernel_init() {
        // Panic is intentional: kernel_init failure during boot is unrecoverable.
        // No subsystems are available for graceful error handling at this point.
        panic!("bootstrap failed: {:?}", e);
    }

    loop {
        arch::x86_64::idle();
    }
}
