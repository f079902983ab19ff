//! Scheduler (C9): single-CPU round-robin over a circular ready queue.
//!
//! The switch contract is the one piece of this module that must be
//! followed to the letter (see `on_timer`): save the outgoing task's trap
//! frame, mark it, pick the new task off the ready queue, overwrite the
//! on-stack trap frame, and reload CR3 only if the address space actually
//! changed. Getting any step out of order either corrupts a sleeping
//! task's register state or flushes the TLB on every tick for no reason.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use super::task::{Task, TaskId, TaskState};
use crate::arch::x86_64::trap::TrapFrame;
use crate::mm::page_table;

const MAX_TASKS: usize = 64;

pub enum SchedAlgorithm {
    RoundRobin,
}

struct SchedulerState {
    tasks: [Option<Box<Task>>; MAX_TASKS],
    ready: VecDeque<TaskId>,
    sleeping: VecDeque<TaskId>,
    current: Option<TaskId>,
}

impl SchedulerState {
    const fn new() -> Self {
        const NONE: Option<Box<Task>> = None;
        Self {
            tasks: [NONE; MAX_TASKS],
            ready: VecDeque::new(),
            sleeping: VecDeque::new(),
            current: None,
        }
    }

    fn slot_of(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.as_ref().is_some_and(|t| t.id == id))
    }

    fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().flatten().find(|t| t.id == id).map(|b| b.as_ref())
    }
}

static STATE: Mutex<SchedulerState> = Mutex::new(SchedulerState::new());
static RUNNING: AtomicBool = AtomicBool::new(false);
static TOTAL_SWITCHES: AtomicU64 = AtomicU64::new(0);

pub fn init(_algorithm: SchedAlgorithm) {
    log::info!("scheduler initialized (round-robin)");
}

pub fn start() {
    RUNNING.store(true, Ordering::Release);
}

pub fn stop() {
    RUNNING.store(false, Ordering::Release);
}

/// Insert `task` into the task table and ready queue. Returns the task id,
/// or `None` if the task table is full.
///
/// Interrupts are masked for the duration of the lock: `STATE` is also
/// taken from `on_timer`, which runs on the timer IRQ, and a tick landing
/// mid-lock on the same core would spin forever against itself.
pub fn add(task: Task) -> Option<TaskId> {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let mut state = STATE.lock();
    let slot = state.tasks.iter().position(|t| t.is_none())?;
    let id = task.id;
    state.tasks[slot] = Some(Box::new(task));
    state.ready.push_back(id);
    Some(id)
}

/// Force-delete a task from every queue and the task table entirely,
/// whatever its current state — dropping its control block runs
/// `Drop for Task` and releases its kernel stack (and, for a user task, its
/// address space) unconditionally. For a normal task exit, prefer
/// `exit_current`/`on_timer`'s `reap_if_zombie`, which defer this until the
/// task is guaranteed off-CPU; calling `remove` directly on a task that is
/// still running on the current CPU would free its own stack out from
/// under it.
pub fn remove(id: TaskId) {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let mut state = STATE.lock();
    state.ready.retain(|&t| t != id);
    state.sleeping.retain(|&t| t != id);
    if state.current == Some(id) {
        state.current = None;
    }
    if let Some(slot) = state.slot_of(id) {
        state.tasks[slot] = None;
    }
}

fn wake_expired(state: &mut SchedulerState, now: u64) {
    let mut still_sleeping = VecDeque::new();
    while let Some(id) = state.sleeping.pop_front() {
        let wake_at = state.get(id).map(|t| t.wake_at_tick.load(Ordering::Relaxed));
        match wake_at {
            Some(tick) if tick <= now => {
                if let Some(task) = state.get(id) {
                    task.set_state(TaskState::Ready);
                }
                state.ready.push_back(id);
            }
            Some(_) => still_sleeping.push_back(id),
            None => {} // task was removed while sleeping
        }
    }
    state.sleeping = still_sleeping;
}

/// Called from the timer handler with the on-stack trap frame. Implements
/// the five-step switch contract: save outgoing, mark incoming, overwrite
/// the on-stack frame, reload CR3/TSS, then reap the outgoing task if it
/// exited (step 5 must come after the switch away from it completes — see
/// `reap_if_zombie`).
pub fn on_timer(frame: &mut TrapFrame) {
    if !RUNNING.load(Ordering::Acquire) {
        return;
    }

    let mut state = STATE.lock();
    wake_expired(&mut state, crate::arch::x86_64::timer::tick_count());

    let Some(next_id) = state.ready.pop_front() else {
        return; // nothing runnable; let the current task keep going
    };
    state.ready.push_back(next_id);

    if state.current == Some(next_id) {
        return; // only one runnable task; nothing to switch
    }

    let outgoing_id = state.current;

    // Step 1: save the outgoing task, if any. A task that just called
    // `exit_current` is already `Zombie` and dequeued; its frame is about
    // to be discarded along with the rest of it, so there's nothing to
    // save.
    if let Some(current_id) = outgoing_id {
        if let Some(current) = state.get(current_id) {
            if current.state() != TaskState::Zombie {
                *current.frame.lock() = *frame;
                if current.state() == TaskState::Running {
                    current.set_state(TaskState::Ready);
                }
            }
        }
    }

    // Step 2: mark the incoming task current and running.
    let Some(next) = state.get(next_id) else {
        return;
    };
    next.set_state(TaskState::Running);
    next.total_ticks.fetch_add(1, Ordering::Relaxed);
    let next_space = next.address_space;
    let next_stack = next.kernel_stack_top;

    // Step 3: overwrite the on-stack trap frame with the chosen task's.
    *frame = *next.frame.lock();

    state.current = Some(next_id);
    TOTAL_SWITCHES.fetch_add(1, Ordering::Relaxed);
    drop(state);

    // Step 4: reload CR3 only if the address space actually changed; this
    // is the only TLB-flushing-everything operation in the switch path.
    if next_space.as_u64() != page_table::current_top_table().as_u64() {
        page_table::switch_to(next_space);
    }
    crate::arch::x86_64::gdt::set_kernel_stack_for_traps(next_stack);

    // Step 5: now that we are no longer running on the outgoing task's
    // stack or address space, reap it if it exited.
    if let Some(id) = outgoing_id {
        reap_if_zombie(id);
    }
}

/// Move the current task to `Zombie`, record its exit code, and dequeue it
/// from `ready`/`sleeping` so it is never scheduled again, then force a
/// reschedule away from it. Its control block and resources are released
/// later, by `on_timer`'s `reap_if_zombie` step, once the switch away from
/// it has completed — dropping it here, while it is still the running
/// task, would free its own kernel stack and (for a user task) address
/// space out from under the CPU currently executing on them.
pub fn exit_current(exit_code: u32) {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let mut state = STATE.lock();
    if let Some(id) = state.current {
        if let Some(task) = state.get(id) {
            task.exit_code.store(exit_code, Ordering::Relaxed);
            task.set_state(TaskState::Zombie);
        }
        state.ready.retain(|&t| t != id);
        state.sleeping.retain(|&t| t != id);
    }
    drop(state);
    yield_now();
}

/// Finish the `Zombie` → `Dead` transition for `id` if it is in fact a
/// zombie: mark it `Dead`, then drop its control block out of the task
/// table, which runs `Drop for Task` and releases its kernel stack (and,
/// for a user task, its whole address space). Only ever called from
/// `on_timer` after switching away from `id`, never while it might still
/// be the running task.
fn reap_if_zombie(id: TaskId) {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let mut state = STATE.lock();
    let Some(task) = state.get(id) else {
        return;
    };
    if task.state() != TaskState::Zombie {
        return;
    }
    task.set_state(TaskState::Dead);
    state.ready.retain(|&t| t != id);
    state.sleeping.retain(|&t| t != id);
    if state.current == Some(id) {
        state.current = None;
    }
    if let Some(slot) = state.slot_of(id) {
        state.tasks[slot] = None;
    }
}

/// Self-deliver the timer vector to force an immediate reschedule.
pub fn yield_now() {
    // SAFETY: int 32 is the timer vector's own gate; triggering it
    // software-side runs exactly the handler a real tick would run.
    unsafe {
        core::arch::asm!("int 32", options(nomem, nostack));
    }
}

/// Move the current task to `Blocked` and force a reschedule. The caller is
/// responsible for arranging an `unblock` later; there is no timeout here.
pub fn block_current() {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let state = STATE.lock();
    if let Some(id) = state.current {
        if let Some(task) = state.get(id) {
            task.set_state(TaskState::Blocked);
        }
    }
    drop(state);
    yield_now();
}

/// Move `id` from `Blocked` back to `Ready`.
pub fn unblock(id: TaskId) {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let mut state = STATE.lock();
    if let Some(task) = state.get(id) {
        if task.state() == TaskState::Blocked {
            task.set_state(TaskState::Ready);
            state.ready.push_back(id);
        }
    }
}

/// Put the current task to sleep until `tick_count() + ticks`.
pub fn sleep_current(ticks: u64) {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let mut state = STATE.lock();
    if let Some(id) = state.current {
        if let Some(task) = state.get(id) {
            let wake_at = crate::arch::x86_64::timer::tick_count() + ticks;
            task.wake_at_tick.store(wake_at, Ordering::Relaxed);
            task.set_state(TaskState::Sleeping);
            state.sleeping.push_back(id);
        }
    }
    drop(state);
    yield_now();
}

pub fn current_id() -> Option<TaskId> {
    let _guard = crate::arch::x86_64::disable_interrupts();
    STATE.lock().current
}

pub struct SchedulerStats {
    pub total_switches: u64,
    pub ready_count: usize,
    pub sleeping_count: usize,
}

pub fn stats() -> SchedulerStats {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let state = STATE.lock();
    SchedulerStats {
        total_switches: TOTAL_SWITCHES.load(Ordering::Relaxed),
        ready_count: state.ready.len(),
        sleeping_count: state.sleeping.len(),
    }
}

/// Run a closure with a reference to a task by id. Keeps task internals
/// private to this module for callers in `syscall`/`fs`.
pub fn with_task<R>(id: TaskId, f: impl FnOnce(&Task) -> R) -> Option<R> {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let state = STATE.lock();
    state.get(id).map(f)
}

pub fn for_each_task(mut f: impl FnMut(&Task)) {
    let _guard = crate::arch::x86_64::disable_interrupts();
    let state = STATE.lock();
    for task in state.tasks.iter().flatten() {
        f(task);
    }
}
