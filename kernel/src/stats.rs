//! Consolidated diagnostic rollup (C15 supplement).
//!
//! Every subsystem already exposes its own `stats()` — frame allocator,
//! heap, scheduler. `dump()` pulls them together into one
//! `log::error!`-logged block instead of the panic path having to reach
//! into three modules individually, the way the teacher's bring-up banner
//! already consolidates several subsystems' one-line `println!`s into a
//! single pass.

use crate::mm::{frame_allocator, heap};
use crate::sched::scheduler;

#[derive(Debug, Clone, Copy)]
pub struct KernelStats {
    pub frames_used: usize,
    pub frames_free: usize,
    pub heap_used: usize,
    pub heap_free: usize,
    pub ready_tasks: usize,
    pub sleeping_tasks: usize,
    pub total_switches: u64,
}

pub fn collect() -> KernelStats {
    let frames = frame_allocator::stats();
    let heap = heap::stats();
    let sched = scheduler::stats();
    KernelStats {
        frames_used: frames.used,
        frames_free: frames.free,
        heap_used: heap.used,
        heap_free: heap.free,
        ready_tasks: sched.ready_count,
        sleeping_tasks: sched.sleeping_count,
        total_switches: sched.total_switches,
    }
}

/// Log a one-shot snapshot of every subsystem's stats. Called from the
/// panic path (where allocation-free, best-effort output is the priority,
/// not precision) and reachable from a debug syscall path for the same
/// reason without duplicating the collection logic.
pub fn dump() {
    let s = collect();
    log::error!(
        "kernel stats: frames used={} free={}, heap used={} free={}, tasks ready={} sleeping={}, switches={}",
        s.frames_used,
        s.frames_free,
        s.heap_used,
        s.heap_free,
        s.ready_tasks,
        s.sleeping_tasks,
        s.total_switches,
    );
}
