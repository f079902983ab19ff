//! Scheduling: the task model (C8) and the round-robin scheduler (C9).

pub mod scheduler;
pub mod task;

pub use scheduler::{SchedAlgorithm, SchedulerStats};
pub use task::{Priority, Task, TaskId, TaskState};

pub fn init() {
    scheduler::init(SchedAlgorithm::RoundRobin);
}
