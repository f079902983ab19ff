//! Common test utilities shared by the in-kernel integration tests.
//!
//! Brings up just enough of the kernel for a test binary to create tasks,
//! touch the heap, and mount a filesystem — the same subset `bootstrap`
//! uses, minus the driver probe and the idle loop.

use nova_kernel::{arch, logger, mm, sched, serial_println};

pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} Test Suite ===", subsystem);
    logger::init();
    arch::init();
    mm::init();
    sched::init();
}
