//! Kernel library: the no_std crate root shared by the bare-metal binary
//! and the host-target unit test harness.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// Custom test runner only for bare-metal; host target uses standard #[test] harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

extern crate alloc;

// On bare-metal targets the kernel's own hand-rolled heap backs the global
// allocator (see mm::heap). On host, for cargo test, delegate to the system
// allocator so test code using Vec/Box compiles and runs normally.
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: mm::heap::KernelHeap = mm::heap::KernelHeap;

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod logger;
pub mod mm;
pub mod sched;
pub mod serial;
pub mod stats;
pub mod syscall;

mod test_framework;

// Re-export for the integration test binaries under tests/.
pub use error::{KernelError, KernelResult};
pub use sched::{Priority, Task, TaskState};
#[cfg(test)]
pub use test_framework::test_runner;
pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}
