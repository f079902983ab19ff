//! No-std test framework for the kernel.
//!
//! Provides testing infrastructure that works in a no_std environment by
//! using serial output and QEMU exit codes to report test results.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;
use core::panic::PanicInfo;

use crate::{error::KernelError, serial_print, serial_println};

#[cfg(feature = "qemu-exit")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Trait that all testable functions must implement
pub trait Testable {
    fn run(&self) -> Result<(), KernelError>;
}

impl<T> Testable for T
where
    T: Fn() -> Result<(), KernelError>,
{
    fn run(&self) -> Result<(), KernelError> {
        serial_print!("{}...\t", core::any::type_name::<T>());
        match self() {
            Ok(()) => {
                serial_println!("[ok]");
                Ok(())
            }
            Err(e) => {
                serial_println!("[failed]: {}", e);
                Err(e)
            }
        }
    }
}

/// Custom test runner for kernel tests
#[cfg(test)]
pub fn test_runner(tests: &[&dyn Testable]) -> ! {
    serial_println!("Running {} tests", tests.len());
    let mut passed = 0;
    let mut failed = 0;

    for test in tests {
        match test.run() {
            Ok(()) => passed += 1,
            Err(e) => {
                failed += 1;
                serial_println!("[ERROR] Test failed: {}", e);
            }
        }
    }

    serial_println!("\nTest Results: {} passed, {} failed", passed, failed);

    #[cfg(feature = "qemu-exit")]
    if failed == 0 {
        exit_qemu(QemuExitCode::Success);
    } else {
        exit_qemu(QemuExitCode::Failed);
    }

    #[cfg(not(feature = "qemu-exit"))]
    loop {
        core::hint::spin_loop();
    }
}

/// Panic handler for test mode
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);

    #[cfg(feature = "qemu-exit")]
    exit_qemu(QemuExitCode::Failed);

    #[cfg(not(feature = "qemu-exit"))]
    loop {
        core::hint::spin_loop();
    }
}

/// Exit QEMU with a specific exit code. Only compiled in when `qemu-exit` is
/// enabled (the default, for the benefit of `cargo test`); a `nova-kernel`
/// binary built with `--no-default-features` never links this port write.
#[cfg(feature = "qemu-exit")]
pub fn exit_qemu(_exit_code: QemuExitCode) -> ! {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: writing to I/O port 0xf4 is the QEMU debug-exit device; it
    // terminates the VM before the instruction after the port write runs.
    unsafe {
        use x86_64::instructions::port::Port;
        let mut port = Port::new(0xf4);
        port.write(_exit_code as u32);
        core::hint::unreachable_unchecked();
    }

    #[cfg(not(target_arch = "x86_64"))]
    loop {
        core::hint::spin_loop();
    }
}

/// Macro to define kernel tests
#[macro_export]
macro_rules! kernel_test {
    ($name:ident, $test:expr) => {
        #[test_case]
        const $name: &dyn $crate::test_framework::Testable =
            &|| -> Result<(), $crate::error::KernelError> { $test };
    };
}

/// Helper macro for creating test modules
#[macro_export]
macro_rules! test_module {
    ($name:ident, $($test_name:ident => $test_fn:expr),* $(,)?) => {
        #[cfg(test)]
        mod $name {
            use super::*;

            $(
                kernel_test!($test_name, $test_fn);
            )*
        }
    };
}

/// Assertion macros for kernel tests
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr) => {
        if !$cond {
            serial_println!("Assertion failed: {}", stringify!($cond));
            panic!("Assertion failed");
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            serial_println!($($arg)*);
            panic!("Assertion failed");
        }
    };
}

#[macro_export]
macro_rules! kernel_assert_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            serial_println!(
                "Assertion failed: {} != {}\n  left: {:?}\n right: {:?}",
                stringify!($left),
                stringify!($right),
                $left,
                $right
            );
            panic!("Assertion failed: not equal");
        }
    };
}

#[macro_export]
macro_rules! kernel_assert_ne {
    ($left:expr, $right:expr) => {
        if $left == $right {
            serial_println!(
                "Assertion failed: {} == {}\n  left: {:?}\n right: {:?}",
                stringify!($left),
                stringify!($right),
                $left,
                $right
            );
            panic!("Assertion failed: equal");
        }
    };
}

// ===== Test Registry =====

/// Test registry for collecting and running kernel tests.
///
/// Used by the `testing` feature when test binaries register their tests
/// via the `register_test!` macro.
#[cfg(feature = "alloc")]
#[allow(dead_code)]
pub struct TestRegistry {
    tests: Vec<(&'static str, fn())>,
}

#[cfg(feature = "alloc")]
#[allow(dead_code)]
impl TestRegistry {
    pub const fn new() -> Self {
        Self { tests: Vec::new() }
    }

    pub fn register_test(&mut self, name: &'static str, test: fn()) {
        self.tests.push((name, test));
    }

    pub fn run_all(&self) -> (usize, usize) {
        let mut passed = 0;
        let failed = 0;

        serial_println!("Running {} tests", self.tests.len());
        for (name, test) in &self.tests {
            serial_print!("{}...\t", name);
            test();
            serial_println!("[ok]");
            passed += 1;
        }

        (passed, failed)
    }
}

#[cfg(feature = "alloc")]
#[allow(dead_code)]
static TEST_REGISTRY: spin::Mutex<Option<TestRegistry>> = spin::Mutex::new(None);

/// Initialize the test registry. Called once before tests run.
#[cfg(feature = "alloc")]
#[allow(dead_code)]
pub fn init_test_registry() {
    *TEST_REGISTRY.lock() = Some(TestRegistry::new());
}

/// Execute a closure with the test registry (mutable access)
#[cfg(feature = "alloc")]
#[allow(dead_code)]
pub fn with_test_registry<R, F: FnOnce(&mut TestRegistry) -> R>(f: F) -> Option<R> {
    TEST_REGISTRY.lock().as_mut().map(f)
}

#[cfg(feature = "alloc")]
#[macro_export]
macro_rules! register_test {
    ($name:ident) => {
        #[allow(non_snake_case)]
        #[used]
        #[link_section = ".test_registry"]
        static $name: fn() = || {
            $crate::test_framework::with_test_registry(|registry| {
                registry.register_test(stringify!($name), $name);
            });
        };
    };
}
