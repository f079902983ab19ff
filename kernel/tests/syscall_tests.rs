//! Syscall dispatch integration tests: drive `syscall::dispatch` directly
//! with a hand-built trap frame, the same way the `int 0x80` gate would
//! after decoding its arguments into registers.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use nova_kernel::arch::x86_64::trap::TrapFrame;
use nova_kernel::sched::scheduler;
use nova_kernel::syscall;
use nova_kernel::{exit_qemu, serial_println, test_panic_handler, Priority, QemuExitCode, Task};

#[path = "common/mod.rs"]
mod common;

const SYS_GETPID: u64 = 5;
const SYS_YIELD: u64 = 7;
const SYS_UPTIME_MS: u64 = 13;
const SYS_PUTCHAR: u64 = 15;
const UNKNOWN_SYSCALL: u64 = 255;
const ERR: u64 = u64::MAX;

fn call(number: u64, a0: u64, a1: u64, a2: u64) -> u64 {
    let mut frame = TrapFrame { rax: number, rdi: a0, rsi: a1, rdx: a2, ..Default::default() };
    syscall::dispatch(&mut frame);
    frame.rax
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Syscall");

    // `getpid`/`exit` read the scheduler's notion of "current task", which
    // is only ever set by a switch. Drive one tick of `on_timer` by hand
    // (rather than a real interrupt) to elect the lone ready task current.
    scheduler::start();
    let id = scheduler::add(Task::new_kernel(0, "syscall_test", Priority::Normal).unwrap()).unwrap();
    let mut boot_frame = TrapFrame::default();
    scheduler::on_timer(&mut boot_frame);
    assert_eq!(scheduler::current_id(), Some(id));

    test_unknown_syscall_returns_err();
    test_getpid_returns_current_task();
    test_uptime_ms_is_nonnegative();
    test_putchar_accepts_any_byte();
    test_yield_returns_without_switching();

    scheduler::remove(id);
    serial_println!("All syscall tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_unknown_syscall_returns_err() {
    assert_eq!(call(UNKNOWN_SYSCALL, 0, 0, 0), ERR);
    serial_println!("test_unknown_syscall_returns_err...[ok]");
}

fn test_getpid_returns_current_task() {
    let pid = call(SYS_GETPID, 0, 0, 0);
    assert_eq!(pid, scheduler::current_id().unwrap());
    serial_println!("test_getpid_returns_current_task...[ok]");
}

fn test_uptime_ms_is_nonnegative() {
    let uptime = call(SYS_UPTIME_MS, 0, 0, 0);
    assert!(uptime < ERR);
    serial_println!("test_uptime_ms_is_nonnegative...[ok]");
}

fn test_putchar_accepts_any_byte() {
    assert_eq!(call(SYS_PUTCHAR, b'x' as u64, 0, 0), 0);
    serial_println!("test_putchar_accepts_any_byte...[ok]");
}

/// Only one ready task exists, so `yield`'s self-delivered timer vector
/// finds nothing else to switch to; this confirms the syscall path itself
/// returns cleanly rather than getting stuck in the reschedule.
fn test_yield_returns_without_switching() {
    assert_eq!(call(SYS_YIELD, 0, 0, 0), 0);
    assert_eq!(scheduler::current_id(), Some(scheduler::current_id().unwrap()));
    serial_println!("test_yield_returns_without_switching...[ok]");
}
