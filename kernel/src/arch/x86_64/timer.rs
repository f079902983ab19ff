//! Timer driver (C7, part two).
//!
//! Programs PIT channel 0 for a periodic rate, registers its vector-32
//! handler through the C6 handler table, and exposes the monotonic tick
//! counter the scheduler's quantum and `sleep_ms` both read.

use core::sync::atomic::{AtomicU64, Ordering};

use super::trap::{TrapFrame, TIMER_VECTOR};

const PIT_FREQUENCY_HZ: u32 = 1_193_182;

/// Reference tick rate `bootstrap` programs the PIT to; the scheduler's
/// quantum and `sleep_ms` accounting both assume this unless `timer_init`
/// is called with a different rate.
pub const TIMER_HZ: u32 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);
static TICK_MS: AtomicU64 = AtomicU64::new(10);

/// Monotonic tick count since `timer_init`.
pub fn tick_count() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds elapsed since `timer_init`, per the configured tick period.
pub fn uptime_ms() -> u64 {
    tick_count() * TICK_MS.load(Ordering::Relaxed)
}

/// Length of one tick in milliseconds, for converting a sleep duration to
/// a tick count without busy-waiting (see `sched::scheduler::sleep_current`).
pub fn tick_ms() -> u64 {
    TICK_MS.load(Ordering::Relaxed).max(1)
}

/// Busy-halt (via `hlt`, so the CPU isn't spinning hot) until at least
/// `ms` milliseconds have elapsed.
pub fn sleep_ms(ms: u64) {
    let period = TICK_MS.load(Ordering::Relaxed).max(1);
    let ticks_needed = ms.div_ceil(period);
    let target = tick_count() + ticks_needed;
    while tick_count() < target {
        super::port::hlt();
    }
}

/// Program PIT channel 0 for `frequency_hz` and register the tick handler
/// on vector 32. Does not unmask IRQ0 itself; callers enable interrupts
/// once bring-up has progressed far enough to take them.
pub fn timer_init(frequency_hz: u32) {
    let divisor = PIT_FREQUENCY_HZ / frequency_hz;
    TICK_MS.store((1000 / frequency_hz) as u64, Ordering::Relaxed);

    // SAFETY: ports 0x43/0x40 are the PIT command and channel-0 data
    // ports; this is the documented rate-generator programming sequence.
    unsafe {
        super::port::outb(0x43, 0x36);
        super::port::outb(0x40, (divisor & 0xFF) as u8);
        super::port::outb(0x40, (divisor >> 8) as u8);
    }

    super::trap::register_handler(TIMER_VECTOR as u8, timer_handler);
    super::pic::unmask_irq(0);
    log::info!("PIT programmed for {frequency_hz}Hz ({}ms/tick)", 1000 / frequency_hz);
}

fn timer_handler(frame: &mut TrapFrame) {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::scheduler::on_timer(frame);
    super::pic::end_of_interrupt(TIMER_VECTOR as u8);
}
