//! Interrupt controller driver (C7, part one).
//!
//! Wraps the legacy 8259 PIC pair via the `pic8259` crate for remap/EOI, and
//! adds the per-line mask/unmask operations the design calls for (the crate
//! itself only exposes initialize + EOI). Remaps IRQ0-15 to vectors 32-47 so
//! they land outside the CPU exception range.
use spin::Mutex;

pub const PIC1_OFFSET: u8 = 32;
pub const PIC2_OFFSET: u8 = 40;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

static PICS: Mutex<pic8259::ChainedPics> =
    Mutex::new(unsafe { pic8259::ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

/// Remap both PICs and mask every line; callers unmask individually as they
/// install handlers (see `timer::init`).
pub fn init() {
    // SAFETY: called once during bring-up with interrupts disabled, offsets
    // chosen to avoid the CPU exception range.
    unsafe {
        PICS.lock().initialize();
    }
    for line in 0..16 {
        mask_irq(line);
    }
}

/// Acknowledge the interrupt for `vector`, which must be in 32..=47.
pub fn end_of_interrupt(vector: u8) {
    // SAFETY: vector is a real in-service PIC vector; notify_end_of_interrupt
    // figures out master vs. slave from the value itself.
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}

/// Mask (disable) IRQ line `irq` (0-15).
pub fn mask_irq(irq: u8) {
    set_mask_bit(irq, true);
}

/// Unmask (enable) IRQ line `irq` (0-15).
pub fn unmask_irq(irq: u8) {
    set_mask_bit(irq, false);
}

fn set_mask_bit(irq: u8, masked: bool) {
    let (port, bit) = if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    };
    // SAFETY: port is one of the two PIC data ports, read-modify-write of
    // a single mask bit with interrupts already disabled by the caller's
    // init-time context or by the per-call critical section in practice.
    unsafe {
        let current = super::port::inb(port);
        let updated = if masked {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        super::port::outb(port, updated);
    }
}
