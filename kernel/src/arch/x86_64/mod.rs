//! x86_64 architecture support.
//!
//! Provides hardware initialization (GDT, IDT, PIC), interrupt control,
//! serial I/O (COM1 at 0x3F8), VGA text output, and I/O port primitives
//! for the x86_64 platform.

#![allow(clippy::missing_safety_doc)]

pub mod gdt;
pub mod idt;
pub mod pic;
pub mod port;
pub mod serial;
pub mod timer;
pub mod trap;
pub mod vga;

/// Bring-up order for the x86_64 side of C1-C7: GDT/TSS before IDT (gates
/// reference the kernel code selector), IDT before PIC (the PIC's first
/// unmask happens once a handler is already registered), MMU last since it
/// depends on nothing here but everything above depends on interrupts
/// staying masked until it completes.
pub fn init() {
    // SAFETY: masks interrupts for the remainder of bring-up; nothing here
    // depends on memory state.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }

    gdt::init();
    log::info!("GDT/TSS installed");

    idt::init();
    log::info!("IDT installed (256 vectors)");

    pic::init();
    log::info!("PIC remapped to 32/40, all lines masked");
}

/// Halt the CPU forever with interrupts masked. Used by panic/shutdown paths.
pub fn halt() -> ! {
    port::halt_loop()
}

/// Enable hardware interrupts. Will be used once interrupt handlers are fully
/// configured.
#[allow(dead_code)]
pub fn enable_interrupts() {
    x86_64::instructions::interrupts::enable();
}

pub fn disable_interrupts() -> impl Drop {
    struct InterruptGuard {
        was_enabled: bool,
    }

    impl Drop for InterruptGuard {
        fn drop(&mut self) {
            if self.was_enabled {
                x86_64::instructions::interrupts::enable();
            }
        }
    }

    let was_enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    InterruptGuard { was_enabled }
}

pub fn idle() {
    x86_64::instructions::hlt();
}

/// Speculation barrier to mitigate Spectre-style attacks.
/// Uses LFENCE which serializes instruction execution on Intel/AMD.
#[inline(always)]
pub fn speculation_barrier() {
    // SAFETY: lfence is a serializing instruction that prevents speculative
    // execution of subsequent instructions until all prior instructions
    // complete. No side effects beyond pipeline serialization.
    unsafe {
        core::arch::asm!("lfence", options(nostack, nomem, preserves_flags));
    }
}

pub fn serial_init() -> uart_16550::SerialPort {
    // SAFETY: SerialPort::new(0x3F8) creates a serial port handle for COM1
    // at the standard I/O base address. The address is well-known and the
    // port is initialized immediately after construction.
    let mut serial_port = unsafe { uart_16550::SerialPort::new(0x3F8) };
    serial_port.init();
    serial_port
}

/// Kernel heap start address.
pub const HEAP_START: usize = 0x_4444_4444_0000;
