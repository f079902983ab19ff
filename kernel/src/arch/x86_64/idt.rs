//! IDT installation (C6).
//!
//! Builds all 256 gate descriptors from the raw stub addresses in
//! [`super::trap`] rather than the `x86_64` crate's `extern "x86-interrupt"`
//! handler type: those stubs capture the full register file themselves, so
//! every gate here is installed via `set_handler_addr` against a bare
//! function pointer. Vector 0x80 is the one gate with DPL 3, letting
//! `int 0x80` reach the kernel from ring 3; every other gate stays DPL 0 so
//! only the CPU itself (or another gate) can invoke it.

use lazy_static::lazy_static;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::{PrivilegeLevel, VirtAddr};

use super::gdt::DOUBLE_FAULT_IST_INDEX;
use super::trap::{STUB_ADDRESSES, SYSCALL_VECTOR};

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        for vector in 0..256usize {
            let addr = VirtAddr::new(STUB_ADDRESSES[vector]);
            // SAFETY: each address names a real, `'static`-lived stub
            // defined in `trap.rs`; none of them ever return to the
            // caller's return address (they `iretq` instead), which is
            // exactly what this API contract requires.
            let options = unsafe { idt[vector].set_handler_addr(addr) };
            if vector == SYSCALL_VECTOR as usize {
                options.set_privilege_level(PrivilegeLevel::Ring3);
            }
            if vector == 8 {
                // SAFETY: DOUBLE_FAULT_IST_INDEX names a TSS IST slot set
                // up in gdt.rs with a dedicated stack.
                unsafe {
                    options.set_stack_index(DOUBLE_FAULT_IST_INDEX);
                }
            }
        }
        idt
    };
}

pub fn init() {
    IDT.load();
}
