//! Global Descriptor Table and Task State Segment (C5).
//!
//! Publishes five segment descriptors plus a privilege-0-stack (TSS)
//! descriptor at the exact selector layout the rest of the kernel binds
//! against: null (0x00), kernel code (0x08), kernel data (0x10), user code
//! (0x1B, RPL 3), user data (0x23, RPL 3), TSS (0x28, two GDT slots). This
//! layout is a contract: the IDT's syscall gate, the scheduler's saved trap
//! frame, and user-task construction all assume these exact values.

use lazy_static::lazy_static;
use x86_64::{
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();

        // Default RSP0; overwritten per-task by set_kernel_stack_for_traps
        // before the first trip to ring 3.
        tss.privilege_stack_table[0] = {
            const STACK_SIZE: usize = 4096 * 5;
            #[repr(align(16))]
            struct AlignedStack([u8; STACK_SIZE]);
            static mut KERNEL_STACK: AlignedStack = AlignedStack([0; STACK_SIZE]);

            let stack_ptr = &raw const KERNEL_STACK;
            let stack_start = VirtAddr::from_ptr(stack_ptr);
            stack_start + STACK_SIZE as u64
        };

        // Double-fault handler runs on its own stack so a stack-overflow
        // double fault doesn't re-fault on the same broken stack.
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            const STACK_SIZE: usize = 4096 * 5;
            #[repr(align(16))]
            struct AlignedStack([u8; STACK_SIZE]);
            static mut STACK: AlignedStack = AlignedStack([0; STACK_SIZE]);

            let stack_ptr = &raw const STACK;
            let stack_start = VirtAddr::from_ptr(stack_ptr);
            stack_start + STACK_SIZE as u64
        };
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.append(Descriptor::kernel_code_segment()); // 0x08
        let kernel_data = gdt.append(Descriptor::kernel_data_segment()); // 0x10
        let user_code = gdt.append(Descriptor::user_code_segment()); // 0x18 -> 0x1B w/ RPL 3
        let user_data = gdt.append(Descriptor::user_data_segment()); // 0x20 -> 0x23 w/ RPL 3
        let tss = gdt.append(Descriptor::tss_segment(&TSS)); // 0x28 (2 entries)
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_code,
                user_data,
                tss,
            },
        )
    };
}

/// GDT segment selectors, in the binding layout documented on the module.
pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub user_data: SegmentSelector,
    pub tss: SegmentSelector,
}

pub fn init() {
    use x86_64::instructions::{
        segmentation::{Segment, CS, DS},
        tables::load_tss,
    };

    GDT.0.load();
    // SAFETY: the GDT was just loaded above, and the selectors in GDT.1 were
    // computed from that same table, so each references a valid descriptor.
    unsafe {
        CS::set_reg(GDT.1.kernel_code);
        DS::set_reg(GDT.1.kernel_data);
        load_tss(GDT.1.tss);
    }
}

/// Returns the selectors published by `init()`.
pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Set the stack pointer the CPU loads into RSP on any trap from ring 3
/// (`set_kernel_stack_for_traps` in the component design).
///
/// # Safety
/// Must only be called with interrupts disabled: it is called by the
/// scheduler right before switching to a user task, and a trap arriving
/// mid-update would observe a torn RSP0.
pub fn set_kernel_stack_for_traps(stack_top: u64) {
    // SAFETY: single CPU, called with interrupts masked by the caller
    // (see scheduler::switch_to); no concurrent writer can observe a torn
    // update.
    unsafe {
        let tss_ptr = &*TSS as *const TaskStateSegment as *mut TaskStateSegment;
        (*tss_ptr).privilege_stack_table[0] = VirtAddr::new(stack_top);
    }
}

pub fn kernel_stack_for_traps() -> u64 {
    TSS.privilege_stack_table[0].as_u64()
}
