//! Vector table and trap entry (C6).
//!
//! Every one of the 256 IDT vectors enters through its own tiny naked stub
//! (grounded on the stub-array pattern in hadron's
//! `arch/x86_64/interrupts/timer_stub.rs`), which normalizes the presence of
//! a hardware error code and falls through to a single `common_trap_entry`.
//! That entry saves every general-purpose register plus the flat data
//! segment selector, builds a `TrapFrame` on the kernel stack, and calls into
//! `dispatch_trap`. Exceptions 0-31 get a name table for diagnostics; vector
//! 0x80 is the syscall gate; anything else goes through the C6
//! `register_handler`/`unregister_handler` table installed by C7 (timer,
//! PIC) or logged and dropped.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Full register snapshot captured on every trap, in the layout the
/// assembly in this file actually pushes. Field order is memory order
/// ascending from the stack pointer at entry to `dispatch_trap`, not a
/// semantically meaningful grouping.
///
/// `ds` stands in for ds/es/fs/gs collectively: this kernel never varies
/// them across tasks (no per-task TLS base), so one flat selector is all
/// the the design needs saved and restored across a trap.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrapFrame {
    pub ds: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// True if this trap was taken from ring 3 (CS RPL bits set).
    pub fn from_userspace(&self) -> bool {
        self.cs & 0x3 != 0
    }
}

pub const SYSCALL_VECTOR: u64 = 0x80;
pub const TIMER_VECTOR: u64 = 32;

const EXCEPTION_NAMES: [&str; 32] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating point",
    "alignment check",
    "machine check",
    "SIMD floating point",
    "virtualization",
    "control protection",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "hypervisor injection",
    "VMM communication",
    "security",
    "reserved",
];

/// `register_handler`/`unregister_handler`: a per-vector callback table
/// distinct from the syscall dispatch table in `crate::syscall`. Stored as
/// `AtomicUsize` function-pointer bits so installing a handler needs no
/// lock; only ever written with interrupts disabled, but reads can race a
/// handler being installed, which is harmless (worst case: one dropped
/// interrupt during bring-up).
type VectorHandler = fn(&mut TrapFrame);
static HANDLERS: [AtomicUsize; 256] = {
    const ZERO: AtomicUsize = AtomicUsize::new(0);
    [ZERO; 256]
};

/// Install a handler for `vector`. Overwrites any previous registration.
pub fn register_handler(vector: u8, handler: VectorHandler) {
    HANDLERS[vector as usize].store(handler as usize, Ordering::Release);
}

/// Remove whatever handler is installed for `vector`, if any.
pub fn unregister_handler(vector: u8) {
    HANDLERS[vector as usize].store(0, Ordering::Release);
}

fn handler_for(vector: u8) -> Option<VectorHandler> {
    let bits = HANDLERS[vector as usize].load(Ordering::Acquire);
    if bits == 0 {
        return None;
    }
    // SAFETY: the only values ever stored are function pointers of type
    // `VectorHandler`, written by `register_handler`.
    Some(unsafe { core::mem::transmute::<usize, VectorHandler>(bits) })
}

/// Decode a page-fault error code into the three flags the design calls
/// out explicitly: present-violation vs. not-present, write vs. read, and
/// user vs. kernel mode.
pub struct PageFaultCause {
    pub present_violation: bool,
    pub write: bool,
    pub user_mode: bool,
}

fn decode_page_fault(error_code: u64) -> PageFaultCause {
    PageFaultCause {
        present_violation: error_code & 0x1 != 0,
        write: error_code & 0x2 != 0,
        user_mode: error_code & 0x4 != 0,
    }
}

/// Entered from `common_trap_entry` with `rdi` pointing at the `TrapFrame`
/// just assembled on the stack. Never called directly.
#[no_mangle]
extern "C" fn dispatch_trap(frame: &mut TrapFrame) {
    let vector = frame.vector as u8;

    if frame.vector == SYSCALL_VECTOR {
        crate::syscall::dispatch(frame);
        return;
    }

    if let Some(handler) = handler_for(vector) {
        handler(frame);
        return;
    }

    if frame.vector < 32 {
        report_exception(frame);
        return;
    }

    log::warn!("unhandled trap vector {vector} (no handler registered)");
}

fn report_exception(frame: &TrapFrame) {
    let name = EXCEPTION_NAMES[frame.vector as usize];

    if frame.vector == 14 {
        let cr2: u64;
        // SAFETY: CR2 is only read, never written; reading it has no
        // architectural side effect.
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nostack, preserves_flags));
        }
        let cause = decode_page_fault(frame.error_code);
        log::error!(
            "page fault at {cr2:#x} (rip={:#x}, {} {}, {}): halting",
            frame.rip,
            if cause.present_violation {
                "protection violation"
            } else {
                "not present"
            },
            if cause.write { "write" } else { "read" },
            if cause.user_mode { "user" } else { "kernel" },
        );
    } else {
        log::error!(
            "unhandled exception {} ({name}) at rip={:#x}, error_code={:#x}: halting",
            frame.vector,
            frame.rip,
            frame.error_code,
        );
    }

    super::port::halt_loop();
}

/// Addresses of the 256 per-vector stubs, installed into the IDT gate
/// descriptors by `idt::init`. Every vector gets its own tiny stub because
/// the CPU never tells a shared handler which vector fired; that is the one
/// piece of information each stub exists to hardcode.
pub static STUB_ADDRESSES: [u64; 256] = stub_addresses();

const fn stub_addresses() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = STUBS[i] as u64;
        i += 1;
    }
    table
}

macro_rules! make_stub {
    ($vec:expr) => {{
        #[unsafe(naked)]
        unsafe extern "C" fn stub() {
            core::arch::naked_asm!("push 0", "push {v}", "jmp {entry}", v = const $vec, entry = sym common_trap_entry)
        }
        stub as unsafe extern "C" fn()
    }};
}

macro_rules! make_stub_err {
    ($vec:expr) => {{
        #[unsafe(naked)]
        unsafe extern "C" fn stub() {
            core::arch::naked_asm!("push {v}", "jmp {entry}", v = const $vec, entry = sym common_trap_entry)
        }
        stub as unsafe extern "C" fn()
    }};
}

static STUBS: [unsafe extern "C" fn(); 256] = [
    // Vectors 0-15
    make_stub!(0),
    make_stub!(1),
    make_stub!(2),
    make_stub!(3),
    make_stub!(4),
    make_stub!(5),
    make_stub!(6),
    make_stub!(7),
    make_stub_err!(8),
    make_stub!(9),
    make_stub_err!(10),
    make_stub_err!(11),
    make_stub_err!(12),
    make_stub_err!(13),
    make_stub_err!(14),
    make_stub!(15),
    // Vectors 16-31
    make_stub!(16),
    make_stub_err!(17),
    make_stub!(18),
    make_stub!(19),
    make_stub!(20),
    make_stub!(21),
    make_stub!(22),
    make_stub!(23),
    make_stub!(24),
    make_stub!(25),
    make_stub!(26),
    make_stub!(27),
    make_stub!(28),
    make_stub!(29),
    make_stub!(30),
    make_stub!(31),
    // Vectors 32-47 (PIC IRQ range)
    make_stub!(32),
    make_stub!(33),
    make_stub!(34),
    make_stub!(35),
    make_stub!(36),
    make_stub!(37),
    make_stub!(38),
    make_stub!(39),
    make_stub!(40),
    make_stub!(41),
    make_stub!(42),
    make_stub!(43),
    make_stub!(44),
    make_stub!(45),
    make_stub!(46),
    make_stub!(47),
    // Vectors 48-63
    make_stub!(48),
    make_stub!(49),
    make_stub!(50),
    make_stub!(51),
    make_stub!(52),
    make_stub!(53),
    make_stub!(54),
    make_stub!(55),
    make_stub!(56),
    make_stub!(57),
    make_stub!(58),
    make_stub!(59),
    make_stub!(60),
    make_stub!(61),
    make_stub!(62),
    make_stub!(63),
    // Vectors 64-79
    make_stub!(64),
    make_stub!(65),
    make_stub!(66),
    make_stub!(67),
    make_stub!(68),
    make_stub!(69),
    make_stub!(70),
    make_stub!(71),
    make_stub!(72),
    make_stub!(73),
    make_stub!(74),
    make_stub!(75),
    make_stub!(76),
    make_stub!(77),
    make_stub!(78),
    make_stub!(79),
    // Vectors 80-95
    make_stub!(80),
    make_stub!(81),
    make_stub!(82),
    make_stub!(83),
    make_stub!(84),
    make_stub!(85),
    make_stub!(86),
    make_stub!(87),
    make_stub!(88),
    make_stub!(89),
    make_stub!(90),
    make_stub!(91),
    make_stub!(92),
    make_stub!(93),
    make_stub!(94),
    make_stub!(95),
    // Vectors 96-111
    make_stub!(96),
    make_stub!(97),
    make_stub!(98),
    make_stub!(99),
    make_stub!(100),
    make_stub!(101),
    make_stub!(102),
    make_stub!(103),
    make_stub!(104),
    make_stub!(105),
    make_stub!(106),
    make_stub!(107),
    make_stub!(108),
    make_stub!(109),
    make_stub!(110),
    make_stub!(111),
    // Vectors 112-127
    make_stub!(112),
    make_stub!(113),
    make_stub!(114),
    make_stub!(115),
    make_stub!(116),
    make_stub!(117),
    make_stub!(118),
    make_stub!(119),
    make_stub!(120),
    make_stub!(121),
    make_stub!(122),
    make_stub!(123),
    make_stub!(124),
    make_stub!(125),
    make_stub!(126),
    make_stub!(127),
    // Vector 128 is the syscall gate (int 0x80, DPL 3); vectors 129-255
    // are otherwise unused and fall through to the "log and drop" default.
    make_stub!(128),
    make_stub!(129),
    make_stub!(130),
    make_stub!(131),
    make_stub!(132),
    make_stub!(133),
    make_stub!(134),
    make_stub!(135),
    make_stub!(136),
    make_stub!(137),
    make_stub!(138),
    make_stub!(139),
    make_stub!(140),
    make_stub!(141),
    make_stub!(142),
    make_stub!(143),
    make_stub!(144),
    make_stub!(145),
    make_stub!(146),
    make_stub!(147),
    make_stub!(148),
    make_stub!(149),
    make_stub!(150),
    make_stub!(151),
    make_stub!(152),
    make_stub!(153),
    make_stub!(154),
    make_stub!(155),
    make_stub!(156),
    make_stub!(157),
    make_stub!(158),
    make_stub!(159),
    make_stub!(160),
    make_stub!(161),
    make_stub!(162),
    make_stub!(163),
    make_stub!(164),
    make_stub!(165),
    make_stub!(166),
    make_stub!(167),
    make_stub!(168),
    make_stub!(169),
    make_stub!(170),
    make_stub!(171),
    make_stub!(172),
    make_stub!(173),
    make_stub!(174),
    make_stub!(175),
    make_stub!(176),
    make_stub!(177),
    make_stub!(178),
    make_stub!(179),
    make_stub!(180),
    make_stub!(181),
    make_stub!(182),
    make_stub!(183),
    make_stub!(184),
    make_stub!(185),
    make_stub!(186),
    make_stub!(187),
    make_stub!(188),
    make_stub!(189),
    make_stub!(190),
    make_stub!(191),
    make_stub!(192),
    make_stub!(193),
    make_stub!(194),
    make_stub!(195),
    make_stub!(196),
    make_stub!(197),
    make_stub!(198),
    make_stub!(199),
    make_stub!(200),
    make_stub!(201),
    make_stub!(202),
    make_stub!(203),
    make_stub!(204),
    make_stub!(205),
    make_stub!(206),
    make_stub!(207),
    make_stub!(208),
    make_stub!(209),
    make_stub!(210),
    make_stub!(211),
    make_stub!(212),
    make_stub!(213),
    make_stub!(214),
    make_stub!(215),
    make_stub!(216),
    make_stub!(217),
    make_stub!(218),
    make_stub!(219),
    make_stub!(220),
    make_stub!(221),
    make_stub!(222),
    make_stub!(223),
    make_stub!(224),
    make_stub!(225),
    make_stub!(226),
    make_stub!(227),
    make_stub!(228),
    make_stub!(229),
    make_stub!(230),
    make_stub!(231),
    make_stub!(232),
    make_stub!(233),
    make_stub!(234),
    make_stub!(235),
    make_stub!(236),
    make_stub!(237),
    make_stub!(238),
    make_stub!(239),
    make_stub!(240),
    make_stub!(241),
    make_stub!(242),
    make_stub!(243),
    make_stub!(244),
    make_stub!(245),
    make_stub!(246),
    make_stub!(247),
    make_stub!(248),
    make_stub!(249),
    make_stub!(250),
    make_stub!(251),
    make_stub!(252),
    make_stub!(253),
    make_stub!(254),
    make_stub!(255),
];

/// Common body every stub jumps into after normalizing `[error_code, vector]`
/// on the stack. Saves the full register file, realigns the stack for the
/// System V call into `dispatch_trap`, and restores everything on the way
/// out via `iretq`.
///
/// Pushing the flat data-segment selector and all fifteen general-purpose
/// registers happens in an order chosen so `rax` lands at the lowest address
/// (nearest `rsp`): every register is saved with a plain `push`, which reads
/// the register without clobbering it, so only the segment-selector capture
/// needs a scratch register, and by then `rax`'s real value is already safe
/// on the stack.
#[unsafe(naked)]
unsafe extern "C" fn common_trap_entry() {
    core::arch::naked_asm!(
        "push r15",
        "push r14",
        "push r13",
        "push r12",
        "push r11",
        "push r10",
        "push r9",
        "push r8",
        "push rbp",
        "push rdi",
        "push rsi",
        "push rdx",
        "push rcx",
        "push rbx",
        "push rax",
        "mov ax, ds",
        "push rax",
        "mov rdi, rsp",
        "mov rbp, rsp",
        "and rsp, -16",
        "call {dispatch}",
        "mov rsp, rbp",
        "pop rax",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "pop rax",
        "pop rbx",
        "pop rcx",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rbp",
        "pop r8",
        "pop r9",
        "pop r10",
        "pop r11",
        "pop r12",
        "pop r13",
        "pop r14",
        "pop r15",
        "add rsp, 16",
        "iretq",
        dispatch = sym dispatch_trap,
    )
}
