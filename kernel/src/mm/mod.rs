//! Memory management module: physical addresses, virtual addresses, page
//! flags, and the higher-half direct map shared by the frame allocator,
//! page-table walker, and heap (C2-C4).

#![allow(dead_code)]

pub mod frame_allocator;
pub mod heap;
pub mod memory_map;
pub mod page_table;

const ASSUMED_KERNEL_END: u64 = 16 * 1024 * 1024;
const INITIAL_HEAP_SIZE: usize = 1024 * 1024;

/// Bring up the frame allocator, confirm the page table the CPU already has
/// loaded, then carve out the initial kernel heap. Order matters: the heap
/// allocator's `init` just marks a range usable, so nothing before it may
/// allocate, and the frame allocator needs to exist first only because it's
/// conceptually "below" the other two, not because of a real dependency.
///
/// No memory map ever reaches this call: the `_start` entry point this
/// design boots from doesn't carry the loader's info-block pointer (that
/// wiring lives with the multiboot/bootloader integration this tree
/// excludes), so this always takes the `None` branch of
/// `memory_map::total_memory` and falls back to `memory_map::DEFAULT_RAM_BYTES`.
/// The parser itself is real and unit-tested against raw E820-style entries
/// in `memory_map`, ready for whichever future boot path supplies a pointer.
pub fn init() {
    let total_memory = memory_map::total_memory(None);
    frame_allocator::init(total_memory, ASSUMED_KERNEL_END);
    log::info!("frame allocator initialized ({} MiB)", total_memory / (1024 * 1024));

    page_table::init();
    log::info!("page tables confirmed");

    // HEAP_START is a fixed, unused virtual range dedicated to the kernel
    // heap and not mapped to anything else at this point in bring-up.
    heap::init(crate::arch::x86_64::HEAP_START, INITIAL_HEAP_SIZE);
    log::info!("heap initialized ({} KiB)", INITIAL_HEAP_SIZE / 1024);
}

/// Base of the higher-half direct mapping of all physical memory:
/// `virt = phys + HIGHER_HALF_BASE`. Every physical frame the allocator
/// hands out is immediately dereferenceable at this offset without a
/// dedicated page-table walk, which is how the allocator and the page-table
/// code can bootstrap each other.
pub const HIGHER_HALF_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

impl PhysicalAddress {
    /// This frame's address in the higher-half direct map.
    pub fn to_direct_map(self) -> VirtualAddress {
        VirtualAddress::new(self.0 + HIGHER_HALF_BASE)
    }
}

impl VirtualAddress {
    /// Reverse of `PhysicalAddress::to_direct_map`; only valid for
    /// addresses actually inside the direct-map window.
    pub fn from_direct_map(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 - HIGHER_HALF_BASE)
    }
}

/// Page size options
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 4 KiB pages
    Small = 4096,
    /// 2 MiB pages (x86_64) / 2 MiB (AArch64)
    Large = 2 * 1024 * 1024,
    /// 1 GiB pages (x86_64) / 1 GiB (AArch64)
    Huge = 1024 * 1024 * 1024,
}

bitflags::bitflags! {
    /// Page table entry flag bits, x86_64-numbered (bit 63 is NX regardless
    /// of which page-table level the entry lives at).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const HUGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const NO_EXECUTE = 1 << 63;
    }
}
