//! Basic boot test: architecture and memory bring-up succeed and the
//! kernel is still alive to report it.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use nova_kernel::mm::{frame_allocator, heap, page_table, PageFlags, PhysicalAddress, VirtualAddress};
use nova_kernel::{arch, exit_qemu, logger, mm, serial_println, test_panic_handler, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Starting basic boot test...");

    logger::init();
    arch::init();
    serial_println!("arch initialized");

    mm::init();
    serial_println!("memory management initialized");

    test_frame_round_trip();
    test_heap_stress();
    test_map_translate_unmap();

    serial_println!("All tests passed!");
    exit_qemu(QemuExitCode::Success)
}

/// S1: a frame allocated, freed, and allocated again comes back as the
/// same physical address, and the free/used counters in `stats()` track
/// exactly one frame's worth of movement.
fn test_frame_round_trip() {
    let before = frame_allocator::stats();
    let frame = frame_allocator::alloc_one().expect("a frame is available");
    let mid = frame_allocator::stats();
    assert_eq!(mid.used, before.used + 1);
    assert_eq!(mid.free, before.free - 1);

    frame_allocator::free_one(frame);
    let after = frame_allocator::stats();
    assert_eq!(after.used, before.used);
    assert_eq!(after.free, before.free);

    let reallocated = frame_allocator::alloc_one().expect("the freed frame is available again");
    assert_eq!(reallocated, frame, "first-fit must hand the just-freed frame back out");
    frame_allocator::free_one(reallocated);

    serial_println!("test_frame_round_trip...[ok]");
}

/// S2: many allocations of varying size, interleaved frees of every other
/// block, survive `heap::integrity_check()` without corrupting the
/// free-list, and the freed bytes are genuinely reusable afterward.
fn test_heap_stress() {
    const N: usize = 64;
    let mut blocks: [Option<*mut u8>; N] = [None; N];

    for (i, slot) in blocks.iter_mut().enumerate() {
        let size = 16 + (i % 8) * 32;
        *slot = heap::alloc(size);
        assert!(slot.is_some(), "allocation {i} of size {size} failed");
    }
    heap::integrity_check().expect("heap stays consistent after a burst of allocations");

    for (i, slot) in blocks.iter_mut().enumerate() {
        if i % 2 == 0 {
            if let Some(ptr) = slot.take() {
                heap::free(ptr);
            }
        }
    }
    heap::integrity_check().expect("heap stays consistent after freeing every other block");

    for slot in blocks.iter_mut() {
        if slot.is_none() {
            *slot = heap::alloc(24);
            assert!(slot.is_some(), "freed space must be reusable");
        }
    }
    heap::integrity_check().expect("heap stays consistent after reallocating the freed blocks");

    for slot in blocks.into_iter().flatten() {
        heap::free(slot);
    }
    heap::integrity_check().expect("heap stays consistent once everything is freed");

    serial_println!("test_heap_stress...[ok]");
}

/// S3: mapping a fresh frame at an unused virtual address makes it
/// present and translatable to exactly that frame; unmapping it makes it
/// absent again.
fn test_map_translate_unmap() {
    let virt = VirtualAddress::new(0x1000_0000);
    assert!(!page_table::is_mapped(virt));

    let frame = frame_allocator::alloc_one().expect("a frame is available");
    page_table::map(virt, frame, PageFlags::PRESENT | PageFlags::WRITABLE).expect("mapping a fresh page succeeds");

    assert!(page_table::is_mapped(virt));
    let translated = page_table::translate(virt).expect("a mapped address translates");
    assert_eq!(translated, PhysicalAddress::new(frame.as_u64()));

    page_table::unmap(virt);
    assert!(!page_table::is_mapped(virt));

    frame_allocator::free_one(frame);
    serial_println!("test_map_translate_unmap...[ok]");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
