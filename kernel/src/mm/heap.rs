//! Kernel heap (C4).
//!
//! A single doubly-linked free list across one growable arena, first-fit.
//! Every block (free or allocated) carries a magic-tagged header and sits
//! in one address-ordered intrusive list; that same list is what lets
//! `free` coalesce with its immediate neighbors in O(1) without a separate
//! free-list walk. Deliberately not a wrapper around `linked_list_allocator`
//! — the header/magic/coalesce machinery here is the point of this module.

#![allow(dead_code)]

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use spin::Mutex;

use super::frame_allocator;
use super::page_table;
use super::{PageFlags, PhysicalAddress, VirtualAddress};

const MAGIC: u32 = 0x4845_4150; // "HEAP"
const MIN_PAYLOAD: usize = 16;
const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

#[repr(C)]
struct BlockHeader {
    magic: u32,
    free: bool,
    size: usize,
    prev: Option<NonNull<BlockHeader>>,
    next: Option<NonNull<BlockHeader>>,
}

impl BlockHeader {
    unsafe fn payload(&mut self) -> *mut u8 {
        (self as *mut BlockHeader as *mut u8).add(HEADER_SIZE)
    }

    fn check_magic(&self) {
        assert_eq!(self.magic, MAGIC, "heap corruption: bad block header magic");
    }
}

unsafe fn header_from_payload(ptr: *mut u8) -> *mut BlockHeader {
    ptr.sub(HEADER_SIZE) as *mut BlockHeader
}

struct HeapState {
    head: Option<NonNull<BlockHeader>>,
    arena_end: u64,
    total: usize,
    used: usize,
}

// SAFETY: every field is only ever touched with `HEAP.lock()` held.
unsafe impl Send for HeapState {}

static HEAP: Mutex<HeapState> = Mutex::new(HeapState {
    head: None,
    arena_end: 0,
    total: 0,
    used: 0,
});

/// Initialize the heap over `[start, start + initial_size)`, which must
/// already be mapped (or mappable on first touch by the caller's paging
/// setup). The whole region starts as one free block.
pub fn init(start: usize, initial_size: usize) {
    let mut state = HEAP.lock();
    // SAFETY: caller guarantees `[start, start+initial_size)` is valid,
    // writable kernel memory not aliased by anything else.
    unsafe {
        let header = start as *mut BlockHeader;
        *header = BlockHeader {
            magic: MAGIC,
            free: true,
            size: initial_size - HEADER_SIZE,
            prev: None,
            next: None,
        };
        state.head = NonNull::new(header);
    }
    state.arena_end = (start + initial_size) as u64;
    state.total = initial_size - HEADER_SIZE;
    state.used = 0;
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Map `additional` more bytes onto the end of the arena via the frame
/// allocator and VMM, appending one new free block that represents the
/// growth.
fn grow(state: &mut HeapState, additional: usize) -> bool {
    let frames_needed = additional.div_ceil(page_table::PAGE_SIZE as usize);
    let growth_start = state.arena_end;

    for i in 0..frames_needed {
        let Some(frame) = frame_allocator::alloc_one() else {
            return false;
        };
        let virt = growth_start + i as u64 * page_table::PAGE_SIZE;
        if page_table::map(
            VirtualAddress::new(virt),
            frame,
            PageFlags::PRESENT | PageFlags::WRITABLE,
        )
        .is_none()
        {
            frame_allocator::free_one(frame);
            return false;
        }
    }

    let grown_bytes = frames_needed * page_table::PAGE_SIZE as usize;
    // SAFETY: the pages just mapped above are fresh, writable, and not
    // aliased by anything else.
    unsafe {
        let header = growth_start as *mut BlockHeader;
        *header = BlockHeader {
            magic: MAGIC,
            free: true,
            size: grown_bytes - HEADER_SIZE,
            prev: None,
            next: None,
        };
        append_block(state, NonNull::new_unchecked(header));
    }
    state.arena_end = growth_start + grown_bytes as u64;
    state.total += grown_bytes - HEADER_SIZE;
    true
}

fn append_block(state: &mut HeapState, block: NonNull<BlockHeader>) {
    // SAFETY: every block reachable from `state.head` is valid for as long
    // as the heap lock is held, which it is here.
    unsafe {
        let mut cursor = state.head;
        let mut last = None;
        while let Some(c) = cursor {
            last = Some(c);
            cursor = (*c.as_ptr()).next;
        }
        match last {
            Some(mut tail) => {
                tail.as_mut().next = Some(block);
                (*block.as_ptr()).prev = Some(tail);
            }
            None => state.head = Some(block),
        }
    }
}

fn alloc_inner(state: &mut HeapState, size: usize, align: usize) -> Option<*mut u8> {
    let payload_size = align_up(size.max(MIN_PAYLOAD), core::mem::align_of::<BlockHeader>());

    loop {
        // SAFETY: walking the address-ordered block list under the heap
        // lock; every `next`/`prev` pointer was installed by `init`,
        // `grow`, or a previous split, all of which keep the list
        // consistent.
        unsafe {
            let mut cursor = state.head;
            while let Some(mut block) = cursor {
                let b = block.as_mut();
                b.check_magic();
                let payload = b.payload();
                let aligned_payload = align_up(payload as usize, align);
                let pad = aligned_payload - payload as usize;

                if b.free && b.size >= payload_size + pad {
                    split_and_take(block, payload_size, pad);
                    state.used += payload_size;
                    return Some(aligned_payload as *mut u8);
                }
                cursor = b.next;
            }
        }

        let shortfall = payload_size + HEADER_SIZE + align;
        if !grow(state, shortfall.max(page_table::PAGE_SIZE as usize)) {
            return None;
        }
    }
}

/// Split `block` so its first `payload_size + pad` bytes become the
/// returned allocation and the remainder (if large enough to host a
/// header plus minimum payload) becomes a new free block immediately
/// after it in the list.
unsafe fn split_and_take(mut block: NonNull<BlockHeader>, payload_size: usize, pad: usize) {
    let b = block.as_mut();
    let used_size = payload_size + pad;
    let remainder = b.size - used_size;

    if remainder >= HEADER_SIZE + MIN_PAYLOAD {
        let new_header_addr = (b.payload() as usize) + used_size;
        let mut new_block = NonNull::new_unchecked(new_header_addr as *mut BlockHeader);
        *new_block.as_mut() = BlockHeader {
            magic: MAGIC,
            free: true,
            size: remainder - HEADER_SIZE,
            prev: Some(block),
            next: b.next,
        };
        if let Some(mut next) = b.next {
            next.as_mut().prev = Some(new_block);
        }
        b.next = Some(new_block);
        b.size = used_size;
    }

    b.free = false;
}

/// Coalesce `block` with its immediate predecessor and/or successor in the
/// address-ordered list if either is also free.
unsafe fn coalesce(mut block: NonNull<BlockHeader>) {
    if let Some(mut next) = block.as_ref().next {
        if next.as_ref().free {
            next.as_mut().check_magic();
            let absorbed = HEADER_SIZE + next.as_ref().size;
            block.as_mut().size += absorbed;
            block.as_mut().next = next.as_ref().next;
            if let Some(mut after) = next.as_ref().next {
                after.as_mut().prev = Some(block);
            }
        }
    }
    if let Some(mut prev) = block.as_ref().prev {
        if prev.as_ref().free {
            coalesce_into_prev(prev, block);
        }
    }
}

unsafe fn coalesce_into_prev(mut prev: NonNull<BlockHeader>, block: NonNull<BlockHeader>) {
    let absorbed = HEADER_SIZE + block.as_ref().size;
    prev.as_mut().size += absorbed;
    prev.as_mut().next = block.as_ref().next;
    if let Some(mut after) = block.as_ref().next {
        after.as_mut().prev = Some(prev);
    }
}

pub fn alloc(size: usize) -> Option<*mut u8> {
    let mut state = HEAP.lock();
    alloc_inner(&mut state, size, core::mem::align_of::<BlockHeader>())
}

pub fn alloc_aligned(size: usize, align: usize) -> Option<*mut u8> {
    let mut state = HEAP.lock();
    alloc_inner(&mut state, size, align)
}

pub fn alloc_zeroed(size: usize) -> Option<*mut u8> {
    let ptr = alloc(size)?;
    // SAFETY: `ptr` was just allocated with at least `size` usable bytes.
    unsafe {
        core::ptr::write_bytes(ptr, 0, size);
    }
    Some(ptr)
}

/// Free `ptr`. A double-free (the block's `free` flag already set) is
/// detected and reported rather than corrupting the list.
pub fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let mut state = HEAP.lock();
    // SAFETY: `ptr` was returned by a prior `alloc*`, so `header_from_payload`
    // recovers the header this module itself wrote.
    unsafe {
        let mut block = NonNull::new_unchecked(header_from_payload(ptr));
        let b = block.as_mut();
        b.check_magic();
        if b.free {
            log::warn!("double free detected at {ptr:p}");
            return;
        }
        state.used -= b.size;
        b.free = true;
        coalesce(block);
    }
}

/// `realloc(NULL, n) == alloc(n)`; `realloc(ptr, 0) == free(ptr)`.
pub fn realloc(ptr: *mut u8, size: usize) -> Option<*mut u8> {
    if ptr.is_null() {
        return alloc(size);
    }
    if size == 0 {
        free(ptr);
        return None;
    }
    // SAFETY: `ptr` was returned by a prior `alloc*`.
    let old_size = unsafe {
        let header = header_from_payload(ptr);
        (*header).check_magic();
        (*header).size
    };
    let new_ptr = alloc(size)?;
    let copy_len = old_size.min(size);
    // SAFETY: both ranges are valid allocations of at least `copy_len`
    // bytes and do not overlap (`new_ptr` was just freshly allocated).
    unsafe {
        core::ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
    }
    free(ptr);
    Some(new_ptr)
}

pub struct HeapStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

pub fn stats() -> HeapStats {
    let state = HEAP.lock();
    HeapStats {
        total: state.total,
        used: state.used,
        free: state.total - state.used,
    }
}

/// Walk the whole block list verifying every header's magic tag and that
/// `next.prev == self` throughout. Returns `Err` with a description on the
/// first inconsistency found.
pub fn integrity_check() -> Result<(), &'static str> {
    let state = HEAP.lock();
    // SAFETY: read-only walk under the heap lock.
    unsafe {
        let mut cursor = state.head;
        let mut prev_ptr: Option<NonNull<BlockHeader>> = None;
        while let Some(block) = cursor {
            if block.as_ref().magic != MAGIC {
                return Err("bad magic tag");
            }
            if block.as_ref().prev != prev_ptr {
                return Err("broken prev link");
            }
            prev_ptr = Some(block);
            cursor = block.as_ref().next;
        }
    }
    Ok(())
}

/// `#[global_allocator]` adapter over the functions above.
pub struct KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        alloc_aligned(layout.size(), layout.align().max(core::mem::align_of::<BlockHeader>()))
            .unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        realloc(ptr, new_size).unwrap_or(core::ptr::null_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate alloc as std_alloc_shim;
    use std_alloc_shim::boxed::Box;
    use std_alloc_shim::vec;

    // The heap under test is a single global static; these tests must not
    // interleave with each other or they would tear down one another's
    // arena mid-test.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn fresh_arena() -> Box<[u8]> {
        let backing = vec![0u8; 64 * 1024].into_boxed_slice();
        init(backing.as_ptr() as usize, backing.len());
        backing
    }

    #[test]
    fn alloc_then_free_restores_free_total() {
        let _guard = TEST_LOCK.lock();
        let _arena = fresh_arena();
        let before = stats().free;
        let ptr = alloc(128).expect("allocation");
        assert!(stats().free < before);
        free(ptr);
        assert_eq!(stats().free, before);
        assert!(integrity_check().is_ok());
    }

    #[test]
    fn adjacent_frees_coalesce() {
        let _guard = TEST_LOCK.lock();
        let _arena = fresh_arena();
        let a = alloc(64).unwrap();
        let b = alloc(64).unwrap();
        let c = alloc(64).unwrap();
        free(b);
        free(a);
        free(c);
        // A single coalesced block should now be able to satisfy a much
        // larger request than any individual piece could have.
        let big = alloc(4096).expect("coalesced into one large free block");
        free(big);
        assert!(integrity_check().is_ok());
    }

    #[test]
    fn realloc_null_behaves_like_alloc() {
        let _guard = TEST_LOCK.lock();
        let _arena = fresh_arena();
        let ptr = realloc(core::ptr::null_mut(), 32).expect("alloc via realloc(NULL, n)");
        free(ptr);
    }

    #[test]
    fn realloc_zero_behaves_like_free() {
        let _guard = TEST_LOCK.lock();
        let _arena = fresh_arena();
        let ptr = alloc(32).unwrap();
        assert!(realloc(ptr, 0).is_none());
        assert!(integrity_check().is_ok());
    }
}
