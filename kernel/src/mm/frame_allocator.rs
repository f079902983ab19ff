//! Physical frame allocator (C2).
//!
//! A single flat bitmap, one bit per 4 KiB frame (0 = free, 1 = used).
//! First-fit scan for single frames; a sliding window for contiguous runs
//! that restarts past any used bit it finds mid-window. No NUMA, no buddy
//! system, no per-zone split: one bitmap across the whole of physical
//! memory the loader reported.

use spin::Mutex;

use crate::mm::PhysicalAddress;

pub const FRAME_SIZE: usize = 4096;

/// Bits are packed into `u64` words; this is the whole bitmap's backing
/// store, sized for up to 4 GiB of physical memory at the default 512 MiB
/// configuration this easily covers. `init` only uses the prefix that
/// `total_memory` actually calls for.
const MAX_FRAMES: usize = 1 << 20; // 4 GiB worth of 4 KiB frames
const WORDS: usize = MAX_FRAMES / 64;

struct Bitmap {
    words: [u64; WORDS],
    total_frames: usize,
    used_frames: usize,
}

impl Bitmap {
    const fn new() -> Self {
        Self {
            words: [0; WORDS],
            total_frames: 0,
            used_frames: 0,
        }
    }

    fn is_used(&self, frame: usize) -> bool {
        self.words[frame / 64] & (1 << (frame % 64)) != 0
    }

    fn set_used(&mut self, frame: usize) {
        let was_used = self.is_used(frame);
        self.words[frame / 64] |= 1 << (frame % 64);
        if !was_used {
            self.used_frames += 1;
        }
    }

    fn set_free(&mut self, frame: usize) {
        let was_used = self.is_used(frame);
        self.words[frame / 64] &= !(1 << (frame % 64));
        if was_used {
            self.used_frames -= 1;
        }
    }
}

static BITMAP: Mutex<Bitmap> = Mutex::new(Bitmap::new());

/// Initialize the allocator over `total_memory` bytes, pre-marking as used:
/// frame 0 (low-memory structures reserved by firmware/BIOS conventions),
/// every frame occupied by the kernel image up to `kernel_end`, and the
/// frames the bitmap itself would occupy were it not a static (kept for
/// documentation symmetry with the design's invariant (c); this bitmap is
/// itself `.bss`, so there is nothing further to reserve for it).
pub fn init(total_memory: u64, kernel_end: u64) {
    let mut bitmap = BITMAP.lock();
    let total_frames = (total_memory as usize / FRAME_SIZE).min(MAX_FRAMES);
    bitmap.total_frames = total_frames;

    bitmap.set_used(0);

    let kernel_frames = kernel_end.div_ceil(FRAME_SIZE as u64) as usize;
    for frame in 0..kernel_frames.min(total_frames) {
        bitmap.set_used(frame);
    }

    log::info!(
        "frame allocator: {total_frames} frames ({} MiB), {} reserved",
        (total_frames * FRAME_SIZE) / (1024 * 1024),
        bitmap.used_frames
    );
}

/// Allocate a single frame, first-fit.
pub fn alloc_one() -> Option<PhysicalAddress> {
    let mut bitmap = BITMAP.lock();
    for frame in 0..bitmap.total_frames {
        if !bitmap.is_used(frame) {
            bitmap.set_used(frame);
            return Some(PhysicalAddress::new((frame * FRAME_SIZE) as u64));
        }
    }
    None
}

/// Allocate `n` contiguous frames. The window advances past any used bit it
/// encounters, so this is O(total_frames) worst case, not O(total_frames *
/// n).
pub fn alloc_contiguous(n: usize) -> Option<PhysicalAddress> {
    if n == 0 {
        return None;
    }
    let mut bitmap = BITMAP.lock();
    let mut start = 0usize;
    while start + n <= bitmap.total_frames {
        if let Some(bad) = (start..start + n).find(|&f| bitmap.is_used(f)) {
            start = bad + 1;
            continue;
        }
        for frame in start..start + n {
            bitmap.set_used(frame);
        }
        return Some(PhysicalAddress::new((start * FRAME_SIZE) as u64));
    }
    None
}

/// Free a single frame. Freeing an already-free frame is a contract
/// violation: reported, not silently ignored, and not corrupted (the used
/// counter is adjusted only when the bit transitions).
pub fn free_one(frame: PhysicalAddress) {
    let index = (frame.as_u64() as usize) / FRAME_SIZE;
    let mut bitmap = BITMAP.lock();
    if !bitmap.is_used(index) {
        log::warn!("double-free of frame {index} (already free)");
        return;
    }
    bitmap.set_free(index);
}

/// Free `n` contiguous frames starting at `base`.
pub fn free_range(base: PhysicalAddress, n: usize) {
    let start = (base.as_u64() as usize) / FRAME_SIZE;
    for frame in start..start + n {
        free_one(PhysicalAddress::new((frame * FRAME_SIZE) as u64));
    }
}

/// Mark every frame in `[base, base+n)` used without going through
/// `alloc_*`. Used during bring-up to reserve regions the loader reports as
/// unusable or already occupied (e.g. ACPI tables).
pub fn mark_used(base: PhysicalAddress, n: usize) {
    let start = (base.as_u64() as usize) / FRAME_SIZE;
    let mut bitmap = BITMAP.lock();
    for frame in start..(start + n).min(bitmap.total_frames) {
        bitmap.set_used(frame);
    }
}

pub struct FrameStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

pub fn stats() -> FrameStats {
    let bitmap = BITMAP.lock();
    FrameStats {
        total: bitmap.total_frames,
        used: bitmap.used_frames,
        free: bitmap.total_frames - bitmap.used_frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset(total_memory: u64) {
        let mut bitmap = BITMAP.lock();
        *bitmap = Bitmap::new();
        drop(bitmap);
        init(total_memory, 0);
    }

    #[test]
    fn alloc_then_free_round_trips() {
        reset(1024 * FRAME_SIZE as u64);
        let before = stats();
        let frame = alloc_one().expect("frame available");
        assert_eq!(stats().used, before.used + 1);
        free_one(frame);
        assert_eq!(stats().used, before.used);
    }

    #[test]
    fn distinct_allocations_never_alias() {
        reset(1024 * FRAME_SIZE as u64);
        let a = alloc_one().unwrap();
        let b = alloc_one().unwrap();
        assert_ne!(a.as_u64(), b.as_u64());
    }

    #[test]
    fn contiguous_allocation_skips_holes() {
        reset(64 * FRAME_SIZE as u64);
        let hole = alloc_one().unwrap();
        let _ = alloc_one().unwrap();
        free_one(hole);
        let run = alloc_contiguous(4).expect("room for a run of 4");
        assert_eq!(run.as_u64() % (FRAME_SIZE as u64), 0);
    }

    #[test]
    fn double_free_does_not_corrupt_counters() {
        reset(64 * FRAME_SIZE as u64);
        let frame = alloc_one().unwrap();
        let used_after_alloc = stats().used;
        free_one(frame);
        free_one(frame);
        assert_eq!(stats().used, used_after_alloc - 1);
    }
}
