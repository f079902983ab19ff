//! Boot-time memory map parsing (C2/C6 supplement).
//!
//! The loader contract (see the crate root docs) hands the kernel an
//! optional E820-style memory map: a sequence of `(base, length, type)`
//! entries, type 1 meaning usable RAM. When the loader supplies none,
//! `total_usable_bytes` falls back to `DEFAULT_RAM_BYTES`.

/// Fallback total RAM assumed when the loader supplies no memory map,
/// matching the external-interface contract's reference configuration.
pub const DEFAULT_RAM_BYTES: u64 = 512 * 1024 * 1024;

const E820_TYPE_USABLE: u32 = 1;

/// One raw entry as handed over by the loader: `(base, length, type)`.
pub type RawEntry = (u64, u64, u32);

/// Sum the length of every usable entry. Overlapping or out-of-order entries
/// aren't merged or sorted — the loader is trusted to hand over a sane map;
/// reconciling a hostile one is out of scope.
pub fn total_usable_bytes(entries: &[RawEntry]) -> u64 {
    entries.iter().filter(|&&(_, _, typ)| typ == E820_TYPE_USABLE).map(|&(_, length, _)| length).sum()
}

/// `total_usable_bytes`, or `DEFAULT_RAM_BYTES` if the loader supplied no
/// map at all (as opposed to an empty or all-reserved one, which is a real
/// answer of zero and passed through unchanged).
pub fn total_memory(entries: Option<&[RawEntry]>) -> u64 {
    match entries {
        Some(e) => total_usable_bytes(e),
        None => DEFAULT_RAM_BYTES,
    }
}

/// Highest byte address covered by any usable entry, or `None` if there are
/// none. Useful for sizing a frame bitmap that must cover the whole usable
/// range rather than just its total size when the map is fragmented.
pub fn highest_usable_address(entries: &[RawEntry]) -> Option<u64> {
    entries.iter().filter(|&&(_, _, typ)| typ == E820_TYPE_USABLE).map(|&(base, length, _)| base + length).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_map_falls_back_to_default() {
        assert_eq!(total_memory(None), DEFAULT_RAM_BYTES);
    }

    #[test]
    fn usable_entries_are_summed() {
        let entries = [(0u64, 0x9_0000u64, 1u32), (0x10_0000, 0x7f0_0000, 1), (0x800_0000, 0x1000, 2)];
        assert_eq!(total_usable_bytes(&entries), 0x9_0000 + 0x7f0_0000);
    }

    #[test]
    fn reserved_only_map_reports_zero_rather_than_falling_back() {
        let entries = [(0u64, 0x1000u64, 2u32)];
        assert_eq!(total_memory(Some(&entries)), 0);
    }

    #[test]
    fn highest_usable_address_ignores_reserved_regions() {
        let entries = [(0u64, 0x1000u64, 1u32), (0x10_0000, 0x1000, 1), (0x20_0000, 0x5000, 2)];
        assert_eq!(highest_usable_address(&entries), Some(0x10_1000));
    }
}
