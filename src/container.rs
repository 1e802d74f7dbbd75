//! The variable-width integer decoder and the packed-container walker.
//!
//! The on-disk format packs several unrelated regions (superblock fields,
//! journal entries, bkeys) the same way: a header, then a run of
//! self-describing elements, each prefixed by its own length in `W` (8-byte)
//! units. `next_sibling` is the one primitive that steps across any of
//! them; callers only supply how wide the length prefix is and what fixed
//! addend (`start_bias`) the format adds to it before scaling by `W`.

use byteorder::{ByteOrder, LittleEndian};

/// Size, in bytes, of the format's length-granularity unit (`W` in spec).
pub const WORD: u64 = 8;

/// Describes how a region's per-element length prefix is encoded: how many
/// bytes hold it, and a fixed addend applied before scaling by `WORD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U64sWidth {
    pub size: u8,
    pub start_bias: u64,
}

impl U64sWidth {
    /// Superblock-field length prefix: u32, no addend.
    pub const SB_FIELD: U64sWidth = U64sWidth { size: 4, start_bias: 0 };
    /// Journal-entry length prefix: u32, no addend.
    pub const JOURNAL_ENTRY: U64sWidth = U64sWidth { size: 4, start_bias: 0 };
    /// Packed-key length prefix: u8, no addend.
    pub const BKEY: U64sWidth = U64sWidth { size: 1, start_bias: 0 };

    fn decode(self, bytes: &[u8]) -> Option<u64> {
        match self.size {
            1 => bytes.first().map(|&b| b as u64),
            2 => (bytes.len() >= 2).then(|| LittleEndian::read_u16(bytes) as u64),
            4 => (bytes.len() >= 4).then(|| LittleEndian::read_u32(bytes) as u64),
            8 => (bytes.len() >= 8).then(|| LittleEndian::read_u64(bytes)),
            _ => None,
        }
    }
}

/// Step to the next sibling element inside `[base, end)`.
///
/// `current` is `None` for "give me the first element" (which lives at
/// `base + header_size`), or `Some(offset)` of the element just visited.
/// Returns `None` once the next candidate offset would land at or past
/// `end`, or once a length prefix can't be read (region truncated) — per
/// spec §4.1 and §7, bounds violations here are end-of-region, not errors.
///
/// All offsets are relative to `data`'s start (i.e. `data` is assumed to
/// begin at the image's base, or callers pre-slice so offset 0 is `base`).
pub fn next_sibling(
    data: &[u8],
    header_size: u64,
    end: u64,
    current: Option<u64>,
    width: U64sWidth,
) -> Option<u64> {
    let next = match current {
        None => header_size,
        Some(cur) => {
            let cur_usize = usize::try_from(cur).ok()?;
            let len_bytes = data.get(cur_usize..)?;
            let u64s = width.decode(len_bytes)? + width.start_bias;
            cur + u64s * WORD
        }
    };
    if next >= end {
        None
    } else {
        Some(next)
    }
}

/// Extract bits `[first_bit, last_bit)` of a little-endian 64-bit word,
/// matching `benz_get_flag_bits` in the original source.
pub fn bits(word: u64, first_bit: u8, last_bit: u8) -> u64 {
    debug_assert!(last_bit <= 64 && first_bit < last_bit);
    let shift_left = 64 - last_bit;
    (word << shift_left) >> (shift_left + first_bit)
}
