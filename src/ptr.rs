//! Fixed-size value structures: on-disk extent pointers and the B-tree
//! node pointers that chain interior nodes to their children.
//!
//! Unlike bkeys and SB fields, these are *not* length-prefixed — callers
//! enumerate them by stepping a fixed stride (`ExtentPtr::SIZE` or
//! `BtreePtrV2::SIZE`) until the enclosing key's value region is exhausted.

use byteorder::{ByteOrder, LittleEndian};

use crate::container;
use crate::superblock::SECTOR_SIZE;

/// A single-replica on-disk extent pointer, packed into one little-endian
/// 64-bit word: `cached:1, unused:1, offset:44, dev:8, gen:8` (bit 0 is the
/// LSB). See SPEC_FULL.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentPtr {
    pub cached: bool,
    pub unused: bool,
    pub offset_sectors: u64,
    pub dev: u8,
    pub gen: u8,
}

impl ExtentPtr {
    pub const SIZE: usize = 8;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let word = LittleEndian::read_u64(&bytes[0..8]);
        Some(ExtentPtr {
            cached: container::bits(word, 0, 1) != 0,
            unused: container::bits(word, 1, 2) != 0,
            offset_sectors: container::bits(word, 2, 46),
            dev: container::bits(word, 46, 54) as u8,
            gen: container::bits(word, 54, 62) as u8,
        })
    }

    /// `offset * SECTOR_SIZE`, per spec's `benz_bch_get_extent_offset`.
    pub fn device_byte_offset(&self) -> u64 {
        self.offset_sectors * SECTOR_SIZE
    }
}

/// A B-tree pointer (v2): identifies a child node's on-disk location
/// (`start`) and how many sectors of it are valid (`sectors_written`).
#[derive(Debug, Clone, Copy)]
pub struct BtreePtrV2 {
    pub seq: u64,
    pub sectors_written: u16,
    pub flags: u16,
    pub min_key_inode: u64,
    pub min_key_offset: u64,
    pub min_key_snapshot: u32,
    pub start: ExtentPtr,
}

impl BtreePtrV2 {
    pub const SIZE: usize = 40;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(BtreePtrV2 {
            seq: LittleEndian::read_u64(&bytes[0..8]),
            sectors_written: LittleEndian::read_u16(&bytes[8..10]),
            flags: LittleEndian::read_u16(&bytes[10..12]),
            min_key_inode: LittleEndian::read_u64(&bytes[12..20]),
            min_key_offset: LittleEndian::read_u64(&bytes[20..28]),
            min_key_snapshot: LittleEndian::read_u32(&bytes[28..32]),
            start: ExtentPtr::parse(&bytes[32..40])?,
        })
    }
}

/// Enumerate fixed-size `BtreePtrV2` values packed back-to-back in
/// `[start, end)`, skipping malformed trailing remnants shorter than one
/// pointer.
pub fn iter_btree_ptrs(data: &[u8], start: usize, end: usize) -> impl Iterator<Item = BtreePtrV2> + '_ {
    let end = end.min(data.len());
    (start..end)
        .step_by(BtreePtrV2::SIZE)
        .filter_map(move |off| data.get(off..off + BtreePtrV2::SIZE).and_then(BtreePtrV2::parse))
}
