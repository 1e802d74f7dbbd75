//! The superblock accessor: locates and materializes the superblock,
//! enumerates its typed SB fields, and derives block/node size.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Seek, SeekFrom};

use crate::container::{self, U64sWidth};
use crate::error::{BcachefsError, Result};

/// The on-disk sector size.
pub const SECTOR_SIZE: u64 = 512;
/// Sector at which the superblock starts.
pub const SB_SECTOR: u64 = 8;
/// Byte length of the fixed portion of the superblock preceding the first
/// SB field. See SPEC_FULL.md §3 for the field-by-field layout this pins.
pub const SB_HEADER_SIZE: u64 = 256;

/// The format's sentinel, compared byte-for-byte against the image.
pub const MAGIC: [u8; 16] = [
    0xf6, 0x73, 0x85, 0xc6, 0x1a, 0x4e, 0xca, 0x45, 0x82, 0x65, 0xf5, 0x7f, 0x48, 0xba, 0x6d, 0x81,
];

const MAGIC_OFFSET: usize = 24;
const BLOCK_SIZE_OFFSET: usize = 120;
const U64S_OFFSET: usize = 124;
const FLAGS_OFFSET: usize = 144;

/// SB field type discriminants (`enum bch_sb_field_type`). Only `Clean` is
/// interpreted by this crate; the others are named for context and to show
/// `field()` dispatching on the full space rather than a single hardcoded
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SbFieldType {
    Journal = 0,
    Members = 1,
    Crypt = 2,
    Replicas = 3,
    Quota = 4,
    DiskGroups = 5,
    Clean = 6,
    ReplicasV0 = 7,
    JournalSeqBlacklist = 8,
    JournalV2 = 9,
}

/// A located SB field: its type and the byte range of its payload
/// (excluding the 8-byte field header) within the superblock buffer.
#[derive(Debug, Clone, Copy)]
pub struct SbField {
    pub field_type: u32,
    /// Offset of the field header (`u64s`/`type`) within the superblock buffer.
    pub header_offset: u64,
    /// Offset of the first payload byte, i.e. `header_offset + 8`.
    pub payload_offset: u64,
    /// Offset one past the field's last byte.
    pub end_offset: u64,
}

impl SbField {
    pub fn payload<'a>(&self, sb: &'a Superblock) -> &'a [u8] {
        let start = self.payload_offset as usize;
        let end = self.end_offset as usize;
        &sb.raw[start.min(sb.raw.len())..end.min(sb.raw.len())]
    }
}

/// The parsed superblock, owning the raw bytes of its fixed header plus
/// trailing SB-field region.
pub struct Superblock {
    raw: Vec<u8>,
}

impl Superblock {
    /// Read the superblock from `reader`: a minimal-size read first (to
    /// learn `u64s`), then a full reread sized to the real length, matching
    /// spec §4.2's two-stage algorithm.
    pub fn open<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(SB_SECTOR * SECTOR_SIZE))?;

        let mut minimal = vec![0u8; SB_HEADER_SIZE as usize];
        read_exact_checked(reader, &mut minimal)?;
        check_magic(&minimal)?;

        let u64s_total = LittleEndian::read_u32(&minimal[U64S_OFFSET..U64S_OFFSET + 4]) as u64;
        let total_len = SB_HEADER_SIZE + u64s_total * container::WORD;

        reader.seek(SeekFrom::Start(SB_SECTOR * SECTOR_SIZE))?;
        let mut raw = vec![0u8; total_len as usize];
        read_exact_checked(reader, &mut raw)?;
        check_magic(&raw)?;

        Ok(Superblock { raw })
    }

    pub fn magic(&self) -> &[u8] {
        &self.raw[MAGIC_OFFSET..MAGIC_OFFSET + 16]
    }

    pub fn u64s_total(&self) -> u32 {
        LittleEndian::read_u32(&self.raw[U64S_OFFSET..U64S_OFFSET + 4])
    }

    fn flags0(&self) -> u64 {
        LittleEndian::read_u64(&self.raw[FLAGS_OFFSET..FLAGS_OFFSET + 8])
    }

    /// `sb.block_size * SECTOR_SIZE`.
    pub fn block_size(&self) -> u64 {
        let block_size_sectors = LittleEndian::read_u16(&self.raw[BLOCK_SIZE_OFFSET..BLOCK_SIZE_OFFSET + 2]);
        block_size_sectors as u64 * SECTOR_SIZE
    }

    /// `bits[12, 28)` of `flags[0]`, in sectors, scaled to bytes.
    pub fn node_size(&self) -> u64 {
        let sectors = container::bits(self.flags0(), 12, 28);
        sectors * SECTOR_SIZE
    }

    /// Find the first SB field whose type matches `field_type`, or `None`.
    pub fn field(&self, field_type: SbFieldType) -> Option<SbField> {
        let field_type = field_type as u32;
        let end = self.raw.len() as u64;
        let mut current = None;
        loop {
            let offset = container::next_sibling(&self.raw, SB_HEADER_SIZE, end, current, U64sWidth::SB_FIELD)?;
            let header = &self.raw[offset as usize..];
            if header.len() < 8 {
                return None;
            }
            let u64s = LittleEndian::read_u32(&header[0..4]) as u64;
            let ty = LittleEndian::read_u32(&header[4..8]);
            if ty == field_type {
                return Some(SbField {
                    field_type: ty,
                    header_offset: offset,
                    payload_offset: offset + 8,
                    end_offset: offset + u64s * container::WORD,
                });
            }
            current = Some(offset);
        }
    }

    /// Full byte buffer of the superblock (header + fields), for callers
    /// (the journal reader) that need to keep walking inside a field's
    /// payload using the same base-relative offsets.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

fn check_magic(buf: &[u8]) -> Result<()> {
    let magic = &buf[MAGIC_OFFSET..MAGIC_OFFSET + 16];
    if magic != MAGIC {
        return Err(BcachefsError::BadMagic(magic.to_vec()));
    }
    Ok(())
}

fn read_exact_checked<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let expected = buf.len();
    let mut total = 0;
    while total < expected {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            return Err(BcachefsError::Truncated { expected, actual: total });
        }
        total += n;
    }
    Ok(())
}
