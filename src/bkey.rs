//! The key decoder: reconstructs a logical key `{inode, offset, snapshot,
//! size, version}` from a bkey record, which is either the canonical
//! (current-format) struct or a per-node bit-packed body.

use byteorder::{ByteOrder, LittleEndian};

use crate::container::WORD;

pub const KEY_FORMAT_LOCAL_BTREE: u8 = 0;
pub const KEY_FORMAT_CURRENT: u8 = 1;

/// `BKEY_U64s`: total length, in words, of a canonical (current-format) key
/// header + body (4-byte header + 36-byte body = 40 bytes = 5 words).
pub const BKEY_U64S: u64 = 5;

/// The on-disk bkey record types this crate distinguishes. Any type not
/// listed decodes to `Other` — record materializers and interior-descent
/// gating only care about a handful of types, so the rest are opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Deleted,
    Whiteout,
    BtreePtr,
    Extent,
    Reservation,
    Inode,
    Dirent,
    Xattr,
    BtreePtrV2,
    InlineData,
    Other(u8),
}

impl KeyType {
    pub fn from_raw(v: u8) -> Self {
        match v {
            0 => KeyType::Deleted,
            1 => KeyType::Whiteout,
            2 => KeyType::BtreePtr,
            3 => KeyType::Extent,
            4 => KeyType::Reservation,
            5 => KeyType::Inode,
            6 => KeyType::Dirent,
            7 => KeyType::Xattr,
            8 => KeyType::BtreePtrV2,
            9 => KeyType::InlineData,
            other => KeyType::Other(other),
        }
    }
}

/// The on-disk packing descriptor: per-field bit widths and offset biases
/// used to unpack a local-btree-format key, plus the total packed-key
/// length (in words) it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BkeyFormat {
    pub key_u64s: u8,
    pub bits_per_field: [u8; 6],
    pub field_offset: [u64; 6],
}

impl BkeyFormat {
    pub const SIZE: usize = 1 + 6 + 6 * 8;

    /// The well-known "short" descriptor: inode + offset only, nothing else.
    pub const SHORT: BkeyFormat = BkeyFormat {
        key_u64s: 3,
        bits_per_field: [64, 64, 0, 0, 0, 0],
        field_offset: [0, 0, 0, 0, 0, 0],
    };

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let key_u64s = data[0];
        let mut bits_per_field = [0u8; 6];
        bits_per_field.copy_from_slice(&data[1..7]);
        let mut field_offset = [0u64; 6];
        for i in 0..6 {
            let off = 7 + i * 8;
            field_offset[i] = LittleEndian::read_u64(&data[off..off + 8]);
        }
        Some(BkeyFormat { key_u64s, bits_per_field, field_offset })
    }
}

/// A decoded logical key: the fields every bkey, packed or canonical,
/// reduces to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalKey {
    pub inode: u64,
    pub offset: u64,
    pub snapshot: u32,
    pub size: u32,
    pub version_hi: u32,
    pub version_lo: u64,
}

/// A borrowed view of one bkey record: its own header fields plus the raw
/// bytes of the whole record (header + body + values), sized to exactly
/// `u64s * WORD` bytes.
#[derive(Debug, Clone, Copy)]
pub struct RawBkey<'a> {
    pub u64s: u8,
    pub format_tag: u8,
    pub needs_whiteout: bool,
    pub key_type: KeyType,
    full: &'a [u8],
}

impl<'a> RawBkey<'a> {
    /// Parse the bkey header at the start of `data` and return a view sized
    /// to the record's own reported length. `None` if the header can't be
    /// read or the record would run past `data`'s end — per spec §7 this is
    /// treated as end-of-region by the caller, not an error.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let u64s = data[0];
        let format_and_whiteout = data[1];
        let format_tag = format_and_whiteout & 0x7f;
        let needs_whiteout = format_and_whiteout & 0x80 != 0;
        let key_type = KeyType::from_raw(data[2]);
        let total = u64s as u64 * WORD;
        let full = data.get(..usize::try_from(total).ok()?)?;
        Some(RawBkey { u64s, format_tag, needs_whiteout, key_type, full })
    }

    /// Byte length of this key record, `u64s * WORD`.
    pub fn byte_len(&self) -> u64 {
        self.u64s as u64 * WORD
    }

    /// Decode into a `LogicalKey`, given the node's packing descriptor
    /// (ignored when this key is canonical-format).
    pub fn decode(&self, format: &BkeyFormat) -> LogicalKey {
        match self.format_tag {
            KEY_FORMAT_CURRENT => self.decode_canonical(),
            _ if *format == BkeyFormat::SHORT => self.decode_short(),
            _ => self.decode_packed(format),
        }
    }

    /// Byte range, within this record, where values begin and end:
    /// `[key_u64s*W, u64s*W)`.
    pub fn value_region(&self, format: &BkeyFormat) -> (usize, usize) {
        let key_u64s = if self.format_tag == KEY_FORMAT_CURRENT {
            BKEY_U64S
        } else {
            format.key_u64s as u64
        };
        let start = (key_u64s * WORD) as usize;
        let end = self.full.len();
        (start.min(end), end)
    }

    pub fn values(&self, format: &BkeyFormat) -> &'a [u8] {
        let (start, end) = self.value_region(format);
        &self.full[start..end]
    }

    fn decode_canonical(&self) -> LogicalKey {
        let body = &self.full[4..];
        if body.len() < 36 {
            return LogicalKey::default();
        }
        LogicalKey {
            inode: LittleEndian::read_u64(&body[0..8]),
            offset: LittleEndian::read_u64(&body[8..16]),
            snapshot: LittleEndian::read_u32(&body[16..20]),
            size: LittleEndian::read_u32(&body[20..24]),
            version_hi: LittleEndian::read_u32(&body[24..28]),
            version_lo: LittleEndian::read_u64(&body[28..36]),
        }
    }

    fn decode_short(&self) -> LogicalKey {
        LogicalKey {
            inode: read_uint_le(&self.full[8..16]),
            offset: read_uint_le(&self.full[16..24]),
            ..LogicalKey::default()
        }
    }

    fn decode_packed(&self, format: &BkeyFormat) -> LogicalKey {
        let mut logical = LogicalKey::default();
        let mut cursor = format.key_u64s as u64 * WORD;
        for i in (0..6).rev() {
            let bits = format.bits_per_field[i];
            let offset = format.field_offset[i];
            if bits == 0 && offset == 0 {
                continue;
            }
            let width = (bits / 8) as u64;
            if cursor < width {
                continue;
            }
            cursor -= width;
            let start = cursor as usize;
            let end = start + width as usize;
            let raw = if width == 0 {
                0
            } else {
                match self.full.get(start..end) {
                    Some(bytes) => read_uint_le(bytes),
                    None => 0,
                }
            };
            let value = raw.wrapping_add(offset);
            match i {
                0 => logical.inode = value,
                1 => logical.offset = value,
                2 => logical.snapshot = value as u32,
                3 => logical.size = value as u32,
                4 => logical.version_hi = value as u32,
                5 => logical.version_lo = value,
                _ => unreachable!(),
            }
        }
        logical
    }
}

fn read_uint_le(bytes: &[u8]) -> u64 {
    match bytes.len() {
        1 => bytes[0] as u64,
        2 => LittleEndian::read_u16(bytes) as u64,
        4 => LittleEndian::read_u32(bytes) as u64,
        8 => LittleEndian::read_u64(bytes),
        _ => 0,
    }
}
