//! Byte-level fixture builder shared by the integration tests. There is no
//! checked-in bcachefs image in the retrieval pack, so every scenario here
//! hand-builds a minimal image the same way the unit tests in `src/btree.rs`
//! and `src/journal.rs` do, generalized to cover multiple root pointers and
//! multi-level trees.

use bcachefs_reader::superblock::MAGIC;
use bcachefs_reader::BtreeId;
use byteorder::{ByteOrder, LittleEndian};

pub const SECTOR_SIZE: u64 = 512;
pub const NODE_SIZE: u64 = 16 * SECTOR_SIZE;
const NODE_PREFIX_SIZE: u64 = 72;
const BSET_HEADER_SIZE: u64 = 16;
const CHECKSUM_RECORD_SIZE: u64 = 16;

const KEY_FORMAT_CURRENT: u8 = 1;

pub const KEY_TYPE_BTREE_PTR_V2: u8 = 8;
pub const KEY_TYPE_EXTENT: u8 = 3;
pub const KEY_TYPE_INLINE_DATA: u8 = 9;
pub const KEY_TYPE_DIRENT: u8 = 6;

/// The next block boundary strictly after `value`, always advancing by at
/// least one full block even when `value` is already aligned — matches
/// `src/btree.rs::next_block_boundary` / the original's
/// `_cb += block_size - _cb % block_size`.
fn next_block_boundary(value: u64, block_size: u64) -> u64 {
    (value / block_size + 1) * block_size
}

/// A canonical (current-format) bkey: header + 36-byte body + trailing value
/// bytes. Every fixture in this crate's tests uses the canonical format
/// exclusively — the general bit-packed form is exercised directly by
/// `src/bkey.rs`'s unit tests instead.
pub fn canonical_key(key_type: u8, inode: u64, offset: u64, size: u32, value: &[u8]) -> Vec<u8> {
    let total = 40 + value.len();
    assert_eq!(total % 8, 0, "fixture keys must stay word-aligned");
    let mut buf = vec![0u8; total];
    buf[0] = (total / 8) as u8;
    buf[1] = KEY_FORMAT_CURRENT;
    buf[2] = key_type;
    LittleEndian::write_u64(&mut buf[4..12], inode);
    LittleEndian::write_u64(&mut buf[12..20], offset);
    LittleEndian::write_u32(&mut buf[24..28], size);
    buf[40..].copy_from_slice(value);
    buf
}

/// One little-endian `ExtentPtr` word with only `offset` set.
pub fn extent_ptr_word(offset_sectors: u64) -> [u8; 8] {
    (offset_sectors << 2).to_le_bytes()
}

/// `{ d_inum, d_type, d_name (no NUL needed — the reader trims at the first
/// zero byte or the value's end) }`.
pub fn dirent_value(inum: u64, dtype: u8, name: &str) -> Vec<u8> {
    let mut v = vec![0u8; 9 + name.len()];
    LittleEndian::write_u64(&mut v[0..8], inum);
    v[8] = dtype;
    v[9..].copy_from_slice(name.as_bytes());
    v
}

/// Packs `bsets` into a `NODE_SIZE`-byte node buffer, block-aligning every
/// bset after the first per spec §4.5. Returns `sectors_written`.
pub fn write_node(bsets: &[Vec<u8>]) -> (Vec<u8>, u64) {
    let mut buf = vec![0u8; NODE_SIZE as usize];
    let mut header_start = NODE_PREFIX_SIZE;
    let mut last_end = header_start;
    for (i, keys) in bsets.iter().enumerate() {
        if i > 0 {
            header_start = next_block_boundary(last_end, SECTOR_SIZE) + CHECKSUM_RECORD_SIZE;
        }
        let hs = header_start as usize;
        LittleEndian::write_u32(&mut buf[hs + 8..hs + 12], (keys.len() as u64 / 8) as u32);
        let ps = hs + BSET_HEADER_SIZE as usize;
        buf[ps..ps + keys.len()].copy_from_slice(keys);
        last_end = header_start + BSET_HEADER_SIZE + keys.len() as u64;
    }
    let sectors_written = (last_end + SECTOR_SIZE - 1) / SECTOR_SIZE;
    (buf, sectors_written)
}

pub fn btree_ptr_v2_value(device_offset: u64, sectors_written: u64, unused: bool) -> Vec<u8> {
    let mut v = vec![0u8; 40];
    LittleEndian::write_u64(&mut v[0..8], 1); // seq
    LittleEndian::write_u16(&mut v[8..10], sectors_written as u16);
    let mut word = (device_offset / SECTOR_SIZE) << 2;
    if unused {
        word |= 0b10;
    }
    v[32..40].copy_from_slice(&word.to_le_bytes());
    v
}

/// Writes a node built from `bsets` directly into `image` at
/// `device_offset`, growing the buffer if needed. Used to place a child
/// node reached only by interior descent (never recorded as a journal root
/// pointer itself). Returns `sectors_written`, for building the `BtreePtrV2`
/// value that addresses it.
pub fn place_node(image: &mut Vec<u8>, device_offset: u64, bsets: &[Vec<u8>]) -> u64 {
    let (node_buf, sectors_written) = write_node(bsets);
    let end = (device_offset + NODE_SIZE) as usize;
    if image.len() < end {
        image.resize(end, 0);
    }
    image[device_offset as usize..device_offset as usize + node_buf.len()].copy_from_slice(&node_buf);
    sectors_written
}

/// A root pointer to place directly in the journal's btree-root entry: the
/// node it addresses, where to put it on "device", and whether it should be
/// marked `unused` (and thus skipped by the iterator).
pub struct RootNode {
    pub device_offset: u64,
    pub bsets: Vec<Vec<u8>>,
    pub unused: bool,
}

impl RootNode {
    pub fn new(device_offset: u64, bsets: Vec<Vec<u8>>) -> Self {
        RootNode { device_offset, bsets, unused: false }
    }

    pub fn unused_at(device_offset: u64) -> Self {
        RootNode { device_offset, bsets: Vec::new(), unused: true }
    }
}

/// Builds a full image: a superblock whose `Clean` field records one
/// btree-root journal entry for `btree_id`, with root pointers in
/// declaration order, each addressing a node built from its `bsets`.
pub fn build_image(btree_id: BtreeId, roots: &[RootNode]) -> Vec<u8> {
    let mut image = vec![0u8; 4096 + 512];
    let mut ptr_values = Vec::new();

    for root in roots {
        let end = (root.device_offset + NODE_SIZE) as usize;
        if image.len() < end {
            image.resize(end, 0);
        }
        let sectors_written = if root.unused {
            0
        } else {
            let (node_buf, sectors_written) = write_node(&root.bsets);
            image[root.device_offset as usize..root.device_offset as usize + node_buf.len()]
                .copy_from_slice(&node_buf);
            sectors_written
        };
        ptr_values.extend_from_slice(&btree_ptr_v2_value(root.device_offset, sectors_written, root.unused));
    }

    let root_key = canonical_key(KEY_TYPE_BTREE_PTR_V2, 0, 0, 0, &ptr_values);

    let mut entry = vec![0u8; 8];
    entry[4] = btree_id as u8;
    entry[6] = 4; // JSET_ENTRY_BTREE_ROOT
    entry.extend_from_slice(&root_key);
    LittleEndian::write_u32(&mut entry[0..4], (entry.len() as u64 / 8) as u32);

    let mut clean_payload = vec![0u8; 16];
    clean_payload.extend_from_slice(&entry);

    let mut field = vec![0u8; 8];
    LittleEndian::write_u32(&mut field[0..4], ((8 + clean_payload.len()) as u64 / 8) as u32);
    LittleEndian::write_u32(&mut field[4..8], 6); // SbFieldType::Clean
    field.extend_from_slice(&clean_payload);

    let sb_field_words = field.len() as u64 / 8;
    let sb_total_len = 256 + sb_field_words * 8;
    let mut sb_buf = vec![0u8; sb_total_len as usize];
    sb_buf[24..40].copy_from_slice(&MAGIC);
    LittleEndian::write_u16(&mut sb_buf[120..122], 1); // block_size = 1 sector
    LittleEndian::write_u32(&mut sb_buf[124..128], sb_field_words as u32);
    LittleEndian::write_u64(&mut sb_buf[144..152], (NODE_SIZE / SECTOR_SIZE) << 12);
    sb_buf[256..256 + field.len()].copy_from_slice(&field);

    let sb_end = 4096 + sb_buf.len();
    if image.len() < sb_end {
        image.resize(sb_end, 0);
    }
    image[4096..4096 + sb_buf.len()].copy_from_slice(&sb_buf);

    image
}
