//! The journal-snapshot reader: locates the `Clean` SB field embedded in
//! the superblock and walks its journal entries to find the first root
//! pointer recorded for a given B-tree id.
//!
//! This crate never replays the write journal; it only reads the root
//! snapshot the `Clean` field carries, which is enough to start a
//! read-only traversal.

use byteorder::{ByteOrder, LittleEndian};

use crate::bkey::{BkeyFormat, RawBkey};
use crate::container::{self, U64sWidth};
use crate::error::{BcachefsError, Result};
use crate::ptr::{self, BtreePtrV2};
use crate::superblock::{SbFieldType, Superblock};
use crate::BtreeId;

/// Bytes of the `Clean` field's own header (flags + journal_seq) preceding
/// its first journal entry.
const CLEAN_SUBHEADER_SIZE: u64 = 16;

/// Journal entry header: `u64s:u32, btree_id:u8, level:u8, entry_type:u8, pad:u8`.
const ENTRY_HEADER_SIZE: u64 = 8;

/// The entry type this crate looks for: a snapshot of a B-tree's root key,
/// recorded the last time the tree was written.
const JSET_ENTRY_BTREE_ROOT: u8 = 4;

/// A located root-key journal entry: the embedded canonical bkey describing
/// a B-tree's root, plus the `BtreePtrV2` pointers in its value region.
pub struct JournalEntry<'a> {
    pub btree_id: u8,
    pub level: u8,
    key: RawBkey<'a>,
}

impl<'a> JournalEntry<'a> {
    pub fn key(&self) -> &RawBkey<'a> {
        &self.key
    }

    /// The root pointers this entry's key carries, skipping any marked
    /// `unused`.
    pub fn pointers(&self) -> impl Iterator<Item = BtreePtrV2> + 'a {
        let values = self.key.values(&BkeyFormat::SHORT);
        ptr::iter_btree_ptrs(values, 0, values.len()).filter(|p| !p.start.unused)
    }
}

/// Find the first root entry for `btree_id` inside the superblock's `Clean`
/// field (spec §4.3).
pub fn btree_root_entry(sb: &Superblock, btree_id: BtreeId) -> Result<JournalEntry<'_>> {
    let clean = sb
        .field(SbFieldType::Clean)
        .ok_or(BcachefsError::MissingRoot(btree_id))?;

    // `clean.header_offset` is the field's own 8-byte header (u64s/type);
    // the subheader (flags/journal_seq) follows it, and the first journal
    // entry follows *that* — i.e. `payload_offset + CLEAN_SUBHEADER_SIZE`,
    // not `header_offset + CLEAN_SUBHEADER_SIZE` (original_source/
    // bcachefs.c:665-681, 135-146: `sb_field_clean + sizeof(struct
    // bch_sb_field_clean)`, where that sizeof embeds the field header).
    let base = clean.payload_offset + CLEAN_SUBHEADER_SIZE;
    let end = clean.end_offset;
    let raw = sb.raw();

    let mut current = None;

    loop {
        let offset = match container::next_sibling(raw, base, end, current, U64sWidth::JOURNAL_ENTRY) {
            Some(o) => o,
            None => break,
        };
        // A `u64s == 0` entry makes no forward progress; stop rather than
        // loop on the same offset forever (spec §4.1: the primitive doesn't
        // fail on `L == 0`, the caller must filter it).
        if Some(offset) == current {
            break;
        }
        current = Some(offset);

        let header = match raw.get(offset as usize..) {
            Some(h) if h.len() >= ENTRY_HEADER_SIZE as usize => h,
            _ => break,
        };
        let entry_btree_id = header[4];
        let level = header[5];
        let entry_type = header[6];

        if entry_type == JSET_ENTRY_BTREE_ROOT && entry_btree_id == btree_id as u8 {
            let key_bytes = &raw[(offset + ENTRY_HEADER_SIZE) as usize..];
            if let Some(key) = RawBkey::parse(key_bytes) {
                // Spec §4.3: return the *first* matching root entry.
                return Ok(JournalEntry { btree_id: entry_btree_id, level, key });
            }
        }
    }

    Err(BcachefsError::MissingRoot(btree_id))
}
