//! A read-only parser and B-tree traversal engine for the on-disk format of
//! bcachefs, a copy-on-write, B-tree-structured Linux filesystem.
//!
//! Given a raw image, [`Bcachefs::open`] locates the superblock, and
//! [`Bcachefs::iter`] resolves the roots recorded in the clean journal
//! snapshot and walks a requested B-tree to completion, yielding typed
//! [`Extent`] and [`Dirent`] records.
//!
//! This crate assumes a clean, previously-flushed image: it does not
//! replay the write journal, verify checksums, or write to the image.
//! Hex/UUID formatting and a command-line front end are the caller's job.

pub mod bkey;
pub mod btree;
pub mod container;
pub mod error;
pub mod journal;
pub mod ptr;
pub mod records;
pub mod superblock;

pub use btree::{BtreeIterator, BtreeValue};
pub use error::{BcachefsError, Result};
pub use records::{Dirent, Extent};
pub use superblock::Superblock;

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

/// Identifies one of the format's logical B-trees (`bch_btree_id`). Only
/// `Extents` and `Dirents` descend into interior pointer keys (§4.7); the
/// others are exposed so a caller can still walk their roots, but the
/// iterator treats any key in them as a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BtreeId {
    Extents = 0,
    Inodes = 1,
    Dirents = 2,
    Xattrs = 3,
    Alloc = 4,
    Reflink = 5,
    Subvolumes = 6,
    Snapshots = 7,
}

/// A read-only handle on a bcachefs image: owns the reader and the parsed
/// superblock. Generic over `R: Read + Seek` so callers can supply a
/// `File`, a `BufReader`, or (as every test in this crate does) an
/// in-memory `Cursor<Vec<u8>>`.
pub struct Bcachefs<R> {
    reader: R,
    sb: Superblock,
}

impl Bcachefs<File> {
    /// Open an image file by path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> Bcachefs<R> {
    /// Open an image from an arbitrary `Read + Seek` source.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let sb = Superblock::open(&mut reader)?;
        Ok(Bcachefs { reader, sb })
    }

    /// The parsed superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Open an iterator over `btree_id`'s root, resolved from the clean
    /// journal snapshot. Per spec §7, a `btree_id` with no recorded root
    /// yields a valid iterator that immediately ends, rather than an error.
    pub fn iter(&mut self, btree_id: BtreeId) -> Result<BtreeIterator<'_, R>> {
        BtreeIterator::open(&mut self.reader, &self.sb, btree_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;

    #[test]
    fn open_fails_on_truncated_image() {
        let cursor = Cursor::new(vec![0u8; 100]);
        assert!(matches!(Bcachefs::from_reader(cursor), Err(BcachefsError::Truncated { .. })));
    }

    #[test]
    fn open_fails_on_bad_magic() {
        let mut buf = vec![0u8; (8 * 512 + 256) as usize];
        LittleEndian::write_u32(&mut buf[8 * 512 + 124..8 * 512 + 128], 0);
        let cursor = Cursor::new(buf);
        assert!(matches!(Bcachefs::from_reader(cursor), Err(BcachefsError::BadMagic(_))));
    }
}
