//! Record materializers: the two result shapes an external caller uses to
//! reconstruct file content and namespace (§4.8). Both are produced from a
//! `BtreeValue` — see `btree::BtreeValue::as_extent`/`as_dirent`.

/// A mapping from a file's byte range to a device byte range, or to inline
/// bytes carried in the owning node's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    pub inode: u64,
    pub file_offset: u64,
    pub offset: u64,
    pub size: u64,
}

/// A directory entry: a name within a parent inode mapping to a child
/// inode and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub parent_inode: u64,
    pub inode: u64,
    pub dirent_type: u8,
    pub name: String,
}
