use thiserror::Error;

/// Error conditions a caller can observe from this crate.
///
/// Per spec, bounds violations encountered mid-traversal (`InvalidLength`,
/// `Truncated` past the trailing edge of a region) are swallowed by the
/// iterator rather than raised here — only the handful of hard structural
/// failures spec §7 calls out (`OpenFailure`, `BadMagic`, `MissingRoot`,
/// `AllocFailure`) surface as an `Err` to the caller.
#[derive(Error, Debug)]
pub enum BcachefsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("superblock magic mismatch: {0:02x?}")]
    BadMagic(Vec<u8>),

    #[error("image truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid length prefix in {region}: would read past region bounds")]
    InvalidLength { region: &'static str },

    #[error("no btree-root journal entry for btree id {0:?}")]
    MissingRoot(crate::BtreeId),

    #[error("failed to allocate a {0}-byte node buffer")]
    AllocFailure(usize),
}

pub type Result<T> = std::result::Result<T, BcachefsError>;
