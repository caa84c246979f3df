//! On-disk byte formats of the store file.
//!
//! This module centralizes the serialization of the persisted artifact: one
//! file holding a small header (clean/dirty flag) followed by every range
//! entry of the tree.
//!
//! # Module Structure
//!
//! - `header`: fixed-size header with its own checksum
//! - `store_file`: body encoding and atomic persistence

pub mod header;
pub mod store_file;

pub use header::{StoreHeader, STORE_FORMAT_VERSION, STORE_HEADER_SIZE, STORE_MAGIC};
pub use store_file::{StoreContents, StoreFile, ENTRY_SIZE};

use tokenscan_core::{EntityType, TokenScanError};

/// Errors reading or writing the store file
#[derive(Debug, thiserror::Error)]
pub enum StoreFileError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File shorter than its fixed-size parts
    #[error("store file too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Magic bytes do not match
    #[error("invalid store file magic")]
    InvalidMagic,

    /// Header checksum failed
    #[error("header checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    HeaderChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Body checksum failed
    #[error("body checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    BodyChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Written by a newer format
    #[error("unsupported store file version {version}, max supported is {max_supported}")]
    UnsupportedVersion {
        /// Version found in the file
        version: u32,
        /// Maximum supported version
        max_supported: u32,
    },

    /// Entity type tag not recognized
    #[error("unknown entity type tag {0:#04x}")]
    UnknownEntityType(u8),

    /// Clean/dirty state byte not recognized
    #[error("unknown store state {0:#04x}")]
    UnknownState(u8),

    /// File belongs to a store of another entity type
    #[error("store file indexes entity type {actual:?}, expected {expected:?}")]
    EntityTypeMismatch {
        /// Entity type the caller opened
        expected: EntityType,
        /// Entity type in the header
        actual: EntityType,
    },

    /// Body length disagrees with the header's entry count
    #[error("entry count mismatch: header says {header}, body holds {body}")]
    EntryCountMismatch {
        /// Count from the header
        header: u64,
        /// Count derived from the body length
        body: u64,
    },

    /// Body violates the tree's structural invariants
    #[error("invalid entry at index {index}: {reason}")]
    InvalidEntry {
        /// Index of the entry in the body
        index: u64,
        /// What is wrong with it
        reason: &'static str,
    },
}

impl StoreFileError {
    /// True when the file content (not the file system) is damaged
    ///
    /// A valid file written for the other entity type is not damage: it
    /// belongs to another store and must never be rebuilt over.
    pub fn is_corruption(&self) -> bool {
        !matches!(
            self,
            StoreFileError::Io(_) | StoreFileError::EntityTypeMismatch { .. }
        )
    }
}

impl From<StoreFileError> for TokenScanError {
    fn from(e: StoreFileError) -> Self {
        match e {
            StoreFileError::Io(io) => TokenScanError::Io(io),
            other => TokenScanError::Corruption(other.to_string()),
        }
    }
}
