//! Store file header
//!
//! The header records which entity type the store indexes and whether the
//! contents were checkpointed by a clean shutdown. It is protected by its own
//! CRC so the clean/dirty flag can be flipped by rewriting only these bytes.
//!
//! # Format
//!
//! ```text
//! +--------------------+ 0
//! | Magic: "TKSC"      | 4 bytes
//! | Format Version     | 4 bytes (u32 LE)
//! | Entity Type        | 1 byte
//! | State              | 1 byte (0 = dirty, 1 = clean)
//! | Reserved           | 2 bytes
//! | Generation         | 8 bytes (u64 LE)
//! | Entry Count        | 8 bytes (u64 LE)
//! | Header CRC32       | 4 bytes (u32 LE, over bytes 0..28)
//! +--------------------+ 32
//! ```

use byteorder::{ByteOrder, LittleEndian};
use tokenscan_core::EntityType;

use super::StoreFileError;

/// Magic bytes: "TKSC"
pub const STORE_MAGIC: [u8; 4] = *b"TKSC";

/// Current store file format version
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Header size in bytes
pub const STORE_HEADER_SIZE: usize = 32;

const STATE_DIRTY: u8 = 0;
const STATE_CLEAN: u8 = 1;

/// Decoded store file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Format version for forward compatibility
    pub format_version: u32,
    /// Entity type the store indexes
    pub entity_type: EntityType,
    /// True only when written by a clean shutdown checkpoint
    pub clean: bool,
    /// Number of checkpoints the file has seen
    pub generation: u64,
    /// Number of entries in the body
    pub entry_count: u64,
}

impl StoreHeader {
    /// Header of a fresh, dirty, empty store
    pub fn new(entity_type: EntityType) -> Self {
        StoreHeader {
            format_version: STORE_FORMAT_VERSION,
            entity_type,
            clean: false,
            generation: 0,
            entry_count: 0,
        }
    }

    /// Copy with the clean flag replaced
    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; STORE_HEADER_SIZE] {
        let mut bytes = [0u8; STORE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&STORE_MAGIC);
        LittleEndian::write_u32(&mut bytes[4..8], self.format_version);
        bytes[8] = self.entity_type.as_tag();
        bytes[9] = if self.clean { STATE_CLEAN } else { STATE_DIRTY };
        LittleEndian::write_u64(&mut bytes[12..20], self.generation);
        LittleEndian::write_u64(&mut bytes[20..28], self.entry_count);
        let crc = crc32fast::hash(&bytes[..28]);
        LittleEndian::write_u32(&mut bytes[28..32], crc);
        bytes
    }

    /// Parse and validate a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreFileError> {
        if bytes.len() < STORE_HEADER_SIZE {
            return Err(StoreFileError::TooShort {
                expected: STORE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        if bytes[0..4] != STORE_MAGIC {
            return Err(StoreFileError::InvalidMagic);
        }

        let stored_crc = LittleEndian::read_u32(&bytes[28..32]);
        let computed_crc = crc32fast::hash(&bytes[..28]);
        if stored_crc != computed_crc {
            return Err(StoreFileError::HeaderChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let format_version = LittleEndian::read_u32(&bytes[4..8]);
        if format_version > STORE_FORMAT_VERSION {
            return Err(StoreFileError::UnsupportedVersion {
                version: format_version,
                max_supported: STORE_FORMAT_VERSION,
            });
        }

        let entity_type =
            EntityType::from_tag(bytes[8]).ok_or(StoreFileError::UnknownEntityType(bytes[8]))?;
        let clean = match bytes[9] {
            STATE_CLEAN => true,
            STATE_DIRTY => false,
            other => return Err(StoreFileError::UnknownState(other)),
        };

        Ok(StoreHeader {
            format_version,
            entity_type,
            clean,
            generation: LittleEndian::read_u64(&bytes[12..20]),
            entry_count: LittleEndian::read_u64(&bytes[20..28]),
        })
    }
}
