//! Store file body and persistence
//!
//! # File Structure
//!
//! ```text
//! +------------------+ 0
//! | StoreHeader      | 32 bytes
//! +------------------+ 32
//! | Entry 1          | token u32 LE | range u64 LE | bits u64 LE
//! | Entry 2          |
//! | ...              |
//! +------------------+
//! | Body CRC32       | 4 bytes (over all entries)
//! +------------------+
//! ```
//!
//! Entries are written in key order. Full rewrites use the
//! write-fsync-rename pattern so a crash never leaves a half-written file
//! under the store's name.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tokenscan_core::{EntityType, RangeBitmap, RangeKey};

use super::header::{StoreHeader, STORE_HEADER_SIZE};
use super::StoreFileError;

/// Encoded size of one entry
pub const ENTRY_SIZE: usize = 4 + 8 + 8;

const BODY_CRC_SIZE: usize = 4;

/// Decoded store file
#[derive(Debug, Clone)]
pub struct StoreContents {
    /// Validated header
    pub header: StoreHeader,
    /// Entries in key order
    pub entries: Vec<(RangeKey, RangeBitmap)>,
}

/// Handle on the store file path
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    /// Handle for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreFile { path: path.into() }
    }

    /// Store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and validate only the header
    pub fn read_header(&self) -> Result<StoreHeader, StoreFileError> {
        let bytes = std::fs::read(&self.path)?;
        StoreHeader::from_bytes(&bytes)
    }

    /// Read and validate the whole file
    pub fn read(&self, expected: EntityType) -> Result<StoreContents, StoreFileError> {
        let bytes = std::fs::read(&self.path)?;
        let header = StoreHeader::from_bytes(&bytes)?;
        if header.entity_type != expected {
            return Err(StoreFileError::EntityTypeMismatch {
                expected,
                actual: header.entity_type,
            });
        }

        let min_len = STORE_HEADER_SIZE + BODY_CRC_SIZE;
        if bytes.len() < min_len {
            return Err(StoreFileError::TooShort {
                expected: min_len,
                actual: bytes.len(),
            });
        }

        let body = &bytes[STORE_HEADER_SIZE..bytes.len() - BODY_CRC_SIZE];
        if body.len() % ENTRY_SIZE != 0 {
            return Err(StoreFileError::EntryCountMismatch {
                header: header.entry_count,
                body: (body.len() / ENTRY_SIZE) as u64,
            });
        }
        let body_count = (body.len() / ENTRY_SIZE) as u64;
        if body_count != header.entry_count {
            return Err(StoreFileError::EntryCountMismatch {
                header: header.entry_count,
                body: body_count,
            });
        }

        let mut crc_bytes = &bytes[bytes.len() - BODY_CRC_SIZE..];
        let stored_crc = crc_bytes.read_u32::<LittleEndian>()?;
        let computed_crc = crc32fast::hash(body);
        if stored_crc != computed_crc {
            return Err(StoreFileError::BodyChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let mut cursor = Cursor::new(body);
        let mut entries = Vec::with_capacity(body_count as usize);
        let mut previous: Option<RangeKey> = None;
        for index in 0..body_count {
            let token_id = cursor.read_u32::<LittleEndian>()?;
            let range_id = cursor.read_u64::<LittleEndian>()?;
            let bits = cursor.read_u64::<LittleEndian>()?;
            let key = RangeKey::new(token_id, range_id);

            if bits == 0 {
                return Err(StoreFileError::InvalidEntry {
                    index,
                    reason: "empty range bitmap",
                });
            }
            if previous.map_or(false, |p| p >= key) {
                return Err(StoreFileError::InvalidEntry {
                    index,
                    reason: "keys not strictly ascending",
                });
            }
            previous = Some(key);
            entries.push((key, RangeBitmap::new(bits)));
        }

        Ok(StoreContents { header, entries })
    }

    /// Atomically replace the file with `header` and `entries`
    ///
    /// The header's entry count is taken from `entries`. Returns the header
    /// that was written.
    pub fn write<I>(&self, header: &StoreHeader, entries: I) -> Result<StoreHeader, StoreFileError>
    where
        I: IntoIterator<Item = (RangeKey, RangeBitmap)>,
    {
        let mut body = Vec::new();
        let mut count = 0u64;
        for (key, value) in entries {
            body.write_u32::<LittleEndian>(key.token_id)?;
            body.write_u64::<LittleEndian>(key.range_id)?;
            body.write_u64::<LittleEndian>(value.bits())?;
            count += 1;
        }

        let mut header = *header;
        header.entry_count = count;

        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&body)?;
        file.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        sync_parent(&self.path)?;
        Ok(header)
    }

    /// Overwrite only the header in place
    ///
    /// Used to flip the clean/dirty flag; the entry count must still match
    /// the body on disk.
    pub fn rewrite_header(&self, header: &StoreHeader) -> Result<(), StoreFileError> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

fn sync_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && parent.exists() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
