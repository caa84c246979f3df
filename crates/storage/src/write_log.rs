//! Write monitor log
//!
//! Optional diagnostic log of every range merge the writer performs. Records
//! are appended to numbered segment files `writelog-NNNNNN.log` in one
//! directory. A new segment is started when an append would push the current
//! one past the rotation threshold, and rotation prunes closed segments older
//! than the configured age.
//!
//! The log is never read by the store itself; `read_all` exists for offline
//! inspection of what was written.
//!
//! # Segment Format
//!
//! ```text
//! +--------------------+ 0
//! | Magic: "TSWL"      | 4 bytes
//! | Format Version     | 4 bytes (u32 LE)
//! | Created (micros)   | 8 bytes (i64 LE, UTC)
//! +--------------------+ 16
//! | Record 1           | 49 bytes each
//! | ...                |
//! +--------------------+
//! ```
//!
//! # Record Format
//!
//! ```text
//! kind u8 | timestamp i64 | token u32 | range u64 | set u64 | clear u64 | result u64 | crc32 u32
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use tokenscan_core::{RangeBitmap, RangeKey, TokenScanError};

/// Magic bytes: "TSWL"
pub const WRITE_LOG_MAGIC: [u8; 4] = *b"TSWL";

/// Current segment format version
pub const WRITE_LOG_VERSION: u32 = 1;

/// Segment header size in bytes
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Encoded record size in bytes
pub const RECORD_SIZE: usize = 1 + 8 + 4 + 8 + 8 + 8 + 8 + 4;

/// Errors of the write log
#[derive(Debug, thiserror::Error)]
pub enum WriteLogError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment does not start with a valid header
    #[error("invalid write log segment header in {0}")]
    InvalidHeader(PathBuf),
}

impl From<WriteLogError> for TokenScanError {
    fn from(e: WriteLogError) -> Self {
        match e {
            WriteLogError::Io(io) => TokenScanError::Io(io),
            other => TokenScanError::Corruption(other.to_string()),
        }
    }
}

/// Kind of a logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteLogKind {
    /// One range merge
    Merge = 1,
    /// A writer session started
    SessionOpen = 2,
    /// A writer session was closed
    SessionClose = 3,
}

impl WriteLogKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(WriteLogKind::Merge),
            2 => Some(WriteLogKind::SessionOpen),
            3 => Some(WriteLogKind::SessionClose),
            _ => None,
        }
    }
}

/// One logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteLogRecord {
    /// Event kind
    pub kind: WriteLogKind,
    /// When the event was logged
    pub timestamp: DateTime<Utc>,
    /// Merged key; zero for session events
    pub key: RangeKey,
    /// Bits set by the merge
    pub set: RangeBitmap,
    /// Bits cleared by the merge
    pub clear: RangeBitmap,
    /// Stored value after the merge
    pub result: RangeBitmap,
}

impl WriteLogRecord {
    fn session(kind: WriteLogKind) -> Self {
        WriteLogRecord {
            kind,
            timestamp: Utc::now(),
            key: RangeKey::new(0, 0),
            set: RangeBitmap::EMPTY,
            clear: RangeBitmap::EMPTY,
            result: RangeBitmap::EMPTY,
        }
    }

    /// Serialize to exactly `RECORD_SIZE` bytes
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[0] = self.kind as u8;
        LittleEndian::write_i64(&mut bytes[1..9], self.timestamp.timestamp_micros());
        LittleEndian::write_u32(&mut bytes[9..13], self.key.token_id);
        LittleEndian::write_u64(&mut bytes[13..21], self.key.range_id);
        LittleEndian::write_u64(&mut bytes[21..29], self.set.bits());
        LittleEndian::write_u64(&mut bytes[29..37], self.clear.bits());
        LittleEndian::write_u64(&mut bytes[37..45], self.result.bits());
        let crc = crc32fast::hash(&bytes[..45]);
        LittleEndian::write_u32(&mut bytes[45..49], crc);
        bytes
    }

    /// Parse one record, `None` if short or failing its checksum
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_SIZE {
            return None;
        }
        if LittleEndian::read_u32(&bytes[45..49]) != crc32fast::hash(&bytes[..45]) {
            return None;
        }
        Some(WriteLogRecord {
            kind: WriteLogKind::from_byte(bytes[0])?,
            timestamp: DateTime::<Utc>::from_timestamp_micros(LittleEndian::read_i64(&bytes[1..9]))?,
            key: RangeKey::new(
                LittleEndian::read_u32(&bytes[9..13]),
                LittleEndian::read_u64(&bytes[13..21]),
            ),
            set: RangeBitmap::new(LittleEndian::read_u64(&bytes[21..29])),
            clear: RangeBitmap::new(LittleEndian::read_u64(&bytes[29..37])),
            result: RangeBitmap::new(LittleEndian::read_u64(&bytes[37..45])),
        })
    }
}

/// Path of segment `number` in `dir`
///
/// Format: `writelog-NNNNNN.log` where NNNNNN is the zero-padded number.
pub fn segment_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("writelog-{:06}.log", number))
}

fn parse_segment_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("writelog-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Segments in `dir`, ascending by number
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, WriteLogError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(number) = parse_segment_number(&path) {
            segments.push((number, path));
        }
    }
    segments.sort_by_key(|(number, _)| *number);
    Ok(segments)
}

fn read_segment_created(path: &Path) -> Result<DateTime<Utc>, WriteLogError> {
    let bytes = std::fs::read(path)?;
    parse_segment_header(&bytes).ok_or_else(|| WriteLogError::InvalidHeader(path.to_path_buf()))
}

fn parse_segment_header(bytes: &[u8]) -> Option<DateTime<Utc>> {
    if bytes.len() < SEGMENT_HEADER_SIZE || bytes[0..4] != WRITE_LOG_MAGIC {
        return None;
    }
    if LittleEndian::read_u32(&bytes[4..8]) > WRITE_LOG_VERSION {
        return None;
    }
    DateTime::<Utc>::from_timestamp_micros(LittleEndian::read_i64(&bytes[8..16]))
}

/// Replay every record in `dir`, oldest segment first
///
/// A torn or corrupt record ends its segment; the rest of that segment is
/// skipped with a warning.
pub fn read_all(dir: &Path) -> Result<Vec<WriteLogRecord>, WriteLogError> {
    let mut records = Vec::new();
    for (number, path) in list_segments(dir)? {
        let bytes = std::fs::read(&path)?;
        if parse_segment_header(&bytes).is_none() {
            return Err(WriteLogError::InvalidHeader(path));
        }
        let body = &bytes[SEGMENT_HEADER_SIZE..];
        for (index, chunk) in body.chunks(RECORD_SIZE).enumerate() {
            match WriteLogRecord::from_bytes(chunk) {
                Some(record) => records.push(record),
                None => {
                    warn!(
                        target: "tokenscan::write_log",
                        segment = number,
                        record = index,
                        "Torn write log record, skipping rest of segment"
                    );
                    break;
                }
            }
        }
    }
    Ok(records)
}

struct ActiveSegment {
    number: u64,
    size: u64,
    out: BufWriter<File>,
}

impl ActiveSegment {
    fn create(dir: &Path, number: u64) -> Result<Self, WriteLogError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(segment_path(dir, number))?;
        let mut out = BufWriter::new(file);
        out.write_all(&WRITE_LOG_MAGIC)?;
        out.write_u32::<LittleEndian>(WRITE_LOG_VERSION)?;
        out.write_i64::<LittleEndian>(Utc::now().timestamp_micros())?;
        Ok(ActiveSegment {
            number,
            size: SEGMENT_HEADER_SIZE as u64,
            out,
        })
    }
}

/// Appending side of the write log
///
/// Shared by all writers of a store; appends are serialized internally.
pub struct WriteLog {
    dir: PathBuf,
    rotation_threshold: u64,
    max_age: Duration,
    active: Mutex<ActiveSegment>,
}

impl std::fmt::Debug for WriteLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLog")
            .field("dir", &self.dir)
            .field("rotation_threshold", &self.rotation_threshold)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl WriteLog {
    /// Open the log in `dir`, starting a fresh segment after any existing ones
    pub fn open(
        dir: impl Into<PathBuf>,
        rotation_threshold: u64,
        max_age: Duration,
    ) -> Result<Self, WriteLogError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let next = list_segments(&dir)?
            .last()
            .map(|(number, _)| number + 1)
            .unwrap_or(1);
        let active = ActiveSegment::create(&dir, next)?;
        debug!(target: "tokenscan::write_log", dir = %dir.display(), segment = next, "Write log opened");

        Ok(WriteLog {
            dir,
            rotation_threshold,
            max_age,
            active: Mutex::new(active),
        })
    }

    /// Log directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of the segment being appended to
    pub fn current_segment(&self) -> u64 {
        self.active.lock().number
    }

    /// Log one merge of `key`
    pub fn record_merge(
        &self,
        key: RangeKey,
        set: RangeBitmap,
        clear: RangeBitmap,
        result: RangeBitmap,
    ) -> Result<(), WriteLogError> {
        self.append(&WriteLogRecord {
            kind: WriteLogKind::Merge,
            timestamp: Utc::now(),
            key,
            set,
            clear,
            result,
        })
    }

    /// Log the start of a writer session
    pub fn session_open(&self) -> Result<(), WriteLogError> {
        self.append(&WriteLogRecord::session(WriteLogKind::SessionOpen))
    }

    /// Log the end of a writer session and flush
    pub fn session_close(&self) -> Result<(), WriteLogError> {
        self.append(&WriteLogRecord::session(WriteLogKind::SessionClose))?;
        self.flush()
    }

    /// Append one record, rotating first if it would not fit
    pub fn append(&self, record: &WriteLogRecord) -> Result<(), WriteLogError> {
        let mut active = self.active.lock();
        if active.size + RECORD_SIZE as u64 > self.rotation_threshold {
            self.rotate(&mut active)?;
        }
        active.out.write_all(&record.to_bytes())?;
        active.size += RECORD_SIZE as u64;
        Ok(())
    }

    /// Flush buffered records to the file system
    pub fn flush(&self) -> Result<(), WriteLogError> {
        let mut active = self.active.lock();
        active.out.flush()?;
        active.out.get_ref().sync_data()?;
        Ok(())
    }

    fn rotate(&self, active: &mut ActiveSegment) -> Result<(), WriteLogError> {
        active.out.flush()?;
        active.out.get_ref().sync_data()?;
        let next = ActiveSegment::create(&self.dir, active.number + 1)?;
        *active = next;
        debug!(target: "tokenscan::write_log", segment = active.number, "Write log rotated");

        if let Ok(age) = chrono::Duration::from_std(self.max_age) {
            let pruned = self.prune_closed(Utc::now() - age, active.number)?;
            if pruned > 0 {
                debug!(target: "tokenscan::write_log", pruned, "Pruned old write log segments");
            }
        }
        Ok(())
    }

    /// Delete closed segments created before `cutoff`, returning how many
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, WriteLogError> {
        let current = self.active.lock().number;
        self.prune_closed(cutoff, current)
    }

    fn prune_closed(&self, cutoff: DateTime<Utc>, current: u64) -> Result<usize, WriteLogError> {
        let mut pruned = 0;
        for (number, path) in list_segments(&self.dir)? {
            if number >= current {
                continue;
            }
            let created = match read_segment_created(&path) {
                Ok(created) => created,
                Err(e) => {
                    warn!(target: "tokenscan::write_log", path = %path.display(), error = %e, "Skipping unreadable segment");
                    continue;
                }
            };
            if created < cutoff {
                std::fs::remove_file(&path)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

impl Drop for WriteLog {
    fn drop(&mut self) {
        if let Err(e) = self.active.get_mut().out.flush() {
            warn!(target: "tokenscan::write_log", error = %e, "Failed to flush write log on drop");
        }
    }
}
