//! IndexTree: reference range tree backed by a single store file
//!
//! This module implements the `RangeTree` contract using:
//! - `Arc<BTreeMap<RangeKey, RangeBitmap>>` for ordered entries, copied on
//!   write while a cursor still holds the previous version
//! - `parking_lot::RwLock` for concurrent seeks alongside the writer
//! - `AtomicBool` writer slot enforcing a single writer
//! - `StoreFile` for checkpoints and the clean/dirty flag
//!
//! # Design Notes
//!
//! - **Whole-file checkpoints**: the tree lives in memory and is rewritten
//!   atomically on every checkpoint
//! - **In-place dirty flag**: marking the store dirty rewrites only the header
//! - **Snapshot cursors**: `seek` pins the entries as of that moment; later
//!   merges never become visible to an open cursor. Hits are copied out of the
//!   snapshot `CURSOR_PAGE_SIZE` at a time

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use tokenscan_core::{
    EntityType, RangeBitmap, RangeCursor, RangeKey, RangeTree, Result, TokenScanError, TreeWriter,
};

use crate::format::{StoreFile, StoreHeader};

/// Hits copied out of a cursor's snapshot at a time
pub const CURSOR_PAGE_SIZE: usize = 64;

/// What `IndexTree::open` found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenStatus {
    /// Valid file written by a clean shutdown
    Clean,
    /// Valid file without the clean flag
    Dirty,
    /// File present but unreadable; the tree starts empty
    Invalid(String),
    /// No file; the tree starts empty
    Missing,
}

impl OpenStatus {
    /// True unless the file was a valid clean checkpoint
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, OpenStatus::Clean)
    }
}

#[derive(Debug)]
struct TreeState {
    entries: Arc<BTreeMap<RangeKey, RangeBitmap>>,
    header: StoreHeader,
    closed: bool,
}

impl TreeState {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(TokenScanError::illegal_state("index tree is closed"));
        }
        Ok(())
    }
}

/// Range tree persisted to one store file
#[derive(Debug)]
pub struct IndexTree {
    entity_type: EntityType,
    /// None for purely in-memory trees
    file: Option<StoreFile>,
    read_only: bool,
    status: OpenStatus,
    state: Arc<RwLock<TreeState>>,
    writer_active: Arc<AtomicBool>,
}

impl IndexTree {
    /// Open the tree stored at `path`
    ///
    /// A missing or unreadable file yields an empty tree whose status says
    /// why. Writable trees lay down a fresh dirty file in that case.
    ///
    /// # Errors
    ///
    /// `StoreNotFound` when `read_only` and the file does not exist; `Io` when
    /// the file system fails.
    pub fn open(path: impl AsRef<Path>, entity_type: EntityType, read_only: bool) -> Result<Self> {
        let file = StoreFile::new(path.as_ref());
        let fresh = StoreHeader::new(entity_type);

        let (status, header, entries) = if !file.exists() {
            if read_only {
                return Err(TokenScanError::StoreNotFound {
                    store: entity_type.store_name(),
                    path: file.path().to_path_buf(),
                });
            }
            let header = file.write(&fresh, std::iter::empty())?;
            (OpenStatus::Missing, header, BTreeMap::new())
        } else {
            match file.read(entity_type) {
                Ok(contents) => {
                    let status = if contents.header.clean {
                        OpenStatus::Clean
                    } else {
                        OpenStatus::Dirty
                    };
                    (status, contents.header, contents.entries.into_iter().collect())
                }
                Err(e) if e.is_corruption() => {
                    warn!(
                        target: "tokenscan::tree",
                        path = %file.path().display(),
                        error = %e,
                        "Store file unreadable, starting empty"
                    );
                    let header = if read_only {
                        fresh
                    } else {
                        file.write(&fresh, std::iter::empty())?
                    };
                    (OpenStatus::Invalid(e.to_string()), header, BTreeMap::new())
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(IndexTree {
            entity_type,
            file: Some(file),
            read_only,
            status,
            state: Arc::new(RwLock::new(TreeState {
                entries: Arc::new(entries),
                header,
                closed: false,
            })),
            writer_active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Empty writable tree with no backing file
    pub fn in_memory(entity_type: EntityType) -> Self {
        IndexTree {
            entity_type,
            file: None,
            read_only: false,
            status: OpenStatus::Missing,
            state: Arc::new(RwLock::new(TreeState {
                entries: Arc::new(BTreeMap::new()),
                header: StoreHeader::new(entity_type),
                closed: false,
            })),
            writer_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// What open found on disk
    pub fn status(&self) -> &OpenStatus {
        &self.status
    }

    /// Entity type the tree indexes
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Backing file path, if any
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// Check if opened read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Check if the tree has no entries
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Clean flag of the last header written
    pub fn is_clean_on_disk(&self) -> bool {
        self.state.read().header.clean
    }

    /// Drop every entry and persist the empty, dirty tree
    pub fn truncate(&self) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.check_open()?;
        state.entries = Arc::new(BTreeMap::new());
        let header = state.header.with_clean(false);
        state.header = match &self.file {
            Some(file) => file.write(&header, std::iter::empty())?,
            None => StoreHeader {
                entry_count: 0,
                ..header
            },
        };
        Ok(())
    }

    /// Clear the on-disk clean flag, rewriting only the header
    pub fn mark_dirty(&self) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.check_open()?;
        if !state.header.clean {
            return Ok(());
        }
        let header = state.header.with_clean(false);
        if let Some(file) = &self.file {
            file.rewrite_header(&header)?;
        }
        state.header = header;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(TokenScanError::ReadOnly(self.entity_type.store_name()));
        }
        Ok(())
    }
}

impl RangeTree for IndexTree {
    fn seek(&self, from: RangeKey, to: RangeKey) -> Result<Box<dyn RangeCursor>> {
        let state = self.state.read();
        state.check_open()?;
        Ok(Box::new(PagedCursor {
            state: Arc::clone(&self.state),
            snapshot: Arc::clone(&state.entries),
            next: if from <= to { Some(from) } else { None },
            to,
            page: VecDeque::new(),
        }))
    }

    fn writer(&self) -> Result<Box<dyn TreeWriter>> {
        self.check_writable()?;
        self.state.read().check_open()?;
        if self
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TokenScanError::WriterAlreadyActive);
        }
        Ok(Box::new(IndexTreeWriter {
            state: Arc::clone(&self.state),
            slot: Arc::clone(&self.writer_active),
        }))
    }

    fn visit(&self, visitor: &mut dyn FnMut(RangeKey, RangeBitmap)) -> Result<()> {
        let state = self.state.read();
        state.check_open()?;
        for (key, value) in state.entries.iter() {
            visitor(*key, *value);
        }
        Ok(())
    }

    fn checkpoint(&self, clean: bool) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.check_open()?;
        let mut header = state.header.with_clean(clean);
        header.generation += 1;
        let written = match &self.file {
            Some(file) => file.write(&header, state.entries.iter().map(|(k, v)| (*k, *v)))?,
            None => StoreHeader {
                entry_count: state.entries.len() as u64,
                ..header
            },
        };
        state.header = written;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.write().closed = true;
        Ok(())
    }
}

/// Smallest key strictly greater than `key`
fn successor(key: RangeKey) -> Option<RangeKey> {
    if key.range_id < u64::MAX {
        Some(RangeKey::new(key.token_id, key.range_id + 1))
    } else if key.token_id < u32::MAX {
        Some(RangeKey::new(key.token_id + 1, 0))
    } else {
        None
    }
}

struct PagedCursor {
    /// Consulted only for the closed flag
    state: Arc<RwLock<TreeState>>,
    snapshot: Arc<BTreeMap<RangeKey, RangeBitmap>>,
    /// Where the next page starts; None once exhausted
    next: Option<RangeKey>,
    to: RangeKey,
    page: VecDeque<(RangeKey, RangeBitmap)>,
}

impl PagedCursor {
    fn fill(&mut self, from: RangeKey) -> Result<()> {
        self.state.read().check_open()?;
        self.page.extend(
            self.snapshot
                .range(from..=self.to)
                .take(CURSOR_PAGE_SIZE)
                .map(|(k, v)| (*k, *v)),
        );
        self.next = if self.page.len() < CURSOR_PAGE_SIZE {
            None
        } else {
            self.page
                .back()
                .and_then(|(last, _)| successor(*last))
                .filter(|next| *next <= self.to)
        };
        Ok(())
    }
}

impl RangeCursor for PagedCursor {
    fn next_hit(&mut self) -> Result<Option<(RangeKey, RangeBitmap)>> {
        if self.page.is_empty() {
            if let Some(from) = self.next {
                self.fill(from)?;
            }
        }
        Ok(self.page.pop_front())
    }
}

struct IndexTreeWriter {
    state: Arc<RwLock<TreeState>>,
    slot: Arc<AtomicBool>,
}

impl TreeWriter for IndexTreeWriter {
    fn merge(
        &mut self,
        key: RangeKey,
        merge: &mut dyn FnMut(Option<RangeBitmap>) -> Option<RangeBitmap>,
    ) -> Result<()> {
        let mut state = self.state.write();
        state.check_open()?;
        let existing = state.entries.get(&key).copied();
        let merged = merge(existing).filter(|value| !value.is_empty());
        if merged == existing {
            return Ok(());
        }
        let entries = Arc::make_mut(&mut state.entries);
        match merged {
            Some(value) => {
                entries.insert(key, value);
            }
            None => {
                entries.remove(&key);
            }
        }
        Ok(())
    }
}

impl Drop for IndexTreeWriter {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
    }
}
