//! Collaborator contracts of the token scan store
//!
//! The store sits on top of an ordered key/value tree, is rebuilt from an
//! authoritative change stream and consults the database health at shutdown.
//! These traits are the narrow interfaces it consumes; the workspace ships a
//! reference tree in `tokenscan-storage` and tests provide their own doubles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::error::Result;
use crate::types::{EntityId, EntityTokenUpdate, RangeBitmap, RangeKey, TokenId};

/// Ascending cursor over the hits of one seek
///
/// Dropping the cursor releases whatever the tree holds for it.
pub trait RangeCursor: Send {
    /// Next hit in key order, `None` once the seek range is exhausted
    fn next_hit(&mut self) -> Result<Option<(RangeKey, RangeBitmap)>>;
}

/// Single-writer handle of a tree
///
/// Only one writer exists per tree at a time. Dropping the writer releases
/// the tree's writer slot.
pub trait TreeWriter: Send {
    /// Read-modify-write of one key
    ///
    /// `merge` receives the stored value (if any) and returns the value to
    /// store; `None` deletes the key.
    fn merge(
        &mut self,
        key: RangeKey,
        merge: &mut dyn FnMut(Option<RangeBitmap>) -> Option<RangeBitmap>,
    ) -> Result<()>;
}

/// Ordered tree of range entries
///
/// Thread safety: seeks may run concurrently with each other and with the
/// single writer.
pub trait RangeTree: Send + Sync {
    /// Cursor over keys in `from..=to`, ascending
    fn seek(&self, from: RangeKey, to: RangeKey) -> Result<Box<dyn RangeCursor>>;

    /// Acquire the single writer
    ///
    /// # Errors
    ///
    /// Fails with `WriterAlreadyActive` while another writer is open and with
    /// `ReadOnly` on read-only trees.
    fn writer(&self) -> Result<Box<dyn TreeWriter>>;

    /// Visit every entry in key order, for structural inspection
    fn visit(&self, visitor: &mut dyn FnMut(RangeKey, RangeBitmap)) -> Result<()>;

    /// Durably persist all prior writes, recording whether the contents are clean
    fn checkpoint(&self, clean: bool) -> Result<()>;

    /// Release the tree; further use is an error
    fn close(&self) -> Result<()>;
}

/// Authoritative source of current entity/token associations
///
/// Used only by rebuild: the stream supplies every existing entity once,
/// together with its current tokens in ascending order.
pub trait FullStoreChangeStream: Send + Sync {
    /// Feed every entity to `sink`, returning the number of entities supplied
    fn apply_to(&self, sink: &mut dyn FnMut(EntityId, &[TokenId]) -> Result<()>) -> Result<u64>;
}

/// Change stream with no entities
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyChangeStream;

impl FullStoreChangeStream for EmptyChangeStream {
    fn apply_to(&self, _sink: &mut dyn FnMut(EntityId, &[TokenId]) -> Result<()>) -> Result<u64> {
        Ok(0)
    }
}

/// Change stream replaying the `after` tokens of a list of updates
#[derive(Debug, Default, Clone)]
pub struct UpdatesChangeStream {
    updates: Vec<EntityTokenUpdate>,
}

impl UpdatesChangeStream {
    /// Stream over `updates`
    pub fn new(updates: Vec<EntityTokenUpdate>) -> Self {
        UpdatesChangeStream { updates }
    }
}

impl FullStoreChangeStream for UpdatesChangeStream {
    fn apply_to(&self, sink: &mut dyn FnMut(EntityId, &[TokenId]) -> Result<()>) -> Result<u64> {
        for update in &self.updates {
            sink(update.entity_id, &update.after)?;
        }
        Ok(self.updates.len() as u64)
    }
}

/// Health of the enclosing database
pub trait DatabaseHealth: Send + Sync {
    /// False once the database has seen an unrecoverable failure
    fn is_healthy(&self) -> bool;

    /// Description of the failure, if any
    fn cause(&self) -> Option<String> {
        None
    }
}

/// Simple settable health signal
#[derive(Debug, Default)]
pub struct HealthFlag {
    panicked: AtomicBool,
    cause: OnceLock<String>,
}

impl HealthFlag {
    /// Healthy signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unrecoverable failure; the first cause wins
    pub fn panic(&self, cause: impl Into<String>) {
        let _ = self.cause.set(cause.into());
        self.panicked.store(true, Ordering::SeqCst);
    }
}

impl DatabaseHealth for HealthFlag {
    fn is_healthy(&self) -> bool {
        !self.panicked.load(Ordering::SeqCst)
    }

    fn cause(&self) -> Option<String> {
        self.cause.get().cloned()
    }
}
