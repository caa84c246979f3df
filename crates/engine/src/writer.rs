//! Buffered writer of entity token changes
//!
//! Each update is diffed into per-range bit deltas which are buffered until
//! the number of pending range keys reaches the batch size. A flush applies
//! the deltas in key order through the tree's single writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use tokenscan_core::{
    EntityId, EntityTokenUpdate, RangeBitmap, RangeKey, Result, TokenId, TokenListSide,
    TokenScanError, TreeWriter,
};
use tokenscan_storage::WriteLog;

/// Buffered set/clear bits of one range key
///
/// Composed in write order: a later add wins over an earlier remove of the
/// same bit and vice versa.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PendingDelta {
    set: RangeBitmap,
    clear: RangeBitmap,
}

impl PendingDelta {
    fn add(&mut self, bits: RangeBitmap) {
        self.set.add(bits);
        self.clear.remove(bits);
    }

    fn remove(&mut self, bits: RangeBitmap) {
        self.clear.add(bits);
        self.set.remove(bits);
    }

    fn apply(&self, existing: RangeBitmap) -> RangeBitmap {
        let mut value = existing;
        value.remove(self.clear).add(self.set);
        value
    }
}

/// Writer of token changes into a scan store
///
/// Not thread-safe; one writer exists per store at a time. Dropping an
/// unclosed writer flushes what it still buffers.
pub struct ScanStoreWriter {
    tree_writer: Option<Box<dyn TreeWriter>>,
    pending: FxHashMap<RangeKey, PendingDelta>,
    batch_size: usize,
    write_log: Option<Arc<WriteLog>>,
    /// Cleared on close so the owning store knows no writer is open
    open_flag: Option<Arc<AtomicBool>>,
    closed: bool,
}

impl std::fmt::Debug for ScanStoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanStoreWriter")
            .field("pending", &self.pending.len())
            .field("batch_size", &self.batch_size)
            .field("closed", &self.closed)
            .finish()
    }
}

impl ScanStoreWriter {
    /// Writer over `tree_writer`, flushing every `batch_size` pending keys
    pub fn new(tree_writer: Box<dyn TreeWriter>, batch_size: usize) -> Self {
        ScanStoreWriter {
            tree_writer: Some(tree_writer),
            pending: FxHashMap::default(),
            batch_size: batch_size.max(1),
            write_log: None,
            open_flag: None,
            closed: false,
        }
    }

    /// Report every merge to `log`
    pub fn with_write_log(mut self, log: Arc<WriteLog>) -> Result<Self> {
        log.session_open()?;
        self.write_log = Some(log);
        Ok(self)
    }

    /// Hold `flag` set while the writer is open
    pub fn with_open_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        self.open_flag = Some(flag);
        self
    }

    /// Number of range keys waiting for the next flush
    pub fn pending_keys(&self) -> usize {
        self.pending.len()
    }

    /// Check if the writer was closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Apply one entity's token change
    ///
    /// # Errors
    ///
    /// `UnsortedTokens` when either list is not strictly ascending; nothing of
    /// the update is applied in that case.
    pub fn write(&mut self, update: &EntityTokenUpdate) -> Result<()> {
        if self.closed {
            return Err(TokenScanError::illegal_state("writer is closed"));
        }
        check_ascending(update.entity_id, &update.before, TokenListSide::Before)?;
        check_ascending(update.entity_id, &update.after, TokenListSide::After)?;

        let entity_id = update.entity_id;
        let bit = RangeBitmap::single(entity_id);
        let (before, after) = (&update.before, &update.after);
        let (mut i, mut j) = (0, 0);
        while i < before.len() || j < after.len() {
            match (before.get(i), after.get(j)) {
                (Some(&b), Some(&a)) if b == a => {
                    i += 1;
                    j += 1;
                }
                (Some(&b), Some(&a)) if b < a => {
                    self.delta(b, entity_id).remove(bit);
                    i += 1;
                }
                (Some(&b), None) => {
                    self.delta(b, entity_id).remove(bit);
                    i += 1;
                }
                (_, Some(&a)) => {
                    self.delta(a, entity_id).add(bit);
                    j += 1;
                }
                (None, None) => break,
            }
        }

        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn delta(&mut self, token_id: TokenId, entity_id: EntityId) -> &mut PendingDelta {
        self.pending
            .entry(RangeKey::for_entity(token_id, entity_id))
            .or_default()
    }

    /// Apply all pending deltas to the tree, in key order
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let tree_writer = self
            .tree_writer
            .as_mut()
            .ok_or_else(|| TokenScanError::illegal_state("writer is closed"))?;

        let mut keys: Vec<RangeKey> = self.pending.keys().copied().collect();
        keys.sort_unstable();
        debug!(target: "tokenscan::writer", keys = keys.len(), "Flushing pending ranges");

        // a delta leaves the buffer only once the tree has taken it
        for key in keys {
            let delta = match self.pending.get(&key) {
                Some(delta) => *delta,
                None => continue,
            };
            let mut result = RangeBitmap::EMPTY;
            tree_writer.merge(key, &mut |existing| {
                result = delta.apply(existing.unwrap_or_default());
                if result.is_empty() {
                    None
                } else {
                    Some(result)
                }
            })?;
            self.pending.remove(&key);

            let logged = match &self.write_log {
                Some(log) => log.record_merge(key, delta.set, delta.clear, result),
                None => Ok(()),
            };
            if let Err(e) = logged {
                warn!(
                    target: "tokenscan::write_log",
                    error = %e,
                    "Write log append failed, logging disabled for this writer"
                );
                self.write_log = None;
            }
        }
        Ok(())
    }

    /// Flush and release the tree writer; closing twice is a no-op
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.flush();
        self.tree_writer = None;
        if let Some(flag) = self.open_flag.take() {
            flag.store(false, Ordering::Release);
        }
        if let Some(log) = self.write_log.take() {
            if let Err(e) = log.session_close() {
                warn!(target: "tokenscan::write_log", error = %e, "Failed to close write log session");
            }
        }
        flushed
    }
}

impl Drop for ScanStoreWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(target: "tokenscan::writer", error = %e, "Failed to flush writer on drop");
            }
        }
    }
}

/// Tree writer that drops every merge, backing a store that is turned off
pub(crate) struct DiscardingTreeWriter;

impl TreeWriter for DiscardingTreeWriter {
    fn merge(
        &mut self,
        _key: RangeKey,
        _merge: &mut dyn FnMut(Option<RangeBitmap>) -> Option<RangeBitmap>,
    ) -> Result<()> {
        Ok(())
    }
}

fn check_ascending(entity_id: EntityId, tokens: &[TokenId], side: TokenListSide) -> Result<()> {
    for pair in tokens.windows(2) {
        if pair[0] >= pair[1] {
            return Err(TokenScanError::UnsortedTokens {
                entity_id,
                side,
                previous: pair[0],
                next: pair[1],
                tokens: tokens.to_vec(),
            });
        }
    }
    Ok(())
}
