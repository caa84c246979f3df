//! Token queries against the scan store
//!
//! A `ScanStoreReader` answers "which entities carry token T" as a lazy
//! ascending `EntityIdSequence`. The reader tracks every cursor it opens:
//! a sequence releases its cursor once exhausted or closed, and closing (or
//! dropping) the reader releases whatever is still open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use tokenscan_core::{
    range_of, BitOffsets, EntityId, RangeCursor, RangeKey, RangeTree, Result, TokenId,
    TokenScanError,
};

use crate::composite::CompositeSequence;
use crate::sequence::{CursorSlot, EntityIdSequence};

/// Reader of one scan store
pub struct ScanStoreReader {
    tree: Arc<dyn RangeTree>,
    cursors: Mutex<Vec<Weak<Mutex<Option<Box<dyn RangeCursor>>>>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ScanStoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanStoreReader")
            .field("open_cursors", &self.open_cursors())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl ScanStoreReader {
    /// Reader over `tree`
    pub fn new(tree: Arc<dyn RangeTree>) -> Self {
        ScanStoreReader {
            tree,
            cursors: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Entities carrying `token_id`, ascending
    ///
    /// With `after`, only ids strictly greater than it are produced.
    pub fn entities_with_token(
        &self,
        token_id: TokenId,
        after: Option<EntityId>,
    ) -> Result<TokenEntitySequence> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TokenScanError::illegal_state("reader is closed"));
        }
        let start_range = after.map(range_of).unwrap_or(0);
        let cursor = self.tree.seek(
            RangeKey::new(token_id, start_range),
            RangeKey::last_of(token_id),
        )?;
        let slot: CursorSlot = Arc::new(Mutex::new(Some(cursor)));

        let mut cursors = self.cursors.lock();
        cursors.retain(|weak| weak.strong_count() > 0);
        cursors.push(Arc::downgrade(&slot));

        Ok(TokenEntitySequence {
            slot,
            current: None,
            after,
        })
    }

    /// Entities carrying at least one of `tokens`
    pub fn entities_with_any_of_tokens(&self, tokens: &[TokenId]) -> Result<CompositeSequence> {
        Ok(CompositeSequence::union(self.token_sequences(tokens)?))
    }

    /// Entities carrying every one of `tokens`
    pub fn entities_with_all_of_tokens(&self, tokens: &[TokenId]) -> Result<CompositeSequence> {
        Ok(CompositeSequence::intersection(self.token_sequences(tokens)?))
    }

    fn token_sequences(&self, tokens: &[TokenId]) -> Result<Vec<Box<dyn EntityIdSequence>>> {
        tokens
            .iter()
            .map(|&token| {
                self.entities_with_token(token, None)
                    .map(|s| Box::new(s) as Box<dyn EntityIdSequence>)
            })
            .collect()
    }

    /// Cursors opened by this reader and not yet released
    pub fn open_cursors(&self) -> usize {
        self.cursors
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    /// Release every cursor still open; closing twice is a no-op
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for weak in self.cursors.lock().drain(..) {
            if let Some(slot) = weak.upgrade() {
                slot.lock().take();
            }
        }
    }
}

impl Drop for ScanStoreReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Entities of one token, produced lazily from the tree
pub struct TokenEntitySequence {
    slot: CursorSlot,
    /// Base id and remaining bits of the range being expanded
    current: Option<(EntityId, BitOffsets)>,
    after: Option<EntityId>,
}

impl EntityIdSequence for TokenEntitySequence {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        // Released by the reader while a range was still being expanded
        if self.current.is_some() && self.slot.lock().is_none() {
            self.current = None;
        }
        loop {
            if let Some((base, offsets)) = self.current.as_mut() {
                for offset in offsets.by_ref() {
                    let id = *base + u64::from(offset);
                    if self.after.map_or(true, |after| id > after) {
                        return Ok(Some(id));
                    }
                }
                self.current = None;
            }

            let hit = {
                let mut slot = self.slot.lock();
                let cursor = match slot.as_mut() {
                    Some(cursor) => cursor,
                    None => return Ok(None),
                };
                match cursor.next_hit() {
                    Ok(Some(hit)) => hit,
                    Ok(None) => {
                        slot.take();
                        return Ok(None);
                    }
                    Err(e) => {
                        slot.take();
                        return Err(e);
                    }
                }
            };
            let (key, bitmap) = hit;
            self.current = Some((key.base_entity(), bitmap.offsets()));
        }
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        self.slot.lock().take();
        Ok(())
    }
}

impl Drop for TokenEntitySequence {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}
