//! Lazy ascending sequences of entity ids
//!
//! Every query of the store answers with an `EntityIdSequence`: forward-only,
//! finite, not restartable and ascending without duplicates. Sequences that
//! hold tree cursors release them once exhausted or closed.

use std::sync::Arc;

use parking_lot::Mutex;
use tokenscan_core::{EntityId, RangeCursor, Result};

/// Shared slot holding an open cursor until it is released
pub(crate) type CursorSlot = Arc<Mutex<Option<Box<dyn RangeCursor>>>>;

/// Ascending stream of entity ids
pub trait EntityIdSequence: Send {
    /// Next id, `None` once exhausted
    fn next_id(&mut self) -> Result<Option<EntityId>>;

    /// Release held resources; further `next_id` calls return `None`
    ///
    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Adapt into an `Iterator` of `Result<EntityId>`
    fn into_ids(self) -> SequenceIter<Self>
    where
        Self: Sized,
    {
        SequenceIter {
            sequence: self,
            done: false,
        }
    }
}

impl<S: EntityIdSequence + ?Sized> EntityIdSequence for Box<S> {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        (**self).next_id()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Iterator adapter returned by [`EntityIdSequence::into_ids`]
///
/// Stops after the first error.
pub struct SequenceIter<S> {
    sequence: S,
    done: bool,
}

impl<S: EntityIdSequence> Iterator for SequenceIter<S> {
    type Item = Result<EntityId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.sequence.next_id() {
            Ok(Some(id)) => Some(Ok(id)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Drain `sequence` into a vector and close it
pub fn collect_ids(sequence: &mut dyn EntityIdSequence) -> Result<Vec<EntityId>> {
    let mut ids = Vec::new();
    while let Some(id) = sequence.next_id()? {
        ids.push(id);
    }
    sequence.close()?;
    Ok(ids)
}

/// Sequence over ids already in memory
#[derive(Debug, Clone, Default)]
pub struct ArraySequence {
    ids: Vec<EntityId>,
    position: usize,
}

impl ArraySequence {
    /// Sequence yielding `ids` in the given order
    pub fn new(ids: impl Into<Vec<EntityId>>) -> Self {
        ArraySequence {
            ids: ids.into(),
            position: 0,
        }
    }

    /// Sequence with no ids
    pub fn empty() -> Self {
        Self::default()
    }
}

impl EntityIdSequence for ArraySequence {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        let id = self.ids.get(self.position).copied();
        if id.is_some() {
            self.position += 1;
        }
        Ok(id)
    }

    fn close(&mut self) -> Result<()> {
        self.position = self.ids.len();
        Ok(())
    }
}
