//! Full scan of the store grouped by range
//!
//! `AllEntriesReader` produces one `EntityTokenRange` per range id that holds
//! any entity, ascending. It discovers the distinct token ids with successive
//! seeks and then merges one cursor per token keyed by `(range id, token id)`,
//! so each bundle lists its entities with ascending token ids.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

use smallvec::SmallVec;
use tokenscan_core::{
    EntityId, RangeBitmap, RangeCursor, RangeKey, RangeTree, Result, TokenId, RANGE_SIZE,
};

/// Token ids of one entity, inline for the common few-tokens case
pub type TokenList = SmallVec<[TokenId; 4]>;

/// Entities of one range with their tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTokenRange {
    range_id: u64,
    /// Ascending by entity id
    entities: Vec<(EntityId, TokenList)>,
}

impl EntityTokenRange {
    /// Range id of the bundle
    pub fn range_id(&self) -> u64 {
        self.range_id
    }

    /// Entities in the range carrying at least one token, ascending
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|(entity, _)| *entity)
    }

    /// Ascending tokens of `entity_id`, empty if it has none or lies elsewhere
    pub fn tokens(&self, entity_id: EntityId) -> &[TokenId] {
        match self
            .entities
            .binary_search_by_key(&entity_id, |(entity, _)| *entity)
        {
            Ok(index) => &self.entities[index].1,
            Err(_) => &[],
        }
    }

    /// Number of entities in the bundle
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the bundle holds no entity
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl std::fmt::Display for EntityTokenRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "range {}:", self.range_id)?;
        for (entity, tokens) in &self.entities {
            write!(f, " {}{:?}", entity, tokens.as_slice())?;
        }
        Ok(())
    }
}

/// Lazy scan of every `(entity, tokens)` association
pub struct AllEntriesReader {
    tree: Arc<dyn RangeTree>,
    /// One cursor per distinct token; `None` once exhausted or closed
    cursors: Vec<Option<Box<dyn RangeCursor>>>,
    /// Pending hit of each live cursor: (range, token, cursor index, bits)
    heap: BinaryHeap<Reverse<(u64, TokenId, usize, u64)>>,
    primed: bool,
    closed: bool,
}

impl AllEntriesReader {
    /// Scanner over `tree`; no cursor is opened before the first bundle
    pub fn new(tree: Arc<dyn RangeTree>) -> Self {
        AllEntriesReader {
            tree,
            cursors: Vec::new(),
            heap: BinaryHeap::new(),
            primed: false,
            closed: false,
        }
    }

    /// Upper bound on the number of entity ids the scan can report
    ///
    /// `(highest stored range id + 1) * RANGE_SIZE`, zero for an empty store.
    pub fn max_count(&self) -> Result<u64> {
        let mut highest: Option<u64> = None;
        self.tree.visit(&mut |key, _| {
            highest = Some(highest.map_or(key.range_id, |h| h.max(key.range_id)));
        })?;
        Ok(highest.map_or(0, |h| h.saturating_add(1).saturating_mul(RANGE_SIZE)))
    }

    /// Distinct token ids present in the tree, ascending
    pub fn distinct_tokens(&self) -> Result<Vec<TokenId>> {
        let end = RangeKey::new(TokenId::MAX, u64::MAX);
        let mut tokens = Vec::new();
        let mut from = Some(RangeKey::first_of(0));
        while let Some(start) = from {
            let mut cursor = self.tree.seek(start, end)?;
            from = match cursor.next_hit()? {
                Some((key, _)) => {
                    tokens.push(key.token_id);
                    key.token_id.checked_add(1).map(RangeKey::first_of)
                }
                None => None,
            };
        }
        Ok(tokens)
    }

    fn prime(&mut self) -> Result<()> {
        for token in self.distinct_tokens()? {
            let cursor = self
                .tree
                .seek(RangeKey::first_of(token), RangeKey::last_of(token))?;
            self.cursors.push(Some(cursor));
            let index = self.cursors.len() - 1;
            self.advance(index)?;
        }
        self.primed = true;
        Ok(())
    }

    fn advance(&mut self, index: usize) -> Result<()> {
        let hit = match self.cursors[index].as_mut() {
            Some(cursor) => cursor.next_hit()?,
            None => return Ok(()),
        };
        match hit {
            Some((key, bits)) => self
                .heap
                .push(Reverse((key.range_id, key.token_id, index, bits.bits()))),
            None => self.cursors[index] = None,
        }
        Ok(())
    }

    /// Next bundle, ascending by range id
    pub fn next_range(&mut self) -> Result<Option<EntityTokenRange>> {
        if self.closed {
            return Ok(None);
        }
        if !self.primed {
            self.prime()?;
        }

        let range_id = match self.heap.peek() {
            Some(Reverse((range_id, ..))) => *range_id,
            None => return Ok(None),
        };

        let mut entities: BTreeMap<EntityId, TokenList> = BTreeMap::new();
        let base = range_id * RANGE_SIZE;
        while let Some(&Reverse((range, token, index, bits))) = self.heap.peek() {
            if range != range_id {
                break;
            }
            self.heap.pop();
            for offset in RangeBitmap::new(bits).offsets() {
                entities
                    .entry(base + u64::from(offset))
                    .or_default()
                    .push(token);
            }
            self.advance(index)?;
        }

        Ok(Some(EntityTokenRange {
            range_id,
            entities: entities.into_iter().collect(),
        }))
    }

    /// Release every cursor; closing twice is a no-op
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.heap.clear();
        self.cursors.clear();
    }

    /// Cursors still held
    pub fn open_cursors(&self) -> usize {
        self.cursors.iter().filter(|c| c.is_some()).count()
    }
}

impl Iterator for AllEntriesReader {
    type Item = Result<EntityTokenRange>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_range() {
            Ok(Some(range)) => Some(Ok(range)),
            Ok(None) => None,
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl Drop for AllEntriesReader {
    fn drop(&mut self) {
        self.close();
    }
}
