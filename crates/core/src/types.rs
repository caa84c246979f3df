//! Range key/value model for the token scan store
//!
//! Entity ids are packed into ranges of [`RANGE_SIZE`] consecutive ids. For every
//! token that at least one entity of a range carries, the store keeps one
//! [`RangeKey`] → [`RangeBitmap`] entry whose bit `i` says whether entity
//! `range_id * RANGE_SIZE + i` carries that token.
//!
//! # Ordering
//!
//! Keys order by token id first and range id second, so all ranges of one
//! token are contiguous in the tree and ascend by entity id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a label (node stores) or relationship type (relationship stores)
pub type TokenId = u32;

/// Identifier of a node or relationship
pub type EntityId = u64;

/// Number of consecutive entity ids packed into one bitmap word
pub const RANGE_SIZE: u64 = 64;

/// Range id holding `entity_id`
#[inline]
pub fn range_of(entity_id: EntityId) -> u64 {
    entity_id / RANGE_SIZE
}

/// Bit offset of `entity_id` inside its range
#[inline]
pub fn offset_of(entity_id: EntityId) -> u32 {
    (entity_id % RANGE_SIZE) as u32
}

/// Key of one stored range: `(token id, range id)`
///
/// The derived ordering is the tree ordering: token id ascending, then range
/// id ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeKey {
    /// Token the range belongs to
    pub token_id: TokenId,
    /// Range id (`entity_id / RANGE_SIZE`)
    pub range_id: u64,
}

impl RangeKey {
    /// Create a key for `token_id` and `range_id`
    pub const fn new(token_id: TokenId, range_id: u64) -> Self {
        RangeKey { token_id, range_id }
    }

    /// Key of the range containing `entity_id` for `token_id`
    pub fn for_entity(token_id: TokenId, entity_id: EntityId) -> Self {
        RangeKey::new(token_id, range_of(entity_id))
    }

    /// Lowest possible key of a token
    pub const fn first_of(token_id: TokenId) -> Self {
        RangeKey::new(token_id, 0)
    }

    /// Highest possible key of a token
    pub const fn last_of(token_id: TokenId) -> Self {
        RangeKey::new(token_id, u64::MAX)
    }

    /// Smallest entity id covered by this range
    pub fn base_entity(&self) -> EntityId {
        self.range_id.saturating_mul(RANGE_SIZE)
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[token:{},range:{}]", self.token_id, self.range_id)
    }
}

/// 64-bit presence bitmap of one range
///
/// Merges are always full-word: [`add`](Self::add) is a bitwise OR and
/// [`remove`](Self::remove) is an AND with the complement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RangeBitmap(u64);

impl RangeBitmap {
    /// Bitmap with no bits set
    pub const EMPTY: RangeBitmap = RangeBitmap(0);

    /// Wrap a raw word
    pub const fn new(bits: u64) -> Self {
        RangeBitmap(bits)
    }

    /// Bitmap with only the bit of `entity_id` set
    pub fn single(entity_id: EntityId) -> Self {
        RangeBitmap(1u64 << offset_of(entity_id))
    }

    /// Raw word
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// OR `other` into this bitmap
    pub fn add(&mut self, other: RangeBitmap) -> &mut Self {
        self.0 |= other.0;
        self
    }

    /// Clear every bit of `other` from this bitmap
    pub fn remove(&mut self, other: RangeBitmap) -> &mut Self {
        self.0 &= !other.0;
        self
    }

    /// True when no bit is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True when the bit at `offset` is set
    pub fn contains(&self, offset: u32) -> bool {
        offset < 64 && self.0 & (1u64 << offset) != 0
    }

    /// Number of set bits
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Set bit offsets, lowest first
    pub fn offsets(&self) -> BitOffsets {
        BitOffsets(self.0)
    }
}

impl From<u64> for RangeBitmap {
    fn from(bits: u64) -> Self {
        RangeBitmap(bits)
    }
}

impl fmt::Display for RangeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#066b}", self.0)
    }
}

/// Iterator over the set bit offsets of a word, lowest first
#[derive(Debug, Clone)]
pub struct BitOffsets(u64);

impl Iterator for BitOffsets {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let offset = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for BitOffsets {}

/// Kind of entity a store indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Nodes, tokens are labels
    Node,
    /// Relationships, tokens are relationship types
    Relationship,
}

impl EntityType {
    /// File name of the store file for this entity type
    pub fn store_file_name(&self) -> &'static str {
        match self {
            EntityType::Node => "label-scan.store",
            EntityType::Relationship => "relationship-type-scan.store",
        }
    }

    /// Human readable store name used in diagnostics and errors
    pub fn store_name(&self) -> &'static str {
        match self {
            EntityType::Node => "Label scan store",
            EntityType::Relationship => "Relationship type scan store",
        }
    }

    /// Byte tag stored in the store file header
    pub fn as_tag(&self) -> u8 {
        match self {
            EntityType::Node => 0x01,
            EntityType::Relationship => 0x02,
        }
    }

    /// Parse a header tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(EntityType::Node),
            0x02 => Some(EntityType::Relationship),
            _ => None,
        }
    }
}

/// Token change of one entity, as produced by a committed transaction
///
/// Both token lists must be strictly ascending; the writer rejects anything
/// else before applying any part of the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTokenUpdate {
    /// Entity whose tokens changed
    pub entity_id: EntityId,
    /// Tokens before the change
    pub before: Vec<TokenId>,
    /// Tokens after the change
    pub after: Vec<TokenId>,
}

impl EntityTokenUpdate {
    /// Update moving `entity_id` from `before` to `after`
    pub fn token_changes(entity_id: EntityId, before: &[TokenId], after: &[TokenId]) -> Self {
        EntityTokenUpdate {
            entity_id,
            before: before.to_vec(),
            after: after.to_vec(),
        }
    }

    /// Update adding `tokens` to an entity that had none, used by rebuild
    pub fn added(entity_id: EntityId, tokens: &[TokenId]) -> Self {
        Self::token_changes(entity_id, &[], tokens)
    }
}
