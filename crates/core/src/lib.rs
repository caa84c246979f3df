//! Core types and traits for the token scan store
//!
//! This crate defines the foundational types used throughout the system:
//! - RangeKey / RangeBitmap: the packed unit of storage
//! - EntityTokenUpdate: before/after token change of one entity
//! - EntityType: node (label) or relationship (relationship type) stores
//! - TokenScanError: Error type hierarchy
//! - Traits: collaborator contracts (RangeTree, FullStoreChangeStream, DatabaseHealth)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Result, TokenListSide, TokenScanError};
pub use traits::{
    DatabaseHealth, EmptyChangeStream, FullStoreChangeStream, HealthFlag, RangeCursor, RangeTree,
    TreeWriter, UpdatesChangeStream,
};
pub use types::{
    offset_of, range_of, BitOffsets, EntityId, EntityTokenUpdate, EntityType, RangeBitmap,
    RangeKey, TokenId, RANGE_SIZE,
};
