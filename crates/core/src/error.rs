//! Error types for the token scan store
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//! Lower layers (store file, write log) define their own error enums and
//! convert into [`TokenScanError`] at the crate boundary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{EntityId, TokenId};

/// Result type alias for token scan store operations
pub type Result<T> = std::result::Result<T, TokenScanError>;

/// Which token list of an update violated the ordering contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenListSide {
    /// Tokens before the change
    Before,
    /// Tokens after the change
    After,
}

impl std::fmt::Display for TokenListSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenListSide::Before => f.write_str("before"),
            TokenListSide::After => f.write_str("after"),
        }
    }
}

/// Error types for the token scan store
#[derive(Debug, Error)]
pub enum TokenScanError {
    /// I/O error from the tree, the store file or the write log
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Token list not strictly ascending; nothing of the update was applied
    #[error(
        "unsorted {side} tokens for entity {entity_id}: {previous} followed by {next} in {tokens:?}"
    )]
    UnsortedTokens {
        /// Entity of the rejected update
        entity_id: EntityId,
        /// List that is out of order
        side: TokenListSide,
        /// Token preceding the offending one
        previous: TokenId,
        /// Offending token
        next: TokenId,
        /// Full offending list
        tokens: Vec<TokenId>,
    },

    /// Mutation attempted on a store opened read-only
    #[error("{0} is read-only")]
    ReadOnly(&'static str),

    /// A second writer was requested while one is still open
    #[error("a writer is already active on this tree")]
    WriterAlreadyActive,

    /// Store file does not exist and cannot be created
    #[error("{store} does not exist at {path}, it cannot be created in read-only mode")]
    StoreNotFound {
        /// Human readable store name
        store: &'static str,
        /// Expected store file path
        path: PathBuf,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Persisted data failed validation
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The full-store change stream failed during rebuild
    #[error("change stream error: {0}")]
    ChangeStream(String),
}

impl TokenScanError {
    /// True for ordering contract violations
    pub fn is_unsorted(&self) -> bool {
        matches!(self, TokenScanError::UnsortedTokens { .. })
    }

    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        TokenScanError::IllegalState(message.into())
    }
}
