//! Storage layer for the token scan store
//!
//! This crate implements the persistence side of the store:
//! - IndexTree: ordered in-memory range tree with whole-file checkpoints
//! - Store file format: header with the clean/dirty flag, checksummed body
//! - WriteLog: optional segmented log of every merge the writer performs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod tree;
pub mod write_log;

pub use format::{StoreContents, StoreFile, StoreFileError, StoreHeader};
pub use tree::{IndexTree, OpenStatus, CURSOR_PAGE_SIZE};
pub use write_log::{WriteLog, WriteLogError, WriteLogKind, WriteLogRecord};
