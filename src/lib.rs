//! tokenscan - token scan store for graph databases
//!
//! A token scan store answers "which entities carry token T" (nodes by label,
//! relationships by type) by keeping, per token, 64-bit presence bitmaps over
//! fixed ranges of entity ids.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokenscan::{EntityTokenUpdate, EntityType, HealthFlag, TokenScanStore, UpdatesChangeStream};
//!
//! let store = TokenScanStore::open(
//!     "/var/lib/graph",
//!     EntityType::Node,
//!     Arc::new(UpdatesChangeStream::default()),
//!     Arc::new(HealthFlag::new()),
//! )?;
//!
//! let mut writer = store.new_writer()?;
//! writer.write(&EntityTokenUpdate::added(42, &[1, 7]))?;
//! writer.close()?;
//!
//! let reader = store.new_reader()?;
//! let ids = tokenscan::collect_ids(&mut reader.entities_with_token(7, None)?)?;
//! store.shutdown()?;
//! ```
//!
//! # Architecture
//!
//! - `tokenscan-core`: data model, errors and collaborator traits
//! - `tokenscan-storage`: reference range tree, store file, write log
//! - `tokenscan-engine`: store lifecycle, writer and readers

pub use tokenscan_core::*;
pub use tokenscan_engine::*;
pub use tokenscan_storage::{
    IndexTree, OpenStatus, StoreFile, StoreHeader, WriteLog, WriteLogKind, WriteLogRecord,
};
