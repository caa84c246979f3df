//! Token scan store engine
//!
//! This crate ties the storage layer into a usable scan store:
//! - TokenScanStore: lifecycle, dirty detection and rebuild
//! - ScanStoreWriter: buffered before/after token deltas
//! - ScanStoreReader: single-token and composite (any/all) queries
//! - AllEntriesReader: full scan grouped by range
//! - ScanStoreConfig: `tokenscan.toml` configuration
//! - ScanStoreMonitor: lifecycle diagnostics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod all_entries;
pub mod composite;
pub mod config;
pub mod consistency;
pub mod monitor;
pub mod reader;
pub mod sequence;
pub mod store;
pub mod writer;

pub use all_entries::{AllEntriesReader, EntityTokenRange, TokenList};
pub use composite::{CompositeMode, CompositeSequence};
pub use config::{ScanStoreConfig, WriteLogConfig, CONFIG_FILE_NAME};
pub use consistency::{check_consistency, ConsistencyReport};
pub use monitor::{LoggingMonitor, MonitorEvent, NoopMonitor, RecordingMonitor, ScanStoreMonitor};
pub use reader::{ScanStoreReader, TokenEntitySequence};
pub use sequence::{collect_ids, ArraySequence, EntityIdSequence, SequenceIter};
pub use store::{StoreState, TokenScanStore};
pub use writer::ScanStoreWriter;
