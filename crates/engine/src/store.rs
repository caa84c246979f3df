//! Token scan store lifecycle
//!
//! `TokenScanStore` owns the tree of one entity type and drives it through
//! its lifecycle:
//!
//! ```text
//! Closed -> Init -> Checking -> Clean | Dirty -> (Rebuilding) -> Started -> Shutdown -> Closed
//! ```
//!
//! # Recovery
//!
//! A store file that is missing, unreadable or lacks the clean flag is dirty.
//! A writable dirty store is truncated and rebuilt from the full-store change
//! stream on `start`. The clean flag is only ever written by a healthy
//! shutdown; a writable store rewrites its header as dirty right after init so
//! a crash before the next clean shutdown is detected.
//!
//! # Relationship store toggle
//!
//! Unless `enable_relationship_type_scan_store` is set, a relationship store
//! is served empty: readers find nothing, writers discard their updates and a
//! leftover store file is deleted at init. A read-only store cannot delete
//! the file, so init fails instead and leaves it in place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use tokenscan_core::{
    DatabaseHealth, EmptyChangeStream, EntityTokenUpdate, EntityType, FullStoreChangeStream,
    RangeTree, Result, TokenScanError,
};
use tokenscan_storage::{IndexTree, OpenStatus, WriteLog};

use crate::all_entries::AllEntriesReader;
use crate::config::ScanStoreConfig;
use crate::consistency::{check_consistency, ConsistencyReport};
use crate::monitor::{LoggingMonitor, ScanStoreMonitor};
use crate::reader::ScanStoreReader;
use crate::writer::{DiscardingTreeWriter, ScanStoreWriter};

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Not initialised, or shut down
    Closed,
    /// Initialisation in progress
    Init,
    /// Inspecting the store file
    Checking,
    /// Contents trusted
    Clean,
    /// Contents not trusted
    Dirty,
    /// Rebuild from the change stream in progress
    Rebuilding,
    /// Serving readers and writers
    Started,
    /// Shutdown in progress
    Shutdown,
}

struct StoreInner {
    state: StoreState,
    tree: Option<Arc<IndexTree>>,
    needs_rebuild: bool,
    write_log: Option<Arc<WriteLog>>,
}

/// Scan store of one entity type
pub struct TokenScanStore {
    entity_type: EntityType,
    dir: PathBuf,
    config: ScanStoreConfig,
    change_stream: Arc<dyn FullStoreChangeStream>,
    health: Arc<dyn DatabaseHealth>,
    monitor: Arc<dyn ScanStoreMonitor>,
    inner: Mutex<StoreInner>,
    /// Set while a writer handed out by this store is open
    writer_open: Arc<AtomicBool>,
}

impl std::fmt::Debug for TokenScanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenScanStore")
            .field("entity_type", &self.entity_type)
            .field("dir", &self.dir)
            .field("state", &self.state())
            .finish()
    }
}

impl TokenScanStore {
    /// Store for `entity_type` in `dir`; nothing is touched before `init`
    pub fn new(
        dir: impl Into<PathBuf>,
        entity_type: EntityType,
        config: ScanStoreConfig,
        change_stream: Arc<dyn FullStoreChangeStream>,
        health: Arc<dyn DatabaseHealth>,
    ) -> Self {
        TokenScanStore {
            entity_type,
            dir: dir.into(),
            config,
            change_stream,
            health,
            monitor: Arc::new(LoggingMonitor),
            inner: Mutex::new(StoreInner {
                state: StoreState::Closed,
                tree: None,
                needs_rebuild: false,
                write_log: None,
            }),
            writer_open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report lifecycle events to `monitor` instead of the log
    pub fn with_monitor(mut self, monitor: Arc<dyn ScanStoreMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Load `tokenscan.toml` from `dir`, then init and start the store
    pub fn open(
        dir: impl Into<PathBuf>,
        entity_type: EntityType,
        change_stream: Arc<dyn FullStoreChangeStream>,
        health: Arc<dyn DatabaseHealth>,
    ) -> Result<Self> {
        let dir = dir.into();
        let config = ScanStoreConfig::load_from_dir(&dir)?;
        let store = Self::new(dir, entity_type, config, change_stream, health);
        store.init()?;
        store.start()?;
        Ok(store)
    }

    /// Entity type the store indexes
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Effective configuration
    pub fn config(&self) -> &ScanStoreConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> StoreState {
        self.inner.lock().state
    }

    /// Path of the store file
    pub fn store_file(&self) -> PathBuf {
        self.dir.join(self.entity_type.store_file_name())
    }

    /// Files making up the store; none while the store is turned off
    pub fn store_files(&self) -> Vec<PathBuf> {
        if self.is_enabled() {
            vec![self.store_file()]
        } else {
            Vec::new()
        }
    }

    /// False for a relationship store with the toggle off
    pub fn is_enabled(&self) -> bool {
        self.entity_type != EntityType::Relationship
            || self.config.enable_relationship_type_scan_store
    }

    /// True while the contents are not trusted
    ///
    /// A writable store stops being dirty once rebuilt by `start`; a read-only
    /// store opened dirty stays dirty.
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().needs_rebuild
    }

    /// Check if the store was configured read-only
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Open the store file and decide whether it needs a rebuild
    ///
    /// # Errors
    ///
    /// `StoreNotFound` for a read-only store without a file, `Config` for an
    /// invalid configuration, `Io` on file system failures. `IllegalState`
    /// for a read-only relationship store turned off while its file exists.
    /// A failed init leaves the store `Closed`.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != StoreState::Closed {
            return Err(TokenScanError::illegal_state(format!(
                "{} cannot be initialised in state {:?}",
                self.entity_type.store_name(),
                inner.state
            )));
        }
        self.config.validate()?;
        self.monitor.init(self.entity_type);
        inner.state = StoreState::Init;

        let opened = if self.is_enabled() {
            self.open_tree(&mut inner)
        } else {
            self.open_emptying(&mut inner)
        };
        match opened {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.state = StoreState::Closed;
                inner.tree = None;
                inner.write_log = None;
                Err(e)
            }
        }
    }

    fn open_tree(&self, inner: &mut StoreInner) -> Result<()> {
        let read_only = self.config.read_only;
        if !read_only {
            std::fs::create_dir_all(&self.dir)?;
        }

        inner.state = StoreState::Checking;
        let path = self.store_file();
        let tree = IndexTree::open(&path, self.entity_type, read_only)?;
        match tree.status() {
            OpenStatus::Missing => self.monitor.no_index(self.entity_type, &path),
            OpenStatus::Invalid(reason) => {
                self.monitor.not_valid_index(self.entity_type, &path, reason)
            }
            OpenStatus::Dirty | OpenStatus::Clean => {}
        }

        let needs_rebuild = tree.status().needs_rebuild();
        if !read_only && !needs_rebuild {
            tree.mark_dirty()?;
        }

        if self.config.write_log.enabled && !read_only {
            let log = WriteLog::open(
                self.config.write_log.resolve_directory(&self.dir),
                self.config.write_log.rotation_threshold_bytes,
                self.config.write_log.prune_age(),
            )?;
            inner.write_log = Some(Arc::new(log));
        }

        inner.tree = Some(Arc::new(tree));
        inner.needs_rebuild = needs_rebuild;
        inner.state = if needs_rebuild {
            StoreState::Dirty
        } else {
            StoreState::Clean
        };
        Ok(())
    }

    fn open_emptying(&self, inner: &mut StoreInner) -> Result<()> {
        inner.state = StoreState::Checking;
        let path = self.store_file();
        if path.exists() {
            if self.config.read_only {
                return Err(TokenScanError::illegal_state(format!(
                    "Database was started in read only mode and with relationship type scan store turned OFF, \
                     but relationship type scan store file still exists and cannot be deleted in read only mode. \
                     Note that consistency check use read only mode. \
                     Use setting 'enable_relationship_type_scan_store' to turn relationship type scan store ON or OFF. \
                     File: {}",
                    path.display()
                )));
            }
            std::fs::remove_file(&path)?;
            info!(
                target: "tokenscan::lifecycle",
                store = self.entity_type.store_name(),
                path = %path.display(),
                "Store turned off, deleted store file"
            );
        }
        inner.tree = Some(Arc::new(IndexTree::in_memory(self.entity_type)));
        inner.needs_rebuild = false;
        inner.state = StoreState::Clean;
        Ok(())
    }

    /// Rebuild a dirty writable store, then start serving
    ///
    /// # Errors
    ///
    /// Propagates rebuild failures, including `UnsortedTokens` from the
    /// change stream; the store then stays `Dirty`.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            StoreState::Clean => {}
            StoreState::Dirty if self.config.read_only => {
                info!(
                    target: "tokenscan::lifecycle",
                    store = self.entity_type.store_name(),
                    "Read-only store is dirty, serving without rebuild"
                );
            }
            StoreState::Dirty => {
                inner.state = StoreState::Rebuilding;
                self.monitor.rebuilding(self.entity_type);
                match self.rebuild(&inner) {
                    Ok(entities) => {
                        inner.needs_rebuild = false;
                        inner.state = StoreState::Clean;
                        self.monitor.rebuilt(self.entity_type, entities);
                    }
                    Err(e) => {
                        inner.state = StoreState::Dirty;
                        return Err(e);
                    }
                }
            }
            other => {
                return Err(TokenScanError::illegal_state(format!(
                    "{} cannot be started in state {:?}",
                    self.entity_type.store_name(),
                    other
                )))
            }
        }
        inner.state = StoreState::Started;
        Ok(())
    }

    fn rebuild(&self, inner: &StoreInner) -> Result<u64> {
        let tree = inner
            .tree
            .as_ref()
            .ok_or_else(|| TokenScanError::illegal_state("store has no tree"))?;
        tree.truncate()?;

        let mut writer = self.wrap_writer(tree, inner.write_log.as_ref())?;
        let entities = self.change_stream.apply_to(&mut |entity_id, tokens| {
            writer.write(&EntityTokenUpdate::added(entity_id, tokens))
        })?;
        writer.close()?;
        tree.checkpoint(false)?;
        Ok(entities)
    }

    fn wrap_writer(
        &self,
        tree: &Arc<IndexTree>,
        write_log: Option<&Arc<WriteLog>>,
    ) -> Result<ScanStoreWriter> {
        let writer = ScanStoreWriter::new(tree.writer()?, self.config.writer_batch_size)
            .with_open_flag(Arc::clone(&self.writer_open));
        match write_log {
            Some(log) => writer.with_write_log(Arc::clone(log)),
            None => Ok(writer),
        }
    }

    fn started_tree(&self, inner: &StoreInner) -> Result<Arc<IndexTree>> {
        match (&inner.tree, inner.state) {
            (Some(tree), StoreState::Started) => Ok(Arc::clone(tree)),
            (_, state) => Err(TokenScanError::illegal_state(format!(
                "{} is not started (state {:?})",
                self.entity_type.store_name(),
                state
            ))),
        }
    }

    /// Writer for token changes
    ///
    /// # Errors
    ///
    /// `ReadOnly` on read-only stores, `WriterAlreadyActive` while another
    /// writer is open, `IllegalState` unless started.
    pub fn new_writer(&self) -> Result<ScanStoreWriter> {
        if self.config.read_only {
            return Err(TokenScanError::ReadOnly(self.entity_type.store_name()));
        }
        let inner = self.inner.lock();
        let tree = self.started_tree(&inner)?;
        if !self.is_enabled() {
            return Ok(ScanStoreWriter::new(
                Box::new(DiscardingTreeWriter),
                self.config.writer_batch_size,
            ));
        }
        self.wrap_writer(&tree, inner.write_log.as_ref())
    }

    /// Reader for token queries
    pub fn new_reader(&self) -> Result<ScanStoreReader> {
        let tree = self.started_tree(&self.inner.lock())?;
        Ok(ScanStoreReader::new(tree))
    }

    /// Scan of every entity with its tokens, grouped by range
    pub fn all_entity_token_ranges(&self) -> Result<AllEntriesReader> {
        let tree = self.started_tree(&self.inner.lock())?;
        Ok(AllEntriesReader::new(tree))
    }

    /// Compare the contents with the change stream
    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        let tree = self.started_tree(&self.inner.lock())?;
        if !self.is_enabled() {
            return check_consistency(tree, &EmptyChangeStream);
        }
        check_consistency(tree, self.change_stream.as_ref())
    }

    /// Persist current contents without marking them clean
    ///
    /// No-op on read-only stores and stores turned off.
    pub fn force(&self) -> Result<()> {
        if self.config.read_only || !self.is_enabled() {
            return Ok(());
        }
        let tree = self.started_tree(&self.inner.lock())?;
        tree.checkpoint(false)
    }

    /// Checkpoint as clean when healthy, then release the tree
    ///
    /// No-op on a store that was never initialised or already shut down.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let tree = match inner.tree.take() {
            Some(tree) => tree,
            None => return Ok(()),
        };
        inner.state = StoreState::Shutdown;

        let checkpointed = if self.config.read_only || !self.is_enabled() {
            Ok(())
        } else if !self.health.is_healthy() {
            let cause = self.health.cause();
            self.monitor
                .shutdown_without_flush(self.entity_type, cause.as_deref());
            Ok(())
        } else if inner.needs_rebuild {
            Ok(())
        } else if self.writer_open.load(Ordering::Acquire) {
            warn!(
                target: "tokenscan::lifecycle",
                store = self.entity_type.store_name(),
                "Writer still open at shutdown, store stays dirty"
            );
            tree.checkpoint(false)
        } else {
            tree.checkpoint(true).map(|()| {
                self.monitor.shutdown_checkpoint(self.entity_type);
            })
        };

        let closed = tree.close();
        if let Some(log) = inner.write_log.take() {
            if let Err(e) = log.flush() {
                warn!(target: "tokenscan::write_log", error = %e, "Failed to flush write log at shutdown");
            }
        }
        inner.needs_rebuild = false;
        inner.state = StoreState::Closed;
        checkpointed.and(closed)
    }

    /// Directory holding the store file
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
