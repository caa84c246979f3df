//! Lifecycle diagnostics of the scan store
//!
//! The store reports what it finds and does at startup and shutdown to a
//! `ScanStoreMonitor`. All methods default to no-ops so implementations only
//! override what they care about.

use std::path::Path;

use parking_lot::Mutex;
use tokenscan_core::EntityType;
use tracing::{debug, info, warn};

/// Receiver of store lifecycle events
pub trait ScanStoreMonitor: Send + Sync {
    /// Initialisation began
    fn init(&self, _entity_type: EntityType) {}

    /// No store file was found
    fn no_index(&self, _entity_type: EntityType, _path: &Path) {}

    /// The store file could not be used
    fn not_valid_index(&self, _entity_type: EntityType, _path: &Path, _reason: &str) {}

    /// Rebuild from the change stream started
    fn rebuilding(&self, _entity_type: EntityType) {}

    /// Rebuild finished after feeding `entities` entities
    fn rebuilt(&self, _entity_type: EntityType, _entities: u64) {}

    /// Clean checkpoint written at shutdown
    fn shutdown_checkpoint(&self, _entity_type: EntityType) {}

    /// Shutdown skipped the checkpoint because the database is unhealthy
    fn shutdown_without_flush(&self, _entity_type: EntityType, _cause: Option<&str>) {}
}

/// Monitor that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl ScanStoreMonitor for NoopMonitor {}

/// Monitor reporting events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMonitor;

impl ScanStoreMonitor for LoggingMonitor {
    fn init(&self, entity_type: EntityType) {
        debug!(target: "tokenscan::lifecycle", store = entity_type.store_name(), "Initialising");
    }

    fn no_index(&self, entity_type: EntityType, path: &Path) {
        info!(
            target: "tokenscan::lifecycle",
            store = entity_type.store_name(),
            path = %path.display(),
            "No scan store found, it will be rebuilt"
        );
    }

    fn not_valid_index(&self, entity_type: EntityType, path: &Path, reason: &str) {
        warn!(
            target: "tokenscan::lifecycle",
            store = entity_type.store_name(),
            path = %path.display(),
            reason,
            "Scan store not usable, it will be rebuilt"
        );
    }

    fn rebuilding(&self, entity_type: EntityType) {
        info!(target: "tokenscan::lifecycle", store = entity_type.store_name(), "Rebuilding");
    }

    fn rebuilt(&self, entity_type: EntityType, entities: u64) {
        info!(
            target: "tokenscan::lifecycle",
            store = entity_type.store_name(),
            entities,
            "Rebuild complete"
        );
    }

    fn shutdown_checkpoint(&self, entity_type: EntityType) {
        debug!(target: "tokenscan::lifecycle", store = entity_type.store_name(), "Clean shutdown checkpoint");
    }

    fn shutdown_without_flush(&self, entity_type: EntityType, cause: Option<&str>) {
        warn!(
            target: "tokenscan::lifecycle",
            store = entity_type.store_name(),
            cause = cause.unwrap_or("unknown"),
            "Database unhealthy, shutting down without flush"
        );
    }
}

/// Event captured by `RecordingMonitor`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// `init`
    Init,
    /// `no_index`
    NoIndex,
    /// `not_valid_index`
    NotValidIndex(String),
    /// `rebuilding`
    Rebuilding,
    /// `rebuilt`
    Rebuilt(u64),
    /// `shutdown_checkpoint`
    ShutdownCheckpoint,
    /// `shutdown_without_flush`
    ShutdownWithoutFlush(Option<String>),
}

/// Monitor keeping every event in order, for embedding code and tests
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    /// Check if `event` was seen
    pub fn saw(&self, event: &MonitorEvent) -> bool {
        self.events.lock().contains(event)
    }

    /// Forget recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: MonitorEvent) {
        self.events.lock().push(event);
    }
}

impl ScanStoreMonitor for RecordingMonitor {
    fn init(&self, _entity_type: EntityType) {
        self.push(MonitorEvent::Init);
    }

    fn no_index(&self, _entity_type: EntityType, _path: &Path) {
        self.push(MonitorEvent::NoIndex);
    }

    fn not_valid_index(&self, _entity_type: EntityType, _path: &Path, reason: &str) {
        self.push(MonitorEvent::NotValidIndex(reason.to_string()));
    }

    fn rebuilding(&self, _entity_type: EntityType) {
        self.push(MonitorEvent::Rebuilding);
    }

    fn rebuilt(&self, _entity_type: EntityType, entities: u64) {
        self.push(MonitorEvent::Rebuilt(entities));
    }

    fn shutdown_checkpoint(&self, _entity_type: EntityType) {
        self.push(MonitorEvent::ShutdownCheckpoint);
    }

    fn shutdown_without_flush(&self, _entity_type: EntityType, cause: Option<&str>) {
        self.push(MonitorEvent::ShutdownWithoutFlush(cause.map(str::to_string)));
    }
}
