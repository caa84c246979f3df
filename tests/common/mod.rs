//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use rand::Rng;
use tempfile::TempDir;

pub use tokenscan::{
    collect_ids, EntityId, EntityIdSequence, EntityTokenUpdate, EntityType, FullStoreChangeStream,
    HealthFlag, MonitorEvent, RecordingMonitor, Result, ScanStoreConfig, StoreState, TokenId,
    TokenScanError, TokenScanStore,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Change stream double
// ============================================================================

/// Mutable ground truth of entity/token associations
#[derive(Debug, Default)]
pub struct GroundTruth {
    entities: Mutex<BTreeMap<EntityId, Vec<TokenId>>>,
}

impl GroundTruth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tokens of `entity`; an empty list removes it
    pub fn set(&self, entity: EntityId, tokens: &[TokenId]) {
        let mut entities = self.entities.lock();
        if tokens.is_empty() {
            entities.remove(&entity);
        } else {
            entities.insert(entity, tokens.to_vec());
        }
    }

    /// Current tokens of `entity`
    pub fn tokens(&self, entity: EntityId) -> Vec<TokenId> {
        self.entities
            .lock()
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Ascending entities carrying `token`
    pub fn entities_with(&self, token: TokenId) -> Vec<EntityId> {
        self.entities
            .lock()
            .iter()
            .filter(|(_, tokens)| tokens.contains(&token))
            .map(|(entity, _)| *entity)
            .collect()
    }

    /// Distinct tokens in use
    pub fn all_tokens(&self) -> Vec<TokenId> {
        let mut tokens: Vec<TokenId> = self
            .entities
            .lock()
            .values()
            .flatten()
            .copied()
            .collect();
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }
}

impl FullStoreChangeStream for GroundTruth {
    fn apply_to(&self, sink: &mut dyn FnMut(EntityId, &[TokenId]) -> Result<()>) -> Result<u64> {
        let entities = self.entities.lock().clone();
        for (entity, tokens) in &entities {
            sink(*entity, tokens)?;
        }
        Ok(entities.len() as u64)
    }
}

// ============================================================================
// TestStore - store wrapper with its directory and collaborators
// ============================================================================

/// Store under test with the collaborators it was built with
pub struct TestStore {
    pub store: TokenScanStore,
    pub dir: TempDir,
    pub truth: Arc<GroundTruth>,
    pub health: Arc<HealthFlag>,
    pub monitor: Arc<RecordingMonitor>,
    pub config: ScanStoreConfig,
}

impl TestStore {
    /// Started node store in a fresh directory
    pub fn new() -> Self {
        Self::with_config(ScanStoreConfig::for_testing())
    }

    /// Started node store with `config`
    pub fn with_config(config: ScanStoreConfig) -> Self {
        let store = Self::unstarted(TempDir::new().unwrap(), Arc::new(GroundTruth::new()), config);
        store.store.init().unwrap();
        store.store.start().unwrap();
        store
    }

    /// Store built but not initialised
    pub fn unstarted(dir: TempDir, truth: Arc<GroundTruth>, config: ScanStoreConfig) -> Self {
        init_tracing();
        let health = Arc::new(HealthFlag::new());
        let monitor = Arc::new(RecordingMonitor::new());
        let store = build_store(dir.path(), &truth, &health, &monitor, config.clone());
        TestStore {
            store,
            dir,
            truth,
            health,
            monitor,
            config,
        }
    }

    /// Apply `update` through a writer and to the ground truth
    pub fn write(&self, update: EntityTokenUpdate) {
        self.truth.set(update.entity_id, &update.after);
        let mut writer = self.store.new_writer().unwrap();
        writer.write(&update).unwrap();
        writer.close().unwrap();
    }

    /// Add `tokens` to a new entity
    pub fn add(&self, entity: EntityId, tokens: &[TokenId]) {
        self.write(EntityTokenUpdate::added(entity, tokens));
    }

    /// Entities with `token` as reported by the store
    pub fn ids(&self, token: TokenId, after: Option<EntityId>) -> Vec<EntityId> {
        let reader = self.store.new_reader().unwrap();
        let mut sequence = reader.entities_with_token(token, after).unwrap();
        collect_ids(&mut sequence).unwrap()
    }

    /// Store file path
    pub fn store_file(&self) -> PathBuf {
        self.store.store_file()
    }

    /// Clean shutdown, then a new store over the same directory
    pub fn restart(self) -> Self {
        self.store.shutdown().unwrap();
        self.reopen_with(|config| config)
    }

    /// Drop the store without shutdown, then reopen
    pub fn crash_and_restart(self) -> Self {
        self.reopen_with(|config| config)
    }

    /// New store over the same directory and ground truth, initialised and
    /// started, with a fresh health signal and monitor
    pub fn reopen_with(self, adjust: impl FnOnce(ScanStoreConfig) -> ScanStoreConfig) -> Self {
        let TestStore {
            store,
            dir,
            truth,
            config,
            ..
        } = self;
        drop(store);
        let reopened = Self::unstarted(dir, truth, adjust(config));
        reopened.store.init().unwrap();
        reopened.store.start().unwrap();
        reopened
    }

    /// Same as `reopen_with` but stops before `init`
    pub fn reopen_unstarted(self) -> Self {
        let TestStore {
            store,
            dir,
            truth,
            config,
            ..
        } = self;
        drop(store);
        Self::unstarted(dir, truth, config)
    }
}

fn build_store(
    dir: &Path,
    truth: &Arc<GroundTruth>,
    health: &Arc<HealthFlag>,
    monitor: &Arc<RecordingMonitor>,
    config: ScanStoreConfig,
) -> TokenScanStore {
    TokenScanStore::new(
        dir,
        EntityType::Node,
        config,
        Arc::clone(truth) as Arc<dyn FullStoreChangeStream>,
        Arc::clone(health) as Arc<dyn tokenscan::DatabaseHealth>,
    )
    .with_monitor(Arc::clone(monitor) as Arc<dyn tokenscan::ScanStoreMonitor>)
}

// ============================================================================
// File damage
// ============================================================================

/// Overwrite random bytes of the file at `path`
pub fn scramble_file(path: &Path, rng: &mut impl Rng) {
    let mut bytes = std::fs::read(path).unwrap();
    for _ in 0..(bytes.len() / 4).max(1) {
        let index = rng.gen_range(0..bytes.len());
        bytes[index] = rng.gen();
    }
    std::fs::write(path, bytes).unwrap();
}

/// Random strictly ascending token list drawn from `0..max_token`
pub fn random_tokens(rng: &mut impl Rng, max_token: TokenId) -> Vec<TokenId> {
    (0..max_token).filter(|_| rng.gen_bool(0.3)).collect()
}
