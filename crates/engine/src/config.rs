//! Store configuration via `tokenscan.toml`
//!
//! The file is optional; when absent every setting takes its default. To
//! change settings, edit the file in the store directory and restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokenscan_core::{Result, TokenScanError};

/// Config file name placed in the store directory.
pub const CONFIG_FILE_NAME: &str = "tokenscan.toml";

/// Default number of pending keys before the writer flushes
pub const DEFAULT_WRITER_BATCH_SIZE: usize = 1000;

/// Default write log segment size before rotation (16 MiB)
pub const DEFAULT_ROTATION_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default age after which closed write log segments are pruned (7 days)
pub const DEFAULT_PRUNE_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Smallest accepted rotation threshold
pub const MIN_ROTATION_THRESHOLD: u64 = 1024;

/// Write log settings, the `[write_log]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteLogConfig {
    /// Record every merge the writer performs
    #[serde(default)]
    pub enabled: bool,
    /// Segment directory; relative paths resolve against the store directory
    #[serde(default = "default_write_log_dir")]
    pub directory: PathBuf,
    /// Segment size that triggers rotation
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold_bytes: u64,
    /// Closed segments older than this are pruned on rotation
    #[serde(default = "default_prune_age_secs")]
    pub prune_age_secs: u64,
}

fn default_write_log_dir() -> PathBuf {
    PathBuf::from("writelog")
}

fn default_rotation_threshold() -> u64 {
    DEFAULT_ROTATION_THRESHOLD
}

fn default_prune_age_secs() -> u64 {
    DEFAULT_PRUNE_AGE_SECS
}

fn default_writer_batch_size() -> usize {
    DEFAULT_WRITER_BATCH_SIZE
}

impl Default for WriteLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_write_log_dir(),
            rotation_threshold_bytes: DEFAULT_ROTATION_THRESHOLD,
            prune_age_secs: DEFAULT_PRUNE_AGE_SECS,
        }
    }
}

impl WriteLogConfig {
    /// Prune age as a `Duration`
    pub fn prune_age(&self) -> Duration {
        Duration::from_secs(self.prune_age_secs)
    }

    /// Directory resolved against `base`
    pub fn resolve_directory(&self, base: &Path) -> PathBuf {
        if self.directory.is_absolute() {
            self.directory.clone()
        } else {
            base.join(&self.directory)
        }
    }
}

/// Token scan store configuration loaded from `tokenscan.toml`.
///
/// # Example
///
/// ```toml
/// read_only = false
/// writer_batch_size = 1000
/// enable_relationship_type_scan_store = true
///
/// [write_log]
/// enabled = true
/// rotation_threshold_bytes = 16777216
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanStoreConfig {
    /// Open the store without ever writing to it
    #[serde(default)]
    pub read_only: bool,
    /// Pending keys that trigger a writer flush
    #[serde(default = "default_writer_batch_size")]
    pub writer_batch_size: usize,
    /// Maintain the relationship type scan store; when off the relationship
    /// store is empty and its file is deleted
    #[serde(default)]
    pub enable_relationship_type_scan_store: bool,
    /// Write monitor log
    #[serde(default)]
    pub write_log: WriteLogConfig,
}

impl Default for ScanStoreConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            writer_batch_size: DEFAULT_WRITER_BATCH_SIZE,
            enable_relationship_type_scan_store: false,
            write_log: WriteLogConfig::default(),
        }
    }
}

impl ScanStoreConfig {
    /// Small batches, write log off
    pub fn for_testing() -> Self {
        Self {
            writer_batch_size: 8,
            ..Self::default()
        }
    }

    /// Set read-only mode
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the writer batch size
    pub fn with_writer_batch_size(mut self, size: usize) -> Self {
        self.writer_batch_size = size;
        self
    }

    /// Turn the relationship type scan store on or off
    pub fn with_relationship_type_scan_store(mut self, enabled: bool) -> Self {
        self.enable_relationship_type_scan_store = enabled;
        self
    }

    /// Enable the write log in `directory`
    pub fn with_write_log(mut self, directory: impl Into<PathBuf>) -> Self {
        self.write_log.enabled = true;
        self.write_log.directory = directory.into();
        self
    }

    /// Set the write log rotation threshold
    pub fn with_rotation_threshold(mut self, bytes: u64) -> Self {
        self.write_log.rotation_threshold_bytes = bytes;
        self
    }

    /// Set the write log prune age
    pub fn with_prune_age(mut self, age: Duration) -> Self {
        self.write_log.prune_age_secs = age.as_secs();
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a zero batch size or a rotation threshold below
    /// `MIN_ROTATION_THRESHOLD`.
    pub fn validate(&self) -> Result<()> {
        if self.writer_batch_size == 0 {
            return Err(TokenScanError::Config(
                "writer_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.write_log.rotation_threshold_bytes < MIN_ROTATION_THRESHOLD {
            return Err(TokenScanError::Config(format!(
                "write_log.rotation_threshold_bytes must be at least {}, got {}",
                MIN_ROTATION_THRESHOLD, self.write_log.rotation_threshold_bytes
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Token scan store configuration
#
# Open the store without writing to it. A dirty store opened read-only is
# served as is and never rebuilt.
read_only = false

# Pending range keys the writer buffers before flushing to the tree.
writer_batch_size = 1000

# Maintain the relationship type scan store. When off, relationship queries
# find nothing and an existing relationship store file is deleted at startup.
enable_relationship_type_scan_store = false

# Diagnostic log of every merge the writer performs.
[write_log]
enabled = false
directory = "writelog"
rotation_threshold_bytes = 16777216   # 16 MiB
prune_age_secs = 604800               # 7 days
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TokenScanError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            TokenScanError::Config(msg) => {
                TokenScanError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ScanStoreConfig = toml::from_str(content)
            .map_err(|e| TokenScanError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `tokenscan.toml` from `dir`, or defaults when there is none
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TokenScanError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
