//! Configuration loading
//!
//! Settings come from a TOML file. The lookup order is an explicit path given
//! on the command line, then `<config dir>/papertape/config.toml`, then the
//! built-in defaults. Every section is optional.

use crate::error::{PapertapeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub archive: ArchiveConfig,
    pub verify: VerifyConfig,
    pub catalog: CatalogConfig,
}

/// Changer and drive access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub changer_device: String,
    pub mtx_program: String,
    pub mt_program: String,
    /// Device node for a drive, `{drive}` is replaced by the drive index
    pub device_template: String,
    pub drive_count: usize,
    pub lock_dir: PathBuf,
    pub mount_attempts: u32,
    pub command_timeout_secs: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            changer_device: "/dev/changer".to_string(),
            mtx_program: "mtx".to_string(),
            mt_program: "mt".to_string(),
            device_template: "/dev/nst{drive}".to_string(),
            drive_count: 2,
            lock_dir: PathBuf::from("/var/lock/papertape"),
            mount_attempts: 3,
            command_timeout_secs: 3600,
        }
    }
}

impl LibraryConfig {
    pub fn device_path(&self, drive: usize) -> PathBuf {
        PathBuf::from(self.device_template.replace("{drive}", &drive.to_string()))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    DiskQueue,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    Buffered,
    Fast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub mode: WriteMode,
    pub commit: CommitMode,
    pub data_root: PathBuf,
    pub queue_dir: PathBuf,
    pub stage_dir: PathBuf,
    pub buffer_limit_bytes: u64,
    pub batch_size_bytes: u64,
    pub tar_program: String,
    pub poll_interval_millis: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            mode: WriteMode::DiskQueue,
            commit: CommitMode::Buffered,
            data_root: PathBuf::from("/papertape"),
            queue_dir: PathBuf::from("/papertape/queue"),
            stage_dir: PathBuf::from("/papertape/shm"),
            buffer_limit_bytes: 16 * 1024 * 1024 * 1024,
            batch_size_bytes: 15_000 * 1024 * 1024,
            tar_program: "tar".to_string(),
            poll_interval_millis: 5000,
        }
    }
}

impl ArchiveConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub checksum: crate::hash::ChecksumAlgorithm,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            checksum: crate::hash::ChecksumAlgorithm::Md5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
    /// One prefix per drive; pair selection takes the lowest free label of each
    pub label_prefixes: Vec<String>,
    /// Catalog updates that failed after a tape was written, one JSON object per line
    pub reconciliation_log: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/papertape/catalog.json"),
            label_prefixes: vec!["H0C1".to_string(), "H0C2".to_string()],
            reconciliation_log: PathBuf::from("/papertape/reconcile.jsonl"),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when none is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("No configuration file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PapertapeError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| PapertapeError::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("papertape").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.library.drive_count == 0 {
            return Err(PapertapeError::config("library.drive_count must be at least 1"));
        }
        if self.library.mount_attempts == 0 {
            return Err(PapertapeError::config("library.mount_attempts must be at least 1"));
        }
        if !self.library.device_template.contains("{drive}") {
            return Err(PapertapeError::config(
                "library.device_template must contain {drive}",
            ));
        }
        Ok(())
    }
}
