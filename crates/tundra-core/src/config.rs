use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TundraError, TundraResult};
use crate::types::PartSize;

/// Top-level configuration (loaded from tundra.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TundraConfig {
    pub log: LogConfig,
    pub transfer: TransferConfig,
    pub storage: StorageConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// How the whole-archive checksum is produced once every part is submitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalChecksum {
    /// Combine the per-part tree hashes (single pass over the source)
    #[default]
    Compose,
    /// Rewind the source and rehash it from offset 0
    Reread,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Part size in MiB; must be a power of two, at most 4096
    pub part_size_mib: u64,
    pub final_checksum: FinalChecksum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local directory vault (default)
    #[default]
    Fs,
    /// S3-compatible endpoint
    S3,
    /// In-process, non-persistent (tests and dry runs)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend, key prefix for s3
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Vault name; archives live under `{vault}/archives/`
    pub vault: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory retrieved archives are written into
    pub base_path: PathBuf,
    /// Destination file for inventory retrievals
    pub inventory_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size_mib: 1,
            final_checksum: FinalChecksum::Compose,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("~/.local/share/tundra/vaults"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "tundra".into(),
            enforce_tls: false,
            vault: "default".into(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./tmp"),
            inventory_path: PathBuf::from("./tmp/inventory.json"),
        }
    }
}

impl TransferConfig {
    /// Validated part size
    pub fn part_size(&self) -> TundraResult<PartSize> {
        PartSize::from_mib(self.part_size_mib)
    }
}

impl TundraConfig {
    pub fn from_toml_str(s: &str) -> TundraResult<Self> {
        let config: TundraConfig =
            toml::from_str(s).map_err(|e| TundraError::Config(format!("parsing TOML: {e}")))?;
        config.transfer.part_size()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    ///
    /// Runs before any subscriber is installed, so reporting the fallback is
    /// left to the caller.
    pub fn load(path: &Path) -> TundraResult<Self> {
        if !path.exists() {
            return Ok(TundraConfig::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| TundraError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}
