//! Engine configuration.
//!
//! Loaded from `.cig/config.yaml`. Every section and field has a default, so
//! an empty file (or no file at all) yields a usable in-memory engine.
//!
//! ```yaml
//! storage:
//!   backend: sqlite
//!   path: .cig/graph.db
//! impact:
//!   depth: 2
//! flow:
//!   depth: 5
//!   structural_edge_types: [Imports, Exports, Contains]
//! embedding:
//!   dimensions: 64
//! staleness:
//!   fail_on_error: false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};
use crate::flow::{DEFAULT_STRUCTURAL_EDGE_TYPES, FlowEdgeFilter};
use crate::store::StorageBackend;

/// Name of the engine's working directory
pub const CIG_DIR_NAME: &str = ".cig";

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default SQLite database location
pub const DEFAULT_DB_PATH: &str = ".cig/graph.db";

/// Default blast-radius depth for impact analysis
pub const DEFAULT_IMPACT_DEPTH: u32 = 2;

/// Default flow-graph depth
pub const DEFAULT_FLOW_DEPTH: u32 = 5;

/// Default embedding length
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 64;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage backend selection
    pub storage: StorageConfig,
    /// Impact analysis settings
    pub impact: ImpactConfig,
    /// Flow-graph materialization settings
    pub flow: FlowConfig,
    /// Embedding settings
    pub embedding: EmbeddingConfig,
    /// Staleness propagation settings
    pub staleness: StalenessConfig,
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ephemeral in-process store
    #[default]
    Memory,
    /// SQLite database file
    Sqlite,
}

/// Storage configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind
    pub backend: BackendKind,
    /// Database path for the SQLite backend
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

/// Impact analysis section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// Blast-radius depth around changed symbols
    pub depth: u32,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_IMPACT_DEPTH,
        }
    }
}

/// Flow-graph section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Materialization depth
    pub depth: u32,
    /// Edge types that are not followed when building flow graphs
    pub structural_edge_types: Vec<String>,
}

impl FlowConfig {
    /// The flow-edge predicate described by this section.
    #[must_use]
    pub fn edge_filter(&self) -> FlowEdgeFilter {
        FlowEdgeFilter::new(&self.structural_edge_types)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_FLOW_DEPTH,
            structural_edge_types: DEFAULT_STRUCTURAL_EDGE_TYPES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Embedding section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Fixed vector length, enforced on ingestion
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Staleness propagation section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Fail the pass when the doc store cannot be updated
    pub fail_on_error: bool,
}

impl EngineConfig {
    /// Default config file location relative to `base_dir`.
    #[must_use]
    pub fn default_path(base_dir: &Path) -> PathBuf {
        base_dir.join(CIG_DIR_NAME).join(CONFIG_FILE_NAME)
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the YAML is invalid.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the file cannot be read, `Error::Config` if it is
    /// invalid.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a file, or the defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`], except a missing file is not an error.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await? {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file, creating parent directories.
    ///
    /// # Errors
    ///
    /// `Error::Config` if serialization fails, `Error::Io` on write failure.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        Ok(())
    }

    /// The storage backend this configuration selects.
    ///
    /// A relative SQLite path is resolved against `base_dir`.
    #[must_use]
    pub fn storage_backend(&self, base_dir: &Path) -> StorageBackend {
        match self.storage.backend {
            BackendKind::Memory => StorageBackend::InMemory,
            BackendKind::Sqlite if self.storage.path.is_absolute() => {
                StorageBackend::Sqlite(self.storage.path.clone())
            }
            BackendKind::Sqlite => StorageBackend::Sqlite(base_dir.join(&self.storage.path)),
        }
    }
}
