//! CLI command implementations.

mod display;

pub mod flow;
pub mod impact;
pub mod ingest;
pub mod mismatches;
pub mod pass;
pub mod prune;
pub mod search;
pub mod stats;

use std::path::PathBuf;

use cig::{Engine, EngineConfig, RepoScope, StorageBackend};

/// Everything a command needs: the opened engine and the repository scope.
pub struct Context {
    /// Directory relative paths in the config resolve against
    pub workspace: PathBuf,
    /// Repository the command operates on
    pub scope: RepoScope,
    /// Engine over the configured store
    pub engine: Engine,
}

impl Context {
    /// Load the config and open the store it selects.
    ///
    /// An explicit `--config` must exist; the default location may be absent.
    pub async fn load(
        workspace: PathBuf,
        config_path: Option<PathBuf>,
        tenant: &str,
        repo: &str,
    ) -> cig::Result<Self> {
        let config = match config_path {
            Some(path) => EngineConfig::load(&path).await?,
            None => EngineConfig::load_or_default(&EngineConfig::default_path(&workspace)).await?,
        };

        let backend = config.storage_backend(&workspace);
        if backend == StorageBackend::InMemory {
            tracing::info!("Using the in-memory store; nothing persists past this command");
        }

        let engine = Engine::open(config, &workspace)?;
        Ok(Self {
            workspace,
            scope: RepoScope::new(tenant, repo),
            engine,
        })
    }

    /// Shorthand for the engine's store.
    pub fn store(&self) -> &dyn cig::GraphStore {
        self.engine.store()
    }

    /// Shorthand for the engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }
}
