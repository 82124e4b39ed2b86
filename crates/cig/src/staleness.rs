//! Staleness propagation to downstream derived artifacts.
//!
//! Documentation blocks record which symbols they were generated from. When
//! an indexing pass impacts or prunes those symbols, the blocks are marked
//! stale so they can be regenerated. The doc store may be remote, so the
//! contract is async.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::types::RepoScope;

/// Marks documentation derived from changed symbols as stale.
#[async_trait]
pub trait StalenessPropagator: Send + Sync {
    /// Mark every block whose evidence references one of `symbol_uids` as
    /// stale, excluding locked blocks. Returns the number of blocks whose
    /// state changed.
    ///
    /// # Errors
    ///
    /// `Error::Collaborator` if the doc store cannot be reached.
    async fn mark_blocks_stale_for_symbol_uids(
        &self,
        scope: &RepoScope,
        symbol_uids: &BTreeSet<String>,
    ) -> Result<usize>;
}

/// Propagator that does nothing; used when no doc store is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPropagator;

#[async_trait]
impl StalenessPropagator for NoopPropagator {
    async fn mark_blocks_stale_for_symbol_uids(
        &self,
        _scope: &RepoScope,
        _symbol_uids: &BTreeSet<String>,
    ) -> Result<usize> {
        Ok(0)
    }
}

/// Lifecycle state of a documentation block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    /// Up to date with its evidence
    #[default]
    Fresh,
    /// Evidence changed since generation
    Stale,
    /// Pinned by a human; never marked stale automatically
    Locked,
}

/// A generated documentation block and the symbols it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocBlock {
    /// Block identifier
    pub block_id: String,
    /// Symbols this block cites as evidence
    pub evidence_symbol_uids: BTreeSet<String>,
    /// Current state
    #[serde(default)]
    pub state: BlockState,
}

impl DocBlock {
    /// Create a fresh block citing `evidence`.
    pub fn new<I, S>(block_id: impl Into<String>, evidence: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            block_id: block_id.into(),
            evidence_symbol_uids: evidence.into_iter().map(Into::into).collect(),
            state: BlockState::Fresh,
        }
    }
}

/// In-process doc store, scoped per repository.
#[derive(Debug, Default)]
pub struct InMemoryDocStore {
    blocks: Mutex<HashMap<RepoScope, BTreeMap<String, DocBlock>>>,
}

impl InMemoryDocStore {
    /// Create an empty doc store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a block.
    pub async fn insert_block(&self, scope: &RepoScope, block: DocBlock) {
        self.blocks
            .lock()
            .await
            .entry(scope.clone())
            .or_default()
            .insert(block.block_id.clone(), block);
    }

    /// Fetch a block by id.
    pub async fn get_block(&self, scope: &RepoScope, block_id: &str) -> Option<DocBlock> {
        self.blocks
            .lock()
            .await
            .get(scope)
            .and_then(|blocks| blocks.get(block_id))
            .cloned()
    }
}

#[async_trait]
impl StalenessPropagator for InMemoryDocStore {
    async fn mark_blocks_stale_for_symbol_uids(
        &self,
        scope: &RepoScope,
        symbol_uids: &BTreeSet<String>,
    ) -> Result<usize> {
        if symbol_uids.is_empty() {
            return Ok(0);
        }

        let mut guard = self.blocks.lock().await;
        let Some(blocks) = guard.get_mut(scope) else {
            return Ok(0);
        };

        let mut marked = 0;
        for block in blocks.values_mut() {
            if block.state != BlockState::Fresh {
                continue;
            }
            if !block.evidence_symbol_uids.is_disjoint(symbol_uids) {
                block.state = BlockState::Stale;
                marked += 1;
            }
        }

        debug!(scope = %scope, symbols = symbol_uids.len(), marked, "Marked doc blocks stale");
        Ok(marked)
    }
}
