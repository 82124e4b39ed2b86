//! Indexing pass orchestration.
//!
//! One [`Engine::run_pass`] call handles one job from the external worker:
//!
//! 1. decode, embed and validate the records (no side effects)
//! 2. prune the graph for removed files
//! 3. ingest the batch atomically
//! 4. (incremental only) compute impact around the changed files
//! 5. recompute dependency mismatches for the sha (best-effort)
//! 6. rematerialize every entrypoint's flow graph
//! 7. append the pass diagnostic
//! 8. mark doc blocks citing impacted or pruned symbols stale
//!
//! The caller holds the per-repository lease for the duration of the pass;
//! the engine does not serialize passes on the same scope itself.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use crate::error::Result;
use crate::flow::{FlowGraphMaterializer, MaterializeSummary};
use crate::impact::{ImpactAnalyzer, ImpactReport};
use crate::ingest::{IngestSummary, IngestionPipeline};
use crate::mismatch;
use crate::records::IngestionRecord;
use crate::staleness::{NoopPropagator, StalenessPropagator};
use crate::store::{GraphStore, PruneStats, create_store};
use crate::types::{IndexDiagnostic, IndexMode, RepoScope, SearchHit};

/// One unit of indexing work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexJob {
    /// Repository being indexed
    pub scope: RepoScope,
    /// Commit the records describe
    pub sha: String,
    /// Full or incremental pass
    pub mode: IndexMode,
    /// Files added or modified by the push
    pub changed_files: Vec<String>,
    /// Files deleted by the push
    pub removed_files: Vec<String>,
}

impl IndexJob {
    /// A full pass with no change set.
    pub fn full(scope: RepoScope, sha: impl Into<String>) -> Self {
        Self {
            scope,
            sha: sha.into(),
            mode: IndexMode::Full,
            changed_files: Vec::new(),
            removed_files: Vec::new(),
        }
    }

    /// An incremental pass over `changed_files` and `removed_files`.
    pub fn incremental(
        scope: RepoScope,
        sha: impl Into<String>,
        changed_files: Vec<String>,
        removed_files: Vec<String>,
    ) -> Self {
        Self {
            scope,
            sha: sha.into(),
            mode: IndexMode::Incremental,
            changed_files,
            removed_files,
        }
    }
}

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    /// Repository indexed
    pub scope: RepoScope,
    /// Commit indexed
    pub sha: String,
    /// Pass mode
    pub mode: IndexMode,
    /// Rows removed for deleted files
    pub pruned: PruneStats,
    /// Node embeddings computed from `embedding_text`
    pub embedded_nodes: usize,
    /// Ingestion counts
    pub ingested: IngestSummary,
    /// Impact of the change set; `None` for full passes
    pub impact: Option<ImpactReport>,
    /// Mismatches stored for the sha; `None` if recomputation was skipped or failed
    pub mismatches: Option<usize>,
    /// Flow graphs rebuilt
    pub flow_graphs: MaterializeSummary,
    /// Doc blocks newly marked stale
    pub stale_blocks: usize,
    /// The audit record appended for this pass
    pub diagnostic: IndexDiagnostic,
}

/// Code-intelligence engine: a store plus its collaborators.
pub struct Engine {
    store: Box<dyn GraphStore>,
    config: EngineConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    staleness: Arc<dyn StalenessPropagator>,
}

impl Engine {
    /// Create an engine over `store`.
    ///
    /// Uses the hashing embedder at the configured dimension and no doc store.
    pub fn new(store: Box<dyn GraphStore>, config: EngineConfig) -> Self {
        let embedder = Arc::new(HashEmbeddingProvider::new(config.embedding.dimensions));
        Self {
            store,
            config,
            embedder,
            staleness: Arc::new(NoopPropagator),
        }
    }

    /// Create an engine with the store selected by `config`.
    ///
    /// # Errors
    ///
    /// Store open errors.
    pub fn open(config: EngineConfig, base_dir: &Path) -> Result<Self> {
        let store = create_store(&config.storage_backend(base_dir))?;
        Ok(Self::new(store, config))
    }

    /// Replace the embedding provider.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = embedder;
        self
    }

    /// Attach a doc store for staleness propagation.
    #[must_use]
    pub fn with_staleness(mut self, staleness: Arc<dyn StalenessPropagator>) -> Self {
        self.staleness = staleness;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ingestion pipeline enforcing the configured embedding length.
    pub fn pipeline(&self) -> IngestionPipeline<'_> {
        IngestionPipeline::new(self.store())
            .with_embedding_dimensions(self.config.embedding.dimensions)
    }

    /// Run one indexing pass.
    ///
    /// # Errors
    ///
    /// - Record decode/validation errors fail the pass before anything is
    ///   written.
    /// - Store errors while ingesting fail the pass after the prune has been
    ///   committed.
    /// - Mismatch recomputation failures are logged and skipped.
    /// - Staleness failures fail the pass only when
    ///   `staleness.fail_on_error` is set.
    #[instrument(
        skip(self, job, records),
        fields(scope = %job.scope, sha = %job.sha, mode = job.mode.as_str())
    )]
    pub async fn run_pass(&self, job: &IndexJob, records: Vec<Value>) -> Result<PassReport> {
        let scope = &job.scope;

        let mut records = IngestionPipeline::decode(records)?;
        let embedded_nodes = self.embed_missing(&mut records).await?;
        let received = records.len();
        let pipeline = self.pipeline();
        let batch = pipeline.prepare(records)?;

        let pruned = if job.removed_files.is_empty() {
            PruneStats::default()
        } else {
            self.store.delete_graph_for_file_paths(scope, &job.removed_files)?
        };

        let ingested = pipeline.apply_prepared(scope, received, &batch)?;

        let impact = match job.mode {
            IndexMode::Incremental => Some(ImpactAnalyzer::new(self.store()).compute_impact(
                scope,
                &job.changed_files,
                self.config.impact.depth,
            )?),
            IndexMode::Full => None,
        };

        let mismatches = if ingested.written.mismatches > 0 {
            debug!("Batch carried precomputed mismatches, skipping recomputation");
            None
        } else {
            match mismatch::recompute(self.store(), scope, &job.sha) {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!(error = %e, "Dependency mismatch recomputation failed");
                    None
                }
            }
        };

        let flow_graphs = FlowGraphMaterializer::new(self.store())
            .with_filter(self.config.flow.edge_filter())
            .materialize_all(scope, &job.sha, self.config.flow.depth)?;

        let diagnostic = build_diagnostic(job, impact.as_ref());
        self.store.add_index_diagnostic(scope, diagnostic.clone())?;

        let mut stale_uids: BTreeSet<String> =
            diagnostic.impacted_symbol_uids.iter().cloned().collect();
        stale_uids.extend(pruned.removed_symbol_uids.iter().cloned());
        let stale_blocks = self.propagate_staleness(scope, &stale_uids).await?;

        info!(
            pruned_nodes = pruned.nodes(),
            ingested = ingested.written.total(),
            impacted = diagnostic.impacted_symbol_uids.len(),
            flow_graphs = flow_graphs.materialized.len(),
            stale_blocks,
            "Indexing pass complete"
        );

        Ok(PassReport {
            scope: scope.clone(),
            sha: job.sha.clone(),
            mode: job.mode,
            pruned,
            embedded_nodes,
            ingested,
            impact,
            mismatches,
            flow_graphs,
            stale_blocks,
            diagnostic,
        })
    }

    /// Embed `text` and return the nearest nodes.
    ///
    /// # Errors
    ///
    /// Embedding provider or store errors.
    pub async fn semantic_search(
        &self,
        scope: &RepoScope,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let query = self.embedder.embed(text).await?;
        self.store.semantic_search(scope, &query, limit)
    }

    async fn embed_missing(&self, records: &mut [IngestionRecord]) -> Result<usize> {
        let mut embedded = 0;
        for record in records.iter_mut() {
            if let IngestionRecord::Node(node) = record
                && node.embedding.is_none()
                && let Some(text) = node.embedding_text.as_deref()
            {
                node.embedding = Some(self.embedder.embed(text).await?);
                embedded += 1;
            }
        }
        Ok(embedded)
    }

    async fn propagate_staleness(
        &self,
        scope: &RepoScope,
        symbol_uids: &BTreeSet<String>,
    ) -> Result<usize> {
        if symbol_uids.is_empty() {
            return Ok(0);
        }
        match self
            .staleness
            .mark_blocks_stale_for_symbol_uids(scope, symbol_uids)
            .await
        {
            Ok(count) => Ok(count),
            Err(e) if self.config.staleness.fail_on_error => Err(e),
            Err(e) => {
                warn!(error = %e, symbols = symbol_uids.len(), "Staleness propagation failed");
                Ok(0)
            }
        }
    }
}

fn build_diagnostic(job: &IndexJob, impact: Option<&ImpactReport>) -> IndexDiagnostic {
    let changed_files: Vec<String> = job
        .changed_files
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    match impact {
        Some(report) => IndexDiagnostic {
            sha: job.sha.clone(),
            mode: job.mode,
            changed_files,
            impacted_files: report.impacted_files.clone(),
            reparsed_files: report.reparsed_files.clone(),
            impacted_symbol_uids: report.impacted_symbol_uids.clone(),
            created_at: None,
        },
        None => IndexDiagnostic {
            sha: job.sha.clone(),
            mode: job.mode,
            reparsed_files: changed_files.clone(),
            changed_files,
            impacted_files: Vec::new(),
            impacted_symbol_uids: Vec::new(),
            created_at: None,
        },
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("embedding_dimensions", &self.embedder.dimensions())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::InMemoryGraphStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingDocStore;

    #[async_trait]
    impl StalenessPropagator for FailingDocStore {
        async fn mark_blocks_stale_for_symbol_uids(
            &self,
            _scope: &RepoScope,
            _symbol_uids: &BTreeSet<String>,
        ) -> Result<usize> {
            Err(Error::Collaborator("doc store offline".to_string()))
        }
    }

    fn scope() -> RepoScope {
        RepoScope::new("t", "r")
    }

    fn engine() -> Engine {
        Engine::new(Box::new(InMemoryGraphStore::new()), EngineConfig::default())
    }

    fn two_files() -> Vec<Value> {
        vec![
            json!({"type": "node", "data": {"symbol_uid": "a", "file_path": "a.js"}}),
            json!({"type": "node", "data": {"symbol_uid": "b", "file_path": "b.js"}}),
            json!({"type": "edge", "data": {
                "source_symbol_uid": "a", "edge_type": "Calls", "target_symbol_uid": "b"
            }}),
        ]
    }

    #[tokio::test]
    async fn full_pass_skips_impact() {
        let engine = engine();
        let report = engine
            .run_pass(&IndexJob::full(scope(), "s1"), two_files())
            .await
            .expect("pass");

        assert!(report.impact.is_none());
        assert_eq!(report.ingested.written.nodes, 2);
        assert_eq!(report.diagnostic.mode, IndexMode::Full);
        assert_eq!(engine.store().list_index_diagnostics(&scope()).expect("list").len(), 1);
    }

    #[tokio::test]
    async fn incremental_pass_reports_impact() {
        let engine = engine();
        let job = IndexJob::incremental(scope(), "s2", vec!["a.js".to_string()], Vec::new());

        let report = engine.run_pass(&job, two_files()).await.expect("pass");

        let impact = report.impact.expect("incremental");
        assert_eq!(impact.impacted_symbol_uids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.diagnostic.impacted_files, vec!["a.js".to_string(), "b.js".to_string()]);
    }

    #[tokio::test]
    async fn node_text_is_embedded_before_ingest() {
        let engine = engine();
        let records = vec![json!({"type": "node", "data": {
            "symbol_uid": "a", "embedding_text": "load user profile"
        }})];

        let report = engine
            .run_pass(&IndexJob::full(scope(), "s1"), records)
            .await
            .expect("pass");

        assert_eq!(report.embedded_nodes, 1);
        let hits = engine
            .semantic_search(&scope(), "user profile", 5)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.symbol_uid, "a");
    }

    #[tokio::test]
    async fn undecodable_batch_leaves_removed_files_in_place() {
        let engine = engine();
        engine
            .run_pass(&IndexJob::full(scope(), "s1"), two_files())
            .await
            .expect("seed");
        let job = IndexJob::incremental(scope(), "s2", Vec::new(), vec!["a.js".to_string()]);

        let err = engine
            .run_pass(&job, vec![json!({"type": "mystery", "data": {}})])
            .await
            .expect_err("unknown record type");

        assert!(matches!(err, Error::UnknownRecordType(_)));
        assert!(
            engine
                .store()
                .get_node_by_symbol_uid(&scope(), "a")
                .expect("get")
                .is_some()
        );
        assert_eq!(engine.store().list_edges(&scope()).expect("edges").len(), 1);
        assert_eq!(engine.store().list_index_diagnostics(&scope()).expect("list").len(), 1);
    }

    #[tokio::test]
    async fn staleness_failure_is_non_fatal_by_default() {
        let engine = engine().with_staleness(Arc::new(FailingDocStore));
        let job = IndexJob::incremental(scope(), "s1", vec!["a.js".to_string()], Vec::new());

        let report = engine.run_pass(&job, two_files()).await.expect("pass");
        assert_eq!(report.stale_blocks, 0);
    }

    #[tokio::test]
    async fn staleness_failure_is_fatal_when_configured() {
        let mut config = EngineConfig::default();
        config.staleness.fail_on_error = true;
        let engine = Engine::new(Box::new(InMemoryGraphStore::new()), config)
            .with_staleness(Arc::new(FailingDocStore));
        let job = IndexJob::incremental(scope(), "s1", vec!["a.js".to_string()], Vec::new());

        let err = engine.run_pass(&job, two_files()).await.expect_err("fatal");
        assert!(matches!(err, Error::Collaborator(_)));
    }
}
