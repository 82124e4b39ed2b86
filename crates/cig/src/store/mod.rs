//! Storage abstraction layer for the code intelligence graph.
//!
//! This module provides the [`GraphStore`] trait and a factory for creating
//! store backends. Two interchangeable implementations exist:
//!
//! - **In-memory**: `HashMap` + `petgraph` reference implementation
//! - **SQLite**: transactional store with cascading deletes and bulk upserts
//!
//! # Architecture
//!
//! Every operation is scoped by a [`RepoScope`]. Rows from different scopes
//! never mix, so passes for different tenants or repositories are fully
//! independent. The trait is object-safe and selected at runtime through
//! [`create_store`] (`Box<dyn GraphStore>`), never through inheritance.
//!
//! All writes funnel through [`GraphStore::apply_batch`], which applies a
//! [`RecordBatch`] atomically: it either commits entirely or leaves the store
//! untouched. Single-record mutations are provided methods wrapping a
//! one-record batch.
//!
//! # Example
//!
//! ```no_run
//! use cig::store::{create_store, GraphStore, StorageBackend};
//! use cig::types::{GraphNode, RepoScope};
//!
//! # fn main() -> cig::Result<()> {
//! let store = create_store(&StorageBackend::InMemory)?;
//! let scope = RepoScope::new("acme", "web");
//!
//! store.upsert_node(&scope, GraphNode {
//!     symbol_uid: "a.js#main".to_string(),
//!     file_path: "a.js".to_string(),
//!     ..GraphNode::default()
//! })?;
//!
//! assert!(store.get_node_by_symbol_uid(&scope, "a.js#main")?.is_some());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::records::{IngestionRecord, RecordBatch};
use crate::types::{
    DeclaredDependency, DependencyManifest, DependencyMismatch, Direction, EdgeKey,
    EdgeOccurrence, FlowEntrypoint, FlowGraph, FlowGraphKey, FlowGraphSummary, GraphEdge,
    GraphNode, IndexDiagnostic, ObservedDependency, RepoScope, SearchHit, UnresolvedImport,
};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

/// Counts of records written by one batch, after de-duplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Nodes inserted or updated
    pub nodes: usize,
    /// Edges inserted or updated
    pub edges: usize,
    /// Edge occurrences written
    pub occurrences: usize,
    /// Flow entrypoints inserted or updated
    pub entrypoints: usize,
    /// Manifests, declared and observed dependencies written
    pub dependencies: usize,
    /// Dependency mismatches written (replacing prior sets)
    pub mismatches: usize,
    /// Diagnostics appended
    pub diagnostics: usize,
    /// Unresolved imports written
    pub unresolved_imports: usize,
}

impl BatchStats {
    /// Total records written.
    #[must_use]
    pub fn total(&self) -> usize {
        self.nodes
            + self.edges
            + self.occurrences
            + self.entrypoints
            + self.dependencies
            + self.mismatches
            + self.diagnostics
            + self.unresolved_imports
    }
}

/// Counts of rows removed by [`GraphStore::delete_graph_for_file_paths`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    /// Symbols of the removed nodes, sorted
    pub removed_symbol_uids: Vec<String>,
    /// Edges removed because an endpoint disappeared
    pub edges: usize,
    /// Occurrences removed with their edges or files
    pub occurrences: usize,
    /// Entrypoints declared in the removed files
    pub entrypoints: usize,
    /// Manifests in the removed files
    pub manifests: usize,
    /// Unresolved imports in the removed files
    pub unresolved_imports: usize,
    /// Flow graphs rooted at removed entrypoints
    pub flow_graphs: usize,
}

impl PruneStats {
    /// Number of nodes removed.
    #[must_use]
    pub fn nodes(&self) -> usize {
        self.removed_symbol_uids.len()
    }

    /// Returns `true` if nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_symbol_uids.is_empty()
            && self.edges == 0
            && self.occurrences == 0
            && self.entrypoints == 0
            && self.manifests == 0
            && self.unresolved_imports == 0
            && self.flow_graphs == 0
    }
}

/// Row counts for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of nodes
    pub nodes: usize,
    /// Number of edges
    pub edges: usize,
    /// Number of flow entrypoints
    pub entrypoints: usize,
    /// Number of cached flow graphs
    pub flow_graphs: usize,
    /// Number of manifests
    pub manifests: usize,
    /// Number of declared dependencies
    pub declared_dependencies: usize,
    /// Number of observed dependencies
    pub observed_dependencies: usize,
    /// Number of mismatches across all shas
    pub mismatches: usize,
    /// Number of diagnostics
    pub diagnostics: usize,
    /// Number of unresolved imports
    pub unresolved_imports: usize,
}

/// Core storage trait for the code intelligence graph.
///
/// Implementations must be `Send + Sync`; concurrent readers are allowed,
/// writers for one scope are serialized by the caller's lease.
///
/// # Method Categories
///
/// - **Writes**: `apply_batch`, `replace_dependency_mismatches`,
///   `replace_flow_graph`, `delete_graph_for_file_paths`
/// - **Graph reads**: `list_nodes`, `get_node_by_symbol_uid`, `list_edges`,
///   `list_edges_by_node`, `list_edge_occurrences_for_edge`, `semantic_search`
/// - **Flow reads**: `list_flow_entrypoints`, `get_flow_graph`, `list_flow_graphs`
/// - **Dependency and audit reads**: `list_dependency_*`,
///   `list_index_diagnostics`, `list_unresolved_imports`
///
/// # Error Handling
///
/// - `DanglingEdge` / `DanglingReference`: a batch references an entity that
///   exists neither in the store nor in the batch; nothing is written
/// - `Database` / `Internal`: backend failures
pub trait GraphStore: Send + Sync {
    // ========== Writes ==========

    /// Apply a batch atomically in dependency order.
    ///
    /// Nodes, then edges, occurrences, entrypoints and dependency records are
    /// upserted by natural key. Edge endpoints may be satisfied by nodes in
    /// the same batch. Upserts keep the stored `first_seen_sha` and replace
    /// everything else. A manifest replaces any stored manifest for the same
    /// `file_path` under another key, together with its declared
    /// dependencies.
    ///
    /// # Errors
    ///
    /// - `Error::DanglingEdge` if an edge endpoint is unknown
    /// - `Error::DanglingReference` if an occurrence's edge, a declared
    ///   dependency's manifest or an observed dependency's symbol is unknown
    fn apply_batch(&self, scope: &RepoScope, batch: &RecordBatch) -> Result<BatchStats>;

    /// Replace the mismatch set for `sha` with `mismatches`.
    fn replace_dependency_mismatches(
        &self,
        scope: &RepoScope,
        sha: &str,
        mismatches: Vec<DependencyMismatch>,
    ) -> Result<usize>;

    /// Persist a flow graph, clearing any prior membership under its key.
    fn replace_flow_graph(&self, scope: &RepoScope, graph: &FlowGraph) -> Result<()>;

    /// Remove all file-scoped state for `file_paths`.
    ///
    /// Nodes in the files are deleted together with every edge touching them
    /// and those edges' occurrences. Nodes outside the files survive. Paths
    /// with no stored state are ignored.
    fn delete_graph_for_file_paths(
        &self,
        scope: &RepoScope,
        file_paths: &[String],
    ) -> Result<PruneStats>;

    // ========== Graph reads ==========

    /// All nodes, ordered by `symbol_uid`.
    fn list_nodes(&self, scope: &RepoScope) -> Result<Vec<GraphNode>>;

    /// Get a node by its stable identifier.
    fn get_node_by_symbol_uid(&self, scope: &RepoScope, symbol_uid: &str)
    -> Result<Option<GraphNode>>;

    /// Nodes whose `file_path` is one of `file_paths`, ordered by `symbol_uid`.
    fn list_nodes_in_files(&self, scope: &RepoScope, file_paths: &[String])
    -> Result<Vec<GraphNode>>;

    /// Nodes for the given identifiers; unknown identifiers are skipped.
    fn get_nodes_by_symbol_uids(
        &self,
        scope: &RepoScope,
        symbol_uids: &BTreeSet<String>,
    ) -> Result<Vec<GraphNode>>;

    /// All edges, ordered by key.
    fn list_edges(&self, scope: &RepoScope) -> Result<Vec<GraphEdge>>;

    /// Edges touching `symbol_uid`: outgoing (`Out`), incoming (`In`) or both.
    fn list_edges_by_node(
        &self,
        scope: &RepoScope,
        symbol_uid: &str,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>>;

    /// Occurrences recorded for one edge.
    fn list_edge_occurrences_for_edge(
        &self,
        scope: &RepoScope,
        edge: &EdgeKey,
    ) -> Result<Vec<EdgeOccurrence>>;

    /// Nearest nodes to `query` by cosine similarity, best first.
    ///
    /// Nodes without embeddings, or with a different length, are skipped.
    fn semantic_search(
        &self,
        scope: &RepoScope,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    // ========== Flow reads ==========

    /// All entrypoints, ordered by key.
    fn list_flow_entrypoints(&self, scope: &RepoScope) -> Result<Vec<FlowEntrypoint>>;

    /// Get one entrypoint.
    fn get_flow_entrypoint(
        &self,
        scope: &RepoScope,
        entrypoint_key: &str,
    ) -> Result<Option<FlowEntrypoint>>;

    /// Get a cached flow graph.
    fn get_flow_graph(&self, scope: &RepoScope, key: &FlowGraphKey) -> Result<Option<FlowGraph>>;

    /// All cached flow graphs, ordered by key.
    fn list_flow_graphs(&self, scope: &RepoScope) -> Result<Vec<FlowGraphSummary>>;

    // ========== Dependency and audit reads ==========

    /// All manifests, ordered by key.
    fn list_dependency_manifests(&self, scope: &RepoScope) -> Result<Vec<DependencyManifest>>;

    /// All declared dependencies.
    fn list_declared_dependencies(&self, scope: &RepoScope) -> Result<Vec<DeclaredDependency>>;

    /// All observed dependencies.
    fn list_observed_dependencies(&self, scope: &RepoScope) -> Result<Vec<ObservedDependency>>;

    /// Mismatches for one sha, or for every sha when `sha` is `None`.
    fn list_dependency_mismatches(
        &self,
        scope: &RepoScope,
        sha: Option<&str>,
    ) -> Result<Vec<DependencyMismatch>>;

    /// Diagnostics in insertion order.
    fn list_index_diagnostics(&self, scope: &RepoScope) -> Result<Vec<IndexDiagnostic>>;

    /// All unresolved imports.
    fn list_unresolved_imports(&self, scope: &RepoScope) -> Result<Vec<UnresolvedImport>>;

    // ========== Provided single-record mutations ==========

    /// Insert or update one node.
    fn upsert_node(&self, scope: &RepoScope, node: GraphNode) -> Result<()> {
        self.apply_batch(scope, &RecordBatch::single(IngestionRecord::Node(node)))
            .map(|_| ())
    }

    /// Insert or update one edge; both endpoints must already exist.
    fn upsert_edge(&self, scope: &RepoScope, edge: GraphEdge) -> Result<()> {
        self.apply_batch(scope, &RecordBatch::single(IngestionRecord::Edge(edge)))
            .map(|_| ())
    }

    /// Record one occurrence of an existing edge.
    fn add_edge_occurrence(&self, scope: &RepoScope, occurrence: EdgeOccurrence) -> Result<()> {
        self.apply_batch(
            scope,
            &RecordBatch::single(IngestionRecord::EdgeOccurrence(occurrence)),
        )
        .map(|_| ())
    }

    /// Insert or update one entrypoint.
    fn upsert_flow_entrypoint(&self, scope: &RepoScope, entrypoint: FlowEntrypoint) -> Result<()> {
        self.apply_batch(
            scope,
            &RecordBatch::single(IngestionRecord::FlowEntrypoint(entrypoint)),
        )
        .map(|_| ())
    }

    /// Insert or update one manifest.
    fn add_dependency_manifest(&self, scope: &RepoScope, manifest: DependencyManifest) -> Result<()> {
        self.apply_batch(
            scope,
            &RecordBatch::single(IngestionRecord::DependencyManifest(manifest)),
        )
        .map(|_| ())
    }

    /// Insert or update one declared dependency.
    fn add_declared_dependency(&self, scope: &RepoScope, dep: DeclaredDependency) -> Result<()> {
        self.apply_batch(
            scope,
            &RecordBatch::single(IngestionRecord::DeclaredDependency(dep)),
        )
        .map(|_| ())
    }

    /// Insert or update one observed dependency.
    fn add_observed_dependency(&self, scope: &RepoScope, dep: ObservedDependency) -> Result<()> {
        self.apply_batch(
            scope,
            &RecordBatch::single(IngestionRecord::ObservedDependency(dep)),
        )
        .map(|_| ())
    }

    /// Append one diagnostic.
    fn add_index_diagnostic(&self, scope: &RepoScope, diagnostic: IndexDiagnostic) -> Result<()> {
        self.apply_batch(
            scope,
            &RecordBatch::single(IngestionRecord::IndexDiagnostic(diagnostic)),
        )
        .map(|_| ())
    }

    /// Record one unresolved import.
    fn add_unresolved_import(&self, scope: &RepoScope, import: UnresolvedImport) -> Result<()> {
        self.apply_batch(
            scope,
            &RecordBatch::single(IngestionRecord::UnresolvedImport(import)),
        )
        .map(|_| ())
    }

    /// Row counts for `scope`.
    fn stats(&self, scope: &RepoScope) -> Result<StoreStats> {
        Ok(StoreStats {
            nodes: self.list_nodes(scope)?.len(),
            edges: self.list_edges(scope)?.len(),
            entrypoints: self.list_flow_entrypoints(scope)?.len(),
            flow_graphs: self.list_flow_graphs(scope)?.len(),
            manifests: self.list_dependency_manifests(scope)?.len(),
            declared_dependencies: self.list_declared_dependencies(scope)?.len(),
            observed_dependencies: self.list_observed_dependencies(scope)?.len(),
            mismatches: self.list_dependency_mismatches(scope, None)?.len(),
            diagnostics: self.list_index_diagnostics(scope)?.len(),
            unresolved_imports: self.list_unresolved_imports(scope)?.len(),
        })
    }
}

/// Storage backend configuration.
///
/// Determines which store implementation [`create_store`] builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-memory store (ephemeral)
    InMemory,

    /// SQLite database file (persistent)
    Sqlite(PathBuf),
}

impl StorageBackend {
    /// Returns the database path for file-based backends.
    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        match self {
            StorageBackend::Sqlite(path) => Some(path),
            StorageBackend::InMemory => None,
        }
    }
}

/// Create a store for the given backend.
///
/// # Errors
///
/// Returns `Error::Database` or `Error::Io` if the SQLite database cannot be
/// opened or its schema applied.
pub fn create_store(backend: &StorageBackend) -> Result<Box<dyn GraphStore>> {
    match backend {
        StorageBackend::InMemory => Ok(Box::new(InMemoryGraphStore::new())),
        StorageBackend::Sqlite(path) => Ok(Box::new(SqliteGraphStore::open(path)?)),
    }
}

/// Cosine similarity of two equal-length vectors; `0.0` when either is zero.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank `(node, embedding)` candidates against `query`, best first.
///
/// Ties are broken by `symbol_uid` so results are deterministic.
pub(crate) fn rank_by_similarity<I>(query: &[f32], candidates: I, limit: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = GraphNode>,
{
    if limit == 0 || query.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|node| {
            let embedding = node.embedding.as_deref()?;
            if embedding.len() != query.len() {
                return None;
            }
            let score = cosine_similarity(query, embedding);
            Some(SearchHit { node, score })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.node.symbol_uid.cmp(&b.node.symbol_uid))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = [0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_zero_vector_is_zero() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn rank_skips_nodes_without_matching_embeddings() {
        let node = |uid: &str, embedding: Option<Vec<f32>>| GraphNode {
            symbol_uid: uid.to_string(),
            embedding,
            ..GraphNode::default()
        };

        let hits = rank_by_similarity(
            &[1.0, 0.0],
            vec![
                node("far", Some(vec![0.0, 1.0])),
                node("none", None),
                node("wrong-len", Some(vec![1.0, 0.0, 0.0])),
                node("near", Some(vec![1.0, 0.1])),
            ],
            10,
        );

        let uids: Vec<_> = hits.iter().map(|h| h.node.symbol_uid.as_str()).collect();
        assert_eq!(uids, vec!["near", "far"]);
    }

    #[test]
    fn rank_respects_limit() {
        let nodes = (0..5).map(|i| GraphNode {
            symbol_uid: format!("n{i}"),
            embedding: Some(vec![1.0, 0.0]),
            ..GraphNode::default()
        });

        let hits = rank_by_similarity(&[1.0, 0.0], nodes, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node.symbol_uid, "n0");
    }

    #[test]
    fn storage_backend_data_path() {
        assert!(StorageBackend::InMemory.data_path().is_none());
        let backend = StorageBackend::Sqlite(PathBuf::from("/tmp/graph.db"));
        assert_eq!(backend.data_path(), Some(Path::new("/tmp/graph.db")));
    }
}
