//! In-memory store backend using `BTreeMap`s and petgraph.
//!
//! This is the reference implementation of [`GraphStore`]: all data is held in
//! RAM and **lost when the process exits**. It is suitable for tests, short
//! CLI sessions, and as the oracle the SQLite backend is checked against.
//!
//! # Architecture
//!
//! - `RwLock<HashMap<RepoScope, Arc<RwLock<RepoGraph>>>>`: one independent
//!   graph per scope, so different tenants never contend on the same lock
//! - `StableDiGraph<String, EdgeKey>` + `node_map` for the edge topology;
//!   removing a node removes every edge touching it
//! - `BTreeMap`s keyed by natural key for everything else, giving ordered
//!   listings for free
//!
//! # Atomicity
//!
//! `apply_batch` validates the whole batch against the current state plus
//! the batch itself before touching anything, then applies it under the
//! scope's write lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use petgraph::Direction as PetDirection;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use tracing::debug;

use super::{BatchStats, GraphStore, PruneStats, rank_by_similarity};
use crate::error::{Error, Result};
use crate::records::RecordBatch;
use crate::types::{
    DeclaredDependency, DependencyManifest, DependencyMismatch, Direction, EdgeKey,
    EdgeOccurrence, FlowEntrypoint, FlowGraph, FlowGraphKey, FlowGraphSummary, GraphEdge,
    GraphNode, IndexDiagnostic, ObservedDependency, RepoScope, SearchHit, UnresolvedImport,
};

/// Graph state for one (tenant, repo) scope.
#[derive(Debug, Default)]
struct RepoGraph {
    nodes: BTreeMap<String, GraphNode>,
    graph: StableDiGraph<String, EdgeKey>,
    node_map: HashMap<String, NodeIndex>,
    edges: BTreeMap<EdgeKey, (GraphEdge, EdgeIndex)>,
    occurrences: BTreeMap<EdgeKey, Vec<EdgeOccurrence>>,
    entrypoints: BTreeMap<String, FlowEntrypoint>,
    flow_graphs: BTreeMap<FlowGraphKey, FlowGraph>,
    manifests: BTreeMap<String, DependencyManifest>,
    declared: BTreeMap<(String, String, String), DeclaredDependency>,
    observed: BTreeMap<(String, String), ObservedDependency>,
    mismatches: BTreeMap<String, Vec<DependencyMismatch>>,
    diagnostics: Vec<IndexDiagnostic>,
    unresolved: BTreeSet<UnresolvedImport>,
}

impl RepoGraph {
    /// Check every cross-record reference in `batch` without mutating.
    fn validate(&self, batch: &RecordBatch) -> Result<()> {
        let batch_nodes: HashSet<&str> = batch.nodes.iter().map(|n| n.symbol_uid.as_str()).collect();
        let node_exists =
            |uid: &str| self.nodes.contains_key(uid) || batch_nodes.contains(uid);

        for edge in &batch.edges {
            for endpoint in [&edge.source_symbol_uid, &edge.target_symbol_uid] {
                if !node_exists(endpoint) {
                    return Err(Error::DanglingEdge {
                        edge: edge.key(),
                        missing_symbol_uid: endpoint.clone(),
                    });
                }
            }
        }

        let batch_edges: HashSet<EdgeKey> = batch.edges.iter().map(GraphEdge::key).collect();
        for occurrence in &batch.occurrences {
            let key = occurrence.edge_key();
            if !self.edges.contains_key(&key) && !batch_edges.contains(&key) {
                return Err(Error::DanglingReference {
                    record_type: "edge_occurrence",
                    key: format!("{}:{}", occurrence.file_path, occurrence.line_start),
                    missing: format!("edge {key}"),
                });
            }
        }

        let batch_manifests: HashSet<&str> = batch
            .manifests
            .iter()
            .map(|m| m.manifest_key.as_str())
            .collect();
        let superseded = self.superseded_manifests(batch);
        for dep in &batch.declared {
            let stored = self.manifests.contains_key(&dep.manifest_key)
                && !superseded.contains(&dep.manifest_key);
            if !stored && !batch_manifests.contains(dep.manifest_key.as_str()) {
                return Err(Error::DanglingReference {
                    record_type: "declared_dependency",
                    key: dep.package_key.clone(),
                    missing: format!("manifest `{}`", dep.manifest_key),
                });
            }
        }

        for dep in &batch.observed {
            if !node_exists(&dep.source_symbol_uid) {
                return Err(Error::DanglingReference {
                    record_type: "observed_dependency",
                    key: dep.package_key.clone(),
                    missing: format!("symbol `{}`", dep.source_symbol_uid),
                });
            }
        }

        Ok(())
    }

    /// Apply a validated batch.
    fn apply(&mut self, batch: &RecordBatch) -> BatchStats {
        let mut stats = BatchStats::default();

        for node in &batch.nodes {
            self.upsert_node(node.clone());
            stats.nodes += 1;
        }

        for edge in &batch.edges {
            self.upsert_edge(edge.clone());
            stats.edges += 1;
        }

        for occurrence in &batch.occurrences {
            let list = self.occurrences.entry(occurrence.edge_key()).or_default();
            if !list.contains(occurrence) {
                list.push(occurrence.clone());
            }
            stats.occurrences += 1;
        }

        for entrypoint in &batch.entrypoints {
            self.entrypoints
                .insert(entrypoint.entrypoint_key.clone(), entrypoint.clone());
            stats.entrypoints += 1;
        }

        let superseded = self.superseded_manifests(batch);
        if !superseded.is_empty() {
            self.manifests.retain(|key, _| !superseded.contains(key));
            self.declared
                .retain(|(manifest, _, _), _| !superseded.contains(manifest));
        }
        for manifest in &batch.manifests {
            self.manifests
                .insert(manifest.manifest_key.clone(), manifest.clone());
            stats.dependencies += 1;
        }

        for dep in &batch.declared {
            let mut dep = dep.clone();
            if let Some(manifest) = self.manifests.get(&dep.manifest_key) {
                dep.file_path.clone_from(&manifest.file_path);
            }
            let key = (
                dep.manifest_key.clone(),
                dep.package_key.clone(),
                dep.scope.clone(),
            );
            self.declared.insert(key, dep);
            stats.dependencies += 1;
        }

        for dep in &batch.observed {
            let mut dep = dep.clone();
            if dep.file_path.is_empty()
                && let Some(node) = self.nodes.get(&dep.source_symbol_uid)
            {
                dep.file_path.clone_from(&node.file_path);
            }
            let key = (dep.source_symbol_uid.clone(), dep.package_key.clone());
            self.observed.insert(key, dep);
            stats.dependencies += 1;
        }

        for (sha, set) in &batch.mismatches {
            stats.mismatches += set.len();
            self.mismatches.insert(sha.clone(), set.clone());
        }

        for diagnostic in &batch.diagnostics {
            let mut diagnostic = diagnostic.clone();
            diagnostic.created_at.get_or_insert_with(Utc::now);
            self.diagnostics.push(diagnostic);
            stats.diagnostics += 1;
        }

        for import in &batch.unresolved_imports {
            self.unresolved.insert(import.clone());
            stats.unresolved_imports += 1;
        }

        stats
    }

    /// Stored manifests for a file the batch brings a newer manifest for.
    fn superseded_manifests(&self, batch: &RecordBatch) -> HashSet<String> {
        let files: HashSet<&str> = batch.manifests.iter().map(|m| m.file_path.as_str()).collect();
        let keys: HashSet<&str> = batch
            .manifests
            .iter()
            .map(|m| m.manifest_key.as_str())
            .collect();
        self.manifests
            .values()
            .filter(|m| {
                files.contains(m.file_path.as_str()) && !keys.contains(m.manifest_key.as_str())
            })
            .map(|m| m.manifest_key.clone())
            .collect()
    }

    fn upsert_node(&mut self, mut node: GraphNode) {
        match self.nodes.get(&node.symbol_uid) {
            Some(existing) => {
                if existing.first_seen_sha.is_some() {
                    node.first_seen_sha.clone_from(&existing.first_seen_sha);
                }
                if node.last_seen_sha.is_none() {
                    node.last_seen_sha.clone_from(&existing.last_seen_sha);
                }
            }
            None => {
                let index = self.graph.add_node(node.symbol_uid.clone());
                self.node_map.insert(node.symbol_uid.clone(), index);
            }
        }
        self.nodes.insert(node.symbol_uid.clone(), node);
    }

    /// Endpoints must already be present.
    fn upsert_edge(&mut self, mut edge: GraphEdge) {
        let key = edge.key();
        if let Some((existing, index)) = self.edges.get(&key) {
            if existing.first_seen_sha.is_some() {
                edge.first_seen_sha.clone_from(&existing.first_seen_sha);
            }
            if edge.last_seen_sha.is_none() {
                edge.last_seen_sha.clone_from(&existing.last_seen_sha);
            }
            let index = *index;
            self.edges.insert(key, (edge, index));
            return;
        }

        let (Some(&source), Some(&target)) = (
            self.node_map.get(&edge.source_symbol_uid),
            self.node_map.get(&edge.target_symbol_uid),
        ) else {
            return;
        };
        let index = self.graph.add_edge(source, target, key.clone());
        self.edges.insert(key, (edge, index));
    }

    fn edge_keys_touching(&self, symbol_uid: &str, direction: Direction) -> BTreeSet<EdgeKey> {
        let Some(&index) = self.node_map.get(symbol_uid) else {
            return BTreeSet::new();
        };
        let directions: &[PetDirection] = match direction {
            Direction::Out => &[PetDirection::Outgoing],
            Direction::In => &[PetDirection::Incoming],
            Direction::Both => &[PetDirection::Outgoing, PetDirection::Incoming],
        };
        directions
            .iter()
            .flat_map(|dir| self.graph.edges_directed(index, *dir))
            .map(|edge| edge.weight().clone())
            .collect()
    }

    fn prune(&mut self, file_paths: &HashSet<&str>) -> PruneStats {
        let mut stats = PruneStats::default();

        let removed: Vec<String> = self
            .nodes
            .values()
            .filter(|node| file_paths.contains(node.file_path.as_str()))
            .map(|node| node.symbol_uid.clone())
            .collect();

        let mut dead_edges = BTreeSet::new();
        for uid in &removed {
            dead_edges.extend(self.edge_keys_touching(uid, Direction::Both));
            if let Some(index) = self.node_map.remove(uid) {
                self.graph.remove_node(index);
            }
            self.nodes.remove(uid);
        }
        for key in &dead_edges {
            self.edges.remove(key);
            if let Some(list) = self.occurrences.remove(key) {
                stats.occurrences += list.len();
            }
        }
        stats.edges = dead_edges.len();

        for list in self.occurrences.values_mut() {
            let before = list.len();
            list.retain(|occ| !file_paths.contains(occ.file_path.as_str()));
            stats.occurrences += before - list.len();
        }
        self.occurrences.retain(|_, list| !list.is_empty());

        let removed_set: HashSet<&str> = removed.iter().map(String::as_str).collect();
        self.observed
            .retain(|(source, _), _| !removed_set.contains(source.as_str()));

        let dead_entrypoints: HashSet<String> = self
            .entrypoints
            .values()
            .filter(|ep| {
                ep.file_path
                    .as_deref()
                    .is_some_and(|path| file_paths.contains(path))
            })
            .map(|ep| ep.entrypoint_key.clone())
            .collect();
        self.entrypoints
            .retain(|key, _| !dead_entrypoints.contains(key));
        stats.entrypoints = dead_entrypoints.len();

        let graphs_before = self.flow_graphs.len();
        self.flow_graphs
            .retain(|key, _| !dead_entrypoints.contains(&key.entrypoint_key));
        stats.flow_graphs = graphs_before - self.flow_graphs.len();

        let dead_manifests: HashSet<String> = self
            .manifests
            .values()
            .filter(|m| file_paths.contains(m.file_path.as_str()))
            .map(|m| m.manifest_key.clone())
            .collect();
        self.manifests.retain(|key, _| !dead_manifests.contains(key));
        self.declared
            .retain(|(manifest, _, _), _| !dead_manifests.contains(manifest));
        stats.manifests = dead_manifests.len();

        let unresolved_before = self.unresolved.len();
        self.unresolved
            .retain(|import| !file_paths.contains(import.file_path.as_str()));
        stats.unresolved_imports = unresolved_before - self.unresolved.len();

        stats.removed_symbol_uids = removed;
        stats
    }
}

/// In-memory [`GraphStore`] implementation.
///
/// Cheap to create; every scope gets its own lock.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    repos: RwLock<HashMap<RepoScope, Arc<RwLock<RepoGraph>>>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> Error {
    Error::Internal(format!(
        "in-memory store lock poisoned (a thread panicked while holding the lock): {e}"
    ))
}

impl InMemoryGraphStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn repo(&self, scope: &RepoScope) -> Result<Option<Arc<RwLock<RepoGraph>>>> {
        let repos = self.repos.read().map_err(poisoned)?;
        Ok(repos.get(scope).cloned())
    }

    fn repo_or_create(&self, scope: &RepoScope) -> Result<Arc<RwLock<RepoGraph>>> {
        if let Some(repo) = self.repo(scope)? {
            return Ok(repo);
        }
        let mut repos = self.repos.write().map_err(poisoned)?;
        Ok(Arc::clone(repos.entry(scope.clone()).or_default()))
    }

    /// Run `f` against the scope's graph, or return the default for unknown scopes.
    fn read<T: Default>(
        &self,
        scope: &RepoScope,
        f: impl FnOnce(&RepoGraph) -> T,
    ) -> Result<T> {
        let Some(repo) = self.repo(scope)? else {
            return Ok(T::default());
        };
        let guard: RwLockReadGuard<'_, RepoGraph> = repo.read().map_err(poisoned)?;
        Ok(f(&*guard))
    }

    fn write<T>(&self, scope: &RepoScope, f: impl FnOnce(&mut RepoGraph) -> Result<T>) -> Result<T> {
        let repo = self.repo_or_create(scope)?;
        let mut guard: RwLockWriteGuard<'_, RepoGraph> = repo.write().map_err(poisoned)?;
        f(&mut *guard)
    }
}

impl GraphStore for InMemoryGraphStore {
    fn apply_batch(&self, scope: &RepoScope, batch: &RecordBatch) -> Result<BatchStats> {
        self.write(scope, |repo| {
            // === Phase 1: validate (no mutations) ===
            repo.validate(batch)?;

            // === Phase 2: apply ===
            let stats = repo.apply(batch);
            debug!(scope = %scope, records = stats.total(), "Applied batch");
            Ok(stats)
        })
    }

    fn replace_dependency_mismatches(
        &self,
        scope: &RepoScope,
        sha: &str,
        mismatches: Vec<DependencyMismatch>,
    ) -> Result<usize> {
        self.write(scope, |repo| {
            let count = mismatches.len();
            repo.mismatches.insert(sha.to_string(), mismatches);
            Ok(count)
        })
    }

    fn replace_flow_graph(&self, scope: &RepoScope, graph: &FlowGraph) -> Result<()> {
        self.write(scope, |repo| {
            repo.flow_graphs.insert(graph.key.clone(), graph.clone());
            Ok(())
        })
    }

    fn delete_graph_for_file_paths(
        &self,
        scope: &RepoScope,
        file_paths: &[String],
    ) -> Result<PruneStats> {
        if file_paths.is_empty() || self.repo(scope)?.is_none() {
            return Ok(PruneStats::default());
        }
        self.write(scope, |repo| {
            let paths: HashSet<&str> = file_paths.iter().map(String::as_str).collect();
            let stats = repo.prune(&paths);
            debug!(
                scope = %scope,
                files = file_paths.len(),
                nodes = stats.nodes(),
                edges = stats.edges,
                "Pruned graph for removed files"
            );
            Ok(stats)
        })
    }

    fn list_nodes(&self, scope: &RepoScope) -> Result<Vec<GraphNode>> {
        self.read(scope, |repo| repo.nodes.values().cloned().collect())
    }

    fn get_node_by_symbol_uid(
        &self,
        scope: &RepoScope,
        symbol_uid: &str,
    ) -> Result<Option<GraphNode>> {
        self.read(scope, |repo| repo.nodes.get(symbol_uid).cloned())
    }

    fn list_nodes_in_files(
        &self,
        scope: &RepoScope,
        file_paths: &[String],
    ) -> Result<Vec<GraphNode>> {
        let paths: HashSet<&str> = file_paths.iter().map(String::as_str).collect();
        self.read(scope, |repo| {
            repo.nodes
                .values()
                .filter(|node| paths.contains(node.file_path.as_str()))
                .cloned()
                .collect()
        })
    }

    fn get_nodes_by_symbol_uids(
        &self,
        scope: &RepoScope,
        symbol_uids: &BTreeSet<String>,
    ) -> Result<Vec<GraphNode>> {
        self.read(scope, |repo| {
            symbol_uids
                .iter()
                .filter_map(|uid| repo.nodes.get(uid).cloned())
                .collect()
        })
    }

    fn list_edges(&self, scope: &RepoScope) -> Result<Vec<GraphEdge>> {
        self.read(scope, |repo| {
            repo.edges.values().map(|(edge, _)| edge.clone()).collect()
        })
    }

    fn list_edges_by_node(
        &self,
        scope: &RepoScope,
        symbol_uid: &str,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>> {
        self.read(scope, |repo| {
            repo.edge_keys_touching(symbol_uid, direction)
                .iter()
                .filter_map(|key| repo.edges.get(key).map(|(edge, _)| edge.clone()))
                .collect()
        })
    }

    fn list_edge_occurrences_for_edge(
        &self,
        scope: &RepoScope,
        edge: &EdgeKey,
    ) -> Result<Vec<EdgeOccurrence>> {
        self.read(scope, |repo| {
            repo.occurrences.get(edge).cloned().unwrap_or_default()
        })
    }

    fn semantic_search(
        &self,
        scope: &RepoScope,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.read(scope, |repo| {
            let candidates = repo
                .nodes
                .values()
                .filter(|node| node.embedding.is_some())
                .cloned();
            rank_by_similarity(query, candidates, limit)
        })
    }

    fn list_flow_entrypoints(&self, scope: &RepoScope) -> Result<Vec<FlowEntrypoint>> {
        self.read(scope, |repo| repo.entrypoints.values().cloned().collect())
    }

    fn get_flow_entrypoint(
        &self,
        scope: &RepoScope,
        entrypoint_key: &str,
    ) -> Result<Option<FlowEntrypoint>> {
        self.read(scope, |repo| repo.entrypoints.get(entrypoint_key).cloned())
    }

    fn get_flow_graph(&self, scope: &RepoScope, key: &FlowGraphKey) -> Result<Option<FlowGraph>> {
        self.read(scope, |repo| repo.flow_graphs.get(key).cloned())
    }

    fn list_flow_graphs(&self, scope: &RepoScope) -> Result<Vec<FlowGraphSummary>> {
        self.read(scope, |repo| {
            repo.flow_graphs
                .values()
                .map(|graph| FlowGraphSummary {
                    key: graph.key.clone(),
                    root_symbol_uid: graph.root_symbol_uid.clone(),
                    node_count: graph.node_uids.len(),
                    edge_count: graph.edge_keys.len(),
                })
                .collect()
        })
    }

    fn list_dependency_manifests(&self, scope: &RepoScope) -> Result<Vec<DependencyManifest>> {
        self.read(scope, |repo| repo.manifests.values().cloned().collect())
    }

    fn list_declared_dependencies(&self, scope: &RepoScope) -> Result<Vec<DeclaredDependency>> {
        self.read(scope, |repo| repo.declared.values().cloned().collect())
    }

    fn list_observed_dependencies(&self, scope: &RepoScope) -> Result<Vec<ObservedDependency>> {
        self.read(scope, |repo| repo.observed.values().cloned().collect())
    }

    fn list_dependency_mismatches(
        &self,
        scope: &RepoScope,
        sha: Option<&str>,
    ) -> Result<Vec<DependencyMismatch>> {
        self.read(scope, |repo| match sha {
            Some(sha) => repo.mismatches.get(sha).cloned().unwrap_or_default(),
            None => repo.mismatches.values().flatten().cloned().collect(),
        })
    }

    fn list_index_diagnostics(&self, scope: &RepoScope) -> Result<Vec<IndexDiagnostic>> {
        self.read(scope, |repo| repo.diagnostics.clone())
    }

    fn list_unresolved_imports(&self, scope: &RepoScope) -> Result<Vec<UnresolvedImport>> {
        self.read(scope, |repo| repo.unresolved.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> RepoScope {
        RepoScope::new("t1", "r1")
    }

    fn node(uid: &str, file: &str) -> GraphNode {
        GraphNode {
            symbol_uid: uid.to_string(),
            file_path: file.to_string(),
            ..GraphNode::default()
        }
    }

    #[test]
    fn edge_endpoints_may_come_from_same_batch() {
        let store = InMemoryGraphStore::new();
        let batch = RecordBatch {
            nodes: vec![node("a", "a.js"), node("b", "b.js")],
            edges: vec![GraphEdge::new("a", "Calls", "b")],
            ..RecordBatch::default()
        };

        let stats = store.apply_batch(&scope(), &batch).expect("valid batch");

        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(store.list_edges(&scope()).expect("list").len(), 1);
    }

    #[test]
    fn dangling_edge_leaves_store_untouched() {
        let store = InMemoryGraphStore::new();
        let batch = RecordBatch {
            nodes: vec![node("a", "a.js")],
            edges: vec![GraphEdge::new("a", "Calls", "ghost")],
            ..RecordBatch::default()
        };

        let err = store.apply_batch(&scope(), &batch).expect_err("dangling");

        assert!(matches!(
            err,
            Error::DanglingEdge { ref missing_symbol_uid, .. } if missing_symbol_uid == "ghost"
        ));
        assert!(store.list_nodes(&scope()).expect("list").is_empty());
    }

    #[test]
    fn upsert_preserves_first_seen_sha() {
        let store = InMemoryGraphStore::new();
        let mut first = node("a", "a.js");
        first.first_seen_sha = Some("s1".to_string());
        first.last_seen_sha = Some("s1".to_string());
        store.upsert_node(&scope(), first).expect("upsert");

        let mut second = node("a", "a.js");
        second.first_seen_sha = Some("s2".to_string());
        second.last_seen_sha = Some("s2".to_string());
        store.upsert_node(&scope(), second).expect("upsert");

        let stored = store
            .get_node_by_symbol_uid(&scope(), "a")
            .expect("get")
            .expect("exists");
        assert_eq!(stored.first_seen_sha.as_deref(), Some("s1"));
        assert_eq!(stored.last_seen_sha.as_deref(), Some("s2"));
    }

    #[test]
    fn self_loop_listed_once_for_both_directions() {
        let store = InMemoryGraphStore::new();
        store.upsert_node(&scope(), node("a", "a.js")).expect("node");
        store
            .upsert_edge(&scope(), GraphEdge::new("a", "Calls", "a"))
            .expect("edge");

        let edges = store
            .list_edges_by_node(&scope(), "a", Direction::Both)
            .expect("list");
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn unknown_scope_reads_are_empty() {
        let store = InMemoryGraphStore::new();
        let other = RepoScope::new("nobody", "nothing");

        assert!(store.list_nodes(&other).expect("list").is_empty());
        assert!(store.get_node_by_symbol_uid(&other, "a").expect("get").is_none());
        assert!(
            store
                .delete_graph_for_file_paths(&other, &["a.js".to_string()])
                .expect("prune")
                .is_empty()
        );
    }
}
