//! `SQLite` store backend.
//!
//! The database is the source of truth; every write is one transaction.
//! Natural keys (`symbol_uid`, `entrypoint_key`, ...) are the public identity,
//! integer row ids never leave this module.
//!
//! ## Module Structure
//!
//! - `schema` - Database schema (DDL)
//! - `helpers` - Row conversion, column lists and blob encoding
//! - `batch` - Bulk upserts for a [`RecordBatch`]
//! - `prune` - File-scoped deletion
//!
//! ## Symbol id cache
//!
//! Resolving edge endpoints needs `nodes.id` for each `symbol_uid`. The store
//! keeps a per-scope `symbol_uid -> id` map that is only ever written after a
//! transaction commits, and drops the entries of pruned symbols. A rolled
//! back batch therefore never leaves ids of rows that do not exist.

// SQLite uses i64 for all integer storage. These casts are intentional and safe for
// practical values (row counts, line numbers, traversal depths).
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod batch;
mod helpers;
mod prune;
mod schema;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, trace};

use self::batch::{NodeIds, SymbolIds};
use self::helpers::{
    DIAGNOSTIC_COLUMNS, EDGE_COLUMNS, EDGE_JOIN, ENTRYPOINT_COLUMNS, INSERT_CHUNK_ROWS,
    NODE_COLUMNS, OCCURRENCE_COLUMNS, in_placeholders, row_to_declared, row_to_diagnostic,
    row_to_edge, row_to_entrypoint, row_to_manifest, row_to_mismatch, row_to_node,
    row_to_observed, row_to_occurrence, row_to_unresolved,
};
use self::schema::SCHEMA;
use super::{BatchStats, GraphStore, PruneStats, rank_by_similarity};
use crate::error::{Error, Result};
use crate::records::RecordBatch;
use crate::types::{
    DeclaredDependency, DependencyManifest, DependencyMismatch, Direction, EdgeKey,
    EdgeOccurrence, FlowEntrypoint, FlowGraph, FlowGraphKey, FlowGraphSummary, GraphEdge,
    GraphNode, IndexDiagnostic, ObservedDependency, RepoScope, SearchHit, UnresolvedImport,
};

/// `SQLite`-backed [`GraphStore`].
///
/// The connection is wrapped in a `Mutex`; SQLite serializes writers anyway
/// and a single connection keeps the temp tables and statement cache warm.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    symbol_ids: Mutex<HashMap<RepoScope, SymbolIds>>,
}

impl std::fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraphStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteGraphStore {
    /// Open or create the graph database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the parent directory cannot be created, or
    /// `Error::Database` if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = ?path, "Opened graph database");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            symbol_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the database file, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Acquire the connection lock.
    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            Error::Internal(format!(
                "database connection mutex poisoned (a thread panicked while holding the lock): {e}"
            ))
        })
    }

    fn cache(&self) -> Result<MutexGuard<'_, HashMap<RepoScope, SymbolIds>>> {
        self.symbol_ids.lock().map_err(|e| {
            Error::Internal(format!("symbol id cache mutex poisoned: {e}"))
        })
    }

    /// Number of cached symbol ids for `scope`.
    #[cfg(test)]
    pub(crate) fn cached_symbol_ids(&self, scope: &RepoScope) -> usize {
        self.symbol_ids
            .lock()
            .map(|cache| cache.get(scope).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    fn query_list<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        f: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, f)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl GraphStore for SqliteGraphStore {
    fn apply_batch(&self, scope: &RepoScope, batch: &RecordBatch) -> Result<BatchStats> {
        let mut cache = self.cache()?;
        let empty = SymbolIds::new();
        let mut node_ids = NodeIds::new(cache.get(scope).unwrap_or(&empty));

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let stats = batch::write_batch(&tx, scope, batch, &mut node_ids)?;
        tx.commit()?;
        drop(conn);

        // Only committed ids reach the cache.
        let added = node_ids.into_added();
        cache.entry(scope.clone()).or_default().extend(added);
        debug!(scope = %scope, records = stats.total(), "Applied batch");
        Ok(stats)
    }

    fn replace_dependency_mismatches(
        &self,
        scope: &RepoScope,
        sha: &str,
        mismatches: Vec<DependencyMismatch>,
    ) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let count = batch::replace_mismatches(&tx, scope, sha, &mismatches)?;
        tx.commit()?;
        Ok(count)
    }

    fn replace_flow_graph(&self, scope: &RepoScope, graph: &FlowGraph) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM flow_graphs
             WHERE tenant_id = ?1 AND repo_id = ?2 AND entrypoint_key = ?3 AND sha = ?4 AND depth = ?5",
            params![
                scope.tenant_id,
                scope.repo_id,
                graph.key.entrypoint_key,
                graph.key.sha,
                graph.key.depth
            ],
        )?;
        tx.execute(
            "INSERT INTO flow_graphs (tenant_id, repo_id, entrypoint_key, sha, depth, root_symbol_uid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scope.tenant_id,
                scope.repo_id,
                graph.key.entrypoint_key,
                graph.key.sha,
                graph.key.depth,
                graph.root_symbol_uid
            ],
        )?;
        let graph_id = tx.last_insert_rowid();

        {
            let mut node_stmt = tx.prepare_cached(
                "INSERT INTO flow_graph_nodes (flow_graph_id, symbol_uid) VALUES (?1, ?2)",
            )?;
            for uid in &graph.node_uids {
                node_stmt.execute(params![graph_id, uid])?;
            }

            let mut edge_stmt = tx.prepare_cached(
                "INSERT INTO flow_graph_edges
                    (flow_graph_id, source_symbol_uid, edge_type, target_symbol_uid)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for key in &graph.edge_keys {
                edge_stmt.execute(params![
                    graph_id,
                    key.source_symbol_uid,
                    key.edge_type,
                    key.target_symbol_uid
                ])?;
            }
        }

        tx.commit()?;
        trace!(scope = %scope, key = %graph.key, "Replaced flow graph");
        Ok(())
    }

    fn delete_graph_for_file_paths(
        &self,
        scope: &RepoScope,
        file_paths: &[String],
    ) -> Result<PruneStats> {
        if file_paths.is_empty() {
            return Ok(PruneStats::default());
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let stats = prune::delete_file_paths(&tx, scope, file_paths)?;
        tx.commit()?;
        drop(conn);

        if let Some(ids) = self.cache()?.get_mut(scope) {
            for uid in &stats.removed_symbol_uids {
                ids.remove(uid);
            }
        }

        debug!(
            scope = %scope,
            files = file_paths.len(),
            nodes = stats.nodes(),
            edges = stats.edges,
            "Pruned graph for removed files"
        );
        Ok(stats)
    }

    fn list_nodes(&self, scope: &RepoScope) -> Result<Vec<GraphNode>> {
        self.query_list(
            &format!(
                "SELECT {NODE_COLUMNS} FROM nodes
                 WHERE tenant_id = ?1 AND repo_id = ?2 ORDER BY symbol_uid"
            ),
            params![scope.tenant_id, scope.repo_id],
            row_to_node,
        )
    }

    fn get_node_by_symbol_uid(
        &self,
        scope: &RepoScope,
        symbol_uid: &str,
    ) -> Result<Option<GraphNode>> {
        let conn = self.connection()?;
        let node = conn
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE tenant_id = ?1 AND repo_id = ?2 AND symbol_uid = ?3"
                ),
                params![scope.tenant_id, scope.repo_id, symbol_uid],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    fn list_nodes_in_files(
        &self,
        scope: &RepoScope,
        file_paths: &[String],
    ) -> Result<Vec<GraphNode>> {
        let mut nodes = Vec::new();
        for chunk in file_paths.chunks(INSERT_CHUNK_ROWS) {
            let mut values = vec![
                SqlValue::Text(scope.tenant_id.clone()),
                SqlValue::Text(scope.repo_id.clone()),
            ];
            values.extend(chunk.iter().cloned().map(SqlValue::Text));
            nodes.extend(self.query_list(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path IN ({})",
                    in_placeholders(chunk.len(), 3)
                ),
                params_from_iter(values),
                row_to_node,
            )?);
        }
        nodes.sort_by(|a, b| a.symbol_uid.cmp(&b.symbol_uid));
        nodes.dedup_by(|a, b| a.symbol_uid == b.symbol_uid);
        Ok(nodes)
    }

    fn get_nodes_by_symbol_uids(
        &self,
        scope: &RepoScope,
        symbol_uids: &BTreeSet<String>,
    ) -> Result<Vec<GraphNode>> {
        let uids: Vec<&String> = symbol_uids.iter().collect();
        let mut nodes = Vec::with_capacity(uids.len());
        for chunk in uids.chunks(INSERT_CHUNK_ROWS) {
            let mut values = vec![
                SqlValue::Text(scope.tenant_id.clone()),
                SqlValue::Text(scope.repo_id.clone()),
            ];
            values.extend(chunk.iter().map(|uid| SqlValue::Text((*uid).clone())));
            nodes.extend(self.query_list(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE tenant_id = ?1 AND repo_id = ?2 AND symbol_uid IN ({})",
                    in_placeholders(chunk.len(), 3)
                ),
                params_from_iter(values),
                row_to_node,
            )?);
        }
        nodes.sort_by(|a, b| a.symbol_uid.cmp(&b.symbol_uid));
        Ok(nodes)
    }

    fn list_edges(&self, scope: &RepoScope) -> Result<Vec<GraphEdge>> {
        self.query_list(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM {EDGE_JOIN}
                 WHERE e.tenant_id = ?1 AND e.repo_id = ?2
                 ORDER BY s.symbol_uid, e.edge_type, t.symbol_uid"
            ),
            params![scope.tenant_id, scope.repo_id],
            row_to_edge,
        )
    }

    fn list_edges_by_node(
        &self,
        scope: &RepoScope,
        symbol_uid: &str,
        direction: Direction,
    ) -> Result<Vec<GraphEdge>> {
        let filter = match direction {
            Direction::Out => "s.symbol_uid = ?3",
            Direction::In => "t.symbol_uid = ?3",
            Direction::Both => "(s.symbol_uid = ?3 OR t.symbol_uid = ?3)",
        };
        self.query_list(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM {EDGE_JOIN}
                 WHERE e.tenant_id = ?1 AND e.repo_id = ?2 AND {filter}
                 ORDER BY s.symbol_uid, e.edge_type, t.symbol_uid"
            ),
            params![scope.tenant_id, scope.repo_id, symbol_uid],
            row_to_edge,
        )
    }

    fn list_edge_occurrences_for_edge(
        &self,
        scope: &RepoScope,
        edge: &EdgeKey,
    ) -> Result<Vec<EdgeOccurrence>> {
        self.query_list(
            &format!(
                "SELECT {OCCURRENCE_COLUMNS} FROM edge_occurrences o
                 JOIN {EDGE_JOIN} ON e.id = o.edge_id
                 WHERE e.tenant_id = ?1 AND e.repo_id = ?2
                   AND s.symbol_uid = ?3 AND e.edge_type = ?4 AND t.symbol_uid = ?5
                 ORDER BY o.file_path, o.line_start, o.line_end, o.occurrence_kind, o.sha"
            ),
            params![
                scope.tenant_id,
                scope.repo_id,
                edge.source_symbol_uid,
                edge.edge_type,
                edge.target_symbol_uid
            ],
            row_to_occurrence,
        )
    }

    fn semantic_search(
        &self,
        scope: &RepoScope,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let candidates = self.query_list(
            &format!(
                "SELECT {NODE_COLUMNS} FROM nodes
                 WHERE tenant_id = ?1 AND repo_id = ?2 AND embedding IS NOT NULL
                   AND length(embedding) = ?3"
            ),
            params![scope.tenant_id, scope.repo_id, (query.len() * 4) as i64],
            row_to_node,
        )?;
        Ok(rank_by_similarity(query, candidates, limit))
    }

    fn list_flow_entrypoints(&self, scope: &RepoScope) -> Result<Vec<FlowEntrypoint>> {
        self.query_list(
            &format!(
                "SELECT {ENTRYPOINT_COLUMNS} FROM flow_entrypoints
                 WHERE tenant_id = ?1 AND repo_id = ?2 ORDER BY entrypoint_key"
            ),
            params![scope.tenant_id, scope.repo_id],
            row_to_entrypoint,
        )
    }

    fn get_flow_entrypoint(
        &self,
        scope: &RepoScope,
        entrypoint_key: &str,
    ) -> Result<Option<FlowEntrypoint>> {
        let conn = self.connection()?;
        let entrypoint = conn
            .query_row(
                &format!(
                    "SELECT {ENTRYPOINT_COLUMNS} FROM flow_entrypoints
                     WHERE tenant_id = ?1 AND repo_id = ?2 AND entrypoint_key = ?3"
                ),
                params![scope.tenant_id, scope.repo_id, entrypoint_key],
                row_to_entrypoint,
            )
            .optional()?;
        Ok(entrypoint)
    }

    fn get_flow_graph(&self, scope: &RepoScope, key: &FlowGraphKey) -> Result<Option<FlowGraph>> {
        let conn = self.connection()?;
        let Some((graph_id, root_symbol_uid)) = conn
            .query_row(
                "SELECT id, root_symbol_uid FROM flow_graphs
                 WHERE tenant_id = ?1 AND repo_id = ?2 AND entrypoint_key = ?3 AND sha = ?4 AND depth = ?5",
                params![scope.tenant_id, scope.repo_id, key.entrypoint_key, key.sha, key.depth],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
        else {
            return Ok(None);
        };

        let node_uids = conn
            .prepare("SELECT symbol_uid FROM flow_graph_nodes WHERE flow_graph_id = ?1")?
            .query_map([graph_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;

        let edge_keys = conn
            .prepare(
                "SELECT source_symbol_uid, edge_type, target_symbol_uid
                 FROM flow_graph_edges WHERE flow_graph_id = ?1",
            )?
            .query_map([graph_id], |row| {
                Ok(EdgeKey {
                    source_symbol_uid: row.get(0)?,
                    edge_type: row.get(1)?,
                    target_symbol_uid: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        Ok(Some(FlowGraph {
            key: key.clone(),
            root_symbol_uid,
            node_uids,
            edge_keys,
        }))
    }

    fn list_flow_graphs(&self, scope: &RepoScope) -> Result<Vec<FlowGraphSummary>> {
        self.query_list(
            "SELECT g.entrypoint_key, g.sha, g.depth, g.root_symbol_uid,
                    (SELECT COUNT(*) FROM flow_graph_nodes n WHERE n.flow_graph_id = g.id),
                    (SELECT COUNT(*) FROM flow_graph_edges x WHERE x.flow_graph_id = g.id)
             FROM flow_graphs g
             WHERE g.tenant_id = ?1 AND g.repo_id = ?2
             ORDER BY g.entrypoint_key, g.sha, g.depth",
            params![scope.tenant_id, scope.repo_id],
            |row| {
                Ok(FlowGraphSummary {
                    key: FlowGraphKey::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                    ),
                    root_symbol_uid: row.get(3)?,
                    node_count: row.get::<_, i64>(4)? as usize,
                    edge_count: row.get::<_, i64>(5)? as usize,
                })
            },
        )
    }

    fn list_dependency_manifests(&self, scope: &RepoScope) -> Result<Vec<DependencyManifest>> {
        self.query_list(
            "SELECT manifest_key, file_path, sha, ecosystem FROM dependency_manifests
             WHERE tenant_id = ?1 AND repo_id = ?2 ORDER BY manifest_key",
            params![scope.tenant_id, scope.repo_id],
            row_to_manifest,
        )
    }

    fn list_declared_dependencies(&self, scope: &RepoScope) -> Result<Vec<DeclaredDependency>> {
        self.query_list(
            "SELECT m.manifest_key, d.package_key, d.scope, d.version_range, m.file_path
             FROM declared_dependencies d
             JOIN dependency_manifests m ON m.id = d.manifest_id
             WHERE m.tenant_id = ?1 AND m.repo_id = ?2
             ORDER BY m.manifest_key, d.package_key, d.scope",
            params![scope.tenant_id, scope.repo_id],
            row_to_declared,
        )
    }

    fn list_observed_dependencies(&self, scope: &RepoScope) -> Result<Vec<ObservedDependency>> {
        self.query_list(
            "SELECT n.symbol_uid, o.package_key, o.file_path, o.sha
             FROM observed_dependencies o
             JOIN nodes n ON n.id = o.source_node_id
             WHERE n.tenant_id = ?1 AND n.repo_id = ?2
             ORDER BY n.symbol_uid, o.package_key",
            params![scope.tenant_id, scope.repo_id],
            row_to_observed,
        )
    }

    fn list_dependency_mismatches(
        &self,
        scope: &RepoScope,
        sha: Option<&str>,
    ) -> Result<Vec<DependencyMismatch>> {
        self.query_list(
            "SELECT mismatch_type, package_key, details, sha FROM dependency_mismatches
             WHERE tenant_id = ?1 AND repo_id = ?2 AND (?3 IS NULL OR sha = ?3)
             ORDER BY sha, id",
            params![scope.tenant_id, scope.repo_id, sha],
            row_to_mismatch,
        )
    }

    fn list_index_diagnostics(&self, scope: &RepoScope) -> Result<Vec<IndexDiagnostic>> {
        self.query_list(
            &format!(
                "SELECT {DIAGNOSTIC_COLUMNS} FROM index_diagnostics
                 WHERE tenant_id = ?1 AND repo_id = ?2 ORDER BY id"
            ),
            params![scope.tenant_id, scope.repo_id],
            row_to_diagnostic,
        )
    }

    fn list_unresolved_imports(&self, scope: &RepoScope) -> Result<Vec<UnresolvedImport>> {
        self.query_list(
            "SELECT file_path, line, spec, sha FROM unresolved_imports
             WHERE tenant_id = ?1 AND repo_id = ?2
             ORDER BY file_path, line, spec, sha",
            params![scope.tenant_id, scope.repo_id],
            row_to_unresolved,
        )
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
    fn schema_applies_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("graph.db");

        drop(SqliteGraphStore::open(&path).expect("first open"));
        let store = SqliteGraphStore::open(&path).expect("second open");

        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn cache_is_filled_after_commit() {
        let store = SqliteGraphStore::open_in_memory().expect("open");
        let batch = RecordBatch {
            nodes: vec![node("a", "a.js"), node("b", "b.js")],
            ..RecordBatch::default()
        };

        store.apply_batch(&scope(), &batch).expect("apply");

        assert_eq!(store.cached_symbol_ids(&scope()), 2);
    }

    #[test]
    fn single_record_batches_extend_the_cache() {
        let store = SqliteGraphStore::open_in_memory().expect("open");
        store.upsert_node(&scope(), node("a", "a.js")).expect("a");
        store.upsert_node(&scope(), node("b", "b.js")).expect("b");

        assert_eq!(store.cached_symbol_ids(&scope()), 2);
        store
            .upsert_edge(&scope(), GraphEdge::new("a", "Calls", "b"))
            .expect("both endpoints cached");
        assert_eq!(store.cached_symbol_ids(&scope()), 2);
    }

    #[test]
    fn occurrence_resolves_edge_of_uncached_symbols() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("graph.db");
        {
            let store = SqliteGraphStore::open(&path).expect("open");
            let batch = RecordBatch {
                nodes: vec![node("a", "a.js"), node("b", "b.js")],
                edges: vec![GraphEdge::new("a", "Calls", "b")],
                ..RecordBatch::default()
            };
            store.apply_batch(&scope(), &batch).expect("seed");
        }

        let store = SqliteGraphStore::open(&path).expect("reopen");
        assert_eq!(store.cached_symbol_ids(&scope()), 0);
        let occurrence = EdgeOccurrence {
            source_symbol_uid: "a".to_string(),
            edge_type: "Calls".to_string(),
            target_symbol_uid: "b".to_string(),
            file_path: "a.js".to_string(),
            line_start: 3,
            line_end: 3,
            occurrence_kind: "call".to_string(),
            sha: "s1".to_string(),
        };
        store
            .add_edge_occurrence(&scope(), occurrence)
            .expect("edge is stored");

        assert_eq!(store.cached_symbol_ids(&scope()), 2);
    }

    #[test]
    fn rolled_back_batch_leaves_cache_untouched() {
        let store = SqliteGraphStore::open_in_memory().expect("open");
        let batch = RecordBatch {
            nodes: vec![node("a", "a.js")],
            edges: vec![GraphEdge::new("a", "Calls", "ghost")],
            ..RecordBatch::default()
        };

        let err = store.apply_batch(&scope(), &batch).expect_err("dangling");

        assert!(matches!(err, Error::DanglingEdge { .. }));
        assert_eq!(store.cached_symbol_ids(&scope()), 0);
        assert!(store.list_nodes(&scope()).expect("list").is_empty());
    }

    #[test]
    fn prune_evicts_cached_ids() {
        let store = SqliteGraphStore::open_in_memory().expect("open");
        store.upsert_node(&scope(), node("a", "a.js")).expect("a");
        store.upsert_node(&scope(), node("b", "b.js")).expect("b");

        store
            .delete_graph_for_file_paths(&scope(), &["a.js".to_string()])
            .expect("prune");

        assert_eq!(store.cached_symbol_ids(&scope()), 1);
        // A new edge to the pruned symbol must not resolve through a stale id.
        let err = store
            .upsert_edge(&scope(), GraphEdge::new("b", "Calls", "a"))
            .expect_err("a is gone");
        assert!(matches!(err, Error::DanglingEdge { .. }));
    }

    #[test]
    fn embeddings_round_trip_through_blob() {
        let store = SqliteGraphStore::open_in_memory().expect("open");
        let mut n = node("a", "a.js");
        n.embedding = Some(vec![0.25, -0.5, 1.0]);
        n.contract = Some(serde_json::json!({"returns": "number"}));
        store.upsert_node(&scope(), n.clone()).expect("upsert");

        let stored = store
            .get_node_by_symbol_uid(&scope(), "a")
            .expect("get")
            .expect("exists");
        assert_eq!(stored.embedding, n.embedding);
        assert_eq!(stored.contract, n.contract);
    }
}
