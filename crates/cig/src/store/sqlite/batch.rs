//! Atomic batch writes.
//!
//! A [`RecordBatch`] is written inside one transaction using multi-row
//! `INSERT ... ON CONFLICT ... RETURNING` statements, so a push touching
//! thousands of symbols costs a few dozen round trips instead of thousands.
//! Any error drops the transaction, which rolls it back.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Transaction, params, params_from_iter};
use tracing::debug;

use super::helpers::{
    INSERT_CHUNK_ROWS, NODE_COLUMN_COUNT, NODE_COLUMNS, in_placeholders, json_column, node_values,
    values_placeholders,
};
use crate::error::{Error, Result};
use crate::records::RecordBatch;
use crate::store::BatchStats;
use crate::types::{DependencyMismatch, EdgeKey, GraphEdge, RepoScope};

/// Committed `symbol_uid -> nodes.id` entries for one scope.
pub(crate) type SymbolIds = HashMap<String, i64>;

/// Id lookups for one transaction.
///
/// Reads fall through to the committed cache; ids created or looked up by the
/// transaction land in `added`, which the caller merges into the cache only
/// after commit.
pub(crate) struct NodeIds<'c> {
    committed: &'c SymbolIds,
    added: SymbolIds,
}

impl<'c> NodeIds<'c> {
    pub(crate) fn new(committed: &'c SymbolIds) -> Self {
        Self {
            committed,
            added: SymbolIds::new(),
        }
    }

    fn get(&self, symbol_uid: &str) -> Option<i64> {
        self.added
            .get(symbol_uid)
            .or_else(|| self.committed.get(symbol_uid))
            .copied()
    }

    fn contains(&self, symbol_uid: &str) -> bool {
        self.added.contains_key(symbol_uid) || self.committed.contains_key(symbol_uid)
    }

    fn insert(&mut self, symbol_uid: String, id: i64) {
        self.added.insert(symbol_uid, id);
    }

    /// Ids this transaction learned.
    pub(crate) fn into_added(self) -> SymbolIds {
        self.added
    }
}

fn scope_values(scope: &RepoScope) -> [SqlValue; 2] {
    [
        SqlValue::Text(scope.tenant_id.clone()),
        SqlValue::Text(scope.repo_id.clone()),
    ]
}

/// Write `batch` inside `tx`.
///
/// `node_ids` reads through to the committed cache and records every id this
/// batch creates or looks up; the caller merges those into the cache only
/// after commit.
pub(crate) fn write_batch(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    batch: &RecordBatch,
    node_ids: &mut NodeIds<'_>,
) -> Result<BatchStats> {
    let mut stats = BatchStats {
        nodes: upsert_nodes(tx, scope, batch, node_ids)?,
        ..BatchStats::default()
    };

    let edge_ids = upsert_edges(tx, scope, &batch.edges, node_ids)?;
    stats.edges = batch.edges.len();

    stats.occurrences = insert_occurrences(tx, scope, batch, node_ids, &edge_ids)?;
    stats.entrypoints = upsert_entrypoints(tx, scope, batch)?;
    stats.dependencies = write_dependencies(tx, scope, batch, node_ids)?;

    for (sha, mismatches) in &batch.mismatches {
        stats.mismatches += replace_mismatches(tx, scope, sha, mismatches)?;
    }

    stats.diagnostics = insert_diagnostics(tx, scope, batch)?;
    stats.unresolved_imports = insert_unresolved(tx, scope, batch)?;

    Ok(stats)
}

fn upsert_nodes(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    batch: &RecordBatch,
    node_ids: &mut NodeIds<'_>,
) -> Result<usize> {
    for chunk in batch.nodes.chunks(INSERT_CHUNK_ROWS) {
        let sql = format!(
            "INSERT INTO nodes (tenant_id, repo_id, {NODE_COLUMNS})
             VALUES {}
             ON CONFLICT (tenant_id, repo_id, symbol_uid) DO UPDATE SET
                node_key = excluded.node_key,
                qualified_name = excluded.qualified_name,
                node_type = excluded.node_type,
                symbol_kind = excluded.symbol_kind,
                file_path = excluded.file_path,
                line_start = excluded.line_start,
                line_end = excluded.line_end,
                language = excluded.language,
                signature = excluded.signature,
                signature_hash = excluded.signature_hash,
                contract = excluded.contract,
                constraints = excluded.constraints,
                allowable_values = excluded.allowable_values,
                embedding = excluded.embedding,
                embedding_text = excluded.embedding_text,
                first_seen_sha = COALESCE(nodes.first_seen_sha, excluded.first_seen_sha),
                last_seen_sha = COALESCE(excluded.last_seen_sha, nodes.last_seen_sha)
             RETURNING symbol_uid, id",
            values_placeholders(chunk.len(), NODE_COLUMN_COUNT + 2)
        );

        let mut values = Vec::with_capacity(chunk.len() * (NODE_COLUMN_COUNT + 2));
        for node in chunk {
            values.extend(scope_values(scope));
            values.extend(node_values(node)?);
        }

        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (uid, id) = row?;
            node_ids.insert(uid, id);
        }
    }
    Ok(batch.nodes.len())
}

/// Fill `node_ids` with the committed ids of `uids` not already known.
fn resolve_node_ids<'a>(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    uids: impl IntoIterator<Item = &'a str>,
    node_ids: &mut NodeIds<'_>,
) -> Result<()> {
    let missing: Vec<&str> = uids
        .into_iter()
        .filter(|uid| !node_ids.contains(uid))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    for chunk in missing.chunks(INSERT_CHUNK_ROWS) {
        let sql = format!(
            "SELECT symbol_uid, id FROM nodes
             WHERE tenant_id = ?1 AND repo_id = ?2 AND symbol_uid IN ({})",
            in_placeholders(chunk.len(), 3)
        );
        let mut values: Vec<SqlValue> = scope_values(scope).into();
        values.extend(chunk.iter().map(|uid| SqlValue::Text((*uid).to_string())));

        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (uid, id) = row?;
            node_ids.insert(uid, id);
        }
    }
    Ok(())
}

fn upsert_edges(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    edges: &[GraphEdge],
    node_ids: &mut NodeIds<'_>,
) -> Result<HashMap<EdgeKey, i64>> {
    resolve_node_ids(
        tx,
        scope,
        edges.iter().flat_map(|e| {
            [e.source_symbol_uid.as_str(), e.target_symbol_uid.as_str()]
        }),
        node_ids,
    )?;

    let mut resolved = Vec::with_capacity(edges.len());
    for edge in edges {
        let endpoint = |uid: &String| {
            node_ids.get(uid).ok_or_else(|| Error::DanglingEdge {
                edge: edge.key(),
                missing_symbol_uid: uid.clone(),
            })
        };
        let source = endpoint(&edge.source_symbol_uid)?;
        let target = endpoint(&edge.target_symbol_uid)?;
        resolved.push((edge, source, target));
    }

    let mut edge_ids = HashMap::with_capacity(edges.len());
    for chunk in resolved.chunks(INSERT_CHUNK_ROWS) {
        let sql = format!(
            "INSERT INTO edges (tenant_id, repo_id, source_node_id, edge_type, target_node_id,
                                metadata, first_seen_sha, last_seen_sha)
             VALUES {}
             ON CONFLICT (source_node_id, edge_type, target_node_id) DO UPDATE SET
                metadata = excluded.metadata,
                first_seen_sha = COALESCE(edges.first_seen_sha, excluded.first_seen_sha),
                last_seen_sha = COALESCE(excluded.last_seen_sha, edges.last_seen_sha)
             RETURNING source_node_id, edge_type, target_node_id, id",
            values_placeholders(chunk.len(), 8)
        );

        let mut keys_by_ids = HashMap::with_capacity(chunk.len());
        let mut values = Vec::with_capacity(chunk.len() * 8);
        for (edge, source, target) in chunk {
            keys_by_ids.insert((*source, edge.edge_type.clone(), *target), edge.key());
            values.extend(scope_values(scope));
            values.push(SqlValue::Integer(*source));
            values.push(SqlValue::Text(edge.edge_type.clone()));
            values.push(SqlValue::Integer(*target));
            values.push(json_column(edge.metadata.as_ref())?);
            values.push(edge.first_seen_sha.clone().into());
            values.push(edge.last_seen_sha.clone().into());
        }

        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        for row in rows {
            let (source, edge_type, target, id) = row?;
            if let Some(key) = keys_by_ids.remove(&(source, edge_type, target)) {
                edge_ids.insert(key, id);
            }
        }
    }

    Ok(edge_ids)
}

fn lookup_edge_id(
    tx: &Transaction<'_>,
    key: &EdgeKey,
    node_ids: &NodeIds<'_>,
) -> Result<Option<i64>> {
    let (Some(source), Some(target)) = (
        node_ids.get(&key.source_symbol_uid),
        node_ids.get(&key.target_symbol_uid),
    ) else {
        return Ok(None);
    };

    let mut stmt = tx.prepare_cached(
        "SELECT id FROM edges
         WHERE source_node_id = ?1 AND edge_type = ?2 AND target_node_id = ?3",
    )?;
    let mut rows = stmt.query(params![source, key.edge_type, target])?;
    Ok(match rows.next()? {
        Some(row) => Some(row.get(0)?),
        None => None,
    })
}

fn insert_occurrences(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    batch: &RecordBatch,
    node_ids: &mut NodeIds<'_>,
    edge_ids: &HashMap<EdgeKey, i64>,
) -> Result<usize> {
    if batch.occurrences.is_empty() {
        return Ok(0);
    }

    resolve_node_ids(
        tx,
        scope,
        batch.occurrences.iter().flat_map(|o| {
            [o.source_symbol_uid.as_str(), o.target_symbol_uid.as_str()]
        }),
        node_ids,
    )?;

    let mut resolved = Vec::with_capacity(batch.occurrences.len());
    let mut looked_up: HashMap<EdgeKey, i64> = HashMap::new();
    for occurrence in &batch.occurrences {
        let key = occurrence.edge_key();
        let id = match edge_ids.get(&key).or_else(|| looked_up.get(&key)) {
            Some(id) => *id,
            None => {
                let found = lookup_edge_id(tx, &key, node_ids)?;
                let id = found.ok_or_else(|| Error::DanglingReference {
                    record_type: "edge_occurrence",
                    key: format!("{}:{}", occurrence.file_path, occurrence.line_start),
                    missing: format!("edge {key}"),
                })?;
                looked_up.insert(key, id);
                id
            }
        };
        resolved.push((occurrence, id));
    }

    for chunk in resolved.chunks(INSERT_CHUNK_ROWS) {
        let sql = format!(
            "INSERT INTO edge_occurrences
                (edge_id, file_path, line_start, line_end, occurrence_kind, sha)
             VALUES {}
             ON CONFLICT DO NOTHING",
            values_placeholders(chunk.len(), 6)
        );
        let mut values = Vec::with_capacity(chunk.len() * 6);
        for (occurrence, edge_id) in chunk {
            values.push(SqlValue::Integer(*edge_id));
            values.push(SqlValue::Text(occurrence.file_path.clone()));
            values.push(SqlValue::Integer(i64::from(occurrence.line_start)));
            values.push(SqlValue::Integer(i64::from(occurrence.line_end)));
            values.push(SqlValue::Text(occurrence.occurrence_kind.clone()));
            values.push(SqlValue::Text(occurrence.sha.clone()));
        }
        tx.execute(&sql, params_from_iter(values))?;
    }

    Ok(batch.occurrences.len())
}

fn upsert_entrypoints(tx: &Transaction<'_>, scope: &RepoScope, batch: &RecordBatch) -> Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO flow_entrypoints
            (tenant_id, repo_id, entrypoint_key, entrypoint_type, method, path,
             symbol_uid, file_path, sha)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (tenant_id, repo_id, entrypoint_key) DO UPDATE SET
            entrypoint_type = excluded.entrypoint_type,
            method = excluded.method,
            path = excluded.path,
            symbol_uid = excluded.symbol_uid,
            file_path = excluded.file_path,
            sha = excluded.sha",
    )?;
    for ep in &batch.entrypoints {
        stmt.execute(params![
            scope.tenant_id,
            scope.repo_id,
            ep.entrypoint_key,
            ep.entrypoint_type,
            ep.method,
            ep.path,
            ep.symbol_uid,
            ep.file_path,
            ep.sha,
        ])?;
    }
    Ok(batch.entrypoints.len())
}

fn write_dependencies(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    batch: &RecordBatch,
    node_ids: &mut NodeIds<'_>,
) -> Result<usize> {
    let superseded = supersede_manifests(tx, scope, batch)?;
    if superseded > 0 {
        debug!(scope = %scope, manifests = superseded, "Dropped superseded manifests");
    }

    let mut manifest_ids: HashMap<String, i64> = HashMap::new();
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO dependency_manifests (tenant_id, repo_id, manifest_key, file_path, sha, ecosystem)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (tenant_id, repo_id, manifest_key) DO UPDATE SET
                file_path = excluded.file_path,
                sha = excluded.sha,
                ecosystem = excluded.ecosystem
             RETURNING id",
        )?;
        for manifest in &batch.manifests {
            let id: i64 = stmt.query_row(
                params![
                    scope.tenant_id,
                    scope.repo_id,
                    manifest.manifest_key,
                    manifest.file_path,
                    manifest.sha,
                    manifest.ecosystem,
                ],
                |row| row.get(0),
            )?;
            manifest_ids.insert(manifest.manifest_key.clone(), id);
        }
    }

    if !batch.declared.is_empty() {
        let mut lookup = tx.prepare_cached(
            "SELECT id FROM dependency_manifests
             WHERE tenant_id = ?1 AND repo_id = ?2 AND manifest_key = ?3",
        )?;
        let mut insert = tx.prepare_cached(
            "INSERT INTO declared_dependencies (manifest_id, package_key, scope, version_range)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (manifest_id, package_key, scope) DO UPDATE SET
                version_range = excluded.version_range",
        )?;
        for dep in &batch.declared {
            let manifest_id = match manifest_ids.get(&dep.manifest_key) {
                Some(id) => *id,
                None => {
                    let mut rows =
                        lookup.query(params![scope.tenant_id, scope.repo_id, dep.manifest_key])?;
                    let id: i64 = match rows.next()? {
                        Some(row) => row.get(0)?,
                        None => {
                            return Err(Error::DanglingReference {
                                record_type: "declared_dependency",
                                key: dep.package_key.clone(),
                                missing: format!("manifest `{}`", dep.manifest_key),
                            });
                        }
                    };
                    manifest_ids.insert(dep.manifest_key.clone(), id);
                    id
                }
            };
            insert.execute(params![
                manifest_id,
                dep.package_key,
                dep.scope,
                dep.version_range
            ])?;
        }
    }

    if !batch.observed.is_empty() {
        resolve_node_ids(
            tx,
            scope,
            batch.observed.iter().map(|d| d.source_symbol_uid.as_str()),
            node_ids,
        )?;
        let mut insert = tx.prepare_cached(
            "INSERT INTO observed_dependencies (source_node_id, package_key, file_path, sha)
             VALUES (?1, ?2, COALESCE(NULLIF(?3, ''), (SELECT file_path FROM nodes WHERE id = ?1)), ?4)
             ON CONFLICT (source_node_id, package_key) DO UPDATE SET
                file_path = excluded.file_path,
                sha = excluded.sha",
        )?;
        for dep in &batch.observed {
            let source = node_ids.get(&dep.source_symbol_uid).ok_or_else(|| {
                Error::DanglingReference {
                    record_type: "observed_dependency",
                    key: dep.package_key.clone(),
                    missing: format!("symbol `{}`", dep.source_symbol_uid),
                }
            })?;
            insert.execute(params![source, dep.package_key, dep.file_path, dep.sha])?;
        }
    }

    Ok(batch.manifests.len() + batch.declared.len() + batch.observed.len())
}

/// Delete stored manifests for files the batch brings a newer manifest for.
///
/// Their declared dependencies go with them through `ON DELETE CASCADE`.
fn supersede_manifests(tx: &Transaction<'_>, scope: &RepoScope, batch: &RecordBatch) -> Result<usize> {
    if batch.manifests.is_empty() {
        return Ok(0);
    }

    let files: BTreeSet<&str> = batch.manifests.iter().map(|m| m.file_path.as_str()).collect();
    let keys: BTreeSet<&str> = batch
        .manifests
        .iter()
        .map(|m| m.manifest_key.as_str())
        .collect();

    let mut select = tx.prepare_cached(
        "SELECT id, manifest_key FROM dependency_manifests
         WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path = ?3",
    )?;
    let mut stale = Vec::new();
    for file in files {
        let rows = select.query_map(params![scope.tenant_id, scope.repo_id, file], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, key) = row?;
            if !keys.contains(key.as_str()) {
                stale.push(id);
            }
        }
    }

    let mut delete = tx.prepare_cached("DELETE FROM dependency_manifests WHERE id = ?1")?;
    for id in &stale {
        delete.execute([id])?;
    }
    Ok(stale.len())
}

/// Replace the stored mismatch set for `sha`.
pub(crate) fn replace_mismatches(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    sha: &str,
    mismatches: &[DependencyMismatch],
) -> Result<usize> {
    tx.execute(
        "DELETE FROM dependency_mismatches WHERE tenant_id = ?1 AND repo_id = ?2 AND sha = ?3",
        params![scope.tenant_id, scope.repo_id, sha],
    )?;

    let mut stmt = tx.prepare_cached(
        "INSERT INTO dependency_mismatches (tenant_id, repo_id, sha, mismatch_type, package_key, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for mismatch in mismatches {
        stmt.execute(params![
            scope.tenant_id,
            scope.repo_id,
            sha,
            mismatch.mismatch_type.as_str(),
            mismatch.package_key,
            serde_json::to_string(&mismatch.details)?,
        ])?;
    }
    Ok(mismatches.len())
}

fn insert_diagnostics(tx: &Transaction<'_>, scope: &RepoScope, batch: &RecordBatch) -> Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO index_diagnostics
            (tenant_id, repo_id, sha, mode, changed_files, impacted_files,
             reparsed_files, impacted_symbol_uids, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for diagnostic in &batch.diagnostics {
        let created_at = diagnostic.created_at.unwrap_or_else(Utc::now);
        stmt.execute(params![
            scope.tenant_id,
            scope.repo_id,
            diagnostic.sha,
            diagnostic.mode.as_str(),
            serde_json::to_string(&diagnostic.changed_files)?,
            serde_json::to_string(&diagnostic.impacted_files)?,
            serde_json::to_string(&diagnostic.reparsed_files)?,
            serde_json::to_string(&diagnostic.impacted_symbol_uids)?,
            created_at.to_rfc3339(),
        ])?;
    }
    Ok(batch.diagnostics.len())
}

fn insert_unresolved(tx: &Transaction<'_>, scope: &RepoScope, batch: &RecordBatch) -> Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO unresolved_imports (tenant_id, repo_id, file_path, line, spec, sha)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT DO NOTHING",
    )?;
    for import in &batch.unresolved_imports {
        stmt.execute(params![
            scope.tenant_id,
            scope.repo_id,
            import.file_path,
            import.line,
            import.spec,
            import.sha,
        ])?;
    }
    Ok(batch.unresolved_imports.len())
}
