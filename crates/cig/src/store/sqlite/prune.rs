//! File-scoped deletion.
//!
//! The removed paths are staged in a temporary table so every statement can
//! use `IN (SELECT path FROM temp.pruned_paths)` regardless of how many files
//! a push deletes. Edges, occurrences, observed and declared dependencies go
//! with their parents through `ON DELETE CASCADE`.

use rusqlite::{Transaction, params};

use crate::error::Result;
use crate::store::PruneStats;
use crate::types::RepoScope;

const STAGED: &str = "SELECT path FROM temp.pruned_paths";

/// Delete all state owned by `file_paths` inside `tx`.
pub(crate) fn delete_file_paths(
    tx: &Transaction<'_>,
    scope: &RepoScope,
    file_paths: &[String],
) -> Result<PruneStats> {
    tx.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS pruned_paths (path TEXT PRIMARY KEY);
         DELETE FROM temp.pruned_paths;",
    )?;
    {
        let mut stage = tx.prepare_cached("INSERT OR IGNORE INTO temp.pruned_paths (path) VALUES (?1)")?;
        for path in file_paths {
            stage.execute([path])?;
        }
    }

    let mut stats = PruneStats::default();
    let scope_params = params![scope.tenant_id, scope.repo_id];

    {
        let mut stmt = tx.prepare(&format!(
            "SELECT symbol_uid FROM nodes
             WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path IN ({STAGED})
             ORDER BY symbol_uid"
        ))?;
        stats.removed_symbol_uids = stmt
            .query_map(scope_params, |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
    }

    // Count what the node delete will cascade into before it happens.
    let dead_edges = format!(
        "FROM edges e
         JOIN nodes s ON s.id = e.source_node_id
         JOIN nodes t ON t.id = e.target_node_id
         WHERE e.tenant_id = ?1 AND e.repo_id = ?2
           AND (s.file_path IN ({STAGED}) OR t.file_path IN ({STAGED}))"
    );
    stats.edges = tx.query_row(&format!("SELECT COUNT(*) {dead_edges}"), scope_params, |row| {
        row.get::<_, i64>(0)
    })? as usize;
    stats.occurrences = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM edge_occurrences
             WHERE edge_id IN (SELECT e.id {dead_edges})"
        ),
        scope_params,
        |row| row.get::<_, i64>(0),
    )? as usize;

    tx.execute(
        &format!(
            "DELETE FROM nodes
             WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path IN ({STAGED})"
        ),
        scope_params,
    )?;

    // Occurrences recorded in a removed file whose edge survived.
    stats.occurrences += tx.execute(
        &format!(
            "DELETE FROM edge_occurrences
             WHERE file_path IN ({STAGED})
               AND edge_id IN (SELECT id FROM edges WHERE tenant_id = ?1 AND repo_id = ?2)"
        ),
        scope_params,
    )?;

    let dead_entrypoints = format!(
        "SELECT entrypoint_key FROM flow_entrypoints
         WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path IN ({STAGED})"
    );
    stats.flow_graphs = tx.execute(
        &format!(
            "DELETE FROM flow_graphs
             WHERE tenant_id = ?1 AND repo_id = ?2 AND entrypoint_key IN ({dead_entrypoints})"
        ),
        scope_params,
    )?;
    stats.entrypoints = tx.execute(
        &format!(
            "DELETE FROM flow_entrypoints
             WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path IN ({STAGED})"
        ),
        scope_params,
    )?;

    stats.manifests = tx.execute(
        &format!(
            "DELETE FROM dependency_manifests
             WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path IN ({STAGED})"
        ),
        scope_params,
    )?;

    stats.unresolved_imports = tx.execute(
        &format!(
            "DELETE FROM unresolved_imports
             WHERE tenant_id = ?1 AND repo_id = ?2 AND file_path IN ({STAGED})"
        ),
        scope_params,
    )?;

    tx.execute("DELETE FROM temp.pruned_paths", [])?;

    Ok(stats)
}
