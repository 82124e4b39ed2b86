//! Helper functions for database row conversion and parsing.
//!
//! These utilities convert between database representations and domain types.
//! Also provides SQL column list constants shared by the query modules.

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use serde_json::Value;

use crate::error::Result;
use crate::types::{
    DeclaredDependency, DependencyManifest, DependencyMismatch, EdgeOccurrence, FlowEntrypoint,
    GraphEdge, GraphNode, IndexDiagnostic, MismatchType, ObservedDependency, UnresolvedImport,
};

/// Maximum rows per multi-row `INSERT`, keeping bound parameters well under
/// SQLite's variable limit.
pub(crate) const INSERT_CHUNK_ROWS: usize = 200;

/// SQL column list for the nodes table.
///
/// Use with `row_to_node` for consistent column ordering.
pub(crate) const NODE_COLUMNS: &str = "symbol_uid, node_key, qualified_name, node_type, \
     symbol_kind, file_path, line_start, line_end, language, signature, signature_hash, \
     contract, constraints, allowable_values, embedding, embedding_text, \
     first_seen_sha, last_seen_sha";

/// Number of columns in [`NODE_COLUMNS`].
pub(crate) const NODE_COLUMN_COUNT: usize = 18;

/// Edge columns resolved to symbol uids. Expects aliases `e`, `s` and `t`.
///
/// Use with `row_to_edge`.
pub(crate) const EDGE_COLUMNS: &str = "s.symbol_uid, e.edge_type, t.symbol_uid, \
     e.metadata, e.first_seen_sha, e.last_seen_sha";

/// Joins every edge to its endpoint nodes.
pub(crate) const EDGE_JOIN: &str = "edges e \
     JOIN nodes s ON s.id = e.source_node_id \
     JOIN nodes t ON t.id = e.target_node_id";

/// Occurrence columns. Expects aliases `o`, `s` and `t` over [`EDGE_JOIN`].
pub(crate) const OCCURRENCE_COLUMNS: &str = "s.symbol_uid, e.edge_type, t.symbol_uid, \
     o.file_path, o.line_start, o.line_end, o.occurrence_kind, o.sha";

/// SQL column list for the `flow_entrypoints` table.
pub(crate) const ENTRYPOINT_COLUMNS: &str =
    "entrypoint_key, entrypoint_type, method, path, symbol_uid, file_path, sha";

/// SQL column list for the `index_diagnostics` table.
pub(crate) const DIAGNOSTIC_COLUMNS: &str = "sha, mode, changed_files, impacted_files, \
     reparsed_files, impacted_symbol_uids, created_at";

/// `(?, ?, ...), (?, ?, ...)` for a multi-row `VALUES` clause.
pub(crate) fn values_placeholders(rows: usize, columns: usize) -> String {
    let row = format!("({})", vec!["?"; columns].join(", "));
    vec![row; rows].join(", ")
}

/// `?, ?, ...` for an `IN (...)` list, numbered from `first`.
pub(crate) fn in_placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Encode an embedding as a little-endian `f32` blob.
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a little-endian `f32` blob.
pub(crate) fn blob_to_embedding(blob: &[u8]) -> rusqlite::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Blob,
            format!(
                "embedding blob has {} bytes, not a multiple of 4. Database may be corrupted.",
                blob.len()
            )
            .into(),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Serialize optional structured metadata to a TEXT column value.
pub(crate) fn json_column(value: Option<&Value>) -> Result<SqlValue> {
    Ok(match value {
        Some(value) => SqlValue::Text(serde_json::to_string(value)?),
        None => SqlValue::Null,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(column: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn optional_json(row: &rusqlite::Row, column: usize) -> rusqlite::Result<Option<Value>> {
    row.get::<_, Option<String>>(column)?
        .map(|text| parse_json(column, &text))
        .transpose()
}

/// Parse a mismatch type string from the database.
///
/// Returns an error for unrecognized values, indicating possible database corruption.
pub(crate) fn parse_mismatch_type(s: &str) -> rusqlite::Result<MismatchType> {
    s.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("Unknown mismatch type '{s}' in database. Database may be corrupted or from a newer version.").into(),
        )
    })
}

/// Column values for one node, in [`NODE_COLUMNS`] order, after the scope columns.
pub(crate) fn node_values(node: &GraphNode) -> Result<Vec<SqlValue>> {
    Ok(vec![
        node.symbol_uid.clone().into(),
        node.node_key.clone().into(),
        node.qualified_name.clone().into(),
        node.node_type.clone().into(),
        node.symbol_kind.clone().into(),
        node.file_path.clone().into(),
        node.line_start.map(i64::from).into(),
        node.line_end.map(i64::from).into(),
        node.language.clone().into(),
        node.signature.clone().into(),
        node.signature_hash.clone().into(),
        json_column(node.contract.as_ref())?,
        json_column(node.constraints.as_ref())?,
        json_column(node.allowable_values.as_ref())?,
        node.embedding.as_deref().map(embedding_to_blob).into(),
        node.embedding_text.clone().into(),
        node.first_seen_sha.clone().into(),
        node.last_seen_sha.clone().into(),
    ])
}

/// Convert a database row to a [`GraphNode`].
///
/// Expected columns: [`NODE_COLUMNS`]
pub(crate) fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<GraphNode> {
    let embedding = row
        .get::<_, Option<Vec<u8>>>(14)?
        .map(|blob| blob_to_embedding(&blob))
        .transpose()?;

    Ok(GraphNode {
        symbol_uid: row.get(0)?,
        node_key: row.get(1)?,
        qualified_name: row.get(2)?,
        node_type: row.get(3)?,
        symbol_kind: row.get(4)?,
        file_path: row.get(5)?,
        line_start: row.get(6)?,
        line_end: row.get(7)?,
        language: row.get(8)?,
        signature: row.get(9)?,
        signature_hash: row.get(10)?,
        contract: optional_json(row, 11)?,
        constraints: optional_json(row, 12)?,
        allowable_values: optional_json(row, 13)?,
        embedding,
        embedding_text: row.get(15)?,
        first_seen_sha: row.get(16)?,
        last_seen_sha: row.get(17)?,
    })
}

/// Convert a database row to a [`GraphEdge`].
///
/// Expected columns: [`EDGE_COLUMNS`]
pub(crate) fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<GraphEdge> {
    Ok(GraphEdge {
        source_symbol_uid: row.get(0)?,
        edge_type: row.get(1)?,
        target_symbol_uid: row.get(2)?,
        metadata: optional_json(row, 3)?,
        first_seen_sha: row.get(4)?,
        last_seen_sha: row.get(5)?,
    })
}

/// Convert a database row to an [`EdgeOccurrence`].
///
/// Expected columns: [`OCCURRENCE_COLUMNS`]
pub(crate) fn row_to_occurrence(row: &rusqlite::Row) -> rusqlite::Result<EdgeOccurrence> {
    Ok(EdgeOccurrence {
        source_symbol_uid: row.get(0)?,
        edge_type: row.get(1)?,
        target_symbol_uid: row.get(2)?,
        file_path: row.get(3)?,
        line_start: row.get(4)?,
        line_end: row.get(5)?,
        occurrence_kind: row.get(6)?,
        sha: row.get(7)?,
    })
}

/// Convert a database row to a [`FlowEntrypoint`].
///
/// Expected columns: [`ENTRYPOINT_COLUMNS`]
pub(crate) fn row_to_entrypoint(row: &rusqlite::Row) -> rusqlite::Result<FlowEntrypoint> {
    Ok(FlowEntrypoint {
        entrypoint_key: row.get(0)?,
        entrypoint_type: row.get(1)?,
        method: row.get(2)?,
        path: row.get(3)?,
        symbol_uid: row.get(4)?,
        file_path: row.get(5)?,
        sha: row.get(6)?,
    })
}

/// Expected columns: `manifest_key, file_path, sha, ecosystem`
pub(crate) fn row_to_manifest(row: &rusqlite::Row) -> rusqlite::Result<DependencyManifest> {
    Ok(DependencyManifest {
        manifest_key: row.get(0)?,
        file_path: row.get(1)?,
        sha: row.get(2)?,
        ecosystem: row.get(3)?,
    })
}

/// Expected columns: `manifest_key, package_key, scope, version_range, file_path`
pub(crate) fn row_to_declared(row: &rusqlite::Row) -> rusqlite::Result<DeclaredDependency> {
    Ok(DeclaredDependency {
        manifest_key: row.get(0)?,
        package_key: row.get(1)?,
        scope: row.get(2)?,
        version_range: row.get(3)?,
        file_path: row.get(4)?,
    })
}

/// Expected columns: `source_symbol_uid, package_key, file_path, sha`
pub(crate) fn row_to_observed(row: &rusqlite::Row) -> rusqlite::Result<ObservedDependency> {
    Ok(ObservedDependency {
        source_symbol_uid: row.get(0)?,
        package_key: row.get(1)?,
        file_path: row.get(2)?,
        sha: row.get(3)?,
    })
}

/// Expected columns: `mismatch_type, package_key, details, sha`
pub(crate) fn row_to_mismatch(row: &rusqlite::Row) -> rusqlite::Result<DependencyMismatch> {
    Ok(DependencyMismatch {
        mismatch_type: parse_mismatch_type(&row.get::<_, String>(0)?)?,
        package_key: row.get(1)?,
        details: parse_json(2, &row.get::<_, String>(2)?)?,
        sha: row.get(3)?,
    })
}

/// Convert a database row to an [`IndexDiagnostic`].
///
/// Expected columns: [`DIAGNOSTIC_COLUMNS`]
pub(crate) fn row_to_diagnostic(row: &rusqlite::Row) -> rusqlite::Result<IndexDiagnostic> {
    let mode: String = row.get(1)?;
    let created_at: String = row.get(6)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(IndexDiagnostic {
        sha: row.get(0)?,
        mode: mode.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Text,
                format!("Unknown index mode '{mode}' in database.").into(),
            )
        })?,
        changed_files: parse_json(2, &row.get::<_, String>(2)?)?,
        impacted_files: parse_json(3, &row.get::<_, String>(3)?)?,
        reparsed_files: parse_json(4, &row.get::<_, String>(4)?)?,
        impacted_symbol_uids: parse_json(5, &row.get::<_, String>(5)?)?,
        created_at: Some(created_at),
    })
}

/// Expected columns: `file_path, line, spec, sha`
pub(crate) fn row_to_unresolved(row: &rusqlite::Row) -> rusqlite::Result<UnresolvedImport> {
    Ok(UnresolvedImport {
        file_path: row.get(0)?,
        line: row.get(1)?,
        spec: row.get(2)?,
        sha: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_round_trip_preserves_values() {
        let embedding = vec![0.5, -1.25, 3.0];
        let blob = embedding_to_blob(&embedding);

        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_embedding(&blob).expect("valid blob"), embedding);
    }

    #[test]
    fn truncated_embedding_blob_is_rejected() {
        assert!(blob_to_embedding(&[0, 0, 0]).is_err());
    }

    #[test]
    fn placeholders_have_expected_shape() {
        assert_eq!(values_placeholders(2, 3), "(?, ?, ?), (?, ?, ?)");
        assert_eq!(in_placeholders(3, 3), "?3, ?4, ?5");
    }

    #[test]
    fn unknown_mismatch_type_is_a_conversion_error() {
        assert!(parse_mismatch_type("version_drift").is_err());
    }
}
