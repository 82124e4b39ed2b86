//! Ingestion record envelopes.
//!
//! An external parser emits `{type, data}` envelopes. This module decodes
//! them into typed [`IngestionRecord`]s, validates natural keys, and folds a
//! list of records into a de-duplicated [`RecordBatch`] ready for a store.
//!
//! `flow_graph` envelopes are rejected here: flow graphs are written only by
//! materialization, which clears prior membership atomically.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::{
    DeclaredDependency, DependencyManifest, DependencyMismatch, EdgeKey, EdgeOccurrence,
    FlowEntrypoint, GraphEdge, GraphNode, IndexDiagnostic, MismatchType, ObservedDependency,
    UnresolvedImport,
};

/// Scope assigned to declared dependencies that omit one.
pub const DEFAULT_DEPENDENCY_SCOPE: &str = "runtime";

/// Occurrence kind assigned to occurrences that omit one.
pub const DEFAULT_OCCURRENCE_KIND: &str = "reference";

/// Raw `{type, data}` envelope as produced by the indexer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordEnvelope {
    /// Record kind
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record payload
    #[serde(default)]
    pub data: Value,
}

/// A decoded ingestion record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum IngestionRecord {
    /// Symbol
    Node(GraphNode),
    /// Relationship between symbols
    Edge(GraphEdge),
    /// Provenance of an edge
    EdgeOccurrence(EdgeOccurrence),
    /// Named program entry
    FlowEntrypoint(FlowEntrypoint),
    /// Dependency declaration file
    DependencyManifest(DependencyManifest),
    /// Manifest-asserted package
    DeclaredDependency(DeclaredDependency),
    /// Usage-inferred package
    ObservedDependency(ObservedDependency),
    /// Precomputed mismatch (replaces the set for its sha)
    DependencyMismatch(DependencyMismatch),
    /// Audit record
    IndexDiagnostic(IndexDiagnostic),
    /// Import specifier without a resolved target
    UnresolvedImport(UnresolvedImport),
}

fn decode<T: for<'de> Deserialize<'de>>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::MalformedRecord {
        line: None,
        message: e.to_string(),
    })
}

fn require(record_type: &'static str, field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::MissingField { record_type, field });
    }
    Ok(())
}

impl IngestionRecord {
    /// Decode an envelope into a typed record.
    ///
    /// # Errors
    ///
    /// - `Error::FlowGraphRequiresMaterialization` for `flow_graph` envelopes
    /// - `Error::UnknownRecordType` for any other unrecognized `type`
    /// - `Error::MalformedRecord` if `data` does not match the record shape
    pub fn from_envelope(envelope: RecordEnvelope) -> Result<Self> {
        let RecordEnvelope { record_type, data } = envelope;
        let record = match record_type.as_str() {
            "node" => Self::Node(decode(data)?),
            "edge" => Self::Edge(decode(data)?),
            "edge_occurrence" => Self::EdgeOccurrence(decode(data)?),
            "flow_entrypoint" => Self::FlowEntrypoint(decode(data)?),
            "dependency_manifest" => Self::DependencyManifest(decode(data)?),
            "declared_dependency" => Self::DeclaredDependency(decode(data)?),
            "observed_dependency" => Self::ObservedDependency(decode(data)?),
            "dependency_mismatch" => Self::DependencyMismatch(decode(data)?),
            "index_diagnostic" => Self::IndexDiagnostic(decode(data)?),
            "unresolved_import" => Self::UnresolvedImport(decode(data)?),
            "flow_graph" => return Err(Error::FlowGraphRequiresMaterialization),
            _ => return Err(Error::UnknownRecordType(record_type)),
        };
        Ok(record)
    }

    /// Decode a raw JSON envelope.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_envelope`], plus `Error::MalformedRecord` when the
    /// value is not an envelope at all.
    pub fn from_value(value: Value) -> Result<Self> {
        let envelope: RecordEnvelope = decode(value)?;
        Self::from_envelope(envelope)
    }

    /// The envelope `type` of this record.
    #[must_use]
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::Node(_) => "node",
            Self::Edge(_) => "edge",
            Self::EdgeOccurrence(_) => "edge_occurrence",
            Self::FlowEntrypoint(_) => "flow_entrypoint",
            Self::DependencyManifest(_) => "dependency_manifest",
            Self::DeclaredDependency(_) => "declared_dependency",
            Self::ObservedDependency(_) => "observed_dependency",
            Self::DependencyMismatch(_) => "dependency_mismatch",
            Self::IndexDiagnostic(_) => "index_diagnostic",
            Self::UnresolvedImport(_) => "unresolved_import",
        }
    }

    /// Check that every natural-key field is present.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingField` naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        let kind = self.record_type();
        match self {
            Self::Node(node) => require(kind, "symbol_uid", &node.symbol_uid),
            Self::Edge(edge) => {
                require(kind, "source_symbol_uid", &edge.source_symbol_uid)?;
                require(kind, "edge_type", &edge.edge_type)?;
                require(kind, "target_symbol_uid", &edge.target_symbol_uid)
            }
            Self::EdgeOccurrence(occ) => {
                require(kind, "source_symbol_uid", &occ.source_symbol_uid)?;
                require(kind, "edge_type", &occ.edge_type)?;
                require(kind, "target_symbol_uid", &occ.target_symbol_uid)?;
                require(kind, "file_path", &occ.file_path)
            }
            Self::FlowEntrypoint(ep) => require(kind, "entrypoint_key", &ep.entrypoint_key),
            Self::DependencyManifest(manifest) => {
                require(kind, "file_path", &manifest.file_path)?;
                require(kind, "sha", &manifest.sha)
            }
            Self::DeclaredDependency(dep) => {
                require(kind, "manifest_key", &dep.manifest_key)?;
                require(kind, "package_key", &dep.package_key)
            }
            Self::ObservedDependency(dep) => {
                require(kind, "source_symbol_uid", &dep.source_symbol_uid)?;
                require(kind, "package_key", &dep.package_key)
            }
            Self::DependencyMismatch(mismatch) => {
                require(kind, "package_key", &mismatch.package_key)?;
                require(kind, "sha", &mismatch.sha)
            }
            Self::IndexDiagnostic(diag) => require(kind, "sha", &diag.sha),
            Self::UnresolvedImport(import) => {
                require(kind, "file_path", &import.file_path)?;
                require(kind, "spec", &import.spec)
            }
        }
    }

    /// Fill derivable defaults (manifest keys, dependency scope, occurrence kind).
    #[must_use]
    pub fn normalized(mut self) -> Self {
        match &mut self {
            Self::DependencyManifest(manifest) if manifest.manifest_key.trim().is_empty() => {
                manifest.manifest_key = format!("{}@{}", manifest.file_path, manifest.sha);
            }
            Self::DeclaredDependency(dep) if dep.scope.trim().is_empty() => {
                dep.scope = DEFAULT_DEPENDENCY_SCOPE.to_string();
            }
            Self::EdgeOccurrence(occ) if occ.occurrence_kind.trim().is_empty() => {
                occ.occurrence_kind = DEFAULT_OCCURRENCE_KIND.to_string();
            }
            Self::Node(node) => {
                if node.node_key.is_empty() {
                    node.node_key.clone_from(&node.symbol_uid);
                }
                if node.first_seen_sha.is_none() {
                    node.first_seen_sha.clone_from(&node.last_seen_sha);
                }
            }
            Self::Edge(edge) if edge.first_seen_sha.is_none() => {
                edge.first_seen_sha.clone_from(&edge.last_seen_sha);
            }
            _ => {}
        }
        self
    }
}

/// Natural key of an edge occurrence.
type OccurrenceKey = (EdgeKey, String, u32, u32, String, String);

/// A validated, de-duplicated set of records in dependency order.
///
/// Within each kind the last record for a natural key wins. Stores apply the
/// fields in declaration order: nodes, edges, occurrences, entrypoints,
/// manifests, declared, observed, mismatches, diagnostics, unresolved imports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    /// Nodes keyed by `symbol_uid`
    pub nodes: Vec<GraphNode>,
    /// Edges keyed by `(source, type, target)`
    pub edges: Vec<GraphEdge>,
    /// Occurrences keyed by owning edge and location
    pub occurrences: Vec<EdgeOccurrence>,
    /// Entrypoints keyed by `entrypoint_key`
    pub entrypoints: Vec<FlowEntrypoint>,
    /// Manifests keyed by `manifest_key`
    pub manifests: Vec<DependencyManifest>,
    /// Declared dependencies keyed by `(manifest, package, scope)`
    pub declared: Vec<DeclaredDependency>,
    /// Observed dependencies keyed by `(source symbol, package)`
    pub observed: Vec<ObservedDependency>,
    /// Mismatch sets that replace the stored set for their sha
    pub mismatches: BTreeMap<String, Vec<DependencyMismatch>>,
    /// Append-only diagnostics
    pub diagnostics: Vec<IndexDiagnostic>,
    /// Unresolved imports keyed by all fields
    pub unresolved_imports: Vec<UnresolvedImport>,
}

impl RecordBatch {
    /// Group records by kind and de-duplicate by natural key.
    ///
    /// Records are expected to be validated and normalized already.
    #[must_use]
    pub fn from_records(records: Vec<IngestionRecord>) -> Self {
        let mut nodes: BTreeMap<String, GraphNode> = BTreeMap::new();
        let mut edges: BTreeMap<EdgeKey, GraphEdge> = BTreeMap::new();
        let mut occurrences: BTreeMap<OccurrenceKey, EdgeOccurrence> = BTreeMap::new();
        let mut entrypoints: BTreeMap<String, FlowEntrypoint> = BTreeMap::new();
        let mut manifests: BTreeMap<String, DependencyManifest> = BTreeMap::new();
        let mut declared: BTreeMap<(String, String, String), DeclaredDependency> = BTreeMap::new();
        let mut observed: BTreeMap<(String, String), ObservedDependency> = BTreeMap::new();
        let mut mismatches: BTreeMap<String, BTreeMap<(MismatchType, String), DependencyMismatch>> =
            BTreeMap::new();
        let mut diagnostics = Vec::new();
        let mut unresolved: BTreeMap<UnresolvedImport, ()> = BTreeMap::new();

        for record in records {
            match record {
                IngestionRecord::Node(node) => {
                    nodes.insert(node.symbol_uid.clone(), node);
                }
                IngestionRecord::Edge(edge) => {
                    edges.insert(edge.key(), edge);
                }
                IngestionRecord::EdgeOccurrence(occ) => {
                    let key = (
                        occ.edge_key(),
                        occ.file_path.clone(),
                        occ.line_start,
                        occ.line_end,
                        occ.occurrence_kind.clone(),
                        occ.sha.clone(),
                    );
                    occurrences.insert(key, occ);
                }
                IngestionRecord::FlowEntrypoint(ep) => {
                    entrypoints.insert(ep.entrypoint_key.clone(), ep);
                }
                IngestionRecord::DependencyManifest(manifest) => {
                    manifests.insert(manifest.manifest_key.clone(), manifest);
                }
                IngestionRecord::DeclaredDependency(dep) => {
                    let key = (
                        dep.manifest_key.clone(),
                        dep.package_key.clone(),
                        dep.scope.clone(),
                    );
                    declared.insert(key, dep);
                }
                IngestionRecord::ObservedDependency(dep) => {
                    let key = (dep.source_symbol_uid.clone(), dep.package_key.clone());
                    observed.insert(key, dep);
                }
                IngestionRecord::DependencyMismatch(mismatch) => {
                    mismatches
                        .entry(mismatch.sha.clone())
                        .or_default()
                        .insert((mismatch.mismatch_type, mismatch.package_key.clone()), mismatch);
                }
                IngestionRecord::IndexDiagnostic(diag) => diagnostics.push(diag),
                IngestionRecord::UnresolvedImport(import) => {
                    unresolved.insert(import, ());
                }
            }
        }

        Self {
            nodes: nodes.into_values().collect(),
            edges: edges.into_values().collect(),
            occurrences: occurrences.into_values().collect(),
            entrypoints: entrypoints.into_values().collect(),
            manifests: manifests.into_values().collect(),
            declared: declared.into_values().collect(),
            observed: observed.into_values().collect(),
            mismatches: mismatches
                .into_iter()
                .map(|(sha, set)| (sha, set.into_values().collect()))
                .collect(),
            diagnostics,
            unresolved_imports: unresolved.into_keys().collect(),
        }
    }

    /// A batch holding a single record.
    #[must_use]
    pub fn single(record: IngestionRecord) -> Self {
        Self::from_records(vec![record.normalized()])
    }

    /// Total number of records after de-duplication.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
            + self.edges.len()
            + self.occurrences.len()
            + self.entrypoints.len()
            + self.manifests.len()
            + self.declared.len()
            + self.observed.len()
            + self.mismatches.values().map(Vec::len).sum::<usize>()
            + self.diagnostics.len()
            + self.unresolved_imports.len()
    }

    /// Returns `true` if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.mismatches.is_empty()
    }
}

/// Read envelopes from a JSONL file, one record per non-blank line.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read, or `Error::MalformedRecord`
/// carrying the 1-based line number of the first line that is not valid JSON.
pub async fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut values = Vec::new();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed).map_err(|e| Error::MalformedRecord {
            line: Some(line_number),
            message: e.to_string(),
        })?;
        values.push(value);
    }

    trace!(path = %path.display(), records = values.len(), "Read JSONL records");
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_record(uid: &str, file: &str) -> IngestionRecord {
        IngestionRecord::from_value(json!({
            "type": "node",
            "data": {"symbol_uid": uid, "file_path": file, "qualified_name": uid}
        }))
        .expect("valid node")
    }

    #[test]
    fn flow_graph_envelopes_are_rejected() {
        let result = IngestionRecord::from_value(json!({
            "type": "flow_graph",
            "data": {"entrypoint_key": "GET /"}
        }));

        assert!(matches!(
            result,
            Err(Error::FlowGraphRequiresMaterialization)
        ));
    }

    #[test]
    fn unknown_record_types_are_rejected() {
        let result = IngestionRecord::from_value(json!({"type": "widget", "data": {}}));
        assert!(matches!(result, Err(Error::UnknownRecordType(t)) if t == "widget"));
    }

    #[test]
    fn shape_errors_are_malformed_records() {
        let result = IngestionRecord::from_value(json!({
            "type": "node",
            "data": {"symbol_uid": 42}
        }));
        assert!(matches!(result, Err(Error::MalformedRecord { line: None, .. })));
    }

    #[test]
    fn validate_names_missing_natural_key() {
        let record = IngestionRecord::from_value(json!({
            "type": "edge",
            "data": {"source_symbol_uid": "a", "edge_type": "Calls"}
        }))
        .expect("decodes");

        let err = record.validate().expect_err("target is missing");
        assert!(matches!(
            err,
            Error::MissingField {
                record_type: "edge",
                field: "target_symbol_uid"
            }
        ));
    }

    #[test]
    fn manifest_key_is_derived_from_file_and_sha() {
        let record = IngestionRecord::from_value(json!({
            "type": "dependency_manifest",
            "data": {"file_path": "package.json", "sha": "abc"}
        }))
        .expect("decodes")
        .normalized();

        let IngestionRecord::DependencyManifest(manifest) = record else {
            panic!("expected manifest");
        };
        assert_eq!(manifest.manifest_key, "package.json@abc");
    }

    #[test]
    fn declared_scope_defaults_to_runtime() {
        let record = IngestionRecord::from_value(json!({
            "type": "declared_dependency",
            "data": {"manifest_key": "m", "package_key": "npm:left-pad"}
        }))
        .expect("decodes")
        .normalized();

        let IngestionRecord::DeclaredDependency(dep) = record else {
            panic!("expected declared dependency");
        };
        assert_eq!(dep.scope, DEFAULT_DEPENDENCY_SCOPE);
    }

    #[test]
    fn batch_deduplicates_last_write_wins() {
        let mut first = node_record("u1", "a.js");
        if let IngestionRecord::Node(node) = &mut first {
            node.qualified_name = "old".to_string();
        }
        let mut second = node_record("u1", "a.js");
        if let IngestionRecord::Node(node) = &mut second {
            node.qualified_name = "new".to_string();
        }

        let batch = RecordBatch::from_records(vec![first, second, node_record("u2", "b.js")]);

        assert_eq!(batch.nodes.len(), 2);
        assert_eq!(batch.nodes[0].symbol_uid, "u1");
        assert_eq!(batch.nodes[0].qualified_name, "new");
    }

    #[test]
    fn batch_groups_mismatches_by_sha() {
        let mismatch = |sha: &str, pkg: &str| {
            IngestionRecord::DependencyMismatch(DependencyMismatch {
                mismatch_type: MismatchType::ObservedNotDeclared,
                package_key: pkg.to_string(),
                details: json!({}),
                sha: sha.to_string(),
            })
        };

        let batch = RecordBatch::from_records(vec![
            mismatch("s1", "a"),
            mismatch("s1", "a"),
            mismatch("s2", "b"),
        ]);

        assert_eq!(batch.mismatches.len(), 2);
        assert_eq!(batch.mismatches["s1"].len(), 1);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn read_jsonl_reports_line_numbers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.jsonl");
        tokio::fs::write(
            &path,
            "{\"type\":\"node\",\"data\":{\"symbol_uid\":\"a\"}}\n\n{not json}\n",
        )
        .await
        .expect("write");

        let err = read_jsonl(&path).await.expect_err("line 3 is invalid");
        assert!(matches!(err, Error::MalformedRecord { line: Some(3), .. }));
    }

    #[tokio::test]
    async fn read_jsonl_skips_blank_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.jsonl");
        tokio::fs::write(
            &path,
            "{\"type\":\"node\",\"data\":{\"symbol_uid\":\"a\"}}\n\n{\"type\":\"node\",\"data\":{\"symbol_uid\":\"b\"}}\n",
        )
        .await
        .expect("write");

        let values = read_jsonl(&path).await.expect("valid");
        assert_eq!(values.len(), 2);
    }
}
