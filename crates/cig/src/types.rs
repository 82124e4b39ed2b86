//! Domain types for the code intelligence graph.
//!
//! These types represent the core data model:
//! - **Graph**: `GraphNode`, `GraphEdge`, `EdgeOccurrence`
//! - **Flow**: `FlowEntrypoint`, `FlowGraph` (derived, cached per key)
//! - **Dependencies**: `DependencyManifest`, `DeclaredDependency`,
//!   `ObservedDependency`, `DependencyMismatch` (derived, replace-all per sha)
//! - **Audit**: `IndexDiagnostic`, `UnresolvedImport`
//!
//! ## Design Decisions
//!
//! | Decision | Choice | Rationale |
//! |----------|--------|-----------|
//! | Identity | Natural keys (`symbol_uid`, ...) | Stable across re-indexing; row ids never leak |
//! | Scope | `RepoScope` on every call | Tenants never share rows |
//! | Structured metadata | `serde_json::Value` | Parsers emit open-ended contracts |
//! | Membership sets | `BTreeSet` | Deterministic, diffable output |

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

// ============================================================================
// Scope
// ============================================================================

/// The (tenant, repository) pair every store operation is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoScope {
    /// Tenant identifier
    pub tenant_id: String,
    /// Repository identifier, unique within the tenant
    pub repo_id: String,
}

impl RepoScope {
    /// Create a new scope.
    pub fn new(tenant_id: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            repo_id: repo_id.into(),
        }
    }
}

impl fmt::Display for RepoScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.repo_id)
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Traversal direction over the edge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow source -> target
    Out,
    /// Follow target -> source
    In,
    /// Follow either
    #[default]
    Both,
}

impl Direction {
    /// String representation used in config and CLI output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::In => "in",
            Self::Both => "both",
        }
    }

    /// The direction that walks the same edges backwards.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Out => Self::In,
            Self::In => Self::Out,
            Self::Both => Self::Both,
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "out" => Ok(Self::Out),
            "in" => Ok(Self::In),
            "both" => Ok(Self::Both),
            other => Err(Error::Config(format!(
                "unknown direction '{other}' (expected out, in or both)"
            ))),
        }
    }
}

/// Whether an indexing pass rebuilt everything or applied a bounded change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Full reindex; impact analysis is skipped
    #[default]
    Full,
    /// Incremental update over `changed_files`
    Incremental,
}

impl IndexMode {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl FromStr for IndexMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(Error::Config(format!("unknown index mode '{other}'"))),
        }
    }
}

/// Category of a declared/observed dependency disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchType {
    /// Declared in a manifest but never used
    DeclaredNotObserved,
    /// Used in code but declared in no manifest
    ObservedNotDeclared,
    /// Declared with more than one distinct version range
    VersionConflict,
}

impl MismatchType {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeclaredNotObserved => "declared_not_observed",
            Self::ObservedNotDeclared => "observed_not_declared",
            Self::VersionConflict => "version_conflict",
        }
    }
}

impl FromStr for MismatchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declared_not_observed" => Ok(Self::DeclaredNotObserved),
            "observed_not_declared" => Ok(Self::ObservedNotDeclared),
            "version_conflict" => Ok(Self::VersionConflict),
            other => Err(Error::Config(format!("unknown mismatch type '{other}'"))),
        }
    }
}

// ============================================================================
// Graph entities
// ============================================================================

/// A code symbol in the property graph.
///
/// `symbol_uid` is the stable identity; it survives incremental updates until
/// the owning file is pruned.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphNode {
    /// Stable cross-commit identifier
    pub symbol_uid: String,
    /// Parser-assigned key (e.g. `file#Name`)
    pub node_key: String,
    /// Fully qualified name
    pub qualified_name: String,
    /// Node type (function, class, route, ...)
    pub node_type: String,
    /// Language-specific symbol kind
    pub symbol_kind: Option<String>,
    /// Owning file, relative to the repository root
    pub file_path: String,
    /// First line of the definition
    pub line_start: Option<u32>,
    /// Last line of the definition
    pub line_end: Option<u32>,
    /// Source language
    pub language: Option<String>,
    /// Rendered signature
    pub signature: Option<String>,
    /// Hash of the signature, for change detection
    pub signature_hash: Option<String>,
    /// Structured contract metadata
    pub contract: Option<Value>,
    /// Structured constraint metadata
    pub constraints: Option<Value>,
    /// Enumerated allowable values
    pub allowable_values: Option<Value>,
    /// Fixed-length embedding vector
    pub embedding: Option<Vec<f32>>,
    /// Text the embedding was computed from
    pub embedding_text: Option<String>,
    /// Commit the symbol was first indexed at
    pub first_seen_sha: Option<String>,
    /// Most recent commit the symbol was indexed at
    pub last_seen_sha: Option<String>,
}

/// Natural key of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Source symbol
    pub source_symbol_uid: String,
    /// Relationship type (e.g. `Calls`, `Imports`)
    pub edge_type: String,
    /// Target symbol
    pub target_symbol_uid: String,
}

impl EdgeKey {
    /// Create a new edge key.
    pub fn new(
        source_symbol_uid: impl Into<String>,
        edge_type: impl Into<String>,
        target_symbol_uid: impl Into<String>,
    ) -> Self {
        Self {
            source_symbol_uid: source_symbol_uid.into(),
            edge_type: edge_type.into(),
            target_symbol_uid: target_symbol_uid.into(),
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.source_symbol_uid, self.edge_type, self.target_symbol_uid
        )
    }
}

/// A typed relationship between two symbols.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphEdge {
    /// Source symbol
    pub source_symbol_uid: String,
    /// Relationship type
    pub edge_type: String,
    /// Target symbol
    pub target_symbol_uid: String,
    /// Free-form edge metadata
    pub metadata: Option<Value>,
    /// Commit the edge was first indexed at
    pub first_seen_sha: Option<String>,
    /// Most recent commit the edge was indexed at
    pub last_seen_sha: Option<String>,
}

impl GraphEdge {
    /// Create an edge with no metadata.
    pub fn new(
        source_symbol_uid: impl Into<String>,
        edge_type: impl Into<String>,
        target_symbol_uid: impl Into<String>,
    ) -> Self {
        Self {
            source_symbol_uid: source_symbol_uid.into(),
            edge_type: edge_type.into(),
            target_symbol_uid: target_symbol_uid.into(),
            ..Self::default()
        }
    }

    /// The natural key of this edge.
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(
            self.source_symbol_uid.clone(),
            self.edge_type.clone(),
            self.target_symbol_uid.clone(),
        )
    }
}

/// Provenance for an edge: one call site, import line, etc.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeOccurrence {
    /// Source symbol of the owning edge
    pub source_symbol_uid: String,
    /// Type of the owning edge
    pub edge_type: String,
    /// Target symbol of the owning edge
    pub target_symbol_uid: String,
    /// File containing the occurrence
    pub file_path: String,
    /// First line of the occurrence
    pub line_start: u32,
    /// Last line of the occurrence
    pub line_end: u32,
    /// Occurrence kind (call, import, reference, ...)
    pub occurrence_kind: String,
    /// Commit the occurrence was observed at
    pub sha: String,
}

impl EdgeOccurrence {
    /// The natural key of the owning edge.
    #[must_use]
    pub fn edge_key(&self) -> EdgeKey {
        EdgeKey::new(
            self.source_symbol_uid.clone(),
            self.edge_type.clone(),
            self.target_symbol_uid.clone(),
        )
    }
}

// ============================================================================
// Flow graphs
// ============================================================================

/// A logical entry into the program (HTTP route, CLI command, job handler).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowEntrypoint {
    /// Unique key within the repository
    pub entrypoint_key: String,
    /// Entrypoint type (e.g. `http_route`)
    pub entrypoint_type: String,
    /// HTTP method, when applicable
    pub method: Option<String>,
    /// Route path, when applicable
    pub path: Option<String>,
    /// Symbol handling the entrypoint
    pub symbol_uid: Option<String>,
    /// File declaring the entrypoint
    pub file_path: Option<String>,
    /// Commit the entrypoint was observed at
    pub sha: Option<String>,
}

/// Cache key of a materialized flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowGraphKey {
    /// Entrypoint the graph is rooted at
    pub entrypoint_key: String,
    /// Commit the graph was materialized for
    pub sha: String,
    /// Traversal depth bound
    pub depth: u32,
}

impl FlowGraphKey {
    /// Create a new flow graph key.
    pub fn new(entrypoint_key: impl Into<String>, sha: impl Into<String>, depth: u32) -> Self {
        Self {
            entrypoint_key: entrypoint_key.into(),
            sha: sha.into(),
            depth,
        }
    }
}

impl fmt::Display for FlowGraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (depth {})", self.entrypoint_key, self.sha, self.depth)
    }
}

/// Bounded subgraph reachable from an entrypoint.
///
/// Content-addressed by [`FlowGraphKey`]: materializing the same key twice
/// over the same graph yields an equal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraph {
    /// Cache key
    pub key: FlowGraphKey,
    /// Symbol bound to the entrypoint
    pub root_symbol_uid: String,
    /// Member symbols, including the root
    pub node_uids: BTreeSet<String>,
    /// Member edges
    pub edge_keys: BTreeSet<EdgeKey>,
}

/// Lightweight listing entry for a cached flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraphSummary {
    /// Cache key
    pub key: FlowGraphKey,
    /// Symbol bound to the entrypoint
    pub root_symbol_uid: String,
    /// Number of member symbols
    pub node_count: usize,
    /// Number of member edges
    pub edge_count: usize,
}

// ============================================================================
// Dependencies
// ============================================================================

/// A dependency-declaration file (package.json, go.mod, Cargo.toml).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyManifest {
    /// Natural key; derived as `{file_path}@{sha}` when absent
    pub manifest_key: String,
    /// Manifest file
    pub file_path: String,
    /// Commit the manifest was read at
    pub sha: String,
    /// Package ecosystem (npm, cargo, go, ...)
    pub ecosystem: Option<String>,
}

/// A package asserted by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclaredDependency {
    /// Owning manifest
    pub manifest_key: String,
    /// Normalized package identifier
    pub package_key: String,
    /// Dependency scope (runtime, dev, peer, ...)
    pub scope: String,
    /// Declared version range
    pub version_range: Option<String>,
    /// Manifest file; filled from the manifest by the store
    pub file_path: String,
}

/// A package inferred from a usage edge in code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservedDependency {
    /// Symbol whose code uses the package
    pub source_symbol_uid: String,
    /// Normalized package identifier
    pub package_key: String,
    /// File of the using symbol; filled from the node when absent
    pub file_path: String,
    /// Commit the usage was observed at
    pub sha: String,
}

/// A categorized disagreement between declared and observed dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyMismatch {
    /// Category
    pub mismatch_type: MismatchType,
    /// Package the mismatch is about
    #[serde(default)]
    pub package_key: String,
    /// Sorted evidence lists, shape depends on the category
    #[serde(default)]
    pub details: Value,
    /// Commit the mismatch set was computed for
    #[serde(default)]
    pub sha: String,
}

// ============================================================================
// Audit
// ============================================================================

/// Append-only audit record for one indexing pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexDiagnostic {
    /// Commit of the pass
    pub sha: String,
    /// Pass mode
    pub mode: IndexMode,
    /// Files reported changed by the job
    pub changed_files: Vec<String>,
    /// Files holding impacted symbols
    pub impacted_files: Vec<String>,
    /// Files whose derived artifacts are stale
    pub reparsed_files: Vec<String>,
    /// Impacted symbols handed to the staleness propagator
    pub impacted_symbol_uids: Vec<String>,
    /// When the record was appended; assigned by the store when absent
    pub created_at: Option<DateTime<Utc>>,
}

/// An import specifier that could not be resolved to a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnresolvedImport {
    /// Importing file
    pub file_path: String,
    /// Line of the import
    pub line: u32,
    /// Raw import specifier
    pub spec: String,
    /// Commit the import was seen at
    pub sha: String,
}

// ============================================================================
// Query results
// ============================================================================

/// One semantic search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Matching node
    pub node: GraphNode,
    /// Cosine similarity to the query vector
    pub score: f32,
}
