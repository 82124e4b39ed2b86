//! Database schema definition for the SQLite graph store.
//!
//! Every scoped table carries `tenant_id` and `repo_id`. Child tables reach
//! their scope through a foreign key and are removed by `ON DELETE CASCADE`,
//! which is what makes file pruning a handful of statements.

/// Database schema definition.
pub(crate) const SCHEMA: &str = r"
-- Code symbols
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    symbol_uid TEXT NOT NULL,
    node_key TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    node_type TEXT NOT NULL,
    symbol_kind TEXT,
    file_path TEXT NOT NULL,
    line_start INTEGER,
    line_end INTEGER,
    language TEXT,
    signature TEXT,
    signature_hash TEXT,
    contract TEXT,
    constraints TEXT,
    allowable_values TEXT,
    embedding BLOB,
    embedding_text TEXT,
    first_seen_sha TEXT,
    last_seen_sha TEXT,
    UNIQUE (tenant_id, repo_id, symbol_uid)
);

CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(tenant_id, repo_id, file_path);

-- Typed relationships; removed with either endpoint
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    source_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    edge_type TEXT NOT NULL,
    target_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    metadata TEXT,
    first_seen_sha TEXT,
    last_seen_sha TEXT,
    UNIQUE (source_node_id, edge_type, target_node_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_scope ON edges(tenant_id, repo_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_node_id);

-- Edge provenance (call sites, import lines)
CREATE TABLE IF NOT EXISTS edge_occurrences (
    id INTEGER PRIMARY KEY,
    edge_id INTEGER NOT NULL REFERENCES edges(id) ON DELETE CASCADE,
    file_path TEXT NOT NULL,
    line_start INTEGER NOT NULL DEFAULT 0,
    line_end INTEGER NOT NULL DEFAULT 0,
    occurrence_kind TEXT NOT NULL,
    sha TEXT NOT NULL,
    UNIQUE (edge_id, file_path, line_start, line_end, occurrence_kind, sha)
);

CREATE INDEX IF NOT EXISTS idx_occurrences_file ON edge_occurrences(file_path);

-- Named program entries
CREATE TABLE IF NOT EXISTS flow_entrypoints (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    entrypoint_key TEXT NOT NULL,
    entrypoint_type TEXT NOT NULL,
    method TEXT,
    path TEXT,
    symbol_uid TEXT,
    file_path TEXT,
    sha TEXT,
    UNIQUE (tenant_id, repo_id, entrypoint_key)
);

-- Materialized flow graphs; membership is a snapshot of symbol uids, not
-- foreign keys, so a cached graph stays readable after its nodes change
CREATE TABLE IF NOT EXISTS flow_graphs (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    entrypoint_key TEXT NOT NULL,
    sha TEXT NOT NULL,
    depth INTEGER NOT NULL,
    root_symbol_uid TEXT NOT NULL,
    UNIQUE (tenant_id, repo_id, entrypoint_key, sha, depth)
);

CREATE TABLE IF NOT EXISTS flow_graph_nodes (
    flow_graph_id INTEGER NOT NULL REFERENCES flow_graphs(id) ON DELETE CASCADE,
    symbol_uid TEXT NOT NULL,
    PRIMARY KEY (flow_graph_id, symbol_uid)
);

CREATE TABLE IF NOT EXISTS flow_graph_edges (
    flow_graph_id INTEGER NOT NULL REFERENCES flow_graphs(id) ON DELETE CASCADE,
    source_symbol_uid TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    target_symbol_uid TEXT NOT NULL,
    PRIMARY KEY (flow_graph_id, source_symbol_uid, edge_type, target_symbol_uid)
);

-- Dependency manifests and the packages they declare
CREATE TABLE IF NOT EXISTS dependency_manifests (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    manifest_key TEXT NOT NULL,
    file_path TEXT NOT NULL,
    sha TEXT NOT NULL,
    ecosystem TEXT,
    UNIQUE (tenant_id, repo_id, manifest_key)
);

CREATE TABLE IF NOT EXISTS declared_dependencies (
    id INTEGER PRIMARY KEY,
    manifest_id INTEGER NOT NULL REFERENCES dependency_manifests(id) ON DELETE CASCADE,
    package_key TEXT NOT NULL,
    scope TEXT NOT NULL,
    version_range TEXT,
    UNIQUE (manifest_id, package_key, scope)
);

-- Packages inferred from usage; removed with the using symbol
CREATE TABLE IF NOT EXISTS observed_dependencies (
    id INTEGER PRIMARY KEY,
    source_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    package_key TEXT NOT NULL,
    file_path TEXT NOT NULL,
    sha TEXT NOT NULL,
    UNIQUE (source_node_id, package_key)
);

-- Derived view, replaced wholesale per sha
CREATE TABLE IF NOT EXISTS dependency_mismatches (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    sha TEXT NOT NULL,
    mismatch_type TEXT NOT NULL,
    package_key TEXT NOT NULL,
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mismatches_sha ON dependency_mismatches(tenant_id, repo_id, sha);

-- Append-only audit trail; list columns hold JSON arrays
CREATE TABLE IF NOT EXISTS index_diagnostics (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    sha TEXT NOT NULL,
    mode TEXT NOT NULL,
    changed_files TEXT NOT NULL,
    impacted_files TEXT NOT NULL,
    reparsed_files TEXT NOT NULL,
    impacted_symbol_uids TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS unresolved_imports (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    line INTEGER NOT NULL,
    spec TEXT NOT NULL,
    sha TEXT NOT NULL,
    UNIQUE (tenant_id, repo_id, file_path, line, spec, sha)
);
";
