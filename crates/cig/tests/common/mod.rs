//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use cig::{
    DeclaredDependency, DependencyManifest, FlowEntrypoint, GraphEdge, GraphNode, GraphStore,
    InMemoryGraphStore, ObservedDependency, RecordBatch, RepoScope, SqliteGraphStore,
};

/// Store backends exercised by the contract tests.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

/// Create an empty store of the given kind.
pub fn store(backend: Backend) -> Box<dyn GraphStore> {
    match backend {
        Backend::Memory => Box::new(InMemoryGraphStore::new()),
        Backend::Sqlite => Box::new(SqliteGraphStore::open_in_memory().expect("open sqlite")),
    }
}

pub fn scope() -> RepoScope {
    RepoScope::new("acme", "web")
}

pub fn node(uid: &str, file: &str) -> GraphNode {
    GraphNode {
        symbol_uid: uid.to_string(),
        node_key: uid.to_string(),
        qualified_name: uid.to_string(),
        node_type: "function".to_string(),
        file_path: file.to_string(),
        ..GraphNode::default()
    }
}

pub fn edge(source: &str, edge_type: &str, target: &str) -> GraphEdge {
    GraphEdge::new(source, edge_type, target)
}

pub fn entrypoint(key: &str, symbol: &str, file: &str) -> FlowEntrypoint {
    FlowEntrypoint {
        entrypoint_key: key.to_string(),
        entrypoint_type: "route".to_string(),
        symbol_uid: Some(symbol.to_string()),
        file_path: Some(file.to_string()),
        ..FlowEntrypoint::default()
    }
}

pub fn manifest(file: &str, sha: &str) -> DependencyManifest {
    DependencyManifest {
        manifest_key: format!("{file}@{sha}"),
        file_path: file.to_string(),
        sha: sha.to_string(),
        ecosystem: Some("npm".to_string()),
    }
}

pub fn declared(manifest_key: &str, package: &str, range: &str) -> DeclaredDependency {
    DeclaredDependency {
        manifest_key: manifest_key.to_string(),
        package_key: package.to_string(),
        scope: "runtime".to_string(),
        version_range: Some(range.to_string()),
        file_path: String::new(),
    }
}

pub fn observed(uid: &str, package: &str, sha: &str) -> ObservedDependency {
    ObservedDependency {
        source_symbol_uid: uid.to_string(),
        package_key: package.to_string(),
        file_path: String::new(),
        sha: sha.to_string(),
    }
}

/// Apply nodes and edges as one batch.
pub fn seed(store: &dyn GraphStore, scope: &RepoScope, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) {
    let batch = RecordBatch {
        nodes,
        edges,
        ..RecordBatch::default()
    };
    store.apply_batch(scope, &batch).expect("seed batch");
}

pub fn uids(nodes: &[GraphNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.symbol_uid.as_str()).collect()
}
