//! End-to-end indexing passes through the engine.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use cig::{
    BlockState, DocBlock, Engine, EngineConfig, FlowGraphKey, InMemoryDocStore,
    InMemoryGraphStore, IndexJob, IndexMode, MismatchType, SqliteGraphStore,
};
use common::{Backend, scope, store};
use rstest::rstest;
use serde_json::{Value, json};
use tempfile::tempdir;

fn initial_records() -> Vec<Value> {
    vec![
        json!({"type": "node", "data": {"symbol_uid": "route", "file_path": "routes.js", "last_seen_sha": "s1"}}),
        json!({"type": "node", "data": {"symbol_uid": "svc", "file_path": "svc.js", "last_seen_sha": "s1"}}),
        json!({"type": "node", "data": {"symbol_uid": "db", "file_path": "db.js", "last_seen_sha": "s1"}}),
        json!({"type": "edge", "data": {"source_symbol_uid": "route", "edge_type": "Calls", "target_symbol_uid": "svc"}}),
        json!({"type": "edge", "data": {"source_symbol_uid": "svc", "edge_type": "Calls", "target_symbol_uid": "db"}}),
        json!({"type": "flow_entrypoint", "data": {
            "entrypoint_key": "GET /orders", "entrypoint_type": "http_route",
            "method": "GET", "path": "/orders", "symbol_uid": "route", "file_path": "routes.js"
        }}),
        json!({"type": "dependency_manifest", "data": {"file_path": "package.json", "sha": "s1"}}),
        json!({"type": "declared_dependency", "data": {
            "manifest_key": "package.json@s1", "package_key": "npm:pg", "version_range": "^8.0.0"
        }}),
        json!({"type": "declared_dependency", "data": {
            "manifest_key": "package.json@s1", "package_key": "npm:lodash", "version_range": "^4.0.0"
        }}),
        json!({"type": "observed_dependency", "data": {
            "source_symbol_uid": "db", "package_key": "npm:pg", "sha": "s1"
        }}),
        json!({"type": "observed_dependency", "data": {
            "source_symbol_uid": "svc", "package_key": "npm:axios", "sha": "s1"
        }}),
    ]
}

#[tokio::test]
async fn full_pass_builds_graph_flows_and_mismatches() {
    let engine = Engine::new(Box::new(InMemoryGraphStore::new()), EngineConfig::default());

    let report = engine
        .run_pass(&IndexJob::full(scope(), "s1"), initial_records())
        .await
        .expect("pass");

    assert_eq!(report.mode, IndexMode::Full);
    assert_eq!(report.ingested.written.nodes, 3);
    assert_eq!(report.mismatches, Some(2));
    assert_eq!(
        report.flow_graphs.materialized,
        vec![FlowGraphKey::new("GET /orders", "s1", 5)]
    );

    let mismatches = engine
        .store()
        .list_dependency_mismatches(&scope(), Some("s1"))
        .expect("mismatches");
    let kinds: Vec<(MismatchType, &str)> = mismatches
        .iter()
        .map(|m| (m.mismatch_type, m.package_key.as_str()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (MismatchType::DeclaredNotObserved, "npm:lodash"),
            (MismatchType::ObservedNotDeclared, "npm:axios"),
        ]
    );

    let flow = engine
        .store()
        .get_flow_graph(&scope(), &FlowGraphKey::new("GET /orders", "s1", 5))
        .expect("get")
        .expect("materialized");
    assert_eq!(flow.node_uids.len(), 3);
}

#[tokio::test]
async fn incremental_pass_prunes_and_marks_docs_stale() {
    let docs = Arc::new(InMemoryDocStore::new());
    docs.insert_block(&scope(), DocBlock::new("orders-overview", ["route"])).await;
    docs.insert_block(&scope(), DocBlock::new("db-notes", ["db"])).await;
    let mut pinned = DocBlock::new("pinned", ["svc"]);
    pinned.state = BlockState::Locked;
    docs.insert_block(&scope(), pinned).await;

    let engine = Engine::new(Box::new(InMemoryGraphStore::new()), EngineConfig::default())
        .with_staleness(docs.clone());
    engine
        .run_pass(&IndexJob::full(scope(), "s1"), initial_records())
        .await
        .expect("initial pass");

    let job = IndexJob::incremental(
        scope(),
        "s2",
        vec!["svc.js".to_string()],
        vec!["db.js".to_string()],
    );
    let records = vec![
        json!({"type": "node", "data": {"symbol_uid": "svc", "file_path": "svc.js", "last_seen_sha": "s2"}}),
    ];
    let report = engine.run_pass(&job, records).await.expect("incremental pass");

    assert_eq!(report.pruned.removed_symbol_uids, vec!["db".to_string()]);
    let impact = report.impact.as_ref().expect("incremental");
    assert_eq!(impact.impacted_symbol_uids, vec!["route".to_string(), "svc".to_string()]);
    assert_eq!(report.stale_blocks, 2);

    let overview = docs.get_block(&scope(), "orders-overview").await.expect("block");
    let db_notes = docs.get_block(&scope(), "db-notes").await.expect("block");
    let pinned = docs.get_block(&scope(), "pinned").await.expect("block");
    assert_eq!(overview.state, BlockState::Stale);
    assert_eq!(db_notes.state, BlockState::Stale);
    assert_eq!(pinned.state, BlockState::Locked);

    let svc = engine
        .store()
        .get_node_by_symbol_uid(&scope(), "svc")
        .expect("get")
        .expect("exists");
    assert_eq!(svc.first_seen_sha.as_deref(), Some("s1"));
    assert_eq!(svc.last_seen_sha.as_deref(), Some("s2"));

    let diagnostics = engine.store().list_index_diagnostics(&scope()).expect("diagnostics");
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics[1].sha, "s2");
    assert_eq!(diagnostics[1].mode, IndexMode::Incremental);
    assert!(diagnostics[1].created_at.is_some());
}

#[tokio::test]
async fn rejected_batch_still_commits_prune_but_writes_nothing_else() {
    let engine = Engine::new(Box::new(InMemoryGraphStore::new()), EngineConfig::default());
    engine
        .run_pass(&IndexJob::full(scope(), "s1"), initial_records())
        .await
        .expect("initial pass");

    let job = IndexJob::incremental(scope(), "s2", vec![], vec!["routes.js".to_string()]);
    let records = vec![json!({"type": "edge", "data": {
        "source_symbol_uid": "svc", "edge_type": "Calls", "target_symbol_uid": "nowhere"
    }})];
    let err = engine.run_pass(&job, records).await.expect_err("dangling edge");

    assert!(err.is_input_error());
    assert!(engine.store().get_node_by_symbol_uid(&scope(), "route").expect("get").is_none());
    assert_eq!(engine.store().list_index_diagnostics(&scope()).expect("diag").len(), 1);
}

fn manifest_records(sha: &str, declared: &[(&str, &str)]) -> Vec<Value> {
    let manifest_key = format!("package.json@{sha}");
    let mut records = vec![json!({"type": "dependency_manifest", "data": {
        "file_path": "package.json", "sha": sha
    }})];
    records.extend(declared.iter().map(|(package, range)| {
        json!({"type": "declared_dependency", "data": {
            "manifest_key": manifest_key, "package_key": package, "version_range": range
        }})
    }));
    records
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn manifest_edits_across_commits_drive_mismatches(#[case] backend: Backend) {
    let engine = Engine::new(store(backend), EngineConfig::default());
    let mut records = vec![
        json!({"type": "node", "data": {"symbol_uid": "app", "file_path": "app.js"}}),
        json!({"type": "node", "data": {"symbol_uid": "util", "file_path": "util.js"}}),
        json!({"type": "observed_dependency", "data": {
            "source_symbol_uid": "app", "package_key": "npm:react", "sha": "s1"
        }}),
        json!({"type": "observed_dependency", "data": {
            "source_symbol_uid": "util", "package_key": "npm:lodash", "sha": "s1"
        }}),
    ];
    records.extend(manifest_records(
        "s1",
        &[("npm:react", "^1.0.0"), ("npm:lodash", "^4.0.0")],
    ));
    let first = engine
        .run_pass(&IndexJob::full(scope(), "s1"), records)
        .await
        .expect("s1");
    assert_eq!(first.mismatches, Some(0));

    // s2 bumps react and stops declaring lodash.
    let job = IndexJob::incremental(scope(), "s2", vec!["package.json".to_string()], Vec::new());
    let second = engine
        .run_pass(&job, manifest_records("s2", &[("npm:react", "^2.0.0")]))
        .await
        .expect("s2");

    assert_eq!(second.mismatches, Some(1));
    let mismatches = engine
        .store()
        .list_dependency_mismatches(&scope(), Some("s2"))
        .expect("list");
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].mismatch_type, MismatchType::ObservedNotDeclared);
    assert_eq!(mismatches[0].package_key, "npm:lodash");
    assert_eq!(
        mismatches[0].details,
        json!({"observed_in_files": ["util.js"]})
    );
}

#[tokio::test]
async fn sqlite_engine_round_trip_with_search() {
    let dir = tempdir().expect("temp dir");
    let store = SqliteGraphStore::open(&dir.path().join("graph.db")).expect("open");
    let engine = Engine::new(Box::new(store), EngineConfig::default());

    let records = vec![
        json!({"type": "node", "data": {"symbol_uid": "login", "file_path": "auth.js", "embedding_text": "user login session"}}),
        json!({"type": "node", "data": {"symbol_uid": "chart", "file_path": "ui.js", "embedding_text": "render bar chart"}}),
    ];
    let report = engine
        .run_pass(&IndexJob::full(scope(), "s1"), records)
        .await
        .expect("pass");
    assert_eq!(report.embedded_nodes, 2);

    let hits = engine
        .semantic_search(&scope(), "login session", 1)
        .await
        .expect("search");
    assert_eq!(hits[0].node.symbol_uid, "login");
}

#[tokio::test]
async fn engine_opens_backend_from_config() {
    let dir = tempdir().expect("temp dir");
    let config = EngineConfig::from_yaml("storage:\n  backend: sqlite\n  path: data/graph.db\n")
        .expect("config");

    let engine = Engine::open(config, dir.path()).expect("open");
    engine
        .run_pass(&IndexJob::full(scope(), "s1"), initial_records())
        .await
        .expect("pass");

    assert!(dir.path().join("data/graph.db").exists());
    let uids: BTreeSet<String> = engine
        .store()
        .list_nodes(&scope())
        .expect("nodes")
        .into_iter()
        .map(|n| n.symbol_uid)
        .collect();
    assert_eq!(uids.len(), 3);
}
