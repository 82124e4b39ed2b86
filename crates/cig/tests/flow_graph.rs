//! Integration tests for flow-graph materialization.

mod common;

use std::collections::BTreeSet;

use cig::{EdgeKey, Error, FlowEdgeFilter, FlowGraphKey, FlowGraphMaterializer, RecordBatch};
use common::{Backend, edge, entrypoint, node, scope, store};
use rstest::rstest;

/// ```text
///   handler --Calls--> service --Calls--> repo --Calls--> db
///      |                  |
///      +--Imports--> util +--Calls--> handler (cycle)
/// ```
fn routes(backend: Backend) -> Box<dyn cig::GraphStore> {
    let store = store(backend);
    let batch = RecordBatch {
        nodes: vec![
            node("handler", "routes.js"),
            node("service", "service.js"),
            node("repo", "repo.js"),
            node("db", "db.js"),
            node("util", "util.js"),
        ],
        edges: vec![
            edge("handler", "Calls", "service"),
            edge("service", "Calls", "repo"),
            edge("repo", "Calls", "db"),
            edge("handler", "Imports", "util"),
            edge("service", "Calls", "handler"),
        ],
        entrypoints: vec![
            entrypoint("GET /users", "handler", "routes.js"),
            entrypoint("cron:cleanup", "ghost", "jobs.js"),
        ],
        ..RecordBatch::default()
    };
    store.apply_batch(&scope(), &batch).expect("seed");
    store
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(ToString::to_string).collect()
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn materialize_is_bounded_and_skips_structural_edges(#[case] backend: Backend) {
    let store = routes(backend);

    let graph = FlowGraphMaterializer::new(store.as_ref())
        .materialize(&scope(), "GET /users", "s1", 2)
        .expect("materialize");

    assert_eq!(graph.root_symbol_uid, "handler");
    assert_eq!(graph.node_uids, set(&["handler", "repo", "service"]));
    assert_eq!(
        graph.edge_keys,
        BTreeSet::from([
            EdgeKey::new("handler", "Calls", "service"),
            EdgeKey::new("service", "Calls", "handler"),
            EdgeKey::new("service", "Calls", "repo"),
        ])
    );
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn custom_filter_follows_imports(#[case] backend: Backend) {
    let store = routes(backend);

    let graph = FlowGraphMaterializer::new(store.as_ref())
        .with_filter(FlowEdgeFilter::all())
        .materialize(&scope(), "GET /users", "s1", 1)
        .expect("materialize");

    assert_eq!(graph.node_uids, set(&["handler", "service", "util"]));
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn materializing_twice_yields_identical_membership(#[case] backend: Backend) {
    let store = routes(backend);
    let materializer = FlowGraphMaterializer::new(store.as_ref());
    let key = FlowGraphKey::new("GET /users", "s1", 5);

    materializer
        .materialize(&scope(), "GET /users", "s1", 5)
        .expect("first");
    let first = store.get_flow_graph(&scope(), &key).expect("get").expect("cached");
    materializer
        .materialize(&scope(), "GET /users", "s1", 5)
        .expect("second");
    let second = store.get_flow_graph(&scope(), &key).expect("get").expect("cached");

    assert_eq!(first, second);
    assert_eq!(first.node_uids, set(&["db", "handler", "repo", "service"]));
    assert_eq!(store.list_flow_graphs(&scope()).expect("list").len(), 1);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn different_depths_are_cached_separately(#[case] backend: Backend) {
    let store = routes(backend);
    let materializer = FlowGraphMaterializer::new(store.as_ref());

    materializer.materialize(&scope(), "GET /users", "s1", 1).expect("depth 1");
    materializer.materialize(&scope(), "GET /users", "s1", 3).expect("depth 3");

    let summaries = store.list_flow_graphs(&scope()).expect("list");
    let counts: Vec<(u32, usize)> = summaries.iter().map(|s| (s.key.depth, s.node_count)).collect();
    assert_eq!(counts, vec![(1, 2), (3, 4)]);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn missing_entrypoint_or_symbol_is_not_found(#[case] backend: Backend) {
    let store = routes(backend);
    let materializer = FlowGraphMaterializer::new(store.as_ref());

    let unknown = materializer
        .materialize(&scope(), "POST /nothing", "s1", 2)
        .expect_err("unknown entrypoint");
    let unbound = materializer
        .materialize(&scope(), "cron:cleanup", "s1", 2)
        .expect_err("symbol not indexed");

    assert!(matches!(unknown, Error::NotFound(_)));
    assert!(matches!(unbound, Error::NotFound(_)));
    assert!(store.list_flow_graphs(&scope()).expect("list").is_empty());
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn materialize_all_skips_unresolvable_entrypoints(#[case] backend: Backend) {
    let store = routes(backend);

    let summary = FlowGraphMaterializer::new(store.as_ref())
        .materialize_all(&scope(), "s1", 2)
        .expect("materialize all");

    assert_eq!(summary.materialized, vec![FlowGraphKey::new("GET /users", "s1", 2)]);
    assert_eq!(summary.skipped, vec!["cron:cleanup".to_string()]);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn flow_graph_records_cannot_be_ingested(#[case] backend: Backend) {
    let store = store(backend);

    let err = cig::IngestionPipeline::new(store.as_ref())
        .ingest_records(
            &scope(),
            vec![serde_json::json!({"type": "flow_graph", "data": {"entrypoint_key": "x"}})],
        )
        .expect_err("rejected");

    assert!(matches!(err, Error::FlowGraphRequiresMaterialization));
}
