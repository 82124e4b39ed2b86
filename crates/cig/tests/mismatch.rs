//! Dependency mismatch recomputation against persisted dependency tables.

mod common;

use cig::{MismatchType, RecordBatch, mismatch};
use common::{Backend, declared, manifest, node, observed, scope, store};
use rstest::rstest;
use serde_json::json;

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn observed_but_undeclared_package(#[case] backend: Backend) {
    let store = store(backend);
    let batch = RecordBatch {
        nodes: vec![node("a", "src/a.js")],
        observed: vec![observed("a", "npm:lodash", "s1")],
        ..RecordBatch::default()
    };
    store.apply_batch(&scope(), &batch).expect("batch");

    let count = mismatch::recompute(store.as_ref(), &scope(), "s1").expect("recompute");
    let stored = store
        .list_dependency_mismatches(&scope(), Some("s1"))
        .expect("list");

    assert_eq!(count, 1);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].mismatch_type, MismatchType::ObservedNotDeclared);
    assert_eq!(stored[0].details, json!({"observed_in_files": ["src/a.js"]}));
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn conflicting_ranges_in_two_manifests(#[case] backend: Backend) {
    let store = store(backend);
    let batch = RecordBatch {
        nodes: vec![node("a", "web/a.js")],
        manifests: vec![manifest("web/package.json", "s1"), manifest("api/package.json", "s1")],
        declared: vec![
            declared("web/package.json@s1", "npm:react", "^2.0.0"),
            declared("api/package.json@s1", "npm:react", "^1.0.0"),
        ],
        observed: vec![observed("a", "npm:react", "s1")],
        ..RecordBatch::default()
    };
    store.apply_batch(&scope(), &batch).expect("batch");

    mismatch::recompute(store.as_ref(), &scope(), "s1").expect("recompute");
    let stored = store
        .list_dependency_mismatches(&scope(), Some("s1"))
        .expect("list");

    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].mismatch_type, MismatchType::VersionConflict);
    assert_eq!(stored[0].details["version_ranges"], json!(["^1.0.0", "^2.0.0"]));
    assert_eq!(
        stored[0].details["manifests"],
        json!(["api/package.json@s1", "web/package.json@s1"])
    );
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn recomputation_replaces_prior_set(#[case] backend: Backend) {
    let store = store(backend);
    let batch = RecordBatch {
        nodes: vec![node("a", "a.js")],
        observed: vec![observed("a", "npm:chalk", "s1")],
        ..RecordBatch::default()
    };
    store.apply_batch(&scope(), &batch).expect("batch");
    mismatch::recompute(store.as_ref(), &scope(), "s1").expect("first");

    store
        .add_dependency_manifest(&scope(), manifest("package.json", "s1"))
        .expect("manifest");
    store
        .add_declared_dependency(&scope(), declared("package.json@s1", "npm:chalk", "^5.0.0"))
        .expect("declare");
    let count = mismatch::recompute(store.as_ref(), &scope(), "s1").expect("second");

    assert_eq!(count, 0);
    assert!(
        store
            .list_dependency_mismatches(&scope(), Some("s1"))
            .expect("list")
            .is_empty()
    );
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
fn recomputation_is_deterministic(#[case] backend: Backend) {
    let store = store(backend);
    let batch = RecordBatch {
        nodes: vec![node("a", "a.js"), node("b", "b.js")],
        manifests: vec![manifest("package.json", "s1")],
        declared: vec![
            declared("package.json@s1", "npm:zod", "^3.0.0"),
            declared("package.json@s1", "npm:axios", "^1.0.0"),
        ],
        observed: vec![observed("b", "npm:chalk", "s1"), observed("a", "npm:chalk", "s1")],
        ..RecordBatch::default()
    };
    store.apply_batch(&scope(), &batch).expect("batch");

    mismatch::recompute(store.as_ref(), &scope(), "s1").expect("first");
    let first = store.list_dependency_mismatches(&scope(), Some("s1")).expect("list");
    mismatch::recompute(store.as_ref(), &scope(), "s1").expect("second");
    let second = store.list_dependency_mismatches(&scope(), Some("s1")).expect("list");

    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(first[2].details["observed_in_files"], json!(["a.js", "b.js"]));
}
