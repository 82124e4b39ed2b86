//! Declared-versus-observed dependency drift.
//!
//! [`compute`] is a pure function: the same inputs always produce the same,
//! fully sorted output. The result replaces the stored set for its sha; it is
//! never patched incrementally.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::store::GraphStore;
use crate::types::{
    DeclaredDependency, DependencyMismatch, MismatchType, ObservedDependency, RepoScope,
};

#[derive(Debug, Default)]
struct DeclaredGroup<'a> {
    ranges: BTreeSet<&'a str>,
    scopes: BTreeSet<&'a str>,
    manifests: BTreeSet<&'a str>,
    files: BTreeSet<&'a str>,
}

/// Diff declared against observed dependencies.
///
/// - `declared_not_observed`: declared but never used;
///   details `{declared_in_files, scopes, version_ranges}`
/// - `observed_not_declared`: used but declared nowhere;
///   details `{observed_in_files}`
/// - `version_conflict`: declared with more than one distinct range;
///   details `{version_ranges, manifests}`
///
/// Output is ordered by mismatch type, then package key.
#[must_use]
pub fn compute(
    declared: &[DeclaredDependency],
    observed: &[ObservedDependency],
    sha: &str,
) -> Vec<DependencyMismatch> {
    let mut declared_by_package: BTreeMap<&str, DeclaredGroup<'_>> = BTreeMap::new();
    for dep in declared {
        let group = declared_by_package.entry(dep.package_key.as_str()).or_default();
        if let Some(range) = dep.version_range.as_deref() {
            group.ranges.insert(range);
        }
        group.scopes.insert(dep.scope.as_str());
        group.manifests.insert(dep.manifest_key.as_str());
        if !dep.file_path.is_empty() {
            group.files.insert(dep.file_path.as_str());
        }
    }

    let mut observed_by_package: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for dep in observed {
        let files = observed_by_package.entry(dep.package_key.as_str()).or_default();
        if !dep.file_path.is_empty() {
            files.insert(dep.file_path.as_str());
        }
    }

    let mismatch = |mismatch_type, package_key: &str, details| DependencyMismatch {
        mismatch_type,
        package_key: package_key.to_string(),
        details,
        sha: sha.to_string(),
    };

    let mut mismatches = Vec::new();

    for (package, group) in &declared_by_package {
        if !observed_by_package.contains_key(package) {
            mismatches.push(mismatch(
                MismatchType::DeclaredNotObserved,
                package,
                json!({
                    "declared_in_files": group.files,
                    "scopes": group.scopes,
                    "version_ranges": group.ranges,
                }),
            ));
        }
    }

    for (package, files) in &observed_by_package {
        if !declared_by_package.contains_key(package) {
            mismatches.push(mismatch(
                MismatchType::ObservedNotDeclared,
                package,
                json!({ "observed_in_files": files }),
            ));
        }
    }

    for (package, group) in &declared_by_package {
        if group.ranges.len() > 1 {
            mismatches.push(mismatch(
                MismatchType::VersionConflict,
                package,
                json!({
                    "version_ranges": group.ranges,
                    "manifests": group.manifests,
                }),
            ));
        }
    }

    mismatches
}

/// Recompute the mismatch set for `sha` from the persisted dependency tables
/// and replace the stored set.
///
/// # Errors
///
/// Propagates store errors.
pub fn recompute(store: &dyn GraphStore, scope: &RepoScope, sha: &str) -> Result<usize> {
    let declared = store.list_declared_dependencies(scope)?;
    let observed = store.list_observed_dependencies(scope)?;
    let mismatches = compute(&declared, &observed, sha);
    let count = store.replace_dependency_mismatches(scope, sha, mismatches)?;
    debug!(scope = %scope, sha, mismatches = count, "Recomputed dependency mismatches");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(manifest: &str, file: &str, package: &str, range: Option<&str>) -> DeclaredDependency {
        DeclaredDependency {
            manifest_key: manifest.to_string(),
            package_key: package.to_string(),
            scope: "runtime".to_string(),
            version_range: range.map(ToString::to_string),
            file_path: file.to_string(),
        }
    }

    fn observed(uid: &str, file: &str, package: &str) -> ObservedDependency {
        ObservedDependency {
            source_symbol_uid: uid.to_string(),
            package_key: package.to_string(),
            file_path: file.to_string(),
            sha: "s1".to_string(),
        }
    }

    #[test]
    fn observed_without_declaration() {
        let result = compute(&[], &[observed("a", "src/a.js", "npm:lodash")], "s1");

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].mismatch_type, MismatchType::ObservedNotDeclared);
        assert_eq!(result[0].package_key, "npm:lodash");
        assert_eq!(result[0].details["observed_in_files"], json!(["src/a.js"]));
        assert_eq!(result[0].sha, "s1");
    }

    #[test]
    fn conflicting_ranges_across_manifests() {
        let result = compute(
            &[
                declared("web@s1", "web/package.json", "npm:react", Some("^2.0.0")),
                declared("api@s1", "api/package.json", "npm:react", Some("^1.0.0")),
            ],
            &[observed("a", "web/a.js", "npm:react")],
            "s1",
        );

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].mismatch_type, MismatchType::VersionConflict);
        assert_eq!(result[0].details["version_ranges"], json!(["^1.0.0", "^2.0.0"]));
        assert_eq!(result[0].details["manifests"], json!(["api@s1", "web@s1"]));
    }

    #[test]
    fn declared_without_usage_carries_sorted_evidence() {
        let mut dev = declared("m@s1", "package.json", "npm:jest", Some("^29.0.0"));
        dev.scope = "dev".to_string();
        let result = compute(&[dev], &[], "s1");

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].mismatch_type, MismatchType::DeclaredNotObserved);
        assert_eq!(result[0].details["declared_in_files"], json!(["package.json"]));
        assert_eq!(result[0].details["scopes"], json!(["dev"]));
        assert_eq!(result[0].details["version_ranges"], json!(["^29.0.0"]));
    }

    #[test]
    fn matching_declaration_and_usage_is_clean() {
        let result = compute(
            &[declared("m@s1", "package.json", "npm:react", Some("^18.0.0"))],
            &[observed("a", "a.js", "npm:react")],
            "s1",
        );
        assert!(result.is_empty());
    }

    #[test]
    fn output_is_ordered_by_type_then_package() {
        let result = compute(
            &[
                declared("m@s1", "package.json", "npm:zod", None),
                declared("m@s1", "package.json", "npm:axios", None),
            ],
            &[observed("a", "a.js", "npm:chalk")],
            "s1",
        );

        let order: Vec<_> = result
            .iter()
            .map(|m| (m.mismatch_type, m.package_key.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (MismatchType::DeclaredNotObserved, "npm:axios"),
                (MismatchType::DeclaredNotObserved, "npm:zod"),
                (MismatchType::ObservedNotDeclared, "npm:chalk"),
            ]
        );
    }

    #[test]
    fn same_range_in_two_manifests_is_not_a_conflict() {
        let result = compute(
            &[
                declared("a@s1", "a/package.json", "npm:react", Some("^18.0.0")),
                declared("b@s1", "b/package.json", "npm:react", Some("^18.0.0")),
            ],
            &[observed("x", "x.js", "npm:react")],
            "s1",
        );
        assert!(result.is_empty());
    }
}
