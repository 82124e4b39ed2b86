//! Incremental impact analysis.
//!
//! Given the files changed by a push, find every symbol within `depth` hops
//! (in either direction) of a symbol defined in those files. The result marks
//! derived artifacts stale; it does not say what must be re-parsed.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::store::GraphStore;
use crate::traversal::blast_radius;
use crate::types::{Direction, RepoScope};

/// Output of [`ImpactAnalyzer::compute_impact`]. All lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImpactReport {
    /// Traversal depth used
    pub depth: u32,
    /// Files the job reported as changed
    pub changed_files: Vec<String>,
    /// Symbols defined in the changed files
    pub changed_symbol_uids: Vec<String>,
    /// Changed symbols plus their blast radius
    pub impacted_symbol_uids: Vec<String>,
    /// Distinct files of the impacted symbols
    pub impacted_files: Vec<String>,
    /// `changed_files ∪ impacted_files`: scope whose derived artifacts are stale
    pub reparsed_files: Vec<String>,
}

/// Computes bounded impact sets over a store.
pub struct ImpactAnalyzer<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> ImpactAnalyzer<'a> {
    /// Create an analyzer reading from `store`.
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Compute the impact of changing `changed_files`.
    ///
    /// With `depth == 0` the impacted set is exactly the symbols defined in
    /// the changed files.
    ///
    /// # Errors
    ///
    /// Propagates store read errors.
    pub fn compute_impact(
        &self,
        scope: &RepoScope,
        changed_files: &[String],
        depth: u32,
    ) -> Result<ImpactReport> {
        let changed_files: BTreeSet<String> = changed_files.iter().cloned().collect();
        let changed_list: Vec<String> = changed_files.iter().cloned().collect();

        let changed_symbol_uids: BTreeSet<String> = self
            .store
            .list_nodes_in_files(scope, &changed_list)?
            .into_iter()
            .map(|node| node.symbol_uid)
            .collect();

        let mut impacted = changed_symbol_uids.clone();
        for uid in &changed_symbol_uids {
            impacted.extend(blast_radius(self.store, scope, uid, depth, Direction::Both)?);
        }

        let impacted_files: BTreeSet<String> = self
            .store
            .get_nodes_by_symbol_uids(scope, &impacted)?
            .into_iter()
            .map(|node| node.file_path)
            .filter(|path| !path.is_empty())
            .collect();

        let reparsed_files: BTreeSet<String> =
            changed_files.union(&impacted_files).cloned().collect();

        debug!(
            scope = %scope,
            depth,
            changed = changed_symbol_uids.len(),
            impacted = impacted.len(),
            files = impacted_files.len(),
            "Computed impact"
        );

        Ok(ImpactReport {
            depth,
            changed_files: changed_list,
            changed_symbol_uids: changed_symbol_uids.into_iter().collect(),
            impacted_symbol_uids: impacted.into_iter().collect(),
            impacted_files: impacted_files.into_iter().collect(),
            reparsed_files: reparsed_files.into_iter().collect(),
        })
    }
}
