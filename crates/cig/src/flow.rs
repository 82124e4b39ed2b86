//! Flow-graph materialization.
//!
//! A flow graph is the bounded subgraph reachable from an entrypoint's symbol
//! along outgoing "flow" edges. Which edge types count as flow is a
//! configurable predicate ([`FlowEdgeFilter`]); by default structural
//! relationships (`Imports`, `Exports`, `Contains`) are excluded.
//!
//! Graphs are cached under `(entrypoint_key, sha, depth)`. Each
//! materialization replaces the cached membership for its key atomically, so
//! repeating it over an unchanged graph is idempotent.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::GraphStore;
use crate::traversal::bounded_bfs;
use crate::types::{Direction, FlowEntrypoint, FlowGraph, FlowGraphKey, GraphEdge, RepoScope};

/// Edge types excluded from flow traversal unless configured otherwise.
pub const DEFAULT_STRUCTURAL_EDGE_TYPES: &[&str] = &["Imports", "Exports", "Contains"];

/// Predicate separating runtime flow edges from structural ones.
///
/// Edge types are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEdgeFilter {
    structural: BTreeSet<String>,
}

impl FlowEdgeFilter {
    /// Treat `structural_edge_types` as non-flow; everything else is followed.
    pub fn new<I, S>(structural_edge_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            structural: structural_edge_types
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Follow every edge.
    #[must_use]
    pub fn all() -> Self {
        Self {
            structural: BTreeSet::new(),
        }
    }

    /// Returns `true` if edges of this type are part of a flow.
    #[must_use]
    pub fn is_flow_edge(&self, edge_type: &str) -> bool {
        !self.structural.contains(&edge_type.to_ascii_lowercase())
    }
}

impl Default for FlowEdgeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_STRUCTURAL_EDGE_TYPES)
    }
}

/// Outcome of [`FlowGraphMaterializer::materialize_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeSummary {
    /// Keys written
    pub materialized: Vec<FlowGraphKey>,
    /// Entrypoints skipped because their symbol is unbound or missing
    pub skipped: Vec<String>,
}

/// Builds and caches entrypoint-rooted subgraphs.
pub struct FlowGraphMaterializer<'a> {
    store: &'a dyn GraphStore,
    filter: FlowEdgeFilter,
}

impl<'a> FlowGraphMaterializer<'a> {
    /// Create a materializer with the default edge filter.
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self {
            store,
            filter: FlowEdgeFilter::default(),
        }
    }

    /// Use a custom flow-edge predicate.
    #[must_use]
    pub fn with_filter(mut self, filter: FlowEdgeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Compute the flow graph for `entrypoint` without persisting it.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the entrypoint has no bound symbol or the symbol
    /// is not in the graph.
    pub fn build(
        &self,
        scope: &RepoScope,
        entrypoint: &FlowEntrypoint,
        sha: &str,
        depth: u32,
    ) -> Result<FlowGraph> {
        let root = entrypoint.symbol_uid.as_deref().ok_or_else(|| {
            Error::NotFound(format!(
                "entrypoint `{}` has no bound symbol",
                entrypoint.entrypoint_key
            ))
        })?;
        if self.store.get_node_by_symbol_uid(scope, root)?.is_none() {
            return Err(Error::NotFound(format!(
                "symbol `{root}` for entrypoint `{}`",
                entrypoint.entrypoint_key
            )));
        }

        let traversal = bounded_bfs(self.store, scope, root, depth, Direction::Out, |edge: &GraphEdge| {
            self.filter.is_flow_edge(&edge.edge_type)
        })?;

        let mut node_uids = traversal.reached;
        node_uids.insert(root.to_string());

        Ok(FlowGraph {
            key: FlowGraphKey::new(entrypoint.entrypoint_key.clone(), sha, depth),
            root_symbol_uid: root.to_string(),
            node_uids,
            edge_keys: traversal.edges,
        })
    }

    /// Materialize and persist the flow graph for `entrypoint_key`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the entrypoint or its symbol is missing, or any
    /// store error. On error the previously cached graph is left in place.
    pub fn materialize(
        &self,
        scope: &RepoScope,
        entrypoint_key: &str,
        sha: &str,
        depth: u32,
    ) -> Result<FlowGraph> {
        let entrypoint = self
            .store
            .get_flow_entrypoint(scope, entrypoint_key)?
            .ok_or_else(|| Error::NotFound(format!("entrypoint `{entrypoint_key}`")))?;
        self.materialize_entrypoint(scope, &entrypoint, sha, depth)
    }

    /// Materialize and persist the flow graph for a loaded entrypoint.
    ///
    /// # Errors
    ///
    /// Same as [`Self::materialize`].
    pub fn materialize_entrypoint(
        &self,
        scope: &RepoScope,
        entrypoint: &FlowEntrypoint,
        sha: &str,
        depth: u32,
    ) -> Result<FlowGraph> {
        let graph = self.build(scope, entrypoint, sha, depth)?;
        self.store.replace_flow_graph(scope, &graph)?;
        debug!(
            scope = %scope,
            key = %graph.key,
            nodes = graph.node_uids.len(),
            edges = graph.edge_keys.len(),
            "Materialized flow graph"
        );
        Ok(graph)
    }

    /// Materialize every entrypoint in scope at `(sha, depth)`.
    ///
    /// Entrypoints whose symbol is unbound or missing are skipped with a
    /// warning rather than failing the pass.
    ///
    /// # Errors
    ///
    /// Store errors abort the run.
    pub fn materialize_all(
        &self,
        scope: &RepoScope,
        sha: &str,
        depth: u32,
    ) -> Result<MaterializeSummary> {
        let mut summary = MaterializeSummary::default();
        for entrypoint in self.store.list_flow_entrypoints(scope)? {
            match self.materialize_entrypoint(scope, &entrypoint, sha, depth) {
                Ok(graph) => summary.materialized.push(graph.key),
                Err(Error::NotFound(what)) => {
                    warn!(
                        scope = %scope,
                        entrypoint = %entrypoint.entrypoint_key,
                        missing = %what,
                        "Skipping flow graph for entrypoint"
                    );
                    summary.skipped.push(entrypoint.entrypoint_key);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }
}
