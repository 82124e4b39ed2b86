//! Bounded breadth-first traversal over a [`GraphStore`].
//!
//! Both blast radius and flow-graph materialization walk the edge table with
//! an explicit frontier queue and visited set. Graphs routinely contain
//! cycles (mutual imports, recursion), so the depth bound is always an
//! explicit parameter.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::error::Result;
use crate::store::GraphStore;
use crate::types::{Direction, EdgeKey, GraphEdge, RepoScope};

/// Result of a bounded traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traversal {
    /// Symbols reached from the start, **excluding** the start itself
    pub reached: BTreeSet<String>,
    /// Edges followed during the walk
    pub edges: BTreeSet<EdgeKey>,
}

/// The endpoint of `edge` on the far side from `current`.
fn neighbor<'e>(edge: &'e GraphEdge, current: &str, direction: Direction) -> &'e str {
    match direction {
        Direction::Out => &edge.target_symbol_uid,
        Direction::In => &edge.source_symbol_uid,
        Direction::Both if edge.source_symbol_uid == current => &edge.target_symbol_uid,
        Direction::Both => &edge.source_symbol_uid,
    }
}

/// Walk up to `depth` hops from `start`, following edges accepted by `follow`.
///
/// The start is seeded into the visited set, so cycles back to it are never
/// re-expanded and it never appears in [`Traversal::reached`]. A start symbol
/// that does not exist simply has no edges.
///
/// # Errors
///
/// Propagates store read errors.
pub fn bounded_bfs(
    store: &dyn GraphStore,
    scope: &RepoScope,
    start: &str,
    depth: u32,
    direction: Direction,
    follow: impl Fn(&GraphEdge) -> bool,
) -> Result<Traversal> {
    let mut traversal = Traversal::default();
    if depth == 0 {
        return Ok(traversal);
    }

    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    let mut queue: VecDeque<(String, u32)> = VecDeque::from([(start.to_string(), 0)]);

    while let Some((current, level)) = queue.pop_front() {
        if level >= depth {
            continue;
        }

        for edge in store.list_edges_by_node(scope, &current, direction)? {
            if !follow(&edge) {
                continue;
            }
            let next = neighbor(&edge, &current, direction).to_string();
            traversal.edges.insert(edge.key());
            if visited.insert(next.clone()) {
                traversal.reached.insert(next.clone());
                queue.push_back((next, level + 1));
            }
        }
    }

    Ok(traversal)
}

/// Symbols reachable from `symbol_uid` within `depth` hops.
///
/// The start symbol is excluded; `depth == 0` yields an empty set.
///
/// # Errors
///
/// Propagates store read errors.
pub fn blast_radius(
    store: &dyn GraphStore,
    scope: &RepoScope,
    symbol_uid: &str,
    depth: u32,
    direction: Direction,
) -> Result<BTreeSet<String>> {
    bounded_bfs(store, scope, symbol_uid, depth, direction, |_| true).map(|t| t.reached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordBatch;
    use crate::store::InMemoryGraphStore;
    use crate::types::GraphNode;

    fn scope() -> RepoScope {
        RepoScope::new("t", "r")
    }

    /// a -> b -> c -> a (cycle), c -> d
    fn cyclic_store() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        let node = |uid: &str| GraphNode {
            symbol_uid: uid.to_string(),
            file_path: format!("{uid}.js"),
            ..GraphNode::default()
        };
        let batch = RecordBatch {
            nodes: ["a", "b", "c", "d"].into_iter().map(node).collect(),
            edges: vec![
                GraphEdge::new("a", "Calls", "b"),
                GraphEdge::new("b", "Calls", "c"),
                GraphEdge::new("c", "Calls", "a"),
                GraphEdge::new("c", "Calls", "d"),
            ],
            ..RecordBatch::default()
        };
        store.apply_batch(&scope(), &batch).expect("valid batch");
        store
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn depth_zero_is_empty() {
        let store = cyclic_store();
        let reached = blast_radius(&store, &scope(), "a", 0, Direction::Both).expect("bfs");
        assert!(reached.is_empty());
    }

    #[test]
    fn depth_bounds_outgoing_walk() {
        let store = cyclic_store();

        let one = blast_radius(&store, &scope(), "a", 1, Direction::Out).expect("bfs");
        assert_eq!(one, set(&["b"]));

        let two = blast_radius(&store, &scope(), "a", 2, Direction::Out).expect("bfs");
        assert_eq!(two, set(&["b", "c"]));
    }

    #[test]
    fn cycles_terminate_and_exclude_start() {
        let store = cyclic_store();
        let reached = blast_radius(&store, &scope(), "a", 50, Direction::Out).expect("bfs");
        assert_eq!(reached, set(&["b", "c", "d"]));
    }

    #[test]
    fn incoming_walk_follows_reverse_edges() {
        let store = cyclic_store();
        let reached = blast_radius(&store, &scope(), "d", 2, Direction::In).expect("bfs");
        assert_eq!(reached, set(&["b", "c"]));
    }

    #[test]
    fn both_directions_union_neighbors() {
        let store = cyclic_store();
        let reached = blast_radius(&store, &scope(), "b", 1, Direction::Both).expect("bfs");
        assert_eq!(reached, set(&["a", "c"]));
    }

    #[test]
    fn filter_prunes_edges() {
        let store = cyclic_store();
        store
            .upsert_edge(&scope(), GraphEdge::new("a", "Imports", "d"))
            .expect("edge");

        let traversal = bounded_bfs(&store, &scope(), "a", 1, Direction::Out, |e| {
            e.edge_type != "Imports"
        })
        .expect("bfs");

        assert_eq!(traversal.reached, set(&["b"]));
        assert_eq!(traversal.edges.len(), 1);
    }

    #[test]
    fn unknown_start_has_no_reach() {
        let store = cyclic_store();
        let reached = blast_radius(&store, &scope(), "ghost", 3, Direction::Both).expect("bfs");
        assert!(reached.is_empty());
    }
}
