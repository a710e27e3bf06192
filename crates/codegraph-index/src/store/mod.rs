//! Storage backends for the code graph.
//!
//! A backend stores typed nodes and edges keyed by stable strings and
//! applies [`MutationBatch`]es atomically: either every operation in a batch
//! lands or none does. Two backends are provided: [`MemoryStore`] for tests
//! and ephemeral use, and [`GraphStore`] persisting to SQLite through
//! graphqlite with Cypher support.

mod graph_store;
mod memory;

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::edges::{Edge, EdgeKey, EdgeKind};
use crate::symbols::{Node, NodeLabel};

pub use graph_store::GraphStore;
pub use memory::MemoryStore;

/// Error type for graph store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] graphqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Edge {kind} {source_key} -> {target_key} references a missing node")]
    DanglingEdge {
        source_key: String,
        target_key: String,
        kind: EdgeKind,
    },

    #[error("Operation not supported by the {0} backend")]
    Unsupported(&'static str),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A set of graph mutations applied as one unit.
///
/// Operations run in a fixed order: node upserts, edge deletions, edge
/// upserts, node deletions. Deleting a node also deletes every edge touching
/// it. Upserted edges must reference nodes that exist once the node upserts
/// have run and that are not deleted by the same batch.
#[derive(Debug, Clone, Default)]
pub struct MutationBatch {
    pub upsert_nodes: Vec<Node>,
    pub delete_edges: Vec<EdgeKey>,
    pub upsert_edges: Vec<Edge>,
    pub delete_nodes: Vec<String>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.upsert_nodes.is_empty()
            && self.delete_edges.is_empty()
            && self.upsert_edges.is_empty()
            && self.delete_nodes.is_empty()
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.upsert_nodes.len()
            + self.delete_edges.len()
            + self.upsert_edges.len()
            + self.delete_nodes.len()
    }

    /// Check edge endpoints against the batch and an existence probe for
    /// nodes already stored.
    pub fn validate(&self, exists: impl Fn(&str) -> Result<bool>) -> Result<()> {
        let upserted: HashSet<&str> = self.upsert_nodes.iter().map(|n| n.key.as_str()).collect();
        let deleted: HashSet<&str> = self.delete_nodes.iter().map(String::as_str).collect();

        for edge in &self.upsert_edges {
            for endpoint in [&edge.source, &edge.target] {
                let present = !deleted.contains(endpoint.as_str())
                    && (upserted.contains(endpoint.as_str()) || exists(endpoint)?);
                if !present {
                    return Err(StoreError::DanglingEdge {
                        source_key: edge.source.clone(),
                        target_key: edge.target.clone(),
                        kind: edge.kind,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Counts of what a batch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub nodes_upserted: usize,
    pub nodes_deleted: usize,
    pub edges_upserted: usize,
    pub edges_deleted: usize,
}

/// Graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// Edge direction for traversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Result of an ad-hoc query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Storage backend contract.
pub trait GraphBackend: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Apply a batch atomically.
    fn apply(&self, batch: &MutationBatch) -> Result<ApplyOutcome>;

    fn node(&self, key: &str) -> Result<Option<Node>>;

    fn has_node(&self, key: &str) -> Result<bool> {
        Ok(self.node(key)?.is_some())
    }

    /// All edges leaving `key`, optionally restricted to one kind.
    fn edges_from(&self, key: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>>;

    /// All edges entering `key`, optionally restricted to one kind.
    fn edges_to(&self, key: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>>;

    /// Nodes whose `file_path` property is `path`, including the File node.
    fn nodes_in_file(&self, path: &str) -> Result<Vec<Node>>;

    fn nodes_with_label(&self, label: NodeLabel) -> Result<Vec<Node>>;

    fn stats(&self) -> Result<GraphStats>;

    /// Cheap reachability check.
    fn ping(&self) -> Result<()>;

    /// Run a Cypher query, for backends that support one.
    fn cypher(&self, _query: &str) -> Result<QueryResult> {
        Err(StoreError::Unsupported(self.name()))
    }

    /// Breadth-first walk over edges of the given kinds, up to `max_depth`
    /// hops. Returns reached keys with their depth, excluding `start`.
    fn traverse(
        &self,
        start: &str,
        kinds: &[EdgeKind],
        direction: Direction,
        max_depth: usize,
    ) -> Result<Vec<(String, usize)>> {
        let mut seen: HashSet<String> = HashSet::from([start.to_string()]);
        let mut queue = VecDeque::from([(start.to_string(), 0usize)]);
        let mut reached = Vec::new();

        while let Some((key, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let edges = match direction {
                Direction::Outgoing => self.edges_from(&key, None)?,
                Direction::Incoming => self.edges_to(&key, None)?,
            };
            for edge in edges {
                if !kinds.is_empty() && !kinds.contains(&edge.kind) {
                    continue;
                }
                let next = match direction {
                    Direction::Outgoing => edge.target,
                    Direction::Incoming => edge.source,
                };
                if seen.insert(next.clone()) {
                    reached.push((next.clone(), depth + 1));
                    queue.push_back((next, depth + 1));
                }
            }
        }
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::EdgeStatus;

    fn function(key: &str) -> Node {
        Node::new(key, NodeLabel::Function).with("name", key)
    }

    #[test]
    fn test_batch_len_and_empty() {
        let mut batch = MutationBatch::new();
        assert!(batch.is_empty());
        batch.upsert_nodes.push(function("a"));
        batch.delete_nodes.push("b".to_string());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_validate_rejects_dangling_edge() {
        let mut batch = MutationBatch::new();
        batch.upsert_nodes.push(function("a"));
        batch
            .upsert_edges
            .push(Edge::calls("a", "missing", "missing", EdgeStatus::Resolved, &[]));

        let err = batch.validate(|_| Ok(false)).unwrap_err();
        assert!(matches!(err, StoreError::DanglingEdge { .. }));
    }

    #[test]
    fn test_validate_rejects_edge_to_deleted_node() {
        let mut batch = MutationBatch::new();
        batch.upsert_edges.push(Edge::contains("a", "b"));
        batch.delete_nodes.push("b".to_string());
        assert!(batch.validate(|_| Ok(true)).is_err());
    }

    #[test]
    fn test_traverse_bounded_depth() {
        let store = MemoryStore::new();
        let mut batch = MutationBatch::new();
        for key in ["a", "b", "c", "d"] {
            batch.upsert_nodes.push(function(key));
        }
        for (from, to) in [("a", "b"), ("b", "c"), ("c", "d")] {
            batch
                .upsert_edges
                .push(Edge::calls(from, to, to, EdgeStatus::Resolved, &[]));
        }
        store.apply(&batch).unwrap();

        let reached = store
            .traverse("a", &[EdgeKind::Calls], Direction::Outgoing, 2)
            .unwrap();
        let keys: Vec<_> = reached.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);

        let callers = store
            .traverse("d", &[], Direction::Incoming, 10)
            .unwrap();
        assert_eq!(callers.len(), 3);
        assert_eq!(callers[2], ("a".to_string(), 3));
    }

    #[test]
    fn test_cypher_unsupported_on_memory() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.cypher("MATCH (n) RETURN n"),
            Err(StoreError::Unsupported("memory"))
        ));
    }
}
