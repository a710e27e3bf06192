//! In-memory graph backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;

use super::{ApplyOutcome, GraphBackend, GraphStats, MutationBatch, Result};
use crate::edges::{Edge, EdgeKey, EdgeKind};
use crate::symbols::{Node, NodeLabel};

#[derive(Debug, Default)]
struct MemoryGraph {
    nodes: HashMap<String, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
    outgoing: HashMap<String, BTreeSet<EdgeKey>>,
    incoming: HashMap<String, BTreeSet<EdgeKey>>,
}

impl MemoryGraph {
    fn insert_edge(&mut self, edge: Edge) -> bool {
        let key = edge.key();
        self.outgoing
            .entry(key.source.clone())
            .or_default()
            .insert(key.clone());
        self.incoming
            .entry(key.target.clone())
            .or_default()
            .insert(key.clone());
        self.edges.insert(key, edge).is_none()
    }

    fn remove_edge(&mut self, key: &EdgeKey) -> bool {
        if self.edges.remove(key).is_none() {
            return false;
        }
        if let Some(keys) = self.outgoing.get_mut(&key.source) {
            keys.remove(key);
        }
        if let Some(keys) = self.incoming.get_mut(&key.target) {
            keys.remove(key);
        }
        true
    }

    /// Remove a node and every edge touching it. Returns the edge count removed.
    fn remove_node(&mut self, key: &str) -> Option<usize> {
        self.nodes.remove(key)?;
        let mut touching: Vec<EdgeKey> = Vec::new();
        if let Some(keys) = self.outgoing.remove(key) {
            touching.extend(keys);
        }
        if let Some(keys) = self.incoming.remove(key) {
            touching.extend(keys);
        }
        Some(touching.iter().filter(|k| self.remove_edge(k)).count())
    }

    fn collect(&self, keys: Option<&BTreeSet<EdgeKey>>, kind: Option<EdgeKind>) -> Vec<Edge> {
        keys.into_iter()
            .flatten()
            .filter(|key| kind.is_none_or(|k| key.kind == k))
            .filter_map(|key| self.edges.get(key).cloned())
            .collect()
    }
}

/// Graph held in process memory behind a read-write lock.
///
/// Batches are validated before anything is touched, so a rejected batch
/// leaves the graph unchanged.
#[derive(Debug, Default)]
pub struct MemoryStore {
    graph: RwLock<MemoryGraph>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn apply(&self, batch: &MutationBatch) -> Result<ApplyOutcome> {
        let mut graph = self.graph.write();
        batch.validate(|key| Ok(graph.nodes.contains_key(key)))?;

        let mut outcome = ApplyOutcome::default();
        for node in &batch.upsert_nodes {
            graph.nodes.insert(node.key.clone(), node.clone());
            outcome.nodes_upserted += 1;
        }
        for key in &batch.delete_edges {
            if graph.remove_edge(key) {
                outcome.edges_deleted += 1;
            }
        }
        for edge in &batch.upsert_edges {
            graph.insert_edge(edge.clone());
            outcome.edges_upserted += 1;
        }
        for key in &batch.delete_nodes {
            if let Some(edges) = graph.remove_node(key) {
                outcome.nodes_deleted += 1;
                outcome.edges_deleted += edges;
            }
        }
        Ok(outcome)
    }

    fn node(&self, key: &str) -> Result<Option<Node>> {
        Ok(self.graph.read().nodes.get(key).cloned())
    }

    fn has_node(&self, key: &str) -> Result<bool> {
        Ok(self.graph.read().nodes.contains_key(key))
    }

    fn edges_from(&self, key: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let graph = self.graph.read();
        Ok(graph.collect(graph.outgoing.get(key), kind))
    }

    fn edges_to(&self, key: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let graph = self.graph.read();
        Ok(graph.collect(graph.incoming.get(key), kind))
    }

    fn nodes_in_file(&self, path: &str) -> Result<Vec<Node>> {
        let graph = self.graph.read();
        let mut nodes: Vec<Node> = graph
            .nodes
            .values()
            .filter(|node| node.file_path() == Some(path))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    fn nodes_with_label(&self, label: NodeLabel) -> Result<Vec<Node>> {
        let graph = self.graph.read();
        let mut nodes: Vec<Node> = graph
            .nodes
            .values()
            .filter(|node| node.label == label)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    fn stats(&self) -> Result<GraphStats> {
        let graph = self.graph.read();
        Ok(GraphStats {
            node_count: graph.nodes.len(),
            edge_count: graph.edges.len(),
        })
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::EdgeStatus;
    use crate::store::StoreError;

    fn node(key: &str, label: NodeLabel, file: &str) -> Node {
        Node::new(key, label).with("file_path", file)
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let mut batch = MutationBatch::new();
        batch.upsert_nodes.push(node("file:a.py", NodeLabel::File, "a.py"));
        batch
            .upsert_nodes
            .push(node("function:a.py#f", NodeLabel::Function, "a.py"));
        batch
            .upsert_nodes
            .push(node("function:b.py#g", NodeLabel::Function, "b.py"));
        batch
            .upsert_edges
            .push(Edge::contains("file:a.py", "function:a.py#f"));
        batch.upsert_edges.push(Edge::calls(
            "function:b.py#g",
            "function:a.py#f",
            "f",
            EdgeStatus::Resolved,
            &[],
        ));
        store.apply(&batch).unwrap();
        store
    }

    #[test]
    fn test_apply_and_lookup() {
        let store = seeded();
        let stats = store.stats().unwrap();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 2);

        let callers = store
            .edges_to("function:a.py#f", Some(EdgeKind::Calls))
            .unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].source, "function:b.py#g");

        assert_eq!(store.nodes_in_file("a.py").unwrap().len(), 2);
        assert_eq!(store.nodes_with_label(NodeLabel::Function).unwrap().len(), 2);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = seeded();
        let mut batch = MutationBatch::new();
        batch
            .upsert_nodes
            .push(node("function:a.py#f", NodeLabel::Function, "a.py").with("start_line", 9));
        batch
            .upsert_edges
            .push(Edge::contains("file:a.py", "function:a.py#f"));
        store.apply(&batch).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 2);
        let updated = store.node("function:a.py#f").unwrap().unwrap();
        assert_eq!(updated.prop_u64("start_line"), Some(9));
    }

    #[test]
    fn test_delete_node_cascades_edges() {
        let store = seeded();
        let mut batch = MutationBatch::new();
        batch.delete_nodes.push("function:a.py#f".to_string());
        let outcome = store.apply(&batch).unwrap();

        assert_eq!(outcome.nodes_deleted, 1);
        assert_eq!(outcome.edges_deleted, 2);
        assert_eq!(store.stats().unwrap().edge_count, 0);
        assert!(store.edges_from("function:b.py#g", None).unwrap().is_empty());
    }

    #[test]
    fn test_rejected_batch_leaves_graph_unchanged() {
        let store = seeded();
        let mut batch = MutationBatch::new();
        batch
            .upsert_nodes
            .push(node("function:c.py#h", NodeLabel::Function, "c.py"));
        batch
            .upsert_edges
            .push(Edge::contains("file:c.py", "function:c.py#h"));

        let err = store.apply(&batch).unwrap_err();
        assert!(matches!(err, StoreError::DanglingEdge { .. }));
        assert!(!store.has_node("function:c.py#h").unwrap());
        assert_eq!(store.stats().unwrap().node_count, 3);
    }

    #[test]
    fn test_delete_edge_by_key() {
        let store = seeded();
        let mut batch = MutationBatch::new();
        batch.delete_edges.push(EdgeKey::new(
            "function:b.py#g",
            EdgeKind::Calls,
            "function:a.py#f",
        ));
        store.apply(&batch).unwrap();
        assert_eq!(store.stats().unwrap().edge_count, 1);
        assert!(store.edges_to("function:a.py#f", Some(EdgeKind::Calls)).unwrap().is_empty());
    }
}
