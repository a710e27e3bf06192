//! Graph storage using graphqlite.
//!
//! Provides persistent storage for the code graph using SQLite with Cypher
//! query support. Each node keeps its full property map as a JSON string in
//! `props`, with the commonly queried fields (`name`, `qualified_name`,
//! `file_path`, `start_line`) duplicated as plain properties for Cypher.

use std::path::Path;

use graphqlite::{Graph, Value};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::{ApplyOutcome, GraphBackend, GraphStats, MutationBatch, QueryResult, Result, StoreError};
use crate::edges::{Edge, EdgeKey, EdgeKind};
use crate::symbols::{Node, NodeLabel, Props};

/// Properties copied out of the JSON blob so Cypher can filter on them.
const QUERYABLE_PROPS: &[&str] = &[
    "name",
    "qualified_name",
    "file_path",
    "start_line",
    "language",
    "status",
];

/// Persistent storage for the code graph.
pub struct GraphStore {
    graph: Mutex<Graph>,
}

impl GraphStore {
    /// Open or create a graph database at the specified path.
    ///
    /// The database file will be created if it doesn't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let graph = Graph::open(path)?;
        Ok(Self {
            graph: Mutex::new(graph),
        })
    }

    /// Create an in-memory graph database.
    pub fn open_in_memory() -> Result<Self> {
        let graph = Graph::open_in_memory()?;
        Ok(Self {
            graph: Mutex::new(graph),
        })
    }

    fn apply_locked(graph: &Graph, batch: &MutationBatch) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        for node in &batch.upsert_nodes {
            graph.upsert_node(&node.key, node_properties(node)?, node.label.as_str())?;
            outcome.nodes_upserted += 1;
        }
        for key in &batch.delete_edges {
            outcome.edges_deleted += delete_edge(graph, key)?;
        }
        for edge in &batch.upsert_edges {
            delete_edge(graph, &edge.key())?;
            create_edge(graph, edge)?;
            outcome.edges_upserted += 1;
        }
        for key in &batch.delete_nodes {
            if graph.has_node(key)? {
                let touching = count_edges(graph, key)?;
                graph.delete_node(key)?;
                outcome.nodes_deleted += 1;
                outcome.edges_deleted += touching;
            }
        }
        Ok(outcome)
    }

    fn query_nodes(&self, cypher: &str) -> Result<Vec<Node>> {
        let graph = self.graph.lock();
        let result = graph.query(cypher)?;
        let mut nodes = Vec::new();
        for row in result.iter() {
            let (Ok(key), Ok(label), Ok(props)) = (
                row.get::<String>("id"),
                row.get::<String>("label"),
                row.get::<String>("props"),
            ) else {
                continue;
            };
            nodes.push(decode_node(key, &label, &props)?);
        }
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    fn query_edges(&self, cypher: &str) -> Result<Vec<Edge>> {
        let graph = self.graph.lock();
        let result = graph.query(cypher)?;
        let mut edges = Vec::new();
        for row in result.iter() {
            let (Ok(source), Ok(target), Ok(rel)) = (
                row.get::<String>("source"),
                row.get::<String>("target"),
                row.get::<String>("rel"),
            ) else {
                continue;
            };
            let Some(kind) = EdgeKind::from_rel_type(&rel) else {
                debug!(rel = %rel, "Skipping edge with unknown relationship type");
                continue;
            };
            let props = match row.get::<String>("props") {
                Ok(json) => decode_props(&json)?,
                Err(_) => Props::new(),
            };
            edges.push(Edge {
                source,
                target,
                kind,
                props,
            });
        }
        Ok(edges)
    }
}

impl GraphBackend for GraphStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn apply(&self, batch: &MutationBatch) -> Result<ApplyOutcome> {
        if batch.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        let graph = self.graph.lock();
        batch.validate(|key| Ok(graph.has_node(key)?))?;

        graph.connection().execute("BEGIN")?;
        match Self::apply_locked(&graph, batch) {
            Ok(outcome) => {
                graph.connection().execute("COMMIT")?;
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Rolling back graph batch");
                let _ = graph.connection().execute("ROLLBACK");
                Err(e)
            }
        }
    }

    fn node(&self, key: &str) -> Result<Option<Node>> {
        let cypher = format!(
            "MATCH (n {{id: '{}'}}) RETURN n.id AS id, n.label AS label, n.props AS props",
            graphqlite::escape_string(key)
        );
        Ok(self.query_nodes(&cypher)?.into_iter().next())
    }

    fn has_node(&self, key: &str) -> Result<bool> {
        Ok(self.graph.lock().has_node(key)?)
    }

    fn edges_from(&self, key: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let cypher = format!(
            "MATCH (a {{id: '{}'}})-[r{}]->(b) \
             RETURN a.id AS source, b.id AS target, type(r) AS rel, r.props AS props",
            graphqlite::escape_string(key),
            rel_filter(kind)
        );
        self.query_edges(&cypher)
    }

    fn edges_to(&self, key: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let cypher = format!(
            "MATCH (a)-[r{}]->(b {{id: '{}'}}) \
             RETURN a.id AS source, b.id AS target, type(r) AS rel, r.props AS props",
            rel_filter(kind),
            graphqlite::escape_string(key)
        );
        self.query_edges(&cypher)
    }

    fn nodes_in_file(&self, path: &str) -> Result<Vec<Node>> {
        let cypher = format!(
            "MATCH (n {{file_path: '{}'}}) RETURN n.id AS id, n.label AS label, n.props AS props",
            graphqlite::escape_string(path)
        );
        self.query_nodes(&cypher)
    }

    fn nodes_with_label(&self, label: NodeLabel) -> Result<Vec<Node>> {
        let cypher = format!(
            "MATCH (n:{}) RETURN n.id AS id, n.label AS label, n.props AS props",
            label.as_str()
        );
        self.query_nodes(&cypher)
    }

    fn stats(&self) -> Result<GraphStats> {
        let stats = self.graph.lock().stats()?;
        Ok(GraphStats {
            node_count: usize::try_from(stats.node_count).unwrap_or_default(),
            edge_count: usize::try_from(stats.edge_count).unwrap_or_default(),
        })
    }

    fn ping(&self) -> Result<()> {
        self.graph
            .lock()
            .stats()
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn cypher(&self, query: &str) -> Result<QueryResult> {
        let graph = self.graph.lock();
        let result = graph.query(query)?;
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(result.len());
        for row in result.iter() {
            let mut object = serde_json::Map::new();
            for col in row.columns() {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
                if let Some(value) = row.get_value(col) {
                    object.insert(col.clone(), value_to_json(value));
                }
            }
            rows.push(object);
        }
        Ok(QueryResult { columns, rows })
    }
}

fn rel_filter(kind: Option<EdgeKind>) -> String {
    kind.map(|k| format!(":{}", k.rel_type())).unwrap_or_default()
}

/// Convert a Node to property key-value pairs (as strings for graphqlite).
fn node_properties(node: &Node) -> Result<Vec<(&'static str, String)>> {
    let mut props = vec![
        ("label", node.label.as_str().to_string()),
        ("props", serde_json::to_string(&node.props)?),
    ];
    for name in QUERYABLE_PROPS {
        if let Some(value) = node.props.get(*name) {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            props.push((*name, text));
        }
    }
    Ok(props)
}

fn decode_props(json: &str) -> Result<Props> {
    match serde_json::from_str::<serde_json::Value>(json)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidData(format!(
            "expected property object, found {other}"
        ))),
    }
}

fn decode_node(key: String, label: &str, props: &str) -> Result<Node> {
    let label = NodeLabel::parse(label)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown node label '{label}'")))?;
    Ok(Node {
        key,
        label,
        props: decode_props(props)?,
    })
}

fn delete_edge(graph: &Graph, key: &EdgeKey) -> Result<usize> {
    let matched = format!(
        "MATCH (a {{id: '{}'}})-[r:{}]->(b {{id: '{}'}})",
        graphqlite::escape_string(&key.source),
        key.kind.rel_type(),
        graphqlite::escape_string(&key.target)
    );
    let existing = graph.query(&format!("{matched} RETURN count(r) AS n"))?;
    let count = existing
        .iter()
        .next()
        .and_then(|row| row.get::<i64>("n").ok())
        .unwrap_or(0);
    if count > 0 {
        graph.query(&format!("{matched} DELETE r"))?;
    }
    Ok(usize::try_from(count).unwrap_or_default())
}

fn create_edge(graph: &Graph, edge: &Edge) -> Result<()> {
    let props = serde_json::to_string(&edge.props)?;
    let cypher = format!(
        "MATCH (a {{id: '{}'}}), (b {{id: '{}'}}) CREATE (a)-[:{} {{props: '{}'}}]->(b)",
        graphqlite::escape_string(&edge.source),
        graphqlite::escape_string(&edge.target),
        edge.kind.rel_type(),
        graphqlite::escape_string(&props)
    );
    graph.query(&cypher)?;
    Ok(())
}

fn count_edges(graph: &Graph, key: &str) -> Result<usize> {
    let cypher = format!(
        "MATCH (a {{id: '{}'}})-[r]-() RETURN count(r) AS n",
        graphqlite::escape_string(key)
    );
    let result = graph.query(&cypher)?;
    let count = result
        .iter()
        .next()
        .and_then(|row| row.get::<i64>("n").ok())
        .unwrap_or(0);
    Ok(usize::try_from(count).unwrap_or_default())
}

/// Convert a graphqlite Value to a serde_json Value.
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(arr) => serde_json::Value::Array(arr.iter().map(value_to_json).collect()),
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::EdgeStatus;
    use serial_test::serial;

    fn function(key: &str, file: &str) -> Node {
        Node::new(key, NodeLabel::Function)
            .with("name", key)
            .with("file_path", file)
            .with("start_line", 1)
    }

    fn seeded() -> GraphStore {
        let store = GraphStore::open_in_memory().expect("Should open in-memory store");
        let mut batch = MutationBatch::new();
        batch.upsert_nodes.push(function("function:a.py#main", "a.py"));
        batch.upsert_nodes.push(function("function:a.py#helper", "a.py"));
        batch.upsert_nodes.push(function("function:b.py#util", "b.py"));
        batch.upsert_edges.push(Edge::calls(
            "function:a.py#main",
            "function:a.py#helper",
            "helper",
            EdgeStatus::Resolved,
            &[],
        ));
        store.apply(&batch).expect("Should apply batch");
        store
    }

    #[test]
    #[serial]
    fn test_store_open_in_memory() {
        let store = GraphStore::open_in_memory().expect("Should open in-memory store");
        let stats = store.stats().expect("Should get stats");
        assert_eq!(stats.node_count, 0);
        assert_eq!(stats.edge_count, 0);
        assert!(store.ping().is_ok());
    }

    #[test]
    #[serial]
    fn test_apply_nodes_and_edges() {
        let store = seeded();
        let stats = store.stats().unwrap();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 1);

        let node = store.node("function:a.py#main").unwrap().unwrap();
        assert_eq!(node.label, NodeLabel::Function);
        assert_eq!(node.prop_u64("start_line"), Some(1));
    }

    #[test]
    #[serial]
    fn test_edges_from_and_to() {
        let store = seeded();
        let out = store
            .edges_from("function:a.py#main", Some(EdgeKind::Calls))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, "function:a.py#helper");
        assert_eq!(out[0].status(), Some(EdgeStatus::Resolved));

        let incoming = store.edges_to("function:a.py#helper", None).unwrap();
        assert_eq!(incoming.len(), 1);
    }

    #[test]
    #[serial]
    fn test_edge_upsert_does_not_duplicate() {
        let store = seeded();
        let mut batch = MutationBatch::new();
        batch.upsert_edges.push(Edge::calls(
            "function:a.py#main",
            "function:a.py#helper",
            "helper",
            EdgeStatus::Resolved,
            &[],
        ));
        store.apply(&batch).unwrap();
        assert_eq!(store.stats().unwrap().edge_count, 1);
    }

    #[test]
    #[serial]
    fn test_dangling_edge_rejected() {
        let store = seeded();
        let mut batch = MutationBatch::new();
        batch.upsert_edges.push(Edge::contains("file:missing.py", "function:a.py#main"));
        assert!(matches!(
            store.apply(&batch),
            Err(StoreError::DanglingEdge { .. })
        ));
        assert_eq!(store.stats().unwrap().edge_count, 1);
    }

    #[test]
    #[serial]
    fn test_nodes_in_file_and_delete() {
        let store = seeded();
        assert_eq!(store.nodes_in_file("a.py").unwrap().len(), 2);

        let mut batch = MutationBatch::new();
        batch.delete_nodes.push("function:a.py#helper".to_string());
        store.apply(&batch).unwrap();

        assert!(!store.has_node("function:a.py#helper").unwrap());
        assert_eq!(store.nodes_in_file("a.py").unwrap().len(), 1);
        assert_eq!(store.stats().unwrap().edge_count, 0);
    }

    #[test]
    #[serial]
    fn test_cypher_query() {
        let store = seeded();
        let result = store
            .cypher("MATCH (n:Function) RETURN n.name AS name")
            .expect("Should query");
        assert_eq!(result.rows.len(), 3);
        assert!(result.rows.iter().any(|row| row.get("name")
            == Some(&serde_json::Value::String("function:b.py#util".to_string()))));
    }
}
