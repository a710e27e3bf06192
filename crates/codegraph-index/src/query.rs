//! Typed queries over a stored code graph.
//!
//! Every query runs against [`GraphBackend`] primitives, so it works on any
//! backend, not only those that accept Cypher. Only resolved CALLS and
//! INHERITS edges count; references still pointing at placeholders are
//! never reported as relationships.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::edges::{Edge, EdgeKind, EdgeStatus};
use crate::store::{Direction, GraphBackend, Result};
use crate::symbols::{Node, NodeLabel};

/// Function names treated as entry points by [`CodeQuery::dead_code`].
const ENTRY_POINTS: &[&str] = &["main", "setup", "run"];

/// Decorator markers the extractors add that are not real decorators.
const MARKER_DECORATORS: &[&str] = &["async", "lambda"];

/// A definition as reported by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub key: String,
    pub label: NodeLabel,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub is_dependency: bool,
}

impl From<&Node> for SymbolRef {
    fn from(node: &Node) -> Self {
        Self {
            key: node.key.clone(),
            label: node.label,
            name: node.name().unwrap_or(&node.key).to_string(),
            qualified_name: node.prop_str("qualified_name").map(str::to_string),
            file_path: node.file_path().map(str::to_string),
            line: node.prop_u64("start_line"),
            is_dependency: node
                .prop("is_dependency")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// One side of a call relationship with the lines the calls sit on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRelation {
    pub symbol: SymbolRef,
    pub lines: Vec<usize>,
}

/// A file importing a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Importer {
    pub file_path: String,
    pub module: String,
    pub is_dependency: bool,
}

/// Direct inheritance neighbourhood of one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassHierarchy {
    pub class: SymbolRef,
    pub parents: Vec<SymbolRef>,
    pub children: Vec<SymbolRef>,
    pub methods: Vec<SymbolRef>,
}

/// A function with its cyclomatic complexity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityEntry {
    pub function: SymbolRef,
    pub complexity: u64,
}

/// Query helpers bound to a backend.
pub struct CodeQuery<'a> {
    backend: &'a dyn GraphBackend,
}

impl<'a> CodeQuery<'a> {
    pub fn new(backend: &'a dyn GraphBackend) -> Self {
        Self { backend }
    }

    /// Nodes with `label` and `name`, optionally restricted to one file.
    fn named(&self, label: NodeLabel, name: &str, file_path: Option<&str>) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .backend
            .nodes_with_label(label)?
            .into_iter()
            .filter(|node| node.name() == Some(name))
            .filter(|node| file_path.is_none_or(|path| node.file_path() == Some(path)))
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    /// Functions named `name`. With a file path and no match there, every
    /// file is searched instead.
    fn functions(&self, name: &str, file_path: Option<&str>) -> Result<Vec<Node>> {
        let scoped = self.named(NodeLabel::Function, name, file_path)?;
        if scoped.is_empty() && file_path.is_some() {
            return self.named(NodeLabel::Function, name, None);
        }
        Ok(scoped)
    }

    fn resolved(edges: Vec<Edge>) -> impl Iterator<Item = Edge> {
        edges
            .into_iter()
            .filter(|edge| edge.status() == Some(EdgeStatus::Resolved))
    }

    fn relations(&self, edges: impl Iterator<Item = (String, Edge)>) -> Result<Vec<CallRelation>> {
        let mut grouped: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (key, edge) in edges {
            let lines = grouped.entry(key).or_default();
            lines.extend(edge.call_sites().iter().map(|site| site.line));
        }
        let mut relations = Vec::with_capacity(grouped.len());
        for (key, mut lines) in grouped {
            let Some(node) = self.backend.node(&key)? else {
                continue;
            };
            lines.sort_unstable();
            lines.dedup();
            relations.push(CallRelation {
                symbol: SymbolRef::from(&node),
                lines,
            });
        }
        relations.sort_by(|a, b| {
            (a.symbol.is_dependency, &a.symbol.file_path, a.symbol.line)
                .cmp(&(b.symbol.is_dependency, &b.symbol.file_path, b.symbol.line))
        });
        Ok(relations)
    }

    /// Everything that calls a function named `name`.
    ///
    /// Callers are functions, or the file itself for module-level calls.
    pub fn callers(&self, name: &str, file_path: Option<&str>) -> Result<Vec<CallRelation>> {
        let mut edges = Vec::new();
        for target in self.functions(name, file_path)? {
            let incoming = self.backend.edges_to(&target.key, Some(EdgeKind::Calls))?;
            edges.extend(Self::resolved(incoming).map(|edge| (edge.source.clone(), edge)));
        }
        self.relations(edges.into_iter())
    }

    /// Every resolved callee of a function named `name`.
    pub fn callees(&self, name: &str, file_path: Option<&str>) -> Result<Vec<CallRelation>> {
        let mut edges = Vec::new();
        for caller in self.functions(name, file_path)? {
            let outgoing = self.backend.edges_from(&caller.key, Some(EdgeKind::Calls))?;
            edges.extend(Self::resolved(outgoing).map(|edge| (edge.target.clone(), edge)));
        }
        self.relations(edges.into_iter())
    }

    /// Files importing a module whose name contains `module`.
    pub fn importers(&self, module: &str) -> Result<Vec<Importer>> {
        let mut importers = Vec::new();
        for node in self.backend.nodes_with_label(NodeLabel::Module)? {
            let Some(name) = node.name().filter(|name| name.contains(module)) else {
                continue;
            };
            for edge in self.backend.edges_to(&node.key, Some(EdgeKind::Imports))? {
                let Some(file) = self.backend.node(&edge.source)? else {
                    continue;
                };
                let symbol = SymbolRef::from(&file);
                importers.push(Importer {
                    file_path: symbol.file_path.unwrap_or(symbol.key),
                    module: name.to_string(),
                    is_dependency: symbol.is_dependency,
                });
            }
        }
        importers.sort_by(|a, b| {
            (a.is_dependency, &a.file_path, &a.module).cmp(&(b.is_dependency, &b.file_path, &b.module))
        });
        importers.dedup();
        Ok(importers)
    }

    /// Direct parents, children and methods of each class named `name`.
    pub fn class_hierarchy(&self, name: &str) -> Result<Vec<ClassHierarchy>> {
        let mut hierarchies = Vec::new();
        for class in self.named(NodeLabel::Class, name, None)? {
            let parents = Self::resolved(self.backend.edges_from(&class.key, Some(EdgeKind::Inherits))?)
                .map(|edge| edge.target)
                .collect::<Vec<_>>();
            let children = Self::resolved(self.backend.edges_to(&class.key, Some(EdgeKind::Inherits))?)
                .map(|edge| edge.source)
                .collect::<Vec<_>>();
            let methods = self
                .backend
                .edges_from(&class.key, Some(EdgeKind::Contains))?
                .into_iter()
                .map(|edge| edge.target)
                .collect::<Vec<_>>();
            hierarchies.push(ClassHierarchy {
                class: SymbolRef::from(&class),
                parents: self.symbols(&parents, Some(NodeLabel::Class))?,
                children: self.symbols(&children, Some(NodeLabel::Class))?,
                methods: self.symbols(&methods, Some(NodeLabel::Function))?,
            });
        }
        Ok(hierarchies)
    }

    /// Transitive base classes of the class `key`, nearest first.
    pub fn ancestors(&self, key: &str, max_depth: usize) -> Result<Vec<SymbolRef>> {
        self.inheritance(key, Direction::Outgoing, max_depth)
    }

    /// Transitive subclasses of the class `key`, nearest first.
    pub fn descendants(&self, key: &str, max_depth: usize) -> Result<Vec<SymbolRef>> {
        self.inheritance(key, Direction::Incoming, max_depth)
    }

    fn inheritance(&self, key: &str, direction: Direction, max_depth: usize) -> Result<Vec<SymbolRef>> {
        let reached = self
            .backend
            .traverse(key, &[EdgeKind::Inherits], direction, max_depth)?;
        let keys: Vec<String> = reached.into_iter().map(|(key, _)| key).collect();
        self.symbols(&keys, Some(NodeLabel::Class))
    }

    /// Shortest chain of resolved calls from a function named `from` to one
    /// named `to`, at most `max_depth` calls long.
    pub fn call_chain(&self, from: &str, to: &str, max_depth: usize) -> Result<Option<Vec<SymbolRef>>> {
        let goals: HashSet<String> = self
            .named(NodeLabel::Function, to, None)?
            .into_iter()
            .map(|node| node.key)
            .collect();
        if goals.is_empty() {
            return Ok(None);
        }

        let mut parent: HashMap<String, Option<String>> = HashMap::new();
        let mut queue = VecDeque::new();
        for start in self.named(NodeLabel::Function, from, None)? {
            parent.insert(start.key.clone(), None);
            queue.push_back((start.key, 0usize));
        }

        while let Some((key, depth)) = queue.pop_front() {
            if depth > 0 && goals.contains(&key) {
                return self.chain_to(&key, &parent).map(Some);
            }
            if depth >= max_depth {
                continue;
            }
            for edge in Self::resolved(self.backend.edges_from(&key, Some(EdgeKind::Calls))?) {
                if parent.contains_key(&edge.target) {
                    continue;
                }
                parent.insert(edge.target.clone(), Some(key.clone()));
                queue.push_back((edge.target, depth + 1));
            }
        }
        Ok(None)
    }

    fn chain_to(&self, end: &str, parent: &HashMap<String, Option<String>>) -> Result<Vec<SymbolRef>> {
        let mut keys = vec![end.to_string()];
        let mut current = end;
        while let Some(Some(previous)) = parent.get(current) {
            keys.push(previous.clone());
            current = previous.as_str();
        }
        keys.reverse();
        self.symbols(&keys, None)
    }

    /// Project functions nothing in the project calls.
    ///
    /// Entry points (`main`, `setup`, `run`), tests, dunder methods and
    /// decorated functions are never reported.
    pub fn dead_code(&self) -> Result<Vec<SymbolRef>> {
        let mut unused = Vec::new();
        for node in self.backend.nodes_with_label(NodeLabel::Function)? {
            let symbol = SymbolRef::from(&node);
            if symbol.is_dependency || is_entry_point(&symbol.name) || is_decorated(&node) {
                continue;
            }
            let mut called = false;
            for edge in Self::resolved(self.backend.edges_to(&node.key, Some(EdgeKind::Calls))?) {
                let from_project = match self.backend.node(&edge.source)? {
                    Some(caller) => !SymbolRef::from(&caller).is_dependency,
                    None => false,
                };
                if from_project {
                    called = true;
                    break;
                }
            }
            if !called {
                unused.push(symbol);
            }
        }
        unused.sort_by(|a, b| (&a.file_path, a.line, &a.key).cmp(&(&b.file_path, b.line, &b.key)));
        Ok(unused)
    }

    /// The `limit` project functions with the highest complexity.
    pub fn most_complex(&self, limit: usize) -> Result<Vec<ComplexityEntry>> {
        let mut entries: Vec<ComplexityEntry> = self
            .backend
            .nodes_with_label(NodeLabel::Function)?
            .iter()
            .map(|node| ComplexityEntry {
                function: SymbolRef::from(node),
                complexity: node.prop_u64("complexity").unwrap_or(1),
            })
            .filter(|entry| !entry.function.is_dependency)
            .collect();
        entries.sort_by(|a, b| {
            b.complexity
                .cmp(&a.complexity)
                .then_with(|| a.function.key.cmp(&b.function.key))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// Look up `keys`, keeping those present with the wanted label.
    fn symbols(&self, keys: &[String], label: Option<NodeLabel>) -> Result<Vec<SymbolRef>> {
        let mut symbols = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(node) = self.backend.node(key)? {
                if label.is_none_or(|label| node.label == label) {
                    symbols.push(SymbolRef::from(&node));
                }
            }
        }
        Ok(symbols)
    }
}

fn is_entry_point(name: &str) -> bool {
    ENTRY_POINTS.contains(&name)
        || name.starts_with("test_")
        || name.starts_with("_test")
        || (name.len() > 4 && name.starts_with("__") && name.ends_with("__"))
}

fn is_decorated(node: &Node) -> bool {
    node.prop("decorators")
        .and_then(serde_json::Value::as_array)
        .is_some_and(|decorators| {
            decorators
                .iter()
                .filter_map(serde_json::Value::as_str)
                .any(|decorator| !MARKER_DECORATORS.contains(&decorator))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::CallSiteRecord;
    use crate::store::{MemoryStore, MutationBatch};
    use serde_json::json;

    fn function(path: &str, name: &str) -> Node {
        Node::new(format!("function:{path}#{name}"), NodeLabel::Function)
            .with("name", name)
            .with("qualified_name", name)
            .with("file_path", path)
            .with("start_line", 1)
            .with("complexity", 1)
            .with("decorators", json!([]))
            .with("is_dependency", false)
    }

    fn class(path: &str, name: &str) -> Node {
        Node::new(format!("class:{path}#{name}"), NodeLabel::Class)
            .with("name", name)
            .with("file_path", path)
            .with("is_dependency", false)
    }

    fn call(from: &Node, to: &Node, line: usize) -> Edge {
        let site = CallSiteRecord {
            line,
            full_name: to.name().unwrap_or_default().to_string(),
            receiver: None,
            args: Vec::new(),
        };
        Edge::calls(&from.key, &to.key, to.name().unwrap_or_default(), EdgeStatus::Resolved, &[site])
    }

    fn store(nodes: Vec<Node>, edges: Vec<Edge>) -> MemoryStore {
        let store = MemoryStore::new();
        let mut batch = MutationBatch::new();
        batch.upsert_nodes = nodes;
        batch.upsert_edges = edges;
        store.apply(&batch).unwrap();
        store
    }

    /// main -> parse -> tokenize, plus an unused helper and a call to a
    /// placeholder.
    fn call_graph() -> MemoryStore {
        let main = function("/r/app.py", "main");
        let parse = function("/r/parse.py", "parse").with("complexity", 7);
        let tokenize = function("/r/parse.py", "tokenize").with("complexity", 3);
        let helper = function("/r/util.py", "helper");
        let missing = Node::new("unresolved:call:missing", NodeLabel::Unresolved).with("name", "missing");
        let edges = vec![
            call(&main, &parse, 3),
            call(&main, &parse, 9),
            call(&parse, &tokenize, 12),
            Edge::calls(&helper.key, &missing.key, "missing", EdgeStatus::Unresolved, &[]),
        ];
        store(vec![main, parse, tokenize, helper, missing], edges)
    }

    #[test]
    fn test_callers_and_callees_follow_resolved_calls() {
        let store = call_graph();
        let query = CodeQuery::new(&store);

        let callers = query.callers("parse", None).unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].symbol.name, "main");
        assert_eq!(callers[0].lines, vec![3, 9]);

        let callees = query.callees("parse", None).unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].symbol.key, "function:/r/parse.py#tokenize");

        assert!(query.callees("helper", None).unwrap().is_empty());
    }

    #[test]
    fn test_callers_fall_back_to_any_file() {
        let store = call_graph();
        let query = CodeQuery::new(&store);
        let callers = query.callers("parse", Some("/r/elsewhere.py")).unwrap();
        assert_eq!(callers.len(), 1);
    }

    #[test]
    fn test_call_chain_is_shortest_and_bounded() {
        let store = call_graph();
        let query = CodeQuery::new(&store);

        let chain = query.call_chain("main", "tokenize", 5).unwrap().unwrap();
        let names: Vec<&str> = chain.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["main", "parse", "tokenize"]);

        assert!(query.call_chain("main", "tokenize", 1).unwrap().is_none());
        assert!(query.call_chain("tokenize", "main", 5).unwrap().is_none());
    }

    #[test]
    fn test_dead_code_skips_entry_points_and_decorated() {
        let routed = function("/r/web.py", "index").with("decorators", json!(["app.route(\"/\")"]));
        let dunder = function("/r/web.py", "__repr__");
        let asynchronous = function("/r/web.py", "fetch").with("decorators", json!(["async"]));
        let store = call_graph();
        let mut batch = MutationBatch::new();
        batch.upsert_nodes = vec![routed, dunder, asynchronous];
        store.apply(&batch).unwrap();

        let unused: Vec<String> = CodeQuery::new(&store)
            .dead_code()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(unused, vec!["helper", "fetch"]);
    }

    #[test]
    fn test_most_complex_orders_by_complexity() {
        let store = call_graph();
        let top = CodeQuery::new(&store).most_complex(2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].function.name, "parse");
        assert_eq!(top[0].complexity, 7);
        assert_eq!(top[1].function.name, "tokenize");
    }

    #[test]
    fn test_hierarchy_and_transitive_inheritance() {
        let base = class("/r/m.py", "Base");
        let middle = class("/r/m.py", "Middle");
        let leaf = class("/r/m.py", "Leaf");
        let method = function("/r/m.py", "Middle.run").with("name", "run");
        let placeholder = Node::new("unresolved:class:Mixin", NodeLabel::Unresolved).with("name", "Mixin");
        let edges = vec![
            Edge::inherits(&middle.key, &base.key, "Base", EdgeStatus::Resolved),
            Edge::inherits(&leaf.key, &middle.key, "Middle", EdgeStatus::Resolved),
            Edge::inherits(&leaf.key, &placeholder.key, "Mixin", EdgeStatus::Unresolved),
            Edge::contains(&middle.key, &method.key),
        ];
        let store = store(vec![base.clone(), middle, leaf.clone(), method, placeholder], edges);
        let query = CodeQuery::new(&store);

        let hierarchy = query.class_hierarchy("Middle").unwrap();
        assert_eq!(hierarchy.len(), 1);
        assert_eq!(hierarchy[0].parents[0].name, "Base");
        assert_eq!(hierarchy[0].children[0].name, "Leaf");
        assert_eq!(hierarchy[0].methods[0].name, "run");

        let ancestors: Vec<String> = query
            .ancestors(&leaf.key, 10)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(ancestors, vec!["Middle", "Base"]);

        let descendants = query.descendants(&base.key, 1).unwrap();
        assert_eq!(descendants.len(), 1);
        assert_eq!(descendants[0].name, "Middle");
    }

    #[test]
    fn test_importers_match_module_substring() {
        let file = Node::new("file:/r/a.py", NodeLabel::File)
            .with("name", "a.py")
            .with("file_path", "/r/a.py")
            .with("is_dependency", false);
        let module = Node::new("module:os.path", NodeLabel::Module).with("name", "os.path");
        let edge = Edge::imports(&file.key, &module.key, "os.path", &[]);
        let store = store(vec![file, module], vec![edge]);

        let importers = CodeQuery::new(&store).importers("os").unwrap();
        assert_eq!(
            importers,
            vec![Importer {
                file_path: "/r/a.py".to_string(),
                module: "os.path".to_string(),
                is_dependency: false,
            }]
        );
        assert!(CodeQuery::new(&store).importers("sys").unwrap().is_empty());
    }
}
