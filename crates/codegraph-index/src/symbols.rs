//! Node types and stable keys for the code graph.
//!
//! Every node is addressed by a string key built from stable identifiers
//! (root path, file path, qualified name). Line spans are properties, never
//! key material, so an edited body updates a node in place and incoming
//! edges survive.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the node/edge schema written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// Property map carried by nodes and edges.
pub type Props = serde_json::Map<String, Value>;

/// The label of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    /// An indexed root directory
    Repository,
    /// A source file
    File,
    /// A logical import target, shared by all importers
    Module,
    /// A function, method, lambda or closure
    Function,
    /// A class, struct, enum or trait
    Class,
    /// A variable binding
    Variable,
    /// Target of a reference that did not resolve
    Unresolved,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 7] = [
        NodeLabel::Repository,
        NodeLabel::File,
        NodeLabel::Module,
        NodeLabel::Function,
        NodeLabel::Class,
        NodeLabel::Variable,
        NodeLabel::Unresolved,
    ];

    /// Label as stored in the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Repository => "Repository",
            NodeLabel::File => "File",
            NodeLabel::Module => "Module",
            NodeLabel::Function => "Function",
            NodeLabel::Class => "Class",
            NodeLabel::Variable => "Variable",
            NodeLabel::Unresolved => "Unresolved",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == label)
    }

    /// Nodes owned by exactly one File.
    pub fn is_file_owned(&self) -> bool {
        matches!(
            self,
            NodeLabel::Function | NodeLabel::Class | NodeLabel::Variable
        )
    }

    /// Nodes shared between files and collected when unreferenced.
    pub fn is_shared(&self) -> bool {
        matches!(self, NodeLabel::Module | NodeLabel::Unresolved)
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of reference an unresolved placeholder stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Call,
    Class,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Call => "call",
            RefKind::Class => "class",
        }
    }
}

/// A node in the code graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: String,
    pub label: NodeLabel,
    pub props: Props,
}

impl Node {
    pub fn new(key: impl Into<String>, label: NodeLabel) -> Self {
        Self {
            key: key.into(),
            label,
            props: Props::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.props.insert(name.to_string(), value.into());
        self
    }

    /// Set a property only when a value is present.
    pub fn with_opt(self, name: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(Value::as_str)
    }

    pub fn prop_u64(&self, name: &str) -> Option<u64> {
        self.props.get(name).and_then(Value::as_u64)
    }

    pub fn name(&self) -> Option<&str> {
        self.prop_str("name")
    }

    /// Path of the owning file, for file-owned nodes and File nodes.
    pub fn file_path(&self) -> Option<&str> {
        self.prop_str("file_path")
    }
}

/// `repo:<root>`
pub fn repo_key(root: &str) -> String {
    format!("repo:{root}")
}

/// `file:<path>`
pub fn file_key(path: &str) -> String {
    format!("file:{path}")
}

/// `function:<path>#<qualified>`
pub fn function_key(path: &str, qualified_name: &str) -> String {
    format!("function:{path}#{qualified_name}")
}

/// `class:<path>#<qualified>`
pub fn class_key(path: &str, qualified_name: &str) -> String {
    format!("class:{path}#{qualified_name}")
}

/// `variable:<path>#<qualified>`
pub fn variable_key(path: &str, qualified_name: &str) -> String {
    format!("variable:{path}#{qualified_name}")
}

/// `module:<name>`
pub fn module_key(name: &str) -> String {
    format!("module:{name}")
}

/// `unresolved:<call|class>:<name>`
pub fn unresolved_key(kind: RefKind, name: &str) -> String {
    format!("unresolved:{}:{name}", kind.as_str())
}

/// File path embedded in a file-owned or File key.
pub fn file_of_key(key: &str) -> Option<&str> {
    if let Some(path) = key.strip_prefix("file:") {
        return Some(path);
    }
    let rest = ["function:", "class:", "variable:"]
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))?;
    rest.rsplit_once('#').map(|(path, _)| path)
}

/// Hands out keys unique within one file.
///
/// The first definition of a qualified name keeps the plain key; later
/// ones get an occurrence suffix (`~2`, `~3`, ...).
#[derive(Debug, Default)]
pub struct KeyAllocator {
    seen: HashMap<String, usize>,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, base: String) -> String {
        let count = self.seen.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            format!("{base}~{count}")
        }
    }
}
