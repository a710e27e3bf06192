//! Edge types representing relationships between nodes.
//!
//! An edge is identified by `(source, kind, target)`: at most one edge of a
//! kind connects two nodes. Repeated call sites between the same pair are
//! folded into the `call_sites` property of a single CALLS edge.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::symbols::Props;

/// The kind of relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Parent contains child (Repository -> File, File -> Function, Class -> method)
    Contains,
    /// File imports a Module
    Imports,
    /// Function (or File, for module-level code) calls a Function
    Calls,
    /// Class inherits from a Class
    Inherits,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::Contains,
        EdgeKind::Imports,
        EdgeKind::Calls,
        EdgeKind::Inherits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Inherits => "INHERITS",
        }
    }

    /// Relationship type used by Cypher backends.
    pub fn rel_type(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "_CONTAINS", // Prefixed to avoid Cypher reserved word
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Inherits => "INHERITS",
        }
    }

    pub fn from_rel_type(rel: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.rel_type() == rel || kind.as_str() == rel)
    }

    /// Edges that can point at an unresolved placeholder.
    pub fn is_reference(&self) -> bool {
        matches!(self, EdgeKind::Calls | EdgeKind::Inherits)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a reference edge reached a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    Resolved,
    Unresolved,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Resolved => "resolved",
            EdgeStatus::Unresolved => "unresolved",
        }
    }
}

/// Identity of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: String,
    pub kind: EdgeKind,
    pub target: String,
}

impl EdgeKey {
    pub fn new(source: impl Into<String>, kind: EdgeKind, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind,
            target: target.into(),
        }
    }
}

/// One call site folded into a CALLS edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteRecord {
    pub line: usize,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// One imported name folded into an IMPORTS edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub line: usize,
}

/// A directed edge in the code graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub props: Props,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            props: Props::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.props.insert(name.to_string(), value.into());
        self
    }

    /// Create a CONTAINS edge (parent contains child).
    pub fn contains(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self::new(parent, child, EdgeKind::Contains)
    }

    /// Create an IMPORTS edge from a file to a module.
    pub fn imports(
        file: impl Into<String>,
        module: impl Into<String>,
        module_name: &str,
        names: &[ImportedName],
    ) -> Self {
        Self::new(file, module, EdgeKind::Imports)
            .with("module", module_name)
            .with("names", json!(names))
    }

    /// Create a CALLS edge carrying every call site between the pair.
    pub fn calls(
        caller: impl Into<String>,
        callee: impl Into<String>,
        callee_name: &str,
        status: EdgeStatus,
        sites: &[CallSiteRecord],
    ) -> Self {
        Self::new(caller, callee, EdgeKind::Calls)
            .with("callee_name", callee_name)
            .with("status", status.as_str())
            .with("line", sites.first().map(|s| s.line).unwrap_or(0))
            .with("call_sites", json!(sites))
    }

    /// Create an INHERITS edge from child class to base.
    pub fn inherits(
        child: impl Into<String>,
        base: impl Into<String>,
        base_name: &str,
        status: EdgeStatus,
    ) -> Self {
        Self::new(child, base, EdgeKind::Inherits)
            .with("base_name", base_name)
            .with("status", status.as_str())
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.kind, self.target.clone())
    }

    pub fn status(&self) -> Option<EdgeStatus> {
        match self.props.get("status").and_then(Value::as_str) {
            Some("resolved") => Some(EdgeStatus::Resolved),
            Some("unresolved") => Some(EdgeStatus::Unresolved),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.status() == Some(EdgeStatus::Unresolved)
    }

    /// Literal name the reference was written with.
    pub fn reference_name(&self) -> Option<&str> {
        let field = match self.kind {
            EdgeKind::Calls => "callee_name",
            EdgeKind::Inherits => "base_name",
            _ => return None,
        };
        self.props.get(field).and_then(Value::as_str)
    }

    pub fn call_sites(&self) -> Vec<CallSiteRecord> {
        self.props
            .get("call_sites")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Copy of this edge pointed at a different target.
    pub fn retarget(&self, target: impl Into<String>, status: EdgeStatus) -> Self {
        let mut edge = self.clone();
        edge.target = target.into();
        edge.props
            .insert("status".to_string(), Value::from(status.as_str()));
        edge
    }
}
