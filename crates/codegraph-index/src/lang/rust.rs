//! Rust-specific extraction.
//!
//! Definitions are found by walking the tree with a scope stack; call sites
//! and trait implementations use compiled tree-sitter queries. `impl` and
//! `trait` blocks act as class scopes so methods are qualified by their
//! type (`Config.load`).

use std::collections::HashMap;
use std::sync::OnceLock;

use streaming_iterator::StreamingIterator;
use tree_sitter::Node;

use super::{
    Scope, class_context, count_decisions, enclosing_function, field_text, named_children,
    node_text, qualify, short_value,
};
use crate::extract::{
    CallSite, ClassDef, Definition, DefinitionKind, FunctionDef, ImportDef, LanguageExtractor,
    Span, VariableDef,
};
use crate::parser::Language;

/// Compiled queries for Rust extraction.
struct RustQueries {
    calls: tree_sitter::Query,
    impls: tree_sitter::Query,
}

impl RustQueries {
    fn new(language: tree_sitter::Language) -> Result<Self, String> {
        let calls = tree_sitter::Query::new(&language, CALLS_QUERY)
            .map_err(|e| format!("Failed to compile calls query: {e}"))?;
        let impls = tree_sitter::Query::new(&language, IMPLS_QUERY)
            .map_err(|e| format!("Failed to compile impls query: {e}"))?;
        Ok(Self { calls, impls })
    }
}

static RUST_QUERIES: OnceLock<Result<RustQueries, String>> = OnceLock::new();

fn get_queries() -> Result<&'static RustQueries, &'static str> {
    RUST_QUERIES
        .get_or_init(|| RustQueries::new(tree_sitter_rust::LANGUAGE.into()))
        .as_ref()
        .map_err(|e| e.as_str())
}

/// Tree-sitter query for call sites.
const CALLS_QUERY: &str = r#"
; Direct function calls
(call_expression
  function: (identifier) @callee) @call

; Path calls (e.g., module::function(), Type::new())
(call_expression
  function: (scoped_identifier
    path: (_) @receiver
    name: (identifier) @callee) @full) @call

; Method calls
(call_expression
  function: (field_expression
    value: (_) @receiver
    field: (field_identifier) @callee) @full) @call
"#;

/// Tree-sitter query for trait implementations.
const IMPLS_QUERY: &str = r#"
; impl Trait for Type
(impl_item
  trait: (_) @trait_name
  type: (_) @type_name) @impl
"#;

const DECISION_KINDS: &[&str] = &[
    "if_expression",
    "while_expression",
    "for_expression",
    "match_arm",
];

/// Rust language extractor.
pub struct RustExtractor;

/// `Foo<T>` and `crate::a::Foo` both name `Foo`.
fn type_name(text: &str) -> String {
    let base = text.split('<').next().unwrap_or(text);
    base.rsplit("::").next().unwrap_or(base).trim().to_string()
}

/// Strip generic arguments but keep the path.
fn without_generics(text: &str) -> String {
    text.split('<').next().unwrap_or(text).trim().to_string()
}

impl RustExtractor {
    /// The scope a node opens, as `(name, is_class)`.
    fn frame_for(node: &Node, source: &str) -> Option<(String, bool)> {
        match node.kind() {
            "function_item" => field_text(node, "name", source).map(|name| (name, false)),
            "impl_item" => field_text(node, "type", source).map(|ty| (type_name(&ty), true)),
            "trait_item" => field_text(node, "name", source).map(|name| (name, true)),
            _ => None,
        }
    }

    fn walk<'t>(
        node: Node<'t>,
        source: &str,
        scope: &mut Vec<Scope>,
        visit: &mut dyn FnMut(Node<'t>, &[Scope]),
    ) {
        visit(node, scope);

        let frame = Self::frame_for(&node, source);
        if let Some((name, is_class)) = &frame {
            let scope_frame = Scope::new(scope, name, *is_class, node.start_byte());
            scope.push(scope_frame);
        }

        for child in named_children(&node) {
            Self::walk(child, source, scope, visit);
        }

        if frame.is_some() {
            scope.pop();
        }
    }

    /// Rebuild the scope stack of a node from its ancestors.
    fn scope_at(node: &Node, source: &str) -> Vec<Scope> {
        let mut frames = Vec::new();
        let mut current = node.parent();
        while let Some(ancestor) = current {
            if let Some((name, is_class)) = Self::frame_for(&ancestor, source) {
                frames.push((name, is_class, ancestor.start_byte()));
            }
            current = ancestor.parent();
        }

        let mut scope: Vec<Scope> = Vec::with_capacity(frames.len());
        for (name, is_class, start) in frames.into_iter().rev() {
            let frame = Scope::new(&scope, &name, is_class, start);
            scope.push(frame);
        }
        scope
    }

    /// Attributes directly above an item, plus its visibility and modifiers.
    fn tags(node: &Node, source: &str) -> Vec<String> {
        let mut attributes = Vec::new();
        let mut prev = node.prev_sibling();
        while let Some(sibling) = prev {
            match sibling.kind() {
                "attribute_item" => {
                    let text = node_text(&sibling, source);
                    let inner = text
                        .trim()
                        .trim_start_matches("#[")
                        .trim_end_matches(']')
                        .to_string();
                    attributes.push(inner);
                }
                "line_comment" | "block_comment" => {}
                _ => break,
            }
            prev = sibling.prev_sibling();
        }
        attributes.reverse();

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "visibility_modifier" => attributes.push(node_text(&child, source).to_string()),
                "function_modifiers" => attributes.extend(
                    node_text(&child, source)
                        .split_whitespace()
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
        attributes
    }

    fn parameters(node: &Node, source: &str) -> Vec<String> {
        let Some(params) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        named_children(&params)
            .into_iter()
            .filter_map(|param| match param.kind() {
                "self_parameter" => Some("self".to_string()),
                "parameter" => field_text(&param, "pattern", source),
                "identifier" => Some(node_text(&param, source).to_string()),
                "line_comment" | "block_comment" | "attribute_item" => None,
                _ => Some(node_text(&param, source).to_string()),
            })
            .collect()
    }

    /// `impl Trait for Type` pairs in the file, keyed by type name.
    fn trait_impls(root: Node, source: &str) -> HashMap<String, Vec<String>> {
        let mut impls: HashMap<String, Vec<String>> = HashMap::new();
        let Ok(queries) = get_queries() else {
            return impls;
        };
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(&queries.impls, root, source.as_bytes());

        while let Some(match_) = matches.next() {
            let mut type_name_text = None;
            let mut trait_name = None;
            for capture in match_.captures {
                let capture_name = queries.impls.capture_names()[capture.index as usize];
                let text = node_text(&capture.node, source);
                match capture_name {
                    "type_name" => type_name_text = Some(type_name(text)),
                    "trait_name" => trait_name = Some(without_generics(text)),
                    _ => {}
                }
            }
            if let (Some(ty), Some(trait_name)) = (type_name_text, trait_name) {
                let entry = impls.entry(ty).or_default();
                if !entry.contains(&trait_name) {
                    entry.push(trait_name);
                }
            }
        }
        impls
    }

    /// Expand a `use` tree into flat imports.
    fn expand_use(node: Node, prefix: &str, source: &str, line: usize, out: &mut Vec<ImportDef>) {
        let join = |path: &str| {
            if prefix.is_empty() {
                path.to_string()
            } else {
                format!("{prefix}::{path}")
            }
        };

        match node.kind() {
            "identifier" | "crate" | "super" | "self" | "metavariable" => {
                let text = node_text(&node, source);
                if text == "self" && !prefix.is_empty() {
                    out.push(ImportDef {
                        module: prefix.to_string(),
                        name: None,
                        alias: None,
                        line,
                    });
                } else if prefix.is_empty() {
                    out.push(ImportDef {
                        module: text.to_string(),
                        name: None,
                        alias: None,
                        line,
                    });
                } else {
                    out.push(ImportDef {
                        module: prefix.to_string(),
                        name: Some(text.to_string()),
                        alias: None,
                        line,
                    });
                }
            }
            "scoped_identifier" => {
                let full = join(node_text(&node, source));
                let (module, name) = match full.rsplit_once("::") {
                    Some((module, name)) => (module.to_string(), Some(name.to_string())),
                    None => (full.clone(), None),
                };
                out.push(ImportDef {
                    module,
                    name,
                    alias: None,
                    line,
                });
            }
            "use_as_clause" => {
                let Some(path) = node.child_by_field_name("path") else {
                    return;
                };
                let before = out.len();
                Self::expand_use(path, prefix, source, line, out);
                let alias = field_text(&node, "alias", source);
                for import in &mut out[before..] {
                    import.alias = alias.clone();
                }
            }
            "use_wildcard" => {
                let module = named_children(&node)
                    .into_iter()
                    .next()
                    .map(|path| join(node_text(&path, source)))
                    .unwrap_or_else(|| prefix.to_string());
                out.push(ImportDef {
                    module,
                    name: Some("*".to_string()),
                    alias: None,
                    line,
                });
            }
            "scoped_use_list" => {
                let nested = node
                    .child_by_field_name("path")
                    .map(|path| join(node_text(&path, source)))
                    .unwrap_or_else(|| prefix.to_string());
                if let Some(list) = node.child_by_field_name("list") {
                    Self::expand_use(list, &nested, source, line, out);
                }
            }
            "use_list" => {
                for item in named_children(&node) {
                    Self::expand_use(item, prefix, source, line, out);
                }
            }
            _ => {}
        }
    }

    fn binding_names(pattern: Node, source: &str) -> Vec<String> {
        match pattern.kind() {
            "identifier" => vec![node_text(&pattern, source).to_string()],
            "tuple_pattern" | "mut_pattern" => named_children(&pattern)
                .into_iter()
                .flat_map(|child| Self::binding_names(child, source))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl LanguageExtractor for RustExtractor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn extract_functions(&self, root: Node, source: &str) -> Vec<FunctionDef> {
        let mut functions = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            if node.kind() != "function_item" {
                return;
            }
            let Some(name) = field_text(&node, "name", source) else {
                return;
            };
            functions.push(FunctionDef {
                qualified_name: qualify(scope, &name),
                name,
                span: Span::of(node),
                params: Self::parameters(&node, source),
                decorators: Self::tags(&node, source),
                docstring: self.docstring(node, source),
                complexity: self.complexity(node, source),
                class_context: class_context(scope),
                parent_start: scope.last().map(|s| s.start_byte),
            });
        });
        functions
    }

    fn extract_classes(&self, root: Node, source: &str) -> Vec<ClassDef> {
        let impls = Self::trait_impls(root, source);
        let mut classes = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            if !matches!(node.kind(), "struct_item" | "enum_item" | "trait_item") {
                return;
            }
            let Some(name) = field_text(&node, "name", source) else {
                return;
            };
            let mut bases: Vec<String> = match node.child_by_field_name("bounds") {
                Some(bounds) => named_children(&bounds)
                    .into_iter()
                    .filter(|bound| bound.kind() != "lifetime")
                    .map(|bound| without_generics(node_text(&bound, source)))
                    .collect(),
                None => Vec::new(),
            };
            if let Some(implemented) = impls.get(&name) {
                bases.extend(implemented.iter().cloned());
            }
            classes.push(ClassDef {
                qualified_name: qualify(scope, &name),
                name,
                span: Span::of(node),
                bases,
                decorators: Self::tags(&node, source),
                docstring: self.docstring(node, source),
                parent_start: scope.last().map(|s| s.start_byte),
            });
        });
        classes
    }

    fn extract_imports(&self, root: Node, source: &str) -> Vec<ImportDef> {
        let mut imports = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, _| {
            if node.kind() != "use_declaration" {
                return;
            }
            if let Some(argument) = node.child_by_field_name("argument") {
                let line = node.start_position().row + 1;
                Self::expand_use(argument, "", source, line, &mut imports);
            }
        });
        imports
    }

    fn extract_calls(&self, root: Node, source: &str) -> Vec<CallSite> {
        let Ok(queries) = get_queries() else {
            return Vec::new();
        };
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(&queries.calls, root, source.as_bytes());

        let mut calls = Vec::new();
        while let Some(match_) = matches.next() {
            let mut callee = None;
            let mut receiver = None;
            let mut full = None;
            let mut call_node = None;

            for capture in match_.captures {
                let capture_name = queries.calls.capture_names()[capture.index as usize];
                let node = capture.node;
                match capture_name {
                    "callee" => callee = Some(node_text(&node, source).to_string()),
                    "receiver" => receiver = Some(node_text(&node, source).to_string()),
                    "full" => full = Some(node_text(&node, source).to_string()),
                    "call" => call_node = Some(node),
                    _ => {}
                }
            }

            let (Some(name), Some(call)) = (callee, call_node) else {
                continue;
            };
            let scope = Self::scope_at(&call, source);
            let args = call
                .child_by_field_name("arguments")
                .map(|args| {
                    named_children(&args)
                        .into_iter()
                        .filter(|arg| !matches!(arg.kind(), "line_comment" | "block_comment"))
                        .map(|arg| node_text(&arg, source).to_string())
                        .collect()
                })
                .unwrap_or_default();
            calls.push(CallSite {
                full_name: full.unwrap_or_else(|| name.clone()),
                name,
                receiver,
                args,
                span: Span::of(call),
                caller_start: enclosing_function(&scope).map(|s| s.start_byte),
                class_context: class_context(&scope),
            });
        }

        calls.sort_by_key(|call| call.span.start_byte);
        calls
    }

    fn extract_variables(&self, root: Node, source: &str) -> Vec<VariableDef> {
        let mut variables = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            let names = match node.kind() {
                "let_declaration" => node
                    .child_by_field_name("pattern")
                    .map(|pattern| Self::binding_names(pattern, source))
                    .unwrap_or_default(),
                "const_item" | "static_item" => {
                    field_text(&node, "name", source).into_iter().collect()
                }
                _ => return,
            };
            let value = node
                .child_by_field_name("value")
                .map(|v| short_value(node_text(&v, source)));
            for name in names {
                variables.push(VariableDef {
                    qualified_name: qualify(scope, &name),
                    name,
                    span: Span::of(node),
                    scope: scope.last().map(|s| s.qualified_name.clone()),
                    value: value.clone(),
                });
            }
        });
        variables
    }

    fn complexity(&self, node: Node, source: &str) -> u32 {
        1 + count_decisions(
            node,
            |n| {
                DECISION_KINDS.contains(&n.kind())
                    || (n.kind() == "binary_expression"
                        && n.child_by_field_name("operator")
                            .is_some_and(|op| matches!(node_text(&op, source), "&&" | "||")))
            },
            |n| n.kind() == "function_item",
        )
    }

    /// Consecutive `///` lines above the item, skipping attributes.
    fn docstring(&self, node: Node, source: &str) -> Option<String> {
        let mut doc_lines = Vec::new();
        let mut prev = node.prev_sibling();
        while let Some(sibling) = prev {
            match sibling.kind() {
                "line_comment" => {
                    let text = node_text(&sibling, source).trim();
                    let Some(content) = text.strip_prefix("///") else {
                        break;
                    };
                    doc_lines.push(content.trim().to_string());
                }
                "attribute_item" => {}
                _ => break,
            }
            prev = sibling.prev_sibling();
        }

        if doc_lines.is_empty() {
            None
        } else {
            doc_lines.reverse();
            Some(doc_lines.join("\n"))
        }
    }

    fn extract_definitions(&self, root: Node, source: &str) -> Vec<Definition> {
        let mut defs = Vec::new();
        collect_definitions(root, source, &mut defs);
        defs
    }
}

/// Module-level items of a source file or inline module body.
fn collect_definitions(container: Node, source: &str, defs: &mut Vec<Definition>) {
    for item in named_children(&container) {
        let line = item.start_position().row + 1;
        match item.kind() {
            "function_item" => {
                if let Some(name) = field_text(&item, "name", source) {
                    defs.push(Definition {
                        qualified_name: name.clone(),
                        name,
                        kind: DefinitionKind::Function,
                        top_level: true,
                        line,
                    });
                }
            }
            "struct_item" | "enum_item" | "trait_item" => {
                let Some(name) = field_text(&item, "name", source) else {
                    continue;
                };
                defs.push(Definition {
                    qualified_name: name.clone(),
                    name: name.clone(),
                    kind: DefinitionKind::Class,
                    top_level: true,
                    line,
                });
                if item.kind() == "trait_item" {
                    collect_members(&item, &name, source, defs);
                }
            }
            "impl_item" => {
                if let Some(ty) = field_text(&item, "type", source) {
                    collect_members(&item, &type_name(&ty), source, defs);
                }
            }
            "mod_item" => {
                if let Some(body) = item.child_by_field_name("body") {
                    collect_definitions(body, source, defs);
                }
            }
            _ => {}
        }
    }
}

fn collect_members(block: &Node, owner: &str, source: &str, defs: &mut Vec<Definition>) {
    let Some(body) = block.child_by_field_name("body") else {
        return;
    };
    for member in named_children(&body) {
        if member.kind() != "function_item" {
            continue;
        }
        if let Some(name) = field_text(&member, "name", source) {
            defs.push(Definition {
                qualified_name: format!("{owner}.{name}"),
                name,
                kind: DefinitionKind::Function,
                top_level: false,
                line: member.start_position().row + 1,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FileExtraction;
    use crate::parser::Parser;

    fn extract(source: &str) -> FileExtraction {
        let mut parser = Parser::new();
        let parsed = parser.parse_source(source, Language::Rust).unwrap();
        RustExtractor.extract(&parsed)
    }

    #[test]
    fn test_queries_compile() {
        assert!(get_queries().is_ok());
    }

    #[test]
    fn test_extract_struct_with_impls() {
        let source = r#"
/// A configuration holder.
#[derive(Debug, Clone)]
pub struct Config {
    name: String,
}

impl Config {
    /// Build a config.
    pub fn new(name: String) -> Self {
        Self { name }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
"#;
        let extraction = extract(source);
        assert_eq!(extraction.classes.len(), 1);
        let config = &extraction.classes[0];
        assert_eq!(config.name, "Config");
        assert_eq!(config.bases, vec!["std::fmt::Display"]);
        assert_eq!(config.docstring.as_deref(), Some("A configuration holder."));
        assert!(config.decorators.contains(&"derive(Debug, Clone)".to_string()));
        assert!(config.decorators.contains(&"pub".to_string()));

        let names: Vec<_> = extraction
            .functions
            .iter()
            .map(|f| f.qualified_name.as_str())
            .collect();
        assert_eq!(names, vec!["Config.new", "Config.name", "Config.fmt"]);

        let new = &extraction.functions[0];
        assert_eq!(new.params, vec!["name"]);
        assert_eq!(new.class_context.as_deref(), Some("Config"));
        assert_eq!(new.docstring.as_deref(), Some("Build a config."));
        assert_eq!(extraction.functions[1].params, vec!["self"]);
    }

    #[test]
    fn test_extract_trait_with_supertraits() {
        let source = r#"
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn describe(&self) -> String {
        self.name().to_string()
    }
}
"#;
        let extraction = extract(source);
        assert_eq!(extraction.classes[0].name, "Backend");
        assert_eq!(extraction.classes[0].bases, vec!["Send", "Sync"]);
        assert_eq!(extraction.functions.len(), 1);
        assert_eq!(extraction.functions[0].qualified_name, "Backend.describe");
    }

    #[test]
    fn test_extract_use_trees() {
        let source = r#"
use std::collections::HashMap;
use std::io::{self, Read as R};
use crate::store::*;
use serde;
"#;
        let imports = extract(source).imports;

        assert!(imports.iter().any(|i| i.module == "std::collections"
            && i.name.as_deref() == Some("HashMap")));
        assert!(imports.iter().any(|i| i.module == "std::io" && i.name.is_none()));
        assert!(imports.iter().any(|i| i.module == "std::io"
            && i.name.as_deref() == Some("Read")
            && i.local_name() == "R"));
        assert!(imports.iter().any(|i| i.module == "crate::store" && i.is_glob()));
        assert!(imports.iter().any(|i| i.module == "serde" && i.name.is_none()));
    }

    #[test]
    fn test_extract_calls() {
        let source = r#"
fn main() {
    let config = Config::new("x".to_string());
    helper(1, 2);
    config.validate();
}
"#;
        let extraction = extract(source);
        let main = &extraction.functions[0];

        let helper = extraction.calls.iter().find(|c| c.name == "helper").unwrap();
        assert_eq!(helper.receiver, None);
        assert_eq!(helper.args, vec!["1", "2"]);
        assert_eq!(helper.caller_start, Some(main.span.start_byte));

        let new = extraction.calls.iter().find(|c| c.name == "new").unwrap();
        assert_eq!(new.receiver.as_deref(), Some("Config"));
        assert_eq!(new.full_name, "Config::new");

        let validate = extraction.calls.iter().find(|c| c.name == "validate").unwrap();
        assert_eq!(validate.receiver.as_deref(), Some("config"));
    }

    #[test]
    fn test_method_calls_carry_class_context() {
        let source = r#"
impl Runner {
    fn run(&self) {
        self.step();
    }
}
"#;
        let extraction = extract(source);
        let step = &extraction.calls[0];
        assert_eq!(step.class_context.as_deref(), Some("Runner"));
        assert_eq!(step.caller_start, Some(extraction.functions[0].span.start_byte));
    }

    #[test]
    fn test_complexity() {
        let source = r#"
fn decide(x: i32, flag: bool) -> i32 {
    if x > 0 && flag {
        return 1;
    }
    for i in 0..x {
        let _ = i;
    }
    match x {
        0 => 0,
        _ => 2,
    }
}
"#;
        let extraction = extract(source);
        // if, &&, for, two match arms
        assert_eq!(extraction.functions[0].complexity, 6);
    }

    #[test]
    fn test_extract_variables() {
        let source = r#"
const LIMIT: usize = 10;
static NAME: &str = "x";

fn work() {
    let total = 0;
    let (a, b) = (1, 2);
    let double = |n: i32| n * 2;
}
"#;
        let extraction = extract(source);
        let names: Vec<_> = extraction
            .variables
            .iter()
            .map(|v| v.qualified_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["LIMIT", "NAME", "work.total", "work.a", "work.b", "work.double"]
        );
        // Closures are plain bindings, not functions.
        assert_eq!(extraction.functions.len(), 1);
    }

    #[test]
    fn test_extract_definitions() {
        let source = r#"
pub fn top() {}
struct Store;
impl Store {
    pub fn save(&self) {}
}
mod inner {
    pub fn nested() {}
}
"#;
        let mut parser = Parser::new();
        let parsed = parser.parse_source(source, Language::Rust).unwrap();
        let defs = RustExtractor.extract_definitions(parsed.root_node(), &parsed.source);
        let names: Vec<_> = defs.iter().map(|d| d.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["top", "Store", "Store.save", "nested"]);
        assert!(!defs[2].top_level);
    }

    #[test]
    fn test_type_name_normalization() {
        assert_eq!(type_name("Foo<T>"), "Foo");
        assert_eq!(type_name("crate::a::Bar"), "Bar");
        assert_eq!(without_generics("Iterator<Item = u8>"), "Iterator");
    }
}
