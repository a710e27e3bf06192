//! Language-specific extractors.
//!
//! Each language module implements [`LanguageExtractor`] for one grammar.
//! [`extractor_for`] is the only dispatch point.

pub mod javascript;
pub mod python;
pub mod rust;

use tree_sitter::Node;

use crate::extract::LanguageExtractor;
use crate::parser::Language;

pub use javascript::JavaScriptExtractor;
pub use python::PythonExtractor;
pub use rust::RustExtractor;

static PYTHON: PythonExtractor = PythonExtractor;
static JAVASCRIPT: JavaScriptExtractor = JavaScriptExtractor;
static RUST: RustExtractor = RustExtractor;

/// The extractor for a language.
pub fn extractor_for(language: Language) -> &'static dyn LanguageExtractor {
    match language {
        Language::Python => &PYTHON,
        Language::JavaScript => &JAVASCRIPT,
        Language::Rust => &RUST,
    }
}

/// Longest value text kept on variable nodes.
const MAX_VALUE_LEN: usize = 120;

/// Get text content of a node.
pub(crate) fn node_text<'a>(node: &Node, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Text of a named field child, if present.
pub(crate) fn field_text(node: &Node, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|child| node_text(&child, source).to_string())
}

/// Named children of a node, collected.
pub(crate) fn named_children<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Strip one layer of string quotes (', ", `).
pub(crate) fn strip_quotes(text: &str) -> String {
    let text = text.trim();
    for quote in ["\"\"\"", "'''", "\"", "'", "`"] {
        if text.len() >= 2 * quote.len() && text.starts_with(quote) && text.ends_with(quote) {
            return text[quote.len()..text.len() - quote.len()].to_string();
        }
    }
    text.to_string()
}

/// Truncate an expression for storage on a node.
pub(crate) fn short_value(text: &str) -> String {
    let text = text.trim();
    if text.len() <= MAX_VALUE_LEN {
        return text.to_string();
    }
    let mut end = MAX_VALUE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Count nodes under `node` (inclusive) for which `is_decision` holds.
///
/// Nested function bodies are skipped when `is_boundary` holds for them, so
/// an inner closure does not inflate its parent's score.
pub(crate) fn count_decisions(
    node: Node,
    is_decision: impl Fn(&Node) -> bool,
    is_boundary: impl Fn(&Node) -> bool,
) -> u32 {
    let mut count = 0;
    let mut cursor = node.walk();
    let mut stack: Vec<Node> = node.named_children(&mut cursor).collect();
    while let Some(current) = stack.pop() {
        if is_boundary(&current) {
            continue;
        }
        if is_decision(&current) {
            count += 1;
        }
        stack.extend(current.named_children(&mut cursor));
    }
    count
}

/// Qualified name for a definition inside `scope`.
pub(crate) fn qualify(scope: &[Scope], name: &str) -> String {
    if scope.is_empty() {
        return name.to_string();
    }
    let mut qualified = scope
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(".");
    qualified.push('.');
    qualified.push_str(name);
    qualified
}

/// One level of lexical nesting while walking a tree.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub name: String,
    pub qualified_name: String,
    pub is_class: bool,
    pub start_byte: usize,
}

impl Scope {
    pub fn new(scope: &[Scope], name: &str, is_class: bool, start_byte: usize) -> Self {
        Self {
            name: name.to_string(),
            qualified_name: qualify(scope, name),
            is_class,
            start_byte,
        }
    }
}

/// Innermost enclosing class, if any.
pub(crate) fn class_context(scope: &[Scope]) -> Option<String> {
    scope
        .iter()
        .rev()
        .find(|s| s.is_class)
        .map(|s| s.qualified_name.clone())
}

/// Innermost enclosing function, if any.
pub(crate) fn enclosing_function(scope: &[Scope]) -> Option<&Scope> {
    scope.iter().rev().find(|s| !s.is_class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"hello\""), "hello");
        assert_eq!(strip_quotes("'./utils'"), "./utils");
        assert_eq!(strip_quotes("\"\"\"doc\"\"\""), "doc");
        assert_eq!(strip_quotes("bare"), "bare");
    }

    #[test]
    fn test_short_value() {
        assert_eq!(short_value(" 42 "), "42");
        let long = "x".repeat(200);
        let short = short_value(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), MAX_VALUE_LEN + 3);
    }

    #[test]
    fn test_qualify() {
        let outer = Scope::new(&[], "Outer", true, 0);
        let inner = Scope::new(std::slice::from_ref(&outer), "method", false, 10);
        assert_eq!(inner.qualified_name, "Outer.method");
        assert_eq!(qualify(&[outer.clone(), inner.clone()], "x"), "Outer.method.x");
        assert_eq!(class_context(&[outer, inner]), Some("Outer".to_string()));
    }

    #[test]
    fn test_extractor_dispatch() {
        for language in Language::ALL {
            assert_eq!(extractor_for(language).language(), language);
        }
    }
}
