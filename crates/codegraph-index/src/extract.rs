//! The per-file extraction record and the language extractor contract.
//!
//! A [`LanguageExtractor`] turns a syntax tree into a [`FileExtraction`]:
//! ordered functions, classes, imports, call sites and variables, plus any
//! syntax problems found on the way. Extraction is a pure transform and
//! never fails; a tree with errors yields whatever could be recovered.

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::parser::{Language, ParsedFile};

/// Byte and line range of a construct (lines are 1-indexed, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn of(node: Node) -> Self {
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        }
    }

    /// Number of lines covered.
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// A function, method, lambda or arrow function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    /// Dotted path through enclosing classes and functions (`Greeter.greet`).
    pub qualified_name: String,
    pub span: Span,
    pub params: Vec<String>,
    /// Decorators, attributes and modifiers (`staticmethod`, `pub`, `async`).
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
    pub complexity: u32,
    /// Qualified name of the enclosing class, if this is a method.
    pub class_context: Option<String>,
    /// Start byte of the enclosing function or class, if nested.
    pub parent_start: Option<usize>,
}

/// A class-like definition (class, struct, enum, trait).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub qualified_name: String,
    pub span: Span,
    /// Base classes as written (`Base`, `mod.Base`, `Display`).
    pub bases: Vec<String>,
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
    pub parent_start: Option<usize>,
}

/// One imported name. `import a, b` yields two records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDef {
    /// Module path as written (`os.path`, `./utils`, `crate::store`).
    pub module: String,
    /// Imported name for `from x import y` style imports; `*` for globs.
    pub name: Option<String>,
    /// Local alias, if any.
    pub alias: Option<String>,
    pub line: usize,
}

impl ImportDef {
    /// The name this import binds in the importing file.
    pub fn local_name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        match &self.name {
            Some(name) if name != "*" => name,
            _ => self
                .module
                .rsplit(['.', '/', ':'])
                .find(|segment| !segment.is_empty())
                .unwrap_or(&self.module),
        }
    }

    pub fn is_glob(&self) -> bool {
        self.name.as_deref() == Some("*")
    }
}

/// A call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSite {
    /// Callee name without receiver (`helper`, `method`).
    pub name: String,
    /// Full callee expression (`self.helper`, `utils.format`).
    pub full_name: String,
    /// Receiver expression for method-style calls.
    pub receiver: Option<String>,
    /// Literal argument texts.
    pub args: Vec<String>,
    pub span: Span,
    /// Start byte of the enclosing function; `None` for module-level calls.
    pub caller_start: Option<usize>,
    /// Qualified name of the enclosing class, if any.
    pub class_context: Option<String>,
}

impl CallSite {
    pub fn line(&self) -> usize {
        self.span.start_line
    }
}

/// A variable binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub qualified_name: String,
    pub span: Span,
    /// Qualified name of the enclosing function or class.
    pub scope: Option<String>,
    /// Right-hand side text, truncated.
    pub value: Option<String>,
}

/// A syntax problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Kind of a pre-scanned definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Function,
    Class,
}

/// A definition visible to other files: module-level functions and classes,
/// and the members of module-level classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub qualified_name: String,
    pub kind: DefinitionKind,
    /// False for class members.
    pub top_level: bool,
    pub line: usize,
}

/// Everything extracted from one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileExtraction {
    pub language: Language,
    pub functions: Vec<FunctionDef>,
    pub classes: Vec<ClassDef>,
    pub imports: Vec<ImportDef>,
    pub calls: Vec<CallSite>,
    pub variables: Vec<VariableDef>,
    pub parse_errors: Vec<ParseIssue>,
}

impl FileExtraction {
    pub fn empty(language: Language) -> Self {
        Self {
            language,
            functions: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            calls: Vec::new(),
            variables: Vec::new(),
            parse_errors: Vec::new(),
        }
    }

    /// Definitions for the symbol index, derived from the full extraction.
    ///
    /// Nested functions are included so local-scope lookups can see them.
    pub fn definitions(&self) -> Vec<Definition> {
        let mut defs: Vec<Definition> = self
            .classes
            .iter()
            .map(|class| Definition {
                name: class.name.clone(),
                qualified_name: class.qualified_name.clone(),
                kind: DefinitionKind::Class,
                top_level: class.parent_start.is_none(),
                line: class.span.start_line,
            })
            .collect();
        defs.extend(self.functions.iter().map(|function| Definition {
            name: function.name.clone(),
            qualified_name: function.qualified_name.clone(),
            kind: DefinitionKind::Function,
            top_level: function.parent_start.is_none(),
            line: function.span.start_line,
        }));
        defs
    }
}

/// Uniform extraction contract implemented once per language.
pub trait LanguageExtractor: Send + Sync {
    fn language(&self) -> Language;

    fn extract_functions(&self, root: Node, source: &str) -> Vec<FunctionDef>;

    fn extract_classes(&self, root: Node, source: &str) -> Vec<ClassDef>;

    fn extract_imports(&self, root: Node, source: &str) -> Vec<ImportDef>;

    fn extract_calls(&self, root: Node, source: &str) -> Vec<CallSite>;

    fn extract_variables(&self, root: Node, source: &str) -> Vec<VariableDef>;

    /// Cyclomatic complexity of a function node: one plus its decision points.
    fn complexity(&self, node: Node, source: &str) -> u32;

    /// Docstring or doc comment attached to a definition node.
    fn docstring(&self, node: Node, source: &str) -> Option<String>;

    /// Lightweight pass listing the definitions other files can reference.
    /// Skips bodies, calls and complexity.
    fn extract_definitions(&self, root: Node, source: &str) -> Vec<Definition>;

    /// Run every extraction over a parsed file.
    fn extract(&self, parsed: &ParsedFile) -> FileExtraction {
        let root = parsed.root_node();
        let source = parsed.source.as_str();
        FileExtraction {
            language: self.language(),
            functions: self.extract_functions(root, source),
            classes: self.extract_classes(root, source),
            imports: self.extract_imports(root, source),
            calls: self.extract_calls(root, source),
            variables: self.extract_variables(root, source),
            parse_errors: syntax_issues(root),
        }
    }
}

/// Summarize ERROR and MISSING nodes into at most one issue per file.
pub fn syntax_issues(root: Node) -> Vec<ParseIssue> {
    if !root.has_error() {
        return Vec::new();
    }

    let mut first: Option<Node> = None;
    let mut count = 0usize;
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            count += 1;
            if first.is_none_or(|f| node.start_byte() < f.start_byte()) {
                first = Some(node);
            }
            continue;
        }
        if node.has_error() {
            stack.extend(node.children(&mut cursor));
        }
    }

    let Some(node) = first else {
        return vec![ParseIssue {
            line: 1,
            column: 1,
            message: "syntax error".to_string(),
        }];
    };
    let position = node.start_position();
    let what = if node.is_missing() {
        format!("missing `{}`", node.kind())
    } else {
        "unexpected input".to_string()
    };
    let message = if count > 1 {
        format!("{what} ({count} syntax errors in file)")
    } else {
        what
    };
    vec![ParseIssue {
        line: position.row + 1,
        column: position.column + 1,
        message,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn test_span_line_count() {
        let span = Span {
            start_byte: 0,
            end_byte: 10,
            start_line: 3,
            end_line: 5,
        };
        assert_eq!(span.line_count(), 3);
    }

    #[test]
    fn test_import_local_name() {
        let plain = ImportDef {
            module: "os.path".to_string(),
            name: None,
            alias: None,
            line: 1,
        };
        assert_eq!(plain.local_name(), "path");

        let from = ImportDef {
            module: "a".to_string(),
            name: Some("helper".to_string()),
            alias: None,
            line: 1,
        };
        assert_eq!(from.local_name(), "helper");

        let aliased = ImportDef {
            alias: Some("h".to_string()),
            ..from.clone()
        };
        assert_eq!(aliased.local_name(), "h");

        let js = ImportDef {
            module: "./lib/utils".to_string(),
            name: None,
            alias: None,
            line: 1,
        };
        assert_eq!(js.local_name(), "utils");
    }

    #[test]
    fn test_syntax_issues_clean_tree() {
        let mut parser = Parser::new();
        let parsed = parser
            .parse_source("def ok():\n    pass\n", Language::Python)
            .unwrap();
        assert!(syntax_issues(parsed.root_node()).is_empty());
    }

    #[test]
    fn test_syntax_issues_single_entry() {
        let mut parser = Parser::new();
        let parsed = parser
            .parse_source("def ok():\n    pass\n\nx = (1, 2\n", Language::Python)
            .unwrap();
        let issues = syntax_issues(parsed.root_node());
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].message.is_empty());
    }
}
