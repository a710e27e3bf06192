//! Python extraction using tree-sitter.
//!
//! Extracts functions (including lambdas bound to names), classes, imports,
//! call sites and assignments, tracking the enclosing class/function so
//! every definition gets a dotted qualified name.

use tree_sitter::Node;

use super::{
    Scope, class_context, count_decisions, enclosing_function, field_text, named_children,
    node_text, qualify, short_value, strip_quotes,
};
use crate::extract::{
    CallSite, ClassDef, Definition, DefinitionKind, FunctionDef, ImportDef, LanguageExtractor,
    Span, VariableDef,
};
use crate::parser::Language;

/// Node kinds that add a path through a function.
const DECISION_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "for_statement",
    "while_statement",
    "except_clause",
    "with_statement",
    "boolean_operator",
    "conditional_expression",
    "list_comprehension",
    "dictionary_comprehension",
    "set_comprehension",
    "generator_expression",
    "case_clause",
];

/// Python-specific extractor.
pub struct PythonExtractor;

impl PythonExtractor {
    /// Depth-first walk that maintains the class/function scope stack.
    fn walk<'t>(
        node: Node<'t>,
        source: &str,
        scope: &mut Vec<Scope>,
        visit: &mut dyn FnMut(Node<'t>, &[Scope]),
    ) {
        visit(node, scope);

        let mut pushed = false;
        if matches!(node.kind(), "function_definition" | "class_definition") {
            if let Some(name) = node.child_by_field_name("name") {
                let frame = Scope::new(
                    scope,
                    node_text(&name, source),
                    node.kind() == "class_definition",
                    node.start_byte(),
                );
                scope.push(frame);
                pushed = true;
            }
        }

        for child in named_children(&node) {
            Self::walk(child, source, scope, visit);
        }

        if pushed {
            scope.pop();
        }
    }

    /// Decorators attached through an enclosing `decorated_definition`.
    fn decorators(node: &Node, source: &str) -> Vec<String> {
        let Some(parent) = node.parent() else {
            return Vec::new();
        };
        if parent.kind() != "decorated_definition" {
            return Vec::new();
        }
        named_children(&parent)
            .into_iter()
            .filter(|child| child.kind() == "decorator")
            .map(|child| {
                node_text(&child, source)
                    .trim_start_matches('@')
                    .trim()
                    .to_string()
            })
            .collect()
    }

    /// Parameter names from a `parameters` or `lambda_parameters` node.
    fn parameters(params: Option<Node>, source: &str) -> Vec<String> {
        let Some(params) = params else {
            return Vec::new();
        };
        named_children(&params)
            .into_iter()
            .filter_map(|param| match param.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    Some(node_text(&param, source).to_string())
                }
                "typed_parameter" => param
                    .named_child(0)
                    .map(|name| node_text(&name, source).to_string()),
                "default_parameter" | "typed_default_parameter" => field_text(&param, "name", source),
                _ => None,
            })
            .collect()
    }

    fn is_async(node: &Node) -> bool {
        node.child(0).is_some_and(|first| first.kind() == "async")
    }

    fn is_lambda_assignment(node: &Node) -> bool {
        node.kind() == "assignment"
            && node
                .child_by_field_name("left")
                .is_some_and(|left| left.kind() == "identifier")
            && node
                .child_by_field_name("right")
                .is_some_and(|right| right.kind() == "lambda")
    }

    fn function_def(&self, node: Node, source: &str, scope: &[Scope]) -> Option<FunctionDef> {
        let name = field_text(&node, "name", source)?;
        let mut decorators = Self::decorators(&node, source);
        if Self::is_async(&node) {
            decorators.push("async".to_string());
        }
        Some(FunctionDef {
            qualified_name: qualify(scope, &name),
            name,
            span: Span::of(node),
            params: Self::parameters(node.child_by_field_name("parameters"), source),
            decorators,
            docstring: self.docstring(node, source),
            complexity: self.complexity(node, source),
            class_context: class_context(scope),
            parent_start: scope.last().map(|s| s.start_byte),
        })
    }

    fn lambda_def(&self, node: Node, source: &str, scope: &[Scope]) -> Option<FunctionDef> {
        let name = field_text(&node, "left", source)?;
        let lambda = node.child_by_field_name("right")?;
        Some(FunctionDef {
            qualified_name: qualify(scope, &name),
            name,
            span: Span::of(node),
            params: Self::parameters(lambda.child_by_field_name("parameters"), source),
            decorators: vec!["lambda".to_string()],
            docstring: None,
            complexity: self.complexity(lambda, source),
            class_context: class_context(scope),
            parent_start: scope.last().map(|s| s.start_byte),
        })
    }

    /// Left-hand identifiers of an assignment, including tuple unpacking.
    fn assigned_names(left: Node, source: &str) -> Vec<String> {
        match left.kind() {
            "identifier" => vec![node_text(&left, source).to_string()],
            "pattern_list" | "tuple_pattern" | "list_pattern" => named_children(&left)
                .into_iter()
                .filter(|n| n.kind() == "identifier")
                .map(|n| node_text(&n, source).to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Base class names as written, skipping keyword arguments and `object`.
    fn bases(node: &Node, source: &str) -> Vec<String> {
        let Some(superclasses) = node.child_by_field_name("superclasses") else {
            return Vec::new();
        };
        named_children(&superclasses)
            .into_iter()
            .filter(|base| matches!(base.kind(), "identifier" | "attribute"))
            .map(|base| node_text(&base, source).to_string())
            .filter(|base| base != "object")
            .collect()
    }
}

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extract_functions(&self, root: Node, source: &str) -> Vec<FunctionDef> {
        let mut functions = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            let function = match node.kind() {
                "function_definition" => self.function_def(node, source, scope),
                "assignment" if Self::is_lambda_assignment(&node) => {
                    self.lambda_def(node, source, scope)
                }
                _ => None,
            };
            functions.extend(function);
        });
        functions
    }

    fn extract_classes(&self, root: Node, source: &str) -> Vec<ClassDef> {
        let mut classes = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            if node.kind() != "class_definition" {
                return;
            }
            if let Some(name) = field_text(&node, "name", source) {
                classes.push(ClassDef {
                    qualified_name: qualify(scope, &name),
                    name,
                    span: Span::of(node),
                    bases: Self::bases(&node, source),
                    decorators: Self::decorators(&node, source),
                    docstring: self.docstring(node, source),
                    parent_start: scope.last().map(|s| s.start_byte),
                });
            }
        });
        classes
    }

    fn extract_imports(&self, root: Node, source: &str) -> Vec<ImportDef> {
        let mut imports = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, _| {
            let line = node.start_position().row + 1;
            let mut cursor = node.walk();
            match node.kind() {
                // import x, import x as y
                "import_statement" => {
                    for name in node.children_by_field_name("name", &mut cursor) {
                        let (module, alias) = match name.kind() {
                            "aliased_import" => (
                                field_text(&name, "name", source),
                                field_text(&name, "alias", source),
                            ),
                            _ => (Some(node_text(&name, source).to_string()), None),
                        };
                        if let Some(module) = module {
                            imports.push(ImportDef {
                                module,
                                name: None,
                                alias,
                                line,
                            });
                        }
                    }
                }
                // from x import y, from x import y as z, from . import y, from x import *
                "import_from_statement" => {
                    let Some(module) = field_text(&node, "module_name", source) else {
                        return;
                    };
                    let names: Vec<Node> =
                        node.children_by_field_name("name", &mut cursor).collect();
                    for name in names {
                        let (imported, alias) = match name.kind() {
                            "aliased_import" => (
                                field_text(&name, "name", source),
                                field_text(&name, "alias", source),
                            ),
                            _ => (Some(node_text(&name, source).to_string()), None),
                        };
                        imports.push(ImportDef {
                            module: module.clone(),
                            name: imported,
                            alias,
                            line,
                        });
                    }
                    if named_children(&node)
                        .iter()
                        .any(|child| child.kind() == "wildcard_import")
                    {
                        imports.push(ImportDef {
                            module,
                            name: Some("*".to_string()),
                            alias: None,
                            line,
                        });
                    }
                }
                _ => {}
            }
        });
        imports
    }

    fn extract_calls(&self, root: Node, source: &str) -> Vec<CallSite> {
        let mut calls = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            if node.kind() != "call" {
                return;
            }
            let Some(function) = node.child_by_field_name("function") else {
                return;
            };
            let (name, receiver) = match function.kind() {
                "identifier" => (node_text(&function, source).to_string(), None),
                "attribute" => match field_text(&function, "attribute", source) {
                    Some(attribute) => (attribute, field_text(&function, "object", source)),
                    None => return,
                },
                _ => return,
            };
            let args = node
                .child_by_field_name("arguments")
                .map(|args| {
                    named_children(&args)
                        .into_iter()
                        .filter(|arg| arg.kind() != "comment")
                        .map(|arg| node_text(&arg, source).to_string())
                        .collect()
                })
                .unwrap_or_default();
            calls.push(CallSite {
                name,
                full_name: node_text(&function, source).to_string(),
                receiver,
                args,
                span: Span::of(node),
                caller_start: enclosing_function(scope).map(|s| s.start_byte),
                class_context: class_context(scope),
            });
        });
        calls
    }

    fn extract_variables(&self, root: Node, source: &str) -> Vec<VariableDef> {
        let mut variables = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            if node.kind() != "assignment" || Self::is_lambda_assignment(&node) {
                return;
            }
            let Some(left) = node.child_by_field_name("left") else {
                return;
            };
            let value = node
                .child_by_field_name("right")
                .map(|right| short_value(node_text(&right, source)));
            for name in Self::assigned_names(left, source) {
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

    fn complexity(&self, node: Node, _source: &str) -> u32 {
        1 + count_decisions(
            node,
            |n| DECISION_KINDS.contains(&n.kind()),
            |n| matches!(n.kind(), "function_definition" | "class_definition"),
        )
    }

    /// First string statement of the body.
    fn docstring(&self, node: Node, source: &str) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }
        let text = node_text(&string, source)
            .trim_start_matches(['r', 'R', 'u', 'U', 'b', 'B', 'f', 'F']);
        let doc = strip_quotes(text).trim().to_string();
        (!doc.is_empty()).then_some(doc)
    }

    fn extract_definitions(&self, root: Node, source: &str) -> Vec<Definition> {
        let mut defs = Vec::new();
        collect_definitions(root, source, &mut Vec::new(), &mut defs);
        defs
    }
}

/// Module-level definitions and members of module-level classes. Does not
/// descend into function bodies.
fn collect_definitions(node: Node, source: &str, scope: &mut Vec<Scope>, defs: &mut Vec<Definition>) {
    for child in named_children(&node) {
        match child.kind() {
            "function_definition" => {
                if let Some(name) = field_text(&child, "name", source) {
                    defs.push(Definition {
                        qualified_name: qualify(scope, &name),
                        name,
                        kind: DefinitionKind::Function,
                        top_level: scope.is_empty(),
                        line: child.start_position().row + 1,
                    });
                }
            }
            "class_definition" => {
                let Some(name) = field_text(&child, "name", source) else {
                    continue;
                };
                defs.push(Definition {
                    qualified_name: qualify(scope, &name),
                    name: name.clone(),
                    kind: DefinitionKind::Class,
                    top_level: scope.is_empty(),
                    line: child.start_position().row + 1,
                });
                if scope.is_empty() {
                    if let Some(body) = child.child_by_field_name("body") {
                        scope.push(Scope::new(scope, &name, true, child.start_byte()));
                        collect_definitions(body, source, scope, defs);
                        scope.pop();
                    }
                }
            }
            "expression_statement" if scope.is_empty() => {
                for assignment in named_children(&child) {
                    if PythonExtractor::is_lambda_assignment(&assignment) {
                        if let Some(name) = field_text(&assignment, "left", source) {
                            defs.push(Definition {
                                qualified_name: name.clone(),
                                name,
                                kind: DefinitionKind::Function,
                                top_level: true,
                                line: assignment.start_position().row + 1,
                            });
                        }
                    }
                }
            }
            // Compound statements at module level (if/try/with) may hold definitions.
            "decorated_definition" | "if_statement" | "else_clause" | "elif_clause"
            | "try_statement" | "except_clause" | "finally_clause" | "with_statement"
            | "block" => {
                collect_definitions(child, source, scope, defs);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn extract(source: &str) -> crate::extract::FileExtraction {
        let mut parser = Parser::new();
        let parsed = parser.parse_source(source, Language::Python).unwrap();
        PythonExtractor.extract(&parsed)
    }

    #[test]
    fn test_extract_class() {
        let source = r#"
class MyClass(Base, mod.Mixin, object, metaclass=Meta):
    """A simple class."""

    def __init__(self, value):
        self.value = value

    def get_value(self):
        return self.value
"#;
        let extraction = extract(source);

        assert_eq!(extraction.classes.len(), 1);
        let class = &extraction.classes[0];
        assert_eq!(class.name, "MyClass");
        assert_eq!(class.bases, vec!["Base", "mod.Mixin"]);
        assert!(
            class
                .docstring
                .as_ref()
                .is_some_and(|d| d.contains("simple class"))
        );

        let methods: Vec<_> = extraction
            .functions
            .iter()
            .map(|f| f.qualified_name.as_str())
            .collect();
        assert_eq!(methods, vec!["MyClass.__init__", "MyClass.get_value"]);
        assert!(
            extraction
                .functions
                .iter()
                .all(|f| f.class_context.as_deref() == Some("MyClass"))
        );
    }

    #[test]
    fn test_extract_function_details() {
        let source = r#"
@cache
@app.route("/x")
async def greet(name: str, greeting="hi", *args, flag: bool = False, **kwargs) -> str:
    """Return a greeting message."""
    if name and greeting:
        return f"{greeting}, {name}!"
    for _ in args:
        pass
    return ""
"#;
        let extraction = extract(source);
        let greet = &extraction.functions[0];

        assert_eq!(greet.name, "greet");
        assert_eq!(
            greet.params,
            vec!["name", "greeting", "*args", "flag", "**kwargs"]
        );
        assert_eq!(greet.decorators, vec!["cache", "app.route(\"/x\")", "async"]);
        assert_eq!(greet.docstring.as_deref(), Some("Return a greeting message."));
        // if + and + for
        assert_eq!(greet.complexity, 4);
        assert_eq!(greet.span.start_line, 4);
        assert!(greet.parent_start.is_none());
    }

    #[test]
    fn test_nested_function_complexity_is_separate() {
        let source = r#"
def outer(x):
    def inner(y):
        if y:
            return 1
        return 2
    return inner(x)
"#;
        let extraction = extract(source);
        let outer = extraction.functions.iter().find(|f| f.name == "outer").unwrap();
        let inner = extraction.functions.iter().find(|f| f.name == "inner").unwrap();

        assert_eq!(outer.complexity, 1);
        assert_eq!(inner.complexity, 2);
        assert_eq!(inner.qualified_name, "outer.inner");
        assert_eq!(inner.parent_start, Some(outer.span.start_byte));
    }

    #[test]
    fn test_lambda_assignment_is_function() {
        let extraction = extract("square = lambda x: x * x\ncount = 3\n");

        assert_eq!(extraction.functions.len(), 1);
        assert_eq!(extraction.functions[0].name, "square");
        assert_eq!(extraction.functions[0].params, vec!["x"]);
        assert_eq!(extraction.variables.len(), 1);
        assert_eq!(extraction.variables[0].name, "count");
        assert_eq!(extraction.variables[0].value.as_deref(), Some("3"));
    }

    #[test]
    fn test_extract_imports() {
        let source = r#"
import os
import sys as system
from typing import List, Optional
from collections import defaultdict as dd
from pathlib import *
from . import sibling
"#;
        let imports = extract(source).imports;

        assert!(imports.iter().any(|i| i.module == "os" && i.name.is_none()));
        assert!(
            imports
                .iter()
                .any(|i| i.module == "sys" && i.alias.as_deref() == Some("system"))
        );
        let typing: Vec<_> = imports.iter().filter(|i| i.module == "typing").collect();
        assert_eq!(typing.len(), 2);
        assert!(imports.iter().any(|i| i.module == "collections"
            && i.name.as_deref() == Some("defaultdict")
            && i.alias.as_deref() == Some("dd")));
        assert!(imports.iter().any(|i| i.module == "pathlib" && i.is_glob()));
        assert!(
            imports
                .iter()
                .any(|i| i.module == "." && i.name.as_deref() == Some("sibling"))
        );
    }

    #[test]
    fn test_extract_calls() {
        let source = r#"
def main():
    print("hello")
    result = calculate(1, b=2)
    obj.method()

class Runner:
    def run(self):
        self.step()

setup()
"#;
        let extraction = extract(source);
        let calls = &extraction.calls;
        let main_start = extraction.functions[0].span.start_byte;

        let calculate = calls.iter().find(|c| c.name == "calculate").unwrap();
        assert_eq!(calculate.args, vec!["1", "b=2"]);
        assert_eq!(calculate.caller_start, Some(main_start));
        assert!(calculate.receiver.is_none());

        let method = calls.iter().find(|c| c.name == "method").unwrap();
        assert_eq!(method.receiver.as_deref(), Some("obj"));
        assert_eq!(method.full_name, "obj.method");

        let step = calls.iter().find(|c| c.name == "step").unwrap();
        assert_eq!(step.receiver.as_deref(), Some("self"));
        assert_eq!(step.class_context.as_deref(), Some("Runner"));

        let setup = calls.iter().find(|c| c.name == "setup").unwrap();
        assert!(setup.caller_start.is_none());
    }

    #[test]
    fn test_variables_are_scoped() {
        let source = r#"
LIMIT = 10
a, b = 1, 2

class Config:
    debug = False

def work():
    total = 0
"#;
        let variables = extract(source).variables;
        let names: Vec<_> = variables.iter().map(|v| v.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["LIMIT", "a", "b", "Config.debug", "work.total"]);
        assert_eq!(variables[3].scope.as_deref(), Some("Config"));
    }

    #[test]
    fn test_extract_definitions_matches_full_extraction() {
        let source = r#"
def helper():
    def nested():
        pass

class Service:
    def start(self):
        pass

if True:
    def conditional():
        pass

handler = lambda event: event
"#;
        let mut parser = Parser::new();
        let parsed = parser.parse_source(source, Language::Python).unwrap();
        let defs = PythonExtractor.extract_definitions(parsed.root_node(), &parsed.source);

        let names: Vec<_> = defs
            .iter()
            .map(|d| (d.qualified_name.as_str(), d.kind, d.top_level))
            .collect();
        assert_eq!(
            names,
            vec![
                ("helper", DefinitionKind::Function, true),
                ("Service", DefinitionKind::Class, true),
                ("Service.start", DefinitionKind::Function, false),
                ("conditional", DefinitionKind::Function, true),
                ("handler", DefinitionKind::Function, true),
            ]
        );
    }

    #[test]
    fn test_trailing_syntax_error_keeps_functions() {
        let mut source = String::new();
        for i in 0..10 {
            source.push_str(&format!("def f{i}():\n    return {i}\n\n"));
        }
        source.push_str("x = (1, 2\n");

        let extraction = extract(&source);
        for i in 0..10 {
            let name = format!("f{i}");
            assert!(
                extraction.functions.iter().any(|f| f.name == name),
                "missing {name}"
            );
        }
        assert_eq!(extraction.parse_errors.len(), 1);
    }
}
