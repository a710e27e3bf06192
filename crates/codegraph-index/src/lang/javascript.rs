//! JavaScript extraction using tree-sitter.
//!
//! Functions come in several shapes: declarations, generators, methods, and
//! function or arrow expressions bound to a variable or a member assignment.
//! Imports cover ES modules and CommonJS `require()`.

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

const DECISION_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
    "switch_case",
    "catch_clause",
    "ternary_expression",
];

const LOGICAL_OPERATORS: &[&str] = &["&&", "||", "??"];

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "function",
    "arrow_function",
    "method_definition",
];

/// JavaScript-specific extractor.
pub struct JavaScriptExtractor;

impl JavaScriptExtractor {
    /// Name bound to a function or class node, if it has one.
    ///
    /// Declarations carry their own name; expressions take the name of the
    /// variable or member they are assigned to.
    fn binding_name(node: &Node, source: &str) -> Option<String> {
        match node.kind() {
            "function_declaration"
            | "generator_function_declaration"
            | "method_definition"
            | "class_declaration" => field_text(node, "name", source),
            "function_expression" | "function" | "arrow_function" | "class" => {
                let parent = node.parent()?;
                match parent.kind() {
                    "variable_declarator" => parent
                        .child_by_field_name("name")
                        .filter(|name| name.kind() == "identifier")
                        .map(|name| node_text(&name, source).to_string()),
                    "assignment_expression" => {
                        let left = parent.child_by_field_name("left")?;
                        match left.kind() {
                            "identifier" => Some(node_text(&left, source).to_string()),
                            "member_expression" => field_text(&left, "property", source),
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn is_class(node: &Node) -> bool {
        matches!(node.kind(), "class_declaration" | "class")
    }

    fn is_function(node: &Node) -> bool {
        FUNCTION_KINDS.contains(&node.kind())
    }

    /// Depth-first walk maintaining the scope stack. Only named functions
    /// and classes open a scope; anonymous callbacks belong to their parent.
    fn walk<'t>(
        node: Node<'t>,
        source: &str,
        scope: &mut Vec<Scope>,
        visit: &mut dyn FnMut(Node<'t>, &[Scope]),
    ) {
        visit(node, scope);

        let mut pushed = false;
        if Self::is_function(&node) || Self::is_class(&node) {
            if let Some(name) = Self::binding_name(&node, source) {
                let frame = Scope::new(scope, &name, Self::is_class(&node), node.start_byte());
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

    fn parameters(node: &Node, source: &str) -> Vec<String> {
        if let Some(single) = node.child_by_field_name("parameter") {
            return vec![node_text(&single, source).to_string()];
        }
        let Some(params) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        named_children(&params)
            .into_iter()
            .filter_map(|param| match param.kind() {
                "identifier" | "rest_pattern" | "object_pattern" | "array_pattern" => {
                    Some(node_text(&param, source).to_string())
                }
                "assignment_pattern" => field_text(&param, "left", source),
                _ => None,
            })
            .collect()
    }

    /// Modifier keywords and decorators of a function or method.
    fn modifiers(node: &Node, source: &str) -> Vec<String> {
        let mut modifiers = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "async" | "static" | "get" | "set" => modifiers.push(child.kind().to_string()),
                "*" => modifiers.push("generator".to_string()),
                "decorator" => modifiers.push(
                    node_text(&child, source)
                        .trim_start_matches('@')
                        .to_string(),
                ),
                _ => {}
            }
        }
        if node.kind() == "generator_function_declaration"
            && !modifiers.iter().any(|m| m == "generator")
        {
            modifiers.push("generator".to_string());
        }
        if node.kind() == "arrow_function" {
            modifiers.push("arrow".to_string());
        }
        modifiers
    }

    /// The statement a definition hangs off, for doc comment lookup.
    fn statement_of<'t>(node: Node<'t>) -> Node<'t> {
        let mut current = node;
        if matches!(node.kind(), "function_expression" | "function" | "arrow_function" | "class") {
            if let Some(parent) = node.parent() {
                if matches!(parent.kind(), "variable_declarator" | "assignment_expression") {
                    if let Some(statement) = parent.parent() {
                        current = statement;
                    }
                }
            }
        }
        if let Some(parent) = current.parent() {
            if parent.kind() == "export_statement" {
                current = parent;
            }
        }
        current
    }

    fn require_source(call: &Node, source: &str) -> Option<String> {
        if call.kind() != "call_expression" {
            return None;
        }
        let function = call.child_by_field_name("function")?;
        if node_text(&function, source) != "require" {
            return None;
        }
        let args = call.child_by_field_name("arguments")?;
        let first = args.named_child(0)?;
        (first.kind() == "string").then(|| strip_quotes(node_text(&first, source)))
    }

    fn es_import(node: &Node, source: &str, imports: &mut Vec<ImportDef>) {
        let Some(module) = node
            .child_by_field_name("source")
            .map(|s| strip_quotes(node_text(&s, source)))
        else {
            return;
        };
        let line = node.start_position().row + 1;
        let clause = named_children(node)
            .into_iter()
            .find(|child| child.kind() == "import_clause");

        let Some(clause) = clause else {
            // import './side-effect'
            imports.push(ImportDef {
                module,
                name: None,
                alias: None,
                line,
            });
            return;
        };

        for part in named_children(&clause) {
            match part.kind() {
                "identifier" => imports.push(ImportDef {
                    module: module.clone(),
                    name: Some("default".to_string()),
                    alias: Some(node_text(&part, source).to_string()),
                    line,
                }),
                "namespace_import" => {
                    let alias = named_children(&part)
                        .into_iter()
                        .rev()
                        .find(|n| n.kind() == "identifier")
                        .map(|n| node_text(&n, source).to_string());
                    imports.push(ImportDef {
                        module: module.clone(),
                        name: Some("*".to_string()),
                        alias,
                        line,
                    });
                }
                "named_imports" => {
                    for specifier in named_children(&part) {
                        if specifier.kind() != "import_specifier" {
                            continue;
                        }
                        let name = field_text(&specifier, "name", source).map(|n| strip_quotes(&n));
                        imports.push(ImportDef {
                            module: module.clone(),
                            name,
                            alias: field_text(&specifier, "alias", source),
                            line,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn require_import(node: &Node, source: &str, imports: &mut Vec<ImportDef>) {
        let Some(module) = Self::require_source(node, source) else {
            return;
        };
        let line = node.start_position().row + 1;
        let binding = node
            .parent()
            .filter(|parent| parent.kind() == "variable_declarator")
            .and_then(|declarator| declarator.child_by_field_name("name"));

        match binding {
            Some(name) if name.kind() == "object_pattern" => {
                for property in named_children(&name) {
                    let imported = match property.kind() {
                        "shorthand_property_identifier_pattern" => {
                            Some((node_text(&property, source).to_string(), None))
                        }
                        "pair_pattern" => field_text(&property, "key", source)
                            .map(|key| (key, field_text(&property, "value", source))),
                        _ => None,
                    };
                    if let Some((imported, alias)) = imported {
                        imports.push(ImportDef {
                            module: module.clone(),
                            name: Some(imported),
                            alias,
                            line,
                        });
                    }
                }
            }
            Some(name) => imports.push(ImportDef {
                module,
                name: None,
                alias: Some(node_text(&name, source).to_string()),
                line,
            }),
            None => imports.push(ImportDef {
                module,
                name: None,
                alias: None,
                line,
            }),
        }
    }

    fn bases(node: &Node, source: &str) -> Vec<String> {
        named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "class_heritage")
            .flat_map(|heritage| named_children(&heritage))
            .map(|base| node_text(&base, source).to_string())
            .collect()
    }
}

impl LanguageExtractor for JavaScriptExtractor {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn extract_functions(&self, root: Node, source: &str) -> Vec<FunctionDef> {
        let mut functions = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            if !Self::is_function(&node) {
                return;
            }
            let Some(name) = Self::binding_name(&node, source) else {
                return;
            };
            functions.push(FunctionDef {
                qualified_name: qualify(scope, &name),
                name,
                span: Span::of(node),
                params: Self::parameters(&node, source),
                decorators: Self::modifiers(&node, source),
                docstring: self.docstring(node, source),
                complexity: self.complexity(node, source),
                class_context: class_context(scope),
                parent_start: scope.last().map(|s| s.start_byte),
            });
        });
        functions
    }

    fn extract_classes(&self, root: Node, source: &str) -> Vec<ClassDef> {
        let mut classes = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            if !Self::is_class(&node) {
                return;
            }
            let Some(name) = Self::binding_name(&node, source) else {
                return;
            };
            let decorators = named_children(&node)
                .into_iter()
                .filter(|child| child.kind() == "decorator")
                .map(|child| node_text(&child, source).trim_start_matches('@').to_string())
                .collect();
            classes.push(ClassDef {
                qualified_name: qualify(scope, &name),
                name,
                span: Span::of(node),
                bases: Self::bases(&node, source),
                decorators,
                docstring: self.docstring(node, source),
                parent_start: scope.last().map(|s| s.start_byte),
            });
        });
        classes
    }

    fn extract_imports(&self, root: Node, source: &str) -> Vec<ImportDef> {
        let mut imports = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, _| match node.kind() {
            "import_statement" => Self::es_import(&node, source, &mut imports),
            "call_expression" => Self::require_import(&node, source, &mut imports),
            _ => {}
        });
        imports
    }

    fn extract_calls(&self, root: Node, source: &str) -> Vec<CallSite> {
        let mut calls = Vec::new();
        Self::walk(root, source, &mut Vec::new(), &mut |node, scope| {
            let callee = match node.kind() {
                "call_expression" => node.child_by_field_name("function"),
                "new_expression" => node.child_by_field_name("constructor"),
                _ => return,
            };
            let Some(callee) = callee else {
                return;
            };
            let (name, receiver) = match callee.kind() {
                "identifier" => (node_text(&callee, source).to_string(), None),
                "member_expression" => match field_text(&callee, "property", source) {
                    Some(property) => (property, field_text(&callee, "object", source)),
                    None => return,
                },
                _ => return,
            };
            if name == "require" && receiver.is_none() {
                return;
            }
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
                full_name: node_text(&callee, source).to_string(),
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
            if node.kind() != "variable_declarator" {
                return;
            }
            let Some(name) = node
                .child_by_field_name("name")
                .filter(|name| name.kind() == "identifier")
            else {
                return;
            };
            let value = node.child_by_field_name("value");
            if let Some(value) = value {
                if Self::is_function(&value)
                    || Self::is_class(&value)
                    || Self::require_source(&value, source).is_some()
                {
                    return;
                }
            }
            let name = node_text(&name, source).to_string();
            variables.push(VariableDef {
                qualified_name: qualify(scope, &name),
                name,
                span: Span::of(node),
                scope: scope.last().map(|s| s.qualified_name.clone()),
                value: value.map(|v| short_value(node_text(&v, source))),
            });
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
                            .is_some_and(|op| LOGICAL_OPERATORS.contains(&node_text(&op, source))))
            },
            |n| Self::is_function(n) || Self::is_class(n),
        )
    }

    /// The `/** ... */` block directly before the definition's statement.
    fn docstring(&self, node: Node, source: &str) -> Option<String> {
        let statement = Self::statement_of(node);
        let comment = statement.prev_named_sibling()?;
        if comment.kind() != "comment" {
            return None;
        }
        let text = node_text(&comment, source);
        let body = text.strip_prefix("/**")?.strip_suffix("*/")?;
        let doc = body
            .lines()
            .map(|line| line.trim().trim_start_matches('*').trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        (!doc.is_empty()).then_some(doc)
    }

    fn extract_definitions(&self, root: Node, source: &str) -> Vec<Definition> {
        let mut defs = Vec::new();
        for statement in named_children(&root) {
            collect_definitions(statement, source, &mut defs);
        }
        defs
    }
}

/// Module-level definitions of one top-level statement.
fn collect_definitions(statement: Node, source: &str, defs: &mut Vec<Definition>) {
    let line = statement.start_position().row + 1;
    match statement.kind() {
        "export_statement" => {
            for child in named_children(&statement) {
                collect_definitions(child, source, defs);
            }
        }
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = field_text(&statement, "name", source) {
                defs.push(Definition {
                    qualified_name: name.clone(),
                    name,
                    kind: DefinitionKind::Function,
                    top_level: true,
                    line,
                });
            }
        }
        "class_declaration" => {
            let Some(name) = field_text(&statement, "name", source) else {
                return;
            };
            push_class(&statement, &name, source, line, defs);
        }
        "lexical_declaration" | "variable_declaration" => {
            for declarator in named_children(&statement) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let Some(value) = declarator.child_by_field_name("value") else {
                    continue;
                };
                let Some(name) = JavaScriptExtractor::binding_name(&value, source) else {
                    continue;
                };
                if JavaScriptExtractor::is_class(&value) {
                    push_class(&value, &name, source, line, defs);
                } else if JavaScriptExtractor::is_function(&value) {
                    defs.push(Definition {
                        qualified_name: name.clone(),
                        name,
                        kind: DefinitionKind::Function,
                        top_level: true,
                        line,
                    });
                }
            }
        }
        "expression_statement" => {
            let Some(assignment) = statement.named_child(0) else {
                return;
            };
            if assignment.kind() != "assignment_expression" {
                return;
            }
            let Some(value) = assignment.child_by_field_name("right") else {
                return;
            };
            if !JavaScriptExtractor::is_function(&value) {
                return;
            }
            if let Some(name) = JavaScriptExtractor::binding_name(&value, source) {
                defs.push(Definition {
                    qualified_name: name.clone(),
                    name,
                    kind: DefinitionKind::Function,
                    top_level: true,
                    line,
                });
            }
        }
        _ => {}
    }
}

fn push_class(class: &Node, name: &str, source: &str, line: usize, defs: &mut Vec<Definition>) {
    defs.push(Definition {
        name: name.to_string(),
        qualified_name: name.to_string(),
        kind: DefinitionKind::Class,
        top_level: true,
        line,
    });
    let Some(body) = class.child_by_field_name("body") else {
        return;
    };
    for member in named_children(&body) {
        if member.kind() != "method_definition" {
            continue;
        }
        if let Some(method) = field_text(&member, "name", source) {
            defs.push(Definition {
                qualified_name: format!("{name}.{method}"),
                name: method,
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
        let parsed = parser.parse_source(source, Language::JavaScript).unwrap();
        JavaScriptExtractor.extract(&parsed)
    }

    #[test]
    fn test_function_shapes() {
        let source = r#"
function plain(a, b = 2, ...rest) { return a; }
function* gen() { yield 1; }
const arrow = (x) => x * 2;
const single = y => y;
let expr = function () {};
module.exports.exported = function (req) {};
"#;
        let extraction = extract(source);
        let names: Vec<_> = extraction.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["plain", "gen", "arrow", "single", "expr", "exported"]
        );

        let plain = &extraction.functions[0];
        assert_eq!(plain.params, vec!["a", "b", "...rest"]);
        assert!(extraction.functions[1].decorators.contains(&"generator".to_string()));
        assert!(extraction.functions[2].decorators.contains(&"arrow".to_string()));
        assert_eq!(extraction.functions[3].params, vec!["y"]);
    }

    #[test]
    fn test_class_and_methods() {
        let source = r#"
/**
 * Greets people.
 */
class Greeter extends Base {
  constructor(name) { this.name = name; }
  static create() { return new Greeter("x"); }
  greet() { return this.format(this.name); }
}
"#;
        let extraction = extract(source);
        assert_eq!(extraction.classes.len(), 1);
        let class = &extraction.classes[0];
        assert_eq!(class.name, "Greeter");
        assert_eq!(class.bases, vec!["Base"]);
        assert_eq!(class.docstring.as_deref(), Some("Greets people."));

        let methods: Vec<_> = extraction
            .functions
            .iter()
            .map(|f| f.qualified_name.as_str())
            .collect();
        assert_eq!(
            methods,
            vec!["Greeter.constructor", "Greeter.create", "Greeter.greet"]
        );
        assert!(extraction.functions[1].decorators.contains(&"static".to_string()));

        let format = extraction.calls.iter().find(|c| c.name == "format").unwrap();
        assert_eq!(format.receiver.as_deref(), Some("this"));
        assert_eq!(format.class_context.as_deref(), Some("Greeter"));
        assert_eq!(format.caller_start, Some(extraction.functions[2].span.start_byte));

        let construct = extraction.calls.iter().find(|c| c.name == "Greeter").unwrap();
        assert_eq!(construct.args, vec!["\"x\""]);
    }

    #[test]
    fn test_imports() {
        let source = r#"
import React, { useState as useS, useEffect } from 'react';
import * as utils from './utils';
import './styles.css';
const fs = require('fs');
const { join, resolve: res } = require('path');
"#;
        let imports = extract(source).imports;

        assert!(imports.iter().any(|i| i.module == "react"
            && i.name.as_deref() == Some("default")
            && i.local_name() == "React"));
        assert!(imports.iter().any(|i| i.module == "react"
            && i.name.as_deref() == Some("useState")
            && i.local_name() == "useS"));
        assert!(imports.iter().any(|i| i.module == "./utils" && i.is_glob()));
        assert!(imports.iter().any(|i| i.module == "./styles.css" && i.name.is_none()));
        assert!(
            imports
                .iter()
                .any(|i| i.module == "fs" && i.alias.as_deref() == Some("fs"))
        );
        assert!(
            imports
                .iter()
                .any(|i| i.module == "path" && i.name.as_deref() == Some("join"))
        );
        assert!(imports.iter().any(|i| i.module == "path"
            && i.name.as_deref() == Some("resolve")
            && i.alias.as_deref() == Some("res")));
    }

    #[test]
    fn test_require_is_not_a_call_or_variable() {
        let extraction = extract("const fs = require('fs');\nconst limit = 5;\nfs.readFileSync('x');\n");
        assert!(!extraction.calls.iter().any(|c| c.name == "require"));
        assert!(extraction.calls.iter().any(|c| c.name == "readFileSync"));
        let names: Vec<_> = extraction.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["limit"]);
    }

    #[test]
    fn test_complexity() {
        let source = r#"
function check(a, b) {
  if (a && b) { return 1; }
  for (const x of a) { }
  try { b(); } catch (e) { }
  return a ? 1 : 2;
}
"#;
        let extraction = extract(source);
        // if, &&, for-of, catch, ternary
        assert_eq!(extraction.functions[0].complexity, 6);
    }

    #[test]
    fn test_callbacks_belong_to_enclosing_function() {
        let source = r#"
function load(items) {
  items.forEach((item) => { process(item); });
}
"#;
        let extraction = extract(source);
        assert_eq!(extraction.functions.len(), 1);
        let process = extraction.calls.iter().find(|c| c.name == "process").unwrap();
        assert_eq!(process.caller_start, Some(extraction.functions[0].span.start_byte));
    }

    #[test]
    fn test_extract_definitions() {
        let source = r#"
export function api() {}
export class Store { save() {} }
const helper = () => 1;
exports.run = function () {};
"#;
        let mut parser = Parser::new();
        let parsed = parser.parse_source(source, Language::JavaScript).unwrap();
        let defs = JavaScriptExtractor.extract_definitions(parsed.root_node(), &parsed.source);
        let names: Vec<_> = defs.iter().map(|d| d.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["api", "Store", "Store.save", "helper", "run"]);
        assert!(!defs[2].top_level);
    }
}
