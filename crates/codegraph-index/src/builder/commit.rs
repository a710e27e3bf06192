//! Planning the mutation batch for one file.
//!
//! A plan compares the nodes and edges a file should own with what the
//! backend holds and emits only the difference. It also repairs the rest of
//! the graph around the file:
//!
//! - references from other files into deleted definitions are demoted to
//!   unresolved placeholders (or re-resolved elsewhere);
//! - placeholders naming a definition the file now provides are pointed at
//!   it;
//! - INHERITS edges that would close a cycle are rejected;
//! - Module and placeholder nodes left without references are collected.
//!
//! Planning only reads from the backend. The caller applies the batch.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

use serde_json::json;
use tracing::{debug, warn};

use super::BuildStats;
use crate::edges::{CallSiteRecord, Edge, EdgeKey, EdgeKind, EdgeStatus, ImportedName};
use crate::extract::{DefinitionKind, FileExtraction, ImportDef};
use crate::parser::Language;
use crate::prescan::SymbolIndex;
use crate::resolve::{LocalSymbol, Reference, ResolveContext, Target};
use crate::store::{GraphBackend, MutationBatch, Result};
use crate::symbols::{
    KeyAllocator, Node, NodeLabel, RefKind, SCHEMA_VERSION, class_key, file_key, file_of_key,
    function_key, module_key, unresolved_key, variable_key,
};

/// A freshly extracted file to commit.
pub struct FileInput<'a> {
    pub path: &'a str,
    pub repo_key: &'a str,
    pub hash: &'a str,
    pub is_dependency: bool,
    pub extraction: &'a FileExtraction,
}

/// The batch for one file plus what it will change.
#[derive(Debug, Default)]
pub struct CommitPlan {
    pub batch: MutationBatch,
    pub stats: BuildStats,
    /// Rejected INHERITS edges, as readable messages.
    pub violations: Vec<String>,
}

/// Plan the batch that makes the graph reflect `input`.
///
/// `symbols` must already hold the file's new definitions.
pub fn plan_file(
    backend: &dyn GraphBackend,
    symbols: &SymbolIndex,
    input: &FileInput,
) -> Result<CommitPlan> {
    let mut planner = Planner::load(backend, symbols, input.repo_key, input.path)?;
    let desired = Desired::build(input);
    planner.new_nodes = desired.nodes.keys().cloned().collect();

    for node in desired.nodes.values() {
        planner.sync_node(node);
    }
    planner.delete_stale_nodes();
    for module in &desired.modules {
        planner.ensure_shared(module.clone())?;
    }

    let calls = planner.call_edges(&desired, input)?;
    let bases = planner.inherits_edges(&desired, input)?;

    // Every old edge is stale until the desired set claims it back.
    planner.delete_edges = planner.old_edges.keys().cloned().collect();
    for edge in desired.edges.values().chain(calls.values()) {
        planner.accept(edge.clone());
    }
    for edge in bases.into_values() {
        if edge.status() == Some(EdgeStatus::Resolved)
            && planner.closes_cycle(&edge.source, &edge.target)?
        {
            planner.reject(&edge);
            continue;
        }
        planner.accept(edge);
    }
    planner.count_stale_edges();

    planner.demote_incoming()?;
    planner.reresolve_placeholders(&desired)?;
    planner.collect_garbage()?;
    Ok(planner.finish())
}

/// Plan the batch that removes a file and everything it owns.
///
/// `symbols` must no longer list the file.
pub fn plan_removal(
    backend: &dyn GraphBackend,
    symbols: &SymbolIndex,
    repo_key: &str,
    path: &str,
) -> Result<CommitPlan> {
    let mut planner = Planner::load(backend, symbols, repo_key, path)?;
    planner.delete_stale_nodes();
    planner.delete_edges = planner.old_edges.keys().cloned().collect();
    planner.count_stale_edges();
    planner.demote_incoming()?;
    planner.collect_garbage()?;
    Ok(planner.finish())
}

/// Whether a key names a shared node.
fn is_shared_key(key: &str) -> bool {
    key.starts_with("module:") || key.starts_with("unresolved:")
}

/// Name a placeholder is keyed by.
fn placeholder_name(kind: EdgeKind, name: &str) -> &str {
    match kind {
        EdgeKind::Inherits => name
            .rsplit(['.', ':'])
            .find(|s| !s.is_empty())
            .unwrap_or(name),
        _ => name,
    }
}

/// The nodes and structural edges a file should own.
struct Desired {
    nodes: BTreeMap<String, Node>,
    /// CONTAINS and IMPORTS edges.
    edges: BTreeMap<EdgeKey, Edge>,
    modules: Vec<Node>,
    locals: HashMap<String, LocalSymbol>,
    /// Start byte of each function and class, to its key.
    by_start: HashMap<usize, String>,
    /// Function and class key to qualified name.
    qualified: HashMap<String, String>,
    class_keys: Vec<String>,
}

impl Desired {
    fn build(input: &FileInput) -> Self {
        let path = input.path;
        let extraction = input.extraction;
        let language = extraction.language.as_str();
        let file = file_key(path);
        let mut keys = KeyAllocator::new();
        let mut desired = Desired {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            modules: Vec::new(),
            locals: HashMap::new(),
            by_start: HashMap::new(),
            qualified: HashMap::new(),
            class_keys: Vec::new(),
        };

        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        desired.insert_node(
            Node::new(file.clone(), NodeLabel::File)
                .with("name", file_name)
                .with("path", path)
                .with("file_path", path)
                .with("language", language)
                .with("hash", input.hash)
                .with("is_dependency", input.is_dependency)
                .with("repo", input.repo_key)
                .with("imports", json!(extraction.imports))
                .with("parse_errors", json!(extraction.parse_errors))
                .with("schema_version", SCHEMA_VERSION),
        );
        desired.insert_edge(Edge::contains(input.repo_key, file.clone()));

        for class in &extraction.classes {
            let key = keys.allocate(class_key(path, &class.qualified_name));
            let top_level = class.parent_start.is_none();
            desired.register(&key, &class.qualified_name, class.span.start_byte, DefinitionKind::Class, top_level);
            desired.class_keys.push(key.clone());
            desired.insert_node(
                Node::new(key, NodeLabel::Class)
                    .with("name", class.name.as_str())
                    .with("qualified_name", class.qualified_name.as_str())
                    .with("file_path", path)
                    .with("start_line", class.span.start_line)
                    .with("end_line", class.span.end_line)
                    .with("bases", json!(class.bases))
                    .with("decorators", json!(class.decorators))
                    .with_opt("docstring", class.docstring.as_deref())
                    .with("top_level", top_level)
                    .with("is_dependency", input.is_dependency)
                    .with("language", language),
            );
        }

        let mut function_keys = Vec::with_capacity(extraction.functions.len());
        for function in &extraction.functions {
            let key = keys.allocate(function_key(path, &function.qualified_name));
            let top_level = function.parent_start.is_none();
            desired.register(&key, &function.qualified_name, function.span.start_byte, DefinitionKind::Function, top_level);
            function_keys.push(key.clone());
            desired.insert_node(
                Node::new(key, NodeLabel::Function)
                    .with("name", function.name.as_str())
                    .with("qualified_name", function.qualified_name.as_str())
                    .with("file_path", path)
                    .with("start_line", function.span.start_line)
                    .with("end_line", function.span.end_line)
                    .with("params", json!(function.params))
                    .with("decorators", json!(function.decorators))
                    .with_opt("docstring", function.docstring.as_deref())
                    .with("complexity", function.complexity)
                    .with_opt("class_name", function.class_context.as_deref())
                    .with("top_level", top_level)
                    .with("is_dependency", input.is_dependency)
                    .with("language", language),
            );
        }

        // Containment needs every key allocated first.
        for (class, key) in extraction.classes.iter().zip(desired.class_keys.clone()) {
            let parent = desired.parent_of(class.parent_start, None, &file);
            desired.insert_edge(Edge::contains(parent, key));
        }
        for (function, key) in extraction.functions.iter().zip(function_keys) {
            let parent = desired.parent_of(
                function.parent_start,
                function.class_context.as_deref(),
                &file,
            );
            desired.insert_edge(Edge::contains(parent, key));
        }

        for variable in &extraction.variables {
            let key = keys.allocate(variable_key(path, &variable.qualified_name));
            let parent = variable
                .scope
                .as_deref()
                .and_then(|scope| desired.locals.get(scope))
                .map(|symbol| symbol.key.clone())
                .unwrap_or_else(|| file.clone());
            desired.insert_node(
                Node::new(key.clone(), NodeLabel::Variable)
                    .with("name", variable.name.as_str())
                    .with("qualified_name", variable.qualified_name.as_str())
                    .with("file_path", path)
                    .with("line", variable.span.start_line)
                    .with_opt("scope", variable.scope.as_deref())
                    .with_opt("value", variable.value.as_deref()),
            );
            desired.insert_edge(Edge::contains(parent, key));
        }

        let mut imports: BTreeMap<&str, Vec<&ImportDef>> = BTreeMap::new();
        for import in extraction.imports.iter().filter(|i| !i.module.is_empty()) {
            imports.entry(import.module.as_str()).or_default().push(import);
        }
        for (module, entries) in imports {
            let names: Vec<ImportedName> = entries
                .iter()
                .map(|import| ImportedName {
                    name: import.name.clone(),
                    alias: import.alias.clone(),
                    line: import.line,
                })
                .collect();
            let key = module_key(module);
            desired.modules.push(Node::new(key.clone(), NodeLabel::Module).with("name", module));
            desired.insert_edge(Edge::imports(file.clone(), key, module, &names));
        }

        desired
    }

    fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.key.clone(), node);
    }

    fn insert_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.key(), edge);
    }

    fn register(
        &mut self,
        key: &str,
        qualified: &str,
        start_byte: usize,
        kind: DefinitionKind,
        top_level: bool,
    ) {
        self.by_start.insert(start_byte, key.to_string());
        self.qualified.insert(key.to_string(), qualified.to_string());
        self.locals
            .entry(qualified.to_string())
            .or_insert_with(|| LocalSymbol {
                key: key.to_string(),
                kind,
                top_level,
            });
    }

    /// Enclosing definition by start byte, else the enclosing class, else
    /// the file.
    fn parent_of(&self, parent_start: Option<usize>, class: Option<&str>, file: &str) -> String {
        parent_start
            .and_then(|start| self.by_start.get(&start))
            .or_else(|| {
                class
                    .and_then(|class| self.locals.get(class))
                    .filter(|symbol| symbol.kind == DefinitionKind::Class)
                    .map(|symbol| &symbol.key)
            })
            .cloned()
            .unwrap_or_else(|| file.to_string())
    }
}

/// What re-resolution needs to know about another file.
struct SourceContext {
    path: String,
    language: Language,
    imports: Vec<ImportDef>,
    locals: HashMap<String, LocalSymbol>,
    nodes: HashMap<String, Node>,
}

struct Planner<'a> {
    backend: &'a dyn GraphBackend,
    symbols: &'a SymbolIndex,
    repo_key: &'a str,
    /// Nodes the file owned before this commit, File node included.
    old_nodes: HashMap<String, Node>,
    /// Edges leaving those nodes, plus the repository's CONTAINS edge.
    old_edges: BTreeMap<EdgeKey, Edge>,
    /// Keys the file owns after this commit.
    new_nodes: HashSet<String>,
    upsert_nodes: BTreeMap<String, Node>,
    delete_nodes: BTreeSet<String>,
    delete_edges: BTreeSet<EdgeKey>,
    upsert_edges: BTreeMap<EdgeKey, Edge>,
    /// Shared nodes that may have lost their last reference.
    gc: BTreeSet<String>,
    contexts: HashMap<String, Option<Rc<SourceContext>>>,
    stats: BuildStats,
    violations: Vec<String>,
}

impl<'a> Planner<'a> {
    fn load(
        backend: &'a dyn GraphBackend,
        symbols: &'a SymbolIndex,
        repo_key: &'a str,
        path: &str,
    ) -> Result<Self> {
        let old_nodes: HashMap<String, Node> = backend
            .nodes_in_file(path)?
            .into_iter()
            .map(|node| (node.key.clone(), node))
            .collect();

        let mut old_edges = BTreeMap::new();
        for key in old_nodes.keys() {
            for edge in backend.edges_from(key, None)? {
                old_edges.insert(edge.key(), edge);
            }
        }
        for edge in backend.edges_to(&file_key(path), Some(EdgeKind::Contains))? {
            old_edges.insert(edge.key(), edge);
        }

        Ok(Self {
            backend,
            symbols,
            repo_key,
            old_nodes,
            old_edges,
            new_nodes: HashSet::new(),
            upsert_nodes: BTreeMap::new(),
            delete_nodes: BTreeSet::new(),
            delete_edges: BTreeSet::new(),
            upsert_edges: BTreeMap::new(),
            gc: BTreeSet::new(),
            contexts: HashMap::new(),
            stats: BuildStats::default(),
            violations: Vec::new(),
        })
    }

    fn owned(&self, key: &str) -> bool {
        self.old_nodes.contains_key(key) || self.new_nodes.contains(key)
    }

    /// Whether a node exists once the pending batch is applied.
    fn exists(&self, key: &str) -> Result<bool> {
        if self.delete_nodes.contains(key) {
            return Ok(false);
        }
        if self.new_nodes.contains(key) || self.upsert_nodes.contains_key(key) {
            return Ok(true);
        }
        self.backend.has_node(key)
    }

    fn sync_node(&mut self, node: &Node) {
        match self.old_nodes.get(&node.key) {
            Some(old) if old == node => {}
            Some(_) => {
                self.stats.nodes_updated += 1;
                self.upsert_nodes.insert(node.key.clone(), node.clone());
            }
            None => {
                self.stats.nodes_added += 1;
                self.upsert_nodes.insert(node.key.clone(), node.clone());
            }
        }
    }

    fn delete_stale_nodes(&mut self) {
        let stale: Vec<String> = self
            .old_nodes
            .keys()
            .filter(|key| !self.new_nodes.contains(*key))
            .cloned()
            .collect();
        self.stats.nodes_removed += stale.len();
        self.delete_nodes.extend(stale);
    }

    /// Upsert a Module or placeholder node unless it is already stored.
    fn ensure_shared(&mut self, node: Node) -> Result<()> {
        if self.upsert_nodes.contains_key(&node.key) {
            return Ok(());
        }
        if !self.backend.has_node(&node.key)? {
            self.stats.nodes_added += 1;
            self.upsert_nodes.insert(node.key.clone(), node);
        }
        Ok(())
    }

    /// Key of the placeholder for an unresolved reference, created if needed.
    fn placeholder(&mut self, kind: EdgeKind, name: &str) -> Result<String> {
        let ref_kind = match kind {
            EdgeKind::Inherits => RefKind::Class,
            _ => RefKind::Call,
        };
        let name = placeholder_name(kind, name);
        let key = unresolved_key(ref_kind, name);
        self.ensure_shared(
            Node::new(key.clone(), NodeLabel::Unresolved)
                .with("name", name)
                .with("ref_kind", ref_kind.as_str()),
        )?;
        Ok(key)
    }

    /// Resolve a target found by the resolver to an edge endpoint.
    fn endpoint(&mut self, found: Option<Target>, kind: EdgeKind, name: &str) -> Result<(String, EdgeStatus)> {
        if let Some(target) = found {
            if self.exists(&target.key)? {
                return Ok((target.key, EdgeStatus::Resolved));
            }
        }
        Ok((self.placeholder(kind, name)?, EdgeStatus::Unresolved))
    }

    fn call_edges(&mut self, desired: &Desired, input: &FileInput) -> Result<BTreeMap<EdgeKey, Edge>> {
        let extraction = input.extraction;
        let file = file_key(input.path);
        let resolver = ResolveContext::new(
            input.path,
            extraction.language,
            &extraction.imports,
            &desired.locals,
            self.symbols,
        );

        let mut grouped: BTreeMap<EdgeKey, (String, EdgeStatus, Vec<CallSiteRecord>)> = BTreeMap::new();
        for call in &extraction.calls {
            let caller = call
                .caller_start
                .and_then(|start| desired.by_start.get(&start))
                .cloned()
                .unwrap_or_else(|| file.clone());
            let reference = Reference {
                name: &call.name,
                receiver: call.receiver.as_deref(),
                class_context: call.class_context.as_deref(),
                caller: desired.qualified.get(&caller).map(String::as_str),
            };
            let found = resolver.resolve_call(&reference).map(|(target, _)| target);
            let (target, status) = self.endpoint(found, EdgeKind::Calls, &call.name)?;
            let site = CallSiteRecord {
                line: call.line(),
                full_name: call.full_name.clone(),
                receiver: call.receiver.clone(),
                args: call.args.clone(),
            };
            grouped
                .entry(EdgeKey::new(caller, EdgeKind::Calls, target))
                .or_insert_with(|| (call.name.clone(), status, Vec::new()))
                .2
                .push(site);
        }

        Ok(grouped
            .into_iter()
            .map(|(key, (name, status, sites))| {
                let edge = Edge::calls(key.source.clone(), key.target.clone(), &name, status, &sites);
                (key, edge)
            })
            .collect())
    }

    fn inherits_edges(&mut self, desired: &Desired, input: &FileInput) -> Result<BTreeMap<EdgeKey, Edge>> {
        let extraction = input.extraction;
        let resolver = ResolveContext::new(
            input.path,
            extraction.language,
            &extraction.imports,
            &desired.locals,
            self.symbols,
        );

        let mut edges = BTreeMap::new();
        for (class, key) in extraction.classes.iter().zip(&desired.class_keys) {
            for base in &class.bases {
                let found = resolver.resolve_base(base).map(|(target, _)| target);
                let (target, status) = self.endpoint(found, EdgeKind::Inherits, base)?;
                let edge = Edge::inherits(key.clone(), target, base, status);
                edges.entry(edge.key()).or_insert(edge);
            }
        }
        Ok(edges)
    }

    /// Keep a desired owned edge, upserting it only if it changed.
    fn accept(&mut self, edge: Edge) {
        let key = edge.key();
        self.delete_edges.remove(&key);
        match self.old_edges.get(&key) {
            Some(old) if *old == edge => {}
            Some(_) => {
                self.stats.edges_updated += 1;
                self.upsert_edges.insert(key, edge);
            }
            None => {
                self.stats.edges_added += 1;
                self.upsert_edges.insert(key, edge);
            }
        }
    }

    fn reject(&mut self, edge: &Edge) {
        let message = format!(
            "INHERITS {} -> {} would create an inheritance cycle",
            edge.source, edge.target
        );
        warn!(source = %edge.source, target = %edge.target, "Rejected cyclic INHERITS edge");
        self.stats.violations += 1;
        self.violations.push(message);
    }

    /// Count old owned edges nothing claimed back and queue their shared
    /// targets for collection.
    fn count_stale_edges(&mut self) {
        self.stats.edges_removed += self.delete_edges.len();
        let shared: Vec<String> = self
            .delete_edges
            .iter()
            .filter(|key| is_shared_key(&key.target))
            .map(|key| key.target.clone())
            .collect();
        self.gc.extend(shared);
    }

    /// Bases of a class once the pending batch is applied.
    fn bases_of(&self, key: &str) -> Result<Vec<String>> {
        let mut bases = Vec::new();
        if !self.delete_nodes.contains(key) {
            for edge in self.backend.edges_from(key, Some(EdgeKind::Inherits))? {
                let edge_key = edge.key();
                if !self.delete_edges.contains(&edge_key) && !self.upsert_edges.contains_key(&edge_key) {
                    bases.push(edge.target);
                }
            }
        }
        bases.extend(
            self.upsert_edges
                .values()
                .filter(|edge| edge.kind == EdgeKind::Inherits && edge.source == key)
                .map(|edge| edge.target.clone()),
        );
        Ok(bases)
    }

    /// Whether adding `child -> base` would make `child` its own ancestor.
    fn closes_cycle(&self, child: &str, base: &str) -> Result<bool> {
        let mut stack = vec![base.to_string()];
        let mut seen = HashSet::new();
        while let Some(key) = stack.pop() {
            if key == child {
                return Ok(true);
            }
            if seen.insert(key.clone()) {
                stack.extend(self.bases_of(&key)?);
            }
        }
        Ok(false)
    }

    /// The edge with this key once the pending batch is applied.
    fn current_edge(&self, key: &EdgeKey) -> Result<Option<Edge>> {
        if let Some(edge) = self.upsert_edges.get(key) {
            return Ok(Some(edge.clone()));
        }
        if self.delete_edges.contains(key)
            || self.delete_nodes.contains(&key.source)
            || self.delete_nodes.contains(&key.target)
        {
            return Ok(None);
        }
        Ok(self
            .backend
            .edges_from(&key.source, Some(key.kind))?
            .into_iter()
            .find(|edge| edge.target == key.target))
    }

    fn remove_edge(&mut self, key: EdgeKey) {
        self.upsert_edges.remove(&key);
        if self.delete_edges.insert(key) {
            self.stats.edges_removed += 1;
        }
    }

    /// Upsert a cross-file edge, folding call sites into an existing edge
    /// between the same pair.
    fn merge_edge(&mut self, mut edge: Edge) -> Result<()> {
        let key = edge.key();
        match self.current_edge(&key)? {
            Some(existing) if edge.kind == EdgeKind::Calls => {
                let mut sites = existing.call_sites();
                for site in edge.call_sites() {
                    if !sites.contains(&site) {
                        sites.push(site);
                    }
                }
                sites.sort_by_key(|site| site.line);
                edge.props.insert("line".to_string(), json!(sites.first().map(|s| s.line).unwrap_or(0)));
                edge.props.insert("call_sites".to_string(), json!(sites));
            }
            Some(_) => {}
            None => self.stats.edges_added += 1,
        }
        self.delete_edges.remove(&key);
        self.upsert_edges.insert(key, edge);
        Ok(())
    }

    /// Point a foreign reference edge at `target`, or at a placeholder.
    ///
    /// An INHERITS edge whose new target would close a cycle is dropped and
    /// recorded as a violation, the same as in the owning file's commit.
    fn redirect(&mut self, edge: &Edge, target: Option<Target>) -> Result<()> {
        let replacement = match target {
            Some(target) => {
                let replacement = edge.retarget(target.key, EdgeStatus::Resolved);
                if edge.kind == EdgeKind::Inherits && self.closes_cycle(&edge.source, &replacement.target)? {
                    self.reject(&replacement);
                    return Ok(());
                }
                replacement
            }
            None => {
                let name = edge.reference_name().unwrap_or_default().to_string();
                let placeholder = self.placeholder(edge.kind, &name)?;
                edge.retarget(placeholder, EdgeStatus::Unresolved)
            }
        };
        self.merge_edge(replacement)
    }

    /// Re-point references from other files at deleted nodes.
    fn demote_incoming(&mut self) -> Result<()> {
        let deleted: Vec<String> = self.delete_nodes.iter().cloned().collect();
        for key in deleted {
            for edge in self.backend.edges_to(&key, None)? {
                if self.owned(&edge.source) || !edge.kind.is_reference() {
                    continue;
                }
                self.remove_edge(edge.key());
                let target = self.reresolve(&edge)?;
                debug!(
                    source = %edge.source,
                    old_target = %key,
                    reresolved = target.is_some(),
                    "Reference target deleted"
                );
                self.redirect(&edge, target)?;
            }
        }
        Ok(())
    }

    /// Give placeholders matching a name this file defines another try.
    fn reresolve_placeholders(&mut self, desired: &Desired) -> Result<()> {
        let mut placeholders = BTreeSet::new();
        for node in desired.nodes.values() {
            let Some(name) = node.name() else { continue };
            match node.label {
                NodeLabel::Function => {
                    placeholders.insert(unresolved_key(RefKind::Call, name));
                }
                NodeLabel::Class => {
                    placeholders.insert(unresolved_key(RefKind::Call, name));
                    placeholders.insert(unresolved_key(RefKind::Class, name));
                }
                _ => {}
            }
        }

        for placeholder in placeholders {
            if !self.backend.has_node(&placeholder)? {
                continue;
            }
            for edge in self.backend.edges_to(&placeholder, None)? {
                if self.owned(&edge.source) || self.delete_edges.contains(&edge.key()) {
                    continue;
                }
                let Some(target) = self.reresolve(&edge)? else {
                    continue;
                };
                debug!(source = %edge.source, target = %target.key, "Resolved forward reference");
                self.remove_edge(edge.key());
                self.redirect(&edge, Some(target))?;
                self.gc.insert(placeholder.clone());
            }
        }
        Ok(())
    }

    fn source_context(&mut self, path: &str) -> Result<Option<Rc<SourceContext>>> {
        if let Some(context) = self.contexts.get(path) {
            return Ok(context.clone());
        }
        let context = self.load_context(path)?.map(Rc::new);
        self.contexts.insert(path.to_string(), context.clone());
        Ok(context)
    }

    fn load_context(&self, path: &str) -> Result<Option<SourceContext>> {
        let nodes = self.backend.nodes_in_file(path)?;
        let Some(file) = nodes.iter().find(|node| node.label == NodeLabel::File) else {
            return Ok(None);
        };
        // Placeholders are shared across repositories; only repair our own.
        if file.prop_str("repo") != Some(self.repo_key) {
            return Ok(None);
        }
        let Some(language) = file.prop_str("language").and_then(Language::from_tag) else {
            return Ok(None);
        };
        let imports: Vec<ImportDef> = match file.prop("imports") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };

        let mut locals = HashMap::new();
        for node in &nodes {
            let kind = match node.label {
                NodeLabel::Function => DefinitionKind::Function,
                NodeLabel::Class => DefinitionKind::Class,
                _ => continue,
            };
            let Some(qualified) = node.prop_str("qualified_name") else {
                continue;
            };
            locals.entry(qualified.to_string()).or_insert_with(|| LocalSymbol {
                key: node.key.clone(),
                kind,
                top_level: node.prop("top_level").and_then(|v| v.as_bool()).unwrap_or(true),
            });
        }

        Ok(Some(SourceContext {
            path: path.to_string(),
            language,
            imports,
            locals,
            nodes: nodes.into_iter().map(|node| (node.key.clone(), node)).collect(),
        }))
    }

    /// Resolve a stored reference edge again from its source file.
    fn reresolve(&mut self, edge: &Edge) -> Result<Option<Target>> {
        let Some(path) = file_of_key(&edge.source) else {
            return Ok(None);
        };
        let Some(context) = self.source_context(path)? else {
            return Ok(None);
        };
        let Some(name) = edge.reference_name() else {
            return Ok(None);
        };

        let resolver = ResolveContext::new(
            &context.path,
            context.language,
            &context.imports,
            &context.locals,
            self.symbols,
        );
        let found = match edge.kind {
            EdgeKind::Calls => {
                let caller = context
                    .nodes
                    .get(&edge.source)
                    .filter(|node| node.label == NodeLabel::Function);
                let receiver = edge.call_sites().into_iter().find_map(|site| site.receiver);
                let reference = Reference {
                    name,
                    receiver: receiver.as_deref(),
                    class_context: caller.and_then(|node| node.prop_str("class_name")),
                    caller: caller.and_then(|node| node.prop_str("qualified_name")),
                };
                resolver.resolve_call(&reference)
            }
            EdgeKind::Inherits => resolver.resolve_base(name),
            _ => None,
        };

        match found {
            Some((target, _)) if target.key != edge.source && self.exists(&target.key)? => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Delete shared nodes no edge points at once the batch is applied.
    fn collect_garbage(&mut self) -> Result<()> {
        let candidates = std::mem::take(&mut self.gc);
        for key in candidates {
            if self.upsert_edges.values().any(|edge| edge.target == key) {
                continue;
            }
            let referenced = self.backend.edges_to(&key, None)?.iter().any(|edge| {
                !self.delete_edges.contains(&edge.key()) && !self.delete_nodes.contains(&edge.source)
            });
            if referenced {
                continue;
            }
            if self.upsert_nodes.remove(&key).is_some() {
                self.stats.nodes_added = self.stats.nodes_added.saturating_sub(1);
            } else if self.backend.has_node(&key)? && self.delete_nodes.insert(key.clone()) {
                debug!(key = %key, "Collecting unreferenced node");
                self.stats.nodes_removed += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> CommitPlan {
        CommitPlan {
            batch: MutationBatch {
                upsert_nodes: self.upsert_nodes.into_values().collect(),
                delete_edges: self.delete_edges.into_iter().collect(),
                upsert_edges: self.upsert_edges.into_values().collect(),
                delete_nodes: self.delete_nodes.into_iter().collect(),
            },
            stats: self.stats,
            violations: self.violations,
        }
    }
}
