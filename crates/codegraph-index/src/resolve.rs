//! Cross-file reference resolution.
//!
//! A reference is resolved in four steps, stopping at the first that
//! yields candidates:
//!
//! 1. local scope: methods of the enclosing class for `self.f()`, nested
//!    functions of the enclosing function;
//! 2. same-file definitions;
//! 3. definitions in files reachable through the file's imports;
//! 4. the repository-wide symbol index.
//!
//! Bare calls only match module-level definitions; receiver calls may also
//! match methods. Remaining ties are broken by [`ResolveContext::rank`]:
//! longest import-path match, same directory, shortest directory distance,
//! lexicographic path, qualified name.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::extract::{DefinitionKind, ImportDef};
use crate::parser::Language;
use crate::prescan::{Candidate, SymbolIndex};

/// Receivers that refer to the enclosing class instance or type.
const SELF_RECEIVERS: &[&str] = &["self", "this", "cls", "Self"];

/// A definition in the file being resolved from.
#[derive(Debug, Clone)]
pub struct LocalSymbol {
    pub key: String,
    pub kind: DefinitionKind,
    pub top_level: bool,
}

/// The reference to resolve.
#[derive(Debug, Clone, Default)]
pub struct Reference<'a> {
    /// Callee or base name as written, without receiver.
    pub name: &'a str,
    pub receiver: Option<&'a str>,
    /// Qualified name of the enclosing class.
    pub class_context: Option<&'a str>,
    /// Qualified name of the calling function.
    pub caller: Option<&'a str>,
}

/// Which step produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Local,
    SameFile,
    Imported,
    Global,
}

/// A resolved target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub key: String,
    pub file: String,
    pub qualified_name: String,
}

/// A reachable file with the length of the import path that reached it.
#[derive(Debug, Clone)]
struct Reachable {
    file: String,
    match_len: usize,
}

/// Per-file resolution state.
pub struct ResolveContext<'a> {
    file: &'a str,
    index: &'a SymbolIndex,
    local: &'a HashMap<String, LocalSymbol>,
    /// Local binding name -> (original name, files of its module).
    bindings: HashMap<String, (Option<String>, Vec<String>)>,
    /// Files reached through glob imports.
    globs: Vec<String>,
    reachable: Vec<Reachable>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(
        file: &'a str,
        language: Language,
        imports: &[ImportDef],
        local: &'a HashMap<String, LocalSymbol>,
        index: &'a SymbolIndex,
    ) -> Self {
        let known: HashSet<&str> = index.files().collect();
        let mut bindings: HashMap<String, (Option<String>, Vec<String>)> = HashMap::new();
        let mut globs = Vec::new();
        let mut reachable: HashMap<String, usize> = HashMap::new();

        for import in imports {
            let files = module_files(language, file, import, &known);
            for target in &files {
                let len = reachable.entry(target.clone()).or_insert(0);
                *len = (*len).max(import.module.len());
            }
            if import.is_glob() {
                globs.extend(files.iter().cloned());
                if import.alias.is_none() {
                    continue;
                }
            }
            let original = import.name.clone().filter(|n| n != "*" && n != "default");
            bindings.insert(import.local_name().to_string(), (original, files));
        }

        let mut reachable: Vec<Reachable> = reachable
            .into_iter()
            .map(|(file, match_len)| Reachable { file, match_len })
            .collect();
        reachable.sort_by(|a, b| a.file.cmp(&b.file));

        Self {
            file,
            index,
            local,
            bindings,
            globs,
            reachable,
        }
    }

    /// Resolve a call site.
    pub fn resolve_call(&self, reference: &Reference) -> Option<(Target, Step)> {
        let name = reference.name;

        // 1. local scope
        if let Some(receiver) = reference.receiver {
            if SELF_RECEIVERS.contains(&receiver) {
                if let Some(class) = reference.class_context {
                    if let Some(target) = self.local_function(&format!("{class}.{name}")) {
                        return Some((target, Step::Local));
                    }
                }
            }
        } else if let Some(caller) = reference.caller {
            if let Some(target) = self.local_function(&format!("{caller}.{name}")) {
                return Some((target, Step::Local));
            }
        }

        // 2. same file
        match reference.receiver {
            None => {
                if let Some(target) = self.local_top_level(name, None) {
                    return Some((target, Step::SameFile));
                }
            }
            Some(receiver) => {
                let owner = last_segment(receiver);
                if let Some(target) = self.local_function(&format!("{owner}.{name}")) {
                    return Some((target, Step::SameFile));
                }
            }
        }

        // 3. import-reachable
        let imported = match reference.receiver {
            None => self.imported_bare(name, None),
            Some(receiver) => self.imported_member(receiver, name),
        };
        if let Some(target) = imported {
            return Some((target, Step::Imported));
        }

        // 4. global
        let bare = reference.receiver.is_none();
        let candidates: Vec<&Candidate> = self
            .index
            .candidates(name)
            .iter()
            .filter(|c| c.file != self.file)
            .filter(|c| !bare || c.top_level)
            .collect();
        self.pick(name, candidates).map(|t| (t, Step::Global))
    }

    /// Resolve a base class reference (`Base`, `mod.Base`, `fmt::Display`).
    pub fn resolve_base(&self, base: &str) -> Option<(Target, Step)> {
        let name = last_segment(base);
        let qualifier = qualifier(base);

        // 1. local scope: nested class written with its qualified name
        if qualifier.is_some() {
            let nested = self
                .local
                .get(&base.replace("::", "."))
                .filter(|symbol| symbol.kind == DefinitionKind::Class);
            if let Some(symbol) = nested {
                return Some((self.local_target(base, symbol), Step::Local));
            }
        }

        // 2. same file
        if qualifier.is_none() {
            if let Some(target) = self.local_top_level(name, Some(DefinitionKind::Class)) {
                return Some((target, Step::SameFile));
            }
        }

        // 3. import-reachable
        let imported = match qualifier {
            Some(q) => self.imported_member_of_kind(q, name, DefinitionKind::Class, true),
            None => self.imported_bare(name, Some(DefinitionKind::Class)),
        };
        if let Some(target) = imported {
            return Some((target, Step::Imported));
        }

        // 4. global
        let candidates: Vec<&Candidate> = self
            .index
            .candidates(name)
            .iter()
            .filter(|c| c.file != self.file && c.kind == DefinitionKind::Class && c.top_level)
            .collect();
        self.pick(name, candidates).map(|t| (t, Step::Global))
    }

    fn local_target(&self, qualified: &str, symbol: &LocalSymbol) -> Target {
        Target {
            key: symbol.key.clone(),
            file: self.file.to_string(),
            qualified_name: qualified.replace("::", "."),
        }
    }

    fn local_function(&self, qualified: &str) -> Option<Target> {
        self.local
            .get(qualified)
            .filter(|s| s.kind == DefinitionKind::Function)
            .map(|s| self.local_target(qualified, s))
    }

    fn local_top_level(&self, name: &str, kind: Option<DefinitionKind>) -> Option<Target> {
        self.local
            .get(name)
            .filter(|s| s.top_level && kind.is_none_or(|k| s.kind == k))
            .map(|s| self.local_target(name, s))
    }

    /// A bare name bound by an import, or defined in a reachable file.
    fn imported_bare(&self, name: &str, kind: Option<DefinitionKind>) -> Option<Target> {
        if let Some((original, files)) = self.bindings.get(name) {
            if let Some(original) = original {
                let found = self.candidates_in(original, files, kind, true);
                if let Some(target) = self.pick(original, found) {
                    return Some(target);
                }
            }
        }

        let glob_hits = self.candidates_in(name, &self.globs, kind, true);
        if let Some(target) = self.pick(name, glob_hits) {
            return Some(target);
        }

        let files: Vec<String> = self.reachable.iter().map(|r| r.file.clone()).collect();
        let found = self.candidates_in(name, &files, kind, true);
        self.pick(name, found)
    }

    /// `module.f()`, `Type::f()` or `obj.method()` through imports.
    fn imported_member(&self, receiver: &str, name: &str) -> Option<Target> {
        if let Some(target) =
            self.imported_member_of_kind(receiver, name, DefinitionKind::Function, false)
        {
            return Some(target);
        }
        let files: Vec<String> = self.reachable.iter().map(|r| r.file.clone()).collect();
        let found = self.candidates_in(name, &files, Some(DefinitionKind::Function), false);
        self.pick(name, found)
    }

    fn imported_member_of_kind(
        &self,
        receiver: &str,
        name: &str,
        kind: DefinitionKind,
        top_level_only: bool,
    ) -> Option<Target> {
        let head = last_segment(receiver);
        let (original, files) = self.bindings.get(head)?;
        match original {
            // `from m import Type` then `Type.f()`: a member of Type
            Some(owner) => {
                let qualified = format!("{owner}.{name}");
                let found: Vec<&Candidate> = self
                    .index
                    .candidates(name)
                    .iter()
                    .filter(|c| files.contains(&c.file) && c.kind == kind)
                    .filter(|c| c.qualified_name == qualified || (c.top_level && !top_level_only))
                    .collect();
                let found = if found.is_empty() {
                    self.candidates_in(name, files, Some(kind), top_level_only)
                } else {
                    found
                };
                self.pick(name, found)
            }
            // `import m` then `m.f()`: a definition of module m
            None => {
                let found = self.candidates_in(name, files, Some(kind), true);
                self.pick(name, found)
            }
        }
    }

    fn candidates_in(
        &self,
        name: &str,
        files: &[String],
        kind: Option<DefinitionKind>,
        top_level_only: bool,
    ) -> Vec<&'a Candidate> {
        self.index
            .candidates(name)
            .iter()
            .filter(|c| files.contains(&c.file))
            .filter(|c| kind.is_none_or(|k| c.kind == k))
            .filter(|c| !top_level_only || c.top_level)
            .collect()
    }

    /// Choose among candidates with the deterministic tie-break.
    fn pick(&self, name: &str, mut candidates: Vec<&Candidate>) -> Option<Target> {
        if candidates.len() > 1 {
            candidates.sort_by(|a, b| self.rank(a).cmp(&self.rank(b)));
            debug!(
                name,
                file = self.file,
                candidates = candidates.len(),
                chosen = %candidates[0].file,
                "Ambiguous reference resolved by tie-break"
            );
        }
        candidates.first().map(|c| Target {
            key: c.key(),
            file: c.file.clone(),
            qualified_name: c.qualified_name.clone(),
        })
    }

    /// Sort key: lower ranks win.
    fn rank<'c>(
        &self,
        candidate: &'c Candidate,
    ) -> (std::cmp::Reverse<usize>, bool, usize, &'c str, &'c str) {
        let match_len = self
            .reachable
            .iter()
            .find(|r| r.file == candidate.file)
            .map(|r| r.match_len)
            .unwrap_or(0);
        let from = parent_dir(self.file);
        let to = parent_dir(&candidate.file);
        (
            std::cmp::Reverse(match_len),
            from != to,
            dir_distance(from, to),
            candidate.file.as_str(),
            candidate.qualified_name.as_str(),
        )
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit(['.', ':'])
        .find(|s| !s.is_empty())
        .unwrap_or(path)
}

fn qualifier(path: &str) -> Option<&str> {
    let name = last_segment(path);
    let head = path.strip_suffix(name)?.trim_end_matches(['.', ':']);
    (!head.is_empty()).then_some(head)
}

fn parent_dir(file: &str) -> &Path {
    Path::new(file).parent().unwrap_or(Path::new(""))
}

/// Number of directory steps between two directories.
fn dir_distance(a: &Path, b: &Path) -> usize {
    let a: Vec<_> = a.components().collect();
    let b: Vec<_> = b.components().collect();
    let common = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    (a.len() - common) + (b.len() - common)
}

/// Lexically normalize `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Known files an import's module can refer to.
pub fn module_files(
    language: Language,
    importer: &str,
    import: &ImportDef,
    known: &HashSet<&str>,
) -> Vec<String> {
    let dir = parent_dir(importer);
    let mut found: Vec<String> = match language {
        Language::Python => python_module_files(dir, import, known),
        Language::JavaScript => javascript_module_files(dir, &import.module, known),
        Language::Rust => rust_module_files(dir, import, known),
    };
    found.retain(|f| f != importer);
    found.sort();
    found.dedup();
    found
}

fn existing(candidates: impl IntoIterator<Item = PathBuf>, known: &HashSet<&str>) -> Vec<String> {
    candidates
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| known.contains(p.as_str()))
        .collect()
}

/// Known files whose path ends with one of the relative suffixes.
fn by_suffix(suffixes: &[String], known: &HashSet<&str>) -> Vec<String> {
    known
        .iter()
        .filter(|file| {
            suffixes.iter().any(|suffix| {
                file.ends_with(&format!("/{suffix}")) || **file == suffix.as_str()
            })
        })
        .map(|file| file.to_string())
        .collect()
}

fn python_module_files(dir: &Path, import: &ImportDef, known: &HashSet<&str>) -> Vec<String> {
    let module = import.module.as_str();
    let dots = module.chars().take_while(|c| *c == '.').count();
    let rest = &module[dots..];

    let mut modules = vec![rest.to_string()];
    if let Some(name) = import.name.as_deref().filter(|n| *n != "*") {
        modules.push(if rest.is_empty() {
            name.to_string()
        } else {
            format!("{rest}.{name}")
        });
    }

    let mut files = Vec::new();
    for module in modules.iter().filter(|m| !m.is_empty()) {
        let relative = module.replace('.', "/");
        if dots > 0 {
            let mut base = dir.to_path_buf();
            for _ in 1..dots {
                base.pop();
            }
            files.extend(existing(
                [
                    base.join(format!("{relative}.py")),
                    base.join(format!("{relative}.pyi")),
                    base.join(&relative).join("__init__.py"),
                ],
                known,
            ));
        } else {
            files.extend(by_suffix(
                &[
                    format!("{relative}.py"),
                    format!("{relative}.pyi"),
                    format!("{relative}/__init__.py"),
                ],
                known,
            ));
        }
    }
    if dots > 0 && rest.is_empty() {
        let mut base = dir.to_path_buf();
        for _ in 1..dots {
            base.pop();
        }
        files.extend(existing([base.join("__init__.py")], known));
    }
    files
}

fn javascript_module_files(dir: &Path, module: &str, known: &HashSet<&str>) -> Vec<String> {
    const EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs"];

    if module.starts_with('.') {
        let base = normalize(&dir.join(module));
        let mut candidates = vec![base.clone()];
        for ext in EXTENSIONS {
            let mut with_ext = base.clone().into_os_string();
            with_ext.push(format!(".{ext}"));
            candidates.push(PathBuf::from(with_ext));
            candidates.push(base.join(format!("index.{ext}")));
        }
        return existing(candidates, known);
    }

    // Bare specifiers resolve into indexed dependency directories.
    let suffixes: Vec<String> = EXTENSIONS
        .iter()
        .flat_map(|ext| {
            [
                format!("node_modules/{module}.{ext}"),
                format!("node_modules/{module}/index.{ext}"),
            ]
        })
        .collect();
    by_suffix(&suffixes, known)
}

fn rust_module_files(dir: &Path, import: &ImportDef, known: &HashSet<&str>) -> Vec<String> {
    let mut segments: Vec<&str> = import.module.split("::").filter(|s| !s.is_empty()).collect();
    if let Some(name) = import.name.as_deref().filter(|n| *n != "*") {
        segments.push(name);
    }
    let Some(first) = segments.first().copied() else {
        return Vec::new();
    };

    let (base, rest): (Option<PathBuf>, &[&str]) = match first {
        "crate" => (None, &segments[1..]),
        "self" => (Some(dir.to_path_buf()), &segments[1..]),
        "super" => (dir.parent().map(Path::to_path_buf), &segments[1..]),
        _ => (None, &segments[..]),
    };

    // Longest module prefix first: `a::b::Item` may live in a/b.rs or a.rs.
    for len in (1..=rest.len()).rev() {
        let relative = rest[..len].join("/");
        let files = match &base {
            Some(base) => existing(
                [
                    base.join(format!("{relative}.rs")),
                    base.join(&relative).join("mod.rs"),
                ],
                known,
            ),
            None => by_suffix(
                &[format!("{relative}.rs"), format!("{relative}/mod.rs")],
                known,
            ),
        };
        if !files.is_empty() {
            return files;
        }
    }
    if first == "crate" {
        return by_suffix(&["src/lib.rs".to_string(), "src/main.rs".to_string()], known);
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Definition;

    fn import(module: &str, name: Option<&str>, alias: Option<&str>) -> ImportDef {
        ImportDef {
            module: module.to_string(),
            name: name.map(str::to_string),
            alias: alias.map(str::to_string),
            line: 1,
        }
    }

    fn def(name: &str, qualified: &str, kind: DefinitionKind, top_level: bool) -> Definition {
        Definition {
            name: name.to_string(),
            qualified_name: qualified.to_string(),
            kind,
            top_level,
            line: 1,
        }
    }

    fn function(name: &str) -> Definition {
        def(name, name, DefinitionKind::Function, true)
    }

    fn local(entries: &[(&str, &str, DefinitionKind, bool)]) -> HashMap<String, LocalSymbol> {
        entries
            .iter()
            .map(|(qualified, key, kind, top_level)| {
                (
                    qualified.to_string(),
                    LocalSymbol {
                        key: key.to_string(),
                        kind: *kind,
                        top_level: *top_level,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_python_module_files() {
        let known: HashSet<&str> = ["/r/pkg/a.py", "/r/pkg/sub/__init__.py", "/r/main.py"]
            .into_iter()
            .collect();
        assert_eq!(
            module_files(Language::Python, "/r/main.py", &import("pkg.a", None, None), &known),
            vec!["/r/pkg/a.py"]
        );
        assert_eq!(
            module_files(Language::Python, "/r/pkg/b.py", &import(".", Some("a"), None), &known),
            vec!["/r/pkg/a.py"]
        );
        assert_eq!(
            module_files(Language::Python, "/r/pkg/b.py", &import(".sub", None, None), &known),
            vec!["/r/pkg/sub/__init__.py"]
        );
        assert!(module_files(Language::Python, "/r/main.py", &import("os", None, None), &known).is_empty());
    }

    #[test]
    fn test_javascript_module_files() {
        let known: HashSet<&str> = ["/r/src/utils.js", "/r/src/lib/index.js"].into_iter().collect();
        assert_eq!(
            module_files(Language::JavaScript, "/r/src/app.js", &import("./utils", None, None), &known),
            vec!["/r/src/utils.js"]
        );
        assert_eq!(
            module_files(Language::JavaScript, "/r/src/x/y.js", &import("../lib", None, None), &known),
            vec!["/r/src/lib/index.js"]
        );
        assert!(module_files(Language::JavaScript, "/r/src/app.js", &import("react", None, None), &known).is_empty());
    }

    #[test]
    fn test_rust_module_files() {
        let known: HashSet<&str> = ["/r/src/lib.rs", "/r/src/store/mod.rs", "/r/src/parser.rs"]
            .into_iter()
            .collect();
        assert_eq!(
            module_files(Language::Rust, "/r/src/lib.rs", &import("crate::parser", Some("Parser"), None), &known),
            vec!["/r/src/parser.rs"]
        );
        assert_eq!(
            module_files(Language::Rust, "/r/src/parser.rs", &import("crate::store", Some("*"), None), &known),
            vec!["/r/src/store/mod.rs"]
        );
    }

    #[test]
    fn test_resolves_through_import() {
        let mut index = SymbolIndex::new();
        index.replace_file("/r/a.py", vec![function("helper")]);
        index.replace_file("/r/other/c.py", vec![function("helper")]);
        index.replace_file("/r/b.py", vec![function("main")]);

        let locals = local(&[("main", "function:/r/b.py#main", DefinitionKind::Function, true)]);
        let imports = [import("a", Some("helper"), None)];
        let ctx = ResolveContext::new("/r/b.py", Language::Python, &imports, &locals, &index);

        let (target, step) = ctx
            .resolve_call(&Reference {
                name: "helper",
                caller: Some("main"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(target.key, "function:/r/a.py#helper");
        assert_eq!(step, Step::Imported);
    }

    #[test]
    fn test_aliased_import_binding() {
        let mut index = SymbolIndex::new();
        index.replace_file("/r/a.py", vec![function("helper")]);
        index.replace_file("/r/b.py", Vec::new());
        let locals = HashMap::new();
        let imports = [import("a", Some("helper"), Some("h"))];
        let ctx = ResolveContext::new("/r/b.py", Language::Python, &imports, &locals, &index);

        let (target, _) = ctx
            .resolve_call(&Reference {
                name: "h",
                ..Default::default()
            })
            .unwrap();
        assert_eq!(target.file, "/r/a.py");
    }

    #[test]
    fn test_local_scope_beats_global() {
        let mut index = SymbolIndex::new();
        index.replace_file("/r/x.py", vec![def("save", "save", DefinitionKind::Function, true)]);
        let locals = local(&[
            ("Store", "class:/r/s.py#Store", DefinitionKind::Class, true),
            ("Store.save", "function:/r/s.py#Store.save", DefinitionKind::Function, false),
        ]);
        let ctx = ResolveContext::new("/r/s.py", Language::Python, &[], &locals, &index);

        let (target, step) = ctx
            .resolve_call(&Reference {
                name: "save",
                receiver: Some("self"),
                class_context: Some("Store"),
                caller: Some("Store.flush"),
            })
            .unwrap();
        assert_eq!(target.key, "function:/r/s.py#Store.save");
        assert_eq!(step, Step::Local);
    }

    #[test]
    fn test_bare_call_ignores_methods() {
        let mut index = SymbolIndex::new();
        index.replace_file("/r/x.py", vec![def("run", "Job.run", DefinitionKind::Function, false)]);
        let locals = HashMap::new();
        let ctx = ResolveContext::new("/r/y.py", Language::Python, &[], &locals, &index);

        assert!(ctx.resolve_call(&Reference { name: "run", ..Default::default() }).is_none());
        let (target, step) = ctx
            .resolve_call(&Reference {
                name: "run",
                receiver: Some("job"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(target.qualified_name, "Job.run");
        assert_eq!(step, Step::Global);
    }

    #[test]
    fn test_global_tie_break_prefers_same_directory() {
        let mut index = SymbolIndex::new();
        index.replace_file("/r/a/util.py", vec![function("fmt")]);
        index.replace_file("/r/b/util.py", vec![function("fmt")]);
        index.replace_file("/r/b/deep/more.py", vec![function("fmt")]);
        let locals = HashMap::new();
        let ctx = ResolveContext::new("/r/b/main.py", Language::Python, &[], &locals, &index);

        let (target, _) = ctx
            .resolve_call(&Reference { name: "fmt", ..Default::default() })
            .unwrap();
        assert_eq!(target.file, "/r/b/util.py");
    }

    #[test]
    fn test_global_tie_break_is_lexicographic_when_equidistant() {
        let mut index = SymbolIndex::new();
        index.replace_file("/r/z/util.py", vec![function("fmt")]);
        index.replace_file("/r/a/util.py", vec![function("fmt")]);
        let locals = HashMap::new();
        let ctx = ResolveContext::new("/r/m/main.py", Language::Python, &[], &locals, &index);

        let (target, _) = ctx
            .resolve_call(&Reference { name: "fmt", ..Default::default() })
            .unwrap();
        assert_eq!(target.file, "/r/a/util.py");
    }

    #[test]
    fn test_resolve_base_classes() {
        let mut index = SymbolIndex::new();
        index.replace_file("/r/models.py", vec![def("Base", "Base", DefinitionKind::Class, true)]);
        index.replace_file("/r/app.py", Vec::new());
        let locals = local(&[("Local", "class:/r/app.py#Local", DefinitionKind::Class, true)]);
        let imports = [import("models", None, None)];
        let ctx = ResolveContext::new("/r/app.py", Language::Python, &imports, &locals, &index);

        let (target, step) = ctx.resolve_base("models.Base").unwrap();
        assert_eq!(target.key, "class:/r/models.py#Base");
        assert_eq!(step, Step::Imported);

        let (target, step) = ctx.resolve_base("Local").unwrap();
        assert_eq!(target.key, "class:/r/app.py#Local");
        assert_eq!(step, Step::SameFile);

        assert!(ctx.resolve_base("Missing").is_none());
    }

    #[test]
    fn test_segments() {
        assert_eq!(last_segment("fmt::Display"), "Display");
        assert_eq!(last_segment("a.b.C"), "C");
        assert_eq!(qualifier("a.b.C"), Some("a.b"));
        assert_eq!(qualifier("std::fmt::Display"), Some("std::fmt"));
        assert_eq!(qualifier("Base"), None);
        assert_eq!(dir_distance(Path::new("/r/a"), Path::new("/r/b/c")), 3);
    }
}
