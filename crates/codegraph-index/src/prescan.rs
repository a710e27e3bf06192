//! Pre-scan symbol index.
//!
//! Before full extraction, every file of a repository is parsed once and
//! only its module-level definitions are collected. The resulting map from
//! symbol name to candidate definitions lets the builder resolve references
//! to files it has not reached yet. After a file is fully extracted its
//! entry is replaced with the authoritative definition list.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::extract::{Definition, DefinitionKind};
use crate::lang::extractor_for;
use crate::parser::{Language, Parser};
use crate::symbols::{class_key, function_key};

/// A place a symbol name may be defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub file: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: DefinitionKind,
    pub top_level: bool,
    pub line: usize,
}

impl Candidate {
    /// Graph key of the node this candidate becomes once extracted.
    pub fn key(&self) -> String {
        match self.kind {
            DefinitionKind::Function => function_key(&self.file, &self.qualified_name),
            DefinitionKind::Class => class_key(&self.file, &self.qualified_name),
        }
    }
}

/// Repository-scoped map of symbol name to candidate definitions.
#[derive(Debug, Default)]
pub struct SymbolIndex {
    by_name: HashMap<String, Vec<Candidate>>,
    by_file: BTreeMap<String, Vec<Definition>>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a list of files.
    ///
    /// Files are visited grouped by language. A file that cannot be read or
    /// parsed is recorded with no definitions; pre-scan never fails.
    pub fn prescan(files: &[(PathBuf, Language)]) -> Self {
        let mut ordered: Vec<&(PathBuf, Language)> = files.iter().collect();
        ordered.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));

        let mut parser = Parser::new();
        let mut index = Self::new();
        for (path, language) in ordered {
            let defs = scan_file(&mut parser, path, *language);
            index.replace_file(&path.to_string_lossy(), defs);
        }
        debug!(
            files = index.file_count(),
            symbols = index.by_name.len(),
            "Pre-scan complete"
        );
        index
    }

    /// Replace the definitions recorded for one file.
    pub fn replace_file(&mut self, file: &str, defs: Vec<Definition>) {
        self.remove_candidates(file);
        for def in &defs {
            self.by_name
                .entry(def.name.clone())
                .or_default()
                .push(Candidate {
                    file: file.to_string(),
                    name: def.name.clone(),
                    qualified_name: def.qualified_name.clone(),
                    kind: def.kind,
                    top_level: def.top_level,
                    line: def.line,
                });
        }
        self.by_file.insert(file.to_string(), defs);
    }

    pub fn remove_file(&mut self, file: &str) {
        self.remove_candidates(file);
        self.by_file.remove(file);
    }

    fn remove_candidates(&mut self, file: &str) {
        let Some(old) = self.by_file.get(file) else {
            return;
        };
        for def in old {
            if let Some(candidates) = self.by_name.get_mut(&def.name) {
                candidates.retain(|c| c.file != file);
                if candidates.is_empty() {
                    self.by_name.remove(&def.name);
                }
            }
        }
    }

    /// Every candidate for a name.
    pub fn candidates(&self, name: &str) -> &[Candidate] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Files defining a name, deduplicated and sorted.
    pub fn files_defining(&self, name: &str) -> Vec<&str> {
        let mut files: Vec<&str> = self.candidates(name).iter().map(|c| c.file.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files
    }

    /// Definitions recorded for a file.
    pub fn file_definitions(&self, file: &str) -> &[Definition] {
        self.by_file.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_file(&self, file: &str) -> bool {
        self.by_file.contains_key(file)
    }

    /// Known files, sorted.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.by_file.keys().map(String::as_str)
    }

    pub fn file_count(&self) -> usize {
        self.by_file.len()
    }
}

fn scan_file(parser: &mut Parser, path: &Path, language: Language) -> Vec<Definition> {
    let source = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Pre-scan could not read file");
            return Vec::new();
        }
    };
    match parser.parse_source(&source, language) {
        Ok(parsed) => extractor_for(language).extract_definitions(parsed.root_node(), &parsed.source),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Pre-scan could not parse file");
            Vec::new()
        }
    }
}
