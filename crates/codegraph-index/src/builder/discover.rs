//! Source file discovery.
//!
//! Walks a repository honoring `.gitignore`, `.codegraphignore` and the
//! request's ignore patterns, keeping only files with a supported
//! extension. Dependency directories at the repository root are skipped
//! unless the request asks for them, in which case their files are flagged.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use tracing::warn;

use super::IndexOptions;
use crate::parser::Language;

/// Name of the project-specific ignore file.
pub const IGNORE_FILE: &str = ".codegraphignore";

/// Directory names holding third-party code.
pub const DEPENDENCY_DIRS: &[&str] = &["node_modules", ".venv", "venv", "site-packages", "vendor"];

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub language: Language,
    pub is_dependency: bool,
}

/// Whether `path` lies in a dependency directory directly under `root`.
pub fn is_dependency_path(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .ok()
        .and_then(|relative| relative.components().next())
        .and_then(|first| first.as_os_str().to_str())
        .is_some_and(|first| DEPENDENCY_DIRS.contains(&first))
}

/// Walk `root` and return the files to index, sorted by path.
pub fn discover_files(root: &Path, options: &IndexOptions) -> Vec<DiscoveredFile> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .follow_links(false)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE);

    let mut overrides = OverrideBuilder::new(root);
    for pattern in &options.ignore_patterns {
        if let Err(e) = overrides.add(&format!("!{pattern}")) {
            warn!(pattern = %pattern, error = %e, "Invalid ignore pattern");
        }
    }
    if let Ok(overrides) = overrides.build() {
        builder.overrides(overrides);
    }

    // Dependency directories are often gitignored, so they are walked
    // separately when requested.
    let include_dependencies = options.include_dependencies;
    let dep_root = root.to_path_buf();
    builder.filter_entry(move |entry| {
        let is_hidden_dir = entry.depth() > 0
            && entry.file_type().is_some_and(|ft| ft.is_dir())
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with('.') && !DEPENDENCY_DIRS.contains(&name));
        !is_hidden_dir && !(entry.depth() == 1 && is_dependency_path(&dep_root, entry.path()))
    });

    let mut files: Vec<DiscoveredFile> = collect(builder, root, false);

    if include_dependencies {
        for dir in DEPENDENCY_DIRS {
            let dep_dir = root.join(dir);
            if !dep_dir.is_dir() {
                continue;
            }
            let mut dep_builder = WalkBuilder::new(&dep_dir);
            dep_builder
                .hidden(false)
                .git_ignore(false)
                .git_global(false)
                .git_exclude(false)
                .ignore(false)
                .follow_links(false)
                .require_git(false);
            files.extend(collect(dep_builder, root, true));
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    files
}

fn collect(builder: WalkBuilder, root: &Path, is_dependency: bool) -> Vec<DiscoveredFile> {
    builder
        .build()
        .filter_map(Result::ok) // Skip entries we can't access
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| !name.starts_with('.'))
        })
        .filter_map(|entry| {
            let language = Language::from_path(entry.path())?;
            Some(DiscoveredFile {
                is_dependency: is_dependency || is_dependency_path(root, entry.path()),
                path: entry.into_path(),
                language,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(files: &[DiscoveredFile], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_discovers_supported_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("main.py"), "def main(): pass").unwrap();
        fs::write(root.join("app.js"), "function app() {}").unwrap();
        fs::write(root.join("lib.rs"), "fn lib() {}").unwrap();
        fs::write(root.join("README.md"), "# readme").unwrap();

        let files = discover_files(root, &IndexOptions::default());
        assert_eq!(names(&files, root), vec!["app.js", "lib.rs", "main.py"]);
        assert_eq!(files[0].language, Language::JavaScript);
    }

    #[test]
    fn test_respects_ignore_files_and_patterns() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join(".gitignore"), "ignored.py\n").unwrap();
        fs::write(root.join(IGNORE_FILE), "generated/\n").unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("ignored.py"), "x = 1").unwrap();
        fs::write(root.join("generated/out.py"), "x = 1").unwrap();
        fs::write(root.join("build/tmp.py"), "x = 1").unwrap();
        fs::write(root.join("kept.py"), "x = 1").unwrap();

        let options = IndexOptions {
            ignore_patterns: vec!["build/**".to_string()],
            ..Default::default()
        };
        let files = discover_files(root, &options);
        assert_eq!(names(&files, root), vec!["kept.py"]);
    }

    #[test]
    fn test_dependency_directories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        fs::write(root.join("node_modules/left-pad/index.js"), "function pad() {}").unwrap();
        fs::write(root.join("app.js"), "function app() {}").unwrap();

        let skipped = discover_files(root, &IndexOptions::default());
        assert_eq!(names(&skipped, root), vec!["app.js"]);

        let options = IndexOptions {
            include_dependencies: true,
            ..Default::default()
        };
        let included = discover_files(root, &options);
        assert_eq!(included.len(), 2);
        let dep = included.iter().find(|f| f.is_dependency).unwrap();
        assert!(dep.path.ends_with("node_modules/left-pad/index.js"));
    }

    #[test]
    fn test_is_dependency_path() {
        let root = Path::new("/repo");
        assert!(is_dependency_path(root, Path::new("/repo/venv/lib/x.py")));
        assert!(!is_dependency_path(root, Path::new("/repo/src/vendor/x.py")));
        assert!(!is_dependency_path(root, Path::new("/other/venv/x.py")));
    }
}
