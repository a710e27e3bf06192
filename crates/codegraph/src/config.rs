//! Configuration file support for codegraph.
//!
//! All codegraph data is stored in a `.codegraph/` directory:
//! - `.codegraph/config.toml` - Configuration file
//! - `.codegraph/graph.db` - Code graph database
//! - `.codegraph/logs/` - Log files for watch mode
//!
//! Config discovery searches for `.codegraph/config.toml` starting from the
//! current directory and walking up to parent directories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use codegraph_index::{IndexOptions, IndexerConfig, JobManagerConfig};
use serde::{Deserialize, Serialize};

/// The codegraph data directory name.
pub const CODEGRAPH_DIR: &str = ".codegraph";
/// The config file name within the codegraph directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub graph: GraphConfig,
    pub index: IndexConfig,
    pub jobs: JobsConfig,
    pub watch: WatchConfig,
}

/// Project configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root directory of the project.
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

/// Which storage backend holds the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Memory,
}

/// Graph storage configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Path to the graph database, relative to `.codegraph/`.
    pub path: PathBuf,
    pub backend: BackendKind,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("graph.db"),
            backend: BackendKind::Sqlite,
        }
    }
}

/// Indexing defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    pub include_dependencies: bool,
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    pub workers: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: JobManagerConfig::default().workers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

/// Written by `codegraph init`.
pub const DEFAULT_CONFIG: &str = r#"# codegraph configuration

[project]
# Root directory to index, relative to the parent of .codegraph/
root = "."

[graph]
# Database path, relative to .codegraph/
path = "graph.db"
# "sqlite" (persistent) or "memory" (discarded on exit)
backend = "sqlite"

[index]
# Also index node_modules, venv and similar directories
include_dependencies = false
# Extra gitignore-style patterns to skip
ignore_patterns = []

[jobs]
# Worker threads for background jobs
workers = 4

[watch]
# Debounce window for file change events
debounce_ms = 300
"#;

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Returns the config together with the `.codegraph` directory it was
    /// found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let codegraph_dir = dir.join(CODEGRAPH_DIR);
            let config_path = codegraph_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, codegraph_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Write the default config under `base/.codegraph/`.
    ///
    /// Fails if a config file already exists unless `force` is set.
    pub fn init(base: &Path, force: bool) -> Result<PathBuf> {
        let codegraph_dir = base.join(CODEGRAPH_DIR);
        let config_path = codegraph_dir.join(CONFIG_FILE);
        if config_path.exists() && !force {
            anyhow::bail!(
                "Config already exists at {} (use --force to overwrite)",
                config_path.display()
            );
        }
        std::fs::create_dir_all(&codegraph_dir)
            .with_context(|| format!("Failed to create {}", codegraph_dir.display()))?;
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(config_path)
    }

    /// Resolve the graph path relative to the .codegraph directory.
    pub fn resolve_graph_path(&self, codegraph_dir: Option<&Path>) -> PathBuf {
        if self.graph.path.is_absolute() {
            self.graph.path.clone()
        } else if let Some(dir) = codegraph_dir {
            dir.join(&self.graph.path)
        } else {
            PathBuf::from(CODEGRAPH_DIR).join(&self.graph.path)
        }
    }

    /// Resolve the project root relative to the directory holding `.codegraph`.
    pub fn resolve_root(&self, codegraph_dir: Option<&Path>) -> PathBuf {
        if self.project.root.is_absolute() {
            return self.project.root.clone();
        }
        match codegraph_dir.and_then(Path::parent) {
            Some(base) => base.join(&self.project.root),
            None => self.project.root.clone(),
        }
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            include_dependencies: self.index.include_dependencies,
            ignore_patterns: self.index.ignore_patterns.clone(),
        }
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            jobs: JobManagerConfig {
                workers: self.jobs.workers,
            },
            debounce_ms: self.watch.debounce_ms,
        }
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.graph.backend == BackendKind::Sqlite && self.graph.path.as_os_str().is_empty() {
            errors.push(ConfigValidationError {
                field: "graph.path".to_string(),
                message: "Graph path cannot be empty for the sqlite backend.".to_string(),
            });
        }

        if self.jobs.workers == 0 {
            errors.push(ConfigValidationError {
                field: "jobs.workers".to_string(),
                message: "At least one worker is required.".to_string(),
            });
        }

        if self.watch.debounce_ms == 0 || self.watch.debounce_ms > 60_000 {
            errors.push(ConfigValidationError {
                field: "watch.debounce_ms".to_string(),
                message: format!(
                    "Invalid debounce {}ms. Expected 1 to 60000.",
                    self.watch.debounce_ms
                ),
            });
        }

        for pattern in &self.index.ignore_patterns {
            if pattern.trim().is_empty() {
                errors.push(ConfigValidationError {
                    field: "index.ignore_patterns".to_string(),
                    message: "Ignore patterns cannot be blank.".to_string(),
                });
                break;
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.graph.backend, BackendKind::Sqlite);
        assert_eq!(config.graph.path, PathBuf::from("graph.db"));
        assert_eq!(config.watch.debounce_ms, 300);
        assert!(!config.index.include_dependencies);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_default_file_parses_and_validates() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.jobs.workers, 4);
        assert_eq!(config.graph.backend, BackendKind::Sqlite);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[graph]
backend = "memory"

[index]
ignore_patterns = ["generated/"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.graph.backend, BackendKind::Memory);
        assert_eq!(config.index_options().ignore_patterns, vec!["generated/"]);
        // Defaults still apply
        assert_eq!(config.watch.debounce_ms, 300);
        assert_eq!(config.graph.path, PathBuf::from("graph.db"));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let toml = "[graph]\nbackend = \"neo4j\"\n";
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = Config::default();
        let dir = PathBuf::from("/project/.codegraph");
        assert_eq!(
            config.resolve_graph_path(Some(&dir)),
            PathBuf::from("/project/.codegraph/graph.db")
        );
        assert_eq!(config.resolve_root(Some(&dir)), PathBuf::from("/project/."));

        config.project.root = PathBuf::from("/elsewhere");
        assert_eq!(config.resolve_root(Some(&dir)), PathBuf::from("/elsewhere"));
    }

    #[test]
    fn test_validate_reports_each_field() {
        let mut config = Config::default();
        config.jobs.workers = 0;
        config.watch.debounce_ms = 0;
        config.index.ignore_patterns = vec!["  ".to_string()];

        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["jobs.workers", "watch.debounce_ms", "index.ignore_patterns"]
        );
    }

    #[test]
    fn test_init_and_discover() {
        let dir = TempDir::new().unwrap();
        let path = Config::init(dir.path(), false).unwrap();
        assert!(path.ends_with(".codegraph/config.toml"));
        assert!(Config::init(dir.path(), false).is_err());
        assert!(Config::init(dir.path(), true).is_ok());

        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        let (config, found) = Config::find_and_load_from(&nested).unwrap().unwrap();
        assert_eq!(found, dir.path().join(CODEGRAPH_DIR));
        assert_eq!(config.jobs.workers, 4);
    }
}
