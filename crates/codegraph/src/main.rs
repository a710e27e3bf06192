//! codegraph: incremental code graph indexer
//!
//! Indexes Python, JavaScript and Rust sources into a property graph and
//! keeps it current while files change.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codegraph_index::{
    CodeQuery, GraphBackend, GraphStore, IndexRequest, Indexer, JobState, JobStatus, MemoryStore,
};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{BackendKind, Config};

/// Incremental multi-language code graph indexer
#[derive(Parser)]
#[command(name = "codegraph")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .codegraph directory (default: search for .codegraph/config.toml)
    #[arg(long, global = true, env = "CODEGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .codegraph directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Build or update the code graph
    Index {
        /// Directory or file to index (default: project root from config)
        path: Option<PathBuf>,

        /// Also index node_modules, venv and similar directories
        #[arg(long)]
        include_dependencies: bool,

        /// Extra gitignore-style pattern to skip (repeatable)
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,
    },

    /// Index, then keep the graph in sync until interrupted
    Watch {
        /// Directory to watch (default: project root from config)
        path: Option<PathBuf>,
    },

    /// Remove a file, directory or repository from the graph
    Remove { path: PathBuf },

    /// Run a Cypher query against the graph
    Query { cypher: String },

    /// Answer a relationship question about indexed code
    Find {
        #[command(subcommand)]
        query: FindQuery,
    },

    /// Show graph statistics
    Stats,
}

#[derive(Subcommand)]
enum FindQuery {
    /// Functions calling the named function
    Callers {
        name: String,
        /// Prefer the function defined in this file
        #[arg(long)]
        file: Option<String>,
    },
    /// Functions the named function calls
    Callees {
        name: String,
        #[arg(long)]
        file: Option<String>,
    },
    /// Files importing a module (substring match)
    Importers { module: String },
    /// Parents, children and methods of a class
    Hierarchy { name: String },
    /// Shortest call chain between two functions
    Chain {
        from: String,
        to: String,
        #[arg(long, default_value_t = 5)]
        max_depth: usize,
    },
    /// Project functions nothing calls
    DeadCode,
    /// Functions with the highest cyclomatic complexity
    Complex {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging for interactive commands. Logs to stderr.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose))
        .init();
}

/// Initialize logging for watch mode.
/// Logs to rotating files in .codegraph/logs/ with daily rotation.
fn init_file_logging(codegraph_dir: &Path, verbose: bool) {
    let logs_dir = codegraph_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "codegraph.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose))
        .init();
}

/// Load config from an explicit path or auto-discover `.codegraph/config.toml`.
///
/// Returns the config and the `.codegraph` directory, if any.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    let (config, dir) = match override_path {
        Some(path) => {
            let config_file = if path.is_dir() {
                path.join(config::CONFIG_FILE)
            } else {
                path.clone()
            };
            let dir = config_file.parent().unwrap_or(path).to_path_buf();
            (Config::from_file(&config_file)?, Some(dir))
        }
        None => match Config::find_and_load()? {
            Some((config, dir)) => (config, Some(dir)),
            None => (Config::default(), None),
        },
    };

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration:\n  {}", details.join("\n  "));
    }
    Ok((config, dir))
}

fn open_backend(config: &Config, codegraph_dir: Option<&Path>) -> Result<Arc<dyn GraphBackend>> {
    match config.graph.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
        BackendKind::Sqlite => {
            let path = config.resolve_graph_path(codegraph_dir);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let store = GraphStore::open(&path)
                .with_context(|| format!("Failed to open graph at {}", path.display()))?;
            info!(path = %path.display(), "Opened graph store");
            Ok(Arc::new(store))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Poll a job until it finishes, cancelling it on Ctrl-C.
async fn follow_job(indexer: &Indexer, job_id: &str) -> Result<JobStatus> {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_processed = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!(job_id = %job_id, "Interrupted, cancelling job");
                indexer.cancel(job_id)?;
                return Ok(indexer.wait(job_id, Duration::from_secs(60))?);
            }
            _ = ticker.tick() => {
                let status = indexer.status(job_id)?;
                if status.status.is_terminal() {
                    return Ok(status);
                }
                if status.processed != last_processed {
                    last_processed = status.processed;
                    info!(
                        processed = status.processed,
                        total = status.total,
                        percent = status.progress_percent,
                        eta_secs = ?status.estimated_seconds_remaining,
                        "Indexing"
                    );
                }
            }
        }
    }
}

fn finish(status: &JobStatus) -> Result<()> {
    print_json(status)?;
    match status.status {
        JobState::Failed => anyhow::bail!(
            "Job {} failed: {}",
            status.job_id,
            status.error.as_deref().unwrap_or("unknown error")
        ),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose);
        let cwd = std::env::current_dir()?;
        let path = Config::init(&cwd, force)?;
        println!("Created {}", path.display());
        return Ok(());
    }

    let (config, config_dir) = load_config(cli.config.as_ref())?;
    let codegraph_dir = config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::CODEGRAPH_DIR));

    match &cli.command {
        Commands::Watch { .. } => init_file_logging(&codegraph_dir, cli.verbose),
        _ => init_logging(cli.verbose),
    }
    if let Some(dir) = &config_dir {
        info!("Found config at {}", dir.display());
    }

    let backend = open_backend(&config, config_dir.as_deref())?;
    let indexer = Indexer::new(backend, config.indexer_config());
    let default_root = || config.resolve_root(config_dir.as_deref());

    match cli.command {
        // Handled before the config is loaded.
        Commands::Init { .. } => {}

        Commands::Index {
            path,
            include_dependencies,
            ignore_patterns,
        } => {
            let mut options = config.index_options();
            options.include_dependencies |= include_dependencies;
            options.ignore_patterns.extend(ignore_patterns);
            let path = path.unwrap_or_else(default_root);

            info!("Indexing {}", path.display());
            let job_id = indexer.index_path(IndexRequest { path, options })?;
            let status = follow_job(&indexer, &job_id).await?;
            finish(&status)?;
        }

        Commands::Watch { path } => {
            let path = path.unwrap_or_else(default_root);
            let watch = indexer.watch_with(IndexRequest {
                path: path.clone(),
                options: config.index_options(),
            })?;
            eprintln!(
                "Watching {} (logs in {}). Press Ctrl-C to stop.",
                path.display(),
                codegraph_dir.join("logs").display()
            );

            let initial = follow_job(&indexer, &watch.index_job_id).await?;
            info!(
                job_id = %initial.job_id,
                status = ?initial.status,
                processed = initial.processed,
                "Initial index finished"
            );

            let mut cleanup = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = cleanup.tick() => {
                        indexer.cleanup(codegraph_index::jobs::DEFAULT_RETENTION);
                    }
                }
            }

            indexer.unwatch(&watch.watch_id)?;
            let status = indexer.status(&watch.job_id)?;
            info!(job_id = %status.job_id, updates = status.processed, "Watch stopped");
            print_json(&status)?;
        }

        Commands::Remove { path } => {
            let job_id = indexer.remove_path(&path)?;
            let status = follow_job(&indexer, &job_id).await?;
            finish(&status)?;
        }

        Commands::Query { cypher } => {
            let job_id = indexer.query(&cypher)?;
            let status = follow_job(&indexer, &job_id).await?;
            match (&status.status, &status.result) {
                (JobState::Completed, Some(result)) => print_json(result)?,
                _ => finish(&status)?,
            }
        }

        Commands::Find { query } => {
            let backend = indexer.backend().clone();
            let finder = CodeQuery::new(backend.as_ref());
            match query {
                FindQuery::Callers { name, file } => print_json(&finder.callers(&name, file.as_deref())?)?,
                FindQuery::Callees { name, file } => print_json(&finder.callees(&name, file.as_deref())?)?,
                FindQuery::Importers { module } => print_json(&finder.importers(&module)?)?,
                FindQuery::Hierarchy { name } => print_json(&finder.class_hierarchy(&name)?)?,
                FindQuery::Chain { from, to, max_depth } => {
                    print_json(&finder.call_chain(&from, &to, max_depth)?)?
                }
                FindQuery::DeadCode => print_json(&finder.dead_code()?)?,
                FindQuery::Complex { limit } => print_json(&finder.most_complex(limit)?)?,
            }
        }

        Commands::Stats => {
            print_json(&indexer.stats()?)?;
        }
    }

    Ok(())
}
