//! codegraph-index: incremental multi-language code graph indexing
//!
//! This crate turns a directory of source files into a property graph and
//! keeps it current:
//! - Definitions, imports and calls extracted via tree-sitter
//! - A repository-scoped pre-scan so references resolve in any file order
//! - Per-file atomic commits with unresolved placeholders
//! - In-memory and graphqlite storage backends
//! - Typed relationship queries over any backend
//! - Background jobs and a debounced file watcher

pub mod builder;
pub mod edges;
pub mod extract;
pub mod indexer;
pub mod jobs;
pub mod lang;
pub mod parser;
pub mod prescan;
pub mod query;
pub mod resolve;
pub mod store;
pub mod symbols;
pub mod watcher;

pub use builder::{
    BuildError, BuildStats, FileOutcome, FileStatus, GraphBuilder, IndexObserver, IndexOptions,
    IndexReport,
};
pub use edges::{Edge, EdgeKind, EdgeStatus};
pub use extract::{FileExtraction, LanguageExtractor, ParseIssue};
pub use indexer::{IndexRequest, Indexer, IndexerConfig, IndexerError, WatchResponse};
pub use jobs::{JobError, JobId, JobKind, JobManager, JobManagerConfig, JobState, JobStatus};
pub use parser::{Language, ParseError, ParsedFile, Parser};
pub use prescan::SymbolIndex;
pub use query::{CallRelation, ClassHierarchy, CodeQuery, ComplexityEntry, Importer, SymbolRef};
pub use store::{
    Direction, GraphBackend, GraphStats, GraphStore, MemoryStore, MutationBatch, QueryResult,
    StoreError,
};
pub use symbols::{Node, NodeLabel, RefKind, SCHEMA_VERSION};
pub use watcher::{FileWatcher, WatchAction, WatchError, WatcherConfig};
