//! # CIG: Code Intelligence Graph
//!
//! CIG persists a graph of code symbols and their relationships for many
//! repositories, ingests parser output as atomic batches, and answers the
//! questions an incremental indexer needs:
//!
//! - **Impact**: which symbols are within N hops of the files a push touched
//! - **Dependency drift**: packages declared but unused, used but undeclared,
//!   or declared with conflicting ranges
//! - **Flow graphs**: cached subgraphs rooted at entrypoints (routes, jobs)
//! - **Pruning**: removing everything derived from deleted files
//!
//! ## Design
//!
//! - **One trait, two backends**: [`GraphStore`] is implemented by an
//!   in-memory store and a transactional `SQLite` store, chosen by
//!   configuration
//! - **Batches are atomic**: a batch is written completely or not at all
//! - **Scoped**: every operation takes a [`RepoScope`]; tenants never see each
//!   other's rows
//! - **Bounded traversal**: every walk takes an explicit depth, so cyclic
//!   graphs terminate
//!
//! ## Quick Start
//!
//! ```no_run
//! use cig::{Engine, EngineConfig, IndexJob, RepoScope};
//! use serde_json::json;
//!
//! # async fn run() -> cig::Result<()> {
//! let engine = Engine::open(EngineConfig::default(), std::path::Path::new("."))?;
//! let scope = RepoScope::new("acme", "web");
//!
//! let records = vec![
//!     json!({"type": "node", "data": {"symbol_uid": "a", "file_path": "a.js"}}),
//!     json!({"type": "node", "data": {"symbol_uid": "b", "file_path": "b.js"}}),
//!     json!({"type": "edge", "data": {
//!         "source_symbol_uid": "a", "edge_type": "Calls", "target_symbol_uid": "b"
//!     }}),
//! ];
//!
//! let job = IndexJob::incremental(scope, "abc123", vec!["a.js".into()], vec![]);
//! let report = engine.run_pass(&job, records).await?;
//! println!("{:?}", report.impact);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod engine;
mod error;
pub mod flow;
pub mod impact;
pub mod ingest;
pub mod mismatch;
pub mod records;
pub mod staleness;
pub mod store;
pub mod traversal;
pub mod types;

pub use config::EngineConfig;
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider};
pub use engine::{Engine, IndexJob, PassReport};
pub use error::{Error, Result};
pub use flow::{FlowEdgeFilter, FlowGraphMaterializer, MaterializeSummary};
pub use impact::{ImpactAnalyzer, ImpactReport};
pub use ingest::{IngestSummary, IngestionPipeline};
pub use records::{IngestionRecord, RecordBatch, RecordEnvelope};
pub use staleness::{BlockState, DocBlock, InMemoryDocStore, NoopPropagator, StalenessPropagator};
pub use store::{
    BatchStats, GraphStore, InMemoryGraphStore, PruneStats, SqliteGraphStore, StorageBackend,
    StoreStats, create_store,
};
pub use traversal::{Traversal, blast_radius, bounded_bfs};
pub use types::{
    DeclaredDependency, DependencyManifest, DependencyMismatch, Direction, EdgeKey,
    EdgeOccurrence, FlowEntrypoint, FlowGraph, FlowGraphKey, FlowGraphSummary, GraphEdge,
    GraphNode, IndexDiagnostic, IndexMode, MismatchType, ObservedDependency, RepoScope, SearchHit,
    UnresolvedImport,
};
