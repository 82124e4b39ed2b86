//! Error types for CIG operations.
//!
//! All fallible operations return [`Error`]. Variants fall into two groups,
//! mirroring a 4xx/5xx split:
//!
//! - **Input problems**: malformed or rejected ingestion records, dangling
//!   references. The caller decides whether to skip-and-log or fail the job.
//! - **Internal problems**: database, I/O, collaborator failures. These halt
//!   the indexing pass.
//!
//! A batch that fails with either kind leaves the store untouched.

use thiserror::Error;

use crate::types::EdgeKey;

/// Result type for CIG operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for CIG operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed outside of record parsing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration or arguments
    #[error("configuration error: {0}")]
    Config(String),

    /// A record is missing one of its natural-key fields
    #[error("{record_type} record is missing required field `{field}`")]
    MissingField {
        /// The record kind (e.g. `node`, `edge`)
        record_type: &'static str,
        /// The missing field name
        field: &'static str,
    },

    /// A record envelope could not be decoded
    #[error("malformed record{}: {message}", line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    MalformedRecord {
        /// 1-based line number when reading JSONL input
        line: Option<usize>,
        /// Decoder message
        message: String,
    },

    /// The envelope `type` is not one of the known record kinds
    #[error("unknown record type `{0}`")]
    UnknownRecordType(String),

    /// Flow graphs cannot be written through the generic ingest path
    #[error(
        "flow_graph records cannot be ingested directly; use flow-graph materialization so prior membership is cleared atomically"
    )]
    FlowGraphRequiresMaterialization,

    /// An edge references a node that exists neither in the store nor in the batch
    #[error("edge {edge} references unknown symbol `{missing_symbol_uid}`")]
    DanglingEdge {
        /// The offending edge
        edge: EdgeKey,
        /// The endpoint that could not be found
        missing_symbol_uid: String,
    },

    /// A non-edge record references an entity that does not exist
    #[error("{record_type} record `{key}` references unknown {missing}")]
    DanglingReference {
        /// The record kind
        record_type: &'static str,
        /// Natural key of the offending record
        key: String,
        /// Description of the missing target
        missing: String,
    },

    /// A node embedding does not have the configured length
    #[error("embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimension {
        /// Configured dimension count
        expected: usize,
        /// Supplied dimension count
        actual: usize,
    },

    /// A requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// An external collaborator (doc store, embedding provider) failed
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Invariant violation inside CIG itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if this is an input problem (4xx-style).
    ///
    /// Input problems originate in the ingestion records. A caller may choose
    /// to skip the batch and continue the job.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. }
                | Self::MalformedRecord { .. }
                | Self::UnknownRecordType(_)
                | Self::FlowGraphRequiresMaterialization
                | Self::DanglingEdge { .. }
                | Self::DanglingReference { .. }
                | Self::EmbeddingDimension { .. }
        )
    }

    /// Returns `true` if this is an internal problem (5xx-style).
    #[must_use]
    pub fn is_internal_error(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Io(_)
                | Self::Json(_)
                | Self::Collaborator(_)
                | Self::Internal(_)
        )
    }
}
