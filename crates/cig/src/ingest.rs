//! Ingestion pipeline: envelopes in, one atomic store write out.
//!
//! ```text
//! {type, data} ──decode──> IngestionRecord ──validate/normalize──> RecordBatch
//!                                                         │
//!                                  GraphStore::apply_batch (single transaction)
//! ```
//!
//! Any decode or validation error rejects the whole batch before the store
//! is touched. Referential checks (edge endpoints, occurrence edges) happen
//! inside the store, which rolls back on failure.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::records::{IngestionRecord, RecordBatch};
use crate::store::{BatchStats, GraphStore};
use crate::types::RepoScope;

/// Outcome of one ingestion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Records received, before de-duplication
    pub received: usize,
    /// Records written per kind, after de-duplication
    pub written: BatchStats,
}

/// Validates and applies batches of ingestion records.
pub struct IngestionPipeline<'a> {
    store: &'a dyn GraphStore,
    embedding_dimensions: Option<usize>,
}

impl<'a> IngestionPipeline<'a> {
    /// Create a pipeline writing to `store`.
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self {
            store,
            embedding_dimensions: None,
        }
    }

    /// Require node embeddings to have exactly `dimensions` entries.
    #[must_use]
    pub fn with_embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.embedding_dimensions = Some(dimensions);
        self
    }

    /// Decode raw envelopes.
    ///
    /// # Errors
    ///
    /// Returns the first decode error; see [`IngestionRecord::from_value`].
    pub fn decode(values: Vec<Value>) -> Result<Vec<IngestionRecord>> {
        values.into_iter().map(IngestionRecord::from_value).collect()
    }

    /// Validate, normalize and de-duplicate typed records into a batch.
    ///
    /// # Errors
    ///
    /// - `Error::MissingField` naming the first missing natural-key field
    /// - `Error::EmbeddingDimension` for a node embedding of the wrong length
    pub fn prepare(&self, records: Vec<IngestionRecord>) -> Result<RecordBatch> {
        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            record.validate()?;
            if let (Some(expected), IngestionRecord::Node(node)) = (self.embedding_dimensions, &record)
                && let Some(embedding) = &node.embedding
                && embedding.len() != expected
            {
                return Err(Error::EmbeddingDimension {
                    expected,
                    actual: embedding.len(),
                });
            }
            prepared.push(record.normalized());
        }
        Ok(RecordBatch::from_records(prepared))
    }

    /// Decode, validate and atomically apply raw envelopes.
    ///
    /// # Errors
    ///
    /// Any decode, validation or store error; nothing is written on error.
    pub fn ingest_records(&self, scope: &RepoScope, values: Vec<Value>) -> Result<IngestSummary> {
        let records = Self::decode(values)?;
        self.ingest_typed(scope, records)
    }

    /// Validate and atomically apply already-decoded records.
    ///
    /// # Errors
    ///
    /// Any validation or store error; nothing is written on error.
    #[instrument(skip(self, scope, records), fields(scope = %scope, received = records.len()))]
    pub fn ingest_typed(
        &self,
        scope: &RepoScope,
        records: Vec<IngestionRecord>,
    ) -> Result<IngestSummary> {
        let received = records.len();
        let batch = self.prepare(records)?;
        self.apply_prepared(scope, received, &batch)
    }

    /// Apply a batch built by [`Self::prepare`] from `received` records.
    ///
    /// # Errors
    ///
    /// Store errors; the store rolls the batch back.
    pub fn apply_prepared(
        &self,
        scope: &RepoScope,
        received: usize,
        batch: &RecordBatch,
    ) -> Result<IngestSummary> {
        if batch.is_empty() {
            return Ok(IngestSummary {
                received,
                written: BatchStats::default(),
            });
        }

        let written = self.store.apply_batch(scope, batch)?;
        debug!(
            nodes = written.nodes,
            edges = written.edges,
            occurrences = written.occurrences,
            "Ingested batch"
        );
        Ok(IngestSummary { received, written })
    }
}
