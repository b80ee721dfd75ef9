//! Search index interface.

use crate::document::IndexDocument;
use crate::error::{IndexOperationError, IndexResult};
use taxosync_model::DatasetId;

/// Outcome of one document operation inside a batch.
pub type OperationResult = Result<(), IndexOperationError>;

/// A search index addressed by document ID.
///
/// Batch calls return one result per input document, in input order; a
/// failing document never prevents the others from being applied.
pub trait SearchIndex: Send + Sync {
    /// Inserts or replaces documents.
    fn upsert(&self, documents: &[IndexDocument]) -> Vec<OperationResult>;

    /// Deletes documents by ID. Deleting an absent document succeeds.
    fn delete(&self, dataset: DatasetId, ids: &[String]) -> Vec<OperationResult>;

    /// Deletes every document of a dataset, returning how many were removed.
    fn delete_dataset(&self, dataset: DatasetId) -> IndexResult<u64>;
}
