//! In-memory search index.

use crate::document::IndexDocument;
use crate::error::IndexResult;
use crate::index::{OperationResult, SearchIndex};
use parking_lot::RwLock;
use std::collections::HashMap;
use taxosync_model::{DatasetId, RecordKey};

/// A search index held in memory, keyed by `(dataset, document id)`.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: RwLock<HashMap<(DatasetId, String), IndexDocument>>,
}

impl MemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the document of a record.
    #[must_use]
    pub fn get(&self, dataset: DatasetId, key: &RecordKey) -> Option<IndexDocument> {
        self.documents
            .read()
            .get(&(dataset, IndexDocument::id_for(key)))
            .cloned()
    }

    /// Returns the number of documents of a dataset.
    #[must_use]
    pub fn len(&self, dataset: DatasetId) -> usize {
        self.documents
            .read()
            .keys()
            .filter(|(ds, _)| *ds == dataset)
            .count()
    }

    /// Returns true if the dataset has no documents.
    #[must_use]
    pub fn is_empty(&self, dataset: DatasetId) -> bool {
        self.len(dataset) == 0
    }

    /// Returns the documents of a dataset sorted by record key.
    #[must_use]
    pub fn documents(&self, dataset: DatasetId) -> Vec<IndexDocument> {
        let mut docs: Vec<IndexDocument> = self
            .documents
            .read()
            .iter()
            .filter(|((ds, _), _)| *ds == dataset)
            .map(|(_, doc)| doc.clone())
            .collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        docs
    }
}

impl SearchIndex for MemoryIndex {
    fn upsert(&self, documents: &[IndexDocument]) -> Vec<OperationResult> {
        let mut index = self.documents.write();
        documents
            .iter()
            .map(|doc| {
                index.insert((doc.dataset, doc.id.clone()), doc.clone());
                Ok(())
            })
            .collect()
    }

    fn delete(&self, dataset: DatasetId, ids: &[String]) -> Vec<OperationResult> {
        let mut index = self.documents.write();
        ids.iter()
            .map(|id| {
                index.remove(&(dataset, id.clone()));
                Ok(())
            })
            .collect()
    }

    fn delete_dataset(&self, dataset: DatasetId) -> IndexResult<u64> {
        let mut index = self.documents.write();
        let before = index.len();
        index.retain(|(ds, _), _| *ds != dataset);
        Ok((before - index.len()) as u64)
    }
}
