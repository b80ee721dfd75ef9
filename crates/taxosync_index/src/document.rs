//! Denormalized index documents.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use taxosync_model::{DatasetId, Record, RecordKey, RecordKind, Value};
use taxosync_store::{RelationalStore, StoreResult};

/// The projection of one record stored in the search index.
///
/// Carries the full current record plus its classification: the chain of
/// taxon keys from the root down to the taxon the record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Document ID, the hex identity hash of the record.
    pub id: String,
    /// Dataset scope.
    pub dataset: DatasetId,
    /// Record identity.
    pub key: RecordKey,
    /// Record fields.
    pub fields: BTreeMap<String, Value>,
    /// Ancestor chain, root first.
    pub classification: Vec<RecordKey>,
}

impl IndexDocument {
    /// Returns the document ID of a record key.
    #[must_use]
    pub fn id_for(key: &RecordKey) -> String {
        key.identity_hash().to_hex()
    }
}

/// Taxon field holding the parent taxon.
pub const PARENT_FIELD: &str = "parent";

/// Builds documents from relational state, memoizing ancestor chains.
pub(crate) struct Projector<'a> {
    store: &'a dyn RelationalStore,
    dataset: DatasetId,
    chains: HashMap<RecordKey, Vec<RecordKey>>,
}

impl<'a> Projector<'a> {
    pub(crate) fn new(store: &'a dyn RelationalStore, dataset: DatasetId) -> Self {
        Self {
            store,
            dataset,
            chains: HashMap::new(),
        }
    }

    /// Projects a committed record.
    pub(crate) fn project(&mut self, record: &Record) -> StoreResult<IndexDocument> {
        let anchor = match record.kind() {
            RecordKind::Taxon => Some(record.key.clone()),
            RecordKind::Synonym => record.reference("accepted").cloned(),
            RecordKind::Distribution => record.reference("taxon").cloned(),
            RecordKind::Name => None,
        };
        let classification = match anchor {
            Some(taxon) => self.classification(&taxon)?,
            None => Vec::new(),
        };

        Ok(IndexDocument {
            id: IndexDocument::id_for(&record.key),
            dataset: self.dataset,
            key: record.key.clone(),
            fields: record.fields.clone(),
            classification,
        })
    }

    /// Returns the chain from the root taxon down to `taxon` inclusive.
    fn classification(&mut self, taxon: &RecordKey) -> StoreResult<Vec<RecordKey>> {
        if let Some(chain) = self.chains.get(taxon) {
            return Ok(chain.clone());
        }

        let mut upward = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(taxon.clone());
        let mut base: Vec<RecordKey> = Vec::new();

        while let Some(key) = current.take() {
            if let Some(chain) = self.chains.get(&key) {
                base = chain.clone();
                break;
            }
            if !seen.insert(key.clone()) {
                tracing::warn!(dataset = %self.dataset, taxon = %key, "parent cycle in stored classification");
                break;
            }
            current = self
                .store
                .get(self.dataset, &key)?
                .and_then(|record| record.reference(PARENT_FIELD).cloned());
            upward.push(key);
        }

        // upward is leaf-first; extend the memoized root chain downwards.
        let mut chain = base;
        for key in upward.into_iter().rev() {
            chain.push(key.clone());
            self.chains.insert(key, chain.clone());
        }
        Ok(chain)
    }
}
