use std::collections::HashMap;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};
use crate::core::types::{DocId, TermKey};
use crate::index::posting::PostingList;

/// Corpus counters for one index. Updated incrementally by the indexing
/// pipeline; authoritative only when derived from committed chunks via
/// `from_postings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_documents: u64,
    /// `field:token` -> number of documents containing the term.
    pub document_frequency: HashMap<String, u64>,
    /// doc -> field -> token count.
    pub field_lengths: HashMap<DocId, HashMap<String, u32>>,
    /// field -> (sum of lengths, docs carrying the field).
    pub field_totals: HashMap<String, (u64, u64)>,
}

impl IndexStats {
    pub fn new() -> Self {
        IndexStats::default()
    }

    /// Rebuild all counters from committed posting lists. Source of
    /// truth after bulk operations and manual rebuilds.
    pub fn from_postings<'a, I>(postings: I) -> Self
    where
        I: IntoIterator<Item = (&'a TermKey, &'a PostingList)>,
    {
        let mut stats = IndexStats::new();

        for (key, list) in postings {
            let local = key.local_key();
            for entry in list.entries() {
                *stats.document_frequency.entry(local.clone()).or_insert(0) += 1;
                let fields = stats.field_lengths.entry(entry.doc_id.clone()).or_default();
                *fields.entry(key.field.clone()).or_insert(0) += entry.frequency;
            }
        }

        stats.total_documents = stats.field_lengths.len() as u64;
        stats.rebuild_field_totals();
        stats
    }

    fn rebuild_field_totals(&mut self) {
        self.field_totals.clear();
        for fields in self.field_lengths.values() {
            for (field, len) in fields {
                let totals = self.field_totals.entry(field.clone()).or_insert((0, 0));
                totals.0 += *len as u64;
                totals.1 += 1;
            }
        }
    }

    pub fn df(&self, local_term: &str) -> u64 {
        self.document_frequency.get(local_term).copied().unwrap_or(0)
    }

    pub fn field_length(&self, doc_id: &DocId, field: &str) -> u32 {
        self.field_lengths
            .get(doc_id)
            .and_then(|fields| fields.get(field))
            .copied()
            .unwrap_or(0)
    }

    pub fn avg_field_length(&self, field: &str) -> f64 {
        match self.field_totals.get(field) {
            Some(&(sum, count)) if count > 0 => sum as f64 / count as f64,
            _ => 0.0,
        }
    }

    /// Count a document even when none of its fields produced tokens.
    pub fn touch_document(&mut self, doc_id: &DocId) {
        if !self.field_lengths.contains_key(doc_id) {
            self.field_lengths.insert(doc_id.clone(), HashMap::new());
            self.total_documents += 1;
        }
    }

    /// Record a document's token count for one field. Idempotent: the
    /// previous value, if any, is replaced and totals adjusted.
    pub fn set_field_length(&mut self, doc_id: &DocId, field: &str, len: u32) {
        let is_new_doc = !self.field_lengths.contains_key(doc_id);
        let fields = self.field_lengths.entry(doc_id.clone()).or_default();
        let previous = fields.insert(field.to_string(), len);

        let totals = self.field_totals.entry(field.to_string()).or_insert((0, 0));
        if let Some(previous) = previous {
            totals.0 = totals.0.saturating_sub(previous as u64) + len as u64;
        } else {
            totals.0 += len as u64;
            totals.1 += 1;
        }

        if is_new_doc {
            self.total_documents += 1;
        }
    }

    /// Drop every counter tied to one document.
    pub fn remove_document(&mut self, doc_id: &DocId) {
        if let Some(fields) = self.field_lengths.remove(doc_id) {
            self.total_documents = self.total_documents.saturating_sub(1);
            for (field, len) in fields {
                if let Some(totals) = self.field_totals.get_mut(&field) {
                    totals.0 = totals.0.saturating_sub(len as u64);
                    totals.1 = totals.1.saturating_sub(1);
                }
            }
        }
    }

    pub fn increment_df(&mut self, local_term: &str) {
        *self.document_frequency.entry(local_term.to_string()).or_insert(0) += 1;
    }

    pub fn decrement_df(&mut self, local_term: &str) {
        if let Some(df) = self.document_frequency.get_mut(local_term) {
            *df = df.saturating_sub(1);
            if *df == 0 {
                self.document_frequency.remove(local_term);
            }
        }
    }

}

/// Stats for all indexes, guarded for concurrent readers.
pub struct CorpusStats {
    indexes: RwLock<HashMap<String, IndexStats>>,
}

impl CorpusStats {
    pub fn new() -> Self {
        CorpusStats {
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn total_documents(&self, index: &str) -> u64 {
        self.indexes.read().get(index).map(|s| s.total_documents).unwrap_or(0)
    }

    pub fn df(&self, index: &str, local_term: &str) -> u64 {
        self.indexes.read().get(index).map(|s| s.df(local_term)).unwrap_or(0)
    }

    pub fn field_length(&self, index: &str, doc_id: &DocId, field: &str) -> u32 {
        self.indexes.read().get(index).map(|s| s.field_length(doc_id, field)).unwrap_or(0)
    }

    pub fn avg_field_length(&self, index: &str, field: &str) -> f64 {
        self.indexes.read().get(index).map(|s| s.avg_field_length(field)).unwrap_or(0.0)
    }

    /// Mutate one index's stats under the write lock.
    pub fn update<F, R>(&self, index: &str, f: F) -> R
    where
        F: FnOnce(&mut IndexStats) -> R,
    {
        let mut indexes = self.indexes.write();
        f(indexes.entry(index.to_string()).or_default())
    }

    /// Replace one index's stats wholesale (load or recompute).
    pub fn replace(&self, index: &str, stats: IndexStats) {
        self.indexes.write().insert(index.to_string(), stats);
    }

    pub fn snapshot(&self, index: &str) -> Option<IndexStats> {
        self.indexes.read().get(index).cloned()
    }

    pub fn remove_index(&self, index: &str) {
        self.indexes.write().remove(index);
    }
}

impl Default for CorpusStats {
    fn default() -> Self {
        Self::new()
    }
}
