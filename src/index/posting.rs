use std::collections::BTreeMap;
use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use crate::core::types::DocId;

/// One document's presence under one term key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingEntry {
    pub doc_id: DocId,
    pub frequency: u32,         // Occurrences within the field
    pub positions: Vec<u32>,    // Ordered token offsets, for phrase checks
    pub metadata: Option<HashMap<String, String>>,
}

impl PostingEntry {
    pub fn new(doc_id: DocId, positions: Vec<u32>) -> Self {
        PostingEntry {
            doc_id,
            frequency: positions.len() as u32,
            positions,
            metadata: None,
        }
    }
}

/// Posting list for one term key: `doc_id -> PostingEntry` with unique
/// doc ids. Iteration is in docId order, which keeps tie-breaking
/// reproducible and chunk boundaries deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingList {
    entries: BTreeMap<DocId, PostingEntry>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList {
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PostingEntry>) -> Self {
        let mut list = PostingList::new();
        for entry in entries {
            list.upsert(entry);
        }
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, doc_id: &DocId) -> Option<&PostingEntry> {
        self.entries.get(doc_id)
    }

    pub fn contains(&self, doc_id: &DocId) -> bool {
        self.entries.contains_key(doc_id)
    }

    pub fn upsert(&mut self, entry: PostingEntry) {
        self.entries.insert(entry.doc_id.clone(), entry);
    }

    pub fn remove(&mut self, doc_id: &DocId) -> Option<PostingEntry> {
        self.entries.remove(doc_id)
    }

    /// Streaming iteration in docId order; entries are never copied.
    pub fn entries(&self) -> impl Iterator<Item = &PostingEntry> {
        self.entries.values()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &DocId> {
        self.entries.keys()
    }

    /// Keep only the first `cap` entries in docId order. Used when a
    /// committed list is trimmed back to the in-memory bound.
    pub fn truncate(&mut self, cap: usize) {
        if self.entries.len() <= cap {
            return;
        }
        let keep: Vec<DocId> = self.entries.keys().take(cap).cloned().collect();
        let mut trimmed = BTreeMap::new();
        for doc_id in keep {
            if let Some(entry) = self.entries.remove(&doc_id) {
                trimmed.insert(doc_id, entry);
            }
        }
        self.entries = trimmed;
    }

    /// Documents present in both lists; entries taken from `self`.
    pub fn intersect(&self, other: &PostingList) -> PostingList {
        PostingList {
            entries: self.entries
                .iter()
                .filter(|(doc_id, _)| other.contains(doc_id))
                .map(|(doc_id, entry)| (doc_id.clone(), entry.clone()))
                .collect(),
        }
    }

    /// Documents present in either list; `other` wins on collisions.
    pub fn union(&self, other: &PostingList) -> PostingList {
        let mut entries = self.entries.clone();
        for (doc_id, entry) in &other.entries {
            entries.insert(doc_id.clone(), entry.clone());
        }
        PostingList { entries }
    }

    /// Documents in `self` but not in `other`.
    pub fn subtract(&self, other: &PostingList) -> PostingList {
        PostingList {
            entries: self.entries
                .iter()
                .filter(|(doc_id, _)| !other.contains(doc_id))
                .map(|(doc_id, entry)| (doc_id.clone(), entry.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, positions: Vec<u32>) -> PostingEntry {
        PostingEntry::new(DocId::from(id), positions)
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut list = PostingList::new();
        list.upsert(entry("1", vec![0]));
        list.upsert(entry("1", vec![0, 4]));

        assert_eq!(list.len(), 1);
        assert_eq!(list.get(&DocId::from("1")).unwrap().frequency, 2);
    }

    #[test]
    fn iteration_is_in_doc_id_order() {
        let list = PostingList::from_entries(vec![
            entry("b", vec![0]),
            entry("a", vec![0]),
            entry("c", vec![0]),
        ]);
        let ids: Vec<&str> = list.doc_ids().map(|d| d.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn set_algebra_by_doc_id() {
        let left = PostingList::from_entries(vec![entry("1", vec![0]), entry("2", vec![0])]);
        let right = PostingList::from_entries(vec![entry("2", vec![1]), entry("3", vec![1])]);

        let and_list = left.intersect(&right);
        let and: Vec<&str> = and_list.doc_ids().map(|d| d.as_str()).collect::<Vec<_>>();
        assert_eq!(and, vec!["2"]);

        let or_list = left.union(&right);
        let or: Vec<&str> = or_list.doc_ids().map(|d| d.as_str()).collect::<Vec<_>>();
        assert_eq!(or, vec!["1", "2", "3"]);

        let not_list = left.subtract(&right);
        let not: Vec<&str> = not_list.doc_ids().map(|d| d.as_str()).collect::<Vec<_>>();
        assert_eq!(not, vec!["1"]);
    }

    #[test]
    fn truncate_keeps_lowest_doc_ids() {
        let mut list = PostingList::from_entries(vec![
            entry("a", vec![0]),
            entry("b", vec![0]),
            entry("c", vec![0]),
        ]);
        list.truncate(2);
        let ids: Vec<&str> = list.doc_ids().map(|d| d.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
