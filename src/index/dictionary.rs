use std::collections::HashMap;
use log::debug;
use lru::LruCache;
use parking_lot::RwLock;
use crate::core::types::TermKey;
use crate::index::posting::{PostingEntry, PostingList};

/// In-memory, index-aware term dictionary with a bounded footprint.
///
/// Mutations are serialized behind the lock; readers get point-in-time
/// clones. Entries may be evicted at any time and are re-derivable from
/// the chunked store, except dirty entries (mutated since the last
/// acknowledged commit), which stay pinned until the persistence
/// pipeline acknowledges them.
pub struct TermDictionary {
    inner: RwLock<DictionaryInner>,
    max_entries: usize,
    eviction_threshold: f64,
    max_postings_per_term: usize,
}

struct DictionaryInner {
    cache: LruCache<TermKey, PostingList>,
    dirty: HashMap<TermKey, u64>,   // term -> batch sequence of last mutation
    batch_seq: u64,
}

impl TermDictionary {
    pub fn new(max_entries: usize, eviction_threshold: f64, max_postings_per_term: usize) -> Self {
        TermDictionary {
            inner: RwLock::new(DictionaryInner {
                cache: LruCache::unbounded(),
                dirty: HashMap::new(),
                batch_seq: 0,
            }),
            max_entries: max_entries.max(1),
            eviction_threshold: eviction_threshold.clamp(0.01, 1.0),
            max_postings_per_term,
        }
    }

    /// Start a new indexing batch; dirty marks created from now on carry
    /// the returned checkpoint.
    pub fn begin_batch(&self) -> u64 {
        let mut inner = self.inner.write();
        inner.batch_seq += 1;
        inner.batch_seq
    }

    /// Term keys cached for one index.
    pub fn get_terms(&self, index: &str) -> Vec<TermKey> {
        let inner = self.inner.read();
        inner.cache
            .iter()
            .filter(|(key, _)| key.index == index)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Point-in-time copy of a cached posting list; promotes the entry.
    pub fn get_posting_list(&self, key: &TermKey) -> Option<PostingList> {
        let mut inner = self.inner.write();
        inner.cache.get(key).cloned()
    }

    /// Adds or updates one posting; creates the list if missing and
    /// marks the term dirty under the current batch.
    pub fn upsert_entry(&self, key: &TermKey, entry: PostingEntry) {
        let mut inner = self.inner.write();
        let seq = inner.batch_seq;

        if let Some(list) = inner.cache.get_mut(key) {
            list.upsert(entry);
        } else {
            let mut list = PostingList::new();
            list.upsert(entry);
            inner.cache.put(key.clone(), list);
        }
        inner.dirty.insert(key.clone(), seq);
    }

    /// Removes one document's posting; marks the term dirty even when
    /// the list is not cached, so the store copy gets rewritten.
    pub fn remove_entry(&self, key: &TermKey, doc_id: &crate::core::types::DocId) {
        let mut inner = self.inner.write();
        let seq = inner.batch_seq;

        if let Some(list) = inner.cache.get_mut(key) {
            list.remove(doc_id);
        }
        inner.dirty.insert(key.clone(), seq);
    }

    /// Cache a committed list loaded from the store. Clean by
    /// definition; trimmed to the per-list bound.
    pub fn insert_committed(&self, key: &TermKey, mut list: PostingList) {
        let mut inner = self.inner.write();
        if inner.dirty.contains_key(key) {
            // Never overwrite uncommitted updates with store state.
            return;
        }
        list.truncate(self.max_postings_per_term);
        inner.cache.put(key.clone(), list);
    }

    /// Term keys mutated since the given checkpoint.
    pub fn dirty_terms_since(&self, checkpoint: u64) -> Vec<TermKey> {
        let inner = self.inner.read();
        inner.dirty
            .iter()
            .filter(|&(_, &seq)| seq > checkpoint)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Snapshot the cached postings for a set of terms without
    /// promoting them.
    pub fn snapshot_postings(&self, keys: &[TermKey]) -> HashMap<TermKey, PostingList> {
        let inner = self.inner.read();
        keys.iter()
            .filter_map(|key| inner.cache.peek(key).map(|list| (key.clone(), list.clone())))
            .collect()
    }

    /// Commit acknowledgement: clear dirty marks stamped at or before
    /// `upto_seq` and trim the now-clean lists back to the cache bound.
    pub fn acknowledge_commit(&self, keys: &[TermKey], upto_seq: u64) {
        let mut inner = self.inner.write();
        for key in keys {
            let committed = match inner.dirty.get(key) {
                Some(&seq) if seq <= upto_seq => true,
                _ => false,
            };
            if committed {
                inner.dirty.remove(key);
                if let Some(list) = inner.cache.get_mut(key) {
                    list.truncate(self.max_postings_per_term);
                }
            }
        }
    }

    /// Drop all cached state for one index.
    pub fn clear_index(&self, index: &str) {
        let mut inner = self.inner.write();
        let keys: Vec<TermKey> = inner.cache
            .iter()
            .filter(|(key, _)| key.index == index)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            inner.cache.pop(&key);
        }
        inner.dirty.retain(|key, _| key.index != index);
    }

    /// Approximate LRU eviction down to `cap * eviction_threshold`.
    /// Dirty terms are pinned and survive regardless of age.
    pub fn evict(&self) -> usize {
        let mut inner = self.inner.write();
        if inner.cache.len() < self.max_entries {
            return 0;
        }

        let target = (self.max_entries as f64 * self.eviction_threshold) as usize;
        let excess = inner.cache.len().saturating_sub(target);

        // iter() yields most-recently-used first; walk from the back.
        let victims: Vec<TermKey> = inner.cache
            .iter()
            .rev()
            .filter(|(key, _)| !inner.dirty.contains_key(*key))
            .map(|(key, _)| key.clone())
            .take(excess)
            .collect();

        let evicted = victims.len();
        for key in victims {
            inner.cache.pop(&key);
        }

        if evicted > 0 {
            debug!("evicted {} terms, {} cached", evicted, inner.cache.len());
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.read().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().cache.len() == 0
    }

    pub fn dirty_len(&self) -> usize {
        self.inner.read().dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocId;

    fn key(token: &str) -> TermKey {
        TermKey::new("idx", "title", token)
    }

    fn entry(id: &str) -> PostingEntry {
        PostingEntry::new(DocId::from(id), vec![0])
    }

    #[test]
    fn upsert_creates_and_updates_lists() {
        let dict = TermDictionary::new(100, 0.75, 100);
        dict.upsert_entry(&key("hello"), entry("1"));
        dict.upsert_entry(&key("hello"), entry("2"));

        let list = dict.get_posting_list(&key("hello")).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn dirty_terms_track_batch_checkpoints() {
        let dict = TermDictionary::new(100, 0.75, 100);
        let first = dict.begin_batch();
        dict.upsert_entry(&key("a"), entry("1"));

        let second = dict.begin_batch();
        dict.upsert_entry(&key("b"), entry("1"));

        assert_eq!(dict.dirty_terms_since(first).len(), 1);
        assert_eq!(dict.dirty_terms_since(0).len(), 2);

        dict.acknowledge_commit(&[key("a"), key("b")], second);
        assert_eq!(dict.dirty_len(), 0);
    }

    #[test]
    fn eviction_spares_dirty_terms() {
        let dict = TermDictionary::new(4, 0.5, 100);
        dict.begin_batch();
        dict.upsert_entry(&key("pinned"), entry("1"));
        dict.acknowledge_commit(&[key("pinned")], u64::MAX);

        dict.upsert_entry(&key("dirty"), entry("1"));
        for token in ["c1", "c2", "c3"] {
            dict.insert_committed(&key(token), PostingList::from_entries(vec![entry("1")]));
        }

        assert!(dict.len() >= 4);
        dict.evict();

        assert!(dict.len() <= 2);
        assert!(dict.get_posting_list(&key("dirty")).is_some());
    }

    #[test]
    fn clear_index_only_touches_that_index() {
        let dict = TermDictionary::new(100, 0.75, 100);
        dict.upsert_entry(&TermKey::new("a", "f", "t"), entry("1"));
        dict.upsert_entry(&TermKey::new("b", "f", "t"), entry("1"));

        dict.clear_index("a");
        assert!(dict.get_posting_list(&TermKey::new("a", "f", "t")).is_none());
        assert!(dict.get_posting_list(&TermKey::new("b", "f", "t")).is_some());
    }

    #[test]
    fn insert_committed_never_clobbers_dirty_state() {
        let dict = TermDictionary::new(100, 0.75, 100);
        dict.begin_batch();
        dict.upsert_entry(&key("hot"), entry("1"));

        dict.insert_committed(&key("hot"), PostingList::new());
        assert_eq!(dict.get_posting_list(&key("hot")).unwrap().len(), 1);
    }
}
