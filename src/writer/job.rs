use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::core::types::{DocId, TermKey};
use crate::index::posting::PostingList;

/// Unit of persistence work produced by an indexing batch: the dirty
/// term set plus the postings to commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceJob {
    pub index_name: String,
    pub batch_id: String,
    pub bulk_op_id: Option<String>,
    /// Dictionary checkpoint: dirty marks at or before this sequence
    /// are cleared when the job commits.
    pub batch_seq: u64,
    pub dirty_terms: Vec<TermKey>,
    /// Snapshot of the dirty terms' in-memory postings. Absent when
    /// the producer opted out; the worker then falls back to the
    /// dictionary, then to the out-of-band payload store.
    pub term_postings: Option<HashMap<TermKey, PostingList>>,
    /// Documents deleted in this batch; stripped from every dirty
    /// term's chunk set during the merge.
    pub deleted_docs: Vec<DocId>,
    pub persistence_id: String,
    pub indexed_at: DateTime<Utc>,
}

impl PersistenceJob {
    pub fn new(index_name: String, batch_seq: u64, bulk_op_id: Option<String>) -> Self {
        PersistenceJob {
            index_name,
            batch_id: Uuid::new_v4().to_string(),
            bulk_op_id,
            batch_seq,
            dirty_terms: Vec::new(),
            term_postings: None,
            deleted_docs: Vec::new(),
            persistence_id: Uuid::new_v4().to_string(),
            indexed_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_terms.is_empty() && self.deleted_docs.is_empty()
    }
}

/// Message consumed by the persistence worker.
pub enum WorkerMessage {
    Job(PersistenceJob),
    /// Barrier: acknowledged once every previously enqueued job has
    /// been processed.
    Flush(tokio::sync::oneshot::Sender<()>),
}
