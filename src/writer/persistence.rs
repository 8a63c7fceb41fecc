use std::collections::HashMap;
use std::sync::Arc;
use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::TermKey;
use crate::index::dictionary::TermDictionary;
use crate::index::posting::PostingList;
use crate::index::stats::CorpusStats;
use crate::storage::chunk_store::ChunkedPostingStore;
use crate::storage::payload_store::{PayloadStore, PendingJobRef, PendingJobs};
use crate::storage::stats_store::StatsStore;
use crate::writer::job::{PersistenceJob, WorkerMessage};

/// Drains persistence jobs: merges each job's dirty-term postings into
/// the chunked store with at-least-once semantics.
pub struct PersistenceWorker {
    pub dictionary: Arc<TermDictionary>,
    pub store: Arc<ChunkedPostingStore>,
    pub payloads: Arc<PayloadStore>,
    pub pending: Arc<PendingJobs>,
    pub stats: Arc<CorpusStats>,
    pub stats_store: Arc<StatsStore>,
    pub retry_limit: u32,
    pub retry_backoff_ms: u64,
}

impl PersistenceWorker {
    pub fn spawn(self, rx: mpsc::Receiver<WorkerMessage>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: mpsc::Receiver<WorkerMessage>) {
        info!("persistence worker started");
        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Job(job) => self.process_with_retries(job).await,
                WorkerMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        info!("persistence worker stopped");
    }

    /// Transient failures retry with bounded backoff; a permanently
    /// failing job is reported and dropped so the queue keeps moving
    /// (its pending ref remains for the reaper).
    async fn process_with_retries(&self, job: PersistenceJob) {
        let mut attempt = 0;
        loop {
            match self.process_job(&job).await {
                Ok(()) => {
                    debug!(
                        "committed batch {} for '{}' ({} terms)",
                        job.batch_id, job.index_name, job.dirty_terms.len(),
                    );
                    return;
                }
                Err(err) if err.is_transient() && attempt < self.retry_limit => {
                    attempt += 1;
                    warn!(
                        "batch {} attempt {} failed: {}; retrying",
                        job.batch_id, attempt, err,
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
                Err(err) => {
                    error!("batch {} for '{}' failed permanently: {}", job.batch_id, job.index_name, err);
                    return;
                }
            }
        }
    }

    /// Commit one job: per-term read-merge-rechunk-write, then ack.
    /// The job is successful only after every term commits.
    pub async fn process_job(&self, job: &PersistenceJob) -> Result<()> {
        let postings = self.resolve_postings(job).await?;

        for key in &job.dirty_terms {
            let local = key.local_key();
            let mut merged = self.store
                .read_merged(&key.index, &local)
                .await?
                .unwrap_or_default();

            for doc_id in &job.deleted_docs {
                merged.remove(doc_id);
            }

            if let Some(snapshot) = postings.get(key) {
                // Upsert per docId; last write wins.
                for entry in snapshot.entries() {
                    merged.upsert(entry.clone());
                }
            }

            self.store.write_postings(&key.index, &local, &merged).await?;
        }

        self.acknowledge(job).await
    }

    /// Payload resolution order: the job itself, the live dictionary,
    /// then the out-of-band payload store (the queue may have lost the
    /// payload; see the pending-job reaper).
    async fn resolve_postings(&self, job: &PersistenceJob) -> Result<HashMap<TermKey, PostingList>> {
        if let Some(postings) = &job.term_postings {
            return Ok(postings.clone());
        }

        let from_dictionary = self.dictionary.snapshot_postings(&job.dirty_terms);
        if !from_dictionary.is_empty() || job.dirty_terms.is_empty() {
            return Ok(from_dictionary);
        }

        match self.payloads.get(&job.persistence_id).await? {
            Some(bytes) => {
                let stored: PersistenceJob = bincode::deserialize(&bytes)?;
                Ok(stored.term_postings.unwrap_or_default())
            }
            None => Err(Error::new(
                ErrorKind::InternalInvariant,
                format!("no payload for batch {} ({})", job.batch_id, job.persistence_id),
            )),
        }
    }

    async fn acknowledge(&self, job: &PersistenceJob) -> Result<()> {
        self.dictionary.acknowledge_commit(&job.dirty_terms, job.batch_seq);
        self.payloads.delete(&job.persistence_id).await?;
        self.pending.acknowledge(&job.persistence_id).await?;

        // Committed stats snapshot for the next startup.
        if let Some(stats) = self.stats.snapshot(&job.index_name) {
            self.stats_store.save(&job.index_name, &stats).await?;
        }
        Ok(())
    }
}

/// Periodic recovery pass: drops expired payloads and re-enqueues
/// pending refs whose jobs were never acknowledged.
pub async fn reap(
    payloads: &PayloadStore,
    pending: &PendingJobs,
    queue: &mpsc::Sender<WorkerMessage>,
    requeue_after_secs: i64,
) -> Result<usize> {
    payloads.sweep_expired().await?;

    let cutoff = Utc::now() - Duration::seconds(requeue_after_secs.max(1));
    let stale = pending.take_older_than(cutoff).await?;
    let mut requeued = 0;

    for job_ref in stale {
        match payloads.get(&job_ref.payload_key).await? {
            Some(bytes) => {
                let job: PersistenceJob = bincode::deserialize(&bytes)?;
                // Re-register the ref so a second crash still recovers.
                pending.push(&refresh_ref(&job_ref)).await?;
                if queue.send(WorkerMessage::Job(job)).await.is_err() {
                    warn!("worker queue closed; dropping requeued batch {}", job_ref.batch_id);
                    return Ok(requeued);
                }
                info!("requeued unacknowledged batch {}", job_ref.batch_id);
                requeued += 1;
            }
            None => {
                // Payload expired or was acked concurrently; the ref
                // is already gone, nothing to redo.
                debug!("pending ref {} had no payload", job_ref.payload_key);
            }
        }
    }
    Ok(requeued)
}

fn refresh_ref(job_ref: &PendingJobRef) -> PendingJobRef {
    PendingJobRef {
        created_at: Utc::now(),
        ..job_ref.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocId;
    use crate::index::posting::PostingEntry;
    use crate::storage::layout::StorageLayout;
    use tempfile::TempDir;

    fn worker(dir: &TempDir) -> (PersistenceWorker, Arc<ChunkedPostingStore>, Arc<TermDictionary>) {
        let layout = Arc::new(StorageLayout::new(dir.path()).unwrap());
        let dictionary = Arc::new(TermDictionary::new(10_000, 0.75, 4096));
        let store = Arc::new(ChunkedPostingStore::new(layout.clone(), 5000));
        let worker = PersistenceWorker {
            dictionary: dictionary.clone(),
            store: store.clone(),
            payloads: Arc::new(PayloadStore::new(layout.clone(), 3600)),
            pending: Arc::new(PendingJobs::new(layout.clone())),
            stats: Arc::new(CorpusStats::new()),
            stats_store: Arc::new(StatsStore::new(layout)),
            retry_limit: 2,
            retry_backoff_ms: 1,
        };
        (worker, store, dictionary)
    }

    fn job_with_snapshot(ids: &[&str]) -> PersistenceJob {
        let key = TermKey::new("idx", "title", "hello");
        let list = PostingList::from_entries(
            ids.iter().map(|id| PostingEntry::new(DocId::from(*id), vec![0])),
        );
        let mut job = PersistenceJob::new("idx".into(), 1, None);
        job.dirty_terms = vec![key.clone()];
        job.term_postings = Some(HashMap::from([(key, list)]));
        job
    }

    #[tokio::test]
    async fn job_merges_into_existing_chunks() {
        let dir = TempDir::new().unwrap();
        let (worker, store, _) = worker(&dir);

        worker.process_job(&job_with_snapshot(&["1"])).await.unwrap();
        worker.process_job(&job_with_snapshot(&["2"])).await.unwrap();

        let merged = store.read_merged("idx", "title:hello").await.unwrap().unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn redelivered_job_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (worker, store, _) = worker(&dir);
        let job = job_with_snapshot(&["1", "2"]);

        worker.process_job(&job).await.unwrap();
        worker.process_job(&job).await.unwrap();

        let merged = store.read_merged("idx", "title:hello").await.unwrap().unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn deleted_docs_are_stripped_from_dirty_terms() {
        let dir = TempDir::new().unwrap();
        let (worker, store, _) = worker(&dir);
        worker.process_job(&job_with_snapshot(&["1", "2"])).await.unwrap();

        let key = TermKey::new("idx", "title", "hello");
        let mut job = PersistenceJob::new("idx".into(), 2, None);
        job.dirty_terms = vec![key];
        job.term_postings = Some(HashMap::new());
        job.deleted_docs = vec![DocId::from("1")];
        worker.process_job(&job).await.unwrap();

        let merged = store.read_merged("idx", "title:hello").await.unwrap().unwrap();
        assert_eq!(merged.len(), 1);
        assert!(merged.contains(&DocId::from("2")));
    }

    #[tokio::test]
    async fn payload_store_backfills_a_lost_payload() {
        let dir = TempDir::new().unwrap();
        let (worker, store, _) = worker(&dir);

        let full = job_with_snapshot(&["1"]);
        worker.payloads
            .put(&full.persistence_id, bincode::serialize(&full).unwrap())
            .await
            .unwrap();

        // The queue delivered the job with an empty payload.
        let mut hollow = full.clone();
        hollow.term_postings = None;
        worker.process_job(&hollow).await.unwrap();

        let merged = store.read_merged("idx", "title:hello").await.unwrap().unwrap();
        assert_eq!(merged.len(), 1);
        // Ack removed the out-of-band payload.
        assert!(worker.payloads.get(&full.persistence_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_clears_dirty_marks() {
        let dir = TempDir::new().unwrap();
        let (worker, _, dictionary) = worker(&dir);

        let seq = dictionary.begin_batch();
        let key = TermKey::new("idx", "title", "hello");
        dictionary.upsert_entry(&key, PostingEntry::new(DocId::from("1"), vec![0]));

        let mut job = PersistenceJob::new("idx".into(), seq, None);
        job.dirty_terms = vec![key];
        worker.process_job(&job).await.unwrap();

        assert_eq!(dictionary.dirty_len(), 0);
    }
}
