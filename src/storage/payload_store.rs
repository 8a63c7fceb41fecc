use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Serialize, Deserialize};
use crate::core::error::Result;
use crate::storage::layout::{atomic_write, StorageLayout};

/// Out-of-band persistence payload: the serialized job mirrored outside
/// the queue so a worker can recover it after queue-side loss.
#[derive(Serialize, Deserialize)]
struct PayloadRecord {
    created_at: DateTime<Utc>,
    bytes: Vec<u8>,
}

/// Durable key-value store for persistence job payloads, keyed by
/// `persistence_id`, with a retention TTL.
pub struct PayloadStore {
    layout: Arc<StorageLayout>,
    ttl: Duration,
}

impl PayloadStore {
    pub fn new(layout: Arc<StorageLayout>, ttl_secs: i64) -> Self {
        PayloadStore {
            layout,
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    pub async fn put(&self, persistence_id: &str, bytes: Vec<u8>) -> Result<()> {
        let record = PayloadRecord {
            created_at: Utc::now(),
            bytes,
        };
        let encoded = bincode::serialize(&record)?;
        atomic_write(&self.layout.payload_path(persistence_id), &encoded).await
    }

    /// Fetch a payload; expired entries read as absent.
    pub async fn get(&self, persistence_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.layout.payload_path(persistence_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let record: PayloadRecord = bincode::deserialize(&bytes)?;
        if Utc::now() - record.created_at > self.ttl {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(record.bytes))
    }

    pub async fn delete(&self, persistence_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.layout.payload_path(persistence_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Drop entries past the TTL. Called by the reaper tick.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.layout.payloads_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            match bincode::deserialize::<PayloadRecord>(&bytes) {
                Ok(record) if Utc::now() - record.created_at > self.ttl => {
                    if tokio::fs::remove_file(entry.path()).await.is_ok() {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("unreadable payload {:?}: {}", entry.path(), err),
            }
        }
        Ok(removed)
    }
}

/// Reference to a persistence job whose payload is mirrored in the
/// payload store. Lets the worker identify unprocessed batches even
/// when the queue lost the job itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJobRef {
    pub payload_key: String,    // persistence_id
    pub index_name: String,
    pub batch_id: String,
    pub bulk_op_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Pending-job tracker: one small ref file per outstanding job, named
/// so lexicographic order is creation order. `pop_oldest` is atomic.
pub struct PendingJobs {
    layout: Arc<StorageLayout>,
    lock: tokio::sync::Mutex<()>,
}

impl PendingJobs {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        PendingJobs {
            layout,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    fn file_name(job_ref: &PendingJobRef) -> String {
        format!(
            "{:020}_{}.ref",
            job_ref.created_at.timestamp_millis().max(0),
            job_ref.payload_key,
        )
    }

    pub async fn push(&self, job_ref: &PendingJobRef) -> Result<()> {
        let _guard = self.lock.lock().await;
        let bytes = bincode::serialize(job_ref)?;
        atomic_write(&self.layout.pending_path(&Self::file_name(job_ref)), &bytes).await
    }

    pub async fn acknowledge(&self, payload_key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let suffix = format!("_{}.ref", payload_key);

        let mut entries = tokio::fs::read_dir(&self.layout.pending_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) {
                    let _ = tokio::fs::remove_file(entry.path()).await;
                }
            }
        }
        Ok(())
    }

    /// Atomically remove and return the oldest pending ref.
    pub async fn pop_oldest(&self) -> Result<Option<PendingJobRef>> {
        let _guard = self.lock.lock().await;

        let mut names: Vec<String> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.layout.pending_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".ref") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        for name in names {
            let path = self.layout.pending_path(&name);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            tokio::fs::remove_file(&path).await?;
            match bincode::deserialize(&bytes) {
                Ok(job_ref) => return Ok(Some(job_ref)),
                Err(err) => {
                    warn!("dropping unreadable pending ref {}: {}", name, err);
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Remove and return every ref created before `cutoff`; the reaper
    /// re-enqueues these from the payload store.
    pub async fn take_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<PendingJobRef>> {
        let mut taken = Vec::new();
        loop {
            // Peek via pop; push back anything too young.
            let job_ref = match self.pop_oldest().await? {
                Some(job_ref) => job_ref,
                None => break,
            };
            if job_ref.created_at < cutoff {
                taken.push(job_ref);
            } else {
                self.push(&job_ref).await?;
                break;
            }
        }
        Ok(taken)
    }
}
