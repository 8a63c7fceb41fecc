use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Serialize, Deserialize};
use tokio::io::AsyncWriteExt;
use crate::core::error::Result;
use crate::core::types::{DocId, DocumentSource};
use crate::storage::layout::StorageLayout;

/// Stored document body plus write timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_id: DocId,
    pub source: DocumentSource,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
enum DocLogOp {
    Put(StoredDocument),
    Delete(DocId),
}

/// Document bodies keyed by `(index, doc_id)`: an in-memory map backed
/// by a checksummed append-only log per index, replayed on open.
pub struct DocumentStore {
    layout: Arc<StorageLayout>,
    indexes: tokio::sync::RwLock<HashMap<String, Arc<tokio::sync::Mutex<DocLog>>>>,
}

struct DocLog {
    docs: HashMap<DocId, StoredDocument>,
    file: tokio::fs::File,
}

impl DocLog {
    async fn open(layout: &StorageLayout, index: &str) -> Result<Self> {
        let path = layout.docs_log_path(index);
        tokio::fs::create_dir_all(layout.index_dir(index)).await?;

        let mut docs = HashMap::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => replay(&bytes, &mut docs),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(DocLog { docs, file })
    }

    async fn append(&mut self, op: &DocLogOp) -> Result<()> {
        let payload = bincode::serialize(op)?;
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Replay the log into the map; a corrupt or truncated tail is dropped
/// with a warning rather than failing the open.
fn replay(bytes: &[u8], docs: &mut HashMap<DocId, StoredDocument>) {
    let mut pos = 0;
    while pos + 8 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap());
        let start = pos + 8;
        let end = match start.checked_add(len) {
            Some(end) if end <= bytes.len() => end,
            _ => {
                warn!("document log truncated at byte {}", pos);
                return;
            }
        };

        let payload = &bytes[start..end];
        if crc32fast::hash(payload) != crc {
            warn!("document log checksum mismatch at byte {}", pos);
            return;
        }

        match bincode::deserialize::<DocLogOp>(payload) {
            Ok(DocLogOp::Put(doc)) => {
                docs.insert(doc.doc_id.clone(), doc);
            }
            Ok(DocLogOp::Delete(doc_id)) => {
                docs.remove(&doc_id);
            }
            Err(err) => {
                warn!("document log record unreadable at byte {}: {}", pos, err);
                return;
            }
        }

        pos = end;
    }
}

impl DocumentStore {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        DocumentStore {
            layout,
            indexes: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    async fn log(&self, index: &str) -> Result<Arc<tokio::sync::Mutex<DocLog>>> {
        if let Some(log) = self.indexes.read().await.get(index) {
            return Ok(log.clone());
        }

        let mut indexes = self.indexes.write().await;
        if let Some(log) = indexes.get(index) {
            return Ok(log.clone());
        }
        let log = Arc::new(tokio::sync::Mutex::new(DocLog::open(&self.layout, index).await?));
        indexes.insert(index.to_string(), log.clone());
        Ok(log)
    }

    /// Upsert a document body; returns the previous body if any.
    pub async fn put(&self, index: &str, doc_id: DocId, source: DocumentSource) -> Result<Option<StoredDocument>> {
        let log = self.log(index).await?;
        let mut log = log.lock().await;

        let doc = StoredDocument {
            doc_id: doc_id.clone(),
            source,
            updated_at: Utc::now(),
        };
        log.append(&DocLogOp::Put(doc.clone())).await?;
        Ok(log.docs.insert(doc_id, doc))
    }

    pub async fn get(&self, index: &str, doc_id: &DocId) -> Result<Option<StoredDocument>> {
        let log = self.log(index).await?;
        let log = log.lock().await;
        Ok(log.docs.get(doc_id).cloned())
    }

    /// Delete a document body; returns the removed body if any.
    pub async fn remove(&self, index: &str, doc_id: &DocId) -> Result<Option<StoredDocument>> {
        let log = self.log(index).await?;
        let mut log = log.lock().await;

        if !log.docs.contains_key(doc_id) {
            return Ok(None);
        }
        log.append(&DocLogOp::Delete(doc_id.clone())).await?;
        Ok(log.docs.remove(doc_id))
    }

    /// Doc ids in lexicographic order, bounded by `limit`.
    pub async fn list_ids(&self, index: &str, limit: usize) -> Result<Vec<DocId>> {
        let log = self.log(index).await?;
        let log = log.lock().await;

        let mut ids: Vec<DocId> = log.docs.keys().cloned().collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    pub async fn count(&self, index: &str) -> Result<u64> {
        let log = self.log(index).await?;
        let count = log.lock().await.docs.len() as u64;
        Ok(count)
    }

    /// Drop in-memory state for a deleted index; the caller removes the
    /// index directory.
    pub async fn forget_index(&self, index: &str) {
        self.indexes.write().await.remove(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(title: &str) -> DocumentSource {
        let mut map = DocumentSource::new();
        map.insert("title".into(), serde_json::Value::String(title.into()));
        map
    }

    #[tokio::test]
    async fn put_get_remove_cycle() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new(Arc::new(StorageLayout::new(dir.path()).unwrap()));

        assert!(store.put("idx", DocId::from("1"), source("hello")).await.unwrap().is_none());
        let previous = store.put("idx", DocId::from("1"), source("updated")).await.unwrap();
        assert!(previous.is_some());

        let doc = store.get("idx", &DocId::from("1")).await.unwrap().unwrap();
        assert_eq!(doc.source["title"], "updated");

        assert!(store.remove("idx", &DocId::from("1")).await.unwrap().is_some());
        assert!(store.get("idx", &DocId::from("1")).await.unwrap().is_none());
        assert!(store.remove("idx", &DocId::from("1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn log_replays_after_reopen() {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()).unwrap());
        {
            let store = DocumentStore::new(layout.clone());
            store.put("idx", DocId::from("1"), source("one")).await.unwrap();
            store.put("idx", DocId::from("2"), source("two")).await.unwrap();
            store.remove("idx", &DocId::from("1")).await.unwrap();
        }

        let store = DocumentStore::new(layout);
        assert_eq!(store.count("idx").await.unwrap(), 1);
        assert!(store.get("idx", &DocId::from("2")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_tail_is_dropped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()).unwrap());
        {
            let store = DocumentStore::new(layout.clone());
            store.put("idx", DocId::from("1"), source("keep")).await.unwrap();
        }

        // Append garbage that looks like a frame header.
        let path = layout.docs_log_path("idx");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[9, 0, 0, 0, 1, 2, 3, 4, 0xff, 0xff]);
        std::fs::write(&path, bytes).unwrap();

        let store = DocumentStore::new(layout);
        assert_eq!(store.count("idx").await.unwrap(), 1);
    }
}
