use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Deserialize};
use crate::compression::delta;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::TermKey;
use crate::index::posting::{PostingEntry, PostingList};
use crate::storage::layout::{atomic_write, StorageLayout};

const CHUNK_FILE_MAGIC: u32 = 0x4644_5850;

/// Persistent slice of a posting list. The logical list for a term is
/// the concatenation of its chunks by `chunk_index`.
#[derive(Debug, Clone)]
pub struct PostingChunk {
    pub index_name: String,
    pub term: String,           // local `field:token` key
    pub chunk_index: u32,
    pub postings: Vec<PostingEntry>,
    pub document_count: u64,
    pub last_updated: DateTime<Utc>,
}

/// On-disk posting record: positions stored delta + vbyte encoded.
#[derive(Serialize, Deserialize)]
struct EncodedPosting {
    doc_id: String,
    frequency: u32,
    positions: Vec<u8>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize)]
struct ChunkRecord {
    chunk_index: u32,
    document_count: u64,
    last_updated: DateTime<Utc>,
    postings: Vec<EncodedPosting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermCatalogEntry {
    pub file_stem: String,
    pub chunk_count: u32,
    pub doc_count: u64,
    pub last_updated: DateTime<Utc>,
}

/// Per-index catalog: term -> chunk file, plus a token-keyed secondary
/// index so prefix lookups never scan the full term set.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TermCatalog {
    terms: BTreeMap<String, TermCatalogEntry>,
    token_index: BTreeMap<String, BTreeSet<String>>,  // token -> fields
    used_stems: BTreeSet<String>,
}

impl TermCatalog {
    fn allocate_stem(&mut self, local_term: &str) -> String {
        let base = format!("{:08x}", crc32fast::hash(local_term.as_bytes()));
        let mut candidate = base.clone();
        let mut n = 0;
        while self.used_stems.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        self.used_stems.insert(candidate.clone());
        candidate
    }

    fn record_term(&mut self, local_term: &str, chunk_count: u32, doc_count: u64) -> String {
        let stem = match self.terms.get(local_term) {
            Some(entry) => entry.file_stem.clone(),
            None => self.allocate_stem(local_term),
        };
        self.terms.insert(local_term.to_string(), TermCatalogEntry {
            file_stem: stem.clone(),
            chunk_count,
            doc_count,
            last_updated: Utc::now(),
        });
        if let Some((field, token)) = local_term.split_once(':') {
            self.token_index.entry(token.to_string()).or_default().insert(field.to_string());
        }
        stem
    }

    fn remove_term(&mut self, local_term: &str) -> Option<TermCatalogEntry> {
        let entry = self.terms.remove(local_term)?;
        self.used_stems.remove(&entry.file_stem);
        if let Some((field, token)) = local_term.split_once(':') {
            if let Some(fields) = self.token_index.get_mut(token) {
                fields.remove(field);
                if fields.is_empty() {
                    self.token_index.remove(token);
                }
            }
        }
        Some(entry)
    }
}

/// Durable posting storage partitioned by `(index, term, chunk_index)`.
///
/// Writes are atomic per term: chunk files are replaced via temp-file
/// rename, so a concurrent reader sees the full pre-image or the full
/// post-image, never a partial chunk set.
pub struct ChunkedPostingStore {
    layout: Arc<StorageLayout>,
    max_postings_per_chunk: usize,
    catalogs: RwLock<HashMap<String, Arc<tokio::sync::RwLock<TermCatalog>>>>,
    term_locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl ChunkedPostingStore {
    pub fn new(layout: Arc<StorageLayout>, max_postings_per_chunk: usize) -> Self {
        ChunkedPostingStore {
            layout,
            max_postings_per_chunk: max_postings_per_chunk.max(1),
            catalogs: RwLock::new(HashMap::new()),
            term_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn catalog(&self, index: &str) -> Result<Arc<tokio::sync::RwLock<TermCatalog>>> {
        if let Some(catalog) = self.catalogs.read().get(index) {
            return Ok(catalog.clone());
        }

        let path = self.layout.catalog_path(index);
        let catalog = match tokio::fs::read(&path).await {
            Ok(bytes) => bincode::deserialize(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => TermCatalog::default(),
            Err(err) => return Err(err.into()),
        };

        let mut catalogs = self.catalogs.write();
        let entry = catalogs
            .entry(index.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::RwLock::new(catalog)));
        Ok(entry.clone())
    }

    fn term_lock(&self, index: &str, local_term: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.term_locks.lock();
        locks
            .entry((index.to_string(), local_term.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn persist_catalog(&self, index: &str, catalog: &TermCatalog) -> Result<()> {
        let bytes = bincode::serialize(catalog)?;
        tokio::fs::create_dir_all(self.layout.terms_dir(index)).await?;
        atomic_write(&self.layout.catalog_path(index), &bytes).await
    }

    /// Ordered chunk sequence for one term; empty when the term is not
    /// persisted.
    pub async fn read_all_chunks(&self, index: &str, local_term: &str) -> Result<Vec<PostingChunk>> {
        let catalog = self.catalog(index).await?;
        let stem = {
            let catalog = catalog.read().await;
            match catalog.terms.get(local_term) {
                Some(entry) => entry.file_stem.clone(),
                None => return Ok(Vec::new()),
            }
        };

        let path = self.layout.term_chunk_path(index, &stem);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let records = decode_chunk_file(&bytes)
            .map_err(|err| Error::invariant(format!("chunk file for '{}:{}': {}", index, local_term, err)))?;

        let mut chunks = Vec::with_capacity(records.len());
        for record in records {
            if record.document_count != record.postings.len() as u64 {
                return Err(Error::invariant(format!(
                    "chunk {} of '{}:{}' claims {} postings, holds {}",
                    record.chunk_index, index, local_term,
                    record.document_count, record.postings.len(),
                )));
            }
            let mut postings = Vec::with_capacity(record.postings.len());
            for encoded in record.postings {
                postings.push(PostingEntry {
                    doc_id: encoded.doc_id.into(),
                    frequency: encoded.frequency,
                    positions: delta::decode_sorted(&encoded.positions)?,
                    metadata: encoded.metadata,
                });
            }
            chunks.push(PostingChunk {
                index_name: index.to_string(),
                term: local_term.to_string(),
                chunk_index: record.chunk_index,
                document_count: record.document_count,
                last_updated: record.last_updated,
                postings,
            });
        }

        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    /// The logical posting list for a term, merged across its chunks.
    pub async fn read_merged(&self, index: &str, local_term: &str) -> Result<Option<PostingList>> {
        let chunks = self.read_all_chunks(index, local_term).await?;
        if chunks.is_empty() {
            return Ok(None);
        }

        let mut list = PostingList::new();
        for chunk in chunks {
            for entry in chunk.postings {
                list.upsert(entry);
            }
        }
        Ok(Some(list))
    }

    /// Replace the complete chunk set for a term. Postings are
    /// partitioned into chunks of at most `max_postings_per_chunk` in
    /// docId order, which keeps chunk boundaries deterministic. An
    /// empty list deletes the term.
    pub async fn write_postings(&self, index: &str, local_term: &str, list: &PostingList) -> Result<()> {
        let lock = self.term_lock(index, local_term);
        let _guard = lock.lock().await;

        if list.is_empty() {
            return self.delete_by_term_locked(index, local_term).await;
        }

        let now = Utc::now();
        let mut records = Vec::new();
        let mut current: Vec<EncodedPosting> = Vec::new();

        for entry in list.entries() {
            current.push(EncodedPosting {
                doc_id: entry.doc_id.as_str().to_string(),
                frequency: entry.frequency,
                positions: delta::encode_sorted(&entry.positions),
                metadata: entry.metadata.clone(),
            });
            if current.len() == self.max_postings_per_chunk {
                records.push(ChunkRecord {
                    chunk_index: records.len() as u32,
                    document_count: current.len() as u64,
                    last_updated: now,
                    postings: std::mem::take(&mut current),
                });
            }
        }
        if !current.is_empty() {
            records.push(ChunkRecord {
                chunk_index: records.len() as u32,
                document_count: current.len() as u64,
                last_updated: now,
                postings: current,
            });
        }

        let chunk_count = records.len() as u32;
        let bytes = encode_chunk_file(&records)?;

        let catalog = self.catalog(index).await?;
        let mut catalog = catalog.write().await;
        let stem = catalog.record_term(local_term, chunk_count, list.len() as u64);

        tokio::fs::create_dir_all(self.layout.terms_dir(index)).await?;
        atomic_write(&self.layout.term_chunk_path(index, &stem), &bytes).await?;
        self.persist_catalog(index, &catalog).await
    }

    async fn delete_by_term_locked(&self, index: &str, local_term: &str) -> Result<()> {
        let catalog = self.catalog(index).await?;
        let mut catalog = catalog.write().await;
        if let Some(entry) = catalog.remove_term(local_term) {
            let path = self.layout.term_chunk_path(index, &entry.file_stem);
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
            self.persist_catalog(index, &catalog).await?;
        }
        Ok(())
    }

    pub async fn delete_by_term(&self, index: &str, local_term: &str) -> Result<()> {
        let lock = self.term_lock(index, local_term);
        let _guard = lock.lock().await;
        self.delete_by_term_locked(index, local_term).await
    }

    /// Distinct term keys persisted for one index.
    pub async fn find_terms_by_index(&self, index: &str) -> Result<Vec<TermKey>> {
        let catalog = self.catalog(index).await?;
        let catalog = catalog.read().await;
        catalog.terms
            .keys()
            .map(|local| TermKey::parse_local(index, local))
            .collect()
    }

    /// Term keys whose token starts with `prefix`, resolved through the
    /// token index rather than a full term scan.
    pub async fn find_terms_by_prefix(&self, index: &str, prefix: &str) -> Result<Vec<TermKey>> {
        let catalog = self.catalog(index).await?;
        let catalog = catalog.read().await;

        let mut keys = Vec::new();
        for (token, fields) in catalog.token_index.range(prefix.to_string()..) {
            if !token.starts_with(prefix) {
                break;
            }
            for field in fields {
                keys.push(TermKey::new(index, field, token));
            }
        }
        Ok(keys)
    }

    pub async fn count_terms(&self, index: &str) -> Result<usize> {
        let catalog = self.catalog(index).await?;
        let count = catalog.read().await.terms.len();
        Ok(count)
    }

    /// Every persisted posting list of an index; the input for stats
    /// recomputation.
    pub async fn all_postings(&self, index: &str) -> Result<Vec<(TermKey, PostingList)>> {
        let terms = self.find_terms_by_index(index).await?;
        let mut all = Vec::with_capacity(terms.len());
        for key in terms {
            if let Some(list) = self.read_merged(index, &key.local_key()).await? {
                all.push((key, list));
            }
        }
        Ok(all)
    }

    /// Drop all persisted and cached state for one index. The caller
    /// removes the index directory; this clears the in-memory side.
    pub async fn delete_by_index(&self, index: &str) -> Result<()> {
        self.catalogs.write().remove(index);
        self.term_locks.lock().retain(|(i, _), _| i.as_str() != index);

        let dir = self.layout.terms_dir(index);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn encode_chunk_file(records: &[ChunkRecord]) -> Result<Vec<u8>> {
    let payload = bincode::serialize(records)?;
    let compressed = lz4_flex::compress_prepend_size(&payload);
    let crc = crc32fast::hash(&compressed);

    let mut bytes = Vec::with_capacity(8 + compressed.len());
    bytes.extend_from_slice(&CHUNK_FILE_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&compressed);
    Ok(bytes)
}

fn decode_chunk_file(bytes: &[u8]) -> Result<Vec<ChunkRecord>> {
    if bytes.len() < 8 {
        return Err(Error::new(ErrorKind::Parse, "chunk file too short".to_string()));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != CHUNK_FILE_MAGIC {
        return Err(Error::new(ErrorKind::Parse, "bad chunk file magic".to_string()));
    }
    let crc = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let compressed = &bytes[8..];
    if crc32fast::hash(compressed) != crc {
        warn!("chunk file checksum mismatch");
        return Err(Error::new(ErrorKind::Parse, "chunk file checksum mismatch".to_string()));
    }
    let payload = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|err| Error::new(ErrorKind::Parse, format!("lz4: {}", err)))?;
    Ok(bincode::deserialize(&payload)?)
}
