use std::collections::HashMap;
use std::sync::Arc;
use log::{info, warn};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, OnceCell};
use uuid::Uuid;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::config::EngineConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, DocumentSource};
use crate::index::dictionary::TermDictionary;
use crate::index::stats::{CorpusStats, IndexStats};
use crate::query::ast::Query;
use crate::query::parser::QueryParser;
use crate::query::planner::QueryPlanner;
use crate::scoring::scorer::Bm25Scorer;
use crate::search::deadline::SearchDeadline;
use crate::search::executor::{PlanExecutor, ScoreMap};
use crate::search::highlight::Highlighter;
use crate::search::results::{Pagination, SearchHit, SearchRequest, SearchResponse, Suggestion};
use crate::search::suggest::Suggester;
use crate::storage::chunk_store::ChunkedPostingStore;
use crate::storage::document_store::{DocumentStore, StoredDocument};
use crate::storage::layout::StorageLayout;
use crate::storage::metadata::{FieldMapping, FieldType, IndexMappings, IndexMetadata, IndexSettings, MetadataStore};
use crate::storage::payload_store::{PayloadStore, PendingJobRef, PendingJobs};
use crate::storage::stats_store::StatsStore;
use crate::writer::job::{PersistenceJob, WorkerMessage};
use crate::writer::persistence::{reap, PersistenceWorker};
use crate::writer::pipeline::DocumentIndexer;

/// Per-item outcome of a bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemStatus {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebuildOptions {
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub enable_term_postings_persistence: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildResult {
    pub batch_id: String,
    pub total_batches: usize,
    pub total_documents: u64,
    pub status: String,
}

type BoostMap = Arc<HashMap<String, f64>>;

/// The engine context: every component constructed once, in dependency
/// order, at the composition root. No component holds a back-reference
/// to a service it does not call.
pub struct SearchEngine {
    config: EngineConfig,
    analyzers: Arc<AnalyzerRegistry>,
    dictionary: Arc<TermDictionary>,
    chunk_store: Arc<ChunkedPostingStore>,
    documents: Arc<DocumentStore>,
    metadata: Arc<MetadataStore>,
    payloads: Arc<PayloadStore>,
    pending: Arc<PendingJobs>,
    stats: Arc<CorpusStats>,
    stats_store: Arc<StatsStore>,
    indexer: DocumentIndexer,
    parser: QueryParser,
    scorer: Bm25Scorer,
    queue: mpsc::Sender<WorkerMessage>,
    /// Single-flight field-boost loads, one cell per index.
    boost_cells: parking_lot::Mutex<HashMap<String, Arc<OnceCell<BoostMap>>>>,
    background: Vec<tokio::task::JoinHandle<()>>,
}

impl SearchEngine {
    /// Build the engine and start its background tasks: persistence
    /// worker, eviction GC, and the pending-job reaper.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let layout = Arc::new(StorageLayout::new(&config.data_dir)?);

        let analyzers = Arc::new(AnalyzerRegistry::new());
        let dictionary = Arc::new(TermDictionary::new(
            config.max_cache_size,
            config.eviction_threshold,
            config.max_cached_postings_per_term,
        ));
        let chunk_store = Arc::new(ChunkedPostingStore::new(
            layout.clone(),
            config.max_postings_per_chunk,
        ));
        let documents = Arc::new(DocumentStore::new(layout.clone()));
        let metadata = Arc::new(MetadataStore::new(layout.clone()));
        let payloads = Arc::new(PayloadStore::new(layout.clone(), config.payload_ttl_secs));
        let pending = Arc::new(PendingJobs::new(layout.clone()));
        let stats = Arc::new(CorpusStats::new());
        let stats_store = Arc::new(StatsStore::new(layout.clone()));
        let indexer = DocumentIndexer::new(analyzers.clone(), dictionary.clone(), stats.clone());

        // Committed stats snapshots seed the in-memory counters.
        for index in metadata.list().await? {
            match stats_store.load(&index.name).await? {
                Some(loaded) => stats.replace(&index.name, loaded),
                None => {
                    let postings = chunk_store.all_postings(&index.name).await?;
                    let rebuilt = IndexStats::from_postings(postings.iter().map(|(k, l)| (k, l)));
                    stats.replace(&index.name, rebuilt);
                }
            }
        }

        let (queue, rx) = mpsc::channel(config.job_queue_depth.max(1));
        let worker = PersistenceWorker {
            dictionary: dictionary.clone(),
            store: chunk_store.clone(),
            payloads: payloads.clone(),
            pending: pending.clone(),
            stats: stats.clone(),
            stats_store: stats_store.clone(),
            retry_limit: config.worker_retry_limit,
            retry_backoff_ms: config.worker_retry_backoff_ms,
        };

        let mut background = Vec::new();
        background.push(worker.spawn(rx));

        // Crash recovery: anything still pending from a previous run is
        // re-enqueued from the payload store.
        if let Err(err) = reap(&payloads, &pending, &queue, 0).await {
            warn!("startup recovery failed: {}", err);
        }

        let gc_dictionary = dictionary.clone();
        let gc_interval = config.gc_interval_secs.max(1);
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(gc_interval));
            loop {
                ticker.tick().await;
                gc_dictionary.evict();
            }
        }));

        let reaper_payloads = payloads.clone();
        let reaper_pending = pending.clone();
        let reaper_queue = queue.clone();
        let requeue_after = config.pending_requeue_after_secs;
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                requeue_after.max(1) as u64,
            ));
            ticker.tick().await;  // skip the immediate tick
            loop {
                ticker.tick().await;
                if let Err(err) = reap(&reaper_payloads, &reaper_pending, &reaper_queue, requeue_after).await {
                    warn!("reaper tick failed: {}", err);
                }
            }
        }));

        info!("engine open at {:?}", config.data_dir);
        Ok(SearchEngine {
            config,
            analyzers,
            dictionary,
            chunk_store,
            documents,
            metadata,
            payloads,
            pending,
            stats,
            stats_store,
            indexer,
            parser: QueryParser::new(),
            scorer: Bm25Scorer::default(),
            queue,
            boost_cells: parking_lot::Mutex::new(HashMap::new()),
            background,
        })
    }

    // ------------------------------------------------------------------
    // Index lifecycle
    // ------------------------------------------------------------------

    pub async fn create_index(
        &self,
        name: &str,
        settings: Option<IndexSettings>,
        mappings: Option<IndexMappings>,
    ) -> Result<IndexMetadata> {
        validate_index_name(name)?;
        let mappings = mappings.unwrap_or_default();
        validate_mappings(&mappings)?;
        self.validate_analyzers(&mappings)?;

        let metadata = IndexMetadata::new(
            name.to_string(),
            settings.unwrap_or_default(),
            mappings,
        );
        self.metadata.create(&metadata).await?;
        self.stats.replace(name, IndexStats::new());
        info!("created index '{}'", name);
        Ok(metadata)
    }

    pub async fn list_indices(&self) -> Result<Vec<IndexMetadata>> {
        self.metadata.list().await
    }

    pub async fn get_index(&self, name: &str) -> Result<IndexMetadata> {
        self.metadata.get(name).await
    }

    /// Cascading delete: chunks, stats, documents, and metadata go
    /// together.
    pub async fn delete_index(&self, name: &str) -> Result<()> {
        self.metadata.get(name).await?;  // NotFound before any cleanup

        self.dictionary.clear_index(name);
        self.stats.remove_index(name);
        self.chunk_store.delete_by_index(name).await?;
        self.documents.forget_index(name).await;
        self.boost_cells.lock().remove(name);
        self.metadata.delete(name).await?;
        info!("deleted index '{}'", name);
        Ok(())
    }

    pub async fn update_settings(&self, name: &str, settings: IndexSettings) -> Result<IndexMetadata> {
        let mut metadata = self.metadata.get(name).await?;
        metadata.settings = settings;
        self.metadata.update(&mut metadata).await?;
        Ok(metadata)
    }

    /// Merge new properties into the mappings; existing fields are
    /// overwritten. The field-boost cache is invalidated.
    pub async fn update_mappings(&self, name: &str, mappings: IndexMappings) -> Result<IndexMetadata> {
        validate_mappings(&mappings)?;
        self.validate_analyzers(&mappings)?;
        let mut metadata = self.metadata.get(name).await?;
        for (field, mapping) in mappings.properties {
            metadata.mappings.properties.insert(field, mapping);
        }
        self.metadata.update(&mut metadata).await?;
        self.boost_cells.lock().remove(name);
        Ok(metadata)
    }

    /// Destructive full reset, guarded by the configured key.
    pub async fn reset(&self, key: &str) -> Result<()> {
        match &self.config.reset_key {
            Some(expected) if expected == key => {}
            _ => return Err(Error::validation("reset key missing or wrong")),
        }
        for index in self.metadata.list().await? {
            self.delete_index(&index.name).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Document writes
    // ------------------------------------------------------------------

    pub async fn index_document(
        &self,
        index: &str,
        id: Option<String>,
        body: Value,
    ) -> Result<DocId> {
        let mut metadata = self.metadata.get(index).await?;
        let source = as_source(body)?;
        let doc_id = DocId::new(id.unwrap_or_else(|| Uuid::new_v4().to_string()));

        self.ensure_dynamic_mappings(&mut metadata, &source).await?;
        self.indexer.validate_document(&metadata, &source)?;

        let seq = self.dictionary.begin_batch();
        let mut job = PersistenceJob::new(index.to_string(), seq, None);

        if let Some(previous) = self.documents.put(index, doc_id.clone(), source.clone()).await? {
            self.indexer.remove_document(&metadata, &doc_id, &previous.source, &mut job)?;
        }
        self.indexer.index_document(&metadata, &doc_id, &source)?;

        let job = self.indexer.seal_job(job, true);
        self.dispatch(job).await?;
        self.sync_document_count(&mut metadata).await?;
        Ok(doc_id)
    }

    /// One bad document must not prevent the rest of the batch from
    /// committing; the response lists per-item status.
    pub async fn bulk_index(
        &self,
        index: &str,
        items: Vec<(Option<String>, Value)>,
    ) -> Result<Vec<BulkItemStatus>> {
        let mut metadata = self.metadata.get(index).await?;
        let seq = self.dictionary.begin_batch();
        let bulk_op_id = Uuid::new_v4().to_string();
        let mut job = PersistenceJob::new(index.to_string(), seq, Some(bulk_op_id));
        let mut statuses = Vec::with_capacity(items.len());

        for (id, body) in items {
            let doc_id = DocId::new(id.unwrap_or_else(|| Uuid::new_v4().to_string()));
            let outcome = self.bulk_one(&mut metadata, &doc_id, body, &mut job).await;
            statuses.push(BulkItemStatus {
                id: doc_id.0,
                ok: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            });
        }

        let job = self.indexer.seal_job(job, true);
        self.dispatch(job).await?;
        self.sync_document_count(&mut metadata).await?;
        Ok(statuses)
    }

    async fn bulk_one(
        &self,
        metadata: &mut IndexMetadata,
        doc_id: &DocId,
        body: Value,
        job: &mut PersistenceJob,
    ) -> Result<()> {
        let source = as_source(body)?;
        self.ensure_dynamic_mappings(metadata, &source).await?;
        self.indexer.validate_document(metadata, &source)?;

        if let Some(previous) = self.documents.put(&metadata.name, doc_id.clone(), source.clone()).await? {
            self.indexer.remove_document(metadata, doc_id, &previous.source, job)?;
        }
        self.indexer.index_document(metadata, doc_id, &source)
    }

    pub async fn delete_document(&self, index: &str, id: &str) -> Result<()> {
        let mut metadata = self.metadata.get(index).await?;
        let doc_id = DocId::from(id);

        let previous = self.documents
            .remove(index, &doc_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Document '{}' not in '{}'", id, index)))?;

        let seq = self.dictionary.begin_batch();
        let mut job = PersistenceJob::new(index.to_string(), seq, None);
        self.indexer.remove_document(&metadata, &doc_id, &previous.source, &mut job)?;

        let job = self.indexer.seal_job(job, true);
        self.dispatch(job).await?;
        self.sync_document_count(&mut metadata).await?;
        Ok(())
    }

    /// Delete every document matched by a query; returns the count.
    pub async fn delete_by_query(&self, index: &str, query: Value) -> Result<u64> {
        let mut metadata = self.metadata.get(index).await?;
        let deadline = SearchDeadline::new(self.config.search_timeout_ms);
        let fields = self.resolve_fields(&metadata, &None);
        let parsed = self.parser.parse(&query, &fields).simplified();
        let scores = self.run_plan(&metadata, &parsed, &deadline, false).await?;

        let seq = self.dictionary.begin_batch();
        let mut job = PersistenceJob::new(index.to_string(), seq, None);
        let mut deleted = 0;

        for doc_id in scores.keys() {
            if let Some(previous) = self.documents.remove(index, doc_id).await? {
                self.indexer.remove_document(&metadata, doc_id, &previous.source, &mut job)?;
                deleted += 1;
            }
        }

        let job = self.indexer.seal_job(job, true);
        self.dispatch(job).await?;
        self.sync_document_count(&mut metadata).await?;
        Ok(deleted)
    }

    /// Wait until every job enqueued so far has been committed.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send(WorkerMessage::Flush(tx))
            .await
            .map_err(|_| Error::new(ErrorKind::TransientStore, "worker queue closed".to_string()))?;
        rx.await
            .map_err(|_| Error::new(ErrorKind::TransientStore, "worker dropped flush".to_string()))
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    pub async fn search(&self, index: &str, request: SearchRequest) -> Result<SearchResponse> {
        let start = std::time::Instant::now();
        let metadata = self.metadata.get(index).await?;

        let timeout = request.timeout_ms.unwrap_or(self.config.search_timeout_ms);
        let deadline = SearchDeadline::new(timeout);
        let allow_partial = request.allow_partial.unwrap_or(false);

        let fields = self.resolve_fields(&metadata, &request.fields);
        let query = self.parser.parse(&request.query, &fields).simplified();

        let scores = match self.run_plan(&metadata, &query, &deadline, allow_partial).await {
            Ok(scores) => scores,
            Err(err) if err.kind == ErrorKind::Timeout && allow_partial => ScoreMap::new(),
            Err(err) => return Err(err),
        };

        // Rank: score descending, docId ascending for stable ties.
        let mut ranked: Vec<(DocId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.config.max_fetched_docs);

        deadline.check()?;

        // Resolve sources, then apply equality post-filters.
        let mut matched: Vec<(DocId, f64, Option<StoredDocument>)> = Vec::with_capacity(ranked.len());
        for (doc_id, score) in ranked {
            let source = self.documents.get(index, &doc_id).await?;
            matched.push((doc_id, score, source));
        }
        if let Some(filter) = &request.filter {
            matched.retain(|(_, _, source)| {
                source.as_ref().is_some_and(|doc| filter_matches(filter, &doc.source))
            });
        }

        if let Some(sort) = request.sort.as_deref() {
            sort_by_field(&mut matched, sort);
        }

        let total = matched.len();
        let max_score = matched.iter().map(|(_, s, _)| *s).fold(0.0, f64::max);
        let from = request.from.unwrap_or(0);
        let size = request.size.unwrap_or(self.config.default_page_size).max(1);

        let facets = request.facets.as_ref().map(|fields| compute_facets(fields, &matched));

        let highlighter = if request.highlight.unwrap_or(false) {
            Some(Highlighter::from_query(&query))
        } else {
            None
        };

        let hits = matched
            .into_iter()
            .skip(from)
            .take(size)
            .map(|(doc_id, score, source)| {
                let highlights = match (&highlighter, &source) {
                    (Some(highlighter), Some(doc)) => highlight_source(highlighter, &doc.source),
                    _ => None,
                };
                SearchHit {
                    id: doc_id.0,
                    score,
                    source: source.map(|doc| doc.source),
                    highlights,
                }
            })
            .collect();

        Ok(SearchResponse {
            total,
            max_score,
            hits,
            pagination: Pagination::compute(total, from, size),
            facets,
            took: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn suggest(
        &self,
        index: &str,
        text: &str,
        field: Option<&str>,
        size: Option<usize>,
    ) -> Result<Vec<Suggestion>> {
        let metadata = self.metadata.get(index).await?;
        let field = match field {
            Some(field) => field.to_string(),
            None => metadata
                .searchable_fields()
                .into_iter()
                .next()
                .unwrap_or_else(|| "title".to_string()),
        };

        Suggester::new(&self.chunk_store, &self.stats)
            .suggest(index, &field, text, size.unwrap_or(5))
            .await
    }

    async fn run_plan(
        &self,
        metadata: &IndexMetadata,
        query: &Query,
        deadline: &SearchDeadline,
        allow_partial: bool,
    ) -> Result<ScoreMap> {
        let plan = QueryPlanner::new(&metadata.name, &self.stats).plan(query)?;
        let field_boosts = self.field_boosts(&metadata.name).await?;

        let executor = PlanExecutor {
            index: &metadata.name,
            dictionary: &self.dictionary,
            store: &self.chunk_store,
            documents: &self.documents,
            stats: &self.stats,
            field_boosts,
            scorer: self.scorer,
            analyzer: self.analyzers.resolve(None)?,
            max_fetched_docs: self.config.max_fetched_docs,
            allow_partial,
        };
        executor.execute(&plan, deadline).await
    }

    /// Field boosts resolved lazily per index with a single-flight
    /// load, so concurrent term scoring does not re-read the mappings.
    async fn field_boosts(&self, index: &str) -> Result<BoostMap> {
        let cell = {
            let mut cells = self.boost_cells.lock();
            cells.entry(index.to_string()).or_default().clone()
        };

        let loaded = cell
            .get_or_try_init(|| async {
                let metadata = self.metadata.get(index).await?;
                let mut boosts = HashMap::new();
                for field in metadata.searchable_fields() {
                    boosts.insert(field.clone(), metadata.field_boost(&field));
                }
                Ok::<BoostMap, Error>(Arc::new(boosts))
            })
            .await?;
        Ok(loaded.clone())
    }

    fn resolve_fields(&self, metadata: &IndexMetadata, requested: &Option<Vec<String>>) -> Vec<String> {
        match requested {
            Some(fields) if !fields.is_empty() => fields.clone(),
            _ => metadata.searchable_fields(),
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Re-index every stored document of an index in batches and
    /// recompute stats from the committed chunks afterwards.
    pub async fn rebuild_index(&self, index: &str, options: RebuildOptions) -> Result<RebuildResult> {
        let mut metadata = self.metadata.get(index).await?;
        let batch_size = options.batch_size.unwrap_or(500).max(1);
        let fetch_concurrency = options.concurrency.unwrap_or_else(num_cpus::get).max(1);
        let include_postings = options.enable_term_postings_persistence.unwrap_or(true);

        let ids = self.documents.list_ids(index, usize::MAX).await?;
        let total_documents = ids.len() as u64;
        let rebuild_id = Uuid::new_v4().to_string();

        // Start from a clean slate; the chunk files are rebuilt batch
        // by batch.
        self.dictionary.clear_index(index);
        self.stats.replace(index, IndexStats::new());
        self.chunk_store.delete_by_index(index).await?;

        let mut total_batches = 0;
        for batch in ids.chunks(batch_size) {
            let seq = self.dictionary.begin_batch();
            let job = PersistenceJob::new(index.to_string(), seq, Some(rebuild_id.clone()));

            // Bodies fetch concurrently; indexing itself is CPU-bound
            // and runs in arrival order.
            let mut fetches = tokio::task::JoinSet::new();
            for chunk in batch.chunks(fetch_concurrency.max(1)) {
                for doc_id in chunk {
                    let documents = self.documents.clone();
                    let index = index.to_string();
                    let doc_id = doc_id.clone();
                    fetches.spawn(async move {
                        documents.get(&index, &doc_id).await
                    });
                }
                while let Some(fetched) = fetches.join_next().await {
                    let fetched = fetched
                        .map_err(|err| Error::invariant(format!("rebuild fetch task: {}", err)))??;
                    if let Some(doc) = fetched {
                        if let Err(err) = self.indexer.index_document(&metadata, &doc.doc_id, &doc.source) {
                            warn!("rebuild skipped '{}': {}", doc.doc_id, err);
                        }
                    }
                }
            }

            let job = self.indexer.seal_job(job, include_postings);
            self.dispatch(job).await?;
            total_batches += 1;
        }

        self.flush().await?;
        self.recompute_stats(index).await?;
        self.sync_document_count(&mut metadata).await?;

        Ok(RebuildResult {
            batch_id: rebuild_id,
            total_batches,
            total_documents,
            status: "completed".to_string(),
        })
    }

    /// Rebuild all corpus counters from committed chunks; the source
    /// of truth after bulk operations.
    pub async fn recompute_stats(&self, index: &str) -> Result<()> {
        self.metadata.get(index).await?;
        let postings = self.chunk_store.all_postings(index).await?;
        let rebuilt = IndexStats::from_postings(postings.iter().map(|(k, l)| (k, l)));
        self.stats_store.save(index, &rebuilt).await?;
        self.stats.replace(index, rebuilt);
        Ok(())
    }

    pub fn stats(&self) -> &CorpusStats {
        &self.stats
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Mirror the payload out of band, record the pending ref, then
    /// enqueue. The mirror comes first so a queue-side loss after this
    /// point is always recoverable.
    async fn dispatch(&self, job: PersistenceJob) -> Result<()> {
        if job.is_empty() {
            return Ok(());
        }

        let payload = bincode::serialize(&job)?;
        self.payloads.put(&job.persistence_id, payload).await?;
        self.pending
            .push(&PendingJobRef {
                payload_key: job.persistence_id.clone(),
                index_name: job.index_name.clone(),
                batch_id: job.batch_id.clone(),
                bulk_op_id: job.bulk_op_id.clone(),
                created_at: job.indexed_at,
            })
            .await?;

        self.queue
            .send(WorkerMessage::Job(job))
            .await
            .map_err(|_| Error::new(ErrorKind::TransientStore, "worker queue closed".to_string()))
    }

    /// Unmapped string fields become dynamic text mappings so the
    /// default search field set follows the data.
    async fn ensure_dynamic_mappings(
        &self,
        metadata: &mut IndexMetadata,
        source: &DocumentSource,
    ) -> Result<()> {
        let mut changed = false;
        for (field, value) in source {
            if metadata.mappings.properties.contains_key(field) {
                continue;
            }
            let mapping = match value {
                Value::String(_) | Value::Array(_) => FieldMapping::text(),
                Value::Number(_) => FieldMapping {
                    field_type: FieldType::Number,
                    analyzer: None,
                    boost: None,
                    fields: None,
                },
                Value::Bool(_) => FieldMapping {
                    field_type: FieldType::Boolean,
                    analyzer: None,
                    boost: None,
                    fields: None,
                },
                _ => continue,
            };
            metadata.mappings.properties.insert(field.clone(), mapping);
            changed = true;
        }

        if changed {
            self.metadata.update(metadata).await?;
            self.boost_cells.lock().remove(&metadata.name);
        }
        Ok(())
    }

    async fn sync_document_count(&self, metadata: &mut IndexMetadata) -> Result<()> {
        metadata.document_count = self.stats.total_documents(&metadata.name);
        self.metadata.update(metadata).await
    }

    /// Analyzer names in mappings must resolve at mapping time, not at
    /// first document write.
    fn validate_analyzers(&self, mappings: &IndexMappings) -> Result<()> {
        for mapping in mappings.properties.values() {
            self.analyzers.resolve(mapping.analyzer.as_deref())?;
            if let Some(children) = &mapping.fields {
                for sub in children.values() {
                    self.analyzers.resolve(sub.analyzer.as_deref())?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for SearchEngine {
    fn drop(&mut self) {
        for handle in &self.background {
            handle.abort();
        }
    }
}

fn validate_index_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "index name '{}' must be non-empty and [a-zA-Z0-9_-]",
            name,
        )))
    }
}

fn validate_mappings(mappings: &IndexMappings) -> Result<()> {
    for (field, mapping) in &mappings.properties {
        if let Some(boost) = mapping.boost {
            if boost <= 0.0 || !boost.is_finite() {
                return Err(Error::validation(format!(
                    "boost for field '{}' must be a positive number",
                    field,
                )));
            }
        }
        if let Some(children) = &mapping.fields {
            for (child, sub) in children {
                if let Some(boost) = sub.boost {
                    if boost <= 0.0 || !boost.is_finite() {
                        return Err(Error::validation(format!(
                            "boost for field '{}.{}' must be a positive number",
                            field, child,
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn as_source(body: Value) -> Result<DocumentSource> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(Error::validation(format!(
            "document body must be a JSON object, got {}",
            json_type(&other),
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn filter_matches(filter: &serde_json::Map<String, Value>, source: &DocumentSource) -> bool {
    filter.iter().all(|(field, expected)| source.get(field) == Some(expected))
}

fn sort_by_field(matched: &mut [(DocId, f64, Option<StoredDocument>)], sort: &str) {
    if sort == "_score" {
        return;  // already in score order
    }
    let (field, descending) = match sort.split_once(':') {
        Some((field, "desc")) => (field, true),
        Some((field, _)) => (field, false),
        None => (sort, false),
    };

    matched.sort_by(|a, b| {
        let left = a.2.as_ref().and_then(|d| d.source.get(field));
        let right = b.2.as_ref().and_then(|d| d.source.get(field));
        let ordering = compare_values(left, right);
        if descending { ordering.reverse() } else { ordering }
    });
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            a.as_f64().unwrap_or(0.0).total_cmp(&b.as_f64().unwrap_or(0.0))
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn compute_facets(
    fields: &[String],
    matched: &[(DocId, f64, Option<StoredDocument>)],
) -> HashMap<String, HashMap<String, u64>> {
    let mut facets: HashMap<String, HashMap<String, u64>> = HashMap::new();
    for field in fields {
        let counts = facets.entry(field.clone()).or_default();
        for (_, _, source) in matched {
            let Some(doc) = source else { continue };
            let Some(value) = doc.source.get(field) else { continue };
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            *counts.entry(rendered).or_insert(0) += 1;
        }
    }
    facets
}

fn highlight_source(
    highlighter: &Highlighter,
    source: &DocumentSource,
) -> Option<HashMap<String, Vec<String>>> {
    let mut highlights = HashMap::new();
    for (field, value) in source {
        if let Value::String(text) = value {
            if let Some(fragment) = highlighter.highlight(text) {
                highlights.insert(field.clone(), vec![fragment]);
            }
        }
    }
    if highlights.is_empty() { None } else { Some(highlights) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn engine() -> (TempDir, SearchEngine) {
        let dir = TempDir::new().unwrap();
        let engine = SearchEngine::open(EngineConfig::with_data_dir(dir.path())).await.unwrap();
        (dir, engine)
    }

    fn match_query(field: &str, value: &str) -> SearchRequest {
        SearchRequest::for_query(json!({"match": {"field": field, "value": value}}))
    }

    #[tokio::test]
    async fn index_then_match_returns_the_document() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine
            .index_document("a", Some("1".into()), json!({"title": "Hello World", "count": 10}))
            .await
            .unwrap();
        engine.flush().await.unwrap();

        let response = engine.search("a", match_query("title", "hello")).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].id, "1");
        assert!(response.hits[0].score > 0.0);
        assert_eq!(response.hits[0].source.as_ref().unwrap()["count"], json!(10));
    }

    #[tokio::test]
    async fn bulk_then_wildcard_finds_both() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        let statuses = engine
            .bulk_index("a", vec![
                (Some("1".into()), json!({"title": "Bulk One"})),
                (Some("2".into()), json!({"title": "Bulk Two"})),
            ])
            .await
            .unwrap();
        assert!(statuses.iter().all(|s| s.ok));
        engine.flush().await.unwrap();

        let mut request = SearchRequest::for_query(json!({"wildcard": {"field": "title", "value": "bulk*"}}));
        request.size = Some(10);
        let response = engine.search("a", request).await.unwrap();
        assert!(response.total >= 2);
    }

    #[tokio::test]
    async fn wildcard_expansion_scores_above_zero() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        for (id, title) in [("1", "smart phone"), ("2", "smart watch"), ("3", "dumb phone")] {
            engine
                .index_document("a", Some(id.into()), json!({"title": title}))
                .await
                .unwrap();
        }
        engine.flush().await.unwrap();

        let response = engine
            .search("a", SearchRequest::for_query(json!({"wildcard": {"field": "title", "value": "smart*"}})))
            .await
            .unwrap();
        assert_eq!(response.total, 2);
        assert!(response.hits.iter().all(|hit| hit.score > 0.0));

        // Wildcard soundness: every returned doc holds a matching token.
        let regex = regex::RegexBuilder::new("^smart.*$").case_insensitive(true).build().unwrap();
        for hit in &response.hits {
            let title = hit.source.as_ref().unwrap()["title"].as_str().unwrap();
            assert!(title.split_whitespace().any(|token| regex.is_match(token)));
        }
    }

    #[tokio::test]
    async fn external_tiered_ranking_reorders_engine_hits() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine
            .index_document("a", Some("shop".into()),
                json!({"title": "pencil shop", "confirmed": true, "health": 90}))
            .await
            .unwrap();
        engine
            .index_document("a", Some("depot".into()),
                json!({"title": "pencil depot", "confirmed": false, "health": 50}))
            .await
            .unwrap();
        engine.flush().await.unwrap();

        let response = engine.search("a", match_query("title", "pencil")).await.unwrap();
        assert_eq!(response.total, 2);

        // The engine only ranks; a business wrapper layers tier rules
        // on top of the returned hits.
        let mut reranked = response.hits.clone();
        reranked.sort_by(|a, b| {
            let tier = |hit: &SearchHit| hit.source.as_ref()
                .and_then(|s| s.get("confirmed"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            tier(b).cmp(&tier(a)).then(b.score.total_cmp(&a.score))
        });
        assert_eq!(reranked[0].id, "shop");
    }

    #[tokio::test]
    async fn deleted_index_is_not_found() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine.index_document("a", Some("1".into()), json!({"title": "x"})).await.unwrap();
        engine.flush().await.unwrap();
        engine.delete_index("a").await.unwrap();

        let err = engine.search("a", match_query("title", "x")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn reindexing_identical_content_is_idempotent() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        let body = json!({"title": "hello world"});

        engine.index_document("a", Some("1".into()), body.clone()).await.unwrap();
        engine.flush().await.unwrap();
        engine.index_document("a", Some("1".into()), body).await.unwrap();
        engine.flush().await.unwrap();

        assert_eq!(engine.stats().total_documents("a"), 1);
        assert_eq!(engine.stats().df("a", "title:hello"), 1);

        let merged = engine.chunk_store.read_merged("a", "title:hello").await.unwrap().unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn deletion_removes_the_document_everywhere() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine.index_document("a", Some("1".into()), json!({"title": "hello world"})).await.unwrap();
        engine.index_document("a", Some("2".into()), json!({"title": "hello again"})).await.unwrap();
        engine.flush().await.unwrap();

        engine.delete_document("a", "1").await.unwrap();
        engine.flush().await.unwrap();

        assert_eq!(engine.stats().total_documents("a"), 1);
        assert_eq!(engine.stats().df("a", "title:hello"), 1);
        assert_eq!(engine.stats().df("a", "title:world"), 0);

        let response = engine.search("a", match_query("title", "hello")).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].id, "2");

        let err = engine.delete_document("a", "1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn zero_match_query_is_an_empty_success() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine.index_document("a", Some("1".into()), json!({"title": "something"})).await.unwrap();
        engine.flush().await.unwrap();

        let response = engine.search("a", match_query("title", "absent")).await.unwrap();
        assert_eq!(response.total, 0);
        assert!(response.hits.is_empty());
        assert_eq!(response.max_score, 0.0);
    }

    #[tokio::test]
    async fn boolean_identities_hold() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine.index_document("a", Some("1".into()), json!({"title": "alpha beta"})).await.unwrap();
        engine.index_document("a", Some("2".into()), json!({"title": "alpha gamma"})).await.unwrap();
        engine.flush().await.unwrap();

        let term = json!({"term": {"field": "title", "value": "alpha"}});
        let plain = engine.search("a", SearchRequest::for_query(term.clone())).await.unwrap();

        // or(Q, nothing-that-matches) == Q
        let or_empty = engine
            .search("a", SearchRequest::for_query(json!({"bool": {"should": [
                term.clone(), {"term": {"field": "title", "value": "zzzz"}}
            ]}})))
            .await
            .unwrap();
        let ids = |r: &SearchResponse| {
            let mut ids: Vec<String> = r.hits.iter().map(|h| h.id.clone()).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&plain), ids(&or_empty));

        // and(Q, match_all) == Q
        let and_all = engine
            .search("a", SearchRequest::for_query(json!({"bool": {"must": [
                term.clone(), {"match_all": {}}
            ]}})))
            .await
            .unwrap();
        assert_eq!(ids(&plain), ids(&and_all));

        // not(not(Q)) never grows beyond Q's result set.
        let double_not = engine
            .search("a", SearchRequest::for_query(json!({"bool": {"must_not": [
                {"bool": {"must_not": [term.clone()]}}
            ]}})))
            .await
            .unwrap();
        for id in ids(&double_not) {
            assert!(ids(&plain).contains(&id));
        }
    }

    #[tokio::test]
    async fn indexed_tokens_round_trip_through_term_queries() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine
            .index_document("a", Some("1".into()), json!({"title": "Quick Brown Fox"}))
            .await
            .unwrap();
        engine.flush().await.unwrap();

        for token in ["quick", "brown", "fox"] {
            let response = engine.search("a", match_query("title", token)).await.unwrap();
            assert!(
                response.hits.iter().any(|h| h.id == "1"),
                "token '{}' did not round trip",
                token,
            );
        }
    }

    #[tokio::test]
    async fn phrase_queries_check_adjacency() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine.index_document("a", Some("1".into()), json!({"title": "big red dog"})).await.unwrap();
        engine.index_document("a", Some("2".into()), json!({"title": "red big dog"})).await.unwrap();
        engine.flush().await.unwrap();

        let response = engine
            .search("a", SearchRequest::for_query(json!({"match_phrase": {"field": "title", "value": "big red"}})))
            .await
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].id, "1");
    }

    #[tokio::test]
    async fn pagination_slices_the_ranked_list() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        for i in 0..7 {
            engine
                .index_document("a", Some(format!("doc{}", i)), json!({"title": "common token"}))
                .await
                .unwrap();
        }
        engine.flush().await.unwrap();

        let mut request = match_query("title", "common");
        request.from = Some(5);
        request.size = Some(5);
        let response = engine.search("a", request).await.unwrap();

        assert_eq!(response.total, 7);
        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.pagination.current_page, 2);
        assert_eq!(response.pagination.total_pages, 2);
        assert!(!response.pagination.has_next);
        assert!(response.pagination.has_previous);
    }

    #[tokio::test]
    async fn filters_facets_and_highlights() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine
            .index_document("a", Some("1".into()),
                json!({"title": "red pencil", "kind": "pencil"}))
            .await
            .unwrap();
        engine
            .index_document("a", Some("2".into()),
                json!({"title": "red pen", "kind": "pen"}))
            .await
            .unwrap();
        engine.flush().await.unwrap();

        let mut request = match_query("title", "red");
        request.filter = Some(json!({"kind": "pencil"}).as_object().unwrap().clone());
        request.facets = Some(vec!["kind".into()]);
        request.highlight = Some(true);
        let response = engine.search("a", request).await.unwrap();

        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].id, "1");
        let facets = response.facets.unwrap();
        assert_eq!(facets["kind"]["pencil"], 1);
        let highlights = response.hits[0].highlights.as_ref().unwrap();
        assert_eq!(highlights["title"][0], "<em>red</em> pencil");
    }

    #[tokio::test]
    async fn suggestions_rank_by_distance_then_frequency() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine.index_document("a", Some("1".into()), json!({"title": "searching records"})).await.unwrap();
        engine.index_document("a", Some("2".into()), json!({"title": "searching archives"})).await.unwrap();
        engine.flush().await.unwrap();

        let suggestions = engine.suggest("a", "searchng", Some("title"), Some(5)).await.unwrap();
        assert_eq!(suggestions[0].text, "searching");
        assert!(suggestions[0].distance <= 2);
        assert_eq!(suggestions[0].freq, 2);
    }

    #[tokio::test]
    async fn delete_by_query_removes_matches_only() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        engine.index_document("a", Some("1".into()), json!({"title": "stale entry"})).await.unwrap();
        engine.index_document("a", Some("2".into()), json!({"title": "fresh entry"})).await.unwrap();
        engine.flush().await.unwrap();

        let deleted = engine
            .delete_by_query("a", json!({"match": {"field": "title", "value": "stale"}}))
            .await
            .unwrap();
        engine.flush().await.unwrap();

        assert_eq!(deleted, 1);
        let response = engine.search("a", match_query("title", "entry")).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].id, "2");
    }

    #[tokio::test]
    async fn rebuild_recomputes_from_committed_chunks() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        for i in 0..5 {
            engine
                .index_document("a", Some(format!("d{}", i)), json!({"title": format!("entry number {}", i)}))
                .await
                .unwrap();
        }
        engine.flush().await.unwrap();

        let result = engine
            .rebuild_index("a", RebuildOptions {
                batch_size: Some(2),
                concurrency: Some(2),
                enable_term_postings_persistence: Some(true),
            })
            .await
            .unwrap();

        assert_eq!(result.total_documents, 5);
        assert_eq!(result.total_batches, 3);
        assert_eq!(result.status, "completed");
        assert_eq!(engine.stats().total_documents("a"), 5);

        let response = engine.search("a", match_query("title", "entry")).await.unwrap();
        assert_eq!(response.total, 5);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = SearchEngine::open(EngineConfig::with_data_dir(dir.path())).await.unwrap();
            engine.create_index("a", None, None).await.unwrap();
            engine.index_document("a", Some("1".into()), json!({"title": "durable token"})).await.unwrap();
            engine.flush().await.unwrap();
        }

        let engine = SearchEngine::open(EngineConfig::with_data_dir(dir.path())).await.unwrap();
        let response = engine.search("a", match_query("title", "durable")).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].id, "1");
        assert_eq!(engine.stats().total_documents("a"), 1);
    }

    #[tokio::test]
    async fn duplicate_index_names_conflict() {
        let (_dir, engine) = engine().await;
        engine.create_index("a", None, None).await.unwrap();
        let err = engine.create_index("a", None, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.status_code(), 409);

        let err = engine.create_index("bad name!", None, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn bulk_isolates_bad_documents() {
        let (_dir, engine) = engine().await;
        let mut mappings = IndexMappings::default();
        mappings.properties.insert("count".into(), FieldMapping {
            field_type: FieldType::Number,
            analyzer: None,
            boost: None,
            fields: None,
        });
        engine.create_index("a", None, Some(mappings)).await.unwrap();

        let statuses = engine
            .bulk_index("a", vec![
                (Some("good".into()), json!({"title": "fine", "count": 1})),
                (Some("bad".into()), json!({"count": "not a number"})),
                (Some("also-good".into()), json!({"title": "fine too", "count": 2})),
            ])
            .await
            .unwrap();
        engine.flush().await.unwrap();

        assert!(statuses[0].ok);
        assert!(!statuses[1].ok);
        assert!(statuses[2].ok);

        let response = engine.search("a", match_query("title", "fine")).await.unwrap();
        assert_eq!(response.total, 2);
    }

    #[tokio::test]
    async fn field_boosts_raise_the_contribution() {
        let (_dir, engine) = engine().await;
        let mut boosted = IndexMappings::default();
        boosted.properties.insert("title".into(), FieldMapping::text().with_boost(3.0));
        engine.create_index("boosted", None, Some(boosted)).await.unwrap();
        engine.create_index("plain", None, None).await.unwrap();

        for index in ["boosted", "plain"] {
            engine.index_document(index, Some("1".into()), json!({"title": "hello"})).await.unwrap();
        }
        engine.flush().await.unwrap();

        let high = engine.search("boosted", match_query("title", "hello")).await.unwrap();
        let base = engine.search("plain", match_query("title", "hello")).await.unwrap();
        assert!(high.hits[0].score > base.hits[0].score * 2.5);
    }
}
