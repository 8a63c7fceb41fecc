use std::path::PathBuf;

/// Engine configuration. Every unbounded growth point in the engine is
/// bounded by one of these knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,

    // Term dictionary bounds
    pub max_cache_size: usize,                  // Max cached term entries
    pub eviction_threshold: f64,                // Shrink to cap * threshold, in (0, 1]
    pub max_cached_postings_per_term: usize,    // Per-list in-memory cap
    pub gc_interval_secs: u64,                  // Background eviction cadence

    // Chunked store
    pub max_postings_per_chunk: usize,

    // Search bounds
    pub search_timeout_ms: u64,
    pub max_fetched_docs: usize,                // Hard ceiling per search
    pub default_page_size: usize,

    // Persistence worker
    pub worker_retry_limit: u32,
    pub worker_retry_backoff_ms: u64,
    pub payload_ttl_secs: i64,                  // OOB payload retention
    pub pending_requeue_after_secs: i64,        // Reaper re-delivery threshold
    pub job_queue_depth: usize,

    /// Guards the destructive full-reset operation; `None` disables it.
    pub reset_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("./data"),

            max_cache_size: 100_000,
            eviction_threshold: 0.75,
            max_cached_postings_per_term: 4096,
            gc_interval_secs: 30,

            max_postings_per_chunk: 5000,

            search_timeout_ms: 30_000,
            max_fetched_docs: 10_000,
            default_page_size: 10,

            worker_retry_limit: 3,
            worker_retry_backoff_ms: 200,
            payload_ttl_secs: 7 * 24 * 3600,    // ~7 days
            pending_requeue_after_secs: 60,
            job_queue_depth: 1024,

            reset_key: std::env::var("RESET_KEY").ok(),
        }
    }
}

impl EngineConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}
