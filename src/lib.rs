pub mod core;
pub mod analysis;
pub mod compression;
pub mod index;
pub mod query;
pub mod scoring;
pub mod search;
pub mod storage;
pub mod writer;

pub use crate::core::config::EngineConfig;
pub use crate::core::engine::SearchEngine;
pub use crate::core::error::{Error, ErrorKind, Result};

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                          FINDEX STRUCT ARCHITECTURE                           │
└──────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── CORE ──────────────────────────────────────┐
│  struct SearchEngine                      // Composition root                 │
│  ├─ analyzers:   Arc<AnalyzerRegistry>    // standard / whitespace / english  │
│  ├─ dictionary:  Arc<TermDictionary>      // LRU cache, dirty terms pinned    │
│  ├─ chunk_store: Arc<ChunkedPostingStore> // durable chunks + term catalog    │
│  ├─ documents:   Arc<DocumentStore>       // bodies, append log per index     │
│  ├─ metadata:    Arc<MetadataStore>       // settings / mappings / status     │
│  ├─ payloads:    Arc<PayloadStore>        // out-of-band job payloads (TTL)   │
│  ├─ pending:     Arc<PendingJobs>         // refs for at-least-once recovery  │
│  ├─ stats:       Arc<CorpusStats>         // N, df, field lengths, averages   │
│  └─ queue:       mpsc::Sender<WorkerMessage>                                  │
└───────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────── WRITES ─────────────────────────────────────┐
│  document ─analyze─> tokens ─upsert─> TermDictionary ─dirty─> PersistenceJob  │
│                                                                  │            │
│  PayloadStore <─mirror── dispatch ──enqueue──> PersistenceWorker │            │
│  PendingJobs  <─ref────────┘                        │ merge + re-chunk        │
│                                                     v                          │
│                                         ChunkedPostingStore (atomic per term) │
└───────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────── READS ──────────────────────────────────────┐
│  raw query ─QueryParser─> Query ─QueryPlanner─> PlanNode (cost, estimated)    │
│                                                     │                          │
│  PlanExecutor: postings = max(dictionary, chunk_store), BM25 + field boosts,  │
│  AND=product / OR=sum / NOT=subtract, phrase positions, wildcard via          │
│  token-prefix index, match-all bounded; then filter -> sort -> paginate       │
└───────────────────────────────────────────────────────────────────────────────┘
*/
