use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use crate::analysis::analyzer::Analyzer;
use crate::core::error::Result;
use crate::core::types::{DocId, TermKey};
use crate::index::dictionary::TermDictionary;
use crate::index::posting::PostingList;
use crate::index::stats::CorpusStats;
use crate::query::ast::BooleanOp;
use crate::query::planner::{base_pattern, PlanNode};
use crate::scoring::scorer::{Bm25Scorer, Scorer, TermDocStats};
use crate::search::deadline::SearchDeadline;
use crate::search::wildcard::WildcardExpander;
use crate::storage::chunk_store::ChunkedPostingStore;
use crate::storage::document_store::DocumentStore;

/// Intermediate result of a plan branch: docId -> accumulated score.
pub type ScoreMap = HashMap<DocId, f64>;

const PHRASE_BOOST: f64 = 1.5;

/// Executes a plan against the dictionary and chunked store, merging
/// posting lists into ranked `(docId, score)` pairs.
///
/// Posting resolution takes the larger of the cached and the persisted
/// list for a term: bulk ingestion may have committed a longer list
/// than the cache retained after eviction, so the store is treated as
/// equally authoritative and readers never observe a shrinking list.
pub struct PlanExecutor<'a> {
    pub index: &'a str,
    pub dictionary: &'a TermDictionary,
    pub store: &'a ChunkedPostingStore,
    pub documents: &'a DocumentStore,
    pub stats: &'a CorpusStats,
    pub field_boosts: Arc<HashMap<String, f64>>,
    pub scorer: Bm25Scorer,
    pub analyzer: Arc<Analyzer>,
    pub max_fetched_docs: usize,
    /// Permit partial results from completed OR branches on timeout.
    pub allow_partial: bool,
}

impl<'a> PlanExecutor<'a> {
    pub async fn execute(&self, plan: &PlanNode, deadline: &SearchDeadline) -> Result<ScoreMap> {
        self.exec(plan, deadline).await
    }

    fn exec<'s>(
        &'s self,
        plan: &'s PlanNode,
        deadline: &'s SearchDeadline,
    ) -> Pin<Box<dyn Future<Output = Result<ScoreMap>> + Send + 's>> {
        Box::pin(async move {
            deadline.check()?;
            match plan {
                PlanNode::TermStep { field, token, boost, .. } => {
                    self.exec_term(field, token, *boost).await
                }
                PlanNode::BooleanStep { op, children, .. } => {
                    self.exec_boolean(*op, children, deadline).await
                }
                PlanNode::PhraseStep { field, tokens, boost, .. } => {
                    self.exec_phrase(field, tokens, *boost, deadline).await
                }
                PlanNode::WildcardStep { field, pattern, regex, boost, .. } => {
                    self.exec_wildcard(field, pattern, regex, *boost, deadline).await
                }
                PlanNode::MatchAllStep { boost, .. } => self.exec_match_all(*boost).await,
            }
        })
    }

    /// Larger of (cache, store); the winner is re-cached as committed
    /// state when it came from the store.
    async fn resolve_postings(&self, field: &str, token: &str) -> Result<Option<PostingList>> {
        let key = TermKey::new(self.index, field, token);
        let cached = self.dictionary.get_posting_list(&key);
        let stored = self.store.read_merged(self.index, &key.local_key()).await?;

        Ok(match (cached, stored) {
            (Some(cached), Some(stored)) => {
                if stored.len() > cached.len() {
                    self.dictionary.insert_committed(&key, stored.clone());
                    Some(stored)
                } else {
                    Some(cached)
                }
            }
            (Some(cached), None) => Some(cached),
            (None, Some(stored)) => {
                self.dictionary.insert_committed(&key, stored.clone());
                Some(stored)
            }
            (None, None) => None,
        })
    }

    fn field_boost(&self, field: &str) -> f64 {
        self.field_boosts.get(field).copied().unwrap_or(1.0)
    }

    /// BM25-score every posting of a list into the accumulator (OR
    /// semantics: contributions sum).
    fn score_list(&self, scores: &mut ScoreMap, field: &str, token: &str, list: &PostingList, boost: f64) {
        let local = format!("{}:{}", field, token);
        let stats_df = self.stats.df(self.index, &local);
        let df = if stats_df > 0 { stats_df } else { list.len() as u64 };
        let total_docs = self.stats.total_documents(self.index).max(df);
        let avg_field_length = self.stats.avg_field_length(self.index, field);
        let field_boost = self.field_boost(field);

        for entry in list.entries() {
            let term_doc = TermDocStats {
                tf: entry.frequency,
                df,
                total_docs,
                field_length: self.stats.field_length(self.index, &entry.doc_id, field),
                avg_field_length,
            };
            let score = self.scorer.score(&term_doc, field_boost) * boost;
            *scores.entry(entry.doc_id.clone()).or_insert(0.0) += score;
        }
    }

    async fn exec_term(&self, field: &str, token: &str, boost: f64) -> Result<ScoreMap> {
        let mut scores = ScoreMap::new();
        // Input tokens run through the standard analyzer so queries and
        // indexed terms normalize identically.
        for token in self.analyzer.analyze(token) {
            if let Some(list) = self.resolve_postings(field, &token.text).await? {
                self.score_list(&mut scores, field, &token.text, &list, boost);
            }
        }
        Ok(scores)
    }

    async fn exec_boolean(
        &self,
        op: BooleanOp,
        children: &[PlanNode],
        deadline: &SearchDeadline,
    ) -> Result<ScoreMap> {
        match op {
            BooleanOp::And => {
                let mut combined: Option<ScoreMap> = None;
                for child in children {
                    // Children arrive sorted by cost; an empty
                    // intersection terminates the walk early.
                    if matches!(&combined, Some(map) if map.is_empty()) {
                        break;
                    }
                    let next = self.exec(child, deadline).await?;
                    combined = Some(match combined {
                        None => next,
                        Some(current) => current
                            .into_iter()
                            .filter_map(|(doc_id, score)| {
                                next.get(&doc_id).map(|other| (doc_id, score * other))
                            })
                            .collect(),
                    });
                }
                Ok(combined.unwrap_or_default())
            }
            BooleanOp::Or => {
                let mut combined = ScoreMap::new();
                for child in children {
                    let branch = match self.exec(child, deadline).await {
                        Ok(branch) => branch,
                        Err(err) if err.kind == crate::core::error::ErrorKind::Timeout
                            && self.allow_partial =>
                        {
                            // Completed branches stand; the rest is cut.
                            break;
                        }
                        Err(err) => return Err(err),
                    };
                    for (doc_id, score) in branch {
                        *combined.entry(doc_id).or_insert(0.0) += score;
                    }
                }
                Ok(combined)
            }
            BooleanOp::Not => {
                let mut children_iter = children.iter();
                let mut base = match children_iter.next() {
                    Some(first) => self.exec(first, deadline).await?,
                    None => return Ok(ScoreMap::new()),
                };
                for excluded in children_iter {
                    for (doc_id, _) in self.exec(excluded, deadline).await? {
                        base.remove(&doc_id);
                    }
                }
                Ok(base)
            }
        }
    }

    async fn exec_phrase(
        &self,
        field: &str,
        tokens: &[String],
        boost: f64,
        deadline: &SearchDeadline,
    ) -> Result<ScoreMap> {
        let mut lists = Vec::with_capacity(tokens.len());
        for token in tokens {
            deadline.check()?;
            match self.resolve_postings(field, token).await? {
                Some(list) if !list.is_empty() => lists.push(list),
                _ => return Ok(ScoreMap::new()),
            }
        }
        if lists.is_empty() {
            return Ok(ScoreMap::new());
        }

        // Candidates contain every term; adjacency is verified against
        // the per-term position lists.
        let candidates: Vec<DocId> = lists[0]
            .doc_ids()
            .filter(|doc_id| lists[1..].iter().all(|list| list.contains(doc_id)))
            .cloned()
            .collect();

        let mut scores = ScoreMap::new();
        for doc_id in candidates {
            let positions: Vec<&[u32]> = lists
                .iter()
                .map(|list| list.get(&doc_id).map(|e| e.positions.as_slice()).unwrap_or(&[]))
                .collect();
            if !phrase_occurs(&positions) {
                continue;
            }

            let mut sum = 0.0;
            for (token, list) in tokens.iter().zip(&lists) {
                let mut one = ScoreMap::new();
                if let Some(entry) = list.get(&doc_id) {
                    let single = PostingList::from_entries(vec![entry.clone()]);
                    self.score_list(&mut one, field, token, &single, 1.0);
                }
                sum += one.get(&doc_id).copied().unwrap_or(0.0);
            }
            scores.insert(doc_id, sum * PHRASE_BOOST * boost);
        }
        Ok(scores)
    }

    async fn exec_wildcard(
        &self,
        field: &str,
        pattern: &str,
        regex: &regex::Regex,
        boost: f64,
        deadline: &SearchDeadline,
    ) -> Result<ScoreMap> {
        let base = base_pattern(pattern);

        // A pure suffix-wildcard can often be answered by the exact
        // base term without expanding the pattern at all.
        let pure_suffix = !base.is_empty()
            && pattern.ends_with('*')
            && !pattern[..pattern.len() - 1].contains(['*', '?']);
        if pure_suffix {
            if let Some(list) = self.resolve_postings(field, &base).await? {
                if !list.is_empty() {
                    let mut scores = ScoreMap::new();
                    self.score_list(&mut scores, field, &base, &list, boost);
                    return Ok(scores);
                }
            }
        }

        let expander = WildcardExpander::new(self.store);
        let keys = expander.expand(self.index, field, pattern, regex, deadline).await?;

        let mut scores = ScoreMap::new();
        for key in keys {
            deadline.check()?;
            if let Some(list) = self.resolve_postings(&key.field, &key.token).await? {
                // Matching terms merge as OR contributions.
                self.score_list(&mut scores, &key.field, &key.token, &list, boost);
            }
        }
        Ok(scores)
    }

    /// Bounded enumeration of the index with a uniform score.
    async fn exec_match_all(&self, boost: f64) -> Result<ScoreMap> {
        let ids = self.documents.list_ids(self.index, self.max_fetched_docs).await?;
        Ok(ids.into_iter().map(|doc_id| (doc_id, boost)).collect())
    }
}

/// True when the position lists admit an increasing progression with
/// the phrase's relative offsets: some start p where list i contains
/// `p + i`.
fn phrase_occurs(positions: &[&[u32]]) -> bool {
    match positions.first() {
        Some(first) => first.iter().any(|&start| {
            positions[1..]
                .iter()
                .enumerate()
                .all(|(i, list)| list.binary_search(&(start + i as u32 + 1)).is_ok())
        }),
        None => false,
    }
}
