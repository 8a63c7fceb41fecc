use std::sync::Arc;
use serde_json::Value;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, DocumentSource, TermKey};
use crate::index::dictionary::TermDictionary;
use crate::index::posting::PostingEntry;
use crate::index::stats::CorpusStats;
use crate::storage::metadata::{FieldMapping, FieldType, IndexMetadata};
use crate::writer::job::PersistenceJob;

/// One analyzed field of a document: resolved field path and tokens.
struct AnalyzedField {
    field: String,
    tokens: Vec<crate::analysis::token::Token>,
}

/// Turns documents into dictionary updates: mapping validation, per
/// field analysis, posting upserts, stats maintenance, dirty marking.
///
/// Callers remove a document's previous version before re-indexing it,
/// so every `index_document` sees a doc unknown to the stats.
pub struct DocumentIndexer {
    analyzers: Arc<AnalyzerRegistry>,
    dictionary: Arc<TermDictionary>,
    stats: Arc<CorpusStats>,
}

impl DocumentIndexer {
    pub fn new(
        analyzers: Arc<AnalyzerRegistry>,
        dictionary: Arc<TermDictionary>,
        stats: Arc<CorpusStats>,
    ) -> Self {
        DocumentIndexer {
            analyzers,
            dictionary,
            stats,
        }
    }

    /// Validate and index one document into the in-memory dictionary;
    /// the touched terms become dirty under the current batch.
    pub fn index_document(
        &self,
        metadata: &IndexMetadata,
        doc_id: &DocId,
        source: &DocumentSource,
    ) -> Result<()> {
        self.validate_document(metadata, source)?;
        let analyzed = self.analyze_fields(metadata, source)?;

        self.stats.update(&metadata.name, |stats| stats.touch_document(doc_id));

        for AnalyzedField { field, tokens } in analyzed {
            let token_count = tokens.len() as u32;

            let mut grouped: std::collections::HashMap<String, Vec<u32>> = Default::default();
            for token in tokens {
                grouped.entry(token.text).or_default().push(token.position);
            }

            for (token, mut positions) in grouped {
                positions.sort_unstable();
                let key = TermKey::new(&metadata.name, &field, &token);
                let entry = PostingEntry {
                    doc_id: doc_id.clone(),
                    frequency: positions.len() as u32,
                    positions,
                    metadata: None,
                };
                self.dictionary.upsert_entry(&key, entry);
                self.stats.update(&metadata.name, |stats| stats.increment_df(&key.local_key()));
            }

            self.stats.update(&metadata.name, |stats| {
                stats.set_field_length(doc_id, &field, token_count)
            });
        }

        Ok(())
    }

    /// Reverse one document's updates: postings removed, stats
    /// decremented, dirty flags propagated.
    pub fn remove_document(
        &self,
        metadata: &IndexMetadata,
        doc_id: &DocId,
        source: &DocumentSource,
        job: &mut PersistenceJob,
    ) -> Result<()> {
        let analyzed = self.analyze_fields(metadata, source)?;

        for AnalyzedField { field, tokens } in analyzed {
            let mut seen = std::collections::HashSet::new();
            for token in tokens {
                if !seen.insert(token.text.clone()) {
                    continue;
                }
                let key = TermKey::new(&metadata.name, &field, &token.text);
                self.dictionary.remove_entry(&key, doc_id);
                self.stats.update(&metadata.name, |stats| stats.decrement_df(&key.local_key()));
            }
        }

        self.stats.update(&metadata.name, |stats| stats.remove_document(doc_id));
        job.deleted_docs.push(doc_id.clone());
        Ok(())
    }

    /// Seal a batch: capture the dirty term set (all currently dirty
    /// terms, which self-heals any batch whose commit was lost) and,
    /// when requested, a snapshot of their postings.
    pub fn seal_job(&self, mut job: PersistenceJob, include_postings: bool) -> PersistenceJob {
        job.dirty_terms = self.dictionary.dirty_terms_since(0);
        if include_postings {
            job.term_postings = Some(self.dictionary.snapshot_postings(&job.dirty_terms));
        }
        job
    }

    pub fn validate_document(&self, metadata: &IndexMetadata, source: &DocumentSource) -> Result<()> {
        for (field, value) in source {
            let Some(mapping) = metadata.mappings.properties.get(field) else {
                continue;  // unmapped fields index dynamically as text
            };
            let ok = match mapping.field_type {
                FieldType::Text | FieldType::Keyword => {
                    value.is_string() || value.is_number() || is_string_array(value)
                }
                FieldType::Number => value.is_number(),
                FieldType::Boolean => value.is_boolean(),
                FieldType::Date => value.is_string(),
            };
            if !ok {
                return Err(Error::validation(format!(
                    "field '{}' does not match mapped type {:?}",
                    field, mapping.field_type,
                )));
            }
        }
        Ok(())
    }

    /// Run every indexable field through its configured analyzer,
    /// including keyword sub-fields (`title.keyword`).
    fn analyze_fields(
        &self,
        metadata: &IndexMetadata,
        source: &DocumentSource,
    ) -> Result<Vec<AnalyzedField>> {
        let default_analyzer = metadata.settings.default_analyzer.as_deref();
        let mut analyzed = Vec::new();

        for (field, value) in source {
            let Some(text) = field_text(value) else {
                continue;  // objects and mixed arrays are not indexable
            };

            let mapping = metadata.mappings.properties.get(field);
            self.analyze_one(field, &text, mapping, default_analyzer, &mut analyzed)?;

            if let Some(children) = mapping.and_then(|m| m.fields.as_ref()) {
                for (child, sub) in children {
                    let path = format!("{}.{}", field, child);
                    self.analyze_one(&path, &text, Some(sub), default_analyzer, &mut analyzed)?;
                }
            }
        }

        Ok(analyzed)
    }

    fn analyze_one(
        &self,
        field: &str,
        text: &str,
        mapping: Option<&FieldMapping>,
        default_analyzer: Option<&str>,
        out: &mut Vec<AnalyzedField>,
    ) -> Result<()> {
        let tokens = match mapping.map(|m| m.field_type) {
            Some(FieldType::Keyword) => {
                // Keyword fields index the whole value as one token.
                vec![crate::analysis::token::Token::new(text.to_lowercase(), 0, 0)]
            }
            Some(FieldType::Number) | Some(FieldType::Boolean) | Some(FieldType::Date) => {
                vec![crate::analysis::token::Token::new(text.to_lowercase(), 0, 0)]
            }
            _ => {
                let name = mapping
                    .and_then(|m| m.analyzer.as_deref())
                    .or(default_analyzer);
                self.analyzers.resolve(name)?.analyze(text)
            }
        };

        if !tokens.is_empty() || mapping.is_some() {
            out.push(AnalyzedField {
                field: field.to_string(),
                tokens,
            });
        }
        Ok(())
    }
}

fn is_string_array(value: &Value) -> bool {
    value.as_array().is_some_and(|items| items.iter().all(Value::is_string))
}

/// Text rendering of an indexable JSON value.
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::storage::metadata::{IndexMappings, IndexSettings};

    fn indexer() -> (DocumentIndexer, Arc<TermDictionary>, Arc<CorpusStats>) {
        let dictionary = Arc::new(TermDictionary::new(10_000, 0.75, 4096));
        let stats = Arc::new(CorpusStats::new());
        let indexer = DocumentIndexer::new(
            Arc::new(AnalyzerRegistry::new()),
            dictionary.clone(),
            stats.clone(),
        );
        (indexer, dictionary, stats)
    }

    fn metadata() -> IndexMetadata {
        let mut mappings = IndexMappings::default();
        mappings.properties.insert("title".into(), FieldMapping::text());
        mappings.properties.insert("count".into(), FieldMapping {
            field_type: FieldType::Number,
            analyzer: None,
            boost: None,
            fields: None,
        });
        IndexMetadata::new("idx".into(), IndexSettings::default(), mappings)
    }

    fn source(json: Value) -> DocumentSource {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn indexing_updates_dictionary_and_stats() {
        let (indexer, dictionary, stats) = indexer();
        let metadata = metadata();

        indexer
            .index_document(
                &metadata,
                &DocId::from("1"),
                &source(json!({"title": "Hello World", "count": 10})),
            )
            .unwrap();

        let key = TermKey::new("idx", "title", "hello");
        assert_eq!(dictionary.get_posting_list(&key).unwrap().len(), 1);
        assert_eq!(stats.total_documents("idx"), 1);
        assert_eq!(stats.df("idx", "title:hello"), 1);
        assert_eq!(stats.field_length("idx", &DocId::from("1"), "title"), 2);
        assert_eq!(stats.df("idx", "count:10"), 1);
    }

    #[test]
    fn type_mismatch_is_a_validation_error() {
        let (indexer, _, _) = indexer();
        let metadata = metadata();

        let err = indexer
            .index_document(
                &metadata,
                &DocId::from("1"),
                &source(json!({"count": "not a number"})),
            )
            .unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Validation);
    }

    #[test]
    fn removal_reverses_indexing() {
        let (indexer, dictionary, stats) = indexer();
        let metadata = metadata();
        let mut job = PersistenceJob::new("idx".into(), 1, None);
        let body = source(json!({"title": "Hello World"}));

        indexer.index_document(&metadata, &DocId::from("1"), &body).unwrap();
        indexer.remove_document(&metadata, &DocId::from("1"), &body, &mut job).unwrap();

        assert_eq!(stats.total_documents("idx"), 0);
        assert_eq!(stats.df("idx", "title:hello"), 0);
        let key = TermKey::new("idx", "title", "hello");
        assert_eq!(dictionary.get_posting_list(&key).unwrap().len(), 0);
        assert_eq!(job.deleted_docs, vec![DocId::from("1")]);
    }

    #[test]
    fn sealed_job_carries_dirty_terms_and_snapshot() {
        let (indexer, dictionary, _) = indexer();
        let metadata = metadata();
        let seq = dictionary.begin_batch();
        let job = PersistenceJob::new("idx".into(), seq, None);

        indexer
            .index_document(&metadata, &DocId::from("1"), &source(json!({"title": "hello"})))
            .unwrap();
        let job = indexer.seal_job(job, true);

        assert_eq!(job.dirty_terms.len(), 1);
        let snapshot = job.term_postings.unwrap();
        assert_eq!(snapshot[&TermKey::new("idx", "title", "hello")].len(), 1);
    }

    #[test]
    fn keyword_subfield_indexes_the_whole_value() {
        let (indexer, dictionary, _) = indexer();
        let mut mappings = IndexMappings::default();
        let mut title = FieldMapping::text();
        title.fields = Some(std::collections::HashMap::from([
            ("keyword".to_string(), FieldMapping::keyword()),
        ]));
        mappings.properties.insert("title".into(), title);
        let metadata = IndexMetadata::new("idx".into(), IndexSettings::default(), mappings);

        indexer
            .index_document(&metadata, &DocId::from("1"), &source(json!({"title": "Hello World"})))
            .unwrap();

        let exact = TermKey::new("idx", "title.keyword", "hello world");
        assert!(dictionary.get_posting_list(&exact).is_some());
    }
}
