use std::collections::BTreeMap;
use fst::{IntoStreamer, Map, MapBuilder, Streamer};
use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA};
use crate::core::error::Result;
use crate::index::stats::CorpusStats;
use crate::search::results::Suggestion;
use crate::storage::chunk_store::ChunkedPostingStore;

/// Fuzzy term completion over one field's persisted vocabulary: an FST
/// of the field's tokens filtered through a Levenshtein DFA, ranked by
/// edit distance then document frequency.
pub struct Suggester<'a> {
    store: &'a ChunkedPostingStore,
    stats: &'a CorpusStats,
}

impl<'a> Suggester<'a> {
    pub fn new(store: &'a ChunkedPostingStore, stats: &'a CorpusStats) -> Self {
        Suggester { store, stats }
    }

    pub async fn suggest(
        &self,
        index: &str,
        field: &str,
        text: &str,
        size: usize,
    ) -> Result<Vec<Suggestion>> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() || size == 0 {
            return Ok(Vec::new());
        }

        let vocabulary = self.field_vocabulary(index, field).await?;
        if vocabulary.is_empty() {
            return Ok(Vec::new());
        }

        let map = build_fst(&vocabulary)?;
        let max_edits: u8 = if needle.chars().count() < 3 { 1 } else { 2 };
        let dfa = LevenshteinAutomatonBuilder::new(max_edits, true).build_dfa(&needle);

        let mut suggestions = Vec::new();

        // Prefix completions first: FST range scan from the needle.
        let mut stream = map.range().ge(needle.as_bytes()).into_stream();
        while let Some((term_bytes, freq)) = stream.next() {
            if !term_bytes.starts_with(needle.as_bytes()) {
                break;
            }
            if let Ok(term) = std::str::from_utf8(term_bytes) {
                let distance = edit_distance(&needle, term).min(u8::MAX as usize) as u8;
                suggestions.push(make_suggestion(term, freq, distance));
            }
        }

        // Fuzzy candidates: every vocabulary term within edit distance.
        let mut stream = map.stream().into_stream();
        while let Some((term_bytes, freq)) = stream.next() {
            if term_bytes.starts_with(needle.as_bytes()) {
                continue;  // already collected above
            }
            if let Some(distance) = dfa_distance(&dfa, term_bytes) {
                if let Ok(term) = std::str::from_utf8(term_bytes) {
                    suggestions.push(make_suggestion(term, freq, distance));
                }
            }
        }

        suggestions.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then(b.freq.cmp(&a.freq))
                .then(a.text.cmp(&b.text))
        });
        suggestions.dedup_by(|a, b| a.text == b.text);
        suggestions.truncate(size);
        Ok(suggestions)
    }

    /// `token -> df` for one field, from the persisted term set.
    async fn field_vocabulary(&self, index: &str, field: &str) -> Result<BTreeMap<String, u64>> {
        let mut vocabulary = BTreeMap::new();
        for key in self.store.find_terms_by_index(index).await? {
            if key.field != field {
                continue;
            }
            let df = self.stats.df(index, &key.local_key()).max(1);
            vocabulary.insert(key.token, df);
        }
        Ok(vocabulary)
    }
}

fn make_suggestion(term: &str, freq: u64, distance: u8) -> Suggestion {
    Suggestion {
        text: term.to_string(),
        score: 1.0 / (1.0 + distance as f64),
        freq,
        distance,
    }
}

fn build_fst(vocabulary: &BTreeMap<String, u64>) -> Result<Map<Vec<u8>>> {
    // FST input must be sorted; BTreeMap iteration already is.
    let mut builder = MapBuilder::memory();
    for (term, freq) in vocabulary {
        builder.insert(term.as_bytes(), *freq)?;
    }
    Ok(builder.into_map())
}

/// Feed a candidate through the DFA byte by byte.
fn dfa_distance(dfa: &DFA, candidate: &[u8]) -> Option<u8> {
    let mut state = dfa.initial_state();
    for &byte in candidate {
        state = dfa.transition(state, byte);
    }
    match dfa.distance(state) {
        Distance::Exact(d) => Some(d),
        Distance::AtLeast(_) => None,
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr_row[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr_row[j] = (prev_row[j] + 1)
                .min(curr_row[j - 1] + 1)
                .min(prev_row[j - 1] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::core::types::DocId;
    use crate::index::posting::{PostingEntry, PostingList};
    use crate::storage::layout::StorageLayout;
    use tempfile::TempDir;

    async fn fixtures(terms: &[&str]) -> (TempDir, ChunkedPostingStore, CorpusStats) {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()).unwrap());
        let store = ChunkedPostingStore::new(layout, 5000);
        let stats = CorpusStats::new();

        for term in terms {
            let list = PostingList::from_entries(vec![PostingEntry::new(DocId::from("1"), vec![0])]);
            store.write_postings("idx", &format!("title:{}", term), &list).await.unwrap();
            stats.update("idx", |s| s.increment_df(&format!("title:{}", term)));
        }
        (dir, store, stats)
    }

    #[tokio::test]
    async fn prefix_completions_come_first() {
        let (_dir, store, stats) = fixtures(&["search", "searching", "sea"]).await;
        let suggester = Suggester::new(&store, &stats);

        let suggestions = suggester.suggest("idx", "title", "search", 10).await.unwrap();
        assert_eq!(suggestions[0].text, "search");
        assert_eq!(suggestions[0].distance, 0);
        assert!(suggestions.iter().any(|s| s.text == "searching"));
    }

    #[tokio::test]
    async fn typos_resolve_within_edit_distance() {
        let (_dir, store, stats) = fixtures(&["phone", "photo", "zebra"]).await;
        let suggester = Suggester::new(&store, &stats);

        let suggestions = suggester.suggest("idx", "title", "phnoe", 10).await.unwrap();
        assert!(suggestions.iter().any(|s| s.text == "phone"));
        assert!(!suggestions.iter().any(|s| s.text == "zebra"));
    }

    #[tokio::test]
    async fn empty_input_or_vocabulary_is_empty_output() {
        let (_dir, store, stats) = fixtures(&[]).await;
        let suggester = Suggester::new(&store, &stats);
        assert!(suggester.suggest("idx", "title", "", 10).await.unwrap().is_empty());
        assert!(suggester.suggest("idx", "title", "x", 10).await.unwrap().is_empty());
    }
}
