use regex::Regex;
use crate::core::error::Result;
use crate::core::types::TermKey;
use crate::query::planner::literal_prefix;
use crate::search::deadline::SearchDeadline;
use crate::storage::chunk_store::ChunkedPostingStore;

/// Resolves glob patterns against the persisted term set without a
/// full dictionary scan: the store's token-prefix index narrows the
/// candidates, the compiled pattern regex filters them.
pub struct WildcardExpander<'a> {
    store: &'a ChunkedPostingStore,
}

impl<'a> WildcardExpander<'a> {
    pub fn new(store: &'a ChunkedPostingStore) -> Self {
        WildcardExpander { store }
    }

    /// Term keys of `field` whose token matches the pattern. A leading
    /// wildcard degrades the prefix to empty, so the token index is
    /// walked end to end; the planner already priced that in.
    pub async fn expand(
        &self,
        index: &str,
        field: &str,
        pattern: &str,
        regex: &Regex,
        deadline: &SearchDeadline,
    ) -> Result<Vec<TermKey>> {
        let prefix = literal_prefix(pattern);
        let candidates = self.store.find_terms_by_prefix(index, prefix).await?;

        let mut matches = Vec::new();
        for (i, key) in candidates.into_iter().enumerate() {
            if i % 256 == 0 {
                deadline.check()?;
            }
            if key.field == field && regex.is_match(&key.token) {
                matches.push(key);
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::core::types::DocId;
    use crate::index::posting::{PostingEntry, PostingList};
    use crate::query::planner::compile_wildcard;
    use crate::storage::layout::StorageLayout;
    use tempfile::TempDir;

    async fn seeded_store(dir: &TempDir, terms: &[&str]) -> ChunkedPostingStore {
        let layout = Arc::new(StorageLayout::new(dir.path()).unwrap());
        let store = ChunkedPostingStore::new(layout, 5000);
        for term in terms {
            let list = PostingList::from_entries(vec![PostingEntry::new(DocId::from("1"), vec![0])]);
            store.write_postings("idx", term, &list).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn suffix_pattern_expands_through_the_prefix_index() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, &["title:smart", "title:smartphone", "title:dumb", "body:smartly"]).await;

        let expander = WildcardExpander::new(&store);
        let regex = compile_wildcard("smart*").unwrap();
        let deadline = SearchDeadline::new(1000);

        let mut tokens: Vec<String> = expander
            .expand("idx", "title", "smart*", &regex, &deadline)
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.token)
            .collect();
        tokens.sort();
        assert_eq!(tokens, vec!["smart", "smartphone"]);
    }

    #[tokio::test]
    async fn inner_wildcard_only_requires_the_literal_prefix() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, &["title:foobar", "title:fooxbar", "title:foaxbar"]).await;

        let expander = WildcardExpander::new(&store);
        let regex = compile_wildcard("foo*bar").unwrap();
        let deadline = SearchDeadline::new(1000);

        let mut tokens: Vec<String> = expander
            .expand("idx", "title", "foo*bar", &regex, &deadline)
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.token)
            .collect();
        tokens.sort();
        assert_eq!(tokens, vec!["foobar", "fooxbar"]);
    }
}
