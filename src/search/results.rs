use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::core::types::DocumentSource;

/// Search request mirroring the `_search` wire contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Value,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub from: Option<usize>,
    #[serde(default)]
    pub size: Option<usize>,
    /// `"_score"` (default) or `"<field>:asc|desc"` over stored values.
    #[serde(default)]
    pub sort: Option<String>,
    /// Equality post-filters: stored field -> required value.
    #[serde(default)]
    pub filter: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub highlight: Option<bool>,
    /// Stored fields to facet on.
    #[serde(default)]
    pub facets: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Permit partial results from completed branches on timeout.
    #[serde(default)]
    pub allow_partial: Option<bool>,
}

impl SearchRequest {
    pub fn for_query(query: Value) -> Self {
        SearchRequest {
            query,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub source: Option<DocumentSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlights: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub page_size: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub total_results: usize,
}

impl Pagination {
    pub fn compute(total: usize, from: usize, size: usize) -> Self {
        let size = size.max(1);
        let current_page = from / size + 1;
        let total_pages = total.div_ceil(size);

        Pagination {
            current_page,
            total_pages,
            page_size: size,
            has_next: from + size < total,
            has_previous: from > 0,
            total_results: total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,
    pub max_score: f64,
    pub hits: Vec<SearchHit>,
    pub pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<HashMap<String, HashMap<String, u64>>>,
    pub took: u64,
}

/// One fuzzy completion returned by `_suggest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub score: f64,
    pub freq: u64,
    pub distance: u8,
}
