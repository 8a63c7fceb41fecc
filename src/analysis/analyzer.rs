use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use rust_stemmers::Algorithm;
use serde::{Serialize, Deserialize};
use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::filters::special_chars::SpecialCharsFilter;
use crate::analysis::filters::stemmer::StemmerFilter;
use crate::analysis::filters::stopword::StopWordFilter;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{StandardTokenizer, Tokenizer, WhitespaceTokenizer};
use crate::core::error::{Error, ErrorKind, Result};

/// Options recognized by every named analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyzerOptions {
    pub lowercase: bool,
    pub remove_stop_words: bool,
    pub stop_words: Vec<String>,
    pub remove_special_chars: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            lowercase: true,
            remove_stop_words: false,
            stop_words: Vec::new(),
            remove_special_chars: false,
        }
    }
}

/// Text analysis pipeline: tokenizer followed by a filter chain.
/// Pure and side-effect free; empty input yields an empty sequence.
pub struct Analyzer {
    pub name: String,
    pub tokenizer: Box<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
}

impl Analyzer {
    pub fn new(name: String, tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer {
            name,
            tokenizer,
            filters: Vec::new(),
        }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    fn apply_options(mut self, options: &AnalyzerOptions) -> Self {
        if options.lowercase {
            self = self.add_filter(Box::new(LowercaseFilter));
        }
        if options.remove_stop_words {
            let filter = if options.stop_words.is_empty() {
                StopWordFilter::english()
            } else {
                StopWordFilter::new(options.stop_words.clone())
            };
            self = self.add_filter(Box::new(filter));
        }
        if options.remove_special_chars {
            self = self.add_filter(Box::new(SpecialCharsFilter));
        }
        self
    }

    /// Unicode word-boundary split, lowercased.
    pub fn standard() -> Self {
        Analyzer::standard_with_options(&AnalyzerOptions::default())
    }

    pub fn standard_with_options(options: &AnalyzerOptions) -> Self {
        Analyzer::new("standard".to_string(), Box::new(StandardTokenizer::default()))
            .apply_options(options)
    }

    /// Whitespace runs only; punctuation survives.
    pub fn whitespace() -> Self {
        Analyzer::new("whitespace".to_string(), Box::new(WhitespaceTokenizer))
    }

    /// Standard pipeline plus English stop words and stemming.
    pub fn english() -> Self {
        Analyzer::new("english".to_string(), Box::new(StandardTokenizer::default()))
            .add_filter(Box::new(LowercaseFilter))
            .add_filter(Box::new(StopWordFilter::english()))
            .add_filter(Box::new(StemmerFilter::new(Algorithm::English)))
    }
}

/// Registry resolving analyzer names from index mappings.
pub struct AnalyzerRegistry {
    analyzers: RwLock<HashMap<String, Arc<Analyzer>>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        let registry = AnalyzerRegistry {
            analyzers: RwLock::new(HashMap::new()),
        };

        registry.register("standard", Analyzer::standard());
        registry.register("whitespace", Analyzer::whitespace());
        registry.register("english", Analyzer::english());
        registry
    }

    pub fn register(&self, name: &str, analyzer: Analyzer) {
        self.analyzers.write().insert(name.to_string(), Arc::new(analyzer));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Analyzer>> {
        self.analyzers.read().get(name).cloned()
    }

    /// Resolve an optional mapping-level analyzer name, defaulting to
    /// `standard`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<Analyzer>> {
        let name = name.unwrap_or("standard");
        self.get(name).ok_or_else(|| Error {
            kind: ErrorKind::Validation,
            context: format!("Analyzer '{}' not found", name),
        })
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
