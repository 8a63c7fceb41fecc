use std::collections::HashSet;
use regex::Regex;
use crate::analysis::tokenizer::{StandardTokenizer, Tokenizer};
use crate::query::ast::Query;
use crate::query::planner::compile_wildcard;

/// Wraps matched tokens of a stored field in `<em>` markers.
pub struct Highlighter {
    terms: HashSet<String>,
    patterns: Vec<Regex>,
    tokenizer: StandardTokenizer,
}

impl Highlighter {
    /// Collect the match vocabulary from a parsed query: term tokens,
    /// phrase tokens, and wildcard patterns.
    pub fn from_query(query: &Query) -> Self {
        let mut terms = HashSet::new();
        let mut patterns = Vec::new();
        collect(query, &mut terms, &mut patterns);

        Highlighter {
            terms,
            patterns,
            tokenizer: StandardTokenizer::default(),
        }
    }

    /// One highlighted fragment covering the whole field value, or
    /// `None` when nothing in it matched.
    pub fn highlight(&self, text: &str) -> Option<String> {
        let tokens = self.tokenizer.tokenize(text);
        let mut spans: Vec<(usize, usize)> = Vec::new();

        for token in &tokens {
            let lowered = token.text.to_lowercase();
            let matched = self.terms.contains(&lowered)
                || self.patterns.iter().any(|p| p.is_match(&lowered));
            if matched {
                spans.push((token.offset, token.offset + token.length));
            }
        }

        if spans.is_empty() {
            return None;
        }

        let mut out = String::with_capacity(text.len() + spans.len() * 9);
        let mut cursor = 0;
        for (start, end) in spans {
            out.push_str(&text[cursor..start]);
            out.push_str("<em>");
            out.push_str(&text[start..end]);
            out.push_str("</em>");
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        Some(out)
    }
}

fn collect(query: &Query, terms: &mut HashSet<String>, patterns: &mut Vec<Regex>) {
    match query {
        Query::Term(term) => {
            terms.insert(term.token.to_lowercase());
        }
        Query::Phrase(phrase) => {
            for token in &phrase.tokens {
                terms.insert(token.to_lowercase());
            }
        }
        Query::Wildcard(wildcard) => {
            if let Ok(regex) = compile_wildcard(&wildcard.pattern.to_lowercase()) {
                patterns.push(regex);
            }
        }
        Query::Boolean(boolean) => {
            // Negated children still highlight their positive side only.
            let positive = match boolean.op {
                crate::query::ast::BooleanOp::Not => &boolean.children[..1.min(boolean.children.len())],
                _ => &boolean.children[..],
            };
            for child in positive {
                collect(child, terms, patterns);
            }
        }
        Query::MatchAll(_) => {}
    }
}
