use nom::{
    branch::alt,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, multispace0},
    combinator::map,
    multi::many0,
    sequence::{delimited, preceded},
    IResult, Parser,
};
use serde_json::Value;
use crate::analysis::analyzer::Analyzer;
use crate::query::ast::{
    BooleanOp, BooleanQuery, MatchAllQuery, PhraseQuery, Query, TermQuery, WildcardQuery,
};

/// A lexed piece of a bare string query.
#[derive(Debug, PartialEq)]
enum Fragment<'a> {
    Phrase(&'a str),
    Word(&'a str),
}

fn quoted_phrase(input: &str) -> IResult<&str, Fragment<'_>> {
    map(
        delimited(char('"'), take_till(|c| c == '"'), char('"')),
        Fragment::Phrase,
    )
    .parse(input)
}

fn bare_word(input: &str) -> IResult<&str, Fragment<'_>> {
    map(
        take_while1(|c: char| !c.is_whitespace() && c != '"'),
        Fragment::Word,
    )
    .parse(input)
}

fn fragment(input: &str) -> IResult<&str, Fragment<'_>> {
    preceded(multispace0, alt((quoted_phrase, bare_word))).parse(input)
}

fn lex_fragments(input: &str) -> Vec<Fragment<'_>> {
    match many0(fragment).parse(input) {
        Ok((_, fragments)) => fragments,
        Err(_) => Vec::new(),
    }
}

/// Forgiving query parser: accepts the permissive wire shapes and
/// normalizes them into the `Query` variant. Unrecognized shapes
/// produce a plain match-all rather than an error.
pub struct QueryParser {
    analyzer: Analyzer,
}

impl QueryParser {
    pub fn new() -> Self {
        QueryParser {
            analyzer: Analyzer::standard(),
        }
    }

    /// Parse a raw query value against the requested field set.
    pub fn parse(&self, raw: &Value, fields: &[String]) -> Query {
        match raw {
            Value::String(text) => self.parse_string(text, fields),
            Value::Object(map) => self.parse_object(map, fields),
            Value::Null => Query::match_all(),
            _ => Query::match_all(),
        }
    }

    fn parse_object(&self, map: &serde_json::Map<String, Value>, fields: &[String]) -> Query {
        if let Some(clause) = map.get("match") {
            return self.parse_match(clause, fields);
        }
        if let Some(clause) = map.get("term") {
            return self.parse_leaf(clause, fields, |field, value, boost| {
                Query::Term(TermQuery { field, token: value, boost })
            });
        }
        if let Some(clause) = map.get("wildcard") {
            return self.parse_leaf(clause, fields, |field, value, boost| {
                Query::Wildcard(WildcardQuery { field, pattern: value, boost })
            });
        }
        if let Some(clause) = map.get("match_phrase").or_else(|| map.get("phrase")) {
            return self.parse_phrase(clause, fields);
        }
        if let Some(clause) = map.get("bool") {
            return self.parse_bool(clause, fields);
        }
        if let Some(clause) = map.get("match_all") {
            let boost = clause.get("boost").and_then(Value::as_f64).unwrap_or(1.0);
            return Query::MatchAll(MatchAllQuery { boost: boost.max(0.0) });
        }
        if let Some(Value::String(text)) = map.get("query") {
            return self.parse_string(text, fields);
        }
        Query::match_all()
    }

    /// `{field, value}` or `{<field>: <value>}`, with optional boost.
    fn extract_field_value(&self, clause: &Value, fields: &[String]) -> Option<(String, String, Option<f64>)> {
        let map = clause.as_object()?;

        if let Some(value) = map.get("value").or_else(|| map.get("query")) {
            let field = map.get("field")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| fields.first().cloned())?;
            let boost = map.get("boost").and_then(Value::as_f64);
            return Some((field, value_to_text(value)?, boost));
        }

        // Shorthand: first non-option key is the field.
        for (key, value) in map {
            if key == "boost" {
                continue;
            }
            let boost = map.get("boost").and_then(Value::as_f64);
            if let Some(inner) = value.as_object() {
                let text = inner.get("value").or_else(|| inner.get("query")).and_then(|v| value_to_text(v))?;
                let boost = inner.get("boost").and_then(Value::as_f64).or(boost);
                return Some((key.clone(), text, boost));
            }
            return Some((key.clone(), value_to_text(value)?, boost));
        }
        None
    }

    fn parse_leaf<F>(&self, clause: &Value, fields: &[String], build: F) -> Query
    where
        F: Fn(String, String, Option<f64>) -> Query,
    {
        match self.extract_field_value(clause, fields) {
            Some((field, value, boost)) => build(field, value, boost),
            None => Query::match_all(),
        }
    }

    /// A match clause whose value carries wildcards is rewritten into a
    /// wildcard query; otherwise the value is analyzed into terms.
    fn parse_match(&self, clause: &Value, fields: &[String]) -> Query {
        let (field, value, boost) = match self.extract_field_value(clause, fields) {
            Some(parts) => parts,
            None => return Query::match_all(),
        };

        if has_wildcards(&value) {
            return Query::Wildcard(WildcardQuery { field, pattern: value, boost });
        }

        let tokens = self.analyzer.analyze(&value);
        match tokens.len() {
            0 => Query::match_all(),
            1 => Query::Term(TermQuery {
                field,
                token: tokens[0].text.clone(),
                boost,
            }),
            _ => Query::or(
                tokens.into_iter()
                    .map(|token| Query::Term(TermQuery {
                        field: field.clone(),
                        token: token.text,
                        boost,
                    }))
                    .collect(),
            ),
        }
    }

    fn parse_phrase(&self, clause: &Value, fields: &[String]) -> Query {
        let (field, value, boost) = match self.extract_field_value(clause, fields) {
            Some(parts) => parts,
            None => return Query::match_all(),
        };

        let tokens: Vec<String> = self.analyzer
            .analyze(&value)
            .into_iter()
            .map(|t| t.text)
            .collect();
        match tokens.len() {
            0 => Query::match_all(),
            1 => Query::Term(TermQuery { field, token: tokens.into_iter().next().unwrap(), boost }),
            _ => Query::Phrase(PhraseQuery { field, tokens, boost }),
        }
    }

    fn parse_bool(&self, clause: &Value, fields: &[String]) -> Query {
        let map = match clause.as_object() {
            Some(map) => map,
            None => return Query::match_all(),
        };

        let collect = |key: &str| -> Vec<Query> {
            match map.get(key) {
                Some(Value::Array(items)) => items.iter().map(|q| self.parse(q, fields)).collect(),
                Some(single) => vec![self.parse(single, fields)],
                None => Vec::new(),
            }
        };

        let must = collect("must");
        let should = collect("should");
        let must_not = collect("must_not");

        let mut positive = Vec::new();
        if !must.is_empty() {
            positive.push(Query::and(must).simplified());
        }
        if !should.is_empty() {
            positive.push(Query::or(should).simplified());
        }

        let base = match positive.len() {
            0 => Query::match_all(),
            1 => positive.remove(0),
            _ => Query::and(positive),
        };

        if must_not.is_empty() {
            base
        } else {
            let mut children = vec![base];
            children.extend(must_not);
            Query::Boolean(BooleanQuery { op: BooleanOp::Not, children })
        }
    }

    /// Bare string queries: quoted substrings become phrases, remaining
    /// tokens become terms, `*`/`?` switch a token to a wildcard, and a
    /// lone `*` or empty string matches everything. Multiple fragments
    /// or fields are OR-combined.
    fn parse_string(&self, text: &str, fields: &[String]) -> Query {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Query::match_all();
        }

        let fields: Vec<String> = if fields.is_empty() {
            vec!["_all".to_string()]
        } else {
            fields.to_vec()
        };

        let mut per_field = Vec::new();
        for fragment in lex_fragments(trimmed) {
            match fragment {
                Fragment::Phrase(phrase) => {
                    let tokens: Vec<String> = self.analyzer
                        .analyze(phrase)
                        .into_iter()
                        .map(|t| t.text)
                        .collect();
                    if tokens.is_empty() {
                        continue;
                    }
                    for field in &fields {
                        per_field.push(if tokens.len() == 1 {
                            Query::term(field.clone(), tokens[0].clone())
                        } else {
                            Query::Phrase(PhraseQuery {
                                field: field.clone(),
                                tokens: tokens.clone(),
                                boost: None,
                            })
                        });
                    }
                }
                Fragment::Word(word) if has_wildcards(word) => {
                    for field in &fields {
                        per_field.push(Query::wildcard(field.clone(), word.to_lowercase()));
                    }
                }
                Fragment::Word(word) => {
                    for token in self.analyzer.analyze(word) {
                        for field in &fields {
                            per_field.push(Query::term(field.clone(), token.text.clone()));
                        }
                    }
                }
            }
        }

        match per_field.len() {
            0 => Query::match_all(),
            1 => per_field.remove(0),
            _ => Query::or(per_field),
        }
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

fn has_wildcards(value: &str) -> bool {
    value.contains('*') || value.contains('?')
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
