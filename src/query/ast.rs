use serde::{Serialize, Deserialize};

/// Logical query tree. The parser normalizes every accepted wire shape
/// into this variant; the planner consumes it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Term(TermQuery),
    Phrase(PhraseQuery),
    Boolean(BooleanQuery),
    Wildcard(WildcardQuery),
    MatchAll(MatchAllQuery),
}

/// Exact token match in one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermQuery {
    pub field: String,
    pub token: String,
    pub boost: Option<f64>,
}

/// Ordered token sequence in one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseQuery {
    pub field: String,
    pub tokens: Vec<String>,
    pub boost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BooleanOp {
    And,
    Or,
    /// First child is the base set; remaining children are excluded.
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanQuery {
    pub op: BooleanOp,
    pub children: Vec<Query>,
}

/// Glob over a field value: `*` matches zero or more characters, `?`
/// exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WildcardQuery {
    pub field: String,
    pub pattern: String,
    pub boost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAllQuery {
    pub boost: f64,
}

impl Query {
    pub fn match_all() -> Self {
        Query::MatchAll(MatchAllQuery { boost: 1.0 })
    }

    pub fn term(field: impl Into<String>, token: impl Into<String>) -> Self {
        Query::Term(TermQuery {
            field: field.into(),
            token: token.into(),
            boost: None,
        })
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Query::Wildcard(WildcardQuery {
            field: field.into(),
            pattern: pattern.into(),
            boost: None,
        })
    }

    pub fn and(children: Vec<Query>) -> Self {
        Query::Boolean(BooleanQuery { op: BooleanOp::And, children })
    }

    pub fn or(children: Vec<Query>) -> Self {
        Query::Boolean(BooleanQuery { op: BooleanOp::Or, children })
    }

    /// Flatten trivial boolean wrappers: a one-child AND/OR is its child.
    pub fn simplified(self) -> Query {
        match self {
            Query::Boolean(mut boolean) if boolean.children.len() == 1
                && matches!(boolean.op, BooleanOp::And | BooleanOp::Or) =>
            {
                boolean.children.remove(0).simplified()
            }
            other => other,
        }
    }
}
