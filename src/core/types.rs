use std::fmt;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};

/// Opaque document identifier, ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        DocId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        DocId(id.to_string())
    }
}

impl From<String> for DocId {
    fn from(id: String) -> Self {
        DocId(id)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index-aware term key. All dictionary lookups and persistent keys use
/// this triple so documents from different indexes never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TermKey {
    pub index: String,
    pub field: String,
    pub token: String,
}

impl TermKey {
    pub fn new(index: impl Into<String>, field: impl Into<String>, token: impl Into<String>) -> Self {
        TermKey {
            index: index.into(),
            field: field.into(),
            token: token.into(),
        }
    }

    /// Canonical serialized form: `index:field:token`.
    pub fn to_canonical(&self) -> String {
        format!("{}:{}:{}", self.index, self.field, self.token)
    }

    /// The `field:token` part used inside a single index's catalog.
    pub fn local_key(&self) -> String {
        format!("{}:{}", self.field, self.token)
    }

    pub fn parse(canonical: &str) -> Result<Self> {
        let mut parts = canonical.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(index), Some(field), Some(token)) if !index.is_empty() && !field.is_empty() => {
                Ok(TermKey::new(index, field, token))
            }
            _ => Err(Error::new(
                ErrorKind::Parse,
                format!("Invalid term key '{}'", canonical),
            )),
        }
    }

    /// Parse a `field:token` key scoped to a known index.
    pub fn parse_local(index: &str, local: &str) -> Result<Self> {
        let mut parts = local.splitn(2, ':');
        match (parts.next(), parts.next()) {
            (Some(field), Some(token)) if !field.is_empty() => {
                Ok(TermKey::new(index, field, token))
            }
            _ => Err(Error::new(
                ErrorKind::Parse,
                format!("Invalid local term key '{}'", local),
            )),
        }
    }
}

impl fmt::Display for TermKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_canonical())
    }
}

/// Schema-flexible document body, keyed by field name.
pub type DocumentSource = serde_json::Map<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_key_round_trips_through_canonical_form() {
        let key = TermKey::new("products", "title", "hello");
        assert_eq!(key.to_canonical(), "products:title:hello");
        assert_eq!(TermKey::parse("products:title:hello").unwrap(), key);
    }

    #[test]
    fn term_key_token_may_contain_separators() {
        let key = TermKey::parse("idx:title.keyword:a:b").unwrap();
        assert_eq!(key.field, "title.keyword");
        assert_eq!(key.token, "a:b");
    }

    #[test]
    fn doc_ids_order_lexicographically() {
        let mut ids = vec![DocId::from("10"), DocId::from("2"), DocId::from("1")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "1");
        assert_eq!(ids[1].as_str(), "10");
        assert_eq!(ids[2].as_str(), "2");
    }
}
