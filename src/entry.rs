//! Entry items returned by providers.
//!
//! Every item carries a globally unique id prefixed with its provider scheme,
//! e.g. `app://firefox.desktop` or `tag://work`.

use serde::{Deserialize, Serialize};

/// A single result row, as produced by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryItem {
    /// Globally unique, scheme-prefixed identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Secondary text (path, URL, expression, ...).
    #[serde(default)]
    pub description: Option<String>,

    /// Provider-assigned relevance for the current query. Higher is better.
    #[serde(default)]
    pub relevance: i64,

    /// Tags assigned to this entry.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EntryItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            relevance: 0,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_relevance(mut self, relevance: i64) -> Self {
        self.relevance = relevance;
        self
    }

    /// The scheme part of the id (`"app"` for `app://foo`), if any.
    pub fn scheme(&self) -> Option<&str> {
        scheme_of(&self.id)
    }
}

/// Extract the scheme of a scheme-prefixed id.
pub fn scheme_of(id: &str) -> Option<&str> {
    id.split_once("://").map(|(scheme, _)| scheme)
}
