//! Query model for the relation catalog.
//!
//! A [`Query`] is a sorted mapping from a clause key to a clause value. The
//! key is either a value index name or the reserved relation-identity key
//! ([`QueryKey::Relation`]), used to constrain results to specific relation
//! tokens. The value is a concrete token, the empty marker ("this index
//! produced no value for the relation"), or a disjunctive wildcard over a
//! set of candidate tokens.
//!
//! # Example
//!
//! ```
//! use relata::{any, Query, Token};
//!
//! let q = Query::new()
//!     .with("color", "red")
//!     .with_value("tags", any(["a", "b"]))
//!     .with_empty("owner");
//!
//! assert_eq!(q.len(), 3);
//! assert!(q.get("tags").is_some());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::token::Token;

/// A clause key: either a value index name or the relation identity itself.
///
/// `Relation` sorts before every index name, so relation clauses always
/// come first when iterating a query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueryKey {
    /// Constrain by relation token identity.
    Relation,
    /// Constrain by the named value index.
    Index(String),
}

impl QueryKey {
    /// The index name, if this is an index clause.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Relation => None,
            Self::Index(name) => Some(name),
        }
    }
}

impl From<&str> for QueryKey {
    fn from(name: &str) -> Self {
        Self::Index(name.to_owned())
    }
}

impl From<String> for QueryKey {
    fn from(name: String) -> Self {
        Self::Index(name)
    }
}

/// A clause value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryValue {
    /// Match relations whose index produced exactly this token.
    Is(Token),
    /// Match relations that contributed no value to this index.
    Empty,
    /// Match relations whose index produced any of these tokens.
    AnyOf(BTreeSet<Token>),
}

impl QueryValue {
    /// Whether this is the disjunctive wildcard.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::AnyOf(_))
    }
}

impl<T: Into<Token>> From<T> for QueryValue {
    fn from(v: T) -> Self {
        Self::Is(v.into())
    }
}

/// Build a disjunctive wildcard over candidate values.
///
/// ```
/// use relata::{any, QueryValue};
///
/// let v = any([1i64, 2, 3]);
/// assert!(v.is_any());
/// ```
#[must_use]
pub fn any<T: Into<Token>>(values: impl IntoIterator<Item = T>) -> QueryValue {
    QueryValue::AnyOf(values.into_iter().map(Into::into).collect())
}

/// A conjunctive query over value indexes and relation identity.
///
/// Clauses are kept sorted by key, which makes the clause name list of a
/// query canonical (search index signatures depend on this).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Query {
    clauses: BTreeMap<QueryKey, QueryValue>,
}

impl Query {
    /// Create an empty query (matches every indexed relation).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality clause for a value index.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Token>) -> Self {
        self.clauses.insert(QueryKey::Index(name.into()), QueryValue::Is(value.into()));
        self
    }

    /// Add a clause with an explicit [`QueryValue`].
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: QueryValue) -> Self {
        self.clauses.insert(QueryKey::Index(name.into()), value);
        self
    }

    /// Add an empty-marker clause: the index produced no value.
    #[must_use]
    pub fn with_empty(mut self, name: impl Into<String>) -> Self {
        self.clauses.insert(QueryKey::Index(name.into()), QueryValue::Empty);
        self
    }

    /// Constrain to a single relation token.
    #[must_use]
    pub fn with_relation(mut self, token: impl Into<Token>) -> Self {
        self.clauses.insert(QueryKey::Relation, QueryValue::Is(token.into()));
        self
    }

    /// Constrain to any of the given relation tokens.
    #[must_use]
    pub fn with_relations<T: Into<Token>>(mut self, tokens: impl IntoIterator<Item = T>) -> Self {
        self.clauses.insert(
            QueryKey::Relation,
            QueryValue::AnyOf(tokens.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Insert a clause under an arbitrary key.
    pub fn insert(&mut self, key: QueryKey, value: QueryValue) {
        self.clauses.insert(key, value);
    }

    /// Look up the clause for a value index name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.clauses.get(&QueryKey::Index(name.to_owned()))
    }

    /// Look up the clause for an arbitrary key.
    #[must_use]
    pub fn get_key(&self, key: &QueryKey) -> Option<&QueryValue> {
        self.clauses.get(key)
    }

    /// Whether the query has a relation-identity clause.
    #[must_use]
    pub fn has_relation_clause(&self) -> bool {
        self.clauses.contains_key(&QueryKey::Relation)
    }

    /// Number of clauses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Whether the query has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Iterate clauses in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&QueryKey, &QueryValue)> {
        self.clauses.iter()
    }

    /// The sorted names of the index clauses (relation clause excluded).
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.clauses.keys().filter_map(|k| k.name().map(str::to_owned)).collect()
    }
}

impl FromIterator<(QueryKey, QueryValue)> for Query {
    fn from_iter<I: IntoIterator<Item = (QueryKey, QueryValue)>>(iter: I) -> Self {
        Self { clauses: iter.into_iter().collect() }
    }
}
