//! Query factories: pluggable expansion rules for transitive search.
//!
//! A transitive search walks a graph whose edges are defined by queries.
//! Given the chain of relations walked so far, a bound factory produces
//! the queries whose results extend the chain by one hop. Factories are
//! consulted in two stages: [`QueryFactory::bind`] inspects an input query
//! and either declines (`None`, letting the next registered factory try)
//! or returns a [`QueryExpander`] closure that drives the walk.
//!
//! [`TransposingTransitive`] is the stock factory covering the common
//! two-column case: follow a relation from the value under one index to
//! relations matching that value under the other.

use crate::catalog::Catalog;
use crate::error::CatalogResult;
use crate::query::{Query, QueryKey, QueryValue};
use crate::token::Token;

/// Produces the next-hop queries for a chain of relation tokens.
///
/// Called with the empty chain once at the start of a walk; the queries
/// returned for it seed the traversal (usually just the original query).
pub type QueryExpander<R> =
    Box<dyn Fn(&[Token], &Catalog<R>) -> CatalogResult<Vec<Query>> + Send + Sync>;

/// A rule for expanding queries during transitive search.
pub trait QueryFactory<R>: Send + Sync {
    /// Inspect `query` and return an expander if this factory knows how to
    /// walk it, or `None` to decline.
    fn bind(&self, query: &Query, catalog: &Catalog<R>) -> Option<QueryExpander<R>>;
}

/// Walks relations by transposing a pair of clause keys.
///
/// Built from two keys, typically two value index names such as
/// `"subject"` and `"object"`. A query constraining exactly one of the
/// pair is accepted; any other clauses are carried into every generated
/// query unchanged. From the last relation of a chain, the factory reads
/// that relation's tokens under the *other* key of the pair and emits one
/// next-hop query per token, keeping the constrained key the same.
///
/// Either key of the pair may be [`QueryKey::Relation`], in which case the
/// relation token itself stands in for the looked-up values.
#[derive(Debug, Clone)]
pub struct TransposingTransitive {
    names: [QueryKey; 2],
    statics: Vec<(QueryKey, QueryValue)>,
}

impl TransposingTransitive {
    /// Create a factory transposing the two given keys.
    #[must_use]
    pub fn new(name1: impl Into<QueryKey>, name2: impl Into<QueryKey>) -> Self {
        Self { names: [name1.into(), name2.into()], statics: Vec::new() }
    }

    /// Require a clause to appear verbatim in the query for this factory
    /// to bind. Useful when one walk rule should only apply to searches
    /// already scoped by another clause.
    #[must_use]
    pub fn with_static(mut self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.statics.push((QueryKey::Index(name.into()), value.into()));
        self
    }

    /// The transposed pair.
    #[must_use]
    pub fn names(&self) -> &[QueryKey; 2] {
        &self.names
    }

    /// The key to look up on walked relations when `dynamic` is the
    /// constrained key of the pair.
    fn transposed(&self, dynamic: &QueryKey) -> QueryKey {
        if *dynamic == self.names[0] {
            self.names[1].clone()
        } else {
            self.names[0].clone()
        }
    }
}

impl<R> QueryFactory<R> for TransposingTransitive {
    fn bind(&self, query: &Query, _catalog: &Catalog<R>) -> Option<QueryExpander<R>> {
        let mut dynamic: Option<&QueryKey> = None;
        for (key, _) in query.iter() {
            if self.names.contains(key) {
                if dynamic.is_some() {
                    // Both keys constrained: nothing left to walk.
                    return None;
                }
                dynamic = Some(key);
            }
        }
        let dynamic = dynamic?.clone();
        if !self.statics.iter().all(|(key, value)| query.get_key(key) == Some(value)) {
            return None;
        }
        let lookup = self.transposed(&dynamic);
        let seed = query.clone();

        Some(Box::new(move |chain: &[Token], catalog: &Catalog<R>| {
            let Some(last) = chain.last() else {
                return Ok(vec![seed.clone()]);
            };
            let values = match &lookup {
                QueryKey::Relation => vec![last.clone()],
                QueryKey::Index(name) => match catalog.get_value_tokens(name, last)? {
                    Some(set) => set.iter().collect(),
                    None => Vec::new(),
                },
            };
            let mut out = Vec::with_capacity(values.len());
            for value in values {
                let mut next = seed.clone();
                next.insert(dynamic.clone(), QueryValue::Is(value));
                out.push(next);
            }
            Ok(out)
        }))
    }
}
