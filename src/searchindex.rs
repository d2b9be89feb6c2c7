//! Search indexes: precomputed answers for known search shapes.
//!
//! A search index registers the signatures of the searches it can answer.
//! When a search call matches one of those signatures, the catalog offers
//! the call to the index before walking the maps itself; a `None` result
//! means the index declines and the catalog falls through to the brute
//! walk, so an index never has to handle every case it registered for.
//!
//! Search indexes are also notified of every mutation, before plain
//! listeners, which is how they keep their precomputed state current.
//!
//! [`TransitiveMembership`] is the stock implementation: it maintains the
//! transitive closure of every relation under a transposing walk and
//! answers unlimited-depth searches from it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::catalog::Catalog;
use crate::error::CatalogResult;
use crate::factory::{QueryFactory, TransposingTransitive};
use crate::listener::ChangeMap;
use crate::query::{Query, QueryKey, QueryValue};
use crate::token::{multiunion, ContainerFamily, Token, TokenSet};

/// The shape of a search call, used to route calls to search indexes.
///
/// Two calls share a signature when they ask for the same kind of result
/// (relation tokens, or value tokens of one named index), constrain the
/// same clause names, agree on whether a relation-identity clause is
/// present, and use the same depth limit. The concrete clause values are
/// not part of the signature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature {
    /// `true` for relation-token searches, `false` for value searches.
    pub relations: bool,
    /// The value index being searched, for value searches.
    pub name: Option<String>,
    /// Whether the query carries a relation-identity clause.
    pub relation_clause: bool,
    /// Sorted names of the query's index clauses.
    pub query_names: Vec<String>,
    /// Depth limit; `None` is unlimited.
    pub max_depth: Option<usize>,
}

impl Signature {
    /// The signature of a concrete search call.
    #[must_use]
    pub fn of(relations: bool, name: Option<&str>, query: &Query, max_depth: Option<usize>) -> Self {
        Self {
            relations,
            name: name.map(str::to_owned),
            relation_clause: query.has_relation_clause(),
            query_names: query.index_names(),
            max_depth,
        }
    }
}

/// One search shape a search index offers to answer.
///
/// Beyond the signature, a match can pin clause values: a search is only
/// routed to the index when every static clause appears in the query with
/// exactly the registered value. It can also pin a query factory; the
/// match then applies only to calls whose *effective* factory (the
/// explicit one, or the first default that binds the query) is that very
/// `Arc`. A match without a factory applies only to calls where no
/// factory binds at all.
pub struct SearchIndexMatch<R> {
    /// Routed search shape.
    pub signature: Signature,
    /// Clause values that must appear verbatim in the query.
    pub static_values: Vec<(QueryKey, QueryValue)>,
    /// Factory this match is valid for, if pinned.
    pub factory: Option<Arc<dyn QueryFactory<R>>>,
}

impl<R> SearchIndexMatch<R> {
    /// Whether a call with this query and effective factory may be routed
    /// through this match. The signature is assumed to match already.
    #[must_use]
    pub fn accepts(&self, query: &Query, factory: Option<&Arc<dyn QueryFactory<R>>>) -> bool {
        let factory_ok = match (&self.factory, factory) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        factory_ok
            && self
                .static_values
                .iter()
                .all(|(key, value)| query.get_key(key) == Some(value))
    }
}

/// A pluggable accelerator for searches of registered shapes.
///
/// Result methods return `Ok(None)` to decline a call; the catalog then
/// answers it with the ordinary transitive walk. Mutation hooks run before
/// plain listeners and may fail, aborting the mutating call.
#[allow(unused_variables)]
pub trait SearchIndex<R>: Send + Sync {
    /// Called on registration. Builds internal state from the catalog's
    /// current contents and returns the searches this index answers.
    fn attach(&self, catalog: &Catalog<R>) -> CatalogResult<Vec<SearchIndexMatch<R>>>;

    /// Called on removal from the catalog.
    fn detach(&self, catalog: &Catalog<R>) {}

    /// A fresh, empty instance for a catalog copy; it is attached to the
    /// replica, which rebuilds its state there.
    fn replicate(&self) -> Arc<dyn SearchIndex<R>>;

    /// Answer a relation-token search, or decline.
    fn relation_results(&self, query: &Query, catalog: &Catalog<R>) -> CatalogResult<Option<TokenSet>> {
        Ok(None)
    }

    /// Answer a value-token search for the named index, or decline.
    fn value_results(
        &self,
        name: &str,
        query: &Query,
        catalog: &Catalog<R>,
    ) -> CatalogResult<Option<TokenSet>> {
        Ok(None)
    }

    /// A relation token was indexed for the first time.
    fn relation_added(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        additions: &ChangeMap,
    ) -> CatalogResult<()> {
        Ok(())
    }

    /// An indexed relation token was reindexed.
    fn relation_modified(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        additions: &ChangeMap,
        removals: &ChangeMap,
    ) -> CatalogResult<()> {
        Ok(())
    }

    /// A relation token was removed.
    fn relation_removed(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        removals: &ChangeMap,
    ) -> CatalogResult<()> {
        Ok(())
    }

    /// Every relation was dropped at once.
    fn source_cleared(&self, catalog: &Catalog<R>) -> CatalogResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MembershipState {
    /// Relation token to the set of relation tokens transitively reachable
    /// from it (itself included).
    closures: BTreeMap<Token, TokenSet>,
    /// Per served value index: relation token to the union of that index's
    /// value tokens over the closure.
    values: BTreeMap<String, BTreeMap<Token, TokenSet>>,
}

/// Precomputed transitive closure under a transposing walk.
///
/// Built from the same two index names as a [`TransposingTransitive`]
/// factory. For a query constraining `forward`, the matching relations
/// are looked up intransitively and the answer is the union of their
/// stored closures, so unlimited-depth searches cost one lookup per
/// directly matching relation. Optionally serves value searches for named
/// indexes by keeping per-closure value unions as well.
///
/// The index only answers searches driven by its own walk rule: register
/// [`factory`](Self::factory) as a catalog default (or pass it per call)
/// so it becomes the factory in effect for the searches to accelerate.
///
/// Best suited to hierarchies; the closure sets of a densely cyclic graph
/// all converge on the whole component.
pub struct TransitiveMembership {
    forward: String,
    reverse: String,
    value_names: Vec<String>,
    factory: Arc<TransposingTransitive>,
    state: RwLock<MembershipState>,
}

impl TransitiveMembership {
    /// Create an accelerator for walks transposing `forward` and `reverse`.
    #[must_use]
    pub fn new(forward: impl Into<String>, reverse: impl Into<String>) -> Self {
        let forward = forward.into();
        let reverse = reverse.into();
        let factory = Arc::new(TransposingTransitive::new(forward.as_str(), reverse.as_str()));
        Self { forward, reverse, value_names: Vec::new(), factory, state: RwLock::default() }
    }

    /// Also serve value searches for the named index.
    #[must_use]
    pub fn with_value_index(mut self, name: impl Into<String>) -> Self {
        self.value_names.push(name.into());
        self
    }

    /// The walk's query factory, for registration as a catalog default or
    /// for passing explicitly to search calls.
    #[must_use]
    pub fn factory(&self) -> Arc<TransposingTransitive> {
        Arc::clone(&self.factory)
    }

    /// Relations one hop below `token`: those matching `forward == v` for
    /// each of the token's `reverse` values.
    fn children<R>(&self, catalog: &Catalog<R>, token: &Token) -> CatalogResult<Vec<Token>> {
        let mut out = Vec::new();
        let links: Vec<Token> = match catalog.get_value_tokens(&self.reverse, token)? {
            Some(set) => set.iter().collect(),
            None => Vec::new(),
        };
        for link in links {
            let query = Query::new().with_value(&self.forward, QueryValue::Is(link));
            out.extend(catalog.get_relation_tokens(&query)?.iter());
        }
        Ok(out)
    }

    /// Relations one hop above `token`, by the transposed lookup.
    fn parents<R>(&self, catalog: &Catalog<R>, token: &Token) -> CatalogResult<Vec<Token>> {
        let mut out = Vec::new();
        let links: Vec<Token> = match catalog.get_value_tokens(&self.forward, token)? {
            Some(set) => set.iter().collect(),
            None => Vec::new(),
        };
        for link in links {
            let query = Query::new().with_value(&self.reverse, QueryValue::Is(link));
            out.extend(catalog.get_relation_tokens(&query)?.iter());
        }
        Ok(out)
    }

    /// Everything transitively above `token`, the token excluded.
    fn ancestors<R>(&self, catalog: &Catalog<R>, token: &Token) -> CatalogResult<Vec<Token>> {
        let mut seen = TokenSet::new(ContainerFamily::Ordered);
        seen.insert(token.clone());
        let mut frontier = vec![token.clone()];
        let mut out = Vec::new();
        while let Some(current) = frontier.pop() {
            for parent in self.parents(catalog, &current)? {
                if seen.insert(parent.clone()) {
                    out.push(parent.clone());
                    frontier.push(parent);
                }
            }
        }
        Ok(out)
    }

    /// Recompute the closure and value unions stored for one relation.
    fn recompute<R>(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        state: &mut MembershipState,
    ) -> CatalogResult<()> {
        let mut closure = TokenSet::new(ContainerFamily::Ordered);
        closure.insert(token.clone());
        let mut frontier = vec![token.clone()];
        while let Some(current) = frontier.pop() {
            for child in self.children(catalog, &current)? {
                if closure.insert(child.clone()) {
                    frontier.push(child);
                }
            }
        }
        for name in &self.value_names {
            let mut union = TokenSet::new(ContainerFamily::Ordered);
            for member in closure.iter() {
                if let Some(set) = catalog.get_value_tokens(name, &member)? {
                    union.extend(set.iter());
                }
            }
            state.values.entry(name.clone()).or_default().insert(token.clone(), union);
        }
        state.closures.insert(token.clone(), closure);
        Ok(())
    }

    /// Whether a change map touches anything this index depends on.
    fn relevant(&self, changes: &ChangeMap) -> bool {
        changes.contains_key(&self.forward)
            || changes.contains_key(&self.reverse)
            || self.value_names.iter().any(|n| changes.contains_key(n))
    }

    /// Recompute `token` plus everything whose closure does or may now
    /// contain it.
    fn refresh<R>(&self, catalog: &Catalog<R>, token: &Token, removed: bool) -> CatalogResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut dirty: Vec<Token> = state
            .closures
            .iter()
            .filter(|&(rel, closure)| rel != token && closure.contains(token))
            .map(|(rel, _)| rel.clone())
            .collect();
        if removed {
            state.closures.remove(token);
            for unions in state.values.values_mut() {
                unions.remove(token);
            }
        } else {
            for ancestor in self.ancestors(catalog, token)? {
                if !dirty.contains(&ancestor) {
                    dirty.push(ancestor);
                }
            }
            dirty.push(token.clone());
        }
        debug!(token = %token, dirty = dirty.len(), "refreshing transitive membership");
        for rel in dirty {
            self.recompute(catalog, &rel, &mut state)?;
        }
        Ok(())
    }

    fn registrations<R>(&self) -> Vec<SearchIndexMatch<R>> {
        let mut shapes: Vec<(bool, Option<String>)> = vec![(true, None)];
        for name in &self.value_names {
            shapes.push((false, Some(name.clone())));
        }
        shapes
            .into_iter()
            .map(|(relations, name)| SearchIndexMatch {
                signature: Signature {
                    relations,
                    name,
                    relation_clause: false,
                    query_names: vec![self.forward.clone()],
                    max_depth: None,
                },
                static_values: Vec::new(),
                // Pinned: only searches walked by this rule are served.
                factory: Some(Arc::clone(&self.factory) as Arc<dyn QueryFactory<R>>),
            })
            .collect()
    }

    /// Union the stored per-relation sets over the relations directly
    /// matching the query.
    fn answer<R>(
        &self,
        catalog: &Catalog<R>,
        query: &Query,
        stored: impl Fn(&MembershipState, &Token) -> Option<TokenSet>,
    ) -> CatalogResult<Option<TokenSet>> {
        let direct = catalog.get_relation_tokens(query)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut parts = Vec::new();
        for token in direct.iter() {
            match stored(&state, &token) {
                Some(set) => parts.push(set),
                // State out of step with the catalog; decline.
                None => return Ok(None),
            }
        }
        Ok(Some(multiunion(parts.iter(), ContainerFamily::Ordered)))
    }
}

impl<R> SearchIndex<R> for TransitiveMembership {
    fn attach(&self, catalog: &Catalog<R>) -> CatalogResult<Vec<SearchIndexMatch<R>>> {
        let tokens: Vec<Token> = catalog.relation_tokens().iter().collect();
        debug!(relations = tokens.len(), "building transitive membership index");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = MembershipState::default();
        for token in &tokens {
            self.recompute(catalog, token, &mut state)?;
        }
        drop(state);
        Ok(self.registrations())
    }

    fn detach(&self, _catalog: &Catalog<R>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = MembershipState::default();
    }

    fn replicate(&self) -> Arc<dyn SearchIndex<R>> {
        // The factory Arc is shared so the replica keeps serving searches
        // bound to the same walk rule.
        Arc::new(Self {
            forward: self.forward.clone(),
            reverse: self.reverse.clone(),
            value_names: self.value_names.clone(),
            factory: Arc::clone(&self.factory),
            state: RwLock::default(),
        })
    }

    fn relation_results(&self, query: &Query, catalog: &Catalog<R>) -> CatalogResult<Option<TokenSet>> {
        self.answer(catalog, query, |state, token| state.closures.get(token).cloned())
    }

    fn value_results(
        &self,
        name: &str,
        query: &Query,
        catalog: &Catalog<R>,
    ) -> CatalogResult<Option<TokenSet>> {
        self.answer(catalog, query, |state, token| {
            state.values.get(name).and_then(|unions| unions.get(token)).cloned()
        })
    }

    fn relation_added(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        _additions: &ChangeMap,
    ) -> CatalogResult<()> {
        self.refresh(catalog, token, false)
    }

    fn relation_modified(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        additions: &ChangeMap,
        removals: &ChangeMap,
    ) -> CatalogResult<()> {
        if self.relevant(additions) || self.relevant(removals) {
            self.refresh(catalog, token, false)?;
        }
        Ok(())
    }

    fn relation_removed(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        _removals: &ChangeMap,
    ) -> CatalogResult<()> {
        self.refresh(catalog, token, true)
    }

    fn source_cleared(&self, _catalog: &Catalog<R>) -> CatalogResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = MembershipState::default();
        Ok(())
    }
}
