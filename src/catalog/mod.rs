//! The relation catalog: identity maps, value indexes, and registries.
//!
//! A [`Catalog`] indexes *relations*, caller-owned objects standing for
//! links between other objects. Relations are stored by token, produced
//! by the codec supplied at construction; everything the catalog knows
//! about a relation comes from the value indexes registered on it.
//!
//! The catalog is a single-writer structure: concurrent readers of a
//! `&Catalog` are fine, mutation requires `&mut` and external
//! coordination. There is no internal locking and no durability; both are
//! the host's concern.
//!
//! # Example
//!
//! ```
//! use relata::{Catalog, Query, Token, ValueIndex};
//!
//! // A relation: "supervisor oversees employee", tokenized by id.
//! #[derive(Clone)]
//! struct Oversees {
//!     id: i64,
//!     supervisor: String,
//!     employee: String,
//! }
//!
//! # fn main() -> relata::CatalogResult<()> {
//! let mut catalog: Catalog<Oversees> = Catalog::new(
//!     |r: &Oversees, _| Ok(Token::Int(r.id)),
//!     |t, _| {
//!         Err(format!("unknown relation token {t}").into())
//!     },
//! );
//! catalog.add_value_index(ValueIndex::single("supervisor", |r: &Oversees| {
//!     Some(Token::from(r.supervisor.as_str()))
//! }))?;
//! catalog.add_value_index(ValueIndex::single("employee", |r: &Oversees| {
//!     Some(Token::from(r.employee.as_str()))
//! }))?;
//!
//! let rel = Oversees { id: 1, supervisor: "ann".into(), employee: "bo".into() };
//! catalog.index(&rel)?;
//!
//! let hits = catalog.get_relation_tokens(&Query::new().with("supervisor", "ann"))?;
//! assert!(hits.contains(&Token::Int(1)));
//! # Ok(())
//! # }
//! ```

mod indexing;
mod search;

pub use indexing::{Extractor, ValueIndex};
pub use search::{ChainFilter, Chains, RelationChain, ResolvedChain, SearchOptions, TokenChains};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BoxError, CatalogError, CatalogResult};
use crate::factory::QueryFactory;
use crate::listener::{CatalogListener, ChangeMap, ListenerHandle};
use crate::query::{Query, QueryKey, QueryValue};
use crate::searchindex::{SearchIndex, SearchIndexMatch};
use crate::token::{ContainerFamily, Token, TokenSet};

/// Relation-to-token half of the relation codec.
pub type RelationDump<R> =
    Arc<dyn Fn(&R, &Catalog<R>) -> Result<Token, BoxError> + Send + Sync>;

/// Token-to-relation half of the relation codec.
pub type RelationLoad<R> =
    Arc<dyn Fn(&Token, &Catalog<R>) -> Result<R, BoxError> + Send + Sync>;

/// One direction of a value codec: token in, token out.
pub type TokenCodec<R> =
    Arc<dyn Fn(&Token, &Catalog<R>) -> Result<Token, BoxError> + Send + Sync>;

pub(crate) struct SearchIndexEntry<R> {
    pub(crate) index: Arc<dyn SearchIndex<R>>,
    pub(crate) matches: Vec<SearchIndexMatch<R>>,
}

/// A multiply-indexed collection of relations with transitive search.
pub struct Catalog<R> {
    pub(crate) dump: RelationDump<R>,
    pub(crate) load: RelationLoad<R>,
    pub(crate) family: ContainerFamily,
    /// Every indexed relation token.
    pub(crate) relations: TokenSet,
    pub(crate) indexes: BTreeMap<String, ValueIndex<R>>,
    /// name -> value token -> relations carrying that value.
    pub(crate) forward: BTreeMap<String, BTreeMap<Token, TokenSet>>,
    /// name -> relations the index extracted nothing from.
    pub(crate) empties: BTreeMap<String, TokenSet>,
    /// relation token -> name -> value tokens.
    pub(crate) reverse: BTreeMap<Token, BTreeMap<String, TokenSet>>,
    pub(crate) listeners: Vec<ListenerHandle<R>>,
    pub(crate) factories: Vec<Arc<dyn QueryFactory<R>>>,
    pub(crate) search_indexes: Vec<SearchIndexEntry<R>>,
}

impl<R> Catalog<R> {
    /// Create a catalog with the given relation codec and the default
    /// (dense) container family for relation tokens.
    pub fn new(
        dump: impl Fn(&R, &Catalog<R>) -> Result<Token, BoxError> + Send + Sync + 'static,
        load: impl Fn(&Token, &Catalog<R>) -> Result<R, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_family(dump, load, ContainerFamily::default())
    }

    /// Create a catalog with an explicit container family for relation
    /// tokens.
    pub fn with_family(
        dump: impl Fn(&R, &Catalog<R>) -> Result<Token, BoxError> + Send + Sync + 'static,
        load: impl Fn(&Token, &Catalog<R>) -> Result<R, BoxError> + Send + Sync + 'static,
        family: ContainerFamily,
    ) -> Self {
        Self {
            dump: Arc::new(dump),
            load: Arc::new(load),
            family,
            relations: TokenSet::new(family),
            indexes: BTreeMap::new(),
            forward: BTreeMap::new(),
            empties: BTreeMap::new(),
            reverse: BTreeMap::new(),
            listeners: Vec::new(),
            factories: Vec::new(),
            search_indexes: Vec::new(),
        }
    }

    /// The container family used for relation token sets.
    #[must_use]
    pub const fn relation_family(&self) -> ContainerFamily {
        self.family
    }

    /// The set of every indexed relation token.
    #[must_use]
    pub fn relation_tokens(&self) -> &TokenSet {
        &self.relations
    }

    /// Number of indexed relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether no relation is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Whether the token is indexed.
    #[must_use]
    pub fn contains_token(&self, token: &Token) -> bool {
        self.relations.contains(token)
    }

    /// Whether the relation is indexed, by its token.
    pub fn contains(&self, relation: &R) -> CatalogResult<bool> {
        Ok(self.relations.contains(&self.tokenize_relation(relation)?))
    }

    /// Iterate over the indexed relations, resolving each token through
    /// the relation codec.
    pub fn relations(&self) -> impl Iterator<Item = CatalogResult<R>> + '_ {
        self.relations.iter().map(move |t| self.resolve_relation_token(&t))
    }

    /// Names of the registered value indexes, sorted.
    #[must_use]
    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.keys().map(String::as_str).collect()
    }

    /// Whether a value index of this name is registered.
    #[must_use]
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    /// Iterate over the registered value indexes, sorted by name.
    pub fn value_indexes(&self) -> impl Iterator<Item = &ValueIndex<R>> {
        self.indexes.values()
    }

    /// Iterate over the live listeners, in registration order.
    pub fn listeners(&self) -> impl Iterator<Item = Arc<dyn CatalogListener<R>>> + '_ {
        self.listeners.iter().filter_map(ListenerHandle::upgrade)
    }

    /// Iterate over the registered search indexes, in registration order.
    pub fn search_indexes(&self) -> impl Iterator<Item = &Arc<dyn SearchIndex<R>>> {
        self.search_indexes.iter().map(|e| &e.index)
    }

    // ------------------------------------------------------------------
    // Tokenization helpers

    /// Token for a relation, through the relation codec.
    pub fn tokenize_relation(&self, relation: &R) -> CatalogResult<Token> {
        Ok((self.dump)(relation, self)?)
    }

    /// Relation for a token, through the relation codec.
    pub fn resolve_relation_token(&self, token: &Token) -> CatalogResult<R> {
        Ok((self.load)(token, self)?)
    }

    /// Tokens for many relations, in input order.
    pub fn tokenize_relations<'a>(
        &self,
        relations: impl IntoIterator<Item = &'a R>,
    ) -> CatalogResult<Vec<Token>>
    where
        R: 'a,
    {
        relations.into_iter().map(|r| self.tokenize_relation(r)).collect()
    }

    /// Relations for many tokens, in input order.
    pub fn resolve_relation_tokens<'a>(
        &self,
        tokens: impl IntoIterator<Item = &'a Token>,
    ) -> CatalogResult<Vec<R>> {
        tokens.into_iter().map(|t| self.resolve_relation_token(t)).collect()
    }

    pub(crate) fn value_dump(&self, name: &str, value: &Token) -> CatalogResult<Token> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| CatalogError::IndexNotFound(name.to_owned()))?;
        match &index.dump {
            Some(dump) => Ok(dump(value, self)?),
            None => Ok(value.clone()),
        }
    }

    pub(crate) fn value_load(&self, name: &str, token: &Token) -> CatalogResult<Token> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| CatalogError::IndexNotFound(name.to_owned()))?;
        match &index.load {
            Some(load) => Ok(load(token, self)?),
            None => Ok(token.clone()),
        }
    }

    /// Apply the named index's value codec to raw values.
    pub fn tokenize_values(
        &self,
        name: &str,
        values: impl IntoIterator<Item = Token>,
    ) -> CatalogResult<Vec<Token>> {
        values.into_iter().map(|v| self.value_dump(name, &v)).collect()
    }

    /// Recover raw values from the named index's value tokens.
    pub fn resolve_value_tokens(
        &self,
        name: &str,
        tokens: impl IntoIterator<Item = Token>,
    ) -> CatalogResult<Vec<Token>> {
        tokens.into_iter().map(|t| self.value_load(name, &t)).collect()
    }

    /// Rewrite a query's clause values through each index's value codec.
    ///
    /// Relation clauses pass through unchanged; use
    /// [`tokenize_relation`](Self::tokenize_relation) to build them.
    pub fn tokenize_query(&self, query: &Query) -> CatalogResult<Query> {
        self.map_query(query, Self::value_dump)
    }

    /// Inverse of [`tokenize_query`](Self::tokenize_query).
    pub fn resolve_query(&self, query: &Query) -> CatalogResult<Query> {
        self.map_query(query, Self::value_load)
    }

    fn map_query(
        &self,
        query: &Query,
        apply: impl Fn(&Self, &str, &Token) -> CatalogResult<Token>,
    ) -> CatalogResult<Query> {
        let mut out = Query::new();
        for (key, value) in query.iter() {
            let mapped = match key {
                QueryKey::Relation => value.clone(),
                QueryKey::Index(name) => match value {
                    QueryValue::Is(t) => QueryValue::Is(apply(self, name, t)?),
                    QueryValue::Empty => QueryValue::Empty,
                    QueryValue::AnyOf(set) => QueryValue::AnyOf(
                        set.iter().map(|t| apply(self, name, t)).collect::<CatalogResult<_>>()?,
                    ),
                },
            };
            out.insert(key.clone(), mapped);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Listeners

    /// Register a listener, held strongly.
    pub fn add_listener(&mut self, listener: Arc<dyn CatalogListener<R>>) {
        self.prune_listeners();
        self.listeners.push(ListenerHandle::Strong(Arc::clone(&listener)));
        listener.source_added(self);
    }

    /// Register a listener, held weakly: once the caller drops its last
    /// `Arc`, the listener stops receiving notifications and its slot is
    /// reclaimed.
    pub fn add_weak_listener(&mut self, listener: &Arc<dyn CatalogListener<R>>) {
        self.prune_listeners();
        self.listeners.push(ListenerHandle::Weak(Arc::downgrade(listener)));
        listener.source_added(self);
    }

    /// Remove a previously registered listener, by identity.
    pub fn remove_listener(&mut self, listener: &Arc<dyn CatalogListener<R>>) -> CatalogResult<()> {
        let position = self.listeners.iter().position(|h| h.is(listener));
        match position {
            Some(i) => {
                self.listeners.remove(i);
                listener.source_removed(self);
                Ok(())
            }
            None => Err(CatalogError::ListenerNotFound),
        }
    }

    pub(crate) fn prune_listeners(&mut self) {
        self.listeners.retain(|h| !h.is_dead());
    }

    pub(crate) fn live_listeners(&self) -> Vec<Arc<dyn CatalogListener<R>>> {
        self.listeners().collect()
    }

    // ------------------------------------------------------------------
    // Default query factories

    /// Append a default query factory. Default factories are consulted in
    /// registration order by every search call that does not pass a
    /// factory explicitly; the first one that binds wins.
    pub fn add_default_query_factory(
        &mut self,
        factory: Arc<dyn QueryFactory<R>>,
    ) -> CatalogResult<()> {
        if self.factories.iter().any(|f| Arc::ptr_eq(f, &factory)) {
            return Err(CatalogError::DuplicateQueryFactory);
        }
        self.factories.push(factory);
        Ok(())
    }

    /// Remove a default query factory, by identity.
    pub fn remove_default_query_factory(
        &mut self,
        factory: &Arc<dyn QueryFactory<R>>,
    ) -> CatalogResult<()> {
        let position = self.factories.iter().position(|f| Arc::ptr_eq(f, factory));
        match position {
            Some(i) => {
                self.factories.remove(i);
                Ok(())
            }
            None => Err(CatalogError::QueryFactoryNotFound),
        }
    }

    /// The registered default factories, in consultation order.
    pub fn default_query_factories(&self) -> impl Iterator<Item = &Arc<dyn QueryFactory<R>>> {
        self.factories.iter()
    }

    // ------------------------------------------------------------------
    // Search indexes

    /// Register a search index. The index builds its state from the
    /// catalog's current contents and declares the search shapes it
    /// answers; from then on it is notified of every mutation, before
    /// plain listeners.
    pub fn add_search_index(&mut self, index: Arc<dyn SearchIndex<R>>) -> CatalogResult<()> {
        let matches = index.attach(self)?;
        for m in &matches {
            if m.static_values.iter().any(|(key, _)| *key == QueryKey::Relation) {
                return Err(CatalogError::StaticRelationValue);
            }
        }
        debug!(matches = matches.len(), "search index attached");
        self.search_indexes.push(SearchIndexEntry { index, matches });
        Ok(())
    }

    /// Remove a search index, by identity.
    pub fn remove_search_index(&mut self, index: &Arc<dyn SearchIndex<R>>) -> CatalogResult<()> {
        let position = self.search_indexes.iter().position(|e| Arc::ptr_eq(&e.index, index));
        match position {
            Some(i) => {
                let entry = self.search_indexes.remove(i);
                entry.index.detach(self);
                Ok(())
            }
            None => Err(CatalogError::SearchIndexNotFound),
        }
    }

    // ------------------------------------------------------------------
    // Copy

    /// A detached deep copy: same contents and registrations, fresh maps.
    ///
    /// The codec and extractor closures are shared with the original.
    /// Search indexes are replicated as fresh instances that rebuild
    /// against the copy. Listeners are not carried over; instead, every
    /// listener of the original is told about the new catalog through
    /// `source_copied`.
    pub fn copy(&self) -> CatalogResult<Self> {
        let mut replica = Self {
            dump: Arc::clone(&self.dump),
            load: Arc::clone(&self.load),
            family: self.family,
            relations: self.relations.clone(),
            indexes: self.indexes.clone(),
            forward: self.forward.clone(),
            empties: self.empties.clone(),
            reverse: self.reverse.clone(),
            listeners: Vec::new(),
            factories: self.factories.clone(),
            search_indexes: Vec::new(),
        };
        for entry in &self.search_indexes {
            replica.add_search_index(entry.index.replicate())?;
        }
        for listener in self.live_listeners() {
            listener.source_copied(self, &replica);
        }
        Ok(replica)
    }

    // ------------------------------------------------------------------
    // Notification fan-out

    pub(crate) fn notify_added(&self, token: &Token, additions: &ChangeMap) -> CatalogResult<()> {
        for entry in &self.search_indexes {
            entry.index.relation_added(self, token, additions)?;
        }
        for listener in self.live_listeners() {
            listener.relation_added(self, token, additions);
        }
        Ok(())
    }

    pub(crate) fn notify_modified(
        &self,
        token: &Token,
        additions: &ChangeMap,
        removals: &ChangeMap,
    ) -> CatalogResult<()> {
        for entry in &self.search_indexes {
            entry.index.relation_modified(self, token, additions, removals)?;
        }
        for listener in self.live_listeners() {
            listener.relation_modified(self, token, additions, removals);
        }
        Ok(())
    }

    pub(crate) fn notify_removed(&self, token: &Token, removals: &ChangeMap) -> CatalogResult<()> {
        for entry in &self.search_indexes {
            entry.index.relation_removed(self, token, removals)?;
        }
        for listener in self.live_listeners() {
            listener.relation_removed(self, token, removals);
        }
        Ok(())
    }

    pub(crate) fn notify_cleared(&self) -> CatalogResult<()> {
        for entry in &self.search_indexes {
            entry.index.source_cleared(self)?;
        }
        for listener in self.live_listeners() {
            listener.source_cleared(self);
        }
        Ok(())
    }
}

impl<R> fmt::Debug for Catalog<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("relations", &self.relations.len())
            .field("indexes", &self.indexes.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .field("search_indexes", &self.search_indexes.len())
            .finish_non_exhaustive()
    }
}
