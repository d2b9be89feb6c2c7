//! Query evaluation and transitive traversal.
//!
//! Intransitive lookups intersect per-clause candidate sets, smallest
//! first, short-circuiting as soon as any clause (or any running
//! intersection) is empty. Transitive searches walk a worklist of
//! (chain, pending tokens) pairs: a bound query factory expands the last
//! relation of a chain into next-hop queries, and a next-hop query whose
//! results revisit the chain is recorded on the yielded chain as a cycle
//! witness instead of being walked.
//!
//! Traversal is lazy: [`TokenChains`] yields one chain at a time, so
//! [`Catalog::can_find`] stops at the first hit.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{BoxError, CatalogError, CatalogResult};
use crate::factory::{QueryExpander, QueryFactory};
use crate::query::{Query, QueryKey, QueryValue};
use crate::searchindex::Signature;
use crate::token::{multiunion, ContainerFamily, Token, TokenSet};

use super::Catalog;

/// Chain predicate: given the chain walked so far and the original query,
/// decide whether to keep going (as a filter) or whether the chain is a
/// result (as a target filter).
pub type ChainFilter<R> =
    Arc<dyn Fn(&[Token], &Query, &Catalog<R>) -> Result<bool, BoxError> + Send + Sync>;

/// Optional knobs shared by all search calls.
///
/// The default means: unlimited depth, no filtering, no target, and
/// query-factory selection from the catalog's default factories.
pub struct SearchOptions<R> {
    pub(crate) max_depth: Option<usize>,
    pub(crate) filter: Option<ChainFilter<R>>,
    pub(crate) target_query: Option<Query>,
    pub(crate) target_filter: Option<ChainFilter<R>>,
    pub(crate) factory: Option<Arc<dyn QueryFactory<R>>>,
    pub(crate) ignore_search_index: bool,
}

impl<R> SearchOptions<R> {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop walking chains at this length. Must be at least 1; a depth
    /// beyond 1 needs a query factory to be meaningful.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Prune: a chain rejected by the filter is neither yielded nor
    /// walked further.
    #[must_use]
    pub fn filter(
        mut self,
        filter: impl Fn(&[Token], &Query, &Catalog<R>) -> Result<bool, BoxError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Only yield chains whose last relation matches this query. The walk
    /// itself is not pruned.
    #[must_use]
    pub fn target_query(mut self, query: Query) -> Self {
        self.target_query = Some(query);
        self
    }

    /// Only yield chains accepted by this predicate. The walk itself is
    /// not pruned.
    #[must_use]
    pub fn target_filter(
        mut self,
        filter: impl Fn(&[Token], &Query, &Catalog<R>) -> Result<bool, BoxError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.target_filter = Some(Arc::new(filter));
        self
    }

    /// Use this query factory instead of the catalog's defaults.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn QueryFactory<R>>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Answer with the generic engine even when a registered search index
    /// covers this search shape.
    #[must_use]
    pub fn ignore_search_index(mut self) -> Self {
        self.ignore_search_index = true;
        self
    }
}

impl<R> Default for SearchOptions<R> {
    fn default() -> Self {
        Self {
            max_depth: None,
            filter: None,
            target_query: None,
            target_filter: None,
            factory: None,
            ignore_search_index: false,
        }
    }
}

impl<R> Clone for SearchOptions<R> {
    fn clone(&self) -> Self {
        Self {
            max_depth: self.max_depth,
            filter: self.filter.clone(),
            target_query: self.target_query.clone(),
            target_filter: self.target_filter.clone(),
            factory: self.factory.clone(),
            ignore_search_index: self.ignore_search_index,
        }
    }
}

/// A walked chain of relation tokens.
///
/// A chain is *circular* when at least one next-hop query from its last
/// relation led back into the chain; those queries are kept as witnesses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationChain {
    pub(crate) tokens: Vec<Token>,
    pub(crate) cycled: Vec<Query>,
}

impl RelationChain {
    /// The relation tokens, in walk order.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The relation the chain ends on.
    #[must_use]
    pub fn last(&self) -> Option<&Token> {
        self.tokens.last()
    }

    /// Chain length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the chain holds no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether a next hop from this chain leads back into it.
    #[must_use]
    pub fn is_circular(&self) -> bool {
        !self.cycled.is_empty()
    }

    /// The next-hop queries that closed the cycle.
    #[must_use]
    pub fn cycled_queries(&self) -> &[Query] {
        &self.cycled
    }

    /// Consume the chain, keeping the tokens.
    #[must_use]
    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}

/// Lazy iterator over token chains, yielding `Result` per chain.
///
/// A failed expansion or filter poisons the iterator: the error is
/// yielded once and iteration ends.
pub struct TokenChains<'a, R> {
    catalog: &'a Catalog<R>,
    query: Query,
    expander: Option<QueryExpander<R>>,
    stack: VecDeque<(Vec<Token>, std::vec::IntoIter<Token>)>,
    max_depth: Option<usize>,
    filter: Option<ChainFilter<R>>,
    target_data: Option<TokenSet>,
    target_filter: Option<ChainFilter<R>>,
    errored: bool,
}

impl<R> TokenChains<'_, R> {
    fn try_next(&mut self) -> CatalogResult<Option<RelationChain>> {
        loop {
            let Some((chain, pending)) = self.stack.front_mut() else {
                return Ok(None);
            };
            let Some(token) = pending.next() else {
                self.stack.pop_front();
                continue;
            };
            let mut tokens = chain.clone();
            tokens.push(token);

            if let Some(filter) = &self.filter {
                if !filter(&tokens, &self.query, self.catalog)? {
                    continue;
                }
            }
            let walk_further = self.max_depth.map_or(true, |d| tokens.len() < d);
            let mut cycled = Vec::new();
            if let Some(expander) = &self.expander {
                let mut next = TokenSet::new(self.catalog.family);
                for next_query in expander(&tokens, self.catalog)? {
                    let data = self.catalog.get_relation_tokens(&next_query)?;
                    if data.is_empty() {
                        continue;
                    }
                    if tokens.iter().any(|t| data.contains(t)) {
                        cycled.push(next_query);
                    } else if walk_further {
                        next.extend(data.iter());
                    }
                }
                if walk_further && !next.is_empty() {
                    let pending: Vec<Token> = next.iter().collect();
                    self.stack.push_back((tokens.clone(), pending.into_iter()));
                }
            }
            if let Some(target) = &self.target_data {
                if !tokens.last().is_some_and(|t| target.contains(t)) {
                    continue;
                }
            }
            if let Some(filter) = &self.target_filter {
                if !filter(&tokens, &self.query, self.catalog)? {
                    continue;
                }
            }
            return Ok(Some(RelationChain { tokens, cycled }));
        }
    }
}

impl<R> Iterator for TokenChains<'_, R> {
    type Item = CatalogResult<RelationChain>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        match self.try_next() {
            Ok(Some(chain)) => Some(Ok(chain)),
            Ok(None) => None,
            Err(e) => {
                self.errored = true;
                Some(Err(e))
            }
        }
    }
}

/// A chain with its relations resolved through the relation codec.
#[derive(Debug)]
pub struct ResolvedChain<R> {
    relations: Vec<R>,
    chain: RelationChain,
}

impl<R> ResolvedChain<R> {
    /// The resolved relations, in walk order.
    #[must_use]
    pub fn relations(&self) -> &[R] {
        &self.relations
    }

    /// The underlying token chain.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        self.chain.tokens()
    }

    /// Whether a next hop from this chain leads back into it.
    #[must_use]
    pub fn is_circular(&self) -> bool {
        self.chain.is_circular()
    }

    /// The next-hop queries that closed the cycle.
    #[must_use]
    pub fn cycled_queries(&self) -> &[Query] {
        self.chain.cycled_queries()
    }

    /// Consume the chain, keeping the relations.
    #[must_use]
    pub fn into_relations(self) -> Vec<R> {
        self.relations
    }
}

/// Lazy iterator over resolved chains.
pub struct Chains<'a, R> {
    inner: TokenChains<'a, R>,
}

impl<R> Iterator for Chains<'_, R> {
    type Item = CatalogResult<ResolvedChain<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        let chain = match self.inner.next()? {
            Ok(chain) => chain,
            Err(e) => return Some(Err(e)),
        };
        match self.inner.catalog.resolve_relation_tokens(chain.tokens()) {
            Ok(relations) => Some(Ok(ResolvedChain { relations, chain })),
            Err(e) => {
                self.inner.errored = true;
                Some(Err(e))
            }
        }
    }
}

impl<R> Catalog<R> {
    /// The relation tokens matching a query, with no transitive walk.
    ///
    /// An empty query matches every indexed relation. A query whose only
    /// clause is the relation clause intersects the given tokens against
    /// the catalog's contents.
    pub fn get_relation_tokens(&self, query: &Query) -> CatalogResult<TokenSet> {
        if query.is_empty() {
            return Ok(self.relations.clone());
        }
        let mut candidates: Vec<TokenSet> = Vec::with_capacity(query.len());
        for (key, value) in query.iter() {
            let candidate = match key {
                QueryKey::Relation => {
                    let tokens = match value {
                        QueryValue::Is(t) => TokenSet::from_tokens(self.family, [t.clone()]),
                        QueryValue::AnyOf(set) => {
                            TokenSet::from_tokens(self.family, set.iter().cloned())
                        }
                        QueryValue::Empty => {
                            return Err(CatalogError::InvalidQuery(
                                "the relation clause requires concrete tokens".to_owned(),
                            ))
                        }
                    };
                    if query.len() == 1 {
                        tokens.intersection(&self.relations)
                    } else {
                        tokens
                    }
                }
                QueryKey::Index(name) => {
                    let forward = self
                        .forward
                        .get(name)
                        .ok_or_else(|| CatalogError::IndexNotFound(name.clone()))?;
                    let family = self.indexes.get(name).map_or(self.family, |i| i.family);
                    match value {
                        QueryValue::Is(t) => {
                            forward.get(t).cloned().unwrap_or_else(|| TokenSet::new(family))
                        }
                        QueryValue::Empty => self
                            .empties
                            .get(name)
                            .cloned()
                            .unwrap_or_else(|| TokenSet::new(family)),
                        QueryValue::AnyOf(set) => {
                            multiunion(set.iter().filter_map(|t| forward.get(t)), family)
                        }
                    }
                }
            };
            if candidate.is_empty() {
                return Ok(TokenSet::new(self.family));
            }
            candidates.push(candidate);
        }
        candidates.sort_by_key(TokenSet::len);
        let mut iter = candidates.into_iter();
        let Some(mut result) = iter.next() else {
            return Ok(self.relations.clone());
        };
        for candidate in iter {
            result = result.intersection(&candidate);
            if result.is_empty() {
                break;
            }
        }
        Ok(result)
    }

    /// The value tokens the named index recorded for one relation, if any.
    pub fn get_value_tokens(&self, name: &str, relation: &Token) -> CatalogResult<Option<&TokenSet>> {
        if !self.indexes.contains_key(name) {
            return Err(CatalogError::IndexNotFound(name.to_owned()));
        }
        Ok(self.reverse.get(relation).and_then(|per_name| per_name.get(name)))
    }

    /// Validate depth options and bind a query factory: the explicit one
    /// if given, else the first default that accepts the query. The bound
    /// factory's identity is the one search indexes are matched against.
    fn plan(
        &self,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<Option<(Arc<dyn QueryFactory<R>>, QueryExpander<R>)>> {
        if options.max_depth == Some(0) {
            return Err(CatalogError::InvalidMaxDepth);
        }
        let bound = match &options.factory {
            Some(factory) => factory.bind(query, self).map(|e| (Arc::clone(factory), e)),
            None => self
                .factories
                .iter()
                .find_map(|f| f.bind(query, self).map(|e| (Arc::clone(f), e))),
        };
        if bound.is_none() && options.max_depth.is_some_and(|d| d > 1) {
            return Err(CatalogError::MaxDepthWithoutFactory);
        }
        Ok(bound)
    }

    /// Initial chain tokens: the bound expander's seed queries when a
    /// factory is in effect, the query's own results otherwise.
    fn seed_tokens(
        &self,
        query: &Query,
        expander: Option<&QueryExpander<R>>,
    ) -> CatalogResult<TokenSet> {
        match expander {
            Some(expander) => {
                let mut seeds = TokenSet::new(self.family);
                for seed_query in expander(&[], self)? {
                    seeds.extend(self.get_relation_tokens(&seed_query)?.iter());
                }
                Ok(seeds)
            }
            None => self.get_relation_tokens(query),
        }
    }

    fn walk(
        &self,
        query: Query,
        expander: Option<QueryExpander<R>>,
        options: &SearchOptions<R>,
        seeds: TokenSet,
    ) -> CatalogResult<TokenChains<'_, R>> {
        let target_data = match &options.target_query {
            Some(target) => Some(self.get_relation_tokens(target)?),
            None => None,
        };
        let pending: Vec<Token> = seeds.iter().collect();
        let mut stack = VecDeque::new();
        stack.push_back((Vec::new(), pending.into_iter()));
        Ok(TokenChains {
            catalog: self,
            query,
            expander,
            stack,
            max_depth: options.max_depth,
            filter: options.filter.clone(),
            target_data,
            target_filter: options.target_filter.clone(),
            errored: false,
        })
    }

    /// Lazily walk the chains reachable from a query.
    pub fn find_relation_token_chains(
        &self,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<TokenChains<'_, R>> {
        let expander = self.plan(query, options)?.map(|(_, e)| e);
        let seeds = self.seed_tokens(query, expander.as_ref())?;
        self.walk(query.clone(), expander, options, seeds)
    }

    /// [`find_relation_token_chains`](Self::find_relation_token_chains)
    /// with each chain's relations resolved.
    pub fn find_relation_chains(
        &self,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<Chains<'_, R>> {
        Ok(Chains { inner: self.find_relation_token_chains(query, options)? })
    }

    /// Walk chains from explicit seed tokens instead of a query's own
    /// results. For search index implementations that keep their own
    /// starting points; the query still drives factory binding and
    /// expansion.
    pub fn chains_from(
        &self,
        seeds: impl IntoIterator<Item = Token>,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<TokenChains<'_, R>> {
        let expander = self.plan(query, options)?.map(|(_, e)| e);
        let seeds = TokenSet::from_tokens(self.family, seeds);
        self.walk(query.clone(), expander, options, seeds)
    }

    /// All relation tokens reachable from a query, transitively when a
    /// query factory binds.
    pub fn find_relation_tokens(
        &self,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<TokenSet> {
        let bound = self.plan(query, options)?;
        let factory = bound.as_ref().map(|(f, _)| f);
        if let Some(result) = self.consult_relation_indexes(query, options, factory)? {
            return Ok(result);
        }
        let plain = bound.is_none()
            && options.filter.is_none()
            && options.target_query.is_none()
            && options.target_filter.is_none();
        if plain {
            return self.get_relation_tokens(query);
        }
        let expander = bound.map(|(_, e)| e);
        let seeds = self.seed_tokens(query, expander.as_ref())?;
        let mut chains = self.walk(query.clone(), expander, options, seeds)?;
        let mut result = TokenSet::new(self.family);
        while let Some(chain) = chains.try_next()? {
            if let Some(last) = chain.last() {
                result.insert(last.clone());
            }
        }
        Ok(result)
    }

    /// [`find_relation_tokens`](Self::find_relation_tokens), resolved
    /// through the relation codec.
    pub fn find_relations(
        &self,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<Vec<R>> {
        let tokens = self.find_relation_tokens(query, options)?;
        tokens.iter().map(|t| self.resolve_relation_token(&t)).collect()
    }

    /// The value tokens the named index holds across every relation a
    /// search reaches.
    ///
    /// With an empty query and default options this is every value token
    /// the index knows.
    pub fn find_value_tokens(
        &self,
        name: &str,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<TokenSet> {
        let family = self
            .indexes
            .get(name)
            .ok_or_else(|| CatalogError::IndexNotFound(name.to_owned()))?
            .family;
        let unconstrained = query.is_empty()
            && options.max_depth.is_none()
            && options.filter.is_none()
            && options.target_query.is_none()
            && options.target_filter.is_none()
            && options.factory.is_none();
        if unconstrained {
            let mut all = TokenSet::new(family);
            if let Some(forward) = self.forward.get(name) {
                all.extend(forward.keys().cloned());
            }
            return Ok(all);
        }
        let bound = self.plan(query, options)?;
        let factory = bound.as_ref().map(|(f, _)| f);
        if let Some(result) = self.consult_value_indexes(name, query, options, factory)? {
            return Ok(result);
        }
        // Second probe: an index answering the relation shape still saves
        // the walk; its results map through the reverse sets.
        if let Some(relations) = self.consult_relation_indexes(query, options, factory)? {
            return Ok(self.values_for_relations(name, family, &relations));
        }
        let relations = self.find_relation_tokens(query, options)?;
        Ok(self.values_for_relations(name, family, &relations))
    }

    fn values_for_relations(
        &self,
        name: &str,
        family: ContainerFamily,
        relations: &TokenSet,
    ) -> TokenSet {
        let mut result = TokenSet::new(family);
        for relation in relations.iter() {
            if let Some(values) = self.reverse.get(&relation).and_then(|m| m.get(name)) {
                result.extend(values.iter());
            }
        }
        result
    }

    /// [`find_value_tokens`](Self::find_value_tokens), resolved through
    /// the index's value codec.
    pub fn find_values(
        &self,
        name: &str,
        query: &Query,
        options: &SearchOptions<R>,
    ) -> CatalogResult<Vec<Token>> {
        let tokens = self.find_value_tokens(name, query, options)?;
        tokens.iter().map(|t| self.value_load(name, &t)).collect()
    }

    /// Whether a search yields anything at all, stopping at the first
    /// chain.
    pub fn can_find(&self, query: &Query, options: &SearchOptions<R>) -> CatalogResult<bool> {
        let bound = self.plan(query, options)?;
        let factory = bound.as_ref().map(|(f, _)| f);
        if let Some(result) = self.consult_relation_indexes(query, options, factory)? {
            return Ok(!result.is_empty());
        }
        let expander = bound.map(|(_, e)| e);
        let seeds = self.seed_tokens(query, expander.as_ref())?;
        let mut chains = self.walk(query.clone(), expander, options, seeds)?;
        Ok(chains.try_next()?.is_some())
    }

    fn consult_relation_indexes(
        &self,
        query: &Query,
        options: &SearchOptions<R>,
        factory: Option<&Arc<dyn QueryFactory<R>>>,
    ) -> CatalogResult<Option<TokenSet>> {
        if options.ignore_search_index
            || options.filter.is_some()
            || options.target_query.is_some()
            || options.target_filter.is_some()
        {
            return Ok(None);
        }
        let signature = Signature::of(true, None, query, options.max_depth);
        for entry in &self.search_indexes {
            let applicable = entry
                .matches
                .iter()
                .any(|m| m.signature == signature && m.accepts(query, factory));
            if applicable {
                if let Some(result) = entry.index.relation_results(query, self)? {
                    return Ok(Some(result));
                }
            }
        }
        Ok(None)
    }

    fn consult_value_indexes(
        &self,
        name: &str,
        query: &Query,
        options: &SearchOptions<R>,
        factory: Option<&Arc<dyn QueryFactory<R>>>,
    ) -> CatalogResult<Option<TokenSet>> {
        if options.ignore_search_index
            || options.filter.is_some()
            || options.target_query.is_some()
            || options.target_filter.is_some()
        {
            return Ok(None);
        }
        let signature = Signature::of(false, Some(name), query, options.max_depth);
        for entry in &self.search_indexes {
            let applicable = entry
                .matches
                .iter()
                .any(|m| m.signature == signature && m.accepts(query, factory));
            if applicable {
                if let Some(result) = entry.index.value_results(name, query, self)? {
                    return Ok(Some(result));
                }
            }
        }
        Ok(None)
    }
}
