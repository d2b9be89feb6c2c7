//! Value index registration and the indexing engine.
//!
//! Each value index owns three things inside the catalog: a forward map
//! from value token to the set of relations carrying that value, a slot in
//! the per-relation reverse map, and an empty-marker set of the relations
//! it extracted nothing from. Reindexing is diff-based: only the changed
//! value tokens touch the forward maps, and the stored reverse set is
//! updated in place when the change is small relative to the set.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BoxError, CatalogError, CatalogResult};
use crate::listener::ChangeMap;
use crate::token::{ContainerFamily, Token, TokenSet};

use super::{Catalog, TokenCodec};

/// Extracts the value tokens a relation contributes to one index.
pub type Extractor<R> = Arc<dyn Fn(&R) -> Result<Vec<Token>, BoxError> + Send + Sync>;

/// Registration for one value index.
///
/// Built with [`single`](Self::single) or [`multiple`](Self::multiple)
/// (or their `try_` variants for fallible extractors), then refined:
///
/// ```
/// use relata::{ContainerFamily, Token, ValueIndex};
///
/// struct Rel { kind: String }
///
/// let index = ValueIndex::single("kind", |r: &Rel| Some(Token::from(r.kind.as_str())))
///     .with_family(ContainerFamily::Ordered);
/// assert_eq!(index.name(), "kind");
/// ```
pub struct ValueIndex<R> {
    pub(crate) name: String,
    pub(crate) extractor: Extractor<R>,
    pub(crate) multiple: bool,
    pub(crate) family: ContainerFamily,
    pub(crate) dump: Option<TokenCodec<R>>,
    pub(crate) load: Option<TokenCodec<R>>,
}

impl<R> ValueIndex<R> {
    fn from_parts(name: impl Into<String>, extractor: Extractor<R>, multiple: bool) -> Self {
        Self {
            name: name.into(),
            extractor,
            multiple,
            family: ContainerFamily::default(),
            dump: None,
            load: None,
        }
    }

    /// A single-valued index: the extractor yields at most one token per
    /// relation. Extracting `None` puts the relation in the index's
    /// empty-marker set.
    pub fn single(
        name: impl Into<String>,
        extract: impl Fn(&R) -> Option<Token> + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(
            name,
            Arc::new(move |r| Ok(extract(r).into_iter().collect())),
            false,
        )
    }

    /// A multi-valued index: the extractor yields any number of tokens.
    pub fn multiple(
        name: impl Into<String>,
        extract: impl Fn(&R) -> Vec<Token> + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(name, Arc::new(move |r| Ok(extract(r))), true)
    }

    /// Fallible variant of [`single`](Self::single).
    pub fn try_single(
        name: impl Into<String>,
        extract: impl Fn(&R) -> Result<Option<Token>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(
            name,
            Arc::new(move |r| Ok(extract(r)?.into_iter().collect())),
            false,
        )
    }

    /// Fallible variant of [`multiple`](Self::multiple).
    pub fn try_multiple(
        name: impl Into<String>,
        extract: impl Fn(&R) -> Result<Vec<Token>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(name, Arc::new(extract), true)
    }

    /// Reuse an existing extractor. Registering the same extractor `Arc`
    /// under two names is rejected by the catalog.
    pub fn from_extractor(name: impl Into<String>, extractor: Extractor<R>, multiple: bool) -> Self {
        Self::from_parts(name, extractor, multiple)
    }

    /// Container family for this index's token sets.
    #[must_use]
    pub fn with_family(mut self, family: ContainerFamily) -> Self {
        self.family = family;
        self
    }

    /// Value-to-token half of the value codec. Must be paired with
    /// [`with_load`](Self::with_load) by registration time.
    #[must_use]
    pub fn with_dump(
        mut self,
        dump: impl Fn(&Token, &Catalog<R>) -> Result<Token, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.dump = Some(Arc::new(dump));
        self
    }

    /// Token-to-value half of the value codec.
    #[must_use]
    pub fn with_load(
        mut self,
        load: impl Fn(&Token, &Catalog<R>) -> Result<Token, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.load = Some(Arc::new(load));
        self
    }

    /// The index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the index is multi-valued.
    #[must_use]
    pub const fn is_multiple(&self) -> bool {
        self.multiple
    }

    /// The index's container family.
    #[must_use]
    pub const fn family(&self) -> ContainerFamily {
        self.family
    }
}

impl<R> Clone for ValueIndex<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            extractor: Arc::clone(&self.extractor),
            multiple: self.multiple,
            family: self.family,
            dump: self.dump.clone(),
            load: self.load.clone(),
        }
    }
}

impl<R> Catalog<R> {
    /// Register a value index.
    ///
    /// If relations are already indexed, each one is loaded back through
    /// the relation codec and indexed under the new name, so a late
    /// registration sees the same state an early one would have.
    pub fn add_value_index(&mut self, index: ValueIndex<R>) -> CatalogResult<()> {
        if self.indexes.contains_key(&index.name) {
            return Err(CatalogError::DuplicateIndex(index.name));
        }
        if let Some(existing) =
            self.indexes.values().find(|e| Arc::ptr_eq(&e.extractor, &index.extractor))
        {
            return Err(CatalogError::DuplicateExtractor(existing.name.clone()));
        }
        if index.dump.is_some() != index.load.is_some() {
            return Err(CatalogError::CodecHalfPair);
        }
        let name = index.name.clone();
        self.forward.insert(name.clone(), BTreeMap::new());
        self.empties.insert(name.clone(), TokenSet::new(self.family));
        self.indexes.insert(name.clone(), index);

        let backfill: Vec<Token> = self.relations.iter().collect();
        if !backfill.is_empty() {
            debug!(index = %name, relations = backfill.len(), "backfilling value index");
        }
        for token in backfill {
            let relation = self.resolve_relation_token(&token)?;
            let values = self.extract(&name, &relation)?;
            self.apply_index_diff(&token, &name, values)?;
        }
        Ok(())
    }

    /// Drop a value index registration and all of its map state.
    pub fn remove_value_index(&mut self, name: &str) -> CatalogResult<()> {
        if self.indexes.remove(name).is_none() {
            return Err(CatalogError::IndexNotFound(name.to_owned()));
        }
        self.forward.remove(name);
        self.empties.remove(name);
        for per_name in self.reverse.values_mut() {
            per_name.remove(name);
        }
        debug!(index = %name, "value index removed");
        Ok(())
    }

    /// Index a relation under its own token.
    pub fn index(&mut self, relation: &R) -> CatalogResult<Token> {
        let token = self.tokenize_relation(relation)?;
        self.index_doc(token.clone(), relation)?;
        Ok(token)
    }

    /// Index a relation under an explicit token, adding it or reindexing
    /// it as appropriate.
    ///
    /// Values are extracted for every index before any map is touched, so
    /// an extractor or codec failure leaves the catalog unchanged.
    pub fn index_doc(&mut self, token: Token, relation: &R) -> CatalogResult<()> {
        self.prune_listeners();
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        let mut extracted: Vec<(String, TokenSet)> = Vec::with_capacity(names.len());
        for name in names {
            let values = self.extract(&name, relation)?;
            extracted.push((name, values));
        }

        let known = self.relations.contains(&token);
        let mut additions = ChangeMap::new();
        let mut removals = ChangeMap::new();
        for (name, values) in extracted {
            let (added, removed) = self.apply_index_diff(&token, &name, values)?;
            if !added.is_empty() {
                additions.insert(name.clone(), added);
            }
            if !removed.is_empty() {
                removals.insert(name, removed);
            }
        }
        self.relations.insert(token.clone());

        if known {
            debug!(token = %token, "relation reindexed");
            self.notify_modified(&token, &additions, &removals)
        } else {
            debug!(token = %token, "relation indexed");
            self.notify_added(&token, &additions)
        }
    }

    /// Remove a relation, by value.
    pub fn unindex(&mut self, relation: &R) -> CatalogResult<Token> {
        let token = self.tokenize_relation(relation)?;
        self.unindex_doc(&token)?;
        Ok(token)
    }

    /// Remove a relation token from every map.
    ///
    /// Unindexing a token the catalog does not hold is not an error;
    /// listeners still hear `relation_removed` with an empty change map.
    pub fn unindex_doc(&mut self, token: &Token) -> CatalogResult<()> {
        self.prune_listeners();
        let mut removals = ChangeMap::new();
        if self.relations.remove(token) {
            if let Some(per_name) = self.reverse.remove(token) {
                for (name, values) in per_name {
                    for value in values.iter() {
                        self.forward_remove(&name, &value, token);
                    }
                    removals.insert(name, values);
                }
            }
            for empties in self.empties.values_mut() {
                empties.remove(token);
            }
            debug!(token = %token, "relation unindexed");
        }
        self.notify_removed(token, &removals)
    }

    /// Drop every relation while keeping registrations.
    pub fn clear(&mut self) -> CatalogResult<()> {
        self.prune_listeners();
        self.relations.clear();
        for forward in self.forward.values_mut() {
            forward.clear();
        }
        for empties in self.empties.values_mut() {
            empties.clear();
        }
        self.reverse.clear();
        debug!("catalog cleared");
        self.notify_cleared()
    }

    /// Run the named index's extractor and value codec against a relation.
    fn extract(&self, name: &str, relation: &R) -> CatalogResult<TokenSet> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| CatalogError::IndexNotFound(name.to_owned()))?;
        let raw = (index.extractor)(relation)?;
        if !index.multiple && raw.len() > 1 {
            return Err(CatalogError::MultipleValues(name.to_owned()));
        }
        let mut values = TokenSet::new(index.family);
        match &index.dump {
            Some(dump) => {
                for value in &raw {
                    values.insert(dump(value, self)?);
                }
            }
            None => values.extend(raw),
        }
        Ok(values)
    }

    /// Reconcile one index's maps with freshly extracted values for one
    /// relation. Returns the (added, removed) value tokens.
    pub(crate) fn apply_index_diff(
        &mut self,
        token: &Token,
        name: &str,
        values: TokenSet,
    ) -> CatalogResult<(TokenSet, TokenSet)> {
        let family = self
            .indexes
            .get(name)
            .ok_or_else(|| CatalogError::IndexNotFound(name.to_owned()))?
            .family;
        let old = self.reverse.get(token).and_then(|m| m.get(name));

        let Some(old) = old else {
            // Nothing recorded yet: first indexing, or previously empty.
            if values.is_empty() {
                self.empties_insert(name, token);
                return Ok((TokenSet::new(family), TokenSet::new(family)));
            }
            for value in values.iter() {
                self.forward_insert(name, value, token);
            }
            self.empties_remove(name, token);
            self.reverse.entry(token.clone()).or_default().insert(name.to_owned(), values.clone());
            return Ok((values, TokenSet::new(family)));
        };

        let len_old = old.len();
        let added = values.difference(old);
        let removed = old.difference(&values);
        if added.is_empty() && removed.is_empty() {
            return Ok((added, removed));
        }

        for value in removed.iter() {
            self.forward_remove(name, &value, token);
        }
        for value in added.iter() {
            self.forward_insert(name, value, token);
        }

        if values.is_empty() {
            if let Some(per_name) = self.reverse.get_mut(token) {
                per_name.remove(name);
                if per_name.is_empty() {
                    self.reverse.remove(token);
                }
            }
            self.empties_insert(name, token);
        } else {
            // Small diffs mutate the stored set in place; large ones
            // replace it wholesale.
            let len_removed = removed.len();
            let recycle = len_removed < 5
                || len_removed * 10 <= len_old
                || (len_old > 500 && len_removed * 5 < len_old);
            if let Some(stored) =
                self.reverse.get_mut(token).and_then(|m| m.get_mut(name))
            {
                if recycle {
                    for value in removed.iter() {
                        stored.remove(&value);
                    }
                    stored.extend(added.iter());
                } else {
                    *stored = values;
                }
            }
        }
        Ok((added, removed))
    }

    fn forward_insert(&mut self, name: &str, value: Token, token: &Token) {
        let family = self.indexes.get(name).map_or(self.family, |i| i.family);
        if let Some(forward) = self.forward.get_mut(name) {
            forward
                .entry(value)
                .or_insert_with(|| TokenSet::new(family))
                .insert(token.clone());
        }
    }

    fn forward_remove(&mut self, name: &str, value: &Token, token: &Token) {
        if let Some(forward) = self.forward.get_mut(name) {
            if let Some(set) = forward.get_mut(value) {
                set.remove(token);
                if set.is_empty() {
                    forward.remove(value);
                }
            }
        }
    }

    fn empties_insert(&mut self, name: &str, token: &Token) {
        if let Some(empties) = self.empties.get_mut(name) {
            empties.insert(token.clone());
        }
    }

    fn empties_remove(&mut self, name: &str, token: &Token) {
        if let Some(empties) = self.empties.get_mut(name) {
            empties.remove(token);
        }
    }
}
