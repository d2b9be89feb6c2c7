//! Change-notification listeners.
//!
//! Listeners are owned by the caller; the catalog holds either a strong
//! handle ([`std::sync::Arc`]) or a weak one ([`std::sync::Weak`]). A weakly
//! held listener whose owner has dropped it is silently skipped during
//! notification and pruned on the next registration or mutation.
//!
//! Notification is synchronous and in registration order. Search indexes
//! (which also observe mutations to maintain their precomputed state) are
//! notified before plain listeners.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::catalog::Catalog;
use crate::token::{Token, TokenSet};

/// Per-index change map passed to listeners: index name to the value tokens
/// added to (or removed from) that index for one relation. Indexes with no
/// change are omitted.
pub type ChangeMap = BTreeMap<String, TokenSet>;

/// Observer of catalog mutations.
///
/// All methods have empty default bodies; implement the ones you care
/// about. Implementations that accumulate state need their own interior
/// mutability, since notification passes `&self`.
#[allow(unused_variables)]
pub trait CatalogListener<R>: Send + Sync {
    /// A relation token was indexed for the first time.
    fn relation_added(&self, catalog: &Catalog<R>, token: &Token, additions: &ChangeMap) {}

    /// An already-indexed relation token was reindexed. Both maps may be
    /// empty when no extracted value changed.
    fn relation_modified(
        &self,
        catalog: &Catalog<R>,
        token: &Token,
        additions: &ChangeMap,
        removals: &ChangeMap,
    ) {
    }

    /// A relation token was removed from the catalog.
    fn relation_removed(&self, catalog: &Catalog<R>, token: &Token, removals: &ChangeMap) {}

    /// Every relation was dropped at once.
    fn source_cleared(&self, catalog: &Catalog<R>) {}

    /// A detached replica of the catalog this listener observes now exists.
    fn source_copied(&self, original: &Catalog<R>, replica: &Catalog<R>) {}

    /// This listener was registered with the catalog.
    fn source_added(&self, catalog: &Catalog<R>) {}

    /// This listener was removed from the catalog.
    fn source_removed(&self, catalog: &Catalog<R>) {}
}

/// A strong or weak handle on a registered listener.
pub(crate) enum ListenerHandle<R> {
    Strong(Arc<dyn CatalogListener<R>>),
    Weak(Weak<dyn CatalogListener<R>>),
}

impl<R> ListenerHandle<R> {
    /// Resolve to a live listener, if any.
    pub(crate) fn upgrade(&self) -> Option<Arc<dyn CatalogListener<R>>> {
        match self {
            Self::Strong(l) => Some(Arc::clone(l)),
            Self::Weak(w) => w.upgrade(),
        }
    }

    /// Whether this handle points at the given listener.
    pub(crate) fn is(&self, listener: &Arc<dyn CatalogListener<R>>) -> bool {
        self.upgrade().is_some_and(|l| Arc::ptr_eq(&l, listener))
    }

    /// Whether a weak handle has expired.
    pub(crate) fn is_dead(&self) -> bool {
        match self {
            Self::Strong(_) => false,
            Self::Weak(w) => w.strong_count() == 0,
        }
    }
}
