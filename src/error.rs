//! Error types for the relation catalog.

use thiserror::Error;

/// Boxed error produced by caller-supplied closures (codecs, extractors,
/// filters, query factories). Surfaced verbatim through
/// [`CatalogError::External`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised by catalog operations.
///
/// Configuration errors are raised at registration or call boundaries and
/// never at arbitrary points mid-mutation. Failures inside caller-supplied
/// code propagate unwrapped through [`CatalogError::External`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A value index with this name is already registered.
    #[error("value index already exists: {0}")]
    DuplicateIndex(String),

    /// The same extractor is already registered under another name.
    #[error("extractor already registered under value index: {0}")]
    DuplicateExtractor(String),

    /// No value index is registered under this name.
    #[error("value index not found: {0}")]
    IndexNotFound(String),

    /// A value codec must supply both directions or neither.
    #[error("either both of dump and load must be supplied, or neither")]
    CodecHalfPair,

    /// The listener was never registered (or was already removed).
    #[error("listener not found")]
    ListenerNotFound,

    /// The search index was never registered.
    #[error("search index not found")]
    SearchIndexNotFound,

    /// The query factory is already registered.
    #[error("query factory already registered")]
    DuplicateQueryFactory,

    /// The query factory was never registered.
    #[error("query factory not found")]
    QueryFactoryNotFound,

    /// `max_depth` must be a positive integer.
    #[error("max depth must be at least 1")]
    InvalidMaxDepth,

    /// A depth-limited transitive search needs a query factory to expand
    /// chains beyond the first hop.
    #[error("max depth beyond 1 requires a query factory")]
    MaxDepthWithoutFactory,

    /// The query is structurally invalid.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A single-valued index's extractor produced more than one value.
    #[error("single-valued index produced multiple values: {0}")]
    MultipleValues(String),

    /// A search index registered a static value under the relation key.
    #[error("search index may not register a static value for the relation key")]
    StaticRelationValue,

    /// An error from caller-supplied code, passed through unmodified.
    #[error(transparent)]
    External(#[from] BoxError),
}
