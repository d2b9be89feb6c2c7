//! An embedded, multiply-indexed relation catalog.
//!
//! A relation is any caller-owned object that links other objects: an
//! employment edge, a group membership, an RDF-style triple. The catalog
//! stores relations by token, indexes the values your extractors pull out
//! of them, and answers conjunctive queries over those indexes, plus
//! transitive searches that walk from relation to relation through a
//! pluggable query factory, with cycle detection, depth limits, and
//! precomputed accelerators for hot search shapes.
//!
//! # Overview
//!
//! - [`Catalog`] holds the maps and the registries (value indexes,
//!   listeners, default query factories, search indexes).
//! - [`Token`] / [`TokenSet`] are the canonical identities and the matched
//!   ordered-set containers everything is stored in.
//! - [`Query`] expresses one conjunctive search: equality, the
//!   empty marker, or an [`any`] wildcard per clause.
//! - [`TransposingTransitive`] walks two-column relations transitively;
//!   [`TransitiveMembership`] accelerates those walks with precomputed
//!   closures.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use relata::{Catalog, Query, SearchOptions, Token, TransposingTransitive, ValueIndex};
//!
//! struct Reports {
//!     id: i64,
//!     employee: String,
//!     supervisor: Option<String>,
//! }
//!
//! # fn main() -> relata::CatalogResult<()> {
//! let mut catalog: Catalog<Reports> = Catalog::new(
//!     |r: &Reports, _| Ok(Token::Int(r.id)),
//!     |t, _| Err(format!("relation {t} not resolvable here").into()),
//! );
//! catalog.add_value_index(ValueIndex::single("employee", |r: &Reports| {
//!     Some(Token::from(r.employee.as_str()))
//! }))?;
//! catalog.add_value_index(ValueIndex::single("supervisor", |r: &Reports| {
//!     r.supervisor.clone().map(Token::String)
//! }))?;
//!
//! catalog.index(&Reports { id: 1, employee: "betty".into(), supervisor: Some("ann".into()) })?;
//! catalog.index(&Reports { id: 2, employee: "chuck".into(), supervisor: Some("betty".into()) })?;
//!
//! // Walk supervisor -> employee -> supervisor -> ...
//! catalog.add_default_query_factory(Arc::new(TransposingTransitive::new(
//!     "supervisor",
//!     "employee",
//! )))?;
//!
//! let reached = catalog.find_value_tokens(
//!     "employee",
//!     &Query::new().with("supervisor", "ann"),
//!     &SearchOptions::new(),
//! )?;
//! assert!(reached.contains(&Token::from("betty")));
//! assert!(reached.contains(&Token::from("chuck")));
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency and durability
//!
//! The catalog is a plain data structure: one logical writer, any number
//! of readers of a shared `&Catalog`, no internal locking, no persistence.
//! Hosts that need durability serialize the data types (which implement
//! serde traits) or rebuild from their own store.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(missing_docs)]

pub mod catalog;
pub mod error;
pub mod factory;
pub mod listener;
pub mod query;
pub mod searchindex;
pub mod token;

pub use catalog::{
    Catalog, ChainFilter, Chains, Extractor, RelationChain, RelationDump, RelationLoad,
    ResolvedChain, SearchOptions, TokenChains, TokenCodec, ValueIndex,
};
pub use error::{BoxError, CatalogError, CatalogResult};
pub use factory::{QueryExpander, QueryFactory, TransposingTransitive};
pub use listener::{CatalogListener, ChangeMap};
pub use query::{any, Query, QueryKey, QueryValue};
pub use searchindex::{SearchIndex, SearchIndexMatch, Signature, TransitiveMembership};
pub use token::{multiunion, ContainerFamily, Token, TokenSet};
