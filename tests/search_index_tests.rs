//! Search index routing, decline fallback, and the transitive membership
//! accelerator.

use std::sync::{Arc, Mutex};

use relata::{
    Catalog, CatalogError, CatalogResult, ContainerFamily, Query, QueryKey, QueryValue,
    SearchIndex, SearchIndexMatch, SearchOptions, Signature, Token, TokenSet,
    TransitiveMembership, TransposingTransitive, ValueIndex,
};

#[derive(Clone, Debug)]
struct Node {
    id: i64,
    parent: Option<i64>,
}

/// Tree fixture: 1 is the root; 2 and 3 hang off it; 4 hangs off 2. No
/// query factory is registered; searches stay intransitive unless a test
/// supplies one.
fn tree() -> Catalog<Node> {
    let mut catalog: Catalog<Node> = Catalog::new(
        |r: &Node, _| Ok(Token::Int(r.id)),
        |_, _| Err("not resolvable".into()),
    );
    catalog
        .add_value_index(ValueIndex::single("node", |r: &Node| Some(Token::Int(r.id))))
        .unwrap();
    catalog
        .add_value_index(ValueIndex::single("parent", |r: &Node| r.parent.map(Token::Int)))
        .unwrap();
    for (id, parent) in [(1, None), (2, Some(1)), (3, Some(1)), (4, Some(2))] {
        catalog.index(&Node { id, parent }).unwrap();
    }
    catalog
}

/// The tree plus an attached accelerator whose walk rule is the catalog's
/// default query factory.
fn accelerated_tree() -> (Catalog<Node>, Arc<TransitiveMembership>) {
    let mut catalog = tree();
    let accelerator = Arc::new(TransitiveMembership::new("parent", "node"));
    catalog.add_default_query_factory(accelerator.factory()).unwrap();
    catalog.add_search_index(accelerator.clone()).unwrap();
    (catalog, accelerator)
}

fn ints(tokens: &TokenSet) -> Vec<i64> {
    tokens.iter().filter_map(|t| t.as_int()).collect()
}

fn under(id: i64) -> Query {
    Query::new().with("parent", id)
}

/// Answers one registered shape with a fixed set, or declines.
struct Canned {
    signature: Signature,
    answer: Mutex<Option<TokenSet>>,
}

impl Canned {
    fn new(signature: Signature, answer: Option<TokenSet>) -> Self {
        Self { signature, answer: Mutex::new(answer) }
    }
}

impl SearchIndex<Node> for Canned {
    fn attach(&self, _catalog: &Catalog<Node>) -> CatalogResult<Vec<SearchIndexMatch<Node>>> {
        Ok(vec![SearchIndexMatch {
            signature: self.signature.clone(),
            static_values: Vec::new(),
            factory: None,
        }])
    }

    fn replicate(&self) -> Arc<dyn SearchIndex<Node>> {
        Arc::new(Self::new(self.signature.clone(), self.answer.lock().unwrap().clone()))
    }

    fn relation_results(
        &self,
        _query: &Query,
        _catalog: &Catalog<Node>,
    ) -> CatalogResult<Option<TokenSet>> {
        Ok(self.answer.lock().unwrap().clone())
    }
}

fn canned_set(vals: &[i64]) -> TokenSet {
    TokenSet::from_tokens(ContainerFamily::Dense, vals.iter().map(|&i| Token::Int(i)))
}

#[test]
fn matching_searches_are_routed_to_the_index() {
    let mut catalog = tree();
    let signature = Signature::of(true, None, &under(1), None);
    let stub: Arc<dyn SearchIndex<Node>> =
        Arc::new(Canned::new(signature, Some(canned_set(&[99]))));
    catalog.add_search_index(stub).unwrap();

    // The canned answer proves the call went to the index, not the maps.
    let rels = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&rels), vec![99]);
    assert!(catalog.can_find(&under(1), &SearchOptions::new()).unwrap());
}

#[test]
fn non_matching_shapes_fall_through() {
    let mut catalog = tree();
    let signature = Signature::of(true, None, &under(1), None);
    let stub: Arc<dyn SearchIndex<Node>> =
        Arc::new(Canned::new(signature, Some(canned_set(&[99]))));
    catalog.add_search_index(stub).unwrap();

    // Different depth, different clause names, call-time filter: all miss
    // the registered signature and take the ordinary path.
    let rels = catalog
        .find_relation_tokens(&under(1), &SearchOptions::new().max_depth(1))
        .unwrap();
    assert_eq!(ints(&rels), vec![2, 3]);
    let rels = catalog
        .find_relation_tokens(&Query::new().with("node", 4i64), &SearchOptions::new())
        .unwrap();
    assert_eq!(ints(&rels), vec![4]);
    let rels = catalog
        .find_relation_tokens(
            &under(1),
            &SearchOptions::new().filter(|_, _, _| Ok(true)),
        )
        .unwrap();
    assert_eq!(ints(&rels), vec![2, 3]);
}

#[test]
fn ignore_search_index_forces_the_generic_path() {
    let mut catalog = tree();
    let signature = Signature::of(true, None, &under(1), None);
    let stub: Arc<dyn SearchIndex<Node>> =
        Arc::new(Canned::new(signature, Some(canned_set(&[99]))));
    catalog.add_search_index(stub).unwrap();

    let rels = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&rels), vec![99]);

    let rels = catalog
        .find_relation_tokens(&under(1), &SearchOptions::new().ignore_search_index())
        .unwrap();
    assert_eq!(ints(&rels), vec![2, 3]);
    assert!(catalog
        .can_find(&under(1), &SearchOptions::new().ignore_search_index())
        .unwrap());
}

#[test]
fn a_declining_index_falls_back_to_the_maps() {
    let mut catalog = tree();
    let signature = Signature::of(true, None, &under(1), None);
    let stub: Arc<dyn SearchIndex<Node>> = Arc::new(Canned::new(signature, None));
    catalog.add_search_index(stub).unwrap();

    let rels = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&rels), vec![2, 3]);
}

#[test]
fn removing_a_search_index_restores_the_generic_path() {
    let mut catalog = tree();
    let signature = Signature::of(true, None, &under(1), None);
    let stub: Arc<dyn SearchIndex<Node>> =
        Arc::new(Canned::new(signature, Some(canned_set(&[99]))));
    catalog.add_search_index(stub.clone()).unwrap();
    assert_eq!(catalog.search_indexes().count(), 1);
    assert_eq!(ints(&catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap()), vec![99]);

    catalog.remove_search_index(&stub).unwrap();
    assert_eq!(catalog.search_indexes().count(), 0);
    assert_eq!(ints(&catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap()), vec![2, 3]);
    assert!(matches!(
        catalog.remove_search_index(&stub),
        Err(CatalogError::SearchIndexNotFound)
    ));
}

#[test]
fn relation_matches_serve_value_searches() {
    let mut catalog = tree();
    let signature = Signature::of(true, None, &under(1), None);
    let stub: Arc<dyn SearchIndex<Node>> =
        Arc::new(Canned::new(signature, Some(canned_set(&[4]))));
    catalog.add_search_index(stub).unwrap();

    // No index registered for the value shape, so the relation answer is
    // mapped through the reverse sets instead of searching the maps.
    let values = catalog.find_value_tokens("node", &under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&values), vec![4]);
}

struct BadStatic;

impl SearchIndex<Node> for BadStatic {
    fn attach(&self, _catalog: &Catalog<Node>) -> CatalogResult<Vec<SearchIndexMatch<Node>>> {
        Ok(vec![SearchIndexMatch {
            signature: Signature::of(true, None, &Query::new(), None),
            static_values: vec![(QueryKey::Relation, QueryValue::Is(Token::Int(1)))],
            factory: None,
        }])
    }

    fn replicate(&self) -> Arc<dyn SearchIndex<Node>> {
        Arc::new(Self)
    }
}

#[test]
fn static_relation_values_are_rejected_at_registration() {
    let mut catalog = tree();
    assert!(matches!(
        catalog.add_search_index(Arc::new(BadStatic)),
        Err(CatalogError::StaticRelationValue)
    ));
}

#[test]
fn accelerators_only_serve_their_own_walk_rule() {
    // Attached but with no factory in effect: searches are intransitive
    // and must stay that way, closures or not.
    let mut catalog = tree();
    let accelerator = Arc::new(TransitiveMembership::new("parent", "node"));
    catalog.add_search_index(accelerator.clone()).unwrap();
    let rels = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&rels), vec![2, 3]);

    // A different default factory that binds the same queries drives the
    // walk itself; the accelerator stays out of it.
    let foreign: Arc<dyn relata::QueryFactory<Node>> =
        Arc::new(TransposingTransitive::new("parent", "node"));
    catalog.add_default_query_factory(foreign.clone()).unwrap();
    let rels = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&rels), vec![2, 3, 4]);

    // Once the accelerator's own rule is the one in effect, it answers.
    catalog.remove_default_query_factory(&foreign).unwrap();
    catalog.add_default_query_factory(accelerator.factory()).unwrap();
    let rels = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&rels), vec![2, 3, 4]);
}

#[test]
fn transitive_membership_answers_like_the_walk() {
    let mut catalog = tree();
    let accelerator = Arc::new(
        TransitiveMembership::new("parent", "node").with_value_index("node"),
    );
    catalog.add_default_query_factory(accelerator.factory()).unwrap();
    let expected = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();

    catalog.add_search_index(accelerator).unwrap();

    let accelerated = catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&accelerated), ints(&expected));
    assert_eq!(ints(&accelerated), vec![2, 3, 4]);

    let values = catalog.find_value_tokens("node", &under(1), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&values), vec![2, 3, 4]);

    // Other shapes are untouched.
    assert_eq!(
        ints(&catalog.find_relation_tokens(&under(1), &SearchOptions::new().max_depth(1)).unwrap()),
        vec![2, 3]
    );
}

#[test]
fn transitive_membership_tracks_mutations() {
    let (mut catalog, _accelerator) = accelerated_tree();

    catalog.index(&Node { id: 5, parent: Some(4) }).unwrap();
    assert_eq!(ints(&catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap()), vec![2, 3, 4, 5]);
    assert_eq!(ints(&catalog.find_relation_tokens(&under(2), &SearchOptions::new()).unwrap()), vec![4, 5]);

    // Reparent 3 under 4: its subtree moves.
    catalog.index(&Node { id: 3, parent: Some(4) }).unwrap();
    assert_eq!(ints(&catalog.find_relation_tokens(&under(2), &SearchOptions::new()).unwrap()), vec![3, 4, 5]);

    catalog.unindex_doc(&Token::Int(4)).unwrap();
    assert_eq!(ints(&catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap()), vec![2]);

    catalog.clear().unwrap();
    assert!(catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap().is_empty());
}

#[test]
fn transitive_membership_survives_copy() {
    let (catalog, _accelerator) = accelerated_tree();

    let mut replica = catalog.copy().unwrap();
    assert_eq!(ints(&replica.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap()), vec![2, 3, 4]);

    replica.index(&Node { id: 5, parent: Some(3) }).unwrap();
    assert_eq!(ints(&replica.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap()), vec![2, 3, 4, 5]);
    assert_eq!(ints(&catalog.find_relation_tokens(&under(1), &SearchOptions::new()).unwrap()), vec![2, 3, 4]);
}

#[test]
fn explicit_factories_are_matched_by_identity() {
    let mut catalog = tree();
    let accelerator = Arc::new(TransitiveMembership::new("parent", "node"));
    let factory = accelerator.factory();
    catalog.add_search_index(accelerator).unwrap();

    // Passing the accelerator's own factory explicitly routes to it.
    let rels = catalog
        .find_relation_tokens(&under(1), &SearchOptions::new().factory(factory))
        .unwrap();
    assert_eq!(ints(&rels), vec![2, 3, 4]);

    // A foreign factory is not served by the accelerator; the walk runs
    // with that factory instead.
    let foreign = Arc::new(TransposingTransitive::new("parent", "node"));
    let rels = catalog
        .find_relation_tokens(&under(1), &SearchOptions::new().factory(foreign))
        .unwrap();
    assert_eq!(ints(&rels), vec![2, 3, 4]);
}
