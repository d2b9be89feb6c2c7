//! Transitive walks: chains, cycles, depth limits, filters, and targets.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use relata::{
    Catalog, CatalogError, Query, SearchOptions, Token, TokenSet, TransposingTransitive,
    ValueIndex,
};

#[derive(Clone, Debug, PartialEq)]
struct Edge {
    id: i64,
    employee: String,
    supervisor: Option<String>,
}

type Store = Arc<Mutex<BTreeMap<i64, Edge>>>;

fn org_chart() -> (Store, Catalog<Edge>) {
    let store: Store = Arc::default();
    let loader = Arc::clone(&store);
    let mut catalog: Catalog<Edge> = Catalog::new(
        |r: &Edge, _| Ok(Token::Int(r.id)),
        move |t, _| {
            let id = t.as_int().ok_or("relation tokens are integers")?;
            loader
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| format!("unknown relation {id}").into())
        },
    );
    catalog
        .add_value_index(ValueIndex::single("employee", |r: &Edge| {
            Some(Token::from(r.employee.as_str()))
        }))
        .unwrap();
    catalog
        .add_value_index(ValueIndex::single("supervisor", |r: &Edge| {
            r.supervisor.clone().map(Token::String)
        }))
        .unwrap();
    catalog
        .add_default_query_factory(Arc::new(TransposingTransitive::new("supervisor", "employee")))
        .unwrap();

    // ann -> betty -> dave, ann -> carl
    for (id, employee, supervisor) in [
        (1, "betty", Some("ann")),
        (2, "carl", Some("ann")),
        (3, "dave", Some("betty")),
    ] {
        let edge = Edge {
            id,
            employee: employee.to_owned(),
            supervisor: supervisor.map(str::to_owned),
        };
        store.lock().unwrap().insert(id, edge.clone());
        catalog.index(&edge).unwrap();
    }
    (store, catalog)
}

fn ints(tokens: &TokenSet) -> Vec<i64> {
    tokens.iter().filter_map(|t| t.as_int()).collect()
}

fn supervised_by(name: &str) -> Query {
    Query::new().with("supervisor", name)
}

#[test]
fn transitive_search_reaches_the_whole_subtree() {
    let (_store, catalog) = org_chart();
    let rels = catalog.find_relation_tokens(&supervised_by("ann"), &SearchOptions::new()).unwrap();
    assert_eq!(ints(&rels), vec![1, 2, 3]);

    let names =
        catalog.find_value_tokens("employee", &supervised_by("ann"), &SearchOptions::new()).unwrap();
    let names: Vec<Token> = names.iter().collect();
    assert_eq!(names, vec![Token::from("betty"), Token::from("carl"), Token::from("dave")]);
}

#[test]
fn max_depth_limits_the_walk() {
    let (_store, catalog) = org_chart();
    let direct = catalog
        .find_relation_tokens(&supervised_by("ann"), &SearchOptions::new().max_depth(1))
        .unwrap();
    assert_eq!(ints(&direct), vec![1, 2]);

    let two = catalog
        .find_relation_tokens(&supervised_by("ann"), &SearchOptions::new().max_depth(2))
        .unwrap();
    assert_eq!(ints(&two), vec![1, 2, 3]);
}

#[test]
fn depth_validation() {
    let (_store, catalog) = org_chart();
    assert!(matches!(
        catalog.find_relation_tokens(&supervised_by("ann"), &SearchOptions::new().max_depth(0)),
        Err(CatalogError::InvalidMaxDepth)
    ));

    // A query constraining both transposed names binds no factory, so a
    // depth beyond one hop has nothing to walk with.
    let both = supervised_by("ann").with("employee", "betty");
    assert!(matches!(
        catalog.find_relation_tokens(&both, &SearchOptions::new().max_depth(2)),
        Err(CatalogError::MaxDepthWithoutFactory)
    ));
    // Depth one is plain intransitive search and needs no factory.
    let hits = catalog.find_relation_tokens(&both, &SearchOptions::new().max_depth(1)).unwrap();
    assert_eq!(ints(&hits), vec![1]);
}

#[test]
fn chains_walk_breadth_first_from_the_seed_set() {
    let (_store, catalog) = org_chart();
    let chains: Vec<Vec<i64>> = catalog
        .find_relation_token_chains(&supervised_by("ann"), &SearchOptions::new())
        .unwrap()
        .map(|c| c.unwrap().into_tokens().iter().filter_map(Token::as_int).collect())
        .collect();
    assert_eq!(chains, vec![vec![1], vec![2], vec![1, 3]]);
}

#[test]
fn resolved_chains_carry_relations() {
    let (_store, catalog) = org_chart();
    let chains: Vec<Vec<String>> = catalog
        .find_relation_chains(&supervised_by("betty"), &SearchOptions::new())
        .unwrap()
        .map(|c| c.unwrap().into_relations().into_iter().map(|e| e.employee).collect())
        .collect();
    assert_eq!(chains, vec![vec!["dave".to_owned()]]);
}

#[test]
fn cycles_are_tagged_with_witness_queries() {
    let mut catalog: Catalog<Edge> = Catalog::new(
        |r: &Edge, _| Ok(Token::Int(r.id)),
        |_, _| Err("not resolvable".into()),
    );
    catalog
        .add_value_index(ValueIndex::single("from", |r: &Edge| Some(Token::from(r.employee.as_str()))))
        .unwrap();
    catalog
        .add_value_index(ValueIndex::single("to", |r: &Edge| {
            r.supervisor.clone().map(Token::String)
        }))
        .unwrap();
    catalog
        .add_default_query_factory(Arc::new(TransposingTransitive::new("from", "to")))
        .unwrap();

    // a -> b -> c -> a
    for (id, from, to) in [(1, "a", "b"), (2, "b", "c"), (3, "c", "a")] {
        catalog
            .index(&Edge { id, employee: from.to_owned(), supervisor: Some(to.to_owned()) })
            .unwrap();
    }

    let chains: Vec<_> = catalog
        .find_relation_token_chains(&Query::new().with("from", "a"), &SearchOptions::new())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chains.len(), 3);
    assert!(!chains[0].is_circular());
    assert!(!chains[1].is_circular());

    let cycle = &chains[2];
    assert_eq!(cycle.tokens(), &[Token::Int(1), Token::Int(2), Token::Int(3)]);
    assert!(cycle.is_circular());
    assert_eq!(cycle.cycled_queries(), &[Query::new().with("from", "a")]);

    // The walk terminates and covers each edge once.
    let rels = catalog
        .find_relation_tokens(&Query::new().with("from", "a"), &SearchOptions::new())
        .unwrap();
    assert_eq!(ints(&rels), vec![1, 2, 3]);
}

#[test]
fn target_query_selects_chain_ends() {
    let (_store, catalog) = org_chart();
    let rels = catalog
        .find_relation_tokens(
            &supervised_by("ann"),
            &SearchOptions::new().target_query(Query::new().with("employee", "dave")),
        )
        .unwrap();
    assert_eq!(ints(&rels), vec![3]);
}

#[test]
fn can_find_short_circuits() {
    let (_store, catalog) = org_chart();
    assert!(catalog.can_find(&supervised_by("ann"), &SearchOptions::new()).unwrap());
    assert!(catalog
        .can_find(
            &supervised_by("ann"),
            &SearchOptions::new().target_query(Query::new().with("employee", "dave")),
        )
        .unwrap());
    assert!(!catalog
        .can_find(
            &supervised_by("ann"),
            &SearchOptions::new().target_query(Query::new().with("employee", "zoe")),
        )
        .unwrap());
    assert!(!catalog.can_find(&supervised_by("zoe"), &SearchOptions::new()).unwrap());
}

#[test]
fn filters_prune_the_walk() {
    let (_store, catalog) = org_chart();
    // Rejecting betty's edge also hides everything below it.
    let rels = catalog
        .find_relation_tokens(
            &supervised_by("ann"),
            &SearchOptions::new()
                .filter(|chain, _, _| Ok(chain.last() != Some(&Token::Int(1)))),
        )
        .unwrap();
    assert_eq!(ints(&rels), vec![2]);

    // A target filter only gates yielding; the walk continues past
    // rejected chains.
    let rels = catalog
        .find_relation_tokens(
            &supervised_by("ann"),
            &SearchOptions::new()
                .target_filter(|chain, _, _| Ok(chain.len() > 1)),
        )
        .unwrap();
    assert_eq!(ints(&rels), vec![3]);
}

#[test]
fn filter_errors_surface_through_the_iterator() {
    let (_store, catalog) = org_chart();
    let mut chains = catalog
        .find_relation_token_chains(
            &supervised_by("ann"),
            &SearchOptions::new().filter(|_, _, _| Err("boom".into())),
        )
        .unwrap();
    assert!(matches!(chains.next(), Some(Err(CatalogError::External(_)))));
    assert!(chains.next().is_none());
}

#[test]
fn explicit_factory_overrides_the_defaults() {
    let (_store, catalog) = org_chart();
    // The default factory binds employee queries too, walking upward.
    let rels = catalog
        .find_relation_tokens(&Query::new().with("employee", "dave"), &SearchOptions::new())
        .unwrap();
    assert_eq!(ints(&rels), vec![1, 3]);

    // An explicit factory replaces the defaults entirely; one that does
    // not bind this query suppresses the walk.
    let unrelated = Arc::new(TransposingTransitive::new("from", "to"));
    let rels = catalog
        .find_relation_tokens(
            &Query::new().with("employee", "dave"),
            &SearchOptions::new().factory(unrelated),
        )
        .unwrap();
    assert_eq!(ints(&rels), vec![3]);
}

#[test]
fn the_expander_seeds_the_walk() {
    // A factory may start the walk somewhere other than the query's own
    // results: its expander is asked once with the empty chain and the
    // queries it returns become the seed set.
    struct StartAtBetty;

    impl relata::QueryFactory<Edge> for StartAtBetty {
        fn bind(&self, _query: &Query, _catalog: &Catalog<Edge>) -> Option<relata::QueryExpander<Edge>> {
            Some(Box::new(|chain, _catalog| {
                if chain.is_empty() {
                    Ok(vec![Query::new().with("supervisor", "betty")])
                } else {
                    Ok(Vec::new())
                }
            }))
        }
    }

    let (_store, catalog) = org_chart();
    let rels = catalog
        .find_relation_tokens(
            &supervised_by("ann"),
            &SearchOptions::new().factory(Arc::new(StartAtBetty)),
        )
        .unwrap();
    assert_eq!(ints(&rels), vec![3]);
}

#[test]
fn chains_from_explicit_seeds() {
    let (_store, catalog) = org_chart();
    let chains: Vec<Vec<Token>> = catalog
        .chains_from([Token::Int(1)], &supervised_by("ann"), &SearchOptions::new())
        .unwrap()
        .map(|c| c.unwrap().into_tokens())
        .collect();
    assert_eq!(chains, vec![vec![Token::Int(1)], vec![Token::Int(1), Token::Int(3)]]);
}

#[test]
fn static_clauses_gate_factory_binding() {
    #[derive(Clone)]
    struct Hop {
        id: i64,
        from: String,
        to: String,
        kind: String,
    }

    let mut catalog: Catalog<Hop> = Catalog::new(
        |r: &Hop, _| Ok(Token::Int(r.id)),
        |_, _| Err("not resolvable".into()),
    );
    catalog
        .add_value_index(ValueIndex::single("from", |r: &Hop| Some(Token::from(r.from.as_str()))))
        .unwrap();
    catalog
        .add_value_index(ValueIndex::single("to", |r: &Hop| Some(Token::from(r.to.as_str()))))
        .unwrap();
    catalog
        .add_value_index(ValueIndex::single("kind", |r: &Hop| Some(Token::from(r.kind.as_str()))))
        .unwrap();
    catalog
        .add_default_query_factory(Arc::new(
            TransposingTransitive::new("from", "to").with_static("kind", "road"),
        ))
        .unwrap();
    for (id, from, to, kind) in [(1, "a", "b", "road"), (2, "b", "c", "road"), (3, "b", "c", "rail")]
    {
        catalog
            .index(&Hop { id, from: from.to_owned(), to: to.to_owned(), kind: kind.to_owned() })
            .unwrap();
    }

    // The static clause is present: the factory binds and carries it into
    // every hop, so the rail edge never enters the walk.
    let rels = catalog
        .find_relation_tokens(
            &Query::new().with("from", "a").with("kind", "road"),
            &SearchOptions::new(),
        )
        .unwrap();
    assert_eq!(ints(&rels), vec![1, 2]);

    // Without it the factory declines and the search stays intransitive.
    let rels = catalog
        .find_relation_tokens(&Query::new().with("from", "a"), &SearchOptions::new())
        .unwrap();
    assert_eq!(ints(&rels), vec![1]);
}

#[test]
fn default_factory_registry_is_identity_keyed() {
    let (_store, mut catalog) = org_chart();
    let factory = Arc::new(TransposingTransitive::new("employee", "supervisor"));
    let handle: Arc<dyn relata::QueryFactory<Edge>> = factory;
    catalog.add_default_query_factory(handle.clone()).unwrap();
    assert!(matches!(
        catalog.add_default_query_factory(handle.clone()),
        Err(CatalogError::DuplicateQueryFactory)
    ));
    catalog.remove_default_query_factory(&handle).unwrap();
    assert!(matches!(
        catalog.remove_default_query_factory(&handle),
        Err(CatalogError::QueryFactoryNotFound)
    ));
}
