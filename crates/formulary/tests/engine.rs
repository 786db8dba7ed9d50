use formulary::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

///
/// Catalog
///
/// In-memory entity store standing in for the host's storage.
///

struct Catalog {
    entities: Vec<SealedEntity>,
}

impl Catalog {
    fn products(stock: &[(u32, i64)]) -> Self {
        Self {
            entities: stock
                .iter()
                .map(|(pk, stock)| {
                    SealedEntity::new("product", *pk)
                        .with_attribute("stock", AttributeValue::Int(*stock))
                })
                .collect(),
        }
    }
}

impl EntityFetcher for Catalog {
    fn fetch(
        &self,
        references: &[EntityReference],
        _requirements: &EntityFetchRequirements,
    ) -> Result<Vec<SealedEntity>, formulary::core::error::InternalError> {
        Ok(self
            .entities
            .iter()
            .filter(|entity| references.contains(&entity.reference()))
            .cloned()
            .collect())
    }
}

fn in_stock() -> Arc<AttributeFilter> {
    Arc::new(AttributeFilter::int_between("stock", Some(1), None))
}

fn engine() -> Engine {
    Engine::from_toml_str(
        r"
        [cache]
        min_complexity_threshold = 1
        ",
    )
    .expect("engine")
}

#[test]
fn toml_overrides_reach_the_engine() {
    let engine = Engine::from_toml_str(
        r"
        [cost]
        per_requirement_cost = 200

        [cache]
        enabled = false
        ",
    )
    .expect("engine");

    assert_eq!(engine.config().cost.per_requirement_cost, 200);
    assert!(!engine.config().cache.enabled);
    assert_eq!(
        engine.config().cache.max_adepts,
        CacheConfig::default().max_adepts
    );
}

#[test]
fn invalid_configuration_is_a_config_error() {
    let err = Engine::from_toml_str("[cache]\nmax_size_bytes = 0\n").expect_err("rejected");
    assert_eq!(err.kind, ErrorKind::Config);
    assert_eq!(err.origin, ErrorOrigin::Config);

    let err = Engine::from_toml_str("[planner]\n").expect_err("unknown section");
    assert_eq!(err.kind, ErrorKind::Config);

    let err = Engine::from_path("/nonexistent/formulary.toml").expect_err("missing file");
    assert_eq!(err.kind, ErrorKind::Config);
    assert!(err.message.contains("/nonexistent/formulary.toml"));
}

#[test]
fn entity_filter_queries_prefetch_their_candidates() {
    let engine = engine();
    let catalog = Catalog::products(&[(1, 0), (2, 4), (3, 7), (4, 2)]);
    let formula = Formula::user_filter(vec![
        Formula::constant(BaseBitmap::from([1, 2, 3])),
        Formula::entity_filter(in_stock()),
    ]);

    let outcome = engine.query("product", formula, &catalog).expect("query");

    assert_eq!(outcome.result.to_vec(), vec![2, 3]);
    assert_eq!(outcome.prefetched, Some(3));
    assert!(!outcome.retried);
}

#[test]
fn unbounded_entity_filter_maps_to_missing_entities() {
    let engine = engine();
    let catalog = Catalog::products(&[(1, 1)]);
    let formula = Formula::or(vec![
        Formula::constant(BaseBitmap::from([1])),
        Formula::entity_filter(in_stock()),
    ]);

    let err = engine
        .query("product", formula, &catalog)
        .expect_err("nothing bounds the filter");

    assert_eq!(err.kind, ErrorKind::Query(QueryErrorKind::MissingEntities));
    assert_eq!(err.origin, ErrorOrigin::Prefetch);

    let json = serde_json::to_string(&err).expect("serialize");
    let back: Error = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.kind, err.kind);
    assert_eq!(back.message, err.message);
}

#[test]
fn rollback_only_commit_maps_to_conflict() {
    let index = TransactionalBitmap::from_ids([1]);
    let tx = Transaction::begin();
    index.add(2, Some(&tx));
    tx.set_rollback_only();

    let err: Error = tx.commit().expect_err("rollback only").into();

    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.origin, ErrorOrigin::Transaction);
    assert_eq!(index.snapshot(None).to_vec(), vec![1]);
}

#[test]
fn cached_queries_follow_committed_changes() {
    let engine = engine();
    let catalog = Catalog::products(&[]);
    let brand = TransactionalBitmap::from_ids([1, 2, 3, 4]);
    let stocked = TransactionalBitmap::from_ids([2, 4, 6]);
    let query = || {
        let formula = Formula::and(vec![brand.to_formula(None), stocked.to_formula(None)]);
        engine.query("product", formula, &catalog).expect("query")
    };

    query();
    query();
    assert_eq!(engine.evaluate_cache().admitted, 1);
    assert_eq!(query().captured, 1);
    assert_eq!(engine.cache_stats().payloads, 1);
    assert_eq!(query().result.to_vec(), vec![2, 4]);

    let tx = Transaction::begin();
    stocked.add(3, Some(&tx));
    tx.commit().expect("commit");

    let outcome = query();
    assert_eq!(outcome.result.to_vec(), vec![2, 3, 4]);
    assert_eq!(outcome.captured, 1);
}

proptest! {
    #[test]
    fn engine_results_match_set_algebra(
        left in prop::collection::vec(0u32..64, 0..32),
        right in prop::collection::vec(0u32..64, 0..32),
        removed in prop::collection::vec(0u32..64, 0..16),
    ) {
        let engine = engine();
        let catalog = Catalog::products(&[]);
        let a = TransactionalBitmap::from_ids(left.iter().copied());
        let b = TransactionalBitmap::from_ids(right.iter().copied());
        let c = TransactionalBitmap::from_ids(removed.iter().copied());

        let mut expected: Vec<u32> = left
            .iter()
            .chain(&right)
            .copied()
            .filter(|id| !removed.contains(id))
            .collect();
        expected.sort_unstable();
        expected.dedup();

        for round in 0..3 {
            let formula = Formula::not(
                c.to_formula(None),
                Formula::or(vec![a.to_formula(None), b.to_formula(None)]),
            );
            let outcome = engine.query("product", formula, &catalog).expect("query");
            prop_assert_eq!(outcome.result.to_vec(), expected.clone(), "round {}", round);
            engine.evaluate_cache();
        }
    }
}
