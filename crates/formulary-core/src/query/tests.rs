use super::*;
use crate::{
    bitmap::transactional::TransactionalBitmap,
    cache::FormulaCache,
    config::CacheConfig,
    entity::{
        AttributeFilter, AttributeValue, EntityContentRequire, EntityFetchRequirements,
        SealedEntity,
    },
    error::{ErrorClass, ErrorOrigin},
    obs::sink::{CacheLookupOutcome, MetricsEvent, with_metrics_sink},
    prefetch::TargetIndexScope,
    test_support::{CapturingSink, MemoryFetcher},
};
use std::sync::Arc;

fn constant(ids: impl IntoIterator<Item = u32>) -> Formula {
    Formula::constant(ids.into_iter().collect::<BaseBitmap>())
}

fn in_stock() -> Arc<AttributeFilter> {
    Arc::new(AttributeFilter::int_between("stock", Some(1), None))
}

fn product(pk: u32, stock: i64) -> SealedEntity {
    SealedEntity::new("product", pk).with_attribute("stock", AttributeValue::Int(stock))
}

fn stock_requirements() -> EntityFetchRequirements {
    EntityFetchRequirements::new().with(EntityContentRequire::attributes(["stock"]))
}

fn order(ids: impl IntoIterator<Item = u32>) -> PrefetchOrder {
    PrefetchOrder {
        usable_for_filtering: true,
        entities_to_prefetch: ids.into_iter().collect(),
        requirements: stock_requirements(),
    }
}

///
/// CarelessFetcher
///

struct CarelessFetcher;

impl EntityFetcher for CarelessFetcher {
    fn fetch(
        &self,
        _references: &[EntityReference],
        _requirements: &EntityFetchRequirements,
    ) -> Result<Vec<SealedEntity>, InternalError> {
        Ok(vec![SealedEntity::new("category", 1)])
    }
}

// ----------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------

#[test]
fn registry_masks_each_reference_once() {
    let mut registry = EntityReferenceRegistry::new();
    assert!(registry.is_empty());

    let brand = EntityReference::new("brand", 7);
    let category = EntityReference::new("category", 7);

    assert_eq!(registry.mask(brand.clone()), u32::MAX);
    assert_eq!(registry.mask(category.clone()), u32::MAX - 1);
    assert_eq!(registry.mask(brand.clone()), u32::MAX);

    assert_eq!(registry.masked_id(&category), Some(u32::MAX - 1));
    assert_eq!(registry.translate(u32::MAX), Some(&brand));
    assert_eq!(registry.translate(7), None);
}

#[test]
fn registry_formula_holds_masked_ids() {
    let mut registry = EntityReferenceRegistry::new();
    let formula = registry.formula([
        EntityReference::new("brand", 1),
        EntityReference::new("brand", 2),
    ]);

    assert_eq!(
        formula.compute().expect("compute").to_vec(),
        vec![u32::MAX - 1, u32::MAX]
    );
}

// ----------------------------------------------------------------------
// Context prefetch
// ----------------------------------------------------------------------

#[test]
fn prefetch_resolves_masked_and_primary_key_ids() {
    let mut registry = EntityReferenceRegistry::new();
    let brand = registry.mask(EntityReference::new("brand", 7));
    let fetcher = MemoryFetcher::new([
        product(3, 1),
        product(4, 1),
        SealedEntity::new("brand", 7),
    ]);

    let mut context = QueryExecutionContext::default();
    let count = context
        .prefetch(&order([3, brand]), "product", &fetcher, &registry)
        .expect("prefetch");

    assert_eq!(count, 2);
    let prefetched = context.prefetched().expect("entities bound");
    assert_eq!(prefetched.ids().to_vec(), vec![3, brand]);
    assert_eq!(prefetched.get(brand).map(SealedEntity::entity_type), Some("brand"));
    assert!(prefetched.usable_for_filtering());

    let calls = fetcher.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, stock_requirements());
    assert_eq!(
        fetcher.fetched_references(),
        vec![
            EntityReference::new("product", 3),
            EntityReference::new("brand", 7)
        ]
    );
}

#[test]
fn empty_order_skips_the_fetcher() {
    let fetcher = MemoryFetcher::default();
    let mut context = QueryExecutionContext::default();

    let count = context
        .prefetch(&order(std::iter::empty()), "product", &fetcher, &EntityReferenceRegistry::new())
        .expect("prefetch");

    assert_eq!(count, 0);
    assert!(fetcher.calls.borrow().is_empty());
    assert!(context.prefetched().is_some_and(|entities| entities.is_empty()));
}

#[test]
fn prefetch_rejects_unrequested_entities() {
    let mut context = QueryExecutionContext::default();

    let err = context
        .prefetch(&order([1]), "product", &CarelessFetcher, &EntityReferenceRegistry::new())
        .expect_err("unrequested entity");

    assert_eq!(err.class, ErrorClass::Internal);
    assert_eq!(err.origin, ErrorOrigin::Query);
    assert!(context.prefetched().is_none());
}

// ----------------------------------------------------------------------
// Plan
// ----------------------------------------------------------------------

#[test]
fn cheap_selection_stays_on_the_index_path() {
    let fetcher = MemoryFetcher::new([product(1, 0), product(2, 5), product(3, 9)]);
    let formula = Formula::user_filter(vec![
        constant([1, 2, 3]),
        Formula::selection(constant([1, 2]), in_stock()),
    ]);

    let outcome = QueryPlan::new("product", formula)
        .execute(&fetcher)
        .expect("execute");

    assert_eq!(outcome.result.to_vec(), vec![1, 2]);
    assert_eq!(outcome.prefetched, None);
    assert!(!outcome.retried);
    assert!(fetcher.calls.borrow().is_empty());
}

#[test]
fn worthwhile_prefetch_evaluates_selection_over_entities() {
    let fetcher = MemoryFetcher::new([product(1, 0), product(2, 5), product(3, 9)]);
    let formula = Formula::user_filter(vec![
        constant([1, 2, 3]),
        Formula::selection(constant(0..2_000), in_stock()),
    ]);

    let outcome = QueryPlan::new("product", formula)
        .execute(&fetcher)
        .expect("execute");

    assert_eq!(outcome.result.to_vec(), vec![2, 3]);
    assert_eq!(outcome.prefetched, Some(3));
    assert!(!outcome.retried);
}

#[test]
fn narrowed_scope_limits_hydrated_entities() {
    let fetcher = MemoryFetcher::new([product(1, 0), product(2, 5), product(3, 9)]);
    let formula = Formula::user_filter(vec![
        constant([1, 2, 3]),
        Formula::entity_filter(in_stock()),
    ]);

    let outcome = QueryPlan::new("product", formula)
        .with_scope(TargetIndexScope::Narrowed(Arc::new(BaseBitmap::from([1, 3]))))
        .execute(&fetcher)
        .expect("execute");

    assert_eq!(outcome.prefetched, Some(2));
    assert_eq!(outcome.result.to_vec(), vec![3]);
}

#[test]
fn missing_entities_trigger_a_forced_retry() {
    let fetcher = MemoryFetcher::new([product(1, 2), product(2, 0)]);
    let formula = Formula::user_filter(vec![
        constant([1, 2]),
        Formula::entity_filter(in_stock()),
    ]);

    let outcome = QueryPlan::new("product", formula)
        .with_cost(CostConfig {
            prefetch_cardinality_threshold: 1,
            ..CostConfig::default()
        })
        .execute(&fetcher)
        .expect("execute");

    assert!(outcome.retried);
    assert_eq!(outcome.prefetched, Some(2));
    assert_eq!(outcome.result.to_vec(), vec![1]);
    assert_eq!(fetcher.calls.borrow().len(), 1);
}

#[test]
fn entity_filter_without_candidates_fails() {
    let fetcher = MemoryFetcher::new([product(1, 2)]);
    let formula = Formula::or(vec![constant([1]), Formula::entity_filter(in_stock())]);

    let err = QueryPlan::new("product", formula)
        .execute(&fetcher)
        .expect_err("no candidates to prefetch");

    assert!(err.is_missing_context());
    assert_eq!(err.origin, ErrorOrigin::Prefetch);
}

#[test]
fn masked_references_are_hydrated_through_the_registry() {
    let mut registry = EntityReferenceRegistry::new();
    let brands = registry.formula([EntityReference::new("brand", 7)]);
    let fetcher = MemoryFetcher::new([SealedEntity::new("brand", 7), product(7, 1)]);

    let outcome = QueryPlan::new("product", Formula::or(vec![brands, constant([1])]))
        .with_registry(registry)
        .execute(&fetcher)
        .expect("execute");

    assert_eq!(outcome.prefetched, Some(1));
    assert_eq!(outcome.result.to_vec(), vec![1, u32::MAX]);
    assert_eq!(
        fetcher.fetched_references(),
        vec![EntityReference::new("brand", 7)]
    );
}

#[test]
fn plan_feeds_and_reads_the_formula_cache() {
    let a = TransactionalBitmap::from_ids([1, 2, 3]);
    let b = TransactionalBitmap::from_ids([2, 3, 4]);
    let cache = Arc::new(FormulaCache::new(CacheConfig {
        min_complexity_threshold: 1,
        ..CacheConfig::default()
    }));
    let fetcher = MemoryFetcher::default();
    let sink = CapturingSink::default();

    let run = || {
        QueryPlan::new(
            "product",
            Formula::and(vec![a.to_formula(None), b.to_formula(None)]),
        )
        .with_cache(Arc::clone(&cache))
        .execute(&fetcher)
        .expect("execute")
    };

    let captured: Vec<usize> = with_metrics_sink(&sink, || {
        let mut captured = vec![run().captured, run().captured];
        cache.evaluate_adepts();
        captured.push(run().captured);

        let served = run();
        assert_eq!(served.result.to_vec(), vec![2, 3]);
        captured.push(served.captured);

        captured
    });

    assert_eq!(captured, vec![0, 0, 1, 0]);
    let hits = sink
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                MetricsEvent::CacheLookup {
                    outcome: CacheLookupOutcome::Hit
                }
            )
        })
        .count();
    assert_eq!(hits, 1);
}
