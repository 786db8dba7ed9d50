use super::*;
use crate::{
    entity::{AttributeFilter, EntityReference},
    obs::sink::with_metrics_sink,
    query::EntityReferenceRegistry,
    test_support::CapturingSink,
};
use proptest::prelude::*;

fn constant(ids: impl IntoIterator<Item = u32>) -> Formula {
    Formula::constant(ids.into_iter().collect::<BaseBitmap>())
}

fn stock_filter() -> Arc<AttributeFilter> {
    Arc::new(AttributeFilter::int_between("stock", Some(1), None))
}

// Selection whose index path is estimated at `cost` units.
fn selection_costing(cost: u32) -> Formula {
    Formula::selection(constant(0..cost), stock_filter())
}

fn factory() -> PrefetcherFactory {
    PrefetcherFactory::new(CostConfig::default(), TargetIndexScope::Global)
}

#[test]
fn visitor_collects_conjunctive_bitmaps_and_requirements() {
    let formula = Formula::user_filter(vec![
        constant([1, 2, 3]),
        Formula::and(vec![constant([2, 3, 4, 5]), selection_costing(40)]),
    ]);
    let visitor = PrefetchFormulaVisitor::analyze(&formula);

    assert_eq!(visitor.min_conjunctive_cardinality(), Some(3));
    assert_eq!(
        visitor.conjunctive_entities().map(|ids| ids.to_vec()),
        Some(vec![2, 3])
    );
    assert_eq!(visitor.requirements().len(), 1);
    assert_eq!(visitor.expected_computational_cost(), 40);
    assert!(!visitor.prefetch_required());
}

#[test]
fn disjunction_breaks_conjunctive_scope() {
    let formula = Formula::user_filter(vec![
        Formula::or(vec![constant([1]), constant([2])]),
        Formula::not(constant([3]), constant([3, 4])),
        selection_costing(5_000),
    ]);
    let visitor = PrefetchFormulaVisitor::analyze(&formula);

    assert_eq!(visitor.min_conjunctive_cardinality(), None);
    assert!(visitor.conjunctive_entities().is_none());
    assert!(factory().create_prefetcher_if_needed_or_worthwhile(&visitor).is_none());
}

#[test]
fn prefetch_is_planned_only_when_it_pays_off() {
    // Two candidates with one requirement cost 2 * 148 = 296.
    let worthwhile = Formula::user_filter(vec![constant([1, 2]), selection_costing(297)]);
    let order = factory()
        .create_prefetcher_if_needed_or_worthwhile(&PrefetchFormulaVisitor::analyze(&worthwhile))
        .expect("prefetch pays off");
    assert!(order.usable_for_filtering);
    assert_eq!(order.entities_to_prefetch.to_vec(), vec![1, 2]);
    assert_eq!(order.requirements.len(), 1);

    let sink = CapturingSink::default();
    let too_cheap = Formula::user_filter(vec![constant([1, 2]), selection_costing(296)]);
    let order = with_metrics_sink(&sink, || {
        factory().create_prefetcher_if_needed_or_worthwhile(&PrefetchFormulaVisitor::analyze(
            &too_cheap,
        ))
    });
    assert!(order.is_none());
    assert_eq!(
        sink.events(),
        vec![MetricsEvent::PrefetchDecision {
            outcome: PrefetchOutcome::NotWorthwhile,
            entities: 0,
        }]
    );
}

#[test]
fn cardinality_threshold_disables_optional_prefetch() {
    let factory = PrefetcherFactory::new(
        CostConfig {
            prefetch_cardinality_threshold: 2,
            ..CostConfig::default()
        },
        TargetIndexScope::Global,
    );
    let formula = Formula::user_filter(vec![constant([1, 2, 3]), selection_costing(100_000)]);

    assert!(
        factory
            .create_prefetcher_if_needed_or_worthwhile(&PrefetchFormulaVisitor::analyze(&formula))
            .is_none()
    );
}

#[test]
fn forced_ids_are_prefetched_regardless_of_threshold() {
    let mut registry = EntityReferenceRegistry::new();
    let references = registry.formula([
        EntityReference::new("brand", 7),
        EntityReference::new("category", 7),
    ]);
    let factory = PrefetcherFactory::new(
        CostConfig {
            prefetch_cardinality_threshold: 1,
            ..CostConfig::default()
        },
        TargetIndexScope::Global,
    );
    let formula = Formula::or(vec![references, constant([1, 2, 3])]);

    let order = factory
        .create_prefetcher_if_needed_or_worthwhile(&PrefetchFormulaVisitor::analyze(&formula))
        .expect("forced prefetch");

    assert!(!order.usable_for_filtering);
    assert_eq!(order.entities_to_prefetch.to_vec(), vec![u32::MAX - 1, u32::MAX]);
}

#[test]
fn entity_filter_requires_prefetch_of_conjunctive_candidates() {
    let formula = Formula::user_filter(vec![
        constant([4, 5]),
        Formula::entity_filter(stock_filter()),
    ]);
    let visitor = PrefetchFormulaVisitor::analyze(&formula);
    assert!(visitor.prefetch_required());
    assert_eq!(visitor.expected_computational_cost(), 0);

    let order = factory()
        .create_prefetcher_if_needed_or_worthwhile(&visitor)
        .expect("required prefetch");
    assert!(order.usable_for_filtering);
    assert_eq!(order.entities_to_prefetch.to_vec(), vec![4, 5]);
}

#[test]
fn narrowed_scope_intersects_candidates() {
    let factory = PrefetcherFactory::new(
        CostConfig::default(),
        TargetIndexScope::Narrowed(Arc::new(BaseBitmap::from([2, 9]))),
    );
    let formula = Formula::user_filter(vec![constant([1, 2, 3]), selection_costing(10_000)]);
    let visitor = PrefetchFormulaVisitor::analyze(&formula);

    let order = factory
        .create_prefetcher_if_needed_or_worthwhile(&visitor)
        .expect("prefetch");
    assert_eq!(order.entities_to_prefetch.to_vec(), vec![2]);

    let forced = factory
        .create_forced_prefetcher(&visitor)
        .expect("candidates known");
    assert_eq!(forced.entities_to_prefetch.to_vec(), vec![2]);
}

#[test]
fn forced_prefetcher_needs_conjunctive_candidates() {
    let formula = Formula::or(vec![constant([1]), Formula::entity_filter(stock_filter())]);

    assert!(
        factory()
            .create_forced_prefetcher(&PrefetchFormulaVisitor::analyze(&formula))
            .is_none()
    );
}

proptest! {
    #[test]
    fn decision_follows_cost_comparison_below_threshold(
        candidates in prop::collection::vec(0u32..500, 1..40),
        delegate_cost in 0u32..20_000,
    ) {
        let formula = Formula::user_filter(vec![
            constant(candidates.iter().copied()),
            selection_costing(delegate_cost),
        ]);
        let visitor = PrefetchFormulaVisitor::analyze(&formula);
        let distinct = visitor.conjunctive_entities().map_or(0, |ids| ids.len());
        let prefetch_cost = CostConfig::default().prefetch_cost(distinct, 1);

        let order = factory().create_prefetcher_if_needed_or_worthwhile(&visitor);

        prop_assert_eq!(order.is_some(), u64::from(delegate_cost) > prefetch_cost);
    }
}
