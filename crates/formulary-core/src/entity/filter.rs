use crate::{
    bitmap::BaseBitmap,
    entity::{
        AttributeValue, EntityContentRequire, EntityFetchRequirements, PrefetchedEntities,
        SealedEntity,
    },
    formula::FormulaError,
    hash::{feed_i64, feed_str, feed_u32, feed_u8},
    price::{
        FilteredPriceRecords, PriceAmountPredicate, PriceEvaluationContext, PriceRecord,
        PriceInnerRecordHandling, PriceSelection, select_selling_price,
    },
};
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

///
/// EntityToBitmapFilter
///
/// Computes a result bitmap by inspecting hydrated entities instead of
/// evaluating bitmap indexes. Implementations must agree with the index path
/// they stand in for.
///

pub trait EntityToBitmapFilter: fmt::Debug + Send + Sync {
    /// Entity content the filter reads.
    fn requirements(&self) -> EntityFetchRequirements;

    fn filter(&self, entities: &PrefetchedEntities) -> Result<BaseBitmap, FormulaError>;

    /// Structural identity of the filter parameters.
    fn identity_hash(&self) -> u64;

    /// Price records selected while filtering, for filters that select prices.
    fn filtered_price_records(
        &self,
        _entities: &PrefetchedEntities,
    ) -> Option<FilteredPriceRecords> {
        None
    }

    fn requested_predicate(&self) -> Option<PriceAmountPredicate> {
        None
    }

    /// Result of the filter with its price predicate lifted.
    fn filter_with_filtered_out_results(
        &self,
        entities: &PrefetchedEntities,
    ) -> Result<BaseBitmap, FormulaError> {
        self.filter(entities)
    }
}

///
/// AttributePredicate
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttributePredicate {
    Equals(AttributeValue),
    IntBetween { from: Option<i64>, to: Option<i64> },
}

impl AttributePredicate {
    fn test(&self, value: Option<&AttributeValue>) -> bool {
        match (self, value) {
            (Self::Equals(expected), Some(value)) => expected == value,
            (Self::IntBetween { from, to }, Some(AttributeValue::Int(value))) => {
                from.is_none_or(|from| *value >= from) && to.is_none_or(|to| *value <= to)
            }
            _ => false,
        }
    }

    fn feed(&self, h: &mut Xxh3) {
        match self {
            Self::Equals(value) => {
                feed_u8(h, 0);
                feed_attribute(h, value);
            }
            Self::IntBetween { from, to } => {
                feed_u8(h, 1);
                for bound in [from, to] {
                    match bound {
                        Some(x) => {
                            feed_u8(h, 1);
                            feed_i64(h, *x);
                        }
                        None => feed_u8(h, 0),
                    }
                }
            }
        }
    }
}

fn feed_attribute(h: &mut Xxh3, value: &AttributeValue) {
    match value {
        AttributeValue::Bool(x) => {
            feed_u8(h, 0);
            feed_u8(h, u8::from(*x));
        }
        AttributeValue::Int(x) => {
            feed_u8(h, 1);
            feed_i64(h, *x);
        }
        AttributeValue::Decimal(x) => {
            let normalized = x.normalize();
            feed_u8(h, 2);
            feed_u32(h, normalized.scale());
            h.update(&normalized.mantissa().to_be_bytes());
        }
        AttributeValue::Text(x) => {
            feed_u8(h, 3);
            feed_str(h, x);
        }
    }
}

///
/// AttributeFilter
///
/// Keeps entities whose attribute satisfies the predicate. A missing
/// attribute never matches.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeFilter {
    attribute: String,
    predicate: AttributePredicate,
}

impl AttributeFilter {
    #[must_use]
    pub fn new(attribute: impl Into<String>, predicate: AttributePredicate) -> Self {
        Self {
            attribute: attribute.into(),
            predicate,
        }
    }

    #[must_use]
    pub fn equals(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self::new(attribute, AttributePredicate::Equals(value))
    }

    #[must_use]
    pub fn int_between(attribute: impl Into<String>, from: Option<i64>, to: Option<i64>) -> Self {
        Self::new(attribute, AttributePredicate::IntBetween { from, to })
    }

    fn matches(&self, entity: &SealedEntity) -> bool {
        self.predicate.test(entity.attribute(&self.attribute))
    }
}

impl EntityToBitmapFilter for AttributeFilter {
    fn requirements(&self) -> EntityFetchRequirements {
        EntityFetchRequirements::new()
            .with(EntityContentRequire::attributes([self.attribute.as_str()]))
    }

    fn filter(&self, entities: &PrefetchedEntities) -> Result<BaseBitmap, FormulaError> {
        Ok(entities
            .iter()
            .filter(|(_, entity)| self.matches(entity))
            .map(|(id, _)| id)
            .collect())
    }

    fn identity_hash(&self) -> u64 {
        let mut h = Xxh3::new();
        feed_str(&mut h, "attribute");
        feed_str(&mut h, &self.attribute);
        self.predicate.feed(&mut h);
        h.digest()
    }
}

///
/// PriceBetweenFilter
///
/// Keeps entities whose selling price (the lowest price among the targeted
/// indexes) satisfies the predicate.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PriceBetweenFilter {
    context: PriceEvaluationContext,
    predicate: PriceAmountPredicate,
}

#[derive(Default)]
struct PriceSweep {
    passing: BaseBitmap,
    filtered_out: BaseBitmap,
    selected: Vec<PriceRecord>,
}

impl PriceBetweenFilter {
    #[must_use]
    pub const fn new(context: PriceEvaluationContext, predicate: PriceAmountPredicate) -> Self {
        Self { context, predicate }
    }

    fn sweep(&self, entities: &PrefetchedEntities) -> PriceSweep {
        let predicate = self.predicate.to_record_predicate();
        let mut sweep = PriceSweep::default();

        for (id, entity) in entities.iter() {
            let mut handling = None;
            // Records are re-keyed to the id the formula tree knows the entity by.
            let records: Vec<PriceRecord> = entity
                .prices()
                .filter(|(key, _)| self.context.accepts(key))
                .inspect(|(key, _)| {
                    handling.get_or_insert(key.inner_record_handling);
                })
                .flat_map(|(_, records)| records.iter())
                .map(|r| PriceRecord {
                    entity_pk: id,
                    ..*r
                })
                .collect();
            let handling = handling.unwrap_or(PriceInnerRecordHandling::None);

            match select_selling_price(&records, handling, &predicate) {
                PriceSelection::Passing(record) => {
                    sweep.passing.insert(id);
                    sweep.selected.push(record);
                }
                PriceSelection::FilteredOut => {
                    sweep.filtered_out.insert(id);
                }
                PriceSelection::NoPrice => {}
            }
        }

        sweep
    }
}

impl EntityToBitmapFilter for PriceBetweenFilter {
    fn requirements(&self) -> EntityFetchRequirements {
        EntityFetchRequirements::new().with(EntityContentRequire::Prices(self.predicate.mode))
    }

    fn filter(&self, entities: &PrefetchedEntities) -> Result<BaseBitmap, FormulaError> {
        Ok(self.sweep(entities).passing)
    }

    fn identity_hash(&self) -> u64 {
        let mut h = Xxh3::new();
        feed_str(&mut h, "price_between");
        h.update(&self.context.identity_hash().to_be_bytes());
        h.update(&self.predicate.identity_hash().to_be_bytes());
        h.digest()
    }

    fn filtered_price_records(
        &self,
        entities: &PrefetchedEntities,
    ) -> Option<FilteredPriceRecords> {
        Some(FilteredPriceRecords::from_records(self.sweep(entities).selected))
    }

    fn requested_predicate(&self) -> Option<PriceAmountPredicate> {
        Some(self.predicate)
    }

    fn filter_with_filtered_out_results(
        &self,
        entities: &PrefetchedEntities,
    ) -> Result<BaseBitmap, FormulaError> {
        let mut sweep = self.sweep(entities);
        sweep.passing.union_with(sweep.filtered_out.as_roaring());

        Ok(sweep.passing)
    }
}
