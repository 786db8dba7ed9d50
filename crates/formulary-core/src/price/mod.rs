//! Price records, price predicates, and the resolved price-record accessor.
//!
//! Prices are stored as integers in fixed-point space: an amount `a` with
//! `indexed_price_places = p` is kept as `round_half_up(a * 10^p)`.


use crate::{
    bitmap::Bitmap,
    formula::{Formula, FormulaError, FormulaFinder, LookUp},
    hash::{feed_i64, feed_str, feed_u32, feed_u8},
};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use std::sync::Arc;
use xxhash_rust::xxh3::Xxh3;

///
/// QueryPriceMode
///

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum QueryPriceMode {
    #[default]
    WithTax,
    WithoutTax,
}

///
/// PriceInnerRecordHandling
///

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PriceInnerRecordHandling {
    #[default]
    None,
    LowestPrice,
    Sum,
}

///
/// PriceIndexKey
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PriceIndexKey {
    pub price_list: String,
    pub currency: String,
    pub inner_record_handling: PriceInnerRecordHandling,
}

impl PriceIndexKey {
    #[must_use]
    pub fn new(price_list: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            price_list: price_list.into(),
            currency: currency.into(),
            inner_record_handling: PriceInnerRecordHandling::None,
        }
    }

    #[must_use]
    pub const fn with_inner_record_handling(mut self, handling: PriceInnerRecordHandling) -> Self {
        self.inner_record_handling = handling;
        self
    }

    pub(crate) fn feed(&self, h: &mut Xxh3) {
        feed_str(h, &self.price_list);
        feed_str(h, &self.currency);
        feed_u8(h, self.inner_record_handling as u8);
    }
}

///
/// PriceRecord
///
/// One indexed price of one entity, amounts in fixed-point space.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PriceRecord {
    pub internal_price_id: u32,
    pub price_id: u32,
    pub entity_pk: u32,
    pub inner_record_id: Option<u32>,
    pub price_without_tax: i64,
    pub price_with_tax: i64,
}

impl PriceRecord {
    #[must_use]
    pub const fn price(&self, mode: QueryPriceMode) -> i64 {
        match mode {
            QueryPriceMode::WithTax => self.price_with_tax,
            QueryPriceMode::WithoutTax => self.price_without_tax,
        }
    }
}

///
/// PriceEvaluationContext
///
/// Parameters that select which price indexes participate in an evaluation.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PriceEvaluationContext {
    pub valid_in: Option<i64>,
    pub target_price_indexes: Vec<PriceIndexKey>,
}

impl PriceEvaluationContext {
    /// True when records of `key` participate; an empty target list accepts every index.
    #[must_use]
    pub fn accepts(&self, key: &PriceIndexKey) -> bool {
        self.target_price_indexes.is_empty() || self.target_price_indexes.contains(key)
    }

    pub(crate) fn identity_hash(&self) -> u64 {
        let mut h = Xxh3::new();
        match self.valid_in {
            Some(moment) => {
                feed_u8(&mut h, 1);
                feed_i64(&mut h, moment);
            }
            None => feed_u8(&mut h, 0),
        }
        feed_u32(
            &mut h,
            u32::try_from(self.target_price_indexes.len()).unwrap_or(u32::MAX),
        );
        for key in &self.target_price_indexes {
            key.feed(&mut h);
        }
        h.digest()
    }
}

///
/// PriceAmountPredicate
///
/// User-facing price bounds in decimal space. Inclusive on both ends; a missing
/// bound is open.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PriceAmountPredicate {
    pub mode: QueryPriceMode,
    pub from: Option<Decimal>,
    pub to: Option<Decimal>,
    pub indexed_price_places: u32,
}

impl PriceAmountPredicate {
    #[must_use]
    pub const fn between(
        mode: QueryPriceMode,
        from: Option<Decimal>,
        to: Option<Decimal>,
        indexed_price_places: u32,
    ) -> Self {
        Self {
            mode,
            from,
            to,
            indexed_price_places,
        }
    }

    /// Predicate accepting every price.
    #[must_use]
    pub const fn all(mode: QueryPriceMode, indexed_price_places: u32) -> Self {
        Self::between(mode, None, None, indexed_price_places)
    }

    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Reconstruct the integer predicate in fixed-point space.
    #[must_use]
    pub fn to_record_predicate(&self) -> PriceRecordPredicate {
        PriceRecordPredicate {
            mode: self.mode,
            from: self
                .from
                .map(|amount| to_fixed_point(amount, self.indexed_price_places)),
            to: self
                .to
                .map(|amount| to_fixed_point(amount, self.indexed_price_places)),
        }
    }

    pub(crate) fn identity_hash(&self) -> u64 {
        let mut h = Xxh3::new();
        feed_u8(&mut h, self.mode as u8);
        feed_u32(&mut h, self.indexed_price_places);
        for bound in [self.from, self.to] {
            match bound {
                Some(amount) => {
                    let normalized = amount.normalize();
                    feed_u8(&mut h, 1);
                    feed_u8(&mut h, u8::from(normalized.is_sign_negative()));
                    feed_u32(&mut h, normalized.scale());
                    h.update(&normalized.mantissa().to_be_bytes());
                }
                None => feed_u8(&mut h, 0),
            }
        }
        h.digest()
    }
}

/// Convert a decimal amount to fixed point, saturating at the `i64` bounds.
#[must_use]
pub fn to_fixed_point(amount: Decimal, places: u32) -> i64 {
    let saturated = if amount.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    };

    10_i64
        .checked_pow(places)
        .and_then(|factor| amount.checked_mul(Decimal::from(factor)))
        .and_then(|scaled| {
            scaled
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .unwrap_or(saturated)
}

///
/// PriceRecordPredicate
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PriceRecordPredicate {
    pub mode: QueryPriceMode,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl PriceRecordPredicate {
    #[must_use]
    pub fn test(&self, record: &PriceRecord) -> bool {
        let price = record.price(self.mode);

        self.from.is_none_or(|from| price >= from) && self.to.is_none_or(|to| price <= to)
    }
}

///
/// FilteredPriceRecords
///
/// Resolved price records sorted by entity primary key.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FilteredPriceRecords {
    records: Arc<[PriceRecord]>,
}

impl FilteredPriceRecords {
    /// Sort and de-duplicate arbitrary records.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = PriceRecord>) -> Self {
        let mut records: Vec<PriceRecord> = records.into_iter().collect();
        records.sort_by_key(|r| (r.entity_pk, r.internal_price_id));
        records.dedup_by_key(|r| (r.entity_pk, r.internal_price_id));

        Self {
            records: records.into(),
        }
    }

    /// Collect the records of every price accessor in `formula` (not descending
    /// into accessors) restricted to entities present in `result`.
    pub fn create_from_formulas(
        formula: &Formula,
        result: &dyn Bitmap,
    ) -> Result<Self, FormulaError> {
        Self::collect(formula, result, Formula::is_price_accessor)
    }

    /// Same as [`Self::create_from_formulas`], skipping price-index leaves the
    /// context does not target.
    pub(crate) fn create_for_context(
        formula: &Formula,
        result: &dyn Bitmap,
        context: &PriceEvaluationContext,
    ) -> Result<Self, FormulaError> {
        Self::collect(formula, result, |f| {
            f.is_price_accessor() && f.price_index_key().is_none_or(|key| context.accepts(key))
        })
    }

    fn collect(
        formula: &Formula,
        result: &dyn Bitmap,
        accept: impl Fn(&Formula) -> bool,
    ) -> Result<Self, FormulaError> {
        let accessors = FormulaFinder::find(formula, accept, LookUp::Shallow);

        let mut records = Vec::new();
        for accessor in accessors {
            if let Some(found) = accessor.filtered_price_records()? {
                records.extend(found.iter().filter(|r| result.contains(r.entity_pk)));
            }
        }

        Ok(Self::from_records(records))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PriceRecord> + '_ {
        self.records.iter().copied()
    }

    /// Records of one entity.
    #[must_use]
    pub fn records_for(&self, entity_pk: u32) -> &[PriceRecord] {
        let start = self.records.partition_point(|r| r.entity_pk < entity_pk);
        let end = self.records.partition_point(|r| r.entity_pk <= entity_pk);

        &self.records[start..end]
    }

    pub(crate) fn estimated_size_bytes(&self) -> u64 {
        let record = u64::try_from(std::mem::size_of::<PriceRecord>()).unwrap_or(u64::MAX);
        u64::try_from(self.records.len())
            .unwrap_or(u64::MAX)
            .saturating_mul(record)
    }
}

///
/// PriceSelection
///
/// Outcome of picking the selling price of one entity.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PriceSelection {
    Passing(PriceRecord),
    FilteredOut,
    NoPrice,
}

/// Pick the selling price of one entity under `handling` and test it.
///
/// * `None`: the single lowest price, inner records ignored.
/// * `LowestPrice`: the lowest price of every inner record, then the cheapest
///   of those that pass.
/// * `Sum`: the lowest price of every inner record, summed into one record
///   that carries the ids of the cheapest component.
pub(crate) fn select_selling_price(
    records: &[PriceRecord],
    handling: PriceInnerRecordHandling,
    predicate: &PriceRecordPredicate,
) -> PriceSelection {
    let mode = predicate.mode;
    let judge = |record: PriceRecord| {
        if predicate.test(&record) {
            PriceSelection::Passing(record)
        } else {
            PriceSelection::FilteredOut
        }
    };

    let Some(lowest) = cheapest(records.iter().copied(), mode) else {
        return PriceSelection::NoPrice;
    };

    match handling {
        PriceInnerRecordHandling::None => judge(lowest),
        PriceInnerRecordHandling::LowestPrice => cheapest(
            lowest_per_inner_record(records, mode)
                .into_iter()
                .filter(|r| predicate.test(r)),
            mode,
        )
        .map_or(PriceSelection::FilteredOut, PriceSelection::Passing),
        PriceInnerRecordHandling::Sum => {
            let components = lowest_per_inner_record(records, mode);
            let total = components.iter().fold(
                PriceRecord {
                    inner_record_id: None,
                    price_without_tax: 0,
                    price_with_tax: 0,
                    ..lowest
                },
                |mut sum, r| {
                    sum.price_without_tax =
                        sum.price_without_tax.saturating_add(r.price_without_tax);
                    sum.price_with_tax = sum.price_with_tax.saturating_add(r.price_with_tax);
                    sum
                },
            );

            judge(total)
        }
    }
}

fn cheapest(
    records: impl IntoIterator<Item = PriceRecord>,
    mode: QueryPriceMode,
) -> Option<PriceRecord> {
    records
        .into_iter()
        .min_by_key(|r| (r.price(mode), r.internal_price_id))
}

// Records without an inner record id form one group.
fn lowest_per_inner_record(records: &[PriceRecord], mode: QueryPriceMode) -> Vec<PriceRecord> {
    let mut lowest: Vec<PriceRecord> = Vec::new();
    for record in records {
        match lowest
            .iter_mut()
            .find(|r| r.inner_record_id == record.inner_record_id)
        {
            Some(current) if record.price(mode) < current.price(mode) => *current = *record,
            Some(_) => {}
            None => lowest.push(*record),
        }
    }

    lowest
}

/// Inner record handling of the first targeted price index in `formula`,
/// else of the first index the context targets.
pub(crate) fn resolve_inner_record_handling(
    formula: &Formula,
    context: &PriceEvaluationContext,
) -> PriceInnerRecordHandling {
    FormulaFinder::find(
        formula,
        |f| f.price_index_key().is_some_and(|key| context.accepts(key)),
        LookUp::Deep,
    )
    .into_iter()
    .find_map(Formula::price_index_key)
    .or_else(|| context.target_price_indexes.first())
    .map_or(PriceInnerRecordHandling::None, |key| key.inner_record_handling)
}
