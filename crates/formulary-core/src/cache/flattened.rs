use crate::{
    bitmap::{BaseBitmap, Bitmap, and_not},
    cache::CachePayloadHeader,
    formula::{Formula, FormulaError, FormulaKind},
    price::{FilteredPriceRecords, PriceAmountPredicate, PriceEvaluationContext, QueryPriceMode},
};
use rust_decimal::Decimal;
use std::sync::{Arc, OnceLock};

///
/// FlattenedFormula
///
/// Immutable, thread-safe memo of a computed subtree. Computing it returns
/// the recorded bitmap; it cannot be cloned with other inner formulas.
///

#[derive(Debug)]
pub struct FlattenedFormula {
    header: CachePayloadHeader,
    result: Arc<BaseBitmap>,
    payload: FlattenedPayload,
}

///
/// FlattenedPayload
///

#[derive(Debug)]
pub enum FlattenedPayload {
    Plain,

    /// The result includes records a price predicate would have excluded;
    /// `filtered_out` names them.
    FilteredOut { filtered_out: Arc<BaseBitmap> },

    /// Price records selected while computing the subtree.
    FilteredPrices { prices: FilteredPriceRecords },

    /// Price records plus the records a bounded price predicate excluded.
    FilteredPricesAndFilteredOut(PricePredicatePayload),
}

///
/// PricePredicatePayload
///
/// Keeps the predicate as its raw bounds; the predicate and the filtered-out
/// clone are rebuilt on first access and shared afterwards.
///

#[derive(Debug)]
pub struct PricePredicatePayload {
    prices: FilteredPriceRecords,
    filtered_out: Arc<BaseBitmap>,
    filtered_out_prices: FilteredPriceRecords,
    context: PriceEvaluationContext,
    mode: QueryPriceMode,
    from: Option<Decimal>,
    to: Option<Decimal>,
    indexed_price_places: u32,
    filtered_out_record_hash: u64,
    predicate: OnceLock<PriceAmountPredicate>,
    filtered_out_clone: OnceLock<Arc<FlattenedFormula>>,
}

impl PricePredicatePayload {
    /// `filtered_out_record_hash` is the structural hash of the subtree with
    /// its price predicate lifted; `filtered_out_prices` are the prices that
    /// subtree selects for the filtered-out records.
    #[must_use]
    pub fn new(
        prices: FilteredPriceRecords,
        filtered_out: Arc<BaseBitmap>,
        filtered_out_prices: FilteredPriceRecords,
        context: PriceEvaluationContext,
        predicate: PriceAmountPredicate,
        filtered_out_record_hash: u64,
    ) -> Self {
        Self {
            prices,
            filtered_out,
            filtered_out_prices,
            context,
            mode: predicate.mode,
            from: predicate.from,
            to: predicate.to,
            indexed_price_places: predicate.indexed_price_places,
            filtered_out_record_hash,
            predicate: OnceLock::new(),
            filtered_out_clone: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn context(&self) -> &PriceEvaluationContext {
        &self.context
    }

    #[must_use]
    pub fn predicate(&self) -> PriceAmountPredicate {
        *self.predicate.get_or_init(|| {
            PriceAmountPredicate::between(self.mode, self.from, self.to, self.indexed_price_places)
        })
    }
}

impl FlattenedFormula {
    #[must_use]
    pub const fn new(
        header: CachePayloadHeader,
        result: Arc<BaseBitmap>,
        payload: FlattenedPayload,
    ) -> Self {
        Self {
            header,
            result,
            payload,
        }
    }

    /// Flatten a computed subtree, choosing the payload variant from the
    /// price accessors it exposes.
    pub fn from_formula(formula: &Formula) -> Result<Self, FormulaError> {
        let computed = formula.compute()?;
        let header = CachePayloadHeader::new(
            formula.hash(),
            formula.gather_transactional_ids().iter().copied(),
        );
        let result = Arc::new(BaseBitmap::from_roaring(computed.to_roaring()));

        let prices = if formula.is_price_accessor() {
            formula.filtered_price_records()?
        } else {
            None
        };
        let predicate = formula
            .requested_predicate()
            .filter(PriceAmountPredicate::is_bounded);
        let lifted = match predicate {
            Some(_) => formula.with_filtered_out_results()?,
            None => None,
        };
        let filtered_out = match &lifted {
            Some(lifted) => Some(Arc::new(and_not(
                lifted.compute()?.as_ref(),
                result.as_ref(),
            ))),
            None => None,
        };

        let payload = match (prices, predicate, filtered_out, lifted) {
            (Some(prices), Some(predicate), Some(filtered_out), Some(lifted)) => {
                let context = match formula.kind() {
                    FormulaKind::PriceFilter(filter) => filter.context().clone(),
                    _ => PriceEvaluationContext::default(),
                };
                let filtered_out_prices = lifted
                    .filtered_price_records()?
                    .unwrap_or_default()
                    .iter()
                    .filter(|r| filtered_out.contains(r.entity_pk))
                    .collect::<Vec<_>>();
                FlattenedPayload::FilteredPricesAndFilteredOut(PricePredicatePayload::new(
                    prices,
                    filtered_out,
                    FilteredPriceRecords::from_records(filtered_out_prices),
                    context,
                    predicate,
                    lifted.hash(),
                ))
            }
            (Some(prices), ..) => FlattenedPayload::FilteredPrices { prices },
            (None, _, Some(filtered_out), _) => FlattenedPayload::FilteredOut { filtered_out },
            _ => FlattenedPayload::Plain,
        };

        Ok(Self::new(header, result, payload))
    }

    #[must_use]
    pub const fn header(&self) -> &CachePayloadHeader {
        &self.header
    }

    #[must_use]
    pub const fn result(&self) -> &Arc<BaseBitmap> {
        &self.result
    }

    #[must_use]
    pub const fn payload(&self) -> &FlattenedPayload {
        &self.payload
    }

    #[must_use]
    pub const fn is_valid_for(&self, live_transactional_id_hash: u64) -> bool {
        self.header.is_valid_for(live_transactional_id_hash)
    }

    #[must_use]
    pub const fn prices(&self) -> Option<&FilteredPriceRecords> {
        match &self.payload {
            FlattenedPayload::FilteredPrices { prices } => Some(prices),
            FlattenedPayload::FilteredPricesAndFilteredOut(payload) => Some(&payload.prices),
            FlattenedPayload::Plain | FlattenedPayload::FilteredOut { .. } => None,
        }
    }

    #[must_use]
    pub const fn filtered_out(&self) -> Option<&Arc<BaseBitmap>> {
        match &self.payload {
            FlattenedPayload::FilteredOut { filtered_out } => Some(filtered_out),
            FlattenedPayload::FilteredPricesAndFilteredOut(payload) => Some(&payload.filtered_out),
            FlattenedPayload::Plain | FlattenedPayload::FilteredPrices { .. } => None,
        }
    }

    #[must_use]
    pub fn requested_predicate(&self) -> Option<PriceAmountPredicate> {
        match &self.payload {
            FlattenedPayload::FilteredPricesAndFilteredOut(payload) => Some(payload.predicate()),
            _ => None,
        }
    }

    /// Payload of the same subtree with its price predicate lifted: the
    /// result extended by the filtered-out records, priced like the lifted
    /// subtree would be.
    #[must_use]
    pub fn filtered_out_clone(&self) -> Option<Arc<Self>> {
        let FlattenedPayload::FilteredPricesAndFilteredOut(payload) = &self.payload else {
            return None;
        };

        let clone = payload.filtered_out_clone.get_or_init(|| {
            let mut result = (*self.result).clone();
            result.union_with(payload.filtered_out.as_roaring());

            Arc::new(Self::new(
                CachePayloadHeader {
                    record_hash: payload.filtered_out_record_hash,
                    ..self.header.clone()
                },
                Arc::new(result),
                FlattenedPayload::FilteredPrices {
                    prices: FilteredPriceRecords::from_records(
                        payload.prices.iter().chain(payload.filtered_out_prices.iter()),
                    ),
                },
            ))
        });

        Some(Arc::clone(clone))
    }

    /// Approximate retained size, used by the cache's byte budget.
    #[must_use]
    pub fn estimated_size_bytes(&self) -> u64 {
        fn bitmap(b: &BaseBitmap) -> u64 {
            u64::try_from(b.len()).unwrap_or(u64::MAX).saturating_mul(4)
        }

        let extra = match &self.payload {
            FlattenedPayload::Plain => 0,
            FlattenedPayload::FilteredOut { filtered_out } => bitmap(filtered_out),
            FlattenedPayload::FilteredPrices { prices } => prices.estimated_size_bytes(),
            FlattenedPayload::FilteredPricesAndFilteredOut(payload) => payload
                .prices
                .estimated_size_bytes()
                .saturating_add(payload.filtered_out_prices.estimated_size_bytes())
                .saturating_add(bitmap(&payload.filtered_out)),
        };

        self.header
            .estimated_size_bytes()
            .saturating_add(bitmap(&self.result))
            .saturating_add(extra)
    }
}
