use crate::{
    entity::{EntityFetchRequirements, EntityFetcher, EntityReference, SealedEntity},
    error::InternalError,
    obs::sink::{MetricsEvent, MetricsSink},
    price::PriceRecord,
};
use std::cell::RefCell;

/// Price record whose id doubles as its price id.
pub(crate) const fn price(internal_price_id: u32, pk: u32, with_tax: i64) -> PriceRecord {
    PriceRecord {
        internal_price_id,
        price_id: internal_price_id,
        entity_pk: pk,
        inner_record_id: None,
        price_without_tax: with_tax,
        price_with_tax: with_tax,
    }
}

///
/// MemoryFetcher
///
/// Serves entities from memory and remembers every fetch request.
///

#[derive(Default)]
pub(crate) struct MemoryFetcher {
    entities: Vec<SealedEntity>,
    pub(crate) calls: RefCell<Vec<(Vec<EntityReference>, EntityFetchRequirements)>>,
}

impl MemoryFetcher {
    pub(crate) fn new(entities: impl IntoIterator<Item = SealedEntity>) -> Self {
        Self {
            entities: entities.into_iter().collect(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn fetched_references(&self) -> Vec<EntityReference> {
        self.calls
            .borrow()
            .iter()
            .flat_map(|(references, _)| references.iter().cloned())
            .collect()
    }
}

impl EntityFetcher for MemoryFetcher {
    fn fetch(
        &self,
        references: &[EntityReference],
        requirements: &EntityFetchRequirements,
    ) -> Result<Vec<SealedEntity>, InternalError> {
        self.calls
            .borrow_mut()
            .push((references.to_vec(), requirements.clone()));

        Ok(self
            .entities
            .iter()
            .filter(|entity| references.contains(&entity.reference()))
            .cloned()
            .collect())
    }
}

///
/// CapturingSink
///

#[derive(Default)]
pub(crate) struct CapturingSink {
    events: RefCell<Vec<MetricsEvent>>,
}

impl CapturingSink {
    pub(crate) fn events(&self) -> Vec<MetricsEvent> {
        self.events.borrow().clone()
    }
}

impl MetricsSink for CapturingSink {
    fn record(&self, event: MetricsEvent) {
        self.events.borrow_mut().push(event);
    }
}
