//! Contracts of the entity collaborators: fetching, content requirements, and
//! the prefetched entity set filters inspect.

mod filter;


pub use filter::{AttributeFilter, AttributePredicate, EntityToBitmapFilter, PriceBetweenFilter};

use crate::{
    bitmap::BaseBitmap,
    error::InternalError,
    price::{PriceIndexKey, PriceRecord, QueryPriceMode},
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

///
/// EntityReference
///
/// Typed primary key; the same pk may exist in several entity collections.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EntityReference {
    pub entity_type: String,
    pub pk: u32,
}

impl EntityReference {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, pk: u32) -> Self {
        Self {
            entity_type: entity_type.into(),
            pk,
        }
    }
}

///
/// AttributeValue
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
}

///
/// SealedEntity
///
/// Read-only hydrated entity body as returned by the fetcher.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SealedEntity {
    pk: u32,
    entity_type: String,
    attributes: BTreeMap<String, AttributeValue>,
    prices: BTreeMap<PriceIndexKey, Vec<PriceRecord>>,
}

impl SealedEntity {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, pk: u32) -> Self {
        Self {
            pk,
            entity_type: entity_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_price(mut self, key: PriceIndexKey, record: PriceRecord) -> Self {
        self.prices.entry(key).or_default().push(record);
        self
    }

    #[must_use]
    pub const fn pk(&self) -> u32 {
        self.pk
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    #[must_use]
    pub fn reference(&self) -> EntityReference {
        EntityReference::new(self.entity_type.clone(), self.pk)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Prices of every index, in index key order.
    pub fn prices(&self) -> impl Iterator<Item = (&PriceIndexKey, &[PriceRecord])> {
        self.prices.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

///
/// ContentKind
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ContentKind {
    Attributes,
    AssociatedData,
    References,
    Prices,
}

///
/// EntityContentRequire
///
/// One part of the entity body a filter needs. Opaque to the engine beyond
/// its kind; requirements of the same kind combine into one.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntityContentRequire {
    Attributes(BTreeSet<String>),
    AssociatedData(BTreeSet<String>),
    References(BTreeSet<String>),
    Prices(QueryPriceMode),
}

impl EntityContentRequire {
    #[must_use]
    pub fn attributes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Attributes(names.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub const fn kind(&self) -> ContentKind {
        match self {
            Self::Attributes(_) => ContentKind::Attributes,
            Self::AssociatedData(_) => ContentKind::AssociatedData,
            Self::References(_) => ContentKind::References,
            Self::Prices(_) => ContentKind::Prices,
        }
    }

    // Callers pair requirements of equal kind only.
    fn combine_with(&mut self, other: Self) {
        match (self, other) {
            (Self::Attributes(a), Self::Attributes(b))
            | (Self::AssociatedData(a), Self::AssociatedData(b))
            | (Self::References(a), Self::References(b)) => a.extend(b),
            _ => {}
        }
    }
}

///
/// EntityFetchRequirements
///
/// Aggregated content requirements, at most one per kind.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EntityFetchRequirements {
    by_kind: BTreeMap<ContentKind, EntityContentRequire>,
}

impl EntityFetchRequirements {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, require: EntityContentRequire) -> Self {
        self.add(require);
        self
    }

    pub fn add(&mut self, require: EntityContentRequire) {
        match self.by_kind.get_mut(&require.kind()) {
            Some(existing) => existing.combine_with(require),
            None => {
                self.by_kind.insert(require.kind(), require);
            }
        }
    }

    pub fn merge(&mut self, other: &Self) {
        for require in other.by_kind.values() {
            self.add(require.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityContentRequire> {
        self.by_kind.values()
    }

    /// True when every requirement of `other` is covered by `self`.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        other.by_kind.iter().all(|(kind, require)| {
            let Some(held) = self.by_kind.get(kind) else {
                return false;
            };
            match (held, require) {
                (EntityContentRequire::Attributes(a), EntityContentRequire::Attributes(b))
                | (
                    EntityContentRequire::AssociatedData(a),
                    EntityContentRequire::AssociatedData(b),
                )
                | (EntityContentRequire::References(a), EntityContentRequire::References(b)) => {
                    b.is_subset(a)
                }
                (held, require) => held == require,
            }
        })
    }
}

///
/// EntityFetcher
///
/// Storage collaborator hydrating entity bodies. Called synchronously from the
/// prefetch path only.
///

pub trait EntityFetcher {
    fn fetch(
        &self,
        references: &[EntityReference],
        requirements: &EntityFetchRequirements,
    ) -> Result<Vec<SealedEntity>, InternalError>;
}

///
/// PrefetchedEntities
///
/// Entities hydrated ahead of evaluation, keyed by the id the formula tree
/// uses for them.
///

#[derive(Clone, Debug, Default)]
pub struct PrefetchedEntities {
    by_id: BTreeMap<u32, SealedEntity>,
    requirements: EntityFetchRequirements,
    usable_for_filtering: bool,
}

impl PrefetchedEntities {
    #[must_use]
    pub fn new(
        entities: impl IntoIterator<Item = (u32, SealedEntity)>,
        requirements: EntityFetchRequirements,
        usable_for_filtering: bool,
    ) -> Self {
        Self {
            by_id: entities.into_iter().collect(),
            requirements,
            usable_for_filtering,
        }
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&SealedEntity> {
        self.by_id.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &SealedEntity)> {
        self.by_id.iter().map(|(id, entity)| (*id, entity))
    }

    #[must_use]
    pub fn ids(&self) -> BaseBitmap {
        self.by_id.keys().copied().collect()
    }

    #[must_use]
    pub const fn requirements(&self) -> &EntityFetchRequirements {
        &self.requirements
    }

    /// True when the prefetched set bounds the query result, so filters may
    /// evaluate over it instead of the indexes.
    #[must_use]
    pub const fn usable_for_filtering(&self) -> bool {
        self.usable_for_filtering
    }
}
