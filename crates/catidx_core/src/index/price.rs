//! Price list and currency index.
//!
//! One index per `(price list, currency, inner record handling)` of an
//! entity index. The super variant owns full price records; the ref
//! variant only points at internal price ids held by a super index.
//! Both keep a validity interval index over internal price ids. A price
//! without validity is stored under the unbounded interval.

use crate::bitmap::Bitmap;
use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::index::range::RangeIndex;
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::PriceIndexKey;
use crate::value::ValueRange;
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One price of an entity. Amounts are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Catalog-wide internal price id.
    pub internal_price_id: u32,
    /// Price id within the entity.
    pub price_id: u32,
    /// Owning entity.
    pub entity_pk: u32,
    /// Amount without tax.
    pub price_without_tax: i64,
    /// Amount with tax.
    pub price_with_tax: i64,
    /// Inner record the price belongs to, if any.
    pub inner_record_id: Option<u32>,
    /// Validity interval, `None` when always valid.
    pub validity: Option<ValueRange>,
}

/// Payload variant of a price index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceIndexVariant {
    /// Full price records.
    Super,
    /// Internal price ids only.
    Ref,
}

impl fmt::Display for PriceIndexVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceIndexVariant::Super => f.write_str("super"),
            PriceIndexVariant::Ref => f.write_str("ref"),
        }
    }
}

/// Content of a price index, sorted by internal price id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PriceIndexPayload {
    /// Full price records.
    Super(Vec<PriceRecord>),
    /// Internal price ids.
    Ref(Vec<u32>),
}

impl PriceIndexPayload {
    /// Variant of the payload.
    #[must_use]
    pub fn variant(&self) -> PriceIndexVariant {
        match self {
            PriceIndexPayload::Super(_) => PriceIndexVariant::Super,
            PriceIndexPayload::Ref(_) => PriceIndexVariant::Ref,
        }
    }

    fn len(&self) -> usize {
        match self {
            PriceIndexPayload::Super(records) => records.len(),
            PriceIndexPayload::Ref(ids) => ids.len(),
        }
    }
}

/// Prices of one price list and currency.
#[derive(Debug, Clone)]
pub struct PriceListAndCurrencyIndex {
    price_index_key: PriceIndexKey,
    validity_index: RangeIndex,
    payload: PriceIndexPayload,
    dirty: bool,
}

impl PriceListAndCurrencyIndex {
    /// Creates an empty super index.
    #[must_use]
    pub fn new_super(price_index_key: PriceIndexKey) -> Self {
        Self::with_payload(price_index_key, PriceIndexPayload::Super(Vec::new()))
    }

    /// Creates an empty ref index.
    #[must_use]
    pub fn new_ref(price_index_key: PriceIndexKey) -> Self {
        Self::with_payload(price_index_key, PriceIndexPayload::Ref(Vec::new()))
    }

    fn with_payload(price_index_key: PriceIndexKey, payload: PriceIndexPayload) -> Self {
        Self {
            price_index_key,
            validity_index: RangeIndex::new(),
            payload,
            dirty: false,
        }
    }

    fn wrong_variant(&self, expected: PriceIndexVariant) -> CoreError {
        CoreError::invalid_operation(format!(
            "price index {} is a {} index, not {expected}",
            self.price_index_key,
            self.variant()
        ))
    }

    fn duplicate(&self, internal_price_id: u32) -> CoreError {
        CoreError::invalid_operation(format!(
            "price {internal_price_id} is already indexed in {}",
            self.price_index_key
        ))
    }

    fn absent(&self, internal_price_id: u32) -> CoreError {
        CoreError::invalid_operation(format!(
            "price {internal_price_id} is not indexed in {}",
            self.price_index_key
        ))
    }

    /// Adds a full price record to a super index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on a ref index or a
    /// duplicate internal price id.
    pub fn add_price(&mut self, record: PriceRecord) -> CoreResult<()> {
        let PriceIndexPayload::Super(records) = &mut self.payload else {
            return Err(self.wrong_variant(PriceIndexVariant::Super));
        };
        let position = match records
            .binary_search_by_key(&record.internal_price_id, |r| r.internal_price_id)
        {
            Ok(_) => return Err(self.duplicate(record.internal_price_id)),
            Err(position) => position,
        };
        self.validity_index.insert(
            record.validity.unwrap_or_else(ValueRange::unbounded),
            record.internal_price_id,
        );
        records.insert(position, record);
        self.dirty = true;
        Ok(())
    }

    /// Removes a price record from a super index and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on a ref index or an
    /// unknown internal price id.
    pub fn remove_price(&mut self, internal_price_id: u32) -> CoreResult<PriceRecord> {
        let PriceIndexPayload::Super(records) = &mut self.payload else {
            return Err(self.wrong_variant(PriceIndexVariant::Super));
        };
        let Ok(position) =
            records.binary_search_by_key(&internal_price_id, |r| r.internal_price_id)
        else {
            return Err(self.absent(internal_price_id));
        };
        let record = records.remove(position);
        self.validity_index.remove(
            &record.validity.unwrap_or_else(ValueRange::unbounded),
            internal_price_id,
        );
        self.dirty = true;
        Ok(record)
    }

    /// Looks up a price record of a super index.
    #[must_use]
    pub fn record(&self, internal_price_id: u32) -> Option<&PriceRecord> {
        match &self.payload {
            PriceIndexPayload::Super(records) => records
                .binary_search_by_key(&internal_price_id, |r| r.internal_price_id)
                .ok()
                .map(|position| &records[position]),
            PriceIndexPayload::Ref(_) => None,
        }
    }

    /// Entities owning at least one price of a super index.
    #[must_use]
    pub fn indexed_entity_ids(&self) -> Bitmap {
        match &self.payload {
            PriceIndexPayload::Super(records) => records.iter().map(|r| r.entity_pk).collect(),
            PriceIndexPayload::Ref(_) => Bitmap::new(),
        }
    }

    /// Adds a price reference to a ref index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on a super index or a
    /// duplicate internal price id.
    pub fn add_price_ref(
        &mut self,
        internal_price_id: u32,
        validity: Option<ValueRange>,
    ) -> CoreResult<()> {
        let PriceIndexPayload::Ref(ids) = &mut self.payload else {
            return Err(self.wrong_variant(PriceIndexVariant::Ref));
        };
        let position = match ids.binary_search(&internal_price_id) {
            Ok(_) => return Err(self.duplicate(internal_price_id)),
            Err(position) => position,
        };
        ids.insert(position, internal_price_id);
        self.validity_index
            .insert(validity.unwrap_or_else(ValueRange::unbounded), internal_price_id);
        self.dirty = true;
        Ok(())
    }

    /// Removes a price reference from a ref index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on a super index or an
    /// unknown internal price id.
    pub fn remove_price_ref(&mut self, internal_price_id: u32) -> CoreResult<()> {
        let PriceIndexPayload::Ref(ids) = &mut self.payload else {
            return Err(self.wrong_variant(PriceIndexVariant::Ref));
        };
        let Ok(position) = ids.binary_search(&internal_price_id) else {
            return Err(self.absent(internal_price_id));
        };
        ids.remove(position);
        self.validity_index.remove_everywhere(internal_price_id);
        self.dirty = true;
        Ok(())
    }

    /// Internal price ids valid at `moment`.
    #[must_use]
    pub fn valid_at(&self, moment: i64) -> Bitmap {
        self.validity_index.valid_at(moment)
    }

    /// Internal price ids in ascending order.
    #[must_use]
    pub fn price_ids(&self) -> Vec<u32> {
        match &self.payload {
            PriceIndexPayload::Super(records) => {
                records.iter().map(|r| r.internal_price_id).collect()
            }
            PriceIndexPayload::Ref(ids) => ids.clone(),
        }
    }

    /// Key of this index.
    #[must_use]
    pub fn price_index_key(&self) -> &PriceIndexKey {
        &self.price_index_key
    }

    /// Payload variant.
    #[must_use]
    pub fn variant(&self) -> PriceIndexVariant {
        self.payload.variant()
    }

    /// Number of indexed prices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if no price is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.len() == 0
    }

    /// Returns true if the index changed since it was last stored.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Snapshots the index into its storage part.
    #[must_use]
    pub fn create_storage_part(&self, entity_index_pk: u32) -> PriceListAndCurrencyIndexStoragePart {
        PriceListAndCurrencyIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            price_index_key: self.price_index_key.clone(),
            validity_index: self.validity_index.clone(),
            payload: self.payload.clone(),
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] if the payload is unsorted or
    /// the validity index covers other prices than the payload.
    pub fn from_storage_part(part: PriceListAndCurrencyIndexStoragePart) -> CoreResult<Self> {
        let index = Self {
            price_index_key: part.price_index_key,
            validity_index: part.validity_index,
            payload: part.payload,
            dirty: false,
        };
        let ids = index.price_ids();
        if ids.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(CoreError::part_corruption(format!(
                "price index {} holds unsorted price ids",
                index.price_index_key
            )));
        }
        let covered = index.validity_index.all_records();
        if covered.len() != ids.len() as u64 || ids.iter().any(|id| !covered.contains(*id)) {
            return Err(CoreError::part_corruption(format!(
                "validity index of {} does not match its prices",
                index.price_index_key
            )));
        }
        Ok(index)
    }
}

/// Stored form of a [`PriceListAndCurrencyIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceListAndCurrencyIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Price list, currency and inner record handling.
    pub price_index_key: PriceIndexKey,
    /// Validity intervals over internal price ids.
    pub validity_index: RangeIndex,
    /// Records or price ids.
    pub payload: PriceIndexPayload,
}

impl StoragePart for PriceListAndCurrencyIndexStoragePart {
    const KIND: PartKind = PartKind::Price;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Keyed {
            owner: self.entity_index_pk,
            key: CompressibleKey::Price(self.price_index_key.clone()),
        }
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::Price(self)
    }
}
