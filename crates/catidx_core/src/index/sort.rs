//! Sort index.
//!
//! Holds the distinct values in ascending order and, in parallel, the
//! record sequence grouped into one block per value. Blocks appear in
//! value order and records inside a block ascend. Only values held by more
//! than one record are listed in the cardinality map; every other value
//! owns a block of exactly one record.

use super::check_value_kind;
use crate::bitmap::Bitmap;
use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::{AttributeIndexKey, Locale};
use crate::value::{AttributeValue, ValueKind};
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How values of a sort index compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortComparator {
    /// Kind every sorted value must have.
    pub value_kind: ValueKind,
    /// Locale the values were sorted for. Recorded as metadata; text
    /// values compare by code point.
    pub locale: Option<Locale>,
}

impl SortComparator {
    /// Creates a comparator for the given value kind.
    #[must_use]
    pub const fn new(value_kind: ValueKind) -> Self {
        Self {
            value_kind,
            locale: None,
        }
    }

    /// Returns the comparator tagged with a locale.
    #[must_use]
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }
}

/// Records ordered by attribute value.
#[derive(Debug, Clone)]
pub struct SortIndex {
    attribute_key: AttributeIndexKey,
    comparator: SortComparator,
    sorted_values: Vec<AttributeValue>,
    sorted_records: Vec<u32>,
    value_cardinalities: BTreeMap<AttributeValue, u32>,
    record_ids: Bitmap,
    dirty: bool,
}

impl SortIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(attribute_key: AttributeIndexKey, comparator: SortComparator) -> Self {
        Self {
            attribute_key,
            comparator,
            sorted_values: Vec::new(),
            sorted_records: Vec::new(),
            value_cardinalities: BTreeMap::new(),
            record_ids: Bitmap::new(),
            dirty: false,
        }
    }

    fn cardinality(&self, value: &AttributeValue) -> usize {
        self.value_cardinalities
            .get(value)
            .map_or(1, |count| *count as usize)
    }

    fn block_start(&self, value_index: usize) -> usize {
        self.sorted_values[..value_index]
            .iter()
            .map(|value| self.cardinality(value))
            .sum()
    }

    /// Inserts `pk` into the block of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on a value of the wrong kind
    /// or if the record is already sorted under any value.
    pub fn insert(&mut self, value: AttributeValue, pk: u32) -> CoreResult<()> {
        check_value_kind(self.comparator.value_kind, &value)?;
        if self.record_ids.contains(pk) {
            return Err(CoreError::invalid_operation(format!(
                "record {pk} is already sorted in {}",
                self.attribute_key
            )));
        }
        match self.sorted_values.binary_search(&value) {
            Ok(value_index) => {
                let start = self.block_start(value_index);
                let count = self.cardinality(&value);
                let offset = self.sorted_records[start..start + count]
                    .binary_search(&pk)
                    .unwrap_or_else(|offset| offset);
                self.sorted_records.insert(start + offset, pk);
                self.value_cardinalities.insert(value, count as u32 + 1);
            }
            Err(value_index) => {
                let start = self.block_start(value_index);
                self.sorted_records.insert(start, pk);
                self.sorted_values.insert(value_index, value);
            }
        }
        self.record_ids.insert(pk);
        self.dirty = true;
        Ok(())
    }

    /// Removes `pk` from the block of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the pair is not indexed.
    pub fn remove(&mut self, value: &AttributeValue, pk: u32) -> CoreResult<()> {
        let not_indexed = || {
            CoreError::invalid_operation(format!(
                "record {pk} is not sorted under {value} in {}",
                self.attribute_key
            ))
        };
        let value_index = self.sorted_values.binary_search(value).map_err(|_| not_indexed())?;
        let start = self.block_start(value_index);
        let count = self.cardinality(value);
        let offset = self.sorted_records[start..start + count]
            .binary_search(&pk)
            .map_err(|_| not_indexed())?;

        self.sorted_records.remove(start + offset);
        self.record_ids.remove(pk);
        match count {
            1 => {
                self.sorted_values.remove(value_index);
            }
            2 => {
                self.value_cardinalities.remove(value);
            }
            _ => {
                self.value_cardinalities.insert(value.clone(), count as u32 - 1);
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Records in ascending value order.
    #[must_use]
    pub fn ascending(&self) -> &[u32] {
        &self.sorted_records
    }

    /// Records in descending value order.
    #[must_use]
    pub fn descending(&self) -> Vec<u32> {
        self.sorted_records.iter().rev().copied().collect()
    }

    /// Distinct values in ascending order.
    #[must_use]
    pub fn sorted_values(&self) -> &[AttributeValue] {
        &self.sorted_values
    }

    /// Values held by more than one record, with their counts.
    #[must_use]
    pub fn value_cardinalities(&self) -> &BTreeMap<AttributeValue, u32> {
        &self.value_cardinalities
    }

    /// Comparator metadata.
    #[must_use]
    pub fn comparator(&self) -> &SortComparator {
        &self.comparator
    }

    /// Indexed attribute.
    #[must_use]
    pub fn attribute_key(&self) -> &AttributeIndexKey {
        &self.attribute_key
    }

    /// Number of sorted records.
    #[must_use]
    pub fn size(&self) -> usize {
        self.sorted_records.len()
    }

    /// Returns true if no record is sorted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorted_records.is_empty()
    }

    /// Returns true if the record sequence matches the value blocks and
    /// no record appears twice.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let total: usize = self
            .sorted_values
            .iter()
            .map(|value| self.cardinality(value))
            .sum();
        let cardinalities_known = self
            .value_cardinalities
            .iter()
            .all(|(value, count)| *count > 1 && self.sorted_values.binary_search(value).is_ok());
        let distinct = usize::try_from(self.record_ids.len()).ok() == Some(self.sorted_records.len());
        total == self.sorted_records.len() && cardinalities_known && distinct
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
    pub fn create_storage_part(&self, entity_index_pk: u32) -> SortIndexStoragePart {
        SortIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            attribute_key: self.attribute_key.clone(),
            comparator: self.comparator.clone(),
            sorted_values: self.sorted_values.clone(),
            sorted_records: self.sorted_records.clone(),
            value_cardinalities: self
                .value_cardinalities
                .iter()
                .map(|(value, count)| (value.clone(), *count))
                .collect(),
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] if the record sequence does
    /// not match the value blocks or repeats a record.
    pub fn from_storage_part(part: SortIndexStoragePart) -> CoreResult<Self> {
        let record_ids = part.sorted_records.iter().copied().collect();
        let index = Self {
            attribute_key: part.attribute_key,
            comparator: part.comparator,
            sorted_values: part.sorted_values,
            sorted_records: part.sorted_records,
            value_cardinalities: part.value_cardinalities.into_iter().collect(),
            record_ids,
            dirty: false,
        };
        if !index.is_consistent() {
            return Err(CoreError::part_corruption(format!(
                "sort index {} record sequence does not match its values",
                index.attribute_key
            )));
        }
        Ok(index)
    }
}

/// Stored form of a [`SortIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Indexed attribute.
    pub attribute_key: AttributeIndexKey,
    /// Comparator metadata.
    pub comparator: SortComparator,
    /// Distinct values in ascending order.
    pub sorted_values: Vec<AttributeValue>,
    /// Record sequence blocked by value.
    pub sorted_records: Vec<u32>,
    /// Values held by more than one record.
    pub value_cardinalities: Vec<(AttributeValue, u32)>,
}

impl StoragePart for SortIndexStoragePart {
    const KIND: PartKind = PartKind::Sort;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Keyed {
            owner: self.entity_index_pk,
            key: CompressibleKey::Attribute(self.attribute_key.clone()),
        }
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::Sort(self)
    }
}
