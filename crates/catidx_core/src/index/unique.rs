//! Unique attribute index.

use super::check_value_kind;
use crate::bitmap::Bitmap;
use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::AttributeIndexKey;
use crate::value::{AttributeValue, ValueKind};
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maps each value to the single record that owns it.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    attribute_key: AttributeIndexKey,
    value_kind: ValueKind,
    unique_map: BTreeMap<AttributeValue, u32>,
    record_ids: Bitmap,
    dirty: bool,
}

impl UniqueIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(attribute_key: AttributeIndexKey, value_kind: ValueKind) -> Self {
        Self {
            attribute_key,
            value_kind,
            unique_map: BTreeMap::new(),
            record_ids: Bitmap::new(),
            dirty: false,
        }
    }

    /// Maps `value` to `pk`.
    ///
    /// Re-asserting an existing mapping is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniquenessViolation`] if the value belongs to
    /// another record, or [`CoreError::InvalidOperation`] on a value of the
    /// wrong kind.
    pub fn put(&mut self, value: AttributeValue, pk: u32) -> CoreResult<()> {
        check_value_kind(self.value_kind, &value)?;
        if let Some(existing) = self.unique_map.get(&value) {
            if *existing == pk {
                return Ok(());
            }
            return Err(CoreError::UniquenessViolation {
                value: format!("{}={value}", self.attribute_key),
                existing: *existing,
                rejected: pk,
            });
        }
        self.unique_map.insert(value, pk);
        self.record_ids.insert(pk);
        self.dirty = true;
        Ok(())
    }

    /// Removes the mapping of `value` to `pk`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless exactly this mapping exists.
    pub fn remove(&mut self, value: &AttributeValue, pk: u32) -> CoreResult<()> {
        match self.unique_map.get(value) {
            Some(existing) if *existing == pk => {}
            Some(existing) => {
                return Err(CoreError::invalid_operation(format!(
                    "unique value {value} of {} belongs to {existing}, not {pk}",
                    self.attribute_key
                )))
            }
            None => {
                return Err(CoreError::invalid_operation(format!(
                    "unique value {value} of {} is not indexed",
                    self.attribute_key
                )))
            }
        }
        self.unique_map.remove(value);
        if !self.unique_map.values().any(|owner| *owner == pk) {
            self.record_ids.remove(pk);
        }
        self.dirty = true;
        Ok(())
    }

    /// Returns the record owning `value`.
    #[must_use]
    pub fn lookup(&self, value: &AttributeValue) -> Option<u32> {
        self.unique_map.get(value).copied()
    }

    /// All records holding a value.
    #[must_use]
    pub fn record_ids(&self) -> &Bitmap {
        &self.record_ids
    }

    /// Indexed attribute.
    #[must_use]
    pub fn attribute_key(&self) -> &AttributeIndexKey {
        &self.attribute_key
    }

    /// Declared value kind.
    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    /// Number of indexed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.unique_map.len()
    }

    /// Returns true if no value is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unique_map.is_empty()
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
    pub fn create_storage_part(&self, entity_index_pk: u32) -> UniqueIndexStoragePart {
        UniqueIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            attribute_key: self.attribute_key.clone(),
            value_kind: self.value_kind,
            unique_map: self
                .unique_map
                .iter()
                .map(|(value, pk)| (value.clone(), *pk))
                .collect(),
            record_ids: self.record_ids.clone(),
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] if a value repeats or the
    /// record bitmap disagrees with the map.
    pub fn from_storage_part(part: UniqueIndexStoragePart) -> CoreResult<Self> {
        let mut unique_map = BTreeMap::new();
        for (value, pk) in part.unique_map {
            if unique_map.insert(value, pk).is_some() {
                return Err(CoreError::part_corruption(format!(
                    "unique index {} repeats a value",
                    part.attribute_key
                )));
            }
        }
        let expected: Bitmap = unique_map.values().copied().collect();
        if expected != part.record_ids {
            return Err(CoreError::part_corruption(format!(
                "unique index {} record bitmap disagrees with its values",
                part.attribute_key
            )));
        }
        Ok(Self {
            attribute_key: part.attribute_key,
            value_kind: part.value_kind,
            unique_map,
            record_ids: part.record_ids,
            dirty: false,
        })
    }
}

/// Stored form of a [`UniqueIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Indexed attribute.
    pub attribute_key: AttributeIndexKey,
    /// Declared value kind.
    pub value_kind: ValueKind,
    /// `(value, pk)` pairs in value order.
    pub unique_map: Vec<(AttributeValue, u32)>,
    /// All records holding a value.
    pub record_ids: Bitmap,
}

impl StoragePart for UniqueIndexStoragePart {
    const KIND: PartKind = PartKind::Unique;

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
        AnyStoragePart::Unique(self)
    }
}
