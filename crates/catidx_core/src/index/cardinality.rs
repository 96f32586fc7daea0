//! Occurrence counters.
//!
//! A cardinality index counts how many times a key was added. An entry
//! disappears exactly when its count drops to zero, so consumers can tell
//! when the last occurrence of a key left.

use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::AttributeIndexKey;
use crate::value::AttributeValue;
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};

/// Counts occurrences of keys.
#[derive(Debug, Clone)]
pub struct CardinalityIndex<K> {
    counts: BTreeMap<K, u32>,
    dirty: bool,
}

impl<K> Default for CardinalityIndex<K> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
            dirty: false,
        }
    }
}

/// Counts occurrences of attribute values.
pub type AttributeCardinalityIndex = CardinalityIndex<AttributeValue>;

/// Counts references to entities of one reference type.
pub type ReferenceTypeCardinalityIndex = CardinalityIndex<u32>;

impl<K: Ord + Clone + Display> CardinalityIndex<K> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one occurrence of `key`. Returns the new count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the count of `key` is
    /// already `u32::MAX`.
    pub fn increment(&mut self, key: K) -> CoreResult<u32> {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count = count.checked_add(1).ok_or_else(|| {
            CoreError::invalid_operation(format!("cardinality of {key} overflows"))
        })?;
        self.dirty = true;
        Ok(*count)
    }

    /// Removes one occurrence of `key`. Returns the remaining count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `key` is not counted.
    pub fn decrement(&mut self, key: &K) -> CoreResult<u32> {
        let Some(count) = self.counts.get_mut(key) else {
            return Err(CoreError::invalid_operation(format!(
                "cardinality of {key} is already zero"
            )));
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(key);
        }
        self.dirty = true;
        Ok(remaining)
    }

    /// Current count of `key`, zero if absent.
    #[must_use]
    pub fn count(&self, key: &K) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Returns true if `key` has an entry.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.counts.contains_key(key)
    }

    /// Counted keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.counts.keys()
    }

    /// Number of counted keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if nothing is counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Returns true if the index changed since it was last stored.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn entries(&self) -> Vec<(K, u32)> {
        self.counts.iter().map(|(key, count)| (key.clone(), *count)).collect()
    }

    fn from_entries<D: Debug>(entries: Vec<(K, u32)>, owner: D) -> CoreResult<Self> {
        let mut counts = BTreeMap::new();
        for (key, count) in entries {
            if count == 0 || counts.insert(key, count).is_some() {
                return Err(CoreError::part_corruption(format!(
                    "cardinality index {owner:?} holds a zero or repeated entry"
                )));
            }
        }
        Ok(Self {
            counts,
            dirty: false,
        })
    }
}

impl AttributeCardinalityIndex {
    /// Snapshots the index into its storage part.
    #[must_use]
    pub fn create_storage_part(
        &self,
        entity_index_pk: u32,
        attribute_key: &AttributeIndexKey,
    ) -> AttributeCardinalityIndexStoragePart {
        AttributeCardinalityIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            attribute_key: attribute_key.clone(),
            cardinalities: self.entries(),
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] on zero or repeated entries.
    pub fn from_storage_part(part: AttributeCardinalityIndexStoragePart) -> CoreResult<Self> {
        Self::from_entries(part.cardinalities, part.attribute_key)
    }
}

impl ReferenceTypeCardinalityIndex {
    /// Snapshots the index into its storage part.
    #[must_use]
    pub fn create_storage_part(
        &self,
        entity_index_pk: u32,
        reference_name: &str,
    ) -> ReferenceTypeCardinalityIndexStoragePart {
        ReferenceTypeCardinalityIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            reference_name: reference_name.to_string(),
            cardinalities: self.entries(),
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] on zero or repeated entries.
    pub fn from_storage_part(part: ReferenceTypeCardinalityIndexStoragePart) -> CoreResult<Self> {
        Self::from_entries(part.cardinalities, part.reference_name)
    }
}

/// Stored form of an [`AttributeCardinalityIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCardinalityIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Counted attribute.
    pub attribute_key: AttributeIndexKey,
    /// `(value, count)` pairs in value order.
    pub cardinalities: Vec<(AttributeValue, u32)>,
}

impl StoragePart for AttributeCardinalityIndexStoragePart {
    const KIND: PartKind = PartKind::AttributeCardinality;

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
        AnyStoragePart::AttributeCardinality(self)
    }
}

/// Stored form of a [`ReferenceTypeCardinalityIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTypeCardinalityIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Reference name of the owning index.
    pub reference_name: String,
    /// `(referenced pk, count)` pairs in key order.
    pub cardinalities: Vec<(u32, u32)>,
}

impl StoragePart for ReferenceTypeCardinalityIndexStoragePart {
    const KIND: PartKind = PartKind::ReferenceTypeCardinality;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Keyed {
            owner: self.entity_index_pk,
            key: CompressibleKey::Reference(self.reference_name.clone()),
        }
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::ReferenceTypeCardinality(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinality_lifecycle() {
        let mut index = AttributeCardinalityIndex::new();
        let red: AttributeValue = "red".into();
        for _pk in [1, 2, 3] {
            index.increment(red.clone()).unwrap();
        }
        assert_eq!(index.count(&red), 3);

        assert_eq!(index.decrement(&red).unwrap(), 2);
        assert_eq!(index.count(&red), 2);

        assert_eq!(index.decrement(&red).unwrap(), 1);
        assert_eq!(index.decrement(&red).unwrap(), 0);
        assert!(!index.contains(&red));
        assert!(index.is_empty());
    }

    #[test]
    fn increment_at_max_count_fails() {
        let mut index =
            ReferenceTypeCardinalityIndex::from_entries(vec![(5, u32::MAX)], "brand").unwrap();
        assert!(matches!(
            index.increment(5),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(index.count(&5), u32::MAX);
        assert!(!index.is_dirty());
        assert_eq!(index.increment(6).unwrap(), 1);
    }

    #[test]
    fn decrement_absent_fails() {
        let mut index = ReferenceTypeCardinalityIndex::new();
        assert!(matches!(
            index.decrement(&4),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn reference_type_part_round_trip() {
        let mut index = ReferenceTypeCardinalityIndex::new();
        index.increment(7).unwrap();
        index.increment(7).unwrap();
        index.increment(9).unwrap();
        let part = index.create_storage_part(3, "brand");
        assert_eq!(part.cardinalities, vec![(7, 2), (9, 1)]);

        let rebuilt = ReferenceTypeCardinalityIndex::from_storage_part(part).unwrap();
        assert_eq!(rebuilt.count(&7), 2);
        assert!(!rebuilt.is_dirty());
    }

    #[test]
    fn zero_count_in_part_is_corruption() {
        let part = ReferenceTypeCardinalityIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk: 1,
            reference_name: "brand".to_string(),
            cardinalities: vec![(1, 0)],
        };
        assert!(matches!(
            ReferenceTypeCardinalityIndex::from_storage_part(part),
            Err(CoreError::PartCorruption { .. })
        ));
    }
}
