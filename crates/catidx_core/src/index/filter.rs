//! Filter (histogram) index.
//!
//! Keeps a sorted array of `(value, records)` buckets. Buckets are never
//! empty and values are strictly ascending. Range-typed attributes also
//! keep a [`RangeIndex`] updated in lock-step.

use super::check_value_kind;
use super::range::RangeIndex;
use crate::bitmap::Bitmap;
use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::AttributeIndexKey;
use crate::value::{AttributeValue, ValueKind};
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Records sharing one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueBucket {
    /// Bucket value.
    pub value: AttributeValue,
    /// Records holding the value.
    pub record_ids: Bitmap,
}

/// Value histogram over one attribute.
#[derive(Debug, Clone)]
pub struct FilterIndex {
    attribute_key: AttributeIndexKey,
    value_kind: ValueKind,
    buckets: Vec<ValueBucket>,
    range_index: Option<RangeIndex>,
    dirty: bool,
}

impl FilterIndex {
    /// Creates an empty index. Range-typed indexes get a range index.
    #[must_use]
    pub fn new(attribute_key: AttributeIndexKey, value_kind: ValueKind) -> Self {
        Self {
            attribute_key,
            value_kind,
            buckets: Vec::new(),
            range_index: (value_kind == ValueKind::Range).then(RangeIndex::new),
            dirty: false,
        }
    }

    fn position(&self, value: &AttributeValue) -> Result<usize, usize> {
        self.buckets.binary_search_by(|bucket| bucket.value.cmp(value))
    }

    /// Adds `pk` to the bucket of `value`, creating the bucket if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on a value of the wrong kind.
    pub fn insert(&mut self, value: AttributeValue, pk: u32) -> CoreResult<()> {
        check_value_kind(self.value_kind, &value)?;
        if let (Some(range_index), Some(range)) = (self.range_index.as_mut(), value.as_range()) {
            range_index.insert(*range, pk);
        }
        match self.position(&value) {
            Ok(index) => {
                self.buckets[index].record_ids.insert(pk);
            }
            Err(index) => {
                let mut record_ids = Bitmap::new();
                record_ids.insert(pk);
                self.buckets.insert(index, ValueBucket { value, record_ids });
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Removes `pk` from the bucket of `value`, deleting the bucket if it empties.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the pair is not indexed.
    pub fn remove(&mut self, value: &AttributeValue, pk: u32) -> CoreResult<()> {
        let index = match self.position(value) {
            Ok(index) if self.buckets[index].record_ids.contains(pk) => index,
            _ => {
                return Err(CoreError::invalid_operation(format!(
                    "record {pk} is not indexed under {value} in {}",
                    self.attribute_key
                )))
            }
        };
        self.buckets[index].record_ids.remove(pk);
        if self.buckets[index].record_ids.is_empty() {
            self.buckets.remove(index);
        }
        if let (Some(range_index), Some(range)) = (self.range_index.as_mut(), value.as_range()) {
            range_index.remove(range, pk);
        }
        self.dirty = true;
        Ok(())
    }

    /// Records holding exactly `value`.
    #[must_use]
    pub fn records_equal_to(&self, value: &AttributeValue) -> Bitmap {
        self.position(value)
            .map(|index| self.buckets[index].record_ids.clone())
            .unwrap_or_default()
    }

    /// Records whose value lies in `[from, to]`.
    #[must_use]
    pub fn records_between(&self, from: &AttributeValue, to: &AttributeValue) -> Bitmap {
        self.records_in(Bound::Included(from), Bound::Included(to))
    }

    /// Records whose value is `>= from`.
    #[must_use]
    pub fn records_at_least(&self, from: &AttributeValue) -> Bitmap {
        self.records_in(Bound::Included(from), Bound::Unbounded)
    }

    /// Records whose value is `<= to`.
    #[must_use]
    pub fn records_at_most(&self, to: &AttributeValue) -> Bitmap {
        self.records_in(Bound::Unbounded, Bound::Included(to))
    }

    fn records_in(&self, from: Bound<&AttributeValue>, to: Bound<&AttributeValue>) -> Bitmap {
        let start = match from {
            Bound::Included(value) => self.buckets.partition_point(|b| &b.value < value),
            Bound::Excluded(value) => self.buckets.partition_point(|b| &b.value <= value),
            Bound::Unbounded => 0,
        };
        let end = match to {
            Bound::Included(value) => self.buckets.partition_point(|b| &b.value <= value),
            Bound::Excluded(value) => self.buckets.partition_point(|b| &b.value < value),
            Bound::Unbounded => self.buckets.len(),
        };
        let mut result = Bitmap::new();
        if start < end {
            for bucket in &self.buckets[start..end] {
                result.union_with(&bucket.record_ids);
            }
        }
        result
    }

    /// Union of every bucket.
    #[must_use]
    pub fn all_records(&self) -> Bitmap {
        let mut result = Bitmap::new();
        for bucket in &self.buckets {
            result.union_with(&bucket.record_ids);
        }
        result
    }

    /// Buckets in value order.
    #[must_use]
    pub fn buckets(&self) -> &[ValueBucket] {
        &self.buckets
    }

    /// Range index of range-typed attributes.
    #[must_use]
    pub fn range_index(&self) -> Option<&RangeIndex> {
        self.range_index.as_ref()
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

    /// Returns true if no bucket exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
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
    pub fn create_storage_part(&self, entity_index_pk: u32) -> FilterIndexStoragePart {
        FilterIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            attribute_key: self.attribute_key.clone(),
            value_kind: self.value_kind,
            histogram: self.buckets.clone(),
            range_index: self.range_index.clone(),
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] if buckets are empty or out of order.
    pub fn from_storage_part(part: FilterIndexStoragePart) -> CoreResult<Self> {
        let ordered = part.histogram.windows(2).all(|pair| pair[0].value < pair[1].value);
        if !ordered || part.histogram.iter().any(|bucket| bucket.record_ids.is_empty()) {
            return Err(CoreError::part_corruption(format!(
                "filter index {} holds empty or unordered buckets",
                part.attribute_key
            )));
        }
        let range_index = match (part.value_kind, part.range_index) {
            (ValueKind::Range, None) => Some(RangeIndex::new()),
            (ValueKind::Range, Some(range_index)) => Some(range_index),
            (_, _) => None,
        };
        Ok(Self {
            attribute_key: part.attribute_key,
            value_kind: part.value_kind,
            buckets: part.histogram,
            range_index,
            dirty: false,
        })
    }
}

/// Stored form of a [`FilterIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Indexed attribute.
    pub attribute_key: AttributeIndexKey,
    /// Declared value kind.
    pub value_kind: ValueKind,
    /// Buckets in value order.
    pub histogram: Vec<ValueBucket>,
    /// Range index of range-typed attributes.
    pub range_index: Option<RangeIndex>,
}

impl StoragePart for FilterIndexStoragePart {
    const KIND: PartKind = PartKind::Filter;

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
        AnyStoragePart::Filter(self)
    }
}
