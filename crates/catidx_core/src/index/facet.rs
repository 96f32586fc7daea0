//! Facet index of one reference.
//!
//! An entity lands in the no-group map iff the facet has no group.
//! Empty bitmaps and empty groups are pruned.

use crate::bitmap::Bitmap;
use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Facets of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetGroup {
    /// Group primary key.
    pub group_id: u32,
    /// `(facet pk, entities)` pairs.
    pub facets: Vec<(u32, Bitmap)>,
}

/// Entities by referenced facet.
#[derive(Debug, Clone)]
pub struct FacetIndex {
    reference_name: String,
    no_group: BTreeMap<u32, Bitmap>,
    groups: BTreeMap<u32, BTreeMap<u32, Bitmap>>,
    dirty: bool,
}

impl FacetIndex {
    /// Creates an empty index for a reference.
    pub fn new(reference_name: impl Into<String>) -> Self {
        Self {
            reference_name: reference_name.into(),
            no_group: BTreeMap::new(),
            groups: BTreeMap::new(),
            dirty: false,
        }
    }

    fn facets_mut(&mut self, group: Option<u32>) -> &mut BTreeMap<u32, Bitmap> {
        match group {
            Some(group) => self.groups.entry(group).or_default(),
            None => &mut self.no_group,
        }
    }

    /// Records that `entity_pk` references `facet_pk` in `group`.
    pub fn add_facet(&mut self, facet_pk: u32, group: Option<u32>, entity_pk: u32) {
        self.facets_mut(group).entry(facet_pk).or_default().insert(entity_pk);
        self.dirty = true;
    }

    /// Removes the reference of `entity_pk` to `facet_pk` in `group`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the reference is not indexed.
    pub fn remove_facet(&mut self, facet_pk: u32, group: Option<u32>, entity_pk: u32) -> CoreResult<()> {
        let facets = match group {
            Some(group) => self.groups.get_mut(&group),
            None => Some(&mut self.no_group),
        };
        let removed = facets
            .and_then(|facets| facets.get_mut(&facet_pk))
            .is_some_and(|entities| entities.remove(entity_pk));
        if !removed {
            return Err(CoreError::invalid_operation(format!(
                "entity {entity_pk} does not reference facet {facet_pk} of {} in group {group:?}",
                self.reference_name
            )));
        }

        let facets = self.facets_mut(group);
        if facets.get(&facet_pk).is_some_and(Bitmap::is_empty) {
            facets.remove(&facet_pk);
        }
        if let Some(group) = group {
            if self.groups.get(&group).is_some_and(BTreeMap::is_empty) {
                self.groups.remove(&group);
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Entities referencing `facet_pk` in any group.
    #[must_use]
    pub fn entities_with_facet(&self, facet_pk: u32) -> Bitmap {
        let mut result = self.no_group.get(&facet_pk).cloned().unwrap_or_default();
        for facets in self.groups.values() {
            if let Some(entities) = facets.get(&facet_pk) {
                result.union_with(entities);
            }
        }
        result
    }

    /// Entities referencing `facet_pk` within `group`.
    #[must_use]
    pub fn entities_with_facet_in_group(&self, group: u32, facet_pk: u32) -> Bitmap {
        self.groups
            .get(&group)
            .and_then(|facets| facets.get(&facet_pk))
            .cloned()
            .unwrap_or_default()
    }

    /// Groups holding at least one facet.
    #[must_use]
    pub fn groups(&self) -> Vec<u32> {
        self.groups.keys().copied().collect()
    }

    /// Reference this index belongs to.
    #[must_use]
    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    /// Returns true if no facet is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.no_group.is_empty() && self.groups.is_empty()
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
    pub fn create_storage_part(&self, entity_index_pk: u32) -> FacetIndexStoragePart {
        let pairs = |facets: &BTreeMap<u32, Bitmap>| {
            facets
                .iter()
                .map(|(facet, entities)| (*facet, entities.clone()))
                .collect::<Vec<_>>()
        };
        FacetIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            reference_name: self.reference_name.clone(),
            no_group_facets: pairs(&self.no_group),
            group_facets: self
                .groups
                .iter()
                .map(|(group_id, facets)| FacetGroup {
                    group_id: *group_id,
                    facets: pairs(facets),
                })
                .collect(),
        }
    }

    /// Rebuilds the index from its storage part. Empty entries are dropped.
    #[must_use]
    pub fn from_storage_part(part: FacetIndexStoragePart) -> Self {
        let collect = |facets: Vec<(u32, Bitmap)>| -> BTreeMap<u32, Bitmap> {
            facets
                .into_iter()
                .filter(|(_, entities)| !entities.is_empty())
                .collect()
        };
        Self {
            reference_name: part.reference_name,
            no_group: collect(part.no_group_facets),
            groups: part
                .group_facets
                .into_iter()
                .map(|group| (group.group_id, collect(group.facets)))
                .filter(|(_, facets)| !facets.is_empty())
                .collect(),
            dirty: false,
        }
    }
}

/// Stored form of a [`FacetIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Reference the facets belong to.
    pub reference_name: String,
    /// Facets without a group.
    pub no_group_facets: Vec<(u32, Bitmap)>,
    /// Facets by group.
    pub group_facets: Vec<FacetGroup>,
}

impl StoragePart for FacetIndexStoragePart {
    const KIND: PartKind = PartKind::Facet;

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
        AnyStoragePart::Facet(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouped_and_ungrouped_facets() {
        let mut index = FacetIndex::new("parameter");
        index.add_facet(100, None, 1);
        index.add_facet(100, Some(7), 2);
        index.add_facet(101, Some(7), 3);

        assert_eq!(index.entities_with_facet(100).to_vec(), vec![1, 2]);
        assert_eq!(index.entities_with_facet_in_group(7, 100).to_vec(), vec![2]);
        assert!(index.entities_with_facet_in_group(8, 100).is_empty());
        assert_eq!(index.groups(), vec![7]);
    }

    #[test]
    fn removal_prunes_empty_groups() {
        let mut index = FacetIndex::new("parameter");
        index.add_facet(100, Some(7), 2);
        index.remove_facet(100, Some(7), 2).unwrap();
        assert!(index.groups().is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn removing_absent_facet_fails() {
        let mut index = FacetIndex::new("parameter");
        index.add_facet(100, None, 1);
        assert!(index.remove_facet(100, Some(7), 1).is_err());
        assert!(index.remove_facet(100, None, 2).is_err());
        assert!(index.remove_facet(101, None, 1).is_err());
        assert_eq!(index.entities_with_facet(100).to_vec(), vec![1]);
    }

    #[test]
    fn part_round_trip() {
        let mut index = FacetIndex::new("parameter");
        index.add_facet(100, None, 1);
        index.add_facet(200, Some(3), 4);
        let rebuilt = FacetIndex::from_storage_part(index.create_storage_part(9));
        assert_eq!(rebuilt.entities_with_facet(200).to_vec(), vec![4]);
        assert_eq!(rebuilt.groups(), vec![3]);
    }
}
