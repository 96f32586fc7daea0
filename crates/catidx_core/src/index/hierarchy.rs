//! Hierarchy tree index.
//!
//! The authoritative data is the item index: every node with its parent
//! and its order among siblings. Roots, the level index (parent to
//! children) and orphans are derived from it after every mutation by a
//! breadth-first walk from the roots. Nodes that cannot be reached
//! because their parent is missing, or because they sit on or under a
//! parent cycle, are orphans. Every item is either reachable or orphan.

use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Placement of one hierarchy node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Parent node, `None` for roots.
    pub parent: Option<u32>,
    /// Order among siblings.
    pub order: i32,
}

/// Partition check result of a hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyReport {
    /// Nodes reachable from a root.
    pub reachable: usize,
    /// Nodes that are not.
    pub orphans: usize,
    /// Whether reachable and orphan nodes partition the item index.
    pub partitioned: bool,
}

/// Tree of entity primary keys.
#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    item_index: BTreeMap<u32, HierarchyNode>,
    roots: Vec<u32>,
    level_index: BTreeMap<u32, Vec<u32>>,
    orphans: Vec<u32>,
    dirty: bool,
}

impl HierarchyIndex {
    /// Creates an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `pk` under `parent`, or at root level when `parent` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `pk` names itself as parent.
    pub fn set_hierarchy_for(&mut self, pk: u32, parent: Option<u32>, order: i32) -> CoreResult<()> {
        if parent == Some(pk) {
            return Err(CoreError::invalid_operation(format!(
                "hierarchy node {pk} cannot be its own parent"
            )));
        }
        self.item_index.insert(pk, HierarchyNode { parent, order });
        self.rebuild();
        self.dirty = true;
        Ok(())
    }

    /// Removes `pk`. Its children become orphans unless re-placed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `pk` is not placed.
    pub fn remove_hierarchy_for(&mut self, pk: u32) -> CoreResult<()> {
        if self.item_index.remove(&pk).is_none() {
            return Err(CoreError::invalid_operation(format!(
                "hierarchy node {pk} is not indexed"
            )));
        }
        self.rebuild();
        self.dirty = true;
        Ok(())
    }

    fn rebuild(&mut self) {
        let mut children: BTreeMap<u32, Vec<(i32, u32)>> = BTreeMap::new();
        let mut roots = Vec::new();
        for (pk, node) in &self.item_index {
            match node.parent {
                Some(parent) => children.entry(parent).or_default().push((node.order, *pk)),
                None => roots.push((node.order, *pk)),
            }
        }
        roots.sort_unstable();
        for siblings in children.values_mut() {
            siblings.sort_unstable();
        }

        let roots: Vec<u32> = roots.into_iter().map(|(_, pk)| pk).collect();
        let mut level_index = BTreeMap::new();
        let mut reached: BTreeSet<u32> = roots.iter().copied().collect();
        let mut queue: VecDeque<u32> = roots.iter().copied().collect();
        while let Some(pk) = queue.pop_front() {
            let Some(siblings) = children.get(&pk) else {
                continue;
            };
            let ordered: Vec<u32> = siblings
                .iter()
                .map(|(_, child)| *child)
                .filter(|child| reached.insert(*child))
                .collect();
            queue.extend(ordered.iter().copied());
            if !ordered.is_empty() {
                level_index.insert(pk, ordered);
            }
        }

        let orphans: Vec<u32> = self
            .item_index
            .keys()
            .filter(|pk| !reached.contains(pk))
            .copied()
            .collect();
        if orphans.len() > self.orphans.len() {
            tracing::warn!(orphans = orphans.len(), "hierarchy holds unreachable nodes");
        }

        self.roots = roots;
        self.level_index = level_index;
        self.orphans = orphans;
    }

    /// Root nodes ordered by `(order, pk)`.
    #[must_use]
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    /// Children of `pk` ordered by `(order, pk)`.
    #[must_use]
    pub fn children(&self, pk: u32) -> &[u32] {
        self.level_index.get(&pk).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent to children map of reachable nodes. Leaves have no entry.
    #[must_use]
    pub fn level_index(&self) -> &BTreeMap<u32, Vec<u32>> {
        &self.level_index
    }

    /// Unreachable nodes in ascending order.
    #[must_use]
    pub fn orphans(&self) -> &[u32] {
        &self.orphans
    }

    /// Placement of `pk`.
    #[must_use]
    pub fn node(&self, pk: u32) -> Option<HierarchyNode> {
        self.item_index.get(&pk).copied()
    }

    /// Reachable nodes in depth-first pre-order.
    #[must_use]
    pub fn list_from_root(&self) -> Vec<u32> {
        let mut result = Vec::with_capacity(self.size());
        let mut stack: Vec<u32> = self.roots.iter().rev().copied().collect();
        while let Some(pk) = stack.pop() {
            result.push(pk);
            stack.extend(self.children(pk).iter().rev().copied());
        }
        result
    }

    /// Number of reachable nodes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.item_index.len() - self.orphans.len()
    }

    /// Number of all nodes, orphans included.
    #[must_use]
    pub fn size_including_orphans(&self) -> usize {
        self.item_index.len()
    }

    /// Returns true if no node is placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.item_index.is_empty()
    }

    /// Checks that reachable nodes and orphans partition the item index.
    #[must_use]
    pub fn report(&self) -> HierarchyReport {
        let reachable: BTreeSet<u32> = self.list_from_root().into_iter().collect();
        let orphans: BTreeSet<u32> = self.orphans.iter().copied().collect();
        let disjoint = reachable.is_disjoint(&orphans) && orphans.len() == self.orphans.len();
        let covered = reachable.len() + orphans.len() == self.item_index.len()
            && self
                .item_index
                .keys()
                .all(|pk| reachable.contains(pk) || orphans.contains(pk));
        HierarchyReport {
            reachable: reachable.len(),
            orphans: orphans.len(),
            partitioned: disjoint && covered,
        }
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
    pub fn create_storage_part(&self, entity_index_pk: u32) -> HierarchyIndexStoragePart {
        HierarchyIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            item_index: self.item_index.iter().map(|(pk, node)| (*pk, *node)).collect(),
            roots: self.roots.clone(),
            level_index: self
                .level_index
                .iter()
                .map(|(pk, children)| (*pk, children.clone()))
                .collect(),
            orphans: self.orphans.clone(),
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// Derived structures are recomputed from the item index.
    #[must_use]
    pub fn from_storage_part(part: HierarchyIndexStoragePart) -> Self {
        let mut index = Self {
            item_index: part.item_index.into_iter().collect(),
            orphans: part.orphans,
            ..Self::default()
        };
        index.rebuild();
        if index.roots != part.roots {
            tracing::debug!("recomputed stored hierarchy roots");
        }
        index
    }
}

/// Stored form of a [`HierarchyIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index. Also the part id.
    pub entity_index_pk: u32,
    /// Every node with its placement.
    pub item_index: Vec<(u32, HierarchyNode)>,
    /// Root nodes.
    pub roots: Vec<u32>,
    /// Non-empty children lists of reachable nodes.
    pub level_index: Vec<(u32, Vec<u32>)>,
    /// Unreachable nodes.
    pub orphans: Vec<u32>,
}

impl StoragePart for HierarchyIndexStoragePart {
    const KIND: PartKind = PartKind::Hierarchy;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Fixed(u64::from(self.entity_index_pk))
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::Hierarchy(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hierarchy_partition() {
        let mut index = HierarchyIndex::new();
        index.set_hierarchy_for(1, None, 0).unwrap();
        index.set_hierarchy_for(2, Some(1), 0).unwrap();
        index.set_hierarchy_for(3, Some(2), 0).unwrap();
        index.set_hierarchy_for(5, Some(99), 0).unwrap();

        assert_eq!(index.roots(), &[1]);
        let expected: BTreeMap<u32, Vec<u32>> = [(1, vec![2]), (2, vec![3])].into_iter().collect();
        assert_eq!(index.level_index(), &expected);
        assert_eq!(index.orphans(), &[5]);
        assert!(index.level_index().values().all(|children| !children.contains(&5)));
        assert!(!index.level_index().contains_key(&5));
        assert_eq!(index.orphans().iter().filter(|pk| **pk == 5).count(), 1);
        assert_eq!(index.size(), 3);
        assert_eq!(index.size_including_orphans(), 4);
        assert!(index.report().partitioned);
    }

    #[test]
    fn orphan_adopted_when_parent_arrives() {
        let mut index = HierarchyIndex::new();
        index.set_hierarchy_for(5, Some(4), 0).unwrap();
        index.set_hierarchy_for(6, Some(5), 0).unwrap();
        assert_eq!(index.orphans(), &[5, 6]);
        index.set_hierarchy_for(4, None, 0).unwrap();
        assert!(index.orphans().is_empty());
        assert_eq!(index.list_from_root(), vec![4, 5, 6]);
    }

    #[test]
    fn cycle_members_are_orphans() {
        let mut index = HierarchyIndex::new();
        index.set_hierarchy_for(1, Some(2), 0).unwrap();
        index.set_hierarchy_for(2, Some(1), 0).unwrap();
        index.set_hierarchy_for(3, Some(1), 0).unwrap();
        assert!(index.roots().is_empty());
        assert_eq!(index.orphans(), &[1, 2, 3]);
        assert!(index.report().partitioned);
    }

    #[test]
    fn siblings_ordered_by_order_then_pk() {
        let mut index = HierarchyIndex::new();
        index.set_hierarchy_for(1, None, 0).unwrap();
        index.set_hierarchy_for(10, Some(1), 2).unwrap();
        index.set_hierarchy_for(11, Some(1), 1).unwrap();
        index.set_hierarchy_for(9, Some(1), 2).unwrap();
        assert_eq!(index.children(1), &[11, 9, 10]);
        assert!(index.children(10).is_empty());
    }

    #[test]
    fn removing_parent_orphans_subtree() {
        let mut index = HierarchyIndex::new();
        index.set_hierarchy_for(1, None, 0).unwrap();
        index.set_hierarchy_for(2, Some(1), 0).unwrap();
        index.set_hierarchy_for(3, Some(2), 0).unwrap();
        index.remove_hierarchy_for(2).unwrap();
        assert_eq!(index.orphans(), &[3]);
        assert!(index.level_index().is_empty());
        assert!(index.remove_hierarchy_for(2).is_err());
    }

    #[test]
    fn self_parent_is_rejected() {
        let mut index = HierarchyIndex::new();
        assert!(index.set_hierarchy_for(4, Some(4), 0).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn part_round_trip() {
        let mut index = HierarchyIndex::new();
        index.set_hierarchy_for(1, None, 0).unwrap();
        index.set_hierarchy_for(2, Some(1), 0).unwrap();
        index.set_hierarchy_for(7, Some(50), 0).unwrap();
        let rebuilt = HierarchyIndex::from_storage_part(index.create_storage_part(3));
        assert_eq!(rebuilt.roots(), index.roots());
        assert_eq!(rebuilt.level_index(), index.level_index());
        assert_eq!(rebuilt.orphans(), index.orphans());
        assert!(!rebuilt.is_dirty());
    }

    proptest! {
        #[test]
        fn partition_holds_after_every_mutation(
            ops in prop::collection::vec((1u32..30, prop::option::of(0u32..35), -3i32..3, any::<bool>()), 1..80)
        ) {
            let mut index = HierarchyIndex::new();
            for (pk, parent, order, remove) in ops {
                if remove {
                    let _ = index.remove_hierarchy_for(pk);
                } else {
                    let _ = index.set_hierarchy_for(pk, parent, order);
                }
                prop_assert!(index.report().partitioned);
                prop_assert_eq!(index.size() + index.orphans().len(), index.size_including_orphans());
            }
        }
    }
}
