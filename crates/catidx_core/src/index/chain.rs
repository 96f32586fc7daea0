//! Chain (predecessor) index.
//!
//! Records an ordering curated by hand: every element names the element
//! it follows. Inconsistent input is kept and reported, never rejected:
//!
//! - `Head`: no predecessor
//! - `Linked`: follows exactly one resolvable predecessor
//! - `Conflict`: its predecessor is claimed by several elements, or it
//!   lies on a predecessor cycle
//! - `Orphan`: its predecessor is not in the index
//!
//! States of all elements are recomputed on every mutation, so a later
//! insert can resolve an earlier orphan or conflict.

use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::AttributeIndexKey;
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// State of one chain element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChainElementState {
    /// Starts a chain.
    Head,
    /// Follows a resolvable predecessor.
    Linked,
    /// Shares its predecessor with another element or lies on a cycle.
    Conflict,
    /// Follows a predecessor missing from the index.
    Orphan,
}

/// Stored element of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainElement {
    /// Element primary key.
    pub primary_key: u32,
    /// Element it follows.
    pub predecessor: Option<u32>,
    /// State at the time of storing.
    pub state: ChainElementState,
}

/// Summary of a chain's consistency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of heads.
    pub heads: usize,
    /// Elements in conflict.
    pub conflicts: Vec<u32>,
    /// Elements whose predecessor is missing.
    pub orphans: Vec<u32>,
}

/// Predecessor ordering over one attribute.
#[derive(Debug, Clone)]
pub struct ChainIndex {
    attribute_key: AttributeIndexKey,
    predecessors: BTreeMap<u32, Option<u32>>,
    states: BTreeMap<u32, ChainElementState>,
    dirty: bool,
}

impl ChainIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(attribute_key: AttributeIndexKey) -> Self {
        Self {
            attribute_key,
            predecessors: BTreeMap::new(),
            states: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Sets the predecessor of `pk`. `None` makes it a head.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `pk` names itself.
    pub fn upsert_predecessor(&mut self, pk: u32, predecessor: Option<u32>) -> CoreResult<()> {
        if predecessor == Some(pk) {
            return Err(CoreError::invalid_operation(format!(
                "chain element {pk} of {} cannot follow itself",
                self.attribute_key
            )));
        }
        self.predecessors.insert(pk, predecessor);
        self.recompute();
        self.dirty = true;
        Ok(())
    }

    /// Removes `pk` from the chain.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `pk` is not in the chain.
    pub fn remove_predecessor(&mut self, pk: u32) -> CoreResult<()> {
        if self.predecessors.remove(&pk).is_none() {
            return Err(CoreError::invalid_operation(format!(
                "chain element {pk} of {} is not indexed",
                self.attribute_key
            )));
        }
        self.recompute();
        self.dirty = true;
        Ok(())
    }

    fn recompute(&mut self) {
        let mut claims: BTreeMap<u32, usize> = BTreeMap::new();
        for predecessor in self.predecessors.values().flatten() {
            *claims.entry(*predecessor).or_insert(0) += 1;
        }
        let on_cycle = self.cycle_members();

        let previous_conflicts = self.conflict_count();
        self.states = self
            .predecessors
            .iter()
            .map(|(pk, predecessor)| {
                let state = match predecessor {
                    None => ChainElementState::Head,
                    Some(_) if on_cycle.contains(pk) => ChainElementState::Conflict,
                    Some(p) if claims.get(p).copied().unwrap_or(0) > 1 => ChainElementState::Conflict,
                    Some(p) if !self.predecessors.contains_key(p) => ChainElementState::Orphan,
                    Some(_) => ChainElementState::Linked,
                };
                (*pk, state)
            })
            .collect();

        let conflicts = self.conflict_count();
        if conflicts > previous_conflicts {
            tracing::warn!(
                attribute = %self.attribute_key,
                conflicts,
                "chain index holds conflicting predecessors"
            );
        }
    }

    fn cycle_members(&self) -> BTreeSet<u32> {
        let mut on_cycle = BTreeSet::new();
        let mut finished: BTreeSet<u32> = BTreeSet::new();
        for start in self.predecessors.keys() {
            if finished.contains(start) {
                continue;
            }
            let mut path = Vec::new();
            let mut position: BTreeMap<u32, usize> = BTreeMap::new();
            let mut current = Some(*start);
            while let Some(pk) = current {
                if finished.contains(&pk) {
                    break;
                }
                if let Some(index) = position.get(&pk) {
                    on_cycle.extend(path[*index..].iter().copied());
                    break;
                }
                position.insert(pk, path.len());
                path.push(pk);
                current = self.predecessors.get(&pk).copied().flatten();
            }
            finished.extend(path);
        }
        on_cycle
    }

    fn conflict_count(&self) -> usize {
        self.states
            .values()
            .filter(|state| **state == ChainElementState::Conflict)
            .count()
    }

    /// State of `pk`.
    #[must_use]
    pub fn state(&self, pk: u32) -> Option<ChainElementState> {
        self.states.get(&pk).copied()
    }

    /// Predecessor of `pk`. The outer `None` means `pk` is not indexed.
    #[must_use]
    pub fn predecessor(&self, pk: u32) -> Option<Option<u32>> {
        self.predecessors.get(&pk).copied()
    }

    /// Elements in conflict, ascending.
    #[must_use]
    pub fn conflicts(&self) -> Vec<u32> {
        self.elements_in(ChainElementState::Conflict)
    }

    /// Elements whose predecessor is missing, ascending.
    #[must_use]
    pub fn orphans(&self) -> Vec<u32> {
        self.elements_in(ChainElementState::Orphan)
    }

    fn elements_in(&self, wanted: ChainElementState) -> Vec<u32> {
        self.states
            .iter()
            .filter(|(_, state)| **state == wanted)
            .map(|(pk, _)| *pk)
            .collect()
    }

    /// Returns true if the elements form at most one unbroken chain.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let report = self.report();
        report.heads <= 1 && report.conflicts.is_empty() && report.orphans.is_empty()
    }

    /// Summarizes heads, conflicts and orphans.
    #[must_use]
    pub fn report(&self) -> ChainReport {
        ChainReport {
            heads: self
                .states
                .values()
                .filter(|state| **state == ChainElementState::Head)
                .count(),
            conflicts: self.conflicts(),
            orphans: self.orphans(),
        }
    }

    /// All elements in chain order.
    ///
    /// Chains starting at heads come first, ordered by head key. Elements
    /// that cannot be reached from a head follow in ascending key order.
    #[must_use]
    pub fn ordered_pks(&self) -> Vec<u32> {
        let mut successors: BTreeMap<u32, u32> = BTreeMap::new();
        for (pk, predecessor) in &self.predecessors {
            if let (Some(p), Some(ChainElementState::Linked)) = (predecessor, self.states.get(pk)) {
                successors.insert(*p, *pk);
            }
        }

        let mut ordered = Vec::with_capacity(self.predecessors.len());
        let mut seen = BTreeSet::new();
        for (pk, state) in &self.states {
            if *state != ChainElementState::Head {
                continue;
            }
            let mut current = Some(*pk);
            while let Some(element) = current {
                if !seen.insert(element) {
                    break;
                }
                ordered.push(element);
                current = successors.get(&element).copied();
            }
        }
        for pk in self.predecessors.keys() {
            if seen.insert(*pk) {
                ordered.push(*pk);
            }
        }
        ordered
    }

    /// Indexed attribute.
    #[must_use]
    pub fn attribute_key(&self) -> &AttributeIndexKey {
        &self.attribute_key
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predecessors.len()
    }

    /// Returns true if the chain holds no element.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predecessors.is_empty()
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
    pub fn create_storage_part(&self, entity_index_pk: u32) -> ChainIndexStoragePart {
        let element_states = self
            .predecessors
            .iter()
            .map(|(pk, predecessor)| ChainElement {
                primary_key: *pk,
                predecessor: *predecessor,
                state: self.states.get(pk).copied().unwrap_or(ChainElementState::Orphan),
            })
            .collect::<Vec<_>>();
        let links = element_states
            .iter()
            .filter(|element| element.state == ChainElementState::Linked)
            .filter_map(|element| element.predecessor.map(|p| (p, element.primary_key)))
            .collect();
        ChainIndexStoragePart {
            storage_part_pk: None,
            entity_index_pk,
            attribute_key: self.attribute_key.clone(),
            element_states,
            links,
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// States are recomputed from the stored predecessors.
    #[must_use]
    pub fn from_storage_part(part: ChainIndexStoragePart) -> Self {
        let mut index = Self::new(part.attribute_key);
        index.predecessors = part
            .element_states
            .iter()
            .map(|element| (element.primary_key, element.predecessor))
            .collect();
        index.recompute();
        let drifted = part
            .element_states
            .iter()
            .filter(|element| index.state(element.primary_key) != Some(element.state))
            .count();
        if drifted > 0 {
            tracing::debug!(attribute = %index.attribute_key, drifted, "recomputed stored chain states");
        }
        index.dirty = false;
        index
    }
}

/// Stored form of a [`ChainIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Owning entity index.
    pub entity_index_pk: u32,
    /// Indexed attribute.
    pub attribute_key: AttributeIndexKey,
    /// Every element with its predecessor and state.
    pub element_states: Vec<ChainElement>,
    /// `(predecessor, successor)` pairs of linked elements.
    pub links: Vec<(u32, u32)>,
}

impl StoragePart for ChainIndexStoragePart {
    const KIND: PartKind = PartKind::Chain;

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
        AnyStoragePart::Chain(self)
    }
}
