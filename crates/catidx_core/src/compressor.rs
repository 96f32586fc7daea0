//! Key compression.
//!
//! Storage part ids are 64-bit numbers, but the logical keys parts are
//! stored under are rich composite values. The [`KeyCompressor`] assigns a
//! small stable `u32` to every logical key the first time it is seen. The
//! id is combined with the owning index primary key into the part id.
//!
//! The compressor is owned by the part store. It is loaded from its own
//! part on open, re-written on flush when new keys were assigned, and
//! closed together with the store.

use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::{AttributeIndexKey, AttributeKey, PriceIndexKey};
use crate::AnyStoragePart;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed id of the compressor part.
pub const KEY_COMPRESSOR_PART_ID: u64 = 1;

/// A logical key that can be compressed to a small id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompressibleKey {
    /// Key of a per-entity-index attribute index.
    Attribute(AttributeIndexKey),
    /// Key of a catalog-wide unique attribute.
    GlobalAttribute(AttributeKey),
    /// Key of a price list and currency index.
    Price(PriceIndexKey),
    /// Reference name of a facet or reference-type cardinality index.
    Reference(String),
}

impl fmt::Display for CompressibleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressibleKey::Attribute(key) => write!(f, "attribute {key}"),
            CompressibleKey::GlobalAttribute(key) => write!(f, "global attribute {key}"),
            CompressibleKey::Price(key) => write!(f, "price {key}"),
            CompressibleKey::Reference(name) => write!(f, "reference {name}"),
        }
    }
}

#[derive(Debug, Default)]
struct CompressorState {
    ids: BTreeMap<CompressibleKey, u32>,
    keys: BTreeMap<u32, CompressibleKey>,
    sequence: u32,
    dirty: bool,
    closed: bool,
}

impl CompressorState {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::CompressorClosed);
        }
        Ok(())
    }
}

/// Assigns stable small ids to logical keys.
///
/// Ids start at 1 and are never reused.
#[derive(Debug, Default)]
pub struct KeyCompressor {
    state: RwLock<CompressorState>,
}

impl KeyCompressor {
    /// Creates an empty compressor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a compressor from its stored part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] if the part maps one key or id twice
    /// or holds an id beyond its sequence.
    pub fn from_storage_part(part: KeyCompressorStoragePart) -> CoreResult<Self> {
        let mut state = CompressorState {
            sequence: part.sequence,
            ..CompressorState::default()
        };
        for (id, key) in part.entries {
            if id == 0 || id > part.sequence {
                return Err(CoreError::part_corruption(format!(
                    "compressed id {id} outside sequence {}",
                    part.sequence
                )));
            }
            if state.ids.insert(key.clone(), id).is_some() || state.keys.insert(id, key).is_some() {
                return Err(CoreError::part_corruption(format!(
                    "compressed id {id} is mapped twice"
                )));
            }
        }
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Returns the id of `key`, assigning the next free id if it is new.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompressorClosed`] after [`close`](Self::close),
    /// or [`CoreError::InvalidOperation`] when the id space is exhausted.
    pub fn get_id(&self, key: &CompressibleKey) -> CoreResult<u32> {
        {
            let state = self.state.read();
            state.ensure_open()?;
            if let Some(id) = state.ids.get(key) {
                return Ok(*id);
            }
        }

        let mut state = self.state.write();
        state.ensure_open()?;
        if let Some(id) = state.ids.get(key) {
            return Ok(*id);
        }
        let id = state
            .sequence
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid_operation("compressed key space exhausted"))?;
        state.sequence = id;
        state.ids.insert(key.clone(), id);
        state.keys.insert(id, key.clone());
        state.dirty = true;
        tracing::debug!(id, key = %key, "assigned compressed key id");
        Ok(id)
    }

    /// Returns the id of `key` without assigning one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompressorClosed`] after close.
    pub fn get_id_if_exists(&self, key: &CompressibleKey) -> CoreResult<Option<u32>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.ids.get(key).copied())
    }

    /// Returns the key an id was assigned to.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompressorClosed`] after close.
    pub fn key_for_id(&self, id: u32) -> CoreResult<Option<CompressibleKey>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.keys.get(&id).cloned())
    }

    /// Returns the number of known keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().ids.len()
    }

    /// Returns true if no key has been compressed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().ids.is_empty()
    }

    /// Returns true if keys were assigned since the last snapshot.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Returns true once the compressor has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Snapshots the compressor into its storage part.
    ///
    /// The dirty flag stays set until [`mark_persisted`](Self::mark_persisted)
    /// confirms the snapshot was stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompressorClosed`] after close.
    pub fn create_storage_part(&self) -> CoreResult<KeyCompressorStoragePart> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(KeyCompressorStoragePart {
            storage_part_pk: None,
            entries: state.keys.iter().map(|(id, key)| (*id, key.clone())).collect(),
            sequence: state.sequence,
        })
    }

    /// Clears the dirty flag after a snapshot up to `sequence` was stored.
    ///
    /// Keys assigned after that snapshot keep the compressor dirty.
    pub fn mark_persisted(&self, sequence: u32) {
        let mut state = self.state.write();
        if state.sequence == sequence {
            state.dirty = false;
        }
    }

    /// Closes the compressor. Every later call fails.
    pub fn close(&self) {
        self.state.write().closed = true;
    }
}

/// Stored form of the key compressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCompressorStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// `(id, key)` pairs ordered by id.
    pub entries: Vec<(u32, CompressibleKey)>,
    /// Last assigned id.
    pub sequence: u32,
}

impl StoragePart for KeyCompressorStoragePart {
    const KIND: PartKind = PartKind::KeyCompressor;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Fixed(KEY_COMPRESSOR_PART_ID)
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::KeyCompressor(self)
    }
}
