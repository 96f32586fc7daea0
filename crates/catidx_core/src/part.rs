//! The storage part contract.
//!
//! Every independently persisted unit implements [`StoragePart`]. A part
//! knows how to derive its own 64-bit identity, either as a fixed constant
//! or from its owner primary key and a compressed logical key:
//!
//! ```text
//! storage part id = (owner primary key << 32) | compressed key id
//! ```
//!
//! Once an id is assigned to a part instance it never changes. A
//! recomputation that yields a different id is reported as
//! [`CoreError::IdentityMismatch`] and nothing is overwritten.

use crate::codec;
use crate::compressor::{CompressibleKey, KeyCompressor};
use crate::error::{CoreError, CoreResult};
use crate::AnyStoragePart;
use catidx_storage::PartAddress;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of part kinds.
///
/// The discriminant is the kind byte of the part envelope and of the
/// backend address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PartKind {
    /// Key compressor state.
    KeyCompressor = 0,
    /// Catalog-wide directory.
    CatalogIndex = 1,
    /// Per entity index directory.
    EntityIndex = 2,
    /// Unique attribute index.
    Unique = 3,
    /// Catalog-wide unique attribute index.
    GlobalUnique = 4,
    /// Filter histogram (+ range) index.
    Filter = 5,
    /// Sort index.
    Sort = 6,
    /// Chain (predecessor) index.
    Chain = 7,
    /// Attribute value cardinality index.
    AttributeCardinality = 8,
    /// Reference type cardinality index.
    ReferenceTypeCardinality = 9,
    /// Hierarchy tree index.
    Hierarchy = 10,
    /// Facet index.
    Facet = 11,
    /// Price list and currency index.
    Price = 12,
}

impl PartKind {
    /// All kinds in discriminant order.
    pub const ALL: [PartKind; 13] = [
        PartKind::KeyCompressor,
        PartKind::CatalogIndex,
        PartKind::EntityIndex,
        PartKind::Unique,
        PartKind::GlobalUnique,
        PartKind::Filter,
        PartKind::Sort,
        PartKind::Chain,
        PartKind::AttributeCardinality,
        PartKind::ReferenceTypeCardinality,
        PartKind::Hierarchy,
        PartKind::Facet,
        PartKind::Price,
    ];

    /// Returns the kind byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a kind byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(usize::from(byte)).copied()
    }

    /// Returns a stable human readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PartKind::KeyCompressor => "key-compressor",
            PartKind::CatalogIndex => "catalog-index",
            PartKind::EntityIndex => "entity-index",
            PartKind::Unique => "unique",
            PartKind::GlobalUnique => "global-unique",
            PartKind::Filter => "filter",
            PartKind::Sort => "sort",
            PartKind::Chain => "chain",
            PartKind::AttributeCardinality => "attribute-cardinality",
            PartKind::ReferenceTypeCardinality => "reference-type-cardinality",
            PartKind::Hierarchy => "hierarchy",
            PartKind::Facet => "facet",
            PartKind::Price => "price",
        }
    }

    /// Returns the backend address of a part of this kind.
    #[must_use]
    pub const fn address(self, id: u64) -> PartAddress {
        PartAddress::new(self as u8, id)
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Combines an owner primary key and a compressed key id.
#[must_use]
pub const fn compose_part_id(owner: u32, key_id: u32) -> u64 {
    ((owner as u64) << 32) | key_id as u64
}

/// Computes the id of a part owned by `owner` and stored under `key`.
///
/// Assigns a compressed id to `key` if it has none yet.
///
/// # Errors
///
/// Returns an error if the compressor is closed.
pub fn compute_unique_part_id(
    owner: u32,
    key: &CompressibleKey,
    compressor: &KeyCompressor,
) -> CoreResult<u64> {
    Ok(compose_part_id(owner, compressor.get_id(key)?))
}

/// How a part derives its storage id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartIdentity {
    /// The id is a constant (directory parts, hierarchy, compressor).
    Fixed(u64),
    /// The id is composed from an owner and a compressed key.
    Keyed {
        /// Owner primary key.
        owner: u32,
        /// Logical key the part is stored under.
        key: CompressibleKey,
    },
}

impl PartIdentity {
    /// Resolves the id, assigning a compressed id if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the compressor is closed.
    pub fn resolve(&self, compressor: &KeyCompressor) -> CoreResult<u64> {
        match self {
            PartIdentity::Fixed(id) => Ok(*id),
            PartIdentity::Keyed { owner, key } => compute_unique_part_id(*owner, key, compressor),
        }
    }

    /// Resolves the id without assigning a compressed id.
    ///
    /// Returns `None` if the key has never been compressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the compressor is closed.
    pub fn resolve_existing(&self, compressor: &KeyCompressor) -> CoreResult<Option<u64>> {
        match self {
            PartIdentity::Fixed(id) => Ok(Some(*id)),
            PartIdentity::Keyed { owner, key } => Ok(compressor
                .get_id_if_exists(key)?
                .map(|key_id| compose_part_id(*owner, key_id))),
        }
    }
}

/// The uniform contract of every storage part.
pub trait StoragePart: Serialize + DeserializeOwned {
    /// Kind of the part.
    const KIND: PartKind;

    /// Version of the body layout written by this build.
    const BODY_VERSION: u8 = 1;

    /// Returns the id assigned to this instance, if any.
    fn storage_part_pk(&self) -> Option<u64>;

    /// Assigns the id. Called by the store after a read.
    fn set_storage_part_pk(&mut self, id: u64);

    /// Returns how the id of this part is derived.
    fn identity(&self) -> PartIdentity;

    /// Wraps the part into the closed part enum.
    fn into_any(self) -> AnyStoragePart;

    /// Returns the uncompressed logical key of the part, if it has one.
    fn source_key(&self) -> Option<CompressibleKey> {
        match self.identity() {
            PartIdentity::Fixed(_) => None,
            PartIdentity::Keyed { key, .. } => Some(key),
        }
    }

    /// Computes the id this part would be stored under.
    ///
    /// # Errors
    ///
    /// Returns an error if the compressor is closed.
    fn compute_unique_part_id(&self, compressor: &KeyCompressor) -> CoreResult<u64> {
        self.identity().resolve(compressor)
    }

    /// Computes the id and assigns it if none is assigned yet.
    ///
    /// Idempotent for an unchanged key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityMismatch`] if an id is already assigned
    /// and the computed one differs.
    fn compute_unique_part_id_and_set(&mut self, compressor: &KeyCompressor) -> CoreResult<u64> {
        let computed = self.compute_unique_part_id(compressor)?;
        match self.storage_part_pk() {
            Some(assigned) if assigned != computed => Err(CoreError::IdentityMismatch {
                kind: Self::KIND,
                assigned,
                computed,
            }),
            Some(_) => Ok(computed),
            None => {
                self.set_storage_part_pk(computed);
                Ok(computed)
            }
        }
    }

    /// Decodes a body of the given layout version.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] for unsupported versions, or a
    /// codec error if the body is malformed.
    fn decode_body(version: u8, body: &[u8]) -> CoreResult<Self> {
        if version != Self::BODY_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported {} body version {version}",
                Self::KIND
            )));
        }
        codec::from_cbor(body)
    }
}

/// Checks that a part read from `id` still resolves to `id`.
///
/// # Errors
///
/// Returns [`CoreError::IdentityMismatch`] on a different id, or
/// [`CoreError::PartCorruption`] if the part's key was never compressed.
pub fn verify_identity<P: StoragePart>(
    part: &P,
    id: u64,
    compressor: &KeyCompressor,
) -> CoreResult<()> {
    match part.identity().resolve_existing(compressor)? {
        Some(computed) if computed == id => Ok(()),
        Some(computed) => Err(CoreError::IdentityMismatch {
            kind: P::KIND,
            assigned: id,
            computed,
        }),
        None => Err(CoreError::part_corruption(format!(
            "{} part {id} is stored under an unknown key",
            P::KIND
        ))),
    }
}
